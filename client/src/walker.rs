//! Automatic movement for headless clients
//!
//! A [`Walker`] strolls towards random waypoints inside the world at a fixed
//! speed, producing the kind of steady position stream a real player would.

use rand::Rng;
use shared::{Position, SPAWN_POSITION, WORLD_HEIGHT, WORLD_WIDTH};

/// Waypoints are kept this far from the world edge.
const MARGIN: f32 = 20.0;

#[derive(Debug, Clone)]
pub struct Walker {
    position: Position,
    target: Position,
    /// Units per second
    speed: f32,
}

impl Walker {
    pub fn new(speed: f32) -> Self {
        Self {
            position: SPAWN_POSITION,
            target: SPAWN_POSITION,
            speed,
        }
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn target(&self) -> Position {
        self.target
    }

    /// Advances the walker by `dt` seconds and returns the new position.
    ///
    /// A new waypoint is drawn from `rng` whenever the current one has been
    /// reached.
    pub fn step<R: Rng>(&mut self, dt: f32, rng: &mut R) -> Position {
        if self.position.distance_to(&self.target) <= f32::EPSILON {
            self.target = random_waypoint(rng);
        }

        let budget = (self.speed * dt).max(0.0);
        let remaining = self.position.distance_to(&self.target);

        self.position = if remaining <= budget {
            self.target
        } else {
            let t = budget / remaining;
            Position::new(
                self.position.x + (self.target.x - self.position.x) * t,
                self.position.y + (self.target.y - self.position.y) * t,
            )
        };

        self.position
    }
}

fn random_waypoint<R: Rng>(rng: &mut R) -> Position {
    Position::new(
        rng.gen_range(MARGIN..WORLD_WIDTH - MARGIN),
        rng.gen_range(MARGIN..WORLD_HEIGHT - MARGIN),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_walker_starts_at_spawn() {
        let walker = Walker::new(100.0);
        assert_eq!(walker.position(), SPAWN_POSITION);
    }

    #[test]
    fn test_step_respects_speed() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut walker = Walker::new(100.0);

        let after = walker.step(0.1, &mut rng);
        let travelled = SPAWN_POSITION.distance_to(&after);

        if after == walker.target() {
            assert!(travelled <= 10.0 + 0.01);
        } else {
            assert_approx_eq!(travelled, 10.0, 0.01);
        }
    }

    #[test]
    fn test_walker_reaches_waypoint() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut walker = Walker::new(100.0);
        walker.step(0.0, &mut rng);
        let target = walker.target();

        // A whole world diagonal is 1000 units; 20 seconds is plenty.
        walker.step(20.0, &mut rng);
        assert_eq!(walker.position(), target);
    }

    #[test]
    fn test_walker_stays_in_world() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut walker = Walker::new(500.0);

        for _ in 0..1_000 {
            let position = walker.step(0.05, &mut rng);
            assert!(position.is_finite());
            assert!((0.0..=WORLD_WIDTH).contains(&position.x));
            assert!((0.0..=WORLD_HEIGHT).contains(&position.y));
        }
    }

    #[test]
    fn test_zero_dt_does_not_move() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut walker = Walker::new(100.0);
        walker.step(0.1, &mut rng);
        let before = walker.position();

        assert_eq!(walker.step(0.0, &mut rng), before);
    }

    #[test]
    fn test_waypoints_keep_margin() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..500 {
            let waypoint = random_waypoint(&mut rng);
            assert!(waypoint.x >= MARGIN && waypoint.x <= WORLD_WIDTH - MARGIN);
            assert!(waypoint.y >= MARGIN && waypoint.y <= WORLD_HEIGHT - MARGIN);
        }
    }
}
