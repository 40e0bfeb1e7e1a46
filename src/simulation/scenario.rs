use std::f64::consts::PI;

use nalgebra::Vector4;
use rand::Rng;
use rand_distr::{Distribution, Uniform};

/// Randomized initial condition and goal for one run.
///
/// Perturbation ranges: cart position within 2.5 m of the track center, pole
/// angle within pi/4 of its nominal, goal position within 4 m of zero. The
/// RNG is handed in by the caller, so runs are reproducible from a seed.
#[derive(Debug, Clone, Copy)]
pub struct Scenario {
    pub initial_state: Vector4<f64>,
    pub reference: Vector4<f64>,
}

impl Scenario {
    /// Perturbed start around the upright equilibrium; the stabilizer must
    /// hold the pole while moving the cart to the goal.
    pub fn stabilization<R: Rng + ?Sized>(rng: &mut R) -> Scenario {
        Scenario::sample(PI, rng)
    }

    /// Perturbed start around the hanging rest; the controller must first
    /// pump the pole upright.
    pub fn swing_up<R: Rng + ?Sized>(rng: &mut R) -> Scenario {
        Scenario::sample(0.0, rng)
    }

    fn sample<R: Rng + ?Sized>(nominal_angle: f64, rng: &mut R) -> Scenario {
        let position = Uniform::new_inclusive(-2.5, 2.5).sample(rng);
        let angle = Uniform::new_inclusive(-PI / 4.0, PI / 4.0).sample(rng);
        let goal = Uniform::new_inclusive(-4.0, 4.0).sample(rng);
        Scenario {
            initial_state: Vector4::new(position, 0.0, nominal_angle + angle, 0.0),
            reference: Vector4::new(goal, 0.0, PI, 0.0),
        }
    }
}
