mod energy_shaping;
mod lqr;

pub use energy_shaping::{ControlMode, HybridController, SwingUpController, SwingUpGains};
pub use lqr::{lqr, solve_continuous_are, LqrController};

use nalgebra::Vector4;

/// A feedback law producing the scalar force applied to the cart.
///
/// Implementations must be pure in `t` and `x`: the adaptive integrator
/// evaluates trial steps out of temporal order and retries rejected steps.
pub trait Controller {
    fn control(&self, t: f64, x: &Vector4<f64>) -> f64;
}
