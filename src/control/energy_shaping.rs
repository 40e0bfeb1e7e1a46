use std::f64::consts::PI;

use nalgebra::Vector4;
use serde::{Deserialize, Serialize};

use crate::control::{Controller, LqrController};
use crate::models::PhysicalParams;

/// Which law the hybrid controller applies at a given pole angle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    SwingUp,
    Stabilize,
}

/// Gains of the energy-pumping swing-up law.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwingUpGains {
    /// Energy error feedback
    pub k_e: f64,
    /// Cart position recentering
    pub k_p: f64,
    /// Cart velocity damping
    pub k_d: f64,
}

impl Default for SwingUpGains {
    fn default() -> SwingUpGains {
        SwingUpGains {
            k_e: 2.0,
            k_p: 5.0,
            k_d: 1.0,
        }
    }
}

/// Energy-based swing-up: pumps the pendulum toward the upright energy while
/// keeping the cart near the track center.
///
/// Shares `PhysicalParams` with the dynamics model so the energy bookkeeping
/// cannot drift from the simulated plant.
#[derive(Debug, Clone, Copy)]
pub struct SwingUpController {
    params: PhysicalParams,
    gains: SwingUpGains,
}

impl SwingUpController {
    pub fn new(params: PhysicalParams, gains: SwingUpGains) -> SwingUpController {
        SwingUpController { params, gains }
    }
}

impl Controller for SwingUpController {
    fn control(&self, _t: f64, x: &Vector4<f64>) -> f64 {
        let energy_error = self.params.pendulum_energy(x[2], x[3]) - self.params.upright_energy();
        self.gains.k_e * x[3] * x[2].cos() * energy_error
            - self.gains.k_p * x[0]
            - self.gains.k_d * x[1]
    }
}

/// Swing-up outside the capture window, LQR stabilization inside it.
///
/// The mode is a pure function of the pole angle, recomputed at every
/// evaluation; there is no latched state and no hysteresis, so the controller
/// is safe to call at trial times in any order.
#[derive(Debug, Clone)]
pub struct HybridController {
    swing_up: SwingUpController,
    stabilizer: LqrController,
    eps: f64,
}

impl HybridController {
    /// Angular half-width of the default capture window.
    pub const DEFAULT_EPS: f64 = PI / 4.0;

    pub fn new(
        swing_up: SwingUpController,
        stabilizer: LqrController,
        eps: f64,
    ) -> HybridController {
        HybridController {
            swing_up,
            stabilizer,
            eps,
        }
    }

    /// Law selected at pole angle `theta`, independent of the rest of the
    /// state. The window is the open interval `(PI - eps, PI + eps)` on the
    /// raw, unwrapped angle.
    pub fn mode(&self, theta: f64) -> ControlMode {
        if theta > PI - self.eps && theta < PI + self.eps {
            ControlMode::Stabilize
        } else {
            ControlMode::SwingUp
        }
    }
}

impl Controller for HybridController {
    fn control(&self, t: f64, x: &Vector4<f64>) -> f64 {
        match self.mode(x[2]) {
            ControlMode::Stabilize => self.stabilizer.control(t, x),
            ControlMode::SwingUp => self.swing_up.control(t, x),
        }
    }
}
