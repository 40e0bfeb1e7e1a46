mod integrator;
mod scenario;

pub use integrator::StepControl;
pub use scenario::Scenario;

use nalgebra::Vector4;

use crate::control::Controller;
use crate::error::Error;
use crate::models::CartPole;

/// Time-indexed sequence of states produced by [`simulate`].
///
/// `times` and `states` always have the same length and are index-aligned;
/// the renderer-facing series come out of [`Trajectory::positions`] and
/// [`Trajectory::angles`].
#[derive(Debug, Clone, Default)]
pub struct Trajectory {
    times: Vec<f64>,
    states: Vec<Vector4<f64>>,
}

impl Trajectory {
    fn with_capacity(n: usize) -> Trajectory {
        Trajectory {
            times: Vec::with_capacity(n),
            states: Vec::with_capacity(n),
        }
    }

    fn push(&mut self, time: f64, state: Vector4<f64>) {
        self.times.push(time);
        self.states.push(state);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn states(&self) -> &[Vector4<f64>] {
        &self.states
    }

    pub fn last(&self) -> Option<(f64, &Vector4<f64>)> {
        self.times.last().copied().zip(self.states.last())
    }

    /// Cart position series, index-aligned with [`Trajectory::angles`].
    pub fn positions(&self) -> Vec<f64> {
        self.states.iter().map(|x| x[0]).collect()
    }

    /// Pole angle series.
    pub fn angles(&self) -> Vec<f64> {
        self.states.iter().map(|x| x[2]).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, &Vector4<f64>)> + '_ {
        self.times.iter().copied().zip(self.states.iter())
    }
}

/// Integrate the closed loop from `x0` over `[0, horizon]`, sampled every
/// `step`, with default step control.
pub fn simulate(
    model: &CartPole,
    controller: &dyn Controller,
    x0: Vector4<f64>,
    horizon: f64,
    step: f64,
) -> Result<Trajectory, Error> {
    simulate_with(model, controller, x0, horizon, step, &StepControl::default())
}

/// Integrate the closed loop `x_dot = f(x, controller(t, x))`.
///
/// The controller is a black box; mode switches inside it need no support
/// from the integrator. Between consecutive grid points the solver steps
/// adaptively and carries its adapted step size forward. An integration
/// failure is surfaced as [`Error::Integration`] with the last reached time
/// and state; a partial trajectory is never returned as success.
pub fn simulate_with(
    model: &CartPole,
    controller: &dyn Controller,
    x0: Vector4<f64>,
    horizon: f64,
    step: f64,
    ctrl: &StepControl,
) -> Result<Trajectory, Error> {
    if !(horizon.is_finite() && horizon > 0.0) {
        return Err(Error::Configuration(format!(
            "horizon must be positive and finite, got {horizon}"
        )));
    }
    if !(step.is_finite() && step > 0.0 && step <= horizon) {
        return Err(Error::Configuration(format!(
            "step must lie in (0, horizon], got {step}"
        )));
    }

    let f = |t: f64, x: &Vector4<f64>| model.derivative(x, controller.control(t, x));

    // grid 0, step, 2 step, ... with the last sample <= horizon
    let samples = (horizon / step + 1e-9).floor() as usize;
    let mut trajectory = Trajectory::with_capacity(samples + 1);
    trajectory.push(0.0, x0);

    let mut x = x0;
    let mut h = step;
    for i in 0..samples {
        let t0 = i as f64 * step;
        let t1 = (i + 1) as f64 * step;
        match integrator::advance(&f, t0, t1, x, h, ctrl) {
            Ok((next, h_next)) => {
                x = next;
                h = h_next;
                trajectory.push(t1, x);
            }
            Err(stall) => {
                return Err(Error::Integration {
                    time: stall.time,
                    state: stall.state,
                    failure: stall.failure,
                });
            }
        }
    }
    Ok(trajectory)
}
