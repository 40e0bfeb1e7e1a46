//! Embedded Runge-Kutta-Fehlberg 4(5) stepping with adaptive step control.

use nalgebra::SVector;

use crate::error::IntegrationFailure;

/// Tolerances and guard rails for the adaptive stepper.
#[derive(Debug, Clone, Copy)]
pub struct StepControl {
    /// Absolute error tolerance
    pub tol_abs: f64,
    /// Relative error tolerance
    pub tol_rel: f64,
    /// Smallest step the controller may attempt before giving up
    pub h_min: f64,
    /// Step budget per sampling interval, a ceiling against pathological
    /// stiffness driving unbounded subdivision
    pub max_steps: usize,
}

impl Default for StepControl {
    fn default() -> StepControl {
        StepControl {
            tol_abs: 1e-8,
            tol_rel: 1e-6,
            h_min: 1e-12,
            max_steps: 100_000,
        }
    }
}

/// Where an [`advance`] call stopped when it could not make progress.
#[derive(Debug, Clone)]
pub(crate) struct Stall<const N: usize> {
    pub time: f64,
    pub state: SVector<f64, N>,
    pub failure: IntegrationFailure,
}

// RKF45 Butcher tableau: evaluation nodes, stage coefficients, 4th-order
// propagation weights and the 5th-vs-4th order truncation error weights.
const C: [f64; 6] = [0.0, 1.0 / 4.0, 3.0 / 8.0, 12.0 / 13.0, 1.0, 1.0 / 2.0];
#[rustfmt::skip]
const A: [[f64; 5]; 6] = [
    [0.0, 0.0, 0.0, 0.0, 0.0],
    [1.0 / 4.0, 0.0, 0.0, 0.0, 0.0],
    [3.0 / 32.0, 9.0 / 32.0, 0.0, 0.0, 0.0],
    [1932.0 / 2197.0, -7200.0 / 2197.0, 7296.0 / 2197.0, 0.0, 0.0],
    [439.0 / 216.0, -8.0, 3680.0 / 513.0, -845.0 / 4104.0, 0.0],
    [-8.0 / 27.0, 2.0, -3544.0 / 2565.0, 1859.0 / 4104.0, -11.0 / 40.0],
];
const B4: [f64; 6] = [25.0 / 216.0, 0.0, 1408.0 / 2565.0, 2197.0 / 4104.0, -1.0 / 5.0, 0.0];
#[rustfmt::skip]
const ERR: [f64; 6] = [
    1.0 / 360.0, 0.0, -128.0 / 4275.0, -2197.0 / 75240.0, 1.0 / 50.0, 2.0 / 55.0,
];

const SAFETY: f64 = 0.9;

/// Advance `state` from `t_start` to `t_end` with adaptive RKF45 steps.
///
/// `h` is the trial step carried over from the previous interval; the adapted
/// value is handed back so the next interval resumes from it. On failure the
/// last successfully reached time and state are reported, never a partially
/// advanced one.
pub(crate) fn advance<F, const N: usize>(
    f: &F,
    t_start: f64,
    t_end: f64,
    state: SVector<f64, N>,
    h: f64,
    ctrl: &StepControl,
) -> Result<(SVector<f64, N>, f64), Stall<N>>
where
    F: Fn(f64, &SVector<f64, N>) -> SVector<f64, N>,
{
    let mut t = t_start;
    let mut x = state;
    let mut h = h.min(t_end - t_start).max(ctrl.h_min);
    let mut steps = 0;

    while t < t_end {
        steps += 1;
        if steps > ctrl.max_steps {
            return Err(Stall {
                time: t,
                state: x,
                failure: IntegrationFailure::StepBudgetExhausted,
            });
        }

        let clamped = t_end - t < h;
        let h_trial = h.min(t_end - t);

        let mut k = [SVector::<f64, N>::zeros(); 6];
        for stage in 0..6 {
            let mut xs = x;
            for (j, &coef) in A[stage][..stage].iter().enumerate() {
                if coef != 0.0 {
                    xs += k[j] * (coef * h_trial);
                }
            }
            k[stage] = f(t + C[stage] * h_trial, &xs);
            if !k[stage].iter().all(|v| v.is_finite()) {
                return Err(Stall {
                    time: t,
                    state: x,
                    failure: IntegrationFailure::NonFiniteDerivative,
                });
            }
        }

        let mut error = SVector::<f64, N>::zeros();
        let mut proposal = x;
        for stage in 0..6 {
            error += k[stage] * (ERR[stage] * h_trial);
            proposal += k[stage] * (B4[stage] * h_trial);
        }

        // max norm of the error, scaled per component by tol_abs + tol_rel |x|
        let mut norm = 1e-16_f64;
        for i in 0..N {
            let scale = ctrl.tol_abs + ctrl.tol_rel * x[i].abs();
            norm = norm.max((error[i] / scale).abs());
        }
        let rescale = (SAFETY / norm.powf(0.2)).clamp(0.1, 10.0);

        if norm <= 1.0 {
            t += h_trial;
            x = proposal;
            if !clamped {
                h = h_trial * rescale;
            }
        } else {
            let shrunk = h_trial * rescale;
            if shrunk < ctrl.h_min {
                return Err(Stall {
                    time: t,
                    state: x,
                    failure: IntegrationFailure::StepSizeUnderflow,
                });
            }
            h = shrunk;
        }
    }

    Ok((x, h))
}
