use std::fmt;

use nalgebra::Vector4;

/// Why the integrator could not advance past the reported time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationFailure {
    NonFiniteDerivative,
    StepSizeUnderflow,
    StepBudgetExhausted,
}

impl fmt::Display for IntegrationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            IntegrationFailure::NonFiniteDerivative => "non-finite derivative",
            IntegrationFailure::StepSizeUnderflow => "step size underflow",
            IntegrationFailure::StepBudgetExhausted => "step budget exhausted",
        };
        write!(f, "{reason}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Invalid physical parameters or cost matrices, rejected before any
    /// numerical work is attempted.
    Configuration(String),
    /// The Riccati solve produced no valid stabilizing solution.
    Numerical(String),
    /// The ODE solver stalled; carries the last state it reached.
    Integration {
        time: f64,
        state: Vector4<f64>,
        failure: IntegrationFailure,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Configuration(msg) => write!(f, "configuration error: {msg}"),
            Error::Numerical(msg) => write!(f, "numerical error: {msg}"),
            Error::Integration { time, failure, .. } => {
                write!(f, "integration stalled at t = {time}: {failure}")
            }
        }
    }
}

impl std::error::Error for Error {}
