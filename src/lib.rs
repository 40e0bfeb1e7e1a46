//! Cart-pole swing-up and LQR stabilization: nonlinear dynamics, Riccati
//! based gain synthesis, an energy-pumping swing-up law and an adaptive
//! closed-loop simulator.

pub mod control;
pub mod error;
pub mod models;
pub mod simulation;

pub use error::Error;
