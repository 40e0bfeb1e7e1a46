use nalgebra::{Matrix2, Matrix4, Vector2, Vector4};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Physical constants of one cart-pole, immutable for the lifetime of a run.
///
/// `gravity` holds the magnitude of the gravitational acceleration; the
/// equations of motion carry the signs. The pole angle is measured from the
/// hanging-down position, so `theta = PI` is the upright equilibrium.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalParams {
    /// Pole mass [kg]
    pub pole_mass: f64,
    /// Cart mass [kg]
    pub cart_mass: f64,
    /// Pole length [m]
    pub length: f64,
    /// Gravitational acceleration magnitude [m/s^2]
    pub gravity: f64,
    /// Viscous track friction coefficient acting on the cart
    pub friction: f64,
}

impl PhysicalParams {
    pub fn new(
        pole_mass: f64,
        cart_mass: f64,
        length: f64,
        gravity: f64,
        friction: f64,
    ) -> Result<PhysicalParams, Error> {
        let params = PhysicalParams {
            pole_mass,
            cart_mass,
            length,
            gravity,
            friction,
        };
        params.validate()?;
        Ok(params)
    }

    fn validate(&self) -> Result<(), Error> {
        for (name, value) in [
            ("pole_mass", self.pole_mass),
            ("cart_mass", self.cart_mass),
            ("length", self.length),
            ("gravity", self.gravity),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::Configuration(format!(
                    "{name} must be finite and strictly positive, got {value}"
                )));
            }
        }
        if !(self.friction.is_finite() && self.friction >= 0.0) {
            return Err(Error::Configuration(format!(
                "friction must be finite and non-negative, got {}",
                self.friction
            )));
        }
        Ok(())
    }

    /// Mechanical energy of the pendulum alone, with the potential reference
    /// at the pivot height.
    pub fn pendulum_energy(&self, theta: f64, theta_dot: f64) -> f64 {
        0.5 * self.pole_mass * self.length.powi(2) * theta_dot.powi(2)
            - self.pole_mass * self.gravity * self.length * theta.cos()
    }

    /// Energy of the pendulum balanced upright at rest, the swing-up target.
    pub fn upright_energy(&self) -> f64 {
        self.pole_mass * self.gravity * self.length
    }
}

/// Strategy for evaluating the nonlinear equations of motion.
///
/// Both variants implement the same dynamics and agree to floating-point
/// tolerance; they exist as separately derived formulations of the same
/// Lagrangian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Formulation {
    /// Closed-form rational expressions for the two accelerations.
    #[default]
    ClosedForm,
    /// Assemble `M(q) q_ddot + C(q, q_dot) q_dot + G(q) = B u` and solve the
    /// 2x2 linear system for the generalized accelerations.
    ManipulatorEquations,
}

/// Nonlinear cart-pole model: a pure map from state and control force to the
/// state derivative.
///
/// State layout: `[x, x_dot, theta, theta_dot]`.
#[derive(Debug, Clone, Copy)]
pub struct CartPole {
    params: PhysicalParams,
    formulation: Formulation,
}

impl CartPole {
    pub fn new(params: PhysicalParams, formulation: Formulation) -> CartPole {
        CartPole {
            params,
            formulation,
        }
    }

    pub fn params(&self) -> &PhysicalParams {
        &self.params
    }

    /// State derivative under the control force `u` applied to the cart.
    ///
    /// Pure in `x` and `u`; safe to call at trial states in any order, which
    /// the adaptive integrator relies on.
    pub fn derivative(&self, x: &Vector4<f64>, u: f64) -> Vector4<f64> {
        match self.formulation {
            Formulation::ClosedForm => self.closed_form(x, u),
            Formulation::ManipulatorEquations => self.manipulator(x, u),
        }
    }

    fn closed_form(&self, x: &Vector4<f64>, u: f64) -> Vector4<f64> {
        let PhysicalParams {
            pole_mass: mp,
            cart_mass: mc,
            length: l,
            gravity: g,
            friction: d,
        } = self.params;
        let (s, c) = x[2].sin_cos();
        let theta_dot = x[3];

        let denom = mc + mp * s * s;
        let x_ddot = (u - d * x[1] + mp * s * (l * theta_dot * theta_dot + g * c)) / denom;
        let theta_ddot = -((u - d * x[1]) * c
            + mp * l * theta_dot * theta_dot * s * c
            + (mc + mp) * g * s)
            / (l * denom);

        Vector4::new(x[1], x_ddot, theta_dot, theta_ddot)
    }

    fn manipulator(&self, x: &Vector4<f64>, u: f64) -> Vector4<f64> {
        let PhysicalParams {
            pole_mass: mp,
            cart_mass: mc,
            length: l,
            gravity: g,
            friction: d,
        } = self.params;
        let (s, c) = x[2].sin_cos();
        let q_dot = Vector2::new(x[1], x[3]);

        #[rustfmt::skip]
        let mass = Matrix2::new(
            mc + mp,    mp * l * c,
            mp * l * c, mp * l * l,
        );
        #[rustfmt::skip]
        let coriolis = Matrix2::new(
            d,   -mp * l * x[3] * s,
            0.0, 0.0,
        );
        let gravity = Vector2::new(0.0, mp * g * l * s);
        let input = Vector2::new(u, 0.0);

        let rhs = input - coriolis * q_dot - gravity;
        // det = mp * l^2 * (mc + mp * sin^2) > 0 for validated parameters
        let det = mass[(0, 0)] * mass[(1, 1)] - mass[(0, 1)] * mass[(1, 0)];
        let x_ddot = (mass[(1, 1)] * rhs[0] - mass[(0, 1)] * rhs[1]) / det;
        let theta_ddot = (mass[(0, 0)] * rhs[1] - mass[(1, 0)] * rhs[0]) / det;

        Vector4::new(x[1], x_ddot, x[3], theta_ddot)
    }

    /// First-order model `(A, B)` about the upright equilibrium
    /// `[x_goal, 0, PI, 0]`.
    pub fn linearize(&self) -> (Matrix4<f64>, Vector4<f64>) {
        let PhysicalParams {
            pole_mass: mp,
            cart_mass: mc,
            length: l,
            gravity: g,
            friction: d,
        } = self.params;

        #[rustfmt::skip]
        let a = Matrix4::new(
            0.0, 1.0,           0.0,                      0.0,
            0.0, -d / mc,       mp * g / mc,              0.0,
            0.0, 0.0,           0.0,                      1.0,
            0.0, -d / (mc * l), (mp + mc) * g / (mc * l), 0.0,
        );
        let b = Vector4::new(0.0, 1.0 / mc, 0.0, 1.0 / (mc * l));
        (a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::PI;

    fn params() -> PhysicalParams {
        PhysicalParams::new(1.0, 5.0, 2.0, 9.81, 1.0).unwrap()
    }

    #[test]
    fn rejects_invalid_parameters() {
        assert!(matches!(
            PhysicalParams::new(0.0, 5.0, 2.0, 9.81, 1.0),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            PhysicalParams::new(1.0, -5.0, 2.0, 9.81, 1.0),
            Err(Error::Configuration(_))
        ));
        // zero length would make the closed form divide by zero
        assert!(matches!(
            PhysicalParams::new(1.0, 5.0, 0.0, 9.81, 1.0),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            PhysicalParams::new(1.0, 5.0, 2.0, f64::NAN, 1.0),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            PhysicalParams::new(1.0, 5.0, 2.0, 9.81, -0.1),
            Err(Error::Configuration(_))
        ));
        // frictionless is a valid configuration
        assert!(PhysicalParams::new(1.0, 5.0, 2.0, 9.81, 0.0).is_ok());
    }

    #[test]
    fn upright_equilibrium_is_fixed_point() {
        // Friction is nonzero but acts on zero velocity, so the derivative
        // still vanishes.
        let x = Vector4::new(3.7, 0.0, PI, 0.0);
        for formulation in [Formulation::ClosedForm, Formulation::ManipulatorEquations] {
            let model = CartPole::new(params(), formulation);
            let dx = model.derivative(&x, 0.0);
            for i in 0..4 {
                assert!(dx[i].abs() < 1e-12, "dx[{i}] = {} for {formulation:?}", dx[i]);
            }
        }
    }

    #[test]
    fn hanging_equilibrium_is_fixed_point() {
        let model = CartPole::new(params(), Formulation::ClosedForm);
        let dx = model.derivative(&Vector4::new(-1.0, 0.0, 0.0, 0.0), 0.0);
        for i in 0..4 {
            assert!(dx[i].abs() < 1e-12);
        }
    }

    #[test]
    fn formulations_agree_on_random_states() {
        let closed = CartPole::new(params(), Formulation::ClosedForm);
        let manipulator = CartPole::new(params(), Formulation::ManipulatorEquations);

        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let x = Vector4::new(
                rng.gen_range(-5.0..5.0),
                rng.gen_range(-5.0..5.0),
                rng.gen_range(-2.0 * PI..2.0 * PI),
                rng.gen_range(-10.0..10.0),
            );
            let u = rng.gen_range(-20.0..20.0);
            let a = closed.derivative(&x, u);
            let b = manipulator.derivative(&x, u);
            for i in 0..4 {
                assert_relative_eq!(a[i], b[i], epsilon = 1e-9, max_relative = 1e-8);
            }
        }
    }

    #[test]
    fn linearization_matches_finite_differences() {
        let model = CartPole::new(params(), Formulation::ClosedForm);
        let (a, b) = model.linearize();
        let x0 = Vector4::new(1.3, 0.0, PI, 0.0);
        let h = 1e-6;

        for j in 0..4 {
            let mut dx = Vector4::zeros();
            dx[j] = h;
            let col = (model.derivative(&(x0 + dx), 0.0) - model.derivative(&(x0 - dx), 0.0))
                / (2.0 * h);
            for i in 0..4 {
                assert_relative_eq!(a[(i, j)], col[i], epsilon = 1e-5, max_relative = 1e-5);
            }
        }

        let b_fd = (model.derivative(&x0, h) - model.derivative(&x0, -h)) / (2.0 * h);
        for i in 0..4 {
            assert_relative_eq!(b[i], b_fd[i], epsilon = 1e-5, max_relative = 1e-5);
        }
    }

    #[test]
    fn energy_references() {
        let p = params();
        // hanging at rest sits at the bottom of the energy landscape
        assert_relative_eq!(p.pendulum_energy(0.0, 0.0), -p.upright_energy());
        // upright at rest is exactly the swing-up target energy
        assert_relative_eq!(p.pendulum_energy(PI, 0.0), p.upright_energy(), epsilon = 1e-12);
        assert_relative_eq!(p.upright_energy(), 1.0 * 9.81 * 2.0);
    }
}
