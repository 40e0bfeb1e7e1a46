use nalgebra::{DMatrix, Matrix1, Matrix1x4, Matrix4, Vector4};

use crate::control::Controller;
use crate::error::Error;
use crate::models::CartPole;

const MAX_SIGN_ITER: usize = 100;
const SIGN_TOL: f64 = 1e-12;
const RESIDUAL_TOL: f64 = 1e-6;

fn is_symmetric(m: &DMatrix<f64>) -> bool {
    (m - m.transpose()).abs().max() <= 1e-9 * (1.0 + m.abs().max())
}

fn check_care_inputs(
    a: &DMatrix<f64>,
    b: &DMatrix<f64>,
    q: &DMatrix<f64>,
    r: &DMatrix<f64>,
) -> Result<(), Error> {
    let n = a.nrows();
    if n == 0 || a.ncols() != n {
        return Err(Error::Configuration(format!(
            "A must be square and non-empty, got {}x{}",
            a.nrows(),
            a.ncols()
        )));
    }
    if b.nrows() != n || b.ncols() == 0 {
        return Err(Error::Configuration(format!(
            "B must have {} rows and at least one column, got {}x{}",
            n,
            b.nrows(),
            b.ncols()
        )));
    }
    let m = b.ncols();
    if q.nrows() != n || q.ncols() != n {
        return Err(Error::Configuration(format!(
            "Q must be {n}x{n}, got {}x{}",
            q.nrows(),
            q.ncols()
        )));
    }
    if r.nrows() != m || r.ncols() != m {
        return Err(Error::Configuration(format!(
            "R must be {m}x{m}, got {}x{}",
            r.nrows(),
            r.ncols()
        )));
    }
    if !is_symmetric(q) {
        return Err(Error::Configuration("Q must be symmetric".to_owned()));
    }
    if !is_symmetric(r) {
        return Err(Error::Configuration("R must be symmetric".to_owned()));
    }
    Ok(())
}

/// Solve the continuous-time algebraic Riccati equation
/// `A' X + X A - X B R^-1 B' X + Q = 0` for the stabilizing solution `X`.
///
/// Computes the matrix sign of the Hamiltonian by Newton inverse iteration
/// with determinant scaling, then extracts the stable invariant subspace. The
/// iteration converges exactly when the Hamiltonian has no eigenvalues on the
/// imaginary axis, i.e. when a stabilizing solution exists; the CARE residual
/// of the candidate is checked before it is returned.
pub fn solve_continuous_are(
    a: &DMatrix<f64>,
    b: &DMatrix<f64>,
    q: &DMatrix<f64>,
    r: &DMatrix<f64>,
) -> Result<DMatrix<f64>, Error> {
    check_care_inputs(a, b, q, r)?;
    let n = a.nrows();

    let r_inv = r
        .clone()
        .try_inverse()
        .ok_or_else(|| Error::Numerical("R is singular".to_owned()))?;
    let s = b * &r_inv * b.transpose();

    // Hamiltonian [[A, -S], [-Q, -A']]
    let mut w = DMatrix::zeros(2 * n, 2 * n);
    w.view_mut((0, 0), (n, n)).copy_from(a);
    w.view_mut((0, n), (n, n)).copy_from(&(-&s));
    w.view_mut((n, 0), (n, n)).copy_from(&(-q));
    w.view_mut((n, n), (n, n)).copy_from(&(-a.transpose()));

    let mut converged = false;
    for _ in 0..MAX_SIGN_ITER {
        let det = w.determinant().abs();
        if !(det.is_finite() && det > 0.0) {
            return Err(Error::Numerical(
                "Hamiltonian iteration became singular, (A, B) is likely not stabilizable"
                    .to_owned(),
            ));
        }
        let scaled = &w * det.powf(-1.0 / (2.0 * n as f64));
        let inverse = scaled.clone().try_inverse().ok_or_else(|| {
            Error::Numerical(
                "Hamiltonian iteration became singular, (A, B) is likely not stabilizable"
                    .to_owned(),
            )
        })?;
        let next = (&scaled + &inverse) * 0.5;
        let delta = (&next - &scaled).abs().max();
        w = next;
        if delta <= SIGN_TOL * (1.0 + w.abs().max()) {
            converged = true;
            break;
        }
    }
    if !converged {
        return Err(Error::Numerical(
            "matrix sign iteration did not converge".to_owned(),
        ));
    }

    // The stable subspace is spanned by the columns of [I; X] with
    // (W + I) [I; X] = 0, which stacks into a 2n x n least-squares system.
    let identity = DMatrix::<f64>::identity(n, n);
    let w11 = w.view((0, 0), (n, n));
    let w12 = w.view((0, n), (n, n));
    let w21 = w.view((n, 0), (n, n));
    let w22 = w.view((n, n), (n, n));

    let mut lhs = DMatrix::zeros(2 * n, n);
    lhs.view_mut((0, 0), (n, n)).copy_from(&w12);
    lhs.view_mut((n, 0), (n, n)).copy_from(&(w22 + &identity));
    let mut rhs = DMatrix::zeros(2 * n, n);
    rhs.view_mut((0, 0), (n, n)).copy_from(&(-(w11 + &identity)));
    rhs.view_mut((n, 0), (n, n)).copy_from(&(-w21));

    let x = lhs
        .svd(true, true)
        .solve(&rhs, 1e-12)
        .map_err(|e| Error::Numerical(e.to_owned()))?;
    // CARE solutions are symmetric; the solve leaves a small skew part
    let x = (&x + &x.transpose()) * 0.5;

    let residual = a.transpose() * &x + &x * a - &x * &s * &x + q;
    let worst = residual.abs().max();
    if !worst.is_finite() || worst > RESIDUAL_TOL * (1.0 + x.abs().max()) {
        return Err(Error::Numerical(format!(
            "Riccati residual too large: {worst:.3e}"
        )));
    }
    Ok(x)
}

/// Optimal gain `K = R^-1 B' X` for the feedback law `u = -K (x - x_ref)`
/// minimizing the infinite-horizon cost `integral of e'Qe + u'Ru`.
///
/// The closed loop `A - B K` is verified to have all eigenvalues strictly in
/// the left half plane before the gain is returned; no fallback gain is ever
/// fabricated.
pub fn lqr(
    a: &DMatrix<f64>,
    b: &DMatrix<f64>,
    q: &DMatrix<f64>,
    r: &DMatrix<f64>,
) -> Result<DMatrix<f64>, Error> {
    let x = solve_continuous_are(a, b, q, r)?;
    let r_inv = r
        .clone()
        .try_inverse()
        .ok_or_else(|| Error::Numerical("R is singular".to_owned()))?;
    let k = &r_inv * b.transpose() * &x;

    let closed_loop = a - b * &k;
    let schur = closed_loop
        .try_schur(1e-12, 10_000)
        .ok_or_else(|| Error::Numerical("eigenvalue computation did not converge".to_owned()))?;
    if schur.complex_eigenvalues().iter().any(|e| e.re >= 0.0) {
        return Err(Error::Numerical(
            "closed loop A - B K is not stable, (A, B) is not stabilizable".to_owned(),
        ));
    }
    Ok(k)
}

/// Stabilizing state feedback about a reference state.
#[derive(Debug, Clone)]
pub struct LqrController {
    gain: Matrix1x4<f64>,
    reference: Vector4<f64>,
}

impl LqrController {
    /// Synthesize the gain for `model` linearized about the upright
    /// equilibrium. Solved once per run; the linearization point is fixed.
    pub fn synthesize(
        model: &CartPole,
        q: &Matrix4<f64>,
        r: &Matrix1<f64>,
        reference: Vector4<f64>,
    ) -> Result<LqrController, Error> {
        let (a, b) = model.linearize();
        let k = lqr(
            &DMatrix::from_column_slice(4, 4, a.as_slice()),
            &DMatrix::from_column_slice(4, 1, b.as_slice()),
            &DMatrix::from_column_slice(4, 4, q.as_slice()),
            &DMatrix::from_column_slice(1, 1, r.as_slice()),
        )?;
        let gain = Matrix1x4::new(k[(0, 0)], k[(0, 1)], k[(0, 2)], k[(0, 3)]);
        Ok(LqrController { gain, reference })
    }

    /// Same gain, different goal: the linearization does not depend on the
    /// reference, so a synthesized gain can be reused across runs.
    pub fn with_reference(&self, reference: Vector4<f64>) -> LqrController {
        LqrController {
            gain: self.gain,
            reference,
        }
    }

    pub fn gain(&self) -> &Matrix1x4<f64> {
        &self.gain
    }

    pub fn reference(&self) -> &Vector4<f64> {
        &self.reference
    }
}

impl Controller for LqrController {
    fn control(&self, _t: f64, x: &Vector4<f64>) -> f64 {
        -(self.gain * (x - self.reference)).x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Formulation, PhysicalParams};
    use approx::assert_relative_eq;
    use nalgebra::DVector;
    use std::f64::consts::PI;

    fn cartpole_care_inputs() -> (DMatrix<f64>, DMatrix<f64>, DMatrix<f64>, DMatrix<f64>) {
        let model = CartPole::new(
            PhysicalParams::new(1.0, 5.0, 2.0, 9.81, 1.0).unwrap(),
            Formulation::ClosedForm,
        );
        let (a, b) = model.linearize();
        (
            DMatrix::from_column_slice(4, 4, a.as_slice()),
            DMatrix::from_column_slice(4, 1, b.as_slice()),
            DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 1.0, 10.0, 100.0])),
            DMatrix::from_element(1, 1, 0.001),
        )
    }

    #[test]
    fn scalar_care_integrator_plant() {
        // a = 0, b = q = r = 1: x^2 = 1, stabilizing root x = 1, k = 1
        let a = DMatrix::from_element(1, 1, 0.0);
        let b = DMatrix::from_element(1, 1, 1.0);
        let q = DMatrix::from_element(1, 1, 1.0);
        let r = DMatrix::from_element(1, 1, 1.0);
        let x = solve_continuous_are(&a, &b, &q, &r).unwrap();
        assert_relative_eq!(x[(0, 0)], 1.0, epsilon = 1e-9);
        let k = lqr(&a, &b, &q, &r).unwrap();
        assert_relative_eq!(k[(0, 0)], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn scalar_care_unstable_plant() {
        // a = 1: x^2 - 2x - 1 = 0, stabilizing root x = 1 + sqrt(2),
        // closed loop a - bk = -sqrt(2)
        let a = DMatrix::from_element(1, 1, 1.0);
        let b = DMatrix::from_element(1, 1, 1.0);
        let q = DMatrix::from_element(1, 1, 1.0);
        let r = DMatrix::from_element(1, 1, 1.0);
        let k = lqr(&a, &b, &q, &r).unwrap();
        assert_relative_eq!(k[(0, 0)], 1.0 + 2.0_f64.sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn cartpole_gain_is_stabilizing() {
        let (a, b, q, r) = cartpole_care_inputs();
        let k = lqr(&a, &b, &q, &r).unwrap();
        assert!(k.iter().all(|v| v.is_finite()));

        let closed_loop = &a - &b * &k;
        let eigenvalues = closed_loop.schur().complex_eigenvalues();
        assert!(eigenvalues.iter().all(|e| e.re < 0.0));
    }

    #[test]
    fn rejects_unstabilizable_pair() {
        // second state is unstable and unreachable from the input
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 2.0]);
        let b = DMatrix::from_row_slice(2, 1, &[1.0, 0.0]);
        let q = DMatrix::identity(2, 2);
        let r = DMatrix::from_element(1, 1, 1.0);
        assert!(matches!(lqr(&a, &b, &q, &r), Err(Error::Numerical(_))));
    }

    #[test]
    fn rejects_mismatched_dimensions() {
        let a = DMatrix::identity(2, 2);
        let b = DMatrix::from_row_slice(2, 1, &[1.0, 0.0]);
        let q = DMatrix::identity(3, 3);
        let r = DMatrix::from_element(1, 1, 1.0);
        assert!(matches!(
            solve_continuous_are(&a, &b, &q, &r),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn rejects_singular_r() {
        let a = DMatrix::identity(2, 2);
        let b = DMatrix::from_row_slice(2, 1, &[1.0, 1.0]);
        let q = DMatrix::identity(2, 2);
        let r = DMatrix::from_element(1, 1, 0.0);
        assert!(matches!(
            solve_continuous_are(&a, &b, &q, &r),
            Err(Error::Numerical(_))
        ));
    }

    #[test]
    fn controller_is_zero_at_reference() {
        let model = CartPole::new(
            PhysicalParams::new(1.0, 5.0, 2.0, 9.81, 1.0).unwrap(),
            Formulation::ClosedForm,
        );
        let q = Matrix4::from_diagonal(&Vector4::new(1.0, 1.0, 10.0, 100.0));
        let r = Matrix1::new(0.001);
        let reference = Vector4::new(2.0, 0.0, PI, 0.0);
        let controller = LqrController::synthesize(&model, &q, &r, reference).unwrap();

        assert_relative_eq!(controller.control(0.0, &reference), 0.0);
        assert!(controller.gain().iter().all(|v| v.is_finite()));

        let moved = controller.with_reference(Vector4::new(-1.0, 0.0, PI, 0.0));
        assert_eq!(moved.gain(), controller.gain());
        assert_relative_eq!(moved.control(0.0, moved.reference()), 0.0);
    }
}
