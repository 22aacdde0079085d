use num_traits::Float;

/// Parameters controlling convergence checks.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConvergenceParams<F> {
    /// Maximum number of iterations (default: 100).
    pub max_iter: usize,
    /// Gradient tolerance: stop when `||g|| < grad_tol` (default: 1e-8).
    /// Bound-constrained solvers measure the projected gradient in the max norm.
    pub grad_tol: F,
    /// Step size tolerance: stop when `||x_{k+1} - x_k|| < step_tol` (default: 1e-12).
    pub step_tol: F,
    /// Function change tolerance: stop when `|f_{k+1} - f_k| < func_tol` (default: 0, disabled).
    pub func_tol: F,
}

impl Default for ConvergenceParams<f64> {
    fn default() -> Self {
        ConvergenceParams {
            max_iter: 100,
            grad_tol: 1e-8,
            step_tol: 1e-12,
            func_tol: 0.0,
        }
    }
}

impl Default for ConvergenceParams<f32> {
    fn default() -> Self {
        ConvergenceParams {
            max_iter: 100,
            grad_tol: 1e-5,
            step_tol: 1e-7,
            func_tol: 0.0,
        }
    }
}

/// Compute the L2 norm of a vector.
pub fn norm<F: Float>(v: &[F]) -> F {
    let mut s = F::zero();
    for &x in v {
        s = s + x * x;
    }
    s.sqrt()
}

/// Compute the dot product of two vectors.
pub fn dot<F: Float>(a: &[F], b: &[F]) -> F {
    debug_assert_eq!(a.len(), b.len());
    let mut s = F::zero();
    for i in 0..a.len() {
        s = s + a[i] * b[i];
    }
    s
}

/// Clamp `x` into the box `bounds` in place.
pub fn project<F: Float>(x: &mut [F], bounds: &[(F, F)]) {
    debug_assert_eq!(x.len(), bounds.len());
    for (xi, &(lo, hi)) in x.iter_mut().zip(bounds) {
        *xi = xi.max(lo).min(hi);
    }
}

/// Max norm of `x - P(x - g)`, which vanishes exactly at a KKT point of the box.
pub fn projected_gradient_norm<F: Float>(x: &[F], g: &[F], bounds: &[(F, F)]) -> F {
    let mut m = F::zero();
    for i in 0..x.len() {
        let (lo, hi) = bounds[i];
        let stepped = (x[i] - g[i]).max(lo).min(hi);
        m = m.max((x[i] - stepped).abs());
    }
    m
}
