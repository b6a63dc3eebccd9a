use anyhow::anyhow;
use ndarray::{s, Array1, Array2, ArrayView1};
use nshare::{IntoNalgebra, IntoNdarray1};

/// Shape parameters for penalized B-spline smoothing.
#[derive(Clone, Debug)]
pub struct SplineParams {
    /// Polynomial degree of the basis, 1 to 5.
    pub degree: usize,
    /// Penalty strength on second divided differences of the coefficients.
    pub smoothing: f64,
    /// Number of interior knots. When `None` a count is derived from the
    /// number of points.
    pub interior_knots: Option<usize>,
}

impl Default for SplineParams {
    fn default() -> Self {
        SplineParams {
            degree: 3,
            smoothing: 1e-3,
            interior_knots: None,
        }
    }
}

impl SplineParams {
    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        if self.degree < 1 || self.degree > 5 {
            return Err(anyhow!(
                "Spline degree ({}) must be between 1 and 5!",
                self.degree
            ));
        }
        if !self.smoothing.is_finite() || self.smoothing < 0.0 {
            return Err(anyhow!("Smoothing factor must be finite and non-negative!"));
        }
        if self.interior_knots == Some(0) {
            return Err(anyhow!("Interior knot count must be at least 1!"));
        }
        Ok(())
    }

    fn interior_knots_for(&self, n_points: usize) -> usize {
        self.interior_knots
            .unwrap_or_else(|| (n_points / 4).clamp(1, 24))
    }
}

/// A fitted penalized least-squares spline on a clamped knot vector.
///
/// Evaluation outside the fitted abscissa range is clamped to the range
/// boundary, so the spline extends as a constant on either side.
pub struct SmoothingSpline {
    degree: usize,
    knots: Array1<f64>,
    coefficients: Array1<f64>,
}

impl SmoothingSpline {
    /// Fits the spline to `(xs, ys)` pairs with `xs` sorted in non-decreasing
    /// order. Optional `weights` scale each point's residual.
    pub fn fit(
        xs: ArrayView1<f64>,
        ys: ArrayView1<f64>,
        weights: Option<ArrayView1<f64>>,
        params: &SplineParams,
    ) -> anyhow::Result<Self> {
        params.validate()?;

        let n_points = xs.len();
        if ys.len() != n_points {
            return Err(anyhow!(
                "Abscissa count ({}) must match ordinate count ({})!",
                n_points,
                ys.len()
            ));
        }
        if n_points < 2 {
            return Err(anyhow!(
                "Need at least 2 points to fit a spline, got {}!",
                n_points
            ));
        }
        if xs.iter().any(|v| !v.is_finite()) || ys.iter().any(|v| !v.is_finite()) {
            return Err(anyhow!("Spline inputs must be finite!"));
        }
        for i in 1..n_points {
            if xs[i] < xs[i - 1] {
                return Err(anyhow!("Abscissae must be sorted in non-decreasing order!"));
            }
        }
        let x_min = xs[0];
        let x_max = xs[n_points - 1];
        if x_max <= x_min {
            return Err(anyhow!("Abscissae span a single value, cannot fit a spline!"));
        }
        if let Some(w) = weights {
            if w.len() != n_points {
                return Err(anyhow!(
                    "Weight count ({}) must match point count ({})!",
                    w.len(),
                    n_points
                ));
            }
            if w.iter().any(|v| !v.is_finite() || *v < 0.0) {
                return Err(anyhow!("Weights must be finite and non-negative!"));
            }
            if w.sum() <= 0.0 {
                return Err(anyhow!("Weight sum must be positive!"));
            }
        }

        let interior = params.interior_knots_for(n_points);
        let knots = clamped_knot_vector(x_min, x_max, interior, params.degree);
        let num_basis = knots.len() - params.degree - 1;

        let mut basis = Array2::<f64>::zeros((n_points, num_basis));
        for (i, &x) in xs.iter().enumerate() {
            let (start, values) = basis_values_at(x, params.degree, &knots);
            for (offset, &value) in values.iter().enumerate() {
                basis[[i, start + offset]] = value;
            }
        }

        // Normal equations of the weighted least-squares problem. Only the
        // lower triangle is consumed by the Cholesky factorization.
        let (mut system, rhs) = match weights {
            Some(w) => {
                let mut weighted_basis = basis.clone();
                let mut weighted_ys = ys.to_owned();
                for (mut row, &wi) in weighted_basis.outer_iter_mut().zip(w.iter()) {
                    row *= wi;
                }
                for (value, &wi) in weighted_ys.iter_mut().zip(w.iter()) {
                    *value *= wi;
                }
                (basis.t().dot(&weighted_basis), basis.t().dot(&weighted_ys))
            }
            None => (basis.t().dot(&basis), basis.t().dot(&ys)),
        };

        if params.smoothing > 0.0 {
            let greville = greville_abscissae(&knots, params.degree);
            let penalty = difference_penalty(num_basis, greville.view());
            system.scaled_add(params.smoothing, &penalty);
        }

        let cholesky = system.into_nalgebra().cholesky().ok_or_else(|| {
            anyhow!("Spline system is not positive definite, check for degenerate abscissae!")
        })?;
        let coefficients = cholesky.solve(&rhs.into_nalgebra()).into_ndarray1();

        Ok(SmoothingSpline {
            degree: params.degree,
            knots,
            coefficients,
        })
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        let (start, values) = basis_values_at(x, self.degree, &self.knots);
        values
            .iter()
            .enumerate()
            .map(|(offset, value)| self.coefficients[start + offset] * value)
            .sum()
    }

    pub fn evaluate_many(&self, xs: ArrayView1<f64>) -> Array1<f64> {
        Array1::from_iter(xs.iter().map(|&x| self.evaluate(x)))
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn knots(&self) -> ArrayView1<f64> {
        self.knots.view()
    }

    pub fn coefficients(&self) -> ArrayView1<f64> {
        self.coefficients.view()
    }
}

/// Knot vector with `degree + 1` copies of each boundary and uniformly spaced
/// interior knots.
fn clamped_knot_vector(x_min: f64, x_max: f64, interior: usize, degree: usize) -> Array1<f64> {
    let mut knots = Array1::<f64>::zeros(interior + 2 * (degree + 1));
    let total = knots.len();
    let step = (x_max - x_min) / (interior + 1) as f64;
    for i in 0..=degree {
        knots[i] = x_min;
        knots[total - 1 - i] = x_max;
    }
    for i in 1..=interior {
        knots[degree + i] = x_min + step * i as f64;
    }
    knots
}

/// Values of the `degree + 1` basis functions that are non-zero at `x`,
/// together with the index of the first one. `x` is clamped to the knot
/// range first.
fn basis_values_at(x: f64, degree: usize, knots: &Array1<f64>) -> (usize, Vec<f64>) {
    let num_basis = knots.len() - degree - 1;
    let x_eval = x.clamp(knots[degree], knots[num_basis]);

    let mut span = degree;
    while span + 1 < num_basis && x_eval >= knots[span + 1] {
        span += 1;
    }

    let mut values = vec![0.0; degree + 1];
    values[0] = 1.0;
    let mut left = vec![0.0; degree + 1];
    let mut right = vec![0.0; degree + 1];
    for d in 1..=degree {
        left[d] = x_eval - knots[span + 1 - d];
        right[d] = knots[span + d] - x_eval;
        let mut saved = 0.0;
        for r in 0..d {
            let den = right[r + 1] + left[d - r];
            let term = if den.abs() > 1e-12 { values[r] / den } else { 0.0 };
            values[r] = saved + right[r + 1] * term;
            saved = left[d - r] * term;
        }
        values[d] = saved;
    }

    (span - degree, values)
}

/// Greville abscissae of the basis, the knot averages each coefficient acts
/// at.
fn greville_abscissae(knots: &Array1<f64>, degree: usize) -> Array1<f64> {
    let num_basis = knots.len() - degree - 1;
    Array1::from_shape_fn(num_basis, |j| {
        knots.slice(s![j + 1..=j + degree]).sum() / degree as f64
    })
}

/// Squared second-order divided-difference penalty over the Greville
/// abscissae. Its null space holds exactly the coefficient vectors of affine
/// splines, so straight lines are never penalized.
fn difference_penalty(num_basis: usize, greville: ArrayView1<f64>) -> Array2<f64> {
    let mut d = Array2::<f64>::eye(num_basis);
    for order in 1..=2 {
        d = &d.slice(s![1.., ..]) - &d.slice(s![..-1, ..]);
        for (i, mut row) in d.outer_iter_mut().enumerate() {
            let span = greville[i + order] - greville[i];
            if span.abs() > 1e-12 {
                row /= span;
            }
        }
    }
    d.t().dot(&d)
}
