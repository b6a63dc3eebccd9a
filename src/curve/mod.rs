use anyhow::anyhow;
use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;

use crate::geometry::{cumulative_lengths, nearest_segment, segment_lengths};
use crate::pca::{Pca, SVDImplementation};
use crate::spline::{SmoothingSpline, SplineParams};

/// Builder for a [`PrincipalCurve`] fitter.
pub struct PrincipalCurveBuilder<S: SVDImplementation> {
    spline_params: SplineParams,
    svd_implementation: S,
}

impl<S: SVDImplementation> PrincipalCurveBuilder<S> {
    pub fn new(svd_implementation: S) -> Self {
        PrincipalCurveBuilder {
            spline_params: SplineParams::default(),
            svd_implementation,
        }
    }

    /// Degree of the smoothing splines, 1 to 5.
    pub fn degree(mut self, degree: usize) -> Self {
        self.spline_params.degree = degree;
        self
    }

    /// Penalty strength applied when refining each coordinate.
    pub fn smoothing(mut self, smoothing: f64) -> Self {
        self.spline_params.smoothing = smoothing;
        self
    }

    /// Fixed interior knot count instead of the data-driven default.
    pub fn interior_knots(mut self, interior_knots: usize) -> Self {
        self.spline_params.interior_knots = Some(interior_knots);
        self
    }

    pub fn build(self) -> PrincipalCurve<S> {
        PrincipalCurve {
            spline_params: self.spline_params,
            pca: Pca::new(self.svd_implementation),
        }
    }
}

/// Fits a one-dimensional curve through the middle of a point cloud.
///
/// The curve starts as the data projected onto its principal axis and is
/// refined by alternating nearest-segment projection with per-coordinate
/// spline smoothing against the arc-length parameterization.
pub struct PrincipalCurve<S: SVDImplementation> {
    spline_params: SplineParams,
    pca: Pca<S>,
}

impl<S: SVDImplementation> PrincipalCurve<S> {
    /// Runs `max_iter` refinement passes over `data` and returns the fitted
    /// curve. Optional `weights` bias both the initial axis and the spline
    /// refinement towards the upweighted rows.
    pub fn fit(
        &self,
        data: ArrayView2<f64>,
        weights: Option<ArrayView1<f64>>,
        max_iter: usize,
    ) -> anyhow::Result<FittedCurve> {
        let (n_samples, n_features) = data.dim();
        if n_samples < 2 {
            return Err(anyhow!(
                "Need at least 2 samples to fit a curve, got {}!",
                n_samples
            ));
        }
        if n_features == 0 {
            return Err(anyhow!("Input matrix has no feature columns!"));
        }
        if max_iter < 1 {
            return Err(anyhow!("Iteration count must be at least 1!"));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(anyhow!("Input data must be finite!"));
        }
        if let Some(w) = weights {
            if w.len() != n_samples {
                return Err(anyhow!(
                    "Weight count ({}) must match sample count ({})!",
                    w.len(),
                    n_samples
                ));
            }
        }
        self.spline_params.validate()?;

        let (mut points, mut params) = self.seed(data, weights)?;

        for iteration in 0..max_iter {
            let projected = project(data, points.view(), params.view())?;

            let mut order: Vec<usize> = (0..n_samples).collect();
            order.sort_by(|&a, &b| projected[a].total_cmp(&projected[b]));
            let sorted_params = Array1::from_iter(order.iter().map(|&i| projected[i]));
            let sorted_data = data.select(Axis(0), &order);
            let sorted_weights = weights.map(|w| w.select(Axis(0), &order));

            let columns = (0..n_features)
                .into_par_iter()
                .map(|feature| -> anyhow::Result<Array1<f64>> {
                    let spline = SmoothingSpline::fit(
                        sorted_params.view(),
                        sorted_data.column(feature),
                        sorted_weights.as_ref().map(|w| w.view()),
                        &self.spline_params,
                    )?;
                    Ok(spline.evaluate_many(sorted_params.view()))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;

            let mut refined = Array2::<f64>::zeros((n_samples, n_features));
            for (feature, column) in columns.iter().enumerate() {
                refined.column_mut(feature).assign(column);
            }

            points = collapse_duplicate_vertices(refined.view());
            params = arc_length_parameterization(points.view())?;
            debug!(
                "iteration {}/{}: {} vertices, curve length {:.6}",
                iteration + 1,
                max_iter,
                points.nrows(),
                segment_lengths(points.view()).sum()
            );
        }

        Ok(FittedCurve { points, params })
    }

    /// Initial curve: the data projected onto the principal axis, ordered by
    /// projected coordinate so the orientation is independent of row order.
    fn seed(
        &self,
        data: ArrayView2<f64>,
        weights: Option<ArrayView1<f64>>,
    ) -> anyhow::Result<(Array2<f64>, Array1<f64>)> {
        let axis = self.pca.principal_axis(data, weights)?;
        let coordinates = data.dot(&axis);

        let mut order: Vec<usize> = (0..data.nrows()).collect();
        order.sort_by(|&a, &b| coordinates[a].total_cmp(&coordinates[b]));

        let mut vertices = Array2::<f64>::zeros(data.dim());
        for (row, &i) in order.iter().enumerate() {
            let mut vertex = vertices.row_mut(row);
            vertex.assign(&axis);
            vertex *= coordinates[i];
        }

        let points = collapse_duplicate_vertices(vertices.view());
        let params = arc_length_parameterization(points.view())?;
        Ok((points, params))
    }
}

/// A fitted principal curve: ordered vertices together with their normalized
/// arc-length parameters.
#[derive(Clone, Debug)]
pub struct FittedCurve {
    points: Array2<f64>,
    params: Array1<f64>,
}

impl FittedCurve {
    pub fn points(&self) -> ArrayView2<f64> {
        self.points.view()
    }

    pub fn params(&self) -> ArrayView1<f64> {
        self.params.view()
    }

    pub fn num_vertices(&self) -> usize {
        self.points.nrows()
    }

    /// Parameter of the nearest curve position for each data row.
    pub fn project(&self, data: ArrayView2<f64>) -> anyhow::Result<Array1<f64>> {
        project(data, self.points.view(), self.params.view())
    }
}

/// Projects each data row onto the curve and interpolates its parameter
/// between the parameters of the enclosing vertices.
pub fn project(
    data: ArrayView2<f64>,
    points: ArrayView2<f64>,
    params: ArrayView1<f64>,
) -> anyhow::Result<Array1<f64>> {
    let n_vertices = points.nrows();
    if n_vertices < 2 {
        return Err(anyhow!(
            "Need at least 2 curve vertices to project onto, got {}!",
            n_vertices
        ));
    }
    if data.ncols() != points.ncols() {
        return Err(anyhow!(
            "Data dimensionality ({}) must match curve dimensionality ({})!",
            data.ncols(),
            points.ncols()
        ));
    }
    if params.len() != n_vertices {
        return Err(anyhow!(
            "Parameter count ({}) must match vertex count ({})!",
            params.len(),
            n_vertices
        ));
    }

    let mut interpolated = Array1::<f64>::zeros(data.nrows());
    for (value, row) in interpolated.iter_mut().zip(data.outer_iter()) {
        let projection = nearest_segment(row, points);
        let lo = params[projection.segment];
        let hi = params[projection.segment + 1];
        *value = lo + projection.fraction * (hi - lo);
    }
    Ok(interpolated)
}

/// Cumulative arc length of the vertices normalized so the final vertex sits
/// at exactly 1.
pub fn arc_length_parameterization(points: ArrayView2<f64>) -> anyhow::Result<Array1<f64>> {
    if points.nrows() < 2 {
        return Err(anyhow!(
            "Need at least 2 vertices to parameterize a curve, got {}!",
            points.nrows()
        ));
    }
    let cumulative = cumulative_lengths(points);
    let total = cumulative[cumulative.len() - 1];
    if total <= 0.0 {
        return Err(anyhow!("Curve has zero total length, vertices coincide!"));
    }
    Ok(cumulative / total)
}

/// Drops every vertex that repeats its predecessor exactly, keeping the first
/// occurrence of each run.
fn collapse_duplicate_vertices(points: ArrayView2<f64>) -> Array2<f64> {
    let mut keep: Vec<usize> = Vec::with_capacity(points.nrows());
    for i in 0..points.nrows() {
        if i == 0 || points.row(i) != points.row(i - 1) {
            keep.push(i);
        }
    }
    if keep.len() == points.nrows() {
        points.to_owned()
    } else {
        points.select(Axis(0), &keep)
    }
}
