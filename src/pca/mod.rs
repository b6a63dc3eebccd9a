use anyhow::anyhow;
#[cfg(feature = "faer")]
use faer_ext::*;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use nshare::{IntoNalgebra, IntoNdarray2};
use std::sync::Arc;

// Trait for SVD implementations
pub trait SVDImplementation: Send + Sync {
    /// Returns the singular values in descending order together with the
    /// matrix of right singular vectors as rows.
    fn compute(&self, matrix: ArrayView2<f64>) -> anyhow::Result<(Array1<f64>, Array2<f64>)>;
}

pub struct NalgebraSVD;

impl SVDImplementation for NalgebraSVD {
    fn compute(&self, matrix: ArrayView2<f64>) -> anyhow::Result<(Array1<f64>, Array2<f64>)> {
        let svd = matrix.to_owned().into_nalgebra().svd(false, true);
        let vt = svd
            .v_t
            .ok_or_else(|| anyhow!("SVD did not produce right singular vectors!"))?;
        let singular_values = Array1::from_iter(svd.singular_values.iter().cloned());

        Ok((singular_values, vt.into_ndarray2()))
    }
}

#[cfg(feature = "faer")]
pub struct FaerSVD;

#[cfg(feature = "faer")]
impl SVDImplementation for FaerSVD {
    fn compute(&self, matrix: ArrayView2<f64>) -> anyhow::Result<(Array1<f64>, Array2<f64>)> {
        let svd = matrix.into_faer().svd();
        let singular_values = Array1::from_iter(svd.s_diagonal().iter().cloned());
        let vt = svd.v().into_ndarray().t().to_owned();

        Ok((singular_values, vt))
    }
}

/// Principal-axis extraction over a pluggable SVD backend.
pub struct Pca<S: SVDImplementation> {
    svd_implementation: Arc<S>,
}

impl<S: SVDImplementation> Pca<S> {
    pub fn new(svd_implementation: S) -> Self {
        Pca {
            svd_implementation: Arc::new(svd_implementation),
        }
    }

    /// Unit-norm direction of greatest variance of `x`, weighted per row when
    /// `weights` is given.
    ///
    /// The sign is fixed so that the axis entry of largest magnitude is
    /// non-negative, making the result independent of backend conventions.
    pub fn principal_axis(
        &self,
        x: ArrayView2<f64>,
        weights: Option<ArrayView1<f64>>,
    ) -> anyhow::Result<Array1<f64>> {
        let (n_samples, n_features) = x.dim();
        if n_samples < 2 {
            return Err(anyhow!(
                "Need at least 2 samples to extract a principal axis, got {}!",
                n_samples
            ));
        }
        if n_features == 0 {
            return Err(anyhow!("Input matrix has no feature columns!"));
        }
        if let Some(w) = weights {
            if w.len() != n_samples {
                return Err(anyhow!(
                    "Weight count ({}) must match sample count ({})!",
                    w.len(),
                    n_samples
                ));
            }
            if w.iter().any(|v| !v.is_finite() || *v < 0.0) {
                return Err(anyhow!("Weights must be finite and non-negative!"));
            }
            if w.sum() <= 0.0 {
                return Err(anyhow!("Weight sum must be positive!"));
            }
        }

        let centered = match weights {
            Some(w) => {
                let total = w.sum();
                let mut mean = Array1::<f64>::zeros(n_features);
                for (row, &wi) in x.outer_iter().zip(w.iter()) {
                    mean.scaled_add(wi, &row);
                }
                mean /= total;

                let mut centered = x.to_owned();
                for (mut row, &wi) in centered.outer_iter_mut().zip(w.iter()) {
                    row -= &mean;
                    row *= wi.sqrt();
                }
                centered
            }
            None => {
                let mean = x.mean_axis(Axis(0)).expect("Failed to compute mean");
                let mut centered = x.to_owned();
                for mut row in centered.outer_iter_mut() {
                    row -= &mean;
                }
                centered
            }
        };

        let (_singular_values, vt) = self.svd_implementation.compute(centered.view())?;
        if vt.nrows() == 0 {
            return Err(anyhow!("SVD returned an empty set of singular vectors!"));
        }

        let mut axis = vt.row(0).to_owned();
        let mut lead = 0;
        for (i, value) in axis.iter().enumerate() {
            if value.abs() > axis[lead].abs() {
                lead = i;
            }
        }
        if axis[lead] < 0.0 {
            axis.mapv_inplace(|v| -v);
        }

        Ok(axis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_axis_of_collinear_cloud() -> anyhow::Result<()> {
        let x = array![
            [-2.0, -4.0],
            [-1.0, -2.0],
            [0.0, 0.0],
            [1.0, 2.0],
            [2.0, 4.0]
        ];
        let pca = Pca::new(NalgebraSVD);

        let axis = pca.principal_axis(x.view(), None)?;

        let norm = 5.0_f64.sqrt();
        assert_relative_eq!(axis[0], 1.0 / norm, epsilon = 1e-8);
        assert_relative_eq!(axis[1], 2.0 / norm, epsilon = 1e-8);
        Ok(())
    }

    #[test]
    fn test_axis_sign_is_deterministic() -> anyhow::Result<()> {
        let x = array![[3.0, -1.0], [0.0, 0.0], [-3.0, 1.0], [6.0, -2.0]];
        let pca = Pca::new(NalgebraSVD);

        let axis = pca.principal_axis(x.view(), None)?;

        // The largest-magnitude entry is the first; it must come out positive.
        assert!(axis[0] > 0.0);
        assert_relative_eq!(axis[1], -axis[0] / 3.0, epsilon = 1e-8);
        Ok(())
    }

    #[test]
    fn test_weighted_axis_follows_upweighted_points() -> anyhow::Result<()> {
        let x = array![[1.0, 0.0], [-1.0, 0.0], [0.0, 1.0], [0.0, -1.0]];
        let pca = Pca::new(NalgebraSVD);

        let horizontal = pca.principal_axis(
            x.view(),
            Some(array![10.0, 10.0, 0.1, 0.1].view()),
        )?;
        let vertical = pca.principal_axis(
            x.view(),
            Some(array![0.1, 0.1, 10.0, 10.0].view()),
        )?;

        assert!(horizontal[0].abs() > 0.99);
        assert!(vertical[1].abs() > 0.99);
        Ok(())
    }

    #[test]
    fn test_too_few_samples_is_rejected() {
        let x = array![[1.0, 2.0]];
        let pca = Pca::new(NalgebraSVD);

        assert!(pca.principal_axis(x.view(), None).is_err());
    }

    #[test]
    fn test_mismatched_weights_are_rejected() {
        let x = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let pca = Pca::new(NalgebraSVD);

        assert!(pca
            .principal_axis(x.view(), Some(array![1.0, 1.0].view()))
            .is_err());
        assert!(pca
            .principal_axis(x.view(), Some(array![1.0, -1.0, 1.0].view()))
            .is_err());
        assert!(pca
            .principal_axis(x.view(), Some(array![0.0, 0.0, 0.0].view()))
            .is_err());
    }

    #[cfg(feature = "faer")]
    #[test]
    fn test_faer_backend_matches_nalgebra() -> anyhow::Result<()> {
        let x = array![
            [0.1, 1.9],
            [1.0, 4.2],
            [2.2, 5.8],
            [2.9, 8.1],
            [4.1, 9.8]
        ];

        let reference = Pca::new(NalgebraSVD).principal_axis(x.view(), None)?;
        let axis = Pca::new(FaerSVD).principal_axis(x.view(), None)?;

        assert_relative_eq!(axis[0], reference[0], epsilon = 1e-8);
        assert_relative_eq!(axis[1], reference[1], epsilon = 1e-8);
        Ok(())
    }
}
