pub mod curve;
pub mod geometry;
pub mod pca;
pub mod spline;

pub use curve::FittedCurve;
pub use curve::PrincipalCurve;
pub use curve::PrincipalCurveBuilder;
pub use pca::NalgebraSVD;
pub use pca::SVDImplementation;
pub use spline::SplineParams;
