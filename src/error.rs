//! Error kinds shared by the correction pipelines.

use thiserror::Error;

/// Failures that abort a correction run.
///
/// All of these are detected eagerly at the start of the component that
/// owns the check; none are downgraded to default values. The one numeric
/// condition handled locally instead of through this enum is a zero
/// blurred-synthetic voxel, which yields a correction factor of 0 at that
/// voxel only.
#[derive(Debug, Error)]
pub enum PvcError {
    /// An input is outside its legal range: a non-positive FWHM, a zero
    /// iteration count, or an intensity volume whose grid disagrees with
    /// the mask stack.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The mask image is not a 4D stack with at least one region, or a
    /// matrix and vector disagree on shape.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// The geometric transfer matrix cannot be inverted within tolerance,
    /// so region means cannot be reliably deconvolved.
    #[error("geometric transfer matrix is singular or ill-conditioned (condition number {condition:.3e}, limit {limit:.3e})")]
    SingularMatrix { condition: f64, limit: f64 },

    /// A region has zero total membership mass, making its mean undefined.
    #[error("region {region} has zero total membership mass")]
    NumericDegenerate { region: usize },

    /// NIfTI decoding or encoding failed.
    #[error("image i/o: {0}")]
    Image(String),
}
