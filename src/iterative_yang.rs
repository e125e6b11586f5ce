//! Iterative Yang correction
//!
//! Fixed-point refinement: each pass re-estimates region means directly
//! from the current corrected estimate (no matrix inversion, unlike RBV),
//! paints a synthetic image from them, and reapplies the blur-ratio
//! factors to the original volume. The loop always runs exactly the
//! requested number of passes; there is no convergence test.

use crate::error::PvcError;
use crate::psf::GaussianBlur;
use crate::rbv::{correction_factors, synthetic_volume};
use crate::regions::RegionMaskStack;

/// Iterative Yang correction of `pet` with the given mask stack and
/// per-axis PSF variance (voxel^2 units).
pub fn iterative_yang(
    pet: &[f64],
    masks: &RegionMaskStack,
    variance: (f64, f64, f64),
    iterations: usize,
) -> Result<Vec<f64>, PvcError> {
    iterative_yang_with_progress(pet, masks, variance, iterations, |_, _| {})
}

/// Same as [`iterative_yang`] but calls `progress(iteration, region_means)`
/// at the start of every pass with that pass's re-estimated means. The
/// callback observes diagnostics only; it cannot alter the result.
pub fn iterative_yang_with_progress<F>(
    pet: &[f64],
    masks: &RegionMaskStack,
    variance: (f64, f64, f64),
    iterations: usize,
    mut progress: F,
) -> Result<Vec<f64>, PvcError>
where
    F: FnMut(usize, &[f64]),
{
    if iterations == 0 {
        return Err(PvcError::InvalidParameter(
            "iteration count must be at least 1".into(),
        ));
    }
    let (nx, ny, nz) = masks.dims();
    if pet.len() != masks.voxel_count() {
        return Err(PvcError::InvalidParameter(format!(
            "intensity volume has {} voxels but the mask stack grid is {}x{}x{}",
            pet.len(),
            nx,
            ny,
            nz
        )));
    }

    let mut masks = masks.clone();
    masks.correct_fuzziness();
    let masses = masks.checked_masses()?;

    let blur = GaussianBlur::new(nx, ny, nz, variance);

    let mut estimate = pet.to_vec();
    for iteration in 1..=iterations {
        let means = masks.region_means(&estimate, &masses);
        log::debug!("iteration {}: region means {:?}", iteration, means);
        progress(iteration, &means);

        let synth = synthetic_volume(&masks, &means);
        let blurred = blur.apply(&synth);
        let factors = correction_factors(&synth, &blurred);

        for ((e, &p), &f) in estimate.iter_mut().zip(pet.iter()).zip(factors.iter()) {
            *e = p * f;
        }
    }

    Ok(estimate)
}
