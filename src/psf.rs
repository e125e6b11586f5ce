//! Gaussian point-spread-function model and blurring
//!
//! The scanner PSF is an anisotropic Gaussian specified by its full width at
//! half maximum per axis. Blurring is performed in k-space: forward FFT,
//! multiplication by the separable Gaussian transfer function, inverse FFT.
//! The transfer function has unit gain at zero frequency, so constants and
//! volume sums are preserved exactly.

use num_complex::Complex64;

use crate::error::PvcError;
use crate::fft::{fft3d, fftfreq, ifft3d};

/// FWHM of a Gaussian is 2*sqrt(2*ln 2) standard deviations.
const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949_3;

/// Convert an FWHM triple into per-axis Gaussian variances.
///
/// Use this form when the FWHM is already expressed in voxel units.
/// Fails with `InvalidParameter` if any component is not a positive finite
/// number.
pub fn fwhm_to_variance(fwhm: (f64, f64, f64)) -> Result<(f64, f64, f64), PvcError> {
    fwhm_to_variance_voxel(fwhm, (1.0, 1.0, 1.0))
}

/// Convert an FWHM triple (mm) into per-axis Gaussian variances in voxel^2
/// units, dividing each sigma by the voxel size on that axis.
///
/// The voxel-unit variance is what the k-space blur expects, since it
/// operates on voxel indices rather than physical coordinates.
pub fn fwhm_to_variance_voxel(
    fwhm: (f64, f64, f64),
    voxel_size: (f64, f64, f64),
) -> Result<(f64, f64, f64), PvcError> {
    for &f in &[fwhm.0, fwhm.1, fwhm.2] {
        if !f.is_finite() || f <= 0.0 {
            return Err(PvcError::InvalidParameter(format!(
                "FWHM components must be positive, got ({}, {}, {})",
                fwhm.0, fwhm.1, fwhm.2
            )));
        }
    }
    for &v in &[voxel_size.0, voxel_size.1, voxel_size.2] {
        if !v.is_finite() || v <= 0.0 {
            return Err(PvcError::InvalidParameter(format!(
                "voxel sizes must be positive, got ({}, {}, {})",
                voxel_size.0, voxel_size.1, voxel_size.2
            )));
        }
    }

    let var = |f: f64, v: f64| (f / FWHM_PER_SIGMA / v).powi(2);
    Ok((
        var(fwhm.0, voxel_size.0),
        var(fwhm.1, voxel_size.1),
        var(fwhm.2, voxel_size.2),
    ))
}

/// Gaussian blurring operator for one volume geometry.
///
/// Precomputes the per-axis transfer vectors once; `apply` is then called
/// for every convolution of a run (each region mask once for the transfer
/// matrix, plus the synthetic image once per correction pass).
pub struct GaussianBlur {
    nx: usize,
    ny: usize,
    nz: usize,
    tx: Vec<f64>,
    ty: Vec<f64>,
    tz: Vec<f64>,
}

impl GaussianBlur {
    /// Create a blur operator for an nx*ny*nz grid with the given per-axis
    /// variances in voxel^2 units. Zero variance on an axis leaves that
    /// axis untouched.
    pub fn new(nx: usize, ny: usize, nz: usize, variance: (f64, f64, f64)) -> Self {
        Self {
            nx,
            ny,
            nz,
            tx: axis_transfer(nx, variance.0),
            ty: axis_transfer(ny, variance.1),
            tz: axis_transfer(nz, variance.2),
        }
    }

    /// Grid dimensions this operator was built for.
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.nx, self.ny, self.nz)
    }

    /// Blur one volume, returning a same-shape array.
    pub fn apply(&self, src: &[f64]) -> Vec<f64> {
        let (nx, ny, nz) = (self.nx, self.ny, self.nz);

        let mut buf: Vec<Complex64> = src.iter().map(|&v| Complex64::new(v, 0.0)).collect();
        fft3d(&mut buf, nx, ny, nz);

        let mut idx = 0;
        for k in 0..nz {
            for j in 0..ny {
                let tyz = self.ty[j] * self.tz[k];
                for i in 0..nx {
                    buf[idx] *= self.tx[i] * tyz;
                    idx += 1;
                }
            }
        }

        ifft3d(&mut buf, nx, ny, nz);
        buf.iter().map(|c| c.re).collect()
    }
}

/// Transfer function of a Gaussian with the given variance along one axis:
/// exp(-2 pi^2 sigma^2 f^2) at the FFT frequencies, in cycles per voxel.
fn axis_transfer(n: usize, variance: f64) -> Vec<f64> {
    let two_pi_sq = 2.0 * std::f64::consts::PI * std::f64::consts::PI;
    fftfreq(n, 1.0)
        .iter()
        .map(|&f| (-two_pi_sq * variance * f * f).exp())
        .collect()
}
