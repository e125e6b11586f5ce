//! PVC-Core: partial volume correction for emission tomography
//!
//! Removes point-spread-function spill-over between anatomical regions of a
//! 3D intensity volume (e.g. PET), given a co-registered stack of region
//! membership fields. Two correction methods are provided: the one-shot
//! region-based voxel-wise (RBV) correction, which deconvolves region means
//! through the geometric transfer matrix, and the iterative Yang method,
//! which re-estimates region means from the evolving corrected image.
//!
//! # Modules
//! - `fft`: 3D FFT helpers using rustfft
//! - `psf`: Gaussian PSF model and k-space blurring
//! - `regions`: region mask stacks, fuzziness correction, region statistics
//! - `gtm`: geometric transfer matrix construction and inversion
//! - `rbv`: region-based voxel-wise correction (one-shot)
//! - `iterative_yang`: iterative Yang correction
//! - `nifti_io`: NIfTI volume and mask-stack I/O
//! - `error`: error kinds shared by the pipelines

pub mod error;
pub mod fft;
pub mod gtm;
pub mod iterative_yang;
pub mod nifti_io;
pub mod psf;
pub mod rbv;
pub mod regions;

pub use error::PvcError;
