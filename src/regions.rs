//! Region membership stacks and region-weighted statistics
//!
//! A stack holds N same-shaped 3D membership fields, one per anatomical
//! region, with voxel values in [0,1] (fractional) or {0,1} (binary).
//! Storage is region-major: region r occupies the contiguous range
//! [r*nx*ny*nz, (r+1)*nx*ny*nz), each region volume in Fortran order.

use crate::error::PvcError;

/// Ordered stack of per-region membership volumes.
#[derive(Debug, Clone)]
pub struct RegionMaskStack {
    data: Vec<f64>,
    dims: (usize, usize, usize),
    regions: usize,
}

impl RegionMaskStack {
    /// Wrap a region-major buffer. Fails with `DimensionMismatch` when the
    /// stack is empty or the buffer length does not match regions * volume.
    pub fn new(
        data: Vec<f64>,
        dims: (usize, usize, usize),
        regions: usize,
    ) -> Result<Self, PvcError> {
        if regions == 0 {
            return Err(PvcError::DimensionMismatch(
                "mask stack must contain at least one region".into(),
            ));
        }
        let (nx, ny, nz) = dims;
        let nvox = nx * ny * nz;
        if nvox == 0 || data.len() != nvox * regions {
            return Err(PvcError::DimensionMismatch(format!(
                "mask stack of {} regions over a {}x{}x{} grid requires {} values, got {}",
                regions,
                nx,
                ny,
                nz,
                nvox * regions,
                data.len()
            )));
        }
        Ok(Self { data, dims, regions })
    }

    /// Grid dimensions of one region volume.
    pub fn dims(&self) -> (usize, usize, usize) {
        self.dims
    }

    /// Number of regions in the stack.
    pub fn regions(&self) -> usize {
        self.regions
    }

    /// Number of voxels in one region volume.
    pub fn voxel_count(&self) -> usize {
        self.dims.0 * self.dims.1 * self.dims.2
    }

    /// Membership field of region r as a contiguous slice.
    pub fn region(&self, r: usize) -> &[f64] {
        let n = self.voxel_count();
        &self.data[r * n..(r + 1) * n]
    }

    /// Clamp invalid memberships and renormalize overfull voxels.
    ///
    /// Negative and non-finite values become 0. Where a voxel's memberships
    /// sum above 1, the voxel is scaled back to a sum of exactly 1; voxels
    /// at or below 1 are untouched. Stacks that already partition the
    /// volume therefore pass through unchanged, and applying the correction
    /// twice gives the same stack as applying it once.
    pub fn correct_fuzziness(&mut self) {
        let n = self.voxel_count();

        for val in self.data.iter_mut() {
            if !val.is_finite() || *val < 0.0 {
                *val = 0.0;
            }
        }

        for v in 0..n {
            let mut sum = 0.0;
            for r in 0..self.regions {
                sum += self.data[r * n + v];
            }
            if sum > 1.0 {
                for r in 0..self.regions {
                    self.data[r * n + v] /= sum;
                }
            }
        }
    }

    /// Total membership mass per region.
    pub fn masses(&self) -> Vec<f64> {
        (0..self.regions)
            .map(|r| self.region(r).iter().sum())
            .collect()
    }

    /// Masses, failing with `NumericDegenerate` on any region without
    /// support. A zero-mass region has no defined mean and poisons the
    /// transfer matrix, so it is rejected up front.
    pub fn checked_masses(&self) -> Result<Vec<f64>, PvcError> {
        let masses = self.masses();
        for (region, &m) in masses.iter().enumerate() {
            if m <= 0.0 {
                return Err(PvcError::NumericDegenerate { region });
            }
        }
        Ok(masses)
    }

    /// Mask-weighted mean of an intensity volume per region, using masses
    /// as returned by [`checked_masses`](Self::checked_masses).
    pub fn region_means(&self, intensity: &[f64], masses: &[f64]) -> Vec<f64> {
        (0..self.regions)
            .map(|r| {
                let weighted: f64 = self
                    .region(r)
                    .iter()
                    .zip(intensity.iter())
                    .map(|(&m, &v)| m * v)
                    .sum();
                weighted / masses[r]
            })
            .collect()
    }
}
