//! Geometric transfer matrix construction and inversion
//!
//! Entry (i, j) is the mean, over region i, of region j's membership field
//! blurred by the PSF: the fraction of region j's signal that the scanner
//! smears into region i. Inverting the matrix against the observed region
//! means recovers the spill-over-corrected means.

use nalgebra::{DMatrix, DVector};

use crate::error::PvcError;
use crate::psf::GaussianBlur;
use crate::regions::RegionMaskStack;

/// Condition-number limit beyond which the transfer matrix is treated as
/// singular. Roughly 1/sqrt(machine epsilon) of headroom below f64
/// precision; two regions with near-identical masks land far above it.
pub const CONDITION_LIMIT: f64 = 1e12;

/// Build the N x N transfer matrix and the per-region mass vector.
///
/// Each mask is blurred exactly once and the blurred copy serves the whole
/// matrix column, so the cost is N convolutions, not N^2. The mass vector
/// is returned for reuse as the denominator of region statistics.
pub fn build_gtm(
    masks: &RegionMaskStack,
    blur: &GaussianBlur,
) -> Result<(DMatrix<f64>, Vec<f64>), PvcError> {
    if blur.dims() != masks.dims() {
        let (bx, by, bz) = blur.dims();
        let (mx, my, mz) = masks.dims();
        return Err(PvcError::DimensionMismatch(format!(
            "blur operator is {}x{}x{} but mask stack is {}x{}x{}",
            bx, by, bz, mx, my, mz
        )));
    }

    let n = masks.regions();
    let masses = masks.checked_masses()?;

    let mut gtm = DMatrix::zeros(n, n);
    for j in 0..n {
        let blurred = blur.apply(masks.region(j));
        for i in 0..n {
            let spill: f64 = masks
                .region(i)
                .iter()
                .zip(blurred.iter())
                .map(|(&m, &b)| m * b)
                .sum();
            gtm[(i, j)] = spill / masses[i];
        }
    }

    log::debug!("transfer matrix over {} regions: {}", n, gtm);
    Ok((gtm, masses))
}

/// Deconvolve observed region means: solves gtm * corrected = observed.
///
/// Fails with `SingularMatrix` rather than approximating when the matrix is
/// singular or its condition number exceeds [`CONDITION_LIMIT`]; a silently
/// regularized mean would be indistinguishable from a correct one
/// downstream.
pub fn solve_region_means(
    gtm: &DMatrix<f64>,
    observed: &DVector<f64>,
) -> Result<DVector<f64>, PvcError> {
    if !gtm.is_square() || gtm.nrows() != observed.len() {
        return Err(PvcError::DimensionMismatch(format!(
            "{}x{} transfer matrix against {} observed means",
            gtm.nrows(),
            gtm.ncols(),
            observed.len()
        )));
    }

    let sv = gtm.singular_values();
    let s_max = sv.max();
    let s_min = sv.min();
    let condition = if s_min > 0.0 {
        s_max / s_min
    } else {
        f64::INFINITY
    };
    if !condition.is_finite() || condition > CONDITION_LIMIT {
        return Err(PvcError::SingularMatrix {
            condition,
            limit: CONDITION_LIMIT,
        });
    }

    gtm.clone().lu().solve(observed).ok_or(PvcError::SingularMatrix {
        condition,
        limit: CONDITION_LIMIT,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn half_volume_stack(nx: usize, ny: usize, nz: usize) -> RegionMaskStack {
        // region 0: x < nx/2, region 1: x >= nx/2
        let nvox = nx * ny * nz;
        let mut data = vec![0.0; 2 * nvox];
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let v = crate::fft::idx3d(i, j, k, nx, ny);
                    if i < nx / 2 {
                        data[v] = 1.0;
                    } else {
                        data[nvox + v] = 1.0;
                    }
                }
            }
        }
        RegionMaskStack::new(data, (nx, ny, nz), 2).unwrap()
    }

    #[test]
    fn test_whole_volume_region_gives_identity() {
        let (nx, ny, nz) = (6, 6, 6);
        let stack = RegionMaskStack::new(vec![1.0; nx * ny * nz], (nx, ny, nz), 1).unwrap();
        let blur = GaussianBlur::new(nx, ny, nz, (1.0, 1.0, 1.0));

        let (gtm, masses) = build_gtm(&stack, &blur).unwrap();
        assert_eq!(gtm.nrows(), 1);
        assert!((gtm[(0, 0)] - 1.0).abs() < 1e-9);
        assert!((masses[0] - (nx * ny * nz) as f64).abs() < 1e-9);
    }

    #[test]
    fn test_diagonal_dominates_for_disjoint_regions() {
        let stack = half_volume_stack(10, 6, 6);
        let blur = GaussianBlur::new(10, 6, 6, (0.7, 0.7, 0.7));

        let (gtm, _) = build_gtm(&stack, &blur).unwrap();
        assert!(gtm[(0, 0)] > gtm[(0, 1)], "row 0: {} vs {}", gtm[(0, 0)], gtm[(0, 1)]);
        assert!(gtm[(1, 1)] > gtm[(1, 0)], "row 1: {} vs {}", gtm[(1, 1)], gtm[(1, 0)]);
        // spill-over is real: off-diagonals are strictly positive
        assert!(gtm[(0, 1)] > 0.0);
        assert!(gtm[(1, 0)] > 0.0);
    }

    #[test]
    fn test_rows_sum_to_blur_mass_balance() {
        // with a partition of the volume, each row of the matrix sums to 1:
        // all signal observed in region i comes from some region
        let stack = half_volume_stack(8, 4, 4);
        let blur = GaussianBlur::new(8, 4, 4, (1.0, 1.0, 1.0));

        let (gtm, _) = build_gtm(&stack, &blur).unwrap();
        for i in 0..2 {
            let row_sum = gtm[(i, 0)] + gtm[(i, 1)];
            assert!((row_sum - 1.0).abs() < 1e-9, "row {} sums to {}", i, row_sum);
        }
    }

    #[test]
    fn test_solve_round_trip() {
        let gtm = DMatrix::from_row_slice(3, 3, &[
            0.90, 0.07, 0.03,
            0.10, 0.85, 0.05,
            0.02, 0.08, 0.90,
        ]);
        let truth = DVector::from_vec(vec![100.0, 50.0, 25.0]);
        let observed = &gtm * &truth;

        let solved = solve_region_means(&gtm, &observed).unwrap();
        for (a, b) in solved.iter().zip(truth.iter()) {
            assert!((a - b).abs() < 1e-9, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_singular_matrix_is_rejected() {
        let gtm = DMatrix::from_row_slice(2, 2, &[0.5, 0.5, 0.5, 0.5]);
        let observed = DVector::from_vec(vec![1.0, 1.0]);
        assert!(matches!(
            solve_region_means(&gtm, &observed),
            Err(PvcError::SingularMatrix { .. })
        ));
    }

    #[test]
    fn test_duplicate_masks_are_rejected_at_solve() {
        let (nx, ny, nz) = (6, 4, 4);
        let nvox = nx * ny * nz;
        let mut mask = vec![0.0; nvox];
        for v in 0..nvox / 2 {
            mask[v] = 1.0;
        }
        let mut data = mask.clone();
        data.extend_from_slice(&mask);
        let stack = RegionMaskStack::new(data, (nx, ny, nz), 2).unwrap();
        let blur = GaussianBlur::new(nx, ny, nz, (1.0, 1.0, 1.0));

        let (gtm, masses) = build_gtm(&stack, &blur).unwrap();
        let observed = DVector::from_vec(stack.region_means(&vec![1.0; nvox], &masses));
        assert!(matches!(
            solve_region_means(&gtm, &observed),
            Err(PvcError::SingularMatrix { .. })
        ));
    }

    #[test]
    fn test_zero_mass_region_fails_eagerly() {
        let (nx, ny, nz) = (4, 4, 4);
        let nvox = nx * ny * nz;
        let mut data = vec![0.0; 2 * nvox];
        for v in 0..nvox {
            data[v] = 1.0;
        }
        let stack = RegionMaskStack::new(data, (nx, ny, nz), 2).unwrap();
        let blur = GaussianBlur::new(nx, ny, nz, (1.0, 1.0, 1.0));

        assert!(matches!(
            build_gtm(&stack, &blur),
            Err(PvcError::NumericDegenerate { region: 1 })
        ));
    }
}
