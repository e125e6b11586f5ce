//! 3D FFT helpers using rustfft
//!
//! Complex-to-complex transforms over flat buffers in Fortran (column-major)
//! order, matching the NIfTI voxel layout: index = x + y*nx + z*nx*ny.

use num_complex::Complex64;
use rustfft::{FftDirection, FftPlanner};

/// Index into a 3D array stored in Fortran order (column-major)
/// index = x + y*nx + z*nx*ny
#[inline(always)]
pub fn idx3d(i: usize, j: usize, k: usize, nx: usize, ny: usize) -> usize {
    i + j * nx + k * nx * ny
}

/// In-place 1D transforms along all three axes.
///
/// The x-axis is contiguous and transformed in place; y and z lines are
/// gathered into a stride-1 buffer, transformed, and scattered back.
fn transform(data: &mut [Complex64], nx: usize, ny: usize, nz: usize, direction: FftDirection) {
    let mut planner = FftPlanner::new();

    // x-axis (stride 1)
    let fft_x = planner.plan_fft(nx, direction);
    let mut scratch = vec![Complex64::new(0.0, 0.0); fft_x.get_inplace_scratch_len()];
    for k in 0..nz {
        for j in 0..ny {
            let start = idx3d(0, j, k, nx, ny);
            fft_x.process_with_scratch(&mut data[start..start + nx], &mut scratch);
        }
    }

    // y-axis (stride nx)
    let fft_y = planner.plan_fft(ny, direction);
    let mut scratch = vec![Complex64::new(0.0, 0.0); fft_y.get_inplace_scratch_len()];
    let mut line = vec![Complex64::new(0.0, 0.0); ny];
    for k in 0..nz {
        for i in 0..nx {
            for j in 0..ny {
                line[j] = data[idx3d(i, j, k, nx, ny)];
            }
            fft_y.process_with_scratch(&mut line, &mut scratch);
            for j in 0..ny {
                data[idx3d(i, j, k, nx, ny)] = line[j];
            }
        }
    }

    // z-axis (stride nx*ny)
    let fft_z = planner.plan_fft(nz, direction);
    let mut scratch = vec![Complex64::new(0.0, 0.0); fft_z.get_inplace_scratch_len()];
    let mut line = vec![Complex64::new(0.0, 0.0); nz];
    for j in 0..ny {
        for i in 0..nx {
            for k in 0..nz {
                line[k] = data[idx3d(i, j, k, nx, ny)];
            }
            fft_z.process_with_scratch(&mut line, &mut scratch);
            for k in 0..nz {
                data[idx3d(i, j, k, nx, ny)] = line[k];
            }
        }
    }
}

/// In-place forward 3D FFT.
pub fn fft3d(data: &mut [Complex64], nx: usize, ny: usize, nz: usize) {
    transform(data, nx, ny, nz, FftDirection::Forward);
}

/// In-place inverse 3D FFT (includes 1/N normalization).
pub fn ifft3d(data: &mut [Complex64], nx: usize, ny: usize, nz: usize) {
    transform(data, nx, ny, nz, FftDirection::Inverse);
    let n_total = (nx * ny * nz) as f64;
    for val in data.iter_mut() {
        *val /= n_total;
    }
}

/// Sample frequencies for a length-n transform with sample spacing d.
/// Matches numpy.fft.fftfreq(n, d).
pub fn fftfreq(n: usize, d: f64) -> Vec<f64> {
    let mut freq = vec![0.0; n];
    let val = 1.0 / (n as f64 * d);

    if n % 2 == 0 {
        // Even: [0, 1, ..., n/2-1, -n/2, ..., -1]
        for i in 0..n / 2 {
            freq[i] = (i as f64) * val;
        }
        for i in n / 2..n {
            freq[i] = ((i as i64) - (n as i64)) as f64 * val;
        }
    } else {
        // Odd: [0, 1, ..., (n-1)/2, -(n-1)/2, ..., -1]
        for i in 0..=(n - 1) / 2 {
            freq[i] = (i as f64) * val;
        }
        for i in (n + 1) / 2..n {
            freq[i] = ((i as i64) - (n as i64)) as f64 * val;
        }
    }
    freq
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fft_ifft_roundtrip() {
        let (nx, ny, nz) = (4, 6, 5);

        let original: Vec<f64> = (0..nx * ny * nz).map(|i| (i as f64) * 0.25 - 3.0).collect();

        let mut data: Vec<Complex64> = original.iter()
            .map(|&x| Complex64::new(x, 0.0))
            .collect();

        fft3d(&mut data, nx, ny, nz);
        ifft3d(&mut data, nx, ny, nz);

        for (i, (&orig, result)) in original.iter().zip(data.iter()).enumerate() {
            assert!(
                (result.re - orig).abs() < 1e-10,
                "mismatch at index {}: expected {}, got {}",
                i, orig, result.re
            );
            assert!(
                result.im.abs() < 1e-10,
                "imaginary part not zero at index {}: {}",
                i, result.im
            );
        }
    }

    #[test]
    fn test_dc_component_is_sum() {
        let (nx, ny, nz) = (3, 3, 3);
        let values: Vec<f64> = (0..27).map(|i| i as f64).collect();
        let total: f64 = values.iter().sum();

        let mut data: Vec<Complex64> = values.iter().map(|&x| Complex64::new(x, 0.0)).collect();
        fft3d(&mut data, nx, ny, nz);

        assert!((data[0].re - total).abs() < 1e-9);
        assert!(data[0].im.abs() < 1e-9);
    }

    #[test]
    fn test_fftfreq() {
        // Even n=4
        let freq = fftfreq(4, 1.0);
        assert!((freq[0] - 0.0).abs() < 1e-10);
        assert!((freq[1] - 0.25).abs() < 1e-10);
        assert!((freq[2] - (-0.5)).abs() < 1e-10);
        assert!((freq[3] - (-0.25)).abs() < 1e-10);

        // Odd n=5
        let freq = fftfreq(5, 1.0);
        assert!((freq[0] - 0.0).abs() < 1e-10);
        assert!((freq[1] - 0.2).abs() < 1e-10);
        assert!((freq[2] - 0.4).abs() < 1e-10);
        assert!((freq[3] - (-0.4)).abs() < 1e-10);
        assert!((freq[4] - (-0.2)).abs() < 1e-10);
    }
}
