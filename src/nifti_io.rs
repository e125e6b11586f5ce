//! NIfTI file I/O
//!
//! Reads 3D intensity volumes and 4D region mask stacks, writes 3D FLOAT32
//! volumes. Gzip compression is auto-detected on read and chosen by file
//! extension on write. Data is carried in Fortran order (x varies fastest)
//! to match the NIfTI convention.

use std::io::Cursor;
use std::path::Path;

use flate2::read::GzDecoder;
use ndarray::{Array, IxDyn};
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};

use crate::error::PvcError;
use crate::regions::RegionMaskStack;

/// A 3D volume with its grid metadata.
pub struct NiftiVolume {
    /// Volume data in Fortran order.
    pub data: Vec<f64>,
    /// Dimensions (nx, ny, nz).
    pub dims: (usize, usize, usize),
    /// Voxel sizes in mm.
    pub voxel_size: (f64, f64, f64),
    /// 4x4 voxel-to-world transform, row-major.
    pub affine: [f64; 16],
}

/// A 4D region mask stack with its grid metadata.
pub struct NiftiMaskStack {
    /// Membership stack, one volume per region.
    pub stack: RegionMaskStack,
    /// Voxel sizes in mm.
    pub voxel_size: (f64, f64, f64),
    /// 4x4 voxel-to-world transform, row-major.
    pub affine: [f64; 16],
}

/// Check if bytes are gzip compressed
fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

fn decode(bytes: &[u8]) -> Result<(Array<f64, IxDyn>, (f64, f64, f64), [f64; 16]), PvcError> {
    let obj: InMemNiftiObject = if is_gzip(bytes) {
        InMemNiftiObject::from_reader(GzDecoder::new(Cursor::new(bytes)))
            .map_err(|e| PvcError::Image(format!("failed to read gzipped NIfTI: {}", e)))?
    } else {
        InMemNiftiObject::from_reader(Cursor::new(bytes))
            .map_err(|e| PvcError::Image(format!("failed to read NIfTI: {}", e)))?
    };

    let header = obj.header();
    let pixdim = header.pixdim;
    let voxel_size = (pixdim[1] as f64, pixdim[2] as f64, pixdim[3] as f64);
    let affine = get_affine(header);

    let array: Array<f64, _> = obj
        .into_volume()
        .into_ndarray()
        .map_err(|e| PvcError::Image(format!("failed to convert NIfTI volume: {}", e)))?;

    Ok((array, voxel_size, affine))
}

/// Load a 3D intensity volume from bytes (.nii or .nii.gz).
///
/// A 4D image with a single frame is accepted; anything with more frames is
/// a `DimensionMismatch`.
pub fn load_volume(bytes: &[u8]) -> Result<NiftiVolume, PvcError> {
    let (array, voxel_size, affine) = decode(bytes)?;
    let shape = array.shape().to_vec();

    let (nx, ny, nz) = match shape.len() {
        3 => (shape[0], shape[1], shape[2]),
        4 if shape[3] == 1 => (shape[0], shape[1], shape[2]),
        _ => {
            return Err(PvcError::DimensionMismatch(format!(
                "expected a 3D intensity volume, got shape {:?}",
                shape
            )))
        }
    };

    let mut data = Vec::with_capacity(nx * ny * nz);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let v = if shape.len() == 3 {
                    array[[i, j, k]]
                } else {
                    array[[i, j, k, 0]]
                };
                data.push(v);
            }
        }
    }

    Ok(NiftiVolume {
        data,
        dims: (nx, ny, nz),
        voxel_size,
        affine,
    })
}

/// Load a 4D region mask stack from bytes (.nii or .nii.gz).
///
/// The image must be 4D with the region index as the last axis; a 3D mask
/// image is a `DimensionMismatch`, as is a stack of zero regions.
pub fn load_mask_stack(bytes: &[u8]) -> Result<NiftiMaskStack, PvcError> {
    let (array, voxel_size, affine) = decode(bytes)?;
    let shape = array.shape().to_vec();

    if shape.len() != 4 {
        return Err(PvcError::DimensionMismatch(format!(
            "mask image must be 4D (one volume per region), got shape {:?}",
            shape
        )));
    }
    let (nx, ny, nz, regions) = (shape[0], shape[1], shape[2], shape[3]);

    let mut data = Vec::with_capacity(nx * ny * nz * regions);
    for r in 0..regions {
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    data.push(array[[i, j, k, r]]);
                }
            }
        }
    }

    let stack = RegionMaskStack::new(data, (nx, ny, nz), regions)?;
    Ok(NiftiMaskStack {
        stack,
        voxel_size,
        affine,
    })
}

/// Get affine transformation matrix from header
fn get_affine(header: &NiftiHeader) -> [f64; 16] {
    // Prefer sform if available (sform_code > 0)
    if header.sform_code > 0 {
        let s = &header.srow_x;
        let t = &header.srow_y;
        let u = &header.srow_z;
        [
            s[0] as f64, s[1] as f64, s[2] as f64, s[3] as f64,
            t[0] as f64, t[1] as f64, t[2] as f64, t[3] as f64,
            u[0] as f64, u[1] as f64, u[2] as f64, u[3] as f64,
            0.0, 0.0, 0.0, 1.0,
        ]
    } else {
        // Fall back to identity with voxel scaling
        let vsx = header.pixdim[1] as f64;
        let vsy = header.pixdim[2] as f64;
        let vsz = header.pixdim[3] as f64;
        [
            vsx, 0.0, 0.0, 0.0,
            0.0, vsy, 0.0, 0.0,
            0.0, 0.0, vsz, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ]
    }
}

/// Encode data as a NIfTI-1 file (348-byte header + FLOAT32 payload).
fn encode_nifti(
    data: &[f64],
    dims: &[usize],
    voxel_size: (f64, f64, f64),
    affine: &[f64; 16],
) -> Result<Vec<u8>, PvcError> {
    use std::io::Write;

    if dims.is_empty() || dims.len() > 7 {
        return Err(PvcError::Image(format!(
            "cannot encode a {}-dimensional NIfTI image",
            dims.len()
        )));
    }
    let expected: usize = dims.iter().product();
    if data.len() != expected {
        return Err(PvcError::Image(format!(
            "data length {} does not match shape {:?}",
            data.len(),
            dims
        )));
    }

    let (vsx, vsy, vsz) = voxel_size;

    // NIfTI-1 header (348 bytes)
    let mut header = [0u8; 348];

    // sizeof_hdr = 348
    header[0..4].copy_from_slice(&348i32.to_le_bytes());

    // dim[0..7]
    let mut dim: [i16; 8] = [dims.len() as i16, 1, 1, 1, 1, 1, 1, 1];
    for (i, &d) in dims.iter().enumerate() {
        dim[i + 1] = d as i16;
    }
    for (i, &d) in dim.iter().enumerate() {
        let offset = 40 + i * 2;
        header[offset..offset + 2].copy_from_slice(&d.to_le_bytes());
    }

    // datatype = 16 (FLOAT32)
    header[70..72].copy_from_slice(&16i16.to_le_bytes());

    // bitpix = 32
    header[72..74].copy_from_slice(&32i16.to_le_bytes());

    // pixdim[0..7]
    let pixdim: [f32; 8] = [1.0, vsx as f32, vsy as f32, vsz as f32, 1.0, 1.0, 1.0, 1.0];
    for (i, &p) in pixdim.iter().enumerate() {
        let offset = 76 + i * 4;
        header[offset..offset + 4].copy_from_slice(&p.to_le_bytes());
    }

    // vox_offset = 352 (header + 4-byte extension flag)
    header[108..112].copy_from_slice(&352.0f32.to_le_bytes());

    // scl_slope = 1.0, scl_inter = 0.0
    header[112..116].copy_from_slice(&1.0f32.to_le_bytes());
    header[116..120].copy_from_slice(&0.0f32.to_le_bytes());

    // sform_code = 1 (scanner anat)
    header[254..256].copy_from_slice(&1i16.to_le_bytes());

    // srow_x, srow_y, srow_z
    for row in 0..3 {
        for col in 0..4 {
            let offset = 280 + row * 16 + col * 4;
            let value = affine[row * 4 + col] as f32;
            header[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }
    }

    // magic = "n+1\0" for a single-file NIfTI-1
    header[344..348].copy_from_slice(b"n+1\0");

    let mut buffer = Vec::with_capacity(352 + data.len() * 4);
    buffer
        .write_all(&header)
        .map_err(|e| PvcError::Image(format!("write header failed: {}", e)))?;
    buffer
        .write_all(&[0u8; 4])
        .map_err(|e| PvcError::Image(format!("write extension failed: {}", e)))?;
    for &val in data {
        buffer
            .write_all(&(val as f32).to_le_bytes())
            .map_err(|e| PvcError::Image(format!("write data failed: {}", e)))?;
    }

    Ok(buffer)
}

/// Save a 3D volume as uncompressed NIfTI bytes (.nii).
pub fn save_volume(
    data: &[f64],
    dims: (usize, usize, usize),
    voxel_size: (f64, f64, f64),
    affine: &[f64; 16],
) -> Result<Vec<u8>, PvcError> {
    encode_nifti(data, &[dims.0, dims.1, dims.2], voxel_size, affine)
}

/// Save a 3D volume as gzipped NIfTI bytes (.nii.gz).
pub fn save_volume_gz(
    data: &[f64],
    dims: (usize, usize, usize),
    voxel_size: (f64, f64, f64),
    affine: &[f64; 16],
) -> Result<Vec<u8>, PvcError> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let uncompressed = save_volume(data, dims, voxel_size, affine)?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&uncompressed)
        .map_err(|e| PvcError::Image(format!("gzip compression failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| PvcError::Image(format!("gzip finish failed: {}", e)))
}

/// Read a 3D intensity volume from a file (.nii or .nii.gz).
pub fn read_volume_file(path: &Path) -> Result<NiftiVolume, PvcError> {
    let bytes = std::fs::read(path)
        .map_err(|e| PvcError::Image(format!("failed to read '{}': {}", path.display(), e)))?;
    load_volume(&bytes)
}

/// Read a 4D region mask stack from a file (.nii or .nii.gz).
pub fn read_mask_stack_file(path: &Path) -> Result<NiftiMaskStack, PvcError> {
    let bytes = std::fs::read(path)
        .map_err(|e| PvcError::Image(format!("failed to read '{}': {}", path.display(), e)))?;
    load_mask_stack(&bytes)
}

/// Write a 3D volume to a file, gzipped when the path ends in .gz.
pub fn write_volume_file(
    path: &Path,
    data: &[f64],
    dims: (usize, usize, usize),
    voxel_size: (f64, f64, f64),
    affine: &[f64; 16],
) -> Result<(), PvcError> {
    let gz = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);
    let bytes = if gz {
        save_volume_gz(data, dims, voxel_size, affine)?
    } else {
        save_volume(data, dims, voxel_size, affine)?
    };
    std::fs::write(path, bytes)
        .map_err(|e| PvcError::Image(format!("failed to write '{}': {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDENTITY_AFFINE: [f64; 16] = [
        1.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    ];

    #[test]
    fn test_volume_roundtrip() {
        let dims = (4, 3, 2);
        let data: Vec<f64> = (0..24).map(|i| i as f64 * 0.5).collect();

        let bytes = save_volume(&data, dims, (2.0, 2.0, 3.0), &IDENTITY_AFFINE).unwrap();
        let loaded = load_volume(&bytes).unwrap();

        assert_eq!(loaded.dims, dims);
        assert!((loaded.voxel_size.0 - 2.0).abs() < 1e-5);
        assert!((loaded.voxel_size.2 - 3.0).abs() < 1e-5);
        for (a, b) in loaded.data.iter().zip(data.iter()) {
            assert!((a - b).abs() < 1e-5, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_gz_roundtrip() {
        let dims = (3, 3, 3);
        let data: Vec<f64> = (0..27).map(|i| (i as f64).sqrt()).collect();

        let bytes = save_volume_gz(&data, dims, (1.0, 1.0, 1.0), &IDENTITY_AFFINE).unwrap();
        assert!(is_gzip(&bytes));

        let loaded = load_volume(&bytes).unwrap();
        assert_eq!(loaded.dims, dims);
        for (a, b) in loaded.data.iter().zip(data.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_mask_stack_roundtrip() {
        let (nx, ny, nz, regions) = (3, 2, 2, 2);
        let nvox = nx * ny * nz;
        let mut data = vec![0.0; nvox * regions];
        for v in 0..nvox / 2 {
            data[v] = 1.0;
        }
        for v in nvox / 2..nvox {
            data[nvox + v] = 1.0;
        }

        let bytes =
            encode_nifti(&data, &[nx, ny, nz, regions], (1.0, 1.0, 1.0), &IDENTITY_AFFINE)
                .unwrap();
        let loaded = load_mask_stack(&bytes).unwrap();

        assert_eq!(loaded.stack.regions(), 2);
        assert_eq!(loaded.stack.dims(), (nx, ny, nz));
        for r in 0..regions {
            for (a, b) in loaded
                .stack
                .region(r)
                .iter()
                .zip(data[r * nvox..(r + 1) * nvox].iter())
            {
                assert!((a - b).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_volume_loader_rejects_multi_frame() {
        let data = vec![0.0; 8 * 2];
        let bytes =
            encode_nifti(&data, &[2, 2, 2, 2], (1.0, 1.0, 1.0), &IDENTITY_AFFINE).unwrap();
        assert!(matches!(
            load_volume(&bytes),
            Err(PvcError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_mask_loader_rejects_3d() {
        let data = vec![1.0; 8];
        let bytes = save_volume(&data, (2, 2, 2), (1.0, 1.0, 1.0), &IDENTITY_AFFINE).unwrap();
        assert!(matches!(
            load_mask_stack(&bytes),
            Err(PvcError::DimensionMismatch(_))
        ));
    }
}
