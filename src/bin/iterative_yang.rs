//! Iterative Yang partial volume correction executable.

use std::path::PathBuf;
use std::process::ExitCode;

use pvc_core::iterative_yang::iterative_yang_with_progress;
use pvc_core::nifti_io::{read_mask_stack_file, read_volume_file, write_volume_file};
use pvc_core::psf::fwhm_to_variance_voxel;

const DEFAULT_ITERATIONS: usize = 10;

const USAGE: &str = "usage: iterative_yang <petfile> <maskfile> <outputfile> -x <FWHMx> -y <FWHMy> -z <FWHMz> [-i <n>] [-d]

Performs iterative Yang partial volume correction.

  <petfile>     input PET image (.nii or .nii.gz)
  <maskfile>    4D region mask image (.nii or .nii.gz), one volume per region
  <outputfile>  corrected output image (.nii or .nii.gz)
  -x, -y, -z    PSF full width at half maximum in mm along each axis (required)
  -i, --iter    number of iterations (default 10)
  -d, --debug   print the region means of every iteration";

struct Args {
    pet: PathBuf,
    mask: PathBuf,
    output: PathBuf,
    fwhm: (f64, f64, f64),
    iterations: usize,
    debug: bool,
}

fn parse_value(value: Option<&String>, flag: &str) -> Result<f64, String> {
    let raw = value.ok_or_else(|| format!("missing value for {}", flag))?;
    raw.parse::<f64>()
        .map_err(|_| format!("invalid value '{}' for {}", raw, flag))
}

fn parse_count(value: Option<&String>, flag: &str) -> Result<usize, String> {
    let raw = value.ok_or_else(|| format!("missing value for {}", flag))?;
    raw.parse::<usize>()
        .map_err(|_| format!("invalid iteration count '{}' for {}", raw, flag))
}

fn parse_args(argv: &[String]) -> Result<Args, String> {
    let mut positional: Vec<String> = Vec::new();
    let (mut fx, mut fy, mut fz) = (None, None, None);
    let mut iterations = DEFAULT_ITERATIONS;
    let mut debug = false;

    let mut iter = argv.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-x" => fx = Some(parse_value(iter.next(), "-x")?),
            "-y" => fy = Some(parse_value(iter.next(), "-y")?),
            "-z" => fz = Some(parse_value(iter.next(), "-z")?),
            "-i" | "--iter" => iterations = parse_count(iter.next(), arg.as_str())?,
            "-d" | "--debug" => debug = true,
            "-h" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            _ => positional.push(arg.clone()),
        }
    }

    if positional.len() != 3 {
        return Err(format!(
            "expected 3 file arguments, got {}\n{}",
            positional.len(),
            USAGE
        ));
    }
    let fwhm = match (fx, fy, fz) {
        (Some(x), Some(y), Some(z)) => (x, y, z),
        _ => return Err(format!("-x, -y and -z are required\n{}", USAGE)),
    };

    Ok(Args {
        pet: PathBuf::from(&positional[0]),
        mask: PathBuf::from(&positional[1]),
        output: PathBuf::from(&positional[2]),
        fwhm,
        iterations,
        debug,
    })
}

fn run() -> Result<(), String> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&argv)?;

    let pet = read_volume_file(&args.pet)
        .map_err(|e| format!("cannot read PET input '{}': {}", args.pet.display(), e))?;
    let masks = read_mask_stack_file(&args.mask)
        .map_err(|e| format!("cannot read mask input '{}': {}", args.mask.display(), e))?;

    let (nx, ny, nz) = pet.dims;
    let (vx, vy, vz) = pet.voxel_size;
    println!(
        "[INFO] Volume: {}x{}x{}, voxel {:.2}x{:.2}x{:.2} mm, {} regions, {} iterations",
        nx, ny, nz, vx, vy, vz,
        masks.stack.regions(),
        args.iterations
    );

    let variance =
        fwhm_to_variance_voxel(args.fwhm, pet.voxel_size).map_err(|e| e.to_string())?;

    let debug = args.debug;
    let corrected = iterative_yang_with_progress(
        &pet.data,
        &masks.stack,
        variance,
        args.iterations,
        |iteration, means| {
            if debug {
                println!("[INFO] Iteration {}: region means {:?}", iteration, means);
            }
        },
    )
    .map_err(|e| {
        format!(
            "failure applying iterative Yang on '{}': {}",
            args.pet.display(),
            e
        )
    })?;

    write_volume_file(
        &args.output,
        &corrected,
        pet.dims,
        pet.voxel_size,
        &pet.affine,
    )
    .map_err(|e| format!("cannot write output '{}': {}", args.output.display(), e))?;
    println!("[INFO] Wrote {}", args.output.display());

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("[Error] {}", err);
            ExitCode::FAILURE
        }
    }
}
