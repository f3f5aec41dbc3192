use std::{error::Error, fs, path::PathBuf};

use clap::{Args, Parser, Subcommand};
use fisheye_calib::{
    calibrate_with_config, undistort, CalibrateConfig, Calibration, OutputFormat,
    UndistortOptions,
};

/// Fisheye lens calibration and undistortion.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Estimate K and D from checkerboard photographs.
    Calibrate(CalibrateArgs),
    /// Remove fisheye distortion from an image.
    Undistort(UndistortArgs),
}

#[derive(Debug, Args)]
struct CalibrateArgs {
    /// Inner corners per row.
    #[arg(long)]
    cols: u32,
    /// Inner corners per column.
    #[arg(long)]
    rows: u32,
    /// JSON CalibrateConfig with detector, refiner and solver parameters.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Write the calibration JSON here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Write the calibration report JSON here.
    #[arg(long)]
    report: Option<PathBuf>,
    /// Checkerboard images.
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

#[derive(Debug, Args)]
struct UndistortArgs {
    /// Calibration JSON with "K" and "D".
    #[arg(short, long)]
    calibration: PathBuf,
    /// Output size multiplier.
    #[arg(long, default_value_t = 1.0)]
    scale: f64,
    /// JPEG quality (1-100) or PNG compression level (0-9).
    #[arg(long)]
    quality: Option<i64>,
    /// Keep the optical centre in the middle of a rescaled output.
    #[arg(long)]
    recenter: bool,
    input: PathBuf,
    /// Output path; the extension selects the format.
    output: PathBuf,
}

fn init_logging(verbose: u8) {
    #[cfg(feature = "tracing")]
    fisheye_calib::core::init_tracing(false, fisheye_calib::core::level_from_verbosity(verbose));
    #[cfg(not(feature = "tracing"))]
    let _ = fisheye_calib::core::init_from_verbosity(verbose);
}

fn run_calibrate(args: &CalibrateArgs) -> Result<(), Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => CalibrateConfig::load_json(path)?,
        None => CalibrateConfig::default(),
    };
    let pattern = CalibrateConfig::for_pattern(args.cols, args.rows)?.pattern;
    config.pattern.rows = pattern.rows;
    config.pattern.cols = pattern.cols;

    let images = args
        .images
        .iter()
        .map(fs::read)
        .collect::<Result<Vec<_>, _>>()?;
    let (calibration, report) = calibrate_with_config(&images, &config)?;
    log::info!(
        "used {} of {} images, rms {:.4} px",
        report.used.len(),
        images.len(),
        report.rms
    );
    for (index, reason) in &report.skipped {
        log::warn!("{}: {reason:?}", args.images[*index].display());
    }

    match &args.output {
        Some(path) => calibration.write_json(path)?,
        None => println!("{}", serde_json::to_string_pretty(&calibration)?),
    }
    if let Some(path) = &args.report {
        report.write_json(path)?;
    }
    Ok(())
}

fn run_undistort(args: &UndistortArgs) -> Result<(), Box<dyn Error>> {
    let calibration = Calibration::load_json(&args.calibration)?;
    let format = OutputFormat::from_path(&args.output)?;
    let mut options = UndistortOptions::from_parts(
        Some(format.extension()),
        args.quality,
        Some(args.scale),
    )?;
    options.recenter = args.recenter;

    let bytes = fs::read(&args.input)?;
    let out = undistort(&bytes, &calibration, &options)?;
    fs::write(&args.output, out)?;
    log::info!("wrote {}", args.output.display());
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let result = match &cli.command {
        Command::Calibrate(args) => run_calibrate(args),
        Command::Undistort(args) => run_undistort(args),
    };
    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
