//! robot-calib CLI: detection checks, simulated runs and homography lookups.

use clap::{Parser, Subcommand};
use nalgebra::Point2;
use robot_calib::detect::{load_gray_image, ImagePatternDetector};
use robot_calib::homography::load_homography;
use robot_calib::sim::SimRig;
use robot_calib::{
    CalibrationConfig, CalibrationStateMachine, ChessboardSpec, PatternDetector, TimingConfig,
};
use serde_json::json;
use std::error::Error;
use std::path::PathBuf;

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Debug, Parser)]
#[command(author, version, about = "Camera-to-robot calibration tools")]
struct Cli {
    /// Log at debug level.
    #[arg(long, global = true)]
    verbose: bool,

    /// Emit logs as JSON (only with the `tracing` feature).
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Detect a chessboard and print its scale and reference corners.
    Chessboard {
        #[arg(long)]
        image: PathBuf,
        /// Inner corners per row.
        #[arg(long, default_value_t = 9)]
        cols: usize,
        /// Inner corners per column.
        #[arg(long, default_value_t = 6)]
        rows: usize,
        #[arg(long, default_value_t = 25.0)]
        square_mm: f64,
    },

    /// Detect DICT_4X4_50 markers and print their corners.
    Markers {
        #[arg(long)]
        image: PathBuf,
    },

    /// Run a full calibration against the simulated rig.
    Simulate {
        /// Optional JSON CalibrationConfig. Settle delays are always zeroed.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Directory for the matrix and report files.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Fraction of each commanded move the simulated robot travels.
        #[arg(long, default_value_t = 1.0)]
        gain: f64,
    },

    /// Map a pixel through a persisted homography.
    CheckHomography {
        #[arg(long)]
        matrix: PathBuf,
        #[arg(long)]
        x: f64,
        #[arg(long)]
        y: f64,
    },
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let value = match cli.command {
        Commands::Chessboard {
            image,
            cols,
            rows,
            square_mm,
        } => run_chessboard(image, cols, rows, square_mm)?,
        Commands::Markers { image } => run_markers(image)?,
        Commands::Simulate { config, out, gain } => run_simulate(config, out, gain)?,
        Commands::CheckHomography { matrix, x, y } => run_check_homography(matrix, x, y)?,
    };
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[cfg(feature = "tracing")]
fn init_logging(verbose: bool, json: bool) {
    let directive = if verbose { "debug" } else { "info" };
    robot_calib::core::init_tracing(json, directive);
    let _ = tracing_log::LogTracer::init();
}

#[cfg(not(feature = "tracing"))]
fn init_logging(verbose: bool, _json: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let _ = robot_calib::core::init_from_env(level);
}

fn run_chessboard(
    image: PathBuf,
    cols: usize,
    rows: usize,
    square_mm: f64,
) -> CliResult<serde_json::Value> {
    let img = load_gray_image(&image)?;
    let spec = ChessboardSpec {
        cols,
        rows,
        square_size_mm: square_mm,
    };
    let det = ImagePatternDetector::default().find_chessboard(&img, &spec);
    Ok(json!({
        "found": det.found(),
        "message": det.message,
        "ppm": det.ppm(),
        "bottom_left": det.bottom_left_px(),
        "center": det.center_px(),
        "corners": det.corners,
    }))
}

fn run_markers(image: PathBuf) -> CliResult<serde_json::Value> {
    let img = load_gray_image(&image)?;
    let markers = ImagePatternDetector::default().detect_markers(&img);
    Ok(serde_json::to_value(markers)?)
}

fn run_simulate(
    config: Option<PathBuf>,
    out: Option<PathBuf>,
    gain: f64,
) -> CliResult<serde_json::Value> {
    let mut config = match config {
        Some(path) => CalibrationConfig::load_json(path)?,
        None => CalibrationConfig {
            required_ids: vec![0, 1, 2, 3],
            ..CalibrationConfig::default()
        },
    };
    config.timing = TimingConfig::instant();
    if let Some(dir) = out {
        std::fs::create_dir_all(&dir)?;
        config.output.matrix_path = dir.join("camera_to_robot_matrix.json");
        config.output.report_path = Some(dir.join("calibration_report.json"));
    }

    let rig = SimRig::default().with_actuation_gain(gain);
    let mut machine =
        CalibrationStateMachine::new(config, rig.camera(), rig.robot(), rig.detector());
    let outcome = machine.run()?;
    Ok(json!({
        "persisted": outcome.persisted,
        "matrix_path": machine.config().output.matrix_path,
        "mean_error_mm": outcome.homography.mean_error_mm,
        "homography": outcome.homography.homography,
        "robot_positions": outcome.robot_positions,
        "moves": rig.moves().len(),
        "timing": outcome.timing,
    }))
}

fn run_check_homography(matrix: PathBuf, x: f64, y: f64) -> CliResult<serde_json::Value> {
    let h = load_homography(matrix)?;
    let p = h.apply(Point2::new(x, y));
    Ok(json!({ "pixel": [x, y], "robot": [p.x, p.y] }))
}
