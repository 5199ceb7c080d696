//! `camcal` command-line interface.

use camcal::core::{BoardGeometry, CalibrationArtifact, GrayImage, StoredCalibration};
use camcal::{imageio, CalibError, CalibrationConfig, CalibrationResponse, VerifyResponse};
use clap::{Args, Parser, Subcommand};
use log::{info, LevelFilter};
use std::fs;
use std::path::{Path, PathBuf};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "camcal")]
#[command(about = "Planar chessboard camera calibration")]
#[command(version)]
struct Cli {
    /// More log output (-v info, -vv debug).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON (only with the `tracing` feature).
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report which images contain the full board.
    Detect(DetectArgs),

    /// Calibrate from a set of board images and write the calibration file.
    Calibrate(CalibrateArgs),

    /// Remove lens distortion from an image using a calibration file.
    Undistort(UndistortArgs),

    /// Print the contents of a calibration file.
    Inspect {
        /// Calibration file (OpenCV YAML, or JSON artifact with `.json` extension).
        file: PathBuf,
    },
}

#[derive(Debug, Clone, Args)]
struct BoardArgs {
    /// Inner corners per row and column, e.g. `9x6`.
    #[arg(long, value_parser = parse_board)]
    board: Option<(u32, u32)>,

    /// Optional JSON config. Defaults are used if omitted.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct DetectArgs {
    #[command(flatten)]
    board: BoardArgs,

    /// Input images.
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CalibrateArgs {
    #[command(flatten)]
    board: BoardArgs,

    /// Side length of one square (millimetres).
    #[arg(long)]
    square_size: Option<f64>,

    /// Hold the k3 radial coefficient at zero.
    #[arg(long)]
    fix_k3: bool,

    /// Where to write the OpenCV YAML calibration file.
    #[arg(long, default_value = camcal::core::CALIBRATION_FILE_NAME)]
    output: PathBuf,

    /// Also write the full artifact (board and timestamp included) as JSON.
    #[arg(long)]
    artifact_json: Option<PathBuf>,

    /// Input images.
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct UndistortArgs {
    /// Calibration file (OpenCV YAML, or JSON artifact with `.json` extension).
    #[arg(short = 'c', long)]
    calibration: PathBuf,

    /// Input image.
    #[arg(short = 'i', long)]
    input: PathBuf,

    /// Output image (PNG).
    #[arg(short = 'o', long)]
    output: PathBuf,

    /// Optional JSON config. Defaults are used if omitted.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn parse_board(raw: &str) -> Result<(u32, u32), String> {
    let (w, h) = raw
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got `{raw}`"))?;
    let w = w
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("bad width `{w}`: {e}"))?;
    let h = h
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("bad height `{h}`: {e}"))?;
    Ok((w, h))
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> CliResult<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    camcal::init_logging(level, cli.log_json);

    match cli.command {
        Commands::Detect(args) => run_detect(&args),
        Commands::Calibrate(args) => run_calibrate(&args),
        Commands::Undistort(args) => run_undistort(&args),
        Commands::Inspect { file } => run_inspect(&file),
    }
}

fn load_config(path: Option<&Path>) -> Result<CalibrationConfig, CalibError> {
    match path {
        Some(path) => CalibrationConfig::load_json(path),
        None => Ok(CalibrationConfig::default()),
    }
}

/// Board from the command line, falling back to the config file.
fn resolve_board(
    args: &BoardArgs,
    square_size: Option<f64>,
    config: &CalibrationConfig,
) -> CliResult<BoardGeometry> {
    let from_config = config.board;
    let (columns, rows) = match (args.board, from_config) {
        (Some(dims), _) => dims,
        (None, Some(b)) => (b.columns, b.rows),
        (None, None) => {
            return Err("no board given: pass --board WxH or set `board` in --config".into())
        }
    };
    let square = square_size
        .or(from_config.map(|b| b.square_size))
        .unwrap_or(1.0);
    Ok(BoardGeometry::new(columns, rows, square)?)
}

fn load_images(paths: &[PathBuf]) -> CliResult<Vec<GrayImage>> {
    paths
        .iter()
        .map(|p| {
            info!("loading {}", p.display());
            imageio::load_gray(p)
                .map_err(|e| -> CliError { format!("{}: {e}", p.display()).into() })
        })
        .collect()
}

fn run_detect(args: &DetectArgs) -> CliResult<()> {
    let config = load_config(args.board.config.as_deref())?;
    let board = resolve_board(&args.board, None, &config)?;
    let images = load_images(&args.images)?;
    let views: Vec<_> = images.iter().map(GrayImage::view).collect();

    let valid = camcal::detect_corners(&views, board.columns, board.rows, &config)?;
    let response = VerifyResponse::from(valid);
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn run_calibrate(args: &CalibrateArgs) -> CliResult<()> {
    let config = load_config(args.board.config.as_deref())?;
    let board = resolve_board(&args.board, args.square_size, &config)?;
    let images = load_images(&args.images)?;
    let views: Vec<_> = images.iter().map(GrayImage::view).collect();

    let result = camcal::calibrate(&views, &board, args.fix_k3, &config)?;
    for (path, ok) in args.images.iter().zip(&result.valid) {
        if !ok {
            eprintln!("skipped {}: board not found", path.display());
        }
    }
    eprintln!(
        "rms {:.4} px, mean reprojection error {:.4} px over {} images",
        result.solution.rms,
        result.solution.mean_error,
        result.solution.views.len()
    );

    let file = camcal::calibration_file(&result.artifact);
    fs::write(&args.output, &file.bytes)?;
    info!("calibration written to {}", args.output.display());
    if let Some(path) = &args.artifact_json {
        fs::write(path, result.artifact.to_json()?)?;
        info!("artifact written to {}", path.display());
    }

    println!("{}", serde_json::to_string_pretty(&result.response())?);
    Ok(())
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn load_calibration(path: &Path) -> CliResult<StoredCalibration> {
    let bytes = fs::read(path)?;
    if is_json(path) {
        let artifact = CalibrationArtifact::from_json(std::str::from_utf8(&bytes)?)?;
        Ok(artifact.stored())
    } else {
        Ok(camcal::parse_calibration_file(&bytes)?)
    }
}

fn run_undistort(args: &UndistortArgs) -> CliResult<()> {
    let config = load_config(args.config.as_deref())?;
    let calibration = load_calibration(&args.calibration)?;
    let bytes = fs::read(&args.input)?;

    let png = imageio::undistort_encoded(
        &bytes,
        &calibration.intrinsics,
        &calibration.distortion,
        &config.undistort,
    )?;
    fs::write(&args.output, png)?;
    info!("undistorted image written to {}", args.output.display());
    Ok(())
}

fn run_inspect(path: &Path) -> CliResult<()> {
    let stored = load_calibration(path)?;
    let response = CalibrationResponse {
        intrinsics: stored.intrinsics.to_rows(),
        dist_coeffs: [stored.distortion.to_array()],
        rms: stored.rms,
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
