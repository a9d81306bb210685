use std::{
    error::Error,
    fs,
    path::{Path, PathBuf},
};

use clap::{Args, Parser, Subcommand};
use htt_core::{LossField, Profile, Real, Vec2};
use htt_pipeline::{EngineConfig, ModelType, OptimizationEngine, ProcessType};
use log::info;
use serde::Serialize;

/// Bevel lens fitting and Scheimpflug calibration.
#[derive(Debug, Parser)]
#[command(author, version, about = "Hot-tip bevel fitting and tilted-lens calibration")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fit a bevel model to a detected profile.
    Fit(FitArgs),
    /// Calibrate the transform from a reference grid.
    CalibrateGrid(GridArgs),
    /// Calibrate the transform from one jig frame.
    CalibrateFrame(FrameArgs),
    /// Map a point between the object plane (mm) and the image (px).
    Project(ProjectArgs),
}

#[derive(Debug, Args)]
struct FitArgs {
    /// JSON profile with `x`/`y` pixel vectors.
    #[arg(long)]
    profile: PathBuf,
    /// Model name: mini-bevel, t-bevel, custom-bevel or mini-bevel-ext.
    #[arg(long, default_value = "mini-bevel")]
    model: ModelType,
    /// Stylus angle R (degrees).
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    r: Real,
    /// Stylus angle H (degrees).
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    h: Real,
    /// Optional JSON EngineConfig. Defaults are used if omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Process the fit runs for.
    #[arg(long, default_value = "lens-fitting", value_parser = parse_process)]
    process: ProcessType,
    #[arg(long, default_value_t = 3)]
    max_retries: usize,
    /// Write the loss field as an 8-bit PNG.
    #[arg(long)]
    loss_field_png: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct GridArgs {
    /// JSON array of `[x, y]` grid points in pixels.
    #[arg(long)]
    points: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print the updated config after an accepted calibration.
    #[arg(long)]
    save: bool,
}

#[derive(Debug, Args)]
struct FrameArgs {
    #[arg(long)]
    profile: PathBuf,
    /// JSON array of the five jig vertices `[x, y]` in pixels.
    #[arg(long)]
    points: PathBuf,
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    r: Real,
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    h: Real,
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ProjectArgs {
    #[arg(long, allow_negative_numbers = true)]
    x: Real,
    #[arg(long, allow_negative_numbers = true)]
    y: Real,
    /// Map image pixels back to the object plane.
    #[arg(long)]
    inverse: bool,
    #[arg(long)]
    config: Option<PathBuf>,
}

fn parse_process(s: &str) -> Result<ProcessType, String> {
    serde_json::from_value(serde_json::Value::String(s.to_owned()))
        .map_err(|_| format!("unknown process type `{s}`"))
}

fn load_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, Box<dyn Error>> {
    let data = fs::read_to_string(path)?;
    let value = serde_json::from_str(&data)?;
    Ok(value)
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, Box<dyn Error>> {
    match path {
        Some(p) => Ok(EngineConfig::from_json_file(p)?),
        None => Ok(EngineConfig::default()),
    }
}

fn write_loss_field_png(field: &LossField, path: &Path) -> Result<(), Box<dyn Error>> {
    let img = image::GrayImage::from_raw(
        field.width() as u32,
        field.height() as u32,
        field.to_gray8(),
    )
    .ok_or("loss field does not match its dimensions")?;
    img.save(path)?;
    info!("loss field written to {}", path.display());
    Ok(())
}

fn run_fit(args: &FitArgs) -> Result<String, Box<dyn Error>> {
    let profile: Profile = load_json_file(&args.profile)?;
    let engine = OptimizationEngine::new(load_config(args.config.as_deref())?);

    let Some(png) = args.loss_field_png.as_deref() else {
        let out = engine.fit_profile(&profile, args.model, args.process, args.r, args.h, args.max_retries);
        return Ok(serde_json::to_string_pretty(&out)?);
    };

    let st = engine.transform_at(args.r, args.h);
    match engine.init_model(&st, &profile, args.model, args.process) {
        Some(mut init) => {
            write_loss_field_png(&init.loss_field, png)?;
            let out = engine.optimize_model(&mut init, args.max_retries);
            Ok(serde_json::to_string_pretty(&out)?)
        }
        // Rerun through the one-call path for the failure bundle.
        None => {
            let out = engine.fit_profile(&profile, args.model, args.process, args.r, args.h, args.max_retries);
            Ok(serde_json::to_string_pretty(&out)?)
        }
    }
}

#[derive(Debug, Serialize)]
struct GridReport<'a> {
    #[serde(flatten)]
    output: &'a htt_pipeline::GridOutput,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<&'a EngineConfig>,
}

fn run_calibrate_grid(args: &GridArgs) -> Result<String, Box<dyn Error>> {
    let points: Vec<Vec2> = load_json_file(&args.points)?;
    let mut engine = OptimizationEngine::new(load_config(args.config.as_deref())?);
    let st = engine.transform().clone();
    let output = engine.calibrate_grid(&st, &points, args.save);
    let saved = args.save && output.rcode.is_success();
    let report = GridReport {
        output: &output,
        config: saved.then(|| engine.config()),
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

fn run_calibrate_frame(args: &FrameArgs) -> Result<String, Box<dyn Error>> {
    let profile: Profile = load_json_file(&args.profile)?;
    let points: Vec<Vec2> = load_json_file(&args.points)?;
    let mut engine = OptimizationEngine::new(load_config(args.config.as_deref())?);
    let st = engine.transform_at(args.r, args.h);
    let output = engine.calibrate_frame(&st, &profile, &points);
    Ok(serde_json::to_string_pretty(&output)?)
}

fn run_project(args: &ProjectArgs) -> Result<String, Box<dyn Error>> {
    let engine = OptimizationEngine::new(load_config(args.config.as_deref())?);
    let p = Vec2::new(args.x, args.y);
    let q = if args.inverse {
        engine.transform().image_to_object(&p)
    } else {
        engine.transform().object_to_image(&p, false)
    };
    Ok(serde_json::to_string(&[q.x, q.y])?)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let json = match &cli.command {
        Command::Fit(args) => run_fit(args)?,
        Command::CalibrateGrid(args) => run_calibrate_grid(args)?,
        Command::CalibrateFrame(args) => run_calibrate_frame(args)?,
        Command::Project(args) => run_project(args)?,
    };
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use htt_core::{
        synthetic::{calibration_grid_points, polyline_profile, project_points},
        ScheimpflugTransform,
    };
    use htt_pipeline::{FitOutput, GridOutput, ReturnCode};
    use tempfile::{tempdir, NamedTempFile};

    fn write_json<T: Serialize>(value: &T, path: &Path) {
        serde_json::to_writer_pretty(fs::File::create(path).unwrap(), value).unwrap();
    }

    fn chevron() -> Profile {
        let v = [
            Vec2::new(500.0, 100.0),
            Vec2::new(480.0, 200.0),
            Vec2::new(330.0, 300.0),
            Vec2::new(400.0, 500.0),
            Vec2::new(370.0, 600.0),
        ];
        polyline_profile(&v, 0).unwrap()
    }

    #[test]
    fn process_names_parse() {
        assert_eq!(parse_process("validation").unwrap(), ProcessType::Validation);
        assert_eq!(parse_process("lens-fitting").unwrap(), ProcessType::LensFitting);
        assert!(parse_process("fitting").is_err());
    }

    #[test]
    fn cli_parses_fit_arguments() {
        let cli = Cli::try_parse_from([
            "htt", "fit", "--profile", "p.json", "--model", "t-bevel", "--r", "-10", "--process",
            "validation",
        ])
        .unwrap();
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.model, ModelType::TBevel);
        assert_eq!(args.r, -10.0);
        assert_eq!(args.process, ProcessType::Validation);
        assert_eq!(args.max_retries, 3);
    }

    #[test]
    fn fit_writes_report_and_loss_field() {
        let profile_file = NamedTempFile::new().unwrap();
        let config_file = NamedTempFile::new().unwrap();
        write_json(&chevron(), profile_file.path());
        let mut cfg = EngineConfig::default();
        let pso = cfg.pso.get_mut(ModelType::MiniBevel);
        pso.n_iterations = 10;
        pso.n_particles = 10;
        write_json(&cfg, config_file.path());

        let dir = tempdir().unwrap();
        let png = dir.path().join("loss.png");
        let args = FitArgs {
            profile: profile_file.path().to_path_buf(),
            model: ModelType::MiniBevel,
            r: 0.0,
            h: 0.0,
            config: Some(config_file.path().to_path_buf()),
            process: ProcessType::LensFitting,
            max_retries: 1,
            loss_field_png: Some(png.clone()),
        };
        let json = run_fit(&args).expect("fit helper should succeed");
        let out: FitOutput = serde_json::from_str(&json).unwrap();
        assert_eq!(out.model_type, ModelType::MiniBevel);
        assert_eq!(
            png.exists(),
            out.rcode != ReturnCode::LensFittingFailedModelNotInitialized
        );
    }

    #[test]
    fn short_grid_reports_failure_without_config() {
        let st = ScheimpflugTransform::default();
        let points = project_points(&st, &calibration_grid_points(3.0, 7), false);
        let points_file = NamedTempFile::new().unwrap();
        write_json(&points[..4].to_vec(), points_file.path());

        let args = GridArgs {
            points: points_file.path().to_path_buf(),
            config: None,
            save: true,
        };
        let json = run_calibrate_grid(&args).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value.get("config").is_none());
        let out: GridOutput = serde_json::from_value(value).unwrap();
        assert_eq!(out.rcode, ReturnCode::CalibrationFailedGrid);
    }

    #[test]
    fn project_round_trips() {
        let fwd = run_project(&ProjectArgs {
            x: 1.0,
            y: -2.0,
            inverse: false,
            config: None,
        })
        .unwrap();
        let img: [Real; 2] = serde_json::from_str(&fwd).unwrap();

        let back = run_project(&ProjectArgs {
            x: img[0],
            y: img[1],
            inverse: true,
            config: None,
        })
        .unwrap();
        let obj: [Real; 2] = serde_json::from_str(&back).unwrap();
        assert!((obj[0] - 1.0).abs() < 1e-3 && (obj[1] + 2.0).abs() < 1e-3, "{obj:?}");
    }

    #[test]
    fn missing_profile_is_an_error() {
        let args = FitArgs {
            profile: PathBuf::from("/nonexistent/profile.json"),
            model: ModelType::MiniBevel,
            r: 0.0,
            h: 0.0,
            config: None,
            process: ProcessType::LensFitting,
            max_retries: 1,
            loss_field_png: None,
        };
        assert!(run_fit(&args).is_err());
    }
}
