//! Linear stage controller CLI
//!
//! Calibrates the stage against its stopper, then oscillates it sinusoidally
//! around the rail center, or steps it by a quarter wavelength.
//!
//! # Usage
//!
//! ```bash
//! # port, frequency (Hz), amplitude (mm), optional duration (s)
//! linear_stage 3 0.5 10 60
//!
//! # No arguments: read the same fields from prms.json
//! linear_stage
//!
//! # Quarter-wave step cycle, 100 repetitions around 50 mm
//! linear_stage --steps 100 3 0.5 10
//!
//! # Bench run without hardware
//! linear_stage --simulate 0 1 5 10
//! ```
//!
//! Ctrl-C stops an unbounded run and leaves the axis halted.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use linear_stage::config::{MotorConfig, RunParameters, StageSettings};
use linear_stage::hardware::{MotorDriver, SimulatedHoming, SimulatedMotorDriver};
use linear_stage::{
    logging, quarter_wave_cycle, CalibrationController, CalibrationSettings, MotionProfileGenerator,
    MotorRegistry, ProfileSettings, StopFlag,
};

const USAGE: &str = "Usage: linear_stage [port] [frequency] [amplitude] [duration]\n\
    \n\
    port       serial port number or name (e.g. 3, COM3, /dev/ttyUSB0)\n\
    frequency  oscillation frequency in Hz\n\
    amplitude  oscillation amplitude in mm\n\
    duration   run time in seconds; omit or pass a negative value to run until Ctrl-C\n\
    \n\
    With no arguments the parameters are read from prms.json.";

/// Linear stage controller
#[derive(Parser, Debug)]
#[command(name = "linear_stage")]
#[command(version)]
#[command(about = "Calibrate a linear stage and drive it sinusoidally", long_about = None)]
struct Args {
    /// port frequency amplitude [duration]
    #[arg(value_name = "PARAMS", allow_negative_numbers = true)]
    params: Vec<String>,

    /// Parameter file used when no positional arguments are given
    #[arg(long = "params", value_name = "FILE", default_value = "prms.json")]
    params_file: PathBuf,

    /// Stage settings file
    #[arg(long, value_name = "FILE", default_value = "config/stage.toml")]
    config: PathBuf,

    /// Motor descriptor file (defaults to the platform-specific file)
    #[arg(long, value_name = "FILE")]
    motors: Option<PathBuf>,

    /// Motor type to drive (defaults to the first declared type)
    #[arg(long = "type", value_name = "TYPE")]
    motor_type: Option<String>,

    /// Motor index within the type
    #[arg(long, default_value_t = 0)]
    index: usize,

    /// Run the quarter-wave step cycle N times instead of the sinusoid
    #[arg(long, value_name = "N")]
    steps: Option<usize>,

    /// Base position of the quarter-wave step cycle, mm
    #[arg(long, default_value_t = 50.0)]
    base: f64,

    /// Drive a simulated axis instead of hardware
    #[arg(long)]
    simulate: bool,
}

fn usage_and_exit() -> ! {
    eprintln!("{}", USAGE);
    process::exit(1);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if matches!(args.params.first().map(String::as_str), Some("?" | "help")) {
        usage_and_exit();
    }
    if !args.params.is_empty() && !(3..=4).contains(&args.params.len()) {
        eprintln!(
            "Expecting 3-4 arguments but got {} instead",
            args.params.len()
        );
        usage_and_exit();
    }

    let settings = StageSettings::load_from(&args.config)
        .with_context(|| format!("Failed to load settings from {}", args.config.display()))?;
    logging::init_from_settings(&settings).context("Failed to initialize logging")?;

    let params = if args.params.is_empty() {
        RunParameters::load_from(&args.params_file).with_context(|| {
            format!(
                "Failed to read run parameters from {}",
                args.params_file.display()
            )
        })?
    } else {
        RunParameters::from_args(&args.params).context("Invalid run parameters")?
    };
    info!(?params, "run parameters");

    let driver = if args.simulate {
        simulated_driver(&settings).await?
    } else {
        hardware_driver(&args, &settings, &params).await?
    };

    match args.steps {
        Some(reps) => {
            quarter_wave_cycle(driver.as_ref(), args.base, reps)
                .await
                .context("Quarter-wave cycle failed")?;
            info!(reps, "quarter-wave cycle complete");
        }
        None => run_sinusoid(driver, &settings, &params).await?,
    }

    Ok(())
}

/// Simulated axis in the powered-off state, calibrated like real hardware.
async fn simulated_driver(settings: &StageSettings) -> anyhow::Result<Arc<dyn MotorDriver>> {
    let driver = SimulatedMotorDriver::new()
        .with_label("SIMULATED[0]")
        .with_axis_length(settings.axis.length_mm)
        .at_position(settings.axis.length_mm)
        .with_homing(SimulatedHoming::Clash { register_mm: 0.0 });

    let mut controller = CalibrationController::new(CalibrationSettings::from(settings));
    let record = controller
        .calibrate(&driver)
        .await
        .context("Calibration of simulated axis failed")?;
    info!(?record, "simulated axis calibrated");

    Ok(Arc::new(driver))
}

async fn hardware_driver(
    args: &Args,
    settings: &StageSettings,
    params: &RunParameters,
) -> anyhow::Result<Arc<dyn MotorDriver>> {
    let path = args
        .motors
        .clone()
        .or_else(|| settings.application.motor_config.clone())
        .unwrap_or_else(MotorConfig::default_path);
    let config = MotorConfig::load_from(&path)
        .with_context(|| format!("Failed to load motor configuration from {}", path.display()))?;

    let port = params.port.port_name();
    let registry = MotorRegistry::connect(&config, settings, Some(&port))
        .await
        .context("Failed to connect motors")?;
    info!(?registry, "motors connected");

    for (label, record) in registry
        .calibrate_all(&CalibrationSettings::from(settings))
        .await
        .context("Calibration failed")?
    {
        info!(motor = %label, ?record, "calibrated");
    }

    Ok(registry.driver(args.motor_type.as_deref(), args.index)?)
}

async fn run_sinusoid(
    driver: Arc<dyn MotorDriver>,
    settings: &StageSettings,
    params: &RunParameters,
) -> anyhow::Result<()> {
    let stop = StopFlag::new();
    let ctrl_c_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, stopping");
            ctrl_c_stop.raise();
        }
    });

    let generator = MotionProfileGenerator::new(driver, ProfileSettings::from(settings));
    let report = generator
        .run(params.frequency, params.amplitude, params.duration(), &stop)
        .await
        .context("Sinusoid run failed")?;

    println!(
        "center {:.3} mm, {} samples, {} overruns, drift {:+.4} mm",
        report.center_mm,
        report.samples.len(),
        report.overruns,
        report.drift_mm
    );
    Ok(())
}
