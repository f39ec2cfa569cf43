//! Command-line front end for pvdaq.
//!
//! ```bash
//! pvdaq list
//! pvdaq info -d /dev/ttyACM0
//! pvdaq scan -d /dev/ttyACM0 --start 0 --stop 3.3 -r 5 -o cell.csv
//! pvdaq scan --simulate --model diode
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pvdaq::calibration::{Calibration, CURRENT_CHANNEL, VOLTAGE_CHANNEL};
use pvdaq::config::{ModelKind, Settings};
use pvdaq::data::CsvWriter;
use pvdaq::instrument::mock::MockInstrument;
use pvdaq::instrument::Instrument;
use pvdaq::logging;
use pvdaq::sweep::{model_for, InstrumentFactory, SweepRunner, SweepState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "pvdaq", version, about = "Current-voltage sweeps of solar cells and LEDs")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports the board may be attached to
    List,
    /// Print the board's identification string
    Info {
        /// Serial port of the board
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Sweep the output and record the I-V curve
    Scan(ScanArgs),
}

#[derive(clap::Args, Debug)]
struct ScanArgs {
    /// Serial port of the board
    #[arg(short, long)]
    device: Option<String>,
    /// First output voltage (V)
    #[arg(short, long)]
    start: Option<f64>,
    /// Last output voltage (V, exclusive)
    #[arg(short = 'e', long)]
    stop: Option<f64>,
    /// Readings per channel at every level
    #[arg(short, long)]
    rep_num: Option<usize>,
    /// Front end wired to the board
    #[arg(short, long, value_enum)]
    model: Option<ModelArg>,
    /// Write the results to this CSV file
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Use a simulated cell instead of hardware
    #[arg(long)]
    simulate: bool,
    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModelArg {
    Photovoltaic,
    Diode,
}

impl From<ModelArg> for ModelKind {
    fn from(arg: ModelArg) -> Self {
        match arg {
            ModelArg::Photovoltaic => ModelKind::Photovoltaic,
            ModelArg::Diode => ModelKind::Diode,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_ref()).context("Failed to load configuration")?;
    logging::init(&settings.application.log_level);

    match cli.command {
        Command::List => list_ports(),
        Command::Info { device } => {
            if let Some(device) = device {
                settings.device.port = device;
            }
            let mut instrument = open_device(&settings)?;
            let idn = instrument.identify().await?;
            instrument.close().await?;
            println!("{}", idn);
            Ok(())
        }
        Command::Scan(args) => scan(settings, args).await,
    }
}

#[cfg(feature = "instrument_serial")]
fn list_ports() -> Result<()> {
    let ports = pvdaq::adapters::list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}

#[cfg(not(feature = "instrument_serial"))]
fn list_ports() -> Result<()> {
    Err(pvdaq::DaqError::FeatureNotEnabled("instrument_serial".to_string()).into())
}

#[cfg(feature = "instrument_serial")]
fn open_device(settings: &Settings) -> pvdaq::AppResult<Box<dyn Instrument>> {
    let device = pvdaq::instrument::arduino::ArduinoDevice::open(&settings.device, settings.calibration)?;
    Ok(Box::new(device))
}

#[cfg(not(feature = "instrument_serial"))]
fn open_device(_settings: &Settings) -> pvdaq::AppResult<Box<dyn Instrument>> {
    Err(pvdaq::DaqError::FeatureNotEnabled("instrument_serial".to_string()))
}

/// Crude cell: voltage collapses and current saturates as the load opens up.
fn simulated_cell(cal: Calibration) -> MockInstrument {
    let max = f64::from(cal.max_level);
    MockInstrument::new()
        .with_response(VOLTAGE_CHANNEL, move |level| {
            let x = f64::from(level) / max;
            0.6 / 3.0 * (1.0 - x.powi(4))
        })
        .with_response(CURRENT_CHANNEL, move |level| {
            let x = f64::from(level) / max;
            0.05 * 4.7 * x.sqrt()
        })
        .with_read_delay(Duration::from_millis(1))
}

async fn scan(mut settings: Settings, args: ScanArgs) -> Result<()> {
    if let Some(device) = args.device {
        settings.device.port = device;
    }
    let cal = settings.calibration;
    let start = args
        .start
        .map(|v| cal.level_for_voltage(v))
        .unwrap_or(settings.sweep.start);
    let stop = args
        .stop
        .map(|v| cal.level_for_voltage(v))
        .unwrap_or(settings.sweep.stop);
    let rep_num = args.rep_num.unwrap_or(settings.sweep.rep_num);
    let kind = args.model.map(ModelKind::from).unwrap_or(settings.sweep.model);

    let factory: InstrumentFactory = if args.simulate {
        Arc::new(move || Ok(Box::new(simulated_cell(cal)) as Box<dyn Instrument>))
    } else {
        let device_settings = settings.clone();
        Arc::new(move || open_device(&device_settings))
    };

    let runner = SweepRunner::new(factory, Arc::from(model_for(kind, cal)), cal.max_level);
    runner.start(start, stop, rep_num)?;

    let mut shown = 0;
    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    println!("{:>6} {:>10} {:>10} {:>10} {:>10} {:>10}", "level", "U (V)", "dU", "I (A)", "dI", "P");
    let mut interrupted = false;
    loop {
        tokio::select! {
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                eprintln!("Cancelling after the current level...");
                runner.request_cancel();
            }
            _ = ticker.tick() => {}
        }

        let series = runner.series();
        for record in series.since(shown) {
            println!(
                "{:>6} {:>10.4} {:>10.4} {:>10.5} {:>10.5} {:>10.5}",
                record.level,
                record.voltage_pv,
                record.voltage_err,
                record.current_pv,
                record.current_err,
                record.power
            );
            shown += 1;
        }
        if runner.state().is_terminal() && shown == series.len() {
            break;
        }
    }

    let state = runner.wait().await?;
    let series = runner.series();
    if args.json {
        let summary = serde_json::json!({
            "state": state.to_string(),
            "levels": series.len(),
            "fill_factor": series.fill_factor(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        match series.fill_factor() {
            Some(ff) => println!("Fill factor: {:.4}", ff.value),
            None if kind == ModelKind::Photovoltaic => {
                println!("Fill factor: undefined ({} level(s))", series.len())
            }
            None => {}
        }
    }

    if let Some(path) = args.output {
        let rows = CsvWriter::new().write_file(&path, &series)?;
        println!("Saved {} row(s) to {}", rows, path.display());
    }

    match state {
        SweepState::Failed(reason) => anyhow::bail!("Sweep failed: {}", reason),
        _ => Ok(()),
    }
}
