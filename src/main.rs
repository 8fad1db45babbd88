//! Emfsense - command-line companion for EMF ground-probing instruments
//!
//! Lists ports, monitors a live device (or the built-in simulator), parses
//! legacy survey files and evaluates the depth model.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use emfsense::codec::{self, ParsedFile};
use emfsense::signal::DepthModel;
use emfsense::{
    CalibratedReading, CalibrationKind, FileFormat, Instrument, InstrumentConfig, ReadingStats,
    SignalEngine,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "emfsense")]
#[command(author, version, about = "EMF ground-probing instrument companion")]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (default: <data_dir>/emfsense/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List USB serial ports and which would be picked
    Ports,

    /// Stream calibrated readings until Ctrl+C
    Monitor {
        /// Use the built-in simulated instrument
        #[arg(long)]
        simulate: bool,

        /// Carrier frequency index (0-6)
        #[arg(long, short = 'f')]
        frequency_index: Option<usize>,

        /// XY spatial calibration file (.cal)
        #[arg(long)]
        cal_xy: Option<PathBuf>,

        /// XZ spatial calibration file (.cal)
        #[arg(long)]
        cal_xz: Option<PathBuf>,
    },

    /// Parse an EGD, ESD, FADS or CAL file
    Parse {
        file: PathBuf,

        /// Override the format detected from the extension
        #[arg(long)]
        format: Option<String>,
    },

    /// Evaluate the depth model for one magnitude
    Depth { magnitude: f64, frequency: f64 },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("emfsense=info".parse()?)
                .add_directive("emfsense_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(InstrumentConfig::default_path);
    let config = InstrumentConfig::load(&config_path);

    match cli.command {
        Commands::Ports => list_ports(config),
        Commands::Monitor {
            simulate,
            frequency_index,
            cal_xy,
            cal_xz,
        } => {
            let index = frequency_index.unwrap_or(config.frequency_index);
            let mut instrument = Instrument::new(config);
            if let Some(path) = cal_xy {
                instrument.load_calibration(CalibrationKind::Xy, &path)?;
            }
            if let Some(path) = cal_xz {
                instrument.load_calibration(CalibrationKind::Xz, &path)?;
            }
            monitor(&mut instrument, simulate, index)
        }
        Commands::Parse { file, format } => {
            let format = match format {
                Some(name) => Some(
                    FileFormat::from_name(&name)
                        .with_context(|| format!("unknown format `{name}`"))?,
                ),
                None => None,
            };
            parse(&file, format, &SignalEngine::new(&config.signal))
        }
        Commands::Depth {
            magnitude,
            frequency,
        } => {
            let model: DepthModel = config.signal.depth_model();
            match model.lookup_constant(frequency) {
                Some(constant) => println!("Calibration constant: {constant}"),
                None => println!("Frequency outside table, default constant used"),
            }
            println!("Depth: {:.3} m", model.depth(magnitude, frequency));
            Ok(())
        }
    }
}

fn list_ports(config: InstrumentConfig) -> Result<()> {
    println!("Scanning for USB serial ports...");
    println!();

    let transport = emfsense::Transport::new(config.transport);
    let candidates = transport.list_ports()?;
    if candidates.is_empty() {
        println!("No USB serial ports found.");
        return Ok(());
    }

    println!("Found {} port(s):", candidates.len());
    println!();
    for (i, candidate) in candidates.iter().enumerate() {
        let device = &candidate.device;
        let marker = if candidate.compatible { " [COMPATIBLE]" } else { "" };
        println!("  {}. {}{}", i + 1, device.port_name, marker);
        println!(
            "     USB {:04x}:{:04x}  chip: {}",
            device.vendor_id,
            device.product_id,
            candidate
                .chip
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );
        if let Some(product) = &device.product {
            println!("     Product: {product}");
        }
        println!();
    }
    Ok(())
}

fn monitor(instrument: &mut Instrument, simulate: bool, frequency_index: usize) -> Result<()> {
    // Keeps the simulator's control handle alive for the whole session
    let _simulator = if simulate {
        println!("Using simulated instrument");
        Some(instrument.attach_simulator()?)
    } else {
        let device = instrument.connect()?;
        println!("Connected: {}", device.port_name);
        None
    };

    match instrument.device_status() {
        Ok(status) => println!(
            "Firmware {}  serial {}  battery {}%  {:.1} °C",
            status.firmware_version(),
            status.serial_number,
            status.battery_percent,
            status.temperature_c
        ),
        Err(e) => error!("Status query failed: {}", e),
    }

    let mut readings = instrument.sample_stream();
    let frequency_hz = instrument.start_measurement(frequency_index)?;
    info!(frequency_hz, "Monitoring");

    println!("Monitoring at {frequency_hz} Hz. Press Ctrl+C to stop.");
    println!();
    println!("Status:");
    println!("────────────────────────────────────────");

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .ok();

    let mut stats = ReadingStats::new();
    while running.load(Ordering::SeqCst) {
        loop {
            match readings.try_recv() {
                Ok(reading) => {
                    stats.record(&reading);
                    println!("{}", status_line(&reading));
                }
                Err(TryRecvError::Lagged(skipped)) => stats.record_dropped(skipped),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        if !instrument.is_connected() {
            stats.record_link_loss();
            println!("Link lost.");
            break;
        }

        std::thread::sleep(Duration::from_millis(100));
    }

    println!();
    println!("Stopping...");
    if let Err(e) = instrument.stop_measurement() {
        error!("Failed to stop cleanly: {}", e);
    }
    instrument.disconnect();

    let summary = stats.stats();
    println!("────────────────────────────────────────");
    println!("Readings:      {}", summary.reading_count);
    if summary.reading_count > 0 {
        println!(
            "Depth:         min {:.2} m | max {:.2} m | avg {:.2} m",
            summary.min_depth, summary.max_depth, summary.avg_depth
        );
        println!("Avg quality:   {:.2}", summary.avg_quality);
        if let Some(material) = summary.dominant_material() {
            println!("Material:      {:?}", material);
        }
    }
    println!("Dropped:       {}", summary.dropped_samples + instrument.dropped_samples());
    println!("Link losses:   {}", summary.link_losses);
    println!("Done.");
    Ok(())
}

fn status_line(reading: &CalibratedReading) -> String {
    format!(
        "{} | {:>7.0} Hz | Signal: {:>8.2} | Depth: {:>6.2} m | Quality: {:>4.2} | {:?}",
        reading.reading.timestamp().format("%H:%M:%S%.3f"),
        reading.reading.frequency_hz(),
        reading.corrected_signal_strength,
        reading.corrected_depth,
        reading.reading.quality_score,
        reading.reading.material_class
    )
}

fn parse(path: &Path, format: Option<FileFormat>, engine: &SignalEngine) -> Result<()> {
    match codec::parse_file(path, format)? {
        ParsedFile::Survey(survey) => {
            println!(
                "{} survey: {} data line(s), {} skipped, {} profile(s)",
                survey.format,
                survey.lines.len(),
                survey.skipped_lines,
                survey.profile_count()
            );
            for sample in survey.samples() {
                let reading = engine.process_single(sample);
                let position = reading
                    .sample
                    .location
                    .map(|p| format!("{:.5},{:.5}", p.latitude, p.longitude))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{} | {:>7.0} Hz | Magnitude: {:>8.2} | Depth: {:>6.2} m | {}",
                    reading.timestamp().format("%d.%m.%Y %H:%M:%S"),
                    reading.frequency_hz(),
                    reading.magnitude,
                    reading.depth_meters,
                    position
                );
            }
        }
        ParsedFile::Fads(settings) => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        ParsedFile::Cal(cal) => {
            println!(
                "{}: {} point(s), {} skipped",
                cal.plane,
                cal.points.len(),
                cal.skipped_lines
            );
            if cal.points.is_empty() {
                bail!("calibration file has no points");
            }
            for p in &cal.points {
                println!("  {:.3} {:.3} {:.3}", p.x, p.y, p.z);
            }
        }
    }
    Ok(())
}
