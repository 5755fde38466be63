mod calibration;
mod config;
mod database;
mod error;
mod hardware;
mod models;
mod pipeline;
mod pump;
mod sync;
mod utils;

use log::{error, info, warn};
use time::OffsetDateTime;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use calibration::store::{reset_range, EC_ADDR, EC_RANGE_LEN, EEPROM_SIZE, ERASED};
use calibration::{
    CalibrationCommand, CalibrationSession, CalibrationStore, EcCalibration, FileEeprom,
    PhCalibration,
};
use config::RigConfig;
use database::PostgresStore;
use error::RigError;
use hardware::simulated::{SimulatedAnalog, SimulatedOneWire, SimulatedPump};
use hardware::{AnalogInput, OneWireBus};
use models::CycleReport;
use pipeline::transfer::{EcCurve, PhCurve};
use pipeline::Pipeline;
use pump::run_pump_task;
use sync::run_sync_task;
use utils::format_datetime;

/// Water temperature reported by the simulated probe
const SIMULATED_WATER_C: f32 = 22.5;

type RigPipeline = Pipeline<SimulatedAnalog, SimulatedOneWire, PhCalibration, EcCalibration>;

fn build_pipeline(config: &RigConfig, ph: PhCalibration, ec: EcCalibration) -> RigPipeline {
    info!(
        "Calibration: neutral={:.2} mV, acid={:.2} mV, kLow={:.3}, kHigh={:.3}",
        ph.neutral_voltage_mv, ph.acid_voltage_mv, ec.k_value_low, ec.k_value_high
    );
    Pipeline::new(
        config.pipeline.clone(),
        SimulatedAnalog::new(),
        SimulatedOneWire::ds18b20(SIMULATED_WATER_C),
        ph,
        ec,
    )
}

/// Open the calibration store and load both probes' constants
fn open_calibration(
    config: &RigConfig,
) -> Result<(FileEeprom, PhCalibration, EcCalibration), RigError> {
    let mut eeprom = FileEeprom::new(&config.eeprom_path);
    eeprom.begin(EEPROM_SIZE)?;
    let ph = PhCalibration::load(&mut eeprom)?;
    let ec = EcCalibration::load(&mut eeprom)?;
    info!("Calibration store {} ready", config.eeprom_path.display());
    Ok((eeprom, ph, ec))
}

/// Calibration for the service, which keeps running without a usable store
///
/// Whatever could be read is kept; erased or unreadable slots use defaults.
fn service_calibration(config: &RigConfig) -> (PhCalibration, EcCalibration) {
    let mut eeprom = FileEeprom::new(&config.eeprom_path);
    let loaded = eeprom.begin(EEPROM_SIZE).and_then(|()| {
        let ph = PhCalibration::load(&mut eeprom)?;
        let ec = EcCalibration::load(&mut eeprom)?;
        Ok((ph, ec))
    });
    match loaded {
        Ok(calibration) => calibration,
        Err(e) => {
            error!(
                "Calibration store {} unavailable ({}), continuing with in-memory calibration",
                config.eeprom_path.display(),
                e
            );
            (
                PhCalibration::from_store(&eeprom),
                EcCalibration::from_store(&eeprom),
            )
        }
    }
}

async fn acquisition_loop<A, B, P, E>(
    mut pipeline: Pipeline<A, B, P, E>,
    period: std::time::Duration,
    reports: watch::Sender<Option<CycleReport>>,
) where
    A: AnalogInput,
    B: OneWireBus,
    P: PhCurve,
    E: EcCurve,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let report = pipeline.run_cycle().await;
        info!("{}", report);
        reports.send_replace(Some(report));
    }
}

async fn run_service(config: RigConfig) -> Result<(), Box<dyn std::error::Error>> {
    let database_url = config.require_database_url()?.to_string();
    let (ph, ec) = service_calibration(&config);
    let pipeline = build_pipeline(&config, ph, ec);
    let store = PostgresStore::new(database_url);

    info!(
        "Starting water quality rig at {}",
        format_datetime(&OffsetDateTime::now_utc())
    );

    let (report_tx, report_rx) = watch::channel(None);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sync_task = tokio::spawn(run_sync_task(
        store.clone(),
        config.retry.clone(),
        report_rx,
    ));
    let pump_task = tokio::spawn(run_pump_task(
        store,
        SimulatedPump::new(),
        config.pump_poll_interval,
        config.pump_duration,
        config.retry.clone(),
        shutdown_rx,
    ));

    // Handle Ctrl+C gracefully
    let (tx, mut rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = tx.send(());
            }
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
                // Keep the sender alive so the service is not torn down
                std::future::pending::<()>().await;
            }
        }
    });

    tokio::select! {
        _ = acquisition_loop(pipeline, config.sample_interval, report_tx) => {}
        _ = &mut rx => {
            info!("Program terminated by user. Exiting gracefully.");
        }
    }

    shutdown_tx.send_replace(true);
    sync_task.abort();
    if let Err(e) = pump_task.await {
        error!("Pump task ended abnormally: {}", e);
    }
    Ok(())
}

/// Erase the EC calibration range and show what reads back
fn reset_calibration(config: &RigConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut eeprom = FileEeprom::new(&config.eeprom_path);
    eeprom.begin(EEPROM_SIZE)?;

    info!(
        "Erasing EC calibration at 0x{:02X}..0x{:02X} in {}",
        EC_ADDR,
        EC_ADDR + EC_RANGE_LEN - 1,
        config.eeprom_path.display()
    );
    let readback = reset_range(&mut eeprom, EC_ADDR, EC_RANGE_LEN)?;
    for (addr, value) in &readback {
        info!("0x{:02X}: {}  (0x{:02X})", addr, value, value);
    }

    if let Some((addr, value)) = readback.iter().find(|(_, value)| *value != ERASED) {
        return Err(RigError::StorageInitFailure(format!(
            "byte at 0x{:02X} reads 0x{:02X} after erase",
            addr, value
        ))
        .into());
    }
    info!("EC calibration reset; defaults will be restored on next start");
    Ok(())
}

/// Interactive calibration over stdin
async fn run_calibration(config: RigConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (mut eeprom, ph, ec) = open_calibration(&config)?;
    let mut pipeline = build_pipeline(&config, ph, ec);
    let mut session = CalibrationSession::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    info!("Calibration mode: ENTERPH, CALPH, EXITPH, ENTEREC, CALEC, EXITEC");
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let Some(command) = CalibrationCommand::parse(&line) else {
            warn!("Unknown command: {}", line.trim());
            continue;
        };

        let temperature = pipeline.resolve_temperature().await;
        let voltage_mv = if matches!(command, CalibrationCommand::Calibrate(_)) {
            pipeline
                .calibration_voltage(command.probe().channel(), temperature.celsius)
                .await
        } else {
            0.0
        };

        let (ph, ec) = pipeline.curves_mut();
        let event = session.apply(
            command,
            voltage_mv,
            temperature.celsius,
            ph,
            ec,
            &mut eeprom,
        )?;
        info!("{}", event);
    }

    if let Some(probe) = session.active() {
        warn!("Input closed while calibrating {}; nothing was saved", probe);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match RigConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let mode = std::env::args().nth(1).unwrap_or_else(|| "run".to_string());
    let result = match mode.as_str() {
        "run" => run_service(config).await,
        "reset-calibration" => reset_calibration(&config),
        "calibrate" => run_calibration(config).await,
        other => Err(RigError::Config(format!(
            "unknown mode '{}', expected run, reset-calibration or calibrate",
            other
        ))
        .into()),
    };

    if let Err(e) = &result {
        error!("Fatal error: {}", e);
    }
    result
}
