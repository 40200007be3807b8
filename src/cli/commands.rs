use std::sync::Arc;
use std::time::Duration;
use futures::channel::mpsc::Receiver;
use futures::StreamExt;
use log::{error, info, warn};
use tokio::spawn;

use crate::cli::args::{Action, Args};
use crate::cli::prompt::Prompt;
use crate::config::io::ConfigIO;
use crate::config::types::Config;
use crate::error::{AppRunError, ConfigError, ManualEntryError, WorkflowError};
use crate::record::store::{JsonLinesStore, MeasurementStore};
use crate::record::types::MetabolicRisk;
use crate::scale::btle::BtleTransport;
use crate::scale::connector::{DeviceConnector, DiscoveryFilter};
use crate::scale::constants::WEIGHT_MEASUREMENT_CHARACTERISTIC;
use crate::scale::decoder::PayloadDecoder;
use crate::scale::manual::check_girth;
use crate::scale::replay::ReplayTransport;
use crate::scale::transport::ScaleTransport;
use crate::scale::types::{FailureReason, WorkflowEvent, WorkflowState};
use crate::scale::workflow::{ByAddress, DevicePicker, FirstCandidate, PairingWorkflow, WorkflowSettings};

/**
 * Replayed payloads are all queued before the workflow starts, so there is no reason to wait long.
 */
const REPLAY_TIMEOUT: u64 = 1_000;

pub async fn load_config(config_io: &ConfigIO) -> Config {
    match config_io.read().await {
        Ok(config) => config,
        Err(err) => {
            if err.is_file_not_found_error() {
                info!("Config file not found, using defaults");
            } else {
                error!("Failed to load config, using defaults: {}", &err);
            }
            Config::default()
        },
    }
}

pub async fn run_command(args: Args, mut config: Config, config_io: &ConfigIO) -> Result<(), AppRunError> {
    if let Some(height_cm) = args.height_cm {
        config.height_cm = height_cm;
    }

    match args.action {
        Action::Config { measurement_timeout_secs, scan_duration_secs, connect_timeout_secs, records_path } => {
            let settings = Config {
                measurement_timeout_secs: measurement_timeout_secs.unwrap_or(config.measurement_timeout_secs),
                scan_duration_secs: scan_duration_secs.unwrap_or(config.scan_duration_secs),
                connect_timeout_secs: connect_timeout_secs.unwrap_or(config.connect_timeout_secs),
                records_path: records_path.or(config.records_path),
                ..config
            };
            configure(config_io, &settings).await
        },
        Action::Pair { address, girth_cm, yes } => pair(&config, address, girth_cm, yes).await,
        Action::Manual { weight_kg, girth_cm } => manual(&config, weight_kg, girth_cm).await,
        Action::Decode { payload } => decode_payload(&config, &payload),
        Action::Replay { payloads, name, save } => replay(&config, &payloads, &name, save).await,
    }
}

async fn configure(config_io: &ConfigIO, config: &Config) -> Result<(), AppRunError> {
    if !config.height_cm.is_finite() || config.height_cm <= 0.0 {
        return Err(WorkflowError::from(ManualEntryError::InvalidHeight { height_cm: config.height_cm }).into());
    }

    config_io.save(config).await?;
    println!("Settings saved: height {} cm, measurement timeout {} s", config.height_cm, config.measurement_timeout_secs);
    Ok(())
}

fn records_store(config: &Config) -> Result<JsonLinesStore, AppRunError> {
    let path = config
        .records_path
        .clone()
        .or_else(JsonLinesStore::default_path)
        .ok_or(ConfigError::NoConfigPath)?;

    Ok(JsonLinesStore::new(path))
}

fn make_workflow<T: ScaleTransport>(transport: T, config: &Config, settings: WorkflowSettings) -> PairingWorkflow<T> {
    let connector = DeviceConnector::new(Arc::new(transport), DiscoveryFilter::default(), config.connector_timings());
    PairingWorkflow::new(connector, settings)
}

fn parse_hex(payload: &str) -> Result<Vec<u8>, AppRunError> {
    // accept "0a1b", "0a 1b" and "0a:1b"
    let cleaned: String = payload.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    Ok(hex::decode(cleaned)?)
}

fn print_saved(state: &WorkflowState, risk: Option<MetabolicRisk>) {
    if state == &WorkflowState::Completed {
        match risk {
            Some(risk) => println!("Measurement saved ({}).", risk),
            None => println!("Measurement saved."),
        }
    }
}

async fn print_events(mut events: Receiver<WorkflowEvent>) {
    while let Some(event) = events.next().await {
        match event {
            WorkflowEvent::DeviceSelected { name, address } => println!("Connecting to {} ({})...", name, address),
            WorkflowEvent::Battery(level) => println!("Scale battery: {}%", level),
            WorkflowEvent::StateChange(WorkflowState::AwaitingMeasurement) => {
                println!("Connected. Step on the scale and stand still.");
            },
            _ => {},
        }
    }
}

async fn pair(config: &Config, address: Option<String>, girth_cm: Option<f64>, yes: bool) -> Result<(), AppRunError> {
    let store = records_store(config)?;
    let mut workflow = make_workflow(BtleTransport::new(), config, config.workflow_settings());
    let printer = spawn(print_events(workflow.subscribe()));

    println!("Looking for a scale...");
    let outcome = tokio::select! {
        result = drive(&mut workflow, address, girth_cm, yes, &store) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    let result = match outcome {
        Some(result) => result,
        None => {
            warn!("Interrupted, releasing the scale");
            workflow.reset().await;
            Err(AppRunError::NotCompleted { reason: "interrupted".to_string() })
        },
    };

    // dropping the workflow closes the event channel, which ends the printer
    drop(workflow);
    if let Err(err) = printer.await {
        warn!("Event printer stopped unexpectedly: {:?}", err);
    }

    result
}

async fn drive<T: ScaleTransport>(
    workflow: &mut PairingWorkflow<T>,
    address: Option<String>,
    girth_cm: Option<f64>,
    yes: bool,
    store: &dyn MeasurementStore,
) -> Result<(), AppRunError> {
    // a girth given on the command line is used for every save attempt, so it must be usable
    check_girth(girth_cm).map_err(WorkflowError::from)?;

    let mut prompt = Prompt::new();
    let mut picker: Box<dyn DevicePicker<T::Link>> = match address {
        Some(address) => Box::new(ByAddress(address)),
        None => Box::new(FirstCandidate),
    };

    workflow.start_pairing(picker.as_mut()).await?;

    loop {
        match workflow.state().clone() {
            WorkflowState::AwaitingMeasurement => {
                workflow.await_measurement().await?;
            },
            WorkflowState::Confirming(reading) => {
                println!("Measured: {}", reading);

                if !yes && !prompt.yes_no("Save this measurement?").await? {
                    workflow.reset().await;
                    continue;
                }

                let girth_cm = match girth_cm {
                    Some(girth_cm) => Some(girth_cm),
                    None if yes => None,
                    None => prompt.number("Abdominal girth in cm (empty to skip):").await?,
                };

                match workflow.accept_reading(girth_cm, store).await {
                    Ok(state) => print_saved(state, Some(MetabolicRisk::from_bmi(reading.bmi()))),
                    Err(WorkflowError::ManualEntry { source }) => println!("{}", source),
                    Err(err) => return Err(err.into()),
                }
            },
            WorkflowState::ManualEntry => {
                println!("No measurement received from the scale. Enter it manually.");

                let weight_kg = match prompt.number("Weight in kg:").await? {
                    Some(weight_kg) => weight_kg,
                    None => {
                        workflow.reset().await;
                        continue;
                    },
                };
                let girth_cm = match girth_cm {
                    Some(girth_cm) => Some(girth_cm),
                    None => prompt.number("Abdominal girth in cm (empty to skip):").await?,
                };

                match workflow.submit_manual(weight_kg, girth_cm, store).await {
                    Ok(state) => print_saved(state, None),
                    Err(WorkflowError::ManualEntry { source }) => println!("{}", source),
                    Err(err) => return Err(err.into()),
                }
            },
            WorkflowState::Failed(FailureReason::PersistError(err)) => {
                println!("Saving failed: {}", err);

                if prompt.yes_no("Try saving again?").await? {
                    let state = workflow.retry_save(store).await?;
                    print_saved(state, None);
                } else {
                    return Err(AppRunError::NotCompleted { reason: err.to_string() });
                }
            },
            WorkflowState::Failed(FailureReason::Unsupported) => {
                println!("Bluetooth is not available. Use the `manual` command to enter a measurement.");
                return Err(AppRunError::NotCompleted { reason: FailureReason::Unsupported.to_string() });
            },
            WorkflowState::Failed(reason) => {
                println!("Pairing failed: {}. Run the command again to retry or use the `manual` command.", reason);
                return Err(AppRunError::NotCompleted { reason: reason.to_string() });
            },
            WorkflowState::Completed => return Ok(()),
            WorkflowState::Idle => {
                println!("Measurement discarded.");
                return Ok(());
            },
            other => {
                return Err(AppRunError::NotCompleted { reason: format!("stopped while {}", other) });
            },
        }
    }
}

async fn manual(config: &Config, weight_kg: f64, girth_cm: Option<f64>) -> Result<(), AppRunError> {
    let store = records_store(config)?;
    // the manual path never touches bluetooth, so the transport is never used
    let mut workflow = make_workflow(BtleTransport::new(), config, config.workflow_settings());

    let state = workflow.submit_manual(weight_kg, girth_cm, &store).await?;
    match state {
        WorkflowState::Completed => {
            println!("Measurement saved to {}", store.path().to_string_lossy());
            Ok(())
        },
        other => Err(AppRunError::NotCompleted { reason: other.to_string() }),
    }
}

fn decode_payload(config: &Config, payload: &str) -> Result<(), AppRunError> {
    let bytes = parse_hex(payload)?;
    let reading = PayloadDecoder::from_height_cm(config.height_cm).decode(&bytes)?;

    println!("{} bytes: {}", bytes.len(), reading);
    println!("Risk category: {}", MetabolicRisk::from_bmi(reading.bmi()));
    Ok(())
}

async fn replay(config: &Config, payloads: &[String], name: &str, save: bool) -> Result<(), AppRunError> {
    let transport = ReplayTransport::with_scale(name, "00:00:00:00:00:00");
    for payload in payloads {
        transport.push_notification(WEIGHT_MEASUREMENT_CHARACTERISTIC, parse_hex(payload)?);
    }

    let settings = WorkflowSettings {
        measurement_timeout: Duration::from_millis(REPLAY_TIMEOUT),
        ..config.workflow_settings()
    };
    let mut workflow = make_workflow(transport, config, settings);

    workflow.start_pairing(&mut FirstCandidate).await?;
    if workflow.state() == &WorkflowState::AwaitingMeasurement {
        workflow.await_measurement().await?;
    }

    let reading = match workflow.state().clone() {
        WorkflowState::Confirming(reading) => reading,
        other => {
            workflow.reset().await;
            return Err(AppRunError::NotCompleted { reason: format!("no payload produced a weight ({})", other) });
        },
    };
    println!("Measured: {}", reading);

    if save {
        let store = records_store(config)?;
        let state = workflow.accept_reading(None, &store).await?;
        print_saved(state, Some(MetabolicRisk::from_bmi(reading.bmi())));
    } else {
        workflow.reset().await;
    }

    Ok(())
}
