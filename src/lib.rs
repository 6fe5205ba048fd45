pub mod alarm;
pub mod camera;
pub mod editor;
pub mod error;
pub mod models;
pub mod session;
pub mod settings;
pub mod telemetry;
pub mod utils;

use std::{sync::Arc, time::Instant};

use anyhow::Context;
use log::{error, info, warn};
use tokio::time::MissedTickBehavior;

use error::CameraError;
use models::{AlarmEvent, RegionTable, REGION_COUNT};
use session::{MonitorSession, SessionObserver, SessionSettings, StreamHealth};
use settings::SettingsStore;
use telemetry::StreamState;

/// Stands in for the notification dispatcher when running headless.
struct LoggingObserver;

impl SessionObserver for LoggingObserver {
    fn on_region_config_changed(&self, regions: &RegionTable) {
        info!(
            "Region configuration loaded: {} of {REGION_COUNT} regions in use",
            regions.used_count()
        );
    }

    fn on_alarm_events(&self, events: &[AlarmEvent]) {
        for event in events {
            warn!("ALARM {}", event.message());
        }
    }

    fn on_stream_state_changed(&self, state: StreamState) {
        info!("Telemetry stream is now {state:?}");
    }

    fn on_authentication_failed(&self, error: &CameraError) {
        error!("Monitoring halted: {error}");
    }
}

pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("ThermalWatch starting up...");

    if let Err(err) = run_monitor() {
        error!("ThermalWatch stopped: {err:#}");
        std::process::exit(1);
    }
}

fn run_monitor() -> anyhow::Result<()> {
    let settings = SettingsStore::new(SettingsStore::default_path())?;
    info!("Using settings from {}", settings.path().display());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(monitor(SessionSettings::from(&settings)))
}

async fn monitor(settings: SessionSettings) -> anyhow::Result<()> {
    let alarm = settings.alarm.clone();
    let session = MonitorSession::start(settings, Arc::new(LoggingObserver))
        .await
        .context("Failed to start monitoring session")?;

    let mut evaluation = tokio::time::interval(alarm.evaluation_interval());
    evaluation.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut reconnect = tokio::time::interval(alarm.reconnect_interval());
    reconnect.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let outcome = loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break Ok(());
            }
            _ = session.credentials_rejected() => {
                break Err(anyhow::anyhow!("Camera rejected credentials"));
            }
            _ = evaluation.tick() => {
                session.evaluate_and_dispatch(Instant::now());
            }
            _ = reconnect.tick() => {
                if session.health() != StreamHealth::Degraded {
                    continue;
                }
                // A reconnect can spend several request timeouts; Ctrl-C still wins.
                tokio::select! {
                    _ = &mut shutdown => {
                        info!("Shutdown requested during reconnect");
                        break Ok(());
                    }
                    outcome = session.reconnect() => match outcome {
                        Ok(()) => {}
                        Err(err) if err.is_authentication() => {
                            break Err(anyhow::Error::new(err).context("Camera rejected credentials"));
                        }
                        Err(err) => warn!("Telemetry reconnect failed, retrying: {err}"),
                    },
                }
            }
        }
    };

    session.stop().await;
    outcome
}
