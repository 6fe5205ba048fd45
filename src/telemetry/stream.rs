use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{CameraError, Result};

use super::frame::{TelemetryDecoder, TelemetryMessage};
use super::store::ReadingStore;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

pub const DEFAULT_TELEMETRY_PORT: u16 = 60110;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_CHUNK_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamState {
    Idle,
    Connecting,
    Streaming,
}

/// Invoked once per configuration-changed signal seen on the wire.
pub type RefreshCallback = Arc<dyn Fn() + Send + Sync>;

/// Stops the current connection attempt or read loop from any thread without
/// waiting for it. Stays valid across restarts of the stream it came from.
#[derive(Clone)]
pub struct StopHandle {
    token: Arc<Mutex<CancellationToken>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    /// Installs a fresh token for a new attempt and returns it.
    fn renew(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();
        token
    }
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
}

impl StreamConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    fn peer(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Owns the long-lived connection to the camera's telemetry port.
///
/// `Idle -> Connecting -> Streaming -> Idle`. There is no internal reconnect: once
/// the loop ends the stream stays idle until its owner calls [`start`](Self::start)
/// again.
pub struct TelemetryStream {
    config: StreamConfig,
    store: ReadingStore,
    on_refresh: RefreshCallback,
    decoder: Arc<TelemetryDecoder>,
    state_tx: Arc<watch::Sender<StreamState>>,
    handle: Option<JoinHandle<()>>,
    stop_handle: StopHandle,
}

impl TelemetryStream {
    pub fn new(
        config: StreamConfig,
        store: ReadingStore,
        on_refresh: RefreshCallback,
    ) -> Self {
        let (state_tx, _) = watch::channel(StreamState::Idle);
        Self {
            config,
            store,
            on_refresh,
            decoder: Arc::new(TelemetryDecoder::default()),
            state_tx: Arc::new(state_tx),
            handle: None,
            stop_handle: StopHandle {
                token: Arc::new(Mutex::new(CancellationToken::new())),
            },
        }
    }

    pub fn with_decoder(mut self, decoder: TelemetryDecoder) -> Self {
        self.decoder = Arc::new(decoder);
        self
    }

    /// Connects and spawns the read loop. A connect failure leaves the stream idle
    /// and is returned to the caller.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_alive() {
            log_warn!("telemetry stream to {} already running", self.config.peer());
            return Ok(());
        }
        self.reap();

        let cancel_token = self.stop_handle.renew();

        let peer = self.config.peer();
        self.state_tx.send_replace(StreamState::Connecting);

        let connect = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&peer));
        let socket = tokio::select! {
            outcome = connect => match outcome {
                Ok(Ok(socket)) => socket,
                Ok(Err(err)) => {
                    self.state_tx.send_replace(StreamState::Idle);
                    log_error!("telemetry connect to {peer} failed: {err}");
                    return Err(err.into());
                }
                Err(_) => {
                    self.state_tx.send_replace(StreamState::Idle);
                    log_error!("telemetry connect to {peer} timed out");
                    return Err(CameraError::Timeout(format!(
                        "connecting to telemetry port {peer} (> {}s)",
                        self.config.connect_timeout.as_secs()
                    )));
                }
            },
            _ = cancel_token.cancelled() => {
                self.state_tx.send_replace(StreamState::Idle);
                return Err(CameraError::Io(std::io::Error::new(
                    std::io::ErrorKind::Interrupted,
                    format!("telemetry connect to {peer} cancelled"),
                )));
            }
        };

        self.state_tx.send_replace(StreamState::Streaming);
        log_info!("telemetry stream connected to {peer}");

        self.handle = Some(tokio::spawn(telemetry_loop(
            socket,
            peer,
            Arc::clone(&self.decoder),
            self.store.clone(),
            Arc::clone(&self.on_refresh),
            Arc::clone(&self.state_tx),
            cancel_token,
        )));
        Ok(())
    }

    /// Signals the read loop to close its socket and exit. Does not wait.
    pub fn stop(&self) {
        self.stop_handle.stop();
    }

    /// Stops the loop and waits for it to finish. Readings are left in place.
    pub async fn shutdown(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                log_error!("telemetry loop task failed to join: {err}");
            }
        }
        self.state_tx.send_replace(StreamState::Idle);
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop_handle.clone()
    }

    pub fn state(&self) -> StreamState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<StreamState> {
        self.state_tx.subscribe()
    }

    /// Liveness check for the owner: false once the loop has ended for any reason.
    pub fn is_alive(&self) -> bool {
        let running = self
            .handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false);
        running && self.state() == StreamState::Streaming
    }

    pub fn store(&self) -> &ReadingStore {
        &self.store
    }

    fn reap(&mut self) {
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                handle.abort();
            }
        }
    }
}

impl Drop for TelemetryStream {
    fn drop(&mut self) {
        self.stop_handle.stop();
    }
}

/// Writes decoded messages into the store in receive order and fires the refresh
/// callback for every configuration-changed signal. Returns the number of readings
/// applied.
pub fn apply_messages(
    messages: impl IntoIterator<Item = TelemetryMessage>,
    store: &ReadingStore,
    on_refresh: &(dyn Fn() + Send + Sync),
) -> usize {
    let mut applied = 0;
    for message in messages {
        match message {
            TelemetryMessage::Reading { region, reading } => {
                store.update(region, reading);
                applied += 1;
            }
            TelemetryMessage::ConfigChanged => {
                log_info!("camera reported a region configuration change");
                on_refresh();
            }
        }
    }
    applied
}

async fn telemetry_loop(
    mut socket: TcpStream,
    peer: String,
    decoder: Arc<TelemetryDecoder>,
    store: ReadingStore,
    on_refresh: RefreshCallback,
    state_tx: Arc<watch::Sender<StreamState>>,
    cancel_token: CancellationToken,
) {
    let mut buf = vec![0u8; READ_CHUNK_BYTES];

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("telemetry loop for {peer} shutting down");
                break;
            }
            read = socket.read(&mut buf) => match read {
                Ok(0) => {
                    log_warn!("telemetry connection to {peer} closed by camera");
                    break;
                }
                Ok(len) => {
                    let messages = decoder.decode(&buf[..len]);
                    apply_messages(messages, &store, on_refresh.as_ref());
                }
                Err(err) => {
                    log_error!("telemetry read from {peer} failed: {err}");
                    break;
                }
            }
        }
    }

    drop(socket);
    state_tx.send_replace(StreamState::Idle);
}
