use std::{
    io,
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::Instant,
};

use log::{error, info, warn};
use tokio::{
    sync::{mpsc, watch, Mutex as AsyncMutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    alarm::{display_highlights, evaluate, AlarmGate},
    camera::ConfigFetcher,
    error::{CameraError, Result},
    models::{AlarmEvent, RegionTable},
    telemetry::{
        ReadingSnapshot, ReadingStore, RefreshCallback, StopHandle, StreamState, TelemetryStream,
    },
};

use super::{OverlaySnapshot, SessionObserver, SessionSettings, StreamHealth};

/// Fetches region tables and swaps them in whole.
#[derive(Clone)]
struct RegionSource {
    fetcher: Arc<ConfigFetcher>,
    regions: Arc<RwLock<RegionTable>>,
    observer: Arc<dyn SessionObserver>,
    stream_stop: StopHandle,
    credentials_rejected: CancellationToken,
}

impl RegionSource {
    async fn refresh(&self) -> Result<RegionTable> {
        let table = match self.fetcher.fetch_regions().await {
            Ok(table) => table,
            Err(err) if err.is_authentication() => {
                self.reject(&err);
                return Err(err);
            }
            Err(err) => {
                error!(
                    "Region refresh from {} failed, keeping previous configuration: {err}",
                    self.fetcher.address()
                );
                return Err(err);
            }
        };
        self.replace(&table);
        Ok(table)
    }

    /// Bad credentials end the session: telemetry stops, nothing more is
    /// dispatched and reconnects are refused.
    fn reject(&self, err: &CameraError) {
        if self.credentials_rejected.is_cancelled() {
            return;
        }
        error!(
            "Camera at {} rejected the session credentials, stopping telemetry: {err}",
            self.fetcher.address()
        );
        self.credentials_rejected.cancel();
        self.stream_stop.stop();
        self.observer.on_authentication_failed(err);
    }

    fn is_rejected(&self) -> bool {
        self.credentials_rejected.is_cancelled()
    }

    fn rejected_error(&self) -> CameraError {
        CameraError::Authentication(format!(
            "{} (credentials rejected earlier in this session)",
            self.fetcher.address()
        ))
    }

    fn replace(&self, table: &RegionTable) {
        {
            let mut guard = self.regions.write().unwrap_or_else(PoisonError::into_inner);
            *guard = table.clone();
        }
        self.observer.on_region_config_changed(table);
    }

    fn current(&self) -> RegionTable {
        self.regions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// One viewing session against one camera.
///
/// Owns the region table, the reading store and the telemetry stream. The table
/// is fetched before any telemetry connection is attempted and is only ever
/// replaced wholesale, either by a configuration-changed signal from the stream
/// or by an explicit refresh.
pub struct MonitorSession {
    id: String,
    source: RegionSource,
    readings: ReadingStore,
    stream: AsyncMutex<TelemetryStream>,
    state_rx: watch::Receiver<StreamState>,
    gate: Mutex<AlarmGate>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cancel_token: CancellationToken,
}

impl MonitorSession {
    /// Fetches the region table, then opens telemetry.
    ///
    /// A failed fetch (bad credentials included) aborts before any connection to
    /// the telemetry port. A telemetry connect failure does not: the session
    /// starts degraded and [`reconnect`](Self::reconnect) brings it up later.
    pub async fn start(
        settings: SessionSettings,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Self> {
        let id = Uuid::new_v4().to_string();
        let camera = &settings.camera;
        let fetcher = Arc::new(ConfigFetcher::new(
            &camera.address,
            camera.credentials(),
            camera.request_timeout(),
        )?);

        let table = match fetcher.fetch_regions().await {
            Ok(table) => table,
            Err(err) => {
                error!("Session {id}: initial region fetch failed, telemetry not started: {err}");
                return Err(err);
            }
        };

        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let on_refresh: RefreshCallback = Arc::new(move || {
            let _ = refresh_tx.send(());
        });

        let readings = ReadingStore::new();
        let mut stream = TelemetryStream::new(camera.stream_config(), readings.clone(), on_refresh);
        let state_rx = stream.subscribe();

        let source = RegionSource {
            fetcher,
            regions: Arc::new(RwLock::new(table.clone())),
            observer: Arc::clone(&observer),
            stream_stop: stream.stop_handle(),
            credentials_rejected: CancellationToken::new(),
        };
        observer.on_region_config_changed(&table);
        let cancel_token = CancellationToken::new();

        let workers = vec![
            tokio::spawn(refresh_worker(
                source.clone(),
                refresh_rx,
                cancel_token.clone(),
            )),
            tokio::spawn(state_worker(
                stream.subscribe(),
                observer,
                cancel_token.clone(),
            )),
        ];

        if let Err(err) = stream.start().await {
            warn!("Session {id}: telemetry unavailable, starting degraded: {err}");
        }

        info!(
            "Session {id} started against {} ({} regions in use)",
            camera.address,
            table.used_count()
        );

        Ok(Self {
            id,
            source,
            readings,
            stream: AsyncMutex::new(stream),
            state_rx,
            gate: Mutex::new(AlarmGate::new(settings.alarm.cooldown())),
            workers: Mutex::new(workers),
            cancel_token,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn regions(&self) -> RegionTable {
        self.source.current()
    }

    pub fn readings(&self) -> ReadingSnapshot {
        self.readings.snapshot()
    }

    pub fn stream_state(&self) -> StreamState {
        *self.state_rx.borrow()
    }

    pub fn health(&self) -> StreamHealth {
        if self.source.is_rejected() {
            return StreamHealth::Unauthorized;
        }
        match self.stream_state() {
            StreamState::Streaming => StreamHealth::Live,
            StreamState::Idle | StreamState::Connecting => StreamHealth::Degraded,
        }
    }

    pub fn overlay(&self) -> OverlaySnapshot {
        let regions = self.regions();
        let readings = self.readings();
        let highlights = display_highlights(&regions, &readings);
        OverlaySnapshot {
            regions,
            readings,
            highlights,
            health: self.health(),
        }
    }

    /// Runs one evaluation cycle. Events admitted by the cooldown gate go to the
    /// observer and are returned; anything else is dropped.
    pub fn evaluate_and_dispatch(&self, now: Instant) -> Vec<AlarmEvent> {
        if self.source.is_rejected() {
            return Vec::new();
        }

        let events = {
            let regions = self.source.regions.read().unwrap_or_else(PoisonError::into_inner);
            evaluate(&regions, &self.readings)
        };

        let admitted = self
            .gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .admit(events, now);

        match admitted {
            Some(events) => {
                info!("Session {}: dispatching {} alarm event(s)", self.id, events.len());
                self.source.observer.on_alarm_events(&events);
                events
            }
            None => Vec::new(),
        }
    }

    /// Re-fetches the table. On failure the previous table stays in place.
    pub async fn refresh_regions(&self) -> Result<RegionTable> {
        self.source.refresh().await
    }

    /// Writes `table` to the camera, then reads back what the camera kept.
    pub async fn save_regions(&self, table: &RegionTable) -> Result<RegionTable> {
        self.source.fetcher.store_regions(table).await?;
        info!("Session {}: region configuration saved", self.id);
        self.refresh_regions().await
    }

    /// Restarts telemetry if it is down. The table is re-fetched first since
    /// change signals sent while disconnected were missed.
    pub async fn reconnect(&self) -> Result<()> {
        if self.cancel_token.is_cancelled() {
            return Err(CameraError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "session stopped",
            )));
        }

        if self.source.is_rejected() {
            return Err(self.source.rejected_error());
        }

        let mut stream = self.stream.lock().await;
        if stream.is_alive() {
            return Ok(());
        }

        self.source.refresh().await?;
        stream.start().await?;
        if self.source.is_rejected() {
            stream.stop();
            return Err(self.source.rejected_error());
        }
        info!("Session {}: telemetry reconnected", self.id);
        Ok(())
    }

    /// Resolves once the camera has rejected this session's credentials.
    pub async fn credentials_rejected(&self) {
        self.source.credentials_rejected.cancelled().await
    }

    /// Closes telemetry and stops background work. Readings stay readable.
    pub async fn stop(&self) {
        self.cancel_token.cancel();
        self.stream.lock().await.shutdown().await;

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for worker in workers {
            if let Err(err) = worker.await {
                error!("Session {}: worker failed to join: {err}", self.id);
            }
        }
        info!("Session {} stopped", self.id);
    }
}

impl Drop for MonitorSession {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn refresh_worker(
    source: RegionSource,
    mut signals: mpsc::UnboundedReceiver<()>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            signal = signals.recv() => {
                if signal.is_none() {
                    break;
                }
                // One fetch answers every signal queued before it starts.
                while signals.try_recv().is_ok() {}

                tokio::select! {
                    biased;
                    _ = cancel_token.cancelled() => break,
                    _ = source.refresh() => {}
                }
            }
        }
    }
}

async fn state_worker(
    mut state_rx: watch::Receiver<StreamState>,
    observer: Arc<dyn SessionObserver>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *state_rx.borrow_and_update();
                observer.on_stream_state_changed(state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    use crate::camera::fetcher::tests::{region_two_bodies, FakeCamera};
    use crate::models::RegionIndex;
    use crate::settings::{AlarmSettings, CameraSettings};

    #[derive(Default)]
    struct RecordingObserver {
        configs: Mutex<Vec<RegionTable>>,
        dispatches: Mutex<Vec<Vec<AlarmEvent>>>,
        states: Mutex<Vec<StreamState>>,
        auth_failures: Mutex<Vec<String>>,
    }

    impl SessionObserver for RecordingObserver {
        fn on_region_config_changed(&self, regions: &RegionTable) {
            self.configs.lock().unwrap().push(regions.clone());
        }

        fn on_alarm_events(&self, events: &[AlarmEvent]) {
            self.dispatches.lock().unwrap().push(events.to_vec());
        }

        fn on_stream_state_changed(&self, state: StreamState) {
            self.states.lock().unwrap().push(state);
        }

        fn on_authentication_failed(&self, error: &CameraError) {
            self.auth_failures.lock().unwrap().push(error.to_string());
        }
    }

    /// Telemetry port stand-in. Serves one connection at a time; `hang_up` closes
    /// the current one and the next connect is accepted.
    struct TelemetryFeed {
        port: u16,
        tx: mpsc::UnboundedSender<Option<Vec<u8>>>,
        connections: Arc<AtomicUsize>,
    }

    impl TelemetryFeed {
        async fn spawn() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            let (tx, mut rx) = mpsc::unbounded_channel::<Option<Vec<u8>>>();
            let connections = Arc::new(AtomicUsize::new(0));

            let accepted = connections.clone();
            tokio::spawn(async move {
                while let Ok((mut socket, _)) = listener.accept().await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                    while let Some(Some(payload)) = rx.recv().await {
                        if socket.write_all(&payload).await.is_err() {
                            break;
                        }
                    }
                }
            });

            Self {
                port,
                tx,
                connections,
            }
        }

        fn send(&self, payload: &str) {
            self.tx.send(Some(payload.as_bytes().to_vec())).unwrap();
        }

        fn hang_up(&self) {
            self.tx.send(None).unwrap();
        }

        fn connections(&self) -> usize {
            self.connections.load(Ordering::SeqCst)
        }
    }

    fn settings_for(camera: &FakeCamera, feed: &TelemetryFeed) -> SessionSettings {
        SessionSettings {
            camera: CameraSettings {
                address: camera.address.clone(),
                user_id: "admin".into(),
                password: "secret".into(),
                telemetry_port: feed.port,
                ..CameraSettings::default()
            },
            alarm: AlarmSettings::default(),
        }
    }

    fn idx(value: u8) -> RegionIndex {
        RegionIndex::new(value).unwrap()
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    const REGION_TWO_HOT: &str = r#"[{"area_id":2,"temp_max":42.3,"temp_min":20.0,"temp_avr":30.0}]"#;

    #[tokio::test]
    async fn authentication_failure_blocks_stream_startup() {
        let mut bodies = HashMap::new();
        bodies.insert("getthermalroi0".to_string(), "Unauthorized".to_string());
        let camera = FakeCamera::spawn(bodies, 200).await;
        let feed = TelemetryFeed::spawn().await;
        let observer = Arc::new(RecordingObserver::default());

        let err = match MonitorSession::start(settings_for(&camera, &feed), observer.clone()).await {
            Ok(_) => panic!("session must not start with rejected credentials"),
            Err(err) => err,
        };

        assert!(err.is_authentication());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(feed.connections(), 0);
        assert!(observer.configs.lock().unwrap().is_empty());
        assert_eq!(camera.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dispatch_obeys_global_cooldown() {
        let camera = FakeCamera::spawn(region_two_bodies(), 200).await;
        let feed = TelemetryFeed::spawn().await;
        let observer = Arc::new(RecordingObserver::default());
        let session = MonitorSession::start(settings_for(&camera, &feed), observer.clone())
            .await
            .unwrap();
        assert_eq!(session.health(), StreamHealth::Live);

        feed.send(REGION_TWO_HOT);
        wait_until(|| session.readings().contains_key(&idx(2))).await;

        let now = Instant::now();
        let first = session.evaluate_and_dispatch(now);
        assert_eq!(first.len(), 1);
        assert_eq!(
            first[0].message(),
            "Region 2: maximum 42.3°C is above threshold 40.0°C"
        );
        assert!(session
            .evaluate_and_dispatch(now + Duration::from_secs(1))
            .is_empty());
        assert_eq!(
            session
                .evaluate_and_dispatch(now + Duration::from_secs(3))
                .len(),
            1
        );
        assert_eq!(observer.dispatches.lock().unwrap().len(), 2);

        session.stop().await;
    }

    #[tokio::test]
    async fn change_signal_replaces_table_wholesale() {
        let camera = FakeCamera::spawn(region_two_bodies(), 200).await;
        let feed = TelemetryFeed::spawn().await;
        let observer = Arc::new(RecordingObserver::default());
        let session = MonitorSession::start(settings_for(&camera, &feed), observer.clone())
            .await
            .unwrap();

        feed.send(REGION_TWO_HOT);
        wait_until(|| session.readings().contains_key(&idx(2))).await;
        // Evaluated against the table in place until the replacement lands.
        assert_eq!(session.evaluate_and_dispatch(Instant::now()).len(), 1);

        let raised = region_two_bodies()["getthermalroi2"].replace("temperature=40.0", "temperature=45.0");
        camera
            .bodies
            .lock()
            .unwrap()
            .insert("getthermalroi2".to_string(), raised);
        feed.send(r#"[{"area_id":100}]"#);

        wait_until(|| observer.configs.lock().unwrap().len() == 2).await;
        let rule = session.regions().get(idx(2)).alarm_rule.clone().unwrap();
        assert_eq!(rule.threshold_celsius, 45.0);
        assert!(session
            .evaluate_and_dispatch(Instant::now() + Duration::from_secs(10))
            .is_empty());
        // The signal is not a reading.
        assert_eq!(session.readings().len(), 1);

        session.stop().await;
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_table() {
        let camera = FakeCamera::spawn(region_two_bodies(), 200).await;
        let feed = TelemetryFeed::spawn().await;
        let observer = Arc::new(RecordingObserver::default());
        let mut settings = settings_for(&camera, &feed);
        settings.camera.request_timeout_ms = 300;
        let session = MonitorSession::start(settings, observer.clone())
            .await
            .unwrap();
        let before = session.regions();

        camera.set_delay(Duration::from_millis(800));
        let err = session.refresh_regions().await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(session.regions(), before);
        assert_eq!(observer.configs.lock().unwrap().len(), 1);
        assert_eq!(session.health(), StreamHealth::Live);

        session.stop().await;
    }

    #[tokio::test]
    async fn rejected_credentials_on_refresh_end_the_session() {
        let camera = FakeCamera::spawn(region_two_bodies(), 200).await;
        let feed = TelemetryFeed::spawn().await;
        let observer = Arc::new(RecordingObserver::default());
        let session = MonitorSession::start(settings_for(&camera, &feed), observer.clone())
            .await
            .unwrap();

        feed.send(REGION_TWO_HOT);
        wait_until(|| session.readings().contains_key(&idx(2))).await;

        camera
            .bodies
            .lock()
            .unwrap()
            .insert("getthermalroi0".to_string(), "Unauthorized".to_string());
        feed.send(r#"[{"area_id":100}]"#);

        tokio::time::timeout(Duration::from_secs(3), session.credentials_rejected())
            .await
            .expect("rejection should be reported");
        assert_eq!(session.health(), StreamHealth::Unauthorized);
        assert_eq!(observer.auth_failures.lock().unwrap().len(), 1);
        wait_until(|| session.stream_state() == StreamState::Idle).await;

        // The hot reading is still shown but no longer dispatched.
        assert!(session.readings().contains_key(&idx(2)));
        assert!(session.evaluate_and_dispatch(Instant::now()).is_empty());
        assert!(observer.dispatches.lock().unwrap().is_empty());

        let err = session.reconnect().await.unwrap_err();
        assert!(err.is_authentication());
        assert_eq!(feed.connections(), 1);

        session.stop().await;
    }

    #[tokio::test]
    async fn readings_after_change_signal_use_old_table_until_refresh_lands() {
        let camera = FakeCamera::spawn(region_two_bodies(), 200).await;
        let feed = TelemetryFeed::spawn().await;
        let observer = Arc::new(RecordingObserver::default());
        let session = MonitorSession::start(settings_for(&camera, &feed), observer.clone())
            .await
            .unwrap();

        let raised = region_two_bodies()["getthermalroi2"].replace("temperature=40.0", "temperature=45.0");
        camera
            .bodies
            .lock()
            .unwrap()
            .insert("getthermalroi2".to_string(), raised);
        // Ten slots at 200 ms each keeps the refresh in flight for about two seconds.
        camera.set_delay(Duration::from_millis(200));

        feed.send(r#"[{"area_id":100}]"#);
        feed.send(r#"[{"area_id":2,"temp_max":43.0}]"#);
        wait_until(|| {
            session
                .readings()
                .get(&idx(2))
                .is_some_and(|reading| reading.max_celsius == Some(43.0))
        })
        .await;

        assert_eq!(observer.configs.lock().unwrap().len(), 1);
        let now = Instant::now();
        let stale = session.evaluate_and_dispatch(now);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].measured_celsius, 43.0);
        assert_eq!(stale[0].threshold_celsius, 40.0);

        wait_until(|| observer.configs.lock().unwrap().len() == 2).await;
        assert!(session
            .evaluate_and_dispatch(now + Duration::from_secs(10))
            .is_empty());

        session.stop().await;
    }

    #[tokio::test]
    async fn hangup_degrades_and_reconnect_restores() {
        let camera = FakeCamera::spawn(region_two_bodies(), 200).await;
        let feed = TelemetryFeed::spawn().await;
        let observer = Arc::new(RecordingObserver::default());
        let session = MonitorSession::start(settings_for(&camera, &feed), observer.clone())
            .await
            .unwrap();

        feed.send(r#"[{"area_id":5,"temp_min":-3.5}]"#);
        wait_until(|| session.readings().contains_key(&idx(5))).await;

        feed.hang_up();
        wait_until(|| session.health() == StreamHealth::Degraded).await;
        wait_until(|| observer.states.lock().unwrap().contains(&StreamState::Idle)).await;
        assert_eq!(session.readings()[&idx(5)].min_celsius, Some(-3.5));
        assert_eq!(session.overlay().health, StreamHealth::Degraded);

        session.reconnect().await.unwrap();
        assert_eq!(session.health(), StreamHealth::Live);
        wait_until(|| feed.connections() == 2).await;

        feed.send(r#"[{"area_id":6,"temp_max":21.0}]"#);
        wait_until(|| session.readings().contains_key(&idx(6))).await;

        session.stop().await;
        assert_eq!(session.health(), StreamHealth::Degraded);
        assert_eq!(session.readings().len(), 2);
        assert!(session.reconnect().await.is_err());
    }

    #[tokio::test]
    async fn save_writes_every_region_then_reads_back() {
        let camera = FakeCamera::spawn(region_two_bodies(), 200).await;
        let feed = TelemetryFeed::spawn().await;
        let observer = Arc::new(RecordingObserver::default());
        let session = MonitorSession::start(settings_for(&camera, &feed), observer.clone())
            .await
            .unwrap();

        let mut table = session.regions();
        table.get_mut(idx(2)).used = false;
        let refreshed = session.save_regions(&table).await.unwrap();

        let requests = camera.requests.lock().unwrap().clone();
        assert!(requests
            .iter()
            .any(|target| target.contains("action=setthermalroi2") && target.contains("roi_use=off")));
        let last_set = requests
            .iter()
            .rposition(|target| target.contains("action=setthermalroi"))
            .unwrap();
        assert!(requests[last_set..]
            .iter()
            .any(|target| target.contains("action=getthermalroi")));

        // The camera is the source of truth: this fake ignores writes.
        assert!(refreshed.get(idx(2)).used);
        assert_eq!(observer.configs.lock().unwrap().len(), 2);

        session.stop().await;
    }

    #[tokio::test]
    async fn overlay_carries_display_highlights() {
        let mut bodies = HashMap::new();
        bodies.insert(
            "getthermalroi4".to_string(),
            "roi_use=on\nstartx=0\nstarty=0\nendx=20\nendy=20\nalarm_use=off\nmode=maximum\ncondition=above\ntemperature=30.0\niso_use=on\niso_color=blue\n"
                .to_string(),
        );
        let camera = FakeCamera::spawn(bodies, 200).await;
        let feed = TelemetryFeed::spawn().await;
        let session = MonitorSession::start(
            settings_for(&camera, &feed),
            Arc::new(RecordingObserver::default()),
        )
        .await
        .unwrap();

        feed.send(r#"[{"area_id":4,"temp_max":31.5,"temp_min":12.0}]"#);
        wait_until(|| session.readings().contains_key(&idx(4))).await;

        let overlay = session.overlay();
        assert_eq!(overlay.highlights.len(), 1);
        assert_eq!(overlay.highlights[0].region, idx(4));
        assert_eq!(overlay.highlights[0].color, crate::models::IsoColor::Blue);
        assert_eq!(overlay.health, StreamHealth::Live);
        // Alarm rule is disabled, so nothing is dispatched.
        assert!(session.evaluate_and_dispatch(Instant::now()).is_empty());

        session.stop().await;
    }
}
