//! The driver: one player session, a monitor thread, and the playback
//! snapshot callers read.
//!
//! ## Locks
//!
//! - `state` guards the session, the snapshot, the smoothing cache and the
//!   track callback slot. Callbacks are never invoked while it is held.
//! - `lifecycle` serializes connect, disconnect and the monitor's reconnects.
//!   The monitor only ever *tries* it, so a disconnect holding it while
//!   joining the monitor cannot deadlock.
//! - the log sink has its own lock.
//!
//! ## Monitor loop
//!
//! Every `poll_interval` the monitor either polls the page or, when the
//! session is gone, reconnects to the last port, waiting `reconnect_backoff`
//! after a failed attempt. Both waits are `recv_timeout` calls on the stop
//! channel, so a disconnect interrupts them immediately.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::debug;

use crate::client::{NeteaseClient, PlayerSession};
use crate::config::DriverConfig;
use crate::errors::NeteaseError;
use crate::logging::{LogCallback, LogSink};
use crate::smoothing::SmoothingCache;
use crate::state::{ConnectionState, PlaybackSnapshot, RawPlaybackState};

/// `OnTrackChanged(track_id)`, invoked from the monitor thread.
pub type TrackChangedCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Builds a fresh, unconnected session for each connection attempt.
pub type SessionFactory = Arc<dyn Fn(&DriverConfig) -> Box<dyn PlayerSession> + Send + Sync>;

struct DriverState {
    session: Option<Box<dyn PlayerSession>>,
    snapshot: PlaybackSnapshot,
    cache: SmoothingCache,
    /// Last track id handed to the callback.
    announced_track: Option<String>,
    on_track_changed: Option<TrackChangedCallback>,
    /// Port of the last successful connect, reused by reconnects.
    port: Option<u16>,
}

struct Monitor {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

enum PollOutcome {
    NoSession,
    Updated {
        announce: Option<(String, Option<TrackChangedCallback>)>,
    },
    Failed(NeteaseError),
    Lost(NeteaseError),
}

enum Tick {
    Continue,
    Backoff,
}

struct DriverInner {
    config: DriverConfig,
    factory: SessionFactory,
    state: Mutex<DriverState>,
    lifecycle: Mutex<()>,
    monitor: Mutex<Option<Monitor>>,
    log: LogSink,
}

impl DriverInner {
    fn lock_state(&self) -> MutexGuard<'_, DriverState> {
        self.state.lock().expect("Driver state mutex poisoned")
    }

    fn is_connected(&self) -> bool {
        self.lock_state()
            .session
            .as_ref()
            .is_some_and(|s| s.is_connected())
    }

    /// Opens and installs a new session. The caller holds `lifecycle`; the
    /// remembered port is left to it.
    fn establish(&self, port: u16) -> Result<(), NeteaseError> {
        self.log
            .info(format!("Connecting to NetEase Cloud Music on port {port}"));

        let mut session = (self.factory)(&self.config);
        if let Err(err) = session.connect(port) {
            self.log.error(format!(
                "Connection failed: {err} (is the client running with --remote-debugging-port={port}?)"
            ));
            return Err(err);
        }

        if let Err(err) = session.register_listener() {
            self.log
                .warn(format!("Progress listener registration failed: {err}"));
            if !session.is_connected() {
                return Err(err);
            }
        }

        let previous = self.lock_state().session.replace(session);
        if let Some(mut previous) = previous {
            previous.disconnect();
        }
        Ok(())
    }

    /// Starts the monitor unless it is already running. Returns whether a
    /// thread was spawned.
    fn ensure_monitor(self: &Arc<Self>) -> Result<bool, NeteaseError> {
        let mut monitor = self.monitor.lock().expect("Monitor mutex poisoned");
        if monitor.as_ref().is_some_and(|m| !m.handle.is_finished()) {
            return Ok(false);
        }

        let (stop, stop_rx) = crossbeam_channel::bounded(1);
        let inner = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("netease-monitor".to_string())
            .spawn(move || inner.monitor_loop(stop_rx))
            .map_err(NeteaseError::MonitorSpawn)?;

        *monitor = Some(Monitor { stop, handle });
        Ok(true)
    }

    fn stop_monitor(&self) {
        let monitor = self.monitor.lock().expect("Monitor mutex poisoned").take();
        let Some(Monitor { stop, handle }) = monitor else {
            return;
        };

        let _ = stop.send(());
        // Called from a callback on the monitor thread itself: it will see
        // the stop signal once the callback returns.
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            self.log.error("Monitor thread panicked");
        }
    }

    fn shutdown(&self) {
        let _guard = self
            .lifecycle
            .lock()
            .expect("Driver lifecycle mutex poisoned");
        self.stop_monitor();

        let session = {
            let mut state = self.lock_state();
            state.snapshot = state.cache.fallback();
            state.session.take()
        };
        if let Some(mut session) = session {
            session.disconnect();
            self.log.info("Disconnected from NetEase Cloud Music");
        }
    }

    fn monitor_loop(&self, stop: Receiver<()>) {
        debug!("Monitor thread started");
        let mut wait = self.config.poll_interval;
        loop {
            match stop.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
            wait = match self.monitor_tick() {
                Tick::Continue => self.config.poll_interval,
                Tick::Backoff => self.config.reconnect_backoff,
            };
        }
        debug!("Monitor thread exiting");
    }

    fn monitor_tick(&self) -> Tick {
        if !self.is_connected() {
            return self.reconnect();
        }

        match self.poll_once() {
            PollOutcome::Updated {
                announce: Some((track_id, callback)),
            } => {
                self.log.info(format!("Track changed: {track_id}"));
                if let Some(callback) = callback {
                    // A panicking callback must not take the monitor down.
                    let dispatched =
                        panic::catch_unwind(AssertUnwindSafe(|| callback(&track_id)));
                    if let Err(payload) = dispatched {
                        self.log.error(format!(
                            "Track change callback panicked: {}",
                            panic_message(payload.as_ref())
                        ));
                    }
                }
            }
            PollOutcome::Updated { announce: None } | PollOutcome::NoSession => {}
            PollOutcome::Failed(err) => debug!(error = %err, "Progress poll failed"),
            PollOutcome::Lost(err) => self.log.warn(format!("Connection lost: {err}")),
        }
        Tick::Continue
    }

    fn reconnect(&self) -> Tick {
        // Someone else is connecting or disconnecting; look again next tick.
        let Ok(_guard) = self.lifecycle.try_lock() else {
            return Tick::Continue;
        };
        if self.is_connected() {
            return Tick::Continue;
        }

        let port = self.lock_state().port.unwrap_or(self.config.port);
        self.log
            .warn("Not connected to NetEase Cloud Music, trying to reconnect");
        match self.establish(port) {
            Ok(()) => {
                self.log.info("Reconnected to NetEase Cloud Music");
                Tick::Continue
            }
            Err(_) => Tick::Backoff,
        }
    }

    /// One poll, folded into the snapshot under the state lock.
    fn poll_once(&self) -> PollOutcome {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        let Some(session) = state.session.as_mut() else {
            return PollOutcome::NoSession;
        };

        match session.poll_progress() {
            Ok(sample) => {
                state.snapshot =
                    state
                        .cache
                        .observe(&sample, Instant::now(), &self.config.smoothing());

                let announce = match sample.track_id {
                    Some(id) if state.announced_track.as_deref() != Some(id.as_str()) => {
                        state.announced_track = Some(id.clone());
                        Some((id, state.on_track_changed.clone()))
                    }
                    _ => None,
                };
                PollOutcome::Updated { announce }
            }
            Err(err) => {
                state.snapshot = state.cache.fallback();
                if err.is_connection_lost() || !session.is_connected() {
                    if let Some(mut session) = state.session.take() {
                        session.disconnect();
                    }
                    PollOutcome::Lost(err)
                } else {
                    PollOutcome::Failed(err)
                }
            }
        }
    }
}

/// Watches the NetEase client and publishes its playback state.
///
/// Construct one per embedder and share it by reference; every method is
/// callable from any thread. Dropping the driver disconnects it.
///
/// ```no_run
/// use pmonetease::{DriverConfig, NeteaseDriver};
///
/// let driver = NeteaseDriver::builder()
///     .config(DriverConfig::default())
///     .on_track_changed(|id| println!("now playing {id}"))
///     .build();
///
/// if driver.connect(9222) {
///     let state = driver.state();
///     println!("{:.1}/{:.1}s playing={}", state.current_progress, state.total_duration, state.is_playing);
/// }
/// ```
pub struct NeteaseDriver {
    inner: Arc<DriverInner>,
}

impl std::fmt::Debug for NeteaseDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeteaseDriver")
            .field("config", &self.inner.config)
            .field("connection", &self.connection_state())
            .field("monitoring", &self.is_monitoring())
            .finish()
    }
}

impl NeteaseDriver {
    pub fn new(config: DriverConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> NeteaseDriverBuilder {
        NeteaseDriverBuilder::default()
    }

    pub fn config(&self) -> &DriverConfig {
        &self.inner.config
    }

    /// Connects to the client listening on `port`.
    ///
    /// Already connected: the session is kept and only a dead monitor is
    /// restarted. On success the progress listener is registered (a rejection
    /// is only logged), the monitor thread is started if it is not running
    /// and `port` becomes the reconnect target. On failure nothing changes.
    pub fn connect(&self, port: u16) -> bool {
        self.try_connect(port).is_ok()
    }

    /// [`connect`](Self::connect), with the failure reason.
    pub fn try_connect(&self, port: u16) -> Result<(), NeteaseError> {
        let inner = &self.inner;
        let _guard = inner
            .lifecycle
            .lock()
            .expect("Driver lifecycle mutex poisoned");

        let fresh = !inner.is_connected();
        if fresh {
            inner.establish(port)?;
        }

        // Also revives a monitor that died while the session stayed open.
        match inner.ensure_monitor() {
            Ok(started) => {
                if fresh {
                    inner.lock_state().port = Some(port);
                    inner.log.info(if started {
                        "Connected, monitor started"
                    } else {
                        "Connected, monitor already running"
                    });
                } else if started {
                    inner.log.warn("Monitor was not running, restarted");
                }
                Ok(())
            }
            Err(err) => {
                inner.log.error(err.to_string());
                if fresh {
                    let session = inner.lock_state().session.take();
                    if let Some(mut session) = session {
                        session.disconnect();
                    }
                }
                Err(err)
            }
        }
    }

    /// Stops the monitor, waits for it and closes the session. The snapshot
    /// keeps the cached values with `is_playing = false`.
    ///
    /// Idempotent and callable from any thread.
    pub fn disconnect(&self) {
        self.inner.shutdown();
    }

    pub fn connection_state(&self) -> ConnectionState {
        if self.inner.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner
            .monitor
            .lock()
            .expect("Monitor mutex poisoned")
            .as_ref()
            .is_some_and(|m| !m.handle.is_finished())
    }

    /// Port of the last successful connection.
    pub fn port(&self) -> Option<u16> {
        self.inner.lock_state().port
    }

    /// Latest published playback state.
    pub fn state(&self) -> PlaybackSnapshot {
        self.inner.lock_state().snapshot.clone()
    }

    pub fn raw_state(&self) -> RawPlaybackState {
        self.inner.lock_state().snapshot.to_raw()
    }

    /// Replaces the track change callback; `None` removes it.
    pub fn set_track_changed_callback(&self, callback: Option<TrackChangedCallback>) {
        self.inner.lock_state().on_track_changed = callback;
    }

    /// Replaces the log callback; `None` removes it.
    pub fn set_log_callback(&self, callback: Option<LogCallback>) {
        self.inner.log.set_callback(callback);
    }
}

impl Drop for NeteaseDriver {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

fn default_factory() -> SessionFactory {
    Arc::new(|config: &DriverConfig| {
        Box::new(NeteaseClient::new(config.client_options())) as Box<dyn PlayerSession>
    })
}

#[derive(Default)]
pub struct NeteaseDriverBuilder {
    config: DriverConfig,
    factory: Option<SessionFactory>,
    on_log: Option<LogCallback>,
    on_track_changed: Option<TrackChangedCallback>,
}

impl NeteaseDriverBuilder {
    pub fn config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the [`NeteaseClient`] sessions.
    pub fn session_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&DriverConfig) -> Box<dyn PlayerSession> + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    pub fn on_log<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.on_log = Some(Arc::new(callback));
        self
    }

    pub fn on_track_changed<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_track_changed = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> NeteaseDriver {
        let state = DriverState {
            session: None,
            snapshot: PlaybackSnapshot::default(),
            cache: SmoothingCache::default(),
            announced_track: None,
            on_track_changed: self.on_track_changed,
            port: None,
        };
        NeteaseDriver {
            inner: Arc::new(DriverInner {
                config: self.config,
                factory: self.factory.unwrap_or_else(default_factory),
                state: Mutex::new(state),
                lifecycle: Mutex::new(()),
                monitor: Mutex::new(None),
                log: LogSink::new(self.on_log),
            }),
        }
    }
}
