// ── Connection manager ──
//
// Keeps at most one live transport to the queue server (a status
// WebSocket or an HTTP poll loop) and derives the connection state from
// it on a fixed health-check period. The state is level-triggered: every
// tick recomputes it from the session bookkeeping, so a missed transition
// is corrected on the next tick.
//
// Bookkeeping lives in `Session` behind a mutex. Every write to the
// observable state and to the status bus happens on the event loop.
// Async results carry the session epoch they were started under and are
// dropped once the epoch has moved on (stop, restart, reconnect or an
// aborted attempt).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use qserver_api::{RunEngineService, StatusSnapshot, StatusSocket, StatusWsMessage};
use strum::Display;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::CoreError;
use crate::event_loop::EventLoop;
use crate::lifecycle::Resettable;
use crate::observable::Observable;
use crate::plans_cache::PlansCache;
use crate::scheduler::{PollCenter, TaskHandle};
use crate::status_bus::StatusBus;

/// Health of the link to the queue server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// Not trying to connect.
    Disconnected,
    /// Attempt in progress, or connected without a first status.
    Connecting,
    /// Connected with fresh status.
    Connected,
    /// Connected, but status has gone stale.
    NoStatus,
    /// Attempt failed, timed out, or the transport dropped.
    NetworkError,
}

impl ConnectionState {
    /// Whether entering this state invalidates the published status.
    fn clears_status(self) -> bool {
        matches!(self, Self::Disconnected | Self::NetworkError | Self::NoStatus)
    }
}

// ── Session bookkeeping ──────────────────────────────────────────────

#[derive(Default)]
struct Session {
    auto_connect: bool,
    epoch: u64,
    latest_status: Option<Arc<StatusSnapshot>>,
    last_status_at: Option<Instant>,
    attempt_started: Option<Instant>,
    connected_at: Option<Instant>,
    last_poll_failed: bool,
    reconnect_attempts: u32,
    socket: Option<Arc<dyn StatusSocket>>,
    attempt_task: Option<TaskHandle>,
    poll_task: Option<TaskHandle>,
    reconnect_task: Option<TaskHandle>,
    health_task: Option<TaskHandle>,
}

impl Session {
    fn clear_status(&mut self) {
        self.latest_status = None;
        self.last_status_at = None;
        self.attempt_started = None;
        self.connected_at = None;
        self.last_poll_failed = false;
    }

    fn cancel_tasks(&mut self) {
        for task in [
            self.attempt_task.take(),
            self.poll_task.take(),
            self.reconnect_task.take(),
            self.health_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }
}

// ── ConnectionManager ────────────────────────────────────────────────

/// Owner of the transport to the queue server.
///
/// Cheap to clone; clones share one session. `start` and `stop` never
/// fail: transport errors are logged and surface as
/// [`ConnectionState::NetworkError`].
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: ConnectionConfig,
    service: Arc<dyn RunEngineService>,
    event_loop: EventLoop,
    poll_center: PollCenter,
    status_bus: StatusBus,
    plans: PlansCache,
    state: Observable<ConnectionState>,
    session: Mutex<Session>,
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionConfig,
        service: Arc<dyn RunEngineService>,
        event_loop: EventLoop,
        poll_center: PollCenter,
        status_bus: StatusBus,
        plans: PlansCache,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                service,
                event_loop,
                poll_center,
                status_bus,
                plans,
                state: Observable::new(ConnectionState::Disconnected),
                session: Mutex::new(Session::default()),
            }),
        }
    }

    /// Begin connecting. Calling it again while already started is a no-op.
    pub fn start(&self) {
        let inner = &self.inner;
        let mut session = inner.lock_session();
        if session.auto_connect {
            debug!("connection manager already started");
            return;
        }

        session.auto_connect = true;
        session.epoch += 1;
        session.clear_status();
        session.reconnect_attempts = 0;

        if inner.config.use_websockets {
            info!("starting connection manager (websocket)");
            inner.open_socket(&mut session);
        } else {
            info!(
                interval_ms = inner.config.update_interval.as_millis(),
                "starting connection manager (polling)"
            );
            inner.start_polling(&mut session);
        }

        if session.health_task.is_none() {
            session.health_task = Some(inner.spawn_health_check());
        }
    }

    /// Tear the connection down and publish `Disconnected`. Safe to call
    /// repeatedly.
    pub fn stop(&self) {
        let inner = &self.inner;
        {
            let mut session = inner.lock_session();
            if session.auto_connect {
                info!("stopping connection manager");
            }
            session.auto_connect = false;
            session.epoch += 1;
            session.cancel_tasks();
            if let Some(socket) = session.socket.take() {
                socket.disconnect();
            }
            session.clear_status();
        }

        let publisher = Arc::clone(inner);
        inner.event_loop.run_or_defer(move || {
            if !publisher.lock_session().auto_connect {
                publisher.status_bus.push(None);
            }
            publisher.refresh_state();
        });
    }

    /// Same as [`stop`](Self::stop); the name used by the lifecycle.
    pub fn shutdown(&self) {
        self.stop();
    }

    /// The observable connection state.
    pub fn state(&self) -> &Observable<ConnectionState> {
        &self.inner.state
    }

    pub fn current_state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    /// `start` has been called without a matching `stop`.
    pub fn is_auto_connect(&self) -> bool {
        self.inner.lock_session().auto_connect
    }

    /// Last status received in this session, if still considered current.
    pub fn latest_status(&self) -> Option<Arc<StatusSnapshot>> {
        self.inner.lock_session().latest_status.clone()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock_session().reconnect_attempts
    }
}

impl Resettable for ConnectionManager {
    fn name(&self) -> &str {
        "connection manager"
    }

    fn reset(&self) -> Result<(), CoreError> {
        self.shutdown();
        Ok(())
    }
}

impl ManagerInner {
    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── WebSocket transport ──────────────────────────────────────────

    fn open_socket(self: &Arc<Self>, session: &mut Session) {
        session.epoch += 1;
        let epoch = session.epoch;

        if let Some(task) = session.attempt_task.take() {
            task.abort();
        }
        if let Some(old) = session.socket.take() {
            old.disconnect();
        }

        let socket = match self.service.create_status_websocket() {
            Ok(socket) => socket,
            Err(e) => {
                warn!(error = %e, "cannot create status socket");
                session.attempt_started = None;
                return;
            }
        };

        let weak = Arc::downgrade(self);
        socket.add_listener(Arc::new(move |text: &str| {
            if let Some(inner) = weak.upgrade() {
                inner.on_socket_message(epoch, text);
            }
        }));

        session.socket = Some(Arc::clone(&socket));
        session.attempt_started = Some(Instant::now());
        session.connected_at = None;

        let weak = Arc::downgrade(self);
        session.attempt_task = Some(self.poll_center.submit(move || async move {
            let result = socket.connect().await;
            if let Some(inner) = weak.upgrade() {
                inner.on_connect_result(epoch, &socket, result);
            }
        }));
        debug!(epoch, "status socket connect attempt started");
    }

    fn on_connect_result(
        self: &Arc<Self>,
        epoch: u64,
        socket: &Arc<dyn StatusSocket>,
        result: Result<(), qserver_api::Error>,
    ) {
        let mut session = self.lock_session();
        if session.epoch != epoch || !session.auto_connect {
            debug!(epoch, "ignoring stale connect result");
            if result.is_ok() {
                socket.disconnect();
            }
            return;
        }

        session.attempt_started = None;
        session.attempt_task = None;
        match result {
            Ok(()) => {
                info!(
                    after_attempts = session.reconnect_attempts,
                    "status socket connected"
                );
                session.reconnect_attempts = 0;
                session.connected_at = Some(Instant::now());
            }
            Err(e) => {
                warn!(error = %e, "status socket connect failed");
                self.schedule_reconnect(&mut session);
            }
        }
    }

    fn on_socket_message(self: &Arc<Self>, epoch: u64, text: &str) {
        match StatusWsMessage::parse(text) {
            Ok(status) => {
                let inner = Arc::clone(self);
                self.event_loop
                    .run_later(move || inner.apply_status(epoch, status));
            }
            Err(e) => debug!(error = %e, "dropping malformed status frame"),
        }
    }

    /// Record a status pushed over the socket. Event loop only.
    fn apply_status(&self, epoch: u64, status: StatusSnapshot) {
        let status = Arc::new(status);
        {
            let mut session = self.lock_session();
            if session.epoch != epoch || !session.auto_connect {
                return;
            }
            session.latest_status = Some(Arc::clone(&status));
            session.last_status_at = Some(Instant::now());
        }
        debug!(manager_state = %status.manager_state, "status received");
        self.status_bus.push(Some(status));
    }

    fn schedule_reconnect(self: &Arc<Self>, session: &mut Session) {
        if !session.auto_connect
            || session.reconnect_task.is_some()
            || session.attempt_started.is_some()
        {
            return;
        }

        let epoch = session.epoch;
        let delay = self.config.reconnect_delay;
        info!(
            delay_ms = delay.as_millis(),
            attempts = session.reconnect_attempts,
            "scheduling status socket reconnect"
        );

        let weak = Arc::downgrade(self);
        session.reconnect_task = Some(self.poll_center.after(delay, move || async move {
            if let Some(inner) = weak.upgrade() {
                inner.reconnect(epoch);
            }
        }));
    }

    fn reconnect(self: &Arc<Self>, epoch: u64) {
        let mut session = self.lock_session();
        if session.epoch != epoch || !session.auto_connect {
            debug!(epoch, "skipping stale reconnect");
            return;
        }
        session.reconnect_task = None;
        session.reconnect_attempts += 1;
        info!(attempt = session.reconnect_attempts, "reconnecting status socket");
        self.open_socket(&mut session);
    }

    /// Give up on the in-flight attempt and drop its socket.
    fn abort_attempt(&self, session: &mut Session) {
        session.epoch += 1;
        session.attempt_started = None;
        session.connected_at = None;
        if let Some(task) = session.attempt_task.take() {
            task.abort();
        }
        if let Some(socket) = session.socket.take() {
            socket.disconnect();
        }
    }

    // ── HTTP polling transport ───────────────────────────────────────

    fn start_polling(self: &Arc<Self>, session: &mut Session) {
        let epoch = session.epoch;
        session.attempt_started = Some(Instant::now());

        let weak = Arc::downgrade(self);
        session.poll_task = Some(self.poll_center.every(self.config.update_interval, move || {
            let weak = Weak::clone(&weak);
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.poll_once(epoch).await;
                }
            }
        }));
    }

    async fn poll_once(self: Arc<Self>, epoch: u64) {
        let result = self.service.status().await;
        let inner = Arc::clone(&self);
        self.event_loop
            .run_later(move || inner.apply_poll(epoch, result));
    }

    /// Record the outcome of one poll. Event loop only.
    fn apply_poll(&self, epoch: u64, result: Result<StatusSnapshot, qserver_api::Error>) {
        let status = {
            let mut session = self.lock_session();
            if session.epoch != epoch || !session.auto_connect {
                return;
            }
            match result {
                Ok(status) => {
                    let status = Arc::new(status);
                    session.latest_status = Some(Arc::clone(&status));
                    session.last_status_at = Some(Instant::now());
                    session.attempt_started = None;
                    session.last_poll_failed = false;
                    status
                }
                Err(e) => {
                    if session.last_poll_failed {
                        debug!(error = %e, "status poll failed again");
                    } else {
                        warn!(error = %e, "status poll failed");
                    }
                    session.last_poll_failed = true;
                    return;
                }
            }
        };
        self.status_bus.push(Some(status));
    }

    // ── Health check ─────────────────────────────────────────────────

    fn spawn_health_check(self: &Arc<Self>) -> TaskHandle {
        let weak = Arc::downgrade(self);
        self.poll_center.every(self.config.health_interval, move || {
            if let Some(inner) = weak.upgrade() {
                let event_loop = inner.event_loop.clone();
                event_loop.run_later(move || inner.refresh_state());
            }
            std::future::ready(())
        })
    }

    /// Recompute the state and apply the side effects of a change.
    /// Event loop only.
    fn refresh_state(self: &Arc<Self>) {
        let current = self.state.get();
        let next = {
            let mut session = self.lock_session();
            let next = self.evaluate(&mut session, Instant::now());
            if next == current {
                return;
            }
            if next.clears_status() {
                session.latest_status = None;
            }
            next
        };

        info!(from = %current, to = %next, "connection state changed");
        self.state.set(next);

        if next.clears_status() {
            self.status_bus.push(None);
        } else if next == ConnectionState::Connected {
            self.plans.load_if_needed();
        }
    }

    fn evaluate(self: &Arc<Self>, session: &mut Session, now: Instant) -> ConnectionState {
        if !session.auto_connect {
            return ConnectionState::Disconnected;
        }
        if self.config.use_websockets {
            self.evaluate_socket(session, now)
        } else {
            self.evaluate_polling(session, now)
        }
    }

    fn evaluate_socket(self: &Arc<Self>, session: &mut Session, now: Instant) -> ConnectionState {
        if let Some(started) = session.attempt_started {
            if now.duration_since(started) < self.config.attempt_timeout {
                return ConnectionState::Connecting;
            }
            warn!(
                timeout_ms = self.config.attempt_timeout.as_millis(),
                "status socket connect attempt timed out"
            );
            self.abort_attempt(session);
            self.schedule_reconnect(session);
            return ConnectionState::NetworkError;
        }

        let connected = session
            .socket
            .as_ref()
            .is_some_and(|socket| socket.is_connected());
        if !connected {
            self.schedule_reconnect(session);
            return ConnectionState::NetworkError;
        }

        // A socket that connects but never delivers a status is treated
        // like an attempt that never completed.
        if let Some(connected_at) = session.connected_at {
            let silent = session.last_status_at.is_none_or(|at| at < connected_at);
            if silent && now.duration_since(connected_at) >= self.config.attempt_timeout {
                warn!(
                    timeout_ms = self.config.attempt_timeout.as_millis(),
                    "status socket connected but sent no status"
                );
                self.abort_attempt(session);
                self.schedule_reconnect(session);
                return ConnectionState::NetworkError;
            }
        }

        self.freshness(session, now)
    }

    fn evaluate_polling(&self, session: &Session, now: Instant) -> ConnectionState {
        if session.last_poll_failed {
            return ConnectionState::NetworkError;
        }
        if session.last_status_at.is_some() {
            return self.freshness(session, now);
        }
        match session.attempt_started {
            Some(started) if now.duration_since(started) < self.config.attempt_timeout => {
                ConnectionState::Connecting
            }
            _ => ConnectionState::NetworkError,
        }
    }

    /// State of a live transport, judged by the age of the last status.
    fn freshness(&self, session: &Session, now: Instant) -> ConnectionState {
        match session.last_status_at {
            None => ConnectionState::Connecting,
            Some(at) if now.duration_since(at) > self.config.status_timeout => ConnectionState::NoStatus,
            Some(_) => ConnectionState::Connected,
        }
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        let session = self
            .session
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        session.cancel_tasks();
        if let Some(socket) = session.socket.take() {
            socket.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names_are_screaming_snake_case() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "DISCONNECTED");
        assert_eq!(ConnectionState::NoStatus.to_string(), "NO_STATUS");
        assert_eq!(ConnectionState::NetworkError.to_string(), "NETWORK_ERROR");
    }

    #[test]
    fn only_healthy_states_keep_status() {
        assert!(ConnectionState::Disconnected.clears_status());
        assert!(ConnectionState::NoStatus.clears_status());
        assert!(ConnectionState::NetworkError.clears_status());
        assert!(!ConnectionState::Connecting.clears_status());
        assert!(!ConnectionState::Connected.clears_status());
    }
}
