//! Connection lifecycle: handshake, keepalive and inbound delivery.
//!
//! A [`Session`] owns one [`Tunnel`]. A background reader task answers
//! the handshake, then forwards every instruction received while the
//! session is active to an inbound queue drained with
//! [`recv`](Session::recv). A second task sends `nop` keepalives once
//! the server declares the connection ready.
//!
//! ```text
//!  Closed ──select──► Handshaking ──ready──► Active
//!                         │                    │
//!                         └──error / EOF / disconnect / terminate──► Closed
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use crate::config::SessionConfig;
use crate::error::DriftError;
use crate::protocol::Instruction;
use crate::protocol::opcode::{
    ARGS, AUDIO, BLOB, CONNECT, DISCONNECT, ERROR, IMAGE, NOP, READY, SELECT, SIZE, VIDEO,
};
use crate::tunnel::{SocketTunnel, Tunnel};

/// Capacity of the inbound instruction queue.
pub const INBOUND_CAPACITY: usize = 100;

// ── SessionState ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Not connected. Terminal once left.
    #[default]
    Closed,
    /// `select` sent, waiting for `args` and then `ready`.
    Handshaking,
    /// Handshake complete; drawing traffic flows.
    Active,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Handshaking => write!(f, "Handshaking"),
            Self::Active => write!(f, "Active"),
        }
    }
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

// ── Shared ───────────────────────────────────────────────────────

/// State shared between the handle and its background tasks.
struct Shared {
    tunnel: Arc<dyn Tunnel>,
    config: SessionConfig,
    state: watch::Sender<SessionState>,
    id: OnceLock<String>,
    cancel: CancellationToken,
    terminated: AtomicBool,
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    /// Send without the state check.
    async fn send_raw(&self, instructions: &[Instruction]) -> Result<(), DriftError> {
        for instruction in instructions {
            debug!("C> {instruction}");
        }
        self.tunnel.send(instructions).await
    }

    async fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_state(SessionState::Closed);
        self.cancel.cancel();
        if let Err(e) = self.send_raw(&[Instruction::bare(DISCONNECT)]).await {
            trace!("disconnect not delivered: {e}");
        }
        self.tunnel.disconnect().await;
        info!("session terminated");
    }
}

// ── Session ──────────────────────────────────────────────────────

/// A negotiated connection to the proxy.
///
/// Dropping the session stops its background tasks; call
/// [`terminate`](Self::terminate) to also tell the server.
pub struct Session {
    shared: Arc<Shared>,
    inbound: tokio::sync::Mutex<mpsc::Receiver<Instruction>>,
}

impl Session {
    /// Dial `config.address` and start the handshake.
    pub async fn connect(config: SessionConfig) -> Result<Self, DriftError> {
        let tunnel = SocketTunnel::new(config.address.clone(), config.connect_timeout());
        if let Err(e) = tunnel.connect("").await {
            error!(address = %config.address, "connect failed: {e}");
            return Err(e);
        }
        Self::start(Arc::new(tunnel), config).await
    }

    /// Start the handshake over an already-open tunnel.
    pub async fn start(tunnel: Arc<dyn Tunnel>, config: SessionConfig) -> Result<Self, DriftError> {
        info!(
            protocol = %config.protocol,
            address = %config.address,
            "initiating session"
        );
        let (state, _) = watch::channel(SessionState::Closed);
        let shared = Arc::new(Shared {
            tunnel,
            config,
            state,
            id: OnceLock::new(),
            cancel: CancellationToken::new(),
            terminated: AtomicBool::new(false),
        });

        let select = Instruction::new(SELECT, [shared.config.protocol.as_str()]);
        if let Err(e) = shared.send_raw(&[select]).await {
            error!("failed sending select: {e}");
            return Err(e);
        }
        shared.set_state(SessionState::Handshaking);

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let span = info_span!("session", protocol = %shared.config.protocol);
        tokio::spawn(read_loop(Arc::clone(&shared), inbound_tx).instrument(span));

        Ok(Self {
            shared,
            inbound: tokio::sync::Mutex::new(inbound_rx),
        })
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// A receiver that observes every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Wait until the session reaches `target`. Fails with
    /// `ConnectionClosed` if the session closes first.
    pub async fn wait_for_state(
        &self,
        target: SessionState,
        timeout: Duration,
    ) -> Result<(), DriftError> {
        let mut states = self.subscribe_state();
        let reached = async {
            states
                .wait_for(|state| *state == target || state.is_closed())
                .await
                .map(|state| *state)
        };
        match tokio::time::timeout(timeout, reached).await {
            Err(_) => Err(DriftError::Timeout(timeout)),
            Ok(Err(_)) => Err(DriftError::ChannelClosed),
            Ok(Ok(state)) if state == target => Ok(()),
            Ok(Ok(_)) => Err(DriftError::ConnectionClosed),
        }
    }

    /// Connection id announced by the server; empty until `ready`.
    pub fn id(&self) -> &str {
        self.shared.id.get().map(String::as_str).unwrap_or_default()
    }

    pub fn protocol(&self) -> &str {
        &self.shared.config.protocol
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Send instructions as one transaction. Refused unless active.
    pub async fn send(&self, instructions: &[Instruction]) -> Result<(), DriftError> {
        if !self.state().is_active() {
            return Err(DriftError::NotConnected);
        }
        self.shared.send_raw(instructions).await
    }

    /// Next instruction from the server. `None` once the session is over
    /// and the queue is drained.
    pub async fn recv(&self) -> Option<Instruction> {
        self.inbound.lock().await.recv().await
    }

    /// An already queued instruction, without waiting.
    pub fn try_recv(&self) -> Option<Instruction> {
        self.inbound.try_lock().ok()?.try_recv().ok()
    }

    /// Close the session and the tunnel. Later calls do nothing.
    pub async fn terminate(&self) {
        self.shared.terminate().await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("protocol", &self.shared.config.protocol)
            .field("state", &self.state())
            .field("id", &self.id())
            .finish()
    }
}

// ── Background tasks ─────────────────────────────────────────────

async fn read_loop(shared: Arc<Shared>, inbound: mpsc::Sender<Instruction>) {
    loop {
        let received = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            received = shared.tunnel.receive() => received,
        };
        let instruction = match received {
            Ok(instruction) => instruction,
            Err(e) => {
                warn!("disconnecting from server: {e}");
                shared.terminate().await;
                break;
            }
        };

        if instruction.opcode() == BLOB {
            trace!("S> {instruction}");
        } else {
            debug!("S> {instruction}");
        }

        match (instruction.opcode(), shared.state()) {
            (NOP, _) => {}
            (DISCONNECT, _) => {
                info!("server closed the session");
                shared.terminate().await;
                break;
            }
            (READY, SessionState::Handshaking) => {
                let id = instruction.arg(0).unwrap_or_default().to_string();
                info!(id = %id, "handshake complete");
                let _ = shared.id.set(id);
                shared.set_state(SessionState::Active);
                tokio::spawn(keepalive(Arc::clone(&shared)).in_current_span());
            }
            (READY, state) => warn!(%state, "unexpected ready, dropped"),
            (ARGS, SessionState::Handshaking) => {
                let reply = handshake_reply(&shared.config, instruction.args());
                if let Err(e) = shared.send_raw(&reply).await {
                    error!("handshake failed: {e}");
                    shared.terminate().await;
                    break;
                }
            }
            (ERROR, SessionState::Handshaking) => {
                error!(
                    reason = instruction.arg(0).unwrap_or_default(),
                    status = instruction.arg(1).unwrap_or_default(),
                    "server refused the handshake"
                );
                shared.terminate().await;
                break;
            }
            (_, SessionState::Handshaking) => {
                warn!("unexpected instruction during handshake, dropped: {instruction}");
            }
            (_, SessionState::Active) => {
                tokio::select! {
                    _ = shared.cancel.cancelled() => break,
                    sent = inbound.send(instruction) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            (_, SessionState::Closed) => warn!("out of order instruction, dropped: {instruction}"),
        }
    }
    trace!("reader stopped");
}

async fn keepalive(shared: Arc<Shared>) {
    let period = shared.config.keepalive_interval();
    if period.is_zero() {
        debug!("keepalive disabled");
        return;
    }
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = shared.send_raw(&[Instruction::bare(NOP)]).await {
                    error!("keepalive failed: {e}");
                }
            }
        }
    }
}

/// `size`, `audio`, `video`, `image` and `connect`, answering the
/// parameter names requested by `args` in order.
fn handshake_reply(config: &SessionConfig, requested: &[String]) -> Vec<Instruction> {
    let options = &config.handshake;
    vec![
        Instruction::new(
            SIZE,
            [
                options.width.to_string(),
                options.height.to_string(),
                options.dpi.to_string(),
            ],
        ),
        capabilities(AUDIO, &options.audio),
        capabilities(VIDEO, &options.video),
        capabilities(IMAGE, &options.image),
        Instruction::new(
            CONNECT,
            requested.iter().map(|name| config.parameter_value(name)),
        ),
    ]
}

/// An empty list is sent as a single empty argument.
fn capabilities(opcode: &str, mimetypes: &[String]) -> Instruction {
    if mimetypes.is_empty() {
        Instruction::new(opcode, [""])
    } else {
        Instruction::new(opcode, mimetypes.iter().map(String::as_str))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::mock::MockTunnel;

    const WAIT: Duration = Duration::from_secs(2);

    async fn eventually(check: impl Fn() -> bool) {
        tokio::time::timeout(WAIT, async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    fn config() -> SessionConfig {
        SessionConfig::new("mock", "rdp")
            .with_parameter("hostname", "host1")
            .with_parameter("port", "port1")
    }

    async fn active_session(mock: &Arc<MockTunnel>) -> Session {
        let session = Session::start(mock.clone(), config()).await.unwrap();
        mock.push(Instruction::new("ready", ["$abc"]));
        session
            .wait_for_state(SessionState::Active, WAIT)
            .await
            .unwrap();
        mock.clear();
        session
    }

    #[tokio::test]
    async fn start_sends_select() {
        let mock = MockTunnel::new();
        let session = Session::start(mock.clone(), config()).await.unwrap();

        assert_eq!(session.state(), SessionState::Handshaking);
        assert_eq!(mock.sent(), [Instruction::new("select", ["rdp"])]);
        assert_eq!(session.protocol(), "rdp");
        assert_eq!(session.id(), "");
    }

    #[tokio::test]
    async fn start_fails_on_closed_tunnel() {
        let mock = MockTunnel::new();
        mock.disconnect().await;
        let err = Session::start(mock.clone(), config()).await.unwrap_err();
        assert!(matches!(err, DriftError::NotConnected));
    }

    #[tokio::test]
    async fn args_get_one_atomic_reply() {
        let mock = MockTunnel::new();
        let _session = Session::start(mock.clone(), config()).await.unwrap();

        mock.push(Instruction::new(
            "args",
            ["VERSION_1_1_0", "hostname", "password", "port"],
        ));
        eventually(|| mock.writes() == 2).await;

        assert_eq!(
            mock.sent(),
            [
                Instruction::new("select", ["rdp"]),
                Instruction::new("size", ["1024", "768", "96"]),
                Instruction::new("audio", [""]),
                Instruction::new("video", [""]),
                Instruction::new("image", [""]),
                Instruction::new("connect", ["VERSION_1_1_0", "host1", "", "port1"]),
            ]
        );
    }

    #[tokio::test]
    async fn configured_capabilities_are_advertised() {
        let mock = MockTunnel::new();
        let mut cfg = config();
        cfg.handshake.width = 800;
        cfg.handshake.image = vec!["image/png".into(), "image/jpeg".into()];
        let _session = Session::start(mock.clone(), cfg).await.unwrap();

        mock.push(Instruction::new("args", ["hostname"]));
        eventually(|| mock.writes() == 2).await;

        let sent = mock.sent();
        assert_eq!(sent[1].args(), ["800", "768", "96"]);
        assert_eq!(sent[4].args(), ["image/png", "image/jpeg"]);
    }

    #[tokio::test]
    async fn ready_activates_and_records_id() {
        let mock = MockTunnel::new();
        let session = Session::start(mock.clone(), config()).await.unwrap();
        let mut states = session.subscribe_state();

        mock.push(Instruction::new("ready", ["$unique-connection-id"]));
        session
            .wait_for_state(SessionState::Active, WAIT)
            .await
            .unwrap();

        assert_eq!(session.id(), "$unique-connection-id");
        assert_eq!(*states.borrow_and_update(), SessionState::Active);

        mock.push(Instruction::new("ready", ["$other"]));
        mock.push(Instruction::new("name", ["desk"]));
        let forwarded = tokio::time::timeout(WAIT, session.recv()).await.unwrap();
        assert_eq!(forwarded.unwrap().opcode(), "name");
        assert_eq!(session.id(), "$unique-connection-id");
    }

    #[tokio::test]
    async fn ready_without_id_is_empty() {
        let mock = MockTunnel::new();
        let session = Session::start(mock.clone(), config()).await.unwrap();
        mock.push(Instruction::bare("ready"));
        session
            .wait_for_state(SessionState::Active, WAIT)
            .await
            .unwrap();
        assert_eq!(session.id(), "");
    }

    #[tokio::test]
    async fn handshake_drops_unexpected_instructions() {
        let mock = MockTunnel::new();
        let session = Session::start(mock.clone(), config()).await.unwrap();

        mock.push(Instruction::new("size", ["0", "10", "10"]));
        mock.push(Instruction::bare("nop"));
        mock.push(Instruction::new("ready", ["$id"]));
        session
            .wait_for_state(SessionState::Active, WAIT)
            .await
            .unwrap();

        assert!(session.try_recv().is_none());
        assert_eq!(mock.writes(), 1);
    }

    #[tokio::test]
    async fn active_forwards_in_order_and_swallows_nop() {
        let mock = MockTunnel::new();
        let session = active_session(&mock).await;

        mock.push(Instruction::new("size", ["0", "10", "10"]));
        mock.push(Instruction::bare("nop"));
        mock.push(Instruction::new("sync", ["1"]));

        let first = tokio::time::timeout(WAIT, session.recv()).await.unwrap();
        let second = tokio::time::timeout(WAIT, session.recv()).await.unwrap();
        assert_eq!(first.unwrap().opcode(), "size");
        assert_eq!(second.unwrap().opcode(), "sync");
    }

    #[tokio::test]
    async fn send_is_gated_on_active() {
        let mock = MockTunnel::new();
        let session = Session::start(mock.clone(), config()).await.unwrap();
        mock.clear();

        let err = session.send(&[Instruction::bare("nop")]).await.unwrap_err();
        assert!(matches!(err, DriftError::NotConnected));
        assert_eq!(mock.writes(), 0);

        mock.push(Instruction::new("ready", ["$id"]));
        session
            .wait_for_state(SessionState::Active, WAIT)
            .await
            .unwrap();
        session.send(&[Instruction::bare("nop")]).await.unwrap();
        assert_eq!(mock.writes(), 1);
    }

    #[tokio::test]
    async fn handshake_error_closes() {
        let mock = MockTunnel::new();
        let session = Session::start(mock.clone(), config()).await.unwrap();

        mock.push(Instruction::new("error", ["Aborted. See logs.", "519"]));
        let err = session
            .wait_for_state(SessionState::Active, WAIT)
            .await
            .unwrap_err();

        assert!(matches!(err, DriftError::ConnectionClosed));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(mock.sent_opcodes(), ["select", "disconnect"]);
        assert!(!mock.is_open());
        assert!(session.recv().await.is_none());
    }

    #[tokio::test]
    async fn server_disconnect_closes() {
        let mock = MockTunnel::new();
        let session = active_session(&mock).await;

        mock.push(Instruction::bare("disconnect"));
        eventually(|| session.state().is_closed()).await;
        assert!(!mock.is_open());
    }

    #[tokio::test]
    async fn terminate_is_idempotent() {
        let mock = MockTunnel::new();
        let session = active_session(&mock).await;

        session.terminate().await;
        session.terminate().await;

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(mock.sent_opcodes(), ["disconnect"]);
        let err = session.send(&[Instruction::bare("nop")]).await.unwrap_err();
        assert!(matches!(err, DriftError::NotConnected));
    }

    #[tokio::test]
    async fn keepalive_pings_while_active() {
        let mock = MockTunnel::new();
        let mut cfg = config();
        cfg.keepalive_interval_ms = 20;
        let session = Session::start(mock.clone(), cfg).await.unwrap();
        mock.push(Instruction::bare("ready"));
        session
            .wait_for_state(SessionState::Active, WAIT)
            .await
            .unwrap();

        eventually(|| mock.sent_opcodes().iter().filter(|op| *op == "nop").count() >= 2).await;

        session.terminate().await;
        let settled = mock.writes();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(mock.writes(), settled);
    }

    #[tokio::test]
    async fn wait_for_state_times_out() {
        let mock = MockTunnel::new();
        let session = Session::start(mock.clone(), config()).await.unwrap();
        let err = session
            .wait_for_state(SessionState::Active, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, DriftError::Timeout(_)));
    }

    #[test]
    fn capability_stub_and_list() {
        assert_eq!(capabilities("audio", &[]).args(), [""]);
        let list = ["audio/L16".to_string()];
        assert_eq!(capabilities("audio", &list).args(), ["audio/L16"]);
    }
}
