//! In-memory tunnel for session and client tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::DriftError;
use crate::protocol::Instruction;
use crate::tunnel::{Tunnel, TunnelState};

/// Records every send and replays whatever the test pushes as inbound
/// traffic. `receive` waits until something is pushed.
pub(crate) struct MockTunnel {
    state: parking_lot::Mutex<TunnelState>,
    inbound_tx: mpsc::UnboundedSender<Instruction>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Instruction>>,
    sent: parking_lot::Mutex<Vec<Instruction>>,
    writes: AtomicUsize,
}

impl MockTunnel {
    pub(crate) fn new() -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            state: parking_lot::Mutex::new(TunnelState::Open),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            sent: parking_lot::Mutex::new(Vec::new()),
            writes: AtomicUsize::new(0),
        })
    }

    /// Queue an instruction as if the peer had sent it.
    pub(crate) fn push(&self, instruction: Instruction) {
        let _ = self.inbound_tx.send(instruction);
    }

    pub(crate) fn sent(&self) -> Vec<Instruction> {
        self.sent.lock().clone()
    }

    pub(crate) fn sent_opcodes(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|i| i.opcode().to_string())
            .collect()
    }

    /// Number of `send` calls that reached the tunnel.
    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub(crate) fn clear(&self) {
        self.sent.lock().clear();
        self.writes.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl Tunnel for MockTunnel {
    async fn connect(&self, _data: &str) -> Result<(), DriftError> {
        *self.state.lock() = TunnelState::Open;
        Ok(())
    }

    async fn disconnect(&self) {
        *self.state.lock() = TunnelState::Closed;
    }

    async fn send(&self, instructions: &[Instruction]) -> Result<(), DriftError> {
        if !self.is_open() {
            return Err(DriftError::NotConnected);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().extend_from_slice(instructions);
        Ok(())
    }

    async fn receive(&self) -> Result<Instruction, DriftError> {
        if !self.is_open() {
            return Err(DriftError::NotConnected);
        }
        self.inbound_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(DriftError::ConnectionClosed)
    }

    fn state(&self) -> TunnelState {
        *self.state.lock()
    }
}
