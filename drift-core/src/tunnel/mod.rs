//! Ordered, reliable instruction transport.
//!
//! A [`Tunnel`] moves whole [`Instruction`]s in both directions. Sends
//! are atomic per call: every instruction passed to one
//! [`send`](Tunnel::send) reaches the wire contiguously, even when several
//! tasks send at once.

use std::fmt;

use async_trait::async_trait;

use crate::error::DriftError;
use crate::protocol::Instruction;

pub mod socket;

#[cfg(test)]
pub(crate) mod mock;

pub use socket::SocketTunnel;

// ── TunnelState ──────────────────────────────────────────────────

/// Lifecycle of a tunnel.
///
/// ```text
///  Closed ──connect──► Open ──disconnect / I/O error──► Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TunnelState {
    #[default]
    Closed,
    Open,
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
        }
    }
}

// ── Tunnel ───────────────────────────────────────────────────────

#[async_trait]
pub trait Tunnel: Send + Sync {
    /// Open the tunnel. `data` is implementation-defined (typically
    /// authentication material); socket tunnels ignore it.
    async fn connect(&self, data: &str) -> Result<(), DriftError>;

    /// Close the tunnel. Closing an already closed tunnel is a no-op.
    async fn disconnect(&self);

    /// Write all `instructions` as one uninterrupted transaction.
    async fn send(&self, instructions: &[Instruction]) -> Result<(), DriftError>;

    /// Wait for the next instruction from the peer.
    async fn receive(&self) -> Result<Instruction, DriftError>;

    fn state(&self) -> TunnelState;

    fn is_open(&self) -> bool {
        self.state() == TunnelState::Open
    }
}
