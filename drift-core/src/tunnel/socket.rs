//! TCP implementation of [`Tunnel`].
//!
//! The stream is split into a `FramedRead` and a `FramedWrite` half, each
//! behind its own async mutex, so a task parked in
//! [`receive`](Tunnel::receive) never holds up senders.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, trace, warn};

use crate::codec::InstructionCodec;
use crate::error::DriftError;
use crate::protocol::Instruction;
use crate::tunnel::{Tunnel, TunnelState};

type Reader = FramedRead<Box<dyn AsyncRead + Send + Unpin>, InstructionCodec>;
type Writer = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, InstructionCodec>;

/// Default bound on the TCP dial.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Instruction tunnel over a byte stream, dialed over TCP by default.
pub struct SocketTunnel {
    address: String,
    connect_timeout: Duration,
    state: parking_lot::Mutex<TunnelState>,
    reader: Mutex<Option<Reader>>,
    writer: Mutex<Option<Writer>>,
    /// Wakes a parked receive when the tunnel is disconnected.
    closing: Notify,
}

impl SocketTunnel {
    /// A closed tunnel that will dial `address` on [`connect`](Tunnel::connect).
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
            state: parking_lot::Mutex::new(TunnelState::Closed),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            closing: Notify::new(),
        }
    }

    /// An open tunnel over an already-connected stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = halves(stream);
        Self {
            address: String::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            state: parking_lot::Mutex::new(TunnelState::Open),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            closing: Notify::new(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn mark_closed(&self) {
        *self.state.lock() = TunnelState::Closed;
    }
}

fn halves<S>(stream: S) -> (Reader, Writer)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let read_half: Box<dyn AsyncRead + Send + Unpin> = Box::new(read_half);
    let write_half: Box<dyn AsyncWrite + Send + Unpin> = Box::new(write_half);
    (
        FramedRead::new(read_half, InstructionCodec::new()),
        FramedWrite::new(write_half, InstructionCodec::new()),
    )
}

#[async_trait]
impl Tunnel for SocketTunnel {
    async fn connect(&self, _data: &str) -> Result<(), DriftError> {
        if self.is_open() {
            return Ok(());
        }

        trace!(address = %self.address, "dialing");
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| DriftError::Timeout(self.connect_timeout))??;
        stream.set_nodelay(true)?;

        let (reader, writer) = halves(stream);
        *self.reader.lock().await = Some(reader);
        *self.writer.lock().await = Some(writer);
        *self.state.lock() = TunnelState::Open;

        debug!(address = %self.address, "tunnel open");
        Ok(())
    }

    async fn disconnect(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), TunnelState::Closed);
        if previous == TunnelState::Closed {
            return;
        }

        self.closing.notify_waiters();
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.close().await {
                trace!("tunnel shutdown: {e}");
            }
        }
        // A parked receive drops the reader itself once woken.
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
        debug!(address = %self.address, "tunnel closed");
    }

    async fn send(&self, instructions: &[Instruction]) -> Result<(), DriftError> {
        if !self.is_open() {
            return Err(DriftError::NotConnected);
        }
        if instructions.is_empty() {
            return Ok(());
        }

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(DriftError::NotConnected)?;

        let result: Result<(), DriftError> = async {
            for instruction in instructions {
                writer.feed(instruction.clone()).await?;
            }
            writer.flush().await
        }
        .await;

        if let Err(e) = &result {
            warn!("tunnel write failed: {e}");
            guard.take();
            self.mark_closed();
        }
        result
    }

    async fn receive(&self) -> Result<Instruction, DriftError> {
        // Registered before the state check so a disconnect in between
        // still wakes this call.
        let closing = self.closing.notified();
        tokio::pin!(closing);
        closing.as_mut().enable();

        if !self.is_open() {
            return Err(DriftError::NotConnected);
        }

        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(DriftError::NotConnected)?;

        let next = tokio::select! {
            _ = &mut closing => None,
            next = reader.next() => Some(next),
        };
        let Some(next) = next else {
            guard.take();
            return Err(DriftError::ConnectionClosed);
        };
        match next {
            Some(Ok(instruction)) => Ok(instruction),
            Some(Err(e)) => {
                guard.take();
                self.mark_closed();
                Err(e)
            }
            None => {
                guard.take();
                self.mark_closed();
                Err(DriftError::ConnectionClosed)
            }
        }
    }

    fn state(&self) -> TunnelState {
        *self.state.lock()
    }
}

// ── Tests ────────────────────────────────────────────────────────
