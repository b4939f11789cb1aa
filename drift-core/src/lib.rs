//! # drift-core
//!
//! Client library for a text, length-prefixed remote-display protocol.
//!
//! This crate contains:
//! - **Protocol**: `Instruction` and its `len.elem,...;` wire form
//! - **Codec**: `InstructionCodec` for framed I/O via `tokio_util`
//! - **Tunnel**: the `Tunnel` transport trait and the TCP `SocketTunnel`
//! - **Session**: handshake, keepalive and inbound delivery
//! - **Client**: instruction dispatch plus mouse and keyboard input
//! - **Display**: layered compositor and the published canvas
//! - **Streams**: reassembly of base64 blob streams into images
//! - **Error**: `DriftError`, a typed `thiserror` error hierarchy
//!
//! ```no_run
//! use std::sync::Arc;
//! use drift_core::{Client, Session, SessionConfig};
//!
//! # async fn demo() -> Result<(), drift_core::DriftError> {
//! let config = SessionConfig::new("127.0.0.1:4822", "vnc")
//!     .with_parameter("hostname", "10.0.0.5")
//!     .with_parameter("port", "5900");
//! let client = Arc::new(Client::new(Session::connect(config).await?));
//! tokio::spawn({
//!     let client = Arc::clone(&client);
//!     async move { client.run().await }
//! });
//! let frame = client.canvas();
//! # let _ = frame;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod display;
pub mod error;
pub mod geom;
pub mod input;
pub mod layer;
pub mod protocol;
pub mod session;
pub mod stream;
pub mod tunnel;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use client::Client;
pub use codec::InstructionCodec;
pub use config::{HandshakeOptions, SessionConfig};
pub use display::{CanvasSnapshot, Display, Operation};
pub use error::{DriftError, ProtocolError};
pub use geom::{Point, Rect};
pub use input::{KeyCode, MouseButtons};
pub use layer::{CompositeOp, Layer, Layers};
pub use protocol::{Instruction, MAX_INSTRUCTION_LENGTH};
pub use session::{Session, SessionState};
pub use stream::{Stream, Streams};
pub use tunnel::{SocketTunnel, Tunnel, TunnelState};
