//! # drift-snap: headless drift client
//!
//! Connects to a proxy from a TOML configuration, keeps the session
//! running and writes the remote screen to a PNG file each time it
//! changes. Optionally types a line of text once connected.

pub mod config;
pub mod snapshot;
