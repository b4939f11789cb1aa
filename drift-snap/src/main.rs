//! drift-snap: headless drift client entry point.
//!
//! ```text
//! drift-snap                      Connect with drift-snap.toml or defaults
//! drift-snap --config <path>      Use a custom config TOML
//! drift-snap --type "hello"       Type text once the session is active
//! drift-snap --gen-config         Dump default config and exit
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use drift_core::{Client, Session, SessionState};
use drift_snap::config::SnapConfig;
use drift_snap::snapshot::SnapshotWriter;

/// How long typed text waits for the handshake to finish.
const ACTIVE_WAIT: Duration = Duration::from_secs(30);

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "drift-snap", about = "Headless remote-display client writing PNG snapshots")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "drift-snap.toml")]
    config: PathBuf,

    /// Proxy address (overrides config). Example: 127.0.0.1:4822
    #[arg(short, long)]
    address: Option<String>,

    /// PNG output path (overrides config).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Text typed into the remote session once it is active.
    #[arg(short = 't', long = "type", value_name = "TEXT")]
    text: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        println!("{}", SnapConfig::default_toml()?);
        return Ok(());
    }

    let mut config = SnapConfig::load(&cli.config);
    if let Some(address) = cli.address {
        config.session.address = address;
    }
    if let Some(output) = cli.output {
        config.output.path = output;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("drift-snap v{}", env!("CARGO_PKG_VERSION"));

    // ── 1. Connect ──────────────────────────────────────────────

    let session = Session::connect(config.session.clone()).await?;
    let client = Arc::new(Client::new(session));
    let mut runner = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.run().await }
    });

    // ── 2. Optional typing ──────────────────────────────────────

    if let Some(text) = cli.text {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            let typed = async {
                client
                    .session()
                    .wait_for_state(SessionState::Active, ACTIVE_WAIT)
                    .await?;
                client.send_text(&text).await
            };
            match typed.await {
                Ok(()) => info!(chars = text.chars().count(), "text typed"),
                Err(e) => warn!("failed to type text: {e}"),
            }
        });
    }

    // ── 3. Snapshot loop ────────────────────────────────────────

    let mut writer = SnapshotWriter::new(&config.output.path);
    let mut ticker = tokio::time::interval(config.poll_interval());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut finished = false;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupted");
                client.session().terminate().await;
                break;
            }
            result = &mut runner => {
                finished = true;
                match result {
                    Ok(Ok(())) => info!("session closed"),
                    Ok(Err(e)) => error!("session failed: {e}"),
                    Err(e) => error!("client task failed: {e}"),
                }
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = writer.write_if_changed(&client.canvas()) {
                    warn!("snapshot failed: {e}");
                }
            }
        }
    }

    // ── 4. Shutdown ─────────────────────────────────────────────

    if let Err(e) = writer.write_if_changed(&client.canvas()) {
        warn!("final snapshot failed: {e}");
    }
    if !finished && tokio::time::timeout(Duration::from_secs(2), &mut runner).await.is_err() {
        runner.abort();
    }
    if writer.written() > 0 {
        info!(path = %writer.path().display(), "last snapshot kept");
    }

    Ok(())
}
