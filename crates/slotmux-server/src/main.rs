//! slotmux chat server entry point.
//!
//! Loads the configuration, opens the listening socket on the host network
//! stack and runs the chat relay until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()              -- TOML file or defaults
//!  └─ HostAdapter                -- std::net behind SocketApi
//!  └─ ConnectionSlotPool::begin  -- listen on 0.0.0.0:<port>
//!  └─ ChatRelay::run             -- one readiness scan per tick
//! ```
//!
//! The pool is single-threaded, so the runtime uses the current-thread flavour
//! and the relay runs on the main task.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use slotmux_core::{ConnectionSlotPool, Server};
use slotmux_server::application::chat_relay::ChatRelay;
use slotmux_server::infrastructure::network::host_adapter::HostAdapter;
use slotmux_server::infrastructure::storage::config;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config_path = config::resolve_config_path(std::env::args_os().nth(1).map(PathBuf::from))
        .context("locating config file")?;
    let cfg = config::load_config(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    // Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.server.log_level)),
        )
        .init();

    info!(path = %config_path.display(), "slotmux server starting");

    let adapter = HostAdapter::new();
    let mut pool = ConnectionSlotPool::new(&adapter, cfg.server.port)
        .with_timeouts(cfg.timeouts.to_adapter_timeouts());
    pool.begin()
        .with_context(|| format!("opening listener on port {}", cfg.server.port))?;

    if let Some(addr) = adapter.listener_addr() {
        info!(%addr, slots = pool.capacity(), "listening");
    }

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => warn!("failed to listen for Ctrl-C: {e}"),
        }
        running_clone.store(false, Ordering::Relaxed);
    });

    info!("slotmux server ready.  Press Ctrl-C to exit.");

    let mut relay = ChatRelay::new(&pool, cfg.server.greeting.clone());
    let stats = relay.run(cfg.server.poll_interval(), &running).await;

    info!(
        accepted = stats.accepted,
        bytes_received = stats.bytes_received,
        bytes_sent = stats.bytes_sent,
        "slotmux server stopped"
    );
    Ok(())
}
