//! fOS Connectivity - demo session
//!
//! Runs a manager against the in-memory platform, with connectivity fed by
//! the host network probe, and prints the indicator a banner would show.
//!
//! Usage: `fos-connectivity [config.json]`

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use fos_connectivity::platform::memory::CachedResponse;
use fos_connectivity::{
    ConnectivityConfig, ConnectivityManager, ConnectivitySnapshot, MemoryPlatform, NetworkProbe, SnapshotStream,
};
use smol::Timer;
use tracing_subscriber::EnvFilter;

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match std::env::args().nth(1) {
        Some(path) => ConnectivityConfig::from_file(&path).with_context(|| format!("loading {path}"))?,
        None => ConnectivityConfig::default(),
    }
    .apply_env()?;

    tracing::info!("fOS Connectivity v{} for {}", fos_connectivity::VERSION, config.origin);
    smol::block_on(run(config))
}

async fn run(config: ConnectivityConfig) -> anyhow::Result<()> {
    let platform = Arc::new(MemoryPlatform::for_origin(&config.origin)?);
    platform.put_cached("precache-v1", "/index.html", CachedResponse::new(200, b"<html></html>".to_vec()));
    platform.put_cached("runtime", "/api/session", CachedResponse::new(200, b"{}".to_vec()));

    let probe = {
        let platform = Arc::clone(&platform);
        smol::spawn(NetworkProbe::new().watch(config.probe_interval(), move |online| platform.set_online(online)))
    };

    let manager = ConnectivityManager::builder(Arc::clone(&platform))
        .config(config)
        .start();
    let updates = manager.subscribe();

    let snapshot = wait_for(&updates, |s| s.installed || !s.supported).await?;
    if !snapshot.supported {
        println!("{}", indicator(&snapshot));
        bail!("worker registration is not supported");
    }

    platform.deploy_update();
    wait_for(&updates, |s| s.update_available).await?;

    if manager.apply_pending_update().await {
        wait_for(&updates, |s| !s.update_available).await?;
    }

    let report = manager.purge_caches().await;
    println!(
        "purged {} cache(s), {} failed: {}",
        report.deleted.len(),
        report.failed.len(),
        report.deleted.join(", ")
    );

    println!("{}", serde_json::to_string(&manager.snapshot().await)?);
    manager.shutdown().await;
    probe.cancel().await;
    Ok(())
}

/// Wait for a snapshot matching `pred`, printing the indicator for each one
async fn wait_for(
    updates: &SnapshotStream,
    pred: impl Fn(&ConnectivitySnapshot) -> bool,
) -> anyhow::Result<ConnectivitySnapshot> {
    let next = async {
        while let Ok(snapshot) = updates.recv().await {
            println!("{}", indicator(&snapshot));
            if pred(&snapshot) {
                return Some(snapshot);
            }
        }
        None
    };
    let timeout = async {
        Timer::after(STEP_TIMEOUT).await;
        None
    };

    smol::future::or(next, timeout)
        .await
        .context("connectivity manager did not reach the expected state")
}

/// One status line, plus the update banner when a new version waits
fn indicator(snapshot: &ConnectivitySnapshot) -> String {
    let network = if snapshot.online { "online" } else { "offline" };
    let worker = match (snapshot.supported, snapshot.installed) {
        (false, _) => "no offline support",
        (true, false) => "offline support pending",
        (true, true) => "available offline",
    };
    let mut line = format!("[{network}] {worker}");
    if snapshot.update_available {
        line.push_str(" | A new version is available - reload to update");
    }
    line
}
