use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing::{info, warn};

use wlan_warden_core::collaborators::{ConnectionEngine, MetricsSink, NullConnectionEngine};
use wlan_warden_core::{ModeWarden, WardenCollaborators, WardenConfig};

mod settings_watcher;

#[cfg(target_os = "linux")]
fn native_interface() -> Result<Arc<dyn wlan_warden_core::native::NativeInterface>> {
    Ok(Arc::new(wlan_warden_netif::LinuxNativeInterface::new()?))
}

#[cfg(not(target_os = "linux"))]
fn native_interface() -> Result<Arc<dyn wlan_warden_core::native::NativeInterface>> {
    info!("non-linux platform: falling back to the in-memory fake native interface");
    Ok(Arc::new(
        wlan_warden_core::testing::FakeNativeInterface::default(),
    ))
}

/// No telemetry backend wired up yet; every event is dropped. `MetricsSink`'s
/// methods are all default-bodied, so this impl block is intentionally empty.
struct NoopMetrics;
impl MetricsSink for NoopMetrics {}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    wlan_warden_logging::init_tracing("WLAN_WARDEN_LOG");

    let config = WardenConfig::from_env();
    let settings_path = std::env::var("WLAN_WARDEN_SETTINGS_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/wlan-warden/settings.json"));

    let policy_store = Arc::new(settings_watcher::PolledPolicyStore::load(&settings_path));
    let telephony = Arc::new(settings_watcher::PolledTelephonyObserver::default());

    let collaborators = WardenCollaborators {
        native: native_interface()?,
        policy_store: policy_store.clone() as Arc<dyn wlan_warden_core::collaborators::PolicyStore>,
        telephony: telephony as Arc<dyn wlan_warden_core::collaborators::TelephonyObserver>,
        connection_engine: Arc::new(NullConnectionEngine) as Arc<dyn ConnectionEngine>,
        metrics: Arc::new(NoopMetrics),
    };

    let (warden, handle, rx) = ModeWarden::new(config, collaborators);

    let shutdown = Arc::new(Notify::new());

    let watcher_shutdown = Arc::clone(&shutdown);
    let watcher_handle = handle.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = settings_watcher::run(settings_path, policy_store, watcher_handle) => {
                warn!("settings watcher stopped unexpectedly");
            }
            _ = watcher_shutdown.notified() => {
                info!("settings watcher stopped by shutdown signal");
            }
        }
    });

    let signal_shutdown = Arc::clone(&shutdown);
    let signal_handle = handle.clone();
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(err) => {
                warn!("failed to register SIGTERM handler: {err}");
                return;
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(err) => {
                warn!("failed to register SIGINT handler: {err}");
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }

        info!("shutdown signal received");
        signal_handle.shutdown();
        signal_shutdown.notify_waiters();
    });

    info!("wlan-wardend ready");
    warden.run(rx).await;
    shutdown.notify_waiters();
    info!("wlan-wardend stopped");
    Ok(())
}
