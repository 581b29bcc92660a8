//! Stand-in for the Settings/Policy Store collaborator: polls a JSON file on
//! disk and exposes it through `PolicyStore`/`TelephonyObserver`, pushing a
//! `WardenCommand` onto the handle whenever a watched field actually flips
//! so the Warden reacts immediately rather than only at its next poll.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use wlan_warden_core::collaborators::{CarrierPolicy, PolicyStore, TelephonyObserver};
use wlan_warden_core::ModeWardenHandle;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    airplane_mode: bool,
    #[serde(default = "default_true")]
    wifi_enabled: bool,
    #[serde(default)]
    scan_always_available: bool,
    #[serde(default)]
    location_mode: bool,
    #[serde(default)]
    defer_stop_enabled: bool,
    #[serde(default = "default_max_delay_ms")]
    max_delay_ms: u64,
    #[serde(default)]
    disable_wifi_in_emergency: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_delay_ms() -> u64 {
    15_000
}

impl Default for SettingsFile {
    fn default() -> Self {
        Self {
            airplane_mode: false,
            wifi_enabled: true,
            scan_always_available: false,
            location_mode: false,
            defer_stop_enabled: false,
            max_delay_ms: default_max_delay_ms(),
            disable_wifi_in_emergency: false,
        }
    }
}

pub struct PolledPolicyStore {
    airplane_mode: AtomicBool,
    wifi_enabled: AtomicBool,
    scan_always_available: AtomicBool,
    location_mode: AtomicBool,
    defer_stop_enabled: AtomicBool,
    max_delay_ms: AtomicU64,
    disable_wifi_in_emergency: AtomicBool,
    epoch: AtomicU64,
}

impl PolledPolicyStore {
    pub fn load(path: &Path) -> Self {
        let parsed = read_settings(path).unwrap_or_default();
        Self {
            airplane_mode: AtomicBool::new(parsed.airplane_mode),
            wifi_enabled: AtomicBool::new(parsed.wifi_enabled),
            scan_always_available: AtomicBool::new(parsed.scan_always_available),
            location_mode: AtomicBool::new(parsed.location_mode),
            defer_stop_enabled: AtomicBool::new(parsed.defer_stop_enabled),
            max_delay_ms: AtomicU64::new(parsed.max_delay_ms),
            disable_wifi_in_emergency: AtomicBool::new(parsed.disable_wifi_in_emergency),
            epoch: AtomicU64::new(0),
        }
    }

    /// Applies a freshly-read settings snapshot, returning which toggles
    /// actually changed so the caller can notify the Warden immediately.
    fn apply(&self, settings: &SettingsFile) -> Changed {
        let airplane_changed = self.airplane_mode.swap(settings.airplane_mode, Ordering::SeqCst)
            != settings.airplane_mode;
        let wifi_changed =
            self.wifi_enabled.swap(settings.wifi_enabled, Ordering::SeqCst) != settings.wifi_enabled;
        let scan_always_changed = self
            .scan_always_available
            .swap(settings.scan_always_available, Ordering::SeqCst)
            != settings.scan_always_available;
        let location_mode_changed = self
            .location_mode
            .swap(settings.location_mode, Ordering::SeqCst)
            != settings.location_mode;
        self.defer_stop_enabled
            .store(settings.defer_stop_enabled, Ordering::SeqCst);
        self.max_delay_ms.store(settings.max_delay_ms, Ordering::SeqCst);
        self.disable_wifi_in_emergency
            .store(settings.disable_wifi_in_emergency, Ordering::SeqCst);

        if airplane_changed || wifi_changed || scan_always_changed || location_mode_changed {
            self.epoch.fetch_add(1, Ordering::SeqCst);
        }

        Changed {
            airplane_mode: airplane_changed,
            wifi_enabled: wifi_changed,
            scan_always_available: scan_always_changed,
            location_mode: location_mode_changed,
        }
    }
}

struct Changed {
    airplane_mode: bool,
    wifi_enabled: bool,
    scan_always_available: bool,
    location_mode: bool,
}

#[async_trait::async_trait]
impl PolicyStore for PolledPolicyStore {
    async fn is_airplane_mode_on(&self) -> bool {
        self.airplane_mode.load(Ordering::SeqCst)
    }

    async fn is_wifi_toggle_on(&self) -> bool {
        self.wifi_enabled.load(Ordering::SeqCst)
    }

    async fn is_scan_always_available(&self) -> bool {
        self.scan_always_available.load(Ordering::SeqCst)
    }

    async fn carrier_policy(&self) -> CarrierPolicy {
        CarrierPolicy {
            defer_stop_enabled: self.defer_stop_enabled.load(Ordering::SeqCst),
            max_delay_ms: self.max_delay_ms.load(Ordering::SeqCst),
            disable_wifi_in_emergency: self.disable_wifi_in_emergency.load(Ordering::SeqCst),
        }
    }

    async fn settings_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }
}

/// Telephony/IMS stand-in. Without a real modem integration this always
/// reports no IMS registration, which degrades the Deferred-Stop Controller
/// to its carrier-timer path only — acceptable for a daemon running on
/// hardware with no telephony stack.
#[derive(Default)]
pub struct PolledTelephonyObserver {
    ims_over_wlan: AtomicBool,
    ims_non_wlan: AtomicBool,
}

#[async_trait::async_trait]
impl TelephonyObserver for PolledTelephonyObserver {
    async fn is_ims_registered_over_wlan(&self) -> bool {
        self.ims_over_wlan.load(Ordering::SeqCst)
    }

    async fn is_ims_registered_non_wlan(&self) -> bool {
        self.ims_non_wlan.load(Ordering::SeqCst)
    }

    async fn has_any_ims_network(&self) -> bool {
        self.ims_over_wlan.load(Ordering::SeqCst) || self.ims_non_wlan.load(Ordering::SeqCst)
    }
}

fn read_settings(path: &Path) -> Option<SettingsFile> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(settings) => Some(settings),
        Err(err) => {
            warn!(?path, "failed to parse settings file, ignoring: {err}");
            None
        }
    }
}

/// Polls `path` forever, applying changes to `store` and forwarding any
/// flipped toggle onto `handle`. Never returns on its own; the caller races
/// it against shutdown.
pub async fn run(path: PathBuf, store: std::sync::Arc<PolledPolicyStore>, handle: ModeWardenHandle) {
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;
        let Some(settings) = read_settings(&path) else {
            continue;
        };
        let changed = store.apply(&settings);
        if changed.wifi_enabled {
            debug!(enabled = settings.wifi_enabled, "wifi toggle changed on disk");
            handle.wifi_toggled(settings.wifi_enabled);
        }
        if changed.airplane_mode {
            debug!(on = settings.airplane_mode, "airplane mode changed on disk");
            handle.airplane_toggled(settings.airplane_mode);
        }
        if changed.scan_always_available {
            handle.scan_always_mode_changed(settings.scan_always_available);
        }
        if changed.location_mode {
            handle.location_mode_changed(settings.location_mode);
        }
    }
}
