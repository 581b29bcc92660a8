use std::time::Duration;

/// Ambient daemon configuration: carrier policy flags and tunables, loaded
/// from the environment at startup. This is NOT the persisted Wi-Fi/SoftAp
/// network configuration format — that remains the Settings/Policy Store's
/// responsibility, reached only through [`crate::collaborators::PolicyStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WardenConfig {
    /// Upper bound the carrier allows the Deferred-Stop Controller to wait
    /// before continuing a pending client disconnect.
    pub deferred_stop_max_delay: Duration,
    /// Extra grace period applied after the last IMS-over-WLAN network is
    /// lost, before continuing the deferred stop.
    pub deferred_stop_extra_delay: Duration,
    /// Default SoftAp idle-timeout applied when a request omits one.
    pub softap_default_idle_timeout: Duration,
    /// How often the pending-disconnect path is rechecked while waiting on
    /// a condition that has no dedicated wakeup source.
    pub pending_disconnect_recheck_interval: Duration,
    /// How often a SoftAp force-disconnect that failed is retried against a
    /// still-connected client (`PENDING_DISCONNECT_RECHECK` in spec terms).
    pub softap_pending_disconnect_recheck: Duration,
    /// Upper bound on the delay between tearing Wi-Fi down for a recovery
    /// restart and bringing it back up (`MAX_RECOVERY_TIMEOUT_DELAY_MS`).
    pub max_recovery_restart_delay: Duration,
    /// Whether the platform can run a client interface and a SoftAp
    /// interface concurrently. When false, `requestLocalOnlyClientModeManager`
    /// falls back to handing out the existing primary rather than creating a
    /// second interface.
    pub sta_ap_concurrency_supported: bool,
    /// Graveyard capacity, per PMSM family.
    pub graveyard_capacity: usize,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            deferred_stop_max_delay: Duration::from_secs(15),
            deferred_stop_extra_delay: Duration::from_secs(3),
            softap_default_idle_timeout: Duration::from_secs(10 * 60),
            pending_disconnect_recheck_interval: Duration::from_secs(1),
            softap_pending_disconnect_recheck: Duration::from_secs(1),
            max_recovery_restart_delay: Duration::from_millis(4_000),
            sta_ap_concurrency_supported: true,
            graveyard_capacity: 3,
        }
    }
}

impl WardenConfig {
    /// Loads configuration from the environment, falling back to
    /// [`Default`] values for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            deferred_stop_max_delay: env_duration_secs(
                "WARDEN_DEFERRED_STOP_MAX_DELAY_SECS",
                defaults.deferred_stop_max_delay,
            ),
            deferred_stop_extra_delay: env_duration_secs(
                "WARDEN_DEFERRED_STOP_EXTRA_DELAY_SECS",
                defaults.deferred_stop_extra_delay,
            ),
            softap_default_idle_timeout: env_duration_secs(
                "WARDEN_SOFTAP_DEFAULT_IDLE_TIMEOUT_SECS",
                defaults.softap_default_idle_timeout,
            ),
            pending_disconnect_recheck_interval: env_duration_secs(
                "WARDEN_PENDING_DISCONNECT_RECHECK_SECS",
                defaults.pending_disconnect_recheck_interval,
            ),
            softap_pending_disconnect_recheck: env_duration_secs(
                "WARDEN_SOFTAP_PENDING_DISCONNECT_RECHECK_SECS",
                defaults.softap_pending_disconnect_recheck,
            ),
            max_recovery_restart_delay: std::env::var("WARDEN_MAX_RECOVERY_RESTART_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_recovery_restart_delay),
            sta_ap_concurrency_supported: std::env::var("WARDEN_STA_AP_CONCURRENCY_SUPPORTED")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.sta_ap_concurrency_supported),
            graveyard_capacity: std::env::var("WARDEN_GRAVEYARD_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.graveyard_capacity),
        }
    }
}

fn env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
