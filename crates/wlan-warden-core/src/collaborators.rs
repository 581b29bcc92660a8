use async_trait::async_trait;
use std::sync::Arc;

use crate::error::WardenError;
use crate::role::Role;

/// Carrier-configured policy inputs the Deferred-Stop Controller consults.
#[derive(Debug, Clone, Copy)]
pub struct CarrierPolicy {
    pub defer_stop_enabled: bool,
    pub max_delay_ms: u64,
    /// Whether the carrier requires station Wi-Fi to be stopped, not just
    /// SoftAp, while the emergency overlay is active.
    pub disable_wifi_in_emergency: bool,
}

/// The Settings/Policy Store: everything the Warden reads about persisted
/// user/carrier configuration. Writes never happen through this trait —
/// persistence is entirely out of scope (see `SPEC_FULL.md` §9).
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn is_airplane_mode_on(&self) -> bool;
    async fn is_wifi_toggle_on(&self) -> bool;
    async fn is_scan_always_available(&self) -> bool;
    async fn carrier_policy(&self) -> CarrierPolicy;
    /// Monotonic counter bumped every time persisted settings change;
    /// used to scope per-settings-change-event bookkeeping such as the
    /// SoftAp "no more stations" metric.
    async fn settings_epoch(&self) -> u64;
}

/// Telephony/IMS observer consulted by the Deferred-Stop Controller.
#[async_trait]
pub trait TelephonyObserver: Send + Sync {
    async fn is_ims_registered_over_wlan(&self) -> bool;
    async fn is_ims_registered_non_wlan(&self) -> bool;
    async fn has_any_ims_network(&self) -> bool;
}

/// Opaque handle to a connection-scoring engine installed while a
/// Client-PMSM is `Started`. The Warden never inspects it, only threads it
/// through to the facade and re-installs it across a role switch.
pub type ScorerHandle = Arc<dyn std::any::Any + Send + Sync>;

/// The connection-level engine driving an active client interface: scan
/// requests, network selection, and connect/disconnect. Entirely out of
/// scope for this crate's own logic beyond invoking it.
#[async_trait]
pub trait ConnectionEngine: Send + Sync {
    async fn connect(&self, interface: &str) -> Result<(), WardenError>;
    async fn disconnect(&self, interface: &str) -> Result<(), WardenError>;
    async fn is_connected(&self, interface: &str) -> bool;
}

/// No-op engine installed while a Client-PMSM has no connection engine
/// bound (e.g. scan-only, or between teardown and rebind).
pub struct NullConnectionEngine;

#[async_trait]
impl ConnectionEngine for NullConnectionEngine {
    async fn connect(&self, _interface: &str) -> Result<(), WardenError> {
        Ok(())
    }
    async fn disconnect(&self, _interface: &str) -> Result<(), WardenError> {
        Ok(())
    }
    async fn is_connected(&self, _interface: &str) -> bool {
        false
    }
}

/// Metrics/diagnostics sink. Every method has a default no-op body so a
/// collaborator only needs to implement the events it cares about.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record_deferred_stop(&self, was_deferred: bool, timed_out: bool, duration_ms: u64) {
        let _ = (was_deferred, timed_out, duration_ms);
    }
    async fn record_no_more_stations(&self, interface: &str) {
        let _ = interface;
    }
    async fn record_role_change(&self, from: Role, to: Role) {
        let _ = (from, to);
    }
}

/// Sticky-broadcast emission (e.g. "Wi-Fi state changed", "hotspot state
/// changed") consumed by platform components outside this crate's scope.
#[async_trait]
pub trait BroadcastSink: Send + Sync {
    async fn send_wifi_state_changed(&self, enabled: bool);
    async fn send_softap_state_changed(&self, role: Role, enabled: bool);
}
