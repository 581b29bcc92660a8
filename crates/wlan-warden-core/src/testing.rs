//! In-memory fake collaborators for deterministic tests. Gated behind the
//! `fakes` feature so production builds never link against them.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use macaddr::MacAddr6;

use crate::collaborators::{CarrierPolicy, ConnectionEngine, MetricsSink, PolicyStore, TelephonyObserver};
use crate::error::WardenError;
use crate::native::{
    InterfaceCallbackHandle, NativeInterface, PhyCapabilities, SoftApListenerHandle, WorkSource,
};
use crate::softap::{ChannelSpec, SoftApCapability, SoftApConfiguration};

/// A native interface backend that always succeeds and reports a fixed
/// capability set, for tests that only care about state-machine behavior.
pub struct FakeNativeInterface {
    next_iface: AtomicU32,
    pub max_clients: u32,
    pub supports_set_mac: bool,
    pub fail_start_softap: Mutex<Option<WardenError>>,
    /// When set, `force_client_disconnect` fails once per call, for tests
    /// that exercise the pending-disconnect retry path.
    pub force_disconnect_fails: AtomicBool,
}

impl Default for FakeNativeInterface {
    fn default() -> Self {
        Self {
            next_iface: AtomicU32::new(0),
            max_clients: 8,
            supports_set_mac: true,
            fail_start_softap: Mutex::new(None),
            force_disconnect_fails: AtomicBool::new(false),
        }
    }
}

impl FakeNativeInterface {
    fn alloc_name(&self, prefix: &str) -> String {
        let n = self.next_iface.fetch_add(1, Ordering::SeqCst);
        format!("{prefix}{n}")
    }
}

#[async_trait]
impl NativeInterface for FakeNativeInterface {
    async fn setup_client_scan_iface(
        &self,
        _callback: InterfaceCallbackHandle,
    ) -> Result<String, WardenError> {
        Ok(self.alloc_name("wlan"))
    }

    async fn setup_softap_iface(
        &self,
        _callback: InterfaceCallbackHandle,
        _work_source: WorkSource,
        _bridged: bool,
    ) -> Result<String, WardenError> {
        Ok(self.alloc_name("ap"))
    }

    async fn setup_bridge_iface(
        &self,
        _callback: InterfaceCallbackHandle,
    ) -> Result<String, WardenError> {
        Ok(self.alloc_name("br"))
    }

    async fn switch_client_to_scan(&self, _interface: &str) -> Result<(), WardenError> {
        Ok(())
    }

    async fn switch_client_to_connectivity(&self, _interface: &str) -> Result<(), WardenError> {
        Ok(())
    }

    async fn teardown_iface(&self, _interface: &str) {}

    async fn start_softap(
        &self,
        _interface: &str,
        _config: &SoftApConfiguration,
        _tethered: bool,
        _listener: SoftApListenerHandle,
    ) -> Result<(), WardenError> {
        if let Some(err) = self.fail_start_softap.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(())
    }

    async fn set_country_code(&self, _interface: &str, _country_code: &str) -> Result<(), WardenError> {
        Ok(())
    }

    async fn set_ap_mac_address(&self, _interface: &str, _mac: MacAddr6) -> Result<(), WardenError> {
        Ok(())
    }

    async fn reset_ap_mac_to_factory(&self, _interface: &str) -> Result<(), WardenError> {
        Ok(())
    }

    async fn is_ap_set_mac_supported(&self, _interface: &str) -> bool {
        self.supports_set_mac
    }

    async fn is_interface_up(&self, _interface: &str) -> bool {
        true
    }

    async fn force_client_disconnect(
        &self,
        _interface: &str,
        _mac: MacAddr6,
        _reason: crate::native::DisconnectReason,
    ) -> Result<(), WardenError> {
        if self.force_disconnect_fails.load(Ordering::SeqCst) {
            return Err(WardenError::Collaborator("forced failure".into()));
        }
        Ok(())
    }

    async fn phy_capabilities(&self, _interface: &str) -> PhyCapabilities {
        PhyCapabilities {
            max_clients: self.max_clients,
            supports_5ghz: true,
            supports_6ghz: false,
            softap: SoftApCapability::WPA3 | SoftApCapability::ACS_OFFLOAD,
        }
    }

    async fn compute_channel(
        &self,
        _interface: &str,
        _config: &SoftApConfiguration,
    ) -> Result<ChannelSpec, WardenError> {
        Ok(ChannelSpec {
            primary_channel: 6,
            band_2ghz: true,
        })
    }
}

/// A policy store with independently settable toggles, for driving the
/// literal test scenarios.
pub struct FakePolicyStore {
    pub airplane_mode: std::sync::atomic::AtomicBool,
    pub wifi_toggle: std::sync::atomic::AtomicBool,
    pub scan_always: std::sync::atomic::AtomicBool,
    pub defer_stop_enabled: std::sync::atomic::AtomicBool,
    pub max_delay_ms: AtomicU64,
    pub disable_wifi_in_emergency: AtomicBool,
    epoch: AtomicU64,
}

impl Default for FakePolicyStore {
    fn default() -> Self {
        Self {
            airplane_mode: std::sync::atomic::AtomicBool::new(false),
            wifi_toggle: std::sync::atomic::AtomicBool::new(true),
            scan_always: std::sync::atomic::AtomicBool::new(false),
            defer_stop_enabled: std::sync::atomic::AtomicBool::new(false),
            max_delay_ms: AtomicU64::new(15_000),
            disable_wifi_in_emergency: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
        }
    }
}

impl FakePolicyStore {
    pub fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PolicyStore for FakePolicyStore {
    async fn is_airplane_mode_on(&self) -> bool {
        self.airplane_mode.load(Ordering::SeqCst)
    }
    async fn is_wifi_toggle_on(&self) -> bool {
        self.wifi_toggle.load(Ordering::SeqCst)
    }
    async fn is_scan_always_available(&self) -> bool {
        self.scan_always.load(Ordering::SeqCst)
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

/// A telephony observer with independently settable IMS flags.
#[derive(Default)]
pub struct FakeTelephonyObserver {
    pub ims_non_wlan: std::sync::atomic::AtomicBool,
    pub ims_any: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl TelephonyObserver for FakeTelephonyObserver {
    async fn is_ims_registered_over_wlan(&self) -> bool {
        !self.ims_non_wlan.load(Ordering::SeqCst) && self.ims_any.load(Ordering::SeqCst)
    }
    async fn is_ims_registered_non_wlan(&self) -> bool {
        self.ims_non_wlan.load(Ordering::SeqCst)
    }
    async fn has_any_ims_network(&self) -> bool {
        self.ims_any.load(Ordering::SeqCst)
    }
}

/// A connection engine that always reports success; records calls for
/// assertions.
#[derive(Default)]
pub struct FakeConnectionEngine {
    pub connected: Mutex<HashSet<String>>,
}

#[async_trait]
impl ConnectionEngine for FakeConnectionEngine {
    async fn connect(&self, interface: &str) -> Result<(), WardenError> {
        self.connected.lock().unwrap().insert(interface.to_string());
        Ok(())
    }
    async fn disconnect(&self, interface: &str) -> Result<(), WardenError> {
        self.connected.lock().unwrap().remove(interface);
        Ok(())
    }
    async fn is_connected(&self, interface: &str) -> bool {
        self.connected.lock().unwrap().contains(interface)
    }
}

/// A metrics sink recording every call it received, for scenario
/// assertions that care about emission counts (e.g. "once per settings
/// epoch").
#[derive(Default)]
pub struct FakeMetricsSink {
    pub deferred_stop_calls: AtomicU32,
    pub no_more_stations_calls: AtomicU32,
    pub role_change_calls: AtomicU32,
}

#[async_trait]
impl MetricsSink for FakeMetricsSink {
    async fn record_deferred_stop(&self, _was_deferred: bool, _timed_out: bool, _duration_ms: u64) {
        self.deferred_stop_calls.fetch_add(1, Ordering::SeqCst);
    }
    async fn record_no_more_stations(&self, _interface: &str) {
        self.no_more_stations_calls.fetch_add(1, Ordering::SeqCst);
    }
    async fn record_role_change(&self, _from: crate::role::Role, _to: crate::role::Role) {
        self.role_change_calls.fetch_add(1, Ordering::SeqCst);
    }
}
