use async_trait::async_trait;
use macaddr::MacAddr6;
use tokio::sync::mpsc;

use crate::error::WardenError;
use crate::softap::{ChannelSpec, SoftApCapability, SoftApConfiguration};

/// Why a station was force-disconnected from a SoftAp interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    NoMoreStations,
    Blocklisted,
    SettingsChanged,
}

/// Attribution for an interface request, forwarded to the platform's
/// resource-accounting layer. Opaque to the Warden itself.
#[derive(Debug, Clone)]
pub struct WorkSource {
    pub requester: String,
}

/// PHY capability report used to size the SoftAp admission policy and to
/// validate a requested band/security combination before starting.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhyCapabilities {
    pub max_clients: u32,
    pub supports_5ghz: bool,
    pub supports_6ghz: bool,
    pub softap: SoftApCapability,
}

/// Events the native layer pushes onto an interface's callback channel:
/// link state, unexpected teardown, and association/disassociation for
/// SoftAp interfaces.
#[derive(Debug, Clone)]
pub enum InterfaceEvent {
    Up,
    Down,
    Destroyed,
    DaemonDied,
}

#[derive(Debug, Clone)]
pub enum SoftApHalEvent {
    Started,
    StartFailed(String),
    ClientConnected(MacAddr6),
    ClientDisconnected(MacAddr6),
    Stopped,
}

pub type InterfaceCallbackHandle = mpsc::UnboundedSender<InterfaceEvent>;
pub type SoftApListenerHandle = mpsc::UnboundedSender<SoftApHalEvent>;

/// The Native Interface Layer contract: every interaction the Warden and
/// its PMSMs have with the underlying wireless driver/HAL, expressed as a
/// trait so the core crate never links against netlink/nl80211 directly.
///
/// Every method is a single awaited native round-trip; the Warden's event
/// loop never begins a second native call before the first completes, which
/// is what keeps state-machine progress serialized onto one thread (see the
/// crate-level docs for the concurrency model).
#[async_trait]
pub trait NativeInterface: Send + Sync {
    async fn setup_client_scan_iface(
        &self,
        callback: InterfaceCallbackHandle,
    ) -> Result<String, WardenError>;

    async fn setup_softap_iface(
        &self,
        callback: InterfaceCallbackHandle,
        work_source: WorkSource,
        bridged: bool,
    ) -> Result<String, WardenError>;

    async fn setup_bridge_iface(
        &self,
        callback: InterfaceCallbackHandle,
    ) -> Result<String, WardenError>;

    async fn switch_client_to_scan(&self, interface: &str) -> Result<(), WardenError>;

    async fn switch_client_to_connectivity(&self, interface: &str) -> Result<(), WardenError>;

    async fn teardown_iface(&self, interface: &str);

    async fn start_softap(
        &self,
        interface: &str,
        config: &SoftApConfiguration,
        tethered: bool,
        listener: SoftApListenerHandle,
    ) -> Result<(), WardenError>;

    async fn set_country_code(&self, interface: &str, country_code: &str) -> Result<(), WardenError>;

    async fn set_ap_mac_address(&self, interface: &str, mac: MacAddr6) -> Result<(), WardenError>;

    async fn reset_ap_mac_to_factory(&self, interface: &str) -> Result<(), WardenError>;

    async fn is_ap_set_mac_supported(&self, interface: &str) -> bool;

    async fn is_interface_up(&self, interface: &str) -> bool;

    async fn force_client_disconnect(
        &self,
        interface: &str,
        mac: MacAddr6,
        reason: DisconnectReason,
    ) -> Result<(), WardenError>;

    async fn phy_capabilities(&self, interface: &str) -> PhyCapabilities;

    async fn compute_channel(
        &self,
        interface: &str,
        config: &SoftApConfiguration,
    ) -> Result<ChannelSpec, WardenError>;
}
