mod admission;
mod capability;

pub use admission::{AdmissionDecision, ClientAdmissionPolicy};
pub use capability::SoftApCapability;

use std::collections::HashSet;
use std::time::Duration;

use macaddr::MacAddr6;

/// A requested SoftAp network configuration, as handed to the SoftAp PMSM
/// when it is created.
#[derive(Debug, Clone)]
pub struct SoftApConfiguration {
    pub ssid: String,
    pub passphrase: Option<String>,
    pub band_preference: BandPreference,
    pub hidden: bool,
    pub user_max_clients: Option<u32>,
    pub allowed_clients: HashSet<MacAddr6>,
    pub blocked_clients: HashSet<MacAddr6>,
    pub owe_transition: bool,
    /// Whether this SoftAp should shut itself down after sitting idle (no
    /// connected clients) for `idle_timeout`.
    pub auto_shutdown: bool,
    /// Overrides `WardenConfig::softap_default_idle_timeout` when set.
    pub idle_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandPreference {
    Any,
    Band2Ghz,
    Band5Ghz,
    Dual,
}

/// A resolved channel, produced by [`crate::native::NativeInterface::compute_channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSpec {
    pub primary_channel: u8,
    pub band_2ghz: bool,
}
