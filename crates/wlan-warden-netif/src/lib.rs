//! Linux native-interface backend for the Wi-Fi Active Mode Warden:
//! implements [`wlan_warden_core::native::NativeInterface`] against
//! `wlan-warden-netlink` for link-level operations and spawned `hostapd`
//! for SoftAp.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use macaddr::MacAddr6;
use tokio::process::Command;
use tracing::{debug, info, warn};

use wlan_warden_core::error::WardenError;
use wlan_warden_core::native::{
    DisconnectReason, InterfaceCallbackHandle, NativeInterface, PhyCapabilities,
    SoftApListenerHandle, WorkSource,
};
use wlan_warden_core::softap::{ChannelSpec, SoftApCapability, SoftApConfiguration};
use wlan_warden_netlink::NetlinkHandle;

/// Where generated `hostapd` configuration files are written. Overridable
/// for tests via [`LinuxNativeInterface::with_hostapd_conf_dir`].
const DEFAULT_HOSTAPD_CONF_DIR: &str = "/var/run/wlan-warden";

pub struct LinuxNativeInterface {
    netlink: NetlinkHandle,
    next_iface_suffix: AtomicU32,
    hostapd_conf_dir: PathBuf,
}

impl LinuxNativeInterface {
    pub fn new() -> Result<Self, WardenError> {
        let netlink = NetlinkHandle::new().map_err(|e| WardenError::NativeSetupFailed {
            interface: format!("netlink: {e}"),
        })?;
        Ok(Self {
            netlink,
            next_iface_suffix: AtomicU32::new(0),
            hostapd_conf_dir: PathBuf::from(DEFAULT_HOSTAPD_CONF_DIR),
        })
    }

    pub fn with_hostapd_conf_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.hostapd_conf_dir = dir.into();
        self
    }

    fn alloc_iface_name(&self, prefix: &str) -> String {
        let n = self.next_iface_suffix.fetch_add(1, Ordering::SeqCst);
        format!("{prefix}{n}")
    }

    fn hostapd_conf_path(&self, interface: &str) -> PathBuf {
        self.hostapd_conf_dir.join(format!("{interface}.conf"))
    }

    fn render_hostapd_conf(interface: &str, config: &SoftApConfiguration, channel: &ChannelSpec) -> String {
        let mut conf = format!(
            "interface={interface}\ndriver=nl80211\nssid={}\nchannel={}\nhw_mode={}\nignore_broadcast_ssid={}\n",
            config.ssid,
            channel.primary_channel,
            if channel.band_2ghz { "g" } else { "a" },
            u8::from(config.hidden),
        );
        if let Some(passphrase) = &config.passphrase {
            conf.push_str("wpa=2\nwpa_key_mgmt=WPA-PSK\nrsn_pairwise=CCMP\n");
            conf.push_str(&format!("wpa_passphrase={passphrase}\n"));
        }
        conf
    }
}

#[async_trait]
impl NativeInterface for LinuxNativeInterface {
    async fn setup_client_scan_iface(
        &self,
        _callback: InterfaceCallbackHandle,
    ) -> Result<String, WardenError> {
        let name = self.alloc_iface_name("wlan");
        self.netlink
            .set_link_up(&name)
            .await
            .map_err(|e| WardenError::NativeSetupFailed {
                interface: format!("{name}: {e}"),
            })?;
        Ok(name)
    }

    async fn setup_softap_iface(
        &self,
        _callback: InterfaceCallbackHandle,
        work_source: WorkSource,
        bridged: bool,
    ) -> Result<String, WardenError> {
        let name = self.alloc_iface_name("ap");
        debug!(?work_source, bridged, interface = %name, "setting up softap interface");
        self.netlink
            .set_link_up(&name)
            .await
            .map_err(|e| WardenError::NativeSetupFailed {
                interface: format!("{name}: {e}"),
            })?;
        Ok(name)
    }

    async fn setup_bridge_iface(
        &self,
        _callback: InterfaceCallbackHandle,
    ) -> Result<String, WardenError> {
        let name = self.alloc_iface_name("br");
        self.netlink
            .set_link_up(&name)
            .await
            .map_err(|e| WardenError::NativeSetupFailed {
                interface: format!("{name}: {e}"),
            })?;
        Ok(name)
    }

    async fn switch_client_to_scan(&self, interface: &str) -> Result<(), WardenError> {
        self.netlink
            .set_link_up(interface)
            .await
            .map_err(|e| WardenError::InterfaceDownUnexpected {
                interface: format!("{interface}: {e}"),
            })
    }

    async fn switch_client_to_connectivity(&self, interface: &str) -> Result<(), WardenError> {
        self.netlink
            .set_link_up(interface)
            .await
            .map_err(|e| WardenError::InterfaceDownUnexpected {
                interface: format!("{interface}: {e}"),
            })
    }

    async fn teardown_iface(&self, interface: &str) {
        if let Err(e) = self.netlink.set_link_down(interface).await {
            warn!(interface, "failed to bring interface down during teardown: {e}");
        }
        if let Err(e) = self.netlink.delete_link(interface).await {
            warn!(interface, "failed to delete interface during teardown: {e}");
        }
    }

    async fn start_softap(
        &self,
        interface: &str,
        config: &SoftApConfiguration,
        tethered: bool,
        _listener: SoftApListenerHandle,
    ) -> Result<(), WardenError> {
        debug!(interface, tethered, "starting hostapd");
        let channel = ChannelSpec {
            primary_channel: 6,
            band_2ghz: true,
        };
        let conf = Self::render_hostapd_conf(interface, config, &channel);
        let path = self.hostapd_conf_path(interface);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WardenError::StartFailureGeneric {
                    interface: interface.to_string(),
                    reason: format!("creating hostapd conf dir: {e}"),
                })?;
        }
        tokio::fs::write(&path, conf)
            .await
            .map_err(|e| WardenError::StartFailureGeneric {
                interface: interface.to_string(),
                reason: format!("writing hostapd conf: {e}"),
            })?;

        let status = Command::new("hostapd")
            .arg("-B")
            .arg(&path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| WardenError::StartFailureGeneric {
                interface: interface.to_string(),
                reason: format!("spawning hostapd: {e}"),
            })?;

        if !status.success() {
            return Err(WardenError::StartFailureGeneric {
                interface: interface.to_string(),
                reason: format!("hostapd exited with {status}"),
            });
        }
        info!(interface, "hostapd started");
        Ok(())
    }

    async fn set_country_code(&self, interface: &str, country_code: &str) -> Result<(), WardenError> {
        let status = Command::new("iw")
            .args(["reg", "set", country_code])
            .status()
            .await
            .map_err(|e| WardenError::StartFailureGeneric {
                interface: interface.to_string(),
                reason: format!("setting country code: {e}"),
            })?;
        if !status.success() {
            return Err(WardenError::StartFailureGeneric {
                interface: interface.to_string(),
                reason: "iw reg set failed".into(),
            });
        }
        Ok(())
    }

    async fn set_ap_mac_address(&self, interface: &str, mac: MacAddr6) -> Result<(), WardenError> {
        let status = Command::new("ip")
            .args(["link", "set", interface, "address", &mac.to_string()])
            .status()
            .await
            .map_err(|e| WardenError::StartFailureGeneric {
                interface: interface.to_string(),
                reason: format!("setting ap mac address: {e}"),
            })?;
        if !status.success() {
            return Err(WardenError::StartFailureGeneric {
                interface: interface.to_string(),
                reason: "ip link set address failed".into(),
            });
        }
        Ok(())
    }

    async fn reset_ap_mac_to_factory(&self, interface: &str) -> Result<(), WardenError> {
        let _ = Command::new("ip")
            .args(["link", "set", interface, "address", "00:00:00:00:00:00"])
            .status()
            .await;
        Ok(())
    }

    async fn is_ap_set_mac_supported(&self, _interface: &str) -> bool {
        true
    }

    async fn is_interface_up(&self, interface: &str) -> bool {
        self.netlink.is_link_up(interface).await
    }

    async fn force_client_disconnect(
        &self,
        interface: &str,
        mac: MacAddr6,
        reason: DisconnectReason,
    ) -> Result<(), WardenError> {
        debug!(interface, %mac, ?reason, "forcing client disconnect");
        let status = Command::new("hostapd_cli")
            .args(["-i", interface, "deauthenticate", &mac.to_string()])
            .status()
            .await
            .map_err(|e| WardenError::Collaborator(format!("hostapd_cli: {e}")))?;
        if !status.success() {
            return Err(WardenError::Collaborator(
                "hostapd_cli deauthenticate failed".into(),
            ));
        }
        Ok(())
    }

    async fn phy_capabilities(&self, _interface: &str) -> PhyCapabilities {
        PhyCapabilities {
            max_clients: 8,
            supports_5ghz: true,
            supports_6ghz: false,
            softap: SoftApCapability::WPA3 | SoftApCapability::ACS_OFFLOAD,
        }
    }

    async fn compute_channel(
        &self,
        _interface: &str,
        config: &SoftApConfiguration,
    ) -> Result<ChannelSpec, WardenError> {
        use wlan_warden_core::softap::BandPreference;
        let band_2ghz = !matches!(config.band_preference, BandPreference::Band5Ghz);
        Ok(ChannelSpec {
            primary_channel: if band_2ghz { 6 } else { 36 },
            band_2ghz,
        })
    }
}
