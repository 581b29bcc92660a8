use tokio::sync::oneshot;

use crate::collaborators::ScorerHandle;
use crate::error::WardenError;
use crate::native::DisconnectReason;
use crate::role::Role;
use crate::softap::SoftApConfiguration;
use crate::warden::PmsmId;

/// A command posted to the Mode Warden's single event queue. The queue is
/// drained serially by the one task running [`crate::warden::ModeWarden::run`],
/// which is what gives the whole system its single-thread semantics.
///
/// `Debug` is implemented by hand below: `InstallScorer`'s `ScorerHandle` is
/// an `Arc<dyn Any>` and can't derive it.
pub enum WardenCommand {
    WifiToggled(bool),
    AirplaneToggled(bool),
    ScanAlwaysModeChanged(bool),
    LocationModeChanged(bool),
    EmergencyCallStarted,
    EmergencyCallEnded,
    RequestScanOnly {
        reply: oneshot::Sender<Result<PmsmId, WardenError>>,
    },
    RequestPrimaryConnection {
        reply: oneshot::Sender<Result<PmsmId, WardenError>>,
    },
    RequestLocalOnly {
        reply: oneshot::Sender<Result<PmsmId, WardenError>>,
    },
    RemoveLocalOnly {
        id: PmsmId,
        reply: oneshot::Sender<Result<(), WardenError>>,
    },
    RequestSoftAp {
        role: Role,
        config: SoftApConfiguration,
        tethered: bool,
        reply: oneshot::Sender<Result<PmsmId, WardenError>>,
    },
    StopSoftAp {
        id: PmsmId,
        reply: oneshot::Sender<Result<(), WardenError>>,
    },
    UpdateSoftApConfig {
        id: PmsmId,
        config: SoftApConfiguration,
        reply: oneshot::Sender<Result<(), WardenError>>,
    },
    SwitchRole {
        id: PmsmId,
        to: Role,
        reply: oneshot::Sender<Result<(), WardenError>>,
    },
    InstallScorer {
        scorer: ScorerHandle,
        reply: oneshot::Sender<Result<(), WardenError>>,
    },
    RecoveryRestartWifi,
    /// Self-posted after `RecoveryRestartWifi` has torn everything down and
    /// the bounded recovery delay has elapsed; re-derives Wi-Fi state from
    /// policy the same way any other toggle would.
    RecoveryRestartContinue,
    /// Self-posted wake-up for a SoftAp's auto-shutdown timer. `generation`
    /// guards against a stale timer firing after the timeout was cancelled
    /// or rescheduled.
    SoftApIdleTimeout {
        id: PmsmId,
        generation: u64,
    },
    /// An event the native layer posted for a specific PMSM's interface,
    /// re-dispatched onto the Warden's queue so every state mutation still
    /// happens on the single event-loop task.
    NativeEvent {
        id: PmsmId,
        event: PmsmNativeEvent,
    },
    Shutdown,
}

impl std::fmt::Debug for WardenCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WifiToggled(on) => f.debug_tuple("WifiToggled").field(on).finish(),
            Self::AirplaneToggled(on) => f.debug_tuple("AirplaneToggled").field(on).finish(),
            Self::ScanAlwaysModeChanged(on) => {
                f.debug_tuple("ScanAlwaysModeChanged").field(on).finish()
            }
            Self::LocationModeChanged(on) => f.debug_tuple("LocationModeChanged").field(on).finish(),
            Self::EmergencyCallStarted => write!(f, "EmergencyCallStarted"),
            Self::EmergencyCallEnded => write!(f, "EmergencyCallEnded"),
            Self::RequestScanOnly { .. } => write!(f, "RequestScanOnly"),
            Self::RequestPrimaryConnection { .. } => write!(f, "RequestPrimaryConnection"),
            Self::RequestLocalOnly { .. } => write!(f, "RequestLocalOnly"),
            Self::RemoveLocalOnly { id, .. } => {
                f.debug_struct("RemoveLocalOnly").field("id", id).finish()
            }
            Self::RequestSoftAp { role, tethered, .. } => f
                .debug_struct("RequestSoftAp")
                .field("role", role)
                .field("tethered", tethered)
                .finish(),
            Self::StopSoftAp { id, .. } => f.debug_struct("StopSoftAp").field("id", id).finish(),
            Self::UpdateSoftApConfig { id, .. } => {
                f.debug_struct("UpdateSoftApConfig").field("id", id).finish()
            }
            Self::SwitchRole { id, to, .. } => f
                .debug_struct("SwitchRole")
                .field("id", id)
                .field("to", to)
                .finish(),
            Self::InstallScorer { .. } => write!(f, "InstallScorer"),
            Self::RecoveryRestartWifi => write!(f, "RecoveryRestartWifi"),
            Self::RecoveryRestartContinue => write!(f, "RecoveryRestartContinue"),
            Self::SoftApIdleTimeout { id, generation } => f
                .debug_struct("SoftApIdleTimeout")
                .field("id", id)
                .field("generation", generation)
                .finish(),
            Self::NativeEvent { id, event } => f
                .debug_struct("NativeEvent")
                .field("id", id)
                .field("event", event)
                .finish(),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PmsmNativeEvent {
    InterfaceUp,
    InterfaceDown,
    InterfaceDestroyed,
    DaemonDied,
    SoftApStarted,
    SoftApStartFailed(String),
    ClientConnected(macaddr::MacAddr6),
    ClientDisconnected(macaddr::MacAddr6),
    /// Re-tries a force-disconnect that previously failed; pulled off the
    /// SoftAp's pending-disconnect map on success.
    RetryForceDisconnect(macaddr::MacAddr6, DisconnectReason),
}

/// Emitted on `registerModeChangeCallback`'s broadcast channel in the exact
/// order the owning PMSM/Warden produced them (ordering law L2).
#[derive(Debug, Clone)]
pub enum ModeChangeEvent {
    Added { id: PmsmId, role: Role },
    Removed { id: PmsmId, role: Role },
    RoleChanged { id: PmsmId, from: Role, to: Role },
    BlockedClientConnecting { id: PmsmId, mac: macaddr::MacAddr6 },
}
