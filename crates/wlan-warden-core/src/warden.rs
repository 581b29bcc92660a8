use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use macaddr::MacAddr6;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use wlan_warden_macrand::random_locally_administered_mac;

use crate::collaborators::{ConnectionEngine, MetricsSink, PolicyStore, ScorerHandle, TelephonyObserver};
use crate::config::WardenConfig;
use crate::dsc::{self, DscOutcome};
use crate::error::WardenError;
use crate::events::{ModeChangeEvent, PmsmNativeEvent, WardenCommand};
use crate::graveyard::{Graveyard, GraveyardEntry};
use crate::native::{DisconnectReason, InterfaceEvent, NativeInterface, SoftApHalEvent, WorkSource};
use crate::pmsm::client::{ClientEvent, ClientPmsm, ClientState};
use crate::pmsm::softap::{SoftApEvent, SoftApPmsm};
use crate::role::Role;
use crate::softap::{AdmissionDecision, ClientAdmissionPolicy, SoftApConfiguration};

/// Opaque identifier for a live or buried PMSM, allocated by the
/// [`ModeWarden`] from a monotonic counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PmsmId(u64);

impl PmsmId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

enum LivePmsm {
    Client(ClientPmsm),
    SoftAp(SoftApPmsm),
}

impl LivePmsm {
    fn role(&self) -> Role {
        match self {
            LivePmsm::Client(c) => c.role,
            LivePmsm::SoftAp(s) => s.role,
        }
    }

    fn is_terminal(&self) -> bool {
        match self {
            LivePmsm::Client(c) => c.is_terminal(),
            LivePmsm::SoftAp(s) => s.is_terminal(),
        }
    }
}

/// A cheaply-clonable facade over the Mode Warden's single command queue.
/// Every method either fires a command and returns immediately, or awaits a
/// single reply over a oneshot channel — the Warden itself processes
/// exactly one command at a time.
#[derive(Clone)]
pub struct ModeWardenHandle {
    tx: mpsc::UnboundedSender<WardenCommand>,
    mode_change_tx: broadcast::Sender<ModeChangeEvent>,
    shutting_down: Arc<AtomicBool>,
}

impl ModeWardenHandle {
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn subscribe_mode_changes(&self) -> broadcast::Receiver<ModeChangeEvent> {
        self.mode_change_tx.subscribe()
    }

    pub fn wifi_toggled(&self, on: bool) {
        let _ = self.tx.send(WardenCommand::WifiToggled(on));
    }

    pub fn airplane_toggled(&self, on: bool) {
        let _ = self.tx.send(WardenCommand::AirplaneToggled(on));
    }

    pub fn scan_always_mode_changed(&self, on: bool) {
        let _ = self.tx.send(WardenCommand::ScanAlwaysModeChanged(on));
    }

    pub fn location_mode_changed(&self, on: bool) {
        let _ = self.tx.send(WardenCommand::LocationModeChanged(on));
    }

    pub fn emergency_call_started(&self) {
        let _ = self.tx.send(WardenCommand::EmergencyCallStarted);
    }

    pub fn emergency_call_ended(&self) {
        let _ = self.tx.send(WardenCommand::EmergencyCallEnded);
    }

    pub fn recovery_restart_wifi(&self) {
        let _ = self.tx.send(WardenCommand::RecoveryRestartWifi);
    }

    pub async fn request_scan_only(&self) -> Result<PmsmId, WardenError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WardenCommand::RequestScanOnly { reply })
            .map_err(|_| WardenError::DaemonDied)?;
        rx.await.map_err(|_| WardenError::DaemonDied)?
    }

    pub async fn request_primary_connection(&self) -> Result<PmsmId, WardenError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WardenCommand::RequestPrimaryConnection { reply })
            .map_err(|_| WardenError::DaemonDied)?;
        rx.await.map_err(|_| WardenError::DaemonDied)?
    }

    pub async fn request_local_only(&self) -> Result<PmsmId, WardenError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WardenCommand::RequestLocalOnly { reply })
            .map_err(|_| WardenError::DaemonDied)?;
        rx.await.map_err(|_| WardenError::DaemonDied)?
    }

    pub async fn remove_local_only(&self, id: PmsmId) -> Result<(), WardenError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WardenCommand::RemoveLocalOnly { id, reply })
            .map_err(|_| WardenError::DaemonDied)?;
        rx.await.map_err(|_| WardenError::DaemonDied)?
    }

    pub async fn request_softap(
        &self,
        role: Role,
        config: SoftApConfiguration,
        tethered: bool,
    ) -> Result<PmsmId, WardenError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WardenCommand::RequestSoftAp {
                role,
                config,
                tethered,
                reply,
            })
            .map_err(|_| WardenError::DaemonDied)?;
        rx.await.map_err(|_| WardenError::DaemonDied)?
    }

    pub async fn stop_softap(&self, id: PmsmId) -> Result<(), WardenError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WardenCommand::StopSoftAp { id, reply })
            .map_err(|_| WardenError::DaemonDied)?;
        rx.await.map_err(|_| WardenError::DaemonDied)?
    }

    pub async fn update_softap_config(
        &self,
        id: PmsmId,
        config: SoftApConfiguration,
    ) -> Result<(), WardenError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WardenCommand::UpdateSoftApConfig { id, config, reply })
            .map_err(|_| WardenError::DaemonDied)?;
        rx.await.map_err(|_| WardenError::DaemonDied)?
    }

    pub async fn switch_role(&self, id: PmsmId, to: Role) -> Result<(), WardenError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WardenCommand::SwitchRole { id, to, reply })
            .map_err(|_| WardenError::DaemonDied)?;
        rx.await.map_err(|_| WardenError::DaemonDied)?
    }

    pub async fn install_scorer(&self, scorer: ScorerHandle) -> Result<(), WardenError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WardenCommand::InstallScorer { scorer, reply })
            .map_err(|_| WardenError::DaemonDied)?;
        rx.await.map_err(|_| WardenError::DaemonDied)?
    }

    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let _ = self.tx.send(WardenCommand::Shutdown);
    }
}

/// Collaborators the Warden needs injected; grouped so constructing one is
/// a single call rather than a five-argument function.
pub struct WardenCollaborators {
    pub native: Arc<dyn NativeInterface>,
    pub policy_store: Arc<dyn PolicyStore>,
    pub telephony: Arc<dyn TelephonyObserver>,
    pub connection_engine: Arc<dyn ConnectionEngine>,
    pub metrics: Arc<dyn MetricsSink>,
}

/// The Mode Warden: owns every live PMSM and processes commands from a
/// single queue on a single task, which is the entire concurrency model
/// this crate implements (see `SPEC_FULL.md` §5).
pub struct ModeWarden {
    config: WardenConfig,
    collaborators: WardenCollaborators,
    live: HashMap<PmsmId, LivePmsm>,
    graveyard: Graveyard,
    next_id: AtomicU64,
    /// Persisted Wi-Fi toggle, as last reported by `WIFI_TOGGLED`.
    wifi_toggle: bool,
    airplane_mode: bool,
    location_mode: bool,
    scan_always_available: bool,
    emergency_active: bool,
    /// Connection-scoring engine handed in via `InstallScorer`, re-applied
    /// to whichever PMSM holds `CLIENT_PRIMARY` across role switches and
    /// restarts.
    cached_scorer: Option<ScorerHandle>,
    mode_change_tx: broadcast::Sender<ModeChangeEvent>,
    self_tx: mpsc::UnboundedSender<WardenCommand>,
}

impl ModeWarden {
    /// Builds a Warden and its handle. The returned handle's `mode_change`
    /// receiver must be subscribed before any command that can emit an
    /// event, or early events are lost (broadcast channel semantics).
    pub fn new(
        config: WardenConfig,
        collaborators: WardenCollaborators,
    ) -> (Self, ModeWardenHandle, mpsc::UnboundedReceiver<WardenCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (mode_change_tx, _) = broadcast::channel(256);
        let shutting_down = Arc::new(AtomicBool::new(false));
        let graveyard_capacity = config.graveyard_capacity;

        let warden = Self {
            config,
            collaborators,
            live: HashMap::new(),
            graveyard: Graveyard::new(graveyard_capacity),
            next_id: AtomicU64::new(1),
            wifi_toggle: false,
            airplane_mode: false,
            location_mode: false,
            scan_always_available: false,
            emergency_active: false,
            cached_scorer: None,
            mode_change_tx: mode_change_tx.clone(),
            self_tx: tx.clone(),
        };
        let handle = ModeWardenHandle {
            tx,
            mode_change_tx,
            shutting_down,
        };
        (warden, handle, rx)
    }

    fn alloc_id(&self) -> PmsmId {
        PmsmId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn emit(&self, event: ModeChangeEvent) {
        let _ = self.mode_change_tx.send(event);
    }

    /// I1: a station-role client PMSM is live exactly when the current
    /// policy inputs say one should be (`shouldEnableSta`). Suspended
    /// during an active emergency call, since the overlay deliberately
    /// keeps a client alive independent of the toggle state until the call
    /// ends (see `reconcile_sta`).
    pub fn invariant_live_set_matches_state(&self) -> bool {
        if self.emergency_active {
            return true;
        }
        let has_sta_client = self
            .live
            .values()
            .any(|p| matches!(p.role(), Role::ClientPrimary | Role::ClientScanOnly));
        self.should_enable_sta() == has_sta_client
    }

    /// I2: at most one PMSM holds each single-holder role. `ClientLocalOnly`
    /// is excluded — its lifecycle is independent of the other client roles
    /// and the spec does not cap it at one.
    pub fn invariant_single_holder_roles(&self) -> bool {
        for role in [
            Role::ClientPrimary,
            Role::ClientScanOnly,
            Role::SoftApTethered,
            Role::SoftApLocalOnly,
        ] {
            if self.live.values().filter(|p| p.role() == role).count() > 1 {
                return false;
            }
        }
        true
    }

    /// I3: distinct live PMSMs never share an interface name.
    pub fn invariant_distinct_interfaces(&self) -> bool {
        let mut seen = HashSet::new();
        for p in self.live.values() {
            let interface = match p {
                LivePmsm::Client(c) => c.interface.clone(),
                LivePmsm::SoftAp(s) => s.interface.clone(),
            };
            if let Some(interface) = interface {
                if !seen.insert(interface) {
                    return false;
                }
            }
        }
        true
    }

    /// I4: the cached connection-scoring engine is installed on the unique
    /// live `CLIENT_PRIMARY`, whenever one exists and a scorer has been
    /// provided at all.
    pub fn invariant_scorer_on_primary(&self) -> bool {
        if self.cached_scorer.is_none() {
            return true;
        }
        self.live
            .values()
            .filter_map(|p| match p {
                LivePmsm::Client(c) if c.role == Role::ClientPrimary => Some(c),
                _ => None,
            })
            .all(|c| c.scorer.is_some())
    }

    /// I5: while the emergency overlay is active, no SoftAp PMSM is live.
    pub fn invariant_emergency_softap_excluded(&self) -> bool {
        if !self.emergency_active {
            return true;
        }
        !self.live.values().any(|p| matches!(p, LivePmsm::SoftAp(_)))
    }

    /// Sanity check, not one of the testable invariants: no terminal PMSM
    /// lingers in the live set — it is moved to the graveyard in the same
    /// dispatch step that drove it to `Stopped`.
    pub fn sanity_no_terminal_in_live(&self) -> bool {
        self.live.values().all(|p| !p.is_terminal())
    }

    /// Sanity check: every graveyard family stays within its configured
    /// capacity.
    pub fn sanity_graveyard_bounded(&self) -> bool {
        for role in [
            Role::ClientPrimary,
            Role::ClientScanOnly,
            Role::ClientLocalOnly,
            Role::SoftApTethered,
            Role::SoftApLocalOnly,
        ] {
            if self.graveyard.len(role) > self.config.graveyard_capacity {
                return false;
            }
        }
        true
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<WardenCommand>) {
        while let Some(cmd) = rx.recv().await {
            debug!(?cmd, "processing warden command");
            let stop = matches!(cmd, WardenCommand::Shutdown);
            self.handle_command(cmd).await;
            if stop {
                break;
            }
        }
        info!("mode warden event loop stopped");
    }

    async fn handle_command(&mut self, cmd: WardenCommand) {
        match cmd {
            WardenCommand::WifiToggled(on) => {
                self.wifi_toggle = on;
                self.reconcile_sta().await;
            }
            WardenCommand::AirplaneToggled(on) => {
                self.airplane_mode = on;
                self.reconcile_sta().await;
            }
            WardenCommand::ScanAlwaysModeChanged(on) => {
                self.scan_always_available = on;
                self.reconcile_sta().await;
            }
            WardenCommand::LocationModeChanged(on) => {
                self.location_mode = on;
                self.reconcile_sta().await;
            }
            WardenCommand::EmergencyCallStarted => {
                self.emergency_active = true;
                self.teardown_all_softap().await;
                let policy = self.collaborators.policy_store.carrier_policy().await;
                if policy.disable_wifi_in_emergency {
                    self.teardown_all_clients().await;
                }
            }
            WardenCommand::EmergencyCallEnded => {
                self.emergency_active = false;
                self.reconcile_sta().await;
            }
            WardenCommand::RequestScanOnly { reply } => {
                let result = self.request_scan_only().await;
                let _ = reply.send(result);
            }
            WardenCommand::RequestPrimaryConnection { reply } => {
                let result = self.request_primary().await;
                let _ = reply.send(result);
            }
            WardenCommand::RequestLocalOnly { reply } => {
                let result = self.request_local_only().await;
                let _ = reply.send(result);
            }
            WardenCommand::RemoveLocalOnly { id, reply } => {
                let result = self.remove_local_only(id).await;
                let _ = reply.send(result);
            }
            WardenCommand::RequestSoftAp {
                role,
                config,
                tethered,
                reply,
            } => {
                let result = self.create_softap(role, config, tethered).await;
                let _ = reply.send(result);
            }
            WardenCommand::StopSoftAp { id, reply } => {
                let result = self.stop_softap(id).await;
                let _ = reply.send(result);
            }
            WardenCommand::UpdateSoftApConfig { id, config, reply } => {
                let result = self.update_softap_config(id, config).await;
                let _ = reply.send(result);
            }
            WardenCommand::SwitchRole { id, to, reply } => {
                let result = self.switch_role(id, to).await;
                let _ = reply.send(result);
            }
            WardenCommand::InstallScorer { scorer, reply } => {
                self.cached_scorer = Some(scorer);
                if let Some((&id, _)) =
                    self.live.iter().find(|(_, p)| p.role() == Role::ClientPrimary)
                {
                    self.reinstall_scorer(id);
                }
                let _ = reply.send(Ok(()));
            }
            WardenCommand::RecoveryRestartWifi => {
                warn!("requesting bug report before recovery-restarting wifi");
                self.teardown_all_clients().await;
                self.schedule_recovery_restart_continue();
            }
            WardenCommand::RecoveryRestartContinue => {
                self.reconcile_sta().await;
            }
            WardenCommand::SoftApIdleTimeout { id, generation } => {
                self.fire_softap_idle_timeout(id, generation).await;
            }
            WardenCommand::NativeEvent { id, event } => {
                self.apply_native_event(id, event).await;
            }
            WardenCommand::Shutdown => {
                self.teardown_all_clients().await;
                self.teardown_all_softap().await;
            }
        }
    }

    /// `shouldEnableSta := wifiToggle ∨ (locationMode ∧ scanAlwaysAvailable)`.
    fn should_enable_sta(&self) -> bool {
        self.wifi_toggle || (self.location_mode && self.scan_always_available)
    }

    /// Re-derives whether a station-role client PMSM should exist and, if
    /// so, which role it should hold, then creates/switches/tears down to
    /// match. Airplane mode bubbles straight to "no station client" the
    /// same way it bubbles to `Default` in the spec's state machine. An
    /// active emergency call suspends reconciliation entirely — the
    /// overlay is the one deciding what stays alive until it ends.
    async fn reconcile_sta(&mut self) {
        if self.emergency_active {
            return;
        }
        if self.airplane_mode || !self.should_enable_sta() {
            self.teardown_sta_clients().await;
            return;
        }

        let desired_role = if self.wifi_toggle {
            Role::ClientPrimary
        } else {
            Role::ClientScanOnly
        };
        let existing = self
            .live
            .iter()
            .find(|(_, p)| matches!(p.role(), Role::ClientPrimary | Role::ClientScanOnly))
            .map(|(&id, _)| id);

        match existing {
            Some(id) => {
                if self.live.get(&id).map(|p| p.role()) != Some(desired_role) {
                    let _ = self.switch_role(id, desired_role).await;
                }
            }
            None => {
                let _ = self.create_client(desired_role).await;
            }
        }
    }

    async fn create_client(&mut self, role: Role) -> Result<PmsmId, WardenError> {
        let id = self.alloc_id();
        let (cb_tx, mut cb_rx) = tokio::sync::mpsc::unbounded_channel();
        let interface = self
            .collaborators
            .native
            .setup_client_scan_iface(cb_tx)
            .await?;
        // Drain and forward any immediate callback events via self_tx so
        // they still flow through the single command queue.
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            while let Some(ev) = cb_rx.recv().await {
                let mapped = map_interface_event(ev);
                let _ = self_tx.send(WardenCommand::NativeEvent { id, event: mapped });
            }
        });

        let mut pmsm = ClientPmsm::new(id, role);
        pmsm.handle(ClientEvent::StartRequested);
        pmsm.handle(ClientEvent::InterfaceReady(interface));
        self.live.insert(id, LivePmsm::Client(pmsm));
        self.emit(ModeChangeEvent::Added { id, role });
        self.reinstall_scorer(id);
        Ok(id)
    }

    async fn request_primary(&mut self) -> Result<PmsmId, WardenError> {
        if let Some((&id, _)) = self
            .live
            .iter()
            .find(|(_, p)| p.role() == Role::ClientPrimary)
        {
            return Ok(id);
        }
        if let Some((&id, _)) = self
            .live
            .iter()
            .find(|(_, p)| p.role() == Role::ClientScanOnly)
        {
            self.switch_role(id, Role::ClientPrimary).await?;
            return Ok(id);
        }
        self.create_client(Role::ClientPrimary).await
    }

    async fn request_scan_only(&mut self) -> Result<PmsmId, WardenError> {
        if let Some((&id, _)) = self
            .live
            .iter()
            .find(|(_, p)| p.role() == Role::ClientScanOnly)
        {
            return Ok(id);
        }
        if let Some((&id, _)) = self
            .live
            .iter()
            .find(|(_, p)| p.role() == Role::ClientPrimary)
        {
            self.switch_role(id, Role::ClientScanOnly).await?;
            return Ok(id);
        }
        self.create_client(Role::ClientScanOnly).await
    }

    /// `requestLocalOnlyClientModeManager`. When the platform cannot run a
    /// client and a SoftAp interface concurrently, falls back to handing
    /// out the primary connection rather than a dedicated local-only
    /// interface (see `SPEC_FULL.md` §9).
    async fn request_local_only(&mut self) -> Result<PmsmId, WardenError> {
        if !self.config.sta_ap_concurrency_supported {
            return self.request_primary().await;
        }
        if let Some((&id, _)) = self
            .live
            .iter()
            .find(|(_, p)| p.role() == Role::ClientLocalOnly)
        {
            return Ok(id);
        }
        self.create_client(Role::ClientLocalOnly).await
    }

    async fn remove_local_only(&mut self, id: PmsmId) -> Result<(), WardenError> {
        match self.live.get(&id) {
            Some(LivePmsm::Client(c)) if c.role == Role::ClientLocalOnly => {
                self.teardown_client(id).await;
                Ok(())
            }
            Some(_) => Err(WardenError::UnsupportedConfiguration {
                reason: "pmsm is not CLIENT_LOCAL_ONLY".into(),
            }),
            None => Err(WardenError::ConfigInvalid {
                reason: format!("no live pmsm {}", id.raw()),
            }),
        }
    }

    async fn switch_role(&mut self, id: PmsmId, to: Role) -> Result<(), WardenError> {
        if to == Role::ClientPrimary
            && self
                .live
                .iter()
                .any(|(&other, p)| other != id && p.role() == Role::ClientPrimary)
        {
            return Err(WardenError::UnsupportedConfiguration {
                reason: "another client pmsm already holds CLIENT_PRIMARY".into(),
            });
        }
        let from = match self.live.get_mut(&id) {
            Some(LivePmsm::Client(c)) => {
                let from = c.role;
                if !from.can_switch_to(to) {
                    return Err(WardenError::UnsupportedConfiguration {
                        reason: format!("cannot switch {from} to {to}"),
                    });
                }
                c.handle(ClientEvent::RoleSwitchRequested(to));
                from
            }
            Some(LivePmsm::SoftAp(_)) => {
                return Err(WardenError::UnsupportedConfiguration {
                    reason: "softap roles are fixed at creation".into(),
                })
            }
            None => {
                return Err(WardenError::ConfigInvalid {
                    reason: format!("no live pmsm {}", id.raw()),
                })
            }
        };
        self.collaborators
            .metrics
            .record_role_change(from, to)
            .await;
        self.emit(ModeChangeEvent::RoleChanged { id, from, to });
        if to == Role::ClientPrimary {
            self.reinstall_scorer(id);
        }
        Ok(())
    }

    /// Re-applies the cached scorer to `id` if it holds `CLIENT_PRIMARY`.
    /// A no-op whenever no scorer has been installed, or `id` isn't
    /// primary — safe to call unconditionally after any role assignment.
    fn reinstall_scorer(&mut self, id: PmsmId) {
        if self.cached_scorer.is_none() {
            return;
        }
        if let Some(LivePmsm::Client(c)) = self.live.get_mut(&id) {
            if c.role == Role::ClientPrimary {
                c.scorer = self.cached_scorer.clone();
            }
        }
    }

    async fn create_softap(
        &mut self,
        role: Role,
        config: SoftApConfiguration,
        tethered: bool,
    ) -> Result<PmsmId, WardenError> {
        if config.ssid.trim().is_empty() {
            return Err(WardenError::ConfigInvalid {
                reason: "ssid must not be empty".into(),
            });
        }

        let id = self.alloc_id();
        let mut pmsm;

        let (cb_tx, mut cb_rx) = tokio::sync::mpsc::unbounded_channel();
        let (listener_tx, mut listener_rx) = tokio::sync::mpsc::unbounded_channel();
        let ws = WorkSource {
            requester: "mode-warden".into(),
        };

        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            while let Some(ev) = cb_rx.recv().await {
                let mapped = map_interface_event(ev);
                let _ = self_tx.send(WardenCommand::NativeEvent { id, event: mapped });
            }
        });
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            while let Some(ev) = listener_rx.recv().await {
                if let Some(mapped) = map_softap_hal_event(ev) {
                    let _ = self_tx.send(WardenCommand::NativeEvent { id, event: mapped });
                }
            }
        });

        let native = Arc::clone(&self.collaborators.native);

        // Dual-band bridged AP interfaces aren't modeled by `SoftApConfiguration`;
        // every SoftAp PMSM this crate creates owns a single radio.
        let interface = match native.setup_softap_iface(cb_tx, ws, false).await {
            Ok(iface) => iface,
            Err(err) => {
                return Err(err);
            }
        };

        let caps = native.phy_capabilities(&interface).await;
        let admission = ClientAdmissionPolicy::new(caps.max_clients)
            .with_allowed(config.allowed_clients.clone())
            .with_blocked(config.blocked_clients.clone())
            .with_user_max(config.user_max_clients);
        let effective_max = admission.effective_max();
        let idle_timeout = config.idle_timeout.or(if config.auto_shutdown {
            Some(self.config.softap_default_idle_timeout)
        } else {
            None
        });
        let auto_shutdown = config.auto_shutdown;
        pmsm = SoftApPmsm::new(id, role, admission, caps.max_clients, config.clone(), idle_timeout);
        pmsm.handle(SoftApEvent::StartRequested);
        pmsm.handle(SoftApEvent::Validated);
        pmsm.handle(SoftApEvent::IfaceReady(interface.clone()));

        if native.is_ap_set_mac_supported(&interface).await {
            let mac = random_locally_administered_mac();
            if let Err(err) = native.set_ap_mac_address(&interface, mac).await {
                pmsm.handle(SoftApEvent::StartFailed(err.clone()));
                self.bury(pmsm_to_live(pmsm));
                return Err(err);
            }
        }
        pmsm.handle(SoftApEvent::BssidSet);

        if let Err(err) = native.set_country_code(&interface, "00").await {
            pmsm.handle(SoftApEvent::StartFailed(err.clone()));
            self.bury(pmsm_to_live(pmsm));
            return Err(err);
        }
        pmsm.handle(SoftApEvent::CountryCodeSet);

        let channel = match native.compute_channel(&interface, &config).await {
            Ok(c) => c,
            Err(err) => {
                pmsm.handle(SoftApEvent::StartFailed(err.clone()));
                self.bury(pmsm_to_live(pmsm));
                return Err(err);
            }
        };
        let _ = channel;
        pmsm.handle(SoftApEvent::ChannelComputed);
        pmsm.handle(SoftApEvent::CapabilityChecked);

        if let Err(err) = native
            .start_softap(&interface, &config, tethered, listener_tx)
            .await
        {
            pmsm.handle(SoftApEvent::StartFailed(err.clone()));
            self.bury(pmsm_to_live(pmsm));
            return Err(err);
        }
        pmsm.handle(SoftApEvent::HostapdStarted);

        debug!(effective_max, "softap admission policy installed");
        if auto_shutdown {
            if let Some(delay) = idle_timeout {
                self.schedule_idle_timeout(id, pmsm.idle_timer_generation, delay);
            }
        }
        self.live.insert(id, LivePmsm::SoftAp(pmsm));
        self.emit(ModeChangeEvent::Added { id, role });
        Ok(id)
    }

    async fn stop_softap(&mut self, id: PmsmId) -> Result<(), WardenError> {
        let role = match self.live.get(&id) {
            Some(LivePmsm::SoftAp(s)) => s.role,
            Some(LivePmsm::Client(_)) => {
                return Err(WardenError::ConfigInvalid {
                    reason: "pmsm is not a softap".into(),
                })
            }
            None => {
                return Err(WardenError::ConfigInvalid {
                    reason: format!("no live pmsm {}", id.raw()),
                })
            }
        };

        if let Some(LivePmsm::SoftAp(pmsm)) = self.live.get_mut(&id) {
            if let Some(interface) = pmsm.interface.clone() {
                self.collaborators.native.teardown_iface(&interface).await;
            }
            pmsm.handle(SoftApEvent::StopRequested);
            pmsm.handle(SoftApEvent::InterfaceDestroyed);
        }
        self.finalize_if_terminal(id);
        self.emit(ModeChangeEvent::Removed { id, role });
        Ok(())
    }

    /// Applies `updateSoftApConfiguration`: when the change only touches
    /// admission-affecting fields (allow/block lists, user cap, idle
    /// timeout), applies it live and re-evaluates already-connected
    /// clients against the new policy. Anything else is left for the
    /// caller to apply via stop + restart.
    async fn update_softap_config(
        &mut self,
        id: PmsmId,
        config: SoftApConfiguration,
    ) -> Result<(), WardenError> {
        if self.config_change_needs_restart(id, &config)? {
            warn!(
                id = id.raw(),
                "softap configuration change requires a restart; ignoring live update"
            );
            return Ok(());
        }

        let capability_max = match self.live.get(&id) {
            Some(LivePmsm::SoftAp(s)) => s.capability_max,
            _ => unreachable!("validated by config_change_needs_restart"),
        };
        let new_admission = ClientAdmissionPolicy::new(capability_max)
            .with_allowed(config.allowed_clients.clone())
            .with_blocked(config.blocked_clients.clone())
            .with_user_max(config.user_max_clients);

        let disallowed: Vec<MacAddr6> = match self.live.get_mut(&id) {
            Some(LivePmsm::SoftAp(pmsm)) => {
                pmsm.admission = new_admission;
                let rejected = pmsm
                    .connected_clients
                    .iter()
                    .copied()
                    .filter(|mac| pmsm.evaluate_admission(*mac) != AdmissionDecision::Allow)
                    .collect();
                pmsm.idle_timeout = config.idle_timeout.or(if config.auto_shutdown {
                    Some(self.config.softap_default_idle_timeout)
                } else {
                    None
                });
                pmsm.config = config;
                rejected
            }
            _ => unreachable!("validated by config_change_needs_restart"),
        };

        for mac in disallowed {
            self.reject_softap_client(id, mac, AdmissionDecision::NotInAllowList)
                .await;
        }

        if let Some(LivePmsm::SoftAp(pmsm)) = self.live.get_mut(&id) {
            if pmsm.connected_clients.is_empty() && pmsm.config.auto_shutdown {
                let generation = pmsm.bump_idle_generation();
                let delay = pmsm
                    .idle_timeout
                    .unwrap_or(self.config.softap_default_idle_timeout);
                self.schedule_idle_timeout(id, generation, delay);
            }
        }
        Ok(())
    }

    /// Whether applying `new` to the live PMSM's configuration needs a
    /// restart rather than an in-place update — true when any field that
    /// isn't purely an admission/timeout knob has changed.
    fn config_change_needs_restart(
        &self,
        id: PmsmId,
        new: &SoftApConfiguration,
    ) -> Result<bool, WardenError> {
        match self.live.get(&id) {
            Some(LivePmsm::SoftAp(s)) => Ok(s.config.ssid != new.ssid
                || s.config.passphrase != new.passphrase
                || s.config.band_preference != new.band_preference
                || s.config.hidden != new.hidden
                || s.config.owe_transition != new.owe_transition),
            Some(LivePmsm::Client(_)) => Err(WardenError::ConfigInvalid {
                reason: "pmsm is not a softap".into(),
            }),
            None => Err(WardenError::ConfigInvalid {
                reason: format!("no live pmsm {}", id.raw()),
            }),
        }
    }

    /// Routes a connecting station through the admission policy: admitted
    /// clients proceed through the normal PMSM event; rejected clients are
    /// force-disconnected instead, and never touch `connected_clients`.
    async fn evaluate_softap_client(&mut self, id: PmsmId, mac: MacAddr6) {
        let decision = match self.live.get(&id) {
            Some(LivePmsm::SoftAp(s)) => s.evaluate_admission(mac),
            _ => return,
        };

        match decision {
            AdmissionDecision::Allow => {
                if let Some(LivePmsm::SoftAp(pmsm)) = self.live.get_mut(&id) {
                    pmsm.handle(SoftApEvent::ClientConnected(mac));
                    pmsm.cancel_idle_timeout();
                }
            }
            other => self.reject_softap_client(id, mac, other).await,
        }
    }

    /// `onBlockedClientConnecting` + `forceClientDisconnect`, with the
    /// once-per-settings-epoch `NO_MORE_STAS` metric and a pending-
    /// disconnect retry when the native force-disconnect itself fails.
    async fn reject_softap_client(&mut self, id: PmsmId, mac: MacAddr6, decision: AdmissionDecision) {
        self.emit(ModeChangeEvent::BlockedClientConnecting { id, mac });
        let reason = match decision {
            AdmissionDecision::NoMoreStations => DisconnectReason::NoMoreStations,
            _ => DisconnectReason::Blocklisted,
        };

        let interface = match self.live.get(&id) {
            Some(LivePmsm::SoftAp(s)) => s.interface.clone(),
            _ => return,
        };

        if decision == AdmissionDecision::NoMoreStations {
            let epoch = self.collaborators.policy_store.settings_epoch().await;
            let should_emit = match self.live.get_mut(&id) {
                Some(LivePmsm::SoftAp(s)) => s.admission.should_emit_no_more_stations_metric(epoch),
                _ => false,
            };
            if should_emit {
                if let Some(interface) = &interface {
                    self.collaborators.metrics.record_no_more_stations(interface).await;
                }
            }
        }

        let Some(interface) = interface else { return };
        match self
            .collaborators
            .native
            .force_client_disconnect(&interface, mac, reason)
            .await
        {
            Ok(()) => {
                if let Some(LivePmsm::SoftAp(s)) = self.live.get_mut(&id) {
                    s.pending_disconnect.remove(&mac);
                }
            }
            Err(_) => {
                if let Some(LivePmsm::SoftAp(s)) = self.live.get_mut(&id) {
                    s.pending_disconnect.insert(mac, reason);
                }
                self.schedule_pending_disconnect_retry(id, mac, reason);
            }
        }
    }

    fn schedule_pending_disconnect_retry(&self, id: PmsmId, mac: MacAddr6, reason: DisconnectReason) {
        let self_tx = self.self_tx.clone();
        let delay = self.config.softap_pending_disconnect_recheck;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = self_tx.send(WardenCommand::NativeEvent {
                id,
                event: PmsmNativeEvent::RetryForceDisconnect(mac, reason),
            });
        });
    }

    async fn retry_pending_disconnect(&mut self, id: PmsmId, mac: MacAddr6, reason: DisconnectReason) {
        let interface = match self.live.get(&id) {
            Some(LivePmsm::SoftAp(s)) if s.pending_disconnect.contains_key(&mac) => s.interface.clone(),
            _ => return,
        };
        let Some(interface) = interface else { return };
        match self
            .collaborators
            .native
            .force_client_disconnect(&interface, mac, reason)
            .await
        {
            Ok(()) => {
                if let Some(LivePmsm::SoftAp(s)) = self.live.get_mut(&id) {
                    s.pending_disconnect.remove(&mac);
                }
            }
            Err(_) => self.schedule_pending_disconnect_retry(id, mac, reason),
        }
    }

    fn schedule_idle_timeout(&self, id: PmsmId, generation: u64, delay: Duration) {
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = self_tx.send(WardenCommand::SoftApIdleTimeout { id, generation });
        });
    }

    /// Fires when a SoftAp's auto-shutdown timer expires. Simplified from
    /// the spec's literal "broadcast DISABLING, transition to Idle": this
    /// PMSM never returns to `Idle` once it owns an interface, so the
    /// equivalent here is a full stop-and-bury, which still produces the
    /// `Removed` mode-change event the spec's `DISABLING` broadcast stands
    /// in for.
    async fn fire_softap_idle_timeout(&mut self, id: PmsmId, generation: u64) {
        let should_fire = matches!(
            self.live.get(&id),
            Some(LivePmsm::SoftAp(s))
                if s.idle_timer_generation == generation
                    && s.connected_clients.is_empty()
                    && s.state == crate::pmsm::softap::SoftApState::Started
        );
        if should_fire {
            debug!(id = id.raw(), "softap idle timeout fired");
            let _ = self.stop_softap(id).await;
        }
    }

    fn schedule_recovery_restart_continue(&self) {
        let self_tx = self.self_tx.clone();
        let delay = self.config.max_recovery_restart_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = self_tx.send(WardenCommand::RecoveryRestartContinue);
        });
    }

    async fn teardown_all_clients(&mut self) {
        let ids: Vec<PmsmId> = self
            .live
            .iter()
            .filter(|(_, p)| matches!(p, LivePmsm::Client(_)))
            .map(|(&id, _)| id)
            .collect();
        for id in ids {
            self.teardown_client(id).await;
        }
    }

    /// Tears down only the station-role clients (`ClientPrimary`/
    /// `ClientScanOnly`), leaving any `ClientLocalOnly` PMSM alone — its
    /// lifecycle is driven by `request_local_only`/`remove_local_only`,
    /// not by the Wi-Fi toggle.
    async fn teardown_sta_clients(&mut self) {
        let ids: Vec<PmsmId> = self
            .live
            .iter()
            .filter(|(_, p)| matches!(p.role(), Role::ClientPrimary | Role::ClientScanOnly))
            .map(|(&id, _)| id)
            .collect();
        for id in ids {
            self.teardown_client(id).await;
        }
    }

    async fn teardown_all_softap(&mut self) {
        let ids: Vec<PmsmId> = self
            .live
            .iter()
            .filter(|(_, p)| matches!(p, LivePmsm::SoftAp(_)))
            .map(|(&id, _)| id)
            .collect();
        for id in ids {
            let _ = self.stop_softap(id).await;
        }
    }

    async fn teardown_client(&mut self, id: PmsmId) {
        let role = match self.live.get(&id) {
            Some(LivePmsm::Client(c)) => c.role,
            _ => return,
        };

        if let Some(LivePmsm::Client(pmsm)) = self.live.get_mut(&id) {
            if pmsm.state == ClientState::Started {
                let policy = self.collaborators.policy_store.carrier_policy().await;
                let outcome = dsc::defer_then(
                    &*self.collaborators.telephony,
                    policy,
                    self.config.pending_disconnect_recheck_interval,
                    self.config.deferred_stop_extra_delay,
                )
                .await;
                let was_deferred = !matches!(outcome, DscOutcome::NotDeferred);
                let timed_out = matches!(outcome, DscOutcome::TimedOut);
                self.collaborators
                    .metrics
                    .record_deferred_stop(was_deferred, timed_out, 0)
                    .await;
                pmsm.handle(ClientEvent::StopRequested);
                pmsm.handle(ClientEvent::DeferredStopResolved);
            }
            if let Some(interface) = pmsm.interface.clone() {
                let _ = self.collaborators.connection_engine.disconnect(&interface).await;
                self.collaborators.native.teardown_iface(&interface).await;
            }
            pmsm.handle(ClientEvent::InterfaceDestroyed);
        }
        self.finalize_if_terminal(id);
        self.emit(ModeChangeEvent::Removed { id, role });
    }

    fn finalize_if_terminal(&mut self, id: PmsmId) {
        let terminal = self.live.get(&id).is_some_and(|p| p.is_terminal());
        if terminal {
            if let Some(pmsm) = self.live.remove(&id) {
                self.bury(pmsm);
            }
        }
    }

    fn bury(&mut self, pmsm: LivePmsm) {
        let (id, role, log) = match pmsm {
            LivePmsm::Client(c) => (c.id, c.role, c.log),
            LivePmsm::SoftAp(s) => (s.id, s.role, s.log),
        };
        self.graveyard.bury(GraveyardEntry { id, role, log });
    }

    async fn apply_native_event(&mut self, id: PmsmId, event: PmsmNativeEvent) {
        let role = match self.live.get(&id) {
            Some(p) => p.role(),
            None => return,
        };

        match &event {
            PmsmNativeEvent::ClientConnected(mac) if matches!(self.live.get(&id), Some(LivePmsm::SoftAp(_))) => {
                self.evaluate_softap_client(id, *mac).await;
                self.finalize_if_terminal(id);
                return;
            }
            PmsmNativeEvent::RetryForceDisconnect(mac, reason)
                if matches!(self.live.get(&id), Some(LivePmsm::SoftAp(_))) =>
            {
                self.retry_pending_disconnect(id, *mac, *reason).await;
                return;
            }
            _ => {}
        }

        let mut reschedule_idle: Option<(u64, Duration)> = None;
        let escalate = match self.live.get_mut(&id) {
            Some(LivePmsm::Client(pmsm)) => {
                let client_event = match event {
                    PmsmNativeEvent::InterfaceUp => return,
                    PmsmNativeEvent::InterfaceDown => ClientEvent::InterfaceDown,
                    PmsmNativeEvent::InterfaceDestroyed => ClientEvent::InterfaceDestroyed,
                    PmsmNativeEvent::DaemonDied => ClientEvent::DaemonDied,
                    _ => return,
                };
                pmsm.handle(client_event);
                pmsm.last_error.as_ref().is_some_and(|e| e.escalates())
            }
            Some(LivePmsm::SoftAp(pmsm)) => {
                let was_disconnect = matches!(event, PmsmNativeEvent::ClientDisconnected(_));
                let softap_event = match event {
                    PmsmNativeEvent::InterfaceDown => SoftApEvent::InterfaceDown,
                    PmsmNativeEvent::InterfaceDestroyed => SoftApEvent::InterfaceDestroyed,
                    PmsmNativeEvent::DaemonDied => SoftApEvent::DaemonDied,
                    PmsmNativeEvent::SoftApStartFailed(reason) => {
                        SoftApEvent::StartFailed(WardenError::StartFailureGeneric {
                            interface: pmsm.interface.clone().unwrap_or_default(),
                            reason,
                        })
                    }
                    PmsmNativeEvent::ClientDisconnected(mac) => SoftApEvent::ClientDisconnected(mac),
                    _ => return,
                };
                pmsm.handle(softap_event);
                if was_disconnect && pmsm.connected_clients.is_empty() && pmsm.config.auto_shutdown {
                    let generation = pmsm.bump_idle_generation();
                    let delay = pmsm
                        .idle_timeout
                        .unwrap_or(self.config.softap_default_idle_timeout);
                    reschedule_idle = Some((generation, delay));
                }
                pmsm.last_error.as_ref().is_some_and(|e| e.escalates())
            }
            None => return,
        };

        if let Some((generation, delay)) = reschedule_idle {
            self.schedule_idle_timeout(id, generation, delay);
        }

        if escalate {
            warn!(id = id.raw(), "pmsm escalated an error to mode listeners");
        }
        self.finalize_if_terminal(id);
        if !self.live.contains_key(&id) {
            self.emit(ModeChangeEvent::Removed { id, role });
        }
    }
}

fn pmsm_to_live(pmsm: SoftApPmsm) -> LivePmsm {
    LivePmsm::SoftAp(pmsm)
}

fn map_interface_event(event: InterfaceEvent) -> PmsmNativeEvent {
    match event {
        InterfaceEvent::Up => PmsmNativeEvent::InterfaceUp,
        InterfaceEvent::Down => PmsmNativeEvent::InterfaceDown,
        InterfaceEvent::Destroyed => PmsmNativeEvent::InterfaceDestroyed,
        InterfaceEvent::DaemonDied => PmsmNativeEvent::DaemonDied,
    }
}

fn map_softap_hal_event(event: SoftApHalEvent) -> Option<PmsmNativeEvent> {
    match event {
        SoftApHalEvent::Started => None,
        SoftApHalEvent::StartFailed(reason) => Some(PmsmNativeEvent::SoftApStartFailed(reason)),
        SoftApHalEvent::ClientConnected(mac) => Some(PmsmNativeEvent::ClientConnected(mac)),
        SoftApHalEvent::ClientDisconnected(mac) => Some(PmsmNativeEvent::ClientDisconnected(mac)),
        SoftApHalEvent::Stopped => Some(PmsmNativeEvent::InterfaceDestroyed),
    }
}

#[cfg(all(test, feature = "fakes"))]
mod tests {
    use super::*;
    use crate::softap::BandPreference;
    use crate::testing::{
        FakeConnectionEngine, FakeMetricsSink, FakeNativeInterface, FakePolicyStore,
        FakeTelephonyObserver,
    };

    fn assert_invariants(warden: &ModeWarden) {
        assert!(warden.invariant_live_set_matches_state(), "I1 violated");
        assert!(warden.invariant_single_holder_roles(), "I2 violated");
        assert!(warden.invariant_distinct_interfaces(), "I3 violated");
        assert!(warden.invariant_scorer_on_primary(), "I4 violated");
        assert!(warden.invariant_emergency_softap_excluded(), "I5 violated");
        assert!(warden.sanity_no_terminal_in_live());
        assert!(warden.sanity_graveyard_bounded());
    }

    fn test_warden() -> ModeWarden {
        let collaborators = WardenCollaborators {
            native: Arc::new(FakeNativeInterface::default()),
            policy_store: Arc::new(FakePolicyStore::default()),
            telephony: Arc::new(FakeTelephonyObserver::default()),
            connection_engine: Arc::new(FakeConnectionEngine::default()),
            metrics: Arc::new(FakeMetricsSink::default()),
        };
        let (warden, _handle, _rx) = ModeWarden::new(WardenConfig::default(), collaborators);
        warden
    }

    fn softap_config(ssid: &str) -> SoftApConfiguration {
        SoftApConfiguration {
            ssid: ssid.into(),
            passphrase: Some("supersecret".into()),
            band_preference: BandPreference::Any,
            hidden: false,
            user_max_clients: None,
            allowed_clients: Default::default(),
            blocked_clients: Default::default(),
            owe_transition: false,
            auto_shutdown: false,
            idle_timeout: None,
        }
    }

    #[tokio::test]
    async fn cold_enable_then_request_primary() {
        let mut warden = test_warden();
        assert_invariants(&warden);
        warden.handle_command(WardenCommand::WifiToggled(true)).await;
        assert_invariants(&warden);
        let id = warden.request_primary().await.unwrap();
        assert_invariants(&warden);
        assert!(matches!(
            warden.live.get(&id),
            Some(LivePmsm::Client(c)) if c.role == Role::ClientPrimary
        ));
    }

    #[tokio::test]
    async fn wifi_toggled_autonomously_creates_a_primary_client() {
        let mut warden = test_warden();
        let mut changes = warden.mode_change_tx.subscribe();
        warden.handle_command(WardenCommand::WifiToggled(true)).await;
        assert!(matches!(
            changes.try_recv().unwrap(),
            ModeChangeEvent::Added { role: Role::ClientPrimary, .. }
        ));
        assert_invariants(&warden);
    }

    #[tokio::test]
    async fn location_and_scan_always_creates_a_scan_only_client() {
        let mut warden = test_warden();
        warden
            .handle_command(WardenCommand::LocationModeChanged(true))
            .await;
        warden
            .handle_command(WardenCommand::ScanAlwaysModeChanged(true))
            .await;
        let (&id, pmsm) = warden
            .live
            .iter()
            .next()
            .expect("scan-only client created from location + scan-always");
        assert!(matches!(pmsm, LivePmsm::Client(c) if c.role == Role::ClientScanOnly));
        assert_invariants(&warden);
        let _ = id;
    }

    #[tokio::test]
    async fn requesting_primary_twice_reuses_the_same_pmsm() {
        let mut warden = test_warden();
        warden.handle_command(WardenCommand::WifiToggled(true)).await;
        let first = warden.request_primary().await.unwrap();
        let second = warden.request_primary().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(warden.live.len(), 1);
        assert_invariants(&warden);
    }

    #[tokio::test]
    async fn scan_only_flips_to_primary_in_place() {
        let mut warden = test_warden();
        warden.wifi_toggle = true;
        let scan_id = warden.create_client(Role::ClientScanOnly).await.unwrap();
        let primary_id = warden.request_primary().await.unwrap();
        assert_eq!(scan_id, primary_id);
        assert!(matches!(
            warden.live.get(&scan_id),
            Some(LivePmsm::Client(c)) if c.role == Role::ClientPrimary
        ));
        assert_invariants(&warden);
    }

    #[tokio::test]
    async fn switch_role_rejects_a_second_primary() {
        let mut warden = test_warden();
        warden.wifi_toggle = true;
        let primary = warden.request_primary().await.unwrap();
        let scan_only = warden.create_client(Role::ClientScanOnly).await.unwrap();
        let err = warden
            .switch_role(scan_only, Role::ClientPrimary)
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::UnsupportedConfiguration { .. }));
        assert_invariants(&warden);
        let _ = primary;
    }

    #[tokio::test]
    async fn disabling_wifi_tears_down_clients() {
        let mut warden = test_warden();
        warden.handle_command(WardenCommand::WifiToggled(true)).await;
        warden.request_primary().await.unwrap();
        assert_eq!(warden.live.len(), 1);
        warden.handle_command(WardenCommand::WifiToggled(false)).await;
        assert!(warden.live.is_empty());
        assert_eq!(warden.graveyard.len(Role::ClientPrimary), 1);
        assert_invariants(&warden);
    }

    #[tokio::test]
    async fn emergency_call_keeps_client_alive_through_disable() {
        let mut warden = test_warden();
        warden.handle_command(WardenCommand::WifiToggled(true)).await;
        let id = warden.request_primary().await.unwrap();
        warden.emergency_active = true;
        warden.handle_command(WardenCommand::WifiToggled(false)).await;
        assert!(warden.live.contains_key(&id), "emergency call must keep the client up");
        assert_invariants(&warden);
        warden.emergency_active = false;
        warden.reconcile_sta().await;
        assert!(warden.live.is_empty());
        assert_invariants(&warden);
    }

    #[tokio::test]
    async fn emergency_call_started_tears_down_softap_unconditionally() {
        let mut warden = test_warden();
        warden
            .create_softap(Role::SoftApTethered, softap_config("guest-net"), true)
            .await
            .unwrap();
        assert_eq!(warden.live.len(), 1);
        warden
            .handle_command(WardenCommand::EmergencyCallStarted)
            .await;
        assert!(warden.live.is_empty(), "softap must be stopped on emergency entry");
        assert_invariants(&warden);
    }

    #[tokio::test]
    async fn emergency_call_honors_carrier_disable_wifi_policy() {
        let mut warden = test_warden();
        let policy_store = FakePolicyStore::default();
        policy_store
            .disable_wifi_in_emergency
            .store(true, Ordering::SeqCst);
        warden.collaborators.policy_store = Arc::new(policy_store);

        warden.wifi_toggle = true;
        warden.request_primary().await.unwrap();
        warden
            .handle_command(WardenCommand::EmergencyCallStarted)
            .await;
        assert!(
            warden.live.is_empty(),
            "carrier policy requiring wifi-off in an emergency must tear clients down too"
        );
    }

    #[tokio::test]
    async fn recovery_restart_tears_down_all_clients() {
        let mut warden = test_warden();
        warden.handle_command(WardenCommand::WifiToggled(true)).await;
        warden.request_primary().await.unwrap();
        warden.teardown_all_clients().await;
        warden.wifi_toggle = false;
        assert!(warden.live.is_empty());
        assert_invariants(&warden);
    }

    #[tokio::test]
    async fn scorer_is_reinstalled_across_a_role_switch() {
        let mut warden = test_warden();
        warden.wifi_toggle = true;
        let id = warden.request_primary().await.unwrap();
        let scorer: ScorerHandle = Arc::new(42i32);
        warden.cached_scorer = Some(scorer);
        warden.reinstall_scorer(id);
        assert!(matches!(
            warden.live.get(&id),
            Some(LivePmsm::Client(c)) if c.scorer.is_some()
        ));
        assert_invariants(&warden);

        warden.switch_role(id, Role::ClientScanOnly).await.unwrap();
        warden.switch_role(id, Role::ClientPrimary).await.unwrap();
        assert!(matches!(
            warden.live.get(&id),
            Some(LivePmsm::Client(c)) if c.scorer.is_some()
        ));
        assert_invariants(&warden);
    }

    #[tokio::test]
    async fn local_only_falls_back_to_primary_without_concurrency() {
        let mut warden = test_warden();
        warden.config.sta_ap_concurrency_supported = false;
        let id = warden.request_local_only().await.unwrap();
        assert!(matches!(
            warden.live.get(&id),
            Some(LivePmsm::Client(c)) if c.role == Role::ClientPrimary
        ));
    }

    #[tokio::test]
    async fn local_only_gets_its_own_pmsm_with_concurrency() {
        let mut warden = test_warden();
        let id = warden.request_local_only().await.unwrap();
        assert!(matches!(
            warden.live.get(&id),
            Some(LivePmsm::Client(c)) if c.role == Role::ClientLocalOnly
        ));
        warden.remove_local_only(id).await.unwrap();
        assert!(!warden.live.contains_key(&id));
    }

    #[tokio::test]
    async fn softap_start_sequence_creates_a_started_pmsm() {
        let mut warden = test_warden();
        let id = warden
            .create_softap(Role::SoftApTethered, softap_config("guest-net"), true)
            .await
            .unwrap();
        match warden.live.get(&id) {
            Some(LivePmsm::SoftAp(s)) => {
                assert_eq!(s.state, crate::pmsm::softap::SoftApState::Started);
                assert_eq!(s.interface.as_deref(), Some("ap0"));
            }
            _ => panic!("expected a live softap pmsm"),
        }
        assert_invariants(&warden);
    }

    #[tokio::test]
    async fn softap_rejects_empty_ssid() {
        let mut warden = test_warden();
        let err = warden
            .create_softap(Role::SoftApTethered, softap_config(""), true)
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::ConfigInvalid { .. }));
        assert_invariants(&warden);
    }

    #[tokio::test]
    async fn softap_start_failure_is_buried_not_left_live() {
        let mut warden = test_warden();
        // Swap in a native backend configured to fail start_softap.
        let failing = FakeNativeInterface::default();
        *failing.fail_start_softap.lock().unwrap() = Some(WardenError::NoChannel {
            interface: "ap0".into(),
        });
        warden.collaborators.native = Arc::new(failing);

        let err = warden
            .create_softap(Role::SoftApTethered, softap_config("guest-net"), true)
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::NoChannel { .. }));
        assert!(warden.live.is_empty());
        assert_eq!(warden.graveyard.len(Role::SoftApTethered), 1);
        assert_invariants(&warden);
    }

    #[tokio::test]
    async fn stop_softap_buries_and_emits_removed() {
        let mut warden = test_warden();
        let mut changes = warden.mode_change_tx.subscribe();
        let id = warden
            .create_softap(Role::SoftApLocalOnly, softap_config("local-net"), false)
            .await
            .unwrap();
        warden.stop_softap(id).await.unwrap();
        assert!(!warden.live.contains_key(&id));
        assert!(matches!(
            changes.try_recv().unwrap(),
            ModeChangeEvent::Added { .. }
        ));
        assert!(matches!(
            changes.try_recv().unwrap(),
            ModeChangeEvent::Removed { role: Role::SoftApLocalOnly, .. }
        ));
        assert_invariants(&warden);
    }

    #[tokio::test]
    async fn blocked_client_is_force_disconnected_not_admitted() {
        let mut warden = test_warden();
        let mut blocked = HashSet::new();
        let mac = MacAddr6::from([0, 0, 0, 0, 0, 9]);
        blocked.insert(mac);
        let mut config = softap_config("guest-net");
        config.blocked_clients = blocked;
        let id = warden
            .create_softap(Role::SoftApTethered, config, true)
            .await
            .unwrap();

        let mut changes = warden.mode_change_tx.subscribe();
        let _ = changes.try_recv(); // drain Added
        warden
            .apply_native_event(id, PmsmNativeEvent::ClientConnected(mac))
            .await;

        match warden.live.get(&id) {
            Some(LivePmsm::SoftAp(s)) => assert!(!s.connected_clients.contains(&mac)),
            _ => panic!("expected a live softap pmsm"),
        }
        assert!(matches!(
            changes.try_recv().unwrap(),
            ModeChangeEvent::BlockedClientConnecting { mac: blocked_mac, .. } if blocked_mac == mac
        ));
    }

    #[tokio::test]
    async fn force_disconnect_failure_is_retried_via_pending_disconnect() {
        let mut warden = test_warden();
        let failing = FakeNativeInterface::default();
        failing.force_disconnect_fails.store(true, Ordering::SeqCst);
        warden.collaborators.native = Arc::new(failing);

        let mut blocked = HashSet::new();
        let mac = MacAddr6::from([0, 0, 0, 0, 0, 9]);
        blocked.insert(mac);
        let mut config = softap_config("guest-net");
        config.blocked_clients = blocked;
        let id = warden
            .create_softap(Role::SoftApTethered, config, true)
            .await
            .unwrap();

        warden
            .apply_native_event(id, PmsmNativeEvent::ClientConnected(mac))
            .await;
        match warden.live.get(&id) {
            Some(LivePmsm::SoftAp(s)) => assert!(s.pending_disconnect.contains_key(&mac)),
            _ => panic!("expected a live softap pmsm"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_stop_runs_before_teardown_completes() {
        let mut warden = test_warden();
        let policy_store = FakePolicyStore::default();
        policy_store.defer_stop_enabled.store(true, Ordering::SeqCst);
        policy_store.max_delay_ms.store(10_000, Ordering::SeqCst);
        warden.collaborators.policy_store = Arc::new(policy_store);
        let telephony = FakeTelephonyObserver::default();
        telephony.ims_any.store(true, Ordering::SeqCst);
        warden.collaborators.telephony = Arc::new(telephony);
        warden.config.deferred_stop_extra_delay = std::time::Duration::from_millis(50);
        warden.config.pending_disconnect_recheck_interval = std::time::Duration::from_millis(5);

        warden.handle_command(WardenCommand::WifiToggled(true)).await;
        let id = warden.request_primary().await.unwrap();
        assert!(matches!(
            warden.live.get(&id),
            Some(LivePmsm::Client(c)) if c.state == ClientState::Started
        ));

        warden.handle_command(WardenCommand::WifiToggled(false)).await;
        assert!(warden.live.is_empty());
        assert_invariants(&warden);
    }
}
