use std::collections::{HashMap, HashSet};
use std::time::Duration;

use macaddr::MacAddr6;
use wlan_warden_logging::{TransitionLog, TransitionRecord};

use crate::error::WardenError;
use crate::native::DisconnectReason;
use crate::pmsm::Outcome;
use crate::role::Role;
use crate::softap::{AdmissionDecision, ClientAdmissionPolicy, SoftApConfiguration};
use crate::warden::PmsmId;

/// The SoftAp start sequence is a strict pipeline: validate, request the
/// interface, set the BSSID, set the country code, run ACS, check the
/// driver's capability report, then start hostapd and broadcast that the
/// network is up. Each step is its own sub-state so a failure partway
/// through reports exactly where it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStep {
    Validating,
    RequestingIface,
    SettingBssid,
    SettingCountryCode,
    ComputingChannel,
    CheckingCapability,
    StartingHostapd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftApState {
    Idle,
    Starting(StartStep),
    Started,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone)]
pub enum SoftApEvent {
    StartRequested,
    Validated,
    IfaceReady(String),
    BssidSet,
    CountryCodeSet,
    ChannelComputed,
    CapabilityChecked,
    HostapdStarted,
    StartFailed(WardenError),
    /// Admitted by the caller's admission check; a rejected client never
    /// reaches this event (see `ModeWarden::evaluate_softap_client`).
    ClientConnected(MacAddr6),
    ClientDisconnected(MacAddr6),
    StopRequested,
    InterfaceDown,
    InterfaceDestroyed,
    DaemonDied,
}

pub struct SoftApPmsm {
    pub id: PmsmId,
    pub role: Role,
    pub interface: Option<String>,
    pub state: SoftApState,
    pub last_error: Option<WardenError>,
    pub admission: ClientAdmissionPolicy,
    /// Raw capability-reported station cap, kept around so a config update
    /// can rebuild `admission` without another native round-trip.
    pub capability_max: u32,
    pub connected_clients: HashSet<MacAddr6>,
    pub config: SoftApConfiguration,
    /// MACs force-disconnected but not yet confirmed gone, retried every
    /// `WardenConfig::softap_pending_disconnect_recheck`.
    pub pending_disconnect: HashMap<MacAddr6, DisconnectReason>,
    /// Resolved auto-shutdown delay (`None` when auto-shutdown is off).
    pub idle_timeout: Option<Duration>,
    /// Bumped whenever the idle timer is armed or cancelled, so a stale
    /// wake-up can recognize itself as stale and no-op.
    pub idle_timer_generation: u64,
    pub log: TransitionLog,
}

impl SoftApPmsm {
    pub fn new(
        id: PmsmId,
        role: Role,
        admission: ClientAdmissionPolicy,
        capability_max: u32,
        config: SoftApConfiguration,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            id,
            role,
            interface: None,
            state: SoftApState::Idle,
            last_error: None,
            admission,
            capability_max,
            connected_clients: HashSet::new(),
            config,
            pending_disconnect: HashMap::new(),
            idle_timeout,
            idle_timer_generation: 0,
            log: TransitionLog::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state == SoftApState::Stopped
    }

    pub fn handle(&mut self, event: SoftApEvent) {
        let from = self.state;
        let outcome = match self.dispatch_leaf(&event) {
            Outcome::NotHandled => self.dispatch_starting_parent(&event),
            other => other,
        };
        let outcome = match outcome {
            Outcome::NotHandled => self.dispatch_top(&event),
            other => other,
        };

        if let Outcome::Transition(to) = outcome {
            self.state = to;
            self.log.push(TransitionRecord::new(
                format!("{from:?}"),
                format!("{to:?}"),
                format!("{event:?}"),
            ));
        }
    }

    fn dispatch_leaf(&mut self, event: &SoftApEvent) -> Outcome<SoftApState> {
        use SoftApEvent::*;
        use StartStep::*;

        match (self.state, event) {
            (SoftApState::Idle, StartRequested) => {
                Outcome::Transition(SoftApState::Starting(Validating))
            }
            (SoftApState::Starting(Validating), Validated) => {
                Outcome::Transition(SoftApState::Starting(RequestingIface))
            }
            (SoftApState::Starting(RequestingIface), IfaceReady(name)) => {
                self.interface = Some(name.clone());
                Outcome::Transition(SoftApState::Starting(SettingBssid))
            }
            (SoftApState::Starting(SettingBssid), BssidSet) => {
                Outcome::Transition(SoftApState::Starting(SettingCountryCode))
            }
            (SoftApState::Starting(SettingCountryCode), CountryCodeSet) => {
                Outcome::Transition(SoftApState::Starting(ComputingChannel))
            }
            (SoftApState::Starting(ComputingChannel), ChannelComputed) => {
                Outcome::Transition(SoftApState::Starting(CheckingCapability))
            }
            (SoftApState::Starting(CheckingCapability), CapabilityChecked) => {
                Outcome::Transition(SoftApState::Starting(StartingHostapd))
            }
            (SoftApState::Starting(StartingHostapd), HostapdStarted) => {
                Outcome::Transition(SoftApState::Started)
            }
            (SoftApState::Started, ClientConnected(mac)) => {
                self.connected_clients.insert(*mac);
                Outcome::Handled
            }
            (SoftApState::Started, ClientDisconnected(mac)) => {
                self.connected_clients.remove(mac);
                self.pending_disconnect.remove(mac);
                Outcome::Handled
            }
            (SoftApState::Started, StopRequested) => {
                Outcome::Transition(SoftApState::Stopping)
            }
            (SoftApState::Stopping, InterfaceDestroyed) => {
                Outcome::Transition(SoftApState::Stopped)
            }
            _ => Outcome::NotHandled,
        }
    }

    /// Any sub-step of `Starting` aborts uniformly on `StartFailed` — the
    /// caller already rolled back whatever native resources it acquired
    /// before posting this event.
    fn dispatch_starting_parent(&mut self, event: &SoftApEvent) -> Outcome<SoftApState> {
        if !matches!(self.state, SoftApState::Starting(_)) {
            return Outcome::NotHandled;
        }
        match event {
            SoftApEvent::StartFailed(err) => {
                self.last_error = Some(err.clone());
                Outcome::Transition(SoftApState::Stopped)
            }
            _ => Outcome::NotHandled,
        }
    }

    fn dispatch_top(&mut self, event: &SoftApEvent) -> Outcome<SoftApState> {
        match event {
            SoftApEvent::InterfaceDestroyed if self.state != SoftApState::Stopped => {
                self.last_error = Some(WardenError::InterfaceDestroyedUnexpected {
                    interface: self.interface.clone().unwrap_or_default(),
                });
                Outcome::Transition(SoftApState::Stopped)
            }
            SoftApEvent::DaemonDied if self.state != SoftApState::Stopped => {
                self.last_error = Some(WardenError::DaemonDied);
                Outcome::Transition(SoftApState::Stopped)
            }
            SoftApEvent::InterfaceDown if self.state == SoftApState::Started => {
                self.last_error = Some(WardenError::InterfaceDownUnexpected {
                    interface: self.interface.clone().unwrap_or_default(),
                });
                Outcome::Transition(SoftApState::Stopping)
            }
            _ => Outcome::NotHandled,
        }
    }

    /// Evaluates whether `mac` should be admitted, given the PMSM's current
    /// connected-client count.
    pub fn evaluate_admission(&self, mac: MacAddr6) -> AdmissionDecision {
        self.admission
            .evaluate(mac, self.connected_clients.len() as u32)
    }

    /// Invalidates any in-flight idle-timeout wake-up; called whenever a
    /// client is admitted or a config change reschedules the timer.
    pub fn cancel_idle_timeout(&mut self) {
        self.idle_timer_generation = self.idle_timer_generation.wrapping_add(1);
    }

    /// Arms a new generation and returns it, for the caller to pass back to
    /// `schedule_idle_timeout`.
    pub fn bump_idle_generation(&mut self) -> u64 {
        self.cancel_idle_timeout();
        self.idle_timer_generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::softap::BandPreference;

    fn test_config(ssid: &str) -> SoftApConfiguration {
        SoftApConfiguration {
            ssid: ssid.into(),
            passphrase: Some("supersecret".into()),
            band_preference: BandPreference::Any,
            hidden: false,
            user_max_clients: None,
            allowed_clients: HashSet::new(),
            blocked_clients: HashSet::new(),
            owe_transition: false,
            auto_shutdown: false,
            idle_timeout: None,
        }
    }

    fn start_sequence(pmsm: &mut SoftApPmsm) {
        pmsm.handle(SoftApEvent::StartRequested);
        pmsm.handle(SoftApEvent::Validated);
        pmsm.handle(SoftApEvent::IfaceReady("ap0".into()));
        pmsm.handle(SoftApEvent::BssidSet);
        pmsm.handle(SoftApEvent::CountryCodeSet);
        pmsm.handle(SoftApEvent::ChannelComputed);
        pmsm.handle(SoftApEvent::CapabilityChecked);
        pmsm.handle(SoftApEvent::HostapdStarted);
    }

    fn pmsm(capacity: u32) -> SoftApPmsm {
        SoftApPmsm::new(
            PmsmId::new(1),
            Role::SoftApTethered,
            ClientAdmissionPolicy::new(capacity),
            capacity,
            test_config("guest-net"),
            None,
        )
    }

    #[test]
    fn full_start_sequence_reaches_started() {
        let mut pmsm = pmsm(8);
        start_sequence(&mut pmsm);
        assert_eq!(pmsm.state, SoftApState::Started);
        assert_eq!(pmsm.interface.as_deref(), Some("ap0"));
    }

    #[test]
    fn start_failure_midway_goes_to_stopped() {
        let mut pmsm = pmsm(8);
        pmsm.handle(SoftApEvent::StartRequested);
        pmsm.handle(SoftApEvent::Validated);
        pmsm.handle(SoftApEvent::IfaceReady("ap0".into()));
        pmsm.handle(SoftApEvent::StartFailed(WardenError::NoChannel {
            interface: "ap0".into(),
        }));
        assert_eq!(pmsm.state, SoftApState::Stopped);
        assert!(matches!(pmsm.last_error, Some(WardenError::NoChannel { .. })));
    }

    #[test]
    fn client_tracking_and_admission() {
        let mut pmsm = pmsm(1);
        start_sequence(&mut pmsm);
        let mac = MacAddr6::from([0, 0, 0, 0, 0, 1]);
        assert_eq!(pmsm.evaluate_admission(mac), AdmissionDecision::Allow);
        pmsm.handle(SoftApEvent::ClientConnected(mac));
        let other = MacAddr6::from([0, 0, 0, 0, 0, 2]);
        assert_eq!(
            pmsm.evaluate_admission(other),
            AdmissionDecision::NoMoreStations
        );
        pmsm.handle(SoftApEvent::ClientDisconnected(mac));
        assert_eq!(pmsm.evaluate_admission(other), AdmissionDecision::Allow);
    }

    #[test]
    fn idle_timer_generation_advances_on_cancel() {
        let mut pmsm = pmsm(8);
        let first = pmsm.bump_idle_generation();
        let second = pmsm.bump_idle_generation();
        assert_ne!(first, second);
        pmsm.cancel_idle_timeout();
        assert_ne!(pmsm.idle_timer_generation, second);
    }
}
