use wlan_warden_logging::{TransitionLog, TransitionRecord};

use crate::collaborators::ScorerHandle;
use crate::error::WardenError;
use crate::pmsm::Outcome;
use crate::role::Role;
use crate::warden::PmsmId;

/// Leaf states of the client PMSM. `Started` and `PendingDisconnect` share a
/// parent "active" handler (below) that both bubble up to when their own
/// handler declines an event — the hierarchical dispatch spec.md describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Starting,
    Started,
    /// A stop was requested while connected and the Deferred-Stop
    /// Controller is running; the PMSM stays logically "active" here.
    PendingDisconnect,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    StartRequested,
    InterfaceReady(String),
    StopRequested,
    DeferredStopResolved,
    RoleSwitchRequested(Role),
    InterfaceDown,
    InterfaceDestroyed,
    DaemonDied,
}

pub struct ClientPmsm {
    pub id: PmsmId,
    pub role: Role,
    pub interface: Option<String>,
    pub state: ClientState,
    pub last_error: Option<WardenError>,
    pub log: TransitionLog,
    /// Connection-scoring engine installed while `Started`, re-installed
    /// across a role switch or a restart rather than dropped.
    pub scorer: Option<ScorerHandle>,
}

impl ClientPmsm {
    pub fn new(id: PmsmId, role: Role) -> Self {
        Self {
            id,
            role,
            interface: None,
            state: ClientState::Idle,
            last_error: None,
            log: TransitionLog::new(),
            scorer: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state == ClientState::Stopped
    }

    /// Dispatches one event through the hierarchical state machine:
    /// leaf state first, then the shared "active" parent, then the
    /// top-level defaults that apply regardless of state.
    pub fn handle(&mut self, event: ClientEvent) {
        let from = self.state;
        let outcome = self.dispatch_leaf(&event);
        let outcome = match outcome {
            Outcome::NotHandled => self.dispatch_active_parent(&event),
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

    fn dispatch_leaf(&mut self, event: &ClientEvent) -> Outcome<ClientState> {
        match (self.state, event) {
            (ClientState::Idle, ClientEvent::StartRequested) => {
                Outcome::Transition(ClientState::Starting)
            }
            (ClientState::Starting, ClientEvent::InterfaceReady(name)) => {
                self.interface = Some(name.clone());
                Outcome::Transition(ClientState::Started)
            }
            (ClientState::Started, ClientEvent::StopRequested) => {
                Outcome::Transition(ClientState::PendingDisconnect)
            }
            (ClientState::PendingDisconnect, ClientEvent::DeferredStopResolved) => {
                Outcome::Transition(ClientState::Stopping)
            }
            (ClientState::Stopping, ClientEvent::InterfaceDestroyed) => {
                Outcome::Transition(ClientState::Stopped)
            }
            _ => Outcome::NotHandled,
        }
    }

    /// Shared behavior for the "active" parent of `Started` and
    /// `PendingDisconnect`: both still own a live interface and both react
    /// the same way to a role switch or an unexpected interface loss.
    fn dispatch_active_parent(&mut self, event: &ClientEvent) -> Outcome<ClientState> {
        if !matches!(
            self.state,
            ClientState::Started | ClientState::PendingDisconnect
        ) {
            return Outcome::NotHandled;
        }

        match event {
            ClientEvent::RoleSwitchRequested(to) if self.role.can_switch_to(*to) => {
                self.role = *to;
                Outcome::Handled
            }
            ClientEvent::InterfaceDown => {
                self.last_error = Some(WardenError::InterfaceDownUnexpected {
                    interface: self.interface.clone().unwrap_or_default(),
                });
                Outcome::Transition(ClientState::Stopping)
            }
            _ => Outcome::NotHandled,
        }
    }

    /// Top-level defaults: apply from any state, matching the android
    /// semantics where a destroyed/dead interface always collapses the
    /// PMSM regardless of what it was doing.
    fn dispatch_top(&mut self, event: &ClientEvent) -> Outcome<ClientState> {
        match event {
            ClientEvent::InterfaceDestroyed if self.state != ClientState::Stopped => {
                self.last_error = Some(WardenError::InterfaceDestroyedUnexpected {
                    interface: self.interface.clone().unwrap_or_default(),
                });
                Outcome::Transition(ClientState::Stopped)
            }
            ClientEvent::DaemonDied if self.state != ClientState::Stopped => {
                self.last_error = Some(WardenError::DaemonDied);
                Outcome::Transition(ClientState::Stopped)
            }
            _ => Outcome::NotHandled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_start_and_stop() {
        let mut pmsm = ClientPmsm::new(PmsmId::new(1), Role::ClientPrimary);
        pmsm.handle(ClientEvent::StartRequested);
        assert_eq!(pmsm.state, ClientState::Starting);
        pmsm.handle(ClientEvent::InterfaceReady("wlan0".into()));
        assert_eq!(pmsm.state, ClientState::Started);
        pmsm.handle(ClientEvent::StopRequested);
        assert_eq!(pmsm.state, ClientState::PendingDisconnect);
        pmsm.handle(ClientEvent::DeferredStopResolved);
        assert_eq!(pmsm.state, ClientState::Stopping);
        pmsm.handle(ClientEvent::InterfaceDestroyed);
        assert_eq!(pmsm.state, ClientState::Stopped);
        assert!(pmsm.is_terminal());
    }

    #[test]
    fn role_switch_handled_by_parent_while_pending_disconnect() {
        let mut pmsm = ClientPmsm::new(PmsmId::new(1), Role::ClientPrimary);
        pmsm.handle(ClientEvent::StartRequested);
        pmsm.handle(ClientEvent::InterfaceReady("wlan0".into()));
        pmsm.handle(ClientEvent::StopRequested);
        pmsm.handle(ClientEvent::RoleSwitchRequested(Role::ClientScanOnly));
        assert_eq!(pmsm.role, Role::ClientScanOnly);
        assert_eq!(pmsm.state, ClientState::PendingDisconnect);
    }

    #[test]
    fn destroyed_interface_collapses_from_any_active_state() {
        let mut pmsm = ClientPmsm::new(PmsmId::new(1), Role::ClientPrimary);
        pmsm.handle(ClientEvent::StartRequested);
        pmsm.handle(ClientEvent::InterfaceReady("wlan0".into()));
        pmsm.handle(ClientEvent::InterfaceDestroyed);
        assert_eq!(pmsm.state, ClientState::Stopped);
        assert!(matches!(
            pmsm.last_error,
            Some(WardenError::InterfaceDestroyedUnexpected { .. })
        ));
    }

    #[test]
    fn destroyed_after_stopped_is_not_handled_again() {
        let mut pmsm = ClientPmsm::new(PmsmId::new(1), Role::ClientPrimary);
        pmsm.handle(ClientEvent::StartRequested);
        pmsm.handle(ClientEvent::InterfaceReady("wlan0".into()));
        pmsm.handle(ClientEvent::InterfaceDestroyed);
        let log_len_before = pmsm.log.len();
        pmsm.handle(ClientEvent::InterfaceDestroyed);
        assert_eq!(pmsm.log.len(), log_len_before);
    }
}
