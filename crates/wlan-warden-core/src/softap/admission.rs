use std::collections::HashSet;

use macaddr::MacAddr6;

/// Outcome of evaluating a connecting client against the SoftAp admission
/// policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    Allow,
    BlockedMac,
    NotInAllowList,
    NoMoreStations,
}

/// Client admission policy for a running SoftAp: blocked/allowed MAC sets
/// plus an effective station cap.
///
/// `effective_max` is `min(capability_max, user_max)` when the caller has
/// set a positive `user_max`, else just `capability_max` — a user-configured
/// zero or absent limit never widens the capability-reported ceiling, it can
/// only narrow it.
#[derive(Debug, Clone)]
pub struct ClientAdmissionPolicy {
    allowed: HashSet<MacAddr6>,
    blocked: HashSet<MacAddr6>,
    capability_max: u32,
    user_max: Option<u32>,
    /// Settings epoch for which the "no more stations" metric has already
    /// fired; re-armed whenever the epoch advances.
    last_metric_epoch: Option<u64>,
}

impl ClientAdmissionPolicy {
    pub fn new(capability_max: u32) -> Self {
        Self {
            allowed: HashSet::new(),
            blocked: HashSet::new(),
            capability_max,
            user_max: None,
            last_metric_epoch: None,
        }
    }

    pub fn with_allowed(mut self, allowed: HashSet<MacAddr6>) -> Self {
        self.allowed = allowed;
        self
    }

    pub fn with_blocked(mut self, blocked: HashSet<MacAddr6>) -> Self {
        self.blocked = blocked;
        self
    }

    pub fn with_user_max(mut self, user_max: Option<u32>) -> Self {
        self.user_max = user_max.filter(|&m| m > 0);
        self
    }

    pub fn effective_max(&self) -> u32 {
        match self.user_max {
            Some(user_max) => self.capability_max.min(user_max),
            None => self.capability_max,
        }
    }

    /// Evaluates whether `mac` should be admitted given `current_count`
    /// stations already connected. The allow-list, when non-empty, is
    /// exclusive: only listed MACs are admitted regardless of the station
    /// count.
    pub fn evaluate(&self, mac: MacAddr6, current_count: u32) -> AdmissionDecision {
        if self.blocked.contains(&mac) {
            return AdmissionDecision::BlockedMac;
        }
        if !self.allowed.is_empty() && !self.allowed.contains(&mac) {
            return AdmissionDecision::NotInAllowList;
        }
        if current_count >= self.effective_max() {
            return AdmissionDecision::NoMoreStations;
        }
        AdmissionDecision::Allow
    }

    /// Returns `true` exactly once per `settings_epoch` the first time this
    /// is called for that epoch with a `NoMoreStations` decision, so the
    /// caller emits its `NO_MORE_STAS` metric at most once per settings
    /// change rather than once per rejected association attempt.
    pub fn should_emit_no_more_stations_metric(&mut self, settings_epoch: u64) -> bool {
        if self.last_metric_epoch == Some(settings_epoch) {
            return false;
        }
        self.last_metric_epoch = Some(settings_epoch);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(last: u8) -> MacAddr6 {
        MacAddr6::from([0, 0, 0, 0, 0, last])
    }

    #[test]
    fn effective_max_takes_the_narrower_bound() {
        let policy = ClientAdmissionPolicy::new(8).with_user_max(Some(3));
        assert_eq!(policy.effective_max(), 3);

        let policy = ClientAdmissionPolicy::new(8).with_user_max(Some(20));
        assert_eq!(policy.effective_max(), 8);

        let policy = ClientAdmissionPolicy::new(8).with_user_max(Some(0));
        assert_eq!(policy.effective_max(), 8);

        let policy = ClientAdmissionPolicy::new(8).with_user_max(None);
        assert_eq!(policy.effective_max(), 8);
    }

    #[test]
    fn blocked_mac_always_rejected() {
        let mut blocked = HashSet::new();
        blocked.insert(mac(1));
        let policy = ClientAdmissionPolicy::new(8).with_blocked(blocked);
        assert_eq!(policy.evaluate(mac(1), 0), AdmissionDecision::BlockedMac);
    }

    #[test]
    fn nonempty_allow_list_is_exclusive() {
        let mut allowed = HashSet::new();
        allowed.insert(mac(2));
        let policy = ClientAdmissionPolicy::new(8).with_allowed(allowed);
        assert_eq!(policy.evaluate(mac(2), 0), AdmissionDecision::Allow);
        assert_eq!(
            policy.evaluate(mac(3), 0),
            AdmissionDecision::NotInAllowList
        );
    }

    #[test]
    fn no_more_stations_past_effective_max() {
        let policy = ClientAdmissionPolicy::new(2);
        assert_eq!(policy.evaluate(mac(1), 2), AdmissionDecision::NoMoreStations);
        assert_eq!(policy.evaluate(mac(1), 1), AdmissionDecision::Allow);
    }

    #[test]
    fn no_more_stations_metric_fires_once_per_epoch() {
        let mut policy = ClientAdmissionPolicy::new(1);
        assert!(policy.should_emit_no_more_stations_metric(1));
        assert!(!policy.should_emit_no_more_stations_metric(1));
        assert!(policy.should_emit_no_more_stations_metric(2));
    }
}
