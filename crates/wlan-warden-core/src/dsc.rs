use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::collaborators::{CarrierPolicy, TelephonyObserver};

/// Why the Deferred-Stop Controller finished waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DscOutcome {
    /// IMS registered over a non-WLAN network: safe to continue immediately.
    ImsRegisteredNonWlan,
    /// The last IMS-over-WLAN network was lost and the extra grace delay
    /// elapsed without a non-WLAN registration appearing.
    ImsNetworkLost,
    /// The carrier-configured bound elapsed first.
    TimedOut,
    /// The carrier policy does not request deferral; the caller should
    /// continue the stop immediately.
    NotDeferred,
}

/// Delays a pending client disconnect/stop until one of three conditions
/// races to completion: (a) IMS registers on a non-WLAN network, (b) the
/// last IMS-over-WLAN network is lost (plus an extra grace delay), or (c)
/// the carrier-configured timer fires. Runs on the same event-loop task as
/// the rest of Warden/PMSM processing — the `.await` points here are the
/// only suspension in an otherwise synchronous dispatch, and no other
/// command is processed from the Warden's queue until this resolves.
pub async fn defer_then(
    telephony: &dyn TelephonyObserver,
    policy: CarrierPolicy,
    recheck_interval: Duration,
    extra_delay: Duration,
) -> DscOutcome {
    if !policy.defer_stop_enabled {
        return DscOutcome::NotDeferred;
    }

    let deadline = Instant::now() + Duration::from_millis(policy.max_delay_ms);
    let mut lost_since: Option<Instant> = None;

    loop {
        if telephony.is_ims_registered_non_wlan().await {
            return DscOutcome::ImsRegisteredNonWlan;
        }

        let has_wlan_ims = telephony.has_any_ims_network().await;
        if !has_wlan_ims {
            let lost_at = *lost_since.get_or_insert_with(Instant::now);
            if Instant::now().duration_since(lost_at) >= extra_delay {
                return DscOutcome::ImsNetworkLost;
            }
        } else {
            lost_since = None;
        }

        if Instant::now() >= deadline {
            return DscOutcome::TimedOut;
        }

        let next_tick = Instant::now() + recheck_interval;
        sleep(next_tick.saturating_duration_since(Instant::now()).min(
            deadline.saturating_duration_since(Instant::now()),
        ))
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    struct FakeTelephony {
        non_wlan: Arc<AtomicBool>,
        has_wlan: Arc<AtomicBool>,
    }

    #[async_trait]
    impl TelephonyObserver for FakeTelephony {
        async fn is_ims_registered_over_wlan(&self) -> bool {
            !self.non_wlan.load(Ordering::SeqCst) && self.has_wlan.load(Ordering::SeqCst)
        }
        async fn is_ims_registered_non_wlan(&self) -> bool {
            self.non_wlan.load(Ordering::SeqCst)
        }
        async fn has_any_ims_network(&self) -> bool {
            self.has_wlan.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn not_deferred_when_policy_disabled() {
        let telephony = FakeTelephony {
            non_wlan: Arc::new(AtomicBool::new(false)),
            has_wlan: Arc::new(AtomicBool::new(true)),
        };
        let policy = CarrierPolicy {
            defer_stop_enabled: false,
            max_delay_ms: 1000,
            disable_wifi_in_emergency: false,
        };
        let outcome = defer_then(
            &telephony,
            policy,
            Duration::from_millis(10),
            Duration::from_millis(10),
        )
        .await;
        assert_eq!(outcome, DscOutcome::NotDeferred);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_nothing_changes() {
        let telephony = FakeTelephony {
            non_wlan: Arc::new(AtomicBool::new(false)),
            has_wlan: Arc::new(AtomicBool::new(true)),
        };
        let policy = CarrierPolicy {
            defer_stop_enabled: true,
            max_delay_ms: 50,
            disable_wifi_in_emergency: false,
        };
        let outcome = defer_then(
            &telephony,
            policy,
            Duration::from_millis(10),
            Duration::from_millis(500),
        )
        .await;
        assert_eq!(outcome, DscOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn ims_lost_after_extra_delay() {
        let telephony = FakeTelephony {
            non_wlan: Arc::new(AtomicBool::new(false)),
            has_wlan: Arc::new(AtomicBool::new(false)),
        };
        let policy = CarrierPolicy {
            defer_stop_enabled: true,
            max_delay_ms: 10_000,
            disable_wifi_in_emergency: false,
        };
        let outcome = defer_then(
            &telephony,
            policy,
            Duration::from_millis(10),
            Duration::from_millis(100),
        )
        .await;
        assert_eq!(outcome, DscOutcome::ImsNetworkLost);
    }
}
