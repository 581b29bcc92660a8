use std::fmt;

/// The role a Per-Mode State Machine is carrying out.
///
/// Client roles may switch in place between `ClientPrimary` and
/// `ClientScanOnly` as settings change; SoftAp roles are fixed for the
/// lifetime of the PMSM that was created to carry them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    ClientPrimary,
    ClientScanOnly,
    ClientLocalOnly,
    SoftApTethered,
    SoftApLocalOnly,
}

impl Role {
    pub fn is_client(self) -> bool {
        matches!(
            self,
            Role::ClientPrimary | Role::ClientScanOnly | Role::ClientLocalOnly
        )
    }

    /// A role capable of carrying internet-bound traffic rather than being
    /// scan-only or a strictly local hotspot.
    pub fn is_connectivity(self) -> bool {
        matches!(self, Role::ClientPrimary | Role::SoftApTethered)
    }

    pub fn is_softap(self) -> bool {
        matches!(self, Role::SoftApTethered | Role::SoftApLocalOnly)
    }

    /// Whether a client PMSM may switch in place to `other` without being
    /// torn down and recreated. SoftAp roles are never switchable.
    pub fn can_switch_to(self, other: Role) -> bool {
        matches!(
            (self, other),
            (Role::ClientPrimary, Role::ClientScanOnly)
                | (Role::ClientScanOnly, Role::ClientPrimary)
        )
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::ClientPrimary => "CLIENT_PRIMARY",
            Role::ClientScanOnly => "CLIENT_SCAN_ONLY",
            Role::ClientLocalOnly => "CLIENT_LOCAL_ONLY",
            Role::SoftApTethered => "SOFTAP_TETHERED",
            Role::SoftApLocalOnly => "SOFTAP_LOCAL_ONLY",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifiers() {
        assert!(Role::ClientPrimary.is_client());
        assert!(Role::ClientPrimary.is_connectivity());
        assert!(!Role::ClientPrimary.is_softap());

        assert!(Role::ClientScanOnly.is_client());
        assert!(!Role::ClientScanOnly.is_connectivity());

        assert!(Role::SoftApTethered.is_softap());
        assert!(Role::SoftApTethered.is_connectivity());

        assert!(Role::SoftApLocalOnly.is_softap());
        assert!(!Role::SoftApLocalOnly.is_connectivity());
    }

    #[test]
    fn only_client_primary_and_scan_only_switch() {
        assert!(Role::ClientPrimary.can_switch_to(Role::ClientScanOnly));
        assert!(Role::ClientScanOnly.can_switch_to(Role::ClientPrimary));
        assert!(!Role::ClientLocalOnly.can_switch_to(Role::ClientPrimary));
        assert!(!Role::SoftApTethered.can_switch_to(Role::SoftApLocalOnly));
    }
}
