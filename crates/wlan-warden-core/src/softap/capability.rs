/// Capabilities an interface's PHY/driver reports supporting for SoftAp use.
///
/// A plain bitset over a `u8` rather than a dependency on the `bitflags`
/// crate — the set is small and fixed, and every consumer only ever checks
/// membership, never iterates or formats it for users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SoftApCapability(u8);

impl SoftApCapability {
    pub const WPA3: Self = Self(1 << 0);
    pub const MAC_RANDOMIZATION: Self = Self(1 << 1);
    pub const CLIENT_FORCE_DISCONNECT: Self = Self(1 << 2);
    pub const ACS_OFFLOAD: Self = Self(1 << 3);

    pub const NONE: Self = Self(0);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for SoftApCapability {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_and_contains() {
        let caps = SoftApCapability::WPA3 | SoftApCapability::ACS_OFFLOAD;
        assert!(caps.contains(SoftApCapability::WPA3));
        assert!(caps.contains(SoftApCapability::ACS_OFFLOAD));
        assert!(!caps.contains(SoftApCapability::MAC_RANDOMIZATION));
    }
}
