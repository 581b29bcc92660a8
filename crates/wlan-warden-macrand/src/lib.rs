//! MAC address randomization and the OWE companion-SSID derivation.

use macaddr::MacAddr6;
use rand::RngCore;

/// Generates a locally-administered, unicast MAC address suitable for a
/// randomized client-scan or SoftAp interface.
///
/// Sets the locally-administered bit and clears the multicast bit on the
/// first octet, matching the convention every 802.11 stack uses for
/// randomized addresses.
pub fn random_locally_administered_mac() -> MacAddr6 {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes[0] = (bytes[0] | 0x02) & !0x01;
    MacAddr6::from(bytes)
}

/// Derives the companion interface's BSSID from the primary interface's
/// BSSID for a dual-band OWE transition pair: the locally-administered bit
/// is forced on and the low bit of the last octet is flipped, giving a
/// stable, reversible pairing between the two BSSIDs.
pub fn derive_owe_companion_bssid(primary: MacAddr6) -> MacAddr6 {
    let mut bytes = *primary.as_bytes();
    bytes[0] |= 0x02;
    bytes[5] ^= 0x01;
    MacAddr6::from(bytes)
}

const MAX_SSID_LEN: usize = 32;
const OWE_SUFFIX: &str = "-owe";

/// Derives the OWE transition companion SSID for a primary network SSID.
///
/// When the plain `"{primary}-owe"` form fits within the 32-byte SSID
/// limit, it is used directly. Otherwise the primary SSID is truncated and
/// an 8-hex-digit `blake3` digest of the full primary SSID is appended, so
/// the derivation stays stable and collision-resistant across runs without
/// depending on a language-specific hash function.
pub fn derive_companion_ssid(primary_ssid: &str) -> String {
    let candidate = format!("{primary_ssid}{OWE_SUFFIX}");
    if candidate.len() <= MAX_SSID_LEN {
        return candidate;
    }

    let hash = blake3::hash(primary_ssid.as_bytes());
    let suffix = format!("-{:08x}", u32::from_be_bytes(hash.as_bytes()[0..4].try_into().unwrap()));
    let budget = MAX_SSID_LEN.saturating_sub(suffix.len());
    let truncated = truncate_to_byte_budget(primary_ssid, budget);
    format!("{truncated}{suffix}")
}

fn truncate_to_byte_budget(s: &str, budget: usize) -> &str {
    if s.len() <= budget {
        return s;
    }
    let mut end = budget;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_mac_is_locally_administered_unicast() {
        let mac = random_locally_administered_mac();
        let first = mac.as_bytes()[0];
        assert_eq!(first & 0x02, 0x02);
        assert_eq!(first & 0x01, 0x00);
    }

    #[test]
    fn companion_bssid_is_stable_and_distinct() {
        let primary = MacAddr6::from([0x00, 0x11, 0x22, 0x33, 0x44, 0x54]);
        let companion = derive_owe_companion_bssid(primary);
        assert_ne!(primary, companion);
        assert_eq!(derive_owe_companion_bssid(primary), companion);
    }

    #[test]
    fn short_ssid_gets_plain_suffix() {
        assert_eq!(derive_companion_ssid("HomeNet"), "HomeNet-owe");
    }

    #[test]
    fn long_ssid_gets_truncated_and_hashed() {
        let long = "A".repeat(30);
        let companion = derive_companion_ssid(&long);
        assert!(companion.len() <= MAX_SSID_LEN);
        assert!(companion.starts_with("AAAA"));
        // stable across calls
        assert_eq!(companion, derive_companion_ssid(&long));
    }
}
