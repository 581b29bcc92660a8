use std::collections::{HashMap, VecDeque};

use wlan_warden_logging::TransitionLog;

use crate::role::Role;
use crate::warden::PmsmId;

/// A terminal PMSM's tombstone, kept for debug-only diagnostics dumps.
#[derive(Debug, Clone)]
pub struct GraveyardEntry {
    pub id: PmsmId,
    pub role: Role,
    pub log: TransitionLog,
}

/// One bounded FIFO per PMSM "family" (keyed by [`Role`]), each capped at a
/// fixed capacity. Pushing past capacity silently drops the oldest entry —
/// this is a debug aid, not an audit log.
pub struct Graveyard {
    capacity: usize,
    families: HashMap<Role, VecDeque<GraveyardEntry>>,
}

impl Graveyard {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            families: HashMap::new(),
        }
    }

    pub fn bury(&mut self, entry: GraveyardEntry) {
        let family = self.families.entry(entry.role).or_default();
        if family.len() == self.capacity {
            family.pop_front();
        }
        family.push_back(entry);
    }

    pub fn for_role(&self, role: Role) -> impl Iterator<Item = &GraveyardEntry> {
        self.families.get(&role).into_iter().flatten()
    }

    pub fn len(&self, role: Role) -> usize {
        self.families.get(&role).map_or(0, |q| q.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_per_family_fifo() {
        let mut gy = Graveyard::new(3);
        for i in 0..5u64 {
            gy.bury(GraveyardEntry {
                id: PmsmId::new(i),
                role: Role::ClientPrimary,
                log: TransitionLog::new(),
            });
        }
        assert_eq!(gy.len(Role::ClientPrimary), 3);
        let ids: Vec<u64> = gy
            .for_role(Role::ClientPrimary)
            .map(|e| e.id.raw())
            .collect();
        assert_eq!(ids, vec![2, 3, 4]);
    }

    #[test]
    fn families_are_independent() {
        let mut gy = Graveyard::new(2);
        gy.bury(GraveyardEntry {
            id: PmsmId::new(1),
            role: Role::ClientPrimary,
            log: TransitionLog::new(),
        });
        gy.bury(GraveyardEntry {
            id: PmsmId::new(2),
            role: Role::SoftApTethered,
            log: TransitionLog::new(),
        });
        assert_eq!(gy.len(Role::ClientPrimary), 1);
        assert_eq!(gy.len(Role::SoftApTethered), 1);
    }
}
