//! Stable key hashing shared by lane selection and instance partitioning.

use sha2::{Digest, Sha256};

use crate::config::MultiInstanceConfig;

/// First four bytes of SHA-256, big endian. Identical across processes and
/// restarts, so a key maps to the same lane for a given lane count.
pub fn stable_hash(key: &str) -> u32 {
    let digest = Sha256::digest(key.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

pub fn lane_index(key: &str, lanes: usize) -> usize {
    debug_assert!(lanes > 0);
    stable_hash(key) as usize % lanes
}

/// Which of the cooperating instances owns a given user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InstancePartition {
    instance: u32,
    total: u32,
}

impl InstancePartition {
    pub fn new(instance: u32, total: u32) -> Self {
        Self { instance, total }
    }

    pub fn single() -> Self {
        Self::new(0, 1)
    }

    pub fn instance(&self) -> u32 {
        self.instance
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn is_related(&self, user_id: &str) -> bool {
        if self.total <= 1 {
            return true;
        }
        stable_hash(user_id) % self.total == self.instance
    }
}

impl From<MultiInstanceConfig> for InstancePartition {
    fn from(cfg: MultiInstanceConfig) -> Self {
        Self::new(cfg.instance, cfg.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable() {
        // sha256("") = e3b0c442...
        assert_eq!(stable_hash(""), 0xe3b0c442);
        assert_eq!(stable_hash("!room:local"), stable_hash("!room:local"));
    }

    #[test]
    fn lane_index_stays_in_range() {
        for i in 0..200 {
            assert!(lane_index(&format!("@user{i}:local"), 7) < 7);
        }
    }

    #[test]
    fn every_user_belongs_to_exactly_one_instance() {
        for i in 0..100 {
            let user = format!("@user{i}:local");
            let owners = (0..4)
                .filter(|n| InstancePartition::new(*n, 4).is_related(&user))
                .count();
            assert_eq!(owners, 1);
        }
    }

    #[test]
    fn single_instance_owns_everyone() {
        assert!(InstancePartition::single().is_related("@anyone:anywhere"));
    }
}
