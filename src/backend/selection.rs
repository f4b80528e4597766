use crate::common::config::BackendConfig;
use crate::common::{Error, Result};
use rand::Rng;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Placement policy for new regions. One policy value is used for both
/// registration and duplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selection {
    /// Uniform random over the live targets.
    #[default]
    Random,
    /// Deterministic `hash(name) % n`; useful for reproducible placement.
    HashName,
}

impl Selection {
    /// Read the `selection` key of a backend config. Absent means random.
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        match config.get("selection").map(String::as_str) {
            None | Some("random") => Ok(Selection::Random),
            Some("hash") => Ok(Selection::HashName),
            Some(other) => Err(Error::Config(format!("unknown selection policy: {}", other))),
        }
    }

    /// Pick an index in `0..n`. `n` must be non-zero.
    pub fn pick(&self, name: &str, n: usize) -> usize {
        match self {
            Selection::Random => rand::thread_rng().gen_range(0..n),
            Selection::HashName => (hash_name(name) % n as u64) as usize,
        }
    }
}

pub fn hash_name(name: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_random() {
        let selection = Selection::from_config(&BackendConfig::new()).unwrap();
        assert_eq!(selection, Selection::Random);
    }

    #[test]
    fn test_hash_from_config() {
        let mut config = BackendConfig::new();
        config.insert("selection".to_owned(), "hash".to_owned());
        assert_eq!(Selection::from_config(&config).unwrap(), Selection::HashName);
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let mut config = BackendConfig::new();
        config.insert("selection".to_owned(), "round-robin".to_owned());
        assert!(Selection::from_config(&config).is_err());
    }

    #[test]
    fn test_hash_pick_deterministic() {
        let selection = Selection::HashName;
        let first = selection.pick("m1", 7);
        for _ in 0..8 {
            assert_eq!(selection.pick("m1", 7), first);
        }
        assert_eq!(first, (hash_name("m1") % 7) as usize);
    }

    #[test]
    fn test_random_pick_in_range() {
        let selection = Selection::Random;
        for _ in 0..64 {
            assert!(selection.pick("m1", 3) < 3);
        }
        assert_eq!(selection.pick("m1", 1), 0);
    }
}
