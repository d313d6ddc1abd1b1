//! Tunables for building and reading static B-tree indexes.
//!
//! Every field has a default, and each can be overridden from the
//! environment:
//!
//! | Variable                   | Field                | Default |
//! |----------------------------|----------------------|---------|
//! | `BTREE_MAX_NODE_SIZE`      | `max_node_size`      | 4096    |
//! | `BTREE_MIN_SEPARATION`     | `min_separation`     | 4096    |
//! | `BTREE_MAX_READ_NODE_SIZE` | `max_read_node_size` | 16384   |
//! | `BTREE_CHECK_KEY_TYPE`     | `check_key_type`     | true    |
//!
//! A value that does not parse is ignored and the default stays in place.

use thiserror::Error;

pub const ENV_MAX_NODE_SIZE: &str = "BTREE_MAX_NODE_SIZE";
pub const ENV_MIN_SEPARATION: &str = "BTREE_MIN_SEPARATION";
pub const ENV_MAX_READ_NODE_SIZE: &str = "BTREE_MAX_READ_NODE_SIZE";
pub const ENV_CHECK_KEY_TYPE: &str = "BTREE_CHECK_KEY_TYPE";

pub const DEFAULT_MAX_NODE_SIZE: u32 = 4096;
pub const DEFAULT_MIN_SEPARATION: u64 = 4096;
pub const DEFAULT_MAX_READ_NODE_SIZE: u32 = 16 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be non-zero")]
    Zero(&'static str),

    #[error("max_node_size {max_node_size} exceeds max_read_node_size {max_read_node_size}")]
    NodeLargerThanReadLimit {
        max_node_size: u32,
        max_read_node_size: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexConfig {
    /// Upper bound on the encoded size of one node when building.
    pub max_node_size: u32,
    /// Minimum distance between the data positions of consecutive leaf
    /// entries. Zero indexes every distinct key.
    pub min_separation: u64,
    /// Largest `max_node_size` a reader accepts from a trailer. Bounds the
    /// buffer allocated per node read.
    pub max_read_node_size: u32,
    /// Whether readers reject files whose key type code differs from the
    /// key type they were opened with.
    pub check_key_type: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_node_size: DEFAULT_MAX_NODE_SIZE,
            min_separation: DEFAULT_MIN_SEPARATION,
            max_read_node_size: DEFAULT_MAX_READ_NODE_SIZE,
            check_key_type: true,
        }
    }
}

impl IndexConfig {
    /// Defaults, overridden by any `BTREE_*` variables that are set.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](IndexConfig::from_env) with a custom variable
    /// source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        Self {
            max_node_size: env_or(&lookup, ENV_MAX_NODE_SIZE, d.max_node_size),
            min_separation: env_or(&lookup, ENV_MIN_SEPARATION, d.min_separation),
            max_read_node_size: env_or(&lookup, ENV_MAX_READ_NODE_SIZE, d.max_read_node_size),
            check_key_type: env_or(&lookup, ENV_CHECK_KEY_TYPE, d.check_key_type),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_node_size == 0 {
            return Err(ConfigError::Zero("max_node_size"));
        }
        if self.max_read_node_size == 0 {
            return Err(ConfigError::Zero("max_read_node_size"));
        }
        if self.max_node_size > self.max_read_node_size {
            return Err(ConfigError::NodeLargerThanReadLimit {
                max_node_size: self.max_node_size,
                max_read_node_size: self.max_read_node_size,
            });
        }
        Ok(())
    }
}

fn env_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
