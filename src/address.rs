//! Rendezvous addresses and the address record file.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::Role;

/// The grouped-transport backend an address rendezvouses over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Gloo,
    Mpi,
    Nccl,
    /// No real transport; used by in-memory connectors and tests.
    Null,
}

impl Default for Backend {
    fn default() -> Self {
        Backend::Gloo
    }
}

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("init_method `{0}` must start with tcp://, file:// or null")]
    InvalidInitMethod(String),
    #[error("rank {rank} is out of range for world size {world_size}")]
    InvalidRank { rank: i32, world_size: u32 },
    #[error("rank must be given explicitly when world size is {0}")]
    UnresolvedRank(u32),
}

/// One rendezvous point of a transport group.
///
/// Two addresses are considered the same connection when their identity
/// triple (backend, init_method, group_name) matches; world size and rank
/// do not take part in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub backend: Backend,
    /// URL-like rendezvous string, e.g. `tcp://localhost:1994` or
    /// `file:///tmp/shared`.
    pub init_method: String,
    #[serde(default = "default_world_size")]
    pub world_size: u32,
    /// `-1` means "resolve from the role at connect time"; only valid for
    /// a world of two.
    #[serde(default = "default_rank")]
    pub rank: i32,
    #[serde(default)]
    pub group_name: String,
}

fn default_world_size() -> u32 {
    2
}

fn default_rank() -> i32 {
    -1
}

impl Address {
    pub fn new(backend: Backend, init_method: impl Into<String>) -> Result<Self, AddressError> {
        let init_method = init_method.into();
        if !(init_method.starts_with("tcp://")
            || init_method.starts_with("file://")
            || init_method.starts_with("null"))
        {
            return Err(AddressError::InvalidInitMethod(init_method));
        }
        Ok(Self {
            backend,
            init_method,
            world_size: default_world_size(),
            rank: default_rank(),
            group_name: String::new(),
        })
    }

    pub fn with_world(mut self, world_size: u32, rank: i32) -> Result<Self, AddressError> {
        if rank < -1 || rank >= world_size as i32 {
            return Err(AddressError::InvalidRank { rank, world_size });
        }
        self.world_size = world_size;
        self.rank = rank;
        Ok(self)
    }

    pub fn with_group_name(mut self, group_name: impl Into<String>) -> Self {
        self.group_name = group_name.into();
        self
    }

    /// Resolves the placeholder rank `-1` from the caller's role. The
    /// leader takes rank 0, the single follower rank 1; larger worlds
    /// must come with an explicit rank.
    pub fn resolved_rank(&self, role: Role) -> Result<u32, AddressError> {
        if self.rank >= 0 {
            return Ok(self.rank as u32);
        }
        if self.world_size == 2 {
            Ok(if role.is_leader() { 0 } else { 1 })
        } else {
            Err(AddressError::UnresolvedRank(self.world_size))
        }
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.backend == other.backend
            && self.init_method == other.init_method
            && self.group_name == other.group_name
    }
}

impl Eq for Address {}

impl std::hash::Hash for Address {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.backend.hash(state);
        self.init_method.hash(state);
        self.group_name.hash(state);
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}[{}]", self.init_method, self.group_name)
    }
}

#[derive(Debug, Error)]
pub enum AddressFileError {
    #[error("failed to read address file: {0}")]
    Io(#[from] std::io::Error),
    #[error("address file is not a valid record list: {0}")]
    Format(#[from] serde_json::Error),
}

/// Reads a flat JSON array of address records.
pub fn load_address_file(path: impl AsRef<Path>) -> Result<Vec<Address>, AddressFileError> {
    let data = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

/// Writes the address list back as a flat JSON array.
pub fn save_address_file(
    path: impl AsRef<Path>,
    addresses: &[Address],
) -> Result<(), AddressFileError> {
    let data = serde_json::to_string_pretty(addresses)?;
    fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_ignores_world_and_rank() {
        let a = Address::new(Backend::Gloo, "tcp://localhost:1994").unwrap();
        let b = a.clone().with_world(10, 3).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_group_name_splits_identity() {
        let a = Address::new(Backend::Gloo, "tcp://localhost:1994")
            .unwrap()
            .with_group_name("alpha");
        let b = a.clone().with_group_name("beta");
        assert_ne!(a, b);
    }

    #[test]
    fn test_rank_resolution() {
        let addr = Address::new(Backend::Null, "null").unwrap();
        assert_eq!(addr.resolved_rank(Role::Leader).unwrap(), 0);
        assert_eq!(addr.resolved_rank(Role::Follower).unwrap(), 1);

        let wide = addr.with_world(4, -1).unwrap();
        assert!(wide.resolved_rank(Role::Leader).is_err());
    }

    #[test]
    fn test_rejects_bad_init_method() {
        assert!(Address::new(Backend::Gloo, "env://").is_err());
    }

    #[test]
    fn test_address_file_round_trip() {
        let dir = std::env::temp_dir().join("fedlink-address-test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("addresses.json");

        let addresses = vec![
            Address::new(Backend::Gloo, "tcp://localhost:1994").unwrap(),
            Address::new(Backend::Null, "null")
                .unwrap()
                .with_group_name("sim"),
        ];
        save_address_file(&path, &addresses).unwrap();
        let back = load_address_file(&path).unwrap();
        assert_eq!(addresses, back);
    }
}
