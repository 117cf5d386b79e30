//! Inventory collaborator: target lookup and group expansion

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Errors raised by an inventory backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InventoryError {
    /// Backend cannot be reached
    #[error("Inventory unavailable: {0}")]
    Unavailable(String),

    /// Backend rejected the lookup
    #[error("Inventory lookup failed: {0}")]
    Lookup(String),
}

/// How a target is reached
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Secure shell
    Ssh,
    /// Windows remote management
    WinRm,
    /// The orchestrator host itself
    Local,
    /// Container exec
    Docker,
    /// Transport supplied by a named plugin
    Plugin(String),
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Ssh => f.write_str("ssh"),
            Transport::WinRm => f.write_str("winrm"),
            Transport::Local => f.write_str("local"),
            Transport::Docker => f.write_str("docker"),
            Transport::Plugin(name) => write!(f, "plugin:{}", name),
        }
    }
}

/// An addressable node an execution runs against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Inventory id
    pub id: String,
    /// Connection URI or hostname
    pub uri: String,
    /// Transport used to reach it
    pub transport: Transport,
}

impl Target {
    /// Create a target
    pub fn new(id: impl Into<String>, uri: impl Into<String>, transport: Transport) -> Self {
        Self {
            id: id.into(),
            uri: uri.into(),
            transport,
        }
    }
}

/// Inventory service resolving groups and targets
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Member target ids of a group, `None` if the group is unknown
    async fn expand_group(&self, group_id: &str) -> Result<Option<Vec<String>>, InventoryError>;

    /// Look up one target
    async fn get_target(&self, target_id: &str) -> Result<Option<Target>, InventoryError>;
}

/// Fixed inventory built up front
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    targets: HashMap<String, Target>,
    groups: HashMap<String, Vec<String>>,
}

impl StaticInventory {
    /// Create an empty inventory
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a target
    pub fn with_target(mut self, target: Target) -> Self {
        self.targets.insert(target.id.clone(), target);
        self
    }

    /// Add a group with the given members
    pub fn with_group<I, S>(mut self, group_id: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups
            .insert(group_id.into(), members.into_iter().map(Into::into).collect());
        self
    }

    /// Number of known targets
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether no targets are known
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[async_trait]
impl Inventory for StaticInventory {
    async fn expand_group(&self, group_id: &str) -> Result<Option<Vec<String>>, InventoryError> {
        Ok(self.groups.get(group_id).cloned())
    }

    async fn get_target(&self, target_id: &str) -> Result<Option<Target>, InventoryError> {
        Ok(self.targets.get(target_id).cloned())
    }
}
