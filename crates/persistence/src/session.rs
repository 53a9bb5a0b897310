//! Session ORM abstractions.
//!
//! The facility treats sessions as opaque resources: it opens them from a
//! [`SessionFactory`], wraps them in a unit of work, and closes them when the
//! owning transaction completes.

use std::collections::BTreeMap;
use std::sync::Arc;

use autotx_core::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// When a session writes pending changes to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Flush before commit and whenever queries need it
    #[default]
    Auto,
    /// Flush only on commit
    Commit,
    /// Flush only when asked
    Manual,
    /// Flush after every change
    Always,
}

/// Data a session factory is built from. Cached on disk by
/// [`ConfigurationPersister`](crate::persister::ConfigurationPersister)s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfiguration {
    /// Connection string handed to the driver
    pub connection_string: String,
    /// Mapped entity names
    #[serde(default)]
    pub mappings: Vec<String>,
    /// Driver properties
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl SessionConfiguration {
    /// Configuration for `connection_string`.
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            ..Self::default()
        }
    }

    /// Add a mapped entity.
    pub fn mapping(mut self, entity: impl Into<String>) -> Self {
        self.mappings.push(entity.into());
        self
    }

    /// Set a driver property.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// A transaction on one session.
pub trait SessionTransaction: Send {
    /// Whether neither commit nor rollback ran yet.
    fn is_active(&self) -> bool;

    /// Commit the session's changes.
    fn commit(&mut self) -> Result<()>;

    /// Discard the session's changes.
    fn rollback(&mut self) -> Result<()>;
}

/// A unit of persistence work against one store.
pub trait Session: Send + Sync {
    /// Identity, for diagnostics.
    fn id(&self) -> Uuid;

    /// Start a session-level transaction.
    fn begin_transaction(&self) -> Result<Box<dyn SessionTransaction>>;

    /// Stage `value` under `key`.
    fn save(&self, key: &str, value: serde_json::Value) -> Result<()>;

    /// Read `key`, staged changes first.
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Stage removal of `key`.
    fn delete(&self, key: &str) -> Result<()>;

    /// Write staged changes.
    fn flush(&self) -> Result<()>;

    /// Current flush mode.
    fn flush_mode(&self) -> FlushMode;

    /// Change the flush mode.
    fn set_flush_mode(&self, mode: FlushMode);

    /// Whether [`Session::close`] has not run yet.
    fn is_open(&self) -> bool;

    /// Release the session. Staged changes are dropped.
    fn close(&self);
}

/// Opens sessions against one configured store.
pub trait SessionFactory: Send + Sync {
    /// Open a new session.
    fn open_session(&self) -> Result<Arc<dyn Session>>;
}
