//! Facility configuration
//!
//! [`AutoTxOptions`] can be built in code or loaded from TOML:
//!
//! ```
//! use autotx_facility::{AmbientTransactionOption, AutoTxOptions};
//!
//! let options = AutoTxOptions::from_toml_str(
//!     r#"
//!     ambient_transaction = "enabled"
//!     default_timeout_ms = 5000
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(options.ambient_transaction, AmbientTransactionOption::Enabled);
//! ```

use std::time::Duration;

use autotx_core::{Error, IsolationLevel, Result, TransactionOptions};
use serde::{Deserialize, Serialize};

/// Whether ORM units of work rely on the ambient transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbientTransactionOption {
    /// Units of work enlist in the ambient transaction.
    Enabled,
    /// Units of work manage their own transaction.
    #[default]
    Disabled,
}

/// Which notion of "logical flow" the activity stack follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityManagerKind {
    /// One activity per thread.
    #[default]
    ThreadLocal,
    /// One activity per tokio flow scope.
    FlowLocal,
}

/// AutoTx facility options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoTxOptions {
    /// Ambient transaction participation for ORM units of work
    pub ambient_transaction: AmbientTransactionOption,
    /// Activity manager implementation
    pub activity_manager: ActivityManagerKind,
    /// Timeout for attributes that don't set one
    pub default_timeout_ms: u64,
    /// Isolation for attributes that don't set one
    pub default_isolation_level: IsolationLevel,
}

impl Default for AutoTxOptions {
    fn default() -> Self {
        Self {
            ambient_transaction: AmbientTransactionOption::Disabled,
            activity_manager: ActivityManagerKind::ThreadLocal,
            default_timeout_ms: TransactionOptions::DEFAULT_TIMEOUT.as_millis() as u64,
            default_isolation_level: IsolationLevel::Serializable,
        }
    }
}

impl AutoTxOptions {
    /// Parse options from TOML. Missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source)
            .map_err(|e| Error::Configuration(format!("invalid AutoTx options: {}", e)))
    }

    /// Set the ambient transaction option.
    pub fn ambient_transaction(mut self, option: AmbientTransactionOption) -> Self {
        self.ambient_transaction = option;
        self
    }

    /// Set the activity manager kind.
    pub fn activity_manager(mut self, kind: ActivityManagerKind) -> Self {
        self.activity_manager = kind;
        self
    }

    /// Set the default timeout.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Defaults handed to the transaction manager.
    pub fn transaction_defaults(&self) -> TransactionOptions {
        TransactionOptions {
            timeout: Duration::from_millis(self.default_timeout_ms),
            isolation_level: self.default_isolation_level,
            ..TransactionOptions::default()
        }
    }
}
