//! Installers describe the stores an ORM facility registers.
//!
//! Each installer contributes one keyed factory. Exactly one installer is the
//! default and keys must be unique and non-empty.

use std::collections::HashSet;
use std::sync::Arc;

use autotx_core::{Error, Result};

use crate::context::{DbContextFactory, DbContextOptions};
use crate::session::{SessionConfiguration, SessionFactory};

/// Contributes a session factory to the session facility.
pub trait SessionInstaller: Send + Sync {
    /// Whether this installer backs the unnamed registrations.
    fn is_default(&self) -> bool;

    /// Key the factory and its sessions are registered under.
    fn session_factory_key(&self) -> &str;

    /// Freshly built configuration.
    fn config(&self) -> SessionConfiguration;

    /// Build the factory from `configuration`.
    fn build_session_factory(&self, configuration: &SessionConfiguration) -> Result<Arc<dyn SessionFactory>>;

    /// Called once the factory is registered.
    fn registered(&self, _factory: &Arc<dyn SessionFactory>) {}

    /// Previously cached configuration, if still valid.
    fn deserialize(&self) -> Option<SessionConfiguration> {
        None
    }

    /// Cache a freshly built configuration.
    fn serialize(&self, _configuration: &SessionConfiguration) -> Result<()> {
        Ok(())
    }

    /// Adjust the configuration after it was loaded or built.
    fn after_deserialize(&self, _configuration: &mut SessionConfiguration) -> Result<()> {
        Ok(())
    }
}

/// Contributes a db-context factory to the db-context facility.
pub trait DbContextInstaller: Send + Sync {
    /// Whether this installer backs the unnamed registrations.
    fn is_default(&self) -> bool;

    /// Key the factory and its contexts are registered under.
    fn key(&self) -> &str;

    /// Provider options.
    fn config(&self) -> DbContextOptions;

    /// Build the factory from `options`.
    fn build_factory(&self, options: &DbContextOptions) -> Result<Arc<dyn DbContextFactory>>;

    /// Called once the factory is registered.
    fn registered(&self, _factory: &Arc<dyn DbContextFactory>) {}
}

/// Check the installer set: at least one, exactly one default, non-empty
/// keys, no duplicates.
pub(crate) fn validate<'a, I>(kind: &str, installers: I) -> Result<()>
where
    I: IntoIterator<Item = (bool, &'a str)>,
{
    let installers: Vec<(bool, &str)> = installers.into_iter().collect();
    if installers.is_empty() {
        return Err(Error::Configuration(format!("no {}-s registered.", kind)));
    }

    let defaults = installers.iter().filter(|(is_default, _)| *is_default).count();
    if defaults != 1 {
        return Err(Error::Configuration(format!(
            "no {} has IsDefault = true or many have specified it",
            kind
        )));
    }

    if installers.iter().any(|(_, key)| key.is_empty()) {
        return Err(Error::Configuration(
            "all session factory keys must be non null and non empty strings".into(),
        ));
    }

    let mut seen = HashSet::new();
    for (_, key) in &installers {
        if !seen.insert(*key) {
            return Err(Error::Configuration(format!(
                "Duplicate session factory keys '{}' added. Verify that your {} instances are not named the same.",
                key, kind
            )));
        }
    }
    Ok(())
}
