//! Units of work wrapping a session for the lifetime of a transaction.
//!
//! | Ambient transaction | Unit of work | commit / rollback |
//! |---------------------|--------------|-------------------|
//! | disabled | [`ExplicitUnitOfWork`] | drive the session's own transaction, then close |
//! | enabled | [`ImplicitUnitOfWork`] | no-ops, the session enlists in the ambient transaction |

use std::fmt;
use std::sync::Arc;

use autotx_core::{Error, Result};
use parking_lot::Mutex;

use crate::session::{Session, SessionTransaction};

/// A session bound to the outcome of a transaction.
pub trait UnitOfWork: Send + Sync {
    /// The wrapped session.
    fn current_session(&self) -> &Arc<dyn Session>;

    /// Make the session's work durable.
    fn commit(&self) -> Result<()>;

    /// Discard the session's work.
    fn rollback(&self) -> Result<()>;

    /// Release the session, rolling back unfinished work.
    fn dispose(&self);
}

/// Unit of work with its own session transaction.
pub struct ExplicitUnitOfWork {
    session: Arc<dyn Session>,
    transaction: Mutex<Option<Box<dyn SessionTransaction>>>,
}

impl ExplicitUnitOfWork {
    /// Begin a session transaction on `session`.
    pub fn begin(session: Arc<dyn Session>) -> Result<Self> {
        let transaction = session.begin_transaction()?;
        Ok(Self {
            session,
            transaction: Mutex::new(Some(transaction)),
        })
    }

    /// Whether commit or rollback already ran.
    pub fn is_closed(&self) -> bool {
        self.transaction.lock().is_none()
    }

    fn take(&self) -> Result<Box<dyn SessionTransaction>> {
        self.transaction
            .lock()
            .take()
            .ok_or_else(|| Error::Disposed("unit of work".into()))
    }
}

impl UnitOfWork for ExplicitUnitOfWork {
    fn current_session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    fn commit(&self) -> Result<()> {
        let mut transaction = self.take()?;
        let result = if transaction.is_active() {
            transaction.commit()
        } else {
            Ok(())
        };
        if result.is_err() && transaction.is_active() {
            if let Err(e) = transaction.rollback() {
                tracing::warn!(session = %self.session.id(), error = %e, "rollback after failed commit failed");
            }
        }
        self.session.close();
        result
    }

    fn rollback(&self) -> Result<()> {
        let mut transaction = self.take()?;
        let result = if transaction.is_active() {
            transaction.rollback()
        } else {
            Ok(())
        };
        self.session.close();
        result
    }

    fn dispose(&self) {
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.rollback() {
            tracing::warn!(session = %self.session.id(), error = %e, "rollback on dispose failed");
        }
    }
}

impl Drop for ExplicitUnitOfWork {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for ExplicitUnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExplicitUnitOfWork")
            .field("session", &self.session.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Unit of work relying on the ambient transaction.
pub struct ImplicitUnitOfWork {
    session: Arc<dyn Session>,
}

impl ImplicitUnitOfWork {
    /// Wrap `session`.
    pub fn new(session: Arc<dyn Session>) -> Self {
        Self { session }
    }
}

impl UnitOfWork for ImplicitUnitOfWork {
    fn current_session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    fn commit(&self) -> Result<()> {
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        Ok(())
    }

    fn dispose(&self) {
        self.session.close();
    }
}

impl fmt::Debug for ImplicitUnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImplicitUnitOfWork")
            .field("session", &self.session.id())
            .finish()
    }
}
