//! Registration names and lifetimes of ORM units of work.

use autotx_container::Reuse;
use autotx_facility::AutoTxReuse;
use serde::{Deserialize, Serialize};

/// Lifetime behind the default (unnamed) unit-of-work registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultLifeStyleOption {
    /// One per transaction
    #[default]
    PerTransaction,
    /// A new one per resolution
    Transient,
}

/// Kind of per-transaction reuse a unit of work gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransactionScoping {
    /// Shared by forks of the same top transaction
    Top,
    /// One per (dependent) transaction
    Current,
}

/// `(key suffix, reuse)` pairs in registration order; the first is the
/// default mapping target.
pub(crate) fn lifestyles(
    option: DefaultLifeStyleOption,
    per_transaction_suffix: &'static str,
    transient_suffix: &'static str,
    scoping: TransactionScoping,
) -> [(&'static str, Reuse); 2] {
    let per_transaction = match scoping {
        TransactionScoping::Top => AutoTxReuse::per_top_transaction(),
        TransactionScoping::Current => AutoTxReuse::per_transaction(),
    };
    match option {
        DefaultLifeStyleOption::PerTransaction => [
            (per_transaction_suffix, per_transaction),
            (transient_suffix, Reuse::Transient),
        ],
        DefaultLifeStyleOption::Transient => [
            (transient_suffix, Reuse::Transient),
            (per_transaction_suffix, per_transaction),
        ],
    }
}
