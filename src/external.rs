//! Collaborator seams: the token contracts and the clock the engine talks to.
//!
//! The engine is the debt token's sole authorized controller; both token
//! collaborators report failure with `false` and the engine treats that as a
//! hard abort of the whole operation. Collaborators are untrusted and may
//! call back into the engine while servicing a transfer; see
//! [`crate::guard`] for how nested mutating calls are rejected.

use crate::numeric::{Amount, Quantity};
use crate::state::AccountId;
use std::time::{SystemTime, UNIX_EPOCH};

/// The pegged debt-token contract.
pub trait DebtToken {
    /// Mint `amount` to `to`. Returns `false` on failure.
    fn mint(&self, to: AccountId, amount: Amount) -> bool;

    /// Move `amount` between holders. Returns `false` on failure
    /// (including an insufficient balance at `from`).
    fn transfer_from(&self, from: AccountId, to: AccountId, amount: Amount) -> bool;

    /// Destroy `amount` held in the caller's (the engine's) own custody.
    fn burn(&self, amount: Amount);
}

/// A collateral asset's token contract.
pub trait CollateralToken {
    /// Pull `quantity` from `from` into `to` (the engine's custody).
    /// Returns `false` on failure.
    fn transfer_from(&self, from: AccountId, to: AccountId, quantity: Quantity) -> bool;

    /// Push `quantity` out of the engine's custody to `to`.
    /// Returns `false` on failure.
    fn transfer(&self, to: AccountId, quantity: Quantity) -> bool;
}

/// Source of the current time, in seconds since the Unix epoch.
/// Injected so staleness checks are testable.
pub trait TimeSource {
    fn now(&self) -> u64;
}

/// Wall-clock time source.
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}
