//! The account ledger: per-account collateral balances and outstanding debt.
//!
//! `State` is the single mutable object of the engine. It is owned by the
//! [`Engine`](crate::Engine) behind a `RefCell` and is only ever mutated
//! through the `record_*` functions in [`crate::event`], which journal every
//! committed change.

use crate::event::Event;
use crate::numeric::{Amount, Quantity};
use crate::ProtocolError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// Like assert_eq, but returns an error instead of panicking.
macro_rules! ensure_eq {
    ($lhs:expr, $rhs:expr, $msg:expr $(, $args:expr)* $(,)*) => {
        if $lhs != $rhs {
            return Err(format!("{} ({:?}) != {} ({:?}): {}",
                               std::stringify!($lhs), $lhs,
                               std::stringify!($rhs), $rhs,
                               format!($msg $(,$args)*)));
        }
    }
}

/// A principal identifier: an opaque 32-byte id.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AccountId(pub [u8; 32]);

impl AccountId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Identifier of a registered collateral asset.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AssetId(pub [u8; 32]);

impl AssetId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Ledger entry for one principal. Created implicitly on first deposit,
/// never destroyed; balances may return to zero.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub collateral: BTreeMap<AssetId, Quantity>,
    pub debt_minted: Amount,
}

impl Account {
    pub fn collateral_balance(&self, asset: &AssetId) -> Quantity {
        self.collateral.get(asset).copied().unwrap_or(Quantity::ZERO)
    }
}

/// The mutable state of the engine: the account table, aggregate totals and
/// the event journal the state can be rebuilt from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub accounts: BTreeMap<AccountId, Account>,
    pub total_deposited: BTreeMap<AssetId, Quantity>,
    pub total_debt_minted: Amount,
    pub events: Vec<Event>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account(&self, id: &AccountId) -> Option<&Account> {
        self.accounts.get(id)
    }

    pub fn collateral_balance(&self, id: &AccountId, asset: &AssetId) -> Quantity {
        self.accounts
            .get(id)
            .map(|account| account.collateral_balance(asset))
            .unwrap_or(Quantity::ZERO)
    }

    pub fn debt_of(&self, id: &AccountId) -> Amount {
        self.accounts
            .get(id)
            .map(|account| account.debt_minted)
            .unwrap_or(Amount::ZERO)
    }

    pub fn total_deposited(&self, asset: &AssetId) -> Quantity {
        self.total_deposited
            .get(asset)
            .copied()
            .unwrap_or(Quantity::ZERO)
    }

    pub(crate) fn credit_collateral(
        &mut self,
        id: AccountId,
        asset: AssetId,
        quantity: Quantity,
    ) -> Result<(), ProtocolError> {
        let account = self.accounts.entry(id).or_default();
        let balance = account.collateral.entry(asset).or_insert(Quantity::ZERO);
        *balance = balance
            .checked_add(quantity)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        let total = self.total_deposited.entry(asset).or_insert(Quantity::ZERO);
        *total = total
            .checked_add(quantity)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        Ok(())
    }

    pub(crate) fn debit_collateral(
        &mut self,
        id: &AccountId,
        asset: &AssetId,
        quantity: Quantity,
    ) -> Result<(), ProtocolError> {
        let available = self.collateral_balance(id, asset);
        let account = self
            .accounts
            .get_mut(id)
            .filter(|account| account.collateral.contains_key(asset))
            .ok_or(ProtocolError::InsufficientCollateral {
                available,
                requested: quantity,
            })?;
        let balance = account
            .collateral
            .get_mut(asset)
            .ok_or(ProtocolError::InsufficientCollateral {
                available,
                requested: quantity,
            })?;
        *balance = balance
            .checked_sub(quantity)
            .ok_or(ProtocolError::InsufficientCollateral {
                available,
                requested: quantity,
            })?;
        let total = self
            .total_deposited
            .get_mut(asset)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        *total = total
            .checked_sub(quantity)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        Ok(())
    }

    pub(crate) fn add_debt(&mut self, id: AccountId, amount: Amount) -> Result<(), ProtocolError> {
        let account = self.accounts.entry(id).or_default();
        account.debt_minted = account
            .debt_minted
            .checked_add(amount)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        self.total_debt_minted = self
            .total_debt_minted
            .checked_add(amount)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        Ok(())
    }

    /// Decrease an account's recorded debt. There is deliberately no local
    /// precondition beyond the checked subtraction: the payer's token balance
    /// is the debt-token collaborator's concern.
    pub(crate) fn remove_debt(
        &mut self,
        id: &AccountId,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        let account = self
            .accounts
            .get_mut(id)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        account.debt_minted = account
            .debt_minted
            .checked_sub(amount)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        self.total_debt_minted = self
            .total_debt_minted
            .checked_sub(amount)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        Ok(())
    }

    /// Internal consistency audit: the aggregate tables must equal the sums
    /// over the account table.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut deposited: BTreeMap<AssetId, Quantity> = BTreeMap::new();
        let mut debt = Amount::ZERO;
        for account in self.accounts.values() {
            for (asset, quantity) in &account.collateral {
                let total = deposited.entry(*asset).or_insert(Quantity::ZERO);
                *total = total
                    .checked_add(*quantity)
                    .ok_or("collateral sum overflows")?;
            }
            debt = debt
                .checked_add(account.debt_minted)
                .ok_or("debt sum overflows")?;
        }
        for (asset, total) in &self.total_deposited {
            let computed = deposited.remove(asset).unwrap_or(Quantity::ZERO);
            ensure_eq!(
                computed,
                *total,
                "total_deposited diverges for asset {}",
                asset
            );
        }
        ensure_eq!(
            deposited.len(),
            0,
            "accounts hold assets missing from total_deposited"
        );
        ensure_eq!(debt, self.total_debt_minted, "total_debt_minted diverges");
        Ok(())
    }
}
