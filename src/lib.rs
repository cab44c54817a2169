//! Overcollateralized synthetic-asset accounting engine.
//!
//! Principals deposit approved collateral assets and mint units of a pegged
//! debt token against them. Every state-changing operation re-validates the
//! collateralization invariant before it is allowed to commit; any violation
//! unwinds the entire operation. Prices come from staleness-guarded feed
//! adapters, and an undercollateralized account can be liquidated by a third
//! party for a bonus-adjusted collateral seizure.
//!
//! The engine owns the ledger; the debt token, the collateral tokens and the
//! price feeds are external collaborators consumed through the traits in
//! [`external`] and [`oracle`].

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod event;
pub mod external;
pub mod guard;
pub mod health;
pub mod liquidation;
pub mod numeric;
pub mod operations;
pub mod oracle;
pub mod registry;
pub mod state;
pub mod valuation;

#[cfg(any(test, feature = "test_endpoints"))]
pub mod test_helpers;

#[cfg(test)]
mod tests;

use event::{Event, ReplayLogError};
use external::{CollateralToken, DebtToken, TimeSource};
use guard::{GuardError, MutationGuard, OperationPhase};
use numeric::{Amount, Quantity, Ratio};
use registry::CollateralRegistry;
use state::{AccountId, AssetId, State};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("amount must be greater than zero")]
    AmountIsZero,
    #[error("collateral asset {0} is not registered")]
    AssetNotRegistered(AssetId),
    #[error("collateral asset {0} is already registered")]
    AssetAlreadyRegistered(AssetId),
    #[error("insufficient collateral: available {available}, requested {requested}")]
    InsufficientCollateral {
        available: Quantity,
        requested: Quantity,
    },
    #[error("collateral token transfer failed for asset {asset}")]
    TransferFailed { asset: AssetId },
    #[error("debt token transfer failed")]
    DebtTransferFailed,
    #[error("debt token mint failed")]
    MintFailed,
    #[error("health factor {health_factor} is below the minimum")]
    HealthFactorBroken { health_factor: numeric::HealthFactor },
    #[error("account is healthy and cannot be liquidated")]
    HealthFactorIsOkay,
    #[error("liquidation did not improve the account's health factor")]
    HealthFactorNotImproved,
    #[error("stale price for asset {asset}: quote is {age_secs}s old")]
    StalePrice { asset: AssetId, age_secs: u64 },
    #[error("price feed unavailable: {0}")]
    PriceFeedUnavailable(String),
    #[error("non-positive price {price} reported for asset {asset}")]
    NonPositivePrice { asset: AssetId, price: i128 },
    #[error("another operation is already in progress")]
    AlreadyProcessing,
    #[error("arithmetic overflow")]
    ArithmeticOverflow,
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl From<GuardError> for ProtocolError {
    fn from(e: GuardError) -> Self {
        match e {
            GuardError::AlreadyMutating => Self::AlreadyProcessing,
        }
    }
}

/// Risk parameters, injected at construction so the engine is testable
/// against alternate parameterizations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Percentage of collateral value counted toward coverage (e.g. 50).
    pub liquidation_threshold: u32,
    /// Denominator for the threshold and bonus percentages (e.g. 100).
    pub liquidation_precision: u32,
    /// Extra collateral percentage awarded to a liquidator (e.g. 10).
    pub liquidation_bonus: u32,
    /// Below this, an account is liquidatable and mutations are refused.
    pub min_health_factor: Ratio,
    /// Maximum tolerated age of a price quote.
    pub staleness_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            liquidation_threshold: 50,
            liquidation_precision: 100,
            liquidation_bonus: 10,
            min_health_factor: Ratio::ONE,
            staleness_timeout: Duration::from_secs(3 * 60 * 60),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.liquidation_precision == 0 {
            return Err(ProtocolError::InvalidConfiguration(
                "liquidation_precision must be non-zero".to_string(),
            ));
        }
        if self.liquidation_threshold == 0 {
            return Err(ProtocolError::InvalidConfiguration(
                "liquidation_threshold must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Debt and collateral value of one account, in unit-of-account terms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInformation {
    pub debt_minted: Amount,
    pub collateral_value: Amount,
}

/// Operator-facing aggregate view.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProtocolStatus {
    pub total_collateral_value: f64,
    pub total_debt_minted: f64,
    pub global_collateral_ratio: f64,
}

/// The accounting engine. All mutating operations are strictly serialized
/// through an advisory per-instance lock; read-only operations never take
/// the lock and are safe to call at any time, including from a collaborator
/// callback in the middle of a mutation.
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) registry: CollateralRegistry,
    pub(crate) debt_token: Rc<dyn DebtToken>,
    pub(crate) time: Rc<dyn TimeSource>,
    pub(crate) custody: AccountId,
    pub(crate) state: RefCell<State>,
    pub(crate) phase: Cell<OperationPhase>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        registry: CollateralRegistry,
        debt_token: Rc<dyn DebtToken>,
        time: Rc<dyn TimeSource>,
        custody: AccountId,
    ) -> Result<Self, ProtocolError> {
        config.validate()?;
        let mut state = State::new();
        event::record_init(&mut state, config.clone(), registry.asset_ids());
        Ok(Self {
            config,
            registry,
            debt_token,
            time,
            custody,
            state: RefCell::new(state),
            phase: Cell::new(OperationPhase::Idle),
        })
    }

    /// Rebuild an engine from a previously exported journal.
    pub fn from_events(
        config: EngineConfig,
        registry: CollateralRegistry,
        debt_token: Rc<dyn DebtToken>,
        time: Rc<dyn TimeSource>,
        custody: AccountId,
        events: Vec<Event>,
    ) -> Result<Self, ReplayLogError> {
        config
            .validate()
            .map_err(|e| ReplayLogError::InconsistentLog(e.to_string()))?;
        let state = event::replay(events.into_iter())?;
        Ok(Self {
            config,
            registry,
            debt_token,
            time,
            custody,
            state: RefCell::new(state),
            phase: Cell::new(OperationPhase::Idle),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The account the engine holds custody balances under.
    pub fn custody(&self) -> AccountId {
        self.custody
    }

    pub fn get_collateral_tokens(&self) -> Vec<AssetId> {
        self.registry.asset_ids()
    }

    pub fn get_collateral_balance(&self, account: AccountId, asset: AssetId) -> Quantity {
        self.state.borrow().collateral_balance(&account, &asset)
    }

    pub fn total_debt_minted(&self) -> Amount {
        self.state.borrow().total_debt_minted
    }

    pub fn total_deposited(&self, asset: AssetId) -> Quantity {
        self.state.borrow().total_deposited(&asset)
    }

    /// Debt and total collateral value of `account`. Needs fresh prices.
    pub fn get_account_information(
        &self,
        account: AccountId,
    ) -> Result<AccountInformation, ProtocolError> {
        let debt_minted = self.state.borrow().debt_of(&account);
        let collateral_value = self.total_collateral_value(account)?;
        Ok(AccountInformation {
            debt_minted,
            collateral_value,
        })
    }

    /// Aggregate view across all accounts. Needs fresh prices.
    pub fn protocol_status(&self) -> Result<ProtocolStatus, ProtocolError> {
        let mut total_value = Amount::ZERO;
        for asset in self.registry.asset_ids() {
            let deposited = self.total_deposited(asset);
            let value = self.get_usd_value(asset, deposited)?;
            total_value = total_value
                .checked_add(value)
                .ok_or(ProtocolError::ArithmeticOverflow)?;
        }
        let total_debt = self.total_debt_minted();
        let total_collateral_value = fixed_to_f64(total_value.to_u128());
        let total_debt_minted = fixed_to_f64(total_debt.to_u128());
        let global_collateral_ratio = if total_debt.is_zero() {
            f64::INFINITY
        } else {
            total_collateral_value / total_debt_minted
        };
        Ok(ProtocolStatus {
            total_collateral_value,
            total_debt_minted,
            global_collateral_ratio,
        })
    }

    /// A copy of the journal, suitable for [`event::encode_events`] and
    /// later [`Engine::from_events`].
    pub fn export_events(&self) -> Vec<Event> {
        self.state.borrow().events.clone()
    }

    pub(crate) fn begin_mutation(&self) -> Result<MutationGuard<'_>, ProtocolError> {
        MutationGuard::new(&self.phase).map_err(ProtocolError::from)
    }

    pub(crate) fn snapshot(&self) -> State {
        self.state.borrow().clone()
    }

    pub(crate) fn restore(&self, checkpoint: State) {
        *self.state.borrow_mut() = checkpoint;
    }

    pub(crate) fn collateral_token(
        &self,
        asset: &AssetId,
    ) -> Result<Rc<dyn CollateralToken>, ProtocolError> {
        self.registry
            .get(asset)
            .map(|entry| Rc::clone(&entry.token))
            .ok_or(ProtocolError::AssetNotRegistered(*asset))
    }

    #[cfg(feature = "self_check")]
    pub(crate) fn self_check(&self) {
        if let Err(msg) = self.state.borrow().check_invariants() {
            panic!("ledger invariant broken: {msg}");
        }
    }

    #[cfg(not(feature = "self_check"))]
    pub(crate) fn self_check(&self) {}
}

fn fixed_to_f64(raw: u128) -> f64 {
    Ratio::new(raw).to_f64()
}
