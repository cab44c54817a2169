//! The event journal.
//!
//! Every committed ledger mutation goes through one of the `record_*`
//! functions here, which apply the change to [`State`] and append the
//! corresponding [`Event`]. The journal is the engine's persistence story:
//! [`replay`] folds an `Init`-first event sequence back into a `State`, and
//! the CBOR helpers round-trip a journal through bytes.

use crate::numeric::{Amount, Quantity};
use crate::state::{AccountId, AssetId, State};
use crate::{EngineConfig, ProtocolError};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    #[serde(rename = "init")]
    Init {
        config: EngineConfig,
        assets: Vec<AssetId>,
    },

    #[serde(rename = "collateral_deposited")]
    CollateralDeposited {
        account: AccountId,
        asset: AssetId,
        quantity: Quantity,
    },

    /// Collateral leaving an account's ledger entry. `from == to` for a
    /// plain redemption; a liquidation seizure redeems from the victim to
    /// the liquidator.
    #[serde(rename = "collateral_redeemed")]
    CollateralRedeemed {
        from: AccountId,
        to: AccountId,
        asset: AssetId,
        quantity: Quantity,
    },

    #[serde(rename = "debt_minted")]
    DebtMinted { account: AccountId, amount: Amount },

    /// Debt retired on `account`, funded by tokens pulled from `payer`.
    #[serde(rename = "debt_burned")]
    DebtBurned {
        account: AccountId,
        payer: AccountId,
        amount: Amount,
    },
}

pub fn record_init(state: &mut State, config: EngineConfig, assets: Vec<AssetId>) {
    state.events.push(Event::Init { config, assets });
}

pub fn record_deposit(
    state: &mut State,
    account: AccountId,
    asset: AssetId,
    quantity: Quantity,
) -> Result<(), ProtocolError> {
    state.credit_collateral(account, asset, quantity)?;
    state.events.push(Event::CollateralDeposited {
        account,
        asset,
        quantity,
    });
    Ok(())
}

pub fn record_redeem(
    state: &mut State,
    from: AccountId,
    to: AccountId,
    asset: AssetId,
    quantity: Quantity,
) -> Result<(), ProtocolError> {
    state.debit_collateral(&from, &asset, quantity)?;
    state.events.push(Event::CollateralRedeemed {
        from,
        to,
        asset,
        quantity,
    });
    Ok(())
}

pub fn record_mint(
    state: &mut State,
    account: AccountId,
    amount: Amount,
) -> Result<(), ProtocolError> {
    state.add_debt(account, amount)?;
    state.events.push(Event::DebtMinted { account, amount });
    Ok(())
}

pub fn record_burn(
    state: &mut State,
    account: AccountId,
    payer: AccountId,
    amount: Amount,
) -> Result<(), ProtocolError> {
    state.remove_debt(&account, amount)?;
    state.events.push(Event::DebtBurned {
        account,
        payer,
        amount,
    });
    Ok(())
}

#[derive(Debug)]
pub enum ReplayLogError {
    /// There are no events in the event log.
    EmptyLog,
    /// The event log is inconsistent.
    InconsistentLog(String),
}

/// Rebuild the ledger from its journal. The first event must be `Init`.
pub fn replay(mut events: impl Iterator<Item = Event>) -> Result<State, ReplayLogError> {
    let mut state = match events.next() {
        Some(event @ Event::Init { .. }) => {
            let mut state = State::new();
            state.events.push(event);
            state
        }
        Some(event) => {
            return Err(ReplayLogError::InconsistentLog(format!(
                "the first event is not Init: {event:?}"
            )))
        }
        None => return Err(ReplayLogError::EmptyLog),
    };
    for event in events {
        let applied = match event {
            Event::Init { .. } => Err(ProtocolError::InvalidConfiguration(
                "more than one init event".to_string(),
            )),
            Event::CollateralDeposited {
                account,
                asset,
                quantity,
            } => record_deposit(&mut state, account, asset, quantity),
            Event::CollateralRedeemed {
                from,
                to,
                asset,
                quantity,
            } => record_redeem(&mut state, from, to, asset, quantity),
            Event::DebtMinted { account, amount } => record_mint(&mut state, account, amount),
            Event::DebtBurned {
                account,
                payer,
                amount,
            } => record_burn(&mut state, account, payer, amount),
        };
        applied.map_err(|e| ReplayLogError::InconsistentLog(e.to_string()))?;
    }
    Ok(state)
}

/// Encode a journal as CBOR.
pub fn encode_events(events: &[Event]) -> Result<Vec<u8>, String> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(events, &mut buf).map_err(|e| e.to_string())?;
    Ok(buf)
}

/// Decode a CBOR journal.
pub fn decode_events(bytes: &[u8]) -> Result<Vec<Event>, String> {
    ciborium::de::from_reader(bytes).map_err(|e| e.to_string())
}
