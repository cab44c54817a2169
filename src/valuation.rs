//! Conversions between collateral quantities and the unit of account.
//!
//! Integer fixed-point only: results are deterministic and reproducible.
//! Prices are re-read from the feed adapters on every call.

use crate::numeric::{mul_div, Amount, Price, Quantity, SCALE};
use crate::state::{AccountId, AssetId};
use crate::{Engine, ProtocolError};

impl Engine {
    pub(crate) fn read_price(&self, asset: AssetId) -> Result<Price, ProtocolError> {
        let entry = self
            .registry
            .get(&asset)
            .ok_or(ProtocolError::AssetNotRegistered(asset))?;
        entry
            .oracle
            .read_price(asset, self.time.now(), self.config.staleness_timeout)
    }

    /// Value of `quantity` of `asset` in the unit of account:
    /// `quantity * price / SCALE`.
    pub fn get_usd_value(
        &self,
        asset: AssetId,
        quantity: Quantity,
    ) -> Result<Amount, ProtocolError> {
        let price = self.read_price(asset)?;
        mul_div(quantity.to_u128(), price.to_u128(), SCALE)
            .map(Amount::new)
            .ok_or(ProtocolError::ArithmeticOverflow)
    }

    /// Inverse conversion: the asset quantity worth `amount`:
    /// `amount * SCALE / price`. Used to size liquidation seizures.
    pub fn get_token_amount_from_usd(
        &self,
        asset: AssetId,
        amount: Amount,
    ) -> Result<Quantity, ProtocolError> {
        let price = self.read_price(asset)?;
        mul_div(amount.to_u128(), SCALE, price.to_u128())
            .map(Quantity::new)
            .ok_or(ProtocolError::ArithmeticOverflow)
    }

    /// Sum of the account's collateral values over every registered asset.
    /// Summation order cannot affect the result; no state borrow is held
    /// across the feed reads.
    pub fn total_collateral_value(&self, account: AccountId) -> Result<Amount, ProtocolError> {
        let balances: Vec<(AssetId, Quantity)> = {
            let state = self.state.borrow();
            self.registry
                .asset_ids()
                .into_iter()
                .map(|asset| (asset, state.collateral_balance(&account, &asset)))
                .collect()
        };
        let mut total = Amount::ZERO;
        for (asset, quantity) in balances {
            let value = self.get_usd_value(asset, quantity)?;
            total = total
                .checked_add(value)
                .ok_or(ProtocolError::ArithmeticOverflow)?;
        }
        Ok(total)
    }
}
