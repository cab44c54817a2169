//! Health-factor calculation.

use crate::numeric::{mul_div, Amount, HealthFactor, Ratio, SCALE};
use crate::state::AccountId;
use crate::{Engine, EngineConfig, ProtocolError};

/// Pure calculation: threshold-adjusted collateral value over debt.
///
/// `adjusted = collateral_value * liquidation_threshold / liquidation_precision`,
/// health factor = `adjusted * SCALE / debt`. A debt-free account is
/// [`HealthFactor::Unbounded`].
pub fn compute_health_factor(
    collateral_value: Amount,
    debt: Amount,
    config: &EngineConfig,
) -> Result<HealthFactor, ProtocolError> {
    if debt.is_zero() {
        return Ok(HealthFactor::Unbounded);
    }
    let adjusted = mul_div(
        collateral_value.to_u128(),
        u128::from(config.liquidation_threshold),
        u128::from(config.liquidation_precision),
    )
    .ok_or(ProtocolError::ArithmeticOverflow)?;
    let ratio = mul_div(adjusted, SCALE, debt.to_u128()).ok_or(ProtocolError::ArithmeticOverflow)?;
    Ok(HealthFactor::Healthy(Ratio::new(ratio)))
}

impl Engine {
    /// Current health factor of `account`. Debt-free accounts short-circuit
    /// to `Unbounded` without touching the price feeds.
    pub fn get_health_factor(&self, account: AccountId) -> Result<HealthFactor, ProtocolError> {
        let debt = self.state.borrow().debt_of(&account);
        if debt.is_zero() {
            return Ok(HealthFactor::Unbounded);
        }
        let collateral_value = self.total_collateral_value(account)?;
        compute_health_factor(collateral_value, debt, &self.config)
    }

    /// Fails with `HealthFactorBroken` when `account` is below the minimum.
    pub(crate) fn guard_health(&self, account: AccountId) -> Result<(), ProtocolError> {
        let health_factor = self.get_health_factor(account)?;
        if health_factor.is_below(self.config.min_health_factor) {
            return Err(ProtocolError::HealthFactorBroken { health_factor });
        }
        Ok(())
    }
}
