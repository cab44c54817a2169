//! Third-party liquidation of undercollateralized accounts.
//!
//! A single call runs four guarded stages — eligibility, seizure sizing,
//! transfer & repay, post-conditions — and is terminal on success or on any
//! guard failure. No partial liquidation state survives a failed stage.

use crate::numeric::{mul_div, Amount, HealthFactor, Quantity};
use crate::state::{AccountId, AssetId};
use crate::{Engine, ProtocolError};

impl Engine {
    /// Repay `debt_to_cover` of `victim`'s debt with tokens pulled from the
    /// liquidator, in exchange for the equivalent collateral quantity plus
    /// the liquidation bonus. Returns the total quantity seized.
    ///
    /// The victim must be below the minimum health factor going in, must be
    /// strictly improved and strictly above the minimum coming out, and the
    /// liquidator must not drop below the minimum themselves.
    pub fn liquidate(
        &self,
        liquidator: AccountId,
        collateral_asset: AssetId,
        victim: AccountId,
        debt_to_cover: Amount,
    ) -> Result<Quantity, ProtocolError> {
        let _guard = self.begin_mutation()?;
        let checkpoint = self.snapshot();
        match self.liquidate_inner(liquidator, collateral_asset, victim, debt_to_cover) {
            Ok(seized) => {
                log::info!(
                    "[liquidate] {liquidator} covered {debt_to_cover} of {victim}'s debt and seized {seized} of {collateral_asset}"
                );
                self.self_check();
                Ok(seized)
            }
            Err(e) => {
                self.restore(checkpoint);
                log::debug!("[liquidate] liquidation of {victim} by {liquidator} failed: {e}");
                Err(e)
            }
        }
    }

    fn liquidate_inner(
        &self,
        liquidator: AccountId,
        collateral_asset: AssetId,
        victim: AccountId,
        debt_to_cover: Amount,
    ) -> Result<Quantity, ProtocolError> {
        if debt_to_cover.is_zero() {
            return Err(ProtocolError::AmountIsZero);
        }

        // Stage 1: eligibility.
        let starting_health_factor = self.get_health_factor(victim)?;
        if !starting_health_factor.is_below(self.config.min_health_factor) {
            return Err(ProtocolError::HealthFactorIsOkay);
        }

        // Stage 2: seizure sizing.
        let seize = self.get_token_amount_from_usd(collateral_asset, debt_to_cover)?;
        let bonus = mul_div(
            seize.to_u128(),
            u128::from(self.config.liquidation_bonus),
            u128::from(self.config.liquidation_precision),
        )
        .map(Quantity::new)
        .ok_or(ProtocolError::ArithmeticOverflow)?;
        let total_seizure = seize
            .checked_add(bonus)
            .ok_or(ProtocolError::ArithmeticOverflow)?;

        // Stage 3, ledger half: seize from the victim (bypassing the
        // victim's own post-redeem gate) and retire the covered debt.
        let token = self.redeem_effect(victim, liquidator, collateral_asset, total_seizure)?;
        self.burn_effect(victim, liquidator, debt_to_cover)?;

        // Stage 4: post-conditions, before any token moves.
        let ending_health_factor = self.get_health_factor(victim)?;
        if ending_health_factor <= starting_health_factor
            || ending_health_factor <= HealthFactor::Healthy(self.config.min_health_factor)
        {
            return Err(ProtocolError::HealthFactorNotImproved);
        }
        self.guard_health(liquidator)?;

        // Stage 3, interaction half: pull and destroy the liquidator's debt
        // tokens, then hand over the seized collateral.
        self.burn_interact(liquidator, debt_to_cover)?;
        if let Err(e) = self.push_collateral(&token, collateral_asset, liquidator, total_seizure) {
            // The liquidator already paid; restore their debt tokens before
            // unwinding the ledger.
            if !self.debt_token.mint(liquidator, debt_to_cover) {
                log::error!(
                    "[liquidate] collateral push failed and the debt-token refund of {debt_to_cover} to {liquidator} also failed; manual intervention required"
                );
            }
            return Err(e);
        }

        Ok(total_seizure)
    }
}
