//! Collateral and debt operations: deposit, redeem, mint, burn, and the two
//! convenience compositions.
//!
//! Every operation follows the same discipline: acquire the mutation guard,
//! snapshot the ledger, apply all ledger effects (journaled through
//! [`crate::event`]), run the health-factor gates, and only then invoke the
//! external collaborators. Any failure restores the snapshot, so no partial
//! state survives a failed operation. A collaborator that re-enters the
//! engine mid-operation observes the already-committed ledger effects and is
//! refused any nested mutation by the guard.

use crate::event::{record_burn, record_deposit, record_mint, record_redeem};
use crate::external::CollateralToken;
use crate::numeric::{Amount, Quantity};
use crate::state::{AccountId, AssetId};
use crate::{Engine, ProtocolError};
use std::rc::Rc;

impl Engine {
    /// Deposit `quantity` of `asset` to the caller's ledger entry, pulling
    /// the tokens into custody.
    pub fn deposit_collateral(
        &self,
        caller: AccountId,
        asset: AssetId,
        quantity: Quantity,
    ) -> Result<(), ProtocolError> {
        let _guard = self.begin_mutation()?;
        let checkpoint = self.snapshot();
        match self.deposit_inner(caller, asset, quantity) {
            Ok(()) => {
                log::info!("[deposit_collateral] {caller} deposited {quantity} of {asset}");
                self.self_check();
                Ok(())
            }
            Err(e) => {
                self.restore(checkpoint);
                Err(e)
            }
        }
    }

    /// Deposit collateral and mint debt in one atomic operation. A failure
    /// of the mint stage (including its health-factor gate) unwinds the
    /// deposit as well; partial deposit-without-mint is never observable.
    pub fn deposit_collateral_and_mint(
        &self,
        caller: AccountId,
        asset: AssetId,
        quantity: Quantity,
        mint_amount: Amount,
    ) -> Result<(), ProtocolError> {
        let _guard = self.begin_mutation()?;
        let checkpoint = self.snapshot();
        match self.deposit_and_mint_inner(caller, asset, quantity, mint_amount) {
            Ok(()) => {
                log::info!(
                    "[deposit_collateral_and_mint] {caller} deposited {quantity} of {asset} and minted {mint_amount}"
                );
                self.self_check();
                Ok(())
            }
            Err(e) => {
                self.restore(checkpoint);
                Err(e)
            }
        }
    }

    /// Redeem `quantity` of `asset` back to the caller. The caller's health
    /// factor gates the redemption before the transfer leaves custody.
    pub fn redeem_collateral(
        &self,
        caller: AccountId,
        asset: AssetId,
        quantity: Quantity,
    ) -> Result<(), ProtocolError> {
        let _guard = self.begin_mutation()?;
        let checkpoint = self.snapshot();
        let redeemed = (|| {
            let token = self.redeem_effect(caller, caller, asset, quantity)?;
            self.guard_health(caller)?;
            self.push_collateral(&token, asset, caller, quantity)
        })();
        match redeemed {
            Ok(()) => {
                log::info!("[redeem_collateral] {caller} redeemed {quantity} of {asset}");
                self.self_check();
                Ok(())
            }
            Err(e) => {
                self.restore(checkpoint);
                Err(e)
            }
        }
    }

    /// Burn `burn_amount` of the caller's debt, then redeem `quantity` of
    /// `asset`, atomically.
    pub fn redeem_collateral_for_debt(
        &self,
        caller: AccountId,
        asset: AssetId,
        quantity: Quantity,
        burn_amount: Amount,
    ) -> Result<(), ProtocolError> {
        let _guard = self.begin_mutation()?;
        let checkpoint = self.snapshot();
        match self.redeem_for_debt_inner(caller, asset, quantity, burn_amount) {
            Ok(()) => {
                log::info!(
                    "[redeem_collateral_for_debt] {caller} burned {burn_amount} and redeemed {quantity} of {asset}"
                );
                self.self_check();
                Ok(())
            }
            Err(e) => {
                self.restore(checkpoint);
                Err(e)
            }
        }
    }

    /// Mint `amount` of debt to the caller, gated by the caller's health
    /// factor after the ledger reflects the new debt.
    pub fn mint_debt(&self, caller: AccountId, amount: Amount) -> Result<(), ProtocolError> {
        let _guard = self.begin_mutation()?;
        let checkpoint = self.snapshot();
        match self.mint_inner(caller, amount) {
            Ok(()) => {
                log::info!("[mint_debt] {caller} minted {amount}");
                self.self_check();
                Ok(())
            }
            Err(e) => {
                self.restore(checkpoint);
                Err(e)
            }
        }
    }

    /// Burn `amount` of the caller's debt, funded by the caller's own debt
    /// tokens. Whether the caller holds enough tokens is the collaborator's
    /// check, not the ledger's.
    pub fn burn_debt(&self, caller: AccountId, amount: Amount) -> Result<(), ProtocolError> {
        let _guard = self.begin_mutation()?;
        let checkpoint = self.snapshot();
        let burned = (|| {
            self.burn_effect(caller, caller, amount)?;
            // Burning debt can only improve the health factor; this gate is
            // a backstop, not a correctness requirement.
            self.guard_health(caller)?;
            self.burn_interact(caller, amount)
        })();
        match burned {
            Ok(()) => {
                log::info!("[burn_debt] {caller} burned {amount}");
                self.self_check();
                Ok(())
            }
            Err(e) => {
                self.restore(checkpoint);
                Err(e)
            }
        }
    }

    fn deposit_inner(
        &self,
        caller: AccountId,
        asset: AssetId,
        quantity: Quantity,
    ) -> Result<(), ProtocolError> {
        let token = self.deposit_effect(caller, asset, quantity)?;
        self.pull_collateral(&token, asset, caller, quantity)
    }

    fn deposit_and_mint_inner(
        &self,
        caller: AccountId,
        asset: AssetId,
        quantity: Quantity,
        mint_amount: Amount,
    ) -> Result<(), ProtocolError> {
        let token = self.deposit_effect(caller, asset, quantity)?;
        self.mint_effect(caller, mint_amount)?;
        self.guard_health(caller)?;
        self.pull_collateral(&token, asset, caller, quantity)?;
        if !self.debt_token.mint(caller, mint_amount) {
            // The collateral is already in custody; hand it back before
            // unwinding the ledger.
            if !token.transfer(caller, quantity) {
                log::error!(
                    "[deposit_collateral_and_mint] mint failed and the collateral refund of {quantity} {asset} to {caller} also failed; manual intervention required"
                );
            }
            return Err(ProtocolError::MintFailed);
        }
        Ok(())
    }

    fn redeem_for_debt_inner(
        &self,
        caller: AccountId,
        asset: AssetId,
        quantity: Quantity,
        burn_amount: Amount,
    ) -> Result<(), ProtocolError> {
        self.burn_effect(caller, caller, burn_amount)?;
        let token = self.redeem_effect(caller, caller, asset, quantity)?;
        self.guard_health(caller)?;
        self.burn_interact(caller, burn_amount)?;
        if let Err(e) = self.push_collateral(&token, asset, caller, quantity) {
            // The caller's debt tokens are already burned; restore them
            // before unwinding the ledger.
            if !self.debt_token.mint(caller, burn_amount) {
                log::error!(
                    "[redeem_collateral_for_debt] collateral push failed and the debt-token refund of {burn_amount} to {caller} also failed; manual intervention required"
                );
            }
            return Err(e);
        }
        Ok(())
    }

    fn mint_inner(&self, caller: AccountId, amount: Amount) -> Result<(), ProtocolError> {
        self.mint_effect(caller, amount)?;
        self.guard_health(caller)?;
        if !self.debt_token.mint(caller, amount) {
            return Err(ProtocolError::MintFailed);
        }
        Ok(())
    }

    fn deposit_effect(
        &self,
        caller: AccountId,
        asset: AssetId,
        quantity: Quantity,
    ) -> Result<Rc<dyn CollateralToken>, ProtocolError> {
        if quantity.is_zero() {
            return Err(ProtocolError::AmountIsZero);
        }
        let token = self.collateral_token(&asset)?;
        record_deposit(&mut self.state.borrow_mut(), caller, asset, quantity)?;
        Ok(token)
    }

    /// Ledger half of a redemption: debit `from` and journal the movement.
    /// Used unchecked by the liquidation path, which seizes from an account
    /// that is unhealthy by construction.
    pub(crate) fn redeem_effect(
        &self,
        from: AccountId,
        to: AccountId,
        asset: AssetId,
        quantity: Quantity,
    ) -> Result<Rc<dyn CollateralToken>, ProtocolError> {
        if quantity.is_zero() {
            return Err(ProtocolError::AmountIsZero);
        }
        let token = self.collateral_token(&asset)?;
        record_redeem(&mut self.state.borrow_mut(), from, to, asset, quantity)?;
        Ok(token)
    }

    fn mint_effect(&self, caller: AccountId, amount: Amount) -> Result<(), ProtocolError> {
        if amount.is_zero() {
            return Err(ProtocolError::AmountIsZero);
        }
        record_mint(&mut self.state.borrow_mut(), caller, amount)
    }

    pub(crate) fn burn_effect(
        &self,
        account: AccountId,
        payer: AccountId,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        if amount.is_zero() {
            return Err(ProtocolError::AmountIsZero);
        }
        record_burn(&mut self.state.borrow_mut(), account, payer, amount)
    }

    fn pull_collateral(
        &self,
        token: &Rc<dyn CollateralToken>,
        asset: AssetId,
        from: AccountId,
        quantity: Quantity,
    ) -> Result<(), ProtocolError> {
        if !token.transfer_from(from, self.custody, quantity) {
            return Err(ProtocolError::TransferFailed { asset });
        }
        Ok(())
    }

    pub(crate) fn push_collateral(
        &self,
        token: &Rc<dyn CollateralToken>,
        asset: AssetId,
        to: AccountId,
        quantity: Quantity,
    ) -> Result<(), ProtocolError> {
        if !token.transfer(to, quantity) {
            return Err(ProtocolError::TransferFailed { asset });
        }
        Ok(())
    }

    /// Pull `amount` of debt tokens from `payer` into custody and destroy
    /// them.
    pub(crate) fn burn_interact(
        &self,
        payer: AccountId,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        if !self.debt_token.transfer_from(payer, self.custody, amount) {
            return Err(ProtocolError::DebtTransferFailed);
        }
        self.debt_token.burn(amount);
        Ok(())
    }
}
