use crate::event::{self, Event};
use crate::external::{CollateralToken, DebtToken, TimeSource};
use crate::numeric::{Amount, HealthFactor, Quantity, Ratio, SCALE};
use crate::oracle::{PriceFeed, PriceOracleAdapter};
use crate::registry::{CollateralAsset, CollateralRegistry};
use crate::state::{AccountId, AssetId};
use crate::test_helpers::*;
use crate::{Engine, EngineConfig, ProtocolError};
use assert_matches::assert_matches;
use proptest::prelude::*;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

fn alice() -> AccountId {
    account(1)
}

fn bob() -> AccountId {
    account(2)
}

// ---------------------------------------------------------------------------
// Valuation

#[test]
fn usd_value_of_fifteen_units_at_two_thousand() {
    let (h, a) = single_asset_harness();
    assert_eq!(h.engine.get_usd_value(a, units(15)).unwrap(), usd(30_000));
}

#[test]
fn token_amount_is_the_inverse_conversion() {
    let (h, a) = single_asset_harness();
    // $100 at $2000 per unit is 0.05 units.
    assert_eq!(
        h.engine.get_token_amount_from_usd(a, usd(100)).unwrap(),
        Quantity::new(SCALE / 20)
    );
}

// ---------------------------------------------------------------------------
// Deposit

#[test]
fn deposit_moves_tokens_into_custody_and_credits_the_ledger() {
    let (h, a) = single_asset_harness();
    h.fund(alice(), a, units(10));

    h.engine.deposit_collateral(alice(), a, units(10)).unwrap();

    assert_eq!(h.engine.get_collateral_balance(alice(), a), units(10));
    assert_eq!(h.engine.total_deposited(a), units(10));
    assert_eq!(h.token(a).balance_of(alice()), Quantity::ZERO);
    assert_eq!(h.token(a).balance_of(custody()), units(10));
    assert!(h
        .engine
        .export_events()
        .contains(&Event::CollateralDeposited {
            account: alice(),
            asset: a,
            quantity: units(10),
        }));
}

#[test]
fn deposit_rejects_zero_and_unknown_assets() {
    let (h, a) = single_asset_harness();
    assert_matches!(
        h.engine.deposit_collateral(alice(), a, Quantity::ZERO),
        Err(ProtocolError::AmountIsZero)
    );
    assert_matches!(
        h.engine.deposit_collateral(alice(), asset(9), units(1)),
        Err(ProtocolError::AssetNotRegistered(_))
    );
}

#[test]
fn failed_transfer_unwinds_the_deposit() {
    let (h, a) = single_asset_harness();
    h.fund(alice(), a, units(10));
    h.token(a).set_fail_transfers(true);

    assert_matches!(
        h.engine.deposit_collateral(alice(), a, units(10)),
        Err(ProtocolError::TransferFailed { asset }) if asset == a
    );
    assert_eq!(h.engine.get_collateral_balance(alice(), a), Quantity::ZERO);
    assert_eq!(h.engine.total_deposited(a), Quantity::ZERO);
    // Nothing but the construction event survives the rollback.
    assert_eq!(h.engine.export_events().len(), 1);
}

// ---------------------------------------------------------------------------
// Mint

#[test]
fn mint_against_sufficient_collateral() {
    let (h, a) = single_asset_harness();
    h.fund(alice(), a, units(10));
    h.engine.deposit_collateral(alice(), a, units(10)).unwrap();

    h.engine.mint_debt(alice(), usd(100)).unwrap();

    assert_eq!(h.engine.total_debt_minted(), usd(100));
    assert_eq!(h.debt_token.balance_of(alice()), usd(100));
    // 10 units at $2000 with a 50% threshold over 100 debt: exactly 100.0.
    assert_eq!(
        h.engine.get_health_factor(alice()).unwrap(),
        HealthFactor::Healthy(Ratio::new(100 * SCALE))
    );
    let info = h.engine.get_account_information(alice()).unwrap();
    assert_eq!(info.debt_minted, usd(100));
    assert_eq!(info.collateral_value, usd(20_000));
}

#[test]
fn mint_without_collateral_is_refused() {
    let (h, _) = single_asset_harness();
    assert_matches!(
        h.engine.mint_debt(alice(), usd(1)),
        Err(ProtocolError::HealthFactorBroken {
            health_factor: HealthFactor::Healthy(ratio)
        }) if ratio == Ratio::ZERO
    );
    assert_eq!(h.engine.total_debt_minted(), Amount::ZERO);
}

#[test]
fn mint_up_to_the_threshold_but_not_past_it() {
    let (h, a) = single_asset_harness();
    h.fund(alice(), a, units(1));
    h.engine.deposit_collateral(alice(), a, units(1)).unwrap();

    // 1 unit at $2000 covers exactly $1000 of debt at the 50% threshold.
    assert_matches!(
        h.engine.mint_debt(alice(), usd(1_001)),
        Err(ProtocolError::HealthFactorBroken { .. })
    );
    h.engine.mint_debt(alice(), usd(1_000)).unwrap();
    assert_eq!(
        h.engine.get_health_factor(alice()).unwrap(),
        HealthFactor::Healthy(Ratio::ONE)
    );
}

#[test]
fn failed_collaborator_mint_unwinds_the_debt() {
    let (h, a) = single_asset_harness();
    h.fund(alice(), a, units(10));
    h.engine.deposit_collateral(alice(), a, units(10)).unwrap();
    h.debt_token.set_fail_mint(true);

    assert_matches!(
        h.engine.mint_debt(alice(), usd(100)),
        Err(ProtocolError::MintFailed)
    );
    assert_eq!(h.engine.total_debt_minted(), Amount::ZERO);
    assert_eq!(h.debt_token.balance_of(alice()), Amount::ZERO);
}

// ---------------------------------------------------------------------------
// Deposit-and-mint atomicity

#[test]
fn deposit_and_mint_is_one_operation() {
    let (h, a) = single_asset_harness();
    h.fund(alice(), a, units(10));

    h.engine
        .deposit_collateral_and_mint(alice(), a, units(10), usd(5_000))
        .unwrap();

    assert_eq!(h.engine.get_collateral_balance(alice(), a), units(10));
    assert_eq!(h.engine.total_debt_minted(), usd(5_000));
    assert_eq!(h.debt_token.balance_of(alice()), usd(5_000));
}

#[test]
fn unhealthy_mint_leg_leaves_no_deposit_behind() {
    let (h, a) = single_asset_harness();
    h.fund(alice(), a, units(1));

    // 1 unit covers at most $1000; the whole operation must vanish.
    assert_matches!(
        h.engine
            .deposit_collateral_and_mint(alice(), a, units(1), usd(1_001)),
        Err(ProtocolError::HealthFactorBroken { .. })
    );
    assert_eq!(h.engine.get_collateral_balance(alice(), a), Quantity::ZERO);
    assert_eq!(h.token(a).balance_of(alice()), units(1));
    assert_eq!(h.token(a).balance_of(custody()), Quantity::ZERO);
    assert_eq!(h.engine.total_debt_minted(), Amount::ZERO);
    assert_eq!(h.engine.export_events().len(), 1);
}

#[test]
fn failed_mint_leg_refunds_the_pulled_collateral() {
    let (h, a) = single_asset_harness();
    h.fund(alice(), a, units(10));
    h.debt_token.set_fail_mint(true);

    assert_matches!(
        h.engine
            .deposit_collateral_and_mint(alice(), a, units(10), usd(100)),
        Err(ProtocolError::MintFailed)
    );
    assert_eq!(h.engine.get_collateral_balance(alice(), a), Quantity::ZERO);
    assert_eq!(h.token(a).balance_of(alice()), units(10));
    assert_eq!(h.token(a).balance_of(custody()), Quantity::ZERO);
}

// ---------------------------------------------------------------------------
// Redeem

#[test]
fn deposit_then_redeem_restores_every_balance() {
    let (h, a) = single_asset_harness();
    h.fund(alice(), a, units(7));

    h.engine.deposit_collateral(alice(), a, units(7)).unwrap();
    h.engine.redeem_collateral(alice(), a, units(7)).unwrap();

    assert_eq!(h.token(a).balance_of(alice()), units(7));
    assert_eq!(h.token(a).balance_of(custody()), Quantity::ZERO);
    assert_eq!(h.engine.get_collateral_balance(alice(), a), Quantity::ZERO);
    assert_eq!(h.engine.total_deposited(a), Quantity::ZERO);
    assert_eq!(h.engine.export_events().len(), 3);
}

#[test]
fn redeem_that_would_break_health_is_refused() {
    let (h, a) = single_asset_harness();
    h.fund(alice(), a, units(10));
    h.engine.deposit_collateral(alice(), a, units(10)).unwrap();
    h.engine.mint_debt(alice(), usd(10_000)).unwrap();

    assert_matches!(
        h.engine.redeem_collateral(alice(), a, units(1)),
        Err(ProtocolError::HealthFactorBroken { .. })
    );
    assert_eq!(h.engine.get_collateral_balance(alice(), a), units(10));
    assert_eq!(h.token(a).balance_of(custody()), units(10));
}

#[test]
fn redeem_more_than_deposited_reports_the_shortfall() {
    let (h, a) = single_asset_harness();
    h.fund(alice(), a, units(3));
    h.engine.deposit_collateral(alice(), a, units(3)).unwrap();

    assert_matches!(
        h.engine.redeem_collateral(alice(), a, units(5)),
        Err(ProtocolError::InsufficientCollateral {
            available,
            requested,
        }) if available == units(3) && requested == units(5)
    );
}

// ---------------------------------------------------------------------------
// Burn

#[test]
fn burn_retires_debt_and_destroys_the_tokens() {
    let (h, a) = single_asset_harness();
    h.fund(alice(), a, units(10));
    h.engine.deposit_collateral(alice(), a, units(10)).unwrap();
    h.engine.mint_debt(alice(), usd(100)).unwrap();

    h.engine.burn_debt(alice(), usd(40)).unwrap();

    assert_eq!(h.engine.total_debt_minted(), usd(60));
    assert_eq!(h.debt_token.balance_of(alice()), usd(60));
    assert_eq!(h.debt_token.balance_of(custody()), Amount::ZERO);
    assert_eq!(h.debt_token.total_supply(), 60 * SCALE);
}

#[test]
fn burning_more_than_minted_overflows() {
    let (h, a) = single_asset_harness();
    h.fund(alice(), a, units(10));
    h.engine.deposit_collateral(alice(), a, units(10)).unwrap();
    h.engine.mint_debt(alice(), usd(100)).unwrap();

    assert_matches!(
        h.engine.burn_debt(alice(), usd(150)),
        Err(ProtocolError::ArithmeticOverflow)
    );
    assert_eq!(h.engine.total_debt_minted(), usd(100));
}

#[test]
fn burning_with_no_ledger_entry_overflows() {
    let (h, _) = single_asset_harness();
    assert_matches!(
        h.engine.burn_debt(bob(), usd(1)),
        Err(ProtocolError::ArithmeticOverflow)
    );
}

#[test]
fn burn_needs_the_payers_tokens() {
    let (h, a) = single_asset_harness();
    h.fund(alice(), a, units(10));
    h.engine.deposit_collateral(alice(), a, units(10)).unwrap();
    h.engine.mint_debt(alice(), usd(100)).unwrap();
    // The wallet lost most of its tokens out of band.
    h.debt_token.set_balance(alice(), usd(10));

    assert_matches!(
        h.engine.burn_debt(alice(), usd(50)),
        Err(ProtocolError::DebtTransferFailed)
    );
    assert_eq!(h.engine.total_debt_minted(), usd(100));
    assert_eq!(h.debt_token.balance_of(alice()), usd(10));
}

// ---------------------------------------------------------------------------
// Redeem-for-debt

#[test]
fn redeem_for_debt_burns_then_releases() {
    let (h, a) = single_asset_harness();
    h.fund(alice(), a, units(10));
    h.engine.deposit_collateral(alice(), a, units(10)).unwrap();
    h.engine.mint_debt(alice(), usd(1_000)).unwrap();

    h.engine
        .redeem_collateral_for_debt(alice(), a, units(2), usd(1_000))
        .unwrap();

    assert_eq!(h.engine.total_debt_minted(), Amount::ZERO);
    assert_eq!(h.engine.get_collateral_balance(alice(), a), units(8));
    assert_eq!(h.token(a).balance_of(alice()), units(2));
    assert_eq!(h.debt_token.balance_of(alice()), Amount::ZERO);
    assert_eq!(h.debt_token.total_supply(), 0);
}

#[test]
fn failed_release_refunds_the_burned_tokens() {
    let (h, a) = single_asset_harness();
    h.fund(alice(), a, units(10));
    h.engine.deposit_collateral(alice(), a, units(10)).unwrap();
    h.engine.mint_debt(alice(), usd(1_000)).unwrap();
    h.token(a).set_fail_transfers(true);

    assert_matches!(
        h.engine
            .redeem_collateral_for_debt(alice(), a, units(2), usd(1_000)),
        Err(ProtocolError::TransferFailed { .. })
    );
    // Ledger rolled back, and the debt tokens pulled from the wallet were
    // minted back by the compensation step.
    assert_eq!(h.engine.total_debt_minted(), usd(1_000));
    assert_eq!(h.engine.get_collateral_balance(alice(), a), units(10));
    assert_eq!(h.debt_token.balance_of(alice()), usd(1_000));
    assert_eq!(h.debt_token.total_supply(), 1_000 * SCALE);
}

// ---------------------------------------------------------------------------
// Liquidation

/// Victim with 10 units and $8000 debt, price fallen from $2000 to $1000.
fn liquidation_setup() -> (TestHarness, AssetId) {
    let (h, a) = single_asset_harness();
    h.fund(alice(), a, units(10));
    h.engine.deposit_collateral(alice(), a, units(10)).unwrap();
    h.engine.mint_debt(alice(), usd(8_000)).unwrap();
    h.feed(a).set_price(price_e8(1_000), START_TIME);
    (h, a)
}

#[test]
fn price_drop_makes_the_account_liquidatable() {
    let (h, _) = liquidation_setup();
    // (10 * 1000 * 0.5) / 8000 = 0.625.
    let hf = h.engine.get_health_factor(alice()).unwrap();
    assert_eq!(hf, HealthFactor::Healthy(Ratio::new(5 * SCALE / 8)));
    assert!(hf.is_below(Ratio::ONE));
}

#[test]
fn liquidation_seizes_collateral_with_the_bonus() {
    let (h, a) = liquidation_setup();
    h.fund(bob(), a, units(20));
    h.engine.deposit_collateral(bob(), a, units(20)).unwrap();
    h.engine.mint_debt(bob(), usd(7_000)).unwrap();

    let seized = h
        .engine
        .liquidate(bob(), a, alice(), usd(7_000))
        .unwrap();

    // $7000 at $1000 per unit is 7 units, plus the 10% bonus: 7.7.
    assert_eq!(seized, Quantity::new(77 * SCALE / 10));
    assert_eq!(
        h.engine.get_collateral_balance(alice(), a),
        Quantity::new(23 * SCALE / 10)
    );
    assert_eq!(h.engine.get_account_information(alice()).unwrap().debt_minted, usd(1_000));
    // (2.3 * 1000 * 0.5) / 1000 = 1.15: improved and above the minimum.
    assert_eq!(
        h.engine.get_health_factor(alice()).unwrap(),
        HealthFactor::Healthy(Ratio::new(23 * SCALE / 20))
    );
    // The liquidator paid with debt tokens and received the seizure in their
    // wallet; their own position is untouched and still healthy.
    assert_eq!(h.debt_token.balance_of(bob()), Amount::ZERO);
    // Alice's 8000 plus bob's 7000 were minted; bob's 7000 were burned.
    assert_eq!(h.debt_token.total_supply(), 8_000 * SCALE);
    assert_eq!(h.token(a).balance_of(bob()), seized);
    assert_eq!(h.engine.get_collateral_balance(bob(), a), units(20));
    assert!(!h
        .engine
        .get_health_factor(bob())
        .unwrap()
        .is_below(Ratio::ONE));
    let events = h.engine.export_events();
    assert!(events.contains(&Event::CollateralRedeemed {
        from: alice(),
        to: bob(),
        asset: a,
        quantity: seized,
    }));
    assert!(events.contains(&Event::DebtBurned {
        account: alice(),
        payer: bob(),
        amount: usd(7_000),
    }));
}

#[test]
fn healthy_accounts_cannot_be_liquidated() {
    let (h, a) = single_asset_harness();
    h.fund(alice(), a, units(10));
    h.engine.deposit_collateral(alice(), a, units(10)).unwrap();
    h.engine.mint_debt(alice(), usd(100)).unwrap();

    assert_matches!(
        h.engine.liquidate(bob(), a, alice(), usd(100)),
        Err(ProtocolError::HealthFactorIsOkay)
    );
}

#[test]
fn liquidation_must_restore_the_victim_above_the_minimum() {
    let (h, a) = liquidation_setup();

    // Covering $1 of an $8000 hole cannot lift the account above 1.0.
    assert_matches!(
        h.engine.liquidate(bob(), a, alice(), usd(1)),
        Err(ProtocolError::HealthFactorNotImproved)
    );
    assert_eq!(h.engine.get_collateral_balance(alice(), a), units(10));
    assert_eq!(h.engine.get_account_information(alice()).unwrap().debt_minted, usd(8_000));
    assert_eq!(h.token(a).balance_of(bob()), Quantity::ZERO);
}

#[test]
fn liquidation_rejects_a_zero_cover() {
    let (h, a) = liquidation_setup();
    assert_matches!(
        h.engine.liquidate(bob(), a, alice(), Amount::ZERO),
        Err(ProtocolError::AmountIsZero)
    );
}

// ---------------------------------------------------------------------------
// Price staleness and feed failures

#[test]
fn stale_prices_freeze_valuation() {
    let (h, a) = single_asset_harness();
    h.clock.advance(3 * 60 * 60 + 1);
    assert_matches!(
        h.engine.get_usd_value(a, units(1)),
        Err(ProtocolError::StalePrice { age_secs, .. }) if age_secs == 3 * 60 * 60 + 1
    );
}

#[test]
fn a_quote_exactly_at_the_bound_is_still_fresh() {
    let (h, a) = single_asset_harness();
    h.clock.advance(3 * 60 * 60);
    assert_eq!(h.engine.get_usd_value(a, units(1)).unwrap(), usd(2_000));
}

#[test]
fn stale_prices_block_mint_but_not_debt_free_flows() {
    let (h, a) = single_asset_harness();
    h.fund(alice(), a, units(10));
    h.engine.deposit_collateral(alice(), a, units(5)).unwrap();
    h.clock.advance(4 * 60 * 60);

    assert_matches!(
        h.engine.mint_debt(alice(), usd(100)),
        Err(ProtocolError::StalePrice { .. })
    );
    // A debt-free account needs no valuation: deposits and redemptions keep
    // working under a stale feed.
    h.engine.deposit_collateral(alice(), a, units(5)).unwrap();
    h.engine.redeem_collateral(alice(), a, units(10)).unwrap();
}

#[test]
fn a_broken_feed_surfaces_as_unavailable() {
    let (h, a) = single_asset_harness();
    h.feed(a).set_broken(true);
    assert_matches!(
        h.engine.get_usd_value(a, units(1)),
        Err(ProtocolError::PriceFeedUnavailable(_))
    );
}

// ---------------------------------------------------------------------------
// Health-factor monotonicity

#[test]
fn deposits_never_hurt_and_mints_never_help() {
    let (h, a) = single_asset_harness();
    h.fund(alice(), a, units(20));
    h.engine.deposit_collateral(alice(), a, units(10)).unwrap();
    h.engine.mint_debt(alice(), usd(5_000)).unwrap();

    let before = h.engine.get_health_factor(alice()).unwrap();
    h.engine.deposit_collateral(alice(), a, units(5)).unwrap();
    let after_deposit = h.engine.get_health_factor(alice()).unwrap();
    assert!(after_deposit >= before);

    h.engine.mint_debt(alice(), usd(1_000)).unwrap();
    let after_mint = h.engine.get_health_factor(alice()).unwrap();
    assert!(after_mint < after_deposit);

    h.engine.burn_debt(alice(), usd(2_000)).unwrap();
    assert!(h.engine.get_health_factor(alice()).unwrap() > after_mint);
}

// ---------------------------------------------------------------------------
// Alternate risk parameters

#[test]
fn the_threshold_is_a_parameter_not_a_constant() {
    let a = asset(1);
    let config = EngineConfig {
        liquidation_threshold: 80,
        liquidation_bonus: 5,
        ..EngineConfig::default()
    };
    let h = harness_with(config, &[(a, 1_000)]);
    h.fund(alice(), a, units(10));
    h.engine.deposit_collateral(alice(), a, units(10)).unwrap();

    // 10 units at $1000 with an 80% threshold covers exactly $8000.
    h.engine.mint_debt(alice(), usd(8_000)).unwrap();
    assert_matches!(
        h.engine.mint_debt(alice(), usd(1)),
        Err(ProtocolError::HealthFactorBroken { .. })
    );
}

#[test]
fn zero_precision_is_rejected_at_construction() {
    let config = EngineConfig {
        liquidation_precision: 0,
        ..EngineConfig::default()
    };
    assert_matches!(
        config.validate(),
        Err(ProtocolError::InvalidConfiguration(_))
    );
}

// ---------------------------------------------------------------------------
// Operator views

#[test]
fn protocol_status_reports_the_global_ratio() {
    let (h, a) = single_asset_harness();
    h.fund(alice(), a, units(10));
    h.engine.deposit_collateral(alice(), a, units(10)).unwrap();
    h.engine.mint_debt(alice(), usd(5_000)).unwrap();

    let status = h.engine.protocol_status().unwrap();
    assert_eq!(status.total_collateral_value, 20_000.0);
    assert_eq!(status.total_debt_minted, 5_000.0);
    assert_eq!(status.global_collateral_ratio, 4.0);
}

#[test]
fn a_debt_free_protocol_has_an_infinite_ratio() {
    let (h, _) = single_asset_harness();
    assert_eq!(
        h.engine.protocol_status().unwrap().global_collateral_ratio,
        f64::INFINITY
    );
}

// ---------------------------------------------------------------------------
// Reentrancy

/// A collateral token whose `transfer_from` calls back into the engine, the
/// way a token with transfer hooks would.
struct ReentrantToken {
    engine: RefCell<Option<Rc<Engine>>>,
    observed_balance: Cell<Quantity>,
    nested_mutation: RefCell<Option<Result<(), ProtocolError>>>,
}

impl ReentrantToken {
    fn new() -> Self {
        Self {
            engine: RefCell::new(None),
            observed_balance: Cell::new(Quantity::ZERO),
            nested_mutation: RefCell::new(None),
        }
    }
}

impl CollateralToken for ReentrantToken {
    fn transfer_from(&self, from: AccountId, _to: AccountId, _quantity: Quantity) -> bool {
        if let Some(engine) = self.engine.borrow().as_ref() {
            // Read-only access mid-mutation sees the committed ledger effect.
            self.observed_balance
                .set(engine.get_collateral_balance(from, asset(1)));
            *self.nested_mutation.borrow_mut() = Some(engine.mint_debt(from, usd(1)));
        }
        true
    }

    fn transfer(&self, _to: AccountId, _quantity: Quantity) -> bool {
        true
    }
}

#[test]
fn a_reentrant_collaborator_sees_effects_but_cannot_mutate() {
    let token = Rc::new(ReentrantToken::new());
    let feed = Rc::new(MockPriceFeed::new(price_e8(2_000), START_TIME));
    let clock = Rc::new(ManualClock::new(START_TIME));
    let debt_token = Rc::new(MockDebtToken::new(custody()));
    let registry = CollateralRegistry::new(vec![(
        asset(1),
        CollateralAsset {
            token: token.clone() as Rc<dyn CollateralToken>,
            oracle: PriceOracleAdapter::new(feed as Rc<dyn PriceFeed>, 8),
        },
    )])
    .unwrap();
    let engine = Rc::new(
        Engine::new(
            EngineConfig::default(),
            registry,
            debt_token as Rc<dyn DebtToken>,
            clock as Rc<dyn TimeSource>,
            custody(),
        )
        .unwrap(),
    );
    *token.engine.borrow_mut() = Some(engine.clone());

    engine.deposit_collateral(alice(), asset(1), units(2)).unwrap();

    assert_eq!(token.observed_balance.get(), units(2));
    assert_matches!(
        token.nested_mutation.borrow().clone(),
        Some(Err(ProtocolError::AlreadyProcessing))
    );
    // The refused nested mint left no trace.
    assert_eq!(engine.total_debt_minted(), Amount::ZERO);
}

// ---------------------------------------------------------------------------
// Journal replay

#[test]
fn the_journal_rebuilds_the_ledger() {
    let (h, a) = single_asset_harness();
    h.fund(alice(), a, units(10));
    h.engine.deposit_collateral(alice(), a, units(10)).unwrap();
    h.engine.mint_debt(alice(), usd(1_000)).unwrap();
    h.engine.burn_debt(alice(), usd(400)).unwrap();

    let events = h.engine.export_events();
    let bytes = event::encode_events(&events).unwrap();
    let decoded = event::decode_events(&bytes).unwrap();
    assert_eq!(decoded, events);

    let clock = Rc::new(ManualClock::new(START_TIME));
    let debt_token = Rc::new(MockDebtToken::new(custody()));
    let token = Rc::new(MockCollateralToken::new(custody()));
    let feed = Rc::new(MockPriceFeed::new(price_e8(2_000), START_TIME));
    let registry = CollateralRegistry::new(vec![(
        a,
        CollateralAsset {
            token: token as Rc<dyn CollateralToken>,
            oracle: PriceOracleAdapter::new(feed as Rc<dyn PriceFeed>, 8),
        },
    )])
    .unwrap();
    let rebuilt = Engine::from_events(
        EngineConfig::default(),
        registry,
        debt_token as Rc<dyn DebtToken>,
        clock as Rc<dyn TimeSource>,
        custody(),
        decoded,
    )
    .unwrap();

    assert_eq!(rebuilt.get_collateral_balance(alice(), a), units(10));
    assert_eq!(rebuilt.total_debt_minted(), usd(600));
    assert_eq!(rebuilt.total_deposited(a), units(10));
    assert_eq!(rebuilt.export_events(), h.engine.export_events());
}

#[test]
fn replay_requires_a_log_and_an_init() {
    assert_matches!(
        event::replay(std::iter::empty()),
        Err(event::ReplayLogError::EmptyLog)
    );
    let not_init = Event::DebtMinted {
        account: alice(),
        amount: usd(1),
    };
    assert_matches!(
        event::replay(std::iter::once(not_init)),
        Err(event::ReplayLogError::InconsistentLog(_))
    );
}

#[test]
fn replay_rejects_an_inconsistent_log() {
    let events = vec![
        Event::Init {
            config: EngineConfig::default(),
            assets: vec![asset(1)],
        },
        // Redeeming what was never deposited cannot replay.
        Event::CollateralRedeemed {
            from: alice(),
            to: alice(),
            asset: asset(1),
            quantity: units(1),
        },
    ];
    assert_matches!(
        event::replay(events.into_iter()),
        Err(event::ReplayLogError::InconsistentLog(_))
    );
}

// ---------------------------------------------------------------------------
// Randomized operation sequences

#[derive(Clone, Debug)]
enum Op {
    Deposit { who: u8, asset: u8, quantity: u128 },
    Redeem { who: u8, asset: u8, quantity: u128 },
    Mint { who: u8, amount: u128 },
    Burn { who: u8, amount: u128 },
    Liquidate { who: u8, victim: u8, asset: u8, amount: u128 },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..3, 0u8..2, 1u128..50).prop_map(|(who, asset, quantity)| Op::Deposit {
            who,
            asset,
            quantity
        }),
        (0u8..3, 0u8..2, 1u128..50).prop_map(|(who, asset, quantity)| Op::Redeem {
            who,
            asset,
            quantity
        }),
        (0u8..3, 1u128..5_000).prop_map(|(who, amount)| Op::Mint { who, amount }),
        (0u8..3, 1u128..5_000).prop_map(|(who, amount)| Op::Burn { who, amount }),
        (0u8..3, 0u8..3, 0u8..2, 1u128..5_000).prop_map(|(who, victim, asset, amount)| {
            Op::Liquidate {
                who,
                victim,
                asset,
                amount,
            }
        }),
    ]
}

proptest! {
    /// Whatever sequence of operations runs, the protocol never owes more
    /// than its collateral is worth, the aggregate tables stay consistent
    /// with the account table, and the read-only views keep working.
    #[test]
    fn the_ledger_stays_solvent(ops in proptest::collection::vec(arb_op(), 1..40)) {
        let (h, a, b) = dual_asset_harness();
        let assets = [a, b];
        for n in 0..3 {
            h.fund(account(n + 1), a, units(1_000_000));
            h.fund(account(n + 1), b, units(1_000_000));
        }

        for op in ops {
            // Individual operations may fail; the invariants must hold anyway.
            let _ = match op {
                Op::Deposit { who, asset, quantity } => {
                    h.engine.deposit_collateral(account(who + 1), assets[asset as usize], units(quantity))
                }
                Op::Redeem { who, asset, quantity } => {
                    h.engine.redeem_collateral(account(who + 1), assets[asset as usize], units(quantity))
                }
                Op::Mint { who, amount } => h.engine.mint_debt(account(who + 1), usd(amount)),
                Op::Burn { who, amount } => h.engine.burn_debt(account(who + 1), usd(amount)),
                Op::Liquidate { who, victim, asset, amount } => h
                    .engine
                    .liquidate(account(who + 1), assets[asset as usize], account(victim + 1), usd(amount))
                    .map(|_| ()),
            };

            let mut total_value = Amount::ZERO;
            for asset in assets {
                let deposited = h.engine.total_deposited(asset);
                total_value = total_value
                    .checked_add(h.engine.get_usd_value(asset, deposited).unwrap())
                    .unwrap();
            }
            prop_assert!(total_value >= h.engine.total_debt_minted());
            prop_assert!(h.engine.state.borrow().check_invariants().is_ok());
            for n in 0..3 {
                prop_assert!(h.engine.get_account_information(account(n + 1)).is_ok());
                prop_assert!(h.engine.get_health_factor(account(n + 1)).is_ok());
            }
        }

        let replayed = event::replay(h.engine.export_events().into_iter()).unwrap();
        prop_assert_eq!(replayed, h.engine.state.borrow().clone());
    }
}
