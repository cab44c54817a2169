//! Mock collaborators and harness builders for tests.
//! Only available in test builds (or behind the `test_endpoints` feature).

use crate::external::{CollateralToken, DebtToken, TimeSource};
use crate::numeric::{Amount, Quantity, SCALE};
use crate::oracle::{PriceFeed, PriceOracleAdapter, PriceQuote};
use crate::registry::{CollateralAsset, CollateralRegistry};
use crate::state::{AccountId, AssetId};
use crate::{Engine, EngineConfig};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

pub const START_TIME: u64 = 1_700_000_000;

pub fn account(n: u8) -> AccountId {
    AccountId::new([n; 32])
}

pub fn asset(n: u8) -> AssetId {
    AssetId::new([n; 32])
}

pub fn custody() -> AccountId {
    account(0xEE)
}

/// `n` whole collateral units at working precision.
pub fn units(n: u128) -> Quantity {
    Quantity::new(n * SCALE)
}

/// `n` whole unit-of-account units at working precision.
pub fn usd(n: u128) -> Amount {
    Amount::new(n * SCALE)
}

/// `dollars` as an 8-decimal feed quote.
pub fn price_e8(dollars: i128) -> i128 {
    dollars * 100_000_000
}

pub struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.set(now);
    }

    pub fn advance(&self, secs: u64) {
        self.now.set(self.now.get() + secs);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> u64 {
        self.now.get()
    }
}

pub struct MockPriceFeed {
    price: Cell<i128>,
    updated_at: Cell<u64>,
    round_id: Cell<u64>,
    broken: Cell<bool>,
}

impl MockPriceFeed {
    pub fn new(price: i128, updated_at: u64) -> Self {
        Self {
            price: Cell::new(price),
            updated_at: Cell::new(updated_at),
            round_id: Cell::new(1),
            broken: Cell::new(false),
        }
    }

    /// Publish a new round.
    pub fn set_price(&self, price: i128, updated_at: u64) {
        self.price.set(price);
        self.updated_at.set(updated_at);
        self.round_id.set(self.round_id.get() + 1);
    }

    pub fn set_broken(&self, broken: bool) {
        self.broken.set(broken);
    }
}

impl PriceFeed for MockPriceFeed {
    fn latest_round_data(&self) -> Result<PriceQuote, String> {
        if self.broken.get() {
            return Err("feed offline".to_string());
        }
        Ok(PriceQuote {
            round_id: self.round_id.get(),
            price: self.price.get(),
            started_at: self.updated_at.get(),
            updated_at: self.updated_at.get(),
            answered_in_round: self.round_id.get(),
        })
    }
}

pub struct MockCollateralToken {
    custody: AccountId,
    balances: RefCell<BTreeMap<AccountId, Quantity>>,
    fail_transfers: Cell<bool>,
}

impl MockCollateralToken {
    pub fn new(custody: AccountId) -> Self {
        Self {
            custody,
            balances: RefCell::new(BTreeMap::new()),
            fail_transfers: Cell::new(false),
        }
    }

    pub fn set_balance(&self, holder: AccountId, quantity: Quantity) {
        self.balances.borrow_mut().insert(holder, quantity);
    }

    pub fn balance_of(&self, holder: AccountId) -> Quantity {
        self.balances
            .borrow()
            .get(&holder)
            .copied()
            .unwrap_or(Quantity::ZERO)
    }

    pub fn set_fail_transfers(&self, fail: bool) {
        self.fail_transfers.set(fail);
    }

    fn do_transfer(&self, from: AccountId, to: AccountId, quantity: Quantity) -> bool {
        if self.fail_transfers.get() {
            return false;
        }
        let mut balances = self.balances.borrow_mut();
        let from_balance = balances.get(&from).copied().unwrap_or(Quantity::ZERO);
        let Some(new_from) = from_balance.checked_sub(quantity) else {
            return false;
        };
        balances.insert(from, new_from);
        let to_balance = balances.get(&to).copied().unwrap_or(Quantity::ZERO);
        match to_balance.checked_add(quantity) {
            Some(new_to) => {
                balances.insert(to, new_to);
                true
            }
            None => false,
        }
    }
}

impl CollateralToken for MockCollateralToken {
    fn transfer_from(&self, from: AccountId, to: AccountId, quantity: Quantity) -> bool {
        self.do_transfer(from, to, quantity)
    }

    fn transfer(&self, to: AccountId, quantity: Quantity) -> bool {
        self.do_transfer(self.custody, to, quantity)
    }
}

pub struct MockDebtToken {
    custody: AccountId,
    balances: RefCell<BTreeMap<AccountId, Amount>>,
    total_supply: Cell<u128>,
    fail_mint: Cell<bool>,
    fail_transfers: Cell<bool>,
}

impl MockDebtToken {
    pub fn new(custody: AccountId) -> Self {
        Self {
            custody,
            balances: RefCell::new(BTreeMap::new()),
            total_supply: Cell::new(0),
            fail_mint: Cell::new(false),
            fail_transfers: Cell::new(false),
        }
    }

    pub fn balance_of(&self, holder: AccountId) -> Amount {
        self.balances
            .borrow()
            .get(&holder)
            .copied()
            .unwrap_or(Amount::ZERO)
    }

    pub fn set_balance(&self, holder: AccountId, amount: Amount) {
        self.balances.borrow_mut().insert(holder, amount);
    }

    pub fn total_supply(&self) -> u128 {
        self.total_supply.get()
    }

    pub fn set_fail_mint(&self, fail: bool) {
        self.fail_mint.set(fail);
    }

    pub fn set_fail_transfers(&self, fail: bool) {
        self.fail_transfers.set(fail);
    }
}

impl DebtToken for MockDebtToken {
    fn mint(&self, to: AccountId, amount: Amount) -> bool {
        if self.fail_mint.get() {
            return false;
        }
        let mut balances = self.balances.borrow_mut();
        let balance = balances.get(&to).copied().unwrap_or(Amount::ZERO);
        let Some(new_balance) = balance.checked_add(amount) else {
            return false;
        };
        balances.insert(to, new_balance);
        self.total_supply
            .set(self.total_supply.get().saturating_add(amount.to_u128()));
        true
    }

    fn transfer_from(&self, from: AccountId, to: AccountId, amount: Amount) -> bool {
        if self.fail_transfers.get() {
            return false;
        }
        let mut balances = self.balances.borrow_mut();
        let from_balance = balances.get(&from).copied().unwrap_or(Amount::ZERO);
        let Some(new_from) = from_balance.checked_sub(amount) else {
            return false;
        };
        balances.insert(from, new_from);
        let to_balance = balances.get(&to).copied().unwrap_or(Amount::ZERO);
        match to_balance.checked_add(amount) {
            Some(new_to) => {
                balances.insert(to, new_to);
                true
            }
            None => false,
        }
    }

    fn burn(&self, amount: Amount) {
        let mut balances = self.balances.borrow_mut();
        let balance = balances.get(&self.custody).copied().unwrap_or(Amount::ZERO);
        balances.insert(
            self.custody,
            balance.checked_sub(amount).unwrap_or(Amount::ZERO),
        );
        self.total_supply
            .set(self.total_supply.get().saturating_sub(amount.to_u128()));
    }
}

pub struct TestHarness {
    pub engine: Rc<Engine>,
    pub clock: Rc<ManualClock>,
    pub debt_token: Rc<MockDebtToken>,
    pub tokens: BTreeMap<AssetId, Rc<MockCollateralToken>>,
    pub feeds: BTreeMap<AssetId, Rc<MockPriceFeed>>,
}

impl TestHarness {
    pub fn token(&self, asset: AssetId) -> &Rc<MockCollateralToken> {
        &self.tokens[&asset]
    }

    pub fn feed(&self, asset: AssetId) -> &Rc<MockPriceFeed> {
        &self.feeds[&asset]
    }

    /// Put `quantity` of `asset` into `holder`'s wallet.
    pub fn fund(&self, holder: AccountId, asset: AssetId, quantity: Quantity) {
        self.token(asset).set_balance(holder, quantity);
    }
}

/// Engine wired to mocks: one `(asset, dollar price)` pair per entry, all
/// feeds 8-decimal and fresh at [`START_TIME`].
pub fn harness_with(config: EngineConfig, assets: &[(AssetId, i128)]) -> TestHarness {
    let clock = Rc::new(ManualClock::new(START_TIME));
    let debt_token = Rc::new(MockDebtToken::new(custody()));
    let mut tokens = BTreeMap::new();
    let mut feeds = BTreeMap::new();
    let mut entries = Vec::new();
    for (id, dollars) in assets {
        let token = Rc::new(MockCollateralToken::new(custody()));
        let feed = Rc::new(MockPriceFeed::new(price_e8(*dollars), START_TIME));
        entries.push((
            *id,
            CollateralAsset {
                token: token.clone() as Rc<dyn CollateralToken>,
                oracle: PriceOracleAdapter::new(feed.clone() as Rc<dyn PriceFeed>, 8),
            },
        ));
        tokens.insert(*id, token);
        feeds.insert(*id, feed);
    }
    let registry = CollateralRegistry::new(entries).expect("no duplicate test assets");
    let engine = Rc::new(
        Engine::new(
            config,
            registry,
            debt_token.clone() as Rc<dyn DebtToken>,
            clock.clone() as Rc<dyn TimeSource>,
            custody(),
        )
        .expect("test config is valid"),
    );
    TestHarness {
        engine,
        clock,
        debt_token,
        tokens,
        feeds,
    }
}

/// Default-config harness with one $2000 asset (`asset(1)`).
pub fn single_asset_harness() -> (TestHarness, AssetId) {
    let a = asset(1);
    (harness_with(EngineConfig::default(), &[(a, 2_000)]), a)
}

/// Default-config harness with a $2000 asset and a $1000 asset.
pub fn dual_asset_harness() -> (TestHarness, AssetId, AssetId) {
    let a = asset(1);
    let b = asset(2);
    (
        harness_with(EngineConfig::default(), &[(a, 2_000), (b, 1_000)]),
        a,
        b,
    )
}
