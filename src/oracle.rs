//! Price-oracle adapter: staleness-guarded, precision-normalizing reads.
//!
//! Every valuation re-reads the feed; there is no cache and no retry. A read
//! older than the configured staleness timeout is a hard stop — the engine
//! prefers to freeze rather than operate on unverifiable collateral values.

use crate::numeric::Price;
use crate::state::AssetId;
use crate::ProtocolError;
use std::rc::Rc;
use std::time::Duration;

/// One raw round of price data as reported by the feed.
/// Transient: re-fetched on every valuation, never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PriceQuote {
    pub round_id: u64,
    /// Unit-of-account per whole collateral unit, at the feed's own
    /// decimal precision. Signed, as feeds report it.
    pub price: i128,
    pub started_at: u64,
    pub updated_at: u64,
    pub answered_in_round: u64,
}

/// The external price-feed collaborator.
pub trait PriceFeed {
    fn latest_round_data(&self) -> Result<PriceQuote, String>;
}

/// Wraps a raw feed with the checks the safety model depends on:
/// freshness, a positive price, and normalization to the ledger's
/// [`SCALE`](crate::numeric::SCALE) precision.
pub struct PriceOracleAdapter {
    feed: Rc<dyn PriceFeed>,
    /// Decimal precision of the feed's `price` field (e.g. 8 for a
    /// $2000.00000000 quote of `200_000_000_000`).
    feed_decimals: u8,
}

impl PriceOracleAdapter {
    pub fn new(feed: Rc<dyn PriceFeed>, feed_decimals: u8) -> Self {
        Self {
            feed,
            feed_decimals,
        }
    }

    /// Read the current price for `asset`, failing on an unreachable feed,
    /// a quote older than `staleness_timeout`, or a non-positive price.
    pub fn read_price(
        &self,
        asset: AssetId,
        now: u64,
        staleness_timeout: Duration,
    ) -> Result<Price, ProtocolError> {
        let quote = self
            .feed
            .latest_round_data()
            .map_err(ProtocolError::PriceFeedUnavailable)?;

        let age_secs = now.saturating_sub(quote.updated_at);
        if age_secs > staleness_timeout.as_secs() {
            log::debug!(
                "[read_price] stale quote for {asset}: updated {age_secs}s ago (round {})",
                quote.round_id
            );
            return Err(ProtocolError::StalePrice { asset, age_secs });
        }

        if quote.price <= 0 {
            return Err(ProtocolError::NonPositivePrice {
                asset,
                price: quote.price,
            });
        }
        let raw = quote.price as u128;

        let normalized = if u32::from(self.feed_decimals) <= 18 {
            let factor = 10u128
                .checked_pow(18 - u32::from(self.feed_decimals))
                .ok_or(ProtocolError::ArithmeticOverflow)?;
            raw.checked_mul(factor)
                .ok_or(ProtocolError::ArithmeticOverflow)?
        } else {
            let factor = 10u128
                .checked_pow(u32::from(self.feed_decimals) - 18)
                .ok_or(ProtocolError::ArithmeticOverflow)?;
            raw / factor
        };

        Ok(Price::new(normalized))
    }
}
