//! The set of accepted collateral assets, fixed at engine construction.

use crate::external::CollateralToken;
use crate::oracle::PriceOracleAdapter;
use crate::state::AssetId;
use crate::ProtocolError;
use std::collections::BTreeMap;
use std::rc::Rc;

/// One accepted collateral asset: its token contract and its price source.
pub struct CollateralAsset {
    pub token: Rc<dyn CollateralToken>,
    pub oracle: PriceOracleAdapter,
}

/// Immutable mapping of asset ids to their collaborators. Registration after
/// construction is not supported; the registry is shared read-only by every
/// component.
pub struct CollateralRegistry {
    assets: BTreeMap<AssetId, CollateralAsset>,
}

impl CollateralRegistry {
    pub fn new(assets: Vec<(AssetId, CollateralAsset)>) -> Result<Self, ProtocolError> {
        let mut map = BTreeMap::new();
        for (id, asset) in assets {
            if map.insert(id, asset).is_some() {
                return Err(ProtocolError::AssetAlreadyRegistered(id));
            }
        }
        Ok(Self { assets: map })
    }

    pub fn get(&self, asset: &AssetId) -> Option<&CollateralAsset> {
        self.assets.get(asset)
    }

    /// Registered asset ids, in stable order.
    pub fn asset_ids(&self) -> Vec<AssetId> {
        self.assets.keys().copied().collect()
    }
}
