//! Asset metadata and registry.
//!
//! Every payout asset the desk supports is registered here with the flags the
//! compliance engine and the batching stage consume. The registry also knows
//! which asset prices a blockchain's tokens (the batch reference asset).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::aml::AmlRuleKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Blockchain {
    Bitcoin,
    Lightning,
    Ethereum,
    Arbitrum,
    Polygon,
}

impl Blockchain {
    pub fn name(&self) -> &'static str {
        match self {
            Blockchain::Bitcoin => "Bitcoin",
            Blockchain::Lightning => "Lightning",
            Blockchain::Ethereum => "Ethereum",
            Blockchain::Arbitrum => "Arbitrum",
            Blockchain::Polygon => "Polygon",
        }
    }
}

/// Coins are priced directly against fiat; tokens settle through the chain's
/// reference asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetCategory {
    Coin,
    Token,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    /// Symbol as quoted by pricing and liquidity venues (e.g. "BTC").
    pub name: String,
    pub blockchain: Blockchain,
    pub category: AssetCategory,
    pub buyable: bool,
    pub card_buyable: bool,
    pub instant_buyable: bool,
    /// Privacy coins and similar assets that need a KYC floor.
    pub high_risk: bool,
    /// Minimum purchase volume in the fiat reference currency.
    pub min_volume: Decimal,
    /// Extra compliance rules attached to this asset.
    pub aml_rules: Vec<AmlRuleKind>,
}

impl Asset {
    pub fn new(id: AssetId, name: &str, blockchain: Blockchain, category: AssetCategory) -> Self {
        Self {
            id,
            name: name.to_string(),
            blockchain,
            category,
            buyable: true,
            card_buyable: true,
            instant_buyable: true,
            high_risk: false,
            min_volume: Decimal::ONE,
            aml_rules: Vec::new(),
        }
    }

    pub fn with_buyable(mut self, buyable: bool) -> Self {
        self.buyable = buyable;
        self
    }

    pub fn with_card_buyable(mut self, card_buyable: bool) -> Self {
        self.card_buyable = card_buyable;
        self
    }

    pub fn with_instant_buyable(mut self, instant_buyable: bool) -> Self {
        self.instant_buyable = instant_buyable;
        self
    }

    pub fn with_high_risk(mut self) -> Self {
        self.high_risk = true;
        self
    }

    pub fn with_min_volume(mut self, min_volume: Decimal) -> Self {
        self.min_volume = min_volume;
        self
    }

    pub fn with_aml_rule(mut self, rule: AmlRuleKind) -> Self {
        self.aml_rules.push(rule);
        self
    }
}

/// Registry of payout assets, keyed both by id and by the
/// (name, blockchain, category) triple used during pair resolution.
#[derive(Debug, Default)]
pub struct AssetRegistry {
    assets: HashMap<AssetId, Asset>,
    by_key: HashMap<(String, Blockchain, AssetCategory), AssetId>,
    // reference asset used to price a chain's tokens
    references: HashMap<Blockchain, AssetId>,
    next_id: u32,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self {
            assets: HashMap::new(),
            by_key: HashMap::new(),
            references: HashMap::new(),
            next_id: 1,
        }
    }

    /// Register an asset built by `build` from its fresh id. Returns the id.
    pub fn add(&mut self, build: impl FnOnce(AssetId) -> Asset) -> AssetId {
        let id = AssetId(self.next_id);
        self.next_id += 1;
        let asset = build(id);
        self.by_key.insert(
            (asset.name.clone(), asset.blockchain, asset.category),
            id,
        );
        self.assets.insert(id, asset);
        id
    }

    pub fn get(&self, id: AssetId) -> Option<&Asset> {
        self.assets.get(&id)
    }

    pub fn find(
        &self,
        name: &str,
        blockchain: Blockchain,
        category: AssetCategory,
    ) -> Option<&Asset> {
        self.by_key
            .get(&(name.to_string(), blockchain, category))
            .and_then(|id| self.assets.get(id))
    }

    pub fn set_reference(&mut self, blockchain: Blockchain, id: AssetId) {
        self.references.insert(blockchain, id);
    }

    /// The asset a purchase of `output` is priced and secured in: coins price
    /// directly, tokens fall back to the chain's configured reference asset.
    pub fn price_reference(&self, output: &Asset) -> Option<AssetId> {
        match output.category {
            AssetCategory::Coin => Some(output.id),
            AssetCategory::Token => self.references.get(&output.blockchain).copied(),
        }
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}
