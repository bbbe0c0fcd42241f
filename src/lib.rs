// settlement-core: fiat-to-crypto purchase settlement engine.
// compliance-first architecture: every pay-in clears the AML gate before it
// is priced, batched and paid out; all amount math is exact to the satoshi.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: ids, KycLevel, Timestamp, amount rounding
//   2.x  compliance.rs: AML evaluation and verdict reduction
//   3.x  aml.rs: compliance vocabulary: codes, verdicts, classification
//   3.5  asset.rs: asset metadata and registry
//   4.x  fees.rs: proportional allocation with exact residual correction
//   5.x  pricing.rs: price retrieval boundary (mocked)
//   6.x  transaction.rs: the purchase instruction and its state machine
//   7.x  batch.rs: settlement batch, liquidity optimization, securing
//   8.x  liquidity.rs: dex boundary (mocked)
//   8.5  payout.rs: blockchain payout boundary (mocked)
//   8.7  notification.rs: operator alerts and user mails
//   9.x  config.rs: compliance windows, limits, batch economics, presets
//   10.x store.rs: in-memory system of record, open-batch claim
//   11.x events.rs: state transition events for audit
//   12.x pipeline/: the scheduled settlement pipeline, stage by stage

// pure engines
pub mod aml;
pub mod compliance;
pub mod fees;

// domain entities
pub mod asset;
pub mod batch;
pub mod transaction;
pub mod types;

// external boundaries (mocked in-memory)
pub mod liquidity;
pub mod notification;
pub mod payout;
pub mod pricing;

// orchestration
pub mod config;
pub mod events;
pub mod pipeline;
pub mod store;

// re exports for convenience
pub use aml::*;
pub use asset::*;
pub use batch::*;
pub use compliance::*;
pub use events::*;
pub use fees::*;
pub use transaction::*;
pub use types::*;
pub use config::{BatchLimits, ComplianceWindows, ConfigError, PipelineSettings, SettlementConfig, TradingLimits};
pub use liquidity::{
    FeeEstimate, LiquidityCheck, LiquidityError, LiquidityProvider, LiquidityRequest, MemoryDex,
    OrderResult,
};
pub use notification::{MemorySink, Notification, NotificationKind, NotificationSink};
pub use payout::{MemoryPayout, PayoutCompletion, PayoutError, PayoutProvider, PayoutRequest};
pub use pipeline::{PipelineError, SettlementPipeline, TickReport};
pub use pricing::{FixedRatePricing, Price, PriceStep, PricingError, PricingProvider};
pub use store::{PayIn, SettlementStore, StoreError};
