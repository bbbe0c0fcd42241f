// 9.0 config.rs: all settings in one place. compliance windows, trading
// limits, batch economics, pipeline cadence.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// 9.1: timing windows of the compliance engine, all relative to the
// transaction's registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceWindows {
    // Grace period before a crucial error becomes a final verdict
    pub grace_minutes: i64,
    // Wait for slow upstream data (bank record matching) before deciding
    pub delay_minutes: i64,
    // Pending decisions older than this fail with an expired reason
    pub pending_timeout_days: i64,
}

impl Default for ComplianceWindows {
    fn default() -> Self {
        Self {
            grace_minutes: 10,
            delay_minutes: 5,
            pending_timeout_days: 14,
        }
    }
}

// 9.2: trailing-volume caps in the fiat reference currency, gated by KYC tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingLimits {
    // Daily cap for users below the full KYC tier
    pub daily_without_kyc: Decimal,
    // Weekly cap, applied only where a weekly-limit rule is attached
    pub weekly_without_kyc: Decimal,
    // Monthly cap for everyone
    pub monthly_default: Decimal,
    // Yearly cap for users below the full KYC tier
    pub yearly_without_kyc: Decimal,
    // Weekly cap for card purchases below the full KYC tier
    pub card_weekly: Decimal,
    // Wire fees shave the received amount; accept this fraction of an
    // asset's minimum volume
    pub min_volume_tolerance: Decimal,
}

impl Default for TradingLimits {
    fn default() -> Self {
        Self {
            daily_without_kyc: dec!(1_000),
            weekly_without_kyc: dec!(10_000),
            monthly_default: dec!(500_000),
            yearly_without_kyc: dec!(50_000),
            card_weekly: dec!(990),
            min_volume_tolerance: dec!(0.9),
        }
    }
}

// 9.3: batch economics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchLimits {
    // Fraction of available liquidity kept free when sizing a batch
    pub liquidity_buffer: Decimal,
    // Combined estimated fee ceiling, as a share of the batch amount
    pub fee_limit: Decimal,
    // Per-transaction fee ceiling stamped into new fee records
    pub allowed_total_fee_percent: Decimal,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            liquidity_buffer: dec!(0.05),
            fee_limit: dec!(0.001),
            allowed_total_fee_percent: dec!(0.005),
        }
    }
}

// 9.4: pipeline cadence and alerting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    // Seconds between ticks
    pub tick_interval_secs: u64,
    // A stuck tick lock is force-released after this long
    pub lock_timeout_secs: u64,
    // Retries on one transaction before the operators hear about it
    pub retry_warning_threshold: u32,
    // Minimum spacing of repeated operator notifications per correlation key
    pub notification_debounce_minutes: i64,
    // Oldest events kept in the in-memory audit collector
    pub event_capacity: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            lock_timeout_secs: 7200,
            retry_warning_threshold: 3,
            notification_debounce_minutes: 60,
            event_capacity: 10_000,
        }
    }
}

// The complete settlement configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettlementConfig {
    pub compliance: ComplianceWindows,
    pub limits: TradingLimits,
    pub batch: BatchLimits,
    pub pipeline: PipelineSettings,
}

impl SettlementConfig {
    // Preset with tighter limits and more headroom on liquidity
    pub fn conservative() -> Self {
        let mut config = Self::default();
        config.limits.daily_without_kyc = dec!(500);
        config.limits.yearly_without_kyc = dec!(25_000);
        config.batch.liquidity_buffer = dec!(0.1);
        config.batch.fee_limit = dec!(0.0005);
        config.compliance.pending_timeout_days = 7;
        config
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compliance.grace_minutes < 0
            || self.compliance.delay_minutes < 0
            || self.compliance.pending_timeout_days <= 0
        {
            return Err(ConfigError::InvalidWindows {
                reason: "compliance windows must be non-negative".to_string(),
            });
        }
        if self.compliance.delay_minutes > self.compliance.grace_minutes {
            return Err(ConfigError::InvalidWindows {
                reason: "delay window must fit inside the grace period".to_string(),
            });
        }

        if self.limits.daily_without_kyc > self.limits.yearly_without_kyc {
            return Err(ConfigError::InvalidLimits {
                reason: "daily cap exceeds yearly cap".to_string(),
            });
        }
        if self.limits.min_volume_tolerance <= Decimal::ZERO
            || self.limits.min_volume_tolerance > Decimal::ONE
        {
            return Err(ConfigError::InvalidLimits {
                reason: "min volume tolerance must be in (0, 1]".to_string(),
            });
        }

        if self.batch.liquidity_buffer < Decimal::ZERO
            || self.batch.liquidity_buffer >= Decimal::ONE
        {
            return Err(ConfigError::InvalidBatch {
                reason: "liquidity buffer must be in [0, 1)".to_string(),
            });
        }
        if self.batch.fee_limit <= Decimal::ZERO {
            return Err(ConfigError::InvalidBatch {
                reason: "fee limit must be positive".to_string(),
            });
        }

        if self.pipeline.lock_timeout_secs < self.pipeline.tick_interval_secs {
            return Err(ConfigError::InvalidPipeline {
                reason: "lock timeout must cover at least one tick".to_string(),
            });
        }
        if self.pipeline.event_capacity == 0 {
            return Err(ConfigError::InvalidPipeline {
                reason: "event capacity must be positive".to_string(),
            });
        }

        Ok(())
    }
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid compliance windows: {reason}")]
    InvalidWindows { reason: String },

    #[error("invalid trading limits: {reason}")]
    InvalidLimits { reason: String },

    #[error("invalid batch settings: {reason}")]
    InvalidBatch { reason: String },

    #[error("invalid pipeline settings: {reason}")]
    InvalidPipeline { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_valid() {
        assert!(SettlementConfig::default().validate().is_ok());
    }

    #[test]
    fn conservative_config_valid() {
        let config = SettlementConfig::conservative();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch.liquidity_buffer, dec!(0.1));
        assert_eq!(config.compliance.pending_timeout_days, 7);
    }

    #[test]
    fn inverted_limit_caps_rejected() {
        let mut config = SettlementConfig::default();
        config.limits.daily_without_kyc = dec!(100_000);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLimits { .. })
        ));
    }

    #[test]
    fn full_liquidity_buffer_rejected() {
        let mut config = SettlementConfig::default();
        config.batch.liquidity_buffer = dec!(1);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBatch { .. })
        ));
    }

    #[test]
    fn lock_must_outlive_a_tick() {
        let mut config = SettlementConfig::default();
        config.pipeline.lock_timeout_secs = 10;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPipeline { .. })
        ));
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = SettlementConfig::conservative();
        let json = serde_json::to_string(&config).unwrap();
        let back: SettlementConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.limits.daily_without_kyc, config.limits.daily_without_kyc);
        assert_eq!(back.batch.fee_limit, config.batch.fee_limit);
    }
}
