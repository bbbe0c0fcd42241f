//! Compliance vocabulary: error codes, verdicts, reasons and the static
//! classification table that maps a code to how it may decide a transaction.
//!
//! A code's class controls the reduction precedence: `Crucial` codes decide
//! alone, a `Single` code decides only when it is the only error, `Multi`
//! codes decide only when every collected error agrees on the verdict. Codes
//! without a classification are informational and only feed the audit comment.

use serde::{Deserialize, Serialize};

use crate::types::KycLevel;

/// Final classification of a transaction by the compliance engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Pending,
    Fail,
    Manual,
}

/// User-facing reason attached to a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    BannedAccount,
    AccountDeactivated,
    KycRejected,
    ManualCheck,
    CountryNotAllowed,
    HighRiskBlocked,
    BankNotAllowed,
    AssetNotAvailable,
    MinDepositNotReached,
    FeeTooHigh,
    AccountHolderMismatch,
    DailyLimit,
    MonthlyLimit,
    AnnualLimit,
    AnnualLimitWithoutKyc,
    WeeklyLimitWithoutKyc,
    InstantPaymentWithoutKyc,
    NameCheckWithoutKyc,
    HighRiskKycNeeded,
    AssetKycNeeded,
    /// Pending verdict aged past the timeout.
    Expired,
}

impl Reason {
    /// Pending transactions with these reasons are re-evaluated every tick;
    /// anything else stays parked until the pending timeout fails it.
    pub fn is_recheckable(&self) -> bool {
        matches!(
            self,
            Reason::DailyLimit
                | Reason::MonthlyLimit
                | Reason::AnnualLimit
                | Reason::AnnualLimitWithoutKyc
                | Reason::WeeklyLimitWithoutKyc
                | Reason::InstantPaymentWithoutKyc
                | Reason::NameCheckWithoutKyc
                | Reason::HighRiskKycNeeded
                | Reason::ManualCheck
        )
    }

    /// KYC level that clears this reason, when one exists. A pending verdict
    /// with such a reason is not re-evaluated until the user reaches it.
    pub fn required_kyc_level(&self) -> Option<KycLevel> {
        match self {
            Reason::DailyLimit
            | Reason::MonthlyLimit
            | Reason::AnnualLimitWithoutKyc
            | Reason::WeeklyLimitWithoutKyc => Some(KycLevel::LEVEL_50),
            Reason::InstantPaymentWithoutKyc
            | Reason::NameCheckWithoutKyc
            | Reason::HighRiskKycNeeded
            | Reason::AssetKycNeeded => Some(KycLevel::LEVEL_30),
            _ => None,
        }
    }
}

/// How a code participates in the verdict reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Crucial,
    Single,
    Multi,
}

/// Numbered compliance rules that can be attached to a wallet, an asset, a
/// sender country or a nationality. Each expands to an error code when its
/// side condition holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmlRuleKind {
    IpCountryMismatch,
    KycLevel30,
    KycLevel50,
    WeeklyLimit,
}

/// One finding of the compliance evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // account state
    UserBlocked,
    UserDeleted,
    AccountBlocked,
    AccountDeactivated,
    KycRejected,
    InvalidKycStatus,
    SuspiciousMail,
    // geography
    CountryNotAllowed,
    IbanCountryNotAllowed,
    HighRiskAssetBlocked,
    // blacklists
    IbanBlacklisted,
    BicBlacklisted,
    CardBlacklisted,
    // per-transaction economics
    MinVolumeNotReached,
    FeeTooHigh,
    AssetNotBuyable,
    AssetNotCardBuyable,
    AssetNotInstantBuyable,
    // source-specific
    BankDeactivated,
    BankDataMissing,
    BankDataUserMismatch,
    CardNameMismatch,
    InstantPaymentWithoutKyc,
    AssetKycLevelNotReached,
    // volume limits
    DailyLimitWithoutKyc,
    NoBankTxVerification,
    NoLetter,
    NoAmlList,
    NoKycFileReference,
    MonthlyLimitReached,
    AnnualLimitReached,
    AnnualLimitWithoutKyc,
    WeeklyLimitWithoutKyc,
    NameCheckWithoutKyc,
    // numbered rules
    RuleIpMismatch,
    RuleKycLevel30,
    RuleKycLevel50,
    RuleWeeklyLimit,
    // informational only
    NameCheckWithBirthday,
    NoCommunication,
}

/// The (class, verdict, reason) triple a code decides with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub class: ErrorClass,
    pub verdict: Verdict,
    pub reason: Reason,
}

impl Classification {
    const fn new(class: ErrorClass, verdict: Verdict, reason: Reason) -> Self {
        Self {
            class,
            verdict,
            reason,
        }
    }
}

impl ErrorCode {
    /// Static code → decision mapping. `None` marks informational codes.
    pub fn classification(&self) -> Option<Classification> {
        use ErrorClass::*;
        use ErrorCode::*;

        let triple = match self {
            UserBlocked => Classification::new(Crucial, Verdict::Fail, Reason::BannedAccount),
            UserDeleted => Classification::new(Crucial, Verdict::Fail, Reason::BannedAccount),
            AccountBlocked => Classification::new(Crucial, Verdict::Fail, Reason::BannedAccount),
            AccountDeactivated => {
                Classification::new(Crucial, Verdict::Fail, Reason::AccountDeactivated)
            }
            KycRejected => Classification::new(Crucial, Verdict::Fail, Reason::KycRejected),
            InvalidKycStatus => Classification::new(Crucial, Verdict::Manual, Reason::ManualCheck),
            SuspiciousMail => Classification::new(Crucial, Verdict::Manual, Reason::ManualCheck),
            CountryNotAllowed => {
                Classification::new(Crucial, Verdict::Fail, Reason::CountryNotAllowed)
            }
            IbanCountryNotAllowed => {
                Classification::new(Crucial, Verdict::Fail, Reason::CountryNotAllowed)
            }
            HighRiskAssetBlocked => {
                Classification::new(Crucial, Verdict::Fail, Reason::HighRiskBlocked)
            }
            IbanBlacklisted => Classification::new(Crucial, Verdict::Fail, Reason::BannedAccount),
            BicBlacklisted => Classification::new(Crucial, Verdict::Fail, Reason::BannedAccount),
            CardBlacklisted => Classification::new(Crucial, Verdict::Fail, Reason::BannedAccount),

            MinVolumeNotReached => {
                Classification::new(Single, Verdict::Fail, Reason::MinDepositNotReached)
            }
            FeeTooHigh => Classification::new(Single, Verdict::Fail, Reason::FeeTooHigh),
            AssetNotBuyable => Classification::new(Single, Verdict::Fail, Reason::AssetNotAvailable),
            AssetNotCardBuyable => {
                Classification::new(Single, Verdict::Fail, Reason::AssetNotAvailable)
            }
            AssetNotInstantBuyable => {
                Classification::new(Single, Verdict::Fail, Reason::AssetNotAvailable)
            }
            BankDeactivated => Classification::new(Single, Verdict::Fail, Reason::BankNotAllowed),
            BankDataMissing => Classification::new(Single, Verdict::Pending, Reason::ManualCheck),
            BankDataUserMismatch => {
                Classification::new(Single, Verdict::Manual, Reason::AccountHolderMismatch)
            }
            CardNameMismatch => {
                Classification::new(Single, Verdict::Manual, Reason::AccountHolderMismatch)
            }
            InstantPaymentWithoutKyc => {
                Classification::new(Single, Verdict::Pending, Reason::InstantPaymentWithoutKyc)
            }
            AssetKycLevelNotReached => {
                Classification::new(Single, Verdict::Pending, Reason::AssetKycNeeded)
            }
            RuleIpMismatch => Classification::new(Single, Verdict::Manual, Reason::ManualCheck),

            DailyLimitWithoutKyc => {
                Classification::new(Multi, Verdict::Pending, Reason::DailyLimit)
            }
            NoBankTxVerification => {
                Classification::new(Multi, Verdict::Pending, Reason::DailyLimit)
            }
            NoLetter => Classification::new(Multi, Verdict::Pending, Reason::DailyLimit),
            NoAmlList => Classification::new(Multi, Verdict::Pending, Reason::DailyLimit),
            NoKycFileReference => Classification::new(Multi, Verdict::Pending, Reason::DailyLimit),
            MonthlyLimitReached => Classification::new(Multi, Verdict::Pending, Reason::MonthlyLimit),
            AnnualLimitReached => Classification::new(Multi, Verdict::Pending, Reason::AnnualLimit),
            AnnualLimitWithoutKyc => {
                Classification::new(Multi, Verdict::Pending, Reason::AnnualLimitWithoutKyc)
            }
            WeeklyLimitWithoutKyc => {
                Classification::new(Multi, Verdict::Pending, Reason::WeeklyLimitWithoutKyc)
            }
            NameCheckWithoutKyc => {
                Classification::new(Multi, Verdict::Pending, Reason::NameCheckWithoutKyc)
            }
            RuleKycLevel30 => Classification::new(Multi, Verdict::Pending, Reason::HighRiskKycNeeded),
            RuleKycLevel50 => Classification::new(Multi, Verdict::Pending, Reason::HighRiskKycNeeded),
            RuleWeeklyLimit => {
                Classification::new(Multi, Verdict::Pending, Reason::WeeklyLimitWithoutKyc)
            }

            NameCheckWithBirthday | NoCommunication => return None,
        };
        Some(triple)
    }

    /// Codes that wait out the upstream-data delay window before deciding
    /// (e.g. a bank verification submitted seconds before the pay-in).
    pub fn is_delayed(&self) -> bool {
        matches!(self, ErrorCode::BankDataMissing)
    }

    /// Stable label used in audit comments.
    pub fn label(&self) -> &'static str {
        use ErrorCode::*;
        match self {
            UserBlocked => "user_blocked",
            UserDeleted => "user_deleted",
            AccountBlocked => "account_blocked",
            AccountDeactivated => "account_deactivated",
            KycRejected => "kyc_rejected",
            InvalidKycStatus => "invalid_kyc_status",
            SuspiciousMail => "suspicious_mail",
            CountryNotAllowed => "country_not_allowed",
            IbanCountryNotAllowed => "iban_country_not_allowed",
            HighRiskAssetBlocked => "high_risk_asset_blocked",
            IbanBlacklisted => "iban_blacklisted",
            BicBlacklisted => "bic_blacklisted",
            CardBlacklisted => "card_blacklisted",
            MinVolumeNotReached => "min_volume_not_reached",
            FeeTooHigh => "fee_too_high",
            AssetNotBuyable => "asset_not_buyable",
            AssetNotCardBuyable => "asset_not_card_buyable",
            AssetNotInstantBuyable => "asset_not_instant_buyable",
            BankDeactivated => "bank_deactivated",
            BankDataMissing => "bank_data_missing",
            BankDataUserMismatch => "bank_data_user_mismatch",
            CardNameMismatch => "card_name_mismatch",
            InstantPaymentWithoutKyc => "instant_payment_without_kyc",
            AssetKycLevelNotReached => "asset_kyc_level_not_reached",
            DailyLimitWithoutKyc => "daily_limit_without_kyc",
            NoBankTxVerification => "no_bank_tx_verification",
            NoLetter => "no_letter",
            NoAmlList => "no_aml_list",
            NoKycFileReference => "no_kyc_file_reference",
            MonthlyLimitReached => "monthly_limit_reached",
            AnnualLimitReached => "annual_limit_reached",
            AnnualLimitWithoutKyc => "annual_limit_without_kyc",
            WeeklyLimitWithoutKyc => "weekly_limit_without_kyc",
            NameCheckWithoutKyc => "name_check_without_kyc",
            RuleIpMismatch => "rule_ip_mismatch",
            RuleKycLevel30 => "rule_kyc_level_30",
            RuleKycLevel50 => "rule_kyc_level_50",
            RuleWeeklyLimit => "rule_weekly_limit",
            NameCheckWithBirthday => "name_check_with_birthday",
            NoCommunication => "no_communication",
        }
    }
}
