// 2.0: the compliance decision engine. evaluate() runs every applicable check and
// collects error codes without short-circuiting; reduce() folds the codes plus the
// prior decision into one outcome. both are pure functions of their inputs so a
// re-run with unchanged context and elapsed time gives the same answer.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::aml::{AmlRuleKind, Classification, ErrorClass, ErrorCode, Reason, Verdict};
use crate::asset::Asset;
use crate::config::{ComplianceWindows, TradingLimits};
use crate::transaction::{SourceKind, Transaction};
use crate::types::{KycLevel, Timestamp};

// 2.1: per-transaction context. assembled by the caller from user, bank and
// volume records; the engine never loads anything itself.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Blocked,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Blocked,
    Deactivated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycStatus {
    Na,
    InProgress,
    Completed,
    Rejected,
}

/// State of the account-ownership verification for the paying bank account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BankDataState {
    Verified,
    Missing,
    Mismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlacklistKind {
    Iban,
    Bic,
    CardFingerprint,
    Mail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub kind: BlacklistKind,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryInfo {
    pub code: String,
    pub allowed: bool,
    pub fatf_high_risk: bool,
}

impl CountryInfo {
    pub fn allowed(code: &str) -> Self {
        Self {
            code: code.to_string(),
            allowed: true,
            fatf_high_risk: false,
        }
    }
}

/// Trailing purchase volume sums in the fiat reference currency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeWindows {
    pub day: Decimal,
    pub week: Decimal,
    pub month: Decimal,
    pub year: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceContext {
    pub kyc_level: KycLevel,
    pub user_status: UserStatus,
    pub account_status: AccountStatus,
    pub kyc_status: KycStatus,
    pub verified_name: Option<String>,
    pub verified_country: Option<CountryInfo>,
    pub ip_country: Option<String>,
    pub mail: Option<String>,
    pub volume: VolumeWindows,
    /// Personal yearly deposit cap, independent of the KYC-gated defaults.
    pub annual_deposit_limit: Decimal,
    pub bank_tx_verified: bool,
    pub letter_sent: bool,
    pub aml_listed: bool,
    pub kyc_file_reference: bool,
    pub name_check_hit: bool,
    pub name_check_birthday_match: bool,
    /// Country of the sender IBAN, for bank pay-ins.
    pub iban_country: Option<CountryInfo>,
    pub bank_active: bool,
    pub bank_data: BankDataState,
    pub blacklist: Vec<BlacklistEntry>,
    pub wallet_rules: Vec<AmlRuleKind>,
    pub nationality_rules: Vec<AmlRuleKind>,
    pub iban_country_rules: Vec<AmlRuleKind>,
    pub input_asset_rules: Vec<AmlRuleKind>,
}

impl ComplianceContext {
    /// A fully verified user with no history. Tests and the sim start here
    /// and knock individual fields over.
    pub fn approved(kyc_level: KycLevel) -> Self {
        Self {
            kyc_level,
            user_status: UserStatus::Active,
            account_status: AccountStatus::Active,
            kyc_status: KycStatus::Completed,
            verified_name: Some("Max Muster".to_string()),
            verified_country: Some(CountryInfo::allowed("CH")),
            ip_country: Some("CH".to_string()),
            mail: Some("user@example.com".to_string()),
            volume: VolumeWindows::default(),
            annual_deposit_limit: dec!(1_000_000),
            bank_tx_verified: true,
            letter_sent: true,
            aml_listed: true,
            kyc_file_reference: true,
            name_check_hit: false,
            name_check_birthday_match: false,
            iban_country: Some(CountryInfo::allowed("CH")),
            bank_active: true,
            bank_data: BankDataState::Verified,
            blacklist: Vec::new(),
            wallet_rules: Vec::new(),
            nationality_rules: Vec::new(),
            iban_country_rules: Vec::new(),
            input_asset_rules: Vec::new(),
        }
    }

    pub fn with_volume(mut self, volume: VolumeWindows) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_blacklist_entry(mut self, kind: BlacklistKind, value: &str) -> Self {
        self.blacklist.push(BlacklistEntry {
            kind,
            value: value.to_string(),
        });
        self
    }

    pub fn with_wallet_rule(mut self, rule: AmlRuleKind) -> Self {
        self.wallet_rules.push(rule);
        self
    }

    fn is_blacklisted(&self, kind: BlacklistKind, value: &str) -> bool {
        self.blacklist
            .iter()
            .any(|entry| entry.kind == kind && entry.value.eq_ignore_ascii_case(value))
    }
}

// 2.2: evaluation. every check runs; a check either appends its code or not.

pub fn evaluate(
    tx: &Transaction,
    output_asset: &Asset,
    ctx: &ComplianceContext,
    limits: &TradingLimits,
) -> Vec<ErrorCode> {
    let mut errors = Vec::new();
    let amount = tx.input_reference_amount;
    let kyc = ctx.kyc_level;

    // volume floor, with tolerance for bank fees shaving the wire amount
    if amount < output_asset.min_volume * limits.min_volume_tolerance {
        errors.push(ErrorCode::MinVolumeNotReached);
    }

    match ctx.user_status {
        UserStatus::Blocked => errors.push(ErrorCode::UserBlocked),
        UserStatus::Deleted => errors.push(ErrorCode::UserDeleted),
        UserStatus::Active => {}
    }
    match ctx.account_status {
        AccountStatus::Blocked => errors.push(ErrorCode::AccountBlocked),
        AccountStatus::Deactivated => errors.push(ErrorCode::AccountDeactivated),
        AccountStatus::Active => {}
    }
    if ctx.kyc_status == KycStatus::Rejected {
        errors.push(ErrorCode::KycRejected);
    }
    // a level without a completed KYC record is a data inconsistency
    if kyc >= KycLevel::LEVEL_30 && ctx.kyc_status != KycStatus::Completed {
        errors.push(ErrorCode::InvalidKycStatus);
    }

    match &ctx.mail {
        Some(mail) => {
            if ctx.is_blacklisted(BlacklistKind::Mail, mail) {
                errors.push(ErrorCode::SuspiciousMail);
            }
        }
        None => errors.push(ErrorCode::NoCommunication),
    }

    if ctx.name_check_hit {
        if ctx.name_check_birthday_match {
            errors.push(ErrorCode::NameCheckWithBirthday);
        } else if kyc < KycLevel::LEVEL_30 {
            errors.push(ErrorCode::NameCheckWithoutKyc);
        }
    }

    if let Some(country) = &ctx.verified_country {
        if !country.allowed {
            errors.push(ErrorCode::CountryNotAllowed);
        }
        if country.fatf_high_risk && output_asset.high_risk {
            errors.push(ErrorCode::HighRiskAssetBlocked);
        }
    }

    // KYC-gated trailing volume limits
    if kyc < KycLevel::LEVEL_50 {
        if amount + ctx.volume.day > limits.daily_without_kyc {
            errors.push(ErrorCode::DailyLimitWithoutKyc);
            if !ctx.bank_tx_verified {
                errors.push(ErrorCode::NoBankTxVerification);
            }
            if !ctx.letter_sent {
                errors.push(ErrorCode::NoLetter);
            }
            if !ctx.aml_listed {
                errors.push(ErrorCode::NoAmlList);
            }
            if !ctx.kyc_file_reference {
                errors.push(ErrorCode::NoKycFileReference);
            }
        }
        if amount + ctx.volume.year > limits.yearly_without_kyc {
            errors.push(ErrorCode::AnnualLimitWithoutKyc);
        }
    }
    if amount + ctx.volume.month > limits.monthly_default {
        errors.push(ErrorCode::MonthlyLimitReached);
    }
    if amount + ctx.volume.year > ctx.annual_deposit_limit {
        errors.push(ErrorCode::AnnualLimitReached);
    }

    if !output_asset.buyable {
        errors.push(ErrorCode::AssetNotBuyable);
    }

    for rule in merged_rules(ctx, output_asset) {
        match rule {
            AmlRuleKind::IpCountryMismatch => {
                let matches = match (&ctx.ip_country, &ctx.verified_country) {
                    (Some(ip), Some(country)) => ip.eq_ignore_ascii_case(&country.code),
                    _ => false,
                };
                if !matches {
                    errors.push(ErrorCode::RuleIpMismatch);
                }
            }
            AmlRuleKind::KycLevel30 => {
                if kyc < KycLevel::LEVEL_30 {
                    errors.push(ErrorCode::RuleKycLevel30);
                }
            }
            AmlRuleKind::KycLevel50 => {
                if kyc < KycLevel::LEVEL_50 {
                    errors.push(ErrorCode::RuleKycLevel50);
                }
            }
            AmlRuleKind::WeeklyLimit => {
                if kyc < KycLevel::LEVEL_50 && amount + ctx.volume.week > limits.weekly_without_kyc
                {
                    errors.push(ErrorCode::RuleWeeklyLimit);
                }
            }
        }
    }

    match &tx.source {
        SourceKind::BankTransfer {
            iban, bic, instant, ..
        } => {
            if ctx.is_blacklisted(BlacklistKind::Iban, iban) {
                errors.push(ErrorCode::IbanBlacklisted);
            }
            if let Some(bic) = bic {
                if ctx.is_blacklisted(BlacklistKind::Bic, bic) {
                    errors.push(ErrorCode::BicBlacklisted);
                }
            }
            if *instant {
                if !output_asset.instant_buyable {
                    errors.push(ErrorCode::AssetNotInstantBuyable);
                }
                if kyc < KycLevel::LEVEL_30 {
                    errors.push(ErrorCode::InstantPaymentWithoutKyc);
                }
            }
            if !ctx.bank_active {
                errors.push(ErrorCode::BankDeactivated);
            }
            match ctx.bank_data {
                BankDataState::Missing => errors.push(ErrorCode::BankDataMissing),
                BankDataState::Mismatch => errors.push(ErrorCode::BankDataUserMismatch),
                BankDataState::Verified => {}
            }
            if let Some(country) = &ctx.iban_country {
                if !country.allowed {
                    errors.push(ErrorCode::IbanCountryNotAllowed);
                }
            }
        }
        SourceKind::CardCharge {
            fingerprint,
            holder_name,
            ..
        } => {
            if !output_asset.card_buyable {
                errors.push(ErrorCode::AssetNotCardBuyable);
            }
            if ctx.is_blacklisted(BlacklistKind::CardFingerprint, fingerprint) {
                errors.push(ErrorCode::CardBlacklisted);
            }
            if let Some(verified) = &ctx.verified_name {
                if !holder_name.trim().eq_ignore_ascii_case(verified.trim()) {
                    errors.push(ErrorCode::CardNameMismatch);
                }
            }
            if kyc < KycLevel::LEVEL_50 && amount + ctx.volume.week > limits.card_weekly {
                errors.push(ErrorCode::WeeklyLimitWithoutKyc);
            }
        }
        SourceKind::CryptoInput {
            high_risk_input, ..
        } => {
            if *high_risk_input && kyc < KycLevel::LEVEL_30 {
                errors.push(ErrorCode::AssetKycLevelNotReached);
            }
        }
    }

    errors
}

// every rule source contributes once, first occurrence wins the order
fn merged_rules(ctx: &ComplianceContext, output_asset: &Asset) -> Vec<AmlRuleKind> {
    let mut rules = Vec::new();
    for rule in ctx
        .wallet_rules
        .iter()
        .chain(ctx.input_asset_rules.iter())
        .chain(output_asset.aml_rules.iter())
        .chain(ctx.iban_country_rules.iter())
        .chain(ctx.nationality_rules.iter())
    {
        if !rules.contains(rule) {
            rules.push(*rule);
        }
    }
    rules
}

/// Deduplicated audit comment for a code list, declaration order preserved.
pub fn build_comment(errors: &[ErrorCode]) -> Option<String> {
    let mut seen = Vec::new();
    for error in errors {
        if !seen.contains(error) {
            seen.push(*error);
        }
    }
    if seen.is_empty() {
        return None;
    }
    Some(
        seen.iter()
            .map(|e| e.label())
            .collect::<Vec<_>>()
            .join("; "),
    )
}

// 2.3: reduction.

/// The decision recorded before this evaluation ran.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorDecision<'a> {
    pub verdict: Option<Verdict>,
    pub reason: Option<Reason>,
    pub comment: Option<&'a str>,
}

/// Outcome of one evaluate+reduce run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// Nothing to persist, nothing to notify.
    NoChange,
    /// Keep the current verdict, update only the audit comment.
    CommentOnly { comment: String },
    /// Verdict decided.
    Final {
        verdict: Verdict,
        reason: Option<Reason>,
        comment: Option<String>,
    },
}

pub fn reduce(
    errors: &[ErrorCode],
    prior: PriorDecision<'_>,
    kyc_level: KycLevel,
    created_at: Timestamp,
    now: Timestamp,
    windows: &ComplianceWindows,
) -> Reduction {
    // 1. a clean run always passes, whatever came before
    if errors.is_empty() {
        return Reduction::Final {
            verdict: Verdict::Pass,
            reason: None,
            comment: None,
        };
    }

    let mut deduped = Vec::new();
    for error in errors {
        if !deduped.contains(error) {
            deduped.push(*error);
        }
    }
    let comment = deduped
        .iter()
        .map(|e| e.label())
        .collect::<Vec<_>>()
        .join("; ");
    let minutes = created_at.elapsed_minutes(now);

    // 2. pending decisions age out, or stay parked when re-checking cannot help
    if prior.verdict == Some(Verdict::Pending) {
        if created_at.elapsed_days(now) > windows.pending_timeout_days {
            return Reduction::Final {
                verdict: Verdict::Fail,
                reason: Some(Reason::Expired),
                comment: Some(comment),
            };
        }
        let recheckable = prior.reason.map(|r| r.is_recheckable()).unwrap_or(false);
        let same_comment = prior.comment == Some(comment.as_str());
        let kyc_still_low = prior
            .reason
            .and_then(|r| r.required_kyc_level())
            .map(|required| kyc_level < required)
            .unwrap_or(false);
        if !recheckable || same_comment || kyc_still_low {
            return Reduction::NoChange;
        }
    }

    // 3. give just-submitted upstream data time to land
    if minutes < windows.delay_minutes && deduped.iter().any(|e| e.is_delayed()) {
        return Reduction::CommentOnly { comment };
    }

    let classified: Vec<(ErrorCode, Classification)> = deduped
        .iter()
        .filter_map(|e| e.classification().map(|c| (*e, c)))
        .collect();
    let grace_elapsed = minutes >= windows.grace_minutes;

    // 4a. crucial errors decide alone: fail beats manual beats pending,
    // declaration order breaks remaining ties
    let crucial: Vec<&(ErrorCode, Classification)> = classified
        .iter()
        .filter(|(_, c)| c.class == ErrorClass::Crucial)
        .collect();
    if let Some((_, picked)) = crucial
        .iter()
        .find(|(_, c)| c.verdict == Verdict::Fail)
        .or_else(|| crucial.iter().find(|(_, c)| c.verdict == Verdict::Manual))
        .or_else(|| crucial.iter().find(|(_, c)| c.verdict == Verdict::Pending))
        .or_else(|| crucial.first())
    {
        if grace_elapsed {
            return Reduction::Final {
                verdict: picked.verdict,
                reason: Some(picked.reason),
                comment: Some(comment),
            };
        }
        return Reduction::CommentOnly { comment };
    }

    // 4b. a lone single-class error decides itself
    if deduped.len() == 1 {
        if let Some((_, c)) = classified.first() {
            if c.class == ErrorClass::Single {
                return Reduction::Final {
                    verdict: c.verdict,
                    reason: Some(c.reason),
                    comment: Some(comment),
                };
            }
        }
    }

    // 4c. multi-class errors decide only unanimously
    if classified.len() == deduped.len()
        && classified
            .iter()
            .all(|(_, c)| c.class == ErrorClass::Multi)
    {
        let first = classified[0].1;
        if classified.iter().all(|(_, c)| c.verdict == first.verdict) {
            return Reduction::Final {
                verdict: first.verdict,
                reason: Some(first.reason),
                comment: Some(comment),
            };
        }
    }

    // 4d. ambiguous mix: hand to a human once the grace period is over
    if grace_elapsed {
        return Reduction::Final {
            verdict: Verdict::Manual,
            reason: None,
            comment: Some(comment),
        };
    }
    Reduction::CommentOnly { comment }
}
