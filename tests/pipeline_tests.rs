//! End-to-end pipeline tests against the in-memory providers.
//!
//! Each test drives whole ticks and asserts on transaction statuses, batch
//! lifecycles, notifications and the audit trail.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use settlement_core::*;

type TestPipeline = SettlementPipeline<FixedRatePricing, MemoryDex, MemoryPayout, MemorySink>;

fn pipeline_with_pool(available_btc: Decimal, purchasable_btc: Decimal) -> (TestPipeline, AssetId) {
    let config = SettlementConfig::default();

    let mut registry = AssetRegistry::new();
    let btc = registry.add(|id| Asset::new(id, "BTC", Blockchain::Bitcoin, AssetCategory::Coin));
    registry.set_reference(Blockchain::Bitcoin, btc);

    let mut pricing = FixedRatePricing::new();
    pricing.set_rate("EUR", "BTC", dec!(50000));

    let dex = MemoryDex::new().with_pool(btc, dec!(1), available_btc, purchasable_btc, dec!(0.00000300));
    let venue = MemoryPayout::new().with_fee(btc, dec!(0.00000100));
    let sink = MemorySink::new(config.pipeline.notification_debounce_minutes);

    let pipeline = SettlementPipeline::new(config, registry, pricing, dex, venue, sink);
    (pipeline, btc)
}

fn bank_payin(user: u64, payin_ref: &str, amount: Decimal, output_asset: AssetId) -> PayIn {
    PayIn {
        user_id: UserId(user),
        source: SourceKind::BankTransfer {
            payin_ref: payin_ref.to_string(),
            iban: format!("CH930076201162385{user:04}"),
            bic: None,
            instant: false,
        },
        amount,
        currency: "EUR".to_string(),
        output_asset,
        payout_address: format!("bc1-user-{user}"),
        percent_fee: dec!(0.0149),
        fixed_fee: dec!(0),
    }
}

fn card_payin(user: u64, payin_ref: &str, amount: Decimal, output_asset: AssetId) -> PayIn {
    PayIn {
        user_id: UserId(user),
        source: SourceKind::CardCharge {
            payin_ref: payin_ref.to_string(),
            fingerprint: format!("fp-{user}"),
            holder_name: "Max Muster".to_string(),
        },
        amount,
        currency: "EUR".to_string(),
        output_asset,
        payout_address: format!("bc1-user-{user}"),
        percent_fee: dec!(0.029),
        fixed_fee: dec!(0),
    }
}

fn approve_user(pipeline: &mut TestPipeline, user: u64) {
    pipeline
        .store
        .set_context(UserId(user), ComplianceContext::approved(KycLevel::LEVEL_50));
}

fn statuses(pipeline: &TestPipeline, status: TransactionStatus) -> usize {
    pipeline.store.count_with_status(status)
}

#[test]
fn happy_path_settles_in_one_tick() {
    let (mut pipeline, btc) = pipeline_with_pool(dec!(1), dec!(10));
    approve_user(&mut pipeline, 1);
    pipeline.store.enqueue_payin(bank_payin(1, "payin-1", dec!(1000), btc));

    let report = pipeline.advance_and_tick().unwrap();

    assert_eq!(report.registered, 1);
    assert_eq!(report.verdicts_changed, 1);
    assert_eq!(report.prepared, 1);
    assert_eq!(report.batches_created, 1);
    assert_eq!(report.batches_secured, 1);
    assert_eq!(report.payouts_submitted, 1);
    assert_eq!(report.transactions_completed, 1);
    assert_eq!(report.batches_completed, 1);
    assert_eq!(report.mails_sent, 1);
    assert_eq!(report.item_errors, 0);

    let tx = pipeline.store.transaction(TransactionId(1)).unwrap();
    assert!(tx.is_complete());
    assert_eq!(tx.verdict, Some(Verdict::Pass));
    // 1000 EUR minus 1.49% at 50000 EUR/BTC
    assert_eq!(tx.total_fee_amount, Some(dec!(14.9)));
    assert_eq!(tx.output_amount, Some(dec!(0.019702)));
    assert_eq!(tx.payout_tx_id.as_deref(), Some("payout-1"));
    assert!(tx.mail_sent_at.is_some());

    // the reserve drained the pool and the asset claim is released
    assert_eq!(pipeline.liquidity.available(btc), dec!(0.980298));
    assert!(!pipeline.store.has_open_batch(btc));

    let mails = pipeline.notifications.sent_of(NotificationKind::UserMail);
    assert_eq!(mails.len(), 1);
    assert!(mails[0].subject.contains("completed"));
}

#[test]
fn duplicate_payin_registers_once() {
    let (mut pipeline, btc) = pipeline_with_pool(dec!(1), dec!(10));
    approve_user(&mut pipeline, 1);
    pipeline.store.enqueue_payin(bank_payin(1, "payin-1", dec!(500), btc));
    pipeline.store.enqueue_payin(bank_payin(1, "payin-1", dec!(500), btc));

    let report = pipeline.advance_and_tick().unwrap();
    assert_eq!(report.registered, 1);
    assert_eq!(report.payins_skipped, 1);

    // replays on a later tick are also skipped
    pipeline.store.enqueue_payin(bank_payin(1, "payin-1", dec!(500), btc));
    let report = pipeline.advance_and_tick().unwrap();
    assert_eq!(report.registered, 0);
    assert_eq!(report.payins_skipped, 1);
}

#[test]
fn card_payin_below_the_asset_floor_never_registers() {
    let (mut pipeline, btc) = pipeline_with_pool(dec!(1), dec!(10));
    approve_user(&mut pipeline, 1);

    // BTC carries the default one-unit floor; 0.5 is under it even with the
    // wire-fee tolerance applied
    pipeline.store.enqueue_payin(card_payin(1, "card-1", dec!(0.5), btc));
    let report = pipeline.advance_and_tick().unwrap();
    assert_eq!(report.registered, 0);
    assert_eq!(report.payins_skipped, 1);
    assert_eq!(pipeline.store.transactions().count(), 0);

    // above the floor a card charge settles like any other pay-in
    pipeline.store.enqueue_payin(card_payin(1, "card-2", dec!(1000), btc));
    let report = pipeline.advance_and_tick().unwrap();
    assert_eq!(report.registered, 1);
    assert_eq!(report.transactions_completed, 1);
}

#[test]
fn pending_verdict_clears_after_kyc_upgrade() {
    let (mut pipeline, btc) = pipeline_with_pool(dec!(1), dec!(10));
    pipeline
        .store
        .set_context(UserId(1), ComplianceContext::approved(KycLevel::LEVEL_30));
    pipeline.store.enqueue_payin(bank_payin(1, "payin-1", dec!(2000), btc));

    let report = pipeline.advance_and_tick().unwrap();
    assert_eq!(report.verdicts_changed, 1);
    assert_eq!(report.batches_created, 0);
    let tx = pipeline.store.transaction(TransactionId(1)).unwrap();
    assert_eq!(tx.verdict, Some(Verdict::Pending));
    assert_eq!(tx.reason, Some(Reason::DailyLimit));
    assert_eq!(tx.status, TransactionStatus::Created);

    // unchanged context: the pending decision stays parked
    let report = pipeline.advance_and_tick().unwrap();
    assert_eq!(report.verdicts_changed, 0);

    approve_user(&mut pipeline, 1);
    let report = pipeline.advance_and_tick().unwrap();
    assert_eq!(report.verdicts_changed, 1);
    assert_eq!(report.transactions_completed, 1);
    let tx = pipeline.store.transaction(TransactionId(1)).unwrap();
    assert!(tx.is_complete());
}

#[test]
fn blocked_user_fails_after_grace_with_chargeback_mail() {
    let (mut pipeline, btc) = pipeline_with_pool(dec!(1), dec!(10));
    let mut blocked = ComplianceContext::approved(KycLevel::LEVEL_50);
    blocked.user_status = UserStatus::Blocked;
    pipeline.store.set_context(UserId(1), blocked);
    pipeline.store.enqueue_payin(bank_payin(1, "payin-1", dec!(500), btc));

    // inside the grace period only the audit comment lands
    pipeline.advance_and_tick().unwrap();
    let tx = pipeline.store.transaction(TransactionId(1)).unwrap();
    assert_eq!(tx.verdict, None);
    assert_eq!(tx.comment.as_deref(), Some("user_blocked"));
    assert!(pipeline.notifications.sent_of(NotificationKind::UserMail).is_empty());

    pipeline.advance_time(11 * 60_000);
    let report = pipeline.tick().unwrap();
    assert_eq!(report.verdicts_changed, 1);
    assert_eq!(report.mails_sent, 1);

    let tx = pipeline.store.transaction(TransactionId(1)).unwrap();
    assert_eq!(tx.verdict, Some(Verdict::Fail));
    assert_eq!(tx.reason, Some(Reason::BannedAccount));
    assert!(tx.mail_sent_at.is_some());

    let mails = pipeline.notifications.sent_of(NotificationKind::UserMail);
    assert_eq!(mails.len(), 1);
    assert!(mails[0].subject.contains("chargeback"));
}

#[test]
fn constrained_liquidity_keeps_the_smallest_members() {
    // 0.0111 BTC on hand, nothing purchasable
    let (mut pipeline, btc) = pipeline_with_pool(dec!(0.0111), dec!(0));
    for (user, amount) in [(1u64, dec!(50000)), (2, dec!(500)), (3, dec!(50))] {
        approve_user(&mut pipeline, user);
        pipeline
            .store
            .enqueue_payin(bank_payin(user, &format!("payin-{user}"), amount, btc));
    }

    let report = pipeline.advance_and_tick().unwrap();
    assert_eq!(report.batches_created, 1);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.transactions_completed, 2);

    // the two small purchases settled, the large one waits for liquidity
    let large = pipeline.store.transaction(TransactionId(1)).unwrap();
    assert_eq!(large.status, TransactionStatus::MissingLiquidity);
    assert_eq!(large.retry_count, 1);
    assert!(large.output_amount.is_none());
    assert!(pipeline.store.transaction(TransactionId(2)).unwrap().is_complete());
    assert!(pipeline.store.transaction(TransactionId(3)).unwrap().is_complete());
}

#[test]
fn purchase_order_polls_until_settled() {
    let (mut pipeline, btc) = pipeline_with_pool(dec!(0), dec!(10));
    approve_user(&mut pipeline, 1);
    pipeline.store.enqueue_payin(bank_payin(1, "payin-1", dec!(1000), btc));

    let report = pipeline.advance_and_tick().unwrap();
    assert_eq!(report.batches_created, 1);
    assert_eq!(report.batches_pending, 1);
    assert_eq!(report.batches_secured, 0);
    let batch = pipeline.store.batch(BatchId(1)).unwrap();
    assert_eq!(batch.status, BatchStatus::PendingLiquidity);

    // order not ready on the first poll
    let report = pipeline.advance_and_tick().unwrap();
    assert_eq!(report.batches_secured, 0);
    assert_eq!(report.item_errors, 0);

    let report = pipeline.advance_and_tick().unwrap();
    assert_eq!(report.batches_secured, 1);
    assert_eq!(report.transactions_completed, 1);
    assert_eq!(pipeline.liquidity.open_order_count(), 0);

    let tx = pipeline.store.transaction(TransactionId(1)).unwrap();
    assert!(tx.is_complete());
    // the actual purchase fee was allocated to the lone member
    let fees = tx.fees.as_ref().unwrap();
    assert_eq!(fees.actual_purchase.unwrap().amount, dec!(0.00000300));
}

#[test]
fn shortage_orders_compensating_liquidity_and_warns_on_retries() {
    let (mut pipeline, btc) = pipeline_with_pool(dec!(0), dec!(0));
    approve_user(&mut pipeline, 1);
    pipeline.store.enqueue_payin(bank_payin(1, "payin-1", dec!(1000), btc));

    let report = pipeline.advance_and_tick().unwrap();
    assert_eq!(report.batches_created, 0);
    assert_eq!(report.rejected, 1);

    let tx = pipeline.store.transaction(TransactionId(1)).unwrap();
    assert_eq!(tx.status, TransactionStatus::MissingLiquidity);

    // the deficit was ordered in target units
    assert_eq!(pipeline.liquidity.compensating_orders().len(), 1);
    let errors = pipeline.notifications.sent_of(NotificationKind::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].subject.contains("shortage"));

    // retries accumulate until the operators hear about the transaction;
    // repeated shortage errors stay debounced meanwhile
    pipeline.advance_and_tick().unwrap();
    pipeline.advance_and_tick().unwrap();
    let tx = pipeline.store.transaction(TransactionId(1)).unwrap();
    assert_eq!(tx.retry_count, 3);
    assert_eq!(pipeline.notifications.sent_of(NotificationKind::Error).len(), 1);
    let warnings = pipeline.notifications.sent_of(NotificationKind::Warning);
    assert!(warnings.iter().any(|w| w.subject.contains("retrying")));
}

#[test]
fn slippage_aborts_the_batch_and_resets_members() {
    let (mut pipeline, btc) = pipeline_with_pool(dec!(0), dec!(10));
    pipeline.liquidity.trigger_slippage(btc);
    approve_user(&mut pipeline, 1);
    pipeline.store.enqueue_payin(bank_payin(1, "payin-1", dec!(1000), btc));

    let report = pipeline.advance_and_tick().unwrap();
    assert_eq!(report.batches_created, 1);
    assert_eq!(report.batches_secured, 0);
    assert_eq!(report.rejected, 1);

    let tx = pipeline.store.transaction(TransactionId(1)).unwrap();
    assert_eq!(tx.status, TransactionStatus::PriceSlippage);
    assert!(tx.batch_id.is_none());
    assert!(!pipeline.store.has_open_batch(btc));

    let errors = pipeline.notifications.sent_of(NotificationKind::Error);
    assert!(errors.iter().any(|e| e.subject.contains("slippage")));
}

#[test]
fn one_open_batch_per_asset() {
    let (mut pipeline, btc) = pipeline_with_pool(dec!(0), dec!(10));
    approve_user(&mut pipeline, 1);
    approve_user(&mut pipeline, 2);
    pipeline.store.enqueue_payin(bank_payin(1, "payin-1", dec!(1000), btc));

    // the first batch parks as pending liquidity
    pipeline.advance_and_tick().unwrap();
    assert!(pipeline.store.has_open_batch(btc));

    // a later pay-in for the same asset cannot start a second batch
    pipeline.store.enqueue_payin(bank_payin(2, "payin-2", dec!(500), btc));
    let report = pipeline.advance_and_tick().unwrap();
    assert_eq!(report.batches_created, 0);
    let waiting = pipeline.store.transaction(TransactionId(2)).unwrap();
    assert_eq!(waiting.status, TransactionStatus::Prepared);

    // once the pending batch settles the waiting transaction batches
    let report = pipeline.advance_and_tick().unwrap();
    assert_eq!(report.batches_completed, 1);
    let report = pipeline.advance_and_tick().unwrap();
    assert_eq!(report.batches_created, 1);
}

#[test]
fn audit_trail_covers_the_lifecycle() {
    let (mut pipeline, btc) = pipeline_with_pool(dec!(1), dec!(10));
    approve_user(&mut pipeline, 1);
    pipeline.store.enqueue_payin(bank_payin(1, "payin-1", dec!(1000), btc));

    pipeline.advance_and_tick().unwrap();

    let events = pipeline.events.drain();
    let mut kinds: Vec<&'static str> = Vec::new();
    for event in &events {
        kinds.push(match event.payload {
            EventPayload::TransactionRegistered(_) => "registered",
            EventPayload::VerdictChanged(_) => "verdict",
            EventPayload::TransactionPrepared(_) => "prepared",
            EventPayload::BatchCreated(_) => "batch_created",
            EventPayload::BatchSecured(_) => "secured",
            EventPayload::PayoutSubmitted(_) => "payout",
            EventPayload::TransactionCompleted(_) => "completed",
            EventPayload::BatchCompleted(_) => "batch_completed",
            EventPayload::MailSent(_) => "mail",
            _ => "other",
        });
    }
    assert_eq!(
        kinds,
        vec![
            "registered",
            "verdict",
            "prepared",
            "batch_created",
            "secured",
            "payout",
            "completed",
            "batch_completed",
            "mail",
        ]
    );
    assert!(pipeline.events.is_empty());
}
