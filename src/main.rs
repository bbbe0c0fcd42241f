//! Settlement Core Pipeline Simulation.
//!
//! Walks the full settlement lifecycle: pay-in registration, the compliance
//! gate, batching, liquidity securing and payout, including the degraded
//! paths (pending verdicts, constrained liquidity, slippage).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use settlement_core::*;

type SimPipeline = SettlementPipeline<FixedRatePricing, MemoryDex, MemoryPayout, MemorySink>;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("Settlement Core Pipeline Simulation");
    println!("Compliance Gate, Batch Optimization, Liquidity Securing, Payout\n");

    scenario_1_happy_path();
    scenario_2_compliance_gate();
    scenario_3_constrained_liquidity();
    scenario_4_purchase_and_poll();
    scenario_5_price_slippage();

    println!("\nAll simulations completed successfully.");
}

/// Pipeline against a single BTC pool with the given liquidity picture.
fn sim_pipeline(available_btc: Decimal, purchasable_btc: Decimal) -> (SimPipeline, AssetId) {
    let config = SettlementConfig::default();

    let mut registry = AssetRegistry::new();
    let btc = registry.add(|id| Asset::new(id, "BTC", Blockchain::Bitcoin, AssetCategory::Coin));
    registry.set_reference(Blockchain::Bitcoin, btc);

    let mut pricing = FixedRatePricing::new();
    pricing.set_rate("EUR", "BTC", dec!(50000));

    // coins settle in their own units, so the pool rate is 1
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

fn print_statuses(pipeline: &SimPipeline) {
    let mut ids: Vec<TransactionId> = pipeline.store.transactions().map(|tx| tx.id).collect();
    ids.sort();
    for id in ids {
        let tx = pipeline.store.transaction(id).unwrap();
        println!(
            "  {}: status {:?}, verdict {:?}, output {:?}",
            id, tx.status, tx.verdict, tx.output_amount
        );
    }
}

/// One compliant purchase settles within a single tick.
fn scenario_1_happy_path() {
    println!("Scenario 1: Happy Path\n");

    let (mut pipeline, btc) = sim_pipeline(dec!(1), dec!(10));
    pipeline
        .store
        .set_context(UserId(1), ComplianceContext::approved(KycLevel::LEVEL_50));
    pipeline.store.enqueue_payin(bank_payin(1, "payin-1", dec!(1000), btc));

    let report = pipeline.advance_and_tick().unwrap();
    println!(
        "  tick: {} registered, {} batch created, {} secured, {} completed",
        report.registered, report.batches_created, report.batches_secured, report.transactions_completed
    );
    print_statuses(&pipeline);
    println!(
        "  user mails sent: {}\n",
        pipeline.notifications.sent_of(NotificationKind::UserMail).len()
    );
}

/// Pending verdicts re-evaluate once the KYC tier rises; crucial errors fail
/// after the grace period and trigger a chargeback mail.
fn scenario_2_compliance_gate() {
    println!("Scenario 2: Compliance Gate\n");

    let (mut pipeline, btc) = sim_pipeline(dec!(1), dec!(10));
    // user 1 breaches the daily cap without full KYC
    pipeline
        .store
        .set_context(UserId(1), ComplianceContext::approved(KycLevel::LEVEL_30));
    pipeline.store.enqueue_payin(bank_payin(1, "payin-1", dec!(2000), btc));
    // user 2 is blocked outright
    let mut blocked = ComplianceContext::approved(KycLevel::LEVEL_50);
    blocked.user_status = UserStatus::Blocked;
    pipeline.store.set_context(UserId(2), blocked);
    pipeline.store.enqueue_payin(bank_payin(2, "payin-2", dec!(500), btc));

    pipeline.advance_and_tick().unwrap();
    println!("  after the first tick:");
    print_statuses(&pipeline);

    // the 10-minute grace period passes, the blocked user fails
    pipeline.advance_time(11 * 60_000);
    pipeline.tick().unwrap();
    println!("  after the grace period:");
    print_statuses(&pipeline);

    // a KYC upgrade clears the pending limit breach on the next tick
    pipeline
        .store
        .set_context(UserId(1), ComplianceContext::approved(KycLevel::LEVEL_50));
    let report = pipeline.advance_and_tick().unwrap();
    println!("  after the KYC upgrade ({} completed):", report.transactions_completed);
    print_statuses(&pipeline);
    println!(
        "  chargeback mails: {}\n",
        pipeline
            .notifications
            .sent_of(NotificationKind::UserMail)
            .iter()
            .filter(|mail| mail.subject.contains("chargeback"))
            .count()
    );
}

/// Partial liquidity keeps the smallest members and retries the rest.
fn scenario_3_constrained_liquidity() {
    println!("Scenario 3: Constrained Liquidity\n");

    // 0.0111 BTC on hand covers only the two small purchases
    let (mut pipeline, btc) = sim_pipeline(dec!(0.0111), dec!(0));
    for (user, amount) in [(1, dec!(50000)), (2, dec!(500)), (3, dec!(50))] {
        pipeline
            .store
            .set_context(UserId(user), ComplianceContext::approved(KycLevel::LEVEL_50));
        pipeline
            .store
            .enqueue_payin(bank_payin(user, &format!("payin-{user}"), amount, btc));
    }

    let report = pipeline.advance_and_tick().unwrap();
    println!(
        "  tick: {} batch created, {} member(s) pushed back for retry, {} completed",
        report.batches_created, report.rejected, report.transactions_completed
    );
    print_statuses(&pipeline);
    println!();
}

/// No liquidity on hand: the batch purchases and polls until the order lands.
fn scenario_4_purchase_and_poll() {
    println!("Scenario 4: Purchase and Poll\n");

    let (mut pipeline, btc) = sim_pipeline(dec!(0), dec!(10));
    pipeline
        .store
        .set_context(UserId(1), ComplianceContext::approved(KycLevel::LEVEL_50));
    pipeline.store.enqueue_payin(bank_payin(1, "payin-1", dec!(1000), btc));

    let report = pipeline.advance_and_tick().unwrap();
    println!("  tick 1: {} batch pending liquidity", report.batches_pending);

    let report = pipeline.advance_and_tick().unwrap();
    println!("  tick 2: order not ready ({} secured)", report.batches_secured);

    let report = pipeline.advance_and_tick().unwrap();
    println!(
        "  tick 3: {} secured, {} completed",
        report.batches_secured, report.transactions_completed
    );
    print_statuses(&pipeline);
    println!();
}

/// Slippage during the purchase aborts the batch and alerts the operators.
fn scenario_5_price_slippage() {
    println!("Scenario 5: Price Slippage\n");

    let (mut pipeline, btc) = sim_pipeline(dec!(0), dec!(10));
    pipeline.liquidity.trigger_slippage(btc);
    pipeline
        .store
        .set_context(UserId(1), ComplianceContext::approved(KycLevel::LEVEL_50));
    pipeline.store.enqueue_payin(bank_payin(1, "payin-1", dec!(1000), btc));

    pipeline.advance_and_tick().unwrap();
    print_statuses(&pipeline);
    println!(
        "  operator errors: {}",
        pipeline.notifications.sent_of(NotificationKind::Error).len()
    );
    println!("  audit events recorded: {}", pipeline.events.len());
}
