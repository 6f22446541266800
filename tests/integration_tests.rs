use chrono::{NaiveDate, NaiveTime};
use dues_allocation_engine::*;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

fn config(from: NaiveDate, until: Option<NaiveDate>) -> PeriodConfig {
    PeriodConfig {
        id: 0,
        default_maintenance_amount: 800.0,
        default_water_amount: Some(150.0),
        default_extraordinary_fee_amount: Some(2_000.0),
        payment_due_day: 10,
        late_penalty_amount: 100.0,
        effective_from: from,
        effective_until: until,
        is_active: true,
    }
}

fn community(today: NaiveDate) -> DuesEngine<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.insert_config(config(date(2024, 1, 1), None)).unwrap();
    let settings = EngineSettings {
        house_count: 4,
        ..EngineSettings::default()
    };
    DuesEngine::new(store, settings).with_today(today)
}

fn maintenance_charge(engine: &DuesEngine<MemoryStore>, house: HouseId, period: PeriodId) -> HousePeriodCharge {
    engine
        .store()
        .charges_for_house_period(house, period)
        .unwrap()
        .into_iter()
        .find(|c| c.concept_type == ConceptType::Maintenance)
        .unwrap()
}

struct ScriptedProvider {
    answer: std::result::Result<String, String>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn answering(answer: String) -> Arc<Self> {
        Arc::new(Self {
            answer: Ok(answer),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        })
    }
}

impl ReasoningProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn analyze<'a>(
        &'a self,
        _request: &'a ReasoningRequest,
    ) -> BoxFuture<'a, dues_allocation_engine::Result<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = self.answer.clone();
        Box::pin(async move { answer.map_err(DuesError::ProviderFailure) })
    }
}

#[tokio::test]
async fn test_fifo_payment_application_and_credit() -> anyhow::Result<()> {
    let engine = community(date(2024, 4, 1));
    let jan = engine.ensure_period(2024, 1)?.period;
    let feb = engine.ensure_period(2024, 2)?.period;
    let mar = engine.ensure_period(2024, 3)?.period;

    let first = engine.allocate_payment(2, 1, 1200.0).await?;
    assert!(first.was_applied());
    assert_eq!(first.plan.method, DistributionMethod::Deterministic);
    assert_eq!(first.allocations.len(), 2);
    assert_eq!(first.allocations[0].period_id, jan.id);
    assert_eq!(first.allocations[0].payment_status, PaymentStatus::Paid);
    assert_eq!(first.allocations[1].period_id, feb.id);
    assert_eq!(first.allocations[1].allocated_amount, 400.0);
    assert_eq!(first.allocations[1].payment_status, PaymentStatus::Partial);

    assert!(engine.charge_balance(2, jan.id)?.is_paid);
    let feb_balance = engine.charge_balance(2, feb.id)?;
    assert_eq!(feb_balance.balance, 400.0);

    let pending = engine.resolve_unpaid_periods(2)?;
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].pending_maintenance, 400.0);

    let second = engine.allocate_payment(2, 2, 1200.0).await?;
    assert_eq!(second.allocations.len(), 2);
    assert_eq!(second.allocations[0].period_id, feb.id);
    assert_eq!(second.allocations[0].payment_status, PaymentStatus::Paid);
    assert_eq!(second.allocations[1].period_id, mar.id);
    assert!(engine.resolve_unpaid_periods(2)?.is_empty());

    // Nothing owed: everything goes to credit.
    let third = engine.allocate_payment(2, 3, 500.0).await?;
    assert!(third.allocations.is_empty());
    let balance = third.balance.unwrap();
    assert_eq!(balance.available_credit(), 500.0);

    // Other houses are untouched.
    assert_eq!(engine.resolve_unpaid_periods(1)?.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_exact_multiple_and_sub_unit_payments() {
    let engine = community(date(2024, 4, 1));
    let jan = engine.ensure_period(2024, 1).unwrap().period;
    engine.ensure_period(2024, 2).unwrap();
    engine.ensure_period(2024, 3).unwrap();

    let plan = engine.plan_distribution(1, 1600.0).await.unwrap();
    assert_eq!(plan.allocations.len(), 2);
    assert_eq!(plan.confidence, Confidence::High);
    assert_eq!(plan.remaining_as_credit, 0.0);
    assert!(!plan.auto_applied);
    // Planning writes nothing.
    assert_eq!(engine.resolve_unpaid_periods(1).unwrap().len(), 3);

    let partial = engine.allocate_payment(1, 10, 50.0).await.unwrap();
    assert_eq!(partial.plan.confidence, Confidence::Medium);
    assert_eq!(partial.allocations.len(), 1);
    assert_eq!(partial.allocations[0].period_id, jan.id);
    assert_eq!(partial.allocations[0].payment_status, PaymentStatus::Partial);

    let details = engine.payment_details(1, jan.id).unwrap();
    let maintenance = details
        .iter()
        .find(|d| d.concept_type == ConceptType::Maintenance)
        .unwrap();
    assert_eq!(maintenance.paid_amount, 50.0);
    assert_eq!(maintenance.balance, 750.0);
}

#[tokio::test]
async fn test_plans_conserve_every_payment() {
    let engine = community(date(2024, 7, 1));
    for month in 1..=6 {
        engine.ensure_period(2024, month).unwrap();
    }

    for amount in [0.01, 50.0, 799.99, 800.0, 1200.0, 2400.0, 4800.0, 5000.5, 9999.99] {
        let plan = engine.plan_distribution(3, amount).await.unwrap();
        assert!(
            plan.is_conserved(0.01),
            "plan for {} is not conserved: {:?}",
            amount,
            plan
        );
        let mut ids: Vec<PeriodId> = plan.allocations.iter().map(|a| a.period_id).collect();
        let sorted = {
            let mut s = ids.clone();
            s.sort();
            s
        };
        assert_eq!(ids, sorted, "allocations out of order for {}", amount);
        ids.dedup();
        assert_eq!(ids.len(), plan.allocations.len());
    }
}

/// Delegates to `MemoryStore` but pauses before every allocation write, so
/// two unserialized payments would both read the same pending list.
struct SlowAllocationStore {
    inner: MemoryStore,
    delay: Duration,
}

impl PeriodStore for SlowAllocationStore {
    fn list_periods(&self) -> dues_allocation_engine::Result<Vec<Period>> {
        self.inner.list_periods()
    }
    fn find_period(&self, id: PeriodId) -> dues_allocation_engine::Result<Option<Period>> {
        self.inner.find_period(id)
    }
    fn find_period_by_month(&self, year: i32, month: u32) -> dues_allocation_engine::Result<Option<Period>> {
        self.inner.find_period_by_month(year, month)
    }
    fn create_period(
        &self,
        year: i32,
        month: u32,
        config_id: Option<ConfigId>,
    ) -> dues_allocation_engine::Result<Period> {
        self.inner.create_period(year, month, config_id)
    }
}

impl PeriodConfigStore for SlowAllocationStore {
    fn active_config_for(&self, date: NaiveDate) -> dues_allocation_engine::Result<Option<PeriodConfig>> {
        self.inner.active_config_for(date)
    }
    fn find_config(&self, id: ConfigId) -> dues_allocation_engine::Result<Option<PeriodConfig>> {
        self.inner.find_config(id)
    }
}

impl ChargeStore for SlowAllocationStore {
    fn find_charge(&self, id: ChargeId) -> dues_allocation_engine::Result<Option<HousePeriodCharge>> {
        self.inner.find_charge(id)
    }
    fn charges_for_house_period(
        &self,
        house_id: HouseId,
        period_id: PeriodId,
    ) -> dues_allocation_engine::Result<Vec<HousePeriodCharge>> {
        self.inner.charges_for_house_period(house_id, period_id)
    }
    fn charges_for_period(&self, period_id: PeriodId) -> dues_allocation_engine::Result<Vec<HousePeriodCharge>> {
        self.inner.charges_for_period(period_id)
    }
    fn create_charge(&self, charge: NewCharge) -> dues_allocation_engine::Result<HousePeriodCharge> {
        self.inner.create_charge(charge)
    }
    fn update_expected_amount(
        &self,
        id: ChargeId,
        expected_amount: f64,
    ) -> dues_allocation_engine::Result<HousePeriodCharge> {
        self.inner.update_expected_amount(id, expected_amount)
    }
    fn delete_charge(&self, id: ChargeId) -> dues_allocation_engine::Result<()> {
        self.inner.delete_charge(id)
    }
}

impl AllocationStore for SlowAllocationStore {
    fn allocations_for_house_period(
        &self,
        house_id: HouseId,
        period_id: PeriodId,
    ) -> dues_allocation_engine::Result<Vec<RecordAllocation>> {
        self.inner.allocations_for_house_period(house_id, period_id)
    }
    fn create_allocation(&self, allocation: NewAllocation) -> dues_allocation_engine::Result<RecordAllocation> {
        std::thread::sleep(self.delay);
        self.inner.create_allocation(allocation)
    }
}

impl OverrideStore for SlowAllocationStore {
    fn find_override(
        &self,
        house_id: HouseId,
        period_id: PeriodId,
        concept: ConceptType,
    ) -> dues_allocation_engine::Result<Option<HousePeriodOverride>> {
        self.inner.find_override(house_id, period_id, concept)
    }
}

impl HouseBalanceStore for SlowAllocationStore {
    fn get_or_create_balance(&self, house_id: HouseId) -> dues_allocation_engine::Result<HouseBalance> {
        self.inner.get_or_create_balance(house_id)
    }
    fn add_credit(&self, house_id: HouseId, amount: f64) -> dues_allocation_engine::Result<HouseBalance> {
        self.inner.add_credit(house_id, amount)
    }
    fn add_debit(&self, house_id: HouseId, amount: f64) -> dues_allocation_engine::Result<HouseBalance> {
        self.inner.add_debit(house_id, amount)
    }
}

impl BankTransactionStore for SlowAllocationStore {
    fn find_transaction(&self, id: TransactionId) -> dues_allocation_engine::Result<Option<BankTransaction>> {
        self.inner.find_transaction(id)
    }
    fn transactions_on(
        &self,
        date: NaiveDate,
        bank_name: &str,
    ) -> dues_allocation_engine::Result<Vec<BankTransaction>> {
        self.inner.transactions_on(date, bank_name)
    }
    fn create_transactions(
        &self,
        rows: Vec<NewBankTransaction>,
    ) -> dues_allocation_engine::Result<Vec<BankTransaction>> {
        self.inner.create_transactions(rows)
    }
    fn transactions_by_status(
        &self,
        status: TransactionStatus,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> dues_allocation_engine::Result<Vec<BankTransaction>> {
        self.inner.transactions_by_status(status, from, to)
    }
    fn summary(&self, from: NaiveDate, to: NaiveDate) -> dues_allocation_engine::Result<TransactionSummary> {
        self.inner.summary(from, to)
    }
}

impl IngestionPointerStore for SlowAllocationStore {
    fn append_pointer(&self, transaction_id: TransactionId) -> dues_allocation_engine::Result<IngestionPointer> {
        self.inner.append_pointer(transaction_id)
    }
    fn recent_pointers(
        &self,
        limit: usize,
    ) -> dues_allocation_engine::Result<Vec<(IngestionPointer, BankTransaction)>> {
        self.inner.recent_pointers(limit)
    }
}

#[test]
fn test_concurrent_payments_for_one_house_never_overlap() {
    let store = SlowAllocationStore {
        inner: MemoryStore::new(),
        delay: Duration::from_millis(50),
    };
    store.inner.insert_config(config(date(2024, 1, 1), None)).unwrap();
    let settings = EngineSettings {
        house_count: 4,
        ..EngineSettings::default()
    };
    let engine = Arc::new(DuesEngine::new(Arc::new(store), settings).with_today(date(2024, 5, 1)));
    let periods: Vec<Period> = (1..=4)
        .map(|m| engine.ensure_period(2024, m).unwrap().period)
        .collect();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                futures::executor::block_on(engine.allocate_payment(4, 200 + i, 800.0)).unwrap()
            })
        })
        .collect();
    let mut paid_periods: Vec<PeriodId> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap().allocations)
        .map(|a| a.period_id)
        .collect();
    paid_periods.sort();

    let expected: Vec<PeriodId> = periods.iter().map(|p| p.id).collect();
    assert_eq!(paid_periods, expected);
    for period in &periods {
        let balance = engine.charge_balance(4, period.id).unwrap();
        assert_eq!(balance.total_paid, 800.0, "{} over- or under-paid", period.display_name());
    }
    assert!(engine.resolve_unpaid_periods(4).unwrap().is_empty());
    assert_eq!(
        engine.store().inner.get_or_create_balance(4).unwrap().available_credit(),
        0.0
    );
}

#[test]
fn test_overrides_and_optional_concepts_in_seeding() {
    let engine = community(date(2024, 2, 1));
    let period = engine.store().create_period(2024, 1, None).unwrap();
    engine
        .store()
        .set_period_flags(period.id, true, false)
        .unwrap();
    engine
        .store()
        .insert_override(HousePeriodOverride {
            house_id: 3,
            period_id: period.id,
            concept_type: ConceptType::Maintenance,
            custom_amount: 500.0,
        })
        .unwrap();

    let seed = engine.seed_period(period.id).unwrap();
    assert_eq!(seed.created, 8);
    assert!(engine.seed_period(period.id).unwrap().already_seeded);

    let charge = maintenance_charge(&engine, 3, period.id);
    assert_eq!(charge.expected_amount, 500.0);
    assert_eq!(charge.source, ChargeSource::Override);
    assert_eq!(engine.charge_balance(3, period.id).unwrap().total_expected, 650.0);
    assert_eq!(engine.charge_balance(1, period.id).unwrap().total_expected, 950.0);

    let pending = engine.resolve_unpaid_periods(3).unwrap();
    assert_eq!(pending[0].expected_maintenance, 500.0);
}

#[test]
fn test_unseeded_period_balance_is_not_found() {
    let engine = community(date(2024, 2, 1));
    let period = engine.store().create_period(2024, 1, None).unwrap();
    let err = engine.charge_balance(1, period.id).unwrap_err();
    assert!(matches!(err, DuesError::NotFound { .. }));
    assert!(err.is_caller_error());
}

fn ai_community() -> (DuesEngine<MemoryStore>, Vec<Period>) {
    // The config expired before today and the fallback unit is zero, so the
    // deterministic rules decline every payment.
    let store = Arc::new(MemoryStore::new());
    store
        .insert_config(config(date(2024, 1, 1), Some(date(2024, 3, 31))))
        .unwrap();
    let settings = EngineSettings {
        house_count: 4,
        default_maintenance_amount: 0.0,
        ..EngineSettings::default()
    };
    let engine = DuesEngine::new(store, settings).with_today(date(2024, 5, 10));
    let periods = (1..=3)
        .map(|m| engine.ensure_period(2024, m).unwrap().period)
        .collect();
    (engine, periods)
}

#[tokio::test]
async fn test_ai_fallback_plan_is_never_applied() {
    let (engine, periods) = ai_community();
    let answer = format!(
        r#"```json
        {{"allocations": [
            {{"period_id": {}, "concept_type": "maintenance", "amount": 800, "reasoning": "oldest"}},
            {{"period_id": {}, "concept_type": "maintenance", "amount": "200", "reasoning": "partial"}}
          ],
          "confidence": "high", "reasoning": "fifo", "total_allocated": 999, "remaining_as_credit": 0}}
        ```"#,
        periods[0].id, periods[1].id
    );
    let primary = ScriptedProvider::failing("timeout");
    let secondary = ScriptedProvider::answering(answer);
    let engine = engine
        .with_primary_provider(primary.clone())
        .with_secondary_provider(secondary.clone());

    let plan = engine.plan_distribution(1, 1000.0).await.unwrap();
    assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    assert_eq!(secondary.calls.load(Ordering::SeqCst), 1);
    assert_eq!(plan.method, DistributionMethod::AiAssisted);
    assert_eq!(plan.total_allocated, 1000.0);
    assert!(!plan.requires_manual_review);
    assert!(!plan.auto_applied);

    let application = engine.allocate_payment(1, 55, 1000.0).await.unwrap();
    assert!(!application.was_applied());
    assert!(application.plan.requires_manual_review);
    assert!(application.allocations.is_empty());
    assert_eq!(engine.resolve_unpaid_periods(1).unwrap().len(), 3);
}

#[tokio::test]
async fn test_invalid_ai_answers_degrade_to_manual_review() {
    let (engine, periods) = ai_community();
    let overspent = format!(
        r#"{{"allocations": [{{"period_id": {}, "amount": 2000}}], "confidence": "high", "remaining_as_credit": 0}}"#,
        periods[0].id
    );
    let engine = engine.with_primary_provider(ScriptedProvider::answering(overspent));
    let plan = engine.plan_distribution(2, 800.0).await.unwrap();
    assert_eq!(plan.method, DistributionMethod::ManualReview);
    assert!(plan.requires_manual_review);
    assert_eq!(plan.remaining_as_credit, 800.0);

    let (engine, _) = ai_community();
    let unknown = r#"{"allocations": [{"period_id": 424242, "amount": 800}], "confidence": "high", "remaining_as_credit": 0}"#;
    let engine = engine.with_primary_provider(ScriptedProvider::answering(unknown.to_string()));
    let plan = engine.plan_distribution(2, 800.0).await.unwrap();
    assert_eq!(plan.method, DistributionMethod::ManualReview);

    let (engine, _) = ai_community();
    let plan = engine.plan_distribution(2, 800.0).await.unwrap();
    assert_eq!(plan.method, DistributionMethod::ManualReview);
}

#[tokio::test]
async fn test_late_penalties_and_condonation() {
    let engine = community(date(2024, 1, 20));
    let jan = engine.ensure_period(2024, 1).unwrap().period;
    engine.allocate_payment(1, 1, 800.0).await.unwrap();

    let penalties = engine.assess_late_penalties(jan.id).unwrap();
    let houses: Vec<HouseId> = penalties.iter().map(|c| c.house_id).collect();
    assert_eq!(houses, vec![2, 3, 4]);
    assert!(penalties.iter().all(|c| c.expected_amount == 100.0));
    assert!(engine.assess_late_penalties(jan.id).unwrap().is_empty());

    let penalty = &penalties[0];
    let outcome = engine.condone_penalty(penalty.id).unwrap();
    assert!(outcome.condoned);
    assert_eq!(outcome.removed_amount, 100.0);
    assert!(engine.store().find_charge(penalty.id).unwrap().is_none());

    let maintenance = maintenance_charge(&engine, 2, jan.id);
    assert!(matches!(
        engine.condone_penalty(maintenance.id),
        Err(DuesError::Validation(_))
    ));
}

#[tokio::test]
async fn test_charge_adjustment_and_reversal_guards() {
    let engine = community(date(2024, 6, 15));
    let jan = engine.ensure_period(2024, 1).unwrap().period;
    let may = engine.store().create_period(2024, 5, None).unwrap();
    engine.seed_period(may.id).unwrap();

    let old = maintenance_charge(&engine, 1, jan.id);
    let err = engine.adjust_charge(old.id, 900.0).unwrap_err();
    assert!(matches!(err, DuesError::Conflict(_)));
    assert!(err.to_string().contains("5 months old"));

    let recent = maintenance_charge(&engine, 1, may.id);
    let outcome = engine.adjust_charge(recent.id, 950.0).unwrap();
    assert_eq!(outcome.difference, 150.0);
    let updated = engine.store().find_charge(recent.id).unwrap().unwrap();
    assert_eq!(updated.expected_amount, 950.0);
    assert_eq!(updated.source, ChargeSource::Manual);
    assert!(engine.validate_adjustment(recent.id, 950.0).is_err());

    // House 2 pays Jan first (FIFO), then May.
    engine.allocate_payment(2, 9, 1600.0).await.unwrap();
    let paid = maintenance_charge(&engine, 2, may.id);
    let err = engine.reverse_charge(paid.id).unwrap_err();
    assert!(matches!(err, DuesError::Conflict(_)));
    assert!(err.to_string().contains("800.00 of 800.00"));

    let unpaid = maintenance_charge(&engine, 3, may.id);
    let removal = engine.reverse_charge(unpaid.id).unwrap();
    assert_eq!(removal.removed_amount, 800.0);
    assert!(!removal.condoned);
    assert!(engine.store().find_charge(unpaid.id).unwrap().is_none());
}

fn statement_row(day: u32, time: &str, concept: &str, amount: f64) -> RawStatementRow {
    RawStatementRow {
        date: Some(date(2024, 5, day)),
        time: NaiveTime::parse_from_str(time, "%H:%M").ok(),
        concept: concept.to_string(),
        amount,
        currency: "mxn".to_string(),
        is_deposit: true,
    }
}

#[test]
fn test_statement_ingestion_is_idempotent() {
    let engine = community(date(2024, 6, 1));
    let statement = vec![
        statement_row(2, "09:15", "SPEI CASA 12", 800.0),
        statement_row(2, "09:15", "SPEI CASA 12", 800.0),
        statement_row(3, "18:40", "DEPOSITO CASA 7", 1600.0),
        statement_row(6, "", "COMISION", 15.5),
    ];

    let report = engine.ingest_statement(&statement, "BBVA").unwrap();
    println!("First upload: {:?}", report);
    assert_eq!(report.accepted, 3);
    assert_eq!(report.previously_processed, 1);
    assert_eq!(report.discrepancies.len(), 1);
    assert_eq!(report.transactions[0].currency, "MXN");
    assert_eq!(report.transactions[2].time, NaiveTime::MIN);

    let again = engine.ingest_statement(&statement, "BBVA").unwrap();
    assert_eq!(again.accepted, 0);
    assert_eq!(again.previously_processed, 4);

    let mut extended = statement.clone();
    extended.push(statement_row(7, "10:00", "SPEI CASA 3", 800.0));
    let third = engine.ingest_statement(&extended, "BBVA").unwrap();
    assert_eq!(third.accepted, 1);
    assert_eq!(engine.store().all_transactions().unwrap().len(), 4);

    let summary = engine
        .statement_summary(date(2024, 5, 1), date(2024, 5, 31))
        .unwrap();
    assert_eq!(summary.count, 4);
    assert_eq!(summary.total_deposits, 3215.5);
    assert_eq!(summary.by_status.get(&TransactionStatus::Pending), Some(&4));
    assert_eq!(
        engine
            .transactions_by_status(TransactionStatus::Pending, Some(date(2024, 5, 3)), None)
            .unwrap()
            .len(),
        3
    );
}

#[test]
fn test_settings_from_json_feed_the_engine() {
    let settings = EngineSettings::from_json(r#"{"house_count": 2, "mutation_window_months": 1}"#).unwrap();
    assert_eq!(settings.max_pending_periods, 12);
    let store = Arc::new(MemoryStore::new());
    store.insert_config(config(date(2024, 1, 1), None)).unwrap();
    let engine = DuesEngine::new(store, settings).with_today(date(2024, 4, 2));

    let seeded = engine.ensure_period(2024, 1).unwrap();
    assert_eq!(seeded.seed.created, 2);
    assert!(engine.resolve_unpaid_periods(3).is_err());

    let charge = maintenance_charge(&engine, 1, seeded.period.id);
    assert!(matches!(
        engine.validate_adjustment(charge.id, 700.0),
        Err(DuesError::Conflict(_))
    ));
}
