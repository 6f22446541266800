//! `DuesEngine` wires the ledger, resolver, distribution strategies, mutation
//! guards and statement ingestion over a single store backend.

use crate::config::EngineSettings;
use crate::distribution::{distribute, DistributionPlan};
use crate::error::{DuesError, Result};
use crate::ingestion::{IngestionReport, RawStatementRow, StatementIngestor};
use crate::ledger::{ChargeBalance, ChargeLedger, ConceptPaymentDetail, SeedReport};
use crate::llm::{AiDistributionRequest, AiDistributor, ReasoningProvider};
use crate::mutations::{validate_condonation, AdjustmentOutcome, MutationGuard, RemovalOutcome};
use crate::resolver::{total_debt, PendingPeriod, UnpaidPeriodResolver};
use crate::schema::*;
use crate::store::{DuesStore, TransactionSummary};
use crate::utils::{first_day_of_month, round2};
use chrono::{Local, NaiveDate};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Result of `ensure_period`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnsuredPeriod {
    pub period: Period,
    /// False when the period already existed.
    pub created: bool,
    pub seed: SeedReport,
}

/// Result of `allocate_payment`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentApplication {
    pub house_id: HouseId,
    pub record_id: RecordId,
    pub plan: DistributionPlan,
    /// Empty unless the plan was applied.
    pub allocations: Vec<RecordAllocation>,
    pub balance: Option<HouseBalance>,
}

impl PaymentApplication {
    pub fn was_applied(&self) -> bool {
        self.plan.auto_applied
    }
}

pub struct DuesEngine<S: DuesStore> {
    store: Arc<S>,
    settings: EngineSettings,
    ai: AiDistributor,
    today: Option<NaiveDate>,
    house_locks: Mutex<HashMap<HouseId, Arc<Mutex<()>>>>,
}

impl<S: DuesStore> DuesEngine<S> {
    pub fn new(store: Arc<S>, settings: EngineSettings) -> Self {
        let ai = AiDistributor::new(settings.min_auto_confidence, settings.conservation_tolerance);
        Self {
            store,
            settings,
            ai,
            today: None,
            house_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_primary_provider(mut self, provider: Arc<dyn ReasoningProvider>) -> Self {
        self.ai = self.ai.with_primary(provider);
        self
    }

    pub fn with_secondary_provider(mut self, provider: Arc<dyn ReasoningProvider>) -> Self {
        self.ai = self.ai.with_secondary(provider);
        self
    }

    /// Gemini as the primary provider, using the configured model and timeout.
    #[cfg(feature = "gemini")]
    pub fn with_gemini(self, api_key: impl Into<String>) -> Self {
        let provider = crate::llm::GeminiProvider::new(api_key, self.settings.primary_model.clone())
            .with_timeout(self.settings.provider_timeout());
        self.with_primary_provider(Arc::new(provider))
    }

    /// OpenAI as the secondary provider, using the configured model and timeout.
    #[cfg(feature = "openai")]
    pub fn with_openai(self, api_key: impl Into<String>) -> Self {
        let provider =
            crate::llm::OpenAiProvider::new(api_key, self.settings.secondary_model.clone())
                .with_timeout(self.settings.provider_timeout());
        self.with_secondary_provider(Arc::new(provider))
    }

    /// Pins the calendar day used for due dates, mutation windows and
    /// statement validation. Defaults to the local date.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn ledger(&self) -> ChargeLedger<'_, S> {
        ChargeLedger::new(self.store.as_ref())
    }

    fn check_house(&self, house_id: HouseId) -> Result<()> {
        if house_id == 0 || house_id > self.settings.house_count {
            return Err(DuesError::Validation(format!(
                "House {} is outside 1..={}",
                house_id, self.settings.house_count
            )));
        }
        Ok(())
    }

    /// Finds or creates the period for `year`/`month` and seeds its charges
    /// from the config active on the first day of the month.
    pub fn ensure_period(&self, year: i32, month: u32) -> Result<EnsuredPeriod> {
        let start = first_day_of_month(year, month)?;
        let config = self.store.active_config_for(start)?;

        let (period, created) = match self.store.find_period_by_month(year, month)? {
            Some(period) => (period, false),
            None => {
                let period = self
                    .store
                    .create_period(year, month, config.as_ref().map(|c| c.id))?;
                info!("Created period {}", period.display_name());
                (period, true)
            }
        };

        let seed = match self.config_for(&period)? {
            Some(config) => {
                self.ledger()
                    .seed_period_charges(&period, &config, self.settings.house_count)?
            }
            None => {
                warn!(
                    "No active config for {}, charges not seeded",
                    period.display_name()
                );
                SeedReport {
                    period_id: period.id,
                    created: 0,
                    already_seeded: false,
                }
            }
        };

        Ok(EnsuredPeriod {
            period,
            created,
            seed,
        })
    }

    /// Seeds an existing period. A no-op once the period has any charge.
    pub fn seed_period(&self, period_id: PeriodId) -> Result<SeedReport> {
        let period = self.require_period(period_id)?;
        let config = self.require_config(&period)?;
        self.ledger()
            .seed_period_charges(&period, &config, self.settings.house_count)
    }

    pub fn assess_late_penalties(&self, period_id: PeriodId) -> Result<Vec<HousePeriodCharge>> {
        let period = self.require_period(period_id)?;
        let config = self.require_config(&period)?;
        self.ledger().assess_late_penalties(
            &period,
            &config,
            self.settings.house_count,
            self.today(),
        )
    }

    pub fn charge_balance(&self, house_id: HouseId, period_id: PeriodId) -> Result<ChargeBalance> {
        self.require_period(period_id)?;
        self.ledger().balance(house_id, period_id)
    }

    pub fn payment_details(
        &self,
        house_id: HouseId,
        period_id: PeriodId,
    ) -> Result<Vec<ConceptPaymentDetail>> {
        self.require_period(period_id)?;
        self.ledger().payment_details(house_id, period_id)
    }

    fn require_period(&self, period_id: PeriodId) -> Result<Period> {
        self.store
            .find_period(period_id)?
            .ok_or_else(|| DuesError::not_found("Period", period_id))
    }

    /// The config linked to the period, else the one active on its start date.
    fn config_for(&self, period: &Period) -> Result<Option<PeriodConfig>> {
        if let Some(id) = period.config_id {
            if let Some(config) = self.store.find_config(id)? {
                return Ok(Some(config));
            }
        }
        self.store.active_config_for(period.start_date)
    }

    fn require_config(&self, period: &Period) -> Result<PeriodConfig> {
        self.config_for(period)?
            .ok_or_else(|| DuesError::not_found("Config for period", period.display_name()))
    }

    pub fn resolve_unpaid_periods(&self, house_id: HouseId) -> Result<Vec<PendingPeriod>> {
        self.check_house(house_id)?;
        UnpaidPeriodResolver::new(self.store.as_ref(), self.settings.max_pending_periods)
            .resolve(house_id)
    }

    /// Monthly maintenance from the config active today, or the configured
    /// fallback amount.
    fn maintenance_unit(&self) -> Result<f64> {
        Ok(self
            .store
            .active_config_for(self.today())?
            .map_or(self.settings.default_maintenance_amount, |c| {
                c.default_maintenance_amount
            }))
    }

    /// Plans how `amount` should be spread over the house's pending periods
    /// without writing anything. Always returns a plan; when neither strategy
    /// produces one the plan is a manual-review placeholder.
    pub async fn plan_distribution(&self, house_id: HouseId, amount: f64) -> Result<DistributionPlan> {
        let pending = self.resolve_unpaid_periods(house_id)?;
        let unit = self.maintenance_unit()?;
        info!(
            "Planning {:.2} for house {} over {} pending period(s)",
            amount,
            house_id,
            pending.len()
        );

        if let Some(plan) = distribute(amount, unit, &pending) {
            return Ok(plan);
        }
        self.ai_plan(house_id, amount, pending).await
    }

    async fn ai_plan(
        &self,
        house_id: HouseId,
        amount: f64,
        pending: Vec<PendingPeriod>,
    ) -> Result<DistributionPlan> {
        if !self.ai.has_providers() {
            return Ok(DistributionPlan::manual_review(
                amount,
                "Deterministic rules did not apply and no reasoning provider is configured",
            ));
        }

        let credit_balance = self.store.get_or_create_balance(house_id)?.available_credit();
        let request = AiDistributionRequest {
            amount,
            house_id,
            credit_balance,
            total_debt: total_debt(&pending),
            pending_periods: pending,
        };

        Ok(match self.ai.distribute(&request).await {
            Some(plan) => plan,
            None => DistributionPlan::manual_review(
                amount,
                "Deterministic rules did not apply and the AI suggestion was unavailable or invalid",
            ),
        })
    }

    /// Plans and, when the deterministic strategy applies, records the
    /// allocations for payment `record_id`. Planning and writing happen under
    /// a per-house lock so concurrent payments for one house never read the
    /// same pending list. AI plans are returned for review and never applied.
    pub async fn allocate_payment(
        &self,
        house_id: HouseId,
        record_id: RecordId,
        amount: f64,
    ) -> Result<PaymentApplication> {
        self.check_house(house_id)?;
        let pending = match self.apply_deterministic(house_id, record_id, amount)? {
            Ok(application) => return Ok(application),
            Err(pending) => pending,
        };

        let mut plan = self.ai_plan(house_id, amount, pending).await?;
        plan.requires_manual_review = true;
        debug!(
            "Payment {} for house {} left for review ({:?})",
            record_id, house_id, plan.method
        );
        Ok(PaymentApplication {
            house_id,
            record_id,
            plan,
            allocations: Vec::new(),
            balance: None,
        })
    }

    /// Inner `Err` carries the pending list when no deterministic rule applied.
    fn apply_deterministic(
        &self,
        house_id: HouseId,
        record_id: RecordId,
        amount: f64,
    ) -> Result<std::result::Result<PaymentApplication, Vec<PendingPeriod>>> {
        let lock = self.house_lock(house_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| DuesError::Store(format!("lock for house {} poisoned", house_id)))?;

        let pending = self.resolve_unpaid_periods(house_id)?;
        let unit = self.maintenance_unit()?;
        let Some(mut plan) = distribute(amount, unit, &pending) else {
            return Ok(Err(pending));
        };

        let mut allocations = Vec::with_capacity(plan.allocations.len());
        for line in &plan.allocations {
            let already_paid = pending
                .iter()
                .find(|p| p.period_id == line.period_id)
                .map_or(0.0, |p| p.paid_maintenance);
            let allocation = self.store.create_allocation(NewAllocation {
                record_id,
                house_id,
                period_id: line.period_id,
                concept_type: line.concept_type,
                allocated_amount: line.amount,
                expected_amount: line.expected_amount,
                payment_status: PaymentStatus::classify(
                    round2(already_paid + line.amount),
                    line.expected_amount,
                ),
            })?;
            debug!(
                "Allocated {:.2} of payment {} to {} ({:?})",
                line.amount, record_id, line.period_name, allocation.payment_status
            );
            allocations.push(allocation);
        }

        let balance = if plan.remaining_as_credit > 0.0 {
            self.store.add_credit(house_id, plan.remaining_as_credit)?
        } else {
            self.store.get_or_create_balance(house_id)?
        };

        plan.auto_applied = true;
        info!(
            "Applied payment {} for house {}: {:.2} allocated, {:.2} to credit",
            record_id, house_id, plan.total_allocated, plan.remaining_as_credit
        );

        Ok(Ok(PaymentApplication {
            house_id,
            record_id,
            plan,
            allocations,
            balance: Some(balance),
        }))
    }

    fn house_lock(&self, house_id: HouseId) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .house_locks
            .lock()
            .map_err(|_| DuesError::Store("house lock table poisoned".to_string()))?;
        Ok(locks.entry(house_id).or_default().clone())
    }

    fn guard(&self) -> MutationGuard {
        MutationGuard::new(self.today(), self.settings.mutation_window_months)
    }

    fn charge_with_period(&self, charge_id: ChargeId) -> Result<(HousePeriodCharge, Period)> {
        let charge = self
            .store
            .find_charge(charge_id)?
            .ok_or_else(|| DuesError::not_found("Charge", charge_id))?;
        let period = self.require_period(charge.period_id)?;
        Ok((charge, period))
    }

    /// Checks an adjustment without applying it.
    pub fn validate_adjustment(&self, charge_id: ChargeId, new_amount: f64) -> Result<AdjustmentOutcome> {
        let (charge, period) = self.charge_with_period(charge_id)?;
        self.guard().validate_adjustment(&charge, &period, new_amount)
    }

    /// Checks a reversal without applying it.
    pub fn validate_reversal(&self, charge_id: ChargeId) -> Result<RemovalOutcome> {
        let (charge, period) = self.charge_with_period(charge_id)?;
        let paid = self.ledger().paid_against(&charge)?;
        self.guard().validate_reversal(&charge, &period, paid)
    }

    /// Checks a condonation without applying it.
    pub fn validate_condonation(&self, charge_id: ChargeId) -> Result<RemovalOutcome> {
        let (charge, _) = self.charge_with_period(charge_id)?;
        let paid = self.ledger().paid_against(&charge)?;
        validate_condonation(&charge, paid)
    }

    pub fn adjust_charge(&self, charge_id: ChargeId, new_amount: f64) -> Result<AdjustmentOutcome> {
        let outcome = self.validate_adjustment(charge_id, new_amount)?;
        self.store
            .update_expected_amount(charge_id, outcome.new_amount)?;
        info!(
            "Adjusted charge {} from {:.2} to {:.2}",
            charge_id, outcome.previous_amount, outcome.new_amount
        );
        Ok(outcome)
    }

    pub fn reverse_charge(&self, charge_id: ChargeId) -> Result<RemovalOutcome> {
        let outcome = self.validate_reversal(charge_id)?;
        self.store.delete_charge(charge_id)?;
        info!(
            "Reversed {} charge {} ({:.2})",
            outcome.concept_type, charge_id, outcome.removed_amount
        );
        Ok(outcome)
    }

    pub fn condone_penalty(&self, charge_id: ChargeId) -> Result<RemovalOutcome> {
        let outcome = self.validate_condonation(charge_id)?;
        self.store.delete_charge(charge_id)?;
        info!(
            "Condoned penalty {} ({:.2})",
            charge_id, outcome.removed_amount
        );
        Ok(outcome)
    }

    pub fn ingest_statement(
        &self,
        rows: &[RawStatementRow],
        bank_name: &str,
    ) -> Result<IngestionReport> {
        StatementIngestor::new(
            self.store.as_ref(),
            self.settings.reference_window,
            self.settings.large_transaction_threshold,
        )
        .ingest(rows, bank_name, self.today())
    }

    pub fn statement_summary(&self, from: NaiveDate, to: NaiveDate) -> Result<TransactionSummary> {
        if from > to {
            return Err(DuesError::Validation(format!(
                "Summary range starts on {} after it ends on {}",
                from, to
            )));
        }
        self.store.summary(from, to)
    }

    pub fn transactions_by_status(
        &self,
        status: TransactionStatus,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<BankTransaction>> {
        self.store.transactions_by_status(status, from, to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::DistributionMethod;
    use crate::memory::MemoryStore;

    fn engine(today: NaiveDate) -> DuesEngine<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_config(PeriodConfig {
                id: 0,
                default_maintenance_amount: 800.0,
                default_water_amount: Some(150.0),
                default_extraordinary_fee_amount: None,
                payment_due_day: 10,
                late_penalty_amount: 100.0,
                effective_from: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                effective_until: None,
                is_active: true,
            })
            .unwrap();
        let settings = EngineSettings {
            house_count: 3,
            ..EngineSettings::default()
        };
        DuesEngine::new(store, settings).with_today(today)
    }

    #[test]
    fn test_ensure_period_is_idempotent() {
        let engine = engine(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        let first = engine.ensure_period(2024, 1).unwrap();
        assert!(first.created);
        assert_eq!(first.seed.created, 3);

        let second = engine.ensure_period(2024, 1).unwrap();
        assert!(!second.created);
        assert!(second.seed.already_seeded);
        assert_eq!(second.period.id, first.period.id);
    }

    #[test]
    fn test_house_outside_range_rejected() {
        let engine = engine(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert!(matches!(
            engine.resolve_unpaid_periods(4),
            Err(DuesError::Validation(_))
        ));
        assert!(engine.resolve_unpaid_periods(0).is_err());
    }

    #[test]
    fn test_unknown_period_and_charge_are_not_found() {
        let engine = engine(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert!(matches!(
            engine.charge_balance(1, 999),
            Err(DuesError::NotFound { .. })
        ));
        assert!(matches!(
            engine.adjust_charge(999, 10.0),
            Err(DuesError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_plan_without_pending_keeps_credit() {
        let engine = engine(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        let plan = engine.plan_distribution(1, 500.0).await.unwrap();
        assert_eq!(plan.method, DistributionMethod::Deterministic);
        assert_eq!(plan.remaining_as_credit, 500.0);
        assert!(!plan.auto_applied);
    }

    #[tokio::test]
    async fn test_non_positive_amount_needs_review_without_providers() {
        let engine = engine(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        engine.ensure_period(2024, 1).unwrap();
        let application = engine.allocate_payment(1, 7, 0.0).await.unwrap();
        assert!(!application.was_applied());
        assert_eq!(application.plan.method, DistributionMethod::ManualReview);
        assert!(application.allocations.is_empty());
    }

    #[test]
    fn test_summary_range_checked() {
        let engine = engine(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        let from = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(engine.statement_summary(from, to).is_err());
    }
}
