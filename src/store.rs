//! Persistence ports. The engine only talks to storage through these traits;
//! `MemoryStore` is the reference implementation.

use crate::error::Result;
use crate::schema::*;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub trait PeriodStore: Send + Sync {
    fn list_periods(&self) -> Result<Vec<Period>>;
    fn find_period(&self, id: PeriodId) -> Result<Option<Period>>;
    fn find_period_by_month(&self, year: i32, month: u32) -> Result<Option<Period>>;
    fn create_period(
        &self,
        year: i32,
        month: u32,
        config_id: Option<ConfigId>,
    ) -> Result<Period>;
}

pub trait PeriodConfigStore: Send + Sync {
    fn active_config_for(&self, date: NaiveDate) -> Result<Option<PeriodConfig>>;
    fn find_config(&self, id: ConfigId) -> Result<Option<PeriodConfig>>;
}

pub trait ChargeStore: Send + Sync {
    fn find_charge(&self, id: ChargeId) -> Result<Option<HousePeriodCharge>>;
    fn charges_for_house_period(
        &self,
        house_id: HouseId,
        period_id: PeriodId,
    ) -> Result<Vec<HousePeriodCharge>>;
    fn charges_for_period(&self, period_id: PeriodId) -> Result<Vec<HousePeriodCharge>>;
    fn create_charge(&self, charge: NewCharge) -> Result<HousePeriodCharge>;
    fn create_charges(&self, charges: Vec<NewCharge>) -> Result<Vec<HousePeriodCharge>> {
        charges
            .into_iter()
            .map(|charge| self.create_charge(charge))
            .collect()
    }
    fn update_expected_amount(&self, id: ChargeId, expected_amount: f64)
        -> Result<HousePeriodCharge>;
    fn delete_charge(&self, id: ChargeId) -> Result<()>;
    fn sum_expected(&self, house_id: HouseId, period_id: PeriodId) -> Result<f64> {
        Ok(self
            .charges_for_house_period(house_id, period_id)?
            .iter()
            .map(|c| c.expected_amount)
            .sum())
    }
}

pub trait AllocationStore: Send + Sync {
    fn allocations_for_house_period(
        &self,
        house_id: HouseId,
        period_id: PeriodId,
    ) -> Result<Vec<RecordAllocation>>;
    fn create_allocation(&self, allocation: NewAllocation) -> Result<RecordAllocation>;
    fn sum_allocated(&self, house_id: HouseId, period_id: PeriodId) -> Result<f64> {
        Ok(self
            .allocations_for_house_period(house_id, period_id)?
            .iter()
            .map(|a| a.allocated_amount)
            .sum())
    }
}

pub trait OverrideStore: Send + Sync {
    /// The amount owed for the concept: the house override when one exists,
    /// otherwise `default_amount`.
    fn applicable_amount(
        &self,
        house_id: HouseId,
        period_id: PeriodId,
        concept: ConceptType,
        default_amount: f64,
    ) -> Result<f64> {
        Ok(self
            .find_override(house_id, period_id, concept)?
            .map_or(default_amount, |o| o.custom_amount))
    }
    fn find_override(
        &self,
        house_id: HouseId,
        period_id: PeriodId,
        concept: ConceptType,
    ) -> Result<Option<HousePeriodOverride>>;
}

pub trait HouseBalanceStore: Send + Sync {
    fn get_or_create_balance(&self, house_id: HouseId) -> Result<HouseBalance>;
    fn add_credit(&self, house_id: HouseId, amount: f64) -> Result<HouseBalance>;
    fn add_debit(&self, house_id: HouseId, amount: f64) -> Result<HouseBalance>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TransactionSummary {
    pub count: usize,
    pub total_deposits: f64,
    pub total_withdrawals: f64,
    pub by_status: HashMap<TransactionStatus, usize>,
}

pub trait BankTransactionStore: Send + Sync {
    fn find_transaction(&self, id: TransactionId) -> Result<Option<BankTransaction>>;
    fn transactions_on(&self, date: NaiveDate, bank_name: &str) -> Result<Vec<BankTransaction>>;
    fn create_transactions(&self, rows: Vec<NewBankTransaction>) -> Result<Vec<BankTransaction>>;
    fn transactions_by_status(
        &self,
        status: TransactionStatus,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<BankTransaction>>;
    fn summary(&self, from: NaiveDate, to: NaiveDate) -> Result<TransactionSummary>;
}

pub trait IngestionPointerStore: Send + Sync {
    fn append_pointer(&self, transaction_id: TransactionId) -> Result<IngestionPointer>;
    /// Most recent first, each paired with the transaction it references.
    fn recent_pointers(&self, limit: usize) -> Result<Vec<(IngestionPointer, BankTransaction)>>;
}

/// Bundle of every store the engine depends on, so one backend can be handed
/// over as a single value.
pub trait DuesStore:
    PeriodStore
    + PeriodConfigStore
    + ChargeStore
    + AllocationStore
    + OverrideStore
    + HouseBalanceStore
    + BankTransactionStore
    + IngestionPointerStore
{
}

impl<T> DuesStore for T where
    T: PeriodStore
        + PeriodConfigStore
        + ChargeStore
        + AllocationStore
        + OverrideStore
        + HouseBalanceStore
        + BankTransactionStore
        + IngestionPointerStore
{
}
