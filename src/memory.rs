use crate::error::{DuesError, Result};
use crate::schema::*;
use crate::store::*;
use crate::utils::{first_day_of_month, last_day_of_month, round2};
use chrono::{Local, NaiveDate};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Inner {
    next_id: i64,
    periods: BTreeMap<PeriodId, Period>,
    configs: BTreeMap<ConfigId, PeriodConfig>,
    charges: BTreeMap<ChargeId, HousePeriodCharge>,
    allocations: Vec<RecordAllocation>,
    overrides: Vec<HousePeriodOverride>,
    balances: BTreeMap<HouseId, HouseBalance>,
    transactions: BTreeMap<TransactionId, BankTransaction>,
    pointers: Vec<IngestionPointer>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Thread-safe in-memory implementation of every store port.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| DuesError::Store("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| DuesError::Store("memory store lock poisoned".to_string()))
    }

    /// Registers a config; the id field of `config` is replaced.
    pub fn insert_config(&self, mut config: PeriodConfig) -> Result<PeriodConfig> {
        let mut inner = self.write()?;
        config.id = inner.next_id();
        inner.configs.insert(config.id, config.clone());
        Ok(config)
    }

    pub fn insert_override(&self, entry: HousePeriodOverride) -> Result<()> {
        let mut inner = self.write()?;
        inner.overrides.retain(|o| {
            !(o.house_id == entry.house_id
                && o.period_id == entry.period_id
                && o.concept_type == entry.concept_type)
        });
        inner.overrides.push(entry);
        Ok(())
    }

    pub fn set_period_flags(
        &self,
        period_id: PeriodId,
        water_active: bool,
        extraordinary_fee_active: bool,
    ) -> Result<Period> {
        let mut inner = self.write()?;
        let period = inner
            .periods
            .get_mut(&period_id)
            .ok_or_else(|| DuesError::not_found("Period", period_id))?;
        period.water_active = water_active;
        period.extraordinary_fee_active = extraordinary_fee_active;
        Ok(period.clone())
    }

    pub fn all_transactions(&self) -> Result<Vec<BankTransaction>> {
        Ok(self.read()?.transactions.values().cloned().collect())
    }

    pub fn all_pointers(&self) -> Result<Vec<IngestionPointer>> {
        Ok(self.read()?.pointers.clone())
    }
}

impl PeriodStore for MemoryStore {
    fn list_periods(&self) -> Result<Vec<Period>> {
        Ok(self.read()?.periods.values().cloned().collect())
    }

    fn find_period(&self, id: PeriodId) -> Result<Option<Period>> {
        Ok(self.read()?.periods.get(&id).cloned())
    }

    fn find_period_by_month(&self, year: i32, month: u32) -> Result<Option<Period>> {
        Ok(self
            .read()?
            .periods
            .values()
            .find(|p| p.year == year && p.month == month)
            .cloned())
    }

    fn create_period(
        &self,
        year: i32,
        month: u32,
        config_id: Option<ConfigId>,
    ) -> Result<Period> {
        let start_date = first_day_of_month(year, month)?;
        let end_date = last_day_of_month(year, month)?;

        let mut inner = self.write()?;
        if inner
            .periods
            .values()
            .any(|p| p.year == year && p.month == month)
        {
            return Err(DuesError::Conflict(format!(
                "Period {}-{:02} already exists",
                year, month
            )));
        }

        let period = Period {
            id: inner.next_id(),
            year,
            month,
            start_date,
            end_date,
            config_id,
            water_active: false,
            extraordinary_fee_active: false,
        };
        inner.periods.insert(period.id, period.clone());
        Ok(period)
    }
}

impl PeriodConfigStore for MemoryStore {
    fn active_config_for(&self, date: NaiveDate) -> Result<Option<PeriodConfig>> {
        // Latest effective_from wins if windows overlap.
        Ok(self
            .read()?
            .configs
            .values()
            .filter(|c| c.covers(date))
            .max_by_key(|c| c.effective_from)
            .cloned())
    }

    fn find_config(&self, id: ConfigId) -> Result<Option<PeriodConfig>> {
        Ok(self.read()?.configs.get(&id).cloned())
    }
}

impl ChargeStore for MemoryStore {
    fn find_charge(&self, id: ChargeId) -> Result<Option<HousePeriodCharge>> {
        Ok(self.read()?.charges.get(&id).cloned())
    }

    fn charges_for_house_period(
        &self,
        house_id: HouseId,
        period_id: PeriodId,
    ) -> Result<Vec<HousePeriodCharge>> {
        Ok(self
            .read()?
            .charges
            .values()
            .filter(|c| c.house_id == house_id && c.period_id == period_id)
            .cloned()
            .collect())
    }

    fn charges_for_period(&self, period_id: PeriodId) -> Result<Vec<HousePeriodCharge>> {
        Ok(self
            .read()?
            .charges
            .values()
            .filter(|c| c.period_id == period_id)
            .cloned()
            .collect())
    }

    fn create_charge(&self, charge: NewCharge) -> Result<HousePeriodCharge> {
        let mut inner = self.write()?;
        let duplicate = inner.charges.values().any(|c| {
            c.house_id == charge.house_id
                && c.period_id == charge.period_id
                && c.concept_type == charge.concept_type
        });
        if duplicate {
            return Err(DuesError::Conflict(format!(
                "Charge for house {} period {} concept {} already exists",
                charge.house_id, charge.period_id, charge.concept_type
            )));
        }

        let created = HousePeriodCharge {
            id: inner.next_id(),
            house_id: charge.house_id,
            period_id: charge.period_id,
            concept_type: charge.concept_type,
            expected_amount: round2(charge.expected_amount),
            source: charge.source,
        };
        inner.charges.insert(created.id, created.clone());
        Ok(created)
    }

    fn update_expected_amount(
        &self,
        id: ChargeId,
        expected_amount: f64,
    ) -> Result<HousePeriodCharge> {
        let mut inner = self.write()?;
        let charge = inner
            .charges
            .get_mut(&id)
            .ok_or_else(|| DuesError::not_found("Charge", id))?;
        charge.expected_amount = round2(expected_amount);
        charge.source = ChargeSource::Manual;
        Ok(charge.clone())
    }

    fn delete_charge(&self, id: ChargeId) -> Result<()> {
        self.write()?
            .charges
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| DuesError::not_found("Charge", id))
    }
}

impl AllocationStore for MemoryStore {
    fn allocations_for_house_period(
        &self,
        house_id: HouseId,
        period_id: PeriodId,
    ) -> Result<Vec<RecordAllocation>> {
        Ok(self
            .read()?
            .allocations
            .iter()
            .filter(|a| a.house_id == house_id && a.period_id == period_id)
            .cloned()
            .collect())
    }

    fn create_allocation(&self, allocation: NewAllocation) -> Result<RecordAllocation> {
        let mut inner = self.write()?;
        let created = RecordAllocation {
            id: inner.next_id(),
            record_id: allocation.record_id,
            house_id: allocation.house_id,
            period_id: allocation.period_id,
            concept_type: allocation.concept_type,
            allocated_amount: round2(allocation.allocated_amount),
            expected_amount: round2(allocation.expected_amount),
            payment_status: allocation.payment_status,
        };
        inner.allocations.push(created.clone());
        Ok(created)
    }
}

impl OverrideStore for MemoryStore {
    fn find_override(
        &self,
        house_id: HouseId,
        period_id: PeriodId,
        concept: ConceptType,
    ) -> Result<Option<HousePeriodOverride>> {
        Ok(self
            .read()?
            .overrides
            .iter()
            .find(|o| o.house_id == house_id && o.period_id == period_id && o.concept_type == concept)
            .cloned())
    }
}

impl HouseBalanceStore for MemoryStore {
    fn get_or_create_balance(&self, house_id: HouseId) -> Result<HouseBalance> {
        let mut inner = self.write()?;
        Ok(inner
            .balances
            .entry(house_id)
            .or_insert_with(|| HouseBalance::new(house_id))
            .clone())
    }

    fn add_credit(&self, house_id: HouseId, amount: f64) -> Result<HouseBalance> {
        let mut inner = self.write()?;
        let balance = inner
            .balances
            .entry(house_id)
            .or_insert_with(|| HouseBalance::new(house_id));
        balance.add_credit(amount);
        Ok(balance.clone())
    }

    fn add_debit(&self, house_id: HouseId, amount: f64) -> Result<HouseBalance> {
        let mut inner = self.write()?;
        let balance = inner
            .balances
            .entry(house_id)
            .or_insert_with(|| HouseBalance::new(house_id));
        balance.add_debit(amount);
        Ok(balance.clone())
    }
}

impl BankTransactionStore for MemoryStore {
    fn find_transaction(&self, id: TransactionId) -> Result<Option<BankTransaction>> {
        Ok(self.read()?.transactions.get(&id).cloned())
    }

    fn transactions_on(&self, date: NaiveDate, bank_name: &str) -> Result<Vec<BankTransaction>> {
        Ok(self
            .read()?
            .transactions
            .values()
            .filter(|t| t.date == date && t.bank_name == bank_name)
            .cloned()
            .collect())
    }

    fn create_transactions(&self, rows: Vec<NewBankTransaction>) -> Result<Vec<BankTransaction>> {
        let mut inner = self.write()?;
        let mut created = Vec::with_capacity(rows.len());
        for row in rows {
            let transaction = BankTransaction {
                id: inner.next_id(),
                date: row.date,
                time: row.time,
                concept: row.concept,
                amount: row.amount,
                currency: row.currency,
                is_deposit: row.is_deposit,
                bank_name: row.bank_name,
                status: TransactionStatus::Pending,
            };
            inner.transactions.insert(transaction.id, transaction.clone());
            created.push(transaction);
        }
        Ok(created)
    }

    fn transactions_by_status(
        &self,
        status: TransactionStatus,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<BankTransaction>> {
        Ok(self
            .read()?
            .transactions
            .values()
            .filter(|t| t.status == status)
            .filter(|t| from.map_or(true, |from| t.date >= from))
            .filter(|t| to.map_or(true, |to| t.date <= to))
            .cloned()
            .collect())
    }

    fn summary(&self, from: NaiveDate, to: NaiveDate) -> Result<TransactionSummary> {
        let inner = self.read()?;
        let mut summary = TransactionSummary::default();
        for t in inner
            .transactions
            .values()
            .filter(|t| t.date >= from && t.date <= to)
        {
            summary.count += 1;
            if t.is_deposit {
                summary.total_deposits += t.amount;
            } else {
                summary.total_withdrawals += t.amount;
            }
            *summary.by_status.entry(t.status).or_default() += 1;
        }
        summary.total_deposits = round2(summary.total_deposits);
        summary.total_withdrawals = round2(summary.total_withdrawals);
        Ok(summary)
    }
}

impl IngestionPointerStore for MemoryStore {
    fn append_pointer(&self, transaction_id: TransactionId) -> Result<IngestionPointer> {
        let mut inner = self.write()?;
        if !inner.transactions.contains_key(&transaction_id) {
            return Err(DuesError::not_found("Bank transaction", transaction_id));
        }
        let pointer = IngestionPointer {
            id: inner.next_id(),
            transaction_id,
            created_at: Local::now().naive_local(),
        };
        inner.pointers.push(pointer.clone());
        Ok(pointer)
    }

    fn recent_pointers(&self, limit: usize) -> Result<Vec<(IngestionPointer, BankTransaction)>> {
        let inner = self.read()?;
        // Insertion order is append order, so walk backwards.
        Ok(inner
            .pointers
            .iter()
            .rev()
            .filter_map(|p| {
                inner
                    .transactions
                    .get(&p.transaction_id)
                    .map(|t| (p.clone(), t.clone()))
            })
            .take(limit)
            .collect())
    }
}
