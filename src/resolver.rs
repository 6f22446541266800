use crate::error::Result;
use crate::schema::{ConceptType, HouseId, PeriodId};
use crate::store::{AllocationStore, OverrideStore, PeriodConfigStore, PeriodStore};
use crate::utils::round2;
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A period where the house still owes maintenance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct PendingPeriod {
    pub period_id: PeriodId,
    pub year: i32,
    pub month: u32,
    pub display_name: String,
    pub expected_maintenance: f64,
    pub paid_maintenance: f64,
    pub pending_maintenance: f64,
}

impl PendingPeriod {
    /// Convenience constructor for a period with nothing paid yet.
    pub fn unpaid(period_id: PeriodId, year: i32, month: u32, expected: f64) -> Self {
        Self {
            period_id,
            year,
            month,
            display_name: crate::utils::period_display_name(year, month),
            expected_maintenance: expected,
            paid_maintenance: 0.0,
            pending_maintenance: expected,
        }
    }
}

pub struct UnpaidPeriodResolver<'a, S: ?Sized> {
    store: &'a S,
    max_pending: usize,
}

impl<'a, S> UnpaidPeriodResolver<'a, S>
where
    S: PeriodStore + PeriodConfigStore + OverrideStore + AllocationStore + ?Sized,
{
    pub fn new(store: &'a S, max_pending: usize) -> Self {
        Self { store, max_pending }
    }

    /// Oldest-first list of periods with maintenance still owed, capped at
    /// `max_pending` entries. Periods without an active config are skipped.
    pub fn resolve(&self, house_id: HouseId) -> Result<Vec<PendingPeriod>> {
        let mut periods = self.store.list_periods()?;
        periods.sort_by_key(|p| p.key());

        let mut pending = Vec::new();
        for period in periods {
            if pending.len() >= self.max_pending {
                break;
            }

            let Some(config) = self.store.active_config_for(period.start_date)? else {
                debug!(
                    "No active config for {}, skipping for house {}",
                    period.display_name(),
                    house_id
                );
                continue;
            };

            let expected = self.store.applicable_amount(
                house_id,
                period.id,
                ConceptType::Maintenance,
                config.default_maintenance_amount,
            )?;

            let paid: f64 = self
                .store
                .allocations_for_house_period(house_id, period.id)?
                .iter()
                .filter(|a| a.concept_type == ConceptType::Maintenance)
                .map(|a| a.allocated_amount)
                .sum();

            let outstanding = round2((expected - paid).max(0.0));
            if outstanding > 0.0 {
                pending.push(PendingPeriod {
                    period_id: period.id,
                    year: period.year,
                    month: period.month,
                    display_name: period.display_name(),
                    expected_maintenance: round2(expected),
                    paid_maintenance: round2(paid),
                    pending_maintenance: outstanding,
                });
            }
        }

        debug!(
            "House {} has {} pending periods (cap {})",
            house_id,
            pending.len(),
            self.max_pending
        );
        Ok(pending)
    }
}

/// Sum of what is still owed across a pending list.
pub fn total_debt(pending: &[PendingPeriod]) -> f64 {
    round2(pending.iter().map(|p| p.pending_maintenance).sum())
}
