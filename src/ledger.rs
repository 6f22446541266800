use crate::error::{DuesError, Result};
use crate::schema::*;
use crate::store::{AllocationStore, ChargeStore, OverrideStore};
use crate::utils::{due_date, round2};
use chrono::NaiveDate;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChargeBalance {
    pub house_id: HouseId,
    pub period_id: PeriodId,
    pub total_expected: f64,
    pub total_paid: f64,
    pub balance: f64,
    pub is_paid: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConceptPaymentDetail {
    pub concept_type: ConceptType,
    pub expected_amount: f64,
    pub paid_amount: f64,
    pub balance: f64,
    pub is_paid: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SeedReport {
    pub period_id: PeriodId,
    pub created: usize,
    /// True when the period already had charges and nothing was written.
    pub already_seeded: bool,
}

/// Read model over charges and allocations, plus the write paths that create
/// charges (seeding and penalties).
pub struct ChargeLedger<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: ?Sized> ChargeLedger<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }
}

impl<'a, S> ChargeLedger<'a, S>
where
    S: ChargeStore + AllocationStore + ?Sized,
{
    /// A period counts as charged once any charge row exists for it.
    pub fn is_fully_charged(&self, period_id: PeriodId) -> Result<bool> {
        Ok(!self.store.charges_for_period(period_id)?.is_empty())
    }

    pub fn total_expected(&self, house_id: HouseId, period_id: PeriodId) -> Result<f64> {
        Ok(round2(self.store.sum_expected(house_id, period_id)?))
    }

    pub fn total_paid(&self, house_id: HouseId, period_id: PeriodId) -> Result<f64> {
        Ok(round2(self.store.sum_allocated(house_id, period_id)?))
    }

    pub fn balance(&self, house_id: HouseId, period_id: PeriodId) -> Result<ChargeBalance> {
        self.require_charged(period_id)?;

        let total_expected = self.total_expected(house_id, period_id)?;
        let total_paid = self.total_paid(house_id, period_id)?;
        let balance = round2(total_expected - total_paid);

        Ok(ChargeBalance {
            house_id,
            period_id,
            total_expected,
            total_paid,
            balance,
            is_paid: balance <= 0.0,
        })
    }

    /// Per-concept breakdown. Concepts that only have allocations (no charge)
    /// appear with an expected amount of zero.
    pub fn payment_details(
        &self,
        house_id: HouseId,
        period_id: PeriodId,
    ) -> Result<Vec<ConceptPaymentDetail>> {
        self.require_charged(period_id)?;

        let mut expected: BTreeMap<ConceptType, f64> = BTreeMap::new();
        for charge in self.store.charges_for_house_period(house_id, period_id)? {
            *expected.entry(charge.concept_type).or_default() += charge.expected_amount;
        }

        let mut paid: BTreeMap<ConceptType, f64> = BTreeMap::new();
        for allocation in self.store.allocations_for_house_period(house_id, period_id)? {
            *paid.entry(allocation.concept_type).or_default() += allocation.allocated_amount;
        }

        let mut concepts: Vec<ConceptType> = expected.keys().chain(paid.keys()).copied().collect();
        concepts.sort();
        concepts.dedup();

        Ok(concepts
            .into_iter()
            .map(|concept| {
                let expected_amount = round2(expected.get(&concept).copied().unwrap_or(0.0));
                let paid_amount = round2(paid.get(&concept).copied().unwrap_or(0.0));
                let balance = round2(expected_amount - paid_amount);
                ConceptPaymentDetail {
                    concept_type: concept,
                    expected_amount,
                    paid_amount,
                    balance,
                    is_paid: balance <= 0.0,
                }
            })
            .collect())
    }

    /// Amount already allocated against one specific charge.
    pub fn paid_against(&self, charge: &HousePeriodCharge) -> Result<f64> {
        Ok(round2(
            self.store
                .allocations_for_house_period(charge.house_id, charge.period_id)?
                .iter()
                .filter(|a| a.concept_type == charge.concept_type)
                .map(|a| a.allocated_amount)
                .sum(),
        ))
    }

    fn require_charged(&self, period_id: PeriodId) -> Result<()> {
        if self.is_fully_charged(period_id)? {
            Ok(())
        } else {
            Err(DuesError::not_found(
                "Charges for period",
                format!("{} (period has not been seeded)", period_id),
            ))
        }
    }
}

impl<'a, S> ChargeLedger<'a, S>
where
    S: ChargeStore + AllocationStore + OverrideStore + ?Sized,
{
    /// Creates the charge snapshot for every house. A period that already has
    /// charges is left untouched.
    pub fn seed_period_charges(
        &self,
        period: &Period,
        config: &PeriodConfig,
        house_count: u32,
    ) -> Result<SeedReport> {
        if self.is_fully_charged(period.id)? {
            debug!("Period {} already seeded, skipping", period.display_name());
            return Ok(SeedReport {
                period_id: period.id,
                created: 0,
                already_seeded: true,
            });
        }

        let mut concepts = vec![ConceptType::Maintenance];
        if period.water_active {
            concepts.push(ConceptType::Water);
        }
        if period.extraordinary_fee_active {
            concepts.push(ConceptType::ExtraordinaryFee);
        }

        let mut pending = Vec::new();
        for house_id in 1..=house_count {
            for &concept in &concepts {
                let charge = match self.store.find_override(house_id, period.id, concept)? {
                    Some(o) => NewCharge {
                        house_id,
                        period_id: period.id,
                        concept_type: concept,
                        expected_amount: o.custom_amount,
                        source: ChargeSource::Override,
                    },
                    None => {
                        let Some(default_amount) = config.default_amount(concept) else {
                            debug!(
                                "Config {} has no default for {}, not charging house {}",
                                config.id, concept, house_id
                            );
                            continue;
                        };
                        NewCharge {
                            house_id,
                            period_id: period.id,
                            concept_type: concept,
                            expected_amount: default_amount,
                            source: ChargeSource::Config,
                        }
                    }
                };
                pending.push(charge);
            }
        }

        let created = self.store.create_charges(pending)?.len();
        info!(
            "Seeded {} charges for {} across {} houses",
            created,
            period.display_name(),
            house_count
        );

        Ok(SeedReport {
            period_id: period.id,
            created,
            already_seeded: false,
        })
    }

    /// Adds a penalty charge to every house whose maintenance for `period` is
    /// still owed after the due day. Houses already penalised are skipped.
    pub fn assess_late_penalties(
        &self,
        period: &Period,
        config: &PeriodConfig,
        house_count: u32,
        today: NaiveDate,
    ) -> Result<Vec<HousePeriodCharge>> {
        let due = due_date(period.year, period.month, config.payment_due_day)?;
        if today <= due || config.late_penalty_amount <= 0.0 {
            return Ok(Vec::new());
        }

        let mut created = Vec::new();
        for house_id in 1..=house_count {
            let charges = self.store.charges_for_house_period(house_id, period.id)?;
            if charges
                .iter()
                .any(|c| c.concept_type == ConceptType::Penalties)
            {
                continue;
            }
            let Some(maintenance) = charges
                .iter()
                .find(|c| c.concept_type == ConceptType::Maintenance)
            else {
                continue;
            };

            let paid = self.paid_against(maintenance)?;
            if paid + 0.01 >= maintenance.expected_amount {
                continue;
            }

            debug!(
                "House {} owes {:.2} for {} past due {}, adding penalty",
                house_id,
                maintenance.expected_amount - paid,
                period.display_name(),
                due
            );
            created.push(self.store.create_charge(NewCharge {
                house_id,
                period_id: period.id,
                concept_type: ConceptType::Penalties,
                expected_amount: config.late_penalty_amount,
                source: ChargeSource::Config,
            })?);
        }

        if !created.is_empty() {
            info!(
                "Assessed {} late penalties for {}",
                created.len(),
                period.display_name()
            );
        }
        Ok(created)
    }
}
