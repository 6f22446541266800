//! Guards for changing charges after they were seeded. Each check is pure:
//! it only decides, the caller performs the mutation when it passes.

use crate::error::{DuesError, Result};
use crate::schema::{ConceptType, HousePeriodCharge, Period};
use crate::utils::{months_between, round2};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdjustmentOutcome {
    pub charge_id: i64,
    pub previous_amount: f64,
    pub new_amount: f64,
    /// `new_amount - previous_amount`
    pub difference: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemovalOutcome {
    pub charge_id: i64,
    pub concept_type: ConceptType,
    pub removed_amount: f64,
    pub condoned: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct MutationGuard {
    today: NaiveDate,
    window_months: i32,
}

impl MutationGuard {
    pub fn new(today: NaiveDate, window_months: i32) -> Self {
        Self {
            today,
            window_months,
        }
    }

    pub fn validate_adjustment(
        &self,
        charge: &HousePeriodCharge,
        period: &Period,
        new_amount: f64,
    ) -> Result<AdjustmentOutcome> {
        if !new_amount.is_finite() || new_amount < 0.0 {
            return Err(DuesError::Validation(format!(
                "Charge {} cannot be adjusted to {:.2}: amount must not be negative",
                charge.id, new_amount
            )));
        }
        if (new_amount - charge.expected_amount).abs() < 0.01 {
            return Err(DuesError::Validation(format!(
                "Charge {} already expects {:.2}; adjustment to {:.2} changes nothing",
                charge.id, charge.expected_amount, new_amount
            )));
        }
        self.check_window(charge, period, "adjusted")?;

        Ok(AdjustmentOutcome {
            charge_id: charge.id,
            previous_amount: charge.expected_amount,
            new_amount: round2(new_amount),
            difference: round2(new_amount - charge.expected_amount),
        })
    }

    pub fn validate_reversal(
        &self,
        charge: &HousePeriodCharge,
        period: &Period,
        paid_amount: f64,
    ) -> Result<RemovalOutcome> {
        self.check_window(charge, period, "reversed")?;
        if paid_amount > 0.0 {
            return Err(DuesError::Conflict(format!(
                "Charge {} ({} for {}) cannot be reversed: {:.2} of {:.2} has already been paid",
                charge.id,
                charge.concept_type,
                period.display_name(),
                paid_amount,
                charge.expected_amount
            )));
        }

        Ok(RemovalOutcome {
            charge_id: charge.id,
            concept_type: charge.concept_type,
            removed_amount: charge.expected_amount,
            condoned: false,
        })
    }

    fn check_window(&self, charge: &HousePeriodCharge, period: &Period, action: &str) -> Result<()> {
        let age = months_between(period.start_date, self.today);
        if age > self.window_months {
            return Err(DuesError::Conflict(format!(
                "Charge {} for {} cannot be {}: the period is {} months old, limit is {} (today {})",
                charge.id,
                period.display_name(),
                action,
                age,
                self.window_months,
                self.today
            )));
        }
        Ok(())
    }
}

/// Penalties may be forgiven at any age, as long as nothing was paid on them.
pub fn validate_condonation(charge: &HousePeriodCharge, paid_amount: f64) -> Result<RemovalOutcome> {
    if charge.concept_type != ConceptType::Penalties {
        return Err(DuesError::Validation(format!(
            "Charge {} is a {} charge; only penalties can be condoned",
            charge.id, charge.concept_type
        )));
    }
    if paid_amount > 0.0 {
        return Err(DuesError::Conflict(format!(
            "Penalty {} cannot be condoned: {:.2} of {:.2} has already been paid",
            charge.id, paid_amount, charge.expected_amount
        )));
    }

    Ok(RemovalOutcome {
        charge_id: charge.id,
        concept_type: charge.concept_type,
        removed_amount: charge.expected_amount,
        condoned: true,
    })
}
