//! Deterministic FIFO distribution of a payment over pending periods.
//!
//! All arithmetic runs in integer cents so that `total_allocated +
//! remaining_as_credit` always reproduces the payment exactly.

use crate::resolver::PendingPeriod;
use crate::schema::{ConceptType, PeriodId};
use crate::utils::{from_cents, round2, to_cents};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn level(self) -> u8 {
        match self {
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }

    /// Whether a plan at this confidence may skip manual review.
    pub fn meets(self, minimum: Confidence) -> bool {
        self.level() >= minimum.level()
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DistributionMethod {
    Deterministic,
    AiAssisted,
    /// Neither strategy produced a usable plan.
    ManualReview,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannedAllocation {
    pub period_id: PeriodId,
    pub period_name: String,
    pub concept_type: ConceptType,
    pub amount: f64,
    pub expected_amount: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DistributionPlan {
    pub amount: f64,
    pub allocations: Vec<PlannedAllocation>,
    pub total_allocated: f64,
    pub remaining_as_credit: f64,
    pub confidence: Confidence,
    pub method: DistributionMethod,
    pub reasoning: String,
    pub requires_manual_review: bool,
    /// Reserved for a later confirmation step; planning never sets it.
    pub auto_applied: bool,
}

impl DistributionPlan {
    /// A placeholder plan telling the caller a human has to decide.
    pub fn manual_review(amount: f64, reasoning: impl Into<String>) -> Self {
        Self {
            amount: round2(amount),
            allocations: Vec::new(),
            total_allocated: 0.0,
            remaining_as_credit: round2(amount),
            confidence: Confidence::Low,
            method: DistributionMethod::ManualReview,
            reasoning: reasoning.into(),
            requires_manual_review: true,
            auto_applied: false,
        }
    }

    /// `total_allocated + remaining_as_credit == amount` within `tolerance`.
    pub fn is_conserved(&self, tolerance: f64) -> bool {
        crate::utils::amounts_match(
            self.total_allocated + self.remaining_as_credit,
            self.amount,
            tolerance,
        )
    }
}

/// Plans a payment of `amount` against `pending` (oldest first) given the
/// standard per-period maintenance `unit`. Returns `None` when no rule
/// applies and the decision has to be deferred.
pub fn distribute(amount: f64, unit: f64, pending: &[PendingPeriod]) -> Option<DistributionPlan> {
    if !amount.is_finite() || !unit.is_finite() {
        return None;
    }
    let amount_cents = to_cents(amount);
    let unit_cents = to_cents(unit);
    if amount_cents <= 0 || unit_cents <= 0 {
        return None;
    }

    if pending.is_empty() {
        return Some(build_plan(
            amount_cents,
            Vec::new(),
            Confidence::High,
            "No pending periods; the full payment is kept as credit".to_string(),
        ));
    }

    if amount_cents % unit_cents == 0 {
        let periods = (amount_cents / unit_cents) as usize;
        let lines = pending
            .iter()
            .take(periods)
            .map(|p| {
                let cents = unit_cents.min(to_cents(p.pending_maintenance));
                (p, cents, "Exact multiple of the monthly fee, oldest period first")
            })
            .collect();
        return Some(build_plan(
            amount_cents,
            lines,
            Confidence::High,
            format!(
                "Payment covers exactly {} monthly fee(s) of {:.2}",
                periods,
                from_cents(unit_cents)
            ),
        ));
    }

    if amount_cents >= unit_cents {
        let full = amount_cents / unit_cents;
        let remainder = amount_cents % unit_cents;
        let mut remaining = amount_cents;
        let mut lines = Vec::new();
        for p in pending {
            if remaining <= 0 {
                break;
            }
            let cents = remaining.min(to_cents(p.pending_maintenance));
            if cents <= 0 {
                continue;
            }
            remaining -= cents;
            lines.push((p, cents, "Filled oldest-first until the payment ran out"));
        }
        return Some(build_plan(
            amount_cents,
            lines,
            Confidence::High,
            format!(
                "Payment covers {} full monthly fee(s) plus a partial {:.2}",
                full,
                from_cents(remainder)
            ),
        ));
    }

    // 0 < amount < unit
    let oldest = &pending[0];
    let cents = amount_cents.min(to_cents(oldest.pending_maintenance));
    Some(build_plan(
        amount_cents,
        vec![(oldest, cents, "Partial payment applied to the oldest period")],
        Confidence::Medium,
        format!(
            "Partial payment below the monthly fee, applied to {}",
            oldest.display_name
        ),
    ))
}

fn build_plan(
    amount_cents: i64,
    lines: Vec<(&PendingPeriod, i64, &str)>,
    confidence: Confidence,
    reasoning: String,
) -> DistributionPlan {
    let allocations: Vec<PlannedAllocation> = lines
        .into_iter()
        .filter(|(_, cents, _)| *cents > 0)
        .map(|(p, cents, why)| PlannedAllocation {
            period_id: p.period_id,
            period_name: p.display_name.clone(),
            concept_type: ConceptType::Maintenance,
            amount: from_cents(cents),
            expected_amount: p.expected_maintenance,
            reasoning: why.to_string(),
        })
        .collect();

    let allocated_cents: i64 = allocations.iter().map(|a| to_cents(a.amount)).sum();

    DistributionPlan {
        amount: from_cents(amount_cents),
        allocations,
        total_allocated: from_cents(allocated_cents),
        remaining_as_credit: from_cents(amount_cents - allocated_cents),
        confidence,
        method: DistributionMethod::Deterministic,
        reasoning,
        requires_manual_review: false,
        auto_applied: false,
    }
}
