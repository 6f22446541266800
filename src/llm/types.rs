use crate::distribution::Confidence;
use crate::resolver::PendingPeriod;
use crate::schema::{ConceptType, HouseId, PeriodId};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Everything a reasoning service is told about a payment it must split.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiDistributionRequest {
    pub amount: f64,
    pub house_id: HouseId,
    pub credit_balance: f64,
    pub total_debt: f64,
    pub pending_periods: Vec<PendingPeriod>,
}

/// Provider-agnostic call: prompts plus the JSON schema the answer must follow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReasoningRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub response_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct AiAllocation {
    #[schemars(description = "Id of the pending period receiving money. Must be one of the ids listed in the request.")]
    pub period_id: PeriodId,

    #[schemars(description = "Charge concept the money discharges. Use 'maintenance' unless told otherwise.")]
    pub concept_type: ConceptType,

    #[schemars(description = "Amount applied to this period, positive, two decimals at most.")]
    pub amount: f64,

    #[schemars(description = "One sentence explaining this allocation.")]
    pub reasoning: String,
}

/// Shape of the structured answer. Only used after sanitization; raw model
/// output is never deserialized straight into it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct AiDistributionResponse {
    #[schemars(description = "Allocations ordered from the oldest period to the newest.")]
    pub allocations: Vec<AiAllocation>,

    #[schemars(description = "How sure you are that this split matches the payer's intent.")]
    pub confidence: Confidence,

    #[schemars(description = "Overall explanation of the split.")]
    pub reasoning: String,

    #[schemars(description = "Sum of all allocation amounts.")]
    pub total_allocated: f64,

    #[schemars(description = "Part of the payment not allocated, kept as credit for the house.")]
    pub remaining_as_credit: f64,
}

impl AiDistributionResponse {
    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(AiDistributionResponse)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectionReason {
    /// The text could not be read as a JSON object at all.
    Malformed(String),
    /// Allocations plus credit do not add up to the payment.
    NotConserved {
        total_allocated: f64,
        remaining_as_credit: f64,
        requested: f64,
    },
    /// The model reported a negative credit to balance an over-allocation.
    NegativeCredit(f64),
    /// Allocations alone exceed the payment.
    OverAllocated { total_allocated: f64, requested: f64 },
    UnknownPeriod(PeriodId),
    DuplicatePeriod(PeriodId),
    NonPositiveAmount { period_id: PeriodId, amount: f64 },
    /// More was allocated to a period than it still owes.
    ExceedsPending {
        period_id: PeriodId,
        amount: f64,
        pending: f64,
    },
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(detail) => write!(f, "malformed response: {}", detail),
            Self::NotConserved {
                total_allocated,
                remaining_as_credit,
                requested,
            } => write!(
                f,
                "allocated {:.2} + credit {:.2} does not reconcile with payment {:.2}",
                total_allocated, remaining_as_credit, requested
            ),
            Self::NegativeCredit(credit) => {
                write!(f, "remaining credit {:.2} is negative", credit)
            }
            Self::OverAllocated {
                total_allocated,
                requested,
            } => write!(
                f,
                "allocated {:.2} exceeds the payment of {:.2}",
                total_allocated, requested
            ),
            Self::UnknownPeriod(id) => write!(f, "period {} is not pending for this house", id),
            Self::DuplicatePeriod(id) => write!(f, "period {} is allocated more than once", id),
            Self::NonPositiveAmount { period_id, amount } => {
                write!(f, "allocation of {:.2} to period {} is not positive", amount, period_id)
            }
            Self::ExceedsPending {
                period_id,
                amount,
                pending,
            } => write!(
                f,
                "allocation of {:.2} to period {} exceeds the {:.2} still owed",
                amount, period_id, pending
            ),
        }
    }
}

/// Result of the parse-with-defaults step: either a sanitized response whose
/// totals were recomputed, or the first rule it broke.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedResponse {
    Accepted(AiDistributionResponse),
    Rejected(RejectionReason),
}
