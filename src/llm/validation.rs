use crate::distribution::Confidence;
use crate::llm::types::*;
use crate::llm::utils::{clean_json_output, integer_or_zero, number_or_zero, string_or_empty};
use crate::schema::ConceptType;
use crate::utils::{round2, to_cents, from_cents};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Sanitizes raw model text and checks it against the accounting rules.
///
/// Nothing in here returns an error: a model that answers nonsense yields
/// `ParsedResponse::Rejected` and the caller falls back to manual review.
///
/// Rules, in order:
/// 1. every field is coerced (bad numerics become 0, unknown confidence is low)
/// 2. `total_allocated` is recomputed from the allocations
/// 3. credit is never negative and allocations never exceed the payment;
///    recomputed total + credit must be within `tolerance` of the payment
/// 4. every allocation targets a distinct pending period with a positive
///    amount no larger than what that period still owes
/// 5. accepted totals are the recomputed, rounded ones
pub fn parse_response(
    raw: &str,
    request: &AiDistributionRequest,
    tolerance: f64,
) -> ParsedResponse {
    let value: Value = match serde_json::from_str(&clean_json_output(raw)) {
        Ok(value) => value,
        Err(e) => return ParsedResponse::Rejected(RejectionReason::Malformed(e.to_string())),
    };
    let Some(obj) = value.as_object() else {
        return ParsedResponse::Rejected(RejectionReason::Malformed(
            "top-level value is not an object".to_string(),
        ));
    };

    let allocations: Vec<AiAllocation> = obj
        .get("allocations")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(sanitize_allocation).collect())
        .unwrap_or_default();

    let confidence = obj
        .get("confidence")
        .and_then(Value::as_str)
        .and_then(Confidence::parse)
        .unwrap_or(Confidence::Low);

    let remaining_as_credit = number_or_zero(obj.get("remaining_as_credit"));
    let allocated_cents: i64 = allocations.iter().map(|a| to_cents(a.amount)).sum();
    let total_allocated = from_cents(allocated_cents);

    if to_cents(remaining_as_credit) < 0 {
        return ParsedResponse::Rejected(RejectionReason::NegativeCredit(remaining_as_credit));
    }
    if allocated_cents > to_cents(request.amount) + 1 {
        return ParsedResponse::Rejected(RejectionReason::OverAllocated {
            total_allocated,
            requested: request.amount,
        });
    }
    if (total_allocated + remaining_as_credit - request.amount).abs() > tolerance {
        return ParsedResponse::Rejected(RejectionReason::NotConserved {
            total_allocated,
            remaining_as_credit,
            requested: request.amount,
        });
    }

    let pending: HashMap<_, _> = request
        .pending_periods
        .iter()
        .map(|p| (p.period_id, p.pending_maintenance))
        .collect();
    let mut seen = HashSet::new();
    for allocation in &allocations {
        let Some(&owed) = pending.get(&allocation.period_id) else {
            return ParsedResponse::Rejected(RejectionReason::UnknownPeriod(allocation.period_id));
        };
        if !seen.insert(allocation.period_id) {
            return ParsedResponse::Rejected(RejectionReason::DuplicatePeriod(allocation.period_id));
        }
        if allocation.amount <= 0.0 {
            return ParsedResponse::Rejected(RejectionReason::NonPositiveAmount {
                period_id: allocation.period_id,
                amount: allocation.amount,
            });
        }
        if to_cents(allocation.amount) > to_cents(owed) + 1 {
            return ParsedResponse::Rejected(RejectionReason::ExceedsPending {
                period_id: allocation.period_id,
                amount: allocation.amount,
                pending: owed,
            });
        }
    }

    ParsedResponse::Accepted(AiDistributionResponse {
        allocations,
        confidence,
        reasoning: string_or_empty(obj.get("reasoning")),
        total_allocated,
        remaining_as_credit: round2(request.amount - total_allocated),
    })
}

fn sanitize_allocation(item: &Value) -> AiAllocation {
    AiAllocation {
        period_id: integer_or_zero(item.get("period_id")),
        concept_type: item
            .get("concept_type")
            .and_then(Value::as_str)
            .and_then(ConceptType::parse)
            .unwrap_or(ConceptType::Maintenance),
        amount: round2(number_or_zero(item.get("amount"))),
        reasoning: string_or_empty(item.get("reasoning")),
    }
}
