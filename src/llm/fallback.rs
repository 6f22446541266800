use crate::distribution::{Confidence, DistributionMethod, DistributionPlan, PlannedAllocation};
use crate::error::Result;
use crate::llm::prompts::{distribution_user_prompt, SYSTEM_PROMPT_DISTRIBUTION};
use crate::llm::types::*;
use crate::llm::utils::inline_schema;
use crate::llm::validation::parse_response;
use crate::utils::round2;
use futures::future::BoxFuture;
use log::{debug, info, warn};
use std::sync::Arc;

/// An external reasoning service. Implementations return the raw text of the
/// model's answer; parsing and validation stay on this side of the seam.
pub trait ReasoningProvider: Send + Sync {
    fn name(&self) -> &str;

    fn analyze<'a>(&'a self, request: &'a ReasoningRequest) -> BoxFuture<'a, Result<String>>;
}

/// Asks the primary provider, then the secondary one if the primary call
/// fails, and turns an accepted answer into a plan that always needs review
/// when its confidence is below `min_confidence`.
pub struct AiDistributor {
    primary: Option<Arc<dyn ReasoningProvider>>,
    secondary: Option<Arc<dyn ReasoningProvider>>,
    min_confidence: Confidence,
    tolerance: f64,
}

impl AiDistributor {
    pub fn new(min_confidence: Confidence, tolerance: f64) -> Self {
        Self {
            primary: None,
            secondary: None,
            min_confidence,
            tolerance,
        }
    }

    pub fn with_primary(mut self, provider: Arc<dyn ReasoningProvider>) -> Self {
        self.primary = Some(provider);
        self
    }

    pub fn with_secondary(mut self, provider: Arc<dyn ReasoningProvider>) -> Self {
        self.secondary = Some(provider);
        self
    }

    pub fn has_providers(&self) -> bool {
        self.primary.is_some() || self.secondary.is_some()
    }

    pub fn build_request(request: &AiDistributionRequest) -> Result<ReasoningRequest> {
        Ok(ReasoningRequest {
            system_prompt: SYSTEM_PROMPT_DISTRIBUTION.to_string(),
            user_prompt: distribution_user_prompt(request),
            response_schema: inline_schema(AiDistributionResponse::json_schema())?,
        })
    }

    /// `None` means no usable plan: both providers failed, none is
    /// configured, or the answer broke an accounting rule.
    pub async fn distribute(&self, request: &AiDistributionRequest) -> Option<DistributionPlan> {
        let reasoning_request = match Self::build_request(request) {
            Ok(r) => r,
            Err(e) => {
                warn!("Could not build reasoning request: {}", e);
                return None;
            }
        };

        let providers = [self.primary.as_ref(), self.secondary.as_ref()];
        for provider in providers.into_iter().flatten() {
            let raw = match provider.analyze(&reasoning_request).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(
                        "Reasoning provider '{}' failed for house {}: {}",
                        provider.name(),
                        request.house_id,
                        e
                    );
                    continue;
                }
            };

            debug!("Provider '{}' answered {} bytes", provider.name(), raw.len());
            return match parse_response(&raw, request, self.tolerance) {
                ParsedResponse::Accepted(response) => {
                    let plan = self.to_plan(request, response);
                    info!(
                        "AI plan from '{}' for house {}: {} allocation(s), confidence {}, manual review: {}",
                        provider.name(),
                        request.house_id,
                        plan.allocations.len(),
                        plan.confidence,
                        plan.requires_manual_review
                    );
                    Some(plan)
                }
                ParsedResponse::Rejected(reason) => {
                    warn!(
                        "Discarding answer from '{}' for house {}: {}",
                        provider.name(),
                        request.house_id,
                        reason
                    );
                    None
                }
            };
        }

        warn!(
            "No reasoning provider produced an answer for house {}",
            request.house_id
        );
        None
    }

    fn to_plan(
        &self,
        request: &AiDistributionRequest,
        response: AiDistributionResponse,
    ) -> DistributionPlan {
        let allocations = response
            .allocations
            .into_iter()
            .map(|a| {
                let period = request
                    .pending_periods
                    .iter()
                    .find(|p| p.period_id == a.period_id);
                PlannedAllocation {
                    period_id: a.period_id,
                    period_name: period.map(|p| p.display_name.clone()).unwrap_or_default(),
                    concept_type: a.concept_type,
                    amount: a.amount,
                    expected_amount: period.map_or(0.0, |p| p.expected_maintenance),
                    reasoning: a.reasoning,
                }
            })
            .collect();

        DistributionPlan {
            amount: round2(request.amount),
            allocations,
            total_allocated: response.total_allocated,
            remaining_as_credit: response.remaining_as_credit,
            confidence: response.confidence,
            method: DistributionMethod::AiAssisted,
            reasoning: response.reasoning,
            requires_manual_review: !response.confidence.meets(self.min_confidence),
            auto_applied: false,
        }
    }
}
