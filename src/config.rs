use crate::distribution::Confidence;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Tunables for the engine. Every field has a default so partial JSON
/// documents and sparse environments both work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    /// Per-period maintenance unit used when no config is active today.
    pub default_maintenance_amount: f64,
    /// Upper bound on the pending list the resolver returns.
    pub max_pending_periods: usize,
    /// AI plans below this confidence require manual review.
    pub min_auto_confidence: Confidence,
    /// How many months back a charge may still be adjusted or reversed.
    pub mutation_window_months: i32,
    /// Number of recent ingestion pointers scanned for a bank match.
    pub reference_window: usize,
    /// Maximum gap tolerated between an AI plan's totals and the payment.
    pub conservation_tolerance: f64,
    /// Deposits above this amount are flagged on the ingestion report.
    pub large_transaction_threshold: f64,
    /// Houses are numbered `1..=house_count`.
    pub house_count: u32,
    pub primary_model: String,
    pub secondary_model: String,
    pub provider_timeout_seconds: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_maintenance_amount: 800.0,
            max_pending_periods: 12,
            min_auto_confidence: Confidence::Medium,
            mutation_window_months: 3,
            reference_window: 7,
            conservation_tolerance: 1.0,
            large_transaction_threshold: 50_000.0,
            house_count: 66,
            primary_model: "gemini-2.5-flash".to_string(),
            secondary_model: "gpt-4.1-mini".to_string(),
            provider_timeout_seconds: 30,
        }
    }
}

impl EngineSettings {
    /// Reads `DUES_*` variables, falling back to defaults for anything unset
    /// or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_maintenance_amount: env_parse_or(
                "DUES_DEFAULT_MAINTENANCE_AMOUNT",
                defaults.default_maintenance_amount,
            ),
            max_pending_periods: env_parse_or(
                "DUES_MAX_PENDING_PERIODS",
                defaults.max_pending_periods,
            ),
            min_auto_confidence: env_opt("DUES_MIN_AUTO_CONFIDENCE")
                .and_then(|raw| Confidence::parse(&raw))
                .unwrap_or(defaults.min_auto_confidence),
            mutation_window_months: env_parse_or(
                "DUES_MUTATION_WINDOW_MONTHS",
                defaults.mutation_window_months,
            ),
            reference_window: env_parse_or("DUES_REFERENCE_WINDOW", defaults.reference_window),
            conservation_tolerance: env_parse_or(
                "DUES_CONSERVATION_TOLERANCE",
                defaults.conservation_tolerance,
            ),
            large_transaction_threshold: env_parse_or(
                "DUES_LARGE_TRANSACTION_THRESHOLD",
                defaults.large_transaction_threshold,
            ),
            house_count: env_parse_or("DUES_HOUSE_COUNT", defaults.house_count),
            primary_model: env_or("DUES_PRIMARY_MODEL", &defaults.primary_model),
            secondary_model: env_or("DUES_SECONDARY_MODEL", &defaults.secondary_model),
            provider_timeout_seconds: env_parse_or(
                "DUES_PROVIDER_TIMEOUT_SECONDS",
                defaults.provider_timeout_seconds,
            ),
        }
    }

    pub fn from_json(raw: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_seconds.max(1))
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    env_opt(key)
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}
