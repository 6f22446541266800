//! # Dues Allocation Engine
//!
//! Bookkeeping core for a residential community that bills each house a
//! monthly maintenance fee (plus optional water, extraordinary fee and
//! penalty charges) and receives lump-sum payments through bank deposits.
//!
//! ## Core Concepts
//!
//! - **Charges**: An immutable snapshot of what each house owes per period and concept,
//!   seeded from the period's config (or a house override)
//! - **Pending Periods**: Oldest-first list of periods whose maintenance is not fully paid
//! - **Distribution**: A payment is spread FIFO over pending periods by deterministic rules;
//!   ambiguous payments go to an optional AI provider whose answer is validated and never
//!   applied without review
//! - **Conservation**: Every plan satisfies `total_allocated + remaining_as_credit == amount`
//! - **Ingestion**: Re-uploaded bank statements never create duplicate transactions
//!
//! ## Example
//!
//! ```rust,ignore
//! use dues_allocation_engine::*;
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! store.insert_config(PeriodConfig {
//!     id: 0,
//!     default_maintenance_amount: 800.0,
//!     default_water_amount: None,
//!     default_extraordinary_fee_amount: None,
//!     payment_due_day: 10,
//!     late_penalty_amount: 100.0,
//!     effective_from: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
//!     effective_until: None,
//!     is_active: true,
//! })?;
//!
//! let engine = DuesEngine::new(store, EngineSettings::from_env());
//! engine.ensure_period(2024, 1)?;
//! engine.ensure_period(2024, 2)?;
//!
//! let applied = engine.allocate_payment(12, 1, 1600.0).await?;
//! assert_eq!(applied.plan.allocations.len(), 2);
//! ```

pub mod config;
pub mod distribution;
pub mod engine;
pub mod error;
pub mod ingestion;
pub mod ledger;
pub mod llm;
pub mod memory;
pub mod mutations;
pub mod resolver;
pub mod schema;
pub mod store;
pub mod utils;

pub use config::EngineSettings;
pub use distribution::{
    distribute, Confidence, DistributionMethod, DistributionPlan, PlannedAllocation,
};
pub use engine::{DuesEngine, EnsuredPeriod, PaymentApplication};
pub use error::{DuesError, Result};
pub use ingestion::{
    validate_row, Discrepancy, IngestionReport, RawStatementRow, RowError, StatementIngestor,
};
pub use ledger::{ChargeBalance, ChargeLedger, ConceptPaymentDetail, SeedReport};
pub use llm::{AiDistributor, ReasoningProvider, ReasoningRequest};
pub use memory::MemoryStore;
pub use mutations::{validate_condonation, AdjustmentOutcome, MutationGuard, RemovalOutcome};
pub use resolver::{total_debt, PendingPeriod, UnpaidPeriodResolver};
pub use schema::*;
pub use store::*;
