use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type HouseId = u32;
pub type PeriodId = i64;
pub type ConfigId = i64;
pub type ChargeId = i64;
pub type RecordId = i64;
pub type TransactionId = i64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConceptType {
    #[schemars(description = "Monthly maintenance fee owed by every house")]
    Maintenance,

    #[schemars(description = "Water service fee, only charged when the period enables it")]
    Water,

    #[schemars(description = "Extraordinary assessment, only charged when the period enables it")]
    ExtraordinaryFee,

    #[schemars(description = "Late payment penalty")]
    Penalties,
}

impl ConceptType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Maintenance => "maintenance",
            Self::Water => "water",
            Self::ExtraordinaryFee => "extraordinary_fee",
            Self::Penalties => "penalties",
        }
    }

    /// Lenient parse used on untrusted input; accepts a few common spellings.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "maintenance" | "mantenimiento" => Some(Self::Maintenance),
            "water" | "agua" => Some(Self::Water),
            "extraordinary_fee" | "extraordinary" | "cuota_extraordinaria" => {
                Some(Self::ExtraordinaryFee)
            }
            "penalties" | "penalty" | "penalizacion" => Some(Self::Penalties),
            _ => None,
        }
    }
}

impl fmt::Display for ConceptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Period {
    pub id: PeriodId,
    pub year: i32,
    pub month: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub config_id: Option<ConfigId>,
    #[serde(default)]
    pub water_active: bool,
    #[serde(default)]
    pub extraordinary_fee_active: bool,
}

impl Period {
    /// Chronological sort key.
    pub fn key(&self) -> (i32, u32) {
        (self.year, self.month)
    }

    pub fn display_name(&self) -> String {
        crate::utils::period_display_name(self.year, self.month)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeriodConfig {
    pub id: ConfigId,
    pub default_maintenance_amount: f64,
    #[serde(default)]
    pub default_water_amount: Option<f64>,
    #[serde(default)]
    pub default_extraordinary_fee_amount: Option<f64>,
    pub payment_due_day: u32,
    pub late_penalty_amount: f64,
    pub effective_from: NaiveDate,
    #[serde(default)]
    pub effective_until: Option<NaiveDate>,
    pub is_active: bool,
}

impl PeriodConfig {
    /// Whether this config governs the given date.
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.is_active
            && self.effective_from <= date
            && self.effective_until.map_or(true, |until| date <= until)
    }

    /// The configured default for a concept, if the concept has one.
    pub fn default_amount(&self, concept: ConceptType) -> Option<f64> {
        match concept {
            ConceptType::Maintenance => Some(self.default_maintenance_amount),
            ConceptType::Water => self.default_water_amount,
            ConceptType::ExtraordinaryFee => self.default_extraordinary_fee_amount,
            ConceptType::Penalties => Some(self.late_penalty_amount),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChargeSource {
    Config,
    Override,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HousePeriodCharge {
    pub id: ChargeId,
    pub house_id: HouseId,
    pub period_id: PeriodId,
    pub concept_type: ConceptType,
    pub expected_amount: f64,
    pub source: ChargeSource,
}

/// A charge that has not been persisted yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewCharge {
    pub house_id: HouseId,
    pub period_id: PeriodId,
    pub concept_type: ConceptType,
    pub expected_amount: f64,
    pub source: ChargeSource,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HousePeriodOverride {
    pub house_id: HouseId,
    pub period_id: PeriodId,
    pub concept_type: ConceptType,
    pub custom_amount: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
    Partial,
    Overpaid,
}

impl PaymentStatus {
    /// Status of an allocation of `allocated` against a charge of `expected`.
    pub fn classify(allocated: f64, expected: f64) -> Self {
        let diff = allocated - expected;
        if diff.abs() < 0.01 {
            Self::Paid
        } else if diff > 0.0 {
            Self::Overpaid
        } else {
            Self::Partial
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordAllocation {
    pub id: i64,
    pub record_id: RecordId,
    pub house_id: HouseId,
    pub period_id: PeriodId,
    pub concept_type: ConceptType,
    pub allocated_amount: f64,
    pub expected_amount: f64,
    pub payment_status: PaymentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewAllocation {
    pub record_id: RecordId,
    pub house_id: HouseId,
    pub period_id: PeriodId,
    pub concept_type: ConceptType,
    pub allocated_amount: f64,
    pub expected_amount: f64,
    pub payment_status: PaymentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HouseBalance {
    pub house_id: HouseId,
    pub credit_balance: f64,
    pub debit_balance: f64,
    /// Sub-unit carry, always within [0, 1).
    pub accumulated_cents: f64,
}

impl HouseBalance {
    pub fn new(house_id: HouseId) -> Self {
        Self {
            house_id,
            ..Self::default()
        }
    }

    /// Adds credit, keeping whole units in `credit_balance` and carrying the
    /// fractional remainder in `accumulated_cents`.
    pub fn add_credit(&mut self, amount: f64) {
        let (whole, carry) = split_carry(self.accumulated_cents + amount.max(0.0));
        self.credit_balance = crate::utils::round2(self.credit_balance + whole);
        self.accumulated_cents = carry;
    }

    pub fn add_debit(&mut self, amount: f64) {
        self.debit_balance = crate::utils::round2(self.debit_balance + amount.max(0.0));
    }

    /// Credit including the not-yet-promoted carry.
    pub fn available_credit(&self) -> f64 {
        crate::utils::round2(self.credit_balance + self.accumulated_cents)
    }
}

fn split_carry(total: f64) -> (f64, f64) {
    let cents = (total * 100.0).round() as i64;
    let whole = cents.div_euclid(100);
    let carry = cents.rem_euclid(100);
    (whole as f64, carry as f64 / 100.0)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Processed,
    Failed,
    Reconciled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BankTransaction {
    pub id: TransactionId,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub concept: String,
    pub amount: f64,
    pub currency: String,
    pub is_deposit: bool,
    pub bank_name: String,
    pub status: TransactionStatus,
}

impl BankTransaction {
    pub fn timestamp(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }
}

/// A validated statement row ready to be stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewBankTransaction {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub concept: String,
    pub amount: f64,
    pub currency: String,
    pub is_deposit: bool,
    pub bank_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestionPointer {
    pub id: i64,
    pub transaction_id: TransactionId,
    pub created_at: NaiveDateTime,
}
