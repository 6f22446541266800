//! Bank statement ingestion.
//!
//! Statements are re-uploaded with overlapping windows, so every upload is
//! filtered against a per-bank reference transaction (the newest row stored
//! by a previous run) and then deduplicated twice: inside the file and
//! against rows already stored for the same date and bank.

use crate::error::{DuesError, Result};
use crate::schema::{BankTransaction, IngestionPointer, NewBankTransaction, TransactionId};
use crate::store::{BankTransactionStore, IngestionPointerStore};
use crate::utils::to_cents;
use chrono::{NaiveDate, NaiveTime};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A statement row as produced by the file readers, before validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawStatementRow {
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub concept: String,
    pub amount: f64,
    pub currency: String,
    pub is_deposit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowError {
    /// Zero-based position in the uploaded file.
    pub row: usize,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discrepancy {
    DuplicateInFile {
        row: usize,
        date: NaiveDate,
        concept: String,
        amount: f64,
    },
    LargeTransaction {
        row: usize,
        date: NaiveDate,
        concept: String,
        amount: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct IngestionReport {
    pub bank_name: String,
    pub total_rows: usize,
    pub accepted: usize,
    pub previously_processed: usize,
    pub errors: Vec<RowError>,
    pub discrepancies: Vec<Discrepancy>,
    pub transactions: Vec<BankTransaction>,
    pub reference_transaction: Option<TransactionId>,
    pub new_pointer: Option<IngestionPointer>,
}

/// Identity of a statement row for duplicate detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RowKey {
    date: NaiveDate,
    time: NaiveTime,
    concept: String,
    amount_cents: i64,
    bank_name: String,
}

impl RowKey {
    fn of_new(row: &NewBankTransaction) -> Self {
        Self {
            date: row.date,
            time: row.time,
            concept: row.concept.clone(),
            amount_cents: to_cents(row.amount),
            bank_name: row.bank_name.clone(),
        }
    }

    fn of_stored(row: &BankTransaction) -> Self {
        Self {
            date: row.date,
            time: row.time,
            concept: row.concept.trim().to_string(),
            amount_cents: to_cents(row.amount),
            bank_name: row.bank_name.clone(),
        }
    }
}

/// Field-level checks. Missing times default to midnight.
pub fn validate_row(
    row: &RawStatementRow,
    bank_name: &str,
    today: NaiveDate,
) -> std::result::Result<NewBankTransaction, String> {
    let date = row.date.ok_or_else(|| "missing date".to_string())?;
    if date > today {
        return Err(format!("date {} is in the future", date));
    }
    if !row.amount.is_finite() || row.amount <= 0.0 {
        return Err(format!("amount {} must be a positive number", row.amount));
    }
    let concept = row.concept.trim();
    if concept.is_empty() {
        return Err("concept is empty".to_string());
    }
    let currency = row.currency.trim().to_ascii_uppercase();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(format!("currency '{}' is not a 3-letter code", row.currency));
    }

    Ok(NewBankTransaction {
        date,
        time: row.time.unwrap_or(NaiveTime::MIN),
        concept: concept.to_string(),
        amount: crate::utils::round2(row.amount),
        currency,
        is_deposit: row.is_deposit,
        bank_name: bank_name.to_string(),
    })
}

pub struct StatementIngestor<'a, S: ?Sized> {
    store: &'a S,
    reference_window: usize,
    large_transaction_threshold: f64,
}

impl<'a, S> StatementIngestor<'a, S>
where
    S: BankTransactionStore + IngestionPointerStore + ?Sized,
{
    pub fn new(store: &'a S, reference_window: usize, large_transaction_threshold: f64) -> Self {
        Self {
            store,
            reference_window,
            large_transaction_threshold,
        }
    }

    /// The newest pointer (within the window) whose transaction came from
    /// `bank_name`; failing that, the newest pointer of any bank.
    pub fn reference_transaction(&self, bank_name: &str) -> Result<Option<BankTransaction>> {
        let recent = self.store.recent_pointers(self.reference_window)?;
        if let Some((_, transaction)) = recent.iter().find(|(_, t)| t.bank_name == bank_name) {
            return Ok(Some(transaction.clone()));
        }
        Ok(recent.into_iter().next().map(|(_, t)| t))
    }

    pub fn ingest(
        &self,
        rows: &[RawStatementRow],
        bank_name: &str,
        today: NaiveDate,
    ) -> Result<IngestionReport> {
        let bank_name = bank_name.trim();
        if bank_name.is_empty() {
            return Err(DuesError::Validation(
                "Statement upload needs a bank name".to_string(),
            ));
        }

        let mut report = IngestionReport {
            bank_name: bank_name.to_string(),
            total_rows: rows.len(),
            ..IngestionReport::default()
        };

        let reference = self.reference_transaction(bank_name)?;
        report.reference_transaction = reference.as_ref().map(|t| t.id);
        // A reference from another bank does not bound this bank's rows.
        let cutoff = reference
            .as_ref()
            .filter(|t| t.bank_name == bank_name)
            .map(|t| t.date);
        if let Some(reference) = &reference {
            debug!(
                "Reference transaction {} ({} on {}), cutoff {:?}",
                reference.id, reference.bank_name, reference.date, cutoff
            );
        }

        let mut seen_in_file: HashSet<RowKey> = HashSet::new();
        let mut stored_by_date: HashMap<NaiveDate, HashSet<RowKey>> = HashMap::new();
        let mut accepted: Vec<(usize, NewBankTransaction)> = Vec::new();

        for (index, raw) in rows.iter().enumerate() {
            let row = match validate_row(raw, bank_name, today) {
                Ok(row) => row,
                Err(message) => {
                    report.errors.push(RowError { row: index, message });
                    continue;
                }
            };

            if cutoff.is_some_and(|cutoff| row.date < cutoff) {
                report.previously_processed += 1;
                continue;
            }

            let key = RowKey::of_new(&row);
            if !seen_in_file.insert(key.clone()) {
                report.previously_processed += 1;
                report.discrepancies.push(Discrepancy::DuplicateInFile {
                    row: index,
                    date: row.date,
                    concept: row.concept.clone(),
                    amount: row.amount,
                });
                continue;
            }

            let stored = match stored_by_date.entry(row.date) {
                std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
                std::collections::hash_map::Entry::Vacant(entry) => entry.insert(
                    self.store
                        .transactions_on(row.date, bank_name)?
                        .iter()
                        .map(RowKey::of_stored)
                        .collect(),
                ),
            };
            if stored.contains(&key) {
                report.previously_processed += 1;
                continue;
            }

            if row.amount > self.large_transaction_threshold {
                report.discrepancies.push(Discrepancy::LargeTransaction {
                    row: index,
                    date: row.date,
                    concept: row.concept.clone(),
                    amount: row.amount,
                });
            }
            accepted.push((index, row));
        }

        if !accepted.is_empty() {
            let created = self
                .store
                .create_transactions(accepted.into_iter().map(|(_, row)| row).collect())?;

            if let Some(latest) = created.iter().max_by_key(|t| t.timestamp()) {
                report.new_pointer = Some(self.store.append_pointer(latest.id)?);
            }
            report.accepted = created.len();
            report.transactions = created;
        }

        if !report.errors.is_empty() {
            warn!(
                "{} of {} rows from {} failed validation",
                report.errors.len(),
                report.total_rows,
                bank_name
            );
        }
        for discrepancy in &report.discrepancies {
            debug!("Discrepancy in {} upload: {:?}", bank_name, discrepancy);
        }
        info!(
            "Ingested statement from {}: {} accepted, {} previously processed, {} errors",
            bank_name,
            report.accepted,
            report.previously_processed,
            report.errors.len()
        );

        Ok(report)
    }
}
