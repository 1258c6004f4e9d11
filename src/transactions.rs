//! Record of every withdrawal/transfer attempt against the processor.
//!
//! Entries are keyed by a generated transaction id assigned before any
//! external call is made, so a timed-out dispatch can still be correlated
//! during manual reconciliation. Records transition pending -> completed or
//! pending -> failed and are never deleted; they are the audit trail.

use crate::errors::{DicepayResult, ValidationError};
use crate::ledger::UserId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Transfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

/// One money-movement attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub user_id: UserId,
    pub kind: TransactionKind,
    pub gross_amount: Decimal,
    pub fee: Decimal,
    pub net_amount: Decimal,
    /// Wallet address or processor-internal user id the funds went to
    pub counterparty: String,
    pub status: TransactionStatus,
    pub error_detail: Option<String>,
    /// Processor-assigned id, recorded on completion
    pub transfer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Store-owned table of transactions behind normal CRUD
#[derive(Debug, Default)]
pub struct TransactionLedger {
    entries: DashMap<String, Transaction>,
}

impl TransactionLedger {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Open a pending record and return a copy of it. The generated id is
    /// the caller's correlation handle for the external dispatch.
    pub fn open(
        &self,
        user_id: UserId,
        kind: TransactionKind,
        gross_amount: Decimal,
        fee: Decimal,
        net_amount: Decimal,
        counterparty: String,
    ) -> Transaction {
        let now = Utc::now();
        let transaction = Transaction {
            transaction_id: Uuid::new_v4().to_string(),
            user_id,
            kind,
            gross_amount,
            fee,
            net_amount,
            counterparty,
            status: TransactionStatus::Pending,
            error_detail: None,
            transfer_id: None,
            created_at: now,
            updated_at: now,
        };
        self.entries
            .insert(transaction.transaction_id.clone(), transaction.clone());
        transaction
    }

    /// pending -> completed, recording the processor's transfer id
    pub fn mark_completed(
        &self,
        transaction_id: &str,
        transfer_id: Option<String>,
    ) -> DicepayResult<Transaction> {
        self.transition(transaction_id, |tx| {
            tx.status = TransactionStatus::Completed;
            tx.transfer_id = transfer_id.clone();
        })
    }

    /// pending -> failed, keeping the error for manual reconciliation
    pub fn mark_failed(
        &self,
        transaction_id: &str,
        error_detail: String,
    ) -> DicepayResult<Transaction> {
        self.transition(transaction_id, |tx| {
            tx.status = TransactionStatus::Failed;
            tx.error_detail = Some(error_detail.clone());
        })
    }

    fn transition<F: Fn(&mut Transaction)>(
        &self,
        transaction_id: &str,
        apply: F,
    ) -> DicepayResult<Transaction> {
        let Some(mut entry) = self.entries.get_mut(transaction_id) else {
            return Err(ValidationError::UnknownTransaction(transaction_id.to_string()).into());
        };
        if entry.status != TransactionStatus::Pending {
            let status = entry.status;
            drop(entry);
            return Err(ValidationError::TransactionNotPending {
                id: transaction_id.to_string(),
                status,
            }
            .into());
        }
        apply(&mut entry);
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    pub fn get(&self, transaction_id: &str) -> Option<Transaction> {
        self.entries.get(transaction_id).map(|entry| entry.clone())
    }

    /// Most recent attempts for one user, newest first
    pub fn history_for_user(&self, user_id: UserId, limit: usize) -> Vec<Transaction> {
        let mut history: Vec<Transaction> = self
            .entries
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.clone())
            .collect();
        history.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        history.truncate(limit);
        history
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
