//! Append-only audit trail with tamper detection
//!
//! Operational events that need operator review - poll run summaries,
//! reorg flags, reconciliation alerts - are appended here rather than
//! surfaced to merchants. Entries form a SHA-256 hash chain: each entry
//! commits to the hash of the previous one, so truncation or rewrite of
//! history is detectable with [`AuditLog::verify_chain`].

use crate::{
    error::{Error, Result},
    store::Store,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Audit event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditKind {
    /// Summary of one deposit poll cycle
    DepositPollSummary,
    /// Summary of one invoice sync cycle
    InvoiceSyncSummary,
    /// Summary of one batch funding pass
    BatchFundingSummary,
    /// A credited deposit fell back below the confirmation threshold
    ReorgFlagged,
    /// Reconciliation re-linked a claimed source to its ledger entry
    ReconciliationRepair,
    /// Reconciliation found a claimed source needing manual review
    ReconciliationAlert,
}

impl AuditKind {
    /// Stable string form (hashed into the chain)
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::DepositPollSummary => "deposit_poll_summary",
            AuditKind::InvoiceSyncSummary => "invoice_sync_summary",
            AuditKind::BatchFundingSummary => "batch_funding_summary",
            AuditKind::ReorgFlagged => "reorg_flagged",
            AuditKind::ReconciliationRepair => "reconciliation_repair",
            AuditKind::ReconciliationAlert => "reconciliation_alert",
        }
    }
}

/// One audit entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Entry ID (UUIDv7; key order is append order)
    pub id: Uuid,

    /// Event type
    pub kind: AuditKind,

    /// Human-readable message
    pub message: String,

    /// Structured details (sorted map for deterministic hashing)
    pub details: BTreeMap<String, String>,

    /// Hash of the previous entry; empty for the first entry
    pub prev_hash: String,

    /// Hash of this entry
    pub hash: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(self.id.as_bytes());
        hasher.update(self.kind.as_str().as_bytes());
        hasher.update(self.message.as_bytes());
        for (k, v) in &self.details {
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
        }
        hasher.update(self.created_at.to_rfc3339().as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

/// Audit trail over the store's audit column family
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<Store>,
}

impl AuditLog {
    /// Create a log over a store
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Append an entry, chaining it to the current head
    pub fn append(
        &self,
        kind: AuditKind,
        message: impl Into<String>,
        details: BTreeMap<String, String>,
    ) -> Result<AuditEntry> {
        let message = message.into();
        self.store.with_audit_lock(|| {
            let prev_hash = self
                .store
                .last_audit_entry()?
                .map(|e| e.hash)
                .unwrap_or_default();

            let mut entry = AuditEntry {
                id: Uuid::now_v7(),
                kind,
                message,
                details,
                prev_hash,
                hash: String::new(),
                created_at: Utc::now(),
            };
            entry.hash = entry.compute_hash();

            self.store.put_audit_entry(&entry)?;
            Ok(entry)
        })
    }

    /// Append an entry, logging rather than propagating failure
    ///
    /// Audit inserts are best-effort: they must never block or fail the
    /// ledger mutation they describe.
    pub fn append_best_effort(
        &self,
        kind: AuditKind,
        message: impl Into<String>,
        details: BTreeMap<String, String>,
    ) {
        if let Err(e) = self.append(kind, message, details) {
            tracing::warn!("Audit append failed: {}", e);
        }
    }

    /// All entries of one kind, in append order
    pub fn entries_of_kind(&self, kind: AuditKind) -> Result<Vec<AuditEntry>> {
        Ok(self
            .store
            .audit_entries()?
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect())
    }

    /// Verify the hash chain end to end
    pub fn verify_chain(&self) -> Result<()> {
        let mut prev_hash = String::new();
        for entry in self.store.audit_entries()? {
            if entry.prev_hash != prev_hash {
                return Err(Error::AuditIntegrity(format!(
                    "entry {} does not chain to its predecessor",
                    entry.id
                )));
            }
            if entry.compute_hash() != entry.hash {
                return Err(Error::AuditIntegrity(format!(
                    "entry {} hash mismatch",
                    entry.id
                )));
            }
            prev_hash = entry.hash;
        }
        Ok(())
    }
}
