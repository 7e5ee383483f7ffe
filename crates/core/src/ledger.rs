//! Tamper-evident approval ledger.
//!
//! Every audit event appended for a workflow becomes a ledger entry whose
//! hash covers the previous entry's hash, and whose HMAC signature covers the
//! entry hash. Verifying a chain therefore detects reordering, edits, and
//! forged entries as long as the signing key stayed secret.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEvent};
use crate::domain::workflow::WorkflowId;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: String,
    pub workflow_id: WorkflowId,
    pub sequence: u32,
    pub event_id: String,
    pub content_hash: String,
    pub prev_hash: Option<String>,
    pub entry_hash: String,
    pub recorded_at: DateTime<Utc>,
    pub actor: String,
    pub action: AuditAction,
    pub signature: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStatus {
    pub workflow_id: WorkflowId,
    pub valid: bool,
    pub verified_entries: usize,
    pub latest_hash: Option<String>,
    pub failure_reason: Option<String>,
}

/// Per-workflow hash chains keyed by workflow id. Interior mutability keeps
/// `record` usable behind shared references at the service edge.
#[derive(Debug)]
pub struct ApprovalLedger {
    signing_key: Vec<u8>,
    chains: Mutex<HashMap<String, Vec<LedgerEntry>>>,
}

impl ApprovalLedger {
    pub fn new(signing_key: impl AsRef<[u8]>) -> Self {
        Self { signing_key: signing_key.as_ref().to_vec(), chains: Mutex::new(HashMap::new()) }
    }

    pub fn record(&self, event: &AuditEvent) -> LedgerEntry {
        let mut chains = self.chains();
        let chain = chains.entry(event.workflow_id.0.clone()).or_default();
        let sequence = u32::try_from(chain.len()).unwrap_or(u32::MAX).saturating_add(1);
        let prev_hash = chain.last().map(|entry| entry.entry_hash.clone());
        let content_hash = sha256_hex(event.chain_material().as_bytes());
        let entry_hash = hash_entry_material(
            &event.workflow_id,
            sequence,
            &content_hash,
            prev_hash.as_deref(),
            event.occurred_at,
            &event.actor,
            event.action,
        );
        let signature = hmac_hex(&self.signing_key, entry_hash.as_bytes());

        let entry = LedgerEntry {
            entry_id: Uuid::new_v4().to_string(),
            workflow_id: event.workflow_id.clone(),
            sequence,
            event_id: event.event_id.clone(),
            content_hash,
            prev_hash,
            entry_hash,
            recorded_at: event.occurred_at,
            actor: event.actor.clone(),
            action: event.action,
            signature,
        };

        chain.push(entry.clone());
        entry
    }

    pub fn verify_workflow(&self, workflow_id: &WorkflowId) -> ChainStatus {
        let chains = self.chains();
        let Some(entries) = chains.get(&workflow_id.0) else {
            return ChainStatus {
                workflow_id: workflow_id.clone(),
                valid: false,
                verified_entries: 0,
                latest_hash: None,
                failure_reason: Some("no ledger entries recorded for workflow".to_string()),
            };
        };

        let mut previous_hash: Option<String> = None;
        for (index, entry) in entries.iter().enumerate() {
            let expected_sequence = u32::try_from(index).unwrap_or(u32::MAX).saturating_add(1);
            if entry.sequence != expected_sequence {
                return ChainStatus {
                    workflow_id: workflow_id.clone(),
                    valid: false,
                    verified_entries: index,
                    latest_hash: previous_hash,
                    failure_reason: Some(format!(
                        "sequence mismatch at entry {}: expected {}, found {}",
                        entry.entry_id, expected_sequence, entry.sequence
                    )),
                };
            }

            if entry.prev_hash != previous_hash {
                return ChainStatus {
                    workflow_id: workflow_id.clone(),
                    valid: false,
                    verified_entries: index,
                    latest_hash: previous_hash,
                    failure_reason: Some(format!(
                        "previous hash mismatch at entry {}",
                        entry.entry_id
                    )),
                };
            }

            let computed_entry_hash = hash_entry_material(
                &entry.workflow_id,
                entry.sequence,
                &entry.content_hash,
                entry.prev_hash.as_deref(),
                entry.recorded_at,
                &entry.actor,
                entry.action,
            );
            if computed_entry_hash != entry.entry_hash {
                return ChainStatus {
                    workflow_id: workflow_id.clone(),
                    valid: false,
                    verified_entries: index,
                    latest_hash: previous_hash,
                    failure_reason: Some(format!("entry hash mismatch at entry {}", entry.entry_id)),
                };
            }

            let expected_signature = hmac_hex(&self.signing_key, entry.entry_hash.as_bytes());
            if expected_signature != entry.signature {
                return ChainStatus {
                    workflow_id: workflow_id.clone(),
                    valid: false,
                    verified_entries: index,
                    latest_hash: previous_hash,
                    failure_reason: Some(format!("signature mismatch at entry {}", entry.entry_id)),
                };
            }

            previous_hash = Some(entry.entry_hash.clone());
        }

        ChainStatus {
            workflow_id: workflow_id.clone(),
            valid: true,
            verified_entries: entries.len(),
            latest_hash: previous_hash,
            failure_reason: None,
        }
    }

    pub fn entries_for_workflow(&self, workflow_id: &WorkflowId) -> Vec<LedgerEntry> {
        self.chains().get(&workflow_id.0).cloned().unwrap_or_default()
    }

    fn chains(&self) -> MutexGuard<'_, HashMap<String, Vec<LedgerEntry>>> {
        match self.chains.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn hash_entry_material(
    workflow_id: &WorkflowId,
    sequence: u32,
    content_hash: &str,
    prev_hash: Option<&str>,
    recorded_at: DateTime<Utc>,
    actor: &str,
    action: AuditAction,
) -> String {
    let material = format!(
        "{}|{}|{}|{}|{}|{}|{}",
        workflow_id.0,
        sequence,
        content_hash,
        prev_hash.unwrap_or(""),
        recorded_at.to_rfc3339(),
        actor,
        action.as_str(),
    );
    sha256_hex(material.as_bytes())
}

fn hmac_hex(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return sha256_hex(payload),
    };
    mac.update(payload);
    encode_hex(mac.finalize().into_bytes().as_slice())
}

fn sha256_hex(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    encode_hex(digest.as_slice())
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{ApprovalLedger, LedgerEntry};
    use crate::audit::{AuditAction, AuditEvent};
    use crate::domain::workflow::{StepId, StepStatus, WorkflowId};

    fn sample_event(workflow_id: &str, action: AuditAction, actor: &str) -> AuditEvent {
        AuditEvent::new(
            WorkflowId(workflow_id.to_string()),
            Some(StepId("step-1".to_string())),
            action,
            actor,
            Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap(),
        )
        .with_status_change(StepStatus::Pending, StepStatus::Approved)
    }

    #[test]
    fn record_produces_consistent_hashes_for_the_same_event() {
        let event = sample_event("wf-ledger-1", AuditAction::Created, "u-op");
        let ledger_a = ApprovalLedger::new("secret-key");
        let ledger_b = ApprovalLedger::new("secret-key");

        let entry_a = ledger_a.record(&event);
        let entry_b = ledger_b.record(&event);

        assert_eq!(entry_a.content_hash, entry_b.content_hash);
        assert_eq!(entry_a.signature, entry_b.signature);
        assert_eq!(entry_a.prev_hash, None);
    }

    #[test]
    fn record_links_the_previous_hash_chain() {
        let ledger = ApprovalLedger::new("secret-key");

        let entry_1 =
            ledger.record(&sample_event("wf-ledger-2", AuditAction::Created, "u-op"));
        let entry_2 =
            ledger.record(&sample_event("wf-ledger-2", AuditAction::Approved, "u-sup"));

        assert_eq!(entry_1.sequence, 1);
        assert_eq!(entry_2.sequence, 2);
        assert_eq!(entry_2.prev_hash, Some(entry_1.entry_hash));
    }

    #[test]
    fn chains_are_isolated_per_workflow() {
        let ledger = ApprovalLedger::new("secret-key");

        ledger.record(&sample_event("wf-a", AuditAction::Created, "u-op"));
        let entry = ledger.record(&sample_event("wf-b", AuditAction::Created, "u-op"));

        assert_eq!(entry.sequence, 1);
        assert_eq!(entry.prev_hash, None);
        assert_eq!(ledger.entries_for_workflow(&WorkflowId("wf-a".to_string())).len(), 1);
    }

    #[test]
    fn verify_succeeds_for_untampered_entries() {
        let ledger = ApprovalLedger::new("secret-key");
        ledger.record(&sample_event("wf-ledger-3", AuditAction::Created, "u-op"));
        ledger.record(&sample_event("wf-ledger-3", AuditAction::Escalated, "u-sup"));
        ledger.record(&sample_event("wf-ledger-3", AuditAction::Approved, "u-mgr"));

        let status = ledger.verify_workflow(&WorkflowId("wf-ledger-3".to_string()));
        assert!(status.valid);
        assert_eq!(status.verified_entries, 3);
        assert!(status.failure_reason.is_none());
    }

    #[test]
    fn verify_detects_a_forged_signature() {
        let ledger = ApprovalLedger::new("secret-key");
        ledger.record(&sample_event("wf-ledger-4", AuditAction::Created, "u-op"));
        ledger.record(&sample_event("wf-ledger-4", AuditAction::Approved, "u-sup"));

        {
            let mut chains = ledger.chains();
            let entries = chains.get_mut("wf-ledger-4").expect("entries");
            entries[1].signature = "tampered-signature".to_string();
        }

        let status = ledger.verify_workflow(&WorkflowId("wf-ledger-4".to_string()));
        assert!(!status.valid);
        assert_eq!(status.verified_entries, 1);
        assert!(status.failure_reason.unwrap_or_default().contains("signature mismatch"));
    }

    #[test]
    fn verify_detects_a_rewritten_entry() {
        let ledger = ApprovalLedger::new("secret-key");
        ledger.record(&sample_event("wf-ledger-5", AuditAction::Created, "u-op"));
        ledger.record(&sample_event("wf-ledger-5", AuditAction::Approved, "u-sup"));

        {
            let mut chains = ledger.chains();
            let entries = chains.get_mut("wf-ledger-5").expect("entries");
            entries[0].actor = "someone-else".to_string();
        }

        let status = ledger.verify_workflow(&WorkflowId("wf-ledger-5".to_string()));
        assert!(!status.valid);
        assert_eq!(status.verified_entries, 0);
        assert!(status.failure_reason.unwrap_or_default().contains("entry hash mismatch"));
    }

    #[test]
    fn verify_reports_unknown_workflows() {
        let ledger = ApprovalLedger::new("secret-key");
        let status = ledger.verify_workflow(&WorkflowId("wf-missing".to_string()));
        assert!(!status.valid);
        assert_eq!(status.verified_entries, 0);
    }

    #[test]
    fn different_signing_keys_disagree_on_signatures_only() {
        let event = sample_event("wf-ledger-6", AuditAction::Created, "u-op");
        let entry_a: LedgerEntry = ApprovalLedger::new("key-one").record(&event);
        let entry_b: LedgerEntry = ApprovalLedger::new("key-two").record(&event);

        assert_eq!(entry_a.entry_hash, entry_b.entry_hash);
        assert_ne!(entry_a.signature, entry_b.signature);
    }
}
