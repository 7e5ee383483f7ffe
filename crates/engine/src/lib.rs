//! Workflow Engine - serialized decisions over pluggable storage and sinks
//!
//! This crate orchestrates the approval lifecycle on top of the pure state
//! machine in `opsgate-core`:
//! - Serializes decisions per workflow (lock registry plus versioned saves)
//! - Persists every transition before emitting audit events or notifications
//! - Fans bulk decisions out across workflows without widening any lock
//! - Runs the escalation sweep as an ordinary caller under the system actor
//!
//! # Key Types
//!
//! - `WorkflowService` - Main orchestrator (see `service` module)
//! - `WorkflowStore` - Pluggable persistence trait; `opsgate-db` provides the
//!   SQLite implementation, `InMemoryWorkflowStore` backs tests
//! - `AuditSink` / `NotificationSink` - Emission seams, fallible but never
//!   able to roll back a committed decision
//!
//! # Serialization Principle
//!
//! The engine holds no workflow state of its own. Every mutation goes
//! through `decide`, which re-reads the record under the per-workflow lock
//! and saves with an expected version, so two racing callers produce one
//! transition and one precondition refusal.

pub mod bulk;
pub mod service;
pub mod sinks;
pub mod store;
pub mod sweep;

pub use bulk::{BulkDecision, BulkItemOutcome};
pub use service::{EngineError, WorkflowService};
pub use sinks::{
    AuditQuery, AuditSink, FanoutAuditSink, InMemoryAuditSink, InMemoryNotificationSink,
    LedgerAuditSink, NoopNotificationSink, NotificationSink, SinkError,
};
pub use store::{InMemoryWorkflowStore, StoreError, WorkflowStore};
