//! # Batch Job State Machine
//!
//! Local record of one remote bulk mutation job.
//!
//! ## Overview
//!
//! A [`BatchJob`] is created by the submitter once the remote job exists and
//! is afterwards mutated only by the poller. It carries the ordered list of
//! queue item ids the uploaded operations were built from; that list is fixed
//! at construction and is the sole key for positional reconciliation.
//!
//! ## State Machine
//!
//! ```text
//! PendingResult ──► Complete
//!       │
//!       ├────────► Error
//!       └────────► PendingCancellation   (accepted remotely, never started)
//! ```
//!
//! `Complete`, `Error` and `PendingCancellation` are terminal.

use crate::operation::operations_per_item;
use crate::remote::JobRef;
use crate::{BulkError, Result};
use core_catalog::{Action, OperandType, QueueItemId, QueueScope};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a batch job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchJobId(Uuid);

impl BatchJobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a batch job ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| BulkError::InvalidJobId(e.to_string()))?,
        ))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for BatchJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BatchJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchJobStatus {
    /// Submitted; waiting for the remote job to finish
    PendingResult,
    /// Remote accepted the job but never started it
    PendingCancellation,
    Complete,
    Error,
}

impl BatchJobStatus {
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Only active jobs are polled.
    pub fn is_active(&self) -> bool {
        matches!(self, BatchJobStatus::PendingResult)
    }

    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchJobStatus::PendingResult => "PENDING_RESULT",
            BatchJobStatus::PendingCancellation => "PENDING_CANCELLATION",
            BatchJobStatus::Complete => "COMPLETE",
            BatchJobStatus::Error => "ERROR",
        }
    }
}

impl FromStr for BatchJobStatus {
    type Err = BulkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "PENDING_RESULT" => Ok(BatchJobStatus::PendingResult),
            "PENDING_CANCELLATION" => Ok(BatchJobStatus::PendingCancellation),
            "COMPLETE" => Ok(BatchJobStatus::Complete),
            "ERROR" => Ok(BatchJobStatus::Error),
            _ => Err(BulkError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for BatchJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Batch Job Entity
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: BatchJobId,
    pub account_id: String,
    pub operand: OperandType,
    pub action: Action,
    pub status: BatchJobStatus,
    /// Remote job handle
    pub remote: JobRef,
    /// Physical operations uploaded
    pub operation_count: usize,
    /// Polls performed so far
    pub attempts: u32,
    /// Unix seconds at which the next poll is due
    pub next_poll_at: i64,
    /// Logical items in upload order
    pub(crate) item_ids: Vec<QueueItemId>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl BatchJob {
    /// Creates a job in `PendingResult` with zero attempts.
    pub fn new(
        scope: &QueueScope,
        remote: JobRef,
        item_ids: Vec<QueueItemId>,
        operation_count: usize,
        now: i64,
        first_poll_at: i64,
    ) -> Self {
        Self {
            id: BatchJobId::new(),
            account_id: scope.account_id.clone(),
            operand: scope.operand,
            action: scope.action,
            status: BatchJobStatus::PendingResult,
            remote,
            operation_count,
            attempts: 0,
            next_poll_at: first_poll_at,
            item_ids,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Ordered ids of the logical items this job carries.
    pub fn item_ids(&self) -> &[QueueItemId] {
        &self.item_ids
    }

    pub fn scope(&self) -> QueueScope {
        QueueScope::new(self.account_id.clone(), self.operand, self.action)
    }

    /// Physical operations per logical item.
    pub fn ratio(&self) -> usize {
        operations_per_item(self.operand, self.action)
    }

    /// Counts one poll, whatever its outcome.
    pub fn record_attempt(&mut self, now: i64) {
        self.attempts = self.attempts.saturating_add(1);
        self.updated_at = now;
    }

    /// Reschedules an active job.
    ///
    /// # Errors
    ///
    /// Returns an error if the job is terminal
    pub fn schedule(&mut self, next_poll_at: i64, now: i64) -> Result<()> {
        if !self.status.is_active() {
            return Err(BulkError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: "schedule".to_string(),
                reason: "Only pending jobs can be rescheduled".to_string(),
            });
        }
        self.next_poll_at = next_poll_at;
        self.updated_at = now;
        Ok(())
    }

    /// Marks a job the remote accepted but never started.
    pub fn mark_stalled(&mut self, now: i64) -> Result<()> {
        self.transition(BatchJobStatus::PendingCancellation, now)?;
        self.error_message = Some("Remote job was accepted but never started".to_string());
        Ok(())
    }

    pub fn complete(&mut self, now: i64) -> Result<()> {
        self.transition(BatchJobStatus::Complete, now)
    }

    pub fn fail(&mut self, message: impl Into<String>, now: i64) -> Result<()> {
        self.transition(BatchJobStatus::Error, now)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    fn transition(&mut self, to: BatchJobStatus, now: i64) -> Result<()> {
        self.validate_transition(to)?;
        self.status = to;
        self.updated_at = now;
        self.completed_at = Some(now);
        Ok(())
    }

    fn validate_transition(&self, to: BatchJobStatus) -> Result<()> {
        let valid = matches!(
            (self.status, to),
            (
                BatchJobStatus::PendingResult,
                BatchJobStatus::PendingCancellation
                    | BatchJobStatus::Complete
                    | BatchJobStatus::Error
            )
        );

        if !valid {
            return Err(BulkError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(operand: OperandType, action: Action) -> BatchJob {
        let scope = QueueScope::new("acct", operand, action);
        BatchJob::new(
            &scope,
            JobRef::new("42", "customers/1/batchJobs/42"),
            vec![QueueItemId::new(), QueueItemId::new()],
            2,
            1_000,
            1_060,
        )
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = job(OperandType::Ad, Action::Add);
        assert_eq!(job.status, BatchJobStatus::PendingResult);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.next_poll_at, 1_060);
    }

    #[test]
    fn test_complete_and_fail_are_terminal() {
        let mut done = job(OperandType::Ad, Action::Add);
        done.complete(2_000).unwrap();
        assert_eq!(done.completed_at, Some(2_000));
        assert!(done.fail("late", 2_001).is_err());
        assert!(done.schedule(3_000, 2_001).is_err());

        let mut failed = job(OperandType::Ad, Action::Add);
        failed.fail("upload rejected", 2_000).unwrap();
        assert_eq!(failed.error_message.as_deref(), Some("upload rejected"));
        assert!(failed.complete(2_001).is_err());
        assert!(!failed.status.is_active());
    }

    #[test]
    fn test_mark_stalled() {
        let mut job = job(OperandType::Keyword, Action::Delete);
        job.mark_stalled(5).unwrap();
        assert_eq!(job.status, BatchJobStatus::PendingCancellation);
        assert!(job.status.is_terminal());
    }

    #[test]
    fn test_ratio_follows_scope() {
        assert_eq!(job(OperandType::Extension, Action::Add).ratio(), 2);
        assert_eq!(job(OperandType::Extension, Action::Delete).ratio(), 1);
        assert_eq!(job(OperandType::AdGroup, Action::Update).ratio(), 1);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            BatchJobStatus::PendingResult,
            BatchJobStatus::PendingCancellation,
            BatchJobStatus::Complete,
            BatchJobStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<BatchJobStatus>().unwrap(), status);
        }
        assert!("RUNNING".parse::<BatchJobStatus>().is_err());
    }

    #[test]
    fn test_job_id_parsing() {
        let id = BatchJobId::new();
        assert_eq!(BatchJobId::from_string(&id.as_str()).unwrap(), id);
        assert!(BatchJobId::from_string("nope").is_err());
    }
}
