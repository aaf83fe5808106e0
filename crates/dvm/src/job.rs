//! Server-side job bookkeeping

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a job taken by this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Received,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Received => "received",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

/// One admitted job.
///
/// Transitions only move forward: `Received -> Processing -> Completed|Failed`.
/// `Received` may fail directly when validation rejects the inputs. Every
/// transition method returns false and leaves the record untouched when the
/// move is not allowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub requester: String,
    pub kind: u16,
    pub state: JobState,
    pub result: Option<String>,
    pub error: Option<String>,
    pub received_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(id: impl Into<String>, requester: impl Into<String>, kind: u16) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            requester: requester.into(),
            kind,
            state: JobState::Received,
            result: None,
            error: None,
            received_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn start_processing(&mut self) -> bool {
        if self.state != JobState::Received {
            return false;
        }
        self.state = JobState::Processing;
        self.updated_at = Utc::now();
        true
    }

    pub fn complete(&mut self, result: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        let now = Utc::now();
        self.state = JobState::Completed;
        self.result = Some(result.into());
        self.updated_at = now;
        self.completed_at = Some(now);
        true
    }

    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        let now = Utc::now();
        self.state = JobState::Failed;
        self.error = Some(error.into());
        self.updated_at = now;
        self.completed_at = Some(now);
        true
    }

    /// Time from receipt to terminal state.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|done| done - self.received_at)
    }
}
