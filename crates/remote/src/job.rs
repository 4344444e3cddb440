use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Reference to a job submitted to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    /// Provider-assigned identifier.
    pub id: String,
    /// File stem the job writes its artifact under.
    pub name: String,
}

impl JobHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into() }
    }
}

impl Display for JobHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{} ({})", self.id, self.name)
    }
}

/// Job lifecycle as reported by the provider. Only the provider moves a job
/// between states; we observe them by polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    #[serde(alias = "pending", alias = "READY", alias = "ready")]
    Pending,
    #[serde(alias = "running")]
    Running,
    #[serde(alias = "completed", alias = "SUCCEEDED", alias = "succeeded")]
    Completed,
    #[serde(alias = "failed")]
    Failed,
    #[serde(alias = "cancelled", alias = "CANCELED", alias = "canceled")]
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
        }
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// One observation of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Where the provider wrote the artifact, relative to the shared mount.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// The provider's full response, kept for diagnostics.
    #[serde(skip)]
    pub raw: serde_json::Value,
}

impl JobStatus {
    pub fn new(state: JobState) -> Self {
        Self { state, error_message: None, destination: None, raw: serde_json::Value::Null }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Parse a provider response, keeping the raw document alongside.
    pub fn from_json(raw: serde_json::Value) -> serde_json::Result<Self> {
        let mut status: JobStatus = serde_json::from_value(raw.clone())?;
        status.raw = raw;
        Ok(status)
    }

    /// Best human-readable account of what the provider said.
    pub fn payload(&self) -> String {
        match (&self.error_message, &self.raw) {
            (Some(message), _) => message.clone(),
            (None, serde_json::Value::Null) => self.state.to_string(),
            (None, raw) => raw.to_string(),
        }
    }
}
