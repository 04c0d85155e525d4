use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::error::JobError;

pub type JobId = Uuid;

/// Lifecycle status of a generation job.
///
/// `queued -> processing -> {completed | failed}`, plus the retry back-edge
/// `failed -> queued`. Nothing else is a legal move.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Counts toward the queue depth gauge.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Processing)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Failed, JobStatus::Queued)
        )
    }
}

/// Image-to-image transform variants.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum ImageTransform {
    /// Re-render the source image following a prompt.
    Restyle,
    /// Low-strength re-render that keeps the composition.
    Variation,
}

/// Job type. Each variant is served by exactly one registered processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    TextToImage,
    ImageTo3d,
    ImageToImage(ImageTransform),
}

const IMAGE_TO_IMAGE_PREFIX: &str = "image_to_image:";

impl JobKind {
    pub fn needs_prompt(self) -> bool {
        matches!(
            self,
            JobKind::TextToImage | JobKind::ImageToImage(ImageTransform::Restyle)
        )
    }

    pub fn needs_source(self) -> bool {
        !matches!(self, JobKind::TextToImage)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::TextToImage => f.write_str("text_to_image"),
            JobKind::ImageTo3d => f.write_str("image_to_3d"),
            JobKind::ImageToImage(transform) => write!(f, "{IMAGE_TO_IMAGE_PREFIX}{transform}"),
        }
    }
}

impl FromStr for JobKind {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text_to_image" => Ok(JobKind::TextToImage),
            "image_to_3d" => Ok(JobKind::ImageTo3d),
            other => other
                .strip_prefix(IMAGE_TO_IMAGE_PREFIX)
                .and_then(|subtype| ImageTransform::from_str(subtype).ok())
                .map(JobKind::ImageToImage)
                .ok_or_else(|| JobError::Validation(format!("unknown job type `{s}`"))),
        }
    }
}

impl Serialize for JobKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for JobKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Why a job ended up `failed`.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureReason {
    ProcessorError,
    Timeout,
    Stalled,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Submitted job payload. Immutable once the job exists; retries reuse it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct JobInput {
    #[garde(length(min = 1, max = 2000))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Object-storage key of an uploaded source image.
    #[garde(length(min = 1, max = 512))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
}

impl JobInput {
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            source_ref: None,
        }
    }

    pub fn source(source_ref: impl Into<String>) -> Self {
        Self {
            prompt: None,
            source_ref: Some(source_ref.into()),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Check field limits and the per-kind required fields.
    pub fn validate_for(&self, kind: JobKind) -> Result<(), JobError> {
        self.validate()
            .map_err(|report| JobError::Validation(report.to_string()))?;

        let has_prompt = self.prompt.as_deref().is_some_and(|p| !p.trim().is_empty());
        if kind.needs_prompt() && !has_prompt {
            return Err(JobError::Validation(format!("{kind} requires a prompt")));
        }
        if kind.needs_source() && self.source_ref.is_none() {
            return Err(JobError::Validation(format!("{kind} requires a source image")));
        }
        Ok(())
    }
}

/// A status change applied through the store's conditional update.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Claim {
        at: DateTime<Utc>,
    },
    Complete {
        result_ref: String,
        at: DateTime<Utc>,
    },
    Fail {
        reason: FailureReason,
        error: String,
        at: DateTime<Utc>,
    },
    Requeue {
        at: DateTime<Utc>,
    },
}

impl Transition {
    pub fn complete(result_ref: impl Into<String>, at: DateTime<Utc>) -> Self {
        Transition::Complete {
            result_ref: result_ref.into(),
            at,
        }
    }

    /// A failed job must always carry a summary, so a blank one falls back
    /// to the reason name.
    pub fn fail(reason: FailureReason, error: impl Into<String>, at: DateTime<Utc>) -> Self {
        let error = error.into();
        let error = if error.trim().is_empty() {
            reason.to_string()
        } else {
            error
        };
        Transition::Fail { reason, error, at }
    }

    pub fn from_status(&self) -> JobStatus {
        match self {
            Transition::Claim { .. } => JobStatus::Queued,
            Transition::Complete { .. } | Transition::Fail { .. } => JobStatus::Processing,
            Transition::Requeue { .. } => JobStatus::Failed,
        }
    }

    pub fn to_status(&self) -> JobStatus {
        match self {
            Transition::Claim { .. } => JobStatus::Processing,
            Transition::Complete { .. } => JobStatus::Completed,
            Transition::Fail { .. } => JobStatus::Failed,
            Transition::Requeue { .. } => JobStatus::Queued,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// A generation job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub input: JobInput,
    pub status: JobStatus,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    /// Dispatch ordering key. Equal to `created_at` until a retry resets it.
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result_ref: Option<String>,
    pub error: Option<String>,
    pub failure_reason: Option<FailureReason>,
    pub attempt_count: i32,
}

impl Job {
    pub fn new(kind: JobKind, input: JobInput, owner: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            input,
            status: JobStatus::Queued,
            owner: owner.into(),
            created_at: now,
            queued_at: now,
            started_at: None,
            completed_at: None,
            result_ref: None,
            error: None,
            failure_reason: None,
            attempt_count: 1,
        }
    }

    /// Apply `transition` in place. On an illegal move the record is left
    /// untouched.
    pub fn apply(&mut self, transition: &Transition) -> Result<(), InvalidTransition> {
        let to = transition.to_status();
        if self.status != transition.from_status() || !self.status.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.status,
                to,
            });
        }

        match transition {
            Transition::Claim { at } => {
                self.started_at = Some(*at);
            }
            Transition::Complete { result_ref, at } => {
                self.result_ref = Some(result_ref.clone());
                self.completed_at = Some(*at);
                self.error = None;
                self.failure_reason = None;
            }
            Transition::Fail { reason, error, at } => {
                self.result_ref = None;
                self.completed_at = Some(*at);
                self.error = Some(error.clone());
                self.failure_reason = Some(*reason);
            }
            Transition::Requeue { at } => {
                self.queued_at = *at;
                self.started_at = None;
                self.completed_at = None;
                self.result_ref = None;
                self.error = None;
                self.failure_reason = None;
                self.attempt_count += 1;
            }
        }
        self.status = to;
        Ok(())
    }

    /// `result_ref` iff completed, `completed_at` iff terminal, and a
    /// non-empty error on failure.
    pub fn is_consistent(&self) -> bool {
        let result_ok = self.result_ref.is_some() == (self.status == JobStatus::Completed);
        let completed_ok = self.completed_at.is_some() == self.status.is_terminal();
        let error_ok = self.status != JobStatus::Failed
            || self.error.as_deref().is_some_and(|e| !e.is_empty());
        result_ok && completed_ok && error_ok
    }
}
