use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{AssignmentId, FeedbackId, SubmissionId, UserId};

pub const ASSIGNMENTS_TABLE: &str = "assignments";
pub const SUBMISSIONS_TABLE: &str = "submissions";
pub const FEEDBACK_TABLE: &str = "feedback";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub assignment_id: AssignmentId,
    pub student_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_spent_minutes: Option<u32>,
    pub draft_url: String,
    #[serde(default)]
    pub transcript_url: Option<String>,
    pub status: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub id: FeedbackId,
    pub submission_id: SubmissionId,
    pub author_role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rubric_scores: Option<serde_json::Map<String, Value>>,
    pub created_at: DateTime<Utc>,
}

/// Row written by a successful submission attempt.
///
/// `transcript_url` is serialized as `null` when absent so the stored record
/// carries an explicit empty reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSubmission {
    pub assignment_id: AssignmentId,
    pub student_id: UserId,
    pub reflection: Option<String>,
    pub time_spent_minutes: Option<u32>,
    pub draft_url: String,
    pub transcript_url: Option<String>,
    pub status: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestRequest {
    pub student_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestResponse {
    #[serde(default)]
    pub digest: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_url: Option<String>,
}

impl DigestResponse {
    /// The signed link, ignoring blank strings some deployments send instead of `null`.
    pub fn signed_url(&self) -> Option<&str> {
        self.signed_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}
