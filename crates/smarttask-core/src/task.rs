use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Done,
}

impl Status {
    pub fn toggled(self) -> Self {
        match self {
            Self::Pending => Self::Done,
            Self::Done => Self::Pending,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done => "done",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "done" | "completed" => Some(Self::Done),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,

    pub status: Status,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Optional metadata supplied when a task is created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskMeta {
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub priority: Option<String>,
}

/// Fields an edit may change. `None` keeps the current value; for the
/// optional fields `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub due_date: Option<Option<String>>,
    pub priority: Option<Option<String>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.due_date.is_none()
            && self.priority.is_none()
    }
}

impl Task {
    pub fn new_pending(title: String, meta: TaskMeta, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title,
            description: clean_optional(meta.description),
            due_date: clean_optional(meta.due_date),
            priority: clean_optional(meta.priority),
            status: Status::Pending,
            created_at: now,
            updated_at: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == Status::Done
    }

    /// Applies `patch` to a copy of this task. The title is re-validated; id,
    /// status and creation time are never touched.
    pub fn patched(&self, patch: &TaskPatch, now: DateTime<Utc>) -> StoreResult<Self> {
        let mut next = self.clone();
        if let Some(title) = &patch.title {
            next.title = normalize_title(title)?;
        }
        if let Some(description) = &patch.description {
            next.description = clean_optional(description.clone());
        }
        if let Some(due_date) = &patch.due_date {
            next.due_date = clean_optional(due_date.clone());
        }
        if let Some(priority) = &patch.priority {
            next.priority = clean_optional(priority.clone());
        }
        next.updated_at = Some(now);
        Ok(next)
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }
}

pub fn normalize_title(raw: &str) -> StoreResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(StoreError::validation("task title cannot be empty"));
    }
    Ok(trimmed.to_string())
}

fn clean_optional(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.is_empty())
}
