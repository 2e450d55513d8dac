use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::status::{Status, classify, lenient_status};

/// Backend-assigned identifier of a directive
///
/// The backend may use integer or uuid keys, so the id is kept as its textual
/// form and only ever echoed back in filters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct DirectiveId(String);

impl DirectiveId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DirectiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for DirectiveId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(s) => Ok(Self(s)),
            serde_json::Value::Number(n) => Ok(Self(n.to_string())),
            other => Err(serde::de::Error::custom(format!(
                "unsupported directive id: {}",
                other
            ))),
        }
    }
}

/// A row of the `directives` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Directive {
    pub id: DirectiveId,
    #[serde(default)]
    pub serial_no: Option<String>,
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub dept: String,
    /// Absent when the stored value is null or not a number
    #[serde(default, deserialize_with = "lenient_progress")]
    pub progress: Option<i64>,
    /// Absent when the stored label is null or unknown
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: Option<Status>,
    pub created_at: DateTime<Utc>,
}

impl Directive {
    /// Progress with missing values read as 0
    pub fn progress_or_zero(&self) -> i64 {
        self.progress.unwrap_or(0)
    }
}

/// Payload for inserting a directive
///
/// Built only through [`NewDirective::new`], which derives the status from the
/// progress so the stored status can never disagree with it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewDirective {
    serial_no: String,
    task: String,
    dept: String,
    progress: i64,
    status: Status,
}

impl NewDirective {
    pub fn new(serial_no: String, task: String, dept: String, progress: i64) -> Self {
        Self {
            serial_no,
            task,
            dept,
            progress,
            status: classify(progress),
        }
    }

    pub fn serial_no(&self) -> &str {
        &self.serial_no
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn dept(&self) -> &str {
        &self.dept
    }

    pub fn progress(&self) -> i64 {
        self.progress
    }

    pub fn status(&self) -> Status {
        self.status
    }
}

/// Full-field update of an existing directive, status re-derived from progress
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DirectivePatch {
    task: String,
    dept: String,
    progress: i64,
    status: Status,
}

impl DirectivePatch {
    pub fn new(task: String, dept: String, progress: i64) -> Self {
        Self {
            task,
            dept,
            progress,
            status: classify(progress),
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn dept(&self) -> &str {
        &self.dept
    }

    pub fn progress(&self) -> i64 {
        self.progress
    }

    pub fn status(&self) -> Status {
        self.status
    }
}

fn lenient_progress<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Some(serde_json::Value::String(s)) => parse_leading_int(&s),
        _ => None,
    })
}

/// Integer prefix of a string, e.g. "42%" reads as 42
fn parse_leading_int(s: &str) -> Option<i64> {
    let s = s.trim();
    let end = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    s[..end].parse().ok()
}
