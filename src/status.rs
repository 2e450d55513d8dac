use serde::{Deserialize, Deserializer, Serialize};

/// Progress below this value counts as not done
pub const IN_PROGRESS_THRESHOLD: i64 = 20;

/// Progress at or above this value counts as done
pub const DONE_THRESHOLD: i64 = 90;

/// Status of a directive, derived from its progress
///
/// On the wire the status is stored as its Korean label so existing rows in
/// the `directives` table keep their meaning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Status {
    /// 이행완료 - progress at or above 90
    #[serde(rename = "이행완료")]
    Done,

    /// 진행중 - progress from 20 up to 89
    #[serde(rename = "진행중")]
    InProgress,

    /// 미이행 - progress below 20
    #[serde(rename = "미이행")]
    NotDone,
}

impl Status {
    /// All categories in display order (done, in progress, not done)
    pub const ALL: [Status; 3] = [Status::Done, Status::InProgress, Status::NotDone];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Done => "이행완료",
            Self::InProgress => "진행중",
            Self::NotDone => "미이행",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "이행완료" => Some(Self::Done),
            "진행중" => Some(Self::InProgress),
            "미이행" => Some(Self::NotDone),
            _ => None,
        }
    }

    /// Hex colour used for cards, badges and chart slices
    pub fn color(&self) -> &'static str {
        match self {
            Self::Done => "#10b981",
            Self::InProgress => "#f59e0b",
            Self::NotDone => "#ef4444",
        }
    }

    /// Same colour as an RGB triple
    pub fn rgb(&self) -> (u8, u8, u8) {
        match self {
            Self::Done => (16, 185, 129),
            Self::InProgress => (245, 158, 11),
            Self::NotDone => (239, 68, 68),
        }
    }
}

/// Classify a progress percentage
///
/// Total over every integer: negative values fall through to not done and
/// anything above 100 is done.
///
/// # Examples
/// ```
/// use ed_dash::status::{Status, classify};
///
/// assert_eq!(classify(19), Status::NotDone);
/// assert_eq!(classify(20), Status::InProgress);
/// assert_eq!(classify(90), Status::Done);
/// ```
pub fn classify(progress: i64) -> Status {
    if progress >= DONE_THRESHOLD {
        Status::Done
    } else if progress >= IN_PROGRESS_THRESHOLD {
        Status::InProgress
    } else {
        Status::NotDone
    }
}

/// Classify raw form input, failing safe to not done when it does not parse
pub fn classify_input(input: &str) -> Status {
    match input.trim().parse::<i64>() {
        Ok(progress) => classify(progress),
        Err(_) => Status::NotDone,
    }
}

/// Reads a stored status, tolerating unknown labels and nulls.
pub(crate) fn lenient_status<'de, D>(deserializer: D) -> Result<Option<Status>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(|value| value.as_str())
        .and_then(Status::from_label))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds() {
        for p in 0..20 {
            assert_eq!(classify(p), Status::NotDone, "progress {}", p);
        }
        for p in 20..90 {
            assert_eq!(classify(p), Status::InProgress, "progress {}", p);
        }
        for p in 90..=100 {
            assert_eq!(classify(p), Status::Done, "progress {}", p);
        }
    }

    #[test]
    fn out_of_range_values_are_classified() {
        assert_eq!(classify(-1), Status::NotDone);
        assert_eq!(classify(i64::MIN), Status::NotDone);
        assert_eq!(classify(101), Status::Done);
        assert_eq!(classify(i64::MAX), Status::Done);
    }

    #[test]
    fn unparseable_input_is_not_done() {
        assert_eq!(classify_input("abc"), Status::NotDone);
        assert_eq!(classify_input(""), Status::NotDone);
        assert_eq!(classify_input(" 95 "), Status::Done);
        assert_eq!(classify_input("45"), Status::InProgress);
    }

    #[test]
    fn labels_round_trip_through_serde() {
        let json = serde_json::to_string(&Status::InProgress).unwrap();
        assert_eq!(json, "\"진행중\"");
        let parsed: Status = serde_json::from_str("\"이행완료\"").unwrap();
        assert_eq!(parsed, Status::Done);
        for status in Status::ALL {
            assert_eq!(Status::from_label(status.label()), Some(status));
        }
    }
}
