use serde::Serialize;
use std::collections::HashMap;

use crate::directive::Directive;
use crate::status::Status;

/// Number of directives per stored status
///
/// Every category is always present, zero included.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub done: usize,
    pub in_progress: usize,
    pub not_done: usize,
}

impl StatusCounts {
    pub fn get(&self, status: Status) -> usize {
        match status {
            Status::Done => self.done,
            Status::InProgress => self.in_progress,
            Status::NotDone => self.not_done,
        }
    }

    /// Categories in display order, for the distribution chart
    pub fn entries(&self) -> [(Status, usize); 3] {
        Status::ALL.map(|status| (status, self.get(status)))
    }

    pub fn total(&self) -> usize {
        self.done + self.in_progress + self.not_done
    }
}

/// Mean progress of one department
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DepartmentProgress {
    pub name: String,
    pub mean_progress: i64,
}

/// Count directives per stored status
///
/// Rows whose stored status could not be read are left out of every category.
pub fn status_counts(records: &[Directive]) -> StatusCounts {
    let mut counts = StatusCounts::default();
    for record in records {
        match record.status {
            Some(Status::Done) => counts.done += 1,
            Some(Status::InProgress) => counts.in_progress += 1,
            Some(Status::NotDone) => counts.not_done += 1,
            None => {}
        }
    }
    counts
}

/// Mean progress per department, in order of first appearance
///
/// Missing progress counts as 0 and still counts toward the group size. The
/// mean is rounded half up. Sums are kept in `i128`, so stored rows with
/// out-of-range progress cannot overflow them.
pub fn department_progress(records: &[Directive]) -> Vec<DepartmentProgress> {
    let mut order: Vec<(&str, i128, i128)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for record in records {
        let slot = *index.entry(record.dept.as_str()).or_insert_with(|| {
            order.push((record.dept.as_str(), 0, 0));
            order.len() - 1
        });
        let group = &mut order[slot];
        group.1 += i128::from(record.progress_or_zero());
        group.2 += 1;
    }

    order
        .into_iter()
        .map(|(name, total, count)| DepartmentProgress {
            name: name.to_string(),
            mean_progress: round_half_up(total, count),
        })
        .collect()
}

fn round_half_up(total: i128, count: i128) -> i64 {
    let mean = (2 * total + count).div_euclid(2 * count);
    i64::try_from(mean).unwrap_or(if mean < 0 { i64::MIN } else { i64::MAX })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::DirectiveId;
    use crate::status::classify;
    use chrono::Utc;

    fn record(id: &str, dept: &str, progress: Option<i64>) -> Directive {
        Directive {
            id: DirectiveId::new(id),
            serial_no: None,
            task: format!("task {}", id),
            dept: dept.to_string(),
            progress,
            status: progress.map(classify),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn department_mean_rounds_to_nearest() {
        let records = vec![
            record("1", "기획", Some(10)),
            record("2", "기획", Some(20)),
            record("3", "기획", Some(33)),
        ];
        assert_eq!(
            department_progress(&records),
            vec![DepartmentProgress {
                name: "기획".to_string(),
                mean_progress: 21
            }]
        );
    }

    #[test]
    fn halves_round_up() {
        let records = vec![record("1", "a", Some(10)), record("2", "a", Some(11))];
        assert_eq!(department_progress(&records)[0].mean_progress, 11);
    }

    #[test]
    fn departments_keep_first_seen_order() {
        let records = vec![
            record("1", "총무", Some(50)),
            record("2", "감사", Some(100)),
            record("3", "총무", Some(0)),
        ];
        let names: Vec<_> = department_progress(&records)
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["총무", "감사"]);
    }

    #[test]
    fn missing_progress_counts_as_zero() {
        let records = vec![record("1", "a", Some(90)), record("2", "a", None)];
        assert_eq!(department_progress(&records)[0].mean_progress, 45);
    }

    #[test]
    fn extreme_stored_progress_does_not_overflow() {
        let records = vec![
            record("1", "a", Some(i64::MAX)),
            record("2", "a", Some(i64::MAX)),
            record("3", "b", Some(i64::MIN)),
            record("4", "b", Some(i64::MIN)),
            record("5", "c", Some(-3)),
        ];
        let means: Vec<_> = department_progress(&records)
            .into_iter()
            .map(|d| d.mean_progress)
            .collect();
        assert_eq!(means, vec![i64::MAX, i64::MIN, -3]);
    }

    #[test]
    fn zero_categories_are_reported() {
        let records = vec![
            record("1", "a", Some(95)),
            record("2", "a", Some(100)),
            record("3", "b", Some(50)),
        ];
        let counts = status_counts(&records);
        assert_eq!(
            counts,
            StatusCounts {
                done: 2,
                in_progress: 1,
                not_done: 0
            }
        );
        assert_eq!(
            counts.entries(),
            [
                (Status::Done, 2),
                (Status::InProgress, 1),
                (Status::NotDone, 0)
            ]
        );
    }

    #[test]
    fn empty_set() {
        assert_eq!(status_counts(&[]).total(), 0);
        assert!(department_progress(&[]).is_empty());
    }
}
