use clap::ValueEnum;

use crate::task::{Status, Task};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum StatusFilter {
    #[default]
    All,
    Done,
    Pending,
}

impl StatusFilter {
    pub fn admits(self, status: Status) -> bool {
        match self {
            Self::All => true,
            Self::Done => status == Status::Done,
            Self::Pending => status == Status::Pending,
        }
    }
}

/// Case-insensitive substring search over task titles. Only the empty query
/// matches every task; whitespace is part of the needle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskQuery {
    needle: Option<String>,
}

impl TaskQuery {
    pub fn new(raw: &str) -> Self {
        if raw.is_empty() {
            return Self { needle: None };
        }
        Self {
            needle: Some(raw.to_lowercase()),
        }
    }

    pub fn any() -> Self {
        Self::default()
    }

    pub fn matches(&self, task: &Task) -> bool {
        match &self.needle {
            Some(needle) => task.title.to_lowercase().contains(needle),
            None => true,
        }
    }
}

pub fn matches(task: &Task, filter: StatusFilter, query: &TaskQuery) -> bool {
    filter.admits(task.status) && query.matches(task)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::task::TaskMeta;

    fn task(title: &str, status: Status) -> Task {
        let mut task = Task::new_pending(title.to_string(), TaskMeta::default(), Utc::now());
        task.status = status;
        task
    }

    #[test]
    fn status_filter_selects_by_status() {
        let done = task("Done thing", Status::Done);
        let open = task("Open thing", Status::Pending);

        assert!(StatusFilter::All.admits(done.status));
        assert!(StatusFilter::Done.admits(done.status));
        assert!(!StatusFilter::Done.admits(open.status));
        assert!(StatusFilter::Pending.admits(open.status));
    }

    #[test]
    fn query_is_case_insensitive_substring() {
        let t = task("Buy Milk", Status::Pending);
        assert!(TaskQuery::new("milk").matches(&t));
        assert!(TaskQuery::new("BUY ").matches(&t));
        assert!(!TaskQuery::new("bread").matches(&t));
        assert!(TaskQuery::new("").matches(&t));
        assert!(TaskQuery::any().matches(&t));
    }

    #[test]
    fn query_whitespace_is_significant() {
        let milk = task("Buy milk", Status::Pending);
        let shake = task("milkshake", Status::Pending);
        let query = TaskQuery::new("milk ");
        assert!(!query.matches(&milk));
        assert!(!query.matches(&shake));

        let blank = TaskQuery::new(" ");
        assert!(blank.matches(&milk));
        assert!(!blank.matches(&shake));
    }

    #[test]
    fn combined_match_needs_both() {
        let t = task("Write report", Status::Done);
        assert!(matches(&t, StatusFilter::Done, &TaskQuery::new("report")));
        assert!(!matches(&t, StatusFilter::Pending, &TaskQuery::new("report")));
        assert!(!matches(&t, StatusFilter::Done, &TaskQuery::new("memo")));
    }
}
