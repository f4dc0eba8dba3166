use chrono::NaiveDate;
use serde::Serialize;

use crate::types::{Task, TaskStatus};

const DEADLINE_FORMAT: &str = "%d-%m-%Y";

/// Display-ready projection of a task: id, title, description, formatted deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRow {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub deadline: String,
}

impl From<&Task> for TaskRow {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id(),
            title: task.title().to_string(),
            description: task.description().to_string(),
            deadline: format_deadline(task.deadline()),
        }
    }
}

/// Formats a deadline as `dd-mm-yyyy`, or an empty string when absent.
pub fn format_deadline(deadline: Option<NaiveDate>) -> String {
    deadline
        .map(|date| date.format(DEADLINE_FORMAT).to_string())
        .unwrap_or_default()
}

/// Keeps only the tasks in `status` and projects them into rows, preserving order.
pub fn project_rows(tasks: &[Task], status: TaskStatus) -> Vec<TaskRow> {
    tasks
        .iter()
        .filter(|task| task.status() == status)
        .map(TaskRow::from)
        .collect()
}
