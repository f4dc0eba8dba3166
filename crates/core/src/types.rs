use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Maximum length of a task title, counted in characters after trimming.
pub const TASK_TITLE_MAX: usize = 100;
/// Maximum length of a checklist item name, counted in characters after trimming.
pub const CHECKLIST_NAME_MAX: usize = 200;

/// Titles of the boards created for every new user, in insertion order.
pub const DEFAULT_BOARD_TITLES: [&str; 3] = ["Università", "Lavoro", "Tempo Libero"];

/// Errors raised when an entity would be constructed in an invalid state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityError {
    #[error("{field} must be a positive integer")]
    NonPositiveId { field: &'static str },
    #[error("{field} must not be blank")]
    Blank { field: &'static str },
    #[error("{field} must not exceed {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("unknown task status: {0}")]
    UnknownStatus(String),
}

pub(crate) fn positive(value: i64, field: &'static str) -> Result<i64, EntityError> {
    if value > 0 {
        Ok(value)
    } else {
        Err(EntityError::NonPositiveId { field })
    }
}

pub(crate) fn non_blank(
    value: &str,
    field: &'static str,
    max: Option<usize>,
) -> Result<String, EntityError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EntityError::Blank { field });
    }
    if let Some(max) = max {
        if trimmed.chars().count() > max {
            return Err(EntityError::TooLong { field, max });
        }
    }
    Ok(trimmed.to_string())
}

/// Two-valued lifecycle state for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Todo,
    Completed,
}

impl TaskStatus {
    /// Returns the literal persisted in the `tasks.status` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "Da Fare",
            Self::Completed => "Completato",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = EntityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "Da Fare" => Ok(Self::Todo),
            "Completato" => Ok(Self::Completed),
            other => Err(EntityError::UnknownStatus(other.to_string())),
        }
    }
}

impl Serialize for TaskStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// Registered account.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    id: i64,
    username: String,
}

impl User {
    pub fn new(id: i64, username: &str) -> Result<Self, EntityError> {
        Ok(Self {
            id: positive(id, "user id")?,
            username: non_blank(username, "username", None)?,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

/// Named grouping of a user's tasks.
#[derive(Debug, Clone, Serialize)]
pub struct Board {
    id: i64,
    user_id: i64,
    title: String,
}

impl Board {
    pub fn new(id: i64, user_id: i64, title: &str) -> Result<Self, EntityError> {
        Ok(Self {
            id: positive(id, "board id")?,
            user_id: positive(user_id, "user id")?,
            title: non_blank(title, "board title", None)?,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }
}

/// Unit of work living on a board.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    id: i64,
    user_id: i64,
    title: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    deadline: Option<NaiveDate>,
    board_id: i64,
    status: TaskStatus,
}

impl Task {
    pub fn new(
        id: i64,
        user_id: i64,
        title: &str,
        description: Option<&str>,
        deadline: Option<NaiveDate>,
        board_id: i64,
        status: TaskStatus,
    ) -> Result<Self, EntityError> {
        Ok(Self {
            id: positive(id, "task id")?,
            user_id: positive(user_id, "user id")?,
            title: non_blank(title, "title", Some(TASK_TITLE_MAX))?,
            description: description.map(str::trim).unwrap_or_default().to_string(),
            deadline,
            board_id: positive(board_id, "board id")?,
            status,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn deadline(&self) -> Option<NaiveDate> {
        self.deadline
    }

    pub fn board_id(&self) -> i64 {
        self.board_id
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }
}

/// Sub-item of a task that can be completed independently.
#[derive(Debug, Clone, Serialize)]
pub struct ChecklistItem {
    id: i64,
    task_id: i64,
    name: String,
    is_completed: bool,
}

impl ChecklistItem {
    pub fn new(id: i64, task_id: i64, name: &str, is_completed: bool) -> Result<Self, EntityError> {
        Ok(Self {
            id: positive(id, "checklist item id")?,
            task_id: positive(task_id, "task id")?,
            name: non_blank(name, "checklist item name", Some(CHECKLIST_NAME_MAX))?,
            is_completed,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn task_id(&self) -> i64 {
        self.task_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_completed(&self) -> bool {
        self.is_completed
    }
}

/// Returns `true` when the checklist is non-empty and every item is completed.
///
/// An empty checklist never completes its task.
pub fn checklist_completes(total: usize, completed: usize) -> bool {
    total > 0 && completed == total
}

/// Input for creating a task. Status is always initialised to [`TaskStatus::Todo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub deadline: Option<NaiveDate>,
    pub board_id: i64,
}

macro_rules! identity_by_id {
    ($($ty:ty),+) => {
        $(
            impl PartialEq for $ty {
                fn eq(&self, other: &Self) -> bool {
                    self.id == other.id
                }
            }

            impl Eq for $ty {}

            impl Hash for $ty {
                fn hash<H: Hasher>(&self, state: &mut H) {
                    self.id.hash(state);
                }
            }
        )+
    };
}

identity_by_id!(User, Board, Task, ChecklistItem);

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "User[id={}, username={}]", self.id, self.username)
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let deadline = self
            .deadline
            .map(|date| date.to_string())
            .unwrap_or_else(|| "none".to_string());
        write!(
            f,
            "Task[id={}, user_id={}, title='{}', deadline={}, board_id={}, status='{}']",
            self.id, self.user_id, self.title, deadline, self.board_id, self.status
        )
    }
}

impl fmt::Display for ChecklistItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.is_completed { 'x' } else { ' ' };
        write!(
            f,
            "[{}] {} (id={}, task_id={})",
            mark, self.name, self.id, self.task_id
        )
    }
}
