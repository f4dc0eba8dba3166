//! Domain types shared by the storage gateway and the task service.

pub mod projection;
pub mod types;

pub use projection::{format_deadline, project_rows, TaskRow};
pub use types::{
    checklist_completes, Board, ChecklistItem, EntityError, NewTask, Task, TaskStatus, User,
    CHECKLIST_NAME_MAX, DEFAULT_BOARD_TITLES, TASK_TITLE_MAX,
};
