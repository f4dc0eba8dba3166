use std::{str::FromStr, sync::Arc};

use chrono::{Local, NaiveDate};
use metrics::counter;
use thiserror::Error;
use tracing::{error, info, warn};

use task_board_core::{
    project_rows, Board, ChecklistItem, NewTask, TaskRow, TaskStatus, User, CHECKLIST_NAME_MAX,
    TASK_TITLE_MAX,
};
use task_board_storage::{StorageError, TaskGateway};

/// Source of "today" used to reject past deadlines.
pub type Today = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

/// Validates caller input and orchestrates gateway calls for each use case.
#[derive(Clone)]
pub struct TaskService {
    gateway: Arc<dyn TaskGateway>,
    today: Today,
}

/// Result of a registration attempt that reached storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered { user_id: i64 },
    AlreadyExists,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("storage failure: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => Self::NotFound(what),
            other => Self::Storage(other),
        }
    }
}

impl ServiceError {
    fn metric_label(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotFound(_) => "not_found",
            Self::Storage(StorageError::Timeout(_)) => "timeout",
            Self::Storage(_) => "storage_error",
        }
    }
}

fn require_id(value: i64, field: &'static str) -> Result<i64, ServiceError> {
    if value > 0 {
        Ok(value)
    } else {
        Err(ServiceError::InvalidArgument(format!(
            "{field} must be a positive integer"
        )))
    }
}

fn require_text<'a>(value: &'a str, field: &'static str) -> Result<&'a str, ServiceError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ServiceError::InvalidArgument(format!(
            "{field} must not be blank"
        )))
    } else {
        Ok(trimmed)
    }
}

fn require_max_len(value: &str, field: &'static str, max: usize) -> Result<(), ServiceError> {
    if value.chars().count() > max {
        Err(ServiceError::InvalidArgument(format!(
            "{field} must not exceed {max} characters"
        )))
    } else {
        Ok(())
    }
}

fn require_status(value: &str) -> Result<TaskStatus, ServiceError> {
    let value = require_text(value, "status")?;
    TaskStatus::from_str(value).map_err(|err| ServiceError::InvalidArgument(err.to_string()))
}

fn observe<T>(op: &'static str, result: Result<T, ServiceError>) -> Result<T, ServiceError> {
    let label = match &result {
        Ok(_) => "ok",
        Err(err) => err.metric_label(),
    };
    counter!("service_operations_total", "op" => op, "result" => label).increment(1);

    match &result {
        Err(ServiceError::Storage(StorageError::Timeout(_))) => {
            counter!("storage_timeouts_total", "op" => op).increment(1);
            error!(stage = "service", op, "storage call timed out");
        }
        Err(ServiceError::Storage(err)) => {
            error!(stage = "service", op, error = %err, "storage failure");
        }
        Err(err) => warn!(stage = "service", op, error = %err, "operation rejected"),
        Ok(_) => {}
    }
    result
}

impl TaskService {
    pub fn new(gateway: Arc<dyn TaskGateway>) -> Self {
        Self {
            gateway,
            today: Arc::new(|| Local::now().date_naive()),
        }
    }

    /// Replaces the clock used to reject past deadlines.
    pub fn with_today(mut self, today: Today) -> Self {
        self.today = today;
        self
    }

    /// Returns the user for matching credentials, `None` otherwise.
    pub async fn login(&self, username: &str, password: &str) -> Result<Option<User>, ServiceError> {
        let result: Result<_, ServiceError> = async {
            let username = require_text(username, "username")?;
            require_text(password, "password")?;
            let user = self.gateway.authenticate(username, password).await?;
            match &user {
                Some(user) => info!(stage = "service", user_id = user.id(), "login succeeded"),
                None => warn!(stage = "service", username, "login failed"),
            }
            Ok(user)
        }
        .await;
        observe("login", result)
    }

    /// Registers a user together with the default boards.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
    ) -> Result<RegisterOutcome, ServiceError> {
        let result: Result<_, ServiceError> = async {
            let username = require_text(username, "username")?;
            require_text(password, "password")?;
            match self.gateway.register(username, password).await {
                Ok(user_id) => {
                    info!(stage = "service", user_id, username, "user registered");
                    Ok(RegisterOutcome::Registered { user_id })
                }
                Err(StorageError::Conflict(_)) => {
                    warn!(stage = "service", username, "username already registered");
                    Ok(RegisterOutcome::AlreadyExists)
                }
                Err(err) => Err(err.into()),
            }
        }
        .await;
        observe("register", result)
    }

    /// Creates a task on `board_id`, rejecting deadlines before today.
    pub async fn create_task(
        &self,
        user_id: i64,
        title: &str,
        description: Option<&str>,
        deadline: Option<NaiveDate>,
        board_id: i64,
    ) -> Result<i64, ServiceError> {
        let result: Result<_, ServiceError> = async {
            let user_id = require_id(user_id, "user id")?;
            let board_id = require_id(board_id, "board id")?;
            let title = require_text(title, "title")?;
            require_max_len(title, "title", TASK_TITLE_MAX)?;
            if let Some(deadline) = deadline {
                if deadline < (self.today)() {
                    return Err(ServiceError::InvalidArgument(
                        "deadline must not be in the past".to_string(),
                    ));
                }
            }

            let task = NewTask {
                user_id,
                title: title.to_string(),
                description: description.map(str::trim).unwrap_or_default().to_string(),
                deadline,
                board_id,
            };
            let task_id = self.gateway.create_task(&task).await?;
            info!(stage = "service", task_id, user_id, board_id, "task created");
            Ok(task_id)
        }
        .await;
        observe("create_task", result)
    }

    /// Moves a task to `status`. Missing tasks are not an error.
    pub async fn move_task(&self, task_id: i64, status: &str) -> Result<(), ServiceError> {
        let result: Result<_, ServiceError> = async {
            let task_id = require_id(task_id, "task id")?;
            let status = require_status(status)?;
            if self.gateway.update_status(task_id, status).await? {
                info!(stage = "service", task_id, status = %status, "task moved");
            } else {
                warn!(stage = "service", task_id, status = %status, "status update touched no task");
            }
            Ok(())
        }
        .await;
        observe("move_task", result)
    }

    pub async fn delete_task(&self, task_id: i64) -> Result<(), ServiceError> {
        let result: Result<_, ServiceError> = async {
            let task_id = require_id(task_id, "task id")?;
            if !self.gateway.delete_task(task_id).await? {
                return Err(ServiceError::NotFound("task"));
            }
            info!(stage = "service", task_id, "task deleted");
            Ok(())
        }
        .await;
        observe("delete_task", result)
    }

    /// Grants `target_username` visibility of a task.
    pub async fn share_task(&self, task_id: i64, target_username: &str) -> Result<(), ServiceError> {
        let result: Result<_, ServiceError> = async {
            let task_id = require_id(task_id, "task id")?;
            let target = require_text(target_username, "share target username")?;
            self.gateway.share_task(task_id, target).await?;
            info!(stage = "service", task_id, target, "task shared");
            Ok(())
        }
        .await;
        observe("share_task", result)
    }

    pub async fn boards(&self, user_id: i64) -> Result<Vec<Board>, ServiceError> {
        let result: Result<_, ServiceError> = async {
            let user_id = require_id(user_id, "user id")?;
            Ok(self.gateway.boards(user_id).await?)
        }
        .await;
        observe("boards", result)
    }

    pub async fn checklist(&self, task_id: i64) -> Result<Vec<ChecklistItem>, ServiceError> {
        let result: Result<_, ServiceError> = async {
            let task_id = require_id(task_id, "task id")?;
            Ok(self.gateway.checklist(task_id).await?)
        }
        .await;
        observe("checklist", result)
    }

    pub async fn add_checklist_item(&self, task_id: i64, name: &str) -> Result<i64, ServiceError> {
        let result: Result<_, ServiceError> = async {
            let task_id = require_id(task_id, "task id")?;
            let name = require_text(name, "checklist item name")?;
            require_max_len(name, "checklist item name", CHECKLIST_NAME_MAX)?;
            let item_id = self.gateway.add_checklist_item(task_id, name).await?;
            info!(stage = "service", task_id, item_id, "checklist item added");
            Ok(item_id)
        }
        .await;
        observe("add_checklist_item", result)
    }

    /// Toggles one item and reports whether the task was auto-completed.
    pub async fn toggle_checklist_item(
        &self,
        item_id: i64,
        task_id: i64,
    ) -> Result<bool, ServiceError> {
        let result: Result<_, ServiceError> = async {
            let item_id = require_id(item_id, "checklist item id")?;
            let task_id = require_id(task_id, "task id")?;
            let completed = self.gateway.toggle_checklist_item(item_id, task_id).await?;
            if completed {
                info!(stage = "service", task_id, item_id, "task auto-completed");
            }
            Ok(completed)
        }
        .await;
        observe("toggle_checklist_item", result)
    }

    pub async fn delete_checklist_item(&self, item_id: i64) -> Result<(), ServiceError> {
        let result: Result<_, ServiceError> = async {
            let item_id = require_id(item_id, "checklist item id")?;
            self.gateway.delete_checklist_item(item_id).await?;
            Ok(())
        }
        .await;
        observe("delete_checklist_item", result)
    }

    /// Rows of one board's tasks in `status`, ready for display.
    pub async fn board_rows(&self, board_id: i64, status: &str) -> Result<Vec<TaskRow>, ServiceError> {
        let result: Result<_, ServiceError> = async {
            let board_id = require_id(board_id, "board id")?;
            let status = require_status(status)?;
            let tasks = self.gateway.tasks_by_board(board_id).await?;
            Ok(project_rows(&tasks, status))
        }
        .await;
        observe("board_rows", result)
    }

    /// Rows of the tasks shared with `user_id` in `status`, ready for display.
    pub async fn shared_rows(&self, user_id: i64, status: &str) -> Result<Vec<TaskRow>, ServiceError> {
        let result: Result<_, ServiceError> = async {
            let user_id = require_id(user_id, "user id")?;
            let status = require_status(status)?;
            let tasks = self.gateway.tasks_shared_with(user_id).await?;
            Ok(project_rows(&tasks, status))
        }
        .await;
        observe("shared_rows", result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use task_board_storage::{Database, MemoryGateway, SqliteGateway};

    fn fixed_today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 14).expect("date")
    }

    fn memory_service() -> (TaskService, Arc<MemoryGateway>) {
        let gateway = Arc::new(MemoryGateway::new());
        let service = TaskService::new(gateway.clone()).with_today(Arc::new(fixed_today));
        (service, gateway)
    }

    async fn registered(service: &TaskService, username: &str) -> (i64, i64) {
        let RegisterOutcome::Registered { user_id } =
            service.register(username, "pw").await.expect("register")
        else {
            panic!("expected a new registration");
        };
        let board_id = service.boards(user_id).await.expect("boards")[0].id();
        (user_id, board_id)
    }

    #[tokio::test]
    async fn register_then_login_returns_trimmed_username() {
        let (service, _) = memory_service();
        registered(&service, "  alice  ").await;

        let user = service
            .login("alice", "pw")
            .await
            .expect("login")
            .expect("user found");
        assert_eq!(user.username(), "alice");
        assert!(service.login("alice", "nope").await.expect("login").is_none());
    }

    #[tokio::test]
    async fn second_registration_reports_already_exists() {
        let (service, gateway) = memory_service();
        let (user_id, _) = registered(&service, "alice").await;

        let outcome = service.register("alice", "other").await.expect("register");
        assert_eq!(outcome, RegisterOutcome::AlreadyExists);
        assert_eq!(gateway.user_count("alice"), 1);
        assert_eq!(service.boards(user_id).await.expect("boards").len(), 3);
    }

    #[tokio::test]
    async fn failed_board_insert_surfaces_as_storage_error() {
        let (service, gateway) = memory_service();
        gateway.fail_board_inserts(true);

        let err = service.register("alice", "pw").await.unwrap_err();
        assert!(matches!(err, ServiceError::Storage(StorageError::Constraint(_))));
        assert_eq!(gateway.user_count("alice"), 0);
    }

    #[tokio::test]
    async fn blank_credentials_fail_fast() {
        let (service, gateway) = memory_service();
        assert!(matches!(
            service.register("   ", "pw").await,
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            service.login("alice", " ").await,
            Err(ServiceError::InvalidArgument(_))
        ));
        assert_eq!(gateway.inserted_rows(), 0);
    }

    #[tokio::test]
    async fn past_deadline_is_rejected_before_any_write() {
        let (service, gateway) = memory_service();
        let (user_id, board_id) = registered(&service, "alice").await;
        let writes_before = gateway.inserted_rows();
        let yesterday = fixed_today() - Duration::days(1);

        let err = service
            .create_task(user_id, "Late", None, Some(yesterday), board_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(_)));
        assert_eq!(gateway.inserted_rows(), writes_before);

        service
            .create_task(user_id, "Today", None, Some(fixed_today()), board_id)
            .await
            .expect("deadline of today is accepted");
    }

    #[tokio::test]
    async fn create_task_validates_ids_and_title() {
        let (service, _) = memory_service();
        let (user_id, board_id) = registered(&service, "alice").await;

        for (user, title, board) in [
            (0, "ok", board_id),
            (user_id, "ok", -3),
            (user_id, "  ", board_id),
        ] {
            assert!(matches!(
                service.create_task(user, title, None, None, board).await,
                Err(ServiceError::InvalidArgument(_))
            ));
        }

        let long_title = "t".repeat(TASK_TITLE_MAX + 1);
        assert!(matches!(
            service.create_task(user_id, &long_title, None, None, board_id).await,
            Err(ServiceError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn checklist_toggle_auto_completes_only_when_all_done() {
        let (service, _) = memory_service();
        let (user_id, board_id) = registered(&service, "alice").await;
        let task_id = service
            .create_task(user_id, "Move house", Some("boxes"), None, board_id)
            .await
            .expect("task");
        let a = service.add_checklist_item(task_id, "A").await.expect("A");
        let b = service.add_checklist_item(task_id, "B").await.expect("B");

        assert!(!service.toggle_checklist_item(a, task_id).await.expect("A"));
        let todo = service.board_rows(board_id, "Da Fare").await.expect("rows");
        assert_eq!(todo.len(), 1);

        assert!(service.toggle_checklist_item(b, task_id).await.expect("B"));
        assert!(service.board_rows(board_id, "Da Fare").await.expect("rows").is_empty());
        let done = service.board_rows(board_id, "Completato").await.expect("rows");
        assert_eq!(done[0].id, task_id);
        assert_eq!(done[0].description, "boxes");

        assert!(!service.toggle_checklist_item(b, task_id).await.expect("uncheck"));
        assert_eq!(
            service.board_rows(board_id, "Completato").await.expect("rows").len(),
            1
        );
    }

    #[tokio::test]
    async fn checklist_is_listed_in_insertion_order_and_items_delete() {
        let (service, _) = memory_service();
        let (user_id, board_id) = registered(&service, "alice").await;
        let task_id = service
            .create_task(user_id, "Party", None, None, board_id)
            .await
            .expect("task");
        let first = service.add_checklist_item(task_id, " cake ").await.expect("item");
        service.add_checklist_item(task_id, "music").await.expect("item");

        let items = service.checklist(task_id).await.expect("checklist");
        let names: Vec<&str> = items.iter().map(ChecklistItem::name).collect();
        assert_eq!(names, vec!["cake", "music"]);

        service.delete_checklist_item(first).await.expect("delete");
        assert_eq!(service.checklist(task_id).await.expect("checklist").len(), 1);

        assert!(matches!(
            service.add_checklist_item(task_id, "").await,
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            service.delete_checklist_item(0).await,
            Err(ServiceError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn checklist_item_name_is_bounded() {
        let (service, _) = memory_service();
        let (user_id, board_id) = registered(&service, "alice").await;
        let task_id = service
            .create_task(user_id, "Packing", None, None, board_id)
            .await
            .expect("task");

        let too_long = "x".repeat(CHECKLIST_NAME_MAX + 1);
        assert!(matches!(
            service.add_checklist_item(task_id, &too_long).await,
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(service.checklist(task_id).await.expect("checklist").is_empty());

        let at_limit = "x".repeat(CHECKLIST_NAME_MAX);
        service
            .add_checklist_item(task_id, &at_limit)
            .await
            .expect("name at the limit is accepted");
        assert_eq!(service.checklist(task_id).await.expect("checklist").len(), 1);
    }

    #[tokio::test]
    async fn move_task_accepts_only_known_statuses() {
        let (service, _) = memory_service();
        let (user_id, board_id) = registered(&service, "alice").await;
        let task_id = service
            .create_task(user_id, "Read", None, None, board_id)
            .await
            .expect("task");

        service.move_task(task_id, " Completato ").await.expect("move");
        assert_eq!(
            service.board_rows(board_id, "Completato").await.expect("rows").len(),
            1
        );
        service.move_task(task_id, "Da Fare").await.expect("move back");
        assert_eq!(service.board_rows(board_id, "Da Fare").await.expect("rows").len(), 1);

        assert!(matches!(
            service.move_task(task_id, "Archived").await,
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            service.move_task(task_id, "").await,
            Err(ServiceError::InvalidArgument(_))
        ));
        service
            .move_task(9_999, "Completato")
            .await
            .expect("missing task is not an error");
    }

    #[tokio::test]
    async fn deleting_missing_task_is_not_found() {
        let (service, _) = memory_service();
        let (user_id, board_id) = registered(&service, "alice").await;
        let task_id = service
            .create_task(user_id, "Temp", None, None, board_id)
            .await
            .expect("task");

        service.delete_task(task_id).await.expect("delete");
        assert!(matches!(
            service.delete_task(task_id).await,
            Err(ServiceError::NotFound("task"))
        ));
        assert!(matches!(
            service.delete_task(0).await,
            Err(ServiceError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn sharing_follows_target_resolution() {
        let (service, gateway) = memory_service();
        let (user_id, board_id) = registered(&service, "alice").await;
        let (bob_id, _) = registered(&service, "bob").await;
        let task_id = service
            .create_task(user_id, "Plan trip", None, None, board_id)
            .await
            .expect("task");

        assert!(matches!(
            service.share_task(task_id, "ghost").await,
            Err(ServiceError::NotFound("user"))
        ));
        assert_eq!(gateway.share_count(task_id), 0);

        service.share_task(task_id, " bob ").await.expect("share");
        assert_eq!(gateway.share_count(task_id), 1);

        let rows = service.shared_rows(bob_id, "Da Fare").await.expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "Plan trip");
        assert!(service
            .shared_rows(bob_id, "Completato")
            .await
            .expect("rows")
            .is_empty());
    }

    #[tokio::test]
    async fn rows_format_deadline_day_first() {
        let (service, _) = memory_service();
        let (user_id, board_id) = registered(&service, "alice").await;
        let deadline = NaiveDate::from_ymd_opt(2027, 2, 3);
        service
            .create_task(user_id, "Exam", None, deadline, board_id)
            .await
            .expect("task");
        service
            .create_task(user_id, "Someday", None, None, board_id)
            .await
            .expect("task");

        let rows = service.board_rows(board_id, "Da Fare").await.expect("rows");
        assert_eq!(rows[0].deadline, "03-02-2027");
        assert_eq!(rows[1].deadline, "");
    }

    #[tokio::test]
    async fn service_runs_against_sqlite_gateway() {
        let database = Database::connect("sqlite::memory:").await.expect("connect");
        database.run_migrations().await.expect("migrations");
        let service = TaskService::new(Arc::new(SqliteGateway::new(database)))
            .with_today(Arc::new(fixed_today));

        let (user_id, board_id) = registered(&service, "alice").await;
        let task_id = service
            .create_task(user_id, "Report", None, Some(fixed_today()), board_id)
            .await
            .expect("task");
        let item = service.add_checklist_item(task_id, "draft").await.expect("item");
        assert!(service.toggle_checklist_item(item, task_id).await.expect("toggle"));
        assert_eq!(
            service.board_rows(board_id, "Completato").await.expect("rows").len(),
            1
        );
    }
}
