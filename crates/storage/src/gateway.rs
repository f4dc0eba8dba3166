use std::{future::Future, time::Duration};

use async_trait::async_trait;
use tracing::{debug, warn};

use task_board_core::{checklist_completes, Board, ChecklistItem, NewTask, Task, TaskStatus, User};

use crate::{credentials, Database, StorageError};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Persistence capability consumed by the task service.
///
/// Implementations own the only writable path to entity state. Every call is a
/// self-contained unit of work; only [`TaskGateway::register`] spans a
/// multi-statement transaction.
#[async_trait]
pub trait TaskGateway: Send + Sync {
    /// Returns the user when `username` exists and `password` matches.
    ///
    /// Unknown users and wrong passwords are indistinguishable.
    async fn authenticate(&self, username: &str, password: &str)
        -> Result<Option<User>, StorageError>;

    /// Creates a user and its default boards atomically, returning the user id.
    ///
    /// Fails with [`StorageError::Conflict`] when the username is taken.
    async fn register(&self, username: &str, password: &str) -> Result<i64, StorageError>;

    /// Inserts a task in [`TaskStatus::Todo`] and returns its id.
    async fn create_task(&self, task: &NewTask) -> Result<i64, StorageError>;

    /// Overwrites a task status. Returns whether a row was touched.
    async fn update_status(&self, task_id: i64, status: TaskStatus) -> Result<bool, StorageError>;

    /// Deletes a task. Returns whether a row was removed.
    async fn delete_task(&self, task_id: i64) -> Result<bool, StorageError>;

    /// Shares a task with the user named `target_username`.
    ///
    /// Fails with [`StorageError::NotFound`] when the username does not resolve.
    async fn share_task(&self, task_id: i64, target_username: &str) -> Result<(), StorageError>;

    async fn checklist(&self, task_id: i64) -> Result<Vec<ChecklistItem>, StorageError>;

    async fn add_checklist_item(&self, task_id: i64, name: &str) -> Result<i64, StorageError>;

    /// Flips one item, then completes the task when its whole checklist is done.
    ///
    /// Returns `true` when every checklist item is completed after the flip;
    /// the task is then set to [`TaskStatus::Completed`]. Unchecking never
    /// reverts a completed task.
    async fn toggle_checklist_item(&self, item_id: i64, task_id: i64)
        -> Result<bool, StorageError>;

    async fn delete_checklist_item(&self, item_id: i64) -> Result<(), StorageError>;

    async fn tasks_by_board(&self, board_id: i64) -> Result<Vec<Task>, StorageError>;

    async fn tasks_shared_with(&self, user_id: i64) -> Result<Vec<Task>, StorageError>;

    async fn boards(&self, user_id: i64) -> Result<Vec<Board>, StorageError>;
}

/// Production gateway backed by the SQLite pool.
#[derive(Clone)]
pub struct SqliteGateway {
    database: Database,
    call_timeout: Duration,
}

impl SqliteGateway {
    pub fn new(database: Database) -> Self {
        Self {
            database,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Overrides the per-call timeout.
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    async fn bounded<T, F>(&self, op: &'static str, call: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>> + Send,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(stage = "storage", op, timeout_ms = self.call_timeout.as_millis() as u64, "storage call timed out");
                Err(StorageError::Timeout(op))
            }
        }
    }

    async fn register_in_tx(&self, username: &str, password: &str) -> Result<i64, StorageError> {
        let digest = credentials::hash_password(password);
        let mut tx = self.database.begin().await?;

        let user_id = self.database.users().insert(&mut tx, username, &digest).await?;
        let boards = self
            .database
            .boards()
            .insert_defaults(&mut tx, user_id)
            .await?;

        tx.commit().await?;
        debug!(stage = "storage", user_id, boards, "user registered");
        Ok(user_id)
    }

    async fn toggle_then_complete(&self, item_id: i64, task_id: i64) -> Result<bool, StorageError> {
        let checklist = self.database.checklist();
        if !checklist.toggle(item_id).await? {
            debug!(stage = "storage", item_id, "toggle touched no checklist item");
        }

        let (total, completed) = checklist.progress(task_id).await?;
        if !checklist_completes(total, completed) {
            return Ok(false);
        }

        self.database
            .tasks()
            .update_status(task_id, TaskStatus::Completed)
            .await?;
        Ok(true)
    }

    async fn share_by_username(&self, task_id: i64, target_username: &str) -> Result<(), StorageError> {
        let user_id = self
            .database
            .users()
            .find_id(target_username)
            .await?
            .ok_or(StorageError::NotFound("user"))?;
        self.database.shares().insert(task_id, user_id).await
    }
}

#[async_trait]
impl TaskGateway for SqliteGateway {
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<User>, StorageError> {
        let found = self
            .bounded("authenticate", self.database.users().find_credentials(username))
            .await?;
        Ok(found.and_then(|(user, stored)| {
            credentials::verify_password(password, &stored).then_some(user)
        }))
    }

    async fn register(&self, username: &str, password: &str) -> Result<i64, StorageError> {
        self.bounded("register", self.register_in_tx(username, password))
            .await
    }

    async fn create_task(&self, task: &NewTask) -> Result<i64, StorageError> {
        self.bounded("create_task", self.database.tasks().insert(task))
            .await
    }

    async fn update_status(&self, task_id: i64, status: TaskStatus) -> Result<bool, StorageError> {
        self.bounded(
            "update_status",
            self.database.tasks().update_status(task_id, status),
        )
        .await
    }

    async fn delete_task(&self, task_id: i64) -> Result<bool, StorageError> {
        self.bounded("delete_task", self.database.tasks().delete(task_id))
            .await
    }

    async fn share_task(&self, task_id: i64, target_username: &str) -> Result<(), StorageError> {
        self.bounded("share_task", self.share_by_username(task_id, target_username))
            .await
    }

    async fn checklist(&self, task_id: i64) -> Result<Vec<ChecklistItem>, StorageError> {
        self.bounded("checklist", self.database.checklist().list_for_task(task_id))
            .await
    }

    async fn add_checklist_item(&self, task_id: i64, name: &str) -> Result<i64, StorageError> {
        self.bounded(
            "add_checklist_item",
            self.database.checklist().insert(task_id, name),
        )
        .await
    }

    async fn toggle_checklist_item(
        &self,
        item_id: i64,
        task_id: i64,
    ) -> Result<bool, StorageError> {
        self.bounded(
            "toggle_checklist_item",
            self.toggle_then_complete(item_id, task_id),
        )
        .await
    }

    async fn delete_checklist_item(&self, item_id: i64) -> Result<(), StorageError> {
        self.bounded(
            "delete_checklist_item",
            self.database.checklist().delete(item_id),
        )
        .await
    }

    async fn tasks_by_board(&self, board_id: i64) -> Result<Vec<Task>, StorageError> {
        self.bounded("tasks_by_board", self.database.tasks().list_for_board(board_id))
            .await
    }

    async fn tasks_shared_with(&self, user_id: i64) -> Result<Vec<Task>, StorageError> {
        self.bounded(
            "tasks_shared_with",
            self.database.tasks().list_shared_with(user_id),
        )
        .await
    }

    async fn boards(&self, user_id: i64) -> Result<Vec<Board>, StorageError> {
        self.bounded("boards", self.database.boards().list_for_user(user_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use task_board_core::DEFAULT_BOARD_TITLES;

    async fn setup_gateway() -> SqliteGateway {
        let database = Database::connect("sqlite::memory:").await.expect("connect");
        database.run_migrations().await.expect("migrations");
        SqliteGateway::new(database)
    }

    async fn user_with_task(gateway: &SqliteGateway, username: &str) -> (i64, i64, i64) {
        let user_id = gateway.register(username, "pw").await.expect("register");
        let board_id = gateway.boards(user_id).await.expect("boards")[0].id();
        let task_id = gateway
            .create_task(&NewTask {
                user_id,
                title: "Pack".to_string(),
                description: String::new(),
                deadline: NaiveDate::from_ymd_opt(2040, 1, 1),
                board_id,
            })
            .await
            .expect("create task");
        (user_id, board_id, task_id)
    }

    async fn status_of(gateway: &SqliteGateway, board_id: i64, task_id: i64) -> TaskStatus {
        gateway
            .tasks_by_board(board_id)
            .await
            .expect("tasks")
            .into_iter()
            .find(|task| task.id() == task_id)
            .expect("task present")
            .status()
    }

    async fn count(gateway: &SqliteGateway, sql: &str) -> i64 {
        sqlx::query_scalar(sql)
            .fetch_one(gateway.database().pool())
            .await
            .expect("count")
    }

    #[tokio::test]
    async fn register_then_authenticate_returns_trimmed_user() {
        let gateway = setup_gateway().await;
        let user_id = gateway.register("alice", "pw").await.expect("register");

        let user = gateway
            .authenticate("alice", "pw")
            .await
            .expect("authenticate")
            .expect("user found");
        assert_eq!(user.id(), user_id);
        assert_eq!(user.username(), "alice");

        assert!(gateway
            .authenticate("alice", "wrong")
            .await
            .expect("authenticate")
            .is_none());
        assert!(gateway
            .authenticate("nobody", "pw")
            .await
            .expect("authenticate")
            .is_none());
    }

    #[tokio::test]
    async fn password_is_not_stored_in_plaintext() {
        let gateway = setup_gateway().await;
        gateway.register("alice", "hunter2").await.expect("register");
        let stored: String = sqlx::query_scalar("SELECT password FROM users WHERE username = 'alice'")
            .fetch_one(gateway.database().pool())
            .await
            .expect("password");
        assert_ne!(stored, "hunter2");
    }

    #[tokio::test]
    async fn registration_creates_three_default_boards() {
        let gateway = setup_gateway().await;
        let user_id = gateway.register("alice", "pw").await.expect("register");
        let boards = gateway.boards(user_id).await.expect("boards");
        let titles: Vec<&str> = boards.iter().map(Board::title).collect();
        assert_eq!(titles, DEFAULT_BOARD_TITLES.to_vec());
    }

    #[tokio::test]
    async fn registration_rolls_back_when_board_insert_fails() {
        let gateway = setup_gateway().await;
        sqlx::query(
            "CREATE TRIGGER reject_boards BEFORE INSERT ON bacheche \
             BEGIN SELECT RAISE(ABORT, 'boards disabled'); END;",
        )
        .execute(gateway.database().pool())
        .await
        .expect("create trigger");

        let result = gateway.register("alice", "pw").await;
        assert!(result.is_err());

        assert_eq!(
            count(&gateway, "SELECT COUNT(*) FROM users WHERE username = 'alice'").await,
            0
        );
        assert_eq!(count(&gateway, "SELECT COUNT(*) FROM bacheche").await, 0);
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts_and_keeps_first_user() {
        let gateway = setup_gateway().await;
        let first = gateway.register("alice", "pw").await.expect("register");

        let err = gateway.register("alice", "other").await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        let user = gateway
            .authenticate("alice", "pw")
            .await
            .expect("authenticate")
            .expect("original credentials still valid");
        assert_eq!(user.id(), first);
        assert_eq!(gateway.boards(first).await.expect("boards").len(), 3);
    }

    #[tokio::test]
    async fn toggling_every_item_completes_the_task() {
        let gateway = setup_gateway().await;
        let (_, board_id, task_id) = user_with_task(&gateway, "alice").await;
        let a = gateway.add_checklist_item(task_id, "A").await.expect("A");
        let b = gateway.add_checklist_item(task_id, "B").await.expect("B");

        assert!(!gateway.toggle_checklist_item(a, task_id).await.expect("toggle A"));
        assert_eq!(status_of(&gateway, board_id, task_id).await, TaskStatus::Todo);

        assert!(gateway.toggle_checklist_item(b, task_id).await.expect("toggle B"));
        assert_eq!(
            status_of(&gateway, board_id, task_id).await,
            TaskStatus::Completed
        );
    }

    #[tokio::test]
    async fn unchecking_does_not_revert_completion() {
        let gateway = setup_gateway().await;
        let (_, board_id, task_id) = user_with_task(&gateway, "alice").await;
        let only = gateway.add_checklist_item(task_id, "only").await.expect("item");

        assert!(gateway.toggle_checklist_item(only, task_id).await.expect("check"));
        assert!(!gateway.toggle_checklist_item(only, task_id).await.expect("uncheck"));
        assert_eq!(
            status_of(&gateway, board_id, task_id).await,
            TaskStatus::Completed
        );
    }

    #[tokio::test]
    async fn empty_checklist_never_auto_completes() {
        let gateway = setup_gateway().await;
        let (_, board_id, task_id) = user_with_task(&gateway, "alice").await;

        assert!(!gateway.toggle_checklist_item(42, task_id).await.expect("toggle"));
        assert_eq!(status_of(&gateway, board_id, task_id).await, TaskStatus::Todo);
    }

    #[tokio::test]
    async fn sharing_with_unknown_user_writes_nothing() {
        let gateway = setup_gateway().await;
        let (_, _, task_id) = user_with_task(&gateway, "alice").await;

        let err = gateway.share_task(task_id, "ghost").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound("user")));
        assert_eq!(count(&gateway, "SELECT COUNT(*) FROM shared_tasks").await, 0);
    }

    #[tokio::test]
    async fn shared_task_appears_for_target_user() {
        let gateway = setup_gateway().await;
        let (_, _, task_id) = user_with_task(&gateway, "alice").await;
        let bob = gateway.register("bob", "pw").await.expect("register bob");

        gateway.share_task(task_id, "bob").await.expect("share");
        assert_eq!(count(&gateway, "SELECT COUNT(*) FROM shared_tasks").await, 1);

        let shared = gateway.tasks_shared_with(bob).await.expect("shared");
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].id(), task_id);
    }

    #[tokio::test]
    async fn sharing_twice_with_the_same_user_keeps_both_rows() {
        let gateway = setup_gateway().await;
        let (_, _, task_id) = user_with_task(&gateway, "alice").await;
        let bob = gateway.register("bob", "pw").await.expect("register bob");

        gateway.share_task(task_id, "bob").await.expect("first share");
        gateway.share_task(task_id, "bob").await.expect("second share");
        assert_eq!(count(&gateway, "SELECT COUNT(*) FROM shared_tasks").await, 2);

        let shared = gateway.tasks_shared_with(bob).await.expect("shared");
        assert_eq!(shared.len(), 2);
        assert!(shared.iter().all(|task| task.id() == task_id));
    }

    #[tokio::test]
    async fn toggle_reports_completion_while_every_item_is_done() {
        let gateway = setup_gateway().await;
        let (_, board_id, task_id) = user_with_task(&gateway, "alice").await;
        let only = gateway.add_checklist_item(task_id, "only").await.expect("item");
        assert!(gateway.toggle_checklist_item(only, task_id).await.expect("check"));

        // Unknown item: nothing flips, the checklist is still fully done.
        assert!(gateway.toggle_checklist_item(9_999, task_id).await.expect("toggle"));
        assert_eq!(
            status_of(&gateway, board_id, task_id).await,
            TaskStatus::Completed
        );
    }

    #[tokio::test]
    async fn deleting_a_task_cascades_to_checklist_and_shares() {
        let gateway = setup_gateway().await;
        let (_, _, task_id) = user_with_task(&gateway, "alice").await;
        gateway.register("bob", "pw").await.expect("register bob");
        gateway.add_checklist_item(task_id, "item").await.expect("item");
        gateway.share_task(task_id, "bob").await.expect("share");

        assert!(gateway.delete_task(task_id).await.expect("delete"));
        assert_eq!(count(&gateway, "SELECT COUNT(*) FROM checklist_items").await, 0);
        assert_eq!(count(&gateway, "SELECT COUNT(*) FROM shared_tasks").await, 0);
    }

    #[tokio::test]
    async fn elapsed_calls_map_to_timeout() {
        let gateway = setup_gateway().await.with_call_timeout(Duration::from_millis(10));
        let err = gateway
            .bounded("sleepy", async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, StorageError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Timeout("sleepy")));
    }
}
