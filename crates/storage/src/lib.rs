use std::{str::FromStr, time::Duration};

use chrono::NaiveDate;
use sqlx::{
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteSynchronous},
    QueryBuilder, Row, Sqlite, SqlitePool, Transaction,
};
use thiserror::Error;

use task_board_core::{
    Board, ChecklistItem, EntityError, NewTask, Task, TaskStatus, User, DEFAULT_BOARD_TITLES,
};

pub mod credentials;
pub mod gateway;
pub mod memory;

pub use gateway::{SqliteGateway, TaskGateway};
pub use memory::MemoryGateway;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        Self::connect_with_timeout(database_url, BUSY_TIMEOUT).await
    }

    /// Same as [`Database::connect`], bounding pool acquisition by `acquire_timeout`.
    pub async fn connect_with_timeout(
        database_url: &str,
        acquire_timeout: Duration,
    ) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::Connect)?
            .foreign_keys(true)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(acquire_timeout)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Begins a SQLite transaction.
    pub async fn begin(&self) -> Result<Transaction<'_, Sqlite>, StorageError> {
        Ok(self.pool.begin().await?)
    }

    /// Returns a handle for user accounts.
    pub fn users(&self) -> UserRepository {
        UserRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for boards.
    pub fn boards(&self) -> BoardRepository {
        BoardRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for tasks.
    pub fn tasks(&self) -> TaskRepository {
        TaskRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for checklist items.
    pub fn checklist(&self) -> ChecklistRepository {
        ChecklistRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for the task sharing relation.
    pub fn shares(&self) -> ShareRepository {
        ShareRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Storage level errors shared by every gateway implementation.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error("integrity constraint violated: {0}")]
    Constraint(String),
    #[error("storage call '{0}' timed out")]
    Timeout(&'static str),
    #[error("stored row is invalid: {0}")]
    Decode(#[from] EntityError),
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|code| code.into_owned());
                match code.as_deref() {
                    // SQLITE_CONSTRAINT_UNIQUE, SQLITE_CONSTRAINT_PRIMARYKEY
                    Some("2067") | Some("1555") => Self::Conflict(db_err.message().to_string()),
                    // FOREIGNKEY, NOTNULL, CHECK, TRIGGER, plain CONSTRAINT
                    Some("787") | Some("1299") | Some("275") | Some("1811") | Some("19") => {
                        Self::Constraint(db_err.message().to_string())
                    }
                    _ => Self::Database(sqlx::Error::Database(db_err)),
                }
            }
            other => Self::Database(other),
        }
    }
}

/// Repository for the `users` table.
#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    /// Inserts a user inside `tx` and returns its generated identifier.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        username: &str,
        password_digest: &str,
    ) -> Result<i64, StorageError> {
        let user_id: i64 = sqlx::query_scalar(
            "INSERT INTO users (username, password) VALUES (?, ?) RETURNING user_id",
        )
        .bind(username)
        .bind(password_digest)
        .fetch_one(&mut **tx)
        .await?;

        Ok(user_id)
    }

    /// Loads a user together with the stored password digest.
    pub async fn find_credentials(
        &self,
        username: &str,
    ) -> Result<Option<(User, String)>, StorageError> {
        let row = sqlx::query("SELECT user_id, username, password FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let user = User::new(row.get("user_id"), row.get::<String, _>("username").as_str())?;
        Ok(Some((user, row.get("password"))))
    }

    /// Resolves a username to its identifier.
    pub async fn find_id(&self, username: &str) -> Result<Option<i64>, StorageError> {
        let id: Option<i64> = sqlx::query_scalar("SELECT user_id FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }
}

/// Repository for the `bacheche` table.
#[derive(Clone)]
pub struct BoardRepository {
    pool: SqlitePool,
}

impl BoardRepository {
    /// Inserts the default boards for a freshly created user in a single statement.
    pub async fn insert_defaults(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        user_id: i64,
    ) -> Result<u64, StorageError> {
        let mut builder = QueryBuilder::<Sqlite>::new("INSERT INTO bacheche (user_id, titolo) ");
        builder.push_values(DEFAULT_BOARD_TITLES, |mut row, title| {
            row.push_bind(user_id).push_bind(title);
        });

        let result = builder.build().execute(&mut **tx).await?;
        Ok(result.rows_affected())
    }

    /// Lists the boards owned by `user_id` in creation order.
    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<Board>, StorageError> {
        let rows = sqlx::query_as::<_, BoardRecord>(
            "SELECT bacheca_id, user_id, titolo FROM bacheche WHERE user_id = ? ORDER BY bacheca_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BoardRecord::into_domain).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BoardRecord {
    bacheca_id: i64,
    user_id: i64,
    titolo: String,
}

impl BoardRecord {
    fn into_domain(self) -> Result<Board, StorageError> {
        Ok(Board::new(self.bacheca_id, self.user_id, &self.titolo)?)
    }
}

/// Repository for the `tasks` table.
#[derive(Clone)]
pub struct TaskRepository {
    pool: SqlitePool,
}

impl TaskRepository {
    /// Inserts a task in the initial status and returns its identifier.
    pub async fn insert(&self, task: &NewTask) -> Result<i64, StorageError> {
        let task_id: i64 = sqlx::query_scalar(
            "INSERT INTO tasks (user_id, title, description, deadline, bacheca_id, status) \
             VALUES (?, ?, ?, ?, ?, ?) RETURNING task_id",
        )
        .bind(task.user_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.deadline)
        .bind(task.board_id)
        .bind(TaskStatus::Todo.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(task_id)
    }

    /// Overwrites the status of a task, returning whether a row was touched.
    pub async fn update_status(&self, task_id: i64, status: TaskStatus) -> Result<bool, StorageError> {
        let result = sqlx::query("UPDATE tasks SET status = ? WHERE task_id = ?")
            .bind(status.as_str())
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Deletes a task, returning whether a row was removed.
    pub async fn delete(&self, task_id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM tasks WHERE task_id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Lists every task on a board.
    pub async fn list_for_board(&self, board_id: i64) -> Result<Vec<Task>, StorageError> {
        let rows = sqlx::query_as::<_, TaskRecord>(
            "SELECT task_id, user_id, title, description, deadline, bacheca_id, status \
               FROM tasks \
              WHERE bacheca_id = ? \
              ORDER BY task_id",
        )
        .bind(board_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TaskRecord::into_domain).collect()
    }

    /// Lists every task shared with `user_id`, one row per share.
    pub async fn list_shared_with(&self, user_id: i64) -> Result<Vec<Task>, StorageError> {
        let rows = sqlx::query_as::<_, TaskRecord>(
            "SELECT t.task_id, t.user_id, t.title, t.description, t.deadline, t.bacheca_id, t.status \
               FROM tasks AS t \
               JOIN shared_tasks AS st ON st.task_id = t.task_id \
              WHERE st.user_id = ? \
              ORDER BY t.task_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TaskRecord::into_domain).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TaskRecord {
    task_id: i64,
    user_id: i64,
    title: String,
    description: Option<String>,
    deadline: Option<NaiveDate>,
    bacheca_id: i64,
    status: String,
}

impl TaskRecord {
    fn into_domain(self) -> Result<Task, StorageError> {
        let status = TaskStatus::from_str(&self.status)?;
        Ok(Task::new(
            self.task_id,
            self.user_id,
            &self.title,
            self.description.as_deref(),
            self.deadline,
            self.bacheca_id,
            status,
        )?)
    }
}

/// Repository for the `shared_tasks` join table.
#[derive(Clone)]
pub struct ShareRepository {
    pool: SqlitePool,
}

impl ShareRepository {
    /// Records that `task_id` is visible to `user_id`.
    pub async fn insert(&self, task_id: i64, user_id: i64) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO shared_tasks (task_id, user_id) VALUES (?, ?)")
            .bind(task_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Repository for the `checklist_items` table.
#[derive(Clone)]
pub struct ChecklistRepository {
    pool: SqlitePool,
}

impl ChecklistRepository {
    /// Lists the items of a task in insertion order.
    pub async fn list_for_task(&self, task_id: i64) -> Result<Vec<ChecklistItem>, StorageError> {
        let rows = sqlx::query_as::<_, ChecklistRecord>(
            "SELECT item_id, task_id, name, is_completed FROM checklist_items WHERE task_id = ? ORDER BY item_id",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ChecklistRecord::into_domain).collect()
    }

    /// Appends an incomplete item to a task.
    pub async fn insert(&self, task_id: i64, name: &str) -> Result<i64, StorageError> {
        let item_id: i64 = sqlx::query_scalar(
            "INSERT INTO checklist_items (task_id, name, is_completed) VALUES (?, ?, 0) RETURNING item_id",
        )
        .bind(task_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(item_id)
    }

    /// Flips the completion flag of one item.
    pub async fn toggle(&self, item_id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE checklist_items SET is_completed = NOT is_completed WHERE item_id = ?",
        )
        .bind(item_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns `(total, completed)` item counts for a task.
    pub async fn progress(&self, task_id: i64) -> Result<(usize, usize), StorageError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, COALESCE(SUM(is_completed), 0) AS done \
               FROM checklist_items \
              WHERE task_id = ?",
        )
        .bind(task_id)
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.get("total");
        let done: i64 = row.get("done");
        Ok((total as usize, done as usize))
    }

    /// Removes an item.
    pub async fn delete(&self, item_id: i64) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM checklist_items WHERE item_id = ?")
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ChecklistRecord {
    item_id: i64,
    task_id: i64,
    name: String,
    is_completed: bool,
}

impl ChecklistRecord {
    fn into_domain(self) -> Result<ChecklistItem, StorageError> {
        Ok(ChecklistItem::new(
            self.item_id,
            self.task_id,
            &self.name,
            self.is_completed,
        )?)
    }
}
