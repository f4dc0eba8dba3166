use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex, MutexGuard,
};

use async_trait::async_trait;
use chrono::NaiveDate;

use task_board_core::{
    checklist_completes, Board, ChecklistItem, NewTask, Task, TaskStatus, User,
    DEFAULT_BOARD_TITLES,
};

use crate::{credentials, StorageError, TaskGateway};

/// In-process gateway with the same observable semantics as [`crate::SqliteGateway`].
///
/// Intended for tests of the layers above storage.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
    fail_board_inserts: AtomicBool,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    users: Vec<UserRow>,
    boards: Vec<BoardRow>,
    tasks: Vec<TaskRow>,
    items: Vec<ItemRow>,
    shares: Vec<(i64, i64)>,
}

#[derive(Debug, Clone)]
struct UserRow {
    id: i64,
    username: String,
    password: String,
}

#[derive(Debug, Clone)]
struct BoardRow {
    id: i64,
    user_id: i64,
    title: String,
}

#[derive(Debug, Clone)]
struct TaskRow {
    id: i64,
    user_id: i64,
    title: String,
    description: String,
    deadline: Option<NaiveDate>,
    board_id: i64,
    status: TaskStatus,
}

#[derive(Debug, Clone)]
struct ItemRow {
    id: i64,
    task_id: i64,
    name: String,
    is_completed: bool,
}

impl MemoryState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn user_id(&self, username: &str) -> Option<i64> {
        self.users
            .iter()
            .find(|user| user.username == username)
            .map(|user| user.id)
    }
}

impl TaskRow {
    fn to_domain(&self) -> Result<Task, StorageError> {
        Ok(Task::new(
            self.id,
            self.user_id,
            &self.title,
            Some(&self.description),
            self.deadline,
            self.board_id,
            self.status,
        )?)
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the default-board step of registration fail, exercising rollback.
    pub fn fail_board_inserts(&self, enabled: bool) {
        self.fail_board_inserts.store(enabled, Ordering::SeqCst);
    }

    /// Number of stored users with `username`.
    pub fn user_count(&self, username: &str) -> usize {
        self.lock()
            .users
            .iter()
            .filter(|user| user.username == username)
            .count()
    }

    /// Number of stored share rows for `task_id`.
    pub fn share_count(&self, task_id: i64) -> usize {
        self.lock()
            .shares
            .iter()
            .filter(|(shared_task, _)| *shared_task == task_id)
            .count()
    }

    /// Number of rows inserted so far across every table except shares.
    pub fn inserted_rows(&self) -> i64 {
        self.lock().next_id
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory gateway state poisoned")
    }
}

#[async_trait]
impl TaskGateway for MemoryGateway {
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<User>, StorageError> {
        let state = self.lock();
        let Some(row) = state.users.iter().find(|user| user.username == username) else {
            return Ok(None);
        };
        if !credentials::verify_password(password, &row.password) {
            return Ok(None);
        }
        Ok(Some(User::new(row.id, &row.username)?))
    }

    async fn register(&self, username: &str, password: &str) -> Result<i64, StorageError> {
        let mut state = self.lock();
        if state.user_id(username).is_some() {
            return Err(StorageError::Conflict(format!(
                "username '{username}' already exists"
            )));
        }

        if self.fail_board_inserts.load(Ordering::SeqCst) {
            return Err(StorageError::Constraint("board insert rejected".to_string()));
        }

        let user_id = state.allocate_id();
        state.users.push(UserRow {
            id: user_id,
            username: username.to_string(),
            password: credentials::hash_password(password),
        });
        for title in DEFAULT_BOARD_TITLES {
            let id = state.allocate_id();
            state.boards.push(BoardRow {
                id,
                user_id,
                title: title.to_string(),
            });
        }
        Ok(user_id)
    }

    async fn create_task(&self, task: &NewTask) -> Result<i64, StorageError> {
        let mut state = self.lock();
        if !state.boards.iter().any(|board| board.id == task.board_id) {
            return Err(StorageError::Constraint("board does not exist".to_string()));
        }
        let id = state.allocate_id();
        state.tasks.push(TaskRow {
            id,
            user_id: task.user_id,
            title: task.title.clone(),
            description: task.description.clone(),
            deadline: task.deadline,
            board_id: task.board_id,
            status: TaskStatus::Todo,
        });
        Ok(id)
    }

    async fn update_status(&self, task_id: i64, status: TaskStatus) -> Result<bool, StorageError> {
        let mut state = self.lock();
        let Some(task) = state.tasks.iter_mut().find(|task| task.id == task_id) else {
            return Ok(false);
        };
        task.status = status;
        Ok(true)
    }

    async fn delete_task(&self, task_id: i64) -> Result<bool, StorageError> {
        let mut state = self.lock();
        let before = state.tasks.len();
        state.tasks.retain(|task| task.id != task_id);
        if state.tasks.len() == before {
            return Ok(false);
        }
        state.items.retain(|item| item.task_id != task_id);
        state.shares.retain(|(shared_task, _)| *shared_task != task_id);
        Ok(true)
    }

    async fn share_task(&self, task_id: i64, target_username: &str) -> Result<(), StorageError> {
        let mut state = self.lock();
        let user_id = state
            .user_id(target_username)
            .ok_or(StorageError::NotFound("user"))?;
        if !state.tasks.iter().any(|task| task.id == task_id) {
            return Err(StorageError::Constraint("task does not exist".to_string()));
        }
        state.shares.push((task_id, user_id));
        Ok(())
    }

    async fn checklist(&self, task_id: i64) -> Result<Vec<ChecklistItem>, StorageError> {
        let state = self.lock();
        let mut items: Vec<&ItemRow> = state
            .items
            .iter()
            .filter(|item| item.task_id == task_id)
            .collect();
        items.sort_by_key(|item| item.id);
        items
            .into_iter()
            .map(|item| {
                ChecklistItem::new(item.id, item.task_id, &item.name, item.is_completed)
                    .map_err(StorageError::from)
            })
            .collect()
    }

    async fn add_checklist_item(&self, task_id: i64, name: &str) -> Result<i64, StorageError> {
        let mut state = self.lock();
        if !state.tasks.iter().any(|task| task.id == task_id) {
            return Err(StorageError::Constraint("task does not exist".to_string()));
        }
        let id = state.allocate_id();
        state.items.push(ItemRow {
            id,
            task_id,
            name: name.to_string(),
            is_completed: false,
        });
        Ok(id)
    }

    async fn toggle_checklist_item(
        &self,
        item_id: i64,
        task_id: i64,
    ) -> Result<bool, StorageError> {
        let mut state = self.lock();
        if let Some(item) = state.items.iter_mut().find(|item| item.id == item_id) {
            item.is_completed = !item.is_completed;
        }

        let (total, completed) = state
            .items
            .iter()
            .filter(|item| item.task_id == task_id)
            .fold((0, 0), |(total, completed), item| {
                (total + 1, completed + usize::from(item.is_completed))
            });
        if !checklist_completes(total, completed) {
            return Ok(false);
        }

        if let Some(task) = state.tasks.iter_mut().find(|task| task.id == task_id) {
            task.status = TaskStatus::Completed;
        }
        Ok(true)
    }

    async fn delete_checklist_item(&self, item_id: i64) -> Result<(), StorageError> {
        self.lock().items.retain(|item| item.id != item_id);
        Ok(())
    }

    async fn tasks_by_board(&self, board_id: i64) -> Result<Vec<Task>, StorageError> {
        let state = self.lock();
        state
            .tasks
            .iter()
            .filter(|task| task.board_id == board_id)
            .map(TaskRow::to_domain)
            .collect()
    }

    async fn tasks_shared_with(&self, user_id: i64) -> Result<Vec<Task>, StorageError> {
        let state = self.lock();
        let mut shared: Vec<&TaskRow> = state
            .shares
            .iter()
            .filter(|(_, shared_user)| *shared_user == user_id)
            .filter_map(|(task_id, _)| state.tasks.iter().find(|task| task.id == *task_id))
            .collect();
        shared.sort_by_key(|task| task.id);
        shared.into_iter().map(TaskRow::to_domain).collect()
    }

    async fn boards(&self, user_id: i64) -> Result<Vec<Board>, StorageError> {
        let state = self.lock();
        state
            .boards
            .iter()
            .filter(|board| board.user_id == user_id)
            .map(|board| {
                Board::new(board.id, board.user_id, &board.title).map_err(StorageError::from)
            })
            .collect()
    }
}
