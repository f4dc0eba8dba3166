use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use task_board_core::{Board, ChecklistItem, TaskRow, TaskStatus, User};

use crate::problem::ProblemResponse;
use crate::router::AppState;
use crate::service::RegisterOutcome;

type ApiResult<T> = Result<T, ProblemResponse>;

#[derive(Debug, Deserialize)]
pub struct Credentials {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    status: Option<String>,
}

impl StatusQuery {
    fn status(&self) -> &str {
        self.status.as_deref().unwrap_or(TaskStatus::Todo.as_str())
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskBody {
    user_id: i64,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    deadline: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    status: String,
}

#[derive(Debug, Deserialize)]
pub struct ShareBody {
    username: String,
}

#[derive(Debug, Deserialize)]
pub struct ChecklistItemBody {
    name: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<Credentials>,
) -> ApiResult<Json<User>> {
    state
        .service()
        .login(&body.username, &body.password)
        .await?
        .map(Json)
        .ok_or_else(|| {
            ProblemResponse::new(
                StatusCode::UNAUTHORIZED,
                "invalid_credentials",
                "username or password is incorrect",
            )
        })
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<Credentials>,
) -> ApiResult<impl IntoResponse> {
    match state.service().register(&body.username, &body.password).await? {
        RegisterOutcome::Registered { user_id } => {
            Ok((StatusCode::CREATED, Json(json!({ "user_id": user_id }))))
        }
        RegisterOutcome::AlreadyExists => Err(ProblemResponse::new(
            StatusCode::CONFLICT,
            "username_taken",
            format!("username '{}' is already registered", body.username.trim()),
        )),
    }
}

pub async fn user_boards(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<Vec<Board>>> {
    Ok(Json(state.service().boards(user_id).await?))
}

pub async fn shared_tasks(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Json<Vec<TaskRow>>> {
    Ok(Json(
        state.service().shared_rows(user_id, query.status()).await?,
    ))
}

pub async fn board_tasks(
    State(state): State<AppState>,
    Path(board_id): Path<i64>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Json<Vec<TaskRow>>> {
    Ok(Json(
        state.service().board_rows(board_id, query.status()).await?,
    ))
}

pub async fn create_task(
    State(state): State<AppState>,
    Path(board_id): Path<i64>,
    Json(body): Json<CreateTaskBody>,
) -> ApiResult<impl IntoResponse> {
    let task_id = state
        .service()
        .create_task(
            body.user_id,
            &body.title,
            body.description.as_deref(),
            body.deadline,
            board_id,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "task_id": task_id }))))
}

pub async fn move_task(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
    Json(body): Json<StatusBody>,
) -> ApiResult<StatusCode> {
    state.service().move_task(task_id, &body.status).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_task(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.service().delete_task(task_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn share_task(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
    Json(body): Json<ShareBody>,
) -> ApiResult<StatusCode> {
    state.service().share_task(task_id, &body.username).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn checklist(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
) -> ApiResult<Json<Vec<ChecklistItem>>> {
    Ok(Json(state.service().checklist(task_id).await?))
}

pub async fn add_checklist_item(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
    Json(body): Json<ChecklistItemBody>,
) -> ApiResult<impl IntoResponse> {
    let item_id = state
        .service()
        .add_checklist_item(task_id, &body.name)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "item_id": item_id }))))
}

pub async fn toggle_checklist_item(
    State(state): State<AppState>,
    Path((task_id, item_id)): Path<(i64, i64)>,
) -> ApiResult<Json<serde_json::Value>> {
    let auto_completed = state
        .service()
        .toggle_checklist_item(item_id, task_id)
        .await?;
    Ok(Json(json!({ "auto_completed": auto_completed })))
}

pub async fn delete_checklist_item(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.service().delete_checklist_item(item_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
