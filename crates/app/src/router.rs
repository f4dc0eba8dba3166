use axum::{
    body::Body,
    extract::{MatchedPath, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Router,
};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::service::TaskService;
use crate::{api, telemetry};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    service: TaskService,
}

impl AppState {
    pub fn new(metrics: PrometheusHandle, service: TaskService) -> Self {
        Self { metrics, service }
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn service(&self) -> &TaskService {
        &self.service
    }
}

pub fn app_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/login", post(api::login))
        .route("/api/register", post(api::register))
        .route("/api/users/:id/boards", get(api::user_boards))
        .route("/api/users/:id/shared", get(api::shared_tasks))
        .route(
            "/api/boards/:id/tasks",
            get(api::board_tasks).post(api::create_task),
        )
        .route("/api/tasks/:id", delete(api::delete_task))
        .route("/api/tasks/:id/status", put(api::move_task))
        .route("/api/tasks/:id/shares", post(api::share_task))
        .route(
            "/api/tasks/:id/checklist",
            get(api::checklist).post(api::add_checklist_item),
        )
        .route(
            "/api/tasks/:id/checklist/:item_id/toggle",
            post(api::toggle_checklist_item),
        )
        .route("/api/checklist/:item_id", delete(api::delete_checklist_item))
        .route_layer(middleware::from_fn(count_requests));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .merge(api)
        .with_state(state)
}

async fn count_requests(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let response = next.run(request).await;
    let status = match response.status().as_u16() {
        200..=299 => "2xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    };
    counter!("http_requests_total", "route" => route, "status" => status).increment(1);
    response
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        Body::from(body),
    )
}
