//! HTTP API (axum).
//!
//! | Method | Path                  |
//! |--------|-----------------------|
//! | GET    | `/`                   |
//! | GET    | `/health`             |
//! | GET    | `/tasks`              |
//! | POST   | `/tasks`              |
//! | GET    | `/tasks/:id`          |
//! | PUT    | `/tasks/:id`          |
//! | DELETE | `/tasks/:id`          |
//! | POST   | `/tasks/:id/process`  |
//! | GET    | `/admin/status`       |

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::app::TaskService;

pub use self::error::ApiError;

pub struct AppState {
    pub service: TaskService,
    pub environment: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/tasks", get(handlers::list_tasks).post(handlers::create_task))
        .route(
            "/tasks/:id",
            get(handlers::get_task)
                .put(handlers::update_task)
                .delete(handlers::delete_task),
        )
        .route("/tasks/:id/process", post(handlers::process_task))
        .route("/admin/status", get(handlers::admin_status))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}
