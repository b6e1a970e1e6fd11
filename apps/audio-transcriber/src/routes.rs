use axum::extract::FromRef;
use axum::http::{header::CONTENT_TYPE, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

pub fn api_routes<S>() -> Router<S>
where
	S: Clone + Send + Sync + 'static,
	AppState: FromRef<S>,
{
	Router::new()
		.route("/transcribe", post(handlers::transcribe).delete(handlers::delete_transcription))
		.route("/status/:filename", get(handlers::status))
		.route("/result/:filename", get(handlers::result))
		.route("/queue", get(handlers::queue))
		.route("/models", get(handlers::models))
}

pub fn ops_routes<S>() -> Router<S>
where
	S: Clone + Send + Sync + 'static,
	AppState: FromRef<S>,
{
	Router::new().route("/health", get(handlers::health)).route("/metrics", get(handlers::metrics))
}

/// Full application router with tracing and CORS applied.
pub fn app(state: AppState) -> Router {
	let cors = CorsLayer::new()
		.allow_origin(Any)
		.allow_methods([Method::GET, Method::POST, Method::DELETE])
		.allow_headers([CONTENT_TYPE]);

	Router::new()
		.nest("/api/v1", api_routes())
		.merge(ops_routes())
		.layer(cors)
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}
