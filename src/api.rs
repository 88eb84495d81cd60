//! Inbound agent API.
//!
//! * `GET /status`: instance id, whether a pass is running, the last watch
//!   index and the managed containers.
//! * `POST /configure`: runs a pass over a fresh read of the instance tree,
//!   serialized with the watch loop's passes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{info, warn};
use serde_json::json;
use tokio::net::TcpListener;

use crate::agent::Agent;
use crate::error::AgentError;
use crate::types::{AgentStatus, PassReport};

pub struct ApiError(AgentError);

impl From<AgentError> for ApiError {
    fn from(e: AgentError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!("API request failed: {}", self.0);
        let body = Json(json!({ "error": self.0.to_string() }));
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

pub fn router(agent: Arc<Agent>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/configure", post(configure))
        .with_state(agent)
}

pub async fn serve(bind: SocketAddr, agent: Arc<Agent>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!("Agent API listening on {}", bind);
    axum::serve(listener, router(agent)).await?;
    Ok(())
}

async fn status(State(agent): State<Arc<Agent>>) -> Result<Json<AgentStatus>, ApiError> {
    Ok(Json(agent.status().await?))
}

async fn configure(State(agent): State<Arc<Agent>>) -> Result<Json<PassReport>, ApiError> {
    info!("Reconfiguration requested");
    Ok(Json(agent.reconfigure().await?))
}
