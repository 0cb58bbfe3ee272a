//! HTTP relay: `GET /{nick}` answers with the nick's account statement as
//! Turtle, taken from its NickServ taxonomy.
//!
//! Only the first path segment names the nick. Each request becomes one
//! TAXONOMY lookup through the [`ClientHandle`]. Requests never wait on the
//! wire directly; they wait on the lookup's completion, bounded by the
//! configured query timeout. A nick that is not a single IRC word gets 400.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use taxobot_sdk::client::{ClientHandle, Status};
use taxobot_sdk::taxonomy::{Fact, QueryError};
use tower_http::cors::CorsLayer;

pub const TURTLE: &str = "application/x-turtle";

const HOLDS_ACCOUNT: &str = "http://xmlns.com/foaf/0.1/holdsAccount";

pub struct RelayState {
    pub handle: ClientHandle,
    /// Network name for `irc://` URIs.
    pub network: String,
    pub query_timeout: Duration,
}

pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/_status", get(status))
        .route("/{nick}", get(lookup))
        .route("/{nick}/{*rest}", get(lookup_first_segment))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// One `holdsAccount` statement for the first `webid` fact, or an empty
/// document if there is none.
pub fn render_holds_account(facts: &[Fact], network: &str) -> String {
    facts
        .iter()
        .find(|fact| fact.key == "webid")
        .map(|fact| {
            format!(
                "<{}> <{HOLDS_ACCOUNT}> <irc://{network}/{},isnick> .\n",
                fact.value, fact.subject
            )
        })
        .unwrap_or_default()
}

async fn lookup(Path(nick): Path<String>, State(state): State<Arc<RelayState>>) -> Response {
    respond(&state, nick).await
}

/// `/alice/anything` looks up `alice`.
async fn lookup_first_segment(
    Path((nick, _rest)): Path<(String, String)>,
    State(state): State<Arc<RelayState>>,
) -> Response {
    respond(&state, nick).await
}

async fn respond(state: &RelayState, nick: String) -> Response {
    tracing::debug!(%nick, "Taxonomy lookup");
    match tokio::time::timeout(state.query_timeout, state.handle.taxonomy(&nick)).await {
        Ok(Ok(facts)) => (
            [(header::CONTENT_TYPE, TURTLE)],
            render_holds_account(&facts, &state.network),
        )
            .into_response(),
        Ok(Err(e @ QueryError::InvalidSubject(_))) => {
            tracing::debug!("Rejected lookup: {e}");
            StatusCode::BAD_REQUEST.into_response()
        }
        Ok(Err(e)) => {
            tracing::warn!(%nick, "Taxonomy lookup failed: {e}");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
        Err(_) => {
            tracing::warn!(%nick, "Taxonomy lookup timed out");
            StatusCode::GATEWAY_TIMEOUT.into_response()
        }
    }
}

async fn status(State(state): State<Arc<RelayState>>) -> Result<Json<Status>, StatusCode> {
    state
        .handle
        .status()
        .await
        .map(Json)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}
