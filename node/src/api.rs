//! # HTTP API
//!
//! Builds the axum router that exposes the node's HTTP interface. All
//! endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                 | Description                              |
//! |--------|----------------------|------------------------------------------|
//! | GET    | `/health`            | Liveness probe                           |
//! | GET    | `/status`            | Chain tip, pending pool, router summary  |
//! | POST   | `/transactions`      | Submit a hex-encoded signed transaction  |
//! | GET    | `/blocks/:index`     | Block by index                           |
//! | GET    | `/state/:address`    | Committed value at an address            |

use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use strata_protocol::address::Address;
use strata_protocol::chain::Block;
use strata_protocol::policy::ChainView;
use strata_protocol::producer::{BlockProducer, SubmissionError};
use strata_protocol::router::StateRouter;
use strata_protocol::value;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone, everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    pub producer: Arc<BlockProducer>,
    pub router: StateRouter,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/transactions", post(submit_transaction_handler))
        .route("/blocks/:index", get(block_handler))
        .route("/state/:address", get(state_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub protocol_version: String,
    pub miner: String,
    /// `None` only before genesis is written.
    pub tip_index: Option<u64>,
    pub tip_hash: Option<String>,
    pub genesis_hash: Option<String>,
    pub pending_transactions: usize,
    pub shards: usize,
    pub cache_entries: usize,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

/// Response payload for `POST /transactions`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub id: String,
}

/// Response payload for `GET /blocks/:index`.
#[derive(Debug, Serialize, Deserialize)]
pub struct BlockResponse {
    pub index: u64,
    pub hash: String,
    pub previous_hash: Option<String>,
    pub miner: String,
    pub timestamp: String,
    pub difficulty: u64,
    pub transactions: Vec<String>,
}

impl From<&Block> for BlockResponse {
    fn from(block: &Block) -> Self {
        Self {
            index: block.index,
            hash: block.hash.to_hex(),
            previous_hash: block.previous_hash.map(|h| h.to_hex()),
            miner: block.miner.to_hex(),
            timestamp: block.timestamp.to_rfc3339(),
            difficulty: block.difficulty,
            transactions: block.transactions.iter().map(|tx| tx.id().to_hex()).collect(),
        }
    }
}

/// Response payload for `GET /state/:address`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StateResponse {
    pub address: String,
    /// Human-readable rendering of the value.
    pub value: String,
    /// Canonical encoding, hex.
    pub encoded: String,
}

/// Error payload for all non-2xx responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`. Liveness only; subsystem health belongs in `/status`.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let chain = state.producer.chain().read();
    let tip = chain.tip();
    let resp = StatusResponse {
        version: state.version.clone(),
        protocol_version: strata_protocol::config::PROTOCOL_VERSION.to_string(),
        miner: state.producer.miner().to_hex(),
        tip_index: tip.map(|b| b.index),
        tip_hash: tip.map(|b| b.hash.to_hex()),
        genesis_hash: chain.genesis_hash().map(|h| h.to_hex()),
        pending_transactions: state.producer.pending_len(),
        shards: state.router.table().len(),
        cache_entries: state.router.cache().len(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    Json(resp)
}

/// `POST /transactions`. The body is the hex of a serialized, signed
/// transaction. Responds `202` with the id once it is queued.
async fn submit_transaction_handler(State(state): State<AppState>, body: String) -> Response {
    let raw = match hex::decode(body.trim()) {
        Ok(raw) => raw,
        Err(e) => return error(StatusCode::BAD_REQUEST, format!("body is not hex: {}", e)),
    };
    match state.producer.submit(&raw) {
        Ok(id) => (
            StatusCode::ACCEPTED,
            Json(SubmitResponse { id: id.to_hex() }),
        )
            .into_response(),
        Err(e) => {
            let status = match &e {
                SubmissionError::Malformed(_) | SubmissionError::Rejected(_) => {
                    StatusCode::BAD_REQUEST
                }
                SubmissionError::Duplicate(_) => StatusCode::CONFLICT,
                SubmissionError::PoolFull { .. } => StatusCode::SERVICE_UNAVAILABLE,
            };
            tracing::debug!(error = %e, "submission refused");
            error(status, e.to_string())
        }
    }
}

async fn block_handler(Path(index): Path<u64>, State(state): State<AppState>) -> Response {
    let chain = state.producer.chain().read();
    match chain.get(index) {
        Some(block) => (StatusCode::OK, Json(BlockResponse::from(block))).into_response(),
        None => error(
            StatusCode::NOT_FOUND,
            format!("no block at index {}", index),
        ),
    }
}

/// `GET /state/:address`. Reads through the router, so the answer may come
/// from the cache.
async fn state_handler(Path(address): Path<String>, State(state): State<AppState>) -> Response {
    let address = match Address::from_hex(&address) {
        Ok(address) => address,
        Err(e) => return error(StatusCode::BAD_REQUEST, e.to_string()),
    };
    match state.router.get(&address).await {
        Ok(Some(v)) => (
            StatusCode::OK,
            Json(StateResponse {
                address: address.to_hex(),
                value: v.to_string(),
                encoded: hex::encode(value::encode(&v)),
            }),
        )
            .into_response(),
        Ok(None) => error(
            StatusCode::NOT_FOUND,
            format!("no state at {}", address),
        ),
        Err(e) => error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}
