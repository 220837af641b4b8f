//! Built-in controllers mounted by the listener.
use std::sync::Arc;

use axum::{Json, extract::Request, http::StatusCode, response::IntoResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    adapters::middleware::CorrelationId,
    core::{adapter::Endpoint, context::ExecutionContext},
    utils::graceful_shutdown::ShutdownHandle,
};

/// RFC 850 timestamp layout, always rendered in UTC.
const RFC850_FORMAT: &str = "%A, %d-%b-%y %H:%M:%S UTC";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultHomepage {
    pub correlation_id: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// `GET {prefix}/`: correlation id of the request and the current time.
pub fn homepage_controller(context: Arc<ExecutionContext>) -> Endpoint {
    Endpoint::from_fn(move |req: Request| {
        let correlation_id = req
            .extensions()
            .get::<CorrelationId>()
            .map(|CorrelationId(id)| id.clone())
            .unwrap_or_else(|| context.correlation_id());
        async move {
            Json(DefaultHomepage {
                correlation_id,
                timestamp: Utc::now().format(RFC850_FORMAT).to_string(),
            })
        }
    })
}

/// `GET|POST {prefix}/shutdown`: request a graceful shutdown.
pub fn shutdown_controller(handle: ShutdownHandle) -> Endpoint {
    Endpoint::from_fn(move |_req: Request| {
        let accepted = handle.request_shutdown("/shutdown");
        async move {
            let message = if accepted {
                "Server shutdown requested"
            } else {
                "Server shutdown already in progress"
            };
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({ "message": message })),
            )
                .into_response()
        }
    })
}

/// `GET {prefix}/health/probe`: liveness only, never authorized.
pub fn probe_controller() -> Endpoint {
    Endpoint::from_fn(|_req: Request| async {
        Json(ProbeResponse {
            status: "healthy".to_string(),
            service: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    })
}
