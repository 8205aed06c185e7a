use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{Json, Response},
    routing::post,
    Router,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{error, info};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct GitHubWebhookPayload {
    pub action: Option<String>,
    pub repository: Option<Repository>,
    pub pull_request: Option<PullRequestRef>,
    pub sender: Option<User>,
}

#[derive(Debug, Deserialize)]
pub struct Repository {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestRef {
    pub number: u64,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub login: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub message: String,
}

impl WebhookResponse {
    fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
        })
    }
}

type HmacSha256 = Hmac<Sha256>;

fn verify_github_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(signature_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };

    mac.update(payload);

    // Constant-time comparison.
    mac.verify_slice(&signature_bytes).is_ok()
}

async fn verify_webhook_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let signature = parts
        .headers
        .get("x-hub-signature-256")
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !verify_github_signature(&state.webhook_secret, &bytes, signature) {
        error!("Invalid webhook signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let request = Request::from_parts(parts, axum::body::Body::from(bytes));
    Ok(next.run(request).await)
}

pub async fn github_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<WebhookResponse>, StatusCode> {
    let event = headers
        .get("x-github-event")
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::BAD_REQUEST)?;

    match event {
        "ping" => {
            info!("Received ping webhook");
            Ok(WebhookResponse::new("pong"))
        }
        "pull_request" | "pull_request_review" => {
            let payload: GitHubWebhookPayload =
                serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;

            info!(
                "Received {} event ({}) for {}#{} from {}",
                event,
                payload.action.as_deref().unwrap_or("no action"),
                payload
                    .repository
                    .as_ref()
                    .map(|r| r.name.as_str())
                    .unwrap_or("unknown"),
                payload
                    .pull_request
                    .as_ref()
                    .map(|pr| pr.number.to_string())
                    .unwrap_or_else(|| "?".to_string()),
                payload
                    .sender
                    .as_ref()
                    .map(|u| u.login.as_str())
                    .unwrap_or("unknown"),
            );

            state.request_sweep();
            Ok(WebhookResponse::new("sweep scheduled"))
        }
        other => {
            info!("Ignoring {} event", other);
            Ok(WebhookResponse::new("event ignored"))
        }
    }
}

pub fn webhook_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhook", post(github_webhook_handler))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            verify_webhook_signature,
        ))
}
