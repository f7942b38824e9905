use std::convert::Infallible;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};

use crate::broker::{Broker, OverflowPolicy, Subscription};
use crate::shutdown::{self, ShutdownCoordinator, StreamGuard};

pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub broker: Broker,
    pub shutdown: ShutdownCoordinator,
    /// Send a confirmation line before the first message of each stream.
    pub announce: bool,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(broker: Broker, shutdown: ShutdownCoordinator) -> Self {
        Self {
            broker,
            shutdown,
            announce: false,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Method not allowed, should be {0}")]
    MethodNotAllowed(&'static str),

    #[error("Topic is required")]
    MissingTopic,

    #[error("Topic and message are required")]
    MissingFields,

    #[error("Error parsing request body: {0}")]
    MalformedBody(#[source] serde_json::Error),

    #[error("Request body too large")]
    BodyTooLarge,

    #[error("Error reading request body")]
    BodyRead(#[source] axum::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::MissingTopic | ApiError::MissingFields | ApiError::MalformedBody(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::BodyRead(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

impl From<axum::Error> for ApiError {
    fn from(e: axum::Error) -> Self {
        let too_large = std::error::Error::source(&e)
            .is_some_and(|source| source.is::<http_body_util::LengthLimitError>());
        if too_large {
            ApiError::BodyTooLarge
        } else {
            ApiError::BodyRead(e)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PublishRequest {
    topic: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct SubscribeParams {
    topic: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    topics: usize,
    subscribers: usize,
    streams: usize,
    overflow: OverflowPolicy,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        topics: state.broker.topic_count(),
        subscribers: state.broker.total_subscribers(),
        streams: state.shutdown.active_count(),
        overflow: state.broker.sink_config().overflow,
    })
}

async fn publish(State(state): State<AppState>, body: Body) -> Result<StatusCode, ApiError> {
    let body = axum::body::to_bytes(body, state.max_body_bytes).await?;
    let request: PublishRequest = serde_json::from_slice(&body).map_err(ApiError::MalformedBody)?;
    if request.topic.is_empty() || request.message.is_empty() {
        return Err(ApiError::MissingFields);
    }

    let delivered = state.broker.publish(&request.topic, request.message).await;
    tracing::info!(topic = %request.topic, delivered, "published message");
    Ok(StatusCode::OK)
}

/// Connection-scoped state of one `/subscribe` response body.
struct Feed {
    subscription: Subscription,
    _guard: StreamGuard,
}

impl Drop for Feed {
    fn drop(&mut self) {
        tracing::info!(
            topic = %self.subscription.topic(),
            subscriber = %self.subscription.id(),
            "subscriber disconnected"
        );
    }
}

async fn subscribe(
    State(state): State<AppState>,
    Query(params): Query<SubscribeParams>,
) -> Result<Response, ApiError> {
    let topic = params
        .topic
        .filter(|topic| !topic.is_empty())
        .ok_or(ApiError::MissingTopic)?;

    let subscription = state.broker.subscribe(&topic);
    let (guard, stop_rx) = state.shutdown.register();
    tracing::info!(topic = %topic, subscriber = %subscription.id(), "subscriber connected");

    let greeting = state
        .announce
        .then(|| format!("Subscribed to topic: {topic}, waiting for messages...\n"));

    let feed = Feed {
        subscription,
        _guard: guard,
    };
    let messages = stream::unfold(feed, |mut feed| async move {
        let message = feed.subscription.recv().await?;
        Some((format!("{message}\n"), feed))
    });

    // Dropping the body, on disconnect or shutdown, drops the feed and with it
    // the subscription.
    let lines = stream::iter(greeting)
        .chain(messages)
        .take_until(shutdown::signalled(stop_rx))
        .map(|line| Ok::<_, Infallible>(Bytes::from(line)));

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(lines),
    )
        .into_response())
}

async fn post_only() -> ApiError {
    ApiError::MethodNotAllowed("POST")
}

async fn get_only() -> ApiError {
    ApiError::MethodNotAllowed("GET")
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/publish", post(publish).fallback(post_only))
        .route("/subscribe", get(subscribe).fallback(get_only))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
