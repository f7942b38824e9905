#![allow(dead_code)]

use std::time::Duration;

use axum::body::Body;
use http_body_util::BodyExt;
use topicd::api::AppState;
use topicd::broker::{Broker, SinkConfig};
use topicd::shutdown::ShutdownCoordinator;

pub fn create_test_state() -> AppState {
    create_test_state_with(SinkConfig::default())
}

pub fn create_test_state_with(sink: SinkConfig) -> AppState {
    AppState::new(Broker::new(sink), ShutdownCoordinator::new())
}

/// Next data frame of a streaming body as text, `None` once the body ends.
pub async fn next_line(body: &mut Body) -> Option<String> {
    let frame = tokio::time::timeout(Duration::from_secs(1), body.frame())
        .await
        .expect("timed out waiting for a frame")?
        .expect("body error");
    let data = frame.into_data().expect("expected a data frame");
    Some(String::from_utf8(data.to_vec()).expect("utf-8 line"))
}

pub async fn body_text(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
