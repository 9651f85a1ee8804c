//! Overlay alert stream (server-sent events) for streaming software.

use crate::{
    alert::{AlertEvent, Subscription},
    AppState, Error, Result,
};
use actix_web::{
    get,
    http::header::{CACHE_CONTROL, CONTENT_TYPE},
    post,
    web::{self, Bytes},
    HttpResponse, Scope,
};
use futures::{stream, Stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::{convert::Infallible, time::Duration};
use tokio::time::{interval_at, Instant};
use tracing::{info, warn};

const HEARTBEAT_FRAME: &[u8] = b": heartbeat\n\n";

pub fn scope() -> Scope {
    web::scope("/overlay").service(alert_stream).service(test_alert)
}

fn event_frame<T: Serialize>(event: &str, data: &T) -> Option<Bytes> {
    match serde_json::to_string(data) {
        Ok(json) => Some(Bytes::from(format!("event: {}\ndata: {}\n\n", event, json))),
        Err(e) => {
            warn!(error = e.to_string(), event, "Failed to encode sse frame");
            None
        }
    }
}

/// `connected` first, then alerts as they come with a heartbeat comment
/// whenever the interval elapses. Ends when the subscription is closed, and
/// dropping the stream unregisters the subscription.
pub fn frames(
    sub: Subscription,
    username: String,
    heartbeat: Duration,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    let hello = event_frame(
        "connected",
        &json!({"message": "Connected to alert stream", "username": username}),
    );
    let ticker = interval_at(Instant::now() + heartbeat, heartbeat);
    let alerts = stream::unfold((sub, ticker), |(mut sub, mut ticker)| async move {
        loop {
            let frame = tokio::select! {
                alert = sub.recv() => match alert {
                    Some(event) => event_frame::<AlertEvent>("alert", &event),
                    None => return None,
                },
                _ = ticker.tick() => Some(Bytes::from_static(HEARTBEAT_FRAME)),
            };
            if let Some(frame) = frame {
                return Some((Ok(frame), (sub, ticker)));
            }
        }
    });
    stream::iter(hello.map(Ok)).chain(alerts)
}

#[get("/alert/{stream_key}")]
pub async fn alert_stream(
    state: web::Data<AppState>,
    stream_key: web::Path<String>,
) -> Result<HttpResponse> {
    let creator = state
        .service
        .get_creator_by_stream_key(&stream_key)
        .await?
        .ok_or_else(|| Error::NotFound("stream key".to_owned()))?;

    // alerts are keyed by creator id
    let sub = state.service.alerts().subscribe(&creator.id.to_string());
    info!(
        user = creator.username,
        user_id = creator.id,
        subscription = sub.id(),
        "SSE client connected"
    );

    let heartbeat = Duration::from_secs(state.setting.alert.heartbeat);
    Ok(HttpResponse::Ok()
        .insert_header((CONTENT_TYPE, "text/event-stream"))
        .insert_header((CACHE_CONTROL, "no-cache"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(frames(sub, creator.username, heartbeat)))
}

#[post("/test/{stream_key}")]
pub async fn test_alert(
    state: web::Data<AppState>,
    stream_key: web::Path<String>,
) -> Result<HttpResponse> {
    let creator = state
        .service
        .get_creator_by_stream_key(&stream_key)
        .await?
        .ok_or_else(|| Error::NotFound("stream key".to_owned()))?;

    let key = creator.id.to_string();
    let event = AlertEvent {
        supporter_name: "Test User".to_owned(),
        amount: 10000,
        message: "Ini adalah test alert! 🎉".to_owned(),
        creator_name: creator.username,
        product_name: None,
        product_emoji: None,
        quantity: 1,
    };
    let alerts = state.service.alerts();
    alerts.broadcast(&key, &event);

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Test alert sent",
        "client_count": alerts.count(&key),
    })))
}
