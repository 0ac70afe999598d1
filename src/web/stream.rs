//! Server-Sent-Events feed of [IndexerEvent]s

use crate::{
    constants::{EVENT_CHANNEL_CAPACITY, SSE_KEEP_ALIVE},
    event::{Broadcaster, EventType, IndexerEvent},
};
use actix_web::{get, web::Data, HttpRequest, Responder};
use actix_web_lab::sse;
use log::{debug, error, trace};
use std::collections::HashSet;
use tokio::sync::broadcast::error::RecvError;

/// Event types named as keys in `query`, all of them if none are
pub fn requested_event_types(query: &str) -> HashSet<EventType> {
    let requested: HashSet<EventType> = query
        .split('&')
        .filter_map(|pair| pair.split('=').next())
        .filter_map(|key| key.parse().ok())
        .collect();

    if requested.is_empty() {
        EventType::ALL.into_iter().collect()
    } else {
        requested
    }
}

fn to_sse(event: &IndexerEvent) -> Option<sse::Event> {
    match sse::Data::new_json(event) {
        Ok(data) => Some(data.event(event.event_type().to_string()).into()),
        Err(e) => {
            error!("Error serializing {} event: {e}", event.event_type());
            None
        }
    }
}

#[get("/stream")]
pub async fn get_stream(broadcaster: Data<Broadcaster>, req: HttpRequest) -> impl Responder {
    let wanted = requested_event_types(req.query_string());
    let mut events = broadcaster.subscribe();
    let (sender, stream) = sse::channel(EVENT_CHANNEL_CAPACITY);

    debug!("New stream subscriber for {wanted:?}");
    actix_web::rt::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Stream subscriber lagged, {skipped} events dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            if !wanted.contains(&event.event_type()) {
                continue;
            }

            let Some(sse_event) = to_sse(&event) else {
                continue;
            };
            if sender.send(sse_event).await.is_err() {
                trace!("Stream subscriber disconnected");
                break;
            }
        }
    });

    stream.with_keep_alive(SSE_KEEP_ALIVE)
}
