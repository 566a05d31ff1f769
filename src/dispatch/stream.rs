use super::Subscription;
use crate::event::UpdateEvent;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde_json::json;
use std::collections::HashSet;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::wrappers::{IntervalStream, UnboundedReceiverStream};
use tracing::{debug, warn};

/// Format one text/event-stream frame
pub fn frame(name: &str, data: &str) -> Bytes {
    Bytes::from(format!("event: {}\ndata: {}\n\n", name, data))
}

/// Per-connection stream of SSE frames.
///
/// Yields a `connected` frame first, then matching events and a `heartbeat`
/// frame every heartbeat period. Owns its subscription and heartbeat timer,
/// so dropping the stream releases both.
pub struct EventStream {
    connected: Option<Bytes>,
    events: UnboundedReceiverStream<UpdateEvent>,
    heartbeat: IntervalStream,
    subscription: Subscription,
}

impl EventStream {
    pub(super) fn new(
        rx: mpsc::UnboundedReceiver<UpdateEvent>,
        subscription: Subscription,
        heartbeat_period: Duration,
        filter: Option<HashSet<String>>,
    ) -> Self {
        let mut ticker = interval_at(Instant::now() + heartbeat_period, heartbeat_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut entities: Option<Vec<String>> = filter.map(|ids| ids.into_iter().collect());
        if let Some(ids) = entities.as_mut() {
            ids.sort();
        }
        let connected = json!({
            "type": "connected",
            "timestamp": Utc::now(),
            "entities": entities,
        });

        debug!(subscriber = subscription.id(), "Event stream opened");

        Self {
            connected: Some(frame("connected", &connected.to_string())),
            events: UnboundedReceiverStream::new(rx),
            heartbeat: IntervalStream::new(ticker),
            subscription,
        }
    }
}

impl Stream for EventStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        if let Some(connected) = self.connected.take() {
            return Poll::Ready(Some(connected));
        }

        loop {
            match self.events.poll_next_unpin(cx) {
                Poll::Ready(Some(event)) => match serde_json::to_string(&event) {
                    Ok(data) => return Poll::Ready(Some(frame(event.kind.as_str(), &data))),
                    Err(e) => {
                        warn!(error = %e, "Failed to serialize event, skipping");
                        continue;
                    }
                },
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => break,
            }
        }

        match self.heartbeat.poll_next_unpin(cx) {
            Poll::Ready(Some(_)) => {
                let data = json!({ "type": "heartbeat", "timestamp": Utc::now() });
                Poll::Ready(Some(frame("heartbeat", &data.to_string())))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        debug!(subscriber = self.subscription.id(), "Event stream closed");
    }
}
