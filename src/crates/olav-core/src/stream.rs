//! Ordered event channel from a running workflow to one subscriber.
//!
//! One producer (the engine driving a run), one subscriber (the client
//! transport). FIFO, never dropped from the producer's viewpoint:
//!
//! - Non-coalescable events (`message`, `tool_start`, `tool_end`,
//!   `interrupt`, `done`, `error`) use awaited sends and always reach the
//!   channel in order.
//! - Coalescable events (`token`, `thinking`) are sent opportunistically;
//!   when the subscriber is slow and the buffer fills, consecutive token
//!   deltas merge into a pending buffer that is flushed before the next
//!   non-coalescable emit, so the producer never blocks on them.
//! - A disconnected subscriber does not fail the run: emission continues
//!   into the void, and the durable trail lives in the checkpoint history
//!   for later replay.
//!
//! The stream is closed by a single terminal event, or without one when
//! the run suspends on an interrupt.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::event::Event;

/// Stream of events consumed by the client transport
pub type EventStream = Pin<Box<dyn Stream<Item = Event> + Send>>;

/// Default channel capacity
pub const DEFAULT_EVENT_BUFFER: usize = 256;

struct SinkInner {
    /// `None` once the stream is closed; dropping the sender ends the
    /// subscriber's stream
    tx: Option<mpsc::Sender<Event>>,
    /// Coalesce buffer for token/thinking events that did not fit
    pending: Option<Event>,
    /// Subscriber went away; keep accepting events silently
    detached: bool,
}

impl SinkInner {
    /// Merge two coalescable events. Token deltas concatenate; for
    /// thinking, the newer step supersedes the older one.
    fn coalesce(older: Event, newer: Event) -> Event {
        match (older, newer) {
            (Event::Token { delta: a }, Event::Token { delta: b }) => {
                Event::Token { delta: a + &b }
            }
            (_, newer) => newer,
        }
    }

    async fn flush_pending(&mut self) {
        if let Some(event) = self.pending.take() {
            self.send(event).await;
        }
    }

    async fn send(&mut self, event: Event) {
        if self.detached {
            return;
        }
        if let Some(tx) = &self.tx {
            if tx.send(event).await.is_err() {
                debug!("event subscriber disconnected; continuing detached");
                self.detached = true;
            }
        }
    }
}

/// Producer half of the event channel
#[derive(Clone)]
pub struct EventSink {
    inner: Arc<Mutex<SinkInner>>,
}

impl EventSink {
    /// Create a sink/stream pair with the given buffer capacity
    pub fn channel(buffer: usize) -> (Self, EventStream) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let sink = Self {
            inner: Arc::new(Mutex::new(SinkInner {
                tx: Some(tx),
                pending: None,
                detached: false,
            })),
        };
        let stream = Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx));
        (sink, stream)
    }

    /// Emit one event in FIFO order
    pub async fn emit(&self, event: Event) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(tx) = inner.tx.clone() else {
            return Err(EngineError::internal("emit after stream close"));
        };

        if event.is_coalescable() {
            let queued = match inner.pending.take() {
                Some(pending) => SinkInner::coalesce(pending, event),
                None => event,
            };
            if inner.detached {
                return Ok(());
            }
            match tx.try_send(queued) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(queued)) => {
                    // Subscriber is slow; hold the merged event for later.
                    inner.pending = Some(queued);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("event subscriber disconnected; continuing detached");
                    inner.detached = true;
                }
            }
        } else {
            inner.flush_pending().await;
            inner.send(event).await;
        }
        Ok(())
    }

    /// Close the stream with exactly one terminal event
    pub async fn close(&self, terminal: Event) -> Result<()> {
        if !terminal.is_terminal() {
            return Err(EngineError::internal("close requires a terminal event"));
        }
        let mut inner = self.inner.lock().await;
        if inner.tx.is_none() {
            return Err(EngineError::internal("stream already closed"));
        }
        inner.flush_pending().await;
        inner.send(terminal).await;
        inner.tx = None;
        Ok(())
    }

    /// End the stream without a terminal event (run suspended on an
    /// interrupt; the resume entry point opens a fresh stream)
    pub async fn finish_suspended(&self) {
        let mut inner = self.inner.lock().await;
        inner.flush_pending().await;
        inner.tx = None;
    }

    /// Whether the stream has been closed
    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.tx.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageRole;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_fifo_order() {
        let (sink, mut stream) = EventSink::channel(8);

        sink.emit(Event::Message {
            role: MessageRole::User,
            content: "hi".into(),
        })
        .await
        .unwrap();
        sink.emit(Event::Token { delta: "a".into() }).await.unwrap();
        sink.close(Event::Done {
            final_state: json!({}),
        })
        .await
        .unwrap();

        assert!(matches!(
            stream.next().await.unwrap(),
            Event::Message { .. }
        ));
        assert!(matches!(stream.next().await.unwrap(), Event::Token { .. }));
        assert!(stream.next().await.unwrap().is_terminal());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_token_coalescing_under_backpressure() {
        // Capacity 1 and no reader: the first token occupies the buffer,
        // subsequent ones merge into the pending slot.
        let (sink, mut stream) = EventSink::channel(1);

        sink.emit(Event::Token { delta: "a".into() }).await.unwrap();
        sink.emit(Event::Token { delta: "b".into() }).await.unwrap();
        sink.emit(Event::Token { delta: "c".into() }).await.unwrap();

        let first = stream.next().await.unwrap();
        assert_eq!(first, Event::Token { delta: "a".into() });

        // Flushed ahead of the terminal event, merged.
        sink.close(Event::Done {
            final_state: json!({}),
        })
        .await
        .unwrap();

        let merged = stream.next().await.unwrap();
        assert_eq!(merged, Event::Token { delta: "bc".into() });
        assert!(stream.next().await.unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_non_coalescable_never_merged() {
        let (sink, mut stream) = EventSink::channel(4);

        sink.emit(Event::ToolStart {
            id: "1".into(),
            name: "t".into(),
            args: json!({}),
        })
        .await
        .unwrap();
        sink.emit(Event::ToolEnd {
            id: "1".into(),
            result: Some(json!({})),
            error: None,
            duration_ms: 3,
            success: true,
        })
        .await
        .unwrap();

        assert!(matches!(
            stream.next().await.unwrap(),
            Event::ToolStart { .. }
        ));
        assert!(matches!(
            stream.next().await.unwrap(),
            Event::ToolEnd { .. }
        ));
    }

    #[tokio::test]
    async fn test_emit_after_close_rejected() {
        let (sink, _stream) = EventSink::channel(4);
        sink.close(Event::Done {
            final_state: json!({}),
        })
        .await
        .unwrap();

        let err = sink.emit(Event::Token { delta: "x".into() }).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_detached_subscriber_does_not_fail_producer() {
        let (sink, stream) = EventSink::channel(2);
        drop(stream);

        // Emission into the void succeeds from the producer's viewpoint.
        sink.emit(Event::Message {
            role: MessageRole::Assistant,
            content: "still running".into(),
        })
        .await
        .unwrap();
        sink.close(Event::Done {
            final_state: json!({}),
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_suspend_closes_without_terminal() {
        let (sink, mut stream) = EventSink::channel(4);
        sink.emit(Event::Interrupt {
            execution_plan: json!({"tool": "device.configure"}),
        })
        .await
        .unwrap();
        sink.finish_suspended().await;

        assert!(matches!(
            stream.next().await.unwrap(),
            Event::Interrupt { .. }
        ));
        assert!(stream.next().await.is_none());
    }
}
