//! Emission sinks for output documents

use crate::logging::{StructuredLogger, get_logger};
use crate::normalize::OutputDocument;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Downstream consumer of emitted documents. Emission never fails the tick.
pub trait OutputSink: Send + Sync {
    fn emit(&self, document: &OutputDocument);
}

/// Fan-out to SSE subscribers plus the latest-document slot
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<Arc<OutputDocument>>,
    latest: watch::Sender<Option<Arc<OutputDocument>>>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        let (latest, _latest_rx) = watch::channel(None);
        Self { tx, latest }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<OutputDocument>> {
        self.tx.subscribe()
    }

    pub fn latest(&self) -> Option<Arc<OutputDocument>> {
        self.latest.borrow().clone()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(64)
    }
}

impl OutputSink for BroadcastSink {
    fn emit(&self, document: &OutputDocument) {
        let doc = Arc::new(document.clone());
        self.latest.send_replace(Some(doc.clone()));
        // no subscribers is fine
        let _ = self.tx.send(doc);
    }
}

/// One JSON document per stdout line
pub struct StdoutSink {
    logger: StructuredLogger,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            logger: get_logger("sink.stdout"),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for StdoutSink {
    fn emit(&self, document: &OutputDocument) {
        let line = match serde_json::to_string(document) {
            Ok(line) => line,
            Err(e) => {
                self.logger
                    .warn(&format!("Failed to serialize document: {}", e));
                return;
            }
        };
        let mut out = std::io::stdout().lock();
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            self.logger.warn(&format!("Failed to write document: {}", e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::Payload;

    fn doc(consumption: f64) -> OutputDocument {
        OutputDocument {
            code: 200,
            info: "Success".into(),
            payload: Payload {
                consumption,
                ..Payload::default()
            },
        }
    }

    #[tokio::test]
    async fn broadcast_sink_fans_out_and_keeps_latest() {
        let sink = BroadcastSink::new(4);
        assert!(sink.latest().is_none());
        let mut rx = sink.subscribe();

        sink.emit(&doc(1.0));
        sink.emit(&doc(2.0));

        assert_eq!(rx.recv().await.unwrap().payload.consumption, 1.0);
        assert_eq!(rx.recv().await.unwrap().payload.consumption, 2.0);
        assert_eq!(sink.latest().unwrap().payload.consumption, 2.0);
    }

    #[test]
    fn emitting_without_subscribers_is_harmless() {
        let sink = BroadcastSink::default();
        sink.emit(&doc(3.0));
        assert_eq!(sink.latest().unwrap().payload.consumption, 3.0);
        StdoutSink::new().emit(&doc(3.0));
    }
}
