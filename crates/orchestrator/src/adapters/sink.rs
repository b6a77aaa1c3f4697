//! Progress sink adapter (spec §6): wraps a `tokio::sync::mpsc::Sender`
//! and never blocks orchestration for more than a short bounded duration.

use std::time::Duration;

use async_trait::async_trait;
use security_common::ports::{ProgressMessage, ProgressSinkPort};
use tokio::sync::mpsc::Sender;

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(1);

/// Best-effort `ProgressSinkPort` over a bounded channel. A full or closed
/// channel is dropped silently rather than stalling the pipeline.
pub struct ChannelProgressSink {
    sender: Sender<ProgressMessage>,
}

impl ChannelProgressSink {
    pub fn new(sender: Sender<ProgressMessage>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl ProgressSinkPort for ChannelProgressSink {
    async fn publish(&self, message: ProgressMessage) {
        let _ = tokio::time::timeout(PUBLISH_TIMEOUT, self.sender.send(message)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use security_common::ports::ProgressKind;
    use uuid::Uuid;

    #[tokio::test]
    async fn publish_delivers_message_to_receiver() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let sink = ChannelProgressSink::new(tx);
        sink.publish(ProgressMessage {
            analysis_id: Uuid::new_v4(),
            kind: ProgressKind::Progress,
            payload: serde_json::json!({"progress": 10}),
        })
        .await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, ProgressKind::Progress);
    }

    #[tokio::test]
    async fn publish_to_closed_receiver_does_not_panic_or_hang() {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        drop(rx);
        let sink = ChannelProgressSink::new(tx);
        sink.publish(ProgressMessage {
            analysis_id: Uuid::new_v4(),
            kind: ProgressKind::Error,
            payload: serde_json::json!(null),
        })
        .await;
    }
}
