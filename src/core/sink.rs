//! Progressive delivery of run events to a single consumer.

use std::future::Future;

use tokio::sync::mpsc;

use super::orchestrator::WorkflowError;
use crate::domain::{RunEvent, StreamFrame};

/// Sending half of a run's event stream.
///
/// A sink whose receiver has been dropped is "closed": the run treats that
/// as a cancellation request and stops at its next suspension point.
pub struct EventSink {
    tx: Option<mpsc::Sender<StreamFrame>>,
}

impl EventSink {
    /// Create a bounded sink and the receiver the consumer reads from
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards every frame and never cancels
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.is_closed())
    }

    /// Deliver one step event
    pub async fn emit(&self, event: RunEvent) -> Result<(), WorkflowError> {
        self.send(StreamFrame::Event(event)).await
    }

    /// Deliver the terminal sentinel
    pub async fn finish(&self) -> Result<(), WorkflowError> {
        self.send(StreamFrame::Done).await
    }

    async fn send(&self, frame: StreamFrame) -> Result<(), WorkflowError> {
        match &self.tx {
            Some(tx) => tx.send(frame).await.map_err(|_| WorkflowError::Cancelled),
            None => Ok(()),
        }
    }

    /// Run `fut` unless the consumer goes away first.
    ///
    /// When the sink closes, `fut` is dropped and its result never reaches
    /// the caller.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, WorkflowError> {
        let Some(tx) = &self.tx else {
            return Ok(fut.await);
        };

        tokio::select! {
            biased;
            _ = tx.closed() => Err(WorkflowError::Cancelled),
            output = fut => Ok(output),
        }
    }
}
