//! Bounded many-producer / single-consumer conduit between a run and its
//! stream consumer.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::events::AgentEvent;

pub type EventReceiver = mpsc::Receiver<AgentEvent>;

/// Producer half. Cheap to clone; every clone shares the run's token.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: mpsc::Sender<AgentEvent>,
    cancel: CancellationToken,
}

pub fn event_channel(capacity: usize, cancel: CancellationToken) -> (EventSink, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSink { tx, cancel }, rx)
}

impl EventSink {
    /// Enqueue an event. Dropped silently once the run is cancelled or the
    /// consumer is gone; a run never fails because nobody is listening.
    pub async fn emit(&self, event: AgentEvent) {
        if self.cancel.is_cancelled() {
            log::trace!("dropping {} event after cancellation", event.event_name());
            return;
        }
        if self.tx.send(event).await.is_err() {
            log::trace!("event consumer gone");
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
