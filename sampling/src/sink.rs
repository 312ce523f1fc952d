//! Push-side emission hooks.
//!
//! Marks and shifts are handed to an external write-behind collaborator.
//! Whether that collaborator exists is decided once, when the engine is built.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use crate::error::SinkError;
use crate::metrics::Counters;
use crate::streams::Stamp;
use crate::types::{Mark, Symbol};

#[derive(Clone, Debug, PartialEq)]
pub enum CoreEvent {
    Mark { symbol: Symbol, mark: Arc<Mark> },
    Shift { symbol: Symbol, stamp: Stamp },
}

impl CoreEvent {
    pub fn symbol(&self) -> &Symbol {
        match self {
            CoreEvent::Mark { symbol, .. } | CoreEvent::Shift { symbol, .. } => symbol,
        }
    }
}

/// Receives every emitted event exactly once. Must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: CoreEvent) -> Result<(), SinkError>;
}

/// Bounded channel in front of a persistence task.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<CoreEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<CoreEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: CoreEvent) -> Result<(), SinkError> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Full,
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Persistence capability, resolved at startup.
#[derive(Clone, Default)]
pub enum Persistence {
    #[default]
    Disabled,
    Enabled(Arc<dyn EventSink>),
}

impl fmt::Debug for Persistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Persistence::Disabled => f.write_str("Disabled"),
            Persistence::Enabled(_) => f.write_str("Enabled"),
        }
    }
}

impl Persistence {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Persistence::Enabled(_))
    }

    /// Hands `event` to the sink. Failures are logged and counted, never retried.
    pub fn publish(&self, event: CoreEvent, counters: &Counters) {
        let Persistence::Enabled(sink) = self else {
            return;
        };

        let symbol = event.symbol().clone();
        match sink.emit(event) {
            Ok(()) => Counters::incr(&counters.sink_events),
            Err(e) => {
                Counters::incr(&counters.sink_dropped);
                warn!(symbol = %symbol, error = %e, "failed to hand event to write-behind sink");
            }
        }
    }
}
