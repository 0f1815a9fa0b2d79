//! Polls the canister for adjudicator events of one channel.

mod event;
mod parser;

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::{sync::mpsc, time::sleep};
use tracing::{debug, error};

use crate::{
    cancel::{cancel_pair, CancelToken, Canceller},
    canister::{Canister, CanisterError, Timestamp},
    channel::ChannelId,
    connector::Connector,
    ledger::Ledger,
};

pub use event::*;
pub use parser::parse_events;

/// Capacity of the buffer between the poll loop and the consumer.
pub const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    #[error("query_events failed: {0}")]
    Query(#[source] CanisterError),
}

type ErrSlot = Arc<Mutex<Option<SubscriptionError>>>;

/// Stream of [AdjudicatorEvent]s of a single channel.
///
/// A background task queries the canister every poll interval and pushes
/// new events into a bounded buffer. The subscription ends when it is
/// closed (or dropped) or when a query fails, see [EventSubscription::err].
#[derive(Debug)]
pub struct EventSubscription {
    rx: mpsc::Receiver<AdjudicatorEvent>,
    closer: SubscriptionCloser,
    closed: CancelToken,
    err: ErrSlot,
}

/// Handle closing an [EventSubscription] from another task.
#[derive(Debug, Clone)]
pub struct SubscriptionCloser(Arc<Canceller>);

impl SubscriptionCloser {
    pub fn close(&self) {
        self.0.cancel();
    }
}

impl EventSubscription {
    /// Starts polling. Must be called from within a tokio runtime.
    pub fn new<C, L>(conn: Arc<Connector<C, L>>, channel: ChannelId, interval: Duration) -> Self
    where
        C: Canister + 'static,
        L: Ledger + 'static,
    {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (canceller, closed) = cancel_pair();
        let err = ErrSlot::default();
        tokio::spawn(poll(
            conn,
            channel,
            interval,
            tx,
            closed.clone(),
            err.clone(),
        ));
        Self {
            rx,
            closer: SubscriptionCloser(Arc::new(canceller)),
            closed,
            err,
        }
    }

    /// Waits for the next event. Returns `None` once the subscription is
    /// closed or the poll loop stopped.
    pub async fn next(&mut self) -> Option<AdjudicatorEvent> {
        if self.closed.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            ev = self.rx.recv() => ev,
        }
    }

    /// Error that stopped the poll loop, if any.
    pub fn err(&self) -> Option<SubscriptionError> {
        self.err
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn close(&self) {
        self.closer.close();
    }

    pub fn closer(&self) -> SubscriptionCloser {
        self.closer.clone()
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.closer.close();
    }
}

async fn poll<C: Canister, L: Ledger>(
    conn: Arc<Connector<C, L>>,
    channel: ChannelId,
    interval: Duration,
    tx: mpsc::Sender<AdjudicatorEvent>,
    closed: CancelToken,
    err: ErrSlot,
) {
    let mut since: Timestamp = 0;
    debug!(?channel, "event subscription started");
    loop {
        let res = tokio::select! {
            _ = closed.cancelled() => break,
            res = conn.query_events(&channel, since) => res,
        };
        let log = match res {
            Ok(log) => log,
            Err(e) => {
                error!(?channel, error = %e, "event query failed");
                *err.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(SubscriptionError::Query(e));
                break;
            }
        };

        for ev in parse_events(&log) {
            if ev.channel() != channel {
                continue;
            }
            since = ev.timestamp().saturating_add(1);
            debug!(?channel, version = ev.version(), concluded = ev.is_concluded(), "event");
            tokio::select! {
                _ = closed.cancelled() => return,
                res = tx.send(ev) => {
                    if res.is_err() {
                        return;
                    }
                }
            }
        }

        tokio::select! {
            _ = closed.cancelled() => break,
            _ = sleep(interval) => {}
        }
    }
    debug!(?channel, "event subscription stopped");
}
