//! Turns an event log into at most one typed event.
//!
//! The six event fields are collected column-wise from the log. If any
//! column stays empty there is no event yet. Otherwise the candidate with
//! the highest version is selected (the first one on ties), and a zero
//! channel ID means that no real event was present.

use tracing::debug;

use super::AdjudicatorEvent;
use crate::{
    canister::{ChainEvent, EventLog, Timestamp},
    channel::{Amount, ChannelId, PARTICIPANTS},
    wire::idl::IdlValue,
};

#[derive(Debug, Default)]
struct Columns {
    channel: Vec<ChannelId>,
    version: Vec<u64>,
    finalized: Vec<bool>,
    alloc: Vec<[Amount; PARTICIPANTS]>,
    timeout: Vec<Timestamp>,
    timestamp: Vec<Timestamp>,
}

impl Columns {
    fn from_events(events: &[ChainEvent]) -> Self {
        let mut cols = Columns::default();
        for ev in events {
            cols.channel.push(ev.channel);
            cols.version.push(ev.version);
            cols.finalized.push(ev.finalized);
            cols.alloc.push(ev.alloc);
            cols.timeout.push(ev.timeout);
            cols.timestamp.push(ev.timestamp);
        }
        cols
    }

    /// Collects the fields of every record in the printed log. Fields with
    /// values of the wrong shape are skipped.
    fn from_text(text: &str) -> Self {
        let mut cols = Columns::default();
        let value = match IdlValue::parse(text) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "unparsable event log");
                return cols;
            }
        };
        value.walk(&mut |v| {
            let IdlValue::Record(fields) = v else {
                return;
            };
            for (name, v) in fields {
                match name.as_str() {
                    "channel" => {
                        if let Some(id) = v.as_blob().and_then(|b| ChannelId::from_slice(&b).ok())
                        {
                            cols.channel.push(id);
                        }
                    }
                    "version" => cols.version.extend(v.as_u64()),
                    "finalized" => cols.finalized.extend(v.as_bool()),
                    "alloc" => cols.alloc.extend(alloc(v)),
                    "timeout" => cols.timeout.extend(v.as_u64()),
                    "timestamp" => cols.timestamp.extend(v.as_u64()),
                    _ => {}
                }
            }
        });
        cols
    }

    fn select(&self) -> Option<ChainEvent> {
        let n = [
            self.channel.len(),
            self.version.len(),
            self.finalized.len(),
            self.alloc.len(),
            self.timeout.len(),
            self.timestamp.len(),
        ]
        .into_iter()
        .min()
        .unwrap_or(0);
        if n == 0 {
            return None;
        }

        let mut best = 0;
        for i in 1..n {
            if self.version[i] > self.version[best] {
                best = i;
            }
        }
        if self.channel[best].is_zero() {
            return None;
        }
        Some(ChainEvent {
            channel: self.channel[best],
            version: self.version[best],
            finalized: self.finalized[best],
            alloc: self.alloc[best],
            timeout: self.timeout[best],
            timestamp: self.timestamp[best],
        })
    }
}

fn alloc(v: &IdlValue) -> Option<[Amount; PARTICIPANTS]> {
    match v.as_vec()? {
        [a, b] => Some([a.as_u64()?, b.as_u64()?]),
        _ => None,
    }
}

/// Extracts the authoritative event of a log. The result is empty if the
/// log holds no (complete) event, parsing never fails.
pub fn parse_events(log: &EventLog) -> Vec<AdjudicatorEvent> {
    let cols = match log {
        EventLog::Text(text) => Columns::from_text(text),
        EventLog::Structured(events) => Columns::from_events(events),
    };
    cols.select().map(AdjudicatorEvent::from).into_iter().collect()
}
