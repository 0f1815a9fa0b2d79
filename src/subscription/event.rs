use crate::{
    canister::{ChainEvent, Timestamp},
    channel::{Amount, ChannelId, PARTICIPANTS},
};

/// A state was registered or progressed, the challenge period runs until
/// `timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisputedEvent {
    pub channel: ChannelId,
    pub version: u64,
    pub alloc: [Amount; PARTICIPANTS],
    pub timeout: Timestamp,
    pub timestamp: Timestamp,
}

/// The channel was concluded, funds can be withdrawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcludedEvent {
    pub channel: ChannelId,
    pub version: u64,
    pub alloc: [Amount; PARTICIPANTS],
    pub timeout: Timestamp,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjudicatorEvent {
    Disputed(DisputedEvent),
    Concluded(ConcludedEvent),
}

impl AdjudicatorEvent {
    pub fn channel(&self) -> ChannelId {
        match self {
            AdjudicatorEvent::Disputed(e) => e.channel,
            AdjudicatorEvent::Concluded(e) => e.channel,
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            AdjudicatorEvent::Disputed(e) => e.version,
            AdjudicatorEvent::Concluded(e) => e.version,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            AdjudicatorEvent::Disputed(e) => e.timestamp,
            AdjudicatorEvent::Concluded(e) => e.timestamp,
        }
    }

    pub fn timeout(&self) -> Timestamp {
        match self {
            AdjudicatorEvent::Disputed(e) => e.timeout,
            AdjudicatorEvent::Concluded(e) => e.timeout,
        }
    }

    pub fn is_concluded(&self) -> bool {
        matches!(self, AdjudicatorEvent::Concluded(_))
    }
}

impl From<ChainEvent> for AdjudicatorEvent {
    fn from(ev: ChainEvent) -> Self {
        if ev.finalized {
            AdjudicatorEvent::Concluded(ConcludedEvent {
                channel: ev.channel,
                version: ev.version,
                alloc: ev.alloc,
                timeout: ev.timeout,
                timestamp: ev.timestamp,
            })
        } else {
            AdjudicatorEvent::Disputed(DisputedEvent {
                channel: ev.channel,
                version: ev.version,
                alloc: ev.alloc,
                timeout: ev.timeout,
                timestamp: ev.timestamp,
            })
        }
    }
}
