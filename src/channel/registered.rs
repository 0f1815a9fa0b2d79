use super::IcpState;

/// Lifecycle stage of a channel's registered state on the canister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisputePhase {
    Register,
    Progress,
    Conclude,
}

impl DisputePhase {
    pub fn name(&self) -> &'static str {
        match self {
            DisputePhase::Register => "Register",
            DisputePhase::Progress => "Progress",
            DisputePhase::Conclude => "Conclude",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Register" => Some(DisputePhase::Register),
            "Progress" => Some(DisputePhase::Progress),
            "Conclude" => Some(DisputePhase::Conclude),
            _ => None,
        }
    }
}

/// On-chain record of a channel, owned by the canister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisteredState {
    pub phase: DisputePhase,
    pub state: IcpState,
    /// End of the challenge period (canister time, nanoseconds).
    pub timeout: u64,
}

impl RegisteredState {
    /// Whether funds can be withdrawn, either because the state was
    /// concluded explicitly or the challenge period is over.
    pub fn is_concluded_at(&self, now: u64) -> bool {
        self.phase == DisputePhase::Conclude || now >= self.timeout
    }
}
