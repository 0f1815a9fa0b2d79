//! Handles the creation and verification of (ed25519) state signatures.
//!
//! The signed payload is exactly the canonical encoding of the state, the
//! canister recomputes the same bytes when checking a dispute request.

use crate::{
    channel::{IcpState, State},
    encoding::{
        self,
        types::{Address, Signature},
    },
};

mod ed25519;
pub use self::ed25519::{Error, Signer};

/// Verifies `sig` over `msg` for the participant `addr`.
///
/// Malformed keys or signatures count as invalid signatures.
pub fn verify_bytes(addr: &Address, msg: &[u8], sig: &Signature) -> bool {
    ed25519::verify(addr, msg, sig)
}

/// Verifies a state signature.
///
/// Returns an error only if the state cannot be encoded, in which case no
/// cryptographic check is attempted. A wrong signer or a tampered state
/// yields `Ok(false)`.
pub fn verify(addr: &Address, state: &State, sig: &Signature) -> Result<bool, encoding::Error> {
    let state = IcpState::try_from(state)?;
    verify_icp_state(addr, &state, sig)
}

pub fn verify_icp_state(
    addr: &Address,
    state: &IcpState,
    sig: &Signature,
) -> Result<bool, encoding::Error> {
    Ok(verify_bytes(addr, &state.encode()?, sig))
}

#[cfg(test)]
mod tests;
