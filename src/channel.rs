mod canonical;
mod funding;
mod params;
mod registered;
mod state;

use crate::encoding::{
    self,
    types::{Hash, U256},
};

pub use canonical::*;
pub use funding::*;
pub use params::*;
pub use registered::*;
pub use state::*;

/// ID (Index) of a participant in the channel.
///
/// `0` is the proposer of the channel.
pub type PartIdx = usize;

/// Channel identifier, derived from the [Params] via [calc_id].
pub type ChannelId = Hash;

/// Balance as used by the host channel library. Only values in
/// `0..=MAX_BALANCE` can be encoded.
pub type Balance = i128;

/// On-chain amount (ledger units).
pub type Amount = u64;

/// The backend only supports two-party channels.
pub const PARTICIPANTS: usize = 2;

/// Upper bound (inclusive) for a single balance.
pub const MAX_BALANCE: Balance = 1 << 30;

/// Validates a host balance and converts it to the encoded representation.
pub fn make_balance(value: Balance) -> Result<U256, encoding::Error> {
    if !(0..=MAX_BALANCE).contains(&value) {
        return Err(encoding::Error::BalanceOutOfRange(value));
    }
    Ok(U256::from(value as u64))
}

/// Validates a host balance and converts it to a ledger amount.
pub fn make_amount(value: Balance) -> Result<Amount, encoding::Error> {
    Ok(make_balance(value)?.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_balance_bounds() {
        assert_eq!(make_balance(0).unwrap(), U256::zero());
        assert_eq!(make_balance(MAX_BALANCE).unwrap(), U256::from(1u64 << 30));
        assert_eq!(
            make_balance(-1),
            Err(encoding::Error::BalanceOutOfRange(-1))
        );
        assert_eq!(
            make_balance(MAX_BALANCE + 1),
            Err(encoding::Error::BalanceOutOfRange(MAX_BALANCE + 1))
        );
    }

    #[test]
    fn make_amount_matches_balance() {
        assert_eq!(make_amount(50_000).unwrap(), 50_000);
        assert!(make_amount(i128::MIN).is_err());
    }
}
