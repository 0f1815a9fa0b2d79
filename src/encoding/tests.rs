use super::*;
use crate::channel::{Allocation, IcpState, State};
use serde::Serialize;
use types::{Address, Hash, U256};

use core::fmt::Debug;

/*
Add the following before a `serialize_and_compare` call to print the entire
serialized output.
```
    let mut writer = PrintWriter {};
    to_writer(&d, &mut writer).unwrap();
```
*/
#[allow(dead_code)]
struct PrintWriter;

impl Writer for PrintWriter {
    fn write(&mut self, bytes: &[u8]) {
        println!("0x{}", hex::encode(bytes));
    }
}

struct AssertWriter<'a, I>
where
    I: Iterator<Item = &'a str>,
{
    expected_iter: I,
}

struct Chunk<'a>(&'a [u8]);

impl<'a> Debug for Chunk<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl<'a> PartialEq for Chunk<'a> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<'a, I> Writer for AssertWriter<'a, I>
where
    I: Iterator<Item = &'a str>,
{
    fn write(&mut self, bytes: &[u8]) {
        let expected = self
            .expected_iter
            .next()
            .expect("serializer wrote more chunks than expected");
        let expected = hex::decode(expected).expect("invalid hex in expected output");
        assert_eq!(Chunk(bytes), Chunk(&expected));
    }
}

/// Serializes `value` and compares every write against one line of
/// `expected` (whitespace separated hex chunks).
pub(crate) fn serialize_and_compare<T: Serialize>(value: &T, expected: &str) {
    let mut iter = expected.split_whitespace();
    let mut writer = AssertWriter {
        expected_iter: &mut iter,
    };
    to_writer(value, &mut writer).unwrap();
    assert_eq!(iter.next(), None, "serializer wrote fewer chunks than expected");
}

fn test_state() -> IcpState {
    let mut id = [0u8; 32];
    id[..4].copy_from_slice(b"1111");
    IcpState {
        channel: Hash(id),
        version: 0x2222,
        allocation: [U256::from(0x5555u64), U256::from(0x6666u64)],
        finalized: true,
    }
}

#[test]
fn state_encode() {
    let expected = "
        3131313100000000000000000000000000000000000000000000000000000000
        2222000000000000
        5555000000000000000000000000000000000000000000000000000000000000
        6666000000000000000000000000000000000000000000000000000000000000
        01
        ";
    serialize_and_compare(&test_state(), expected);
}

#[test]
fn state_encode_has_no_framing() {
    let bytes = to_bytes(&test_state()).unwrap();
    assert_eq!(bytes.len(), 32 + 8 + 2 * 32 + 1);
    assert_eq!(*bytes.last().unwrap(), 0x01);

    let mut not_final = test_state();
    not_final.finalized = false;
    let bytes = to_bytes(&not_final).unwrap();
    assert_eq!(*bytes.last().unwrap(), 0x00);
}

#[test]
fn balances_are_reversed_big_endian() {
    // 0x0102_0304 big-endian is 04 03 02 01 little-endian.
    let mut state = test_state();
    state.allocation = [U256::from(0x0102_0304u64), U256::zero()];
    let bytes = to_bytes(&state).unwrap();
    assert_eq!(&bytes[40..44], &[0x04, 0x03, 0x02, 0x01]);
    assert!(bytes[44..72].iter().all(|b| *b == 0));
}

#[test]
fn host_state_matches_fixed_state() {
    let fixed = test_state();
    let host = State {
        id: fixed.channel,
        version: fixed.version,
        allocation: Allocation::new(vec![0x5555, 0x6666]),
        app_data: vec![],
        is_final: true,
    };
    assert_eq!(
        crate::channel::encode_state(&host).unwrap(),
        to_bytes(&fixed).unwrap()
    );
}

#[test]
fn incompatible_states_are_rejected() {
    let base = State {
        id: Hash([1; 32]),
        version: 1,
        allocation: Allocation::new(vec![1, 2]),
        app_data: vec![],
        is_final: false,
    };

    let mut three_parties = base.clone();
    three_parties.allocation = Allocation::new(vec![1, 2, 3]);
    assert!(matches!(
        crate::channel::encode_state(&three_parties),
        Err(Error::IncompatibleState(_))
    ));

    let mut two_assets = base.clone();
    two_assets.allocation.assets.push(Default::default());
    two_assets.allocation.balances.push(vec![1, 2]);
    assert!(matches!(
        crate::channel::encode_state(&two_assets),
        Err(Error::IncompatibleState(_))
    ));

    let mut locked = base.clone();
    locked.allocation.locked.push(crate::channel::SubAlloc {
        id: Hash([2; 32]),
        balances: vec![1, 1],
    });
    assert!(matches!(
        crate::channel::encode_state(&locked),
        Err(Error::IncompatibleState(_))
    ));

    let mut with_data = base.clone();
    with_data.app_data = vec![1];
    assert!(matches!(
        crate::channel::encode_state(&with_data),
        Err(Error::IncompatibleState(_))
    ));

    let mut negative = base;
    negative.allocation = Allocation::new(vec![-5, 2]);
    assert_eq!(
        crate::channel::encode_state(&negative),
        Err(Error::BalanceOutOfRange(-5))
    );
}

#[test]
fn hash_is_truncated_sha512() {
    use sha2::{Digest, Sha512};

    let state = test_state();
    let digest = Sha512::digest(to_bytes(&state).unwrap());
    assert_eq!(to_hash(&state).unwrap().0[..], digest[..32]);
}

#[test]
fn truncate_rejects_short_digest() {
    assert_eq!(
        truncate::<32>(&[0u8; 16]),
        Err(Error::HashTooShort {
            needed: 32,
            actual: 16
        })
    );
}

#[test]
fn unsupported_types() {
    #[derive(Serialize)]
    struct WithString {
        s: String,
    }
    #[derive(Serialize)]
    struct WithOption {
        o: Option<u64>,
    }
    #[derive(Serialize)]
    struct WithSigned {
        v: i64,
    }

    assert_eq!(
        to_bytes(&WithString { s: "x".into() }),
        Err(Error::TypeNotRepresentable("str"))
    );
    assert_eq!(
        to_bytes(&WithOption { o: Some(1) }),
        Err(Error::TypeNotRepresentable("Option"))
    );
    assert_eq!(
        to_bytes(&WithSigned { v: -1 }),
        Err(Error::TypeNotRepresentable("i64"))
    );
}

#[test]
fn fixed_width_parsing() {
    assert_eq!(Address::from_slice(&[7; 32]).unwrap(), Address([7; 32]));
    assert_eq!(
        Address::from_slice(&[7; 20]),
        Err(Error::IdentityLengthMismatch {
            expected: 32,
            actual: 20
        })
    );
    let h = Hash([0xab; 32]);
    assert_eq!(Hash::from_hex(&format!("0x{}", h.to_hex())).unwrap(), h);
    assert_eq!(Hash::from_hex("zz"), Err(Error::InvalidHex));
}
