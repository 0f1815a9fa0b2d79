use super::*;
use crate::{
    channel::{calc_id, Allocation, Params},
    encoding::types::U256,
};
use rand::{rngs::StdRng, SeedableRng};

fn fixed_nonce() -> U256 {
    U256::from_big_endian(&[0x42; 32])
}

fn setup() -> (Signer, Signer, Params, State) {
    // Do not use that on any real device, this is just for testing.
    let mut rng = StdRng::seed_from_u64(0);
    let alice = Signer::new(&mut rng);
    let bob = Signer::new(&mut rng);
    let params = Params::new(fixed_nonce(), vec![alice.address(), bob.address()], 60);
    let state = State::new(&params, Allocation::new(vec![50_000, 50_000])).unwrap();
    (alice, bob, params, state)
}

#[test]
fn sign_and_verify_both_participants() {
    let (alice, bob, params, state) = setup();

    assert_eq!(state.id, calc_id(&params).unwrap());
    assert_eq!(state.version, 0);

    let sig_a = alice.sign_state(&state).unwrap();
    let sig_b = bob.sign_state(&state).unwrap();

    assert!(verify(&alice.address(), &state, &sig_a).unwrap());
    assert!(verify(&bob.address(), &state, &sig_b).unwrap());

    // Signatures are not interchangeable.
    assert!(!verify(&alice.address(), &state, &sig_b).unwrap());
    assert!(!verify(&bob.address(), &state, &sig_a).unwrap());
}

#[test]
fn unrelated_key_fails() {
    let (alice, _, _, state) = setup();
    let mallory = Signer::from_seed([7; 32]);

    let sig = alice.sign_state(&state).unwrap();
    assert!(!verify(&mallory.address(), &state, &sig).unwrap());

    let forged = mallory.sign_state(&state).unwrap();
    assert!(!verify(&alice.address(), &state, &forged).unwrap());
}

#[test]
fn tampered_state_fails() {
    let (alice, _, _, state) = setup();
    let sig = alice.sign_state(&state).unwrap();

    let mut s = state.clone();
    s.version = 1;
    assert!(!verify(&alice.address(), &s, &sig).unwrap());

    let mut s = state.clone();
    s.allocation = Allocation::new(vec![50_001, 49_999]);
    assert!(!verify(&alice.address(), &s, &sig).unwrap());

    let mut s = state.clone();
    s.is_final = true;
    assert!(!verify(&alice.address(), &s, &sig).unwrap());

    let mut s = state;
    s.id.0[31] ^= 1;
    assert!(!verify(&alice.address(), &s, &sig).unwrap());
}

#[test]
fn every_bit_of_the_payload_matters() {
    let (alice, _, _, state) = setup();
    let payload = crate::channel::encode_state(&state).unwrap();
    let sig = alice.sign(&payload);
    assert!(verify_bytes(&alice.address(), &payload, &sig));

    for byte in 0..payload.len() {
        for bit in 0..8 {
            let mut flipped = payload.clone();
            flipped[byte] ^= 1 << bit;
            assert!(
                !verify_bytes(&alice.address(), &flipped, &sig),
                "flipping bit {bit} of byte {byte} went unnoticed"
            );
        }
    }
}

#[test]
fn malformed_state_fails_before_crypto() {
    let (alice, _, _, state) = setup();
    let sig = alice.sign_state(&state).unwrap();

    let mut s = state;
    s.allocation.locked.push(crate::channel::SubAlloc {
        id: s.id,
        balances: vec![1, 1],
    });
    assert!(matches!(
        verify(&alice.address(), &s, &sig),
        Err(encoding::Error::IncompatibleState(_))
    ));
    assert!(matches!(
        alice.sign_state(&s),
        Err(encoding::Error::IncompatibleState(_))
    ));
}

#[test]
fn signing_is_deterministic() {
    let (alice, _, _, state) = setup();
    assert_eq!(
        alice.sign_state(&state).unwrap(),
        alice.sign_state(&state).unwrap()
    );
}

#[test]
fn invalid_public_key_is_not_an_error() {
    let (alice, _, _, state) = setup();
    let sig = alice.sign_state(&state).unwrap();
    // Not every 32 byte string is a valid curve point. Whatever the decoding
    // says, the result must be a plain `false`.
    let bogus = Address([0xff; 32]);
    assert!(!verify(&bogus, &state, &sig).unwrap());
}

#[test]
fn key_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("alice.key");
    std::fs::write(&path, format!("0x{}\n", hex::encode([5u8; 32]))).unwrap();

    let signer = Signer::from_key_file(&path).unwrap();
    assert_eq!(signer.address(), Signer::from_seed([5; 32]).address());

    std::fs::write(&path, "not hex").unwrap();
    assert!(matches!(
        Signer::from_key_file(&path),
        Err(Error::InvalidKey)
    ));
}
