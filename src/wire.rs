//! Transports connecting [Canister](crate::canister::Canister) and
//! [Ledger](crate::ledger::Ledger) to a node.
//!
//! [dfx] drives the `dfx` command line and speaks the textual IDL of [idl]
//! and [text]. [proto] carries length-prefixed protobuf frames over any
//! byte transport.

pub mod dfx;
pub mod idl;
pub mod proto;
pub mod text;
