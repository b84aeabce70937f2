//! Core types shared across the TCVM runtime.
//!
//! This crate provides:
//! - 20-byte [`Address`] with `0x`-prefixed hex formatting
//! - 32-byte [`Hash`] and keccak256 helpers
//! - [`U256`] checked 256-bit arithmetic for balances and amounts
//! - event [`Log`] and token accounting records
//! - secp256k1 signature-range validation

pub mod address;
pub mod error;
pub mod hash;
pub mod log;
pub mod signature;
pub mod u256;

pub use address::Address;
pub use error::TypesError;
pub use hash::{keccak256, keccak256_hash, Hash};
pub use log::{Header, Log, TokenValue};
pub use signature::validate_signature_values;
pub use u256::U256;
