//! Built-in host functions.
//!
//! Each submodule registers a slice of the `TC_*` surface: contract
//! storage, event logging, block/transaction context, balances and
//! lifecycle, and signature recovery.

pub mod context;
pub mod crypto;
pub mod event;
pub mod storage;
pub mod token;

use std::str::FromStr;
use std::sync::Arc;

use tcvm_types::{Address, U256};

use crate::app::App;
use crate::engine::Engine;
use crate::env::EnvTable;
use crate::error::VmError;

/// Register the complete host API.
pub fn register_all(table: &mut EnvTable) {
    storage::register(table);
    event::register(table);
    context::register(table);
    token::register(table);
    crypto::register(table);
}

/// The frame whose memory the current host call addresses.
pub(crate) fn frame(eng: &Engine) -> Result<Arc<App>, VmError> {
    eng.running_app_frame()
        .ok_or_else(|| VmError::Trap("no running app frame".to_string()))
}

pub(crate) fn arg(args: &[u64], index: usize) -> Result<u64, VmError> {
    args.get(index).copied().ok_or(VmError::InvalidApiArgs)
}

pub(crate) fn get_string(app: &App, offset: u64) -> Result<Vec<u8>, VmError> {
    app.memory().lock().get_string(offset)
}

pub(crate) fn get_bytes(app: &App, offset: u64, len: u64) -> Result<Vec<u8>, VmError> {
    let len = usize::try_from(len).map_err(|_| VmError::MemoryGet)?;
    Ok(app.memory().lock().get_bytes(offset, len)?.to_vec())
}

pub(crate) fn set_bytes(app: &App, data: &[u8]) -> Result<u64, VmError> {
    app.memory().lock().set_bytes(data)
}

/// Parse a contract-supplied address string, validating its shape first.
pub(crate) fn parse_address(raw: &[u8]) -> Result<Address, VmError> {
    let s = std::str::from_utf8(raw).map_err(|_| VmError::InvalidApiArgs)?;
    if !tcvm_types::address::is_hex_address(s) {
        return Err(VmError::InvalidApiArgs);
    }
    Address::from_str(s).map_err(|_| VmError::InvalidApiArgs)
}

/// Parse an amount string (`0x` hex or decimal, base auto-detected).
/// Malformed or negative input is an argument error.
pub(crate) fn parse_amount(raw: &[u8]) -> Result<U256, VmError> {
    let s = std::str::from_utf8(raw).map_err(|_| VmError::InvalidApiArgs)?;
    U256::from_dec_or_hex(s).map_err(|_| VmError::InvalidApiArgs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        let hex = format!("0x{}", "ab".repeat(20));
        assert!(parse_address(hex.as_bytes()).is_ok());
        assert_eq!(parse_address(b"0x1234"), Err(VmError::InvalidApiArgs));
        assert_eq!(parse_address(&[0xff, 0xfe]), Err(VmError::InvalidApiArgs));
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount(b"42").unwrap(), U256::from_u64(42));
        assert_eq!(parse_amount(b"0x2a").unwrap(), U256::from_u64(42));
        assert_eq!(parse_amount(b"-1"), Err(VmError::InvalidApiArgs));
        assert_eq!(parse_amount(b"fish"), Err(VmError::InvalidApiArgs));
    }
}
