//! Balance, transfer, token, and lifecycle host functions.

use std::sync::Arc;

use tcvm_state::StateDB;
use tcvm_types::{Address, U256};
use tracing::{debug, info};

use super::{arg, frame, get_string, parse_address, parse_amount, set_bytes};
use crate::engine::Engine;
use crate::env::{EnvFunc, EnvTable};
use crate::error::VmError;
use crate::gas::{copy_gas, to_word_size, safe_add, safe_mul, COPY_GAS, GAS_EXT_STEP, ISSUE_GAS, SELF_DESTRUCT_GAS, TRANSFER_GAS};

pub fn register(table: &mut EnvTable) {
    table.register("TC_GetBalance", Arc::new(TcGetBalance));
    table.register("TC_Transfer", Arc::new(TcTransfer));
    table.register("TC_TransferToken", Arc::new(TcTransferToken));
    table.register("TC_TokenBalance", Arc::new(TcTokenBalance));
    table.register("TC_TokenAddress", Arc::new(TcTokenAddress));
    table.register("TC_GetMsgValue", Arc::new(TcGetMsgValue));
    table.register("TC_GetMsgTokenValue", Arc::new(TcGetMsgTokenValue));
    table.register("TC_Issue", Arc::new(TcIssue));
    table.register("TC_SelfDestruct", Arc::new(TcSelfDestruct));
}

/// Debit `from` and credit `to`, in base or token units. Zero amounts
/// succeed without touching state.
fn move_value(
    eng: &mut Engine,
    from: Address,
    to: Address,
    token: Address,
    amount: &U256,
) -> Result<u64, VmError> {
    if amount.is_zero() {
        return Ok(0);
    }
    let state = eng.state();
    if token.is_empty() {
        if state.get_balance(&from) < *amount {
            info!(%from, %to, "insufficient base balance");
            return Err(VmError::BalanceNotEnough);
        }
        state.sub_balance(&from, amount);
        state.add_balance(&to, amount);
    } else {
        if state.get_token_balance(&from, &token) < *amount {
            info!(%from, %to, %token, "insufficient token balance");
            return Err(VmError::BalanceNotEnough);
        }
        state.sub_token_balance(&from, &token, amount);
        state.add_token_balance(&to, &token, amount);
    }
    Ok(0)
}

// char *TC_GetBalance(const char *address)
pub struct TcGetBalance;

impl EnvFunc for TcGetBalance {
    fn gas(&self, _index: i64, _eng: &mut Engine, _args: &[u64]) -> Result<u64, VmError> {
        copy_gas(GAS_EXT_STEP, 32)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let addr = parse_address(&get_string(&app, arg(args, 0)?).map_err(|_| VmError::InvalidApiArgs)?)?;
        let balance = eng.state().get_balance(&addr);
        debug!(%addr, %balance, "TC_GetBalance");
        set_bytes(&app, balance.to_string().as_bytes()).map_err(|_| VmError::MemorySet)
    }
}

// void TC_Transfer(const char *address, const char *amount)
pub struct TcTransfer;

impl EnvFunc for TcTransfer {
    fn gas(&self, _index: i64, _eng: &mut Engine, _args: &[u64]) -> Result<u64, VmError> {
        Ok(TRANSFER_GAS)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let from = eng.contract().address();
        let to = parse_address(&get_string(&app, arg(args, 0)?).map_err(|_| VmError::InvalidApiArgs)?)?;
        let amount = parse_amount(&get_string(&app, arg(args, 1)?).map_err(|_| VmError::InvalidApiArgs)?)?;
        debug!(%from, %to, %amount, "TC_Transfer");
        move_value(eng, from, to, Address::EMPTY, &amount)
    }
}

// void TC_TransferToken(const char *address, const char *token, const char *amount)
pub struct TcTransferToken;

impl EnvFunc for TcTransferToken {
    fn gas(&self, _index: i64, _eng: &mut Engine, _args: &[u64]) -> Result<u64, VmError> {
        Ok(TRANSFER_GAS)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let from = eng.contract().address();
        let to = parse_address(&get_string(&app, arg(args, 0)?).map_err(|_| VmError::InvalidApiArgs)?)?;
        let token = parse_address(&get_string(&app, arg(args, 1)?).map_err(|_| VmError::InvalidApiArgs)?)?;
        let amount = parse_amount(&get_string(&app, arg(args, 2)?).map_err(|_| VmError::InvalidApiArgs)?)?;
        debug!(%from, %to, %token, %amount, "TC_TransferToken");
        move_value(eng, from, to, token, &amount)
    }
}

// char *TC_TokenBalance(const char *addr, const char *token)
pub struct TcTokenBalance;

impl EnvFunc for TcTokenBalance {
    fn gas(&self, _index: i64, _eng: &mut Engine, _args: &[u64]) -> Result<u64, VmError> {
        copy_gas(GAS_EXT_STEP, 32)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let addr = parse_address(&get_string(&app, arg(args, 0)?).map_err(|_| VmError::InvalidApiArgs)?)?;
        let token = parse_address(&get_string(&app, arg(args, 1)?).map_err(|_| VmError::InvalidApiArgs)?)?;
        let balance = if token.is_empty() {
            eng.state().get_balance(&addr)
        } else {
            eng.state().get_token_balance(&addr, &token)
        };
        set_bytes(&app, balance.to_string().as_bytes()).map_err(|_| VmError::MemorySet)
    }
}

// char *TC_TokenAddress(void)
pub struct TcTokenAddress;

impl EnvFunc for TcTokenAddress {
    fn gas(&self, _index: i64, _eng: &mut Engine, _args: &[u64]) -> Result<u64, VmError> {
        copy_gas(GAS_EXT_STEP, 42)
    }

    fn call(&self, _index: i64, eng: &mut Engine, _args: &[u64]) -> Result<u64, VmError> {
        let token = eng.ctx().token;
        let app = frame(eng)?;
        set_bytes(&app, token.to_hex().as_bytes()).map_err(|_| VmError::MemorySet)
    }
}

/// Value-getter cost: flat step plus word-rounded copy gas over the
/// decimal string actually returned.
fn msg_value_gas(value_len: u64) -> Result<u64, VmError> {
    let word_gas = safe_mul(to_word_size(value_len), COPY_GAS)?;
    safe_add(GAS_EXT_STEP, word_gas)
}

// char *TC_GetMsgValue(void)
//
// The frame's value when the message is base-token denominated,
// otherwise "0".
pub struct TcGetMsgValue;

impl EnvFunc for TcGetMsgValue {
    fn gas(&self, _index: i64, eng: &mut Engine, _args: &[u64]) -> Result<u64, VmError> {
        let len = if eng.ctx().token.is_empty() {
            eng.contract().value().to_string().len() as u64
        } else {
            1
        };
        msg_value_gas(len)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        if !args.is_empty() {
            return Err(VmError::InvalidApiArgs);
        }
        let value = if eng.ctx().token.is_empty() {
            eng.contract().value().to_string()
        } else {
            U256::ZERO.to_string()
        };
        let app = frame(eng)?;
        set_bytes(&app, value.as_bytes()).map_err(|_| VmError::MemorySet)
    }
}

// char *TC_GetMsgTokenValue(void)
//
// Mirror image of TC_GetMsgValue for token-denominated messages.
pub struct TcGetMsgTokenValue;

impl EnvFunc for TcGetMsgTokenValue {
    fn gas(&self, _index: i64, eng: &mut Engine, _args: &[u64]) -> Result<u64, VmError> {
        let len = if eng.ctx().token.is_empty() {
            1
        } else {
            eng.contract().value().to_string().len() as u64
        };
        msg_value_gas(len)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        if !args.is_empty() {
            return Err(VmError::InvalidApiArgs);
        }
        let value = if eng.ctx().token.is_empty() {
            U256::ZERO.to_string()
        } else {
            eng.contract().value().to_string()
        };
        let app = frame(eng)?;
        set_bytes(&app, value.as_bytes()).map_err(|_| VmError::MemorySet)
    }
}

// void TC_Issue(const char *amount)
//
// Mints the contract's own token, identified by its code address.
pub struct TcIssue;

impl EnvFunc for TcIssue {
    fn gas(&self, _index: i64, _eng: &mut Engine, _args: &[u64]) -> Result<u64, VmError> {
        Ok(ISSUE_GAS)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let amount = parse_amount(&get_string(&app, arg(args, 0)?).map_err(|_| VmError::InvalidApiArgs)?)?;
        if !amount.is_zero() {
            let contract = eng.contract().address();
            let token = eng.contract().code_addr.unwrap_or(contract);
            debug!(%contract, %token, %amount, "TC_Issue");
            eng.state().add_token_balance(&contract, &token, &amount);
        }
        Ok(0)
    }
}

// void TC_SelfDestruct(const char *recipient)
//
// Forwards every token balance to the recipient, marks the account
// destroyed, and drops the module cache and any native handle.
pub struct TcSelfDestruct;

impl EnvFunc for TcSelfDestruct {
    fn gas(&self, _index: i64, _eng: &mut Engine, _args: &[u64]) -> Result<u64, VmError> {
        Ok(SELF_DESTRUCT_GAS)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let to = parse_address(&get_string(&app, arg(args, 0)?).map_err(|_| VmError::InvalidApiArgs)?)?;
        let addr = eng.contract().address();

        for tv in eng.state().get_token_balances(&addr) {
            eng.state().add_token_balance(&to, &tv.token, &tv.value);
        }
        eng.state().suicide(&addr);
        info!(%addr, %to, "TC_SelfDestruct");

        let name = addr.to_hex();
        eng.remove_cache(&name);
        if let Some(aot) = eng.aot() {
            aot.delete_native(&name, eng.state().as_ref());
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{engine_with_frame, engine_with_frame_and_state, wat};

    fn write(app: &crate::app::App, data: &[u8]) -> u64 {
        app.memory().lock().set_bytes(data).unwrap()
    }

    #[test]
    fn test_transfer_moves_balance() {
        let (mut eng, app, state) =
            engine_with_frame_and_state(&wat::trivial_returner(), 1_000_000);
        let from = eng.contract().address();
        let to = Address::from_bytes([5u8; 20]);
        state.add_balance(&from, &U256::from_u64(100));

        let to_ptr = write(&app, to.to_hex().as_bytes());
        let amt_ptr = write(&app, b"40");
        TcTransfer.call(-1, &mut eng, &[to_ptr, amt_ptr]).unwrap();

        assert_eq!(state.get_balance(&from), U256::from_u64(60));
        assert_eq!(state.get_balance(&to), U256::from_u64(40));
    }

    #[test]
    fn test_transfer_insufficient_funds() {
        let (mut eng, app, state) =
            engine_with_frame_and_state(&wat::trivial_returner(), 1_000_000);
        let from = eng.contract().address();
        let to = Address::from_bytes([5u8; 20]);
        state.add_balance(&from, &U256::from_u64(5));

        let to_ptr = write(&app, to.to_hex().as_bytes());
        let amt_ptr = write(&app, b"10");
        assert_eq!(
            TcTransfer.call(-1, &mut eng, &[to_ptr, amt_ptr]),
            Err(VmError::BalanceNotEnough)
        );
        // Balances unchanged on failure.
        assert_eq!(state.get_balance(&from), U256::from_u64(5));
        assert_eq!(state.get_balance(&to), U256::ZERO);
    }

    #[test]
    fn test_transfer_zero_is_noop_success() {
        let (mut eng, app, state) =
            engine_with_frame_and_state(&wat::trivial_returner(), 1_000_000);
        let to = Address::from_bytes([5u8; 20]);
        let to_ptr = write(&app, to.to_hex().as_bytes());
        let amt_ptr = write(&app, b"0");
        assert_eq!(TcTransfer.call(-1, &mut eng, &[to_ptr, amt_ptr]), Ok(0));
        assert_eq!(state.get_balance(&to), U256::ZERO);
    }

    #[test]
    fn test_transfer_conservation() {
        let (mut eng, app, state) =
            engine_with_frame_and_state(&wat::trivial_returner(), 1_000_000);
        let from = eng.contract().address();
        let to = Address::from_bytes([5u8; 20]);
        state.add_balance(&from, &U256::from_u64(100));

        let to_ptr = write(&app, to.to_hex().as_bytes());
        let amt_ptr = write(&app, b"0x21");
        TcTransfer.call(-1, &mut eng, &[to_ptr, amt_ptr]).unwrap();

        let total = state
            .get_balance(&from)
            .checked_add(&state.get_balance(&to))
            .unwrap();
        assert_eq!(total, U256::from_u64(100));
    }

    #[test]
    fn test_transfer_rejects_bad_args() {
        let (mut eng, app) = engine_with_frame(&wat::trivial_returner(), 1_000_000);
        let bad_addr = write(&app, b"0xnope");
        let amt = write(&app, b"1");
        assert_eq!(
            TcTransfer.call(-1, &mut eng, &[bad_addr, amt]),
            Err(VmError::InvalidApiArgs)
        );

        let to = write(&app, Address::from_bytes([5u8; 20]).to_hex().as_bytes());
        let bad_amt = write(&app, b"-3");
        assert_eq!(
            TcTransfer.call(-1, &mut eng, &[to, bad_amt]),
            Err(VmError::InvalidApiArgs)
        );
    }

    #[test]
    fn test_transfer_token_routes_base_and_token() {
        let (mut eng, app, state) =
            engine_with_frame_and_state(&wat::trivial_returner(), 1_000_000);
        let from = eng.contract().address();
        let to = Address::from_bytes([5u8; 20]);
        let token = Address::from_bytes([6u8; 20]);
        state.add_balance(&from, &U256::from_u64(10));
        state.add_token_balance(&from, &token, &U256::from_u64(10));

        let to_ptr = write(&app, to.to_hex().as_bytes());
        let base_ptr = write(&app, Address::EMPTY.to_hex().as_bytes());
        let token_ptr = write(&app, token.to_hex().as_bytes());
        let amt = write(&app, b"4");

        TcTransferToken
            .call(-1, &mut eng, &[to_ptr, base_ptr, amt])
            .unwrap();
        assert_eq!(state.get_balance(&to), U256::from_u64(4));

        TcTransferToken
            .call(-1, &mut eng, &[to_ptr, token_ptr, amt])
            .unwrap();
        assert_eq!(state.get_token_balance(&to, &token), U256::from_u64(4));
    }

    #[test]
    fn test_token_balance_empty_token_reads_base() {
        let (mut eng, app, state) =
            engine_with_frame_and_state(&wat::trivial_returner(), 1_000_000);
        let holder = Address::from_bytes([5u8; 20]);
        state.add_balance(&holder, &U256::from_u64(77));

        let addr_ptr = write(&app, holder.to_hex().as_bytes());
        let token_ptr = write(&app, Address::EMPTY.to_hex().as_bytes());
        let ptr = TcTokenBalance
            .call(-1, &mut eng, &[addr_ptr, token_ptr])
            .unwrap();
        assert_eq!(app.memory().lock().get_string(ptr).unwrap(), b"77");
    }

    #[test]
    fn test_msg_value_base_token() {
        let (mut eng, app) = engine_with_frame(&wat::trivial_returner(), 1_000_000);
        // Context token is the base token; value is zero in testutil.
        let ptr = TcGetMsgValue.call(-1, &mut eng, &[]).unwrap();
        assert_eq!(app.memory().lock().get_string(ptr).unwrap(), b"0");
        let ptr = TcGetMsgTokenValue.call(-1, &mut eng, &[]).unwrap();
        assert_eq!(app.memory().lock().get_string(ptr).unwrap(), b"0");
    }

    #[test]
    fn test_issue_mints_on_code_address() {
        let (mut eng, app, state) =
            engine_with_frame_and_state(&wat::trivial_returner(), 1_000_000);
        let contract = eng.contract().address();
        let code_addr = Address::from_bytes([8u8; 20]);
        eng.contract_mut().code_addr = Some(code_addr);

        let amt = write(&app, b"1000");
        TcIssue.call(-1, &mut eng, &[amt]).unwrap();
        assert_eq!(
            state.get_token_balance(&contract, &code_addr),
            U256::from_u64(1000)
        );

        // Zero mint is a no-op.
        let zero = write(&app, b"0");
        TcIssue.call(-1, &mut eng, &[zero]).unwrap();
        assert_eq!(
            state.get_token_balance(&contract, &code_addr),
            U256::from_u64(1000)
        );
    }

    #[test]
    fn test_self_destruct_forwards_tokens() {
        let (mut eng, app, state) =
            engine_with_frame_and_state(&wat::trivial_returner(), 1_000_000);
        let addr = eng.contract().address();
        let heir = Address::from_bytes([5u8; 20]);
        let token = Address::from_bytes([6u8; 20]);
        state.add_token_balance(&addr, &token, &U256::from_u64(9));

        let to_ptr = write(&app, heir.to_hex().as_bytes());
        TcSelfDestruct.call(-1, &mut eng, &[to_ptr]).unwrap();

        assert_eq!(state.get_token_balance(&heir, &token), U256::from_u64(9));
        assert_eq!(state.suicided(), vec![addr]);
    }
}
