//! Block and transaction context host functions.

use std::sync::Arc;

use super::{frame, set_bytes};
use crate::engine::Engine;
use crate::env::{EnvFunc, EnvTable};
use crate::error::VmError;
use crate::gas::{copy_gas, GAS_EXT_STEP, GAS_QUICK_STEP};

pub fn register(table: &mut EnvTable) {
    table.register("TC_BlockHash", Arc::new(TcBlockHash));
    table.register("TC_GetCoinbase", Arc::new(TcGetCoinbase));
    table.register("TC_GetGasLimit", Arc::new(TcGetGasLimit));
    table.register("TC_GetNumber", Arc::new(TcGetNumber));
    table.register("TC_GetTimestamp", Arc::new(TcGetTimestamp));
    table.register("TC_Now", Arc::new(TcNow));
    table.register("TC_GetTxGasPrice", Arc::new(TcGetTxGasPrice));
    table.register("TC_GetTxOrigin", Arc::new(TcGetTxOrigin));
}

fn scalar_arity(args: &[u64]) -> Result<(), VmError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(VmError::InvalidApiArgs)
    }
}

// char *TC_BlockHash(long long number)
pub struct TcBlockHash;

impl EnvFunc for TcBlockHash {
    fn gas(&self, _index: i64, _eng: &mut Engine, _args: &[u64]) -> Result<u64, VmError> {
        copy_gas(GAS_EXT_STEP, 66)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        if args.len() != 1 {
            return Err(VmError::InvalidApiArgs);
        }
        let hash = eng.ctx().get_hash(args[0]);
        let app = frame(eng)?;
        set_bytes(&app, hash.to_hex().as_bytes()).map_err(|_| VmError::MemorySet)
    }
}

// char *TC_GetCoinbase(void)
pub struct TcGetCoinbase;

impl EnvFunc for TcGetCoinbase {
    fn gas(&self, _index: i64, _eng: &mut Engine, _args: &[u64]) -> Result<u64, VmError> {
        copy_gas(GAS_EXT_STEP, 42)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        scalar_arity(args)?;
        let coinbase = eng.ctx().coinbase;
        let app = frame(eng)?;
        set_bytes(&app, coinbase.to_hex().as_bytes()).map_err(|_| VmError::MemorySet)
    }
}

// long long TC_GetGasLimit(void)
pub struct TcGetGasLimit;

impl EnvFunc for TcGetGasLimit {
    fn gas(&self, _index: i64, _eng: &mut Engine, _args: &[u64]) -> Result<u64, VmError> {
        Ok(GAS_QUICK_STEP)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        scalar_arity(args)?;
        Ok(eng.ctx().gas_limit)
    }
}

// long long TC_GetNumber(void)
pub struct TcGetNumber;

impl EnvFunc for TcGetNumber {
    fn gas(&self, _index: i64, _eng: &mut Engine, _args: &[u64]) -> Result<u64, VmError> {
        Ok(GAS_QUICK_STEP)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        scalar_arity(args)?;
        Ok(eng.ctx().number)
    }
}

// long long TC_GetTimestamp(void)
pub struct TcGetTimestamp;

impl EnvFunc for TcGetTimestamp {
    fn gas(&self, _index: i64, _eng: &mut Engine, _args: &[u64]) -> Result<u64, VmError> {
        Ok(GAS_QUICK_STEP)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        scalar_arity(args)?;
        Ok(eng.ctx().time)
    }
}

// long long TC_Now(void)
pub struct TcNow;

impl EnvFunc for TcNow {
    fn gas(&self, _index: i64, _eng: &mut Engine, _args: &[u64]) -> Result<u64, VmError> {
        Ok(GAS_QUICK_STEP)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        scalar_arity(args)?;
        Ok(eng.ctx().time)
    }
}

// long long TC_GetTxGasPrice(void)
pub struct TcGetTxGasPrice;

impl EnvFunc for TcGetTxGasPrice {
    fn gas(&self, _index: i64, _eng: &mut Engine, _args: &[u64]) -> Result<u64, VmError> {
        Ok(GAS_QUICK_STEP)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        scalar_arity(args)?;
        Ok(eng.ctx().gas_price.low_u64())
    }
}

// char *TC_GetTxOrigin(void)
pub struct TcGetTxOrigin;

impl EnvFunc for TcGetTxOrigin {
    fn gas(&self, _index: i64, _eng: &mut Engine, _args: &[u64]) -> Result<u64, VmError> {
        copy_gas(GAS_EXT_STEP, 42)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        scalar_arity(args)?;
        let origin = eng.ctx().origin;
        let app = frame(eng)?;
        set_bytes(&app, origin.to_hex().as_bytes()).map_err(|_| VmError::MemorySet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{engine_with_frame, wat};

    #[test]
    fn test_scalar_accessors() {
        let (mut eng, _app) = engine_with_frame(&wat::trivial_returner(), 100_000);
        assert_eq!(TcGetNumber.call(-1, &mut eng, &[]).unwrap(), 7);
        assert_eq!(
            TcGetTimestamp.call(-1, &mut eng, &[]).unwrap(),
            1_565_078_742
        );
        assert_eq!(TcNow.call(-1, &mut eng, &[]).unwrap(), 1_565_078_742);
        assert_eq!(TcGetGasLimit.call(-1, &mut eng, &[]).unwrap(), 8_000_000);
        assert_eq!(TcGetTxGasPrice.call(-1, &mut eng, &[]).unwrap(), 0);
    }

    #[test]
    fn test_scalar_accessors_reject_args() {
        let (mut eng, _app) = engine_with_frame(&wat::trivial_returner(), 100_000);
        assert_eq!(
            TcGetNumber.call(-1, &mut eng, &[1]),
            Err(VmError::InvalidApiArgs)
        );
    }

    #[test]
    fn test_coinbase_string() {
        let (mut eng, app) = engine_with_frame(&wat::trivial_returner(), 100_000);
        let ptr = TcGetCoinbase.call(-1, &mut eng, &[]).unwrap();
        let s = app.memory().lock().get_string(ptr).unwrap();
        assert_eq!(s, format!("0x{}", "09".repeat(20)).as_bytes());
    }

    #[test]
    fn test_block_hash_string() {
        let (mut eng, app) = engine_with_frame(&wat::trivial_returner(), 100_000);
        let ptr = TcBlockHash.call(-1, &mut eng, &[5]).unwrap();
        let s = app.memory().lock().get_string(ptr).unwrap();
        // EmptyChain yields the zero hash.
        assert_eq!(s, format!("0x{}", "00".repeat(32)).as_bytes());
        assert_eq!(
            TcBlockHash.call(-1, &mut eng, &[]),
            Err(VmError::InvalidApiArgs)
        );
    }
}
