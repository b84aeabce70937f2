//! Contract storage host functions.
//!
//! Keys are hashed with keccak256 before reaching the state database, so
//! the string and pure (explicit-length) variants of an operation address
//! the same slot whenever the key bytes agree. `*String` variants honor
//! NUL termination; `*Bytes` variants honor the explicit length.

use std::str::FromStr;
use std::sync::Arc;

use tcvm_state::StateDB;
use tcvm_types::{keccak256_hash, Address};
use tracing::debug;

use super::{arg, frame, get_bytes, get_string, set_bytes};
use crate::engine::Engine;
use crate::env::{EnvFunc, EnvTable};
use crate::error::VmError;
use crate::gas::{copy_gas, safe_add, safe_mul, to_word_size, COPY_GAS, GAS_EXT_STEP, GAS_SLOW_STEP, STORE_FEE_GAS};

pub fn register(table: &mut EnvTable) {
    table.register("TC_StorageSetString", Arc::new(TcStorageSetString));
    table.register("TC_StorageSetBytes", Arc::new(TcStorageSetBytes));
    table.register("TC_StoragePureSetString", Arc::new(TcStoragePureSetString));
    table.register("TC_StoragePureSetBytes", Arc::new(TcStoragePureSetBytes));
    table.register("TC_StorageGetString", Arc::new(TcStorageGet));
    table.register("TC_StorageGetBytes", Arc::new(TcStorageGet));
    table.register("TC_StoragePureGetString", Arc::new(TcStoragePureGet));
    table.register("TC_StoragePureGetBytes", Arc::new(TcStoragePureGet));
    table.register("TC_StorageDel", Arc::new(TcStorageDel));
    table.register("TC_ContractStorageGet", Arc::new(TcContractStorageGet));
    table.register("TC_ContractStoragePureGet", Arc::new(TcContractStoragePureGet));
}

/// Write cost: flat step + copy gas over key and value, with the
/// persisted-value portion attributed through the fee accumulator.
fn set_gas(eng: &mut Engine, key_len: u64, val_len: u64) -> Result<u64, VmError> {
    let copy = safe_mul(to_word_size(safe_add(key_len, val_len)?), COPY_GAS)?;
    let fee = safe_mul(to_word_size(val_len), STORE_FEE_GAS)?;
    let total = safe_add(safe_add(GAS_SLOW_STEP, copy)?, fee)?;
    eng.add_fee(fee);
    Ok(total)
}

/// Read cost scales with the length of the value being returned.
fn get_gas(eng: &mut Engine, owner: &Address, key: &[u8]) -> Result<u64, VmError> {
    let val = eng.state().get_state(owner, &keccak256_hash(key));
    copy_gas(GAS_EXT_STEP, val.len() as u64)
}

fn store(eng: &mut Engine, key: &[u8], val: Vec<u8>) {
    let owner = eng.contract().address();
    eng.state().set_state(&owner, &keccak256_hash(key), val);
}

// void TC_StorageSetString(const char *key, const char *val)
pub struct TcStorageSetString;

impl EnvFunc for TcStorageSetString {
    fn gas(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let key = get_string(&app, arg(args, 0)?)?;
        let val = get_string(&app, arg(args, 1)?)?;
        set_gas(eng, key.len() as u64, val.len() as u64)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let key = get_string(&app, arg(args, 0)?)?;
        let val = get_string(&app, arg(args, 1)?)?;
        debug!(key = %String::from_utf8_lossy(&key), len = val.len(), "TC_StorageSetString");
        store(eng, &key, val);
        Ok(0)
    }
}

// void TC_StorageSetBytes(const char *key, const uint8_t *val, uint32_t size)
pub struct TcStorageSetBytes;

impl EnvFunc for TcStorageSetBytes {
    fn gas(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let key = get_string(&app, arg(args, 0)?)?;
        set_gas(eng, key.len() as u64, arg(args, 2)?)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let key = get_string(&app, arg(args, 0)?)?;
        let val = get_bytes(&app, arg(args, 1)?, arg(args, 2)?)?;
        debug!(key = %String::from_utf8_lossy(&key), len = val.len(), "TC_StorageSetBytes");
        store(eng, &key, val);
        Ok(0)
    }
}

// void TC_StoragePureSetString(const uint8_t *key, uint32_t size, const char *val)
pub struct TcStoragePureSetString;

impl EnvFunc for TcStoragePureSetString {
    fn gas(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let val = get_string(&app, arg(args, 2)?)?;
        set_gas(eng, arg(args, 1)?, val.len() as u64)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let key = get_bytes(&app, arg(args, 0)?, arg(args, 1)?)?;
        let val = get_string(&app, arg(args, 2)?)?;
        debug!(key_len = key.len(), len = val.len(), "TC_StoragePureSetString");
        store(eng, &key, val);
        Ok(0)
    }
}

// void TC_StoragePureSetBytes(const uint8_t *key, uint32_t size1, const uint8_t *val, uint32_t size2)
pub struct TcStoragePureSetBytes;

impl EnvFunc for TcStoragePureSetBytes {
    fn gas(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        set_gas(eng, arg(args, 1)?, arg(args, 3)?)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let key = get_bytes(&app, arg(args, 0)?, arg(args, 1)?)?;
        let val = get_bytes(&app, arg(args, 2)?, arg(args, 3)?)?;
        debug!(key_len = key.len(), len = val.len(), "TC_StoragePureSetBytes");
        store(eng, &key, val);
        Ok(0)
    }
}

// char *TC_StorageGetString(const char *key)
// uint8_t *TC_StorageGetBytes(const char *key)
pub struct TcStorageGet;

impl EnvFunc for TcStorageGet {
    fn gas(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let key = get_string(&app, arg(args, 0)?)?;
        let owner = eng.contract().address();
        get_gas(eng, &owner, &key)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let key = get_string(&app, arg(args, 0)?)?;
        let owner = eng.contract().address();
        let val = eng.state().get_state(&owner, &keccak256_hash(&key));
        debug!(key = %String::from_utf8_lossy(&key), len = val.len(), "TC_StorageGet");
        set_bytes(&app, &val).map_err(|_| VmError::MemorySet)
    }
}

// char *TC_StoragePureGetString(const uint8_t *key, uint32_t size)
// uint8_t *TC_StoragePureGetBytes(const uint8_t *key, uint32_t size)
pub struct TcStoragePureGet;

impl EnvFunc for TcStoragePureGet {
    fn gas(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let key = get_bytes(&app, arg(args, 0)?, arg(args, 1)?)?;
        let owner = eng.contract().address();
        get_gas(eng, &owner, &key)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let key = get_bytes(&app, arg(args, 0)?, arg(args, 1)?)?;
        let owner = eng.contract().address();
        let val = eng.state().get_state(&owner, &keccak256_hash(&key));
        debug!(key_len = key.len(), len = val.len(), "TC_StoragePureGet");
        set_bytes(&app, &val).map_err(|_| VmError::MemorySet)
    }
}

// void TC_StorageDel(const char *key)
pub struct TcStorageDel;

impl EnvFunc for TcStorageDel {
    fn gas(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let key = get_string(&app, arg(args, 0)?)?;
        copy_gas(GAS_SLOW_STEP, key.len() as u64)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let key = get_string(&app, arg(args, 0)?)?;
        debug!(key = %String::from_utf8_lossy(&key), "TC_StorageDel");
        store(eng, &key, Vec::new());
        Ok(0)
    }
}

// char *TC_ContractStorageGet(const char *contract, const char *key)
pub struct TcContractStorageGet;

impl EnvFunc for TcContractStorageGet {
    fn gas(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let owner = contract_arg(&app, args, 0)?;
        let key = get_string(&app, arg(args, 1)?)?;
        get_gas(eng, &owner, &key)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let owner = contract_arg(&app, args, 0)?;
        let key = get_string(&app, arg(args, 1)?)?;
        let val = eng.state().get_state(&owner, &keccak256_hash(&key));
        debug!(owner = %owner, key = %String::from_utf8_lossy(&key), "TC_ContractStorageGet");
        set_bytes(&app, &val).map_err(|_| VmError::MemorySet)
    }
}

// char *TC_ContractStoragePureGet(const char *contract, const uint8_t *key, uint32_t size)
pub struct TcContractStoragePureGet;

impl EnvFunc for TcContractStoragePureGet {
    fn gas(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let owner = contract_arg(&app, args, 0)?;
        let key = get_bytes(&app, arg(args, 1)?, arg(args, 2)?)?;
        get_gas(eng, &owner, &key)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let owner = contract_arg(&app, args, 0)?;
        let key = get_bytes(&app, arg(args, 1)?, arg(args, 2)?)?;
        let val = eng.state().get_state(&owner, &keccak256_hash(&key));
        debug!(owner = %owner, key_len = key.len(), "TC_ContractStoragePureGet");
        set_bytes(&app, &val).map_err(|_| VmError::MemorySet)
    }
}

/// Read a foreign contract address argument. Cross-contract reads accept
/// any parseable address string.
fn contract_arg(app: &crate::app::App, args: &[u64], index: usize) -> Result<Address, VmError> {
    let raw = get_string(app, arg(args, index)?)?;
    let s = std::str::from_utf8(&raw).map_err(|_| VmError::InvalidApiArgs)?;
    Address::from_str(s).map_err(|_| VmError::InvalidApiArgs)
}
