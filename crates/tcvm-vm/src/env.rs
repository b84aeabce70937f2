//! Host environment table.
//!
//! Maps host-function names to their gas/call entry pair. Both execution
//! paths resolve host calls here: the interpreter by import name, native
//! code through the `GoFunc` upcall.

use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::Engine;
use crate::error::VmError;

/// One host function: a gas-pricing operation and the effect itself,
/// sharing the `(index, engine, args)` argument tuple.
pub trait EnvFunc: Send + Sync {
    /// Price the call before it runs. May consult state and contract
    /// memory; must not mutate state.
    fn gas(&self, index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError>;

    /// Execute the effect. The single result is typically a memory
    /// offset or a small integer.
    fn call(&self, index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError>;
}

/// Registry of host functions by name.
pub struct EnvTable {
    funcs: HashMap<String, Arc<dyn EnvFunc>>,
}

impl EnvTable {
    pub fn new() -> Self {
        Self {
            funcs: HashMap::new(),
        }
    }

    /// Table pre-populated with the full built-in host API.
    pub fn with_builtins() -> Self {
        let mut table = Self::new();
        crate::host::register_all(&mut table);
        table
    }

    pub fn register(&mut self, name: &str, func: Arc<dyn EnvFunc>) {
        self.funcs.insert(name.to_string(), func);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn EnvFunc>> {
        self.funcs.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }
}

impl Default for EnvTable {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registration() {
        let table = EnvTable::with_builtins();
        for name in [
            "TC_StorageSetString",
            "TC_StorageSetBytes",
            "TC_StoragePureSetString",
            "TC_StoragePureSetBytes",
            "TC_StorageGetString",
            "TC_StorageGetBytes",
            "TC_StoragePureGetString",
            "TC_StoragePureGetBytes",
            "TC_StorageDel",
            "TC_ContractStorageGet",
            "TC_ContractStoragePureGet",
            "TC_Notify",
            "TC_BlockHash",
            "TC_GetCoinbase",
            "TC_GetGasLimit",
            "TC_GetNumber",
            "TC_GetTimestamp",
            "TC_Now",
            "TC_GetTxGasPrice",
            "TC_GetTxOrigin",
            "TC_Log0",
            "TC_Log1",
            "TC_Log2",
            "TC_Log3",
            "TC_Log4",
            "TC_SelfDestruct",
            "TC_GetBalance",
            "TC_CheckSign",
            "TC_Ecrecover",
            "TC_Issue",
            "TC_Transfer",
            "TC_TransferToken",
            "TC_TokenBalance",
            "TC_TokenAddress",
            "TC_GetMsgValue",
            "TC_GetMsgTokenValue",
        ] {
            assert!(table.contains(name), "missing host function {name}");
        }
    }

    #[test]
    fn test_unknown_name() {
        let table = EnvTable::with_builtins();
        assert!(table.get("TC_DoesNotExist").is_none());
    }
}
