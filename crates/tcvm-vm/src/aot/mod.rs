//! Ahead-of-time compilation service.
//!
//! Compiles contract modules into native shared objects, caches loaded
//! handles, evicts idle entries, and blacklists addresses whose compile
//! or load failed. Persistent bookkeeping lives in the state database
//! under `"cfso:" || address` as a compact JSON record.

pub mod cgen;
mod service;

pub use service::{AotConfig, AotService, RefreshTask};

use serde::{Deserialize, Serialize};
use tcvm_types::Address;

/// Environment variable naming the artifact output directory.
pub const TCVM_AOTS_ROOT: &str = "TCVM_AOTS_ROOT";
/// Environment variable controlling intermediate-source retention
/// (`"0"` deletes the generated C source after compiling).
pub const TCVM_AOTS_KEEP_CSOURCE: &str = "TCVM_AOTS_KEEP_CSOURCE";

const CONTRACT_INFO_PREFIX: &[u8] = b"cfso:";

/// Persisted AOT metadata for one contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractInfo {
    #[serde(rename = "t")]
    pub typ: String,
    #[serde(rename = "p")]
    pub path: String,
    #[serde(rename = "md5")]
    pub md5: [u8; 16],
    #[serde(rename = "e")]
    pub err: String,
}

impl ContractInfo {
    pub fn wasm() -> Self {
        Self {
            typ: "wasm".to_string(),
            path: String::new(),
            md5: [0u8; 16],
            err: String::new(),
        }
    }
}

/// State-database key for a contract's [`ContractInfo`]:
/// 5-byte prefix + 20-byte address.
pub fn contract_info_key(addr: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(CONTRACT_INFO_PREFIX.len() + Address::LEN);
    key.extend_from_slice(CONTRACT_INFO_PREFIX);
    key.extend_from_slice(addr.as_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let addr = Address::from_bytes([0xabu8; 20]);
        let key = contract_info_key(&addr);
        assert_eq!(key.len(), 25);
        assert_eq!(&key[..5], b"cfso:");
        assert_eq!(&key[5..], addr.as_bytes());
    }

    #[test]
    fn test_contract_info_wire_format() {
        let mut info = ContractInfo::wasm();
        info.path = "/tmp/aots/0xab.so".to_string();
        info.md5 = [1u8; 16];

        let json = serde_json::to_string(&info).unwrap();
        // One-character keys on the wire.
        assert!(json.contains("\"t\":\"wasm\""));
        assert!(json.contains("\"p\":"));
        assert!(json.contains("\"md5\":"));
        assert!(json.contains("\"e\":\"\""));

        let back: ContractInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
    }
}
