use crate::{Address, Hash, U256};
use serde::{Deserialize, Serialize};

/// Event log emitted by a contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<Hash>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub block_time: u64,
}

/// A token balance entry: the token's issuing address and the held amount.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenValue {
    pub token: Address,
    pub value: U256,
}

/// Block header fields the runtime surfaces to contracts.
#[derive(Debug, Clone, Default)]
pub struct Header {
    pub number: u64,
    pub time: u64,
    pub coinbase: Address,
    pub gas_limit: u64,
}
