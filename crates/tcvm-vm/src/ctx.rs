//! Execution context surfaced to contracts.
//!
//! The block and transaction fields the host API exposes, passed
//! explicitly into the engine rather than held in process-wide state.

use std::sync::Arc;
use tcvm_types::{Address, Hash, Header, U256};

/// Read-only chain accessor for ancestor block hashes.
pub trait ChainContext: Send + Sync {
    fn get_hash(&self, number: u64) -> Hash;
}

/// Chain accessor with no history; every lookup yields the zero hash.
pub struct EmptyChain;

impl ChainContext for EmptyChain {
    fn get_hash(&self, _number: u64) -> Hash {
        Hash::ZERO
    }
}

/// Per-message execution context.
#[derive(Clone)]
pub struct BlockContext {
    pub number: u64,
    pub time: u64,
    pub coinbase: Address,
    pub gas_limit: u64,
    /// Transaction origin.
    pub origin: Address,
    pub gas_price: U256,
    /// Token the current message is denominated in; the empty address
    /// denotes the base token.
    pub token: Address,
    pub gas_rate: u64,
    chain: Arc<dyn ChainContext>,
}

impl BlockContext {
    pub fn new(
        header: &Header,
        chain: Arc<dyn ChainContext>,
        token: Address,
        gas_rate: u64,
    ) -> Self {
        Self {
            number: header.number,
            time: header.time,
            coinbase: header.coinbase,
            gas_limit: header.gas_limit,
            origin: Address::EMPTY,
            gas_price: U256::ZERO,
            token,
            gas_rate,
            chain,
        }
    }

    pub fn get_hash(&self, number: u64) -> Hash {
        self.chain.get_hash(number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_from_header() {
        let header = Header {
            number: 42,
            time: 1_565_078_742,
            coinbase: Address::from_bytes([9u8; 20]),
            gas_limit: 8_000_000,
        };
        let ctx = BlockContext::new(&header, Arc::new(EmptyChain), Address::EMPTY, 1000);
        assert_eq!(ctx.number, 42);
        assert_eq!(ctx.coinbase, header.coinbase);
        assert!(ctx.token.is_empty());
        assert_eq!(ctx.get_hash(41), Hash::ZERO);
    }
}
