//! State database interface consumed by the contract runtime.
//!
//! The runtime only ever talks to [`StateDB`]; a full node plugs in its
//! trie-backed implementation, while the CLI driver and the test suites
//! use the in-memory [`MemoryState`].

mod memory;

pub use memory::MemoryState;

use tcvm_types::{Address, Hash, Log, TokenValue, U256};

/// Key-value state with balance and token accounting.
///
/// All methods take `&self`; implementations are expected to use interior
/// mutability and be shareable across the engine and the AOT worker.
pub trait StateDB: Send + Sync {
    /// Base-token balance of `addr`.
    fn get_balance(&self, addr: &Address) -> U256;
    fn add_balance(&self, addr: &Address, amount: &U256);
    fn sub_balance(&self, addr: &Address, amount: &U256);

    /// Balance of a user-issued token. The empty token address is never
    /// stored here; callers route it to the base balance.
    fn get_token_balance(&self, addr: &Address, token: &Address) -> U256;
    fn add_token_balance(&self, addr: &Address, token: &Address, amount: &U256);
    fn sub_token_balance(&self, addr: &Address, token: &Address, amount: &U256);
    /// All non-zero token balances held by `addr`.
    fn get_token_balances(&self, addr: &Address) -> Vec<TokenValue>;

    /// Contract storage, keyed by the keccak256 of the contract-supplied key.
    fn get_state(&self, addr: &Address, key: &Hash) -> Vec<u8>;
    fn set_state(&self, addr: &Address, key: &Hash, value: Vec<u8>);

    fn add_log(&self, log: Log);

    /// Auxiliary metadata records (AOT artifact bookkeeping).
    fn get_contract_info(&self, key: &[u8]) -> Vec<u8>;
    fn set_contract_info(&self, key: &[u8], data: &[u8]);

    /// Mark `addr` self-destructed: its balances and storage are gone.
    fn suicide(&self, addr: &Address);
}
