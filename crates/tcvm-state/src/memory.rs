//! In-memory state used by the CLI driver and the test suites.

use crate::StateDB;
use parking_lot::RwLock;
use std::collections::HashMap;
use tcvm_types::{Address, Hash, Log, TokenValue, U256};

#[derive(Default)]
struct Inner {
    balances: HashMap<Address, U256>,
    token_balances: HashMap<Address, HashMap<Address, U256>>,
    storage: HashMap<(Address, Hash), Vec<u8>>,
    logs: Vec<Log>,
    contract_info: HashMap<Vec<u8>, Vec<u8>>,
    suicided: Vec<Address>,
}

/// Hash-map backed [`StateDB`].
///
/// Balance arithmetic saturates rather than panics; the runtime checks
/// sufficiency before every debit, so saturation is never observable
/// through well-behaved host calls.
#[derive(Default)]
pub struct MemoryState {
    inner: RwLock<Inner>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs recorded so far (test observability).
    pub fn logs(&self) -> Vec<Log> {
        self.inner.read().logs.clone()
    }

    /// Addresses marked self-destructed (test observability).
    pub fn suicided(&self) -> Vec<Address> {
        self.inner.read().suicided.clone()
    }
}

impl StateDB for MemoryState {
    fn get_balance(&self, addr: &Address) -> U256 {
        self.inner
            .read()
            .balances
            .get(addr)
            .copied()
            .unwrap_or(U256::ZERO)
    }

    fn add_balance(&self, addr: &Address, amount: &U256) {
        let mut inner = self.inner.write();
        let entry = inner.balances.entry(*addr).or_insert(U256::ZERO);
        *entry = entry.checked_add(amount).unwrap_or(U256::MAX);
    }

    fn sub_balance(&self, addr: &Address, amount: &U256) {
        let mut inner = self.inner.write();
        let entry = inner.balances.entry(*addr).or_insert(U256::ZERO);
        *entry = entry.checked_sub(amount).unwrap_or(U256::ZERO);
    }

    fn get_token_balance(&self, addr: &Address, token: &Address) -> U256 {
        self.inner
            .read()
            .token_balances
            .get(addr)
            .and_then(|tokens| tokens.get(token))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    fn add_token_balance(&self, addr: &Address, token: &Address, amount: &U256) {
        let mut inner = self.inner.write();
        let entry = inner
            .token_balances
            .entry(*addr)
            .or_default()
            .entry(*token)
            .or_insert(U256::ZERO);
        *entry = entry.checked_add(amount).unwrap_or(U256::MAX);
    }

    fn sub_token_balance(&self, addr: &Address, token: &Address, amount: &U256) {
        let mut inner = self.inner.write();
        let entry = inner
            .token_balances
            .entry(*addr)
            .or_default()
            .entry(*token)
            .or_insert(U256::ZERO);
        *entry = entry.checked_sub(amount).unwrap_or(U256::ZERO);
    }

    fn get_token_balances(&self, addr: &Address) -> Vec<TokenValue> {
        let inner = self.inner.read();
        let mut out: Vec<TokenValue> = inner
            .token_balances
            .get(addr)
            .map(|tokens| {
                tokens
                    .iter()
                    .filter(|(_, value)| !value.is_zero())
                    .map(|(token, value)| TokenValue {
                        token: *token,
                        value: *value,
                    })
                    .collect()
            })
            .unwrap_or_default();
        // Deterministic order for iteration-sensitive callers.
        out.sort_by_key(|tv| tv.token);
        out
    }

    fn get_state(&self, addr: &Address, key: &Hash) -> Vec<u8> {
        self.inner
            .read()
            .storage
            .get(&(*addr, *key))
            .cloned()
            .unwrap_or_default()
    }

    fn set_state(&self, addr: &Address, key: &Hash, value: Vec<u8>) {
        let mut inner = self.inner.write();
        if value.is_empty() {
            inner.storage.remove(&(*addr, *key));
        } else {
            inner.storage.insert((*addr, *key), value);
        }
    }

    fn add_log(&self, log: Log) {
        tracing::debug!(address = %log.address, topics = log.topics.len(), "add_log");
        self.inner.write().logs.push(log);
    }

    fn get_contract_info(&self, key: &[u8]) -> Vec<u8> {
        self.inner
            .read()
            .contract_info
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    fn set_contract_info(&self, key: &[u8], data: &[u8]) {
        self.inner
            .write()
            .contract_info
            .insert(key.to_vec(), data.to_vec());
    }

    fn suicide(&self, addr: &Address) {
        let mut inner = self.inner.write();
        inner.balances.remove(addr);
        inner.token_balances.remove(addr);
        inner.storage.retain(|(owner, _), _| owner != addr);
        inner.suicided.push(*addr);
    }
}
