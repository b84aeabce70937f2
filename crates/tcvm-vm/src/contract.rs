//! Per-invocation contract frame.

use bytes::Bytes;
use tcvm_types::{Address, Hash, U256};

/// The record of one contract invocation: who calls whom, with what
/// value, input, and gas.
#[derive(Debug, Clone)]
pub struct Contract {
    pub caller: Address,
    pub self_addr: Address,
    /// Address the running code was loaded from; also the token identity
    /// minted by `TC_Issue`.
    pub code_addr: Option<Address>,
    value: U256,
    pub input: Bytes,
    pub gas: u64,
    pub code: Bytes,
    pub code_hash: Hash,
    /// True while the construction entry (`Init`) runs.
    pub create_call: bool,
}

impl Contract {
    pub fn new(caller: Address, self_addr: Address, value: U256, gas: u64) -> Self {
        Self {
            caller,
            self_addr,
            code_addr: None,
            value,
            input: Bytes::new(),
            gas,
            code: Bytes::new(),
            code_hash: Hash::ZERO,
            create_call: false,
        }
    }

    /// Attach the code to run in this frame.
    pub fn set_call_code(&mut self, code_addr: Address, code_hash: Hash, code: Bytes) {
        self.code_addr = Some(code_addr);
        self.code_hash = code_hash;
        self.code = code;
    }

    /// The callee address.
    pub fn address(&self) -> Address {
        self.self_addr
    }

    /// Value transferred with the message.
    pub fn value(&self) -> &U256 {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcvm_types::keccak256_hash;

    #[test]
    fn test_contract_frame() {
        let caller = Address::from_bytes([1u8; 20]);
        let callee = Address::from_bytes([2u8; 20]);
        let mut contract = Contract::new(caller, callee, U256::from_u64(5), 52_100);

        assert_eq!(contract.address(), callee);
        assert_eq!(contract.value(), &U256::from_u64(5));
        assert_eq!(contract.gas, 52_100);
        assert!(!contract.create_call);

        let code = Bytes::from_static(b"\0asm");
        contract.set_call_code(Address::EMPTY, keccak256_hash(&code), code.clone());
        assert_eq!(contract.code_addr, Some(Address::EMPTY));
        assert_eq!(contract.code, code);
    }
}
