//! Gas schedule and checked size-to-gas arithmetic.
//!
//! Every host call prices itself with these constants before it runs.
//! All arithmetic on contract-controlled sizes goes through [`safe_add`]
//! and [`safe_mul`]; a wrap yields [`VmError::GasOverflow`] and the call
//! is rejected before any state mutation.

use crate::engine::Engine;
use crate::error::VmError;

pub const GAS_QUICK_STEP: u64 = 2;
pub const GAS_FASTEST_STEP: u64 = 3;
pub const GAS_FAST_STEP: u64 = 5;
pub const GAS_MID_STEP: u64 = 8;
pub const GAS_SLOW_STEP: u64 = 10;
pub const GAS_EXT_STEP: u64 = 20;

/// Per-word cost of copying data across the host boundary.
pub const COPY_GAS: u64 = 3;

pub const LOG_GAS: u64 = 375;
pub const LOG_TOPIC_GAS: u64 = 375;
pub const LOG_DATA_GAS: u64 = 8;

/// Per-word cost of persisted storage values; attributed through the fee
/// accumulator so a failed charge can be split into its parts.
pub const STORE_FEE_GAS: u64 = 20;

pub const TRANSFER_GAS: u64 = 9_000;
pub const ISSUE_GAS: u64 = 5_000;
pub const SELF_DESTRUCT_GAS: u64 = 5_000;
pub const ECRECOVER_GAS: u64 = 3_000;
pub const CHECK_SIGN_GAS: u64 = 3_000;

/// Gas per page charged by `memory.grow`.
pub const MEM_GROW_PAGE_GAS: u64 = 64;

const WORD_SIZE: u64 = 32;

/// Checked addition; wrap yields `GasOverflow`.
pub fn safe_add(a: u64, b: u64) -> Result<u64, VmError> {
    a.checked_add(b).ok_or(VmError::GasOverflow)
}

/// Checked multiplication; wrap yields `GasOverflow`.
pub fn safe_mul(a: u64, b: u64) -> Result<u64, VmError> {
    a.checked_mul(b).ok_or(VmError::GasOverflow)
}

/// Number of 32-byte words covering `len` bytes.
pub fn to_word_size(len: u64) -> u64 {
    if len > u64::MAX - (WORD_SIZE - 1) {
        return len / WORD_SIZE + 1;
    }
    (len + WORD_SIZE - 1) / WORD_SIZE
}

/// Log cost: base + per-topic + 8 gas per payload byte.
pub fn log_gas(topics: u64, data_len: u64) -> Result<u64, VmError> {
    let topic_gas = safe_mul(topics, LOG_TOPIC_GAS)?;
    let data_gas = safe_mul(data_len, LOG_DATA_GAS)?;
    safe_add(safe_add(LOG_GAS, topic_gas)?, data_gas)
}

/// Cost of returning `len` bytes to contract memory.
pub fn copy_gas(base: u64, len: u64) -> Result<u64, VmError> {
    safe_add(base, safe_mul(to_word_size(len), COPY_GAS)?)
}

/// Snapshot of the engine's fee accumulator, taken before a host gas
/// function runs. `rollback` restores the pre-call fee when gas pricing
/// fails; dropping the snapshot commits whatever the gas function added.
#[derive(Debug, Clone, Copy)]
pub struct FeeSnapshot {
    prev: u64,
}

impl FeeSnapshot {
    pub fn take(eng: &Engine) -> Self {
        Self {
            prev: eng.get_fee(),
        }
    }

    pub fn prev(&self) -> u64 {
        self.prev
    }

    /// Fee added since the snapshot was taken.
    pub fn accrued(&self, eng: &Engine) -> u64 {
        eng.get_fee().saturating_sub(self.prev)
    }

    pub fn rollback(self, eng: &mut Engine) {
        eng.set_fee(self.prev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_ops() {
        assert_eq!(safe_add(1, 2).unwrap(), 3);
        assert_eq!(safe_mul(6, 7).unwrap(), 42);
        assert_eq!(safe_add(u64::MAX, 1), Err(VmError::GasOverflow));
        assert_eq!(safe_mul(u64::MAX, 2), Err(VmError::GasOverflow));
    }

    #[test]
    fn test_to_word_size() {
        assert_eq!(to_word_size(0), 0);
        assert_eq!(to_word_size(1), 1);
        assert_eq!(to_word_size(32), 1);
        assert_eq!(to_word_size(33), 2);
        assert_eq!(to_word_size(u64::MAX), u64::MAX / 32 + 1);
    }

    #[test]
    fn test_log_gas() {
        // base + 2 topics + 8 gas per byte over a 10-byte payload
        assert_eq!(log_gas(2, 10).unwrap(), 375 + 2 * 375 + 80);
        assert_eq!(log_gas(0, 0).unwrap(), 375);
        assert_eq!(log_gas(4, u64::MAX), Err(VmError::GasOverflow));
    }
}
