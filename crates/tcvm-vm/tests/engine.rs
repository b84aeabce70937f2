//! End-to-end engine scenarios over hand-assembled contract modules.

use std::sync::Arc;

use tcvm_state::{MemoryState, StateDB};
use tcvm_types::{keccak256_hash, Address, U256};
use tcvm_vm::error::VmError;
use tcvm_vm::gas::{log_gas, GAS_FAST_STEP};
use tcvm_vm::testutil::{self, wat};

#[test]
fn init_trivial_contract_returns_empty() {
    let mut eng = testutil::test_engine(52_100);
    let code = wat::trivial_returner();
    let app = eng
        .new_app("0x00000000000000000000000000000000000000aa", &code, true)
        .unwrap();

    let ret = eng.run(&app, b"Init|{}").unwrap();
    let out = app.memory().lock().get_string(ret).unwrap();
    assert!(out.is_empty());

    assert!(eng.gas_used() > 0);
    assert!(eng.gas_used() <= 52_100);
    assert_eq!(eng.gas() + eng.gas_used(), 52_100);
}

#[test]
fn storage_set_then_get_roundtrips() {
    let state = Arc::new(MemoryState::new());
    let mut eng = testutil::test_engine_with_state(200_000, Arc::clone(&state));
    let code = wat::storage_set_get();
    let name = eng.contract().address().to_hex();
    let app = eng.new_app(&name, &code, false).unwrap();

    let ret = eng.run(&app, b"Call|{}").unwrap();
    let out = app.memory().lock().get_string(ret).unwrap();
    assert_eq!(out, b"v");

    // The slot is live in state under the hashed key.
    let owner = eng.contract().address();
    assert_eq!(state.get_state(&owner, &keccak256_hash(b"k")), b"v");

    // Both host calls were metered on top of the instruction stream.
    assert!(eng.gas_used() > 100);
    assert_eq!(eng.gas() + eng.gas_used(), 200_000);
}

#[test]
fn transfer_with_insufficient_funds_fails_cleanly() {
    let state = Arc::new(MemoryState::new());
    let mut eng = testutil::test_engine_with_state(100_000, Arc::clone(&state));

    let from = eng.contract().address();
    let to = Address::from_bytes([5u8; 20]);
    state.add_balance(&from, &U256::from_u64(5));

    let code = wat::transfer_contract(&to.to_hex(), "10");
    let app = eng.new_app(&from.to_hex(), &code, false).unwrap();

    assert_eq!(eng.run(&app, b"Call|{}"), Err(VmError::BalanceNotEnough));
    assert_eq!(state.get_balance(&from), U256::from_u64(5));
    assert_eq!(state.get_balance(&to), U256::ZERO);
}

#[test]
fn out_of_gas_mid_log_writes_nothing() {
    // Straight-line prefix of the log2 fixture: three constants and the
    // call dispatch, then the host cost for a 10-byte payload with two
    // topics. One unit short of that total must fail inside the host
    // charge, leaving no log behind.
    let prefix_gas = 3 + GAS_FAST_STEP;
    let host_gas = log_gas(2, 10).unwrap();
    let budget = prefix_gas + host_gas - 1;

    let state = Arc::new(MemoryState::new());
    let mut eng = testutil::test_engine_with_state(budget, Arc::clone(&state));
    let code = wat::log2_contract();
    let name = eng.contract().address().to_hex();
    let app = eng.new_app(&name, &code, false).unwrap();

    assert_eq!(eng.run(&app, b"Call|{}"), Err(VmError::OutOfGas));
    assert!(state.logs().is_empty());

    // Conservation still holds at engine exit.
    assert_eq!(eng.gas() + eng.gas_used(), budget);
    assert_eq!(eng.gas(), 0);
}

#[test]
fn log2_with_budget_lands_in_state() {
    let state = Arc::new(MemoryState::new());
    let mut eng = testutil::test_engine_with_state(100_000, Arc::clone(&state));
    let code = wat::log2_contract();
    let name = eng.contract().address().to_hex();
    let app = eng.new_app(&name, &code, false).unwrap();

    eng.run(&app, b"Call|{}").unwrap();

    let logs = state.logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].data, b"0123456789");
    assert_eq!(logs[0].topics.len(), 2);
    assert_eq!(logs[0].address, eng.contract().address());
}

#[test]
fn repeated_runs_accumulate_gas() {
    let mut eng = testutil::test_engine(100_000);
    let code = wat::trivial_returner();
    let app = eng.new_app("0x01", &code, true).unwrap();

    eng.run(&app, b"Init|{}").unwrap();
    let after_init = eng.gas_used();
    eng.run(&app, b"Ping|{}").unwrap();
    assert!(eng.gas_used() > after_init);
    assert_eq!(eng.gas() + eng.gas_used(), 100_000);
}
