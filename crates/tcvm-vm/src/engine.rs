//! Execution engine: gas meter, frame stack, host-call dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use tcvm_state::StateDB;
use tracing::debug;

use crate::aot::{AotService, RefreshTask};
use crate::app::App;
use crate::contract::Contract;
use crate::ctx::BlockContext;
use crate::env::EnvTable;
use crate::error::VmError;
use crate::gas::FeeSnapshot;
use crate::interp;
use crate::module::Module;

/// Fixed entry export every contract is called through.
pub const APP_ENTRY: &str = "thunderchain_main";

/// Drives one contract invocation at a time: owns the gas meter, the
/// running frame stack, and the per-address module cache, and dispatches
/// every host call with the gas/fee discipline.
pub struct Engine {
    state: Arc<dyn StateDB>,
    ctx: BlockContext,
    env: Arc<EnvTable>,
    contract: Contract,
    gas: u64,
    gas_used: u64,
    fee: u64,
    frames: Vec<Arc<App>>,
    app_cache: HashMap<String, Arc<Module>>,
    aot: Option<Arc<AotService>>,
    trace: bool,
}

impl Engine {
    pub fn new(contract: Contract, state: Arc<dyn StateDB>, ctx: BlockContext) -> Self {
        let gas = contract.gas;
        Self {
            state,
            ctx,
            env: Arc::new(EnvTable::with_builtins()),
            contract,
            gas,
            gas_used: 0,
            fee: 0,
            frames: Vec::new(),
            app_cache: HashMap::new(),
            aot: None,
            trace: false,
        }
    }

    /// Attach the AOT service; native handles are preferred when warm.
    pub fn set_aot(&mut self, aot: Arc<AotService>) {
        self.aot = Some(aot);
    }

    pub fn state(&self) -> &Arc<dyn StateDB> {
        &self.state
    }

    pub fn ctx(&self) -> &BlockContext {
        &self.ctx
    }

    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    pub fn contract_mut(&mut self) -> &mut Contract {
        &mut self.contract
    }

    pub fn env(&self) -> &Arc<EnvTable> {
        &self.env
    }

    pub fn aot(&self) -> Option<Arc<AotService>> {
        self.aot.clone()
    }

    /// Parse and instantiate the contract at `address`. Decoded modules
    /// are cached per address until `remove_cache`.
    pub fn new_app(&mut self, address: &str, code: &[u8], create: bool) -> Result<Arc<App>, VmError> {
        let module = match self.app_cache.get(address) {
            Some(module) => Arc::clone(module),
            None => {
                let module = Arc::new(Module::decode(code)?);
                self.app_cache.insert(address.to_string(), Arc::clone(&module));
                module
            }
        };
        debug!(app = address, create, "new app");
        App::new(address, module, code)
    }

    /// Run the contract entry over `input` (`action|{json-args}`) and
    /// return the result offset in the app's linear memory.
    pub fn run(&mut self, app: &Arc<App>, input: &[u8]) -> Result<u64, VmError> {
        let (action, params) = split_input(input);
        self.frames.push(Arc::clone(app));
        let result = self.run_frame(app, &action, &params);
        self.frames.pop();
        result
    }

    fn run_frame(&mut self, app: &Arc<App>, action: &[u8], params: &[u8]) -> Result<u64, VmError> {
        if let Some(aot) = self.aot.clone() {
            aot.refresh(RefreshTask::new(app, Arc::clone(&self.state)));
            if let Some(native) = aot.get_native(app.name()) {
                debug!(app = app.name(), "running native artifact");
                return native.run(self, app, action, params);
            }
        }

        let Some(entry) = app.module().export_func(APP_ENTRY) else {
            debug!(app = app.name(), "no entry export; empty result");
            return Ok(0);
        };

        let (action_off, params_off) = {
            let mut mem = app.memory().lock();
            (mem.set_bytes(action)?, mem.set_bytes(params)?)
        };
        let ret = interp::call_function(self, app, entry, &[action_off, params_off], 0)?;
        Ok(ret.unwrap_or(0))
    }

    /// Atomically deduct `cost`; `false` leaves the meter untouched.
    pub fn use_gas(&mut self, cost: u64) -> bool {
        if cost > self.gas {
            return false;
        }
        self.gas -= cost;
        self.gas_used += cost;
        true
    }

    pub fn gas(&self) -> u64 {
        self.gas
    }

    pub fn gas_used(&self) -> u64 {
        self.gas_used
    }

    pub fn get_fee(&self) -> u64 {
        self.fee
    }

    pub fn set_fee(&mut self, fee: u64) {
        self.fee = fee;
    }

    pub fn add_fee(&mut self, amount: u64) {
        self.fee = self.fee.saturating_add(amount);
    }

    /// Attribute a partially-charged host cost when the meter cannot
    /// cover it: the remaining gas is burned toward the non-fee portion
    /// while the fee accumulator keeps what the gas function attributed.
    pub fn cal_fee(&mut self, real_cost: u64, _fee_part: u64) {
        let burn = real_cost.min(self.gas);
        self.gas -= burn;
        self.gas_used += burn;
    }

    /// The frame host calls address their memory through.
    pub fn running_app_frame(&self) -> Option<Arc<App>> {
        self.frames.last().cloned()
    }

    /// Drop the cached module for `address` (self-destruct path).
    pub fn remove_cache(&mut self, address: &str) {
        self.app_cache.remove(address);
    }

    pub fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    pub fn trace(&self) -> bool {
        self.trace
    }

    /// Dispatch one host call with the gas discipline: price, deduct,
    /// execute. Gas-pricing failures roll the fee accumulator back; a
    /// deduction failure attributes the partial cost before surfacing
    /// out-of-gas. The call itself never runs unless fully paid for.
    pub fn call_host(&mut self, name: &str, args: &[u64]) -> Result<u64, VmError> {
        let Some(func) = self.env.get(name) else {
            return Err(VmError::Trap(format!("host function not found: {name}")));
        };

        let snapshot = FeeSnapshot::take(self);
        let cost = match func.gas(-1, self, args) {
            Ok(cost) => cost,
            Err(err) => {
                debug!(host = name, %err, "host gas pricing failed");
                snapshot.rollback(self);
                return Err(err);
            }
        };

        if !self.use_gas(cost) {
            let fee_part = snapshot.accrued(self);
            let real_cost = cost.saturating_sub(fee_part);
            self.cal_fee(real_cost, fee_part);
            debug!(host = name, cost, gas = self.gas, "host call out of gas");
            return Err(VmError::OutOfGas);
        }

        let ret = func.call(-1, self, args)?;
        if self.trace {
            tracing::trace!(host = name, cost, ret, "host call");
        }
        Ok(ret)
    }

    /// Push a frame without running it (test scaffolding).
    #[doc(hidden)]
    pub fn push_frame(&mut self, app: Arc<App>) {
        self.frames.push(app);
    }
}

/// Split `action|{json}` at the first `|`; the whole input is the action
/// when no separator is present.
fn split_input(input: &[u8]) -> (Vec<u8>, Vec<u8>) {
    match input.iter().position(|&b| b == b'|') {
        Some(pos) => (input[..pos].to_vec(), input[pos + 1..].to_vec()),
        None => (input.to_vec(), Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{test_engine, wat};

    #[test]
    fn test_use_gas_conservation() {
        let mut eng = test_engine(100);
        assert!(eng.use_gas(40));
        assert_eq!(eng.gas(), 60);
        assert_eq!(eng.gas_used(), 40);

        // Refused deduction leaves the meter untouched.
        assert!(!eng.use_gas(61));
        assert_eq!(eng.gas(), 60);
        assert_eq!(eng.gas_used(), 40);
        assert_eq!(eng.gas() + eng.gas_used(), 100);
    }

    #[test]
    fn test_split_input() {
        let (action, params) = split_input(b"Init|{}");
        assert_eq!(action, b"Init");
        assert_eq!(params, b"{}");

        let (action, params) = split_input(b"NoSeparator");
        assert_eq!(action, b"NoSeparator");
        assert!(params.is_empty());

        let (action, params) = split_input(b"a|b|c");
        assert_eq!(action, b"a");
        assert_eq!(params, b"b|c");
    }

    #[test]
    fn test_new_app_caches_module() {
        let mut eng = test_engine(100_000);
        let code = wat::trivial_returner();
        let addr = "0x00000000000000000000000000000000000000aa";

        let app1 = eng.new_app(addr, &code, true).unwrap();
        let app2 = eng.new_app(addr, &code, false).unwrap();
        assert!(Arc::ptr_eq(app1.module(), app2.module()));

        eng.remove_cache(addr);
        let app3 = eng.new_app(addr, &code, false).unwrap();
        assert!(!Arc::ptr_eq(app1.module(), app3.module()));
    }

    #[test]
    fn test_new_app_rejects_garbage() {
        let mut eng = test_engine(100_000);
        assert!(matches!(
            eng.new_app("0x01", b"not wasm at all", true),
            Err(VmError::InvalidModule(_))
        ));
    }

    #[test]
    fn test_run_trivial_returner() {
        let mut eng = test_engine(52_100);
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
    fn test_run_missing_entry_is_empty_success() {
        let mut eng = test_engine(52_100);
        // A valid module with no exports at all.
        let code = b"\0asm\x01\x00\x00\x00".to_vec();
        let app = eng.new_app("0x02", &code, false).unwrap();
        let ret = eng.run(&app, b"Init|{}").unwrap();
        assert_eq!(ret, 0);
    }

    #[test]
    fn test_run_out_of_gas() {
        let mut eng = test_engine(1);
        let code = wat::countdown_loop(10);
        let app = eng.new_app("0x03", &code, false).unwrap();
        assert_eq!(eng.run(&app, b"Init|{}"), Err(VmError::OutOfGas));
        assert_eq!(eng.gas(), 0);
    }

    #[test]
    fn test_run_branching_module() {
        let mut eng = test_engine(52_100);
        let code = wat::branching();
        let app = eng.new_app("0x04", &code, false).unwrap();
        let ret = eng.run(&app, b"Init|{}").unwrap();
        assert_eq!(app.memory().lock().get_string(ret).unwrap(), b"ok");
    }

    #[test]
    fn test_run_countdown_loop() {
        let mut eng = test_engine(52_100);
        let code = wat::countdown_loop(50);
        let app = eng.new_app("0x05", &code, false).unwrap();
        let before = eng.gas_used();
        eng.run(&app, b"Init|{}").unwrap();
        // Fifty iterations cost noticeably more than the straight-line
        // path alone.
        assert!(eng.gas_used() - before > 50);
    }

    #[test]
    fn test_unknown_host_call() {
        let mut eng = test_engine(1_000);
        assert!(matches!(
            eng.call_host("TC_DoesNotExist", &[]),
            Err(VmError::Trap(_))
        ));
    }
}
