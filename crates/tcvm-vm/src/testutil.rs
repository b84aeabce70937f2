//! Hand-assembled wasm fixtures.
//!
//! The test suites build contract modules byte-by-byte instead of
//! shipping binary fixture files, the same way native-code runtimes in
//! this space hand-assemble their instruction streams. `ModuleBuilder`
//! emits a minimal MVP binary; the `wat` module collects the fixtures the
//! suites share.

#![doc(hidden)]

use std::sync::Arc;

use tcvm_state::MemoryState;
use tcvm_types::{Address, Header, U256};

use crate::app::App;
use crate::contract::Contract;
use crate::ctx::{BlockContext, EmptyChain};
use crate::engine::Engine;

/// Engine over a fresh in-memory state, base-token context, and the
/// standard test caller/callee pair.
pub fn test_engine(gas: u64) -> Engine {
    test_engine_with_state(gas, Arc::new(MemoryState::new()))
}

pub fn test_engine_with_state(gas: u64, state: Arc<MemoryState>) -> Engine {
    let caller = Address::from_bytes([1u8; 20]);
    let callee = Address::from_bytes([2u8; 20]);
    let contract = Contract::new(caller, callee, U256::ZERO, gas);
    let ctx = BlockContext::new(
        &Header {
            number: 7,
            time: 1_565_078_742,
            coinbase: Address::from_bytes([9u8; 20]),
            gas_limit: 8_000_000,
        },
        Arc::new(EmptyChain),
        Address::EMPTY,
        1000,
    );
    Engine::new(contract, state, ctx)
}

/// Engine with a frame already pushed over the given module, so host
/// functions can be exercised directly.
pub fn engine_with_frame(code: &[u8], gas: u64) -> (Engine, Arc<App>) {
    let (eng, app, _) = engine_with_frame_and_state(code, gas);
    (eng, app)
}

/// Like [`engine_with_frame`], also handing back the concrete state so
/// tests can observe logs and balances directly.
pub fn engine_with_frame_and_state(code: &[u8], gas: u64) -> (Engine, Arc<App>, Arc<MemoryState>) {
    let state = Arc::new(MemoryState::new());
    let mut eng = test_engine_with_state(gas, Arc::clone(&state));
    let name = eng.contract().address().to_hex();
    let app = eng.new_app(&name, code, false).unwrap();
    eng.push_frame(Arc::clone(&app));
    (eng, app, state)
}

fn leb(mut v: u32, out: &mut Vec<u8>) {
    loop {
        let mut b = (v & 0x7f) as u8;
        v >>= 7;
        if v != 0 {
            b |= 0x80;
        }
        out.push(b);
        if v == 0 {
            break;
        }
    }
}

fn section(id: u8, body: Vec<u8>, out: &mut Vec<u8>) {
    out.push(id);
    leb(body.len() as u32, out);
    out.extend_from_slice(&body);
}

/// Value type bytes for builder signatures.
pub const I32: u8 = 0x7f;
pub const I64: u8 = 0x7e;

#[derive(Default)]
pub struct ModuleBuilder {
    types: Vec<(Vec<u8>, Vec<u8>)>,
    imports: Vec<(String, String, u32)>,
    funcs: Vec<(u32, Vec<u8>)>,
    exports: Vec<(String, u32)>,
    min_pages: Option<u32>,
    data: Vec<(u32, Vec<u8>)>,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a function type; returns its index.
    pub fn ty(&mut self, params: &[u8], results: &[u8]) -> u32 {
        self.types.push((params.to_vec(), results.to_vec()));
        (self.types.len() - 1) as u32
    }

    /// Import `env.<name>` with the given type; returns its function index.
    pub fn import(&mut self, name: &str, type_idx: u32) -> u32 {
        self.imports.push(("env".to_string(), name.to_string(), type_idx));
        (self.imports.len() - 1) as u32
    }

    /// Add a function with a raw body (locals-free); returns its index in
    /// the combined imports-first function space.
    pub fn func(&mut self, type_idx: u32, body: &[u8]) -> u32 {
        self.funcs.push((type_idx, body.to_vec()));
        (self.imports.len() + self.funcs.len() - 1) as u32
    }

    pub fn export(&mut self, name: &str, func_idx: u32) -> &mut Self {
        self.exports.push((name.to_string(), func_idx));
        self
    }

    pub fn memory(&mut self, min_pages: u32) -> &mut Self {
        self.min_pages = Some(min_pages);
        self
    }

    /// Active data segment at `offset`.
    pub fn data(&mut self, offset: u32, bytes: &[u8]) -> &mut Self {
        self.data.push((offset, bytes.to_vec()));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = b"\0asm\x01\x00\x00\x00".to_vec();

        if !self.types.is_empty() {
            let mut body = Vec::new();
            leb(self.types.len() as u32, &mut body);
            for (params, results) in &self.types {
                body.push(0x60);
                leb(params.len() as u32, &mut body);
                body.extend_from_slice(params);
                leb(results.len() as u32, &mut body);
                body.extend_from_slice(results);
            }
            section(1, body, &mut out);
        }

        if !self.imports.is_empty() {
            let mut body = Vec::new();
            leb(self.imports.len() as u32, &mut body);
            for (module, name, type_idx) in &self.imports {
                leb(module.len() as u32, &mut body);
                body.extend_from_slice(module.as_bytes());
                leb(name.len() as u32, &mut body);
                body.extend_from_slice(name.as_bytes());
                body.push(0x00);
                leb(*type_idx, &mut body);
            }
            section(2, body, &mut out);
        }

        if !self.funcs.is_empty() {
            let mut body = Vec::new();
            leb(self.funcs.len() as u32, &mut body);
            for (type_idx, _) in &self.funcs {
                leb(*type_idx, &mut body);
            }
            section(3, body, &mut out);
        }

        if let Some(min) = self.min_pages {
            let mut body = Vec::new();
            leb(1, &mut body);
            body.push(0x00);
            leb(min, &mut body);
            section(5, body, &mut out);
        }

        if !self.exports.is_empty() {
            let mut body = Vec::new();
            leb(self.exports.len() as u32, &mut body);
            for (name, func_idx) in &self.exports {
                leb(name.len() as u32, &mut body);
                body.extend_from_slice(name.as_bytes());
                body.push(0x00);
                leb(*func_idx, &mut body);
            }
            section(7, body, &mut out);
        }

        if !self.funcs.is_empty() {
            let mut body = Vec::new();
            leb(self.funcs.len() as u32, &mut body);
            for (_, code) in &self.funcs {
                let mut entry = Vec::new();
                leb(0, &mut entry); // no declared locals
                entry.extend_from_slice(code);
                leb(entry.len() as u32, &mut body);
                body.extend_from_slice(&entry);
            }
            section(10, body, &mut out);
        }

        if !self.data.is_empty() {
            let mut body = Vec::new();
            leb(self.data.len() as u32, &mut body);
            for (offset, bytes) in &self.data {
                leb(0, &mut body);
                body.push(0x41);
                // i32.const offsets in fixtures stay in the positive
                // single-chunk LEB range when below 64; emit generally.
                let mut v = *offset as i64;
                loop {
                    let mut b = (v & 0x7f) as u8;
                    v >>= 7;
                    let done = (v == 0 && b & 0x40 == 0) || (v == -1 && b & 0x40 != 0);
                    if !done {
                        b |= 0x80;
                    }
                    body.push(b);
                    if done {
                        break;
                    }
                }
                body.push(0x0b);
                leb(bytes.len() as u32, &mut body);
                body.extend_from_slice(bytes);
            }
            section(11, body, &mut out);
        }

        out
    }
}

/// Shared fixtures.
pub mod wat {
    use super::*;

    /// Entry point that immediately returns offset 0 (an empty string in
    /// zeroed memory).
    pub fn trivial_returner() -> Vec<u8> {
        let mut b = ModuleBuilder::new();
        let entry_ty = b.ty(&[I32, I32], &[I32]);
        let f = b.func(entry_ty, &[0x41, 0x00, 0x0b]); // i32.const 0; end
        b.memory(1).export("thunderchain_main", f);
        b.build()
    }

    /// Calls `TC_StorageSetString("k", "v")` then returns the pointer
    /// from `TC_StorageGetString("k")`.
    pub fn storage_set_get() -> Vec<u8> {
        let mut b = ModuleBuilder::new();
        let set_ty = b.ty(&[I32, I32], &[]);
        let get_ty = b.ty(&[I32], &[I32]);
        let entry_ty = b.ty(&[I32, I32], &[I32]);
        let set = b.import("TC_StorageSetString", set_ty);
        let get = b.import("TC_StorageGetString", get_ty);
        let body = [
            0x41, 8, // i32.const 8  (key)
            0x41, 16, // i32.const 16 (value)
            0x10, set as u8, // call TC_StorageSetString
            0x41, 8, // i32.const 8
            0x10, get as u8, // call TC_StorageGetString
            0x0b,
        ];
        let f = b.func(entry_ty, &body);
        b.memory(1)
            .data(8, b"k\0")
            .data(16, b"v\0")
            .export("thunderchain_main", f);
        b.build()
    }

    /// Emits `TC_Log2(data, topic1, topic2)` over a 10-byte payload.
    pub fn log2_contract() -> Vec<u8> {
        let mut b = ModuleBuilder::new();
        let log_ty = b.ty(&[I32, I32, I32], &[]);
        let entry_ty = b.ty(&[I32, I32], &[I32]);
        let log2 = b.import("TC_Log2", log_ty);
        let body = [
            0x41, 8, // data
            0x41, 32, // topic1
            0x41, 48, // topic2
            0x10, log2 as u8, 0x41, 0x00, 0x0b,
        ];
        let f = b.func(entry_ty, &body);
        b.memory(1)
            .data(8, b"0123456789\0")
            .data(32, b"t1\0")
            .data(48, b"t2\0")
            .export("thunderchain_main", f);
        b.build()
    }

    /// Calls `TC_Transfer(to, amount)` with strings baked into data
    /// segments.
    pub fn transfer_contract(to: &str, amount: &str) -> Vec<u8> {
        let mut b = ModuleBuilder::new();
        let transfer_ty = b.ty(&[I32, I32], &[]);
        let entry_ty = b.ty(&[I32, I32], &[I32]);
        let transfer = b.import("TC_Transfer", transfer_ty);
        // Offsets stay below 64 so single-byte signed LEBs keep their
        // sign bit clear.
        let body = [
            0x41, 8, // to
            0x41, 56, // amount
            0x10, transfer as u8, 0x41, 0x00, 0x0b,
        ];
        let f = b.func(entry_ty, &body);
        let mut to_z = to.as_bytes().to_vec();
        to_z.push(0);
        let mut amount_z = amount.as_bytes().to_vec();
        amount_z.push(0);
        b.memory(1)
            .data(8, &to_z)
            .data(56, &amount_z)
            .export("thunderchain_main", f);
        b.build()
    }

    /// Entry with a block + br_if and an arithmetic tail; returns a
    /// pointer to the data segment when the branch is not taken.
    pub fn branching() -> Vec<u8> {
        let mut b = ModuleBuilder::new();
        let entry_ty = b.ty(&[I32, I32], &[I32]);
        let body = [
            0x02, 0x40, // block
            0x41, 0x00, // i32.const 0
            0x0d, 0x00, // br_if 0 (never taken)
            0x0b, // end
            0x41, 8, // i32.const 8
            0x41, 0x00, // i32.const 0
            0x6a, // i32.add
            0x0b,
        ];
        let f = b.func(entry_ty, &body);
        b.memory(1).data(8, b"ok\0").export("thunderchain_main", f);
        b.build()
    }

    /// Module carrying a single data segment (decoder tests).
    pub fn with_data(bytes: &[u8]) -> Vec<u8> {
        let mut b = ModuleBuilder::new();
        let entry_ty = b.ty(&[I32, I32], &[I32]);
        let f = b.func(entry_ty, &[0x41, 0x00, 0x0b]);
        b.memory(1).data(1024, bytes).export("thunderchain_main", f);
        b.build()
    }

    /// Loop that counts down from `n`, exercising branch-back edges.
    pub fn countdown_loop(n: u8) -> Vec<u8> {
        let mut b = ModuleBuilder::new();
        let entry_ty = b.ty(&[I32, I32], &[I32]);
        // local.get 0 is the action pointer; reuse param 1 as counter.
        let body = [
            0x41, n, // i32.const n
            0x21, 0x01, // local.set 1 (counter)
            0x03, 0x40, // loop
            0x20, 0x01, // local.get 1
            0x41, 0x01, // i32.const 1
            0x6b, // i32.sub
            0x22, 0x01, // local.tee 1
            0x0d, 0x00, // br_if 0
            0x0b, // end
            0x41, 0x00, 0x0b,
        ];
        let f = b.func(entry_ty, &body);
        b.memory(1).export("thunderchain_main", f);
        b.build()
    }
}
