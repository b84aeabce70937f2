//! TCVM contract execution runtime.
//!
//! This crate provides:
//! - the [`Engine`]: gas metering, frame stack, host-call dispatch
//! - a deterministic wasm-subset interpreter over in-tree decoded modules
//! - the `TC_*` host environment table with per-call gas rules
//! - the linear [`memory::MemManager`] shared with native code
//! - the [`AotService`]: compile → load → cache → evict of native
//!   artifacts with persistent metadata
//! - the native adapter bridging engine memory and gas into
//!   dynamically-loaded artifacts

pub mod aot;
pub mod app;
pub mod contract;
pub mod ctx;
pub mod engine;
pub mod env;
pub mod error;
pub mod gas;
pub mod host;
pub mod memory;
pub mod module;
pub mod native;
pub mod testutil;

mod interp;

pub use aot::{AotConfig, AotService, ContractInfo, RefreshTask};
pub use app::App;
pub use contract::Contract;
pub use ctx::{BlockContext, ChainContext, EmptyChain};
pub use engine::{Engine, APP_ENTRY};
pub use env::{EnvFunc, EnvTable};
pub use error::VmError;
pub use host::crypto::CHAIN_ID;
pub use module::Module;
pub use native::Native;
