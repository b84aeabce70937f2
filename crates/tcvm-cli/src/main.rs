//! TCVM command-line driver.
//!
//! Runs a wasm contract from a hex bytecode file against an in-memory
//! state: first the construction entry (`Init|{}`), then, when `--call`
//! is given, the requested call. Results are read back from the
//! contract's linear memory and printed with gas accounting.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use bytes::Bytes;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tcvm_state::{MemoryState, StateDB};
use tcvm_types::{keccak256, keccak256_hash, Address, Header, U256};
use tcvm_vm::{AotConfig, AotService, BlockContext, Contract, EmptyChain, Engine};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "tcvm")]
#[command(about = "Run a wasm contract under the TCVM runtime")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// File with `0x`-prefixed hex wasm bytecode
    #[arg(long)]
    file: String,

    /// Called function and data: a parameter file path or a literal
    /// `funcName|{...json...}` string
    #[arg(long)]
    call: Option<String>,

    /// Contract message gas
    #[arg(long, default_value_t = 52_100)]
    gas: u64,

    /// Contract message value
    #[arg(long, default_value_t = 0)]
    value: u64,

    /// Log filter (tracing EnvFilter syntax)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Trace every interpreted instruction
    #[arg(long)]
    trace: bool,

    /// Disable the background AOT service
    #[arg(long)]
    no_aot: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log_level)?)
        .init();

    let code = read_bytecode(&args.file)?;
    info!(len = code.len(), file = %args.file, "loaded contract code");

    // Mock identities and balances, deterministic across runs.
    let caller = derive_address(b"addr-1 for call contract");
    let callee = derive_address(b"addr-2 for contract");

    let state = Arc::new(MemoryState::new());
    state.add_balance(&caller, &U256::from_u64(987_650_000_999_999_999));
    state.add_balance(&callee, &U256::from_u64(987_650_000_555_555_555));

    let header = Header {
        number: 0,
        time: 1_565_078_742,
        coinbase: Address::EMPTY,
        gas_limit: 8_000_000,
    };
    let mut ctx = BlockContext::new(&header, Arc::new(EmptyChain), Address::EMPTY, 1000);
    ctx.origin = Address::EMPTY;
    ctx.gas_price = U256::from_u64(1999);

    let mut contract = Contract::new(caller, callee, U256::from_u64(args.value), args.gas);
    contract.set_call_code(
        Address::EMPTY,
        keccak256_hash(&code),
        Bytes::from(code.clone()),
    );
    contract.input = Bytes::from_static(b"Init|{}");
    contract.create_call = true;

    let mut engine = Engine::new(contract, Arc::clone(&state) as Arc<dyn StateDB>, ctx);
    engine.set_trace(args.trace);

    let aot = if args.no_aot {
        None
    } else {
        match AotService::start(AotConfig::from_env()) {
            Ok(service) => {
                engine.set_aot(Arc::clone(&service));
                Some(service)
            }
            Err(err) => {
                warn!(%err, "aot service unavailable; interpreting only");
                None
            }
        }
    };

    let name = callee.to_hex();

    // Phase 1: construction.
    let start = Instant::now();
    let app = engine
        .new_app(&name, &code, true)
        .context("instantiating contract for init")?;
    let parse_secs = start.elapsed().as_secs_f64();

    let ret = engine
        .run(&app, b"Init|{}")
        .context("running contract init")?;
    let out = app
        .memory()
        .lock()
        .get_string(ret)
        .context("reading init result")?;
    info!(
        gas_used = engine.gas_used(),
        gas_left = engine.gas(),
        parse_secs,
        run_secs = start.elapsed().as_secs_f64() - parse_secs,
        "init done"
    );
    println!(
        "init return[{}]: {}",
        out.len(),
        String::from_utf8_lossy(&out)
    );

    // Phase 2: the requested call, if any.
    if let Some(call) = &args.call {
        let input = read_call_input(call)?;
        info!(input = %String::from_utf8_lossy(&input), "call input");

        engine.contract_mut().input = Bytes::from(input.clone());
        engine.contract_mut().create_call = false;

        let start = Instant::now();
        let app = engine
            .new_app(&name, &code, false)
            .context("instantiating contract for call")?;
        let ret = engine.run(&app, &input).context("running contract call")?;
        let out = app
            .memory()
            .lock()
            .get_string(ret)
            .context("reading call result")?;
        info!(
            gas_used = engine.gas_used(),
            gas_left = engine.gas(),
            run_secs = start.elapsed().as_secs_f64(),
            "call done"
        );
        println!(
            "call return[{}]: {}",
            out.len(),
            String::from_utf8_lossy(&out)
        );
    } else {
        info!("init finished; pass --call to invoke a function");
    }

    if let Some(service) = aot {
        service.shutdown();
    }
    Ok(())
}

/// Read and decode a `0x`-prefixed hex bytecode file, tolerating
/// surrounding quotes and line endings.
fn read_bytecode(path: &str) -> anyhow::Result<Vec<u8>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let trimmed = raw.trim().trim_matches('"').trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let code = hex::decode(body).with_context(|| format!("decoding hex in {path}"))?;
    if code.is_empty() {
        bail!("{path} contains no bytecode");
    }
    Ok(code)
}

/// The call argument is either a parameter file or a literal
/// `funcName|{...}` string.
fn read_call_input(call: &str) -> anyhow::Result<Vec<u8>> {
    match std::fs::read(call) {
        Ok(data) => {
            let mut data = data;
            while data.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
                data.pop();
            }
            Ok(data)
        }
        Err(err) => {
            if call.contains("|{") {
                Ok(call.as_bytes().to_vec())
            } else {
                Err(err).with_context(|| format!("reading call file {call}"))
            }
        }
    }
}

fn derive_address(seed: &[u8]) -> Address {
    Address::from_slice(&keccak256(seed)[..20]).unwrap_or(Address::EMPTY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_args() {
        let args = Args::parse_from(["tcvm", "--file", "a.wasm", "--gas", "100000"]);
        assert_eq!(args.gas, 100_000);
        assert_eq!(args.value, 0);
        assert!(args.call.is_none());
        assert!(!args.trace);
    }

    #[test]
    fn test_read_call_literal() {
        let input = read_call_input("Transfer|{\"to\":\"0x01\"}").unwrap();
        assert_eq!(input, b"Transfer|{\"to\":\"0x01\"}");
        assert!(read_call_input("/no/such/file").is_err());
    }

    #[test]
    fn test_derive_address_deterministic() {
        let a = derive_address(b"addr-1 for call contract");
        let b = derive_address(b"addr-1 for call contract");
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }
}
