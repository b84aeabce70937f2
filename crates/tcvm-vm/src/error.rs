use thiserror::Error;

/// Errors surfaced by contract execution and the host API.
///
/// The first six variants are the host-call taxonomy; the `Execution*`
/// variants carry contract-initiated terminations out of native code by
/// unwinding. AOT bookkeeping failures (`Compile`, `NativeLoad`) never
/// reach contract code; they are recorded in the persisted metadata and
/// the offending address is blacklisted.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VmError {
    #[error("out of gas")]
    OutOfGas,

    #[error("gas arithmetic overflow")]
    GasOverflow,

    #[error("invalid api args")]
    InvalidApiArgs,

    #[error("memory get failed")]
    MemoryGet,

    #[error("memory set failed")]
    MemorySet,

    #[error("balance not enough")]
    BalanceNotEnough,

    #[error("contract abort")]
    ContractAbort,

    #[error("execution reverted")]
    ExecutionReverted,

    #[error("execution exit: success")]
    ExecutionExitSucc,

    #[error("execution exit: failure")]
    ExecutionExitFail,

    #[error("invalid wasm module: {0}")]
    InvalidModule(String),

    #[error("trap: {0}")]
    Trap(String),

    #[error("aot compile failed: {0}")]
    Compile(String),

    #[error("native load failed: {0}")]
    NativeLoad(String),
}
