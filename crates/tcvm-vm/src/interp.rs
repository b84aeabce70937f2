//! Stack-machine interpreter for the decoded wasm subset.
//!
//! Values are untyped u64 slots; i32 operations use the low 32 bits.
//! Every executed instruction charges scheduled gas through the engine
//! meter, and imported functions dispatch through the host environment
//! table with the full host-call gas discipline.

use std::sync::Arc;

use crate::app::App;
use crate::engine::Engine;
use crate::error::VmError;
use crate::gas::{GAS_FASTEST_STEP, GAS_FAST_STEP, MEM_GROW_PAGE_GAS};
use crate::module::{BinOp, Instr, RelOp, UnOp};

/// Maximum wasm-level call depth.
const MAX_CALL_DEPTH: u32 = 1024;

/// Runtime control frame for structured control flow.
struct Ctl {
    is_loop: bool,
    /// Instruction index of the `loop` opcode (re-entered on branch).
    start: usize,
    /// Index of the matching `end` (branch target for blocks).
    end: usize,
    /// Operand stack depth at frame entry.
    height: usize,
    /// Values a branch to this frame carries.
    arity: usize,
}

enum Flow {
    Next,
    Jump(usize),
    Return,
}

fn trap(msg: &str) -> VmError {
    VmError::Trap(msg.to_string())
}

/// Scheduled gas for one instruction; shared with the AOT code
/// generator so both execution paths meter identically.
pub(crate) fn instr_gas(instr: &Instr) -> u64 {
    match instr {
        Instr::Call { .. } => GAS_FAST_STEP,
        Instr::Load { .. } | Instr::Store { .. } => GAS_FASTEST_STEP,
        Instr::MemoryGrow => GAS_FAST_STEP,
        _ => 1,
    }
}

/// Invoke a function in the combined (imports-first) index space.
///
/// Returns the single result value, or `None` for void functions.
pub(crate) fn call_function(
    eng: &mut Engine,
    app: &Arc<App>,
    func_idx: u32,
    args: &[u64],
    depth: u32,
) -> Result<Option<u64>, VmError> {
    if depth > MAX_CALL_DEPTH {
        return Err(trap("call stack exhausted"));
    }

    let module = Arc::clone(app.module());
    if func_idx < module.num_imports() {
        let import = &module.imports[func_idx as usize];
        let ty = module.func_type(func_idx)?;
        let ret = eng.call_host(&import.name, args)?;
        return Ok(if ty.results.is_empty() { None } else { Some(ret) });
    }

    let func = module.function(func_idx)?;
    let ty = module.func_type(func_idx)?;
    let result_arity = ty.results.len();

    let mut locals: Vec<u64> = Vec::with_capacity(ty.params.len() + func.locals.len());
    locals.extend_from_slice(args);
    locals.resize(ty.params.len() + func.locals.len(), 0);

    let mut stack: Vec<u64> = Vec::with_capacity(64);
    let mut ctl: Vec<Ctl> = Vec::new();
    let mut pc = 0usize;
    let body = &func.body;

    while pc < body.len() {
        let instr = &body[pc];
        if !eng.use_gas(instr_gas(instr)) {
            return Err(VmError::OutOfGas);
        }
        if eng.trace() {
            tracing::trace!(func = func_idx, pc, ?instr, stack = stack.len(), "step");
        }

        let flow = step(eng, app, instr, pc, &mut stack, &mut ctl, &mut locals, depth)?;
        match flow {
            Flow::Next => pc += 1,
            Flow::Jump(target) => pc = target,
            Flow::Return => break,
        }
    }

    if result_arity == 1 {
        Ok(Some(stack.pop().ok_or_else(|| trap("stack underflow"))?))
    } else {
        Ok(None)
    }
}

#[allow(clippy::too_many_arguments)]
fn step(
    eng: &mut Engine,
    app: &Arc<App>,
    instr: &Instr,
    pc: usize,
    stack: &mut Vec<u64>,
    ctl: &mut Vec<Ctl>,
    locals: &mut [u64],
    depth: u32,
) -> Result<Flow, VmError> {
    macro_rules! pop {
        () => {
            stack.pop().ok_or_else(|| trap("stack underflow"))?
        };
    }

    match instr {
        Instr::Unreachable => return Err(trap("unreachable")),
        Instr::Nop => {}
        Instr::Block { end, arity, .. } => ctl.push(Ctl {
            is_loop: false,
            start: pc,
            end: *end,
            height: stack.len(),
            arity: *arity as usize,
        }),
        Instr::Loop { .. } => ctl.push(Ctl {
            is_loop: true,
            start: pc,
            end: 0,
            height: stack.len(),
            arity: 0,
        }),
        Instr::If {
            else_or_end,
            end,
            arity,
            ..
        } => {
            let cond = pop!();
            ctl.push(Ctl {
                is_loop: false,
                start: pc,
                end: *end,
                height: stack.len(),
                arity: *arity as usize,
            });
            if cond as u32 == 0 {
                let target = if *else_or_end != *end {
                    *else_or_end + 1
                } else {
                    *end
                };
                return Ok(Flow::Jump(target));
            }
        }
        Instr::Else { end } => {
            // Fallen out of the then-branch; skip to the matching end.
            return Ok(Flow::Jump(*end));
        }
        Instr::End => {
            if ctl.pop().is_none() {
                return Ok(Flow::Return);
            }
        }
        Instr::Br { depth: d } => return branch(stack, ctl, *d),
        Instr::BrIf { depth: d } => {
            if pop!() as u32 != 0 {
                return branch(stack, ctl, *d);
            }
        }
        Instr::BrTable { targets, default } => {
            let index = pop!() as u32 as usize;
            let d = targets.get(index).copied().unwrap_or(*default);
            return branch(stack, ctl, d);
        }
        Instr::Return => return Ok(Flow::Return),
        Instr::Call { func } => {
            let ty = app.module().func_type(*func)?.clone();
            let nparams = ty.params.len();
            if stack.len() < nparams {
                return Err(trap("stack underflow"));
            }
            let args = stack.split_off(stack.len() - nparams);
            let ret = call_function(eng, app, *func, &args, depth + 1)?;
            if !ty.results.is_empty() {
                stack.push(ret.unwrap_or(0));
            }
        }
        Instr::Drop => {
            pop!();
        }
        Instr::Select => {
            let cond = pop!();
            let b = pop!();
            let a = pop!();
            stack.push(if cond as u32 != 0 { a } else { b });
        }
        Instr::LocalGet(i) => {
            let v = *locals
                .get(*i as usize)
                .ok_or_else(|| trap("local index out of range"))?;
            stack.push(v);
        }
        Instr::LocalSet(i) => {
            let v = pop!();
            *locals
                .get_mut(*i as usize)
                .ok_or_else(|| trap("local index out of range"))? = v;
        }
        Instr::LocalTee(i) => {
            let v = *stack.last().ok_or_else(|| trap("stack underflow"))?;
            *locals
                .get_mut(*i as usize)
                .ok_or_else(|| trap("local index out of range"))? = v;
        }
        Instr::GlobalGet(i) => {
            let globals = app.globals().lock();
            let v = *globals
                .get(*i as usize)
                .ok_or_else(|| trap("global index out of range"))?;
            drop(globals);
            stack.push(v);
        }
        Instr::GlobalSet(i) => {
            let v = pop!();
            let mut globals = app.globals().lock();
            *globals
                .get_mut(*i as usize)
                .ok_or_else(|| trap("global index out of range"))? = v;
        }
        Instr::Load {
            offset,
            width,
            signed,
            wide,
        } => {
            let addr = pop!() as u32 as u64 + *offset as u64;
            let raw = app.memory().lock().load(addr, *width as usize)?;
            let mut value = if *signed {
                match width {
                    1 => raw as u8 as i8 as i64 as u64,
                    2 => raw as u16 as i16 as i64 as u64,
                    4 => raw as u32 as i32 as i64 as u64,
                    _ => raw,
                }
            } else {
                raw
            };
            if !*wide {
                value &= 0xffff_ffff;
            }
            stack.push(value);
        }
        Instr::Store { offset, width } => {
            let value = pop!();
            let addr = pop!() as u32 as u64 + *offset as u64;
            app.memory().lock().store(addr, *width as usize, value)?;
        }
        Instr::MemorySize => {
            let pages = app.memory().lock().pages();
            stack.push(pages as u64);
        }
        Instr::MemoryGrow => {
            let delta = pop!() as u32;
            if !eng.use_gas((delta as u64).saturating_mul(MEM_GROW_PAGE_GAS)) {
                return Err(VmError::OutOfGas);
            }
            let old = app.memory().lock().grow_pages(delta);
            stack.push(old.map(|p| p as u64).unwrap_or(u32::MAX as u64));
        }
        Instr::I32Const(v) => stack.push(*v as u32 as u64),
        Instr::I64Const(v) => stack.push(*v as u64),
        Instr::Eqz { wide } => {
            let v = pop!();
            let zero = if *wide { v == 0 } else { v as u32 == 0 };
            stack.push(zero as u64);
        }
        Instr::Rel { op, wide } => {
            let b = pop!();
            let a = pop!();
            let r = if *wide {
                rel64(*op, a, b)
            } else {
                rel32(*op, a as u32, b as u32)
            };
            stack.push(r as u64);
        }
        Instr::Bin { op, wide } => {
            let b = pop!();
            let a = pop!();
            let r = if *wide {
                bin64(*op, a, b)?
            } else {
                bin32(*op, a as u32, b as u32)? as u64
            };
            stack.push(r);
        }
        Instr::Un { op, wide } => {
            let v = pop!();
            let r = if *wide {
                un64(*op, v)
            } else {
                un32(*op, v as u32) as u64
            };
            stack.push(r);
        }
        Instr::I32WrapI64 => {
            let v = pop!();
            stack.push(v & 0xffff_ffff);
        }
        Instr::I64ExtendI32S => {
            let v = pop!();
            stack.push(v as u32 as i32 as i64 as u64);
        }
        Instr::I64ExtendI32U => {
            let v = pop!();
            stack.push(v as u32 as u64);
        }
        Instr::Extend { from_width, wide } => {
            let v = pop!();
            let extended = match from_width {
                1 => v as u8 as i8 as i64 as u64,
                2 => v as u16 as i16 as i64 as u64,
                _ => v as u32 as i32 as i64 as u64,
            };
            stack.push(if *wide {
                extended
            } else {
                extended & 0xffff_ffff
            });
        }
    }
    Ok(Flow::Next)
}

/// Unwind to the frame `depth` levels up and jump to its target.
fn branch(stack: &mut Vec<u64>, ctl: &mut Vec<Ctl>, depth: u32) -> Result<Flow, VmError> {
    let depth = depth as usize;
    if depth >= ctl.len() {
        // Branch to the function level: a return.
        return Ok(Flow::Return);
    }
    let target_idx = ctl.len() - 1 - depth;
    let (is_loop, start, end, height, arity) = {
        let t = &ctl[target_idx];
        (t.is_loop, t.start, t.end, t.height, t.arity)
    };

    if is_loop {
        // Re-enter the loop: its frame is re-pushed by the loop opcode.
        if stack.len() < height {
            return Err(trap("stack underflow"));
        }
        stack.truncate(height);
        ctl.truncate(target_idx);
        return Ok(Flow::Jump(start));
    }

    if stack.len() < height + arity {
        return Err(trap("stack underflow"));
    }
    let results = stack.split_off(stack.len() - arity);
    stack.truncate(height);
    stack.extend(results);
    // Keep the target frame; the `end` it jumps to pops it.
    ctl.truncate(target_idx + 1);
    Ok(Flow::Jump(end))
}

fn rel32(op: RelOp, a: u32, b: u32) -> bool {
    let (sa, sb) = (a as i32, b as i32);
    match op {
        RelOp::Eq => a == b,
        RelOp::Ne => a != b,
        RelOp::LtS => sa < sb,
        RelOp::LtU => a < b,
        RelOp::GtS => sa > sb,
        RelOp::GtU => a > b,
        RelOp::LeS => sa <= sb,
        RelOp::LeU => a <= b,
        RelOp::GeS => sa >= sb,
        RelOp::GeU => a >= b,
    }
}

fn rel64(op: RelOp, a: u64, b: u64) -> bool {
    let (sa, sb) = (a as i64, b as i64);
    match op {
        RelOp::Eq => a == b,
        RelOp::Ne => a != b,
        RelOp::LtS => sa < sb,
        RelOp::LtU => a < b,
        RelOp::GtS => sa > sb,
        RelOp::GtU => a > b,
        RelOp::LeS => sa <= sb,
        RelOp::LeU => a <= b,
        RelOp::GeS => sa >= sb,
        RelOp::GeU => a >= b,
    }
}

fn bin32(op: BinOp, a: u32, b: u32) -> Result<u32, VmError> {
    let (sa, sb) = (a as i32, b as i32);
    Ok(match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::DivS => {
            if sb == 0 {
                return Err(trap("integer divide by zero"));
            }
            sa.checked_div(sb).ok_or_else(|| trap("integer overflow"))? as u32
        }
        BinOp::DivU => {
            if b == 0 {
                return Err(trap("integer divide by zero"));
            }
            a / b
        }
        BinOp::RemS => {
            if sb == 0 {
                return Err(trap("integer divide by zero"));
            }
            sa.wrapping_rem(sb) as u32
        }
        BinOp::RemU => {
            if b == 0 {
                return Err(trap("integer divide by zero"));
            }
            a % b
        }
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::Shl => a.wrapping_shl(b),
        BinOp::ShrS => (sa.wrapping_shr(b)) as u32,
        BinOp::ShrU => a.wrapping_shr(b),
        BinOp::Rotl => a.rotate_left(b & 31),
        BinOp::Rotr => a.rotate_right(b & 31),
    })
}

fn bin64(op: BinOp, a: u64, b: u64) -> Result<u64, VmError> {
    let (sa, sb) = (a as i64, b as i64);
    Ok(match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::DivS => {
            if sb == 0 {
                return Err(trap("integer divide by zero"));
            }
            sa.checked_div(sb).ok_or_else(|| trap("integer overflow"))? as u64
        }
        BinOp::DivU => {
            if b == 0 {
                return Err(trap("integer divide by zero"));
            }
            a / b
        }
        BinOp::RemS => {
            if sb == 0 {
                return Err(trap("integer divide by zero"));
            }
            sa.wrapping_rem(sb) as u64
        }
        BinOp::RemU => {
            if b == 0 {
                return Err(trap("integer divide by zero"));
            }
            a % b
        }
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::Shl => a.wrapping_shl(b as u32),
        BinOp::ShrS => (sa.wrapping_shr(b as u32)) as u64,
        BinOp::ShrU => a.wrapping_shr(b as u32),
        BinOp::Rotl => a.rotate_left((b & 63) as u32),
        BinOp::Rotr => a.rotate_right((b & 63) as u32),
    })
}

fn un32(op: UnOp, v: u32) -> u32 {
    match op {
        UnOp::Clz => v.leading_zeros(),
        UnOp::Ctz => v.trailing_zeros(),
        UnOp::Popcnt => v.count_ones(),
    }
}

fn un64(op: UnOp, v: u64) -> u64 {
    match op {
        UnOp::Clz => v.leading_zeros() as u64,
        UnOp::Ctz => v.trailing_zeros() as u64,
        UnOp::Popcnt => v.count_ones() as u64,
    }
}
