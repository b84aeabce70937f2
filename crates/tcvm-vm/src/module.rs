//! Wasm binary decoding.
//!
//! Decodes a contract module into the structures the interpreter and the
//! AOT code generator share: function types, imports, globals, memory
//! limits, data segments, and function bodies lowered to [`Instr`] lists
//! with block/else/end offsets resolved up front.
//!
//! The runtime executes a deterministic integer subset of wasm MVP.
//! Floating-point opcodes, indirect calls, and non-function imports are
//! rejected at decode time so both execution paths stay deterministic.

use std::collections::HashMap;

use crate::error::VmError;

const WASM_MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6d];
const WASM_VERSION: u32 = 1;

/// Upper bound on declared locals per function.
const MAX_LOCALS: usize = 10_000;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ValType {
    I32,
    I64,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct FuncType {
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

#[derive(Clone, Debug)]
pub struct ImportFunc {
    pub module: String,
    pub name: String,
    pub type_idx: u32,
}

#[derive(Clone, Debug)]
pub struct Global {
    pub ty: ValType,
    pub mutable: bool,
    pub init: u64,
}

#[derive(Clone, Debug)]
pub struct DataSegment {
    pub offset: u32,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct Function {
    pub type_idx: u32,
    /// Declared locals, params excluded.
    pub locals: Vec<ValType>,
    pub body: Vec<Instr>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RelOp {
    Eq,
    Ne,
    LtS,
    LtU,
    GtS,
    GtU,
    LeS,
    LeU,
    GeS,
    GeU,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    DivS,
    DivU,
    RemS,
    RemU,
    And,
    Or,
    Xor,
    Shl,
    ShrS,
    ShrU,
    Rotl,
    Rotr,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnOp {
    Clz,
    Ctz,
    Popcnt,
}

/// Lowered instruction. Control instructions carry the index of their
/// matching `end` (and `else`) so both execution paths jump directly.
/// `height` is the operand-stack depth at block entry, recorded during
/// decode for branch unwinding.
#[derive(Clone, Debug, PartialEq)]
pub enum Instr {
    Unreachable,
    Nop,
    Block {
        end: usize,
        arity: u32,
        height: u32,
    },
    Loop {
        height: u32,
    },
    If {
        else_or_end: usize,
        end: usize,
        arity: u32,
        height: u32,
    },
    Else {
        end: usize,
    },
    End,
    Br {
        depth: u32,
    },
    BrIf {
        depth: u32,
    },
    BrTable {
        targets: Vec<u32>,
        default: u32,
    },
    Return,
    Call {
        func: u32,
    },
    Drop,
    Select,
    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(u32),
    GlobalSet(u32),
    Load {
        offset: u32,
        width: u8,
        signed: bool,
        wide: bool,
    },
    Store {
        offset: u32,
        width: u8,
    },
    MemorySize,
    MemoryGrow,
    I32Const(i32),
    I64Const(i64),
    Eqz {
        wide: bool,
    },
    Rel {
        op: RelOp,
        wide: bool,
    },
    Bin {
        op: BinOp,
        wide: bool,
    },
    Un {
        op: UnOp,
        wide: bool,
    },
    I32WrapI64,
    I64ExtendI32S,
    I64ExtendI32U,
    /// Sign-extension operators (`i32.extend8_s` family).
    Extend {
        from_width: u8,
        wide: bool,
    },
}

/// A decoded contract module.
pub struct Module {
    pub types: Vec<FuncType>,
    pub imports: Vec<ImportFunc>,
    pub functions: Vec<Function>,
    pub globals: Vec<Global>,
    exports: HashMap<String, u32>,
    pub min_pages: u32,
    pub max_pages: Option<u32>,
    pub data: Vec<DataSegment>,
}

impl Module {
    /// Decode and structurally validate a wasm binary.
    pub fn decode(code: &[u8]) -> Result<Self, VmError> {
        if code.len() < 8 {
            return Err(invalid("binary too small"));
        }
        if code[0..4] != WASM_MAGIC {
            return Err(invalid("bad magic number"));
        }
        let version = u32::from_le_bytes([code[4], code[5], code[6], code[7]]);
        if version != WASM_VERSION {
            return Err(invalid(&format!("unsupported version {version}")));
        }

        let mut module = Module {
            types: Vec::new(),
            imports: Vec::new(),
            functions: Vec::new(),
            globals: Vec::new(),
            exports: HashMap::new(),
            min_pages: 1,
            max_pages: None,
            data: Vec::new(),
        };
        let mut func_type_indices: Vec<u32> = Vec::new();

        let mut r = Reader::new(&code[8..]);
        while !r.done() {
            let id = r.byte()?;
            let size = r.u32_leb()? as usize;
            let body = r.bytes(size)?;
            let mut s = Reader::new(body);
            match id {
                1 => module.decode_types(&mut s)?,
                2 => module.decode_imports(&mut s)?,
                3 => {
                    let count = s.u32_leb()?;
                    for _ in 0..count {
                        func_type_indices.push(s.u32_leb()?);
                    }
                }
                5 => module.decode_memory(&mut s)?,
                6 => module.decode_globals(&mut s)?,
                7 => module.decode_exports(&mut s)?,
                10 => module.decode_code(&mut s, &func_type_indices)?,
                11 => module.decode_data(&mut s)?,
                // custom, table, start, element, datacount: no effect on
                // this subset (indirect calls are rejected in code bodies)
                0 | 4 | 8 | 9 | 12 => {}
                other => return Err(invalid(&format!("unknown section id {other}"))),
            }
        }

        if module.functions.len() != func_type_indices.len() {
            return Err(invalid("function and code section counts differ"));
        }
        for ty in func_type_indices {
            if ty as usize >= module.types.len() {
                return Err(invalid("function type index out of range"));
            }
        }
        Ok(module)
    }

    /// Exported function index for `name`, if any.
    pub fn export_func(&self, name: &str) -> Option<u32> {
        self.exports.get(name).copied()
    }

    pub fn num_imports(&self) -> u32 {
        self.imports.len() as u32
    }

    /// Type of a function in the combined (imports-first) index space.
    pub fn func_type(&self, func_idx: u32) -> Result<&FuncType, VmError> {
        let type_idx = if (func_idx as usize) < self.imports.len() {
            self.imports[func_idx as usize].type_idx
        } else {
            let local = func_idx as usize - self.imports.len();
            self.functions
                .get(local)
                .ok_or_else(|| invalid(&format!("function index {func_idx} out of range")))?
                .type_idx
        };
        self.types
            .get(type_idx as usize)
            .ok_or_else(|| invalid("type index out of range"))
    }

    pub fn function(&self, func_idx: u32) -> Result<&Function, VmError> {
        let local = (func_idx as usize)
            .checked_sub(self.imports.len())
            .ok_or_else(|| invalid("import index has no body"))?;
        self.functions
            .get(local)
            .ok_or_else(|| invalid(&format!("function index {func_idx} out of range")))
    }

    fn decode_types(&mut self, r: &mut Reader) -> Result<(), VmError> {
        let count = r.u32_leb()?;
        for _ in 0..count {
            if r.byte()? != 0x60 {
                return Err(invalid("expected func type"));
            }
            let mut ty = FuncType::default();
            for _ in 0..r.u32_leb()? {
                ty.params.push(val_type(r.byte()?)?);
            }
            let results = r.u32_leb()?;
            if results > 1 {
                return Err(invalid("multi-value results unsupported"));
            }
            for _ in 0..results {
                ty.results.push(val_type(r.byte()?)?);
            }
            self.types.push(ty);
        }
        Ok(())
    }

    fn decode_imports(&mut self, r: &mut Reader) -> Result<(), VmError> {
        let count = r.u32_leb()?;
        for _ in 0..count {
            let module = r.name()?;
            let name = r.name()?;
            match r.byte()? {
                0x00 => {
                    let type_idx = r.u32_leb()?;
                    self.imports.push(ImportFunc {
                        module,
                        name,
                        type_idx,
                    });
                }
                kind => {
                    return Err(invalid(&format!(
                        "import {module}.{name}: only function imports supported (kind {kind})"
                    )))
                }
            }
        }
        Ok(())
    }

    fn decode_memory(&mut self, r: &mut Reader) -> Result<(), VmError> {
        let count = r.u32_leb()?;
        if count > 1 {
            return Err(invalid("multiple memories unsupported"));
        }
        if count == 1 {
            let flags = r.byte()?;
            self.min_pages = r.u32_leb()?.max(1);
            self.max_pages = match flags {
                0x00 => None,
                0x01 => Some(r.u32_leb()?),
                _ => return Err(invalid("bad memory limits flags")),
            };
        }
        Ok(())
    }

    fn decode_globals(&mut self, r: &mut Reader) -> Result<(), VmError> {
        let count = r.u32_leb()?;
        for _ in 0..count {
            let ty = val_type(r.byte()?)?;
            let mutable = match r.byte()? {
                0x00 => false,
                0x01 => true,
                _ => return Err(invalid("bad global mutability")),
            };
            let init = match r.byte()? {
                0x41 => r.s32_leb()? as u32 as u64,
                0x42 => r.s64_leb()? as u64,
                _ => return Err(invalid("unsupported global initializer")),
            };
            if r.byte()? != 0x0b {
                return Err(invalid("unterminated global initializer"));
            }
            self.globals.push(Global { ty, mutable, init });
        }
        Ok(())
    }

    fn decode_exports(&mut self, r: &mut Reader) -> Result<(), VmError> {
        let count = r.u32_leb()?;
        for _ in 0..count {
            let name = r.name()?;
            let kind = r.byte()?;
            let index = r.u32_leb()?;
            if kind == 0x00 {
                self.exports.insert(name, index);
            }
        }
        Ok(())
    }

    fn decode_code(&mut self, r: &mut Reader, type_indices: &[u32]) -> Result<(), VmError> {
        let count = r.u32_leb()? as usize;
        if count != type_indices.len() {
            return Err(invalid("function and code section counts differ"));
        }
        for (i, &type_idx) in type_indices.iter().enumerate().take(count) {
            let size = r.u32_leb()? as usize;
            let body = r.bytes(size)?;
            let mut s = Reader::new(body);

            let mut locals = Vec::new();
            for _ in 0..s.u32_leb()? {
                let n = s.u32_leb()? as usize;
                let ty = val_type(s.byte()?)?;
                if locals.len() + n > MAX_LOCALS {
                    return Err(invalid(&format!("function {i}: too many locals")));
                }
                locals.extend(std::iter::repeat(ty).take(n));
            }

            let instrs = self.decode_body(&mut s, type_indices)?;
            self.functions.push(Function {
                type_idx,
                locals,
                body: instrs,
            });
        }
        Ok(())
    }

    fn decode_data(&mut self, r: &mut Reader) -> Result<(), VmError> {
        let count = r.u32_leb()?;
        for _ in 0..count {
            if r.u32_leb()? != 0 {
                return Err(invalid("only active data segments for memory 0 supported"));
            }
            if r.byte()? != 0x41 {
                return Err(invalid("unsupported data segment offset"));
            }
            let offset = r.s32_leb()? as u32;
            if r.byte()? != 0x0b {
                return Err(invalid("unterminated data segment offset"));
            }
            let len = r.u32_leb()? as usize;
            self.data.push(DataSegment {
                offset,
                bytes: r.bytes(len)?.to_vec(),
            });
        }
        Ok(())
    }

    /// Decode one function body, resolving structured-control offsets and
    /// recording block-entry stack heights along the way.
    fn decode_body(&mut self, r: &mut Reader, type_indices: &[u32]) -> Result<Vec<Instr>, VmError> {
        struct Ctl {
            index: usize,
            else_index: Option<usize>,
            height: u32,
            /// Values carried by a branch to this frame (0 for loops).
            arity: u32,
            /// Values left on the stack when the frame's `end` is reached.
            result_arity: u32,
            outer_unreachable: bool,
        }

        let mut instrs: Vec<Instr> = Vec::new();
        let mut ctl: Vec<Ctl> = Vec::new();
        // Virtual stack height; only advisory once a branch makes the
        // remainder of a block unreachable.
        let mut vh: u32 = 0;
        let mut unreachable = false;

        macro_rules! pop {
            ($n:expr) => {
                if !unreachable {
                    vh = vh.saturating_sub($n);
                }
            };
        }
        macro_rules! push {
            ($n:expr) => {
                if !unreachable {
                    vh += $n;
                }
            };
        }

        loop {
            let op = r.byte()?;
            let idx = instrs.len();
            match op {
                0x00 => {
                    instrs.push(Instr::Unreachable);
                    unreachable = true;
                }
                0x01 => instrs.push(Instr::Nop),
                0x02 => {
                    let arity = block_arity(r.byte()?)?;
                    ctl.push(Ctl {
                        index: idx,
                        else_index: None,
                        height: vh,
                        arity,
                        result_arity: arity,
                        outer_unreachable: unreachable,
                    });
                    instrs.push(Instr::Block {
                        end: 0,
                        arity,
                        height: vh,
                    });
                }
                0x03 => {
                    let result_arity = block_arity(r.byte()?)?;
                    ctl.push(Ctl {
                        index: idx,
                        else_index: None,
                        height: vh,
                        arity: 0,
                        result_arity,
                        outer_unreachable: unreachable,
                    });
                    instrs.push(Instr::Loop { height: vh });
                }
                0x04 => {
                    let arity = block_arity(r.byte()?)?;
                    pop!(1);
                    ctl.push(Ctl {
                        index: idx,
                        else_index: None,
                        height: vh,
                        arity,
                        result_arity: arity,
                        outer_unreachable: unreachable,
                    });
                    instrs.push(Instr::If {
                        else_or_end: 0,
                        end: 0,
                        arity,
                        height: vh,
                    });
                }
                0x05 => {
                    let frame = ctl.last_mut().ok_or_else(|| invalid("else outside if"))?;
                    if !matches!(instrs[frame.index], Instr::If { .. }) {
                        return Err(invalid("else outside if"));
                    }
                    frame.else_index = Some(idx);
                    vh = frame.height;
                    unreachable = frame.outer_unreachable;
                    if let Instr::If { else_or_end, .. } = &mut instrs[frame.index] {
                        *else_or_end = idx;
                    }
                    instrs.push(Instr::Else { end: 0 });
                }
                0x0b => {
                    instrs.push(Instr::End);
                    match ctl.pop() {
                        Some(frame) => {
                            match &mut instrs[frame.index] {
                                Instr::Block { end, .. } => *end = idx,
                                Instr::Loop { .. } => {}
                                Instr::If {
                                    else_or_end, end, ..
                                } => {
                                    *end = idx;
                                    if frame.else_index.is_none() {
                                        *else_or_end = idx;
                                    }
                                }
                                _ => return Err(invalid("corrupt control stack")),
                            }
                            if let Some(else_idx) = frame.else_index {
                                if let Instr::Else { end } = &mut instrs[else_idx] {
                                    *end = idx;
                                }
                            }
                            vh = frame.height + frame.result_arity;
                            unreachable = frame.outer_unreachable;
                        }
                        None => return Ok(instrs), // function end
                    }
                }
                0x0c => {
                    let depth = r.u32_leb()?;
                    instrs.push(Instr::Br { depth });
                    unreachable = true;
                }
                0x0d => {
                    pop!(1);
                    instrs.push(Instr::BrIf {
                        depth: r.u32_leb()?,
                    });
                }
                0x0e => {
                    let count = r.u32_leb()?;
                    let mut targets = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        targets.push(r.u32_leb()?);
                    }
                    let default = r.u32_leb()?;
                    instrs.push(Instr::BrTable { targets, default });
                    unreachable = true;
                }
                0x0f => {
                    instrs.push(Instr::Return);
                    unreachable = true;
                }
                0x10 => {
                    let func = r.u32_leb()?;
                    let ty = self.call_type(func, type_indices)?;
                    pop!(ty.params.len() as u32);
                    push!(ty.results.len() as u32);
                    instrs.push(Instr::Call { func });
                }
                0x11 => return Err(invalid("call_indirect unsupported")),
                0x1a => {
                    pop!(1);
                    instrs.push(Instr::Drop);
                }
                0x1b => {
                    pop!(2);
                    instrs.push(Instr::Select);
                }
                0x20 => {
                    push!(1);
                    instrs.push(Instr::LocalGet(r.u32_leb()?));
                }
                0x21 => {
                    pop!(1);
                    instrs.push(Instr::LocalSet(r.u32_leb()?));
                }
                0x22 => instrs.push(Instr::LocalTee(r.u32_leb()?)),
                0x23 => {
                    push!(1);
                    instrs.push(Instr::GlobalGet(r.u32_leb()?));
                }
                0x24 => {
                    pop!(1);
                    instrs.push(Instr::GlobalSet(r.u32_leb()?));
                }
                0x28..=0x35 => {
                    let (width, signed, wide) = match op {
                        0x28 => (4, false, false),
                        0x29 => (8, false, true),
                        0x2c => (1, true, false),
                        0x2d => (1, false, false),
                        0x2e => (2, true, false),
                        0x2f => (2, false, false),
                        0x30 => (1, true, true),
                        0x31 => (1, false, true),
                        0x32 => (2, true, true),
                        0x33 => (2, false, true),
                        0x34 => (4, true, true),
                        0x35 => (4, false, true),
                        _ => return Err(invalid("floating point unsupported")),
                    };
                    let (_align, offset) = r.memarg()?;
                    instrs.push(Instr::Load {
                        offset,
                        width,
                        signed,
                        wide,
                    });
                }
                0x36..=0x3e => {
                    let width = match op {
                        0x36 => 4,
                        0x37 => 8,
                        0x3a => 1,
                        0x3b => 2,
                        0x3c => 1,
                        0x3d => 2,
                        0x3e => 4,
                        _ => return Err(invalid("floating point unsupported")),
                    };
                    let (_align, offset) = r.memarg()?;
                    pop!(2);
                    instrs.push(Instr::Store { offset, width });
                }
                0x3f => {
                    r.byte()?; // reserved memory index
                    push!(1);
                    instrs.push(Instr::MemorySize);
                }
                0x40 => {
                    r.byte()?;
                    instrs.push(Instr::MemoryGrow);
                }
                0x41 => {
                    push!(1);
                    instrs.push(Instr::I32Const(r.s32_leb()?));
                }
                0x42 => {
                    push!(1);
                    instrs.push(Instr::I64Const(r.s64_leb()?));
                }
                0x45 => instrs.push(Instr::Eqz { wide: false }),
                0x46..=0x4f => {
                    pop!(1);
                    instrs.push(Instr::Rel {
                        op: rel_op(op - 0x46),
                        wide: false,
                    });
                }
                0x50 => instrs.push(Instr::Eqz { wide: true }),
                0x51..=0x5a => {
                    pop!(1);
                    instrs.push(Instr::Rel {
                        op: rel_op(op - 0x51),
                        wide: true,
                    });
                }
                0x67..=0x69 => instrs.push(Instr::Un {
                    op: un_op(op - 0x67),
                    wide: false,
                }),
                0x6a..=0x78 => {
                    pop!(1);
                    instrs.push(Instr::Bin {
                        op: bin_op(op - 0x6a),
                        wide: false,
                    });
                }
                0x79..=0x7b => instrs.push(Instr::Un {
                    op: un_op(op - 0x79),
                    wide: true,
                }),
                0x7c..=0x8a => {
                    pop!(1);
                    instrs.push(Instr::Bin {
                        op: bin_op(op - 0x7c),
                        wide: true,
                    });
                }
                0xa7 => instrs.push(Instr::I32WrapI64),
                0xac => instrs.push(Instr::I64ExtendI32S),
                0xad => instrs.push(Instr::I64ExtendI32U),
                0xc0 => instrs.push(Instr::Extend {
                    from_width: 1,
                    wide: false,
                }),
                0xc1 => instrs.push(Instr::Extend {
                    from_width: 2,
                    wide: false,
                }),
                0xc2 => instrs.push(Instr::Extend {
                    from_width: 1,
                    wide: true,
                }),
                0xc3 => instrs.push(Instr::Extend {
                    from_width: 2,
                    wide: true,
                }),
                0xc4 => instrs.push(Instr::Extend {
                    from_width: 4,
                    wide: true,
                }),
                other => {
                    return Err(invalid(&format!("unsupported opcode 0x{other:02x}")));
                }
            }
        }
    }

    /// Type lookup usable while the code section is still being decoded:
    /// defined-function types come from the function section, which is
    /// always decoded first.
    fn call_type(&self, func_idx: u32, type_indices: &[u32]) -> Result<FuncType, VmError> {
        let type_idx = if (func_idx as usize) < self.imports.len() {
            self.imports[func_idx as usize].type_idx
        } else {
            *type_indices
                .get(func_idx as usize - self.imports.len())
                .ok_or_else(|| invalid(&format!("call target {func_idx} out of range")))?
        };
        self.types
            .get(type_idx as usize)
            .cloned()
            .ok_or_else(|| invalid("type index out of range"))
    }
}

fn invalid(msg: &str) -> VmError {
    VmError::InvalidModule(msg.to_string())
}

fn val_type(byte: u8) -> Result<ValType, VmError> {
    match byte {
        0x7f => Ok(ValType::I32),
        0x7e => Ok(ValType::I64),
        0x7d | 0x7c => Err(invalid("floating point unsupported")),
        other => Err(invalid(&format!("unknown value type 0x{other:02x}"))),
    }
}

fn block_arity(byte: u8) -> Result<u32, VmError> {
    match byte {
        0x40 => Ok(0),
        0x7f | 0x7e => Ok(1),
        0x7d | 0x7c => Err(invalid("floating point unsupported")),
        _ => Err(invalid("typed block signatures unsupported")),
    }
}

fn rel_op(offset: u8) -> RelOp {
    use RelOp::*;
    [Eq, Ne, LtS, LtU, GtS, GtU, LeS, LeU, GeS, GeU][offset as usize]
}

fn bin_op(offset: u8) -> BinOp {
    use BinOp::*;
    [
        Add, Sub, Mul, DivS, DivU, RemS, RemU, And, Or, Xor, Shl, ShrS, ShrU, Rotl, Rotr,
    ][offset as usize]
}

fn un_op(offset: u8) -> UnOp {
    use UnOp::*;
    [Clz, Ctz, Popcnt][offset as usize]
}

/// Little-endian byte reader with LEB128 support.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn done(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn byte(&mut self) -> Result<u8, VmError> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| invalid("unexpected end of binary"))?;
        self.pos += 1;
        Ok(b)
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], VmError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.buf.len())
            .ok_or_else(|| invalid("unexpected end of binary"))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u32_leb(&mut self) -> Result<u32, VmError> {
        let mut result: u32 = 0;
        let mut shift = 0;
        loop {
            let b = self.byte()?;
            if shift >= 32 {
                return Err(invalid("leb128 overflow"));
            }
            result |= ((b & 0x7f) as u32) << shift;
            if b & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    fn s32_leb(&mut self) -> Result<i32, VmError> {
        let mut result: i64 = 0;
        let mut shift = 0u32;
        loop {
            let b = self.byte()?;
            if shift >= 35 {
                return Err(invalid("leb128 overflow"));
            }
            result |= ((b & 0x7f) as i64) << shift;
            shift += 7;
            if b & 0x80 == 0 {
                if b & 0x40 != 0 {
                    result |= -1i64 << shift;
                }
                return Ok(result as i32);
            }
        }
    }

    fn s64_leb(&mut self) -> Result<i64, VmError> {
        let mut result: i64 = 0;
        let mut shift = 0u32;
        loop {
            let b = self.byte()?;
            if shift >= 64 {
                return Err(invalid("leb128 overflow"));
            }
            result |= ((b & 0x7f) as i64) << shift;
            shift += 7;
            if b & 0x80 == 0 {
                if shift < 64 && b & 0x40 != 0 {
                    result |= -1i64 << shift;
                }
                return Ok(result);
            }
        }
    }

    fn memarg(&mut self) -> Result<(u32, u32), VmError> {
        let align = self.u32_leb()?;
        let offset = self.u32_leb()?;
        Ok((align, offset))
    }

    fn name(&mut self) -> Result<String, VmError> {
        let len = self.u32_leb()? as usize;
        let bytes = self.bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| invalid("name is not utf-8"))
    }
}
