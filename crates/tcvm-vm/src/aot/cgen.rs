//! C source generation for AOT compilation.
//!
//! Lowers a decoded module to a non-optimizing C translation: one
//! function per wasm function running over an explicit value stack,
//! structured control flow as labels and gotos, host imports as `GoFunc`
//! upcalls, and gas charged per instruction into the shared `vm_t`
//! struct so both execution paths meter identically.

use std::path::{Path, PathBuf};
use std::process::Command;

use md5::{Digest, Md5};
use tracing::debug;

use crate::engine::APP_ENTRY;
use crate::error::VmError;
use crate::interp::instr_gas;
use crate::module::{BinOp, Function, Instr, Module, RelOp, UnOp};

/// C value-stack depth per function frame.
const STACK_DEPTH: usize = 1024;

const PRELUDE: &str = r#"#include <stdint.h>
#include <string.h>

typedef struct {
    void *ctx;
    uint64_t gas_limit;
    uint64_t gas_used;
    int32_t pages;
    uint8_t *mem;
} vm_t;

extern uint64_t GoFunc(vm_t *vm, const char *name, int32_t argn, const uint64_t *argv);
extern void GoPanic(vm_t *vm, const char *msg);
extern void GoRevert(vm_t *vm, const char *msg);
extern void GoExit(vm_t *vm, int32_t status);
extern void GoGrowMemory(vm_t *vm, int32_t pages);

static void use_gas(vm_t *vm, uint64_t cost) {
    vm->gas_used += cost;
    if (vm->gas_used > vm->gas_limit) {
        GoPanic(vm, "OutOfGas");
    }
}

static uint8_t *mem_ptr(vm_t *vm, uint64_t addr, uint32_t len) {
    uint64_t size = (uint64_t)(uint32_t)vm->pages * 65536u;
    if (addr + len > size) {
        GoPanic(vm, "memory access out of bounds");
    }
    return vm->mem + addr;
}
"#;

/// Generate the C translation of `module`.
pub fn generate(module: &Module) -> Result<String, VmError> {
    let entry = module
        .export_func(APP_ENTRY)
        .ok_or_else(|| VmError::Compile("module has no entry export".to_string()))?;
    if (entry as usize) < module.imports.len() {
        return Err(VmError::Compile("entry export is an import".to_string()));
    }
    for import in &module.imports {
        if !import
            .name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            return Err(VmError::Compile(format!(
                "unsupported import name {:?}",
                import.name
            )));
        }
    }

    let mut out = String::with_capacity(16 * 1024);
    out.push_str(PRELUDE);
    out.push('\n');

    for (i, global) in module.globals.iter().enumerate() {
        out.push_str(&format!("static uint64_t g{i} = {}ULL;\n", global.init));
    }
    if !module.globals.is_empty() {
        out.push('\n');
    }

    // Forward declarations for the whole defined-function space.
    for local_idx in 0..module.functions.len() {
        let global_idx = module.num_imports() + local_idx as u32;
        out.push_str(&format!("{};\n", signature(module, global_idx)?));
    }
    out.push('\n');

    for (local_idx, func) in module.functions.iter().enumerate() {
        let global_idx = module.num_imports() + local_idx as u32;
        emit_function(&mut out, module, global_idx, func)?;
        out.push('\n');
    }

    // Exported entry wrapper over the generated function.
    out.push_str(&format!(
        "uint32_t {APP_ENTRY}(vm_t *vm, uint32_t action, uint32_t args) {{\n    \
         return (uint32_t)f{entry}(vm, (uint64_t)action, (uint64_t)args);\n}}\n"
    ));

    Ok(out)
}

/// Compile generated source into `<root>/<name>.so`, returning the
/// artifact path and the MD5 of the source that produced it.
pub fn compile(
    source: &str,
    root: &Path,
    name: &str,
    keep_csource: bool,
) -> Result<(PathBuf, [u8; 16]), VmError> {
    let c_path = root.join(format!("{name}.c"));
    let so_path = root.join(format!("{name}.so"));

    std::fs::write(&c_path, source)
        .map_err(|err| VmError::Compile(format!("write {}: {err}", c_path.display())))?;

    let cc = std::env::var("CC").unwrap_or_else(|_| "cc".to_string());
    let output = Command::new(&cc)
        .arg("-O2")
        .arg("-shared")
        .arg("-fPIC")
        .arg("-o")
        .arg(&so_path)
        .arg(&c_path)
        .output()
        .map_err(|err| VmError::Compile(format!("spawn {cc}: {err}")))?;

    if !keep_csource {
        let _ = std::fs::remove_file(&c_path);
    }
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(VmError::Compile(format!("{cc}: {}", stderr.trim())));
    }

    let mut md5 = [0u8; 16];
    md5.copy_from_slice(&Md5::digest(source.as_bytes()));
    debug!(artifact = %so_path.display(), "compiled contract");
    Ok((so_path, md5))
}

fn signature(module: &Module, global_idx: u32) -> Result<String, VmError> {
    let ty = module.func_type(global_idx)?;
    let params: Vec<String> = (0..ty.params.len()).map(|i| format!("uint64_t p{i}")).collect();
    let params = if params.is_empty() {
        String::new()
    } else {
        format!(", {}", params.join(", "))
    };
    Ok(format!("static uint64_t f{global_idx}(vm_t *vm{params})"))
}

struct EmitCtl {
    is_loop: bool,
    start: usize,
    end: usize,
    height: u32,
    arity: u32,
}

fn emit_function(
    out: &mut String,
    module: &Module,
    global_idx: u32,
    func: &Function,
) -> Result<(), VmError> {
    let ty = module.func_type(global_idx)?;
    let fn_results = ty.results.len();
    let total_locals = (ty.params.len() + func.locals.len()).max(1);

    out.push_str(&format!("{} {{\n", signature(module, global_idx)?));
    out.push_str(&format!(
        "    uint64_t loc[{total_locals}];\n    uint64_t st[{STACK_DEPTH}];\n    int32_t sp = 0;\n"
    ));
    out.push_str("    memset(loc, 0, sizeof(loc));\n");
    for i in 0..ty.params.len() {
        out.push_str(&format!("    loc[{i}] = p{i};\n"));
    }

    let mut ctl: Vec<EmitCtl> = Vec::new();
    for (i, instr) in func.body.iter().enumerate() {
        out.push_str(&format!("L{i}: ;\n"));
        out.push_str(&format!("    use_gas(vm, {});\n", instr_gas(instr)));
        emit_instr(out, module, instr, i, &mut ctl, fn_results)?;
    }

    if fn_results == 1 {
        out.push_str("    return sp > 0 ? st[sp - 1] : 0;\n");
    } else {
        out.push_str("    return 0;\n");
    }
    out.push_str("}\n");
    Ok(())
}

/// Statement sequence realizing a branch of `depth` levels.
fn branch_code(ctl: &[EmitCtl], depth: u32, fn_results: usize) -> String {
    let depth = depth as usize;
    if depth >= ctl.len() {
        return if fn_results == 1 {
            "return sp > 0 ? st[sp - 1] : 0;".to_string()
        } else {
            "return 0;".to_string()
        };
    }
    let target = &ctl[ctl.len() - 1 - depth];
    if target.is_loop {
        return format!("sp = {}; goto L{};", target.height, target.start);
    }
    let (h, a, end) = (target.height, target.arity, target.end);
    if a == 0 {
        format!("sp = {h}; goto L{end};")
    } else {
        format!(
            "memmove(&st[{h}], &st[sp - {a}], {a} * sizeof(uint64_t)); sp = {h} + {a}; goto L{end};"
        )
    }
}

fn emit_instr(
    out: &mut String,
    module: &Module,
    instr: &Instr,
    i: usize,
    ctl: &mut Vec<EmitCtl>,
    fn_results: usize,
) -> Result<(), VmError> {
    match instr {
        Instr::Unreachable => {
            out.push_str("    GoPanic(vm, \"unreachable\");\n    return 0;\n");
        }
        Instr::Nop => {}
        Instr::Block { end, arity, height } => {
            ctl.push(EmitCtl {
                is_loop: false,
                start: i,
                end: *end,
                height: *height,
                arity: *arity,
            });
        }
        Instr::Loop { height } => {
            ctl.push(EmitCtl {
                is_loop: true,
                start: i,
                end: 0,
                height: *height,
                arity: 0,
            });
        }
        Instr::If {
            else_or_end,
            end,
            arity,
            height,
        } => {
            let else_target = if else_or_end != end {
                else_or_end + 1
            } else {
                *end
            };
            out.push_str(&format!(
                "    if ((uint32_t)st[--sp] == 0) goto L{else_target};\n"
            ));
            ctl.push(EmitCtl {
                is_loop: false,
                start: i,
                end: *end,
                height: *height,
                arity: *arity,
            });
        }
        Instr::Else { end } => {
            out.push_str(&format!("    goto L{end};\n"));
        }
        Instr::End => {
            ctl.pop();
        }
        Instr::Br { depth } => {
            out.push_str(&format!("    {}\n", branch_code(ctl, *depth, fn_results)));
        }
        Instr::BrIf { depth } => {
            out.push_str(&format!(
                "    if ((uint32_t)st[--sp]) {{ {} }}\n",
                branch_code(ctl, *depth, fn_results)
            ));
        }
        Instr::BrTable { targets, default } => {
            out.push_str("    { uint32_t _i = (uint32_t)st[--sp]; switch (_i) {\n");
            for (case, depth) in targets.iter().enumerate() {
                out.push_str(&format!(
                    "    case {case}: {}\n",
                    branch_code(ctl, *depth, fn_results)
                ));
            }
            out.push_str(&format!(
                "    default: {}\n    }} }}\n",
                branch_code(ctl, *default, fn_results)
            ));
        }
        Instr::Return => {
            if fn_results == 1 {
                out.push_str("    return sp > 0 ? st[sp - 1] : 0;\n");
            } else {
                out.push_str("    return 0;\n");
            }
        }
        Instr::Call { func } => {
            let ty = module.func_type(*func)?;
            let (nparams, nresults) = (ty.params.len(), ty.results.len());
            if (*func as usize) < module.imports.len() {
                let name = &module.imports[*func as usize].name;
                out.push_str(&format!(
                    "    {{ uint64_t a_[{}];\n",
                    nparams.max(1)
                ));
                for k in (0..nparams).rev() {
                    out.push_str(&format!("      a_[{k}] = st[--sp];\n"));
                }
                out.push_str(&format!(
                    "      uint64_t r_ = GoFunc(vm, \"{name}\", {nparams}, a_);\n"
                ));
                if nresults == 1 {
                    out.push_str("      st[sp++] = r_;\n");
                } else {
                    out.push_str("      (void)r_;\n");
                }
                out.push_str("    }\n");
            } else {
                out.push_str("    {\n");
                for k in (0..nparams).rev() {
                    out.push_str(&format!("      uint64_t a{k} = st[--sp];\n"));
                }
                let args: Vec<String> = (0..nparams).map(|k| format!("a{k}")).collect();
                let args = if args.is_empty() {
                    String::new()
                } else {
                    format!(", {}", args.join(", "))
                };
                out.push_str(&format!("      uint64_t r_ = f{func}(vm{args});\n"));
                if nresults == 1 {
                    out.push_str("      st[sp++] = r_;\n");
                } else {
                    out.push_str("      (void)r_;\n");
                }
                out.push_str("    }\n");
            }
        }
        Instr::Drop => out.push_str("    sp--;\n"),
        Instr::Select => out.push_str(
            "    { uint64_t c_ = st[--sp]; uint64_t b_ = st[--sp]; uint64_t a_ = st[--sp]; \
             st[sp++] = ((uint32_t)c_ ? a_ : b_); }\n",
        ),
        Instr::LocalGet(idx) => out.push_str(&format!("    st[sp++] = loc[{idx}];\n")),
        Instr::LocalSet(idx) => out.push_str(&format!("    loc[{idx}] = st[--sp];\n")),
        Instr::LocalTee(idx) => out.push_str(&format!("    loc[{idx}] = st[sp - 1];\n")),
        Instr::GlobalGet(idx) => out.push_str(&format!("    st[sp++] = g{idx};\n")),
        Instr::GlobalSet(idx) => out.push_str(&format!("    g{idx} = st[--sp];\n")),
        Instr::Load {
            offset,
            width,
            signed,
            wide,
        } => {
            out.push_str(&format!(
                "    {{ uint64_t addr_ = (uint64_t)(uint32_t)st[--sp] + {offset}u;\n      \
                 uint64_t v_ = 0; memcpy(&v_, mem_ptr(vm, addr_, {width}), {width});\n"
            ));
            if *signed {
                let cast = match width {
                    1 => "int8_t",
                    2 => "int16_t",
                    _ => "int32_t",
                };
                out.push_str(&format!("      v_ = (uint64_t)(int64_t)({cast})v_;\n"));
            }
            if !*wide {
                out.push_str("      v_ &= 0xffffffffULL;\n");
            }
            out.push_str("      st[sp++] = v_; }\n");
        }
        Instr::Store { offset, width } => {
            out.push_str(&format!(
                "    {{ uint64_t v_ = st[--sp]; uint64_t addr_ = (uint64_t)(uint32_t)st[--sp] + {offset}u;\n      \
                 memcpy(mem_ptr(vm, addr_, {width}), &v_, {width}); }}\n"
            ));
        }
        Instr::MemorySize => {
            out.push_str("    st[sp++] = (uint64_t)(uint32_t)vm->pages;\n");
        }
        Instr::MemoryGrow => {
            out.push_str(
                "    { uint32_t d_ = (uint32_t)st[--sp]; int32_t old_ = vm->pages; \
                 GoGrowMemory(vm, (int32_t)d_); st[sp++] = (uint64_t)(uint32_t)old_; }\n",
            );
        }
        Instr::I32Const(v) => {
            out.push_str(&format!("    st[sp++] = {}ULL;\n", *v as u32));
        }
        Instr::I64Const(v) => {
            out.push_str(&format!("    st[sp++] = {}ULL;\n", *v as u64));
        }
        Instr::Eqz { wide } => {
            if *wide {
                out.push_str("    st[sp - 1] = (st[sp - 1] == 0);\n");
            } else {
                out.push_str("    st[sp - 1] = ((uint32_t)st[sp - 1] == 0);\n");
            }
        }
        Instr::Rel { op, wide } => {
            let (u, s) = if *wide {
                ("uint64_t", "int64_t")
            } else {
                ("uint32_t", "int32_t")
            };
            let expr = match op {
                RelOp::Eq => format!("({u})a_ == ({u})b_"),
                RelOp::Ne => format!("({u})a_ != ({u})b_"),
                RelOp::LtS => format!("({s})a_ < ({s})b_"),
                RelOp::LtU => format!("({u})a_ < ({u})b_"),
                RelOp::GtS => format!("({s})a_ > ({s})b_"),
                RelOp::GtU => format!("({u})a_ > ({u})b_"),
                RelOp::LeS => format!("({s})a_ <= ({s})b_"),
                RelOp::LeU => format!("({u})a_ <= ({u})b_"),
                RelOp::GeS => format!("({s})a_ >= ({s})b_"),
                RelOp::GeU => format!("({u})a_ >= ({u})b_"),
            };
            out.push_str(&format!(
                "    {{ uint64_t b_ = st[--sp]; uint64_t a_ = st[--sp]; st[sp++] = ({expr}); }}\n"
            ));
        }
        Instr::Bin { op, wide } => emit_bin(out, *op, *wide),
        Instr::Un { op, wide } => {
            let expr = match (op, wide) {
                (UnOp::Clz, false) => "(a_ ? (uint64_t)__builtin_clz((uint32_t)a_) : 32)",
                (UnOp::Ctz, false) => "(a_ ? (uint64_t)__builtin_ctz((uint32_t)a_) : 32)",
                (UnOp::Popcnt, false) => "(uint64_t)__builtin_popcount((uint32_t)a_)",
                (UnOp::Clz, true) => "(a_ ? (uint64_t)__builtin_clzll(a_) : 64)",
                (UnOp::Ctz, true) => "(a_ ? (uint64_t)__builtin_ctzll(a_) : 64)",
                (UnOp::Popcnt, true) => "(uint64_t)__builtin_popcountll(a_)",
            };
            let mask = if *wide { "" } else { " & 0xffffffffULL" };
            out.push_str(&format!(
                "    {{ uint64_t a_ = {}st[sp - 1]{}; st[sp - 1] = {expr}; }}\n",
                if *wide { "" } else { "(uint32_t)" },
                mask.trim_end()
            ));
        }
        Instr::I32WrapI64 => out.push_str("    st[sp - 1] &= 0xffffffffULL;\n"),
        Instr::I64ExtendI32S => {
            out.push_str("    st[sp - 1] = (uint64_t)(int64_t)(int32_t)(uint32_t)st[sp - 1];\n");
        }
        Instr::I64ExtendI32U => {
            out.push_str("    st[sp - 1] = (uint64_t)(uint32_t)st[sp - 1];\n");
        }
        Instr::Extend { from_width, wide } => {
            let cast = match from_width {
                1 => "int8_t",
                2 => "int16_t",
                _ => "int32_t",
            };
            out.push_str(&format!(
                "    st[sp - 1] = (uint64_t)(int64_t)({cast})st[sp - 1];\n"
            ));
            if !*wide {
                out.push_str("    st[sp - 1] &= 0xffffffffULL;\n");
            }
        }
    }
    Ok(())
}

fn emit_bin(out: &mut String, op: BinOp, wide: bool) {
    let (u, s) = if wide {
        ("uint64_t", "int64_t")
    } else {
        ("uint32_t", "int32_t")
    };
    let shift_mask = if wide { 63 } else { 31 };
    let bits = if wide { 64 } else { 32 };

    let body = match op {
        BinOp::Add => format!("r_ = (uint64_t)(({u})a_ + ({u})b_);"),
        BinOp::Sub => format!("r_ = (uint64_t)(({u})a_ - ({u})b_);"),
        BinOp::Mul => format!("r_ = (uint64_t)(({u})a_ * ({u})b_);"),
        BinOp::DivS => format!(
            "if (({u})b_ == 0) GoPanic(vm, \"Abort\"); \
             if (({s})a_ == {min} && ({s})b_ == -1) GoPanic(vm, \"Abort\"); \
             r_ = (uint64_t)({u})(({s})a_ / ({s})b_);",
            min = if wide { "INT64_MIN" } else { "INT32_MIN" },
        ),
        BinOp::DivU => format!(
            "if (({u})b_ == 0) GoPanic(vm, \"Abort\"); r_ = (uint64_t)(({u})a_ / ({u})b_);"
        ),
        BinOp::RemS => format!(
            "if (({u})b_ == 0) GoPanic(vm, \"Abort\"); \
             r_ = (({s})b_ == -1) ? 0 : (uint64_t)({u})(({s})a_ % ({s})b_);"
        ),
        BinOp::RemU => format!(
            "if (({u})b_ == 0) GoPanic(vm, \"Abort\"); r_ = (uint64_t)(({u})a_ % ({u})b_);"
        ),
        BinOp::And => "r_ = a_ & b_;".to_string(),
        BinOp::Or => "r_ = a_ | b_;".to_string(),
        BinOp::Xor => "r_ = a_ ^ b_;".to_string(),
        BinOp::Shl => format!("r_ = (uint64_t)(({u})a_ << (b_ & {shift_mask}));"),
        BinOp::ShrS => format!("r_ = (uint64_t)({u})(({s})a_ >> (b_ & {shift_mask}));"),
        BinOp::ShrU => format!("r_ = (uint64_t)(({u})a_ >> (b_ & {shift_mask}));"),
        BinOp::Rotl => format!(
            "{{ uint32_t n_ = b_ & {shift_mask}; {u} x_ = ({u})a_; \
             r_ = (uint64_t)({u})(n_ ? ((x_ << n_) | (x_ >> ({bits} - n_))) : x_); }}"
        ),
        BinOp::Rotr => format!(
            "{{ uint32_t n_ = b_ & {shift_mask}; {u} x_ = ({u})a_; \
             r_ = (uint64_t)({u})(n_ ? ((x_ >> n_) | (x_ << ({bits} - n_))) : x_); }}"
        ),
    };

    let mask = if wide { "" } else { " r_ &= 0xffffffffULL;" };
    out.push_str(&format!(
        "    {{ uint64_t b_ = st[--sp]; uint64_t a_ = st[--sp]; uint64_t r_ = 0; {body}{mask} st[sp++] = r_; }}\n"
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Module;
    use crate::testutil::wat;

    #[test]
    fn test_generate_trivial() {
        let module = Module::decode(&wat::trivial_returner()).unwrap();
        let source = generate(&module).unwrap();
        assert!(source.contains("uint32_t thunderchain_main(vm_t *vm"));
        assert!(source.contains("use_gas(vm, 1);"));
        assert!(source.contains("static uint64_t f0(vm_t *vm"));
    }

    #[test]
    fn test_generate_emits_host_upcalls() {
        let module = Module::decode(&wat::storage_set_get()).unwrap();
        let source = generate(&module).unwrap();
        assert!(source.contains("GoFunc(vm, \"TC_StorageSetString\", 2, a_)"));
        assert!(source.contains("GoFunc(vm, \"TC_StorageGetString\", 1, a_)"));
    }

    #[test]
    fn test_generate_requires_entry() {
        let module = Module::decode(b"\0asm\x01\x00\x00\x00").unwrap();
        assert!(matches!(generate(&module), Err(VmError::Compile(_))));
    }

    #[test]
    fn test_generate_branching_has_labels() {
        let module = Module::decode(&wat::branching()).unwrap();
        let source = generate(&module).unwrap();
        assert!(source.contains("L0: ;"));
        assert!(source.contains("goto L"));
    }

    #[test]
    fn test_compile_with_system_cc() {
        if !cc_available() {
            eprintln!("skipping: no C compiler on this host");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let module = Module::decode(&wat::trivial_returner()).unwrap();
        let source = generate(&module).unwrap();

        let (so, md5) = compile(&source, dir.path(), "0xabc", true).unwrap();
        assert!(so.exists());
        assert!(dir.path().join("0xabc.c").exists());
        assert_eq!(&Md5::digest(source.as_bytes())[..], &md5[..]);

        // keep_csource = false removes the intermediate source.
        let (_so2, _) = compile(&source, dir.path(), "0xdef", false).unwrap();
        assert!(!dir.path().join("0xdef.c").exists());
    }

    #[test]
    fn test_compile_reports_cc_errors() {
        if !cc_available() {
            eprintln!("skipping: no C compiler on this host");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let err = compile("this is not C", dir.path(), "0xbad", false).unwrap_err();
        assert!(matches!(err, VmError::Compile(_)));
    }

    fn cc_available() -> bool {
        let cc = std::env::var("CC").unwrap_or_else(|_| "cc".to_string());
        Command::new(cc)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}
