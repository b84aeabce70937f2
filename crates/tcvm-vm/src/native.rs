//! Native adapter: couples the engine's memory and gas to AOT-compiled
//! code.
//!
//! Compiled artifacts see the world through a plain C struct (`VmT`) and
//! a handful of named upcalls. Contract-initiated terminations and host
//! failures travel out of native frames by unwinding (`panic_any` with a
//! [`VmError`] payload) and are converted back into results at the entry
//! boundary.
//!
//! Gas has one source of truth: the engine meter. Native-side compute
//! gas (`vm.gas_used`) is folded into the meter at every upcall and at
//! exit, so the conservation invariant holds at each observable point.

use std::ffi::{c_char, c_void, CStr};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use libloading::Library;
use tracing::{debug, warn};

use crate::app::App;
use crate::engine::Engine;
use crate::error::VmError;
use crate::gas::MEM_GROW_PAGE_GAS;

/// The struct layout compiled artifacts are generated against.
#[repr(C)]
pub struct VmT {
    pub ctx: *mut c_void,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub pages: i32,
    pub mem: *mut u8,
}

/// Entry signature of a compiled artifact.
pub type MainFn = unsafe extern "C-unwind" fn(*mut VmT, u32, u32) -> u32;

/// Per-call context reachable from upcalls through `VmT.ctx`.
struct NativeCtx {
    eng: *mut Engine,
    app: *const App,
    /// Engine `gas_used` at native entry; the epoch base for syncing.
    start_used: u64,
}

/// Handle to a loaded artifact. Clones share the library; the artifact
/// unloads when the last clone drops.
pub struct Native {
    name: String,
    file: PathBuf,
    // `None` only for the stub handles unit tests fabricate.
    lib: Arc<Option<Library>>,
    last_used: Instant,
}

impl Native {
    /// Load `file` and verify it exposes the contract entry symbol.
    pub fn new(name: &str, file: &Path) -> Result<Self, VmError> {
        // Safety: the artifact was produced by our own code generator;
        // loading runs no initialization beyond libc constructors.
        let lib = unsafe { Library::new(file) }.map_err(|err| {
            VmError::NativeLoad(format!("{}: {err}", file.display()))
        })?;

        // Safety: only probing for symbol presence; the pointer is not
        // retained past this scope.
        unsafe {
            lib.get::<MainFn>(b"thunderchain_main\0").map_err(|_| {
                VmError::NativeLoad(format!("{} without entry function", file.display()))
            })?;
        }

        Ok(Self {
            name: name.to_string(),
            file: file.to_path_buf(),
            lib: Arc::new(Some(lib)),
            last_used: Instant::now(),
        })
    }

    /// Stub handle for cache-lifecycle tests; running it fails.
    #[doc(hidden)]
    pub fn stub(name: &str) -> Self {
        Self {
            name: name.to_string(),
            file: PathBuf::new(),
            lib: Arc::new(None),
            last_used: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    #[doc(hidden)]
    pub fn set_last_used(&mut self, at: Instant) {
        self.last_used = at;
    }

    /// Shallow copy sharing the loaded library, stamped fresh.
    pub fn clone_handle(&self) -> Self {
        Self {
            name: self.name.clone(),
            file: self.file.clone(),
            lib: Arc::clone(&self.lib),
            last_used: Instant::now(),
        }
    }

    /// Outstanding clones besides this one.
    pub fn user_count(&self) -> usize {
        Arc::strong_count(&self.lib) - 1
    }

    /// Run the artifact's entry over the frame's memory and gas.
    pub fn run(
        &self,
        eng: &mut Engine,
        app: &Arc<App>,
        action: &[u8],
        params: &[u8],
    ) -> Result<u64, VmError> {
        let lib = self
            .lib
            .as_ref()
            .as_ref()
            .ok_or_else(|| VmError::NativeLoad("stub native handle".to_string()))?;

        // Safety: presence was verified at load time.
        let main: libloading::Symbol<MainFn> = unsafe {
            lib.get(b"thunderchain_main\0")
                .map_err(|_| VmError::NativeLoad("entry symbol vanished".to_string()))?
        };

        let (action_off, params_off, pages, base) = {
            let mut mem = app.memory().lock();
            let action_off = mem.set_bytes(action)?;
            let params_off = mem.set_bytes(params)?;
            (action_off, params_off, mem.pages() as i32, mem.base_ptr())
        };

        let mut nctx = NativeCtx {
            eng: eng as *mut Engine,
            app: Arc::as_ptr(app),
            start_used: eng.gas_used(),
        };
        let mut vm = VmT {
            ctx: &mut nctx as *mut NativeCtx as *mut c_void,
            gas_limit: eng.gas(),
            gas_used: 0,
            pages,
            mem: base,
        };

        // Safety: vm/nctx outlive the call; the entry follows the VmT
        // protocol emitted by our code generator. Errors unwind with a
        // VmError payload which catch_unwind converts back to a Result.
        let result = panic::catch_unwind(AssertUnwindSafe(|| unsafe {
            main(&mut vm as *mut VmT, action_off as u32, params_off as u32)
        }));

        match result {
            Ok(ret) => {
                sync_native_gas(eng, &vm, nctx.start_used)?;
                debug!(app = self.name(), ret, gas_used = vm.gas_used, "native run done");
                Ok(ret as u64)
            }
            Err(payload) => {
                // Best-effort gas sync before surfacing the unwind.
                let _ = sync_native_gas(eng, &vm, nctx.start_used);
                Err(unwind_error(payload))
            }
        }
    }
}

impl std::fmt::Debug for Native {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Native")
            .field("name", &self.name)
            .field("file", &self.file)
            .field("users", &self.user_count())
            .finish()
    }
}

fn unwind_error(payload: Box<dyn std::any::Any + Send>) -> VmError {
    match payload.downcast::<VmError>() {
        Ok(err) => *err,
        Err(payload) => match payload.downcast::<String>() {
            Ok(msg) => VmError::Trap(*msg),
            Err(_) => VmError::Trap("native panic".to_string()),
        },
    }
}

/// Fold native-side compute gas into the engine meter.
fn sync_native_gas(eng: &mut Engine, vm: &VmT, start_used: u64) -> Result<(), VmError> {
    let engine_epoch = eng.gas_used().saturating_sub(start_used);
    if vm.gas_used > engine_epoch && !eng.use_gas(vm.gas_used - engine_epoch) {
        return Err(VmError::OutOfGas);
    }
    Ok(())
}

/// Re-publish the memory base into the shared struct after growth.
///
/// # Safety
/// `vm` must be the live struct of the current native call and `app` the
/// frame it runs over.
unsafe fn update_mem(vm: &mut VmT, app: &App) {
    let mut mem = app.memory().lock();
    let pages = mem.pages() as i32;
    if vm.pages != pages {
        vm.pages = pages;
        vm.mem = mem.base_ptr();
    }
}

/// # Safety
/// `vm` must be a live `VmT` handed to the current native call.
unsafe fn parts<'a>(vm: *mut VmT) -> (&'a mut VmT, &'a mut Engine, &'a App, u64) {
    let vm = &mut *vm;
    let nctx = &mut *(vm.ctx as *mut NativeCtx);
    let eng = &mut *nctx.eng;
    let app = &*nctx.app;
    (vm, eng, app, nctx.start_used)
}

/// Host-call upcall from native code.
///
/// # Safety
/// Called by generated code with the live `VmT`, a NUL-terminated host
/// name, and `argn` arguments at `argv`.
#[no_mangle]
pub unsafe extern "C-unwind" fn GoFunc(
    vm: *mut VmT,
    name: *const c_char,
    argn: i32,
    argv: *const u64,
) -> u64 {
    let (vm, eng, app, start_used) = parts(vm);
    let name = CStr::from_ptr(name).to_string_lossy().into_owned();
    let args: Vec<u64> = if argn > 0 {
        std::slice::from_raw_parts(argv, argn as usize).to_vec()
    } else {
        Vec::new()
    };

    if let Err(err) = sync_native_gas(eng, vm, start_used) {
        panic::panic_any(err);
    }

    match eng.call_host(&name, &args) {
        Ok(ret) => {
            vm.gas_used = eng.gas_used() - start_used;
            update_mem(vm, app);
            ret
        }
        Err(err) => {
            warn!(host = %name, %err, "host upcall failed");
            panic::panic_any(err)
        }
    }
}

/// Memory-growth upcall: grow by `pages` and re-publish the base.
///
/// # Safety
/// Called by generated code with the live `VmT`.
#[no_mangle]
pub unsafe extern "C-unwind" fn GoGrowMemory(vm: *mut VmT, pages: i32) {
    let (vm, eng, app, start_used) = parts(vm);
    if let Err(err) = sync_native_gas(eng, vm, start_used) {
        panic::panic_any(err);
    }
    let delta = pages.max(0) as u32;
    if !eng.use_gas((delta as u64).saturating_mul(MEM_GROW_PAGE_GAS)) {
        panic::panic_any(VmError::OutOfGas);
    }
    if app.memory().lock().grow_pages(delta).is_none() {
        panic::panic_any(VmError::MemorySet);
    }
    vm.gas_used = eng.gas_used() - start_used;
    update_mem(vm, app);
    debug!(pages = delta, "native memory grown");
}

/// Abort upcall: `"Abort"` and `"OutOfGas"` carry their dedicated
/// errors, anything else becomes a trap.
///
/// # Safety
/// Called by generated code with the live `VmT` and a NUL-terminated
/// message.
#[no_mangle]
pub unsafe extern "C-unwind" fn GoPanic(vm: *mut VmT, msg: *const c_char) {
    let (vm, eng, _app, start_used) = parts(vm);
    let _ = sync_native_gas(eng, vm, start_used);
    let msg = CStr::from_ptr(msg).to_string_lossy().into_owned();
    warn!(msg = %msg, "native panic");
    match msg.as_str() {
        "Abort" => panic::panic_any(VmError::ContractAbort),
        "OutOfGas" => panic::panic_any(VmError::OutOfGas),
        _ => panic::panic_any(VmError::Trap(msg)),
    }
}

/// Revert upcall.
///
/// # Safety
/// Called by generated code with the live `VmT`.
#[no_mangle]
pub unsafe extern "C-unwind" fn GoRevert(vm: *mut VmT, msg: *const c_char) {
    let (vm, eng, _app, start_used) = parts(vm);
    let _ = sync_native_gas(eng, vm, start_used);
    let msg = CStr::from_ptr(msg).to_string_lossy();
    debug!(msg = %msg, "native revert");
    panic::panic_any(VmError::ExecutionReverted)
}

/// Exit upcall: status 0 is the successful-exit variant.
///
/// # Safety
/// Called by generated code with the live `VmT`.
#[no_mangle]
pub unsafe extern "C-unwind" fn GoExit(vm: *mut VmT, status: i32) {
    let (vm, eng, _app, start_used) = parts(vm);
    let _ = sync_native_gas(eng, vm, start_used);
    debug!(status, "native exit");
    if status == 0 {
        panic::panic_any(VmError::ExecutionExitSucc)
    } else {
        panic::panic_any(VmError::ExecutionExitFail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_nonexistent() {
        let err = Native::new("0x01", Path::new("/nonexistent/path/contract.so")).unwrap_err();
        assert!(matches!(err, VmError::NativeLoad(_)));
    }

    #[test]
    fn test_stub_clone_counting() {
        let native = Native::stub("0x01");
        assert_eq!(native.user_count(), 0);

        let clone1 = native.clone_handle();
        let clone2 = native.clone_handle();
        assert_eq!(native.user_count(), 2);
        assert!(clone1.last_used() >= native.last_used());

        drop(clone1);
        drop(clone2);
        assert_eq!(native.user_count(), 0);
    }

    #[test]
    fn test_stub_refuses_to_run() {
        use crate::testutil::{engine_with_frame, wat};
        let (mut eng, app) = engine_with_frame(&wat::trivial_returner(), 10_000);
        let native = Native::stub("0x01");
        assert!(matches!(
            native.run(&mut eng, &app, b"Init", b"{}"),
            Err(VmError::NativeLoad(_))
        ));
    }

    #[test]
    fn test_unwind_error_payloads() {
        assert_eq!(
            unwind_error(Box::new(VmError::ExecutionReverted)),
            VmError::ExecutionReverted
        );
        assert_eq!(
            unwind_error(Box::new("boom".to_string())),
            VmError::Trap("boom".to_string())
        );
        assert!(matches!(unwind_error(Box::new(42u32)), VmError::Trap(_)));
    }
}
