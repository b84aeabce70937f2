//! Background AOT coordinator.
//!
//! One worker thread consumes refresh requests and two timers. All map
//! state sits behind a single mutex which is never held across compile,
//! load, or file I/O; those work on local copies.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use md5::{Digest, Md5};
use parking_lot::Mutex;
use tcvm_state::StateDB;
use tcvm_types::Address;
use tracing::{debug, info, warn};

use super::{cgen, contract_info_key, ContractInfo, TCVM_AOTS_KEEP_CSOURCE, TCVM_AOTS_ROOT};
use crate::app::App;
use crate::error::VmError;
use crate::module::Module;
use crate::native::Native;

/// Refresh-queue capacity; sends beyond it drop silently.
const REFRESH_QUEUE_LEN: usize = 8;

/// Everything the worker needs to check one contract, detached from any
/// engine so it can cross the thread boundary.
#[derive(Clone)]
pub struct RefreshTask {
    pub name: String,
    pub address: Address,
    pub module: Arc<Module>,
    pub code_md5: [u8; 16],
    pub state: Arc<dyn StateDB>,
}

impl RefreshTask {
    pub fn new(app: &Arc<App>, state: Arc<dyn StateDB>) -> Self {
        Self {
            name: app.name().to_string(),
            address: app.address(),
            module: Arc::clone(app.module()),
            code_md5: app.code_md5(),
            state,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AotConfig {
    /// Artifact output directory.
    pub root: PathBuf,
    /// Keep the generated intermediate C source next to the artifact.
    pub keep_csource: bool,
    /// Idle age beyond which a cached native is retired.
    pub idle_timeout: Duration,
    /// Retirements per idle scan.
    pub evict_batch: usize,
    /// Idle-scan period.
    pub idle_tick: Duration,
    /// On-delete sweep period.
    pub sweep_tick: Duration,
}

impl Default for AotConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/tmp/aots"),
            keep_csource: true,
            idle_timeout: Duration::from_secs(3600),
            evict_batch: 3,
            idle_tick: Duration::from_secs(300),
            sweep_tick: Duration::from_secs(10),
        }
    }
}

impl AotConfig {
    /// Configuration from the environment: `TCVM_AOTS_ROOT` names the
    /// output directory and `TCVM_AOTS_KEEP_CSOURCE=0` drops sources.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(root) = std::env::var(TCVM_AOTS_ROOT) {
            if !root.is_empty() {
                cfg.root = PathBuf::from(root);
            }
        }
        if let Ok(keep) = std::env::var(TCVM_AOTS_KEEP_CSOURCE) {
            cfg.keep_csource = keep != "0";
        }
        cfg
    }
}

#[derive(Default)]
struct Maps {
    /// Usable handles; `None` tombstones an address being deleted.
    succ: HashMap<String, Option<Native>>,
    /// Addresses whose compile or load failed.
    black: HashSet<String>,
    /// Handles being retired, kept until no clones remain.
    on_delete: HashMap<String, Native>,
}

/// The AOT service handle. Cheap to share; the worker thread holds its
/// own reference.
pub struct AotService {
    cfg: AotConfig,
    maps: Mutex<Maps>,
    refresh_tx: Sender<RefreshTask>,
    exit_tx: Sender<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AotService {
    /// Create the output directory and start the background worker.
    pub fn start(cfg: AotConfig) -> std::io::Result<Arc<Self>> {
        std::fs::create_dir_all(&cfg.root)?;

        let (refresh_tx, refresh_rx) = bounded(REFRESH_QUEUE_LEN);
        let (exit_tx, exit_rx) = bounded(1);

        let service = Arc::new(Self {
            cfg,
            maps: Mutex::new(Maps::default()),
            refresh_tx,
            exit_tx,
            worker: Mutex::new(None),
        });

        let worker = {
            let service = Arc::clone(&service);
            std::thread::Builder::new()
                .name("tcvm-aots".to_string())
                .spawn(move || service.run_loop(refresh_rx, exit_rx))?
        };
        *service.worker.lock() = Some(worker);
        Ok(service)
    }

    /// Best-effort refresh: a full queue drops the request so hot paths
    /// never stall.
    pub fn refresh(&self, task: RefreshTask) {
        let _ = self.refresh_tx.try_send(task);
    }

    /// A freshly stamped clone of the cached native, if any.
    pub fn get_native(&self, name: &str) -> Option<Native> {
        self.maps
            .lock()
            .succ
            .get(name)
            .and_then(|slot| slot.as_ref())
            .map(Native::clone_handle)
    }

    /// Retire a contract's native on self-destruct: tombstone the cache,
    /// move the handle to the deletion set, and scrub the artifact and
    /// its persisted record.
    pub fn delete_native(&self, name: &str, state: &dyn StateDB) {
        let native = {
            let mut maps = self.maps.lock();
            match maps.succ.get_mut(name) {
                Some(slot @ Some(_)) => {
                    let native = slot.take();
                    if let Some(n) = &native {
                        maps.on_delete.insert(name.to_string(), n.clone_handle());
                    }
                    native
                }
                _ => None,
            }
        };

        let Some(native) = native else { return };
        info!(app = %name, "delete native begin");
        if let Err(err) = std::fs::remove_file(native.file()) {
            warn!(app = name, %err, "remove artifact failed");
        }
        if let Ok(addr) = Address::from_str(name) {
            state.set_contract_info(&contract_info_key(&addr), &[]);
        }
    }

    /// Stop the worker and join it. Pending refreshes are discarded.
    pub fn shutdown(&self) {
        let _ = self.exit_tx.send(());
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }

    fn run_loop(&self, refresh_rx: Receiver<RefreshTask>, exit_rx: Receiver<()>) {
        let idle = tick(self.cfg.idle_tick);
        let sweep = tick(self.cfg.sweep_tick);
        loop {
            select! {
                recv(refresh_rx) -> task => {
                    let Ok(task) = task else { return };
                    self.handle_refresh(task);
                }
                recv(idle) -> _ => self.evict_idle(),
                recv(sweep) -> _ => self.sweep_on_delete(),
                recv(exit_rx) -> _ => {
                    info!("aot service exit");
                    return;
                }
            }
        }
    }

    fn handle_refresh(&self, task: RefreshTask) {
        {
            let maps = self.maps.lock();
            if maps.black.contains(&task.name) || maps.on_delete.contains_key(&task.name) {
                return;
            }
            if matches!(maps.succ.get(&task.name), Some(Some(_))) {
                return;
            }
        }
        debug!(app = %task.name, md5 = %hex::encode(task.code_md5), "aot check");
        if let Err(err) = self.check(&task) {
            warn!(app = %task.name, %err, "aot check failed");
        }
    }

    /// Synchronous check-compile-load for one contract. The worker runs
    /// this off every accepted refresh; embedders may call it directly
    /// to warm a contract up.
    pub fn check(&self, task: &RefreshTask) -> Result<(), VmError> {
        let Some(info) = self.read_contract_info(task) else {
            return self.compile_and_load(task);
        };

        if info.typ != "wasm" {
            debug!(app = %task.name, typ = %info.typ, "not a wasm contract; skipping");
            return Ok(());
        }

        if !info.err.is_empty() {
            debug!(app = %task.name, err = %info.err, "prior failure recorded; blacklisting");
            self.maps.lock().black.insert(task.name.clone());
            return Err(VmError::Compile(info.err));
        }

        match std::fs::metadata(&info.path) {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(app = %task.name, path = %info.path, "artifact missing; recompiling");
                return self.compile_and_load(task);
            }
            Err(err) => {
                return Err(VmError::Compile(format!("stat {}: {err}", info.path)));
            }
            Ok(meta) if meta.is_dir() => {
                std::fs::remove_dir(&info.path)
                    .map_err(|err| VmError::Compile(format!("remove {}: {err}", info.path)))?;
                return self.compile_and_load(task);
            }
            Ok(_) => {}
        }

        let data = match std::fs::read(&info.path) {
            Ok(data) => data,
            Err(err) => {
                warn!(app = %task.name, path = %info.path, %err, "artifact unreadable");
                std::fs::remove_file(&info.path)
                    .map_err(|err| VmError::Compile(format!("remove {}: {err}", info.path)))?;
                return self.compile_and_load(task);
            }
        };

        let sum: [u8; 16] = Md5::digest(&data).into();
        if sum != info.md5 {
            warn!(
                app = task.name,
                wanted = %hex::encode(info.md5),
                got = %hex::encode(sum),
                "artifact digest mismatch; recompiling"
            );
            std::fs::remove_file(&info.path)
                .map_err(|err| VmError::Compile(format!("remove {}: {err}", info.path)))?;
            return self.compile_and_load(task);
        }

        self.load(task, info)
    }

    fn compile_and_load(&self, task: &RefreshTask) -> Result<(), VmError> {
        let info = self.compile(task)?;
        self.load(task, info)
    }

    fn compile(&self, task: &RefreshTask) -> Result<ContractInfo, VmError> {
        let mut info = ContractInfo::wasm();

        let source = match cgen::generate(&task.module) {
            Ok(source) => source,
            Err(err) => {
                info.err = "Generate C Code Fail".to_string();
                self.persist_contract_info(task, &info);
                return Err(err);
            }
        };

        match cgen::compile(&source, &self.cfg.root, &task.name, self.cfg.keep_csource) {
            Ok((path, md5)) => {
                info.path = path.display().to_string();
                info.md5 = md5;
                debug!(
                    app = task.name,
                    so_md5 = %hex::encode(md5),
                    "compile ok"
                );
                Ok(info)
            }
            Err(err) => {
                info.err = "Compile C Code Fail".to_string();
                self.persist_contract_info(task, &info);
                Err(err)
            }
        }
    }

    fn load(&self, task: &RefreshTask, mut info: ContractInfo) -> Result<(), VmError> {
        match Native::new(&task.name, std::path::Path::new(&info.path)) {
            Ok(native) => {
                self.persist_contract_info(task, &info);
                self.maps
                    .lock()
                    .succ
                    .insert(task.name.clone(), Some(native));
                debug!(app = %task.name, path = %info.path, "native installed");
                Ok(())
            }
            Err(err) => {
                info.err = "NewNative Fail".to_string();
                self.persist_contract_info(task, &info);
                warn!(app = %task.name, %err, "native load failed");
                Err(err)
            }
        }
    }

    fn persist_contract_info(&self, task: &RefreshTask, info: &ContractInfo) {
        if !info.err.is_empty() {
            self.maps.lock().black.insert(task.name.clone());
        }
        let data = match serde_json::to_vec(info) {
            Ok(data) => data,
            Err(err) => {
                warn!(app = %task.name, %err, "contract info serialization failed");
                return;
            }
        };
        task.state
            .set_contract_info(&contract_info_key(&task.address), &data);
    }

    fn read_contract_info(&self, task: &RefreshTask) -> Option<ContractInfo> {
        let data = task.state.get_contract_info(&contract_info_key(&task.address));
        if data.is_empty() {
            return None;
        }
        match serde_json::from_slice(&data) {
            Ok(info) => Some(info),
            Err(err) => {
                warn!(app = %task.name, %err, "contract info deserialization failed");
                None
            }
        }
    }

    /// Move long-idle natives to the deletion set, a bounded batch per
    /// scan.
    fn evict_idle(&self) {
        let cutoff = Instant::now() - self.cfg.idle_timeout;
        let mut maps = self.maps.lock();
        let stale: Vec<String> = maps
            .succ
            .iter()
            .filter(|(_, slot)| {
                slot.as_ref()
                    .map(|native| native.last_used() < cutoff)
                    .unwrap_or(false)
            })
            .map(|(name, _)| name.clone())
            .take(self.cfg.evict_batch)
            .collect();

        for name in stale {
            if let Some(Some(native)) = maps.succ.get_mut(&name).map(|slot| slot.take()) {
                debug!(app = %name, "evicting idle native");
                maps.on_delete.insert(name, native);
            }
        }
    }

    /// Forget retired natives with no outstanding clones, clearing every
    /// map so a later refresh may recompile.
    fn sweep_on_delete(&self) {
        let mut maps = self.maps.lock();
        let done: Vec<String> = maps
            .on_delete
            .iter()
            .filter(|(_, native)| native.user_count() == 0)
            .map(|(name, _)| name.clone())
            .collect();

        for name in done {
            maps.on_delete.remove(&name);
            maps.succ.remove(&name);
            maps.black.remove(&name);
            info!(app = %name, "delete native done");
        }
    }

    #[cfg(test)]
    fn install_for_test(&self, name: &str, native: Native) {
        self.maps.lock().succ.insert(name.to_string(), Some(native));
    }
}
