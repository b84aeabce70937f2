//! Loaded contract instance.

use std::str::FromStr;
use std::sync::Arc;

use md5::{Digest, Md5};
use parking_lot::Mutex;
use tcvm_types::Address;

use crate::error::VmError;
use crate::memory::MemManager;
use crate::module::Module;

/// A contract instantiated for execution: its decoded module, linear
/// memory, mutable globals, and the MD5 of the code it was built from.
pub struct App {
    name: String,
    address: Address,
    module: Arc<Module>,
    memory: Mutex<MemManager>,
    globals: Mutex<Vec<u64>>,
    md5: [u8; 16],
}

impl App {
    /// Instantiate `module` for the contract at `name` (its `0x` hex
    /// address). Seeds linear memory from the module's data segments.
    pub fn new(name: &str, module: Arc<Module>, code: &[u8]) -> Result<Arc<Self>, VmError> {
        let address = Address::from_str(name).unwrap_or(Address::EMPTY);

        let mut memory = MemManager::new(module.min_pages)?;
        for seg in &module.data {
            memory.init_data(seg.offset, &seg.bytes)?;
        }
        let globals = module.globals.iter().map(|g| g.init).collect();

        let mut md5 = [0u8; 16];
        md5.copy_from_slice(&Md5::digest(code));

        Ok(Arc::new(Self {
            name: name.to_string(),
            address,
            module,
            memory: Mutex::new(memory),
            globals: Mutex::new(globals),
            md5,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    pub fn memory(&self) -> &Mutex<MemManager> {
        &self.memory
    }

    pub fn globals(&self) -> &Mutex<Vec<u64>> {
        &self.globals
    }

    pub fn code_md5(&self) -> [u8; 16] {
        self.md5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::wat;

    #[test]
    fn test_app_instantiation() {
        let code = wat::storage_set_get();
        let module = Arc::new(Module::decode(&code).unwrap());
        let app = App::new(
            "0x00000000000000000000000000000000000000aa",
            module,
            &code,
        )
        .unwrap();

        assert_eq!(app.address().as_bytes()[19], 0xaa);
        // Data segments are live in memory.
        assert_eq!(app.memory().lock().get_string(8).unwrap(), b"k");
        assert_eq!(app.memory().lock().get_string(16).unwrap(), b"v");
        // MD5 is over the raw code bytes.
        assert_eq!(app.code_md5(), {
            let mut d = [0u8; 16];
            d.copy_from_slice(&Md5::digest(&code));
            d
        });
    }

    #[test]
    fn test_app_lenient_address() {
        let code = wat::trivial_returner();
        let module = Arc::new(Module::decode(&code).unwrap());
        let app = App::new("not-an-address", module, &code).unwrap();
        assert!(app.address().is_empty());
        assert_eq!(app.name(), "not-an-address");
    }
}
