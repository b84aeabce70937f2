//! Event logging host functions: `TC_Log0`..`TC_Log4` and `TC_Notify`.

use std::sync::Arc;

use tcvm_state::StateDB;
use tcvm_types::{keccak256_hash, Hash, Log};
use tracing::debug;

use super::{arg, frame, get_string};
use crate::engine::Engine;
use crate::env::{EnvFunc, EnvTable};
use crate::error::VmError;
use crate::gas::log_gas;

pub fn register(table: &mut EnvTable) {
    for topics in 0..=4 {
        table.register(&format!("TC_Log{topics}"), Arc::new(TcLog { topics }));
    }
    table.register("TC_Notify", Arc::new(TcNotify));
}

fn emit(eng: &mut Engine, topics: Vec<Hash>, data: Vec<u8>) {
    let log = Log {
        address: eng.contract().address(),
        topics,
        data,
        block_number: eng.ctx().number,
        block_time: eng.ctx().time,
    };
    debug!(address = %log.address, topics = log.topics.len(), len = log.data.len(), "emit log");
    eng.state().add_log(log);
}

// void TC_LogN(const char *data, const char *topic1, ..., const char *topicN)
pub struct TcLog {
    pub topics: usize,
}

impl EnvFunc for TcLog {
    fn gas(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let data = get_string(&app, arg(args, 0)?).map_err(|_| VmError::InvalidApiArgs)?;
        log_gas(self.topics as u64, data.len() as u64)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        if args.len() != self.topics + 1 {
            return Err(VmError::InvalidApiArgs);
        }
        let app = frame(eng)?;
        let data = get_string(&app, args[0]).map_err(|_| VmError::InvalidApiArgs)?;

        let mut topics = Vec::with_capacity(self.topics);
        for &topic_ptr in &args[1..=self.topics] {
            let raw = get_string(&app, topic_ptr).map_err(|_| VmError::InvalidApiArgs)?;
            topics.push(Hash::from_bytes_padded(&raw));
        }
        emit(eng, topics, data);
        Ok(0)
    }
}

// void TC_Notify(const char *eventID, const char *data)
//
// The event id is keccak-hashed into the single topic.
pub struct TcNotify;

impl EnvFunc for TcNotify {
    fn gas(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let data = get_string(&app, arg(args, 1)?).map_err(|_| VmError::InvalidApiArgs)?;
        log_gas(1, data.len() as u64)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let event_id = get_string(&app, arg(args, 0)?).map_err(|_| VmError::InvalidApiArgs)?;
        let data = get_string(&app, arg(args, 1)?).map_err(|_| VmError::InvalidApiArgs)?;
        emit(eng, vec![keccak256_hash(&event_id)], data);
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{engine_with_frame, engine_with_frame_and_state, wat};

    #[test]
    fn test_log2_topics_and_data() {
        let (mut eng, app, state) =
            engine_with_frame_and_state(&wat::trivial_returner(), 1_000_000);
        let (data, t1, t2) = {
            let mut mem = app.memory().lock();
            (
                mem.set_bytes(b"0123456789").unwrap(),
                mem.set_bytes(b"topic-one").unwrap(),
                mem.set_bytes(b"topic-two").unwrap(),
            )
        };

        let log2 = TcLog { topics: 2 };
        assert_eq!(log2.gas(-1, &mut eng, &[data, t1, t2]).unwrap(), 1205);
        log2.call(-1, &mut eng, &[data, t1, t2]).unwrap();

        let logs = state.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].data, b"0123456789");
        assert_eq!(logs[0].topics.len(), 2);
        assert_eq!(logs[0].topics[0], Hash::from_bytes_padded(b"topic-one"));
        assert_eq!(logs[0].block_number, eng.ctx().number);
    }

    #[test]
    fn test_log_wrong_arity() {
        let (mut eng, app) = engine_with_frame(&wat::trivial_returner(), 1_000_000);
        let data = app.memory().lock().set_bytes(b"d").unwrap();
        let log1 = TcLog { topics: 1 };
        assert_eq!(log1.call(-1, &mut eng, &[data]), Err(VmError::InvalidApiArgs));
    }

    #[test]
    fn test_notify_hashes_event_id() {
        let (mut eng, app, state) =
            engine_with_frame_and_state(&wat::trivial_returner(), 1_000_000);
        let (id, data) = {
            let mut mem = app.memory().lock();
            (
                mem.set_bytes(b"Transfer").unwrap(),
                mem.set_bytes(b"payload").unwrap(),
            )
        };
        TcNotify.call(-1, &mut eng, &[id, data]).unwrap();

        let logs = state.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].topics, vec![keccak256_hash(b"Transfer")]);
        assert_eq!(logs[0].data, b"payload");
    }

    #[test]
    fn test_bad_data_pointer() {
        let (mut eng, _app) = engine_with_frame(&wat::trivial_returner(), 1_000_000);
        let log0 = TcLog { topics: 0 };
        assert_eq!(
            log0.call(-1, &mut eng, &[u64::MAX]),
            Err(VmError::InvalidApiArgs)
        );
    }
}
