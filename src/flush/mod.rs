//! Flush targets: the uniform persistence handle every flushable subsystem
//! exposes, plus aggregation of their flushed-serial bounds.

mod target;

pub use target::{
    newest_flushed_serial, oldest_flushed_serial, FlushComponent, FlushStats, FlushTarget,
    FlushTargetList, FlushTargetType, StoreFlushTarget,
};
