//! Persistence primitives: serial-tagged record log, header-tagged snapshot
//! files, and the generic logged store every subsystem is built on.

mod logged_store;
mod record_log;
mod tagged_file;

pub use logged_store::{Checkpoint, FlushBounds, LoggedStore, StoreState};
pub use record_log::{LogRecord, RecordLog};
pub use tagged_file::{read_tagged_file, write_tagged_file};
