//! Text index: posting lists per `field:term`, built at feed time.

mod manager;
mod tokenizer;

pub use manager::{
    IndexManager, IndexManagerFactory, IndexManagerParams, IndexOp, IndexWriter,
    MemoryIndexManager, MemoryIndexManagerFactory, MemoryIndexState,
};
pub use tokenizer::Tokenizer;
