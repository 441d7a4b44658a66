//! Small helpers shared by the persisted components.

mod disk;
mod file_header;

pub use disk::disk_usage;
pub use file_header::{FileHeader, FileSizeCalculator, HeaderTag, FILE_BIT_SIZE_TAG};
