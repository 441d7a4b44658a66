//! Reconfiguration: config snapshots, the change descriptor derived from a
//! snapshot pair, and the attribute plan deciding what must be reprocessed.

mod attribute_plan;
mod params;
mod snapshot;

pub use attribute_plan::AttributeReconfig;
pub use params::ReconfigParams;
pub use snapshot::ConfigSnapshot;
