pub mod adapters;
pub mod prelude;

pub use treeline_core as core;
