pub mod shutdown;
pub mod startup;

pub use startup::{Backends, Pipeline, prepare_pipeline};
