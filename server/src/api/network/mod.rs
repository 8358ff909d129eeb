mod stats;
mod status;

pub use stats::*;
pub use status::*;
