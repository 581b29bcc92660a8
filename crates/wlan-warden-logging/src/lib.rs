pub mod build_info;
pub mod tracing_init;
pub mod transition_log;

pub use build_info::{build_info, version_string, BuildInfo};
pub use tracing_init::init_tracing;
pub use transition_log::{TransitionLog, TransitionRecord};
