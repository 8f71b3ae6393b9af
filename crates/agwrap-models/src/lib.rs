pub mod registry;
pub mod thinking;

pub use registry::{ModelInfo, Registry};
pub use thinking::{DEFAULT_THINKING_BUDGET, ThinkingSupport, effort_budget, normalize_budget};
