pub mod defaults;
pub mod errors;
pub mod loader;
pub mod model;

pub use defaults::default_policy;
pub use errors::PolicyError;
pub use loader::{apply_override, load_policy, load_policy_with_options, LoadOptions};
pub use model::{
    AdaptivePolicy, AuditPolicy, EnginePolicy, FactoryPolicy, MatchingPolicy, OptimizerPolicy,
    PolicyProvenance, PolicySource, StatisticsPolicy, TolerancePolicy,
    MAX_STALE_AFTER_DAYS,
};
