pub mod audit;
pub mod factory;
pub mod health;
pub mod model;
pub mod optimizer;
pub mod quality;
pub mod state;
pub mod trends;

pub use audit::{AuditAction, AuditEvent, AuditLog};
pub use factory::{
    AnchorFactory, AnchorPattern, BehaviorSession, Interaction, LocatorTemplate,
    ValidationTemplate,
};
pub use health::{inspect_anchor, HealthIssue, IssueCategory, Severity, ValidationReport};
pub use model::{AnchorQuery, AnchorUpdate, CreateAnchorRequest, RegistryStats};
pub use optimizer::{OptimizationReport, OptimizeMode, Promotion, Recommendation, RecommendationKind};
pub use quality::{score_anchor_quality, QualityIssue, QualityReport};
pub use state::AnchorRegistry;
pub use trends::{TrendBucket, TrendReport, MAX_TREND_DAYS};
