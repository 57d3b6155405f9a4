//! Anchor engine
//!
//! Resilient element anchors for UI automation: each anchor combines several
//! locators, tolerance parameters and validation rules with historical
//! reliability statistics. The registry matches anchors against element
//! snapshots supplied by an [`ElementProvider`], ranks the results by
//! confidence and learns from every outcome.

pub mod provider;
pub mod telemetry;

pub use anchor_core_types::{AnchorError, AnchorId, ApplicationId, Bounds, Element};
pub use anchor_locator::{
    Anchor, AnchorMatch, CustomRule, DefaultLocatorEvaluator, EvalContext, Locator, LocatorError,
    LocatorEvaluator, LocatorKind, LocatorSlot, LocatorTarget, MatchEngine, MatchOptions,
    MatchStrategy, OutcomeSample, StatisticsTracker, Tolerance, ValidationCheck, ValidationRule,
};
pub use anchor_policy::{load_policy, load_policy_with_options, EnginePolicy, LoadOptions, PolicyError};
pub use anchor_registry::{
    score_anchor_quality, AnchorFactory, AnchorPattern, AnchorQuery, AnchorRegistry, AnchorUpdate,
    AuditAction, AuditEvent, BehaviorSession, CreateAnchorRequest, HealthIssue, Interaction,
    IssueCategory, LocatorTemplate, OptimizationReport, OptimizeMode, QualityReport,
    Recommendation, RecommendationKind, RegistryStats, Severity, TrendReport, ValidationReport,
    ValidationTemplate,
};
pub use provider::{match_applications, match_with_provider, ElementProvider, StaticProvider};
pub use telemetry::{init_tracing, LogFormat};
