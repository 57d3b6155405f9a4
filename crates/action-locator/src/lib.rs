//! Anchor matching engine
//!
//! This crate implements relocation of registered anchors inside an element
//! snapshot:
//! - Closed set of locator kinds evaluated against candidate elements
//! - Six locator-selection strategies, including an adaptive one
//! - Post-match validation rules that can veto a candidate
//! - Confidence scoring from locator reliability, geometry and stability
//! - Statistics tracking with a bounded outcome history per anchor

pub mod errors;
pub mod evaluate;
pub mod matcher;
pub mod scoring;
pub mod selectors;
pub mod stats;
pub mod strategies;
pub mod types;
pub mod validation;

pub use errors::*;
pub use evaluate::{DefaultLocatorEvaluator, EvalContext, LocatorEvaluator};
pub use matcher::{MatchEngine, MatchOptions};
pub use scoring::{confidence, position_match, size_match, ConfidenceBreakdown};
pub use stats::{OutcomeHistory, OutcomeSample, StatisticsTracker};
pub use strategies::select_locators;
pub use types::*;
pub use validation::{CustomRule, RuleOutcome, ValidationVerdict, Validator};
