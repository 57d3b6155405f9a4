//! Out-of-band locator optimisation.
//!
//! Refines locator reliabilities from recorded wins, then reshapes each
//! anchor's locator set around its reliable locators. Never raises: every
//! finding lands in the returned report.

use anchor_core_types::{AnchorId, ApplicationId};
use anchor_locator::{Anchor, Locator, LocatorTarget, OutcomeHistory};
use anchor_policy::OptimizerPolicy;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::audit::{AuditAction, AuditEvent};
use crate::model::TrackedAnchor;
use crate::state::AnchorRegistry;

const IMPROVEMENT_EPSILON: f64 = 1e-9;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizeMode {
    /// Report what would change without touching the registry
    #[default]
    DryRun,
    Apply,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Promotion {
    pub anchor_id: AnchorId,
    pub previous_primary: LocatorTarget,
    pub new_primary: LocatorTarget,
    pub reliability: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    AddBackupLocators,
    RedesignStrategy,
    AddValidation,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Recommendation {
    pub anchor_id: AnchorId,
    pub anchor_name: String,
    pub kind: RecommendationKind,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OptimizationReport {
    pub application_id: ApplicationId,
    pub mode: OptimizeMode,
    pub anchors_examined: usize,
    /// Locators promoted into the primary slot
    pub added_locators: usize,
    /// Unreliable locators dropped
    pub removed_locators: usize,
    pub promotions: Vec<Promotion>,
    /// Anchors whose mean locator reliability went up
    pub improved_anchors: Vec<AnchorId>,
    pub refined_locators: usize,
    /// Heuristic gain of mean locator reliability over the baseline success rate
    pub success_rate_improvement: f64,
    pub recommendations: Vec<Recommendation>,
}

impl OptimizationReport {
    pub fn recommendations_of(&self, kind: RecommendationKind) -> impl Iterator<Item = &Recommendation> {
        self.recommendations.iter().filter(move |r| r.kind == kind)
    }
}

struct Proposal {
    anchor: Anchor,
    promotion: Option<Promotion>,
    removed: usize,
    refined: usize,
}

/// Move each locator's reliability towards the mean confidence of its wins.
fn refine_reliability(anchor: &mut Anchor, history: &OutcomeHistory, policy: &OptimizerPolicy) -> usize {
    let mut refined = 0;
    let mut refine = |locator: &mut Locator| {
        let (count, total) = history
            .wins_for(&locator.target)
            .fold((0usize, 0.0), |(n, sum), s| (n + 1, sum + s.confidence));
        if count < policy.min_samples_for_refinement.max(1) {
            return;
        }
        let mean = total / count as f64;
        let updated = (locator.reliability + policy.refinement_weight * (mean - locator.reliability))
            .clamp(0.0, 1.0);
        if (updated - locator.reliability).abs() > IMPROVEMENT_EPSILON {
            locator.reliability = updated;
            refined += 1;
        }
    };
    refine(&mut anchor.primary_locator);
    for locator in &mut anchor.secondary_locators {
        refine(locator);
    }
    refined
}

fn propose(tracked: &TrackedAnchor, policy: &OptimizerPolicy) -> Proposal {
    let mut anchor = tracked.anchor.clone();
    let refined = refine_reliability(&mut anchor, &tracked.history, policy);

    let primary_trusted = anchor.success_rate > policy.reliable_primary_success;
    let (reliable, unreliable): (Vec<(bool, Locator)>, Vec<(bool, Locator)>) = anchor
        .locators()
        .map(|(slot, locator)| (slot == anchor_locator::LocatorSlot::Primary, locator.clone()))
        .partition(|(is_primary, locator)| {
            locator.reliability > policy.reliable_locator && (!is_primary || primary_trusted)
        });

    if reliable.len() < 2 {
        return Proposal {
            anchor,
            promotion: None,
            removed: 0,
            refined,
        };
    }

    // First maximum wins so declared order breaks ties.
    let best = reliable
        .iter()
        .enumerate()
        .fold(0, |best, (idx, (_, locator))| {
            if locator.reliability > reliable[best].1.reliability {
                idx
            } else {
                best
            }
        });

    let mut ordered: Vec<(bool, Locator)> = reliable;
    let (was_primary, new_primary) = ordered.remove(best);
    let promotion = (!was_primary).then(|| Promotion {
        anchor_id: anchor.id.clone(),
        previous_primary: anchor.primary_locator.target.clone(),
        new_primary: new_primary.target.clone(),
        reliability: new_primary.reliability,
    });
    anchor.primary_locator = new_primary;
    anchor.secondary_locators = ordered.into_iter().map(|(_, locator)| locator).collect();

    Proposal {
        anchor,
        promotion,
        removed: unreliable.len(),
        refined,
    }
}

fn recommend(anchor: &Anchor, policy: &OptimizerPolicy, out: &mut Vec<Recommendation>) {
    let mut push = |kind: RecommendationKind, message: String| {
        out.push(Recommendation {
            anchor_id: anchor.id.clone(),
            anchor_name: anchor.name.clone(),
            kind,
            message,
        });
    };
    let average = anchor.average_reliability();
    if average < policy.low_reliability {
        push(
            RecommendationKind::AddBackupLocators,
            format!(
                "anchor '{}' averages {:.2} locator reliability; add backup locators",
                anchor.name, average
            ),
        );
    }
    if anchor.failure_count > policy.failure_limit {
        push(
            RecommendationKind::RedesignStrategy,
            format!(
                "anchor '{}' failed {} times; redesign its locating strategy",
                anchor.name, anchor.failure_count
            ),
        );
    }
    if anchor.validation_rules.is_empty() {
        push(
            RecommendationKind::AddValidation,
            format!("anchor '{}' has no validation rules; add validation", anchor.name),
        );
    }
}

impl AnchorRegistry {
    pub fn optimize(&self, application: &ApplicationId, mode: OptimizeMode) -> OptimizationReport {
        let policy = self.policy().optimizer.clone();
        let mut report = OptimizationReport {
            application_id: application.clone(),
            mode,
            anchors_examined: 0,
            added_locators: 0,
            removed_locators: 0,
            promotions: Vec::new(),
            improved_anchors: Vec::new(),
            refined_locators: 0,
            success_rate_improvement: 0.0,
            recommendations: Vec::new(),
        };
        let mut reliability_total = 0.0;

        for cell in self.cells_for(application) {
            let mut tracked = cell.lock();
            let before = tracked.anchor.average_reliability();
            let proposal = propose(&tracked, &policy);
            let after = proposal.anchor.average_reliability();

            report.anchors_examined += 1;
            report.removed_locators += proposal.removed;
            report.refined_locators += proposal.refined;
            if after > before + IMPROVEMENT_EPSILON {
                report.improved_anchors.push(proposal.anchor.id.clone());
            }
            if let Some(promotion) = proposal.promotion.clone() {
                report.added_locators += 1;
                report.promotions.push(promotion);
            }
            reliability_total += after;
            recommend(&proposal.anchor, &policy, &mut report.recommendations);

            let changed = proposal.anchor != tracked.anchor;
            if mode == OptimizeMode::Apply && changed {
                let mut anchor = proposal.anchor;
                anchor.updated_at = Utc::now();
                let event = AuditEvent::new(
                    AuditAction::Optimized,
                    anchor.id.clone(),
                    anchor.application_id.clone(),
                )
                .with_note(format!(
                    "removed {} locators, refined {}",
                    proposal.removed, proposal.refined
                ));
                tracked.anchor = anchor;
                self.push_audit(event);
            } else if changed {
                debug!(anchor = %tracked.anchor.id, "optimisation proposed (dry run)");
            }
        }

        if report.anchors_examined > 0 {
            let mean = reliability_total / report.anchors_examined as f64;
            report.success_rate_improvement = (mean - policy.baseline_success_rate).max(0.0);
        }

        info!(
            application = %application,
            mode = ?mode,
            anchors = report.anchors_examined,
            promotions = report.promotions.len(),
            removed = report.removed_locators,
            recommendations = report.recommendations.len(),
            "optimisation pass finished"
        );
        report
    }
}
