use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anchor_core_types::{AnchorError, AnchorId, ApplicationId, Element};
use anchor_locator::{
    Anchor, AnchorMatch, MatchEngine, MatchOptions, OutcomeHistory, Tolerance,
};
use anchor_policy::EnginePolicy;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::audit::{AuditAction, AuditEvent, AuditLog};
use crate::model::{
    check_anchor, AnchorQuery, AnchorUpdate, CreateAnchorRequest, RegistryStats, TrackedAnchor,
};

pub(crate) type AnchorCell = Arc<Mutex<TrackedAnchor>>;

/// Owned, in-memory anchor collection.
///
/// The map lock excludes collection mutation from iteration. Each anchor has
/// its own mutex so statistics updates for one anchor are applied strictly
/// one at a time while different anchors proceed in parallel. Lock order is
/// map, then anchor, then audit.
pub struct AnchorRegistry {
    anchors: RwLock<HashMap<AnchorId, AnchorCell>>,
    audit: Mutex<AuditLog>,
    engine: MatchEngine,
    policy: EnginePolicy,
}

impl Default for AnchorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AnchorRegistry {
    pub fn new() -> Self {
        Self::with_policy(EnginePolicy::default())
    }

    pub fn with_policy(policy: EnginePolicy) -> Self {
        let engine = MatchEngine::new(&policy);
        Self::with_engine(policy, engine)
    }

    /// Use a preconfigured engine, e.g. one carrying custom validation predicates.
    pub fn with_engine(policy: EnginePolicy, engine: MatchEngine) -> Self {
        Self {
            anchors: RwLock::new(HashMap::new()),
            audit: Mutex::new(AuditLog::new(&policy.audit)),
            engine,
            policy,
        }
    }

    pub fn policy(&self) -> &EnginePolicy {
        &self.policy
    }

    pub fn engine(&self) -> &MatchEngine {
        &self.engine
    }

    pub fn len(&self) -> usize {
        self.anchors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.read().is_empty()
    }

    pub fn create(&self, request: CreateAnchorRequest) -> Result<Anchor, AnchorError> {
        let anchor = self.prepare(request)?;
        self.commit(std::slice::from_ref(&anchor));
        Ok(anchor)
    }

    /// Create every anchor or none: all requests are validated before the first insert.
    pub fn create_many(
        &self,
        requests: Vec<CreateAnchorRequest>,
    ) -> Result<Vec<Anchor>, AnchorError> {
        let prepared = requests
            .into_iter()
            .map(|request| self.prepare(request))
            .collect::<Result<Vec<_>, _>>()?;
        self.commit(&prepared);
        Ok(prepared)
    }

    /// Build and check an anchor without touching the collection.
    pub(crate) fn prepare(&self, request: CreateAnchorRequest) -> Result<Anchor, AnchorError> {
        let primary = request
            .primary_locator
            .ok_or_else(|| AnchorError::configuration("primary locator is required"))?;

        let mut anchor = Anchor::new(
            ApplicationId::new(request.application_id),
            request.name,
            request.anchor_type,
            primary,
        );
        anchor.purpose = request.purpose;
        anchor.container = request.container;
        anchor.secondary_locators = request.secondary_locators;
        anchor.strategy = request.strategy.unwrap_or_default();
        anchor.expected_bounds = request.expected_bounds;
        anchor.tolerance = request
            .tolerance
            .unwrap_or_else(|| Tolerance::from(&self.policy.tolerance));
        anchor.stability_score = self.policy.statistics.initial_stability;
        anchor.matching_threshold = request
            .matching_threshold
            .unwrap_or(self.policy.matching.default_matching_threshold);
        anchor.confidence_threshold = request
            .confidence_threshold
            .unwrap_or(self.policy.matching.default_confidence_threshold);
        anchor.validation_rules = request.validation_rules;
        anchor.tags = request.tags;
        anchor.custom_properties = request.custom_properties;

        check_anchor(&anchor, self.engine.validator())?;
        Ok(anchor)
    }

    /// Insert prepared anchors under one write lock, auditing each.
    pub(crate) fn commit(&self, prepared: &[Anchor]) {
        let mut anchors = self.anchors.write();
        let mut audit = self.audit.lock();
        for anchor in prepared {
            let tracked = TrackedAnchor {
                anchor: anchor.clone(),
                history: OutcomeHistory::new(self.policy.statistics.history_capacity),
            };
            anchors.insert(anchor.id.clone(), Arc::new(Mutex::new(tracked)));
            audit.push(AuditEvent::new(
                AuditAction::Created,
                anchor.id.clone(),
                anchor.application_id.clone(),
            ));
        }
        drop(audit);
        drop(anchors);

        for anchor in prepared {
            info!(
                anchor = %anchor.id,
                application = %anchor.application_id,
                name = %anchor.name,
                strategy = anchor.strategy.name(),
                "anchor created"
            );
        }
    }

    /// Returns `Ok(false)` for an unknown id. A rejected update leaves the anchor untouched.
    pub fn update(&self, id: &AnchorId, update: AnchorUpdate) -> Result<bool, AnchorError> {
        let anchors = self.anchors.write();
        let Some(cell) = anchors.get(id) else {
            debug!(anchor = %id, "update for unknown anchor");
            return Ok(false);
        };
        if update.is_empty() {
            return Ok(true);
        }

        let mut tracked = cell.lock();
        let mut candidate = tracked.anchor.clone();
        update.apply(&mut candidate);
        check_anchor(&candidate, self.engine.validator())?;
        candidate.updated_at = Utc::now();
        let application = candidate.application_id.clone();
        tracked.anchor = candidate;
        drop(tracked);

        self.audit
            .lock()
            .push(AuditEvent::new(AuditAction::Updated, id.clone(), application));
        info!(anchor = %id, "anchor updated");
        Ok(true)
    }

    pub fn delete(&self, id: &AnchorId) -> bool {
        let mut anchors = self.anchors.write();
        let Some(cell) = anchors.remove(id) else {
            return false;
        };
        let application = cell.lock().anchor.application_id.clone();
        self.audit
            .lock()
            .push(AuditEvent::new(AuditAction::Deleted, id.clone(), application));
        drop(anchors);
        info!(anchor = %id, "anchor deleted");
        true
    }

    pub fn get(&self, id: &AnchorId) -> Option<Anchor> {
        let cell = self.anchors.read().get(id).cloned()?;
        let anchor = cell.lock().anchor.clone();
        Some(anchor)
    }

    /// Every anchor satisfying `query`, ordered by creation time then id.
    pub fn search(&self, query: &AnchorQuery) -> Vec<Anchor> {
        let anchors = self.anchors.read();
        let mut found: Vec<Anchor> = anchors
            .values()
            .filter_map(|cell| {
                let tracked = cell.lock();
                query
                    .matches(&tracked.anchor)
                    .then(|| tracked.anchor.clone())
            })
            .collect();
        drop(anchors);
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        found
    }

    /// One matching pass over every anchor of `application`.
    ///
    /// Results are sorted by descending confidence and truncated to
    /// `max_results`. Every evaluated anchor has its outcome recorded, matched
    /// or not.
    pub fn match_all(
        &self,
        application: &ApplicationId,
        candidates: &[Element],
        options: &MatchOptions,
    ) -> Vec<AnchorMatch> {
        self.match_all_at(application, candidates, options, Utc::now())
    }

    pub fn match_all_at(
        &self,
        application: &ApplicationId,
        candidates: &[Element],
        options: &MatchOptions,
        now: DateTime<Utc>,
    ) -> Vec<AnchorMatch> {
        let cells = self.cells_for(application);
        let mut results = Vec::new();
        for cell in &cells {
            let snapshot = cell.lock().anchor.clone();
            let outcome = self.engine.evaluate_at(&snapshot, candidates, options, now);

            let mut tracked = cell.lock();
            let TrackedAnchor { anchor, history } = &mut *tracked;
            self.engine.tracker().record_with_history(
                anchor,
                history,
                outcome.is_some(),
                outcome.as_ref().map_or(0.0, |m| m.confidence),
                outcome.as_ref().map(|m| m.locator.target.clone()),
                now,
            );
            drop(tracked);

            if let Some(matched) = outcome {
                results.push(matched);
            }
        }

        results.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        results.truncate(self.engine.max_results(options));
        debug!(
            application = %application,
            anchors = cells.len(),
            candidates = candidates.len(),
            matched = results.len(),
            "matching pass finished"
        );
        results
    }

    /// Apply an outcome observed outside `match_all`. Returns false for an unknown id.
    ///
    /// The caller does not say which locator found the element, so a success
    /// is credited to the primary locator in the outcome history.
    pub fn record_outcome(&self, id: &AnchorId, success: bool, confidence: f64) -> bool {
        let Some(cell) = self.anchors.read().get(id).cloned() else {
            return false;
        };
        let mut tracked = cell.lock();
        let TrackedAnchor { anchor, history } = &mut *tracked;
        let locator = success.then(|| anchor.primary_locator.target.clone());
        self.engine
            .tracker()
            .record_with_history(anchor, history, success, confidence, locator, Utc::now());
        true
    }

    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.audit.lock().snapshot()
    }

    pub fn stats(&self) -> RegistryStats {
        let anchors = self.anchors.read();
        let mut stats = RegistryStats {
            anchors: anchors.len(),
            ..RegistryStats::default()
        };
        let mut applications = BTreeSet::new();
        let mut rate_total = 0.0;
        for cell in anchors.values() {
            let tracked = cell.lock();
            applications.insert(tracked.anchor.application_id.clone());
            stats.total_matches += tracked.anchor.match_count;
            stats.total_failures += tracked.anchor.failure_count;
            rate_total += tracked.anchor.success_rate;
        }
        drop(anchors);
        stats.applications = applications.len();
        if stats.anchors > 0 {
            stats.mean_success_rate = rate_total / stats.anchors as f64;
        }
        stats.audit_events = self.audit.lock().len();
        stats
    }

    /// Cells of one application in id order.
    pub(crate) fn cells_for(&self, application: &ApplicationId) -> Vec<AnchorCell> {
        let anchors = self.anchors.read();
        let mut entries: Vec<(&AnchorId, &AnchorCell)> = anchors
            .iter()
            .filter(|(_, cell)| cell.lock().anchor.application_id == *application)
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.into_iter().map(|(_, cell)| Arc::clone(cell)).collect()
    }

    pub(crate) fn push_audit(&self, event: AuditEvent) {
        self.audit.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_core_types::Bounds;
    use anchor_locator::{Locator, ValidationCheck, ValidationRule};

    const SUBMIT: Bounds = Bounds::new(100.0, 40.0, 80.0, 24.0);
    const CANCEL: Bounds = Bounds::new(200.0, 40.0, 80.0, 24.0);

    fn request(name: &str, id: &str, bounds: Bounds) -> CreateAnchorRequest {
        CreateAnchorRequest::new("shop", name, "button", Locator::element_id(id))
            .with_expected_bounds(bounds)
    }

    fn snapshot() -> Vec<Element> {
        vec![
            Element::new("n1", "button", SUBMIT).with_id("submit"),
            Element::new("n2", "button", Bounds::new(204.0, 40.0, 80.0, 24.0)).with_id("cancel"),
        ]
    }

    #[test]
    fn create_applies_policy_defaults() {
        let registry = AnchorRegistry::new();
        let anchor = registry.create(request("submit", "submit", SUBMIT)).unwrap();

        assert_eq!(anchor.tolerance.position, 10.0);
        assert_eq!(anchor.tolerance.size, 0.1);
        assert_eq!(anchor.tolerance.text, 2);
        assert_eq!(anchor.tolerance.visual, 0.8);
        assert_eq!(anchor.tolerance.temporal_ms, 1_000);
        assert_eq!(anchor.stability_score, 0.8);
        assert_eq!(anchor.match_count, 0);
        assert_eq!(anchor.failure_count, 0);
        assert_eq!(registry.get(&anchor.id), Some(anchor.clone()));

        let events = registry.audit_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, AuditAction::Created);
    }

    #[test]
    fn invalid_create_touches_nothing() {
        let registry = AnchorRegistry::new();
        let mut missing = request("submit", "submit", SUBMIT);
        missing.primary_locator = None;
        assert!(registry.create(missing).unwrap_err().is_configuration());

        let mut bad = request("submit", "submit", SUBMIT);
        bad.tolerance = Some(Tolerance {
            position: -1.0,
            ..Tolerance::default()
        });
        assert!(registry.create(bad).is_err());

        assert!(registry.is_empty());
        assert!(registry.audit_events().is_empty());
    }

    #[test]
    fn update_and_delete_emit_audit_events() {
        let registry = AnchorRegistry::new();
        let anchor = registry.create(request("submit", "submit", SUBMIT)).unwrap();

        let rejected = AnchorUpdate {
            matching_threshold: Some(1.4),
            ..AnchorUpdate::default()
        };
        assert!(registry.update(&anchor.id, rejected).is_err());
        assert_eq!(registry.get(&anchor.id).unwrap().matching_threshold, 0.6);

        let update = AnchorUpdate {
            validation_rules: Some(vec![ValidationRule::required(ValidationCheck::Visible)]),
            ..AnchorUpdate::default()
        };
        assert!(registry.update(&anchor.id, update).unwrap());
        assert_eq!(registry.get(&anchor.id).unwrap().validation_rules.len(), 1);

        assert!(!registry
            .update(&AnchorId("missing".into()), AnchorUpdate::default())
            .unwrap());

        assert!(registry.delete(&anchor.id));
        assert!(!registry.delete(&anchor.id));
        assert!(registry.get(&anchor.id).is_none());

        let actions: Vec<_> = registry.audit_events().iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![AuditAction::Created, AuditAction::Updated, AuditAction::Deleted]
        );
    }

    #[test]
    fn create_many_is_all_or_nothing() {
        let registry = AnchorRegistry::new();
        let mut broken = request("cancel", "cancel", CANCEL);
        broken.primary_locator = None;
        let err = registry
            .create_many(vec![request("submit", "submit", SUBMIT), broken])
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(registry.len(), 0);
        assert!(registry.audit_events().is_empty());

        let created = registry
            .create_many(vec![
                request("submit", "submit", SUBMIT),
                request("cancel", "cancel", CANCEL),
            ])
            .unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.audit_events().len(), 2);
    }

    #[test]
    fn unfiltered_search_returns_every_anchor_once() {
        let registry = AnchorRegistry::new();
        let mut ids = Vec::new();
        for n in 0..5 {
            let app = if n % 2 == 0 { "shop" } else { "admin" };
            let mut req = request(&format!("b{n}"), &format!("b{n}"), SUBMIT);
            req.application_id = app.into();
            ids.push(registry.create(req).unwrap().id);
        }

        let found = registry.search(&AnchorQuery::default());
        assert_eq!(found.len(), 5);
        let mut found_ids: Vec<_> = found.iter().map(|a| a.id.clone()).collect();
        found_ids.sort();
        ids.sort();
        assert_eq!(found_ids, ids);

        assert_eq!(registry.search(&AnchorQuery::for_application("admin")).len(), 2);
        assert_eq!(registry.search(&AnchorQuery::default()), found);
    }

    #[test]
    fn match_all_ranks_and_records_outcomes() {
        let registry = AnchorRegistry::new();
        let submit = registry.create(request("submit", "submit", SUBMIT)).unwrap();
        let cancel = registry.create(request("cancel", "cancel", CANCEL)).unwrap();
        let ghost = registry.create(request("ghost", "ghost", SUBMIT)).unwrap();

        let app = ApplicationId::from("shop");
        let results = registry.match_all(&app, &snapshot(), &MatchOptions::default());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].anchor_id, submit.id);
        assert_eq!(results[1].anchor_id, cancel.id);
        assert!(results[0].confidence >= results[1].confidence);

        let ghost = registry.get(&ghost.id).unwrap();
        assert_eq!(ghost.match_count, 1);
        assert_eq!(ghost.failure_count, 1);
        let submit = registry.get(&submit.id).unwrap();
        assert_eq!(submit.match_count, 1);
        assert_eq!(submit.failure_count, 0);
        assert!((submit.success_rate - 0.1).abs() < 1e-9);

        let limited = registry.match_all(
            &app,
            &snapshot(),
            &MatchOptions::default().with_max_results(1),
        );
        assert_eq!(limited.len(), 1);

        let other = registry.match_all(
            &ApplicationId::from("admin"),
            &snapshot(),
            &MatchOptions::default(),
        );
        assert!(other.is_empty());
    }

    #[test]
    fn stats_aggregate_across_anchors() {
        let registry = AnchorRegistry::new();
        let a = registry.create(request("submit", "submit", SUBMIT)).unwrap();
        registry.create(request("ghost", "ghost", SUBMIT)).unwrap();
        registry.match_all(&ApplicationId::from("shop"), &snapshot(), &MatchOptions::default());
        assert!(registry.record_outcome(&a.id, false, 0.0));
        assert!(!registry.record_outcome(&AnchorId("missing".into()), true, 1.0));

        let stats = registry.stats();
        assert_eq!(stats.anchors, 2);
        assert_eq!(stats.applications, 1);
        assert_eq!(stats.total_matches, 3);
        assert_eq!(stats.total_failures, 2);
        assert_eq!(stats.audit_events, 2);
        assert!(stats.mean_success_rate > 0.0 && stats.mean_success_rate < 0.1);
    }

    #[test]
    fn external_success_credits_primary_locator() {
        let registry = AnchorRegistry::new();
        let anchor = registry.create(request("submit", "submit", SUBMIT)).unwrap();
        assert!(registry.record_outcome(&anchor.id, true, 0.9));
        assert!(registry.record_outcome(&anchor.id, false, 0.0));

        let cells = registry.cells_for(&ApplicationId::from("shop"));
        let tracked = cells[0].lock();
        assert_eq!(tracked.history.len(), 2);
        assert_eq!(tracked.history.wins_for(&anchor.primary_locator.target).count(), 1);
    }
}
