//! Element Provider boundary.
//!
//! The provider is the only place a matching pass may wait on I/O. Its
//! failures never escape: a pass whose snapshot cannot be fetched simply
//! matches nothing.

use std::collections::HashMap;
use std::sync::Arc;

use anchor_core_types::{ApplicationId, Element};
use anchor_locator::{AnchorMatch, MatchOptions};
use anchor_registry::AnchorRegistry;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[async_trait]
pub trait ElementProvider: Send + Sync {
    /// Current element snapshot of one application.
    async fn snapshot(&self, application: &ApplicationId) -> Result<Vec<Element>>;
}

/// Fixed snapshots keyed by application, typically loaded from a JSON fixture.
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    snapshots: HashMap<ApplicationId, Vec<Element>>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(mut self, application: impl Into<String>, elements: Vec<Element>) -> Self {
        self.snapshots
            .insert(ApplicationId::new(application), elements);
        self
    }

    /// `{"<application>": [<element>, ...], ...}`
    pub fn from_json(raw: &str) -> Result<Self> {
        let parsed: HashMap<String, Vec<Element>> =
            serde_json::from_str(raw).context("invalid element snapshot fixture")?;
        let snapshots = parsed
            .into_iter()
            .map(|(app, elements)| (ApplicationId::new(app), elements))
            .collect();
        Ok(Self { snapshots })
    }
}

#[async_trait]
impl ElementProvider for StaticProvider {
    async fn snapshot(&self, application: &ApplicationId) -> Result<Vec<Element>> {
        self.snapshots
            .get(application)
            .cloned()
            .with_context(|| format!("no snapshot for application {}", application))
    }
}

/// Fetch a snapshot and run one matching pass over it.
pub async fn match_with_provider<P>(
    registry: &AnchorRegistry,
    provider: &P,
    application: &ApplicationId,
    options: &MatchOptions,
) -> Vec<AnchorMatch>
where
    P: ElementProvider + ?Sized,
{
    let candidates = match provider.snapshot(application).await {
        Ok(candidates) => candidates,
        Err(err) => {
            warn!(application = %application, error = %err, "element provider failed");
            return Vec::new();
        }
    };
    debug!(application = %application, candidates = candidates.len(), "snapshot received");
    registry.match_all(application, &candidates, options)
}

/// Run passes for several applications concurrently. Output keeps the input order.
pub async fn match_applications(
    registry: Arc<AnchorRegistry>,
    provider: Arc<dyn ElementProvider>,
    applications: Vec<ApplicationId>,
    options: MatchOptions,
) -> Vec<(ApplicationId, Vec<AnchorMatch>)> {
    let mut tasks = JoinSet::new();
    for (idx, application) in applications.into_iter().enumerate() {
        let registry = Arc::clone(&registry);
        let provider = Arc::clone(&provider);
        let options = options.clone();
        tasks.spawn(async move {
            let matches =
                match_with_provider(registry.as_ref(), provider.as_ref(), &application, &options)
                    .await;
            (idx, application, matches)
        });
    }

    let mut finished = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => finished.push(result),
            Err(err) => warn!(error = %err, "matching task aborted"),
        }
    }
    finished.sort_by_key(|(idx, _, _)| *idx);
    finished
        .into_iter()
        .map(|(_, application, matches)| (application, matches))
        .collect()
}
