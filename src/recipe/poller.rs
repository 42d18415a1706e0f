//! Recipe Poller
//!
//! Blocks a mutation until the recipes it started reach a terminal state.
//!
//! The control plane offers no completion notification, so the poller
//! sleeps for a fixed interval and then queries each outstanding recipe.
//! The first query happens after the first sleep. A wall-clock budget,
//! measured from the start of the wait, bounds the whole call.

use super::model::{RecipeFilter, RecipeState};
use crate::domain::ports::RecipeSource;
use crate::error::{Error, Result};
use crate::stats::PollStats;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Budget for cluster formation class operations
pub const RECIPE_TIMEOUT: Duration = Duration::from_secs(45 * 60);

/// Fixed delay between two recipe checks
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for recipe polling
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Delay before every check
    pub poll_interval: Duration,
    /// Wall-clock budget of one wait call
    pub timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            timeout: RECIPE_TIMEOUT,
        }
    }
}

impl PollerConfig {
    /// Use a different budget, e.g. for a shorter operation class
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// =============================================================================
// Wait Targets
// =============================================================================

/// One recipe to wait for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingWaitTarget {
    #[serde(rename = "npod_uuid_to_wait_on")]
    pub pod_id: String,
    #[serde(rename = "recipe_uuid_to_wait_on")]
    pub recipe_id: String,
}

impl PendingWaitTarget {
    pub fn new(pod_id: impl Into<String>, recipe_id: impl Into<String>) -> Self {
        Self {
            pod_id: pod_id.into(),
            recipe_id: recipe_id.into(),
        }
    }

    pub fn filter(&self) -> RecipeFilter {
        RecipeFilter::for_recipe(self.pod_id.clone(), self.recipe_id.clone())
    }
}

/// Recipe identifiers returned by an SPU that accepted a token
///
/// Empty identifiers mean "nothing to wait on here": a mutation fanned out
/// to several nPods reports empty scalar identifiers and lists the
/// individual recipes instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationResult {
    #[serde(rename = "npod_uuid_to_wait_on", default)]
    pub pod_id: String,
    #[serde(rename = "recipe_uuid_to_wait_on", default)]
    pub recipe_id: String,
    #[serde(rename = "individual_recipes", default)]
    pub individual_recipes: Option<Vec<PendingWaitTarget>>,
}

impl MutationResult {
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::decode("MutationResult", e))
    }

    /// The single recipe to wait on, if both identifiers are set
    pub fn scalar_target(&self) -> Option<PendingWaitTarget> {
        if self.pod_id.is_empty() || self.recipe_id.is_empty() {
            return None;
        }
        Some(PendingWaitTarget::new(&self.pod_id, &self.recipe_id))
    }

    pub fn batch_targets(&self) -> &[PendingWaitTarget] {
        self.individual_recipes.as_deref().unwrap_or_default()
    }
}

// =============================================================================
// Poller
// =============================================================================

/// Polls recipe records until completion, failure, timeout or cancellation
pub struct RecipePoller {
    source: Arc<dyn RecipeSource>,
    config: PollerConfig,
    cancel: CancellationToken,
    stats: Arc<PollStats>,
}

impl RecipePoller {
    pub fn new(source: Arc<dyn RecipeSource>, config: PollerConfig) -> Self {
        Self {
            source,
            config,
            cancel: CancellationToken::new(),
            stats: Arc::new(PollStats::default()),
        }
    }

    /// Abort waits when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<PollStats> {
        self.stats.clone()
    }

    /// Wait for whatever recipes an accepted token started
    ///
    /// The scalar recipe is waited on first, then the individual recipes.
    pub async fn wait_on_mutation_result(
        &self,
        result: &MutationResult,
        operation: &str,
    ) -> Result<()> {
        if let Some(target) = result.scalar_target() {
            self.wait_one(&target, operation).await?;
        }

        let batch = result.batch_targets();
        if !batch.is_empty() {
            self.wait_many(batch, operation).await?;
        }

        Ok(())
    }

    /// Wait for a single recipe
    pub async fn wait_one(&self, target: &PendingWaitTarget, operation: &str) -> Result<()> {
        info!(
            "Waiting on recipe {} of nPod {} for {}",
            target.recipe_id, target.pod_id, operation
        );
        let start = Instant::now();
        let mut last_state = None;

        loop {
            self.tick(operation).await?;

            if self.check(target, &mut last_state, operation).await? {
                info!("{} completed after {:?}", operation, start.elapsed());
                return Ok(());
            }

            let elapsed = start.elapsed();
            if elapsed >= self.config.timeout {
                PollStats::incr(&self.stats.timed_out);
                warn!("{} still not complete after {:?}", operation, elapsed);
                return Err(Error::LocalTimeout {
                    operation: operation.to_string(),
                    elapsed,
                });
            }
        }
    }

    /// Wait for several independent recipes
    ///
    /// Every pending recipe is checked once per tick. Failures do not stop
    /// the wait for the others; they are collected and reported together
    /// once nothing is pending anymore. The budget is shared by the whole
    /// batch. A recipe listed more than once is waited on once.
    pub async fn wait_many(&self, targets: &[PendingWaitTarget], operation: &str) -> Result<()> {
        let mut seen = HashSet::new();
        let mut pending: Vec<(PendingWaitTarget, Option<RecipeState>)> = targets
            .iter()
            .filter(|target| seen.insert(*target))
            .map(|target| (target.clone(), None))
            .collect();

        info!("Waiting on {} recipes for {}", pending.len(), operation);
        let start = Instant::now();
        let mut failures = Vec::new();

        while !pending.is_empty() {
            self.tick(operation).await?;

            for (target, mut last_state) in std::mem::take(&mut pending) {
                match self.check(&target, &mut last_state, operation).await {
                    Ok(true) => debug!("Recipe {} completed", target.recipe_id),
                    Ok(false) => pending.push((target, last_state)),
                    Err(e @ Error::Cancelled { .. }) => return Err(e),
                    Err(e) => {
                        warn!(
                            "Recipe {} of nPod {}: {}",
                            target.recipe_id, target.pod_id, e
                        );
                        failures.push(e.to_string());
                    }
                }
            }

            if !pending.is_empty() && start.elapsed() >= self.config.timeout {
                for (target, _) in pending.drain(..) {
                    PollStats::incr(&self.stats.timed_out);
                    failures.push(format!(
                        "{} for recipe uuid: {}, npod uuid: {} timed out",
                        operation, target.recipe_id, target.pod_id
                    ));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::AggregateBatch(failures.join("\n")))
        }
    }

    /// Query one recipe; `Ok(true)` once it completed successfully
    ///
    /// `last_state` carries the state seen at the previous check of the
    /// same recipe.
    async fn check(
        &self,
        target: &PendingWaitTarget,
        last_state: &mut Option<RecipeState>,
        operation: &str,
    ) -> Result<bool> {
        let filter = target.filter();
        PollStats::incr(&self.stats.queries);

        let recipes = match self
            .cancellable(operation, self.source.get_recipes(&filter))
            .await
        {
            Ok(recipes) => recipes,
            Err(e @ Error::Cancelled { .. }) => return Err(e),
            Err(e) => {
                PollStats::incr(&self.stats.failed);
                return Err(e);
            }
        };

        // The record may not be queryable yet right after the token was accepted
        let Some(recipe) = recipes.items.first() else {
            debug!("Recipe {} not visible yet", target.recipe_id);
            return Ok(false);
        };

        if let Some(previous) = last_state.replace(recipe.state) {
            if !previous.can_transition_to(recipe.state) {
                PollStats::incr(&self.stats.regressions);
                warn!(
                    "Recipe {} went from {} back to {}",
                    target.recipe_id, previous, recipe.state
                );
            }
        }

        match recipe.state {
            RecipeState::Completed => {
                PollStats::incr(&self.stats.completed);
                Ok(true)
            }
            RecipeState::Failed | RecipeState::Timeout | RecipeState::Cancelled => {
                PollStats::incr(&self.stats.failed);
                Err(Error::RecipeFailed {
                    operation: operation.to_string(),
                    state: recipe.state,
                    status: recipe.status.clone(),
                })
            }
            state => {
                debug!("Recipe {} is {}: {}", target.recipe_id, state, recipe.status);
                Ok(false)
            }
        }
    }

    /// Sleep one poll interval
    async fn tick(&self, operation: &str) -> Result<()> {
        let interval = self.config.poll_interval;
        self.cancellable(operation, async move {
            tokio::time::sleep(interval).await;
            Ok::<_, Error>(())
        })
        .await?;
        PollStats::incr(&self.stats.ticks);
        Ok(())
    }

    async fn cancellable<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::select! {
            _ = self.cancel.cancelled() => {
                info!("{} wait cancelled", operation);
                Err(Error::Cancelled { operation: operation.to_string() })
            }
            output = fut => output,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::recipe::{RecipeRecord, RecipeRecordList, RecipeType};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// What the control plane reports for one recipe at one query
    #[derive(Debug, Clone)]
    pub(crate) enum Step {
        Missing,
        State(RecipeState, &'static str),
        Unreachable,
    }

    /// Replays a script per recipe; the last step repeats forever
    #[derive(Default)]
    pub(crate) struct ScriptedSource {
        scripts: Mutex<HashMap<String, VecDeque<Step>>>,
        pub(crate) queries: Mutex<Vec<(String, Instant)>>,
    }

    impl ScriptedSource {
        pub(crate) fn script(self, recipe_id: &str, steps: Vec<Step>) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .insert(recipe_id.to_string(), steps.into());
            self
        }

        pub(crate) fn queries_for(&self, recipe_id: &str) -> usize {
            self.queries
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, _)| id == recipe_id)
                .count()
        }
    }

    fn record(filter: &RecipeFilter, state: RecipeState, status: &str) -> RecipeRecord {
        RecipeRecord {
            recipe_id: filter.recipe_id.clone().unwrap_or_default(),
            cancel_recipe_id: String::new(),
            pod_id: filter.pod_id.clone().unwrap_or_default(),
            state,
            status: status.to_string(),
            start: Utc::now(),
            last_update: Utc::now(),
            coordinator_device_id: "SPU1".to_string(),
            recipe_type: RecipeType::CreatePod,
        }
    }

    #[async_trait]
    impl RecipeSource for ScriptedSource {
        async fn get_recipes(&self, filter: &RecipeFilter) -> Result<RecipeRecordList> {
            let recipe_id = filter.recipe_id.clone().unwrap_or_default();
            self.queries
                .lock()
                .unwrap()
                .push((recipe_id.clone(), Instant::now()));

            let step = {
                let mut scripts = self.scripts.lock().unwrap();
                let script = scripts.get_mut(&recipe_id).expect("unscripted recipe");
                if script.len() > 1 {
                    script.pop_front().unwrap()
                } else {
                    script.front().cloned().unwrap()
                }
            };

            match step {
                Step::Missing => Ok(RecipeRecordList::default()),
                Step::State(state, status) => Ok(RecipeRecordList {
                    cursor: None,
                    items: vec![record(filter, state, status)],
                }),
                Step::Unreachable => Err(Error::ControlPlane("connection reset".into())),
            }
        }
    }

    pub(crate) fn poller(source: &Arc<ScriptedSource>) -> RecipePoller {
        RecipePoller::new(source.clone(), PollerConfig::default())
    }

    fn target(recipe_id: &str) -> PendingWaitTarget {
        PendingWaitTarget::new("p1", recipe_id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_one_tolerates_missing_record() {
        let source = Arc::new(ScriptedSource::default().script(
            "r1",
            vec![
                Step::Missing,
                Step::State(RecipeState::Running, "forming cluster"),
                Step::State(RecipeState::Completed, "done"),
            ],
        ));
        let start = Instant::now();

        poller(&source)
            .wait_one(&target("r1"), "createNPod")
            .await
            .unwrap();

        assert_eq!(source.queries_for("r1"), 3);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(15) && elapsed < Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_check_happens_after_first_sleep() {
        let source = Arc::new(
            ScriptedSource::default().script("r1", vec![Step::State(RecipeState::Completed, "")]),
        );
        let start = Instant::now();

        poller(&source).wait_one(&target("r1"), "op").await.unwrap();

        let queries = source.queries.lock().unwrap();
        assert_eq!(queries.len(), 1);
        assert!(queries[0].1 - start >= POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_one_terminal_failures() {
        for (state, verb) in [
            (RecipeState::Failed, "failed"),
            (RecipeState::Timeout, "timeout"),
            (RecipeState::Cancelled, "cancelled"),
        ] {
            let source = Arc::new(ScriptedSource::default().script(
                "r1",
                vec![
                    Step::State(RecipeState::Queued, ""),
                    Step::State(state, "spu rebooted"),
                ],
            ));

            let err = poller(&source)
                .wait_one(&target("r1"), "createNPod")
                .await
                .unwrap_err();

            assert_matches!(&err, Error::RecipeFailed { state: s, status, .. } => {
                assert_eq!(*s, state);
                assert_eq!(status, "spu rebooted");
            });
            assert_eq!(err.to_string(), format!("createNPod {}: spu rebooted", verb));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelling_is_not_terminal() {
        let source = Arc::new(ScriptedSource::default().script(
            "r1",
            vec![
                Step::State(RecipeState::Cancelling, ""),
                Step::State(RecipeState::Cancelling, ""),
                Step::State(RecipeState::Cancelled, "user abort"),
            ],
        ));

        let err = poller(&source)
            .wait_one(&target("r1"), "op")
            .await
            .unwrap_err();
        assert!(err.is_terminal_recipe_failure());
        assert_eq!(source.queries_for("r1"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_one_local_timeout() {
        let source = Arc::new(
            ScriptedSource::default().script("r1", vec![Step::State(RecipeState::Running, "")]),
        );
        let poller = poller(&source);

        let err = poller
            .wait_one(&target("r1"), "createNPod")
            .await
            .unwrap_err();

        assert_matches!(&err, Error::LocalTimeout { operation, elapsed } => {
            assert_eq!(operation, "createNPod");
            assert!(*elapsed >= RECIPE_TIMEOUT);
        });
        assert_eq!(
            source.queries_for("r1"),
            (RECIPE_TIMEOUT.as_secs() / 5) as usize
        );
        assert_eq!(poller.stats().snapshot().timed_out, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_one_propagates_query_errors() {
        let source = Arc::new(ScriptedSource::default().script("r1", vec![Step::Unreachable]));

        let err = poller(&source)
            .wait_one(&target("r1"), "op")
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_many_collects_failures_and_keeps_waiting() {
        let source = Arc::new(
            ScriptedSource::default()
                .script(
                    "t1",
                    vec![
                        Step::State(RecipeState::Running, ""),
                        Step::State(RecipeState::Completed, ""),
                    ],
                )
                .script("t2", vec![Step::State(RecipeState::Failed, "disk missing")]),
        );

        let err = poller(&source)
            .wait_many(&[target("t1"), target("t2")], "updateNPodMembers")
            .await
            .unwrap_err();

        assert_matches!(&err, Error::AggregateBatch(msg) => {
            assert_eq!(msg, "updateNPodMembers failed: disk missing");
        });
        // t2 leaves the pending set after the first tick, t1 after the second
        assert_eq!(source.queries_for("t2"), 1);
        assert_eq!(source.queries_for("t1"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_many_each_target_checked_once_per_tick() {
        let source = Arc::new(
            ScriptedSource::default()
                .script(
                    "a",
                    vec![
                        Step::Missing,
                        Step::Missing,
                        Step::State(RecipeState::Completed, ""),
                    ],
                )
                .script("b", vec![Step::State(RecipeState::Completed, "")])
                .script("c", vec![Step::Missing, Step::State(RecipeState::Completed, "")]),
        );
        let start = Instant::now();

        poller(&source)
            .wait_many(&[target("a"), target("b"), target("c")], "op")
            .await
            .unwrap();

        let queries = source.queries.lock().unwrap();
        let order: Vec<&str> = queries.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c", "a", "c", "a"]);
        assert!(start.elapsed() < Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_many_shared_budget_times_out_pending() {
        let source = Arc::new(
            ScriptedSource::default()
                .script("done", vec![Step::State(RecipeState::Completed, "")])
                .script("stuck1", vec![Step::State(RecipeState::Running, "")])
                .script("stuck2", vec![Step::Missing]),
        );
        let poller = RecipePoller::new(
            source.clone(),
            PollerConfig::default().with_timeout(Duration::from_secs(60)),
        );

        let err = poller
            .wait_many(&[target("done"), target("stuck1"), target("stuck2")], "op")
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "op for recipe uuid: stuck1, npod uuid: p1 timed out\n\
             op for recipe uuid: stuck2, npod uuid: p1 timed out"
        );
        assert_eq!(source.queries_for("stuck1"), 12);
        assert_eq!(poller.stats().snapshot().timed_out, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_many_query_error_counts_as_failure() {
        let source = Arc::new(
            ScriptedSource::default()
                .script("a", vec![Step::Unreachable])
                .script("b", vec![Step::State(RecipeState::Completed, "")]),
        );

        let err = poller(&source)
            .wait_many(&[target("a"), target("b")], "op")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Control plane error: connection reset");
        assert_eq!(source.queries_for("a"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_many_empty_batch_returns_immediately() {
        let source = Arc::new(ScriptedSource::default());
        let start = Instant::now();

        poller(&source).wait_many(&[], "op").await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_many_waits_once_on_repeated_target() {
        let source = Arc::new(
            ScriptedSource::default().script("t", vec![Step::State(RecipeState::Failed, "boom")]),
        );

        let err = poller(&source)
            .wait_many(&[target("t"), target("t")], "op")
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "op failed: boom");
        assert_eq!(source.queries_for("t"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backward_state_change_is_counted() {
        let source = Arc::new(ScriptedSource::default().script(
            "r1",
            vec![
                Step::State(RecipeState::Running, ""),
                Step::State(RecipeState::Queued, ""),
                Step::State(RecipeState::Completed, ""),
            ],
        ));
        let poller = poller(&source);

        poller.wait_one(&target("r1"), "op").await.unwrap();

        let stats = poller.stats().snapshot();
        assert_eq!(stats.regressions, 1);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_wait() {
        let source = Arc::new(
            ScriptedSource::default().script("r1", vec![Step::State(RecipeState::Running, "")]),
        );
        let cancel = CancellationToken::new();
        let poller = poller(&source).with_cancellation(cancel.clone());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            cancel.cancel();
        });

        let err = poller
            .wait_one(&target("r1"), "createNPod")
            .await
            .unwrap_err();
        assert_matches!(err, Error::Cancelled { operation } if operation == "createNPod");
        assert_eq!(source.queries_for("r1"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_scalar_then_batch() {
        let source = Arc::new(
            ScriptedSource::default()
                .script("main", vec![Step::State(RecipeState::Completed, "")])
                .script("sub1", vec![Step::State(RecipeState::Completed, "")])
                .script("sub2", vec![Step::State(RecipeState::Completed, "")]),
        );
        let result = MutationResult::from_value(serde_json::json!({
            "npod_uuid_to_wait_on": "p1",
            "recipe_uuid_to_wait_on": "main",
            "individual_recipes": [
                {"npod_uuid_to_wait_on": "p2", "recipe_uuid_to_wait_on": "sub1"},
                {"npod_uuid_to_wait_on": "p3", "recipe_uuid_to_wait_on": "sub2"}
            ]
        }))
        .unwrap();

        poller(&source)
            .wait_on_mutation_result(&result, "op")
            .await
            .unwrap();

        let queries = source.queries.lock().unwrap();
        let order: Vec<&str> = queries.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, vec!["main", "sub1", "sub2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_treats_empty_identifiers_as_absent() {
        let source = Arc::new(
            ScriptedSource::default().script("sub1", vec![Step::State(RecipeState::Completed, "")]),
        );
        let result = MutationResult::from_value(serde_json::json!({
            "npod_uuid_to_wait_on": "",
            "recipe_uuid_to_wait_on": "",
            "individual_recipes": [
                {"npod_uuid_to_wait_on": "p2", "recipe_uuid_to_wait_on": "sub1"}
            ]
        }))
        .unwrap();
        assert!(result.scalar_target().is_none());

        poller(&source)
            .wait_on_mutation_result(&result, "op")
            .await
            .unwrap();
        assert_eq!(source.queries_for("sub1"), 1);

        let nothing = MutationResult::from_value(serde_json::json!({
            "npod_uuid_to_wait_on": "p1",
            "recipe_uuid_to_wait_on": "",
            "individual_recipes": null
        }))
        .unwrap();
        let start = Instant::now();
        poller(&source)
            .wait_on_mutation_result(&nothing, "op")
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
