// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Request orchestrator - the top-level composition of the governance layer.
//!
//! [`InsightOrchestrator`] owns one clone of the store per manager, the
//! provider handle, the clock, the quality sink, the single-flight map, and
//! the failure cooldowns.  Independent instances never share state, so tests
//! can run many side by side.
//!
//! ## Lifecycle
//!
//! Request key = `(feature, contextHash)`.  Gates run in order and each one
//! that fires is terminal:
//!
//! 1. **RuntimeDisabled** - global runtime flag off, or the feature disabled.
//!    Disabled-marker fallback contract, policy with rollout not allowed,
//!    audited.
//! 2. **RolloutBlocked** - the key's bucket is outside the rollout
//!    percentage.  Fallback contract, policy with rollout not allowed,
//!    audited.
//! 3. **CacheHit** - a contract younger than the feature TTL exists.  The
//!    policy is re-run against it with the current clock and thresholds.
//!    Not audited.
//! 4. **BudgetExceeded** - today's counter is at the cap.  Fallback contract,
//!    audited, no provider call.
//! 5. **Cooldown** - the key failed less than `failure_cooldown_ms` ago.
//!    Returns [`InsightError::CoolingDown`].
//! 6. **SingleFlight** - an identical key already in flight is awaited and
//!    its outcome (success or error) is shared.
//! 7. **ProviderCall** - bounded by `provider_timeout_ms`, normalized,
//!    cached, audited, reported to the quality sink.
//!
//! Provider errors propagate to the caller and are never retried here.
//!
//! ## Locking
//!
//! Managers sit behind [`tokio::sync::RwLock`]s.  No lock is held across a
//! provider call.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use hashbrown::HashMap;
use serde_json::Value;
use tokio::sync::{mpsc, watch, OnceCell, RwLock};
use tracing::{debug, info, warn};

use crate::audit::AuditLogger;
use crate::budget::BudgetManager;
use crate::cache::{cache_key, InsightCache};
use crate::clock::{Clock, SystemClock};
use crate::config::OrchestratorConfig;
use crate::context::{build_context_meta, fingerprint_context};
use crate::error::{InsightError, InsightResult};
use crate::normalizer::{disabled_contract, fallback_contract, normalize};
use crate::policy;
use crate::provider::{GenerationRequest, InsightProvider};
use crate::registry::{lookup, FeatureConfig, FeatureId};
use crate::rollout::is_rollout_allowed;
use crate::storage::InsightStore;
use crate::stream::{CancellationToken, StreamEvent};
use crate::telemetry::{QualityEvent, QualitySink, TracingQualitySink};
use crate::types::{
    AuditEntry, AuditFilter, CachedInsight, ContextMeta, ContractStatus, InsightContract,
    InsightRequest, InsightResponse, RequestOutcome, TokenUsage,
};

type SharedOutcome = Arc<OnceCell<InsightResult<InsightResponse>>>;

/// Contract plus provenance, before policy evaluation.
struct Draft {
    contract: InsightContract,
    status: ContractStatus,
    provider: Option<String>,
    model: Option<String>,
    usage: Option<TokenUsage>,
}

impl Draft {
    fn fallback(contract: InsightContract) -> Self {
        Self {
            contract,
            status: ContractStatus::Fallback,
            provider: None,
            model: None,
            usage: None,
        }
    }
}

impl From<CachedInsight> for Draft {
    fn from(insight: CachedInsight) -> Self {
        Self {
            contract: insight.contract,
            status: insight.status,
            provider: insight.provider,
            model: insight.model,
            usage: None,
        }
    }
}

/// Per-request values resolved once at entry.
struct Prepared<'a> {
    config: &'static FeatureConfig,
    context: &'a Value,
    meta: ContextMeta,
    key: String,
    requested_at: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// InsightOrchestrator
// ---------------------------------------------------------------------------

/// Governs every insight request from context to policy-checked contract.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
///
/// use async_trait::async_trait;
/// use insight_governance_core::config::OrchestratorConfig;
/// use insight_governance_core::error::ProviderError;
/// use insight_governance_core::orchestrator::InsightOrchestrator;
/// use insight_governance_core::provider::{GenerationRequest, GenerationResponse, InsightProvider};
/// use insight_governance_core::registry::FeatureId;
/// use insight_governance_core::storage::{InMemoryStorage, SharedStorage};
/// use insight_governance_core::types::{InsightRequest, RequestOutcome};
///
/// struct Echo;
///
/// #[async_trait]
/// impl InsightProvider for Echo {
///     async fn generate(&self, _request: GenerationRequest) -> Result<GenerationResponse, ProviderError> {
///         Ok(GenerationResponse {
///             content: r#"{"risk":"Allocation is balanced.","action":"Hold.","confidence":0.8}"#.into(),
///             provider: Some("echo".into()),
///             model: None,
///             usage: None,
///         })
///     }
/// }
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let orchestrator = InsightOrchestrator::new(
///     OrchestratorConfig::default(),
///     SharedStorage::new(InMemoryStorage::new()),
///     Arc::new(Echo),
/// );
/// let context = serde_json::json!({ "holdings": [] });
/// let response = orchestrator
///     .request(InsightRequest::new(FeatureId::PortfolioOverview, context))
///     .await
///     .unwrap();
/// assert_eq!(response.outcome, RequestOutcome::Generated);
/// # });
/// ```
pub struct InsightOrchestrator<S: InsightStore + Clone> {
    config: OrchestratorConfig,
    provider: Arc<dyn InsightProvider>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn QualitySink>,
    settings: RwLock<S>,
    cache: RwLock<InsightCache<S>>,
    budget: RwLock<BudgetManager<S>>,
    audit: RwLock<AuditLogger<S>>,
    in_flight: Mutex<HashMap<String, SharedOutcome>>,
    /// Request key → epoch ms until which it is refused.
    cooldowns: Mutex<HashMap<String, u64>>,
    runtime: watch::Sender<bool>,
}

impl<S: InsightStore + Clone> InsightOrchestrator<S> {
    /// Construct an orchestrator over `storage`.
    ///
    /// `storage` is cloned once per manager, so it must be a handle onto
    /// shared state (e.g. [`SharedStorage`](crate::storage::SharedStorage)).
    pub fn new(config: OrchestratorConfig, storage: S, provider: Arc<dyn InsightProvider>) -> Self {
        let runtime_enabled = storage.runtime_enabled().unwrap_or(config.runtime_enabled);
        let (runtime, _) = watch::channel(runtime_enabled);
        Self {
            config,
            provider,
            clock: Arc::new(SystemClock),
            sink: Arc::new(TracingQualitySink),
            cache: RwLock::new(InsightCache::new(storage.clone())),
            budget: RwLock::new(BudgetManager::new(storage.clone())),
            audit: RwLock::new(AuditLogger::new(storage.clone())),
            settings: RwLock::new(storage),
            in_flight: Mutex::new(HashMap::new()),
            cooldowns: Mutex::new(HashMap::new()),
            runtime,
        }
    }

    /// Replace the wall-clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the quality sink.
    pub fn with_quality_sink(mut self, sink: Arc<dyn QualitySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Runtime and feature flags
    // -----------------------------------------------------------------------

    pub fn runtime_enabled(&self) -> bool {
        *self.runtime.borrow()
    }

    /// Receiver notified whenever the global runtime flag changes.
    pub fn subscribe_runtime(&self) -> watch::Receiver<bool> {
        self.runtime.subscribe()
    }

    /// Persist the global runtime flag and broadcast it.
    pub async fn set_runtime_enabled(&self, enabled: bool) {
        self.settings.write().await.set_runtime_enabled(enabled);
        self.broadcast_runtime(enabled);
    }

    /// Refresh the settings store, pick up the persisted runtime flag (e.g.
    /// after another process changed it) and broadcast it if it differs.
    /// Returns the current flag.
    pub async fn sync_from_store(&self) -> bool {
        let persisted = {
            let mut settings = self.settings.write().await;
            settings.refresh();
            settings.runtime_enabled()
        };
        if let Some(enabled) = persisted {
            self.broadcast_runtime(enabled);
        }
        self.runtime_enabled()
    }

    fn broadcast_runtime(&self, enabled: bool) {
        let changed = self.runtime.send_if_modified(|current| {
            let changed = *current != enabled;
            *current = enabled;
            changed
        });
        if changed {
            info!(runtime_enabled = enabled, "insight runtime flag changed");
        }
    }

    pub async fn set_feature_enabled(&self, feature: FeatureId, enabled: bool) {
        self.settings.write().await.set_feature_enabled(feature, enabled);
    }

    pub async fn feature_enabled(&self, feature: FeatureId) -> bool {
        self.settings
            .read()
            .await
            .feature_enabled(feature)
            .unwrap_or(lookup(feature).default_enabled)
    }

    pub async fn set_rollout_percent(&self, feature: FeatureId, percent: u8) {
        self.settings.write().await.set_rollout_percent(feature, percent.min(100));
    }

    /// Effective rollout percentage: store override, else registry default.
    pub async fn rollout_percent(&self, feature: FeatureId) -> u8 {
        self.settings
            .read()
            .await
            .rollout_percent(feature)
            .unwrap_or(lookup(feature).default_rollout_percent)
    }

    /// Audit entries that satisfy `filter`, oldest first.
    pub async fn query_audit(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        self.audit.read().await.query(filter)
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    /// Run one request through every gate.
    ///
    /// # Errors
    ///
    /// Provider failures, timeouts, and cooldown refusals.  Malformed provider
    /// output is never an error, and a policy block is a verdict.
    pub async fn request(&self, request: InsightRequest) -> InsightResult<InsightResponse> {
        let prepared = self.prepare(&request);
        if let Some(response) = self.gate(&prepared).await {
            return Ok(response);
        }
        self.check_cooldown(&prepared)?;
        self.single_flight(&prepared, self.generate(&prepared)).await
    }

    /// Streaming counterpart of [`request`](Self::request).
    ///
    /// Emits provider text as [`StreamEvent::Delta`]s and then exactly one
    /// [`StreamEvent::Final`] carrying the normalized result, which callers
    /// must treat as a replacement for everything streamed before it.  Gated
    /// outcomes and deduplicated followers emit only the final event.  On
    /// error or cancellation no final event is sent.
    pub async fn stream_request(
        &self,
        request: InsightRequest,
        events: mpsc::UnboundedSender<StreamEvent>,
        cancel: CancellationToken,
    ) -> InsightResult<InsightResponse> {
        let prepared = self.prepare(&request);
        let outcome = match self.gate(&prepared).await {
            Some(response) => Ok(response),
            None => match self.check_cooldown(&prepared) {
                Ok(()) => {
                    self.single_flight(&prepared, self.generate_streaming(&prepared, &events, &cancel))
                        .await
                }
                Err(error) => Err(error),
            },
        };
        if let Ok(response) = &outcome {
            // A dropped receiver only means nobody is listening any more.
            let _ = events.send(StreamEvent::Final(Box::new(response.clone())));
        }
        outcome
    }

    fn prepare<'a>(&self, request: &'a InsightRequest) -> Prepared<'a> {
        let requested_at = self.clock.now_ms();
        let context_hash = request
            .context_hash
            .as_deref()
            .map(str::trim)
            .filter(|hash| !hash.is_empty())
            .map_or_else(|| fingerprint_context(&request.context), str::to_owned);
        Prepared {
            config: lookup(request.feature),
            context: &request.context,
            meta: build_context_meta(&request.context, &context_hash, requested_at),
            key: cache_key(request.feature, &context_hash),
            requested_at,
        }
    }

    /// Gates 1-4.  `None` means the request may proceed to generation.
    async fn gate(&self, prepared: &Prepared<'_>) -> Option<InsightResponse> {
        let config = prepared.config;

        if !self.runtime_enabled() || !self.feature_enabled(config.id).await {
            debug!(feature = %config.id, context_hash = %prepared.meta.context_hash, "runtime disabled");
            return Some(self.serve_fallback(prepared, RequestOutcome::RuntimeDisabled).await);
        }

        let percent = self.rollout_percent(config.id).await;
        if !is_rollout_allowed(config.id, &prepared.meta.context_hash, percent) {
            debug!(feature = %config.id, context_hash = %prepared.meta.context_hash, percent, "rollout blocked");
            return Some(self.serve_fallback(prepared, RequestOutcome::RolloutBlocked).await);
        }

        let now = self.clock.now_ms();
        let cached = self.cache.read().await.fresh(config, &prepared.meta.context_hash, now);
        if let Some(entry) = cached {
            let mut response = self.assemble(
                prepared,
                RequestOutcome::CacheHit,
                Draft::from(entry.insight),
                true,
                now,
            );
            response.cached = true;
            response.generated_at = entry.created_at;
            debug!(
                feature = %config.id,
                context_hash = %prepared.meta.context_hash,
                verdict = %response.verdict,
                "cache hit"
            );
            return Some(response);
        }

        if self.budget.read().await.check(config, now).exhausted() {
            debug!(feature = %config.id, "daily budget exhausted");
            return Some(self.serve_fallback(prepared, RequestOutcome::BudgetExceeded).await);
        }

        None
    }

    fn check_cooldown(&self, prepared: &Prepared<'_>) -> InsightResult<()> {
        let now = self.clock.now_ms();
        let mut cooldowns = lock(&self.cooldowns);
        match cooldowns.get(&prepared.key).copied() {
            Some(until) if until > now => {
                debug!(key = %prepared.key, remaining_ms = until - now, "request key cooling down");
                Err(InsightError::CoolingDown { remaining_ms: until - now })
            }
            Some(_) => {
                cooldowns.remove(&prepared.key);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Run `work` once per request key; concurrent callers share its outcome.
    async fn single_flight<F>(&self, prepared: &Prepared<'_>, work: F) -> InsightResult<InsightResponse>
    where
        F: Future<Output = InsightResult<InsightResponse>>,
    {
        let cell = {
            let mut in_flight = lock(&self.in_flight);
            match in_flight.get(&prepared.key) {
                Some(cell) => {
                    debug!(key = %prepared.key, "joining in-flight request");
                    Arc::clone(cell)
                }
                None => {
                    let cell: SharedOutcome = Arc::new(OnceCell::new());
                    in_flight.insert(prepared.key.clone(), Arc::clone(&cell));
                    cell
                }
            }
        };

        let outcome = cell
            .get_or_try_init(|| async {
                let result = work.await;
                if let Err(error) = &result {
                    self.note_failure(prepared, error);
                }
                match result {
                    // Left unset so a joined caller runs its own work.
                    Err(InsightError::Cancelled) => Err(InsightError::Cancelled),
                    other => Ok(other),
                }
            })
            .await
            .and_then(|outcome| outcome.clone());

        let mut in_flight = lock(&self.in_flight);
        if in_flight
            .get(&prepared.key)
            .is_some_and(|current| Arc::ptr_eq(current, &cell))
        {
            in_flight.remove(&prepared.key);
        }
        outcome
    }

    fn note_failure(&self, prepared: &Prepared<'_>, error: &InsightError) {
        if matches!(error, InsightError::Cancelled) {
            debug!(key = %prepared.key, "request cancelled");
            return;
        }
        warn!(
            feature = %prepared.config.id,
            context_hash = %prepared.meta.context_hash,
            abort = error.is_abort(),
            %error,
            "insight generation failed"
        );
        let until = self.clock.now_ms().saturating_add(self.config.failure_cooldown_ms);
        lock(&self.cooldowns).insert(prepared.key.clone(), until);
    }

    /// Atomically re-check and spend one unit of today's budget.  `false`
    /// means another caller used the last unit since the gate ran.
    async fn claim_budget(&self, config: &FeatureConfig) -> bool {
        let now = self.clock.now_ms();
        let mut budget = self.budget.write().await;
        if budget.check(config, now).exhausted() {
            return false;
        }
        let used = budget.record(config, now);
        debug!(feature = %config.id, used, cap = config.daily_budget, "budget spent");
        true
    }

    fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.config.provider_timeout_ms)
    }

    async fn generate(&self, prepared: &Prepared<'_>) -> InsightResult<InsightResponse> {
        let config = prepared.config;
        if !self.claim_budget(config).await {
            return Ok(self.serve_fallback(prepared, RequestOutcome::BudgetExceeded).await);
        }

        let request = GenerationRequest::for_feature(config, config.build_prompt(prepared.context));
        let response = tokio::time::timeout(self.provider_timeout(), self.provider.generate(request))
            .await
            .map_err(|_| InsightError::Timeout { after_ms: self.config.provider_timeout_ms })??;

        Ok(self
            .finish_generation(
                prepared,
                &response.content,
                response.provider,
                response.model,
                response.usage,
            )
            .await)
    }

    async fn generate_streaming(
        &self,
        prepared: &Prepared<'_>,
        events: &mpsc::UnboundedSender<StreamEvent>,
        cancel: &CancellationToken,
    ) -> InsightResult<InsightResponse> {
        let config = prepared.config;
        if cancel.is_cancelled() {
            return Err(InsightError::Cancelled);
        }
        if !self.claim_budget(config).await {
            return Ok(self.serve_fallback(prepared, RequestOutcome::BudgetExceeded).await);
        }

        let request = GenerationRequest::for_feature(config, config.build_prompt(prepared.context));
        let collect = async {
            let mut stream = self.provider.generate_stream(request).await?;
            let mut text = String::new();
            while let Some(delta) = stream.deltas.next().await {
                if cancel.is_cancelled() {
                    return Err(InsightError::Cancelled);
                }
                let delta = delta?;
                text.push_str(&delta);
                let _ = events.send(StreamEvent::Delta(delta));
            }
            if cancel.is_cancelled() {
                return Err(InsightError::Cancelled);
            }
            Ok::<_, InsightError>((text, stream.provider, stream.model))
        };

        let interruptible = async {
            tokio::select! {
                biased;
                () = cancel.cancelled() => Err(InsightError::Cancelled),
                collected = collect => collected,
            }
        };

        let (text, provider, model) = tokio::time::timeout(self.provider_timeout(), interruptible)
            .await
            .map_err(|_| InsightError::Timeout { after_ms: self.config.provider_timeout_ms })??;

        Ok(self.finish_generation(prepared, &text, provider, model, None).await)
    }

    async fn finish_generation(
        &self,
        prepared: &Prepared<'_>,
        raw: &str,
        provider: Option<String>,
        model: Option<String>,
        usage: Option<TokenUsage>,
    ) -> InsightResponse {
        let config = prepared.config;
        let now = self.clock.now_ms();
        let (contract, status) = normalize(raw, config, prepared.context, now);

        self.cache.write().await.store(
            config.id,
            &prepared.meta.context_hash,
            CachedInsight {
                contract: contract.clone(),
                status,
                provider: provider.clone(),
                model: model.clone(),
            },
            now,
        );

        let draft = Draft { contract, status, provider, model, usage };
        let response = self.assemble(prepared, RequestOutcome::Generated, draft, true, now);
        info!(
            feature = %config.id,
            context_hash = %prepared.meta.context_hash,
            status = %response.status,
            verdict = %response.verdict,
            latency_ms = now.saturating_sub(prepared.requested_at),
            "insight generated"
        );
        self.record(&response, prepared.requested_at, now).await;
        response
    }

    async fn serve_fallback(&self, prepared: &Prepared<'_>, outcome: RequestOutcome) -> InsightResponse {
        let now = self.clock.now_ms();
        let (contract, rollout_allowed) = match outcome {
            RequestOutcome::RuntimeDisabled => {
                (disabled_contract(prepared.config, prepared.context, now), false)
            }
            RequestOutcome::RolloutBlocked => {
                (fallback_contract(prepared.config, prepared.context, now), false)
            }
            _ => (fallback_contract(prepared.config, prepared.context, now), true),
        };
        let response = self.assemble(prepared, outcome, Draft::fallback(contract), rollout_allowed, now);
        self.record(&response, prepared.requested_at, now).await;
        response
    }

    fn assemble(
        &self,
        prepared: &Prepared<'_>,
        outcome: RequestOutcome,
        draft: Draft,
        rollout_allowed: bool,
        now: u64,
    ) -> InsightResponse {
        let evaluated = policy::evaluate(
            prepared.config,
            &draft.contract,
            prepared.context,
            &prepared.meta,
            rollout_allowed,
            now,
        );
        InsightResponse {
            feature: prepared.config.id,
            outcome,
            contract: draft.contract,
            status: draft.status,
            severity: evaluated.severity,
            verdict: evaluated.verdict,
            policy: evaluated.policy,
            context_meta: prepared.meta.clone(),
            cached: false,
            provider: draft.provider,
            model: draft.model,
            usage: draft.usage,
            generated_at: now,
        }
    }

    /// Audit and report one terminal, non-cached outcome.
    async fn record(&self, response: &InsightResponse, requested_at: u64, completed_at: u64) {
        self.sink.record_quality(&QualityEvent {
            feature: response.feature,
            status: response.status,
            confidence: response.contract.confidence,
            verdict: response.verdict,
            reasons: &response.policy.reasons,
        });

        let meta = &response.context_meta;
        self.audit.write().await.log(AuditEntry {
            feature: response.feature,
            outcome: response.outcome,
            requested_at,
            completed_at,
            provider: response.provider.clone(),
            model: response.model.clone(),
            contract_status: response.status,
            confidence: response.contract.confidence,
            severity: response.severity,
            verdict: response.verdict,
            policy_reasons: response.policy.reasons.clone(),
            context_version: meta.context_version,
            context_hash: meta.context_hash.clone(),
            snapshot_ts: meta.snapshot_ts,
            source_ids: meta.source_ids.clone(),
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use crate::budget::day_key;
    use crate::clock::ManualClock;
    use crate::error::ProviderError;
    use crate::provider::{GenerationResponse, ProviderStream};
    use crate::storage::{InMemoryStorage, SharedStorage};
    use crate::types::{BudgetCounter, CacheEntry, PolicyReason, Verdict};

    const NOW: u64 = 1_700_000_000_000;
    const CALM: &str =
        r#"{"risk":"Allocation is balanced.","action":"Hold the current allocation.","confidence":0.9,"evidence":["a","b"]}"#;

    #[derive(Default)]
    struct ScriptedProvider {
        calls: AtomicUsize,
        reply: String,
        chunks: Vec<String>,
        delay_ms: u64,
        failure: Option<ProviderError>,
    }

    impl ScriptedProvider {
        fn replying(reply: &str) -> Self {
            Self { reply: reply.to_owned(), ..Self::default() }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InsightProvider for ScriptedProvider {
        async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(request.json_output);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if let Some(failure) = &self.failure {
                return Err(failure.clone());
            }
            Ok(GenerationResponse {
                content: self.reply.clone(),
                provider: Some("scripted".into()),
                model: Some("test-model".into()),
                usage: Some(TokenUsage { prompt_tokens: 10, completion_tokens: 20 }),
            })
        }

        async fn generate_stream(&self, _request: GenerationRequest) -> Result<ProviderStream, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = Duration::from_millis(self.delay_ms);
            let deltas = futures_util::stream::iter(self.chunks.clone()).then(move |chunk| async move {
                tokio::time::sleep(delay).await;
                Ok::<_, ProviderError>(chunk)
            });
            Ok(ProviderStream {
                provider: Some("scripted".into()),
                model: None,
                deltas: Box::pin(deltas),
            })
        }
    }

    struct Harness {
        orchestrator: InsightOrchestrator<SharedStorage<InMemoryStorage>>,
        provider: Arc<ScriptedProvider>,
        store: SharedStorage<InMemoryStorage>,
        clock: ManualClock,
    }

    fn harness(provider: ScriptedProvider) -> Harness {
        let provider = Arc::new(provider);
        let store = SharedStorage::new(InMemoryStorage::new());
        let clock = ManualClock::new(NOW);
        let orchestrator = InsightOrchestrator::new(
            OrchestratorConfig::default(),
            store.clone(),
            Arc::clone(&provider) as Arc<dyn InsightProvider>,
        )
        .with_clock(Arc::new(clock.clone()))
        .with_quality_sink(Arc::new(crate::telemetry::NoopQualitySink));
        Harness { orchestrator, provider, store, clock }
    }

    fn overview(context: Value) -> InsightRequest {
        InsightRequest::new(FeatureId::PortfolioOverview, context)
    }

    #[tokio::test]
    async fn generation_is_cached_but_policy_is_recomputed() {
        let h = harness(ScriptedProvider::replying(CALM));
        let request = overview(json!({ "snapshotTs": NOW - 500_000 }));

        let first = h.orchestrator.request(request.clone()).await.unwrap();
        assert_eq!(first.outcome, RequestOutcome::Generated);
        assert_eq!(first.status, ContractStatus::Validated);
        assert_eq!(first.verdict, Verdict::Allow);
        assert!(!first.cached);

        h.clock.advance(200_000);
        let second = h.orchestrator.request(request).await.unwrap();
        assert_eq!(second.outcome, RequestOutcome::CacheHit);
        assert!(second.cached);
        assert_eq!(second.contract, first.contract);
        assert_eq!(second.verdict, Verdict::Block);
        assert!(second.policy.has_reason(PolicyReason::StaleContext));
        assert_eq!(h.provider.calls(), 1);

        // Cache hits are not audited.
        let audit = h.orchestrator.query_audit(&AuditFilter::default()).await;
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].provider.as_deref(), Some("scripted"));
    }

    #[tokio::test]
    async fn rollout_is_deterministic_per_context() {
        let h = harness(ScriptedProvider::replying(CALM));
        for i in 0..20 {
            let context = json!({ "snapshotTs": NOW, "portfolioId": i });
            let expected = is_rollout_allowed(FeatureId::FundingWatch, &fingerprint_context(&context), 50);
            for _ in 0..2 {
                let request = InsightRequest::new(FeatureId::FundingWatch, context.clone());
                let response = h.orchestrator.request(request).await.unwrap();
                assert_eq!(response.outcome != RequestOutcome::RolloutBlocked, expected);
                if !expected {
                    assert_eq!(response.verdict, Verdict::Block);
                    assert!(response.policy.has_reason(PolicyReason::RolloutDisabled));
                    assert_eq!(response.status, ContractStatus::Fallback);
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_identical_requests_share_one_call() {
        let h = harness(ScriptedProvider { delay_ms: 50, ..ScriptedProvider::replying(CALM) });
        let request = overview(json!({ "snapshotTs": NOW }));

        let (a, b) = tokio::join!(
            h.orchestrator.request(request.clone()),
            h.orchestrator.request(request.clone())
        );
        assert_eq!(h.provider.calls(), 1);
        assert_eq!(a.unwrap(), b.unwrap());

        let third = h.orchestrator.request(request).await.unwrap();
        assert_eq!(third.outcome, RequestOutcome::CacheHit);
        assert_eq!(h.provider.calls(), 1);
    }

    #[tokio::test]
    async fn exhausted_budget_degrades_to_fallback() {
        let h = harness(ScriptedProvider::replying(CALM));
        let config = lookup(FeatureId::TransferReview);
        h.store.clone().set_budget(
            config.id,
            BudgetCounter { date: day_key(NOW), count: config.daily_budget },
        );

        let response = h
            .orchestrator
            .request(InsightRequest::new(FeatureId::TransferReview, json!({})))
            .await
            .unwrap();
        assert_eq!(response.outcome, RequestOutcome::BudgetExceeded);
        assert_eq!(response.status, ContractStatus::Fallback);
        assert_eq!(h.provider.calls(), 0);

        let filter = AuditFilter { outcome: Some(RequestOutcome::BudgetExceeded), ..AuditFilter::default() };
        assert_eq!(h.orchestrator.query_audit(&filter).await.len(), 1);
    }

    #[tokio::test]
    async fn runtime_flag_disables_generation_and_broadcasts() {
        let h = harness(ScriptedProvider::replying(CALM));
        let mut watcher = h.orchestrator.subscribe_runtime();

        h.orchestrator.set_runtime_enabled(false).await;
        assert!(watcher.has_changed().unwrap());
        assert!(!*watcher.borrow_and_update());

        let response = h.orchestrator.request(overview(json!({}))).await.unwrap();
        assert_eq!(response.outcome, RequestOutcome::RuntimeDisabled);
        assert_eq!(response.contract.risk, crate::normalizer::DISABLED_RISK);
        assert!(response.policy.has_reason(PolicyReason::RolloutDisabled));
        assert_eq!(h.provider.calls(), 0);

        // Another process flips the persisted flag back on.
        h.store.clone().set_runtime_enabled(true);
        assert!(h.orchestrator.sync_from_store().await);
        assert!(watcher.has_changed().unwrap());
    }

    /// Local view over a store another process writes to.  Only `refresh`
    /// copies the other writer's runtime flag across.
    #[derive(Clone)]
    struct LaggingStore {
        local: SharedStorage<InMemoryStorage>,
        remote: SharedStorage<InMemoryStorage>,
    }

    impl InsightStore for LaggingStore {
        fn get_cache(&self, key: &str) -> Option<CacheEntry> {
            self.local.get_cache(key)
        }
        fn set_cache(&mut self, key: &str, entry: CacheEntry) {
            self.local.set_cache(key, entry);
        }
        fn retain_cache(&mut self, keep: &mut dyn FnMut(&str, &CacheEntry) -> bool) -> usize {
            self.local.retain_cache(keep)
        }
        fn get_budget(&self, feature: FeatureId) -> Option<BudgetCounter> {
            self.local.get_budget(feature)
        }
        fn set_budget(&mut self, feature: FeatureId, counter: BudgetCounter) {
            self.local.set_budget(feature, counter);
        }
        fn append_audit(&mut self, entry: AuditEntry) {
            self.local.append_audit(entry);
        }
        fn query_audit(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
            self.local.query_audit(filter)
        }
        fn runtime_enabled(&self) -> Option<bool> {
            self.local.runtime_enabled()
        }
        fn set_runtime_enabled(&mut self, enabled: bool) {
            self.local.set_runtime_enabled(enabled);
        }
        fn feature_enabled(&self, feature: FeatureId) -> Option<bool> {
            self.local.feature_enabled(feature)
        }
        fn set_feature_enabled(&mut self, feature: FeatureId, enabled: bool) {
            self.local.set_feature_enabled(feature, enabled);
        }
        fn rollout_percent(&self, feature: FeatureId) -> Option<u8> {
            self.local.rollout_percent(feature)
        }
        fn set_rollout_percent(&mut self, feature: FeatureId, percent: u8) {
            self.local.set_rollout_percent(feature, percent);
        }
        fn refresh(&mut self) {
            if let Some(enabled) = self.remote.runtime_enabled() {
                self.local.set_runtime_enabled(enabled);
            }
        }
    }

    #[tokio::test]
    async fn sync_refreshes_the_store_before_reading() {
        let remote = SharedStorage::new(InMemoryStorage::new());
        let store = LaggingStore { local: SharedStorage::new(InMemoryStorage::new()), remote: remote.clone() };
        let orchestrator = InsightOrchestrator::new(
            OrchestratorConfig::default(),
            store,
            Arc::new(ScriptedProvider::replying(CALM)) as Arc<dyn InsightProvider>,
        )
        .with_quality_sink(Arc::new(crate::telemetry::NoopQualitySink));
        let mut watcher = orchestrator.subscribe_runtime();
        assert!(orchestrator.runtime_enabled());

        remote.clone().set_runtime_enabled(false);
        assert!(!orchestrator.sync_from_store().await);
        assert!(watcher.has_changed().unwrap());
        assert!(!*watcher.borrow_and_update());
    }

    #[tokio::test]
    async fn disabled_feature_takes_the_disabled_path() {
        let h = harness(ScriptedProvider::replying(CALM));
        h.orchestrator.set_feature_enabled(FeatureId::PortfolioOverview, false).await;
        let response = h.orchestrator.request(overview(json!({}))).await.unwrap();
        assert_eq!(response.outcome, RequestOutcome::RuntimeDisabled);
        assert!(h.orchestrator.runtime_enabled());
    }

    #[tokio::test]
    async fn provider_failure_propagates_and_cools_down() {
        let failure = ProviderError::Status { code: 503, message: "overloaded".into() };
        let h = harness(ScriptedProvider { failure: Some(failure.clone()), ..ScriptedProvider::default() });
        let request = overview(json!({ "snapshotTs": NOW }));

        let error = h.orchestrator.request(request.clone()).await.unwrap_err();
        assert_eq!(error, InsightError::Provider(failure));
        assert!(!error.is_abort());

        let error = h.orchestrator.request(request.clone()).await.unwrap_err();
        assert_eq!(error, InsightError::CoolingDown { remaining_ms: 15_000 });
        assert_eq!(h.provider.calls(), 1);

        h.clock.advance(15_000);
        assert!(h.orchestrator.request(request).await.is_err());
        assert_eq!(h.provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let h = harness(ScriptedProvider { delay_ms: 60_000, ..ScriptedProvider::replying(CALM) });
        let error = h.orchestrator.request(overview(json!({}))).await.unwrap_err();
        assert_eq!(error, InsightError::Timeout { after_ms: 22_000 });
        assert!(error.is_abort());
    }

    #[tokio::test(start_paused = true)]
    async fn stream_ends_with_authoritative_final_event() {
        let h = harness(ScriptedProvider {
            chunks: vec![
                r#"{"risk":"Allocation is balanced.","#.into(),
                r#""action":"Hold.","confidence":0.8,"evidence":["a","b"]}"#.into(),
            ],
            delay_ms: 5,
            ..ScriptedProvider::default()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();

        let response = h
            .orchestrator
            .stream_request(overview(json!({ "snapshotTs": NOW })), tx, CancellationToken::new())
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], StreamEvent::Delta(text) if text.starts_with('{')));
        match &events[2] {
            StreamEvent::Final(last) => {
                assert_eq!(**last, response);
                assert_eq!(last.status, ContractStatus::Validated);
                assert_eq!(last.contract.risk, "Allocation is balanced.");
            }
            other => panic!("expected final event, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_a_stalled_stream() {
        let h = harness(ScriptedProvider {
            chunks: vec!["Risk: one".into(), " two".into(), " three".into()],
            delay_ms: 10_000,
            ..ScriptedProvider::replying(CALM)
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let request = overview(json!({ "snapshotTs": NOW }));

        let consumer = async {
            let mut seen = Vec::new();
            while let Some(event) = rx.recv().await {
                token.cancel();
                seen.push(event);
            }
            seen
        };
        let started = tokio::time::Instant::now();
        let (outcome, seen) = tokio::join!(
            h.orchestrator.stream_request(request.clone(), tx, token.clone()),
            consumer
        );

        // Returns while the provider is still sleeping on the second chunk.
        assert!(started.elapsed() < Duration::from_millis(20_000));
        assert_eq!(outcome.unwrap_err(), InsightError::Cancelled);
        assert_eq!(seen, vec![StreamEvent::Delta("Risk: one".into())]);

        // Cancellation is not a failure: no cooldown.
        let retry = h.orchestrator.request(request).await.unwrap();
        assert_eq!(retry.outcome, RequestOutcome::Generated);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_stream_does_not_fail_a_joined_request() {
        let h = harness(ScriptedProvider {
            chunks: vec!["Risk: one".into(), " two".into()],
            delay_ms: 10,
            ..ScriptedProvider::replying(CALM)
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let request = overview(json!({ "snapshotTs": NOW }));

        let canceller = async {
            rx.recv().await;
            token.cancel();
        };
        let joined = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            h.orchestrator.request(request.clone()).await
        };
        let (leader, (), follower) = tokio::join!(
            h.orchestrator.stream_request(request.clone(), tx, token.clone()),
            canceller,
            joined
        );

        assert_eq!(leader.unwrap_err(), InsightError::Cancelled);
        let follower = follower.unwrap();
        assert_eq!(follower.outcome, RequestOutcome::Generated);
        assert_eq!(follower.status, ContractStatus::Validated);
        assert_eq!(h.provider.calls(), 2);
    }

    #[tokio::test]
    async fn expired_entries_for_abandoned_contexts_are_swept() {
        let h = harness(ScriptedProvider::replying(CALM));
        for i in 0..30 {
            let context = json!({ "snapshotTs": NOW, "portfolioId": i });
            h.orchestrator.request(overview(context)).await.unwrap();
        }

        h.clock.advance(365 * 86_400_000);
        let later = NOW + 365 * 86_400_000;
        let response = h.orchestrator.request(overview(json!({ "snapshotTs": later }))).await.unwrap();
        assert_eq!(response.outcome, RequestOutcome::Generated);

        let mut stored = 0;
        h.store.clone().retain_cache(&mut |_, _| {
            stored += 1;
            true
        });
        assert_eq!(stored, 1);
    }
}
