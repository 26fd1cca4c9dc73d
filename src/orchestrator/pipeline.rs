//! Staged retrieval pipeline
//!
//! One `retrieve` call walks fourteen strictly sequential stages. Each
//! stage is optionally gated and fail-soft: its outcome is recorded to the
//! cooldown tracker, telemetry and the report's failure list, and the
//! pipeline moves on. The only early exit is cancellation, which discards
//! everything gathered so far.

use crate::budget::{AllocationDecision, AllocationRequest, AllocationTuner, BanditTuner, KAllocator, PlanOrigin, SourcePlan};
use crate::cancel::{Cancellable, CancellationToken};
use crate::complexity::{ComplexityAssessment, ComplexityGate, ComplexityLevel, HeuristicComplexityGate};
use crate::config::OrchestratorConfig;
use crate::cooldown::FailureCooldown;
use crate::fusion::{FusionEngine, QueryClass};
use crate::gate::{OrchestrationGate, Stage};
use crate::orchestrator::order::{OrderDecision, RetrievalOrderService};
use crate::orchestrator::repair::EvidenceRepairer;
use crate::orchestrator::risk::decelerate_top_k;
use crate::orchestrator::stage::{run_stage, run_sync, StageFailure, StageOutcome};
use crate::signals::EvidenceSignals;
use crate::sources::{
    AliasCorrector, EntityExtractor, LoreRegistry, MemoryReader, RiskScorer, SourceAdapter,
    StaticAliasCorrector,
};
use crate::telemetry::{NoopTelemetry, TelemetryEvent, TelemetrySink};
use crate::types::{EvidenceAccumulator, Query, ScoredDocument, SourceTag};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Cooldown key of the adaptive web stage, kept apart from plain web
const ADAPTIVE_WEB_KEY: &str = "web.adaptive";

/// Cooldown key of the vector recall set
const RECALL_KEY: &str = "vector.recall";

/// Cooldown key shared by every auxiliary LLM stage
const LLM_KEY: &str = "llm";

/// Result of one retrieval request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalReport {
    pub query_id: Uuid,

    /// Query as finally executed (after alias rewriting, with plan hints)
    pub query: Query,

    pub evidence: EvidenceAccumulator,
    pub plan: SourcePlan,
    pub order: Vec<SourceTag>,
    pub signals: EvidenceSignals,
    pub failures: Vec<StageFailure>,

    /// Local lore matched directly on the query text
    pub fast_path_hit: bool,

    pub cancelled: bool,
}

impl RetrievalReport {
    fn cancelled(query_id: Uuid, query: Query) -> Self {
        Self {
            query_id,
            query,
            evidence: EvidenceAccumulator::new(),
            plan: SourcePlan::default(),
            order: Vec::new(),
            signals: EvidenceSignals::default(),
            failures: Vec::new(),
            fast_path_hit: false,
            cancelled: true,
        }
    }
}

/// Request was cancelled; unwinds the stage chain via `?`
struct Interrupted;

type Step<T = ()> = std::result::Result<T, Interrupted>;

/// Mutable state of one request
struct Run {
    query: Query,
    evidence: EvidenceAccumulator,
    failures: Vec<StageFailure>,
    assessment: ComplexityAssessment,
    allocation: Option<AllocationDecision>,
    order: Vec<SourceTag>,
    buffers: Vec<(SourceTag, Vec<ScoredDocument>)>,
    signals: EvidenceSignals,
    fast_path_hit: bool,
}

impl Run {
    fn new(query: Query) -> Self {
        Self {
            query,
            evidence: EvidenceAccumulator::new(),
            failures: Vec::new(),
            assessment: ComplexityAssessment {
                score: 0.0,
                level: ComplexityLevel::Simple,
            },
            allocation: None,
            order: Vec::new(),
            buffers: Vec::new(),
            signals: EvidenceSignals::default(),
            fast_path_hit: false,
        }
    }

    fn plan(&self) -> SourcePlan {
        self.allocation.as_ref().map(|d| d.plan).unwrap_or_default()
    }

    fn into_report(self, query_id: Uuid) -> RetrievalReport {
        let plan = self.plan();
        RetrievalReport {
            query_id,
            query: self.query,
            evidence: self.evidence,
            plan,
            order: self.order,
            signals: self.signals,
            failures: self.failures,
            fast_path_hit: self.fast_path_hit,
            cancelled: false,
        }
    }
}

#[derive(Default, Clone)]
struct Adapters {
    web: Option<Arc<dyn SourceAdapter>>,
    vector: Option<Arc<dyn SourceAdapter>>,
    kg: Option<Arc<dyn SourceAdapter>>,
    recall: Option<Arc<dyn SourceAdapter>>,
    self_ask: Option<Arc<dyn SourceAdapter>>,
    analyze: Option<Arc<dyn SourceAdapter>>,
    adaptive_web: Option<Arc<dyn SourceAdapter>>,
}

impl Adapters {
    fn heavy(&self, tag: SourceTag) -> Option<&Arc<dyn SourceAdapter>> {
        match tag {
            SourceTag::Web => self.web.as_ref(),
            SourceTag::Vector => self.vector.as_ref(),
            SourceTag::Kg => self.kg.as_ref(),
            SourceTag::Memory | SourceTag::Lore => None,
        }
    }
}

/// Evidence retrieval orchestrator
pub struct RetrievalOrchestrator {
    config: OrchestratorConfig,
    cooldown: Arc<dyn FailureCooldown>,
    gate: OrchestrationGate,
    allocator: KAllocator,
    order: RetrievalOrderService,
    fusion: FusionEngine,
    repairer: EvidenceRepairer,
    telemetry: Arc<dyn TelemetrySink>,
    complexity: Arc<dyn ComplexityGate>,
    lore: Arc<LoreRegistry>,
    memory: Option<Arc<dyn MemoryReader>>,
    alias: Option<Arc<dyn AliasCorrector>>,
    entities: Option<Arc<dyn EntityExtractor>>,
    risk: Option<Arc<dyn RiskScorer>>,
    adapters: Adapters,
}

impl RetrievalOrchestrator {
    /// Orchestrator with no adapters attached; every source stage is
    /// skipped until one is registered with a `with_*` call
    pub fn new(config: OrchestratorConfig, cooldown: Arc<dyn FailureCooldown>) -> Self {
        let mut allocator = KAllocator::new(config.kalloc.clone());
        if config.kalloc.tuner_enabled {
            allocator = allocator.with_tuner(Arc::new(BanditTuner::new(config.kalloc.epsilon)));
        }

        let lore = match (&config.lore.catalog_dir, config.lore.enabled) {
            (Some(dir), true) => LoreRegistry::load_dir(dir).unwrap_or_else(|e| {
                warn!(path = %dir.display(), error = %e, "Lore catalogs unavailable");
                LoreRegistry::new()
            }),
            _ => LoreRegistry::new(),
        };

        let alias: Option<Arc<dyn AliasCorrector>> = if config.aliases.is_empty() {
            None
        } else {
            Some(Arc::new(StaticAliasCorrector::new(&config.aliases)))
        };

        Self {
            gate: OrchestrationGate::new(cooldown.clone()),
            order: RetrievalOrderService::new(config.retrieval.order_mode),
            fusion: FusionEngine::new(config.fusion.clone(), config.authority.clone()),
            repairer: EvidenceRepairer::new(config.repair.clone(), None),
            telemetry: Arc::new(NoopTelemetry),
            complexity: Arc::new(HeuristicComplexityGate::new()),
            lore: Arc::new(lore),
            memory: None,
            alias,
            entities: None,
            risk: None,
            adapters: Adapters::default(),
            allocator,
            cooldown,
            config,
        }
    }

    pub fn with_web(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.web = Some(adapter);
        self
    }

    pub fn with_vector(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.vector = Some(adapter);
        self
    }

    pub fn with_kg(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.kg = Some(adapter);
        self
    }

    /// High-priority recall set folded in ahead of vector results
    pub fn with_recall(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.recall = Some(adapter);
        self
    }

    pub fn with_self_ask(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.self_ask = Some(adapter);
        self
    }

    pub fn with_analyze(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.analyze = Some(adapter);
        self
    }

    pub fn with_adaptive_web(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.adaptive_web = Some(adapter);
        self
    }

    pub fn with_repair_search(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.repairer = EvidenceRepairer::new(self.config.repair.clone(), Some(adapter));
        self
    }

    pub fn with_memory(mut self, reader: Arc<dyn MemoryReader>) -> Self {
        self.memory = Some(reader);
        self
    }

    pub fn with_alias_corrector(mut self, corrector: Arc<dyn AliasCorrector>) -> Self {
        self.alias = Some(corrector);
        self
    }

    pub fn with_entity_extractor(mut self, extractor: Arc<dyn EntityExtractor>) -> Self {
        self.entities = Some(extractor);
        self
    }

    pub fn with_risk_scorer(mut self, scorer: Arc<dyn RiskScorer>) -> Self {
        self.risk = Some(scorer);
        self
    }

    pub fn with_complexity_gate(mut self, gate: Arc<dyn ComplexityGate>) -> Self {
        self.complexity = gate;
        self
    }

    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = sink;
        self
    }

    pub fn with_lore(mut self, registry: LoreRegistry) -> Self {
        self.lore = Arc::new(registry);
        self
    }

    /// Replace the learning tuner; only consulted when `kalloc.tuner_enabled`
    pub fn with_tuner(mut self, tuner: Arc<dyn AllocationTuner>) -> Self {
        self.allocator = KAllocator::new(self.config.kalloc.clone()).with_tuner(tuner);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn gate(&self) -> &OrchestrationGate {
        &self.gate
    }

    /// Run the full pipeline. Never fails: stage errors end up in
    /// `RetrievalReport::failures`, cancellation in `cancelled`.
    pub async fn retrieve(&self, query: Query, cancel: &CancellationToken) -> RetrievalReport {
        let query_id = Uuid::new_v4();
        let original = query.clone();
        let mut run = Run::new(query);

        debug!(query_id = %query_id, text = %run.query.text, "Retrieval started");

        match self.execute(&mut run, cancel).await {
            Ok(()) => {
                info!(
                    query_id = %query_id,
                    evidence = run.evidence.len(),
                    failures = run.failures.len(),
                    fast_path = run.fast_path_hit,
                    "Retrieval finished"
                );
                run.into_report(query_id)
            }
            Err(Interrupted) => {
                info!(query_id = %query_id, "Retrieval cancelled, evidence discarded");
                RetrievalReport::cancelled(query_id, original)
            }
        }
    }

    /// Evidence only
    pub async fn retrieve_evidence(&self, query: Query, cancel: &CancellationToken) -> EvidenceAccumulator {
        self.retrieve(query, cancel).await.evidence
    }

    async fn execute(&self, run: &mut Run, cancel: &CancellationToken) -> Step {
        self.stage_memory(run, cancel).await?;
        checkpoint(cancel)?;
        self.stage_alias(run, cancel).await?;
        checkpoint(cancel)?;
        self.stage_allocation(run)?;
        checkpoint(cancel)?;
        self.stage_lore_fast(run)?;
        checkpoint(cancel)?;
        self.stage_entity_lore(run, cancel).await?;
        checkpoint(cancel)?;
        self.stage_assist(run, cancel, Stage::SelfAsk).await?;
        checkpoint(cancel)?;
        self.stage_assist(run, cancel, Stage::Analyze).await?;
        checkpoint(cancel)?;
        self.stage_adaptive_web(run, cancel).await?;
        checkpoint(cancel)?;
        self.stage_order(run);
        checkpoint(cancel)?;
        self.stage_sources(run, cancel).await?;
        checkpoint(cancel)?;
        let top_k = self.stage_risk(run)?;
        checkpoint(cancel)?;
        let fused = self.stage_fusion(run, top_k);
        checkpoint(cancel)?;
        self.stage_repair(run, cancel, fused).await?;
        checkpoint(cancel)?;
        self.stage_signals(run);
        Ok(())
    }

    // 1. Session memory
    async fn stage_memory(&self, run: &mut Run, cancel: &CancellationToken) -> Step {
        let hints = &run.query.hints;
        let hint_off = hints
            .memory_mode
            .as_deref()
            .map(|m| m.eq_ignore_ascii_case("off"))
            .unwrap_or(false);
        let config_exploration = self.config.retrieval.memory_mode.eq_ignore_ascii_case("exploration");

        if hints.memory_off || hint_off || hints.exploration_mode() || self.config.memory_disabled() || config_exploration {
            self.skip("memory", "memory disabled");
            return Ok(());
        }

        let (reader, session) = match (&self.memory, run.query.session_id.clone()) {
            (Some(reader), Some(session)) => (reader, session),
            _ => return Ok(()),
        };

        let outcome = run_stage("memory", self.config.timeouts.local(), cancel, reader.load_recent(&session)).await;
        if let Some(Some(text)) = self.settle(run, "memory", None, outcome)? {
            if !text.trim().is_empty() {
                run.evidence.push(
                    ScoredDocument::new(text, SourceTag::Memory, 1.0)
                        .with_meta("source", "SessionMemory")
                        .with_meta("session_id", session),
                );
            }
        }
        Ok(())
    }

    // 2. Entity/alias normalization
    async fn stage_alias(&self, run: &mut Run, cancel: &CancellationToken) -> Step {
        let corrector = match &self.alias {
            Some(c) => c,
            None => return Ok(()),
        };

        let locale = run
            .query
            .hints
            .locale
            .clone()
            .or_else(|| self.config.retrieval.locale.clone());

        let outcome = run_stage(
            "alias",
            self.config.timeouts.local(),
            cancel,
            corrector.correct(&run.query.text, locale.as_deref(), &run.query.hints),
        )
        .await;

        if let Some(text) = self.settle(run, "alias", None, outcome)? {
            let text = text.trim();
            if !text.is_empty() && text != run.query.text {
                debug!(from = %run.query.text, to = %text, "Query rewritten");
                run.query = run.query.rewritten(text);
            }
        }
        Ok(())
    }

    // 3. Complexity + K allocation
    fn stage_allocation(&self, run: &mut Run) -> Step {
        let complexity = self.complexity.clone();
        let query = run.query.clone();
        let outcome = run_sync("complexity", || Ok(complexity.assess(&query)));
        if let Some(assessment) = self.settle(run, "complexity", None, outcome)? {
            run.assessment = assessment;
        }

        let mut request = AllocationRequest::from_query(&run.query, run.assessment.score);
        request.cooling = SourceTag::HEAVY
            .iter()
            .copied()
            .filter(|tag| self.is_cooling(tag.as_str()))
            .collect();

        let decision = self.allocator.decide(&request);
        let plan = decision.plan;

        let hints = &mut run.query.hints;
        hints.web_top_k = Some(plan.web_k);
        hints.vector_top_k = Some(plan.vector_k);
        hints.kg_top_k = Some(plan.kg_k);
        hints.pool_limit = Some(plan.pool_limit);

        debug!(
            web_k = plan.web_k,
            vector_k = plan.vector_k,
            kg_k = plan.kg_k,
            pool_limit = plan.pool_limit,
            origin = ?decision.origin,
            recency = decision.recency,
            "K allocation decided"
        );
        self.emit(TelemetryEvent::KAllocation {
            plan,
            origin: origin_label(decision.origin).to_string(),
        });

        run.allocation = Some(decision);
        Ok(())
    }

    // 4. Local lore fast-match
    fn stage_lore_fast(&self, run: &mut Run) -> Step {
        if !self.config.lore.enabled || self.lore.is_empty() {
            return Ok(());
        }

        let lore = self.lore.clone();
        let text = run.query.text.clone();
        let outcome = run_sync("lore", || {
            Ok(lore
                .find_in_text(&text)
                .into_iter()
                .map(|e| e.to_document())
                .collect::<Vec<_>>())
        });

        if let Some(docs) = self.settle(run, "lore", None, outcome)? {
            if !docs.is_empty() {
                run.fast_path_hit = true;
                self.emit(TelemetryEvent::LoreInjected {
                    count: docs.len(),
                    via_entities: false,
                });
                run.evidence.extend(docs);
            }
        }
        Ok(())
    }

    // 5. NER-assisted lore match
    async fn stage_entity_lore(&self, run: &mut Run, cancel: &CancellationToken) -> Step {
        if run.fast_path_hit || !self.config.lore.enabled || self.lore.is_empty() {
            return Ok(());
        }
        let extractor = match &self.entities {
            Some(e) => e,
            None => return Ok(()),
        };
        if !self.gated(Stage::EntityLore, &run.query) {
            return Ok(());
        }

        let outcome = run_stage(
            Stage::EntityLore.as_str(),
            self.config.timeouts.llm_stage(),
            cancel,
            extractor.extract(&run.query.text),
        )
        .await;

        if let Some(entities) = self.settle(run, Stage::EntityLore.as_str(), Some(LLM_KEY), outcome)? {
            let docs: Vec<ScoredDocument> = self
                .lore
                .find_by_entities(&entities)
                .into_iter()
                .map(|e| e.to_document())
                .collect();
            if !docs.is_empty() {
                self.emit(TelemetryEvent::LoreInjected {
                    count: docs.len(),
                    via_entities: true,
                });
                run.evidence.extend(docs);
            }
        }
        Ok(())
    }

    // 6./7. Self-ask and analyze
    async fn stage_assist(&self, run: &mut Run, cancel: &CancellationToken, stage: Stage) -> Step {
        let adapter = match stage {
            Stage::SelfAsk => &self.adapters.self_ask,
            _ => &self.adapters.analyze,
        };
        let adapter = match adapter {
            Some(a) => a.clone(),
            None => return Ok(()),
        };
        if !self.gated(stage, &run.query) {
            return Ok(());
        }

        let complexity = self.complexity.clone();
        let query = run.query.clone();
        let wanted = run_sync("complexity", move || {
            Ok(match stage {
                Stage::SelfAsk => complexity.needs_self_ask(&query),
                _ => complexity.needs_analyze(&query),
            })
        });
        if self.settle(run, "complexity", None, wanted)? != Some(true) {
            self.skip(stage.as_str(), "complexity gate");
            return Ok(());
        }

        let outcome = run_stage(
            stage.as_str(),
            self.config.timeouts.llm_stage(),
            cancel,
            adapter.retrieve(&run.query),
        )
        .await;
        if let Some(docs) = self.settle(run, stage.as_str(), Some(LLM_KEY), outcome)? {
            run.evidence.extend(docs);
        }
        Ok(())
    }

    // 8. Adaptive web search
    async fn stage_adaptive_web(&self, run: &mut Run, cancel: &CancellationToken) -> Step {
        let adapter = match &self.adapters.adaptive_web {
            Some(a) => a,
            None => return Ok(()),
        };

        let outcome = run_stage("adaptive_web", self.config.timeouts.source(), cancel, adapter.retrieve(&run.query)).await;
        if let Some(docs) = self.settle(run, "adaptive_web", Some(ADAPTIVE_WEB_KEY), outcome)? {
            run.evidence.extend(docs);
        }
        Ok(())
    }

    // 9. Source order
    fn stage_order(&self, run: &mut Run) {
        let decision = match catch_unwind(AssertUnwindSafe(|| self.order.decide(&run.query, self.cooldown.as_ref()))) {
            Ok(d) => d,
            Err(_) => {
                warn!("Order decision panicked, using default order");
                OrderDecision {
                    order: SourceTag::HEAVY.to_vec(),
                    reason: "fallback".to_string(),
                }
            }
        };

        debug!(order = ?decision.order, reason = %decision.reason, "Source order decided");
        self.emit(TelemetryEvent::OrderDecision {
            order: decision.order.clone(),
            reason: decision.reason,
        });
        run.order = decision.order;
    }

    // 10. Per-source execution
    async fn stage_sources(&self, run: &mut Run, cancel: &CancellationToken) -> Step {
        let plan = run.plan();
        let order = run.order.clone();

        for tag in order {
            checkpoint(cancel)?;

            let k = plan.k_for(tag);
            if k == 0 {
                self.skip(tag.as_str(), "no budget");
                continue;
            }
            let adapter = match self.adapters.heavy(tag) {
                Some(a) => a.clone(),
                None => continue,
            };
            if !self.gated(gate_stage(tag), &run.query) {
                continue;
            }

            let mut docs = if tag == SourceTag::Vector {
                self.recall_set(run, cancel).await?
            } else {
                Vec::new()
            };

            let outcome = run_stage(tag.as_str(), self.config.timeouts.source(), cancel, adapter.retrieve(&run.query)).await;
            if let Some(found) = self.settle(run, tag.as_str(), Some(tag.as_str()), outcome)? {
                let mut seen: HashSet<String> = docs.iter().map(|d| d.text.clone()).collect();
                docs.extend(found.into_iter().filter(|d| seen.insert(d.text.clone())));
            }

            docs.truncate(k);
            debug!(source = %tag, docs = docs.len(), k = k, "Source returned");
            run.buffers.push((tag, docs));
        }

        // Execution order must not leak into fusion tie-breaks
        run.buffers.sort_by_key(|(tag, _)| source_priority(*tag));
        run.buffers = cap_pool(std::mem::take(&mut run.buffers), plan.pool_limit);
        Ok(())
    }

    async fn recall_set(&self, run: &mut Run, cancel: &CancellationToken) -> Step<Vec<ScoredDocument>> {
        let recall = match (&self.adapters.recall, self.config.recall.enabled) {
            (Some(r), true) => r.clone(),
            _ => return Ok(Vec::new()),
        };

        let outcome = run_stage("recall", self.config.timeouts.source(), cancel, recall.retrieve(&run.query)).await;
        let min_score = self.config.recall.min_score;
        Ok(self
            .settle(run, "recall", Some(RECALL_KEY), outcome)?
            .unwrap_or_default()
            .into_iter()
            .filter(|d| d.score >= min_score)
            .take(self.config.recall.top_k)
            .collect())
    }

    // 11. Risk deceleration
    fn stage_risk(&self, run: &mut Run) -> Step<usize> {
        let base = self.config.retrieval.top_k;
        let scorer = match &self.risk {
            Some(s) => s.clone(),
            None => return Ok(base),
        };

        let candidates: Vec<ScoredDocument> = run
            .evidence
            .documents()
            .iter()
            .chain(run.buffers.iter().flat_map(|(_, d)| d.iter()))
            .cloned()
            .collect();
        let outcome = run_sync("risk", || scorer.compute_risk(&candidates));
        let risk = match self.settle(run, "risk", None, outcome)? {
            Some(r) => r.min(100),
            None => return Ok(base),
        };

        let top_k = decelerate_top_k(base, risk, &self.config.risk);
        if top_k != base {
            debug!(risk = risk, base_top_k = base, top_k = top_k, "Risk deceleration applied");
        }
        self.emit(TelemetryEvent::RiskDeceleration {
            risk,
            base_top_k: base,
            top_k,
        });
        Ok(top_k)
    }

    // 12. Weighted RRF fusion
    fn stage_fusion(&self, run: &mut Run, top_k: usize) -> Vec<ScoredDocument> {
        let hints = &run.query.hints;
        let recency = run.allocation.as_ref().map(|d| d.recency).unwrap_or(false);
        let class = if hints.official_only {
            QueryClass::Official
        } else if recency {
            QueryClass::Recency
        } else {
            QueryClass::Default
        };

        let buffers = std::mem::take(&mut run.buffers);
        let lists = buffers.iter().filter(|(_, d)| !d.is_empty()).count();
        let fused = self.fusion.fuse(buffers, top_k, class, chrono::Utc::now().timestamp());

        self.emit(TelemetryEvent::FusionApplied {
            lists,
            top_k,
            fused: fused.len(),
        });
        fused
    }

    // 13. Repair
    async fn stage_repair(&self, run: &mut Run, cancel: &CancellationToken, fused: Vec<ScoredDocument>) -> Step {
        if !self.repairer.enabled() {
            run.evidence.append_fused(fused);
            return Ok(());
        }

        let before = fused.len();
        let outcome = self
            .repairer
            .repair(&run.query, fused, self.config.timeouts.source(), cancel)
            .await;
        if outcome.cancelled {
            return Err(Interrupted);
        }
        if let Some(failure) = outcome.failure {
            let key = self.repairer.search_name().map(str::to_string);
            self.settle(run, "repair", key.as_deref(), failure)?;
        } else if let Some(name) = self.repairer.search_name() {
            self.mark(name, true);
        }

        self.emit(TelemetryEvent::RepairApplied {
            before,
            after: outcome.docs.len(),
        });
        run.evidence.append_fused(outcome.docs);
        Ok(())
    }

    // 14. Evidence signals + tuner feedback
    fn stage_signals(&self, run: &mut Run) {
        let signals = EvidenceSignals::extract(&run.query.text, run.evidence.documents(), self.fusion.authority());
        self.emit(TelemetryEvent::EvidenceSignalsSample { signals });

        let ticket = run.allocation.as_ref().and_then(|d| d.ticket);
        if let (Some(ticket), Some(tuner)) = (ticket, self.allocator.tuner()) {
            let reward = signals.quality();
            if catch_unwind(AssertUnwindSafe(|| tuner.feedback(&ticket, reward))).is_err() {
                warn!("Tuner feedback panicked");
            }
        }

        debug!(
            docs = signals.doc_count,
            authority = signals.authority_avg,
            duplicates = signals.duplicate_ratio,
            coverage = signals.coverage_score,
            "Evidence signals"
        );
        run.signals = signals;
    }

    /// Record an outcome. Cancellation becomes `Err`, everything else
    /// returns the payload if there is one.
    fn settle<T>(&self, run: &mut Run, stage: &str, key: Option<&str>, outcome: StageOutcome<T>) -> Step<Option<T>> {
        match outcome {
            StageOutcome::Completed(value) => {
                if let Some(key) = key {
                    self.mark(key, true);
                }
                Ok(Some(value))
            }
            StageOutcome::Cancelled => Err(Interrupted),
            StageOutcome::Skipped(reason) => {
                self.skip(stage, &reason);
                Ok(None)
            }
            failed => {
                if failed.counts_as_failure() {
                    if let Some(key) = key {
                        self.mark(key, false);
                    }
                }
                if let Some(failure) = StageFailure::from_outcome(stage, &failed) {
                    warn!(stage = stage, kind = %failure.kind, error = %failure.message, "Stage failed");
                    self.emit(TelemetryEvent::StageFailed {
                        stage: stage.to_string(),
                        reason: failure.message.clone(),
                    });
                    run.failures.push(failure);
                }
                Ok(None)
            }
        }
    }

    fn gated(&self, stage: Stage, query: &Query) -> bool {
        let decision = self.gate.decide(stage, &query.hints);
        if !decision.allowed() {
            debug!(stage = %stage, reason = %decision.reason(), "Gate denied stage");
            self.skip(stage.as_str(), &decision.reason());
        }
        decision.allowed()
    }

    fn is_cooling(&self, source: &str) -> bool {
        catch_unwind(AssertUnwindSafe(|| self.cooldown.is_cooling_down(source))).unwrap_or(false)
    }

    fn mark(&self, source: &str, success: bool) {
        let result = catch_unwind(AssertUnwindSafe(|| {
            if success {
                self.cooldown.record_success(source)
            } else {
                self.cooldown.record_failure(source)
            }
        }));
        if result.is_err() {
            warn!(source = source, "Cooldown bookkeeping panicked");
        }
    }

    fn skip(&self, stage: &str, reason: &str) {
        self.emit(TelemetryEvent::StageSkipped {
            stage: stage.to_string(),
            reason: reason.to_string(),
        });
    }

    fn emit(&self, event: TelemetryEvent) {
        if catch_unwind(AssertUnwindSafe(|| self.telemetry.record(event))).is_err() {
            warn!("Telemetry sink panicked");
        }
    }
}

fn checkpoint(cancel: &CancellationToken) -> Step {
    if cancel.is_cancelled() {
        Err(Interrupted)
    } else {
        Ok(())
    }
}

fn gate_stage(tag: SourceTag) -> Stage {
    match tag {
        SourceTag::Web => Stage::Web,
        SourceTag::Vector => Stage::Vector,
        _ => Stage::Kg,
    }
}

/// Fixed fusion position of a heavy source
fn source_priority(tag: SourceTag) -> usize {
    SourceTag::HEAVY
        .iter()
        .position(|t| *t == tag)
        .unwrap_or(SourceTag::HEAVY.len())
}

fn origin_label(origin: PlanOrigin) -> &'static str {
    match origin {
        PlanOrigin::Static => "static",
        PlanOrigin::Heuristic => "heuristic",
        PlanOrigin::Tuned => "tuned",
        PlanOrigin::Pinned => "pinned",
        PlanOrigin::Fallback => "fallback",
    }
}

/// Cap the union of buffers to `limit` documents, taking rank 0 of every
/// buffer, then rank 1, and so on
fn cap_pool(buffers: Vec<(SourceTag, Vec<ScoredDocument>)>, limit: usize) -> Vec<(SourceTag, Vec<ScoredDocument>)> {
    let total: usize = buffers.iter().map(|(_, d)| d.len()).sum();
    if limit == 0 || total <= limit {
        return buffers;
    }

    let mut keep = vec![0usize; buffers.len()];
    let mut taken = 0;
    let deepest = buffers.iter().map(|(_, d)| d.len()).max().unwrap_or(0);
    'outer: for rank in 0..deepest {
        for (i, (_, docs)) in buffers.iter().enumerate() {
            if rank < docs.len() {
                keep[i] += 1;
                taken += 1;
                if taken == limit {
                    break 'outer;
                }
            }
        }
    }

    buffers
        .into_iter()
        .zip(keep)
        .map(|((tag, mut docs), n)| {
            docs.truncate(n);
            (tag, docs)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooldown::CooldownTracker;
    use crate::errors::{Result, RetrievalError};
    use crate::telemetry::TelemetryCollector;
    use crate::types::QueryHints;
    use async_trait::async_trait;

    struct Fixed {
        name: &'static str,
        docs: Vec<ScoredDocument>,
    }

    #[async_trait]
    impl SourceAdapter for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn retrieve(&self, _query: &Query) -> Result<Vec<ScoredDocument>> {
            Ok(self.docs.clone())
        }
    }

    struct Down;

    #[async_trait]
    impl SourceAdapter for Down {
        fn name(&self) -> &str {
            "web"
        }

        async fn retrieve(&self, _query: &Query) -> Result<Vec<ScoredDocument>> {
            Err(RetrievalError::source("web", "503"))
        }
    }

    fn docs(source: SourceTag, texts: &[&str]) -> Vec<ScoredDocument> {
        texts.iter().map(|t| ScoredDocument::new(*t, source, 0.5)).collect()
    }

    fn fixed(name: &'static str, source: SourceTag, texts: &[&str]) -> Arc<dyn SourceAdapter> {
        Arc::new(Fixed {
            name,
            docs: docs(source, texts),
        })
    }

    #[test]
    fn test_cap_pool_round_robin() {
        let buffers = vec![
            (SourceTag::Web, docs(SourceTag::Web, &["w1", "w2", "w3"])),
            (SourceTag::Vector, docs(SourceTag::Vector, &["v1"])),
            (SourceTag::Kg, docs(SourceTag::Kg, &["k1", "k2"])),
        ];
        let capped = cap_pool(buffers, 4);
        let lens: Vec<usize> = capped.iter().map(|(_, d)| d.len()).collect();
        assert_eq!(lens, vec![2, 1, 1]);
    }

    #[test]
    fn test_cap_pool_under_limit_untouched() {
        let buffers = vec![(SourceTag::Web, docs(SourceTag::Web, &["w1"]))];
        assert_eq!(cap_pool(buffers.clone(), 10), buffers);
    }

    #[tokio::test]
    async fn test_recall_folded_before_vector_with_dedup() {
        let orchestrator = RetrievalOrchestrator::new(OrchestratorConfig::default(), Arc::new(CooldownTracker::new()))
            .with_vector(fixed("vector", SourceTag::Vector, &["shared", "v-only"]))
            .with_recall(fixed("recall", SourceTag::Vector, &["pinned", "shared"]));

        let report = orchestrator
            .retrieve(Query::new("furina overview"), &CancellationToken::new())
            .await;
        let texts: Vec<&str> = report.evidence.documents().iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["pinned", "shared", "v-only"]);
    }

    #[tokio::test]
    async fn test_failure_is_reported_and_recorded() {
        let tracker = Arc::new(CooldownTracker::new());
        let telemetry = Arc::new(TelemetryCollector::new());
        let orchestrator = RetrievalOrchestrator::new(OrchestratorConfig::default(), tracker.clone())
            .with_web(Arc::new(Down))
            .with_kg(fixed("kg", SourceTag::Kg, &["fact"]))
            .with_telemetry(telemetry.clone());

        let report = orchestrator.retrieve(Query::new("tier list"), &CancellationToken::new()).await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, "web");
        assert_eq!(tracker.snapshot("web").map(|s| s.consecutive_failures), Some(1));
        assert_eq!(telemetry.failed_stages(), vec!["web".to_string()]);
        assert_eq!(report.evidence.len(), 1);
    }

    #[tokio::test]
    async fn test_plan_annotated_on_hints() {
        let orchestrator = RetrievalOrchestrator::new(OrchestratorConfig::default(), Arc::new(CooldownTracker::new()));
        let hints = QueryHints {
            web_top_k: Some(9),
            ..Default::default()
        };
        let report = orchestrator
            .retrieve(Query::new("anything").with_hints(hints), &CancellationToken::new())
            .await;
        assert_eq!(report.plan.web_k, 9);
        assert_eq!(report.query.hints.web_top_k, Some(9));
        assert_eq!(report.query.hints.vector_top_k, Some(report.plan.vector_k));
    }

    #[tokio::test]
    async fn test_alias_rewrites_query() {
        let mut config = OrchestratorConfig::default();
        config.aliases.insert("후리나".to_string(), "푸리나".to_string());
        let orchestrator = RetrievalOrchestrator::new(config, Arc::new(CooldownTracker::new()));

        let report = orchestrator.retrieve(Query::new("후리나 성유물"), &CancellationToken::new()).await;
        assert_eq!(report.query.text, "푸리나 성유물");
    }
}
