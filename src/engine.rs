//! Fachada de roteamento de capabilities: compõe o
//! feature store, o spectral clusterer, o escorer SHGAT, o trainer online e o
//! router DR-DSP atrás de um único `RwLock` single-writer/many-reader.

use crate::config::Configuration;
use crate::error::EngineError;
use crate::external::{CapabilityRepository, Embedder, OutcomeSink};
use crate::router::{find_shortest_hyperpath as compute_hyperpath, HyperpathResult};
use crate::shgat::{CapabilityScore, ShgatScorer, ToolScore};
use crate::spectral::SpectralClusterer;
use crate::trainer::optimizer::AdamConfig;
use crate::trainer::{EngineState, OnlineTrainer, Outcome, TrainResult, TrainingExample};
use crate::types::{CapabilityId, Embedding, ToolId};
use crate::store::FeatureStore;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Os sub-componentes protegidos como uma única unidade transacional pelo
/// `RwLock` da fachada.
struct EngineInner {
    store: FeatureStore,
    clusterer: SpectralClusterer,
    scorer: ShgatScorer,
    trainer: OnlineTrainer,
}

impl EngineInner {
    fn ensure_fresh(&mut self) -> Result<(), EngineError> {
        self.clusterer.recompute_if_needed(&mut self.store)
    }
}

/// Um hop do plano executável sugerido por [`CapabilityRouter::suggest`]:
/// a ferramenta a invocar e os índices (em `Dag::tasks`) de seus predecessores.
#[derive(Debug, Clone)]
pub struct DagTask {
    pub tool_id: ToolId,
    pub depends_on: Vec<usize>,
}

/// Plano executável derivado do hiperpath DR-DSP entre a primeira e a última
/// ferramenta observada da melhor capability candidata.
#[derive(Debug, Clone)]
pub struct Dag {
    pub tasks: Vec<DagTask>,
}

/// Decisão de `suggest`: execução direta, um conjunto de sugestões com um
/// plano opcional, ou nenhuma decisão possível (nenhuma capability conhecida).
#[derive(Debug, Clone)]
pub enum SuggestDecision {
    Run {
        capability_id: CapabilityId,
        /// Plano executável da própria capability escolhida, na ordem de
        /// execução registrada em `tools_used` — sempre presente, já que uma
        /// capability registrada nunca tem `tools_used` vazio.
        dag: Dag,
    },
    Suggestions {
        top: Vec<CapabilityId>,
        dag: Option<Dag>,
    },
    None,
}

#[derive(Debug, Clone)]
pub struct SuggestResult {
    pub confidence: f64,
    pub decision: SuggestDecision,
}

/// Requisição de execução pronta para o chamador invocar, com `args` já
/// mesclado com os defaults do schema de parâmetros.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub capability_id: CapabilityId,
    pub external_id: String,
    pub args: Value,
}

/// Resultado observado de uma execução, repassado a `recordOutcome`.
#[derive(Debug, Clone)]
pub struct OutcomeEvent {
    pub capability_id: CapabilityId,
    pub intent_embedding: Embedding,
    pub context_tools: Vec<ToolId>,
    pub outcome: Outcome,
}

/// Fachada pública do motor de roteamento de capabilities.
pub struct CapabilityRouter {
    config: Configuration,
    embedder: Arc<dyn Embedder>,
    capability_repository: Arc<dyn CapabilityRepository>,
    outcome_sink: Arc<dyn OutcomeSink>,
    inner: RwLock<EngineInner>,
}

impl CapabilityRouter {
    pub fn new(
        config: Configuration,
        embedder: Arc<dyn Embedder>,
        capability_repository: Arc<dyn CapabilityRepository>,
        outcome_sink: Arc<dyn OutcomeSink>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let store = FeatureStore::new(config.embedding_dim, config.success_rate_epsilon);
        let clusterer = SpectralClusterer::new(
            config.spectral_k,
            config.damping,
            config.pagerank_tol,
            config.pagerank_max_iterations,
        );
        let scorer = ShgatScorer::new(config.max_recursion_layers);
        let adam = AdamConfig {
            learning_rate: config.learning_rate,
            l2_lambda: config.l2_lambda,
            ..AdamConfig::default()
        };
        // `adam_gate` must be sized by the scorer's actual gate-row count
        // (always `NUM_HEADS`, independent of `config.num_heads`), not by
        // the configured head count, or `apply_gradients` indexes out of
        // bounds whenever `config.num_heads != 4`.
        let trainer = OnlineTrainer::new(adam, 4, scorer.params.gate_weights.len(), 42);
        Ok(Self {
            inner: RwLock::new(EngineInner {
                store,
                clusterer,
                scorer,
                trainer,
            }),
            config,
            embedder,
            capability_repository,
            outcome_sink,
        })
    }

    #[instrument(skip(self, embedding))]
    pub async fn register_tool(
        &self,
        external_id: &str,
        embedding: Vec<f64>,
        server_id: &str,
        name: &str,
    ) -> Result<ToolId, EngineError> {
        let mut guard = self.inner.write().await;
        let id = guard
            .store
            .upsert_tool(external_id, embedding, server_id, name)?;
        guard.trainer.mark_initialized();
        Ok(id)
    }

    #[instrument(skip(self, embedding))]
    pub async fn register_capability(
        &self,
        external_id: &str,
        embedding: Vec<f64>,
        tools_used: Vec<ToolId>,
        success_rate: f64,
    ) -> Result<CapabilityId, EngineError> {
        let mut guard = self.inner.write().await;
        let id = guard
            .store
            .upsert_capability(external_id, embedding, tools_used, success_rate)?;
        guard.trainer.mark_initialized();
        Ok(id)
    }

    async fn ensure_fresh(&self) -> Result<(), EngineError> {
        let mut guard = self.inner.write().await;
        guard.ensure_fresh()
    }

    /// `scoreCapabilities(intentEmbedding, contextTools) -> ranked list`
    ///.
    #[instrument(skip(self, intent))]
    pub async fn score_capabilities(
        &self,
        intent: &Embedding,
        context_tools: &[ToolId],
    ) -> Result<Vec<CapabilityScore>, EngineError> {
        self.ensure_fresh().await?;
        let guard = self.inner.read().await;
        Ok(guard
            .scorer
            .score_capabilities(&guard.store, &guard.clusterer, intent, context_tools))
    }

    /// `scoreTools(intentEmbedding, contextTools) -> ranked list`.
    #[instrument(skip(self, intent))]
    pub async fn score_tools(
        &self,
        intent: &Embedding,
        context_tools: &[ToolId],
    ) -> Result<Vec<ToolScore>, EngineError> {
        self.ensure_fresh().await?;
        let guard = self.inner.read().await;
        Ok(guard
            .scorer
            .score_tools(&guard.store, &guard.clusterer, intent, context_tools))
    }

    /// `discover(intentText) -> rankedTools`: encoda o
    /// texto de intenção, reusa `scoreTools` para o ranking, e trunca ao
    /// top-`discover_top_n` configurado.
    #[instrument(skip(self))]
    pub async fn discover(&self, intent_text: &str) -> Result<Vec<ToolScore>, EngineError> {
        let intent = self.embedder.encode(intent_text).await?;
        let mut scored = self.score_tools(&intent, &[]).await?;
        scored.truncate(self.config.discover_top_n);
        Ok(scored)
    }

    /// `suggest(intentEmbedding, contextTools) -> {confidence, decision}`:
    /// quando nenhuma capability está registrada, este
    /// método degrada graciosamente a `SuggestDecision::None` com confiança
    /// zero em vez de propagar `NoCapabilities` como erro — `suggest` é uma
    /// consulta de planejamento, não uma operação que deveria falhar só
    /// porque o motor ainda está vazio (decisão registrada em `DESIGN.md`).
    #[instrument(skip(self, intent))]
    pub async fn suggest(
        &self,
        intent: &Embedding,
        context_tools: &[ToolId],
    ) -> Result<SuggestResult, EngineError> {
        self.ensure_fresh().await?;
        let guard = self.inner.read().await;
        let scored =
            guard
                .scorer
                .score_capabilities(&guard.store, &guard.clusterer, intent, context_tools);
        let Some(best) = scored.first() else {
            return Ok(SuggestResult {
                confidence: 0.0,
                decision: SuggestDecision::None,
            });
        };
        let success_rate = guard
            .store
            .capability(best.capability_id)
            .map(|c| c.success_rate)
            .unwrap_or(0.0);
        let confidence = best.score;

        if confidence >= self.config.acceptance_threshold
            && success_rate >= self.config.reliability_threshold
        {
            let dag = guard
                .store
                .capability(best.capability_id)
                .map(|cap| build_dag(&cap.tools_used))
                .unwrap_or(Dag { tasks: Vec::new() });
            return Ok(SuggestResult {
                confidence,
                decision: SuggestDecision::Run {
                    capability_id: best.capability_id,
                    dag,
                },
            });
        }

        let top: Vec<CapabilityId> = scored.iter().take(3).map(|s| s.capability_id).collect();
        let dag = guard.store.capability(best.capability_id).and_then(|cap| {
            let first = *cap.tools_used.first()?;
            let last = *cap.tools_used.last()?;
            if first == last {
                return None;
            }
            let result = compute_hyperpath(&guard.store, first, last, None).ok()?;
            if !result.found {
                return None;
            }
            Some(build_dag(&result.node_sequence))
        });

        Ok(SuggestResult {
            confidence,
            decision: SuggestDecision::Suggestions { top, dag },
        })
    }

    /// `accept(callName, args) -> ExecutionRequest`: resolve `callName` para
    /// uma capability registrada e mescla `args`
    /// sobre os defaults do schema de parâmetros do [`CapabilityRepository`]
    /// externo — valores fornecidos pelo chamador sempre vencem.
    #[instrument(skip(self, args))]
    pub async fn accept(&self, call_name: &str, args: Value) -> Result<ExecutionRequest, EngineError> {
        let capability_id = {
            let guard = self.inner.read().await;
            guard
                .store
                .capability_id_by_external(call_name)
                .ok_or_else(|| EngineError::UnknownCapability(call_name.to_string()))?
        };
        let record = self.capability_repository.get(capability_id).await?;
        let schema = record.as_ref().and_then(|r| r.parameters_schema.as_ref());
        let merged_args = merge_with_schema_defaults(schema, args);
        Ok(ExecutionRequest {
            capability_id,
            external_id: call_name.to_string(),
            args: merged_args,
        })
    }

    /// `recordOutcome(capabilityId, outcome) -> {}`: o exemplo é anexado ao
    /// [`OutcomeSink`] durável antes de atualizar os
    /// agregados em memória, então uma falha no meio do caminho nunca perde
    /// a observação.
    #[instrument(skip(self, event))]
    pub async fn record_outcome(&self, event: OutcomeEvent) -> Result<(), EngineError> {
        {
            let guard = self.inner.read().await;
            if guard.store.capability(event.capability_id).is_none() {
                return Err(EngineError::UnknownCapability(
                    event.capability_id.to_string(),
                ));
            }
        }
        let example = TrainingExample {
            intent_embedding: event.intent_embedding.clone(),
            context_tools: event.context_tools.clone(),
            candidate_capability_id: event.capability_id,
            outcome: event.outcome,
        };
        self.outcome_sink.append(example).await?;

        let mut guard = self.inner.write().await;
        guard
            .store
            .record_capability_outcome(event.capability_id, event.outcome == Outcome::Success)?;
        Ok(())
    }

    /// `train(epochs, batchSize, callback) -> {epochsRun, finalLoss}`
    ///.
    #[instrument(skip(self, examples, on_epoch))]
    pub async fn train(
        &self,
        examples: &[TrainingExample],
        epochs: u32,
        cancellation: Option<&CancellationToken>,
        on_epoch: impl FnMut(u32, f64, f64),
    ) -> Result<TrainResult, EngineError> {
        self.ensure_fresh().await?;
        let mut guard = self.inner.write().await;
        let EngineInner {
            store,
            clusterer,
            scorer,
            trainer,
        } = &mut *guard;
        trainer.train(store, clusterer, scorer, examples, epochs, cancellation, on_epoch)
    }

    #[instrument(skip(self, cancellation))]
    pub async fn find_shortest_hyperpath(
        &self,
        source: ToolId,
        target: ToolId,
        cancellation: Option<&CancellationToken>,
    ) -> Result<HyperpathResult, EngineError> {
        self.ensure_fresh().await?;
        let guard = self.inner.read().await;
        compute_hyperpath(&guard.store, source, target, cancellation)
    }

    pub async fn snapshot_params(&self) -> Result<Vec<u8>, EngineError> {
        self.inner.read().await.scorer.snapshot_params()
    }

    pub async fn load_params(&self, bytes: &[u8]) -> Result<(), EngineError> {
        self.inner.write().await.scorer.load_params(bytes)
    }

    pub async fn recover_from_quarantine(&self) -> Result<(), EngineError> {
        self.inner.write().await.trainer.recover_from_quarantine()
    }

    pub async fn state(&self) -> EngineState {
        self.inner.read().await.trainer.state.clone()
    }
}

fn build_dag(node_sequence: &[ToolId]) -> Dag {
    let tasks = node_sequence
        .iter()
        .enumerate()
        .map(|(i, &tool_id)| DagTask {
            tool_id,
            depends_on: if i == 0 { Vec::new() } else { vec![i - 1] },
        })
        .collect();
    Dag { tasks }
}

/// Sobrepõe `args` aos defaults declarados em `schema.properties.*.default`,
/// deixando `args` intocado quando não há schema.
fn merge_with_schema_defaults(schema: Option<&Value>, args: Value) -> Value {
    let Some(schema) = schema else { return args };
    let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
        return args;
    };
    let mut merged = serde_json::Map::new();
    for (key, prop) in properties {
        if let Some(default) = prop.get("default") {
            merged.insert(key.clone(), default.clone());
        }
    }
    if let Some(obj) = args.as_object() {
        for (k, v) in obj {
            merged.insert(k.clone(), v.clone());
        }
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::test_util::{
        InMemoryCapabilityRepository, InMemoryOutcomeSink, MockEmbedder,
    };
    use crate::external::CapabilityRecord;
    use serde_json::json;

    async fn router_with_capability(
        success_rate: f64,
    ) -> (CapabilityRouter, ToolId, ToolId, CapabilityId) {
        let mut config = Configuration::default();
        config.embedding_dim = 4;
        config.spectral_k = 1;
        let router = CapabilityRouter::new(
            config,
            Arc::new(MockEmbedder::new(4)),
            Arc::new(InMemoryCapabilityRepository::new()),
            Arc::new(InMemoryOutcomeSink::new()),
        )
        .unwrap();

        let t0 = router
            .register_tool("fs:read", vec![1.0, 0.0, 0.0, 0.0], "fs", "read")
            .await
            .unwrap();
        let t1 = router
            .register_tool("json:parse", vec![0.0, 1.0, 0.0, 0.0], "json", "parse")
            .await
            .unwrap();
        let cap = router
            .register_capability(
                "cap.fs.read_json",
                vec![1.0, 0.0, 0.0, 0.0],
                vec![t0, t1],
                success_rate,
            )
            .await
            .unwrap();
        (router, t0, t1, cap)
    }

    #[tokio::test]
    async fn suggest_runs_directly_when_confident_and_reliable() {
        let (router, _t0, _t1, cap) = router_with_capability(0.95).await;
        let intent = Embedding::new_unchecked(vec![1.0, 0.0, 0.0, 0.0]);
        let result = router.suggest(&intent, &[]).await.unwrap();
        match result.decision {
            SuggestDecision::Run { capability_id, dag } => {
                assert_eq!(capability_id, cap);
                assert_eq!(dag.tasks.len(), 2);
            }
            other => panic!("expected Run decision, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn suggest_falls_back_to_suggestions_below_reliability_threshold() {
        let (router, _t0, _t1, _cap) = router_with_capability(0.2).await;
        let intent = Embedding::new_unchecked(vec![1.0, 0.0, 0.0, 0.0]);
        let result = router.suggest(&intent, &[]).await.unwrap();
        assert!(matches!(result.decision, SuggestDecision::Suggestions { .. }));
    }

    #[tokio::test]
    async fn suggest_degrades_to_none_with_no_capabilities_registered() {
        let config = Configuration {
            embedding_dim: 4,
            spectral_k: 1,
            ..Configuration::default()
        };
        let router = CapabilityRouter::new(
            config,
            Arc::new(MockEmbedder::new(4)),
            Arc::new(InMemoryCapabilityRepository::new()),
            Arc::new(InMemoryOutcomeSink::new()),
        )
        .unwrap();
        let intent = Embedding::new_unchecked(vec![1.0, 0.0, 0.0, 0.0]);
        let result = router.suggest(&intent, &[]).await.unwrap();
        assert_eq!(result.confidence, 0.0);
        assert!(matches!(result.decision, SuggestDecision::None));
    }

    #[tokio::test]
    async fn accept_merges_schema_defaults_under_caller_args() {
        let cap = CapabilityId(0);
        let repo = InMemoryCapabilityRepository::new();
        repo.insert(CapabilityRecord {
            id: cap,
            external_id: "cap.fs.read_json".into(),
            code_hash: "abc".into(),
            success_rate: 0.9,
            usage_count: 0,
            duration_ms: 0.0,
            tools_used: vec![],
            parameters_schema: Some(json!({
                "properties": {
                    "path": {"default": "/tmp/default.json"},
                    "encoding": {"default": "utf-8"}
                }
            })),
            description: None,
        });
        let router = CapabilityRouter::new(
            Configuration {
                embedding_dim: 4,
                spectral_k: 1,
                ..Configuration::default()
            },
            Arc::new(MockEmbedder::new(4)),
            Arc::new(repo),
            Arc::new(InMemoryOutcomeSink::new()),
        )
        .unwrap();
        router
            .register_tool("fs:read", vec![1.0, 0.0, 0.0, 0.0], "fs", "read")
            .await
            .unwrap();
        router
            .register_capability(
                "cap.fs.read_json",
                vec![1.0, 0.0, 0.0, 0.0],
                vec![ToolId(0)],
                0.9,
            )
            .await
            .unwrap();
        let request = router
            .accept("cap.fs.read_json", json!({"path": "/override.json"}))
            .await
            .unwrap();
        assert_eq!(request.args["path"], "/override.json");
        assert_eq!(request.args["encoding"], "utf-8");
    }

    #[tokio::test]
    async fn accept_rejects_unknown_call_name() {
        let (router, ..) = router_with_capability(0.9).await;
        let err = router.accept("cap.unknown", json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownCapability(_)));
    }

    #[tokio::test]
    async fn record_outcome_updates_success_rate_and_appends_to_sink() {
        let (router, t0, _t1, cap) = router_with_capability(0.5).await;
        router
            .record_outcome(OutcomeEvent {
                capability_id: cap,
                intent_embedding: Embedding::new_unchecked(vec![1.0, 0.0, 0.0, 0.0]),
                context_tools: vec![t0],
                outcome: Outcome::Success,
            })
            .await
            .unwrap();
        let scored = router
            .score_capabilities(&Embedding::new_unchecked(vec![1.0, 0.0, 0.0, 0.0]), &[])
            .await
            .unwrap();
        let updated = scored.iter().find(|s| s.capability_id == cap).unwrap();
        assert!(updated.score > 0.0);
    }

    #[tokio::test]
    async fn record_outcome_rejects_unknown_capability() {
        let (router, t0, ..) = router_with_capability(0.5).await;
        let err = router
            .record_outcome(OutcomeEvent {
                capability_id: CapabilityId(999),
                intent_embedding: Embedding::new_unchecked(vec![1.0, 0.0, 0.0, 0.0]),
                context_tools: vec![t0],
                outcome: Outcome::Success,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownCapability(_)));
    }

    #[tokio::test]
    async fn discover_truncates_to_configured_top_n() {
        let mut config = Configuration {
            embedding_dim: 4,
            spectral_k: 1,
            ..Configuration::default()
        };
        config.discover_top_n = 1;
        let router = CapabilityRouter::new(
            config,
            Arc::new(MockEmbedder::new(4)),
            Arc::new(InMemoryCapabilityRepository::new()),
            Arc::new(InMemoryOutcomeSink::new()),
        )
        .unwrap();
        router
            .register_tool("fs:read", vec![1.0, 0.0, 0.0, 0.0], "fs", "read")
            .await
            .unwrap();
        router
            .register_tool("json:parse", vec![0.0, 1.0, 0.0, 0.0], "json", "parse")
            .await
            .unwrap();
        let discovered = router.discover("read a file").await.unwrap();
        assert_eq!(discovered.len(), 1);
    }

    #[tokio::test]
    async fn find_shortest_hyperpath_reaches_through_shared_tool() {
        let (router, t0, t1, _cap) = router_with_capability(0.9).await;
        let result = router
            .find_shortest_hyperpath(t0, t1, None)
            .await
            .unwrap();
        assert!(result.found);
    }
}
