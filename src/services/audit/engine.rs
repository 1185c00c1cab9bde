// Audit Engine
// Orchestrates plan -> concurrent chunk audits -> aggregate -> filter ->
// normalize, degrading to a deterministic fallback report on total failure.

use crate::models::{
    AuditMode, AuditReport, ChunkAudit, ChunkingMetadata, PauseRecommendation, Severity,
    SubAuditVerdict,
};
use crate::services::config_store::AuditConfig;
use crate::services::metrics::compute_metrics;
use crate::services::providers::{context_tokens_for, Judge, ProviderError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use super::aggregation::aggregate_chunks;
use super::chunk_auditor::audit_chunk;
use super::chunk_planner::plan_chunks;
use super::normalizer::normalize;
use super::post_filter::apply_filters;

/// Source-attribution collaborator. Its verdict is merged into the pause
/// recommendation and the pass gates; its internals are not this engine's
/// concern.
pub trait SourceAttribution: Send + Sync {
    fn verify(&self, raw: &str, formatted: &str, document_name: &str) -> SubAuditVerdict;
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("judge call failed: {0}")]
    Judge(#[from] ProviderError),
    #[error("chunk worker failed: {0}")]
    Worker(String),
}

pub struct AuditEngine {
    judge: Arc<dyn Judge>,
    sub_audit: Option<Arc<dyn SourceAttribution>>,
    config: AuditConfig,
}

impl AuditEngine {
    pub fn new(judge: Arc<dyn Judge>, config: AuditConfig) -> Self {
        Self {
            judge,
            sub_audit: None,
            config,
        }
    }

    pub fn with_sub_audit(mut self, sub_audit: Arc<dyn SourceAttribution>) -> Self {
        self.sub_audit = Some(sub_audit);
        self
    }

    /// Audit a formatted document against its raw source. Never fails: any
    /// pipeline error degrades to a fallback report, because downstream HIL
    /// logic treats "no report" as worse than "a failed report".
    pub async fn audit(&self, raw: &str, formatted: &str, mode: AuditMode) -> AuditReport {
        self.audit_document(raw, formatted, mode, "documento").await
    }

    pub async fn audit_document(
        &self,
        raw: &str,
        formatted: &str,
        mode: AuditMode,
        document_name: &str,
    ) -> AuditReport {
        match self.run(raw, formatted, mode, document_name).await {
            Ok(report) => report,
            Err(e) => {
                error!("[AUDIT_ENGINE] Pipeline failed, degrading: {}", e);
                fallback_report(raw, formatted, mode, &e.to_string())
            }
        }
    }

    async fn run(
        &self,
        raw: &str,
        formatted: &str,
        mode: AuditMode,
        document_name: &str,
    ) -> Result<AuditReport, AuditError> {
        let metrics = compute_metrics(raw, formatted);
        let context_tokens = context_tokens_for(&self.config.judge_model);
        let (pairs, chunking) = plan_chunks(raw, formatted, context_tokens, &self.config);
        let total = pairs.len();

        info!(
            "[AUDIT_ENGINE] Auditing '{}': {} chars raw, {} chars formatted, {} chunk(s), mode={}",
            document_name,
            raw.len(),
            formatted.len(),
            total,
            mode.as_str()
        );

        let mut chunks: Vec<ChunkAudit> = if total == 1 {
            // No pool overhead for a single chunk.
            vec![
                audit_chunk(
                    self.judge.as_ref(),
                    &pairs[0],
                    1,
                    &metrics,
                    mode,
                    self.config.max_retries,
                )
                .await?,
            ]
        } else {
            let semaphore = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
            let shared_metrics = Arc::new(metrics.clone());
            let mut join_set: JoinSet<Result<ChunkAudit, AuditError>> = JoinSet::new();

            for pair in pairs {
                let judge = Arc::clone(&self.judge);
                let semaphore = Arc::clone(&semaphore);
                let chunk_metrics = Arc::clone(&shared_metrics);
                let max_retries = self.config.max_retries;

                join_set.spawn(async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .map_err(|_| AuditError::Worker("semaphore closed".to_string()))?;
                    audit_chunk(judge.as_ref(), &pair, total, &chunk_metrics, mode, max_retries)
                        .await
                        .map_err(AuditError::from)
                });
            }

            // Wait for every chunk before aggregating; score weighting and
            // severity promotion need the complete set.
            let mut results: Vec<Result<ChunkAudit, AuditError>> = Vec::with_capacity(total);
            while let Some(joined) = join_set.join_next().await {
                results.push(joined.unwrap_or_else(|e| Err(AuditError::Worker(e.to_string()))));
            }
            results.into_iter().collect::<Result<Vec<_>, _>>()?
        };

        // Completion order is arbitrary; aggregation must be reproducible.
        chunks.sort_by_key(|c| c.chunk_index);

        let mut report = aggregate_chunks(&chunks, mode, &metrics, chunking);
        apply_filters(&mut report, raw, formatted);

        let sub_verdict = if self.config.sub_audit_enabled {
            self.sub_audit
                .as_ref()
                .map(|s| s.verify(raw, formatted, document_name))
        } else {
            None
        };

        normalize(&mut report, mode, sub_verdict, &self.config);
        Ok(report)
    }
}

/// Deterministic report for total pipeline failure, computed purely from
/// the two input texts.
fn fallback_report(raw: &str, formatted: &str, mode: AuditMode, failure: &str) -> AuditReport {
    let metrics = compute_metrics(raw, formatted);
    let mut report = AuditReport::new(mode, metrics, ChunkingMetadata::default());
    report.approved = false;
    report.score = 0.0;
    report.severity = Severity::Critical;
    report.degraded = true;
    report.narrative_summary =
        "Auditoria degradada: o pipeline falhou antes de concluir a avaliação por trechos."
            .to_string();
    report.pause_recommendation = PauseRecommendation {
        requested: true,
        reason: Some(format!("Falha total da auditoria automática: {}", failure)),
        critical_areas: vec!["auditoria automática indisponível".to_string()],
    };
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FindingVerdict;
    use crate::services::providers::JudgeFuture;

    struct FixedJudge {
        reply: String,
    }

    impl Judge for FixedJudge {
        fn invoke<'a>(&'a self, _system: &'a str, _user: &'a str) -> JudgeFuture<'a> {
            Box::pin(async move { Ok(self.reply.clone()) })
        }
    }

    struct FailingJudge;

    impl Judge for FailingJudge {
        fn invoke<'a>(&'a self, _system: &'a str, _user: &'a str) -> JudgeFuture<'a> {
            Box::pin(async move {
                Err(ProviderError::ApiError {
                    status: 500,
                    message: "boom".to_string(),
                })
            })
        }
    }

    struct RejectingSubAudit;

    impl SourceAttribution for RejectingSubAudit {
        fn verify(&self, _raw: &str, _formatted: &str, _document_name: &str) -> SubAuditVerdict {
            SubAuditVerdict {
                approved: false,
                critical_errors: vec!["fala atribuída ao depoente errado".to_string()],
            }
        }
    }

    const CLEAN_REPLY: &str = r#"{"aprovado": true, "nota_fidelidade": 9.4, "gravidade_geral": "baixa"}"#;

    fn test_config() -> AuditConfig {
        AuditConfig {
            max_retries: 2,
            ..Default::default()
        }
    }

    fn engine_with(reply: &str, config: AuditConfig) -> AuditEngine {
        AuditEngine::new(
            Arc::new(FixedJudge {
                reply: reply.to_string(),
            }),
            config,
        )
    }

    #[tokio::test]
    async fn test_stripped_article_fails_the_audit() {
        let raw = "Art. 5, XXXVI da CF garante o direito adquirido. Lorem ipsum dolor.";
        let formatted = "Lorem ipsum dolor.";
        let reply = r#"{
            "aprovado": false,
            "nota_fidelidade": 4.0,
            "gravidade_geral": "alta",
            "omissoes": [{
                "trecho_original": "Art. 5, XXXVI da CF garante o direito adquirido",
                "local_esperado": "início do documento",
                "impacto": "perda do fundamento constitucional",
                "gravidade": "alta"
            }]
        }"#;

        let engine = engine_with(reply, test_config());
        let report = engine.audit(raw, formatted, AuditMode::StrictFidelity).await;

        assert!(!report.approved);
        assert!(!report.degraded);
        assert_eq!(report.findings.omissions.len(), 1);
        assert_eq!(report.findings.omissions[0].verdict, FindingVerdict::Confirmed);
        assert!(report.severity >= Severity::High);
    }

    #[tokio::test]
    async fn test_fenced_reply_is_equivalent_to_plain() {
        let raw = "uma transcrição curta e completa para o teste de paridade";
        let formatted = "uma transcrição curta e completa para o teste de paridade";

        let plain = engine_with(CLEAN_REPLY, test_config())
            .audit(raw, formatted, AuditMode::StrictFidelity)
            .await;
        let fenced_reply = format!("Segue o resultado:\n```json\n{}\n```", CLEAN_REPLY);
        let fenced = engine_with(&fenced_reply, test_config())
            .audit(raw, formatted, AuditMode::StrictFidelity)
            .await;

        assert_eq!(plain.approved, fenced.approved);
        assert_eq!(plain.score, fenced.score);
        assert_eq!(plain.findings.total(), fenced.findings.total());
    }

    #[tokio::test]
    async fn test_clean_document_passes_with_floor_score() {
        let raw = "texto integral preservado palavra por palavra no documento";
        let formatted = "texto integral preservado palavra por palavra no documento";
        let low_scored = r#"{"aprovado": true, "nota_fidelidade": 6.0, "gravidade_geral": "baixa"}"#;

        let report = engine_with(low_scored, test_config())
            .audit(raw, formatted, AuditMode::StrictFidelity)
            .await;

        assert!(report.approved);
        assert_eq!(report.severity, Severity::Low);
        assert!(report.score >= 9.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_judge_failure_degrades_instead_of_raising() {
        let engine = AuditEngine::new(Arc::new(FailingJudge), test_config());
        let report = engine
            .audit("transcrição de teste", "documento de teste", AuditMode::StrictFidelity)
            .await;

        assert!(report.degraded);
        assert!(!report.approved);
        assert_eq!(report.severity, Severity::Critical);
        assert!(report.pause_recommendation.requested);
        assert!(!report
            .pause_recommendation
            .reason
            .as_deref()
            .unwrap_or_default()
            .is_empty());
        // Metrics are still real on the degraded path.
        assert_eq!(report.metrics.raw_word_count, 3);
    }

    #[tokio::test]
    async fn test_multi_chunk_fan_out_reassembles_by_index() {
        let raw = "palavra ".repeat(400);
        let formatted = "palavra ".repeat(392);
        let config = AuditConfig {
            judge_model: "modelo-desconhecido".to_string(),
            min_chunk_chars: 500,
            max_chunk_chars: 500,
            overlap_chars: 60,
            utilization_factor: 0.001,
            max_retries: 2,
            max_workers: 3,
            ..Default::default()
        };

        let report = engine_with(CLEAN_REPLY, config)
            .audit(&raw, &formatted, AuditMode::StrictFidelity)
            .await;

        assert!(report.chunking.chunk_count > 1);
        assert!(report.approved);
        assert!(!report.degraded);
    }

    #[tokio::test]
    async fn test_sub_audit_rejection_blocks_approval() {
        let raw = "conteúdo preservado integralmente";
        let formatted = "conteúdo preservado integralmente";
        let config = AuditConfig {
            sub_audit_enabled: true,
            max_retries: 2,
            ..Default::default()
        };
        let engine = AuditEngine::new(
            Arc::new(FixedJudge {
                reply: CLEAN_REPLY.to_string(),
            }),
            config,
        )
        .with_sub_audit(Arc::new(RejectingSubAudit));

        let report = engine.audit(raw, formatted, AuditMode::StrictFidelity).await;

        assert!(!report.approved);
        assert!(report.pause_recommendation.requested);
        assert!(report
            .pause_recommendation
            .critical_areas
            .iter()
            .any(|a| a.contains("depoente")));
    }
}
