// Chunk Auditor
// Builds the judging prompt for one chunk pair, invokes the judge with
// bounded retry and parses its free-form response defensively.

use crate::models::{
    AuditMetrics, AuditMode, ChunkAudit, ChunkPair, ContextFinding, DistortionFinding, FindingSet,
    FindingVerdict, HallucinationFinding, OmissionFinding, Severity, StructuralFinding,
};
use crate::services::metrics::count_words;
use crate::services::providers::{Judge, ProviderError};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

/// Fixed delay before retrying a non-rate-limit judge error.
const GENERIC_RETRY_DELAY_SECS: u64 = 2;
const JITTER_MAX_MS: u64 = 2_000;

const AUDIT_SYSTEM_PROMPT: &str = r#"Você é um auditor de fidelidade documental. Compare o trecho do documento formatado com o trecho correspondente da transcrição bruta e identifique:
1. Omissões: conteúdo relevante da transcrição ausente do documento
2. Distorções: conteúdo alterado de forma que muda o sentido original
3. Problemas estruturais: numeração, ordem ou divisão incorretas
4. Problemas de contexto: afirmações deslocadas do seu contexto original
5. Alucinações: conteúdo do documento sem base na transcrição

Responda APENAS com JSON no formato:
{
  "aprovado": true/false,
  "nota_fidelidade": 0-10,
  "gravidade_geral": "baixa" | "media" | "alta" | "critica",
  "omissoes": [{"trecho_original": "...", "local_esperado": "...", "impacto": "...", "gravidade": "..."}],
  "distorcoes": [{"trecho_original": "...", "trecho_formatado": "...", "correcao": "...", "gravidade": "..."}],
  "problemas_estruturais": [{"descricao": "...", "localizacao": "...", "gravidade": "..."}],
  "problemas_contexto": [{"descricao": "...", "sugestao": "...", "gravidade": "..."}],
  "alucinacoes": [{"trecho_formatado": "...", "confianca": 0.0-1.0, "gravidade": "..."}],
  "observacoes_gerais": "...",
  "recomendacao_hil": {"pausar": true/false, "motivo": "...", "areas_criticas": ["..."]}
}

Use exclusivamente os números do bloco MÉTRICAS; não calcule suas próprias porcentagens de compressão. Não reporte problemas fora dos trechos fornecidos."#;

/// Positional note. Stating explicitly that a chunk is NOT the last one is
/// what keeps the judge from reporting "the document ends abruptly" at
/// every internal chunk boundary.
fn build_chunk_context(index: i32, total: usize) -> String {
    if total <= 1 {
        "CONTEXTO: os trechos abaixo cobrem o documento completo.".to_string()
    } else if (index as usize) + 1 == total {
        format!(
            "CONTEXTO: trecho {} de {}. Este é o ÚLTIMO trecho do documento.",
            index + 1,
            total
        )
    } else {
        format!(
            "CONTEXTO: trecho {} de {}. Este NÃO é o último trecho: o documento continua \
             após este excerto. NÃO conclua que o documento termina onde o excerto termina \
             e NÃO reporte cortes ou interrupções no fim do excerto.",
            index + 1,
            total
        )
    }
}

fn build_metrics_block(metrics: &AuditMetrics) -> String {
    format!(
        "MÉTRICAS (determinísticas, calculadas sobre os documentos completos):\n\
         - palavras na transcrição: {}\n\
         - palavras no documento formatado: {}\n\
         - razão de retenção: {:.3}\n\
         - referências legais na transcrição: {}\n\
         - referências legais no documento: {}\n\
         - razão de preservação de referências: {:.3}",
        metrics.raw_word_count,
        metrics.formatted_word_count,
        metrics.retention_ratio,
        metrics.raw_reference_count,
        metrics.formatted_reference_count,
        metrics.reference_preservation_ratio
    )
}

fn mode_note(mode: AuditMode) -> &'static str {
    match mode {
        AuditMode::StrictFidelity => {
            "MODO: fidelidade estrita. O documento deve preservar praticamente todo o conteúdo da transcrição."
        }
        AuditMode::Condensed => {
            "MODO: condensado. O documento é uma versão resumida; omissões de conteúdo \
             irrelevante são aceitáveis, mas fatos, decisões e referências legais devem ser preservados."
        }
    }
}

fn build_user_prompt(
    pair: &ChunkPair,
    total_chunks: usize,
    metrics: &AuditMetrics,
    mode: AuditMode,
) -> String {
    format!(
        "{}\n\n{}\n\n{}\n\n=== TRANSCRIÇÃO BRUTA (trecho) ===\n{}\n\n=== DOCUMENTO FORMATADO (trecho) ===\n{}",
        mode_note(mode),
        build_metrics_block(metrics),
        build_chunk_context(pair.index, total_chunks),
        pair.raw_text,
        pair.formatted_text
    )
}

// ============================================================================
// Judge wire schema (Portuguese field names, English aliases tolerated)
// ============================================================================

#[derive(Debug, Deserialize, Default)]
struct JudgeChunkResponse {
    #[serde(default, alias = "approved")]
    aprovado: bool,
    #[serde(default, alias = "score")]
    nota_fidelidade: f64,
    #[serde(default, alias = "severity")]
    gravidade_geral: Option<String>,
    #[serde(default, alias = "omissions")]
    omissoes: Vec<JudgeOmission>,
    #[serde(default, alias = "distortions")]
    distorcoes: Vec<JudgeDistortion>,
    #[serde(default, alias = "structural_issues")]
    problemas_estruturais: Vec<JudgeStructural>,
    #[serde(default, alias = "context_issues")]
    problemas_contexto: Vec<JudgeContext>,
    #[serde(default, alias = "hallucinations")]
    alucinacoes: Vec<JudgeHallucination>,
    #[serde(default, alias = "general_observations")]
    observacoes_gerais: Option<String>,
    #[serde(default, alias = "hil_recommendation")]
    recomendacao_hil: Option<JudgeHilRecommendation>,
}

#[derive(Debug, Deserialize, Default)]
struct JudgeOmission {
    #[serde(default, alias = "raw_excerpt")]
    trecho_original: String,
    #[serde(default, alias = "expected_location")]
    local_esperado: String,
    #[serde(default, alias = "impact")]
    impacto: String,
    #[serde(default, alias = "severity")]
    gravidade: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct JudgeDistortion {
    #[serde(default, alias = "raw_excerpt")]
    trecho_original: String,
    #[serde(default, alias = "formatted_excerpt")]
    trecho_formatado: String,
    #[serde(default, alias = "correction")]
    correcao: String,
    #[serde(default, alias = "severity")]
    gravidade: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct JudgeStructural {
    #[serde(default, alias = "description")]
    descricao: String,
    #[serde(default, alias = "location")]
    localizacao: Option<String>,
    #[serde(default, alias = "severity")]
    gravidade: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct JudgeContext {
    #[serde(default, alias = "description")]
    descricao: String,
    #[serde(default, alias = "suggestion")]
    sugestao: Option<String>,
    #[serde(default, alias = "severity")]
    gravidade: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct JudgeHallucination {
    #[serde(default, alias = "formatted_excerpt")]
    trecho_formatado: String,
    #[serde(default, alias = "confidence")]
    confianca: Option<f64>,
    #[serde(default, alias = "severity")]
    gravidade: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct JudgeHilRecommendation {
    #[serde(default, alias = "pause")]
    pausar: bool,
    #[serde(default, alias = "reason")]
    motivo: Option<String>,
    #[serde(default, alias = "critical_areas")]
    areas_criticas: Vec<String>,
}

fn finding_severity(label: &Option<String>) -> Severity {
    label
        .as_deref()
        .map(Severity::from_label)
        .unwrap_or(Severity::Medium)
}

// ============================================================================
// Response parsing: ordered chain of strategies, first success wins
// ============================================================================

fn candidate_direct(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.starts_with('{') {
        Some(trimmed.to_string())
    } else {
        None
    }
}

fn candidate_fenced(content: &str) -> Option<String> {
    static FENCE_RE: OnceLock<Regex> = OnceLock::new();
    let re = FENCE_RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").unwrap());
    re.captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn candidate_brace_span(content: &str) -> Option<String> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end > start {
        Some(content[start..=end].to_string())
    } else {
        None
    }
}

fn parse_judge_payload(content: &str) -> Option<JudgeChunkResponse> {
    let strategies: [fn(&str) -> Option<String>; 3] =
        [candidate_direct, candidate_fenced, candidate_brace_span];
    for strategy in strategies {
        if let Some(payload) = strategy(content) {
            if let Ok(parsed) = serde_json::from_str::<JudgeChunkResponse>(&payload) {
                return Some(parsed);
            }
        }
    }
    None
}

fn to_chunk_audit(resp: JudgeChunkResponse, chunk_index: i32, raw_word_count: i64) -> ChunkAudit {
    let mut findings = FindingSet::default();

    for o in resp.omissoes {
        findings.omissions.push(OmissionFinding {
            raw_excerpt: o.trecho_original,
            expected_location: o.local_esperado,
            impact: o.impacto,
            severity: finding_severity(&o.gravidade),
            verdict: FindingVerdict::Suspect,
            source_chunk: Some(chunk_index),
        });
    }
    for d in resp.distorcoes {
        findings.distortions.push(DistortionFinding {
            raw_excerpt: d.trecho_original,
            formatted_excerpt: d.trecho_formatado,
            correction: d.correcao,
            severity: finding_severity(&d.gravidade),
            verdict: FindingVerdict::Suspect,
            source_chunk: Some(chunk_index),
        });
    }
    for s in resp.problemas_estruturais {
        findings.structural_issues.push(StructuralFinding {
            description: s.descricao,
            location: s.localizacao,
            severity: finding_severity(&s.gravidade),
            verdict: FindingVerdict::Suspect,
            source_chunk: Some(chunk_index),
        });
    }
    for c in resp.problemas_contexto {
        findings.context_issues.push(ContextFinding {
            description: c.descricao,
            suggestion: c.sugestao,
            severity: finding_severity(&c.gravidade),
            verdict: FindingVerdict::Suspect,
            source_chunk: Some(chunk_index),
        });
    }
    for h in resp.alucinacoes {
        findings.hallucinations.push(HallucinationFinding {
            formatted_excerpt: h.trecho_formatado,
            confidence: h.confianca.unwrap_or(0.6).clamp(0.0, 1.0),
            severity: finding_severity(&h.gravidade),
            verdict: FindingVerdict::Suspect,
            source_chunk: Some(chunk_index),
        });
    }

    let severity = resp
        .gravidade_geral
        .as_deref()
        .map(Severity::from_label)
        .unwrap_or_else(|| findings.max_severity());

    let (pause_requested, pause_reason, critical_areas) = match resp.recomendacao_hil {
        Some(hil) => (hil.pausar, hil.motivo, hil.areas_criticas),
        None => (false, None, Vec::new()),
    };

    let mut observations = resp.observacoes_gerais.unwrap_or_default();
    if !critical_areas.is_empty() {
        if !observations.is_empty() {
            observations.push(' ');
        }
        observations.push_str(&format!("Áreas críticas: {}.", critical_areas.join(", ")));
    }

    ChunkAudit {
        chunk_index,
        approved: resp.aprovado,
        score: resp.nota_fidelidade.clamp(0.0, 10.0),
        severity,
        findings,
        raw_word_count,
        pause_requested,
        pause_reason,
        observations: if observations.is_empty() {
            None
        } else {
            Some(observations)
        },
    }
}

/// Result for a chunk whose judge reply could not be interpreted. The chunk
/// must never silently vanish from aggregation.
fn parse_failure_audit(chunk_index: i32, raw_word_count: i64, content: &str) -> ChunkAudit {
    let preview: String = content.chars().take(120).collect();
    let mut findings = FindingSet::default();
    findings.structural_issues.push(StructuralFinding {
        description: format!(
            "Resposta do juiz ilegível para o trecho {} (falha ao interpretar JSON): {}",
            chunk_index + 1,
            preview
        ),
        location: None,
        severity: Severity::Critical,
        verdict: FindingVerdict::Suspect,
        source_chunk: Some(chunk_index),
    });

    ChunkAudit {
        chunk_index,
        approved: false,
        score: 0.0,
        severity: Severity::Critical,
        findings,
        raw_word_count,
        pause_requested: false,
        pause_reason: None,
        observations: None,
    }
}

// ============================================================================
// Retry loop
// ============================================================================

/// Sub-second jitter so concurrent chunk retries don't re-align on the
/// provider's rate limiter.
fn jitter_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()) % JITTER_MAX_MS)
        .unwrap_or(0)
}

async fn call_judge_with_retry(
    judge: &dyn Judge,
    system: &str,
    user: &str,
    max_attempts: usize,
) -> Result<String, ProviderError> {
    let max_attempts = max_attempts.max(1);
    let mut last_err: Option<ProviderError> = None;

    for attempt in 0..max_attempts {
        match judge.invoke(system, user).await {
            Ok(content) => {
                if attempt > 0 {
                    info!("[CHUNK_AUDITOR] Judge ok after {} retries", attempt);
                }
                return Ok(content);
            }
            Err(e) => {
                if attempt + 1 < max_attempts {
                    let delay = if e.is_rate_limited() {
                        Duration::from_secs(1u64 << (attempt as u32 + 2))
                    } else {
                        Duration::from_secs(GENERIC_RETRY_DELAY_SECS)
                    };
                    let delay = delay + Duration::from_millis(jitter_ms());
                    warn!(
                        "[CHUNK_AUDITOR] Judge error attempt={} retry_in={:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    last_err = Some(e);
                    tokio::time::sleep(delay).await;
                } else {
                    last_err = Some(e);
                }
            }
        }
    }

    Err(last_err.unwrap_or(ProviderError::MissingContent))
}

/// Audit one chunk pair. Judge errors that survive the retry budget are
/// surfaced to the caller; unparseable replies degrade to a synthetic
/// critical result instead.
pub async fn audit_chunk(
    judge: &dyn Judge,
    pair: &ChunkPair,
    total_chunks: usize,
    metrics: &AuditMetrics,
    mode: AuditMode,
    max_retries: usize,
) -> Result<ChunkAudit, ProviderError> {
    let user_prompt = build_user_prompt(pair, total_chunks, metrics, mode);
    let raw_word_count = count_words(&pair.raw_text);

    let content = call_judge_with_retry(judge, AUDIT_SYSTEM_PROMPT, &user_prompt, max_retries).await?;

    match parse_judge_payload(&content) {
        Some(resp) => Ok(to_chunk_audit(resp, pair.index, raw_word_count)),
        None => {
            warn!(
                "[CHUNK_AUDITOR] Unparseable judge reply for chunk {} ({} chars)",
                pair.index,
                content.len()
            );
            Ok(parse_failure_audit(pair.index, raw_word_count, &content))
        }
    }
}
