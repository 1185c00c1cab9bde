// Aggregation Logic
// Merges per-chunk partial results into a single draft report

use crate::models::{
    AuditMetrics, AuditMode, AuditReport, ChunkAudit, ChunkingMetadata, Severity,
};
use tracing::info;

/// Merge all chunk results into a draft report.
/// - approval is the AND of all chunk approvals
/// - severity is promoted to the maximum observed
/// - the score is the mean weighted by each chunk's raw word count, so a
///   short degenerate tail chunk cannot swing the average
pub fn aggregate_chunks(
    chunks: &[ChunkAudit],
    mode: AuditMode,
    metrics: &AuditMetrics,
    chunking: ChunkingMetadata,
) -> AuditReport {
    let mut report = AuditReport::new(mode, metrics.clone(), chunking);

    if chunks.is_empty() {
        report.approved = false;
        report.severity = Severity::Critical;
        report.narrative_summary = "Nenhum trecho foi auditado.".to_string();
        report.pause_recommendation.requested = true;
        report.pause_recommendation.reason = Some("Auditoria sem resultados por trecho.".to_string());
        return report;
    }

    let total_weight: f64 = chunks.iter().map(|c| c.raw_word_count.max(1) as f64).sum();
    let weighted_score: f64 = chunks
        .iter()
        .map(|c| c.score * c.raw_word_count.max(1) as f64)
        .sum::<f64>()
        / total_weight.max(1.0);

    report.approved = chunks.iter().all(|c| c.approved);
    report.severity = chunks
        .iter()
        .map(|c| c.severity)
        .max()
        .unwrap_or(Severity::Low);
    report.score = weighted_score.clamp(0.0, 10.0);

    let mut reasons: Vec<String> = Vec::new();
    let mut critical_areas: Vec<String> = Vec::new();
    let mut observations: Vec<String> = Vec::new();

    for chunk in chunks {
        report.findings.extend(chunk.findings.clone());

        if chunk.pause_requested {
            report.pause_recommendation.requested = true;
        }
        if let Some(reason) = &chunk.pause_reason {
            if !reason.is_empty() && !reasons.contains(reason) {
                reasons.push(reason.clone());
            }
        }
        for area in observed_areas(chunk) {
            if !critical_areas.contains(&area) {
                critical_areas.push(area);
            }
        }
        if let Some(obs) = &chunk.observations {
            if !obs.is_empty() {
                observations.push(format!("[trecho {}] {}", chunk.chunk_index + 1, obs));
            }
        }
    }

    if !reasons.is_empty() {
        report.pause_recommendation.reason = Some(reasons.join("; "));
    }
    report.pause_recommendation.critical_areas = critical_areas;
    report.narrative_summary = observations.join("\n");

    info!(
        "[AGGREGATION] {} chunk(s) -> approved={} score={:.2} severity={:?} findings={}",
        chunks.len(),
        report.approved,
        report.score,
        report.severity,
        report.findings.total()
    );

    report
}

/// Critical-area tags a chunk contributes to the pause recommendation:
/// one tag per finding kind that reached High severity or above.
fn observed_areas(chunk: &ChunkAudit) -> Vec<String> {
    let mut areas = Vec::new();
    let f = &chunk.findings;
    if f.omissions.iter().any(|x| x.severity >= Severity::High) {
        areas.push("omissões".to_string());
    }
    if f.distortions.iter().any(|x| x.severity >= Severity::High) {
        areas.push("distorções".to_string());
    }
    if f.hallucinations.iter().any(|x| x.severity >= Severity::High) {
        areas.push("alucinações".to_string());
    }
    if f.structural_issues.iter().any(|x| x.severity >= Severity::High) {
        areas.push("estrutura".to_string());
    }
    areas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FindingSet, OmissionFinding};

    fn chunk(index: i32, approved: bool, score: f64, words: i64, severity: Severity) -> ChunkAudit {
        ChunkAudit {
            chunk_index: index,
            approved,
            score,
            severity,
            findings: FindingSet::default(),
            raw_word_count: words,
            pause_requested: false,
            pause_reason: None,
            observations: None,
        }
    }

    #[test]
    fn test_word_weighted_score() {
        let chunks = vec![
            chunk(0, true, 10.0, 100, Severity::Low),
            chunk(1, true, 6.0, 300, Severity::Low),
        ];
        let report = aggregate_chunks(
            &chunks,
            AuditMode::StrictFidelity,
            &AuditMetrics::default(),
            ChunkingMetadata::default(),
        );
        assert!((report.score - 7.0).abs() < 1e-9);
        assert!(report.approved);
    }

    #[test]
    fn test_approval_and_and_severity_max() {
        let chunks = vec![
            chunk(0, true, 9.0, 200, Severity::Low),
            chunk(1, false, 3.0, 200, Severity::High),
            chunk(2, true, 8.0, 200, Severity::Medium),
        ];
        let report = aggregate_chunks(
            &chunks,
            AuditMode::StrictFidelity,
            &AuditMetrics::default(),
            ChunkingMetadata::default(),
        );
        assert!(!report.approved);
        assert_eq!(report.severity, Severity::High);
    }

    #[test]
    fn test_pause_union_and_provenance() {
        let mut a = chunk(0, false, 4.0, 100, Severity::High);
        a.pause_requested = true;
        a.pause_reason = Some("omissão grave".to_string());
        a.findings.omissions.push(OmissionFinding {
            raw_excerpt: "trecho".to_string(),
            severity: Severity::High,
            source_chunk: Some(0),
            ..Default::default()
        });
        let mut b = chunk(1, true, 9.0, 100, Severity::Low);
        b.pause_reason = Some("omissão grave".to_string());

        let report = aggregate_chunks(
            &[a, b],
            AuditMode::StrictFidelity,
            &AuditMetrics::default(),
            ChunkingMetadata::default(),
        );
        assert!(report.pause_recommendation.requested);
        // Duplicated reasons collapse.
        assert_eq!(report.pause_recommendation.reason.as_deref(), Some("omissão grave"));
        assert_eq!(report.pause_recommendation.critical_areas, vec!["omissões"]);
        assert_eq!(report.findings.omissions[0].source_chunk, Some(0));
    }

    #[test]
    fn test_empty_chunks_degrade() {
        let report = aggregate_chunks(
            &[],
            AuditMode::StrictFidelity,
            &AuditMetrics::default(),
            ChunkingMetadata::default(),
        );
        assert!(!report.approved);
        assert_eq!(report.severity, Severity::Critical);
        assert!(report.pause_recommendation.requested);
    }
}
