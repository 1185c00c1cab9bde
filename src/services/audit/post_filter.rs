// False-Positive Post-Processor
// Deterministic filter battery for finding classes known to be artifacts of
// chunking or of the judge's limited visibility. Never re-invokes the judge.

use crate::models::{AuditReport, FindingVerdict};
use crate::services::references::extract_references;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::info;

/// Hard cap per finding list after deduplication.
const MAX_FINDINGS_PER_KIND: usize = 25;

/// Keyword share of a hallucination excerpt that must ground in the raw
/// text for the finding to be downgraded instead of kept.
const KEYWORD_GROUNDING_RATIO: f64 = 0.7;

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FilterOutcome {
    pub dropped_boundary: usize,
    pub dropped_truncation: usize,
    pub dropped_omissions: usize,
    pub confirmed_omissions: usize,
    pub dropped_hallucinations: usize,
    pub downgraded_hallucinations: usize,
    pub deduplicated: usize,
    pub capped: usize,
}

fn boundary_claim_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(termina|encerra|interromp|trunca|incomplet|cortad|finaliza|continua)")
            .unwrap()
    })
}

fn heading_claim_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:se[çc][ãa]o|cap[íi]tulo|item|t[óo]pico|cl[áa]usula|parte)\s*(\d+)")
            .unwrap()
    })
}

fn heading_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*(\d{1,3})[\.\)\-\s]").unwrap())
}

fn truncation_quote_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?s)["“]([^"”]{6,}?)(?:\.\.\.|…)["”]?"#).unwrap())
}

fn proper_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b\p{Lu}\p{Ll}+(?:\s+(?:d[aoe]s?\s+)?\p{Lu}\p{Ll}+)+").unwrap()
    })
}

/// Highest heading number present in the full formatted text, from numbered
/// lines and inline "seção N"-style markers.
fn max_heading_number(formatted: &str) -> Option<u32> {
    let mut max: Option<u32> = None;
    for caps in heading_line_re().captures_iter(formatted) {
        if let Ok(n) = caps[1].parse::<u32>() {
            max = Some(max.map_or(n, |m| m.max(n)));
        }
    }
    for caps in heading_claim_re().captures_iter(formatted) {
        if let Ok(n) = caps[1].parse::<u32>() {
            max = Some(max.map_or(n, |m| m.max(n)));
        }
    }
    max
}

/// Filter (a): a finding that claims the document ends or continues at
/// heading k is a chunk-boundary artifact when a later heading exists.
fn is_boundary_artifact(description: &str, max_heading: Option<u32>) -> bool {
    if !boundary_claim_re().is_match(description) {
        return false;
    }
    let Some(max_heading) = max_heading else {
        return false;
    };
    heading_claim_re()
        .captures_iter(description)
        .filter_map(|c| c[1].parse::<u32>().ok())
        .any(|claimed| max_heading > claimed)
}

/// Filter (b): a "cut off mid-word" claim is an artifact when the quoted
/// prefix continues with an alphanumeric character somewhere in the full
/// formatted text; it is genuine only at the document's true tail.
fn is_truncation_artifact(description: &str, formatted: &str) -> bool {
    for caps in truncation_quote_re().captures_iter(description) {
        let prefix = caps[1].trim_end();
        if prefix.is_empty() {
            continue;
        }
        if formatted.trim_end().ends_with(prefix) {
            // The document really does end there.
            continue;
        }
        let mut search_from = 0;
        while let Some(pos) = formatted[search_from..].find(prefix) {
            let after = search_from + pos + prefix.len();
            if formatted[after..].chars().next().is_some_and(|c| c.is_alphanumeric()) {
                return true;
            }
            search_from = search_from + pos + 1;
        }
    }
    false
}

fn normalize_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("|")
}

fn dedup_and_cap<T, F>(items: &mut Vec<T>, outcome: &mut FilterOutcome, key_fn: F)
where
    F: Fn(&T) -> String,
{
    let mut seen = HashSet::new();
    let before = items.len();
    items.retain(|item| seen.insert(key_fn(item)));
    outcome.deduplicated += before - items.len();

    if items.len() > MAX_FINDINGS_PER_KIND {
        outcome.capped += items.len() - MAX_FINDINGS_PER_KIND;
        items.truncate(MAX_FINDINGS_PER_KIND);
    }
}

/// Run the full filter battery over a draft report, in place.
pub fn apply_filters(report: &mut AuditReport, raw: &str, formatted: &str) -> FilterOutcome {
    let mut outcome = FilterOutcome::default();

    let max_heading = max_heading_number(formatted);
    let raw_refs = extract_references(raw);
    let formatted_refs = extract_references(formatted);
    let raw_lower = raw.to_lowercase();

    // (a) + (b): boundary and truncation artifacts in structural/context findings.
    report.findings.structural_issues.retain(|f| {
        if is_boundary_artifact(&f.description, max_heading) {
            outcome.dropped_boundary += 1;
            return false;
        }
        if is_truncation_artifact(&f.description, formatted) {
            outcome.dropped_truncation += 1;
            return false;
        }
        true
    });
    report.findings.context_issues.retain(|f| {
        if is_boundary_artifact(&f.description, max_heading) {
            outcome.dropped_boundary += 1;
            return false;
        }
        if is_truncation_artifact(&f.description, formatted) {
            outcome.dropped_truncation += 1;
            return false;
        }
        true
    });

    // (c): reference-grounded omission check.
    for finding in report.findings.omissions.iter_mut() {
        let tokens = extract_references(&finding.raw_excerpt);
        if tokens.is_empty() {
            continue;
        }
        let grounded: Vec<&String> = tokens.iter().filter(|t| raw_refs.contains(*t)).collect();
        if !grounded.is_empty() && grounded.iter().any(|t| !formatted_refs.contains(*t)) {
            finding.verdict = FindingVerdict::Confirmed;
        }
    }
    report.findings.omissions.retain(|finding| {
        let tokens = extract_references(&finding.raw_excerpt);
        if tokens.is_empty() {
            return true;
        }
        let grounded: Vec<&String> = tokens.iter().filter(|t| raw_refs.contains(*t)).collect();
        if grounded.is_empty() {
            // The cited token does not exist in the raw text at all; the
            // judge invented the citation.
            outcome.dropped_omissions += 1;
            return false;
        }
        if grounded.iter().all(|t| formatted_refs.contains(*t)) {
            // Everything the finding says is missing is in fact present.
            outcome.dropped_omissions += 1;
            return false;
        }
        outcome.confirmed_omissions += 1;
        true
    });

    // (d): name-grounded hallucination check.
    for finding in report.findings.hallucinations.iter_mut() {
        let excerpt = finding.formatted_excerpt.trim();
        if excerpt.is_empty() {
            continue;
        }
        let excerpt_grounded = raw_lower.contains(&excerpt.to_lowercase());
        let names: Vec<String> = proper_name_re()
            .find_iter(excerpt)
            .map(|m| m.as_str().to_lowercase())
            .collect();
        let all_names_grounded =
            !names.is_empty() && names.iter().all(|n| raw_lower.contains(n.as_str()));
        if excerpt_grounded || all_names_grounded {
            continue; // dropped in the retain below
        }

        let keywords: Vec<String> = excerpt
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|w| w.chars().count() >= 5)
            .collect();
        if !keywords.is_empty() {
            let grounded = keywords.iter().filter(|w| raw_lower.contains(w.as_str())).count();
            if grounded as f64 / keywords.len() as f64 >= KEYWORD_GROUNDING_RATIO {
                finding.confidence = (finding.confidence * 0.5).min(0.3);
                finding.verdict = FindingVerdict::Suspect;
                outcome.downgraded_hallucinations += 1;
            }
        }
    }
    report.findings.hallucinations.retain(|finding| {
        let excerpt = finding.formatted_excerpt.trim();
        if excerpt.is_empty() {
            return true;
        }
        let excerpt_grounded = raw_lower.contains(&excerpt.to_lowercase());
        let names: Vec<String> = proper_name_re()
            .find_iter(excerpt)
            .map(|m| m.as_str().to_lowercase())
            .collect();
        let all_names_grounded =
            !names.is_empty() && names.iter().all(|n| raw_lower.contains(n.as_str()));
        if excerpt_grounded || all_names_grounded {
            outcome.dropped_hallucinations += 1;
            return false;
        }
        true
    });

    // (e): deduplication and list caps.
    dedup_and_cap(&mut report.findings.omissions, &mut outcome, |f| {
        normalize_key(&["om", &f.raw_excerpt, &f.expected_location])
    });
    dedup_and_cap(&mut report.findings.distortions, &mut outcome, |f| {
        normalize_key(&["di", &f.raw_excerpt, &f.formatted_excerpt])
    });
    dedup_and_cap(&mut report.findings.structural_issues, &mut outcome, |f| {
        normalize_key(&["st", &f.description])
    });
    dedup_and_cap(&mut report.findings.context_issues, &mut outcome, |f| {
        normalize_key(&["ct", &f.description])
    });
    dedup_and_cap(&mut report.findings.hallucinations, &mut outcome, |f| {
        normalize_key(&["ha", &f.formatted_excerpt])
    });

    info!(
        "[POST_FILTER] boundary=-{} truncation=-{} omissions=-{}({} confirmed) hallucinations=-{}({} downgraded) dedup=-{} capped=-{}",
        outcome.dropped_boundary,
        outcome.dropped_truncation,
        outcome.dropped_omissions,
        outcome.confirmed_omissions,
        outcome.dropped_hallucinations,
        outcome.downgraded_hallucinations,
        outcome.deduplicated,
        outcome.capped
    );

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AuditMetrics, AuditMode, AuditReport, ChunkingMetadata, HallucinationFinding,
        OmissionFinding, Severity, StructuralFinding,
    };

    fn empty_report() -> AuditReport {
        AuditReport::new(
            AuditMode::StrictFidelity,
            AuditMetrics::default(),
            ChunkingMetadata::default(),
        )
    }

    fn structural(description: &str) -> StructuralFinding {
        StructuralFinding {
            description: description.to_string(),
            severity: Severity::Medium,
            ..Default::default()
        }
    }

    fn omission(raw_excerpt: &str) -> OmissionFinding {
        OmissionFinding {
            raw_excerpt: raw_excerpt.to_string(),
            severity: Severity::High,
            ..Default::default()
        }
    }

    fn hallucination(excerpt: &str) -> HallucinationFinding {
        HallucinationFinding {
            formatted_excerpt: excerpt.to_string(),
            confidence: 0.8,
            severity: Severity::High,
            ..Default::default()
        }
    }

    #[test]
    fn test_boundary_artifact_dropped_when_later_heading_exists() {
        let mut report = empty_report();
        report
            .findings
            .structural_issues
            .push(structural("O documento termina abruptamente na seção 3."));
        let formatted = "1. Relatório\n2. Fundamentação\n3. Mérito\n4. Dispositivo\ntexto final.";
        let outcome = apply_filters(&mut report, "transcrição qualquer", formatted);
        assert_eq!(outcome.dropped_boundary, 1);
        assert!(report.findings.structural_issues.is_empty());
    }

    #[test]
    fn test_boundary_claim_kept_when_no_later_heading() {
        let mut report = empty_report();
        report
            .findings
            .structural_issues
            .push(structural("O documento termina abruptamente na seção 4."));
        let formatted = "1. Relatório\n2. Fundamentação\n3. Mérito\n4. Dispositivo";
        let outcome = apply_filters(&mut report, "transcrição", formatted);
        assert_eq!(outcome.dropped_boundary, 0);
        assert_eq!(report.findings.structural_issues.len(), 1);
    }

    #[test]
    fn test_truncation_artifact_dropped_when_text_continues() {
        let mut report = empty_report();
        report.findings.structural_issues.push(structural(
            r#"Texto cortado no meio da palavra: "garantia do contr...""#,
        ));
        let formatted = "A garantia do contrato segue válida até o fim do prazo.";
        let outcome = apply_filters(&mut report, "raw", formatted);
        assert_eq!(outcome.dropped_truncation, 1);
        assert!(report.findings.structural_issues.is_empty());
    }

    #[test]
    fn test_truncation_kept_at_true_document_tail() {
        let mut report = empty_report();
        report.findings.structural_issues.push(structural(
            r#"Texto cortado no meio da palavra: "garantia do contr...""#,
        ));
        let formatted = "A cláusula prevê a garantia do contr";
        let outcome = apply_filters(&mut report, "raw", formatted);
        assert_eq!(outcome.dropped_truncation, 0);
        assert_eq!(report.findings.structural_issues.len(), 1);
    }

    #[test]
    fn test_omission_with_invented_reference_dropped() {
        let mut report = empty_report();
        report
            .findings
            .omissions
            .push(omission("conforme a Súmula 999 do tribunal"));
        let raw = "Texto sem nenhuma citação dessa súmula específica.";
        let outcome = apply_filters(&mut report, raw, "documento");
        assert_eq!(outcome.dropped_omissions, 1);
        assert!(report.findings.omissions.is_empty());
    }

    #[test]
    fn test_omission_confirmed_when_reference_missing_from_formatted() {
        let mut report = empty_report();
        report
            .findings
            .omissions
            .push(omission("o art. 5 da CF garante o direito adquirido"));
        let raw = "Art. 5, XXXVI da CF garante o direito adquirido. Lorem ipsum dolor.";
        let formatted = "Lorem ipsum dolor.";
        let outcome = apply_filters(&mut report, raw, formatted);
        assert_eq!(outcome.confirmed_omissions, 1);
        assert_eq!(report.findings.omissions.len(), 1);
        assert_eq!(report.findings.omissions[0].verdict, FindingVerdict::Confirmed);
    }

    #[test]
    fn test_omission_dropped_when_reference_present_in_formatted() {
        let mut report = empty_report();
        report.findings.omissions.push(omission("o art. 5 da CF"));
        let raw = "Art. 5 da CF e outras considerações.";
        let formatted = "O documento menciona o art. 5 da CF expressamente.";
        let outcome = apply_filters(&mut report, raw, formatted);
        assert_eq!(outcome.dropped_omissions, 1);
        assert!(report.findings.omissions.is_empty());
    }

    #[test]
    fn test_omission_without_reference_untouched() {
        let mut report = empty_report();
        report.findings.omissions.push(omission("depoimento da testemunha sobre o horário"));
        let outcome = apply_filters(&mut report, "raw qualquer", "documento");
        assert_eq!(outcome.dropped_omissions, 0);
        assert_eq!(report.findings.omissions.len(), 1);
        assert_eq!(report.findings.omissions[0].verdict, FindingVerdict::Suspect);
    }

    #[test]
    fn test_hallucination_dropped_when_name_grounded_in_raw() {
        let mut report = empty_report();
        report.findings.hallucinations.push(hallucination("João da Silva"));
        let raw = "A testemunha João da Silva compareceu à audiência e prestou depoimento.";
        let outcome = apply_filters(&mut report, raw, "documento");
        assert_eq!(outcome.dropped_hallucinations, 1);
        assert!(report.findings.hallucinations.is_empty());
    }

    #[test]
    fn test_hallucination_downgraded_on_partial_keyword_grounding() {
        let mut report = empty_report();
        report
            .findings
            .hallucinations
            .push(hallucination("perícia contábil apontou divergência patrimonial"));
        let raw = "A perícia contábil apontou valores. Houve divergência entre as partes \
                   quanto ao levantamento patrimonial apresentado.";
        let outcome = apply_filters(&mut report, raw, "documento");
        assert_eq!(outcome.downgraded_hallucinations, 1);
        assert_eq!(report.findings.hallucinations.len(), 1);
        assert!(report.findings.hallucinations[0].confidence <= 0.3);
        assert_eq!(report.findings.hallucinations[0].verdict, FindingVerdict::Suspect);
    }

    #[test]
    fn test_hallucination_kept_when_ungrounded() {
        let mut report = empty_report();
        report
            .findings
            .hallucinations
            .push(hallucination("indenização milionária aprovada por unanimidade"));
        let raw = "Discussão sobre prazos processuais, sem qualquer menção a valores.";
        let outcome = apply_filters(&mut report, raw, "documento");
        assert_eq!(outcome.dropped_hallucinations, 0);
        assert_eq!(report.findings.hallucinations.len(), 1);
        assert_eq!(report.findings.hallucinations[0].confidence, 0.8);
    }

    #[test]
    fn test_dedup_collapses_and_caps() {
        let mut report = empty_report();
        for _ in 0..3 {
            report.findings.omissions.push(omission("mesmo trecho omitido"));
        }
        for i in 0..40 {
            report
                .findings
                .structural_issues
                .push(structural(&format!("numeração divergente no parágrafo {}", i)));
        }
        let outcome = apply_filters(&mut report, "raw", "fmt");
        assert_eq!(report.findings.omissions.len(), 1);
        assert_eq!(outcome.deduplicated, 2);
        assert_eq!(report.findings.structural_issues.len(), MAX_FINDINGS_PER_KIND);
        assert_eq!(outcome.capped, 40 - MAX_FINDINGS_PER_KIND);
    }
}
