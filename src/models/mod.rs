// AuditaAI Data Models
// Shared value objects for the fidelity audit pipeline

use serde::{Deserialize, Serialize};

// ============ Severity / Verdict / Mode ============

/// Finding severity, ordered so that `max` promotes correctly across chunks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Parse a severity label from the judge. Accepts Portuguese and English
    /// labels, accent-tolerant; unknown labels fall back to Medium.
    pub fn from_label(label: &str) -> Self {
        let normalized: String = label
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| match c {
                'á' | 'â' | 'ã' => 'a',
                'é' | 'ê' => 'e',
                'í' => 'i',
                'ó' | 'ô' => 'o',
                'ú' => 'u',
                _ => c,
            })
            .collect();
        match normalized.as_str() {
            "baixa" | "low" => Self::Low,
            "media" | "medium" => Self::Medium,
            "alta" | "high" => Self::High,
            "critica" | "critical" => Self::Critical,
            _ => Self::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FindingVerdict {
    #[default]
    Suspect,
    Confirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditMode {
    StrictFidelity,
    Condensed,
}

impl AuditMode {
    pub fn from_str(val: &str) -> Self {
        match val.trim().to_lowercase().as_str() {
            "condensed" | "condensado" | "resumo" => Self::Condensed,
            _ => Self::StrictFidelity,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StrictFidelity => "strict-fidelity",
            Self::Condensed => "condensed",
        }
    }
}

// ============ Findings ============

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OmissionFinding {
    pub raw_excerpt: String,
    #[serde(default)]
    pub expected_location: String,
    #[serde(default)]
    pub impact: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub verdict: FindingVerdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_chunk: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DistortionFinding {
    pub raw_excerpt: String,
    pub formatted_excerpt: String,
    #[serde(default)]
    pub correction: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub verdict: FindingVerdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_chunk: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StructuralFinding {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub verdict: FindingVerdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_chunk: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContextFinding {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub verdict: FindingVerdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_chunk: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HallucinationFinding {
    pub formatted_excerpt: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub verdict: FindingVerdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_chunk: Option<i32>,
}

fn default_confidence() -> f64 {
    0.6
}

/// All findings of one report (or one chunk), grouped by kind.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FindingSet {
    #[serde(default)]
    pub omissions: Vec<OmissionFinding>,
    #[serde(default)]
    pub distortions: Vec<DistortionFinding>,
    #[serde(default)]
    pub structural_issues: Vec<StructuralFinding>,
    #[serde(default)]
    pub context_issues: Vec<ContextFinding>,
    #[serde(default)]
    pub hallucinations: Vec<HallucinationFinding>,
}

impl FindingSet {
    pub fn total(&self) -> usize {
        self.omissions.len()
            + self.distortions.len()
            + self.structural_issues.len()
            + self.context_issues.len()
            + self.hallucinations.len()
    }

    /// True iff the three content-critical kinds are all empty.
    pub fn critical_kinds_empty(&self) -> bool {
        self.omissions.is_empty() && self.distortions.is_empty() && self.hallucinations.is_empty()
    }

    pub fn max_severity(&self) -> Severity {
        let mut max = Severity::Low;
        for f in &self.omissions {
            max = max.max(f.severity);
        }
        for f in &self.distortions {
            max = max.max(f.severity);
        }
        for f in &self.structural_issues {
            max = max.max(f.severity);
        }
        for f in &self.context_issues {
            max = max.max(f.severity);
        }
        for f in &self.hallucinations {
            max = max.max(f.severity);
        }
        max
    }

    pub fn extend(&mut self, other: FindingSet) {
        self.omissions.extend(other.omissions);
        self.distortions.extend(other.distortions);
        self.structural_issues.extend(other.structural_issues);
        self.context_issues.extend(other.context_issues);
        self.hallucinations.extend(other.hallucinations);
    }
}

// ============ Metrics ============

/// Deterministic whole-document metrics, computed once per audit and shared
/// read-only with every chunk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AuditMetrics {
    pub raw_word_count: i64,
    pub formatted_word_count: i64,
    pub retention_ratio: f64,
    pub raw_reference_count: i64,
    pub formatted_reference_count: i64,
    pub reference_preservation_ratio: f64,
}

// ============ Chunking ============

/// UTF-8 byte offsets (0-based, end-exclusive) into the source text,
/// always aligned to char boundaries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkSpan {
    pub start: usize,
    pub end: usize,
}

impl ChunkSpan {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// One aligned (raw, formatted) excerpt pair sized to the judge's budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkPair {
    pub index: i32,
    pub raw_span: ChunkSpan,
    pub fmt_span: ChunkSpan,
    pub raw_text: String,
    pub formatted_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChunkingMetadata {
    pub chunk_count: i32,
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub model_context_tokens: i64,
}

// ============ Chunk audit result ============

/// Partial result for a single chunk. Immutable once produced by the
/// chunk auditor; the aggregator only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAudit {
    pub chunk_index: i32,
    pub approved: bool,
    pub score: f64,
    pub severity: Severity,
    pub findings: FindingSet,
    /// Word count of the chunk's raw excerpt; score-aggregation weight.
    pub raw_word_count: i64,
    pub pause_requested: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observations: Option<String>,
}

// ============ HIL pause / sub-audit ============

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PauseRecommendation {
    pub requested: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub critical_areas: Vec<String>,
}

/// Verdict of the source-attribution collaborator. Opaque to this engine
/// beyond the approval flag and the error list.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubAuditVerdict {
    pub approved: bool,
    #[serde(default)]
    pub critical_errors: Vec<String>,
}

// ============ Final report ============

/// The sole contract exposed to the HIL layer. `audit()` always produces
/// one, even on total pipeline failure (`degraded = true`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub report_id: String,
    pub generated_at: String,
    pub mode: String,
    pub approved: bool,
    pub score: f64,
    pub severity: Severity,
    pub findings: FindingSet,
    pub metrics: AuditMetrics,
    pub narrative_summary: String,
    pub pause_recommendation: PauseRecommendation,
    pub chunking: ChunkingMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_audit: Option<SubAuditVerdict>,
    #[serde(default)]
    pub degraded: bool,
}

impl AuditReport {
    pub fn new(mode: AuditMode, metrics: AuditMetrics, chunking: ChunkingMetadata) -> Self {
        Self {
            report_id: uuid::Uuid::new_v4().to_string(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            mode: mode.as_str().to_string(),
            approved: false,
            score: 0.0,
            severity: Severity::Low,
            findings: FindingSet::default(),
            metrics,
            narrative_summary: String::new(),
            pause_recommendation: PauseRecommendation::default(),
            chunking,
            sub_audit: None,
            degraded: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_labels() {
        assert_eq!(Severity::from_label("crítica"), Severity::Critical);
        assert_eq!(Severity::from_label("CRITICA"), Severity::Critical);
        assert_eq!(Severity::from_label("baixa"), Severity::Low);
        assert_eq!(Severity::from_label("high"), Severity::High);
        assert_eq!(Severity::from_label("média"), Severity::Medium);
        assert_eq!(Severity::from_label("whatever"), Severity::Medium);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_finding_set_max_severity() {
        let mut set = FindingSet::default();
        assert_eq!(set.max_severity(), Severity::Low);
        assert!(set.critical_kinds_empty());

        set.structural_issues.push(StructuralFinding {
            description: "numeração reiniciada".to_string(),
            severity: Severity::Medium,
            ..Default::default()
        });
        set.omissions.push(OmissionFinding {
            raw_excerpt: "trecho perdido".to_string(),
            severity: Severity::High,
            ..Default::default()
        });
        assert_eq!(set.max_severity(), Severity::High);
        assert!(!set.critical_kinds_empty());
        assert_eq!(set.total(), 2);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(AuditMode::from_str("condensed"), AuditMode::Condensed);
        assert_eq!(AuditMode::from_str("condensado"), AuditMode::Condensed);
        assert_eq!(AuditMode::from_str("strict-fidelity"), AuditMode::StrictFidelity);
        assert_eq!(AuditMode::from_str(""), AuditMode::StrictFidelity);
    }
}
