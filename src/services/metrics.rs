// Document Metrics
// Whole-document deterministic measurements shared with every chunk

use crate::models::AuditMetrics;
use crate::services::references::extract_references;

/// Whitespace-delimited word count. The judge receives these numbers so it
/// never invents its own compression percentages.
pub fn count_words(text: &str) -> i64 {
    text.split_whitespace().count() as i64
}

/// Compute metrics over the complete raw and formatted texts (never per
/// chunk). Ratios degrade to 0.0 / 1.0 instead of dividing by zero.
pub fn compute_metrics(raw: &str, formatted: &str) -> AuditMetrics {
    let raw_word_count = count_words(raw);
    let formatted_word_count = count_words(formatted);

    let retention_ratio = if raw_word_count > 0 {
        formatted_word_count as f64 / raw_word_count as f64
    } else {
        0.0
    };

    let raw_refs = extract_references(raw);
    let formatted_refs = extract_references(formatted);
    let preserved = raw_refs.intersection(&formatted_refs).count() as i64;

    let reference_preservation_ratio = if raw_refs.is_empty() {
        1.0
    } else {
        preserved as f64 / raw_refs.len() as f64
    };

    AuditMetrics {
        raw_word_count,
        formatted_word_count,
        retention_ratio,
        raw_reference_count: raw_refs.len() as i64,
        formatted_reference_count: formatted_refs.len() as i64,
        reference_preservation_ratio,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_words() {
        assert_eq!(count_words(""), 0);
        assert_eq!(count_words("uma  frase   curta"), 3);
    }

    #[test]
    fn test_retention_ratio() {
        let m = compute_metrics("um dois três quatro", "um dois");
        assert_eq!(m.raw_word_count, 4);
        assert_eq!(m.formatted_word_count, 2);
        assert!((m.retention_ratio - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_reference_preservation() {
        let raw = "O juiz citou o art. 5 da CF e a Súmula 473.";
        let formatted = "O juiz citou o art. 5 da CF.";
        let m = compute_metrics(raw, formatted);
        assert!(m.raw_reference_count >= 3);
        assert!(m.reference_preservation_ratio < 1.0);
        assert!(m.reference_preservation_ratio > 0.0);
    }

    #[test]
    fn test_empty_inputs() {
        let m = compute_metrics("", "");
        assert_eq!(m.raw_word_count, 0);
        assert_eq!(m.retention_ratio, 0.0);
        assert_eq!(m.reference_preservation_ratio, 1.0);
    }
}
