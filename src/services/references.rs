// Legal Reference Extraction
// Deterministic regex battery for canonical citation tokens

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Patterns covering the citation shapes found in Brazilian legal
/// transcripts: statute articles and paragraphs, named statutes, súmulas,
/// repercussão-geral temas and CNJ-style case numbers.
fn reference_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // "art. 5", "artigo 12-A", "art 927"
            r"(?i)\bart(?:igo)?\.?\s*\d+(?:[ºo°])?(?:-[A-Za-z])?",
            // "§ 2º", "parágrafo 3"
            r"(?i)(?:§|par[áa]grafo)\s*\d+(?:[ºo°])?",
            // "lei nº 8.112/90", "lei complementar 123", "lei 9.099"
            r"(?i)\blei(?:\s+(?:complementar|federal|estadual|municipal))?\s+n?[ºo°]?\.?\s*[\d.]+(?:/\d{2,4})?",
            // named codes: "código civil", "código de processo penal"
            r"(?i)\bc[óo]digo\s+(?:civil|penal|tribut[áa]rio nacional|de\s+processo\s+(?:civil|penal)|de\s+defesa\s+do\s+consumidor)",
            // constitution shorthand: "CF/88", "CF", "CRFB"
            r"\b(?:CF|CRFB)(?:/\d{2,4})?\b",
            // "súmula 473", "súmula vinculante 13"
            r"(?i)\bs[úu]mula(?:\s+vinculante)?\s+n?[ºo°]?\.?\s*\d+",
            // "tema 1234"
            r"(?i)\btema\s+n?[ºo°]?\.?\s*\d+",
            // CNJ numbering: 0001234-56.2020.8.26.0100
            r"\d{7}-?\d{2}\.\d{4}\.\d\.\d{2}\.\d{4}",
            // court filing prefixes: "REsp 1.234.567", "HC 123456", "ADI 4277"
            r"(?i)\b(?:REsp|AREsp|RE|HC|MS|ADI|ADPF|ADC|RMS|AgRg)\s+n?[ºo°]?\.?\s*[\d.]+",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    })
}

/// Canonical form used for set membership: lowercased, inner whitespace
/// collapsed, trailing punctuation stripped.
fn canonicalize(token: &str) -> String {
    let lowered = token.trim().to_lowercase();
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(['.', ',', ';', ':'])
        .to_string()
}

/// Extract the set of legal reference tokens from a text. Pure; returns an
/// empty set for empty input.
pub fn extract_references(text: &str) -> HashSet<String> {
    let mut out = HashSet::new();
    if text.is_empty() {
        return out;
    }
    for pattern in reference_patterns() {
        for m in pattern.find_iter(text) {
            let token = canonicalize(m.as_str());
            if !token.is_empty() {
                out.insert(token);
            }
        }
    }
    out
}
