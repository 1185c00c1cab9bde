// Chunk Planner
// Derives an adaptive chunk size from the judge's context budget and cuts
// aligned (raw, formatted) excerpt pairs covering the whole raw text.

use crate::models::{ChunkPair, ChunkSpan, ChunkingMetadata};
use crate::services::config_store::AuditConfig;
use tracing::info;

/// Rough character-per-token factor for the judge models in use.
const CHARS_PER_TOKEN: usize = 4;
/// Characters reserved for the instruction template, the metrics block and
/// the judge's own response budget.
const PROMPT_RESERVE_CHARS: usize = 12_000;

/// Snap a byte index down to the nearest char boundary.
fn char_floor(text: &str, idx: usize) -> usize {
    let mut idx = idx.min(text.len());
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Snap a byte index up to the nearest char boundary.
fn char_ceil(text: &str, idx: usize) -> usize {
    let mut idx = idx.min(text.len());
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

fn make_pair(raw: &str, formatted: &str, index: i32, raw_span: ChunkSpan, fmt_span: ChunkSpan) -> ChunkPair {
    ChunkPair {
        index,
        raw_span,
        fmt_span,
        raw_text: raw[raw_span.start..raw_span.end].to_string(),
        formatted_text: formatted[fmt_span.start..fmt_span.end].to_string(),
    }
}

/// Map a raw window onto the formatted text by linear interpolation over
/// the two lengths, clamped and snapped to char boundaries.
fn interpolate_fmt_span(formatted: &str, raw_len: usize, r0: usize, r1: usize) -> ChunkSpan {
    let fmt_len = formatted.len();
    let f0 = ((r0 as f64 / raw_len as f64) * fmt_len as f64).floor() as usize;
    let f1 = ((r1 as f64 / raw_len as f64) * fmt_len as f64).ceil() as usize;
    let start = char_floor(formatted, f0.min(fmt_len));
    let end = char_ceil(formatted, f1.min(fmt_len)).max(start);
    ChunkSpan { start, end }
}

/// Plan the chunk pairs for one audit. Raw spans are contiguous, cover
/// `[0, raw.len())` and consecutive spans overlap by the derived overlap
/// (except the clipped final span).
pub fn plan_chunks(
    raw: &str,
    formatted: &str,
    model_context_tokens: i64,
    config: &AuditConfig,
) -> (Vec<ChunkPair>, ChunkingMetadata) {
    let available_chars = ((model_context_tokens as f64
        * CHARS_PER_TOKEN as f64
        * config.utilization_factor) as usize)
        .saturating_sub(PROMPT_RESERVE_CHARS);

    // The prompt carries both excerpts, so a chunk's raw half gets half the
    // remaining budget.
    let max_chars = (available_chars / 2).clamp(config.min_chunk_chars, config.max_chunk_chars);
    let overlap_chars = config.overlap_chars.min(max_chars / 12);

    let mut metadata = ChunkingMetadata {
        chunk_count: 1,
        max_chars,
        overlap_chars: 0,
        model_context_tokens,
    };

    // Degenerate input: one full-span pair, the empty side spanning 0..0.
    if raw.is_empty() || formatted.is_empty() {
        let pair = make_pair(
            raw,
            formatted,
            0,
            ChunkSpan { start: 0, end: raw.len() },
            ChunkSpan { start: 0, end: formatted.len() },
        );
        return (vec![pair], metadata);
    }

    // Whole document fits: a single chunk avoids cross-chunk artifacts.
    if raw.len() + formatted.len() <= available_chars {
        let pair = make_pair(
            raw,
            formatted,
            0,
            ChunkSpan { start: 0, end: raw.len() },
            ChunkSpan { start: 0, end: formatted.len() },
        );
        return (vec![pair], metadata);
    }

    let raw_len = raw.len();
    let mut pairs = Vec::new();
    let mut start = 0usize;
    let mut index = 0i32;

    loop {
        let end = char_ceil(raw, (start + max_chars).min(raw_len)).min(raw_len);
        let raw_span = ChunkSpan { start, end };
        let fmt_span = interpolate_fmt_span(formatted, raw_len, start, end);
        pairs.push(make_pair(raw, formatted, index, raw_span, fmt_span));

        if end >= raw_len {
            break;
        }
        start = char_floor(raw, end - overlap_chars);
        index += 1;
    }

    metadata.chunk_count = pairs.len() as i32;
    metadata.overlap_chars = overlap_chars;
    info!(
        "[CHUNK_PLANNER] Planned {} chunk(s): max_chars={} overlap={} context_tokens={}",
        pairs.len(),
        max_chars,
        overlap_chars,
        model_context_tokens
    );

    (pairs, metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> AuditConfig {
        AuditConfig {
            min_chunk_chars: 500,
            max_chunk_chars: 500,
            overlap_chars: 60,
            ..Default::default()
        }
    }

    #[test]
    fn test_spans_cover_raw_with_configured_overlap() {
        let raw = "a".repeat(2_400);
        let formatted = "b".repeat(1_800);
        // A small context budget forces the sliding-window path.
        let (pairs, meta) = plan_chunks(&raw, &formatted, 1_000, &tiny_config());

        assert!(pairs.len() > 1);
        assert_eq!(pairs[0].raw_span.start, 0);
        assert_eq!(pairs.last().unwrap().raw_span.end, raw.len());
        for window in pairs.windows(2) {
            let (a, b) = (&window[0], &window[1]);
            // Contiguous with exact overlap.
            assert_eq!(a.raw_span.end - b.raw_span.start, meta.overlap_chars);
            assert!(b.raw_span.start < a.raw_span.end);
        }
        assert_eq!(meta.overlap_chars, 500 / 12);
    }

    #[test]
    fn test_single_chunk_short_circuit() {
        let raw = "palavra ".repeat(50);
        let formatted = "palavra ".repeat(48);
        let (pairs, meta) = plan_chunks(&raw, &formatted, 128_000, &AuditConfig::default());
        assert_eq!(pairs.len(), 1);
        assert_eq!(meta.overlap_chars, 0);
        assert_eq!(pairs[0].raw_span, ChunkSpan { start: 0, end: raw.len() });
        assert_eq!(pairs[0].fmt_span, ChunkSpan { start: 0, end: formatted.len() });
    }

    #[test]
    fn test_empty_raw_yields_degenerate_chunk() {
        let (pairs, _) = plan_chunks("", "algum texto", 128_000, &AuditConfig::default());
        assert_eq!(pairs.len(), 1);
        assert!(pairs[0].raw_span.is_empty());
        assert_eq!(pairs[0].formatted_text, "algum texto");
    }

    #[test]
    fn test_fmt_spans_clamped_and_monotonic() {
        let raw = "x".repeat(3_000);
        let formatted = "y".repeat(900);
        let (pairs, _) = plan_chunks(&raw, &formatted, 1_000, &tiny_config());
        for pair in &pairs {
            assert!(pair.fmt_span.start <= pair.fmt_span.end);
            assert!(pair.fmt_span.end <= formatted.len());
        }
        assert_eq!(pairs.last().unwrap().fmt_span.end, formatted.len());
    }

    #[test]
    fn test_multibyte_boundaries_never_split_chars() {
        // 'ç' and 'ã' are 2 bytes each in UTF-8.
        let raw = "ação não çç ".repeat(300);
        let formatted = "ação não ".repeat(250);
        let (pairs, _) = plan_chunks(&raw, &formatted, 1_000, &tiny_config());
        for pair in &pairs {
            // Slicing would have panicked on a split char; also check spans.
            assert!(raw.is_char_boundary(pair.raw_span.start));
            assert!(raw.is_char_boundary(pair.raw_span.end));
            assert!(formatted.is_char_boundary(pair.fmt_span.start));
            assert!(formatted.is_char_boundary(pair.fmt_span.end));
        }
    }
}
