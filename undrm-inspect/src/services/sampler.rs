//! TOC sampling
//!
//! Long tables of contents are reduced to an order-preserving subsequence
//! before inference so the prompt stays small without losing the shape of
//! the book. Selection is deterministic: evenly strided indices over the
//! full list, always retaining the first and last entries.

use crate::models::{SampledToc, TocEntry};

/// TOCs at or below this length are always sent in full
pub const FULL_TOC_THRESHOLD: usize = 7;

/// Reduction never yields fewer entries than this
pub const MIN_SAMPLE: usize = 5;

/// Choose the TOC subsequence used for inference.
///
/// With `use_full` set, or for short TOCs, the list passes through
/// unchanged. Otherwise roughly half the entries are kept (at least
/// [`MIN_SAMPLE`]), strided evenly across the list so early, middle and
/// late structure all remain visible.
pub fn sample_toc(toc: &[TocEntry], use_full: bool) -> SampledToc {
    let n = toc.len();
    if use_full || n < FULL_TOC_THRESHOLD {
        return SampledToc {
            entries: toc.to_vec(),
            reduced: false,
        };
    }

    let k = (n / 2).clamp(MIN_SAMPLE, n);
    let entries = stride_indices(n, k)
        .into_iter()
        .map(|i| toc[i].clone())
        .collect::<Vec<_>>();

    tracing::debug!(total = n, sampled = entries.len(), "TOC reduced for inference");

    SampledToc {
        entries,
        reduced: true,
    }
}

/// `k` evenly spaced indices in `0..n`, first and last included, strictly
/// increasing after deduplication
fn stride_indices(n: usize, k: usize) -> Vec<usize> {
    debug_assert!(k >= 2 && k <= n);
    let mut indices = Vec::with_capacity(k);
    for i in 0..k {
        let idx = ((i as f64) * ((n - 1) as f64) / ((k - 1) as f64)).round() as usize;
        if indices.last() != Some(&idx) {
            indices.push(idx);
        }
    }
    indices
}
