//! Fuzzy name recovery.
//!
//! When a deconvolved result comes back, the only link to its raw image is the
//! name embedded in the result file. Renames and suffixes break exact lookups,
//! so candidates are ranked by a case-insensitive edit-distance similarity.

/// Similarity in `[0, 1]`: `(max_len - levenshtein) / max_len`, computed on
/// the lowercased inputs and counted in chars. Two empty strings score 1.0.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();

    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }

    let distance = strsim::levenshtein(&a, &b);
    (longest - distance.min(longest)) as f64 / longest as f64
}

/// Winner of a [`best_match`] ranking.
#[derive(Debug, Clone)]
pub struct NameMatch<'a, T> {
    /// Position of the winner in the candidate slice
    pub index: usize,
    pub candidate: &'a T,
    pub score: f64,
}

/// Pick the candidate most similar to `target`; the first one wins ties.
/// Returns `None` only for an empty candidate list.
pub fn best_match<'a, T: AsRef<str>>(candidates: &'a [T], target: &str) -> Option<NameMatch<'a, T>> {
    best_match_by(candidates, target, |c| c.as_ref())
}

/// Like [`best_match`] but ranks on a name projected out of each candidate.
pub fn best_match_by<'a, T, F>(candidates: &'a [T], target: &str, name: F) -> Option<NameMatch<'a, T>>
where
    F: Fn(&T) -> &str,
{
    let mut best: Option<NameMatch<'a, T>> = None;

    for (index, candidate) in candidates.iter().enumerate() {
        let score = similarity(name(candidate), target);
        // Strictly greater keeps the first-seen candidate on ties
        if best.as_ref().is_none_or(|b| score > b.score) {
            best = Some(NameMatch { index, candidate, score });
        }
    }

    best
}
