// Token-aligned reward values.
//
// A TokenXent is the canonical reward currency of the harness: an ordered
// sequence of (token surface, cross-entropy) pairs, one per token of the
// scored text under the judge's tokenizer. All reward arithmetic stays at
// token grain — the elementwise operations in the judge gateway require
// exact token alignment and fail hard on drift rather than resizing.

use serde::{Deserialize, Serialize};

/// A token-aligned sequence of (surface, xent) pairs, in bits.
///
/// Serialises to JSON as the bare pair list, e.g.
/// `[["Once", 4.1], [" upon", 0.7]]`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenXent(Vec<(String, f64)>);

impl TokenXent {
    pub fn new(pairs: Vec<(String, f64)>) -> Self {
        Self(pairs)
    }

    /// Total cross-entropy in bits: the sum over all tokens.
    pub fn total(&self) -> f64 {
        self.0.iter().map(|(_, x)| x).sum()
    }

    /// Number of tokens.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The first `n` tokens (or all of them if `n` exceeds the length).
    pub fn take_tokens(&self, n: usize) -> TokenXent {
        TokenXent(self.0.iter().take(n).cloned().collect())
    }

    /// Concatenation of all token surfaces. For a xent computed by a
    /// well-behaved judge this reproduces the scored text exactly.
    pub fn surface(&self) -> String {
        self.0.iter().map(|(s, _)| s.as_str()).collect()
    }

    pub fn pairs(&self) -> &[(String, f64)] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, f64)> {
        self.0.iter()
    }

    /// Elementwise transform of the xent values, surfaces untouched.
    pub fn map_values(&self, f: impl Fn(f64) -> f64) -> TokenXent {
        TokenXent(self.0.iter().map(|(s, x)| (s.clone(), f(*x))).collect())
    }
}

impl std::fmt::Display for TokenXent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3} bits over {} tokens", self.total(), self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TokenXent {
        TokenXent::new(vec![
            ("Once".to_string(), 4.0),
            (" upon".to_string(), 0.5),
            (" a".to_string(), 0.25),
        ])
    }

    #[test]
    fn total_is_additive() {
        assert!((sample().total() - 4.75).abs() < 1e-12);
    }

    #[test]
    fn surface_concatenates_in_order() {
        assert_eq!(sample().surface(), "Once upon a");
    }

    #[test]
    fn take_tokens_slices_at_token_grain() {
        let sliced = sample().take_tokens(2);
        assert_eq!(sliced.len(), 2);
        assert_eq!(sliced.surface(), "Once upon");
        assert!((sliced.total() - 4.5).abs() < 1e-12);
    }

    #[test]
    fn take_tokens_past_end_is_identity() {
        assert_eq!(sample().take_tokens(10), sample());
    }

    #[test]
    fn serialises_as_pair_list() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert_eq!(json, r#"[["Once",4.0],[" upon",0.5],[" a",0.25]]"#);

        let back: TokenXent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn map_values_keeps_surfaces() {
        let clamped = sample().map_values(|x| x.max(1.0));
        assert_eq!(clamped.surface(), "Once upon a");
        assert!((clamped.total() - 6.0).abs() < 1e-12);
    }

    #[test]
    fn empty_total_is_zero() {
        assert_eq!(TokenXent::default().total(), 0.0);
        assert!(TokenXent::default().is_empty());
    }
}
