/// Path key used to address a scheduled task.
///
/// A key is a sequence of path segments (`flow_id`, `step_id`, `token`, ...).
/// Internally the segments are joined with a NUL byte, which cannot appear in
/// any of our own identifiers (UUIDs, step ids) and therefore gives an
/// unambiguous, orderable, hashable representation without needing a tree
/// structure to support prefix cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathKey(String);

const SEP: char = '\u{0}';

impl PathKey {
    pub fn new<S: AsRef<str>>(segments: &[S]) -> Self {
        let joined = segments.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(&SEP.to_string());
        Self(joined)
    }

    pub fn from_parts(parts: &[&str]) -> Self {
        Self::new(parts)
    }

    /// True if `self` is equal to `prefix` or nests under it (`prefix` followed
    /// by a separator and more segments).
    pub fn starts_with(&self, prefix: &PathKey) -> bool {
        if self.0 == prefix.0 {
            return true;
        }
        self.0.starts_with(&format!("{}{}", prefix.0, SEP))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PathKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.replace(SEP, "/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matches_exact_and_nested() {
        let retry_flow = PathKey::from_parts(&["retry", "flow-1"]);
        let retry_flow_step = PathKey::from_parts(&["retry", "flow-1", "step-a", "tok-1"]);
        let other_flow = PathKey::from_parts(&["retry", "flow-2", "step-a", "tok-1"]);

        assert!(retry_flow_step.starts_with(&retry_flow));
        assert!(retry_flow.starts_with(&retry_flow));
        assert!(!other_flow.starts_with(&retry_flow));
    }

    #[test]
    fn no_accidental_prefix_collision_across_segment_boundary() {
        // "flow-1" must not be treated as a prefix of "flow-10" even though the
        // raw strings share a textual prefix — the NUL separator prevents it.
        let a = PathKey::from_parts(&["retry", "flow-1"]);
        let b = PathKey::from_parts(&["retry", "flow-10", "step", "tok"]);
        assert!(!b.starts_with(&a));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn segment() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_-]{1,12}"
    }

    proptest! {
        /// A key built from `prefix` segments plus any extra segments always
        /// nests under the key built from `prefix` alone.
        #[test]
        fn extended_key_starts_with_its_prefix(
            prefix in prop::collection::vec(segment(), 1..4),
            extra in prop::collection::vec(segment(), 0..4),
        ) {
            let prefix_key = PathKey::new(&prefix);
            let mut full = prefix.clone();
            full.extend(extra);
            let full_key = PathKey::new(&full);
            prop_assert!(full_key.starts_with(&prefix_key));
        }

        /// Two keys whose segment vectors differ at some position never
        /// nest, even when one is a textual prefix of the other's joined
        /// string (the NUL separator rules out cross-segment collisions).
        #[test]
        fn unrelated_segment_sequences_never_nest(
            a in prop::collection::vec(segment(), 1..4),
            b in prop::collection::vec(segment(), 1..4),
        ) {
            prop_assume!(a != b && !b.starts_with(a.as_slice()));
            let ka = PathKey::new(&a);
            let kb = PathKey::new(&b);
            prop_assert!(!kb.starts_with(&ka));
        }

        #[test]
        fn every_key_starts_with_itself(segments in prop::collection::vec(segment(), 1..5)) {
            let k = PathKey::new(&segments);
            prop_assert!(k.starts_with(&k));
        }
    }
}
