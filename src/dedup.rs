use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Kept,
    Duplicate,
    /// Every identity field was empty.
    NoKey,
}

/// In-run identity filter: first record per key wins. Kept records leave in
/// arrival order, so the output file carries the insertion order.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<String>,
    pub duplicates: usize,
    pub no_key: usize,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&mut self, key: &str) -> Admission {
        if key.is_empty() {
            self.no_key += 1;
            return Admission::NoKey;
        }
        if !self.seen.insert(key.to_string()) {
            self.duplicates += 1;
            return Admission::Duplicate;
        }
        Admission::Kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_occurrence_wins() {
        let mut d = Deduplicator::new();
        assert_eq!(d.admit("P1"), Admission::Kept);
        assert_eq!(d.admit("P2"), Admission::Kept);
        assert_eq!(d.admit("P1"), Admission::Duplicate);
        assert_eq!(d.admit("P1"), Admission::Duplicate);
        assert_eq!(d.duplicates, 2);
        assert_eq!(d.seen.len(), 2);
    }

    #[test]
    fn empty_key_is_always_dropped() {
        let mut d = Deduplicator::new();
        assert_eq!(d.admit(""), Admission::NoKey);
        assert_eq!(d.admit(""), Admission::NoKey);
        assert_eq!(d.no_key, 2);
        assert_eq!(d.seen.len(), 0);
    }
}
