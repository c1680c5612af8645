//! Ordered, deduplicated transcript aggregation.
//!
//! Both transports can emit overlapping partial/final events for the same
//! utterance, so the aggregator drops an entry whose `(role, text)` matches
//! the previous entry within the dedup window instead of appending it.

use serde::Serialize;

/// Who produced a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

/// One immutable transcript line. Timestamps are session-relative
/// milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    pub timestamp_ms: u64,
}

impl TranscriptEntry {
    pub fn new(role: Role, text: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp_ms,
        }
    }
}

/// Append-with-dedup reducer over incoming transcript events.
#[derive(Debug)]
pub struct TranscriptAggregator {
    entries: Vec<TranscriptEntry>,
    window_ms: u64,
}

impl TranscriptAggregator {
    pub fn new(window_ms: u64) -> Self {
        Self {
            entries: Vec::new(),
            window_ms,
        }
    }

    /// Appends an entry, returning `false` if it was dropped as a duplicate
    /// of the previous entry within the dedup window.
    pub fn push(&mut self, entry: TranscriptEntry) -> bool {
        if let Some(last) = self.entries.last() {
            let within_window =
                entry.timestamp_ms.saturating_sub(last.timestamp_ms) < self.window_ms;
            if within_window && last.role == entry.role && last.text == entry.text {
                return false;
            }
        }
        self.entries.push(entry);
        true
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.entries.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resets to empty. Called on session teardown and exposed for explicit
    /// user-initiated clearing.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(text: &str, t: u64) -> TranscriptEntry {
        TranscriptEntry::new(Role::Agent, text, t)
    }

    fn user(text: &str, t: u64) -> TranscriptEntry {
        TranscriptEntry::new(Role::User, text, t)
    }

    #[test]
    fn duplicate_within_window_is_dropped() {
        let mut agg = TranscriptAggregator::new(2000);
        assert!(agg.push(agent("hello", 0)));
        assert!(!agg.push(agent("hello", 500)));
        assert_eq!(agg.entries().len(), 1);
    }

    #[test]
    fn duplicate_outside_window_is_kept() {
        let mut agg = TranscriptAggregator::new(2000);
        assert!(agg.push(agent("hello", 0)));
        assert!(agg.push(agent("hello", 3000)));
        assert_eq!(agg.entries().len(), 2);
    }

    #[test]
    fn window_boundary_is_exclusive() {
        let mut agg = TranscriptAggregator::new(2000);
        assert!(agg.push(agent("hello", 0)));
        assert!(agg.push(agent("hello", 2000)));
        assert_eq!(agg.entries().len(), 2);
    }

    #[test]
    fn same_text_different_role_is_kept() {
        let mut agg = TranscriptAggregator::new(2000);
        assert!(agg.push(user("hello", 0)));
        assert!(agg.push(agent("hello", 100)));
        assert_eq!(agg.entries().len(), 2);
    }

    #[test]
    fn only_consecutive_entries_are_deduplicated() {
        let mut agg = TranscriptAggregator::new(2000);
        assert!(agg.push(agent("hello", 0)));
        assert!(agg.push(agent("how can I help?", 200)));
        assert!(agg.push(agent("hello", 400)));
        assert_eq!(agg.entries().len(), 3);
    }

    #[test]
    fn entries_are_appended_in_delivery_order() {
        let mut agg = TranscriptAggregator::new(2000);
        agg.push(user("make it blue", 0));
        agg.push(agent("sure, one moment", 350));
        agg.push(user("thanks", 900));
        let texts: Vec<&str> = agg.entries().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["make it blue", "sure, one moment", "thanks"]);
    }

    #[test]
    fn clear_resets_to_empty() {
        let mut agg = TranscriptAggregator::new(2000);
        agg.push(agent("hello", 0));
        assert!(!agg.is_empty());
        agg.clear();
        assert!(agg.is_empty());
        // A previously dropped duplicate is appendable again after a clear.
        assert!(agg.push(agent("hello", 100)));
    }
}
