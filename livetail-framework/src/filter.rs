//! Filter engine with incremental filtering and parallel processing.

use crate::event::{LogEvent, LogLevel};
use rayon::prelude::*;
use std::time::{Duration, Instant};

/// search spaces larger than this are filtered in parallel
const PARALLEL_THRESHOLD: usize = 256;

/// which events the consumer currently wants to see
///
/// `None` for level or source means "ALL"; an empty text means no
/// substring criterion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterCriteria {
    pub level: Option<LogLevel>,
    pub source: Option<String>,
    pub text: String,
}

impl FilterCriteria {
    /// the default criteria match everything; filtering takes the fast path
    pub fn is_default(&self) -> bool {
        self.level.is_none() && self.source.is_none() && self.text.is_empty()
    }

    /// whether `event` matches, given the already-lowercased text pattern
    fn matches(&self, event: &LogEvent, pattern_lower: &str) -> bool {
        if let Some(level) = self.level
            && event.level != level
        {
            return false;
        }
        if let Some(source) = &self.source
            && event.source.as_deref() != Some(source.as_str())
        {
            return false;
        }
        // substring search runs against the precomputed search key only
        pattern_lower.is_empty() || event.search_key.contains(pattern_lower)
    }
}

/// filtering engine with incremental filtering and parallel processing
pub struct FilterEngine {
    /// criteria of the previous filter pass
    previous_criteria: FilterCriteria,
    /// cached results from the previous pass (indices into the window)
    previous_results: Vec<usize>,
    /// window generation the cached indices were computed against
    previous_generation: u64,
    has_cache: bool,
}

impl FilterEngine {
    pub fn new() -> Self {
        Self {
            previous_criteria: FilterCriteria::default(),
            previous_results: Vec::new(),
            previous_generation: 0,
            has_cache: false,
        }
    }

    /// filter events and return indices of matching items
    ///
    /// `generation` is the window's eviction generation; cached results
    /// are only reused within the generation they were computed in.
    /// Within one generation, a text query that extends the previous one
    /// under unchanged level/source criteria narrows the cached set
    /// instead of rescanning everything.
    pub fn filter(
        &mut self,
        events: &[LogEvent],
        criteria: &FilterCriteria,
        generation: u64,
    ) -> Vec<usize> {
        // default criteria = show all, no per-item scan
        if criteria.is_default() {
            self.reset();
            return (0..events.len()).collect();
        }

        // a longer text under the same level/source can only narrow the
        // previous result set; cached indices are meaningless once the
        // window has evicted entries under them
        let can_use_incremental = self.has_cache
            && generation == self.previous_generation
            && criteria.level == self.previous_criteria.level
            && criteria.source == self.previous_criteria.source
            && criteria.text.starts_with(&self.previous_criteria.text);

        let search_space: Vec<usize> = if can_use_incremental {
            self.previous_results.clone()
        } else {
            (0..events.len()).collect()
        };

        // lowercase the pattern once per pass, not per event
        let pattern_lower = criteria.text.to_lowercase();

        let filtered = if search_space.len() > PARALLEL_THRESHOLD {
            Self::filter_parallel(events, &search_space, criteria, &pattern_lower)
        } else {
            Self::filter_sequential(events, &search_space, criteria, &pattern_lower)
        };

        self.previous_criteria = criteria.clone();
        self.previous_results = filtered.clone();
        self.previous_generation = generation;
        self.has_cache = true;

        filtered
    }

    /// filter only newly arrived events and append to the cached results
    ///
    /// A generation change means entries were evicted since the last
    /// pass; the cached indices shifted under us, so a full pass runs
    /// instead.
    pub fn filter_new_events(
        &mut self,
        events: &[LogEvent],
        old_count: usize,
        generation: u64,
        criteria: &FilterCriteria,
    ) -> Vec<usize> {
        if !self.has_cache
            || generation != self.previous_generation
            || *criteria != self.previous_criteria
        {
            return self.filter(events, criteria, generation);
        }

        if criteria.is_default() {
            return (0..events.len()).collect();
        }

        if old_count >= events.len() {
            return self.previous_results.clone();
        }

        let new_indices: Vec<usize> = (old_count..events.len()).collect();
        let pattern_lower = criteria.text.to_lowercase();

        let new_filtered = if new_indices.len() > PARALLEL_THRESHOLD {
            Self::filter_parallel(events, &new_indices, criteria, &pattern_lower)
        } else {
            Self::filter_sequential(events, &new_indices, criteria, &pattern_lower)
        };

        self.previous_results.extend(new_filtered);
        self.previous_results.clone()
    }

    /// drop the cache (window cleared or criteria replaced wholesale)
    pub fn reset(&mut self) {
        self.previous_criteria = FilterCriteria::default();
        self.previous_results.clear();
        self.has_cache = false;
    }

    fn filter_sequential(
        events: &[LogEvent],
        search_space: &[usize],
        criteria: &FilterCriteria,
        pattern_lower: &str,
    ) -> Vec<usize> {
        search_space
            .iter()
            .filter(|&&idx| criteria.matches(&events[idx], pattern_lower))
            .copied()
            .collect()
    }

    fn filter_parallel(
        events: &[LogEvent],
        search_space: &[usize],
        criteria: &FilterCriteria,
        pattern_lower: &str,
    ) -> Vec<usize> {
        search_space
            .par_iter()
            .filter(|&&idx| criteria.matches(&events[idx], pattern_lower))
            .copied()
            .collect()
    }
}

impl Default for FilterEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Latest-value-wins coalescing for the text criterion.
///
/// Rapid consecutive edits overwrite the pending value and push the
/// deadline out; only once the debounce window elapses with no newer
/// edit does [`settle`](Self::settle) hand the value over for an actual
/// filter pass. Correctness is unaffected, only how often filtering runs.
pub struct QueryDebouncer {
    pending: Option<String>,
    deadline: Instant,
    delay: Duration,
}

impl QueryDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            pending: None,
            deadline: Instant::now(),
            delay,
        }
    }

    /// record a new edit; overwrites any pending value
    pub fn submit(&mut self, text: impl Into<String>) {
        self.pending = Some(text.into());
        self.deadline = Instant::now() + self.delay;
    }

    /// discard any pending edit without settling it
    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// take the settled value, if the debounce window has elapsed
    pub fn settle(&mut self) -> Option<String> {
        self.settle_at(Instant::now())
    }

    pub(crate) fn settle_at(&mut self, now: Instant) -> Option<String> {
        if self.pending.is_some() && now >= self.deadline {
            self.pending.take()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::normalize;

    fn event(id: &str, level: &str, message: &str, source: Option<&str>) -> LogEvent {
        let source_field = source
            .map(|s| format!(r#","source":"{s}""#))
            .unwrap_or_default();
        let raw = format!(
            r#"{{"id":"{id}","timestamp":"2025-01-15T10:30:00Z","level":"{level}","message":"{message}"{source_field}}}"#
        );
        normalize(&raw).unwrap()
    }

    fn fixture() -> Vec<LogEvent> {
        vec![
            event("0", "INFO", "request ok", Some("svc-a")),
            event("1", "ERROR", "upstream timeout", Some("svc-a")),
            event("2", "INFO", "request ok", Some("svc-b")),
            event("3", "ERROR", "Connection TIMEOUT", Some("svc-b")),
            event("4", "ERROR", "disk full", None),
        ]
    }

    #[test]
    fn test_default_criteria_returns_everything() {
        let events = fixture();
        let mut engine = FilterEngine::new();
        let indices = engine.filter(&events, &FilterCriteria::default(), 0);
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_level_filter_preserves_order() {
        let events = fixture();
        let mut engine = FilterEngine::new();
        let criteria = FilterCriteria {
            level: Some(LogLevel::Error),
            ..Default::default()
        };
        assert_eq!(engine.filter(&events, &criteria, 0), vec![1, 3, 4]);
    }

    #[test]
    fn test_level_and_source_intersect() {
        let events = fixture();
        let mut engine = FilterEngine::new();
        let criteria = FilterCriteria {
            level: Some(LogLevel::Error),
            source: Some("svc-a".to_string()),
            ..Default::default()
        };
        assert_eq!(engine.filter(&events, &criteria, 0), vec![1]);
    }

    #[test]
    fn test_text_filter_is_case_insensitive_over_search_key() {
        let events = fixture();
        let mut engine = FilterEngine::new();
        let criteria = FilterCriteria {
            text: "TimeOut".to_string(),
            ..Default::default()
        };
        assert_eq!(engine.filter(&events, &criteria, 0), vec![1, 3]);
    }

    #[test]
    fn test_text_filter_matches_source_tag_too() {
        let events = fixture();
        let mut engine = FilterEngine::new();
        let criteria = FilterCriteria {
            text: "svc-b".to_string(),
            ..Default::default()
        };
        assert_eq!(engine.filter(&events, &criteria, 0), vec![2, 3]);
    }

    #[test]
    fn test_full_narrowing_chain() {
        let events = fixture();
        let mut engine = FilterEngine::new();
        let criteria = FilterCriteria {
            level: Some(LogLevel::Error),
            source: Some("svc-b".to_string()),
            text: "timeout".to_string(),
        };
        assert_eq!(engine.filter(&events, &criteria, 0), vec![3]);
    }

    #[test]
    fn test_incremental_extension_narrows_cached_results() {
        let events = fixture();
        let mut engine = FilterEngine::new();

        let mut criteria = FilterCriteria {
            text: "time".to_string(),
            ..Default::default()
        };
        assert_eq!(engine.filter(&events, &criteria, 0), vec![1, 3]);

        // extending the query narrows within the cached set
        criteria.text = "timeout s".to_string();
        assert_eq!(engine.filter(&events, &criteria, 0), vec![1, 3]);
        criteria.text = "timeout svc-a".to_string();
        assert_eq!(engine.filter(&events, &criteria, 0), vec![1]);
    }

    #[test]
    fn test_filter_new_events_appends_only_new_matches() {
        let mut events = fixture();
        let mut engine = FilterEngine::new();
        let criteria = FilterCriteria {
            level: Some(LogLevel::Error),
            ..Default::default()
        };
        assert_eq!(engine.filter(&events, &criteria, 0), vec![1, 3, 4]);

        let old_count = events.len();
        events.push(event("5", "INFO", "noise", None));
        events.push(event("6", "ERROR", "late failure", None));

        let indices = engine.filter_new_events(&events, old_count, 0, &criteria);
        assert_eq!(indices, vec![1, 3, 4, 6]);
    }

    #[test]
    fn test_eviction_invalidates_incremental_cache() {
        let events = fixture();
        let mut engine = FilterEngine::new();
        let criteria = FilterCriteria {
            level: Some(LogLevel::Error),
            ..Default::default()
        };
        engine.filter(&events, &criteria, 0);

        // two oldest evicted: indices shift, cache must not be reused
        let shifted_events: Vec<LogEvent> = events[2..].to_vec();
        let indices = engine.filter_new_events(&shifted_events, 3, 1, &criteria);
        assert_eq!(indices, vec![1, 2]);

        // the rebuilt cache is usable again within the new generation
        let mut grown = shifted_events;
        grown.push(event("5", "ERROR", "late failure", None));
        let indices = engine.filter_new_events(&grown, 3, 1, &criteria);
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[test]
    fn test_generation_change_forces_full_pass_on_plain_filter() {
        let events = fixture();
        let mut engine = FilterEngine::new();
        let criteria = FilterCriteria {
            level: Some(LogLevel::Error),
            ..Default::default()
        };
        assert_eq!(engine.filter(&events, &criteria, 0), vec![1, 3, 4]);

        // same criteria against a post-eviction window: the cached
        // indices point past the end and must not feed the next pass
        let shrunk: Vec<LogEvent> = events[3..].to_vec();
        assert_eq!(engine.filter(&shrunk, &criteria, 1), vec![0, 1]);
    }

    #[test]
    fn test_debouncer_latest_value_wins() {
        let mut debouncer = QueryDebouncer::new(Duration::from_millis(150));
        let start = Instant::now();

        debouncer.submit("t");
        debouncer.submit("ti");
        debouncer.submit("time");

        // nothing settles before the window elapses
        assert_eq!(debouncer.settle_at(start), None);
        assert_eq!(
            debouncer.settle_at(start + Duration::from_secs(1)),
            Some("time".to_string())
        );
        // settled values are taken exactly once
        assert_eq!(debouncer.settle_at(start + Duration::from_secs(2)), None);
    }

    #[test]
    fn test_debouncer_cancel_discards_pending() {
        let mut debouncer = QueryDebouncer::new(Duration::from_millis(150));
        let start = Instant::now();

        debouncer.submit("stale");
        debouncer.cancel();
        assert_eq!(debouncer.settle_at(start + Duration::from_secs(1)), None);

        // a submit after cancel behaves normally
        debouncer.submit("fresh");
        assert_eq!(
            debouncer.settle_at(start + Duration::from_secs(2)),
            Some("fresh".to_string())
        );
    }
}
