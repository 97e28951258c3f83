//! Talk-Page Scanner (§4.10): a linear history walk over a talk page,
//! emitting an event each time a filter's match count changes between
//! adjacent revisions.

use chrono::{DateTime, Utc};
use mwapi_responses::prelude::*;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("upstream API error: {0}")]
    Upstream(String),
}

/// One of: an exact string, a set of exact strings, or a regular
/// expression. Regexes are "globalized" in the Rust sense: callers always
/// get every match via `find_iter`, there is no single-match mode (§3).
#[derive(Debug, Clone)]
pub enum FilterDescriptor {
    Exact(String),
    Set(Vec<String>),
    Regex(regex::Regex),
}

/// What a single `LabeledFilter` actually matches against page content.
#[derive(Debug, Clone)]
pub enum FilterMatcher {
    Exact(String),
    Regex(regex::Regex),
}

impl FilterMatcher {
    fn find_all(&self, content: &str) -> Vec<String> {
        match self {
            Self::Exact(s) => content.matches(s.as_str()).map(str::to_string).collect(),
            Self::Regex(re) => re.find_iter(content).map(|m| m.as_str().to_string()).collect(),
        }
    }
}

/// A filter tracked independently in the scan, labeled with the string
/// callers should see reported back on each event.
#[derive(Debug, Clone)]
pub struct LabeledFilter {
    pub label: String,
    pub matcher: FilterMatcher,
}

impl FilterDescriptor {
    /// Expands into one or more independently tracked filters: a `Set`
    /// becomes one `LabeledFilter` per member string, so each is diffed and
    /// reported on its own rather than folded into a combined count.
    pub fn into_labeled(self) -> Vec<LabeledFilter> {
        match self {
            Self::Exact(s) => vec![LabeledFilter {
                label: s.clone(),
                matcher: FilterMatcher::Exact(s),
            }],
            Self::Set(set) => set
                .into_iter()
                .map(|s| LabeledFilter {
                    label: s.clone(),
                    matcher: FilterMatcher::Exact(s),
                })
                .collect(),
            Self::Regex(re) => vec![LabeledFilter {
                label: re.as_str().to_string(),
                matcher: FilterMatcher::Regex(re),
            }],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchAction {
    Add,
    Remove,
}

/// Deliberately has no author field: adjacent-revision authorship is
/// assumed rather than tracked (§9 Open Question).
#[derive(Debug, Clone)]
pub struct PageRevisionMatchEvent {
    pub revid: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub filter: String,
    pub action: MatchAction,
    pub matches: Vec<String>,
}

#[query(
    prop = "revisions",
    rvprop = "ids|timestamp|user|content",
    rvslots = "main",
    rvdir = "newer",
    rvlimit = "max",
)]
struct TalkHistoryQuery;

pub struct TalkPageScanner<'a> {
    client: &'a mwapi::Client,
}

impl<'a> TalkPageScanner<'a> {
    pub fn new(client: &'a mwapi::Client) -> Self {
        Self { client }
    }

    /// Walks `title`'s full history oldest-first, diffing `filters`' match
    /// counts between adjacent revisions and calling `on_event` for each
    /// change. `on_progress` is called with `processed / total` after every
    /// API page, when `total_hint` is known (from the replica's revision
    /// count for this page).
    pub async fn scan<E, P>(
        &self,
        title: &str,
        filters: &[LabeledFilter],
        total_hint: Option<u64>,
        mut on_event: E,
        mut on_progress: P,
    ) -> Result<(), ScanError>
    where
        E: FnMut(PageRevisionMatchEvent),
        P: FnMut(f64),
    {
        let mut prev_matches: HashMap<usize, Vec<String>> = HashMap::new();
        let mut continue_param: HashMap<String, String> = HashMap::new();
        let mut processed: u64 = 0;

        loop {
            let mut params = vec![
                ("action".to_string(), "query".to_string()),
                ("titles".to_string(), title.to_string()),
            ];
            params.extend(continue_param.clone());

            let resp: TalkHistoryQuery = self
                .client
                .get(params)
                .await
                .map_err(|e| ScanError::Upstream(e.to_string()))?;

            for page in &resp.query.pages {
                for rev in &page.revisions {
                    processed += 1;
                    let Some(content) = rev.slots.main.content.as_ref() else {
                        // Deleted/suppressed slot: skip without perturbing counts.
                        continue;
                    };

                    for (idx, filter) in filters.iter().enumerate() {
                        let current = filter.matcher.find_all(content);
                        let prev = prev_matches.get(&idx).map(Vec::len).unwrap_or(0);
                        let delta = current.len() as i64 - prev as i64;

                        if delta > 0 {
                            let new_matches = current[prev..].to_vec();
                            on_event(PageRevisionMatchEvent {
                                revid: rev.revid,
                                timestamp: rev.timestamp,
                                filter: filter.label.clone(),
                                action: MatchAction::Add,
                                matches: new_matches,
                            });
                        } else if delta < 0 {
                            let removed = prev_matches
                                .get(&idx)
                                .map(|old| old[current.len()..].to_vec())
                                .unwrap_or_default();
                            on_event(PageRevisionMatchEvent {
                                revid: rev.revid,
                                timestamp: rev.timestamp,
                                filter: filter.label.clone(),
                                action: MatchAction::Remove,
                                matches: removed,
                            });
                        }
                        prev_matches.insert(idx, current);
                    }
                    // `content` (the revision wikitext) is dropped here,
                    // at the end of the loop body; only the small derived
                    // match-string lists above survive into the next pass.
                }
            }

            if let Some(total) = total_hint {
                on_progress((processed as f64 / total as f64).min(1.0));
            }

            continue_param = resp.continue_.clone();
            if continue_param.is_empty() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_filter_counts_overlap_free_occurrences() {
        let filter = FilterMatcher::Exact("hello".to_string());
        let matches = filter.find_all("hello world hello");
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn regex_filter_uses_find_iter_not_find() {
        let filter = FilterMatcher::Regex(regex::Regex::new(r"\d+").unwrap());
        let matches = filter.find_all("a1 b22 c333");
        assert_eq!(matches, vec!["1", "22", "333"]);
    }

    #[test]
    fn set_filter_expands_into_one_labeled_filter_per_member() {
        let descriptor = FilterDescriptor::Set(vec!["uw-test1".to_string(), "uw-test2".to_string()]);
        let labeled = descriptor.into_labeled();
        assert_eq!(labeled.len(), 2);
        assert_eq!(labeled[0].label, "uw-test1");
        assert_eq!(labeled[1].label, "uw-test2");

        let matches = labeled[0].matcher.find_all("uw-test1 uw-test2 uw-test1");
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn exact_descriptor_expands_to_a_single_labeled_filter() {
        let descriptor = FilterDescriptor::Exact("hello".to_string());
        let labeled = descriptor.into_labeled();
        assert_eq!(labeled.len(), 1);
        assert_eq!(labeled[0].label, "hello");
    }
}
