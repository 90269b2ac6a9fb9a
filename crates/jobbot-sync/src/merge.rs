use std::collections::HashSet;

use jobbot_core::{Listing, TrackerEntry};
use tracing::debug;

/// Set of identity keys already present in the tracker or emitted this run.
#[derive(Debug, Default, Clone)]
pub struct MergeEngine {
    known: HashSet<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub new_listings: Vec<Listing>,
    pub duplicates: usize,
}

impl MergeEngine {
    pub fn from_entries(entries: &[TrackerEntry]) -> Self {
        let mut known = HashSet::with_capacity(entries.len() * 2);
        for entry in entries {
            known.extend(entry.identity_keys());
        }
        Self { known }
    }

    pub fn is_known(&self, keys: &[String]) -> bool {
        keys.iter().any(|k| self.known.contains(k))
    }

    /// Registers `keys` and returns true when none of them was known yet.
    pub fn admit_keys(&mut self, keys: Vec<String>) -> bool {
        if keys.is_empty() || self.is_known(&keys) {
            return false;
        }
        self.known.extend(keys);
        true
    }

    pub fn admit(&mut self, listing: &Listing) -> bool {
        self.admit_keys(listing.identity_keys())
    }

    /// Keeps the listings that are new against the tracker, in scrape order.
    /// First occurrence wins.
    pub fn merge(&mut self, scraped: impl IntoIterator<Item = Listing>) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        for listing in scraped {
            if self.admit(&listing) {
                outcome.new_listings.push(listing);
            } else {
                debug!(id = %listing.id, url = %listing.url, "duplicate listing dropped");
                outcome.duplicates += 1;
            }
        }
        outcome
    }
}

pub fn merge_new_listings(existing: &[TrackerEntry], scraped: impl IntoIterator<Item = Listing>) -> MergeOutcome {
    MergeEngine::from_entries(existing).merge(scraped)
}

/// Collapses rows that share an identity, keeping the first. Returns the kept
/// rows and the number removed.
pub fn dedupe_entries(entries: Vec<TrackerEntry>) -> (Vec<TrackerEntry>, usize) {
    let mut engine = MergeEngine::default();
    let before = entries.len();
    let kept = entries
        .into_iter()
        .filter(|entry| {
            let keys = entry.identity_keys();
            // rows with no usable link or id cannot collide with anything
            keys.is_empty() || engine.admit_keys(keys)
        })
        .collect::<Vec<_>>();
    let removed = before - kept.len();
    (kept, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use jobbot_core::{ApplicationStatus, RawListing};

    fn listing(source: &str, native_id: Option<&str>, url: &str, title: &str) -> Listing {
        Listing::from_raw(
            RawListing {
                source_id: source.into(),
                native_id: native_id.map(Into::into),
                title: Some(title.into()),
                company: Some("Acme".into()),
                location: None,
                url: Some(url.into()),
            },
            Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().unwrap(),
        )
        .unwrap()
    }

    fn store_with(listings: &[Listing]) -> Vec<TrackerEntry> {
        listings
            .iter()
            .map(|l| TrackerEntry::from_listing(l, ApplicationStatus::ToApply, ""))
            .collect()
    }

    fn apply_merge(store: &[TrackerEntry], scraped: &[Listing]) -> Vec<TrackerEntry> {
        let mut next = store.to_vec();
        let outcome = merge_new_listings(store, scraped.iter().cloned());
        next.extend(store_with(&outcome.new_listings));
        next
    }

    #[test]
    fn only_unseen_listing_is_new() {
        let a = listing("wellfound", None, "https://wellfound.com/jobs/a", "Python Developer");
        let b = listing("wellfound", None, "https://wellfound.com/jobs/b", "Data Analyst");
        let store = store_with(&[a.clone()]);

        let outcome = merge_new_listings(&store, vec![a, b.clone()]);

        assert_eq!(outcome.new_listings, vec![b]);
        assert_eq!(outcome.duplicates, 1);
    }

    #[test]
    fn merge_is_idempotent() {
        let store = store_with(&[listing("indeed", Some("k1"), "https://www.indeed.com/viewjob?jk=k1", "A")]);
        let scraped = vec![
            listing("indeed", Some("k1"), "https://www.indeed.com/viewjob?jk=k1", "A"),
            listing("indeed", Some("k2"), "https://www.indeed.com/viewjob?jk=k2", "B"),
        ];

        let once = apply_merge(&store, &scraped);
        let twice = apply_merge(&once, &scraped);

        assert_eq!(once.len(), 2);
        assert_eq!(once, twice);
    }

    #[test]
    fn first_occurrence_wins_within_a_run() {
        let first = listing("linkedin", None, "https://www.linkedin.com/jobs/view/9?trk=a", "First");
        let second = listing("indeed", None, "https://www.linkedin.com/jobs/view/9/?utm_source=x", "Second");

        let outcome = merge_new_listings(&[], vec![first.clone(), second]);

        assert_eq!(outcome.new_listings, vec![first]);
        assert_eq!(outcome.duplicates, 1);
    }

    #[test]
    fn shared_native_id_is_a_duplicate_even_with_new_url() {
        let store = store_with(&[listing("linkedin", Some("3791"), "https://www.linkedin.com/jobs/view/3791", "A")]);
        let moved = listing("linkedin", Some("3791"), "https://www.linkedin.com/jobs/view/3791-python", "A");

        assert!(merge_new_listings(&store, vec![moved]).new_listings.is_empty());
    }

    #[test]
    fn same_native_id_on_two_boards_is_two_listings() {
        let linkedin = listing("linkedin", Some("100"), "https://www.linkedin.com/jobs/view/100", "Python Developer");
        let indeed = listing("indeed", Some("100"), "https://www.indeed.com/viewjob?jk=100", "Python Developer");

        let outcome = merge_new_listings(&[], vec![linkedin.clone(), indeed.clone()]);
        assert_eq!(outcome.new_listings, vec![linkedin.clone(), indeed.clone()]);
        assert_eq!(outcome.duplicates, 0);

        let again = merge_new_listings(&store_with(&[linkedin, indeed.clone()]), vec![indeed]);
        assert!(again.new_listings.is_empty());
    }

    #[test]
    fn merged_store_has_unique_identities() {
        let scraped = (0..5)
            .map(|i| listing("wellfound", None, &format!("https://wellfound.com/jobs/{}", i % 3), "Dev"))
            .collect::<Vec<_>>();
        let merged = apply_merge(&[], &scraped);

        let mut seen = HashSet::new();
        for entry in &merged {
            for key in entry.identity_keys() {
                assert!(seen.insert(key), "identity repeated after merge");
            }
        }
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn dedupe_entries_keeps_first_row_per_identity() {
        let a = listing("wellfound", None, "https://wellfound.com/jobs/a", "Python Developer");
        let mut rows = store_with(&[a.clone(), a.clone()]);
        rows[1].status = ApplicationStatus::Applied;
        rows[1].listing_id = None;

        let (kept, removed) = dedupe_entries(rows);

        assert_eq!(removed, 1);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].status, ApplicationStatus::ToApply);
    }
}
