use cpsync_core::{ProblemSummary, SyncState};
use sha2::{Digest, Sha256};

/// SHA-256 over the catalog's identity fields, independent of catalog order.
///
/// Solve counts are left out: they move every hour without the problem set
/// itself changing.
pub fn catalog_fingerprint(problems: &[ProblemSummary]) -> String {
    let mut entries: Vec<&ProblemSummary> = problems.iter().collect();
    entries.sort_by(|a, b| a.key.cmp(&b.key));

    let mut hasher = Sha256::new();
    for entry in entries {
        hasher.update(entry.key.contest_id.to_be_bytes());
        hasher.update(entry.key.index.as_bytes());
        hasher.update([0x1f]);
        hasher.update(entry.name.as_bytes());
        hasher.update([0x1f]);
        hasher.update(entry.kind.as_str().as_bytes());
        hasher.update([0x1f]);
        match entry.rating {
            Some(rating) => hasher.update(rating.to_be_bytes()),
            None => hasher.update(b"-"),
        }
        for tag in &entry.tags {
            hasher.update([0x1f]);
            hasher.update(tag.as_bytes());
        }
        hasher.update([0x1e]);
    }
    hex::encode(hasher.finalize())
}

/// Decides whether a fetched catalog warrants a detail pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeDetector;

impl ChangeDetector {
    pub fn has_changed(&self, current: &[ProblemSummary], last_state: Option<&SyncState>) -> bool {
        self.has_changed_fingerprint(&catalog_fingerprint(current), current.len(), last_state)
    }

    /// Same decision as [`ChangeDetector::has_changed`] for an already computed fingerprint.
    pub fn has_changed_fingerprint(
        &self,
        fingerprint: &str,
        problem_count: usize,
        last_state: Option<&SyncState>,
    ) -> bool {
        let Some(last) = last_state else {
            return true;
        };
        last.outstanding > 0
            || last.fingerprint != fingerprint
            || last.problem_count != problem_count as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cpsync_core::{ProblemKey, ProblemKind};

    fn summary(contest_id: i32, index: &str, rating: Option<i32>, tags: &[&str]) -> ProblemSummary {
        ProblemSummary {
            key: ProblemKey::new(contest_id, index),
            name: format!("Problem {contest_id}{index}"),
            kind: ProblemKind::Programming,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            rating,
            solved_count: None,
        }
    }

    fn state_for(problems: &[ProblemSummary], outstanding: i64) -> SyncState {
        SyncState {
            id: 1,
            fingerprint: catalog_fingerprint(problems),
            problem_count: problems.len() as i64,
            outstanding,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn fingerprint_ignores_order_and_solve_counts() {
        let a = vec![summary(1, "A", Some(800), &["math"]), summary(2, "B", None, &[])];
        let mut b = vec![a[1].clone(), a[0].clone()];
        b[0].solved_count = Some(12_345);
        assert_eq!(catalog_fingerprint(&a), catalog_fingerprint(&b));
        assert_eq!(catalog_fingerprint(&a).len(), 64);
    }

    #[test]
    fn fingerprint_tracks_rating_and_tags() {
        let base = vec![summary(1, "A", Some(800), &["math"])];
        let rerated = vec![summary(1, "A", Some(900), &["math"])];
        let retagged = vec![summary(1, "A", Some(800), &["math", "greedy"])];
        assert_ne!(catalog_fingerprint(&base), catalog_fingerprint(&rerated));
        assert_ne!(catalog_fingerprint(&base), catalog_fingerprint(&retagged));
    }

    #[test]
    fn first_run_always_counts_as_changed() {
        let current = vec![summary(1, "A", None, &[])];
        assert!(ChangeDetector.has_changed(&current, None));
        assert!(ChangeDetector.has_changed(&[], None));
    }

    #[test]
    fn identical_catalog_is_unchanged() {
        let current = vec![summary(1, "A", Some(1500), &["dp"])];
        let last = state_for(&current, 0);
        assert!(!ChangeDetector.has_changed(&current, Some(&last)));
    }

    #[test]
    fn new_problem_or_outstanding_work_is_a_change() {
        let before = vec![summary(1, "A", None, &[])];
        let after = vec![summary(1, "A", None, &[]), summary(1, "B", None, &[])];
        assert!(ChangeDetector.has_changed(&after, Some(&state_for(&before, 0))));
        assert!(ChangeDetector.has_changed(&before, Some(&state_for(&before, 2))));
    }
}
