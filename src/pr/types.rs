use serde::Deserialize;

/// Files changed at which the file count alone contributes its full 50 points.
pub const FILES_CRITICAL: u64 = 20;
/// Lines changed at which the line count alone contributes its full 50 points.
pub const LINES_CRITICAL: u64 = 1000;

/// Identifies one pull request: the key of a cache entry and of every badge
/// rendered for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subject {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl Subject {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, number: u64) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            number,
        }
    }

    /// Path of the REST resource for this pull request, relative to the API base.
    pub fn api_path(&self) -> String {
        format!("/repos/{}/{}/pulls/{}", self.owner, self.repo, self.number)
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

/// Line and file counts of a pull request as reported by the GitHub API.
///
/// Deserialized straight from the `/pulls/{number}` response; unknown fields
/// are ignored and negative counts fail to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PrStats {
    pub additions: u64,
    pub deletions: u64,
    pub changed_files: u64,
}

impl PrStats {
    pub fn total_lines(&self) -> u64 {
        self.additions.saturating_add(self.deletions)
    }

    /// Score in `0..=100`: files and lines each add up to 50 points linearly
    /// against their critical thresholds, rounded half-up, capped at 100.
    pub fn complexity_score(&self) -> u8 {
        let files = self.changed_files as f64 / FILES_CRITICAL as f64 * 50.0;
        let lines = self.total_lines() as f64 / LINES_CRITICAL as f64 * 50.0;
        (files + lines).round().min(100.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(additions: u64, deletions: u64, changed_files: u64) -> PrStats {
        PrStats {
            additions,
            deletions,
            changed_files,
        }
    }

    #[test]
    fn test_subject_display_and_api_path() {
        let subject = Subject::new("org", "repo", 42);
        assert_eq!(subject.to_string(), "org/repo#42");
        assert_eq!(subject.api_path(), "/repos/org/repo/pulls/42");
    }

    #[test]
    fn test_complexity_score_rounds_half_up() {
        let pr = stats(800, 300, 15);
        assert_eq!(pr.total_lines(), 1100);
        assert_eq!(pr.complexity_score(), 93);
    }

    #[test]
    fn test_complexity_score_bounds() {
        assert_eq!(stats(0, 0, 0).complexity_score(), 0);
        assert_eq!(stats(5000, 5000, 300).complexity_score(), 100);
        assert_eq!(stats(500, 0, 10).complexity_score(), 50);
    }

    #[test]
    fn test_stats_reject_negative_counts() {
        let parsed: Result<PrStats, _> =
            serde_json::from_str(r#"{"additions": -1, "deletions": 2, "changed_files": 1}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_stats_ignore_unknown_fields() {
        let parsed: PrStats = serde_json::from_str(
            r#"{"number": 7, "title": "x", "additions": 3, "deletions": 2, "changed_files": 1}"#,
        )
        .unwrap();
        assert_eq!(parsed, stats(3, 2, 1));
    }
}
