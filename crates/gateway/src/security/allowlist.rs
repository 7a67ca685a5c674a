//! Static repository allowlist.

use std::collections::HashSet;

/// Repositories the gateway may act on, as exact `owner/name` strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoAllowlist {
    repos: HashSet<String>,
}

impl RepoAllowlist {
    #[must_use]
    pub fn new<I, S>(repos: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            repos: repos.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a comma-separated list, ignoring blanks and surrounding spaces.
    #[must_use]
    pub fn from_csv(csv: &str) -> Self {
        Self::new(
            csv.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty()),
        )
    }

    /// Case-sensitive exact membership.
    #[must_use]
    pub fn allows(&self, repo: &str) -> bool {
        self.repos.contains(repo)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.repos.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }
}
