use std::fmt;

/// Version counter of the physical index behind an alias.
///
/// Physical indices are named `<alias>_<version>`; reindexing creates the
/// next version and atomically repoints the alias.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct IndexVersion(u32);

impl Default for IndexVersion {
    fn default() -> Self {
        Self(1)
    }
}

impl fmt::Display for IndexVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl IndexVersion {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Name of the physical index this version of `alias` lives in
    pub fn index_name(self, alias: &str) -> String {
        format!("{}_{}", alias, self.0)
    }

    /// Parses the version out of a physical index name, requiring the name
    /// to actually belong to `alias`.
    pub fn of_index(alias: &str, index_name: &str) -> Option<Self> {
        let suffix = index_name.strip_prefix(alias)?.strip_prefix('_')?;
        if suffix.is_empty() || suffix.contains('_') {
            return None;
        }
        Some(Self(suffix.parse().ok()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_parses(alias: &str, index_name: &str, expected: Option<u32>) {
        assert_eq!(
            IndexVersion::of_index(alias, index_name),
            expected.map(IndexVersion)
        );
    }

    #[test]
    fn parses_index_names_that_belong_to_the_alias() {
        assert_parses("docs", "docs_1", Some(1));
        assert_parses("docs", "docs_0", Some(0));
        assert_parses("some_docs", "some_docs_42", Some(42));
    }

    #[test]
    fn rejects_foreign_and_malformed_index_names() {
        assert_parses("docs", "", None);
        assert_parses("docs", "docs", None);
        assert_parses("docs", "docs_", None);
        assert_parses("docs", "docs_abc", None);
        assert_parses("docs", "docs_1_2", None);
        assert_parses("docs", "other_1", None);
    }

    #[test]
    fn round_trips_through_index_name() {
        let version = IndexVersion::default().next().next();
        assert_eq!(version.index_name("docs"), "docs_3");
        assert_eq!(IndexVersion::of_index("docs", "docs_3"), Some(version));
    }
}
