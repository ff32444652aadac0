//! Subscription filters.

use serde::{Deserialize, Serialize};

use crate::model::OperationData;

/// Filters the operations a subscription receives.
///
/// An empty filter matches everything. With `types` set, the object's type
/// must be in the set; with `parents` set, at least one of the object's
/// parents must be in the set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub types: Vec<String>,
    pub parents: Vec<String>,
}

impl Filter {
    /// Builds a filter from the comma-separated `types` and `parents` query
    /// parameters. Empty segments are dropped.
    pub fn from_query(types: Option<&str>, parents: Option<&str>) -> Self {
        Self {
            types: split_list(types),
            parents: split_list(parents),
        }
    }

    /// Returns true if `data` passes the filter.
    pub fn matches(&self, data: &OperationData) -> bool {
        if !self.types.is_empty() && !self.types.iter().any(|t| *t == data.object_type) {
            return false;
        }
        if !self.parents.is_empty()
            && !data.parents.iter().any(|p| self.parents.contains(p))
        {
            return false;
        }
        true
    }

    /// True when the filter matches everything.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && self.parents.is_empty()
    }
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn data(object_type: &str, parents: &[&str]) -> OperationData {
        OperationData {
            timestamp: Utc::now(),
            parents: parents.iter().map(|p| p.to_string()).collect(),
            object_type: object_type.to_string(),
            id: "x1".to_string(),
            object_ref: None,
        }
    }

    #[test]
    fn should_match_everything_with_empty_filter() {
        // given
        let filter = Filter::default();

        // when/then
        assert!(filter.matches(&data("video", &[])));
        assert!(filter.matches(&data("user", &["user/u1"])));
    }

    #[test]
    fn should_filter_on_type() {
        // given
        let filter = Filter {
            types: vec!["video".to_string(), "playlist".to_string()],
            parents: vec![],
        };

        // when/then
        assert!(filter.matches(&data("video", &[])));
        assert!(filter.matches(&data("playlist", &[])));
        assert!(!filter.matches(&data("user", &[])));
    }

    #[test]
    fn should_filter_on_any_matching_parent() {
        // given
        let filter = Filter {
            types: vec![],
            parents: vec!["user/u1".to_string()],
        };

        // when/then
        assert!(filter.matches(&data("video", &["user/u1"])));
        assert!(filter.matches(&data("video", &["user/u2", "user/u1"])));
        assert!(!filter.matches(&data("video", &["user/u2"])));
        assert!(!filter.matches(&data("video", &[])));
    }

    #[test]
    fn should_require_both_dimensions_when_set() {
        // given
        let filter = Filter {
            types: vec!["video".to_string()],
            parents: vec!["user/u1".to_string()],
        };

        // when/then
        assert!(filter.matches(&data("video", &["user/u1"])));
        assert!(!filter.matches(&data("video", &["user/u2"])));
        assert!(!filter.matches(&data("user", &["user/u1"])));
    }

    #[test]
    fn should_parse_comma_separated_query_values() {
        // given
        let filter = Filter::from_query(Some("video,playlist"), Some("user/u1"));

        // then
        assert_eq!(filter.types, vec!["video", "playlist"]);
        assert_eq!(filter.parents, vec!["user/u1"]);
    }

    #[test]
    fn should_drop_empty_query_segments() {
        // given
        let filter = Filter::from_query(Some(""), Some("user/u1,"));

        // then
        assert!(filter.types.is_empty());
        assert_eq!(filter.parents, vec!["user/u1"]);
    }
}
