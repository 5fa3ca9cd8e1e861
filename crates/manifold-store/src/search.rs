//! Search queries against a resource table.

use chrono::{DateTime, Utc};
use manifold_resource::selector::Selector;

/// Everything a search can filter on: a selector over the label column, a
/// name substring, a creation-time range and pagination.
///
/// With both time bounds set, rows created between them (inclusive) match;
/// a lone `from` is an inclusive lower bound, a lone `till` a strict upper
/// bound. A `limit` of zero means unlimited.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub selector: Option<Selector>,
    pub name: String,
    pub from: Option<DateTime<Utc>>,
    pub till: Option<DateTime<Utc>>,
    pub offset: u64,
    pub limit: u64,
}

impl SearchQuery {
    /// Reports whether no field is set.
    pub fn is_empty(&self) -> bool {
        self.selector.is_none()
            && self.name.is_empty()
            && self.from.is_none()
            && self.till.is_none()
            && self.offset == 0
            && self.limit == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_query() {
        assert!(SearchQuery::default().is_empty());

        let query = SearchQuery {
            name: "rex".to_string(),
            ..SearchQuery::default()
        };
        assert!(!query.is_empty());
    }
}
