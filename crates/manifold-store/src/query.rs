//! Translation of a [`SearchQuery`] into an executable statement skeleton.

use crate::{
    dialect::{BindValue, Dialect, Fragment, preview, render_predicate},
    predicate::{NonSelectableRequirementsSnafu, TranslateError, lower_selector},
    search::SearchQuery,
};

/// Sort direction for list results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OrderDirection {
    Ascending,
    #[default]
    Descending,
}

impl OrderDirection {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// Tunables of a list operation beyond the query itself.
#[derive(Clone, Debug)]
pub struct ListOptions {
    pub(crate) order_column: String,
    pub(crate) order_direction: OrderDirection,
    pub(crate) include_deleted: bool,
    pub(crate) with_count: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            order_column: "created_at".to_string(),
            order_direction: OrderDirection::Descending,
            include_deleted: false,
            with_count: true,
        }
    }
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the ordering column and direction.
    pub fn order_by(mut self, column: impl Into<String>, direction: OrderDirection) -> Self {
        self.order_column = column.into();
        self.order_direction = direction;
        self
    }

    /// Orders by creation time, the default column.
    pub fn order_by_created_at(self, direction: OrderDirection) -> Self {
        self.order_by("created_at", direction)
    }

    /// Includes tombstoned rows in the result.
    pub fn include_deleted(mut self, include: bool) -> Self {
        self.include_deleted = include;
        self
    }

    /// Whether list operations also report the total number of matching rows
    /// (ignoring pagination). On by default; turning it off skips the second
    /// `COUNT(*)` query and reports zero instead.
    pub fn count(mut self, count: bool) -> Self {
        self.with_count = count;
        self
    }
}

/// The rendered filter plus ordering and pagination of one search.
#[derive(Clone, Debug)]
pub struct Translation {
    pub(crate) filter: Vec<Fragment>,
    pub(crate) order_column: String,
    pub(crate) order_direction: OrderDirection,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: u64,
    pub(crate) with_count: bool,
}

impl Translation {
    /// The statement tail (everything after `SELECT ... FROM t`) with the
    /// dialect's placeholder syntax. For logs and tests.
    pub fn preview(&self, dialect: Dialect) -> String {
        let mut sql = String::new();

        if !self.filter.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&preview(dialect, &self.filter));
        }

        sql.push_str(&format!(
            " ORDER BY {} {}",
            self.order_column,
            self.order_direction.sql()
        ));

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit} OFFSET {}", self.offset));
        }

        sql
    }
}

/// Renders the query filters in their application order: name match, time
/// range, then the selector conjunction, with tombstones excluded unless
/// requested. Pagination and ordering ride along unrendered.
pub fn translate(
    query: &SearchQuery,
    options: &ListOptions,
    dialect: Dialect,
    labels_column: &str,
) -> Result<Translation, TranslateError> {
    let mut conditions: Vec<Vec<Fragment>> = Vec::new();

    if !options.include_deleted {
        conditions.push(vec![Fragment::Sql("deleted_at IS NULL".to_string())]);
    }

    if !query.name.is_empty() {
        conditions.push(vec![
            Fragment::Sql("name LIKE ".to_string()),
            Fragment::Arg(BindValue::Text(format!("%{}%", query.name))),
        ]);
    }

    match (query.from, query.till) {
        (Some(from), Some(till)) => conditions.push(vec![
            Fragment::Sql("created_at BETWEEN ".to_string()),
            Fragment::Arg(BindValue::Timestamp(from)),
            Fragment::Sql(" AND ".to_string()),
            Fragment::Arg(BindValue::Timestamp(till)),
        ]),
        (Some(from), None) => conditions.push(vec![
            Fragment::Sql("created_at >= ".to_string()),
            Fragment::Arg(BindValue::Timestamp(from)),
        ]),
        (None, Some(till)) => conditions.push(vec![
            Fragment::Sql("created_at < ".to_string()),
            Fragment::Arg(BindValue::Timestamp(till)),
        ]),
        (None, None) => {}
    }

    if let Some(selector) = &query.selector {
        snafu::ensure!(!selector.is_empty(), NonSelectableRequirementsSnafu);

        for predicate in lower_selector(selector)? {
            let mut condition = Vec::new();
            render_predicate(dialect, &predicate, labels_column, &mut condition);
            conditions.push(condition);
        }
    }

    let mut filter = Vec::new();
    for (i, condition) in conditions.into_iter().enumerate() {
        if i > 0 {
            filter.push(Fragment::Sql(" AND ".to_string()));
        }
        filter.extend(condition);
    }

    Ok(Translation {
        filter,
        order_column: options.order_column.clone(),
        order_direction: options.order_direction,
        limit: (query.limit > 0).then_some(query.limit),
        offset: query.offset,
        with_count: options.with_count,
    })
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use chrono::{TimeZone, Utc};
    use manifold_resource::selector::Selector;

    use super::*;

    #[test]
    fn empty_query_only_excludes_tombstones() {
        let translation = translate(
            &SearchQuery::default(),
            &ListOptions::default(),
            Dialect::Sqlite,
            "labels",
        )
        .unwrap();

        assert_eq!(
            translation.preview(Dialect::Sqlite),
            " WHERE deleted_at IS NULL ORDER BY created_at DESC"
        );
    }

    #[test]
    fn include_deleted_drops_tombstone_filter() {
        let translation = translate(
            &SearchQuery::default(),
            &ListOptions::new().include_deleted(true),
            Dialect::Sqlite,
            "labels",
        )
        .unwrap();

        assert_eq!(
            translation.preview(Dialect::Sqlite),
            " ORDER BY created_at DESC"
        );
    }

    #[test]
    fn filters_compose_in_order() {
        let query = SearchQuery {
            selector: Some(Selector::from_str("env=prod").unwrap()),
            name: "rex".to_string(),
            from: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            till: Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()),
            offset: 20,
            limit: 10,
        };

        let translation = translate(
            &query,
            &ListOptions::default(),
            Dialect::Sqlite,
            "labels",
        )
        .unwrap();

        assert_eq!(
            translation.preview(Dialect::Sqlite),
            " WHERE deleted_at IS NULL AND name LIKE ? AND created_at BETWEEN ? AND ? \
             AND JSON_EXTRACT(labels, ?) = ? ORDER BY created_at DESC LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn one_sided_time_bounds() {
        let from_only = SearchQuery {
            from: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            ..SearchQuery::default()
        };
        let translation = translate(
            &from_only,
            &ListOptions::default(),
            Dialect::Sqlite,
            "labels",
        )
        .unwrap();
        assert!(
            translation
                .preview(Dialect::Sqlite)
                .contains("created_at >= ?")
        );

        let till_only = SearchQuery {
            till: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            ..SearchQuery::default()
        };
        let translation = translate(
            &till_only,
            &ListOptions::default(),
            Dialect::Sqlite,
            "labels",
        )
        .unwrap();
        assert!(
            translation
                .preview(Dialect::Sqlite)
                .contains("created_at < ?")
        );
    }

    #[test]
    fn not_equals_renders_two_conjuncts() {
        let query = SearchQuery {
            selector: Some(Selector::from_str("label!=you-in-particular").unwrap()),
            ..SearchQuery::default()
        };

        let translation = translate(
            &query,
            &ListOptions::new().include_deleted(true),
            Dialect::Sqlite,
            "labels",
        )
        .unwrap();

        assert_eq!(
            translation.preview(Dialect::Sqlite),
            " WHERE JSON_EXTRACT(labels, ?) IS NOT NULL AND JSON_EXTRACT(labels, ?) <> ? \
             ORDER BY created_at DESC"
        );
    }

    #[test]
    fn postgres_placeholders_number_across_conditions() {
        let query = SearchQuery {
            selector: Some(Selector::from_str("env in (a,b)").unwrap()),
            name: "rex".to_string(),
            ..SearchQuery::default()
        };

        let translation =
            translate(&query, &ListOptions::default(), Dialect::Postgres, "labels").unwrap();

        assert_eq!(
            translation.preview(Dialect::Postgres),
            " WHERE deleted_at IS NULL AND name LIKE $1 \
             AND json_extract_path_text(labels::json, $2) IN ($3, $4) ORDER BY created_at DESC"
        );
    }

    #[test]
    fn present_but_empty_selector_is_an_error() {
        let query = SearchQuery {
            selector: Some(Selector::new()),
            ..SearchQuery::default()
        };

        let err = translate(&query, &ListOptions::default(), Dialect::Sqlite, "labels")
            .unwrap_err();
        assert_eq!(err, TranslateError::NonSelectableRequirements);
    }

    #[test]
    fn order_override() {
        let translation = translate(
            &SearchQuery::default(),
            &ListOptions::new().order_by("name", OrderDirection::Ascending),
            Dialect::Sqlite,
            "labels",
        )
        .unwrap();

        assert!(
            translation
                .preview(Dialect::Sqlite)
                .ends_with("ORDER BY name ASC")
        );
    }
}
