//! Helpers for the HTTP surface: the query-parameter form of a search and
//! pagination link derivation. The transport layer itself (routing, content
//! negotiation) lives elsewhere; these are the pure pieces it consumes.

use chrono::{DateTime, Utc};
use manifold_resource::manifest::{HateoasLink, HateoasLinks};
use serde::Deserialize;
use snafu::{ResultExt, Snafu, ensure};
use url::Url;

use crate::{search::SearchQuery, store::DEFAULT_PAGE_SIZE};

/// The error type for search-parameter conversion.
#[derive(Debug, Snafu)]
pub enum ParamsError {
    /// Indicates that the `labels` parameter is not a valid selector
    /// expression.
    #[snafu(display("invalid labels selector"))]
    InvalidSelector {
        source: manifold_resource::selector::ParseError,
    },

    /// Indicates that a time bound did not parse. Accepted forms are
    /// absolute (`2024-01-15`, `2024-01-15 10:30:00`, local time) and
    /// relative natural language (`yesterday`, `2 hours ago`).
    #[snafu(display("invalid time bound {input:?}"))]
    InvalidTime {
        source: parse_datetime::ParseDateTimeError,
        input: String,
    },

    /// Indicates that the lower time bound lies after the upper one.
    #[snafu(display("time range is inverted: {from} > {till}"))]
    InvertedTimeRange {
        from: DateTime<Utc>,
        till: DateTime<Utc>,
    },
}

/// The wire form of a search: `?page=1&pageSize=25&labels=env=prod&name=rex
/// &from=yesterday&till=now`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchParams {
    pub page: u64,
    pub page_size: Option<u64>,
    pub labels: String,
    pub name: String,
    pub from: String,
    pub till: String,
}

impl SearchParams {
    /// Lowers the wire form into a [`SearchQuery`]: the selector expression
    /// is parsed, the time bounds are resolved and checked for order, and
    /// the page/pageSize pair becomes offset/limit.
    pub fn into_query(self) -> Result<SearchQuery, ParamsError> {
        let selector = if self.labels.is_empty() {
            None
        } else {
            Some(self.labels.parse().context(InvalidSelectorSnafu)?)
        };

        let from = parse_time_bound(&self.from)?;
        let till = parse_time_bound(&self.till)?;
        if let (Some(from), Some(till)) = (from, till) {
            ensure!(from <= till, InvertedTimeRangeSnafu { from, till });
        }

        let limit = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);

        Ok(SearchQuery {
            selector,
            name: self.name,
            from,
            till,
            offset: self.page * limit,
            limit,
        })
    }
}

fn parse_time_bound(input: &str) -> Result<Option<DateTime<Utc>>, ParamsError> {
    if input.is_empty() {
        return Ok(None);
    }

    let parsed = parse_datetime::parse_datetime(input).context(InvalidTimeSnafu { input })?;
    Ok(Some(parsed.with_timezone(&Utc)))
}

/// Derives the pagination `_links` for a list response: `self` always,
/// `prev` when there is a previous page, `next` when the page came back
/// full. Other query parameters of the request URL are preserved.
pub fn pagination_links(
    request_url: &Url,
    page: u64,
    page_size: u64,
    returned: usize,
) -> HateoasLinks {
    let mut links = HateoasLinks::new();

    links.insert(
        "self".to_string(),
        page_link(request_url, page, page_size, "self"),
    );

    if page > 0 {
        links.insert(
            "prev".to_string(),
            page_link(request_url, page - 1, page_size, "prev"),
        );
    }

    if returned as u64 >= page_size && page_size > 0 {
        links.insert(
            "next".to_string(),
            page_link(request_url, page + 1, page_size, "next"),
        );
    }

    links
}

fn page_link(base: &Url, page: u64, page_size: u64, relationship: &str) -> HateoasLink {
    let preserved = base
        .query_pairs()
        .filter(|(key, _)| key != "page" && key != "pageSize")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect::<Vec<_>>();

    let mut url = base.clone();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (key, value) in &preserved {
            pairs.append_pair(key, value);
        }
        pairs.append_pair("page", &page.to_string());
        pairs.append_pair("pageSize", &page_size.to_string());
    }

    HateoasLink {
        reference: url.to_string(),
        relationship: relationship.to_string(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let query = SearchParams::default().into_query().unwrap();

        assert!(query.selector.is_none());
        assert_eq!(query.limit, DEFAULT_PAGE_SIZE);
        assert_eq!(query.offset, 0);
    }

    #[test]
    fn page_math() {
        let params = SearchParams {
            page: 3,
            page_size: Some(25),
            ..SearchParams::default()
        };
        let query = params.into_query().unwrap();

        assert_eq!(query.offset, 75);
        assert_eq!(query.limit, 25);
    }

    #[test]
    fn selector_parses() {
        let params = SearchParams {
            labels: "env in (a,b),!gone".to_string(),
            ..SearchParams::default()
        };
        let query = params.into_query().unwrap();

        assert_eq!(query.selector.unwrap().requirements().len(), 2);

        let params = SearchParams {
            labels: "env in (".to_string(),
            ..SearchParams::default()
        };
        assert!(matches!(
            params.into_query(),
            Err(ParamsError::InvalidSelector { .. })
        ));
    }

    #[test]
    fn absolute_time_bounds() {
        let params = SearchParams {
            from: "2024-01-15".to_string(),
            till: "2024-02-15 10:30:00".to_string(),
            ..SearchParams::default()
        };
        let query = params.into_query().unwrap();

        assert!(query.from.unwrap() < query.till.unwrap());
    }

    #[test]
    fn inverted_range_rejected() {
        let params = SearchParams {
            from: "2024-02-15".to_string(),
            till: "2024-01-15".to_string(),
            ..SearchParams::default()
        };

        assert!(matches!(
            params.into_query(),
            Err(ParamsError::InvertedTimeRange { .. })
        ));
    }

    #[test]
    fn wire_names() {
        let params: SearchParams =
            serde_json::from_str(r#"{"page":2,"pageSize":10,"labels":"env=prod"}"#).unwrap();

        assert_eq!(params.page, 2);
        assert_eq!(params.page_size, Some(10));
    }

    #[test]
    fn links_on_a_middle_page() {
        let url = Url::parse("http://api.local/pets?labels=env%3Dprod&page=2&pageSize=10").unwrap();
        let links = pagination_links(&url, 2, 10, 10);

        assert_eq!(links["self"].relationship, "self");
        assert!(links["prev"].reference.contains("page=1"));
        assert!(links["next"].reference.contains("page=3"));
        // Unrelated parameters survive
        assert!(links["next"].reference.contains("labels=env%3Dprod"));
    }

    #[test]
    fn links_on_the_first_and_last_page() {
        let url = Url::parse("http://api.local/pets").unwrap();

        let first = pagination_links(&url, 0, 10, 10);
        assert!(!first.contains_key("prev"));
        assert!(first.contains_key("next"));

        let last = pagination_links(&url, 4, 10, 3);
        assert!(last.contains_key("prev"));
        assert!(!last.contains_key("next"));
    }
}
