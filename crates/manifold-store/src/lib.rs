//! Searching and persisting typed resources over a relational store.
//!
//! The heart of this crate is the query translator: a
//! [`search::SearchQuery`] (selector, name substring, time range,
//! pagination) is lowered into a shared predicate representation and
//! rendered into parameterized SQL against the JSON label column, in the
//! flavor of the active [`dialect::Dialect`]. The [`store::ResourceStore`]
//! executes those translations through sqlx and adds soft-delete aware CRUD,
//! iteration and transactions on top.

pub mod dialect;
pub mod model;
pub mod query;
pub mod rest;
pub mod search;
pub mod store;

mod predicate;

pub use dialect::Dialect;
pub use model::StoreModel;
pub use predicate::TranslateError;
pub use query::{ListOptions, OrderDirection, translate};
pub use rest::SearchParams;
pub use search::SearchQuery;
pub use store::{Backend, ResourceStore, StoreError, StoreTransaction};
