//! The sqlx-backed resource store.
//!
//! [`ResourceStore`] is generic over the database; a [`Backend`] pins the
//! dialect the query translator renders for and papers over the few
//! driver-specific bits sqlx does not abstract. All reads exclude tombstones
//! unless asked otherwise, misses come back as `Ok(None)` / `Ok(false)`
//! rather than errors, and every write runs the object-meta persistence
//! hooks first. Every operation carries a cancellation token which is raced
//! against the in-flight driver call, not just polled between steps.

use std::future::Future;

use chrono::{DateTime, Utc};
use manifold_resource::kvp::Labels;
use snafu::{OptionExt, ResultExt, Snafu};
use sqlx::{
    ColumnIndex, Database, Decode, Encode, Executor, IntoArguments, Pool, QueryBuilder, Row,
    Transaction, Type, types::Json,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    dialect::{BindValue, Dialect, Fragment},
    model::StoreModel,
    predicate::TranslateError,
    query::{ListOptions, Translation, translate},
    search::SearchQuery,
};

/// Page size used by [`ResourceStore::for_each`] when the query does not set
/// a limit.
pub const DEFAULT_PAGE_SIZE: u64 = 100;

/// A database sqlx can drive and the translator can render for.
pub trait Backend: Database {
    const DIALECT: Dialect;

    /// The number of rows changed by a write. sqlx exposes this per driver
    /// only, so the backend forwards it.
    fn rows_affected(result: &Self::QueryResult) -> u64;
}

#[cfg(feature = "sqlite")]
impl Backend for sqlx::Sqlite {
    const DIALECT: Dialect = Dialect::Sqlite;

    fn rows_affected(result: &sqlx::sqlite::SqliteQueryResult) -> u64 {
        result.rows_affected()
    }
}

#[cfg(feature = "postgres")]
impl Backend for sqlx::Postgres {
    const DIALECT: Dialect = Dialect::Postgres;

    fn rows_affected(result: &sqlx::postgres::PgQueryResult) -> u64 {
        result.rows_affected()
    }
}

#[cfg(feature = "mysql")]
impl Backend for sqlx::MySql {
    const DIALECT: Dialect = Dialect::MySql;

    fn rows_affected(result: &sqlx::mysql::MySqlQueryResult) -> u64 {
        result.rows_affected()
    }
}

/// The error type for store operations.
///
/// Missing rows and version conflicts are not errors; they surface as
/// `Ok(None)` and `Ok(false)` on the respective operations.
#[derive(Debug, Snafu)]
pub enum StoreError {
    #[snafu(display("failed to translate search query"))]
    Translate { source: TranslateError },

    /// Indicates a write was attempted with a model that never went through
    /// the persistence hooks.
    #[snafu(display("model carries no uid"))]
    MissingUid,

    #[snafu(display("integer value {value} exceeds the supported column range"))]
    IntegerOverflow { value: u64 },

    /// Indicates that the cancellation token fired while a query was in
    /// flight. Iteration treats this as a clean stop, not a failure.
    #[snafu(display("operation cancelled"))]
    Cancelled,

    #[snafu(display("failed to begin transaction"))]
    Begin { source: sqlx::Error },

    #[snafu(display("failed to commit transaction"))]
    Commit { source: sqlx::Error },

    #[snafu(display("failed to roll back transaction"))]
    Rollback { source: sqlx::Error },

    #[snafu(display("failed to execute statement"))]
    Execute { source: sqlx::Error },

    #[snafu(display("failed to fetch rows"))]
    Fetch { source: sqlx::Error },

    #[snafu(display("failed to decode row"))]
    DecodeRow { source: sqlx::Error },
}

fn to_i64(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value)
        .ok()
        .context(IntegerOverflowSnafu { value })
}

/// Races a store future against the cancellation token. A token fired while
/// the query runs drops the future, aborting the statement at the driver.
async fn with_cancellation<T>(
    token: &CancellationToken,
    query: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    tokio::select! {
        biased;
        () = token.cancelled() => CancelledSnafu.fail(),
        result = query => result,
    }
}

/// A store of typed resource rows on top of a connection pool.
pub struct ResourceStore<DB: Database> {
    pool: Pool<DB>,
    labels_column: String,
}

impl<DB: Database> ResourceStore<DB> {
    pub fn new(pool: Pool<DB>) -> Self {
        Self {
            pool,
            labels_column: "labels".to_string(),
        }
    }

    /// Overrides the JSON column selectors are translated against.
    pub fn with_labels_column(mut self, column: impl Into<String>) -> Self {
        self.labels_column = column.into();
        self
    }

    pub fn pool(&self) -> &Pool<DB> {
        &self.pool
    }
}

impl<DB> ResourceStore<DB>
where
    DB: Backend,
    for<'c> &'c mut DB::Connection: Executor<'c, Database = DB>,
    for<'q> <DB as Database>::Arguments<'q>: IntoArguments<'q, DB>,
    for<'q> String: Encode<'q, DB> + Type<DB>,
    for<'q> i64: Encode<'q, DB> + Type<DB>,
    for<'q> DateTime<Utc>: Encode<'q, DB> + Type<DB>,
    for<'q> Option<DateTime<Utc>>: Encode<'q, DB> + Type<DB>,
    for<'q> Json<Labels>: Encode<'q, DB> + Type<DB>,
    for<'r> i64: Decode<'r, DB> + Type<DB>,
    usize: ColumnIndex<DB::Row>,
{
    /// Persists a new row. Fills in uid/name, stamps the timestamps and
    /// bumps the version to 1 before writing.
    #[instrument(skip_all, fields(table = M::TABLE), level = "debug")]
    pub async fn create<M>(&self, model: &mut M, token: &CancellationToken) -> Result<(), StoreError>
    where
        M: StoreModel<DB>,
    {
        Self::prepare_create(model);
        with_cancellation(token, Self::insert_with(&self.pool, model)).await
    }

    /// Fetches a live row by uid. A missing or tombstoned row is `Ok(None)`.
    pub async fn get<M>(
        &self,
        uid: &Uuid,
        token: &CancellationToken,
    ) -> Result<Option<M>, StoreError>
    where
        M: StoreModel<DB>,
    {
        with_cancellation(token, async {
            let mut builder =
                QueryBuilder::<DB>::new(format!("SELECT * FROM {} WHERE uid = ", M::TABLE));
            builder.push_bind(uid.to_string());
            builder.push(" AND deleted_at IS NULL");

            let row = builder
                .build()
                .fetch_optional(&self.pool)
                .await
                .context(FetchSnafu)?;

            row.as_ref().map(M::from_row).transpose().context(DecodeRowSnafu)
        })
        .await
    }

    /// Updates a row if the stored version still matches the model's. On
    /// success the model's version has been bumped. A version conflict (or a
    /// missing/tombstoned row) returns `Ok(false)`; conflicts, errors and
    /// cancellation all leave the model untouched.
    pub async fn update<M>(
        &self,
        model: &mut M,
        token: &CancellationToken,
    ) -> Result<bool, StoreError>
    where
        M: StoreModel<DB>,
    {
        with_cancellation(token, Self::update_with(&self.pool, model)).await
    }

    /// Tombstones a row if the stored version matches. Returns `Ok(false)`
    /// when the predicate misses.
    pub async fn delete<M>(
        &self,
        uid: &Uuid,
        version: u64,
        token: &CancellationToken,
    ) -> Result<bool, StoreError>
    where
        M: StoreModel<DB>,
    {
        with_cancellation(token, Self::delete_with::<_, M>(&self.pool, uid, version)).await
    }

    /// Runs a search, returning the page of rows plus the total number of
    /// matching rows (zero when counting is off).
    #[instrument(skip_all, fields(table = M::TABLE), level = "debug")]
    pub async fn list<M>(
        &self,
        query: &SearchQuery,
        options: &ListOptions,
        token: &CancellationToken,
    ) -> Result<(Vec<M>, u64), StoreError>
    where
        M: StoreModel<DB>,
    {
        let translation =
            translate(query, options, DB::DIALECT, &self.labels_column).context(TranslateSnafu)?;

        with_cancellation(token, async {
            let mut builder = QueryBuilder::<DB>::new(format!("SELECT * FROM {}", M::TABLE));
            push_filter(&mut builder, &translation);
            builder.push(format!(
                " ORDER BY {} {}",
                translation.order_column,
                translation.order_direction.sql()
            ));
            if let Some(limit) = translation.limit {
                builder.push(" LIMIT ");
                builder.push_bind(to_i64(limit)?);
                builder.push(" OFFSET ");
                builder.push_bind(to_i64(translation.offset)?);
            }

            let rows = builder
                .build()
                .fetch_all(&self.pool)
                .await
                .context(FetchSnafu)?;
            let models = rows
                .iter()
                .map(M::from_row)
                .collect::<Result<Vec<_>, _>>()
                .context(DecodeRowSnafu)?;

            let total = if translation.with_count {
                let mut builder =
                    QueryBuilder::<DB>::new(format!("SELECT count(*) FROM {}", M::TABLE));
                push_filter(&mut builder, &translation);

                let row = builder
                    .build()
                    .fetch_one(&self.pool)
                    .await
                    .context(FetchSnafu)?;
                let count: i64 = row.try_get(0).context(DecodeRowSnafu)?;
                u64::try_from(count).unwrap_or(0)
            } else {
                0
            };

            Ok((models, total))
        })
        .await
    }

    /// Pages through every row matching the query, invoking the callback per
    /// row until it returns `false` or the rows run out. The token is raced
    /// against every in-flight page fetch and checked between pages; either
    /// way a cancelled token ends the iteration cleanly, not as an error.
    pub async fn for_each<M, F>(
        &self,
        query: &SearchQuery,
        options: &ListOptions,
        token: &CancellationToken,
        mut callback: F,
    ) -> Result<(), StoreError>
    where
        M: StoreModel<DB>,
        F: FnMut(M) -> bool,
    {
        let page_size = if query.limit > 0 {
            query.limit
        } else {
            DEFAULT_PAGE_SIZE
        };

        let mut page_query = query.clone();
        page_query.limit = page_size;
        let options = options.clone().count(false);

        loop {
            if token.is_cancelled() {
                debug!(table = M::TABLE, "iteration cancelled");
                return Ok(());
            }

            // `list` races the fetch against the token, so a cancellation
            // mid-query drops the in-flight statement and lands here
            let (models, _) = match self.list::<M>(&page_query, &options, token).await {
                Ok(page) => page,
                Err(StoreError::Cancelled) => {
                    debug!(table = M::TABLE, "iteration cancelled mid-fetch");
                    return Ok(());
                }
                Err(error) => return Err(error),
            };
            let fetched = models.len() as u64;

            for model in models {
                if !callback(model) {
                    return Ok(());
                }
            }

            if fetched < page_size {
                return Ok(());
            }
            page_query.offset += page_size;
        }
    }

    /// Opens a transaction exposing the write operations. Dropping it
    /// without committing rolls back.
    pub async fn begin(&self, token: &CancellationToken) -> Result<StoreTransaction<DB>, StoreError> {
        with_cancellation(token, async {
            let tx = self.pool.begin().await.context(BeginSnafu)?;
            Ok(StoreTransaction { tx })
        })
        .await
    }

    /// The object-meta persistence hooks. Validation of names and labels is
    /// the API boundary's concern (`ObjectMeta::validate`); the store
    /// persists what it is handed.
    fn prepare_create<M>(model: &mut M)
    where
        M: StoreModel<DB>,
    {
        let now = Utc::now();
        let meta = model.meta_mut();
        meta.prepare_for_create(now);
        meta.touch(now);
    }

    async fn insert_with<'e, E, M>(executor: E, model: &M) -> Result<(), StoreError>
    where
        E: Executor<'e, Database = DB>,
        M: StoreModel<DB>,
    {
        let meta = model.meta();
        let uid = meta.uid.context(MissingUidSnafu)?;
        let version = to_i64(meta.version)?;

        let mut builder = QueryBuilder::<DB>::new(format!(
            "INSERT INTO {} (uid, name, version, labels, created_at, updated_at, deleted_at",
            M::TABLE
        ));
        for column in M::PAYLOAD_COLUMNS {
            builder.push(", ");
            builder.push(*column);
        }
        builder.push(") VALUES (");
        {
            let mut values = builder.separated(", ");
            values.push_bind(uid.to_string());
            values.push_bind(meta.name.clone());
            values.push_bind(version);
            values.push_bind(Json(meta.labels.clone()));
            values.push_bind(meta.created_at);
            values.push_bind(meta.updated_at);
            values.push_bind(meta.deleted_at);
        }
        for column in M::PAYLOAD_COLUMNS {
            builder.push(", ");
            model.push_payload_bind(&mut builder, column);
        }
        builder.push(")");

        builder.build().execute(executor).await.context(ExecuteSnafu)?;
        Ok(())
    }

    async fn update_with<'e, E, M>(executor: E, model: &mut M) -> Result<bool, StoreError>
    where
        E: Executor<'e, Database = DB>,
        M: StoreModel<DB>,
    {
        let now = Utc::now();
        let expected = to_i64(model.meta().version)?;
        let next_version = to_i64(model.meta().version.saturating_add(1))?;

        let meta = model.meta();
        let uid = meta.uid.context(MissingUidSnafu)?;

        let mut builder =
            QueryBuilder::<DB>::new(format!("UPDATE {} SET name = ", M::TABLE));
        builder.push_bind(meta.name.clone());
        builder.push(", version = ");
        builder.push_bind(next_version);
        builder.push(", labels = ");
        builder.push_bind(Json(meta.labels.clone()));
        builder.push(", updated_at = ");
        builder.push_bind(now);
        for column in M::PAYLOAD_COLUMNS {
            builder.push(format!(", {column} = "));
            model.push_payload_bind(&mut builder, column);
        }
        builder.push(" WHERE uid = ");
        builder.push_bind(uid.to_string());
        builder.push(" AND version = ");
        builder.push_bind(expected);
        builder.push(" AND deleted_at IS NULL");

        let result = builder.build().execute(executor).await.context(ExecuteSnafu)?;

        if DB::rows_affected(&result) == 0 {
            return Ok(false);
        }

        // The row is written; only now does the model observe the mutation.
        // Cancellation drops this future before reaching here, leaving the
        // model consistent with the unchanged row.
        model.meta_mut().touch(now);
        Ok(true)
    }

    async fn delete_with<'e, E, M>(executor: E, uid: &Uuid, version: u64) -> Result<bool, StoreError>
    where
        E: Executor<'e, Database = DB>,
        M: StoreModel<DB>,
    {
        let mut builder =
            QueryBuilder::<DB>::new(format!("UPDATE {} SET deleted_at = ", M::TABLE));
        builder.push_bind(Utc::now());
        builder.push(", version = version + 1 WHERE uid = ");
        builder.push_bind(uid.to_string());
        builder.push(" AND version = ");
        builder.push_bind(to_i64(version)?);
        builder.push(" AND deleted_at IS NULL");

        let result = builder.build().execute(executor).await.context(ExecuteSnafu)?;
        Ok(DB::rows_affected(&result) > 0)
    }
}

fn push_filter<DB>(builder: &mut QueryBuilder<'_, DB>, translation: &Translation)
where
    DB: Database,
    for<'q> String: Encode<'q, DB> + Type<DB>,
    for<'q> i64: Encode<'q, DB> + Type<DB>,
    for<'q> DateTime<Utc>: Encode<'q, DB> + Type<DB>,
{
    if translation.filter.is_empty() {
        return;
    }

    builder.push(" WHERE ");
    for fragment in &translation.filter {
        match fragment {
            Fragment::Sql(sql) => {
                builder.push(sql.as_str());
            }
            Fragment::Arg(BindValue::Text(text)) => {
                builder.push_bind(text.clone());
            }
            Fragment::Arg(BindValue::Int(int)) => {
                builder.push_bind(*int);
            }
            Fragment::Arg(BindValue::Timestamp(timestamp)) => {
                builder.push_bind(*timestamp);
            }
        }
    }
}

/// An open transaction exposing the write operations. [`commit`] or
/// [`rollback`] end it; dropping it unfinished rolls back on release.
///
/// [`commit`]: StoreTransaction::commit
/// [`rollback`]: StoreTransaction::rollback
pub struct StoreTransaction<DB: Backend> {
    tx: Transaction<'static, DB>,
}

impl<DB> StoreTransaction<DB>
where
    DB: Backend,
    for<'c> &'c mut DB::Connection: Executor<'c, Database = DB>,
    for<'q> <DB as Database>::Arguments<'q>: IntoArguments<'q, DB>,
    for<'q> String: Encode<'q, DB> + Type<DB>,
    for<'q> i64: Encode<'q, DB> + Type<DB>,
    for<'q> DateTime<Utc>: Encode<'q, DB> + Type<DB>,
    for<'q> Option<DateTime<Utc>>: Encode<'q, DB> + Type<DB>,
    for<'q> Json<Labels>: Encode<'q, DB> + Type<DB>,
    for<'r> i64: Decode<'r, DB> + Type<DB>,
    usize: ColumnIndex<DB::Row>,
{
    pub async fn create<M>(
        &mut self,
        model: &mut M,
        token: &CancellationToken,
    ) -> Result<(), StoreError>
    where
        M: StoreModel<DB>,
    {
        ResourceStore::<DB>::prepare_create(model);
        with_cancellation(token, ResourceStore::<DB>::insert_with(&mut *self.tx, model)).await
    }

    pub async fn update<M>(
        &mut self,
        model: &mut M,
        token: &CancellationToken,
    ) -> Result<bool, StoreError>
    where
        M: StoreModel<DB>,
    {
        with_cancellation(token, ResourceStore::<DB>::update_with(&mut *self.tx, model)).await
    }

    pub async fn delete<M>(
        &mut self,
        uid: &Uuid,
        version: u64,
        token: &CancellationToken,
    ) -> Result<bool, StoreError>
    where
        M: StoreModel<DB>,
    {
        with_cancellation(
            token,
            ResourceStore::<DB>::delete_with::<_, M>(&mut *self.tx, uid, version),
        )
        .await
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.context(CommitSnafu)
    }

    pub async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await.context(RollbackSnafu)
    }
}
