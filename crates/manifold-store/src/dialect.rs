//! Dialect-specific rendering of the predicate IR.
//!
//! Renderers emit a stream of [`Fragment`]s: literal SQL interleaved with
//! bind values. Placeholder syntax is deliberately absent here; the
//! executing layer pushes fragments through a `sqlx::QueryBuilder`, which
//! owns `?` versus `$n` per backend. [`preview`] renders a fragment stream
//! into a displayable statement for logs and tests.

use chrono::{DateTime, Utc};

use crate::predicate::{Cast, CompareOp, Extract, Predicate, Scalar};

/// The SQL flavor the translator targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Dialect {
    MySql,
    Sqlite,
    Postgres,
}

/// A value bound into the statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum BindValue {
    Text(String),
    Int(i64),
    Timestamp(DateTime<Utc>),
}

/// One piece of a rendered statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Fragment {
    Sql(String),
    Arg(BindValue),
}

impl Fragment {
    fn sql(sql: impl Into<String>) -> Self {
        Self::Sql(sql.into())
    }
}

/// Renders one predicate into `out`.
pub(crate) fn render_predicate(
    dialect: Dialect,
    predicate: &Predicate,
    column: &str,
    out: &mut Vec<Fragment>,
) {
    match dialect {
        Dialect::MySql | Dialect::Sqlite => render_json_extract(predicate, column, out),
        Dialect::Postgres => render_postgres(predicate, column, out),
    }
}

// --- MySQL / SQLite ---------------------------------------------------------

/// The JSON path literal for `JSON_EXTRACT`: `$."k1"."k2"`. Keys containing
/// `"` or `\` are rejected at requirement construction, so the quoting here
/// cannot be escaped from.
fn json_path(segments: &[String]) -> String {
    let mut path = String::from("$");
    for segment in segments {
        path.push_str(".\"");
        path.push_str(segment);
        path.push('"');
    }
    path
}

fn push_json_extract(extract: &Extract, column: &str, out: &mut Vec<Fragment>) {
    match extract.cast {
        Cast::Integer => {
            out.push(Fragment::sql(format!("cast(JSON_EXTRACT({column}, ")));
            out.push(Fragment::Arg(BindValue::Text(json_path(&extract.segments))));
            out.push(Fragment::sql(") as int)"));
        }
        Cast::None => {
            out.push(Fragment::sql(format!("JSON_EXTRACT({column}, ")));
            out.push(Fragment::Arg(BindValue::Text(json_path(&extract.segments))));
            out.push(Fragment::sql(")"));
        }
    }
}

/// Booleans pass through as SQL literals on this dialect family; everything
/// else is parameterized.
fn push_json_scalar(value: &Scalar, out: &mut Vec<Fragment>) {
    match value {
        Scalar::Text(text) => out.push(Fragment::Arg(BindValue::Text(text.clone()))),
        Scalar::Int(int) => out.push(Fragment::Arg(BindValue::Int(*int))),
        Scalar::Bool(true) => out.push(Fragment::sql("true")),
        Scalar::Bool(false) => out.push(Fragment::sql("false")),
    }
}

fn render_json_extract(predicate: &Predicate, column: &str, out: &mut Vec<Fragment>) {
    match predicate {
        Predicate::NotNull(extract) => {
            push_json_extract(extract, column, out);
            out.push(Fragment::sql(" IS NOT NULL"));
        }
        Predicate::IsNull(extract) => {
            push_json_extract(extract, column, out);
            out.push(Fragment::sql(" IS NULL"));
        }
        Predicate::Compare { extract, op, value } => {
            push_json_extract(extract, column, out);
            out.push(Fragment::sql(format!(" {} ", op.sql())));
            push_json_scalar(value, out);
        }
        Predicate::InSet {
            extract,
            values,
            negated,
        } => {
            push_json_extract(extract, column, out);
            out.push(Fragment::sql(if *negated { " NOT IN (" } else { " IN (" }));
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    out.push(Fragment::sql(", "));
                }
                push_json_scalar(value, out);
            }
            out.push(Fragment::sql(")"));
        }
        Predicate::Never => out.push(Fragment::sql("1 = 0")),
    }
}

// --- PostgreSQL -------------------------------------------------------------

/// The inline extraction used for existence checks: `col::json ->> 'k'` for
/// a single key, `col::json #>> '{k1,k2}'` for a path. Keys are inlined
/// (they come from validated requirements); single quotes are doubled.
fn postgres_inline_path(column: &str, segments: &[String]) -> String {
    let escape = |segment: &String| segment.replace('\'', "''");

    if let [segment] = segments {
        format!("{column}::json ->> '{}'", escape(segment))
    } else {
        let joined = segments.iter().map(escape).collect::<Vec<_>>().join(",");
        format!("{column}::json #>> '{{{joined}}}'")
    }
}

/// The parameterized extraction used for value comparisons:
/// `json_extract_path_text(col::json, $1, $2, ...)`.
fn push_postgres_extract(extract: &Extract, column: &str, out: &mut Vec<Fragment>) {
    if extract.cast == Cast::Integer {
        out.push(Fragment::sql("cast("));
    }

    out.push(Fragment::sql(format!("json_extract_path_text({column}::json")));
    for segment in &extract.segments {
        out.push(Fragment::sql(", "));
        out.push(Fragment::Arg(BindValue::Text(segment.clone())));
    }
    out.push(Fragment::sql(")"));

    if extract.cast == Cast::Integer {
        out.push(Fragment::sql(" as int)"));
    }
}

/// The text extraction returns text, so every right-hand side except the
/// integer casts is coerced to its text representation before binding.
fn push_postgres_scalar(value: &Scalar, cast: Cast, out: &mut Vec<Fragment>) {
    let bind = match (value, cast) {
        (Scalar::Int(int), Cast::Integer) => BindValue::Int(*int),
        (Scalar::Int(int), Cast::None) => BindValue::Text(int.to_string()),
        (Scalar::Text(text), _) => BindValue::Text(text.clone()),
        (Scalar::Bool(flag), _) => BindValue::Text(flag.to_string()),
    };
    out.push(Fragment::Arg(bind));
}

fn render_postgres(predicate: &Predicate, column: &str, out: &mut Vec<Fragment>) {
    match predicate {
        Predicate::NotNull(extract) => out.push(Fragment::sql(format!(
            "{} IS NOT NULL",
            postgres_inline_path(column, &extract.segments)
        ))),
        Predicate::IsNull(extract) => out.push(Fragment::sql(format!(
            "{} IS NULL",
            postgres_inline_path(column, &extract.segments)
        ))),
        Predicate::Compare { extract, op, value } => {
            push_postgres_extract(extract, column, out);
            out.push(Fragment::sql(format!(" {} ", op.sql())));
            push_postgres_scalar(value, extract.cast, out);
        }
        Predicate::InSet {
            extract,
            values,
            negated,
        } => {
            push_postgres_extract(extract, column, out);
            out.push(Fragment::sql(if *negated { " NOT IN (" } else { " IN (" }));
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    out.push(Fragment::sql(", "));
                }
                push_postgres_scalar(value, Cast::None, out);
            }
            out.push(Fragment::sql(")"));
        }
        Predicate::Never => out.push(Fragment::sql("1 = 0")),
    }
}

// --- Preview ----------------------------------------------------------------

/// Renders a fragment stream into a statement string with the dialect's
/// placeholder syntax. For logs and tests; execution binds through
/// `sqlx::QueryBuilder` instead.
pub(crate) fn preview(dialect: Dialect, fragments: &[Fragment]) -> String {
    let mut sql = String::new();
    let mut placeholder = 0usize;

    for fragment in fragments {
        match fragment {
            Fragment::Sql(text) => sql.push_str(text),
            Fragment::Arg(_) => match dialect {
                Dialect::MySql | Dialect::Sqlite => sql.push('?'),
                Dialect::Postgres => {
                    placeholder += 1;
                    sql.push_str(&format!("${placeholder}"));
                }
            },
        }
    }

    sql
}
