//! Binding between typed resource rows and their tables.

use manifold_resource::manifest::ObjectMeta;
use sqlx::{Database, QueryBuilder};

/// The meta columns every resource table carries, in the order the store
/// binds them.
pub const META_COLUMNS: &[&str] = &[
    "uid",
    "name",
    "version",
    "labels",
    "created_at",
    "updated_at",
    "deleted_at",
];

/// A typed row the store can persist: one table per kind, the meta columns
/// plus the model's own flattened payload columns.
///
/// Implementations must bind owned values in
/// [`StoreModel::push_payload_bind`] (clone the field); the builder does not
/// borrow from the model.
pub trait StoreModel<DB: Database>: Send + Sized {
    /// The table backing this model.
    const TABLE: &'static str;

    /// The flattened spec (and status) columns, in bind order.
    const PAYLOAD_COLUMNS: &'static [&'static str];

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    /// Pushes the bind for one payload column onto the builder.
    fn push_payload_bind(&self, builder: &mut QueryBuilder<'_, DB>, column: &str);

    /// Decodes a full row (meta and payload columns) back into the model.
    fn from_row(row: &DB::Row) -> Result<Self, sqlx::Error>;
}
