//! The on-wire resource envelope: type meta, object meta, spec and status.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use uuid::Uuid;

use crate::{
    kvp::{Labels, LabelsError},
    registry::Kind,
    validation::is_rfc_1123_subdomain,
};

mod codec;
mod model;
mod payload;

pub use codec::*;
pub use model::*;
pub use payload::*;

/// The error type for object meta validation.
#[derive(Debug, PartialEq, Snafu)]
pub enum MetaError {
    /// Indicates that the resource name is not a valid DNS subdomain. All
    /// violations are reported.
    #[snafu(display("invalid resource name {name:?}: {}", failures.join(", ")))]
    InvalidName {
        name: String,
        failures: Vec<String>,
    },

    /// Indicates that one or more labels failed to validate.
    #[snafu(display("invalid resource labels"))]
    InvalidLabels { source: LabelsError },
}

/// Identifies what a manifest describes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeMeta {
    #[serde(rename = "apiVersion", default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    pub kind: Kind,
}

impl TypeMeta {
    pub fn new(kind: Kind) -> Self {
        Self {
            api_version: None,
            kind,
        }
    }
}

/// Metadata common to every persisted resource.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ObjectMeta {
    /// The resource identifier, assigned on first persistence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,

    /// Monotonically increasing mutation counter. A freshly persisted row is
    /// at version 1; every further write bumps it by one.
    #[serde(skip_serializing_if = "u64_is_zero")]
    pub version: u64,

    /// DNS-subdomain-shaped name, unique within the live rows of a kind.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,

    #[serde(rename = "creationTimestamp", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(rename = "updateTimestamp", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    /// A set deletion timestamp marks the row as a tombstone.
    #[serde(rename = "deletionTimestamp", skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

fn u64_is_zero(value: &u64) -> bool {
    *value == 0
}

impl ObjectMeta {
    /// Fills in the identity fields before the first persistence: a missing
    /// uid gets a fresh UUID, a missing name adopts that UUID.
    pub fn prepare_for_create(&mut self, now: DateTime<Utc>) {
        let uid = *self.uid.get_or_insert_with(Uuid::new_v4);

        if self.name.is_empty() {
            self.name = uid.to_string();
        }

        self.created_at.get_or_insert(now);
    }

    /// Records a mutation: bumps the version and stamps the update time.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = Some(now);
    }

    /// Whether this row is a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Validates the name and labels, reporting label failures in aggregate.
    pub fn validate(&self) -> Result<(), MetaError> {
        if let Err(failures) = is_rfc_1123_subdomain(&self.name) {
            return InvalidNameSnafu {
                name: self.name.clone(),
                failures,
            }
            .fail();
        }

        self.labels.validate().context(InvalidLabelsSnafu)
    }
}

/// A navigation hint attached to a response, never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HateoasLink {
    #[serde(rename = "ref")]
    pub reference: String,

    #[serde(rename = "rel")]
    pub relationship: String,
}

/// The `_links` attachment: role name to link.
pub type HateoasLinks = BTreeMap<String, HateoasLink>;

/// The decoded on-wire envelope of a resource.
///
/// `spec` and `status` are held as [`Payload`]s: typed values for registered
/// kinds, preserved generic content otherwise. Absent payloads stay `None` so
/// callers can distinguish "nothing sent" from "empty value sent".
#[derive(Clone, Debug, Default)]
pub struct ResourceManifest {
    pub type_meta: TypeMeta,
    pub metadata: ObjectMeta,
    pub spec: Option<Payload>,
    pub status: Option<Payload>,

    /// Attached by the transport layer on responses; never persisted.
    pub links: Option<HateoasLinks>,
}

impl ResourceManifest {
    pub fn new(kind: Kind) -> Self {
        Self {
            type_meta: TypeMeta::new(kind),
            ..Self::default()
        }
    }

    pub fn kind(&self) -> &Kind {
        &self.type_meta.kind
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn create_hooks_fill_identity() {
        let mut meta = ObjectMeta::default();
        let now = Utc::now();

        meta.prepare_for_create(now);
        meta.touch(now);

        let uid = meta.uid.unwrap();
        assert_eq!(meta.name, uid.to_string());
        assert_eq!(meta.version, 1);
        assert_eq!(meta.created_at, Some(now));
        assert_eq!(meta.updated_at, Some(now));
    }

    #[test]
    fn create_hooks_keep_existing_identity() {
        let uid = Uuid::new_v4();
        let mut meta = ObjectMeta {
            uid: Some(uid),
            name: "rex".to_string(),
            ..ObjectMeta::default()
        };

        meta.prepare_for_create(Utc::now());

        assert_eq!(meta.uid, Some(uid));
        assert_eq!(meta.name, "rex");
    }

    #[test]
    fn generated_name_is_a_valid_subdomain() {
        let mut meta = ObjectMeta::default();
        meta.prepare_for_create(Utc::now());

        assert!(meta.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_name() {
        let meta = ObjectMeta {
            name: "Not-A-Valid-Name-".to_string(),
            ..ObjectMeta::default()
        };

        assert!(matches!(
            meta.validate(),
            Err(MetaError::InvalidName { .. })
        ));
    }

    #[test]
    fn meta_wire_names() {
        let meta = ObjectMeta {
            uid: Some(Uuid::nil()),
            version: 3,
            name: "rex".to_string(),
            labels: Labels::from_iter([("env", "prod")]),
            created_at: Some(Utc::now()),
            updated_at: None,
            deleted_at: None,
        };

        let value = serde_json::to_value(&meta).unwrap();
        let object = value.as_object().unwrap();

        assert!(object.contains_key("uid"));
        assert!(object.contains_key("version"));
        assert!(object.contains_key("creationTimestamp"));
        assert!(!object.contains_key("updateTimestamp"));
        assert!(!object.contains_key("deletionTimestamp"));
    }
}
