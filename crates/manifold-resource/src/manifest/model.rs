//! Typed store rows.
//!
//! A [`ResourceModel`] (or [`StatefulResource`]) is the shape a resource
//! takes between the codec and the store: object meta plus the spec (and
//! status) by value. Conversion from a manifest fails when the manifest's
//! payload is not of the model's type, which is also where an unknown kind
//! finally surfaces as an error.

use std::any::Any;

use snafu::Snafu;

use super::{Payload, PayloadValue, ResourceManifest};
use crate::registry::Kind;

/// The error type for manifest to model conversion.
#[derive(Debug, Snafu)]
pub enum ModelError {
    /// Indicates that the manifest's spec is not of the model's spec type.
    #[snafu(display("manifest spec holds {actual}, expected {expected}"))]
    SpecTypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// Indicates that the manifest's status is not of the model's status
    /// type.
    #[snafu(display("manifest status holds {actual}, expected {expected}"))]
    StatusTypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

/// A typed resource row: object meta plus the spec value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceModel<S> {
    pub meta: super::ObjectMeta,
    pub spec: S,
}

impl<S> ResourceModel<S>
where
    S: PayloadValue,
{
    /// Re-wraps the model as a manifest of the given kind.
    pub fn into_manifest(self, kind: Kind) -> ResourceManifest {
        let mut manifest = ResourceManifest::new(kind);
        manifest.metadata = self.meta;
        manifest.spec = Some(Payload::typed(self.spec));
        manifest
    }
}

impl<S> TryFrom<&ResourceManifest> for ResourceModel<S>
where
    S: Any + Clone + Default,
{
    type Error = ModelError;

    fn try_from(manifest: &ResourceManifest) -> Result<Self, Self::Error> {
        Ok(Self {
            meta: manifest.metadata.clone(),
            spec: extract(manifest.spec.as_ref(), Role::Spec)?,
        })
    }
}

/// A typed resource row carrying both intended and observed state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatefulResource<S, St> {
    pub meta: super::ObjectMeta,
    pub spec: S,
    pub status: St,
}

impl<S, St> StatefulResource<S, St>
where
    S: PayloadValue,
    St: PayloadValue,
{
    /// Re-wraps the model as a manifest of the given kind.
    pub fn into_manifest(self, kind: Kind) -> ResourceManifest {
        let mut manifest = ResourceManifest::new(kind);
        manifest.metadata = self.meta;
        manifest.spec = Some(Payload::typed(self.spec));
        manifest.status = Some(Payload::typed(self.status));
        manifest
    }
}

impl<S, St> TryFrom<&ResourceManifest> for StatefulResource<S, St>
where
    S: Any + Clone + Default,
    St: Any + Clone + Default,
{
    type Error = ModelError;

    fn try_from(manifest: &ResourceManifest) -> Result<Self, Self::Error> {
        Ok(Self {
            meta: manifest.metadata.clone(),
            spec: extract(manifest.spec.as_ref(), Role::Spec)?,
            status: extract(manifest.status.as_ref(), Role::Status)?,
        })
    }
}

#[derive(Clone, Copy)]
enum Role {
    Spec,
    Status,
}

/// Pulls a typed value out of a payload; an absent payload converts to the
/// zero value.
fn extract<T>(payload: Option<&Payload>, role: Role) -> Result<T, ModelError>
where
    T: Any + Clone + Default,
{
    let Some(payload) = payload else {
        return Ok(T::default());
    };

    payload.downcast_ref::<T>().cloned().ok_or_else(|| {
        let expected = std::any::type_name::<T>();
        let actual = payload.describe();

        match role {
            Role::Spec => ModelError::SpecTypeMismatch { expected, actual },
            Role::Status => ModelError::StatusTypeMismatch { expected, actual },
        }
    })
}
