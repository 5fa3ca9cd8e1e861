//! Typed custom resources over an untyped wire.
//!
//! Applications declare spec (and status) types at runtime and register them
//! under string kinds in a [`registry::KindRegistry`]. The
//! [`manifest::ManifestCodec`] then decodes incoming JSON or YAML manifests
//! into [`manifest::ResourceManifest`]s whose payloads carry the registered
//! types, falling back to generic preservation for unknown kinds. Resources
//! carry validated [`kvp::Labels`] which [`selector::Selector`]s match on.

pub mod kvp;
pub mod manifest;
pub mod registry;
pub mod selector;
pub mod validation;

pub use manifest::{ManifestCodec, ObjectMeta, ResourceManifest, ResourceModel, StatefulResource};
pub use registry::{Kind, KindRegistry};
pub use selector::{LabelSelector, Selector};
