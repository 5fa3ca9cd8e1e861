//! The kind registry.
//!
//! Manifests arrive typed only by a string, so something has to bind that
//! string to the concrete spec and status types an application declared.
//! A [`KindRegistry`] holds that binding: it is an explicit value (tests get
//! hermetic registries) with a process-wide instance at
//! [`KindRegistry::global`] for the common single-registry deployment.
//!
//! Registration is expected to happen at process start; the interior
//! reader/writer lock makes later registration safe as well.
//! [`KindRegistry::unregister`] exists for test teardown only.

use std::{
    any::{Any, TypeId},
    collections::BTreeMap,
    fmt::{Debug, Display},
    sync::{Arc, LazyLock, PoisonError, RwLock},
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use snafu::{Snafu, ensure};

use crate::manifest::{Payload, PayloadValue, ResourceManifest, StrictDecodeError, strict_from_json};

/// A short string identifying a family of resources.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Kind(String);

impl Kind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Kind {
    fn from(kind: &str) -> Self {
        Self(kind.to_string())
    }
}

impl From<String> for Kind {
    fn from(kind: String) -> Self {
        Self(kind)
    }
}

impl From<&Kind> for Kind {
    fn from(kind: &Kind) -> Self {
        kind.clone()
    }
}

/// The error type for registration operations.
#[derive(Debug, PartialEq, Snafu)]
pub enum RegistryError {
    /// Indicates that the kind is already registered. Kinds bind to exactly
    /// one pair of spec/status types for the process lifetime.
    #[snafu(display("kind {kind} is already registered"))]
    DuplicateKind { kind: Kind },
}

type DecodeFn = dyn Fn(serde_json::Value) -> Result<Box<dyn PayloadValue>, StrictDecodeError>
    + Send
    + Sync;
type FreshFn = dyn Fn() -> Box<dyn PayloadValue> + Send + Sync;

/// The erased codec for one payload role (spec or status) of a kind.
#[derive(Clone)]
pub(crate) struct PayloadCodec {
    type_id: TypeId,
    type_name: &'static str,
    decode: Arc<DecodeFn>,
    fresh: Arc<FreshFn>,
}

impl PayloadCodec {
    fn of<T>() -> Self
    where
        T: Any + Clone + Debug + Default + Serialize + DeserializeOwned + Send + Sync,
    {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            decode: Arc::new(|value| {
                strict_from_json::<T>(value).map(|decoded| Box::new(decoded) as Box<dyn PayloadValue>)
            }),
            fresh: Arc::new(|| Box::new(T::default()) as Box<dyn PayloadValue>),
        }
    }

    pub(crate) fn decode(
        &self,
        value: serde_json::Value,
    ) -> Result<Box<dyn PayloadValue>, StrictDecodeError> {
        (self.decode)(value)
    }

    fn fresh(&self) -> Box<dyn PayloadValue> {
        (self.fresh)()
    }

    fn info(&self) -> TypeInfo {
        TypeInfo {
            type_id: self.type_id,
            type_name: self.type_name,
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct KindCodecs {
    pub(crate) spec: Option<PayloadCodec>,
    pub(crate) status: Option<PayloadCodec>,
}

/// Describes one registered payload type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TypeInfo {
    pub type_id: TypeId,
    pub type_name: &'static str,
}

/// The result of a kind lookup: the registered exemplars, if any, and
/// whether the kind is known at all.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KindInfo {
    pub known: bool,
    pub spec: Option<TypeInfo>,
    pub status: Option<TypeInfo>,
}

/// The kind → (spec type, status type) binding.
pub struct KindRegistry {
    entries: RwLock<BTreeMap<Kind, KindCodecs>>,
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl KindRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// The process-wide registry.
    pub fn global() -> &'static Self {
        static GLOBAL: LazyLock<KindRegistry> = LazyLock::new(KindRegistry::new);
        &GLOBAL
    }

    /// Registers a kind with a spec type and no status.
    pub fn register_kind<S>(&self, kind: impl Into<Kind>) -> Result<(), RegistryError>
    where
        S: Any + Clone + Debug + Default + Serialize + DeserializeOwned + Send + Sync,
    {
        self.insert(
            kind.into(),
            KindCodecs {
                spec: Some(PayloadCodec::of::<S>()),
                status: None,
            },
        )
    }

    /// Registers a kind with both a spec and a status type.
    pub fn register_manifest<S, St>(&self, kind: impl Into<Kind>) -> Result<(), RegistryError>
    where
        S: Any + Clone + Debug + Default + Serialize + DeserializeOwned + Send + Sync,
        St: Any + Clone + Debug + Default + Serialize + DeserializeOwned + Send + Sync,
    {
        self.insert(
            kind.into(),
            KindCodecs {
                spec: Some(PayloadCodec::of::<S>()),
                status: Some(PayloadCodec::of::<St>()),
            },
        )
    }

    fn insert(&self, kind: Kind, codecs: KindCodecs) -> Result<(), RegistryError> {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        ensure!(!entries.contains_key(&kind), DuplicateKindSnafu { kind });
        entries.insert(kind, codecs);

        Ok(())
    }

    /// Looks a kind up, returning the registered exemplar types and whether
    /// the kind is known.
    pub fn lookup(&self, kind: &Kind) -> KindInfo {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);

        entries.get(kind).map_or_else(KindInfo::default, |codecs| KindInfo {
            known: true,
            spec: codecs.spec.as_ref().map(PayloadCodec::info),
            status: codecs.status.as_ref().map(PayloadCodec::info),
        })
    }

    pub(crate) fn codecs(&self, kind: &Kind) -> Option<KindCodecs> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(kind).cloned()
    }

    /// Returns a fresh manifest for a registered kind, with zero-valued
    /// payloads of the registered types and the kind set in its type meta.
    pub fn instance_of(&self, kind: impl Into<Kind>) -> Option<ResourceManifest> {
        let kind = kind.into();
        let codecs = self.codecs(&kind)?;

        let mut manifest = ResourceManifest::new(kind);
        manifest.spec = codecs.spec.as_ref().map(|codec| Payload::Typed(codec.fresh()));
        manifest.status = codecs
            .status
            .as_ref()
            .map(|codec| Payload::Typed(codec.fresh()));

        Some(manifest)
    }

    /// Finds the kind whose registered spec type is `T`. This is a linear
    /// scan; kind sets are small.
    pub fn kind_of<T: Any>(&self) -> Option<Kind> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);

        entries
            .iter()
            .find(|(_, codecs)| {
                codecs
                    .spec
                    .as_ref()
                    .is_some_and(|codec| codec.type_id == TypeId::of::<T>())
            })
            .map(|(kind, _)| kind.clone())
    }

    /// Removes a registration. Intended for test teardown; callers are
    /// responsible for avoiding concurrent lookups of the kind.
    pub fn unregister(&self, kind: &Kind) -> bool {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        entries.remove(kind).is_some()
    }
}

impl Debug for KindRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_list().entries(entries.keys()).finish()
    }
}
