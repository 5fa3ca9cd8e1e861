//! The manifest codec.
//!
//! Decoding happens in two passes: the envelope is read first with the
//! payloads kept raw, then `spec` and `status` are dispatched on the kind
//! registry. Payloads of registered kinds decode strictly (unknown fields
//! are rejected) into the registered types; payloads of unknown kinds are
//! preserved generically so the envelope is never lost.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use snafu::{ResultExt, Snafu};
use tracing::debug;

use super::{HateoasLinks, ObjectMeta, Payload, PayloadError, ResourceManifest, TypeMeta};
use crate::registry::{Kind, KindRegistry};

/// The error type for strict payload decoding.
#[derive(Debug, Snafu)]
pub enum StrictDecodeError {
    /// Indicates that the payload carries a field the registered type does
    /// not know about.
    #[snafu(display("unknown field {field:?}"))]
    UnknownField { field: String },

    /// Indicates that the payload does not deserialize into the registered
    /// type.
    #[snafu(display("payload does not match the registered type"))]
    TypeMismatch { source: serde_json::Error },
}

/// Decodes `T` from a JSON value, rejecting unknown fields at any depth.
///
/// Registered types cannot be forced to carry `deny_unknown_fields`, so the
/// rejection happens here, in the deserializer wrapper.
pub(crate) fn strict_from_json<T>(value: serde_json::Value) -> Result<T, StrictDecodeError>
where
    T: DeserializeOwned,
{
    let mut unknown: Option<String> = None;

    let decoded = serde_ignored::deserialize(value, |path| {
        if unknown.is_none() {
            unknown = Some(path.to_string());
        }
    })
    .context(TypeMismatchSnafu)?;

    match unknown {
        Some(field) => UnknownFieldSnafu { field }.fail(),
        None => Ok(decoded),
    }
}

/// The error type for manifest encoding/decoding.
#[derive(Debug, Snafu)]
pub enum CodecError {
    #[snafu(display("failed to deserialize manifest from JSON"))]
    DeserializeJson { source: serde_json::Error },

    #[snafu(display("failed to deserialize manifest from YAML"))]
    DeserializeYaml { source: serde_yaml::Error },

    #[snafu(display("failed to serialize manifest to JSON"))]
    SerializeJson { source: serde_json::Error },

    #[snafu(display("failed to serialize manifest to YAML"))]
    SerializeYaml { source: serde_yaml::Error },

    /// Indicates that the spec payload did not decode into the type
    /// registered for the manifest's kind.
    #[snafu(display("failed to decode spec for kind {kind}"))]
    DecodeSpec {
        source: StrictDecodeError,
        kind: Kind,
    },

    /// Indicates that the status payload did not decode into the type
    /// registered for the manifest's kind.
    #[snafu(display("failed to decode status for kind {kind}"))]
    DecodeStatus {
        source: StrictDecodeError,
        kind: Kind,
    },

    /// Indicates that a spec was supplied for a kind registered without a
    /// spec type.
    #[snafu(display("kind {kind} does not take a spec"))]
    SpecNotSupported { kind: Kind },

    /// Indicates that a status was supplied for a kind registered without a
    /// status type.
    #[snafu(display("kind {kind} does not take a status"))]
    StatusNotSupported { kind: Kind },

    #[snafu(display("failed to encode payload"))]
    EncodePayload { source: PayloadError },
}

/// The wire shape shared by the JSON and YAML forms.
#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "apiVersion", default, skip_serializing_if = "Option::is_none")]
    api_version: Option<String>,

    kind: Kind,

    #[serde(default)]
    metadata: ObjectMeta,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    spec: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<serde_json::Value>,

    #[serde(rename = "_links", default, skip_serializing_if = "Option::is_none")]
    links: Option<HateoasLinks>,
}

/// Encodes and decodes [`ResourceManifest`]s against a [`KindRegistry`].
#[derive(Clone, Copy, Debug)]
pub struct ManifestCodec<'a> {
    registry: &'a KindRegistry,
}

impl<'a> ManifestCodec<'a> {
    pub fn new(registry: &'a KindRegistry) -> Self {
        Self { registry }
    }

    /// A codec bound to the process-wide registry.
    pub fn global() -> ManifestCodec<'static> {
        ManifestCodec {
            registry: KindRegistry::global(),
        }
    }

    pub fn decode_json(&self, bytes: &[u8]) -> Result<ResourceManifest, CodecError> {
        let envelope = serde_json::from_slice(bytes).context(DeserializeJsonSnafu)?;
        self.from_envelope(envelope)
    }

    pub fn decode_yaml(&self, bytes: &[u8]) -> Result<ResourceManifest, CodecError> {
        let envelope = serde_yaml::from_slice(bytes).context(DeserializeYamlSnafu)?;
        self.from_envelope(envelope)
    }

    pub fn encode_json(&self, manifest: &ResourceManifest) -> Result<String, CodecError> {
        let envelope = Self::to_envelope(manifest)?;
        serde_json::to_string(&envelope).context(SerializeJsonSnafu)
    }

    pub fn encode_yaml(&self, manifest: &ResourceManifest) -> Result<String, CodecError> {
        let envelope = Self::to_envelope(manifest)?;
        serde_yaml::to_string(&envelope).context(SerializeYamlSnafu)
    }

    fn from_envelope(&self, envelope: Envelope) -> Result<ResourceManifest, CodecError> {
        let kind = envelope.kind;

        let (spec, status) = match self.registry.codecs(&kind) {
            None => {
                // Unknown kind: preserve whatever arrived
                debug!(kind = %kind, "decoding manifest of unregistered kind");
                (
                    envelope.spec.map(preserve_generic),
                    envelope.status.map(preserve_generic),
                )
            }
            Some(codecs) => {
                let spec = match envelope.spec {
                    None => None,
                    Some(value) => match &codecs.spec {
                        Some(codec) => Some(Payload::Typed(
                            codec.decode(value).context(DecodeSpecSnafu { kind: &kind })?,
                        )),
                        None => return SpecNotSupportedSnafu { kind }.fail(),
                    },
                };

                let status = match envelope.status {
                    None => None,
                    Some(value) => match &codecs.status {
                        Some(codec) => Some(Payload::Typed(
                            codec
                                .decode(value)
                                .context(DecodeStatusSnafu { kind: &kind })?,
                        )),
                        None => return StatusNotSupportedSnafu { kind }.fail(),
                    },
                };

                (spec, status)
            }
        };

        Ok(ResourceManifest {
            type_meta: TypeMeta {
                api_version: envelope.api_version,
                kind,
            },
            metadata: envelope.metadata,
            spec,
            status,
            links: envelope.links,
        })
    }

    fn to_envelope(manifest: &ResourceManifest) -> Result<Envelope, CodecError> {
        Ok(Envelope {
            api_version: manifest.type_meta.api_version.clone(),
            kind: manifest.type_meta.kind.clone(),
            metadata: manifest.metadata.clone(),
            spec: manifest
                .spec
                .as_ref()
                .map(Payload::to_json)
                .transpose()
                .context(EncodePayloadSnafu)?,
            status: manifest
                .status
                .as_ref()
                .map(Payload::to_json)
                .transpose()
                .context(EncodePayloadSnafu)?,
            links: manifest.links.clone(),
        })
    }
}

/// Keeps an unknown kind's payload: mappings stay structured, anything else
/// is kept as its raw bytes.
fn preserve_generic(value: serde_json::Value) -> Payload {
    if value.is_object() {
        Payload::Mapping(value)
    } else {
        Payload::Raw(value.to_string().into_bytes())
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct MySpec {
        value: i64,
        name: String,
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct MyStatus {
        ready: bool,
    }

    fn registry() -> KindRegistry {
        let registry = KindRegistry::new();
        registry.register_kind::<MySpec>("mySpec").unwrap();
        registry
            .register_manifest::<MySpec, MyStatus>("myManifest")
            .unwrap();
        registry
    }

    #[test]
    fn registered_kind_decodes_typed_spec() {
        let registry = registry();
        let codec = ManifestCodec::new(&registry);

        let manifest = codec
            .decode_json(
                br#"{"kind":"mySpec","metadata":{"name":"test-spec"},"spec":{"value":42,"name":"meaning"}}"#,
            )
            .unwrap();

        assert_eq!(manifest.kind(), &Kind::from("mySpec"));
        assert_eq!(manifest.metadata.name, "test-spec");
        assert_eq!(
            manifest.spec.as_ref().unwrap().downcast_ref::<MySpec>(),
            Some(&MySpec {
                value: 42,
                name: "meaning".into()
            })
        );
        assert!(manifest.status.is_none());
    }

    #[test]
    fn unknown_spec_fields_rejected() {
        let registry = registry();
        let codec = ManifestCodec::new(&registry);

        let err = codec
            .decode_json(br#"{"kind":"mySpec","spec":{"value":1,"name":"x","bogus":true}}"#)
            .unwrap_err();

        assert!(matches!(err, CodecError::DecodeSpec { .. }));
    }

    #[test]
    fn unknown_kind_preserves_generic_mapping() {
        let registry = registry();
        let codec = ManifestCodec::new(&registry);

        let manifest = codec
            .decode_json(
                br#"{"kind":"unknownSpec","metadata":{"name":""},"spec":{"field":"xyz","desc":"unknown"}}"#,
            )
            .unwrap();

        assert_eq!(manifest.kind(), &Kind::from("unknownSpec"));
        assert_eq!(
            manifest.spec.as_ref().unwrap().as_mapping(),
            Some(&json!({"field": "xyz", "desc": "unknown"}))
        );

        // Round-trip keeps the structure
        let encoded = codec.encode_json(&manifest).unwrap();
        let reparsed: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(reparsed["spec"], json!({"field": "xyz", "desc": "unknown"}));
    }

    #[test]
    fn unknown_kind_keeps_non_mapping_payload_raw() {
        let registry = registry();
        let codec = ManifestCodec::new(&registry);

        let manifest = codec
            .decode_json(br#"{"kind":"unknownSpec","spec":[1,2,3]}"#)
            .unwrap();

        assert!(matches!(manifest.spec, Some(Payload::Raw(_))));
    }

    #[test]
    fn absent_payloads_stay_absent() {
        let registry = registry();
        let codec = ManifestCodec::new(&registry);

        let manifest = codec
            .decode_json(br#"{"kind":"myManifest","metadata":{"name":"fresh"}}"#)
            .unwrap();

        assert!(manifest.spec.is_none());
        assert!(manifest.status.is_none());
    }

    #[test]
    fn status_for_statusless_kind_fails() {
        let registry = registry();
        let codec = ManifestCodec::new(&registry);

        let err = codec
            .decode_json(br#"{"kind":"mySpec","spec":{"value":1,"name":"x"},"status":{"ready":true}}"#)
            .unwrap_err();

        assert!(matches!(err, CodecError::StatusNotSupported { .. }));
    }

    #[test]
    fn status_decodes_when_registered() {
        let registry = registry();
        let codec = ManifestCodec::new(&registry);

        let manifest = codec
            .decode_json(br#"{"kind":"myManifest","status":{"ready":true}}"#)
            .unwrap();

        assert_eq!(
            manifest.status.as_ref().unwrap().downcast_ref::<MyStatus>(),
            Some(&MyStatus { ready: true })
        );
    }

    #[test]
    fn yaml_round_trip() {
        let registry = registry();
        let codec = ManifestCodec::new(&registry);

        let manifest = codec
            .decode_yaml(
                b"kind: mySpec\nmetadata:\n  name: test-spec\nspec:\n  value: 42\n  name: meaning\n",
            )
            .unwrap();

        assert_eq!(
            manifest.spec.as_ref().unwrap().downcast_ref::<MySpec>(),
            Some(&MySpec {
                value: 42,
                name: "meaning".into()
            })
        );

        let encoded = codec.encode_yaml(&manifest).unwrap();
        let again = codec.decode_yaml(encoded.as_bytes()).unwrap();
        assert_eq!(
            again.spec.as_ref().unwrap().downcast_ref::<MySpec>(),
            manifest.spec.as_ref().unwrap().downcast_ref::<MySpec>()
        );
    }

    #[test]
    fn missing_kind_is_an_error() {
        let registry = registry();
        let codec = ManifestCodec::new(&registry);

        let err = codec.decode_json(br#"{"metadata":{"name":"x"}}"#).unwrap_err();
        assert!(matches!(err, CodecError::DeserializeJson { .. }));
    }

    #[test]
    fn links_pass_through() {
        let registry = registry();
        let codec = ManifestCodec::new(&registry);

        let manifest = codec
            .decode_json(
                br#"{"kind":"mySpec","_links":{"self":{"ref":"/pets/1","rel":"self"}}}"#,
            )
            .unwrap();

        let links = manifest.links.as_ref().unwrap();
        assert_eq!(links["self"].reference, "/pets/1");

        let encoded = codec.encode_json(&manifest).unwrap();
        assert!(encoded.contains("_links"));
    }
}
