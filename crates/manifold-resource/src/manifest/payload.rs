use std::{any::Any, fmt::Debug};

use serde::Serialize;
use snafu::{ResultExt, Snafu};

/// The error type for payload encoding.
#[derive(Debug, Snafu)]
pub enum PayloadError {
    /// Indicates that a typed payload failed to serialize.
    #[snafu(display("failed to serialize typed payload"))]
    SerializePayload { source: serde_json::Error },

    /// Indicates that raw payload bytes do not hold valid JSON and therefore
    /// cannot be re-emitted into an envelope.
    #[snafu(display("raw payload bytes are not valid JSON"))]
    ParseRawPayload { source: serde_json::Error },
}

/// An erased, registered payload value.
///
/// Anything that is cloneable, serializable and `'static` qualifies via the
/// blanket implementation, which lets the kind registry hand out decode and
/// fresh-instance hooks without knowing concrete types.
pub trait PayloadValue: Any + Debug + Send + Sync {
    fn clone_value(&self) -> Box<dyn PayloadValue>;

    fn to_json(&self) -> Result<serde_json::Value, PayloadError>;

    fn as_any(&self) -> &dyn Any;

    fn type_name(&self) -> &'static str;
}

impl<T> PayloadValue for T
where
    T: Any + Clone + Debug + Serialize + Send + Sync,
{
    fn clone_value(&self) -> Box<dyn PayloadValue> {
        Box::new(self.clone())
    }

    fn to_json(&self) -> Result<serde_json::Value, PayloadError> {
        serde_json::to_value(self).context(SerializePayloadSnafu)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// The spec or status payload of a manifest.
///
/// A payload for a registered kind is decoded into the registered type and
/// held as [`Payload::Typed`]. Payloads of unknown kinds are preserved as a
/// generic mapping, or as the raw bytes when the payload is not a mapping at
/// all, so the envelope is never lost.
#[derive(Debug)]
pub enum Payload {
    /// A value of the type registered for the manifest's kind.
    Typed(Box<dyn PayloadValue>),

    /// A generic mapping, kept for unknown kinds.
    Mapping(serde_json::Value),

    /// The raw payload bytes, kept when the generic decode failed.
    Raw(Vec<u8>),
}

impl Payload {
    /// Wraps a concrete value.
    pub fn typed<T>(value: T) -> Self
    where
        T: PayloadValue,
    {
        Self::Typed(Box::new(value))
    }

    /// Borrows the typed value, if this payload is typed as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Typed(value) => value.as_any().downcast_ref(),
            _ => None,
        }
    }

    /// Borrows the generic mapping, if this payload holds one.
    pub fn as_mapping(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Mapping(value) => Some(value),
            _ => None,
        }
    }

    /// Renders the payload back into a JSON value for encoding.
    pub fn to_json(&self) -> Result<serde_json::Value, PayloadError> {
        match self {
            Self::Typed(value) => value.to_json(),
            Self::Mapping(value) => Ok(value.clone()),
            Self::Raw(bytes) => serde_json::from_slice(bytes).context(ParseRawPayloadSnafu),
        }
    }

    /// A short description of what the payload holds, for error messages.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Typed(value) => value.type_name(),
            Self::Mapping(_) => "a generic mapping",
            Self::Raw(_) => "raw bytes",
        }
    }
}

impl Clone for Payload {
    fn clone(&self) -> Self {
        match self {
            Self::Typed(value) => Self::Typed(value.clone_value()),
            Self::Mapping(value) => Self::Mapping(value.clone()),
            Self::Raw(bytes) => Self::Raw(bytes.clone()),
        }
    }
}

#[cfg(test)]
mod test {
    use serde::Deserialize;

    use super::*;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct PetSpec {
        value: i64,
        name: String,
    }

    #[test]
    fn downcast() {
        let payload = Payload::typed(PetSpec {
            value: 42,
            name: "meaning".into(),
        });

        assert_eq!(payload.downcast_ref::<PetSpec>().unwrap().value, 42);
        assert!(payload.downcast_ref::<String>().is_none());
    }

    #[test]
    fn clone_preserves_type() {
        let payload = Payload::typed(PetSpec {
            value: 1,
            name: "x".into(),
        });
        let cloned = payload.clone();

        assert_eq!(
            cloned.downcast_ref::<PetSpec>(),
            payload.downcast_ref::<PetSpec>()
        );
    }

    #[test]
    fn raw_round_trip() {
        let payload = Payload::Raw(br#"["not","a","mapping"]"#.to_vec());

        assert_eq!(
            payload.to_json().unwrap(),
            serde_json::json!(["not", "a", "mapping"])
        );
    }
}
