//! Validated resource labels.
//!
//! Labels are key/value pairs attached to a resource and used for selection.
//! The key must meet certain requirements regarding length and character set,
//! the value can contain a limited set of ASCII characters. [`Labels`] is the
//! map a manifest carries; [`Label`] is a single validated pair.

use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

mod key;
mod value;

pub use key::*;
pub use value::*;

/// The error type for a single label entry that failed to validate.
#[derive(Debug, PartialEq, Snafu)]
pub enum LabelError {
    /// Indicates that the key failed to parse. See [`KeyError`] for more
    /// information about the error causes.
    #[snafu(display("failed to parse key {key:?} of label"))]
    InvalidKey { source: KeyError, key: String },

    /// Indicates that the value failed to parse.
    #[snafu(display("failed to parse value {value:?} for label key {key:?}"))]
    InvalidValue {
        source: LabelValueError,
        key: String,
        value: String,
    },
}

/// The aggregate error for a label map. Every offending entry is reported,
/// not just the first one encountered.
#[derive(Debug, PartialEq, Snafu)]
#[snafu(display("invalid labels: {}", failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")))]
pub struct LabelsError {
    failures: Vec<LabelError>,
}

impl LabelsError {
    /// The individual per-entry failures.
    pub fn failures(&self) -> &[LabelError] {
        &self.failures
    }
}

/// A single validated label.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Label {
    pub key: Key,
    pub value: LabelValue,
}

impl TryFrom<(&str, &str)> for Label {
    type Error = LabelError;

    fn try_from((key, value): (&str, &str)) -> Result<Self, Self::Error> {
        let parsed_key = Key::from_str(key).context(InvalidKeySnafu { key })?;
        let value = LabelValue::from_str(value).context(InvalidValueSnafu { key, value })?;

        Ok(Self {
            key: parsed_key,
            value,
        })
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// The label map attached to a resource.
///
/// Behaves as a single-valued string map. Lookups via [`Labels::get`] return
/// an empty string for missing keys; [`Labels::has`] distinguishes a missing
/// key from an empty value. The canonical string form emits entries in
/// ascending key order as `key=value`, joined with `,` and never quoted.
///
/// The map itself does not enforce validity on insertion, because manifests
/// arrive from the wire with arbitrary content. [`Labels::validate`] checks
/// every entry and reports all failures at once, and
/// [`Labels::try_from_iter`] builds a map that has already passed that check.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a validated label map from `(key, value)` pairs, collecting
    /// every invalid entry into one [`LabelsError`].
    pub fn try_from_iter<'a, I>(iter: I) -> Result<Self, LabelsError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut entries = BTreeMap::new();
        let mut failures = Vec::new();

        for (key, value) in iter {
            match Label::try_from((key, value)) {
                Ok(label) => {
                    entries.insert(label.key.to_string(), label.value.to_string());
                }
                Err(failure) => failures.push(failure),
            }
        }

        if failures.is_empty() {
            Ok(Self(entries))
        } else {
            LabelsSnafu { failures }.fail()
        }
    }

    /// Reports whether the map contains `key`.
    pub fn has(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Returns the value for `key`, or an empty string when it is absent.
    pub fn get(&self, key: &str) -> &str {
        self.0.get(key).map_or("", String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Checks every entry against the label key and value rules, reporting
    /// all failures together.
    pub fn validate(&self) -> Result<(), LabelsError> {
        let failures = self
            .0
            .iter()
            .filter_map(|(key, value)| Label::try_from((key.as_str(), value.as_str())).err())
            .collect::<Vec<_>>();

        if failures.is_empty() {
            Ok(())
        } else {
            LabelsSnafu { failures }.fail()
        }
    }
}

impl Display for Labels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // BTreeMap iteration is already in ascending key order
        let mut first = true;
        for (key, value) in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}

impl From<BTreeMap<String, String>> for Labels {
    fn from(entries: BTreeMap<String, String>) -> Self {
        Self(entries)
    }
}

impl From<Labels> for BTreeMap<String, String> {
    fn from(labels: Labels) -> Self {
        labels.0
    }
}

impl<K, V> FromIterator<(K, V)> for Labels
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

impl IntoIterator for Labels {
    type Item = (String, String);
    type IntoIter = std::collections::btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn try_from_tuple() {
        let label = Label::try_from(("app.k8s.io/version.semantic", "1.2.3")).unwrap();

        assert_eq!(
            label.key,
            Key::from_str("app.k8s.io/version.semantic").unwrap()
        );
        assert_eq!(label.value, LabelValue::from_str("1.2.3").unwrap());
        assert_eq!(label.to_string(), "app.k8s.io/version.semantic=1.2.3");
    }

    #[test]
    fn get_missing_is_empty() {
        let labels = Labels::from_iter([("env", "prod")]);

        assert_eq!(labels.get("env"), "prod");
        assert_eq!(labels.get("missing"), "");
        assert!(!labels.has("missing"));
    }

    #[test]
    fn has_distinguishes_empty_value() {
        let labels = Labels::from_iter([("flag", "")]);

        assert!(labels.has("flag"));
        assert_eq!(labels.get("flag"), "");
    }

    #[test]
    fn display_ascending_order() {
        let labels = Labels::from_iter([("zone", "b"), ("app", "pets"), ("env", "prod")]);

        assert_eq!(labels.to_string(), "app=pets,env=prod,zone=b");
    }

    #[test]
    fn validate_aggregates_failures() {
        let labels = Labels::from_iter([("ok", "fine"), ("-bad", "x"), ("also", "bad-")]);

        let err = labels.validate().unwrap_err();
        assert_eq!(err.failures().len(), 2);
    }

    #[test]
    fn try_from_iter_rejects_invalid() {
        let err = Labels::try_from_iter([("a", "b"), ("nope/", "c")]).unwrap_err();
        assert_eq!(err.failures().len(), 1);

        let labels = Labels::try_from_iter([("a", "b"), ("c", "")]).unwrap();
        assert_eq!(labels.len(), 2);
    }
}
