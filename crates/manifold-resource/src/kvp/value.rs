use std::{
    fmt::{Debug, Display},
    ops::Deref,
    str::FromStr,
    sync::LazyLock,
};

use regex::Regex;
use snafu::{Snafu, ensure};

const LABEL_VALUE_MAX_LEN: usize = 63;

// Lazily initialized regular expressions
static LABEL_VALUE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9A-Z]([a-z0-9A-Z-_.]*[a-z0-9A-Z]+)?$")
        .expect("failed to compile value regex")
});

/// The error type for label value parse/validation operations.
#[derive(Debug, PartialEq, Snafu)]
pub enum LabelValueError {
    /// Indicates that the label value exceeds the maximum length of 63 ASCII
    /// characters. It additionally reports how many characters were
    /// encountered during parsing / validation.
    #[snafu(display(
        "value exceeds the maximum length - expected 63 characters or less, got {length}"
    ))]
    ValueTooLong { length: usize },

    /// Indicates that the label value contains non-ASCII characters.
    #[snafu(display("value contains non-ascii characters"))]
    ValueNotAscii,

    /// Indicates that the label value violates the required format:
    /// alphanumeric characters at both ends, `-`, `_` and `.` in between.
    #[snafu(display("value violates the required format"))]
    ValueInvalid,
}

/// A validated label value.
///
/// Instances of this struct are always valid. A label value is either empty
/// or 63 characters or less, with the same alphabet as a label key name. It
/// implements [`Deref`], which enables read-only access to the inner value
/// (a [`String`]). It, however, does not implement
/// [`DerefMut`](std::ops::DerefMut) which would enable unvalidated mutable
/// access to inner values.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct LabelValue(String);

impl Debug for LabelValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl FromStr for LabelValue {
    type Err = LabelValueError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        // The value can be empty
        if input.is_empty() {
            return Ok(Self(String::new()));
        }

        // The length of the value cannot exceed 63 characters
        ensure!(
            input.len() <= LABEL_VALUE_MAX_LEN,
            ValueTooLongSnafu {
                length: input.len()
            }
        );

        // The value cannot contain non-ascii characters
        ensure!(input.is_ascii(), ValueNotAsciiSnafu);

        // The value must use the required format
        ensure!(LABEL_VALUE_REGEX.is_match(input), ValueInvalidSnafu);

        Ok(Self(input.to_string()))
    }
}

impl Deref for LabelValue {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for LabelValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
