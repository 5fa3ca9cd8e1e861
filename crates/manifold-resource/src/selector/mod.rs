//! Label selectors.
//!
//! A [`Selector`] is a conjunction of [`Requirement`]s and acts as a
//! predicate over a [`Labels`] map. Selectors parse from and print to the
//! expression grammar `key=v,key2 in (a,b),!key3,num>10`; see [`parse`] for
//! the grammar and [`LabelSelector`] for the structured form carried inside
//! manifests.

use std::{
    collections::BTreeSet,
    fmt::{Display, Write},
    str::FromStr,
};

use snafu::{Snafu, ensure};

use crate::kvp::Labels;

mod label_selector;
mod parse;

pub use label_selector::*;
pub use parse::*;

/// The operator of a single [`Requirement`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
pub enum Operator {
    /// Matches when the key is present, regardless of its value.
    #[strum(to_string = "exists")]
    Exists,

    /// Matches when the key is absent.
    #[strum(to_string = "!")]
    DoesNotExist,

    /// Matches when the key is present and its value is in the value set.
    #[strum(to_string = "=")]
    Equals,

    /// Same as [`Operator::Equals`], spelled `==` in the expression grammar.
    #[strum(to_string = "==")]
    DoubleEquals,

    /// Matches when the key is absent, or present with a value outside the
    /// value set. Note that the SQL translation of this operator excludes
    /// rows missing the key; see the store documentation.
    #[strum(to_string = "!=")]
    NotEquals,

    /// Matches when the key is present and its value is in the value set.
    #[strum(to_string = "in")]
    In,

    /// Matches when the key is absent, or present with a value outside the
    /// value set.
    #[strum(to_string = "notin")]
    NotIn,

    /// Matches when the key is present and its value is an integer greater
    /// than the single value of the requirement.
    #[strum(to_string = ">")]
    GreaterThan,

    /// Matches when the key is present and its value is an integer less
    /// than the single value of the requirement.
    #[strum(to_string = "<")]
    LessThan,
}

/// The error type for requirement construction.
///
/// Evaluating a requirement never fails; everything that could go wrong is
/// rejected here instead.
#[derive(Debug, PartialEq, Snafu)]
pub enum RequirementError {
    /// Indicates that the requirement key (or one of its path segments) is
    /// empty.
    #[snafu(display("requirement key cannot be empty"))]
    EmptyKey,

    /// Indicates that the key contains a character that cannot be embedded
    /// into a JSON path expression.
    #[snafu(display("requirement key {key:?} contains an unsupported character"))]
    UnsupportedKeyCharacter { key: String },

    /// Indicates that an operator requiring values got none.
    #[snafu(display("operator {operator} requires a value"))]
    MissingValue { operator: Operator },

    /// Indicates that a single-value operator got more than one value.
    #[snafu(display("operator {operator} accepts exactly one value, got {count}"))]
    SingleValueExpected { operator: Operator, count: usize },

    /// Indicates that an existence operator got values.
    #[snafu(display("operator {operator} must not have values"))]
    UnexpectedValues { operator: Operator },

    /// Indicates that an ordering operator got a value that does not parse
    /// as a signed 64-bit integer.
    #[snafu(display("operator {operator} requires an integer value, got {value:?}"))]
    NotAnInteger { operator: Operator, value: String },
}

/// A single atom of a [`Selector`]: a key, an operator and a set of values.
///
/// The key is held as a list of path segments. The expression grammar always
/// produces a single segment (a key containing `.` stays one segment); the
/// structured [`LabelSelector`] may produce multi-segment keys which address
/// nested values in the stored label column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Requirement {
    path: Vec<String>,
    operator: Operator,
    values: BTreeSet<String>,
}

impl Requirement {
    /// Builds a requirement with a single-segment key.
    pub fn new<I, V>(key: impl Into<String>, operator: Operator, values: I) -> Result<Self, RequirementError>
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self::from_segments(vec![key.into()], operator, values)
    }

    /// Builds a requirement from explicit key path segments.
    pub fn from_segments<I, V>(
        path: Vec<String>,
        operator: Operator,
        values: I,
    ) -> Result<Self, RequirementError>
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        ensure!(!path.is_empty(), EmptyKeySnafu);

        for segment in &path {
            ensure!(!segment.is_empty(), EmptyKeySnafu);
            ensure!(
                !segment.contains('"') && !segment.contains('\\'),
                UnsupportedKeyCharacterSnafu {
                    key: path.join(".")
                }
            );
        }

        let values = values
            .into_iter()
            .map(Into::into)
            .collect::<BTreeSet<String>>();

        match operator {
            Operator::Exists | Operator::DoesNotExist => {
                ensure!(values.is_empty(), UnexpectedValuesSnafu { operator });
            }
            Operator::Equals | Operator::DoubleEquals | Operator::NotEquals => {
                ensure!(!values.is_empty(), MissingValueSnafu { operator });
                ensure!(
                    values.len() == 1,
                    SingleValueExpectedSnafu {
                        operator,
                        count: values.len()
                    }
                );
            }
            Operator::GreaterThan | Operator::LessThan => {
                ensure!(!values.is_empty(), MissingValueSnafu { operator });
                ensure!(
                    values.len() == 1,
                    SingleValueExpectedSnafu {
                        operator,
                        count: values.len()
                    }
                );

                for value in &values {
                    ensure!(
                        value.parse::<i64>().is_ok(),
                        NotAnIntegerSnafu { operator, value }
                    );
                }
            }
            // An empty value list is legal here: `in ()` matches nothing,
            // `notin ()` matches everything
            Operator::In | Operator::NotIn => {}
        }

        Ok(Self {
            path,
            operator,
            values,
        })
    }

    /// The flat key this requirement selects on.
    pub fn key(&self) -> String {
        self.path.join(".")
    }

    /// The key path segments.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    /// The value set, in ascending order.
    pub fn values(&self) -> &BTreeSet<String> {
        &self.values
    }

    /// Evaluates this requirement against a label map. Never errors: a value
    /// that fails to parse as an integer simply does not match an ordering
    /// requirement.
    pub fn matches(&self, labels: &Labels) -> bool {
        let key = self.key();

        match self.operator {
            Operator::Exists => labels.has(&key),
            Operator::DoesNotExist => !labels.has(&key),
            Operator::Equals | Operator::DoubleEquals | Operator::In => {
                labels.has(&key) && self.values.contains(labels.get(&key))
            }
            Operator::NotEquals | Operator::NotIn => {
                !labels.has(&key) || !self.values.contains(labels.get(&key))
            }
            Operator::GreaterThan | Operator::LessThan => {
                if !labels.has(&key) || self.values.len() != 1 {
                    return false;
                }

                let Ok(actual) = labels.get(&key).parse::<i64>() else {
                    return false;
                };
                let Some(Ok(bound)) = self.values.iter().next().map(|v| v.parse::<i64>()) else {
                    return false;
                };

                match self.operator {
                    Operator::GreaterThan => actual > bound,
                    _ => actual < bound,
                }
            }
        }
    }
}

impl Display for Requirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let key = self.key();

        match self.operator {
            Operator::Exists => f.write_str(&key),
            Operator::DoesNotExist => write!(f, "!{key}"),
            Operator::Equals | Operator::DoubleEquals | Operator::NotEquals
            | Operator::GreaterThan | Operator::LessThan => {
                let value = self.values.iter().next().map_or("", String::as_str);
                write!(f, "{key}{}{value}", self.operator)
            }
            Operator::In | Operator::NotIn => {
                write!(f, "{key} {} (", self.operator)?;
                for (i, value) in self.values.iter().enumerate() {
                    if i > 0 {
                        f.write_char(',')?;
                    }
                    f.write_str(value)?;
                }
                f.write_char(')')
            }
        }
    }
}

/// A conjunction of [`Requirement`]s.
///
/// Matches a label map iff all contained requirements match; the empty
/// selector matches everything. The canonical string form round-trips under
/// [`parse`], with `in`/`notin` value lists printed in ascending order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector(Vec<Requirement>);

impl Selector {
    /// The empty selector.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_requirements(requirements: Vec<Requirement>) -> Self {
        Self(requirements)
    }

    /// Extends the conjunction with one more requirement.
    pub fn and(mut self, requirement: Requirement) -> Self {
        self.0.push(requirement);
        self
    }

    /// Reports whether this selector contains no requirements. The empty
    /// selector matches every label map.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The requirements view, used by the query translator.
    pub fn requirements(&self) -> &[Requirement] {
        &self.0
    }

    /// Evaluates the conjunction against a label map.
    pub fn matches(&self, labels: &Labels) -> bool {
        self.0.iter().all(|requirement| requirement.matches(labels))
    }
}

impl FromStr for Selector {
    type Err = ParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        parse(input)
    }
}

impl Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, requirement) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_char(',')?;
            }
            write!(f, "{requirement}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    fn labels(entries: &[(&str, &str)]) -> Labels {
        entries.iter().copied().collect()
    }

    #[test]
    fn empty_selector_matches_everything() {
        let selector = Selector::new();

        assert!(selector.matches(&Labels::new()));
        assert!(selector.matches(&labels(&[("a", "b")])));
    }

    #[rstest]
    #[case(Operator::Exists, &[], &[("env", "prod")], true)]
    #[case(Operator::Exists, &[], &[("other", "x")], false)]
    #[case(Operator::DoesNotExist, &[], &[("other", "x")], true)]
    #[case(Operator::DoesNotExist, &[], &[("env", "prod")], false)]
    #[case(Operator::Equals, &["prod"], &[("env", "prod")], true)]
    #[case(Operator::Equals, &["prod"], &[("env", "dev")], false)]
    #[case(Operator::Equals, &["prod"], &[], false)]
    #[case(Operator::DoubleEquals, &["prod"], &[("env", "prod")], true)]
    #[case(Operator::NotEquals, &["prod"], &[("env", "dev")], true)]
    #[case(Operator::NotEquals, &["prod"], &[], true)]
    #[case(Operator::NotEquals, &["prod"], &[("env", "prod")], false)]
    #[case(Operator::In, &["a", "b"], &[("env", "b")], true)]
    #[case(Operator::In, &["a", "b"], &[("env", "c")], false)]
    #[case(Operator::In, &[], &[("env", "c")], false)]
    #[case(Operator::NotIn, &["a", "b"], &[("env", "c")], true)]
    #[case(Operator::NotIn, &["a", "b"], &[], true)]
    #[case(Operator::NotIn, &["a", "b"], &[("env", "a")], false)]
    #[case(Operator::NotIn, &[], &[("env", "a")], true)]
    fn requirement_matching(
        #[case] operator: Operator,
        #[case] values: &[&str],
        #[case] entries: &[(&str, &str)],
        #[case] expected: bool,
    ) {
        let requirement =
            Requirement::new("env", operator, values.iter().copied()).unwrap();

        assert_eq!(requirement.matches(&labels(entries)), expected);
    }

    #[rstest]
    #[case(Operator::GreaterThan, "16", "24", true)]
    #[case(Operator::GreaterThan, "16", "16", false)]
    #[case(Operator::GreaterThan, "16", "8", false)]
    #[case(Operator::LessThan, "32", "24", true)]
    #[case(Operator::LessThan, "32", "64", false)]
    #[case(Operator::LessThan, "32", "Not-a-number", false)]
    #[case(Operator::GreaterThan, "-128", "-12", true)]
    fn ordering_requirements(
        #[case] operator: Operator,
        #[case] bound: &str,
        #[case] actual: &str,
        #[case] expected: bool,
    ) {
        let requirement = Requirement::new("key", operator, [bound]).unwrap();

        assert_eq!(requirement.matches(&labels(&[("key", actual)])), expected);
        assert!(!requirement.matches(&Labels::new()));
    }

    #[rstest]
    #[case(Operator::Equals, &[] as &[&str], RequirementError::MissingValue { operator: Operator::Equals })]
    #[case(Operator::Equals, &["a", "b"], RequirementError::SingleValueExpected { operator: Operator::Equals, count: 2 })]
    #[case(Operator::Exists, &["a"], RequirementError::UnexpectedValues { operator: Operator::Exists })]
    #[case(Operator::GreaterThan, &["ten"], RequirementError::NotAnInteger { operator: Operator::GreaterThan, value: "ten".into() })]
    fn rejected_construction(
        #[case] operator: Operator,
        #[case] values: &[&str],
        #[case] expected: RequirementError,
    ) {
        let err = Requirement::new("key", operator, values.iter().copied()).unwrap_err();
        assert_eq!(err, expected);
    }

    #[test]
    fn quoted_keys_rejected() {
        let err = Requirement::new("bad\"key", Operator::Exists, None::<&str>).unwrap_err();
        assert!(matches!(err, RequirementError::UnsupportedKeyCharacter { .. }));

        let err = Requirement::new("bad\\key", Operator::Exists, None::<&str>).unwrap_err();
        assert!(matches!(err, RequirementError::UnsupportedKeyCharacter { .. }));
    }

    #[test]
    fn conjunction_requires_all() {
        let selector = Selector::new()
            .and(Requirement::new("special", Operator::Exists, None::<&str>).unwrap())
            .and(Requirement::new("common", Operator::DoesNotExist, None::<&str>).unwrap());

        assert!(selector.matches(&labels(&[("special", "1")])));
        assert!(!selector.matches(&labels(&[("special", "1"), ("common", "1")])));
        assert!(!selector.matches(&Labels::new()));
    }

    #[test]
    fn value_set_deduplicates() {
        let requirement =
            Requirement::new("env", Operator::In, ["b", "a", "b"]).unwrap();

        assert_eq!(requirement.values().len(), 2);
        assert_eq!(requirement.to_string(), "env in (a,b)");
    }
}
