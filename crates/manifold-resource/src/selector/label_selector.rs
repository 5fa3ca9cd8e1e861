use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu, ensure};

use super::{Operator, Requirement, RequirementError, Selector};

type Result<T, E = SelectorError> = std::result::Result<T, E>;

/// The error type for lowering a [`LabelSelector`] into a [`Selector`].
#[derive(Debug, PartialEq, Snafu)]
pub enum SelectorError {
    #[snafu(display("label selector rule with binary operator {operator} must have values"))]
    BinaryOperatorWithoutValues { operator: RuleOperator },

    #[snafu(display("label selector rule with unary operator {operator} must not have values"))]
    UnaryOperatorWithValues { operator: RuleOperator },

    #[snafu(display("failed to build requirement for key {key:?}"))]
    BuildRequirement {
        source: RequirementError,
        key: String,
    },
}

/// The operator vocabulary of a [`SelectorRule`].
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
pub enum RuleOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// A single rule of a [`LabelSelector`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorRule {
    /// The label key the rule applies to. A key containing `.` addresses a
    /// nested value, segment by segment.
    pub key: String,

    /// The rule operator.
    pub op: RuleOperator,

    /// The values compared against. Must be non-empty for `In`/`NotIn` and
    /// empty for `Exists`/`DoesNotExist`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// The structured selector form carried inside manifests.
///
/// `match_labels` is the simple equality map; `match_selector` holds the
/// richer per-key rules. Both lower into one [`Selector`] conjunction via
/// [`LabelSelector::to_selector`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub match_labels: std::collections::BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub match_selector: Vec<SelectorRule>,
}

impl LabelSelector {
    /// Lowers the structured form into a [`Selector`]: every map entry
    /// becomes a `key=value` requirement and every rule becomes the
    /// corresponding requirement. Rules with an impossible operator/value
    /// combination are rejected.
    pub fn to_selector(&self) -> Result<Selector> {
        let mut requirements = Vec::with_capacity(self.match_labels.len() + self.match_selector.len());

        for (key, value) in &self.match_labels {
            requirements.push(
                Requirement::from_segments(segments(key), Operator::Equals, [value.clone()])
                    .context(BuildRequirementSnafu { key })?,
            );
        }

        for rule in &self.match_selector {
            let operator = match rule.op {
                RuleOperator::In | RuleOperator::NotIn => {
                    ensure!(
                        !rule.values.is_empty(),
                        BinaryOperatorWithoutValuesSnafu { operator: rule.op }
                    );

                    if rule.op == RuleOperator::In {
                        Operator::In
                    } else {
                        Operator::NotIn
                    }
                }
                RuleOperator::Exists | RuleOperator::DoesNotExist => {
                    ensure!(
                        rule.values.is_empty(),
                        UnaryOperatorWithValuesSnafu { operator: rule.op }
                    );

                    if rule.op == RuleOperator::Exists {
                        Operator::Exists
                    } else {
                        Operator::DoesNotExist
                    }
                }
            };

            requirements.push(
                Requirement::from_segments(segments(&rule.key), operator, rule.values.clone())
                    .context(BuildRequirementSnafu { key: &rule.key })?,
            );
        }

        Ok(Selector::from_requirements(requirements))
    }

    /// Renders the structured form as a selector expression string, e.g. for
    /// use in list request parameters.
    pub fn to_query_string(&self) -> Result<String> {
        Ok(self.to_selector()?.to_string())
    }
}

/// In the structured form a dotted key addresses nested values, unlike the
/// expression grammar where a key stays a single opaque segment.
fn segments(key: &str) -> Vec<String> {
    key.split('.').map(ToOwned::to_owned).collect()
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn lowering() {
        let selector = LabelSelector {
            match_labels: BTreeMap::from([
                ("foo".to_string(), "bar".to_string()),
                ("hui".to_string(), "buh".to_string()),
            ]),
            match_selector: vec![
                SelectorRule {
                    key: "foo".to_string(),
                    op: RuleOperator::In,
                    values: vec!["quick".to_string(), "bar".to_string()],
                },
                SelectorRule {
                    key: "foo".to_string(),
                    op: RuleOperator::NotIn,
                    values: vec!["quick".to_string(), "bar".to_string()],
                },
                SelectorRule {
                    key: "foo".to_string(),
                    op: RuleOperator::Exists,
                    values: vec![],
                },
                SelectorRule {
                    key: "foo".to_string(),
                    op: RuleOperator::DoesNotExist,
                    values: vec![],
                },
            ],
        };

        assert_eq!(
            selector.to_query_string().unwrap(),
            "foo=bar,hui=buh,foo in (bar,quick),foo notin (bar,quick),foo,!foo",
        );

        let empty = LabelSelector::default();
        assert_eq!(empty.to_query_string().unwrap(), "");
    }

    #[test]
    fn dotted_keys_become_segments() {
        let selector = LabelSelector {
            match_labels: BTreeMap::new(),
            match_selector: vec![SelectorRule {
                key: "pet.kind".to_string(),
                op: RuleOperator::Exists,
                values: vec![],
            }],
        };

        let lowered = selector.to_selector().unwrap();
        assert_eq!(lowered.requirements()[0].path(), ["pet", "kind"]);
        assert_eq!(lowered.requirements()[0].key(), "pet.kind");
    }

    #[test]
    fn binary_operator_requires_values() {
        let selector = LabelSelector {
            match_labels: BTreeMap::new(),
            match_selector: vec![SelectorRule {
                key: "foo".to_string(),
                op: RuleOperator::In,
                values: vec![],
            }],
        };

        assert_eq!(
            selector.to_selector().unwrap_err(),
            SelectorError::BinaryOperatorWithoutValues {
                operator: RuleOperator::In
            }
        );
    }

    #[test]
    fn unary_operator_rejects_values() {
        let selector = LabelSelector {
            match_labels: BTreeMap::new(),
            match_selector: vec![SelectorRule {
                key: "foo".to_string(),
                op: RuleOperator::Exists,
                values: vec!["foobar".to_string()],
            }],
        };

        assert_eq!(
            selector.to_selector().unwrap_err(),
            SelectorError::UnaryOperatorWithValues {
                operator: RuleOperator::Exists
            }
        );
    }

    #[test]
    fn wire_form() {
        let input = r#"{"matchLabels":{"env":"prod"},"matchSelector":[{"key":"size","op":"In","values":["small","large"]}]}"#;
        let selector: LabelSelector = serde_json::from_str(input).unwrap();

        assert_eq!(
            selector.to_query_string().unwrap(),
            "env=prod,size in (large,small)"
        );
    }
}
