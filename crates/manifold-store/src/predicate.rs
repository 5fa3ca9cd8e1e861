//! The predicate intermediate representation.
//!
//! A selector lowers into a flat conjunction of small predicate terms over
//! extractions from the JSON label column. The lowering is shared; only the
//! rendering differs per dialect, which keeps the operator semantics in one
//! place.

use manifold_resource::selector::{Operator, Requirement, Selector};
use snafu::Snafu;

/// The error type for query translation.
#[derive(Debug, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TranslateError {
    /// Indicates that a selector was supplied but exposes no requirements.
    #[snafu(display("non-selectable requirements"))]
    NonSelectableRequirements,

    /// Indicates that an ordering requirement carries a non-integer value.
    /// Requirement construction rejects these, so this only fires for
    /// hand-built requirement sets.
    #[snafu(display("ordering requirement on {key:?} has non-integer value {value:?}"))]
    InvalidIntegerValue { key: String, value: String },

    /// Indicates that a single-value operator arrived without a value.
    #[snafu(display("requirement on {key:?} is missing a value"))]
    MissingValue { key: String },
}

/// A scalar on the right-hand side of a predicate.
///
/// Selector lowering produces [`Scalar::Text`] and [`Scalar::Int`];
/// [`Scalar::Bool`] exists for programmatically built predicates against
/// JSON columns holding real booleans and is rendered as a literal on the
/// `JSON_EXTRACT` dialects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Scalar {
    Text(String),
    Int(i64),
    Bool(bool),
}

/// How the extracted value is cast before comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cast {
    None,
    Integer,
}

/// A value extraction out of the JSON column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Extract {
    pub segments: Vec<String>,
    pub cast: Cast,
}

impl Extract {
    fn of(requirement: &Requirement, cast: Cast) -> Self {
        Self {
            segments: requirement.path().to_vec(),
            cast,
        }
    }
}

/// The comparison operators a predicate can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
}

impl CompareOp {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Lt => "<",
        }
    }
}

/// One term of the lowered conjunction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Predicate {
    NotNull(Extract),
    IsNull(Extract),
    Compare {
        extract: Extract,
        op: CompareOp,
        value: Scalar,
    },
    InSet {
        extract: Extract,
        values: Vec<Scalar>,
        negated: bool,
    },
    /// Matches no row; emitted for an empty `in ()` set.
    Never,
}

/// Lowers a selector into a flat conjunction of predicates.
pub fn lower_selector(selector: &Selector) -> Result<Vec<Predicate>, TranslateError> {
    let mut predicates = Vec::new();

    for requirement in selector.requirements() {
        lower_requirement(requirement, &mut predicates)?;
    }

    Ok(predicates)
}

fn lower_requirement(
    requirement: &Requirement,
    out: &mut Vec<Predicate>,
) -> Result<(), TranslateError> {
    match requirement.operator() {
        Operator::Exists => out.push(Predicate::NotNull(Extract::of(requirement, Cast::None))),
        Operator::DoesNotExist => out.push(Predicate::IsNull(Extract::of(requirement, Cast::None))),
        Operator::Equals | Operator::DoubleEquals => out.push(Predicate::Compare {
            extract: Extract::of(requirement, Cast::None),
            op: CompareOp::Eq,
            value: Scalar::Text(single_value(requirement)?),
        }),
        Operator::NotEquals => {
            // Two conjuncts: rows missing the key are excluded, they do not
            // count as "different"
            out.push(Predicate::NotNull(Extract::of(requirement, Cast::None)));
            out.push(Predicate::Compare {
                extract: Extract::of(requirement, Cast::None),
                op: CompareOp::Ne,
                value: Scalar::Text(single_value(requirement)?),
            });
        }
        Operator::GreaterThan | Operator::LessThan => {
            let raw = single_value(requirement)?;
            let bound = raw
                .parse::<i64>()
                .map_err(|_| TranslateError::InvalidIntegerValue {
                    key: requirement.key(),
                    value: raw,
                })?;

            out.push(Predicate::Compare {
                extract: Extract::of(requirement, Cast::Integer),
                op: if requirement.operator() == Operator::GreaterThan {
                    CompareOp::Gt
                } else {
                    CompareOp::Lt
                },
                value: Scalar::Int(bound),
            });
        }
        Operator::In | Operator::NotIn => {
            let negated = requirement.operator() == Operator::NotIn;

            if requirement.values().is_empty() {
                // `in ()` can never match; `notin ()` never rejects
                if !negated {
                    out.push(Predicate::Never);
                }
                return Ok(());
            }

            out.push(Predicate::InSet {
                extract: Extract::of(requirement, Cast::None),
                values: requirement
                    .values()
                    .iter()
                    .map(|value| Scalar::Text(value.clone()))
                    .collect(),
                negated,
            });
        }
    }

    Ok(())
}

fn single_value(requirement: &Requirement) -> Result<String, TranslateError> {
    requirement
        .values()
        .iter()
        .next()
        .cloned()
        .ok_or_else(|| TranslateError::MissingValue {
            key: requirement.key(),
        })
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn equality_lowers_to_compare() {
        let selector = Selector::from_str("env=prod").unwrap();
        let predicates = lower_selector(&selector).unwrap();

        assert_eq!(
            predicates,
            vec![Predicate::Compare {
                extract: Extract {
                    segments: vec!["env".to_string()],
                    cast: Cast::None
                },
                op: CompareOp::Eq,
                value: Scalar::Text("prod".to_string()),
            }]
        );
    }

    #[test]
    fn not_equals_lowers_to_two_conjuncts() {
        let selector = Selector::from_str("env!=prod").unwrap();
        let predicates = lower_selector(&selector).unwrap();

        assert_eq!(predicates.len(), 2);
        assert!(matches!(predicates[0], Predicate::NotNull(_)));
        assert!(matches!(
            predicates[1],
            Predicate::Compare {
                op: CompareOp::Ne,
                ..
            }
        ));
    }

    #[test]
    fn ordering_lowers_with_integer_cast() {
        let selector = Selector::from_str("size>-128").unwrap();
        let predicates = lower_selector(&selector).unwrap();

        assert_eq!(
            predicates,
            vec![Predicate::Compare {
                extract: Extract {
                    segments: vec!["size".to_string()],
                    cast: Cast::Integer
                },
                op: CompareOp::Gt,
                value: Scalar::Int(-128),
            }]
        );
    }

    #[test]
    fn empty_sets() {
        let selector = Selector::from_str("env in ()").unwrap();
        assert_eq!(lower_selector(&selector).unwrap(), vec![Predicate::Never]);

        let selector = Selector::from_str("env notin ()").unwrap();
        assert_eq!(lower_selector(&selector).unwrap(), vec![]);
    }

    #[test]
    fn dotted_key_stays_single_segment() {
        let selector = Selector::from_str("pet.kind=dog").unwrap();
        let predicates = lower_selector(&selector).unwrap();

        let Predicate::Compare { extract, .. } = &predicates[0] else {
            panic!("expected a comparison");
        };
        assert_eq!(extract.segments, ["pet.kind"]);
    }
}
