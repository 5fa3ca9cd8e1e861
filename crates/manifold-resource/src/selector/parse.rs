//! Parser for the selector expression grammar.
//!
//! ```text
//! selector := ( requirement ( "," requirement )* )?
//! requirement := exists | notexists | eq | neq | lt | gt | in | notin
//! exists     := key
//! notexists  := "!" key
//! eq         := key ("=" | "==") value
//! neq        := key "!=" value
//! lt         := key "<" integer
//! gt         := key ">" integer
//! in         := key "in"    "(" [ value ( "," value )* ] ")"
//! notin      := key "notin" "(" [ value ( "," value )* ] ")"
//! ```
//!
//! Whitespace around separators and operators is not significant. An empty
//! input parses to the empty selector.

use std::iter::Peekable;

use snafu::{ResultExt, Snafu};

use super::{Operator, Requirement, RequirementError, Selector};

/// The error type for selector parsing.
#[derive(Debug, PartialEq, Snafu)]
pub enum ParseError {
    /// Indicates that the input ended where more tokens were expected.
    #[snafu(display("unexpected end of selector, expected {expected}"))]
    UnexpectedEnd { expected: &'static str },

    /// Indicates that an unexpected token was encountered.
    #[snafu(display("unexpected {found:?} at position {position}, expected {expected}"))]
    UnexpectedToken {
        found: String,
        position: usize,
        expected: &'static str,
    },

    /// Indicates that a lexically valid requirement failed validation, e.g.
    /// an ordering operator with a non-integer value.
    #[snafu(display("invalid requirement ending at position {position}"))]
    InvalidRequirement {
        source: RequirementError,
        position: usize,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    OpenParen,
    CloseParen,
    Comma,
    Bang,
    Equals,
    DoubleEquals,
    NotEquals,
    GreaterThan,
    LessThan,
    In,
    NotIn,
    Identifier(String),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::OpenParen => "(".into(),
            Self::CloseParen => ")".into(),
            Self::Comma => ",".into(),
            Self::Bang => "!".into(),
            Self::Equals => "=".into(),
            Self::DoubleEquals => "==".into(),
            Self::NotEquals => "!=".into(),
            Self::GreaterThan => ">".into(),
            Self::LessThan => "<".into(),
            Self::In => "in".into(),
            Self::NotIn => "notin".into(),
            Self::Identifier(value) => value.clone(),
        }
    }
}

fn is_special(c: char) -> bool {
    matches!(c, '(' | ')' | ',' | '!' | '=' | '<' | '>')
}

/// Splits the input into tokens, each paired with its byte position.
fn lex(input: &str) -> Vec<(usize, Token)> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(position, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let token = match c {
            '(' => {
                chars.next();
                Token::OpenParen
            }
            ')' => {
                chars.next();
                Token::CloseParen
            }
            ',' => {
                chars.next();
                Token::Comma
            }
            '>' => {
                chars.next();
                Token::GreaterThan
            }
            '<' => {
                chars.next();
                Token::LessThan
            }
            '!' => {
                chars.next();
                if chars.peek().is_some_and(|&(_, next)| next == '=') {
                    chars.next();
                    Token::NotEquals
                } else {
                    Token::Bang
                }
            }
            '=' => {
                chars.next();
                if chars.peek().is_some_and(|&(_, next)| next == '=') {
                    chars.next();
                    Token::DoubleEquals
                } else {
                    Token::Equals
                }
            }
            _ => {
                let mut literal = String::new();
                while let Some(&(_, next)) = chars.peek() {
                    if next.is_whitespace() || is_special(next) {
                        break;
                    }
                    literal.push(next);
                    chars.next();
                }

                match literal.as_str() {
                    "in" => Token::In,
                    "notin" => Token::NotIn,
                    _ => Token::Identifier(literal),
                }
            }
        };

        tokens.push((position, token));
    }

    tokens
}

type Tokens = Peekable<std::vec::IntoIter<(usize, Token)>>;

/// Parses a selector expression. Returns the empty selector for empty input.
pub fn parse(input: &str) -> Result<Selector, ParseError> {
    let mut tokens = lex(input).into_iter().peekable();
    let mut requirements = Vec::new();

    if tokens.peek().is_none() {
        return Ok(Selector::default());
    }

    loop {
        requirements.push(parse_requirement(&mut tokens)?);

        match tokens.next() {
            None => break,
            Some((_, Token::Comma)) => {
                // A separator must be followed by another requirement
                if tokens.peek().is_none() {
                    return UnexpectedEndSnafu {
                        expected: "a requirement after ','",
                    }
                    .fail();
                }
            }
            Some((position, token)) => {
                return UnexpectedTokenSnafu {
                    found: token.describe(),
                    position,
                    expected: "',' or end of input",
                }
                .fail();
            }
        }
    }

    Ok(Selector::from_requirements(requirements))
}

fn parse_requirement(tokens: &mut Tokens) -> Result<Requirement, ParseError> {
    match tokens.next() {
        Some((position, Token::Bang)) => {
            let key = expect_identifier(tokens, "a key after '!'")?;
            Requirement::new(key, Operator::DoesNotExist, None::<String>)
                .context(InvalidRequirementSnafu { position })
        }
        Some((position, Token::Identifier(key))) => parse_keyed(tokens, key, position),
        Some((position, token)) => UnexpectedTokenSnafu {
            found: token.describe(),
            position,
            expected: "a key or '!'",
        }
        .fail(),
        None => UnexpectedEndSnafu {
            expected: "a requirement",
        }
        .fail(),
    }
}

fn parse_keyed(tokens: &mut Tokens, key: String, position: usize) -> Result<Requirement, ParseError> {
    let operator = match tokens.peek() {
        // A bare key is an existence requirement
        None | Some((_, Token::Comma)) => {
            return Requirement::new(key, Operator::Exists, None::<String>)
                .context(InvalidRequirementSnafu { position });
        }
        Some((_, Token::Equals)) => Operator::Equals,
        Some((_, Token::DoubleEquals)) => Operator::DoubleEquals,
        Some((_, Token::NotEquals)) => Operator::NotEquals,
        Some((_, Token::GreaterThan)) => Operator::GreaterThan,
        Some((_, Token::LessThan)) => Operator::LessThan,
        Some((_, Token::In)) => Operator::In,
        Some((_, Token::NotIn)) => Operator::NotIn,
        Some(&(position, ref token)) => {
            return UnexpectedTokenSnafu {
                found: token.describe(),
                position,
                expected: "an operator",
            }
            .fail();
        }
    };
    tokens.next();

    match operator {
        Operator::In | Operator::NotIn => {
            let values = parse_value_list(tokens)?;
            Requirement::new(key, operator, values).context(InvalidRequirementSnafu { position })
        }
        Operator::GreaterThan | Operator::LessThan => {
            let value = expect_identifier(tokens, "an integer value")?;
            Requirement::new(key, operator, [value]).context(InvalidRequirementSnafu { position })
        }
        _ => {
            // An equality value may be empty: `key=` selects the empty value
            let value = match tokens.next_if(|(_, token)| matches!(token, Token::Identifier(_))) {
                Some((_, Token::Identifier(value))) => value,
                _ => String::new(),
            };
            Requirement::new(key, operator, [value]).context(InvalidRequirementSnafu { position })
        }
    }
}

fn parse_value_list(tokens: &mut Tokens) -> Result<Vec<String>, ParseError> {
    match tokens.next() {
        Some((_, Token::OpenParen)) => {}
        Some((position, token)) => {
            return UnexpectedTokenSnafu {
                found: token.describe(),
                position,
                expected: "'('",
            }
            .fail();
        }
        None => return UnexpectedEndSnafu { expected: "'('" }.fail(),
    }

    let mut values = Vec::new();

    // An empty list is legal
    if matches!(tokens.peek(), Some((_, Token::CloseParen))) {
        tokens.next();
        return Ok(values);
    }

    loop {
        // An element may be empty: `(a,,b)` contains the empty value
        if let Some((_, Token::Identifier(value))) =
            tokens.next_if(|(_, token)| matches!(token, Token::Identifier(_)))
        {
            values.push(value);
        } else {
            match tokens.peek() {
                Some((_, Token::Comma | Token::CloseParen)) => values.push(String::new()),
                Some(&(position, ref token)) => {
                    return UnexpectedTokenSnafu {
                        found: token.describe(),
                        position,
                        expected: "a value, ',' or ')'",
                    }
                    .fail();
                }
                None => {
                    return UnexpectedEndSnafu {
                        expected: "a value or ')'",
                    }
                    .fail();
                }
            }
        }

        match tokens.next() {
            Some((_, Token::Comma)) => {}
            Some((_, Token::CloseParen)) => break,
            Some((position, token)) => {
                return UnexpectedTokenSnafu {
                    found: token.describe(),
                    position,
                    expected: "',' or ')'",
                }
                .fail();
            }
            None => {
                return UnexpectedEndSnafu { expected: "')'" }.fail();
            }
        }
    }

    Ok(values)
}

fn expect_identifier(tokens: &mut Tokens, expected: &'static str) -> Result<String, ParseError> {
    match tokens.next() {
        Some((_, Token::Identifier(value))) => Ok(value),
        Some((position, token)) => UnexpectedTokenSnafu {
            found: token.describe(),
            position,
            expected,
        }
        .fail(),
        None => UnexpectedEndSnafu { expected }.fail(),
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;
    use crate::kvp::Labels;

    #[test]
    fn empty_input() {
        let selector = parse("").unwrap();
        assert!(selector.is_empty());

        let selector = parse("   ").unwrap();
        assert!(selector.is_empty());
    }

    #[rstest]
    #[case("key")]
    #[case("!key")]
    #[case("key=value")]
    #[case("key==value")]
    #[case("key!=value")]
    #[case("key in (a,b)")]
    #[case("key notin (a,b)")]
    #[case("key>10")]
    #[case("key<10")]
    #[case("a=b,c=d,!e")]
    fn recognized_productions(#[case] input: &str) {
        assert!(parse(input).is_ok(), "failed to parse {input:?}");
    }

    #[rstest]
    #[case("key = value", "key=value")]
    #[case("key  in  ( a , b )", "key in (a,b)")]
    #[case("key > 10", "key>10")]
    #[case(" !key ", "!key")]
    fn whitespace_not_significant(#[case] input: &str, #[case] canonical: &str) {
        assert_eq!(parse(input).unwrap().to_string(), canonical);
    }

    #[rstest]
    #[case("key=value")]
    #[case("!key")]
    #[case("key")]
    #[case("key in (a,b,c)")]
    #[case("key notin ()")]
    #[case("key>10,key<20")]
    #[case("x in (foo,,baz),y,z notin ()")]
    fn round_trip(#[case] expression: &str) {
        let parsed = parse(expression).unwrap();
        let reparsed = parse(&parsed.to_string()).unwrap();

        assert_eq!(parsed, reparsed);
    }

    #[test]
    fn in_values_order_invariant() {
        let left = parse("key in (a,b,c)").unwrap();
        let right = parse("key in (c,b,a)").unwrap();

        assert_eq!(left, right);
    }

    #[test]
    fn empty_and_padded_list_values() {
        let selector = parse("x in (foo,,baz)").unwrap();
        let requirement = &selector.requirements()[0];

        assert_eq!(requirement.values().len(), 3);
        assert!(requirement.values().contains(""));
        assert!(requirement.matches(&Labels::from_iter([("x", "foo")])));
    }

    #[test]
    fn equality_with_empty_value() {
        let selector = parse("key=").unwrap();

        assert!(selector.matches(&Labels::from_iter([("key", "")])));
        assert!(!selector.matches(&Labels::from_iter([("key", "set")])));
        assert!(!selector.matches(&Labels::new()));
    }

    #[test]
    fn scenario_conjunction() {
        let selector = parse("x in (foo,,baz),y,z notin ()").unwrap();
        let labels = Labels::from_iter([("x", "foo"), ("y", "anything"), ("w", "x")]);

        assert!(selector.matches(&labels));
    }

    #[test]
    fn scenario_numeric_window() {
        let selector = parse("key < 32, key > 16").unwrap();

        assert!(selector.matches(&Labels::from_iter([("key", "24")])));
        assert!(!selector.matches(&Labels::from_iter([("key", "64")])));
        assert!(!selector.matches(&Labels::from_iter([("key", "Not-a-number")])));
    }

    #[rstest]
    #[case("key>ten")]
    #[case("key<")]
    #[case("key in a,b")]
    #[case("key in (a,b")]
    #[case("key notin")]
    #[case("=value")]
    #[case("a=b,")]
    #[case("!")]
    #[case("key!")]
    #[case("(a,b)")]
    fn rejected_inputs(#[case] input: &str) {
        assert!(parse(input).is_err(), "expected {input:?} to fail");
    }

    #[test]
    fn descriptive_errors() {
        let err = parse("key>ten").unwrap_err();
        assert!(matches!(err, ParseError::InvalidRequirement { .. }));

        let err = parse("a=b,").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedEnd { .. }));
    }
}
