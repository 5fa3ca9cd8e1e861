//! Checks for DNS-shaped identifiers, performed before a resource ever
//! reaches the store.

// This is adapted from Kubernetes.
// See apimachinery/pkg/util/validation/validation.go in the Kubernetes source

use std::sync::LazyLock;

use const_format::concatcp;
use regex::Regex;

pub(crate) const RFC_1123_LABEL_FMT: &str = "[a-z0-9]([-a-z0-9]*[a-z0-9])?";
pub(crate) const RFC_1123_SUBDOMAIN_FMT: &str =
    concatcp!(RFC_1123_LABEL_FMT, "(\\.", RFC_1123_LABEL_FMT, ")*");
const RFC_1123_SUBDOMAIN_ERROR_MSG: &str = "a lowercase RFC 1123 subdomain must consist of lower case alphanumeric characters, '-' or '.', and must start and end with an alphanumeric character";

// This is a subdomain's max length in DNS (RFC 1123)
const RFC_1123_SUBDOMAIN_MAX_LENGTH: usize = 253;

// Lazily initialized regular expressions
static RFC_1123_SUBDOMAIN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^{RFC_1123_SUBDOMAIN_FMT}$"))
        .expect("failed to compile RFC 1123 subdomain regex")
});

/// Returns a formatted error message for maximum length violations.
fn max_len_error(length: usize) -> String {
    format!("must be no more than {length} characters")
}

/// Returns a formatted error message for regex violations.
///
/// # Arguments
///
/// * `msg` - this is the main error message to return
/// * `fmt` - this is the regular expression that did not match the input
/// * `examples` - are optional well, formed examples that would match the regex
fn regex_error(msg: &str, fmt: &str, examples: &[&str]) -> String {
    if examples.is_empty() {
        return format!("{msg} (regex used for validation is '{fmt}')");
    }

    let mut msg = msg.to_string();
    msg.push_str(" (e.g. ");
    for (i, example) in examples.iter().enumerate() {
        if i > 0 {
            msg.push_str(" or ");
        }
        msg.push('\'');
        msg.push_str(example);
        msg.push_str("', ");
    }

    msg.push_str("regex used for validation is '");
    msg.push_str(fmt);
    msg.push_str("')");
    msg
}

/// Tests for a string that conforms to the definition of a subdomain in DNS (RFC 1123).
///
/// Resource names live in this shape, so every failure is reported rather
/// than only the first one.
pub fn is_rfc_1123_subdomain(value: &str) -> Result<(), Vec<String>> {
    let mut errors = vec![];
    if value.len() > RFC_1123_SUBDOMAIN_MAX_LENGTH {
        errors.push(max_len_error(RFC_1123_SUBDOMAIN_MAX_LENGTH))
    }

    if !RFC_1123_SUBDOMAIN_REGEX.is_match(value) {
        errors.push(regex_error(
            RFC_1123_SUBDOMAIN_ERROR_MSG,
            RFC_1123_SUBDOMAIN_FMT,
            &["example.com"],
        ))
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}
