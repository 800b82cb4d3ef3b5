//! # Filter Module
//!
//! Declarative selectors used to bind providers to each other. The syntax is the
//! LDAP search filter form (RFC 1960) that service registries traditionally use:
//!
//! ```text
//! (whiteboard.name=shop)
//! (&(objectClass=*)(|(tier>=2)(!(region=eu-*))))
//! (label~=Hello World)
//! ```
//!
//! A filter is parsed once, when the owning provider is validated, and then
//! evaluated any number of times against candidate property maps. Parsing is
//! strict; evaluation never fails.
//!
//! ## Evaluation Rules
//!
//! - Keys are matched case-insensitively.
//! - Long properties compare numerically, booleans by `true`/`false`, strings
//!   lexically. List properties match when any element matches.
//! - `~=` ignores case and whitespace.
//! - A missing key never matches (except under `!`).

mod parse;

use crate::properties::{Properties, PropertyValue};
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

pub use parse::FilterError;

/// A parsed selector filter.
#[derive(Debug, Clone)]
pub struct Filter {
    text: String,
    node: Node,
}

#[derive(Debug, Clone)]
pub(crate) enum Node {
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
    Present(String),
    Equal(String, String),
    Approx(String, String),
    GreaterEq(String, String),
    LessEq(String, String),
    Substring(String, Regex),
}

impl Filter {
    /// Parse filter text.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError`] describing the first syntax problem found.
    pub fn parse(text: &str) -> Result<Self, FilterError> {
        let node = parse::parse(text)?;
        Ok(Self {
            text: text.trim().to_string(),
            node,
        })
    }

    /// Convenience constructor for an equality filter on one key.
    ///
    /// The value is escaped so it always parses.
    #[must_use]
    pub fn equals(key: &str, value: &str) -> Self {
        let escaped = parse::escape(value);
        Self {
            text: format!("({key}={escaped})"),
            node: Node::Equal(key.to_string(), value.to_string()),
        }
    }

    /// The filter text as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Evaluate against a property map.
    #[must_use]
    pub fn matches(&self, properties: &Properties) -> bool {
        self.node.eval(properties)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Filter::parse(s)
    }
}

impl PartialEq for Filter {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for Filter {}

impl Node {
    fn eval(&self, properties: &Properties) -> bool {
        match self {
            Node::And(children) => children.iter().all(|c| c.eval(properties)),
            Node::Or(children) => children.iter().any(|c| c.eval(properties)),
            Node::Not(child) => !child.eval(properties),
            Node::Present(key) => properties.get_ignore_case(key).is_some(),
            Node::Equal(key, value) => {
                compare_any(properties, key, |v| compare(v, value) == Some(Ordering::Equal))
            }
            Node::Approx(key, value) => {
                let wanted = normalize_approx(value);
                compare_any(properties, key, |v| match v {
                    Scalar::Text(s) => normalize_approx(s) == wanted,
                    other => compare(other, value) == Some(Ordering::Equal),
                })
            }
            Node::GreaterEq(key, value) => compare_any(properties, key, |v| {
                matches!(
                    compare(v, value),
                    Some(Ordering::Greater | Ordering::Equal)
                )
            }),
            Node::LessEq(key, value) => compare_any(properties, key, |v| {
                matches!(compare(v, value), Some(Ordering::Less | Ordering::Equal))
            }),
            Node::Substring(key, pattern) => compare_any(properties, key, |v| match v {
                Scalar::Text(s) => pattern.is_match(s),
                Scalar::Long(n) => pattern.is_match(&n.to_string()),
                Scalar::Bool(b) => pattern.is_match(&b.to_string()),
            }),
        }
    }
}

enum Scalar<'a> {
    Bool(bool),
    Long(i64),
    Text(&'a str),
}

fn compare_any<F>(properties: &Properties, key: &str, mut test: F) -> bool
where
    F: FnMut(&Scalar<'_>) -> bool,
{
    match properties.get_ignore_case(key) {
        None => false,
        Some(PropertyValue::Bool(b)) => test(&Scalar::Bool(*b)),
        Some(PropertyValue::Long(n)) => test(&Scalar::Long(*n)),
        Some(PropertyValue::String(s)) => test(&Scalar::Text(s)),
        Some(PropertyValue::Strings(values)) => values.iter().any(|s| test(&Scalar::Text(s))),
    }
}

fn compare(actual: &Scalar<'_>, wanted: &str) -> Option<Ordering> {
    match actual {
        Scalar::Long(n) => wanted.trim().parse::<i64>().ok().map(|w| n.cmp(&w)),
        Scalar::Bool(b) => {
            let w = wanted.trim();
            if w.eq_ignore_ascii_case("true") {
                Some(if *b { Ordering::Equal } else { Ordering::Less })
            } else if w.eq_ignore_ascii_case("false") {
                Some(if *b { Ordering::Greater } else { Ordering::Equal })
            } else {
                None
            }
        }
        Scalar::Text(s) => Some((*s).cmp(wanted)),
    }
}

fn normalize_approx(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::keys;

    fn props() -> Properties {
        Properties::new()
            .with(keys::NAME, "shop")
            .with("tier", 3_i64)
            .with("enabled", true)
            .with("region", "eu-west")
            .with("tags", vec!["blue".to_string(), "green".to_string()])
            .with("label", "Hello World")
    }

    fn check(filter: &str) -> bool {
        Filter::parse(filter).unwrap().matches(&props())
    }

    #[test]
    fn test_equality_and_presence() {
        assert!(check("(whiteboard.name=shop)"));
        assert!(!check("(whiteboard.name=other)"));
        assert!(check("(tier=*)"));
        assert!(!check("(missing=*)"));
        assert!(!check("(missing=x)"));
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        assert!(check("(WHITEBOARD.NAME=shop)"));
    }

    #[test]
    fn test_numeric_comparison() {
        assert!(check("(tier>=2)"));
        assert!(check("(tier<=3)"));
        assert!(!check("(tier>=4)"));
        assert!(check("(tier=3)"));
        assert!(!check("(tier=three)"));
    }

    #[test]
    fn test_boolean_and_lists() {
        assert!(check("(enabled=true)"));
        assert!(!check("(enabled=false)"));
        assert!(check("(tags=green)"));
        assert!(!check("(tags=red)"));
    }

    #[test]
    fn test_substring_and_approx() {
        assert!(check("(region=eu-*)"));
        assert!(check("(region=*west)"));
        assert!(check("(region=e*-w*t)"));
        assert!(!check("(region=us-*)"));
        assert!(check("(label~=helloworld)"));
        assert!(check("(label~= HELLO   world )"));
    }

    #[test]
    fn test_composites() {
        assert!(check("(&(whiteboard.name=shop)(tier>=2))"));
        assert!(!check("(&(whiteboard.name=shop)(tier>=5))"));
        assert!(check("(|(whiteboard.name=none)(tier>=2))"));
        assert!(check("(!(whiteboard.name=none))"));
        assert!(check("( & (tier=3) (| (region=us-*) (!(missing=*))) )"));
    }

    #[test]
    fn test_escaped_values() {
        let p = Properties::new().with("weird", "a(b)*c");
        let f = Filter::parse(r"(weird=a\(b\)\*c)").unwrap();
        assert!(f.matches(&p));
        let eq = Filter::equals("weird", "a(b)*c");
        assert!(eq.matches(&p));
        assert!(Filter::parse(eq.as_str()).unwrap().matches(&p));
    }

    #[test]
    fn test_malformed_filters_are_rejected() {
        for text in [
            "",
            "name=x",
            "(name=x",
            "(=x)",
            "(&)",
            "(name=x))",
            "(name>x)",
            "(!(a=b)(c=d))",
            r"(a=b\)",
        ] {
            assert!(Filter::parse(text).is_err(), "expected error for {text:?}");
        }
    }
}
