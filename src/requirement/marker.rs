// src/requirement/marker.rs

//! Environment markers
//!
//! A requirement may carry a marker such as
//! `python_version >= "3.8" and sys_platform == "linux"` that decides
//! whether it applies to the target environment at all. This module parses
//! the commonly used subset of PEP 508 markers and evaluates them against a
//! [`MarkerEnvironment`] supplied by the caller.

use crate::error::{Error, Result};
use crate::version::parse_version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Marker variables that are understood by the evaluator
const KNOWN_VARIABLES: &[&str] = &[
    "python_version",
    "python_full_version",
    "implementation_version",
    "os_name",
    "sys_platform",
    "platform_system",
    "platform_machine",
    "platform_release",
    "platform_python_implementation",
    "implementation_name",
    "extra",
];

/// Variables compared as PEP 440 versions rather than strings
const VERSION_VARIABLES: &[&str] = &[
    "python_version",
    "python_full_version",
    "implementation_version",
];

/// Values of the marker variables for one target environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerEnvironment {
    #[serde(flatten)]
    values: BTreeMap<String, String>,
}

impl MarkerEnvironment {
    /// Create an empty environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment describing the host this process runs on
    ///
    /// Interpreter related variables (`python_version` and friends) are not
    /// known here and must be filled in by the caller.
    pub fn host() -> Self {
        let (sys_platform, platform_system, os_name) = match std::env::consts::OS {
            "linux" => ("linux", "Linux", "posix"),
            "macos" => ("darwin", "Darwin", "posix"),
            "windows" => ("win32", "Windows", "nt"),
            "freebsd" => ("freebsd", "FreeBSD", "posix"),
            other => (other, other, "posix"),
        };

        Self::new()
            .with("sys_platform", sys_platform)
            .with("platform_system", platform_system)
            .with("os_name", os_name)
            .with("platform_machine", std::env::consts::ARCH)
    }

    /// Set a variable, returning the updated environment
    pub fn with(mut self, variable: &str, value: &str) -> Self {
        self.values.insert(variable.to_string(), value.to_string());
        self
    }

    /// Look up a variable; unknown variables evaluate as the empty string
    pub fn get(&self, variable: &str) -> &str {
        self.values.get(variable).map(String::as_str).unwrap_or("")
    }
}

/// Comparison operators allowed in markers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerOperator {
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    Compatible,
    ArbitraryEqual,
    In,
    NotIn,
}

impl MarkerOperator {
    fn as_str(&self) -> &'static str {
        match self {
            MarkerOperator::Equal => "==",
            MarkerOperator::NotEqual => "!=",
            MarkerOperator::LessThan => "<",
            MarkerOperator::LessEqual => "<=",
            MarkerOperator::GreaterThan => ">",
            MarkerOperator::GreaterEqual => ">=",
            MarkerOperator::Compatible => "~=",
            MarkerOperator::ArbitraryEqual => "===",
            MarkerOperator::In => "in",
            MarkerOperator::NotIn => "not in",
        }
    }
}

/// One side of a marker comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerValue {
    Variable(String),
    Literal(String),
}

impl MarkerValue {
    fn resolve<'a>(&'a self, env: &'a MarkerEnvironment) -> &'a str {
        match self {
            MarkerValue::Variable(name) => env.get(name),
            MarkerValue::Literal(value) => value,
        }
    }

    fn is_version_variable(&self) -> bool {
        matches!(self, MarkerValue::Variable(name) if VERSION_VARIABLES.contains(&name.as_str()))
    }
}

impl fmt::Display for MarkerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerValue::Variable(name) => write!(f, "{}", name),
            MarkerValue::Literal(value) => write!(f, "\"{}\"", value),
        }
    }
}

/// A parsed marker expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerTree {
    Expression {
        lhs: MarkerValue,
        op: MarkerOperator,
        rhs: MarkerValue,
    },
    And(Vec<MarkerTree>),
    Or(Vec<MarkerTree>),
}

impl MarkerTree {
    /// Parse a marker expression
    pub fn parse(s: &str) -> Result<Self> {
        let tokens = tokenize(s)?;
        let mut parser = Parser {
            source: s,
            tokens,
            pos: 0,
        };
        let tree = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(tree)
    }

    /// Evaluate against an environment with no extras requested
    pub fn evaluate(&self, env: &MarkerEnvironment) -> bool {
        self.evaluate_with_extras(env, &[])
    }

    /// Evaluate against an environment, treating `extra` as any of `extras`
    pub fn evaluate_with_extras(&self, env: &MarkerEnvironment, extras: &[String]) -> bool {
        match self {
            MarkerTree::And(children) => children.iter().all(|c| c.evaluate_with_extras(env, extras)),
            MarkerTree::Or(children) => children.iter().any(|c| c.evaluate_with_extras(env, extras)),
            MarkerTree::Expression { lhs, op, rhs } => {
                let mentions_extra = |value: &MarkerValue| {
                    matches!(value, MarkerValue::Variable(name) if name == "extra")
                };
                if mentions_extra(lhs) || mentions_extra(rhs) {
                    if extras.is_empty() {
                        return compare(lhs, *op, rhs, env);
                    }
                    return extras.iter().any(|extra| {
                        let scoped = env.clone().with("extra", extra);
                        compare(lhs, *op, rhs, &scoped)
                    });
                }
                compare(lhs, *op, rhs, env)
            }
        }
    }
}

impl fmt::Display for MarkerTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerTree::Expression { lhs, op, rhs } => write!(f, "{} {} {}", lhs, op.as_str(), rhs),
            MarkerTree::And(children) => {
                let parts: Vec<String> = children
                    .iter()
                    .map(|c| match c {
                        MarkerTree::Or(_) => format!("({})", c),
                        _ => c.to_string(),
                    })
                    .collect();
                write!(f, "{}", parts.join(" and "))
            }
            MarkerTree::Or(children) => {
                let parts: Vec<String> = children.iter().map(|c| c.to_string()).collect();
                write!(f, "{}", parts.join(" or "))
            }
        }
    }
}

fn compare(lhs: &MarkerValue, op: MarkerOperator, rhs: &MarkerValue, env: &MarkerEnvironment) -> bool {
    let left = lhs.resolve(env);
    let right = rhs.resolve(env);

    if lhs.is_version_variable() || rhs.is_version_variable() {
        if let Some(result) = compare_versions(left, op, right) {
            return result;
        }
    }

    let (left, right) = if matches!(lhs, MarkerValue::Variable(n) if n == "extra")
        || matches!(rhs, MarkerValue::Variable(n) if n == "extra")
    {
        (
            crate::requirement::normalize_name(left),
            crate::requirement::normalize_name(right),
        )
    } else {
        (left.to_string(), right.to_string())
    };

    match op {
        MarkerOperator::Equal | MarkerOperator::ArbitraryEqual => left == right,
        MarkerOperator::NotEqual => left != right,
        MarkerOperator::In => right.contains(left.as_str()),
        MarkerOperator::NotIn => !right.contains(left.as_str()),
        MarkerOperator::LessThan => left < right,
        MarkerOperator::LessEqual => left <= right,
        MarkerOperator::GreaterThan => left > right,
        MarkerOperator::GreaterEqual => left >= right,
        MarkerOperator::Compatible => false,
    }
}

fn compare_versions(left: &str, op: MarkerOperator, right: &str) -> Option<bool> {
    match op {
        MarkerOperator::In | MarkerOperator::NotIn | MarkerOperator::ArbitraryEqual => None,
        _ => {
            let spec = crate::version::parse_specifiers(&format!("{}{}", op.as_str(), right)).ok()?;
            let version = parse_version(left).ok()?;
            Some(spec.contains(&version))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Literal(String),
    Op(MarkerOperator),
    And,
    Or,
    LParen,
    RParen,
}

fn tokenize(s: &str) -> Result<Vec<Token>> {
    let invalid = |reason: &str| Error::InvalidRequirement {
        line: s.to_string(),
        reason: format!("invalid marker: {}", reason),
    };

    let chars: Vec<char> = s.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '"' | '\'' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == c)
                    .ok_or_else(|| invalid("unterminated string"))?;
                tokens.push(Token::Literal(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            '=' | '!' | '<' | '>' | '~' => {
                let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
                let (op, len) = if rest.starts_with("===") {
                    (MarkerOperator::ArbitraryEqual, 3)
                } else if rest.starts_with("==") {
                    (MarkerOperator::Equal, 2)
                } else if rest.starts_with("!=") {
                    (MarkerOperator::NotEqual, 2)
                } else if rest.starts_with("<=") {
                    (MarkerOperator::LessEqual, 2)
                } else if rest.starts_with(">=") {
                    (MarkerOperator::GreaterEqual, 2)
                } else if rest.starts_with("~=") {
                    (MarkerOperator::Compatible, 2)
                } else if rest.starts_with('<') {
                    (MarkerOperator::LessThan, 1)
                } else if rest.starts_with('>') {
                    (MarkerOperator::GreaterThan, 1)
                } else {
                    return Err(invalid(&format!("unknown operator near '{}'", rest)));
                };
                tokens.push(Token::Op(op));
                i += len;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "and" => tokens.push(Token::And),
                    "or" => tokens.push(Token::Or),
                    "in" => tokens.push(Token::Op(MarkerOperator::In)),
                    "not" => {
                        // "not" is only valid as the first half of "not in"
                        while i < chars.len() && chars[i] == ' ' {
                            i += 1;
                        }
                        if chars[i..].starts_with(&['i', 'n']) {
                            i += 2;
                            tokens.push(Token::Op(MarkerOperator::NotIn));
                        } else {
                            return Err(invalid("expected 'in' after 'not'"));
                        }
                    }
                    _ => {
                        let name = word.replace('.', "_");
                        if !KNOWN_VARIABLES.contains(&name.as_str()) {
                            return Err(invalid(&format!("unknown variable '{}'", word)));
                        }
                        tokens.push(Token::Ident(name));
                    }
                }
            }
            other => return Err(invalid(&format!("unexpected character '{}'", other))),
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, reason: &str) -> Error {
        Error::InvalidRequirement {
            line: self.source.to_string(),
            reason: format!("invalid marker: {}", reason),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn parse_or(&mut self) -> Result<MarkerTree> {
        let mut children = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            children.push(self.parse_and()?);
        }
        Ok(if children.len() == 1 {
            children.remove(0)
        } else {
            MarkerTree::Or(children)
        })
    }

    fn parse_and(&mut self) -> Result<MarkerTree> {
        let mut children = vec![self.parse_atom()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            children.push(self.parse_atom()?);
        }
        Ok(if children.len() == 1 {
            children.remove(0)
        } else {
            MarkerTree::And(children)
        })
    }

    fn parse_atom(&mut self) -> Result<MarkerTree> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.parse_or()?;
            if self.next() != Some(Token::RParen) {
                return Err(self.error("missing closing parenthesis"));
            }
            return Ok(inner);
        }

        let lhs = self.parse_value()?;
        let op = match self.next() {
            Some(Token::Op(op)) => op,
            _ => return Err(self.error("expected comparison operator")),
        };
        let rhs = self.parse_value()?;
        Ok(MarkerTree::Expression { lhs, op, rhs })
    }

    fn parse_value(&mut self) -> Result<MarkerValue> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(MarkerValue::Variable(name)),
            Some(Token::Literal(value)) => Ok(MarkerValue::Literal(value)),
            _ => Err(self.error("expected variable or quoted string")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linux_py38() -> MarkerEnvironment {
        MarkerEnvironment::new()
            .with("python_version", "3.8")
            .with("python_full_version", "3.8.10")
            .with("sys_platform", "linux")
            .with("os_name", "posix")
    }

    #[test]
    fn test_simple_comparison() {
        let marker = MarkerTree::parse("sys_platform == 'linux'").unwrap();
        assert!(marker.evaluate(&linux_py38()));
        assert!(!marker.evaluate(&MarkerEnvironment::new().with("sys_platform", "win32")));
    }

    #[test]
    fn test_version_comparison() {
        let marker = MarkerTree::parse("python_version >= \"3.10\"").unwrap();
        // 3.8 < 3.10 as versions even though "3.8" > "3.10" as strings
        assert!(!marker.evaluate(&linux_py38()));

        let marker = MarkerTree::parse("python_version < \"3.10\"").unwrap();
        assert!(marker.evaluate(&linux_py38()));
    }

    #[test]
    fn test_and_or_precedence() {
        let marker =
            MarkerTree::parse("os_name == 'nt' or sys_platform == 'linux' and python_version >= '3.6'")
                .unwrap();
        assert!(marker.evaluate(&linux_py38()));

        let marker =
            MarkerTree::parse("(os_name == 'nt' or sys_platform == 'darwin') and python_version >= '3.6'")
                .unwrap();
        assert!(!marker.evaluate(&linux_py38()));
    }

    #[test]
    fn test_in_and_not_in() {
        let marker = MarkerTree::parse("sys_platform in 'linux darwin'").unwrap();
        assert!(marker.evaluate(&linux_py38()));
        let marker = MarkerTree::parse("sys_platform not in 'linux darwin'").unwrap();
        assert!(!marker.evaluate(&linux_py38()));
    }

    #[test]
    fn test_extra_markers() {
        let marker = MarkerTree::parse("extra == 'Socks_Support'").unwrap();
        assert!(!marker.evaluate(&linux_py38()));
        assert!(marker.evaluate_with_extras(&linux_py38(), &["socks-support".to_string()]));
    }

    #[test]
    fn test_display_round_trip() {
        let text = "python_version >= \"3.6\" and (os_name == \"nt\" or sys_platform == \"linux\")";
        let marker = MarkerTree::parse(text).unwrap();
        assert_eq!(marker.to_string(), text);
        assert_eq!(MarkerTree::parse(&marker.to_string()).unwrap(), marker);
    }

    #[test]
    fn test_invalid_markers() {
        assert!(MarkerTree::parse("python_version >=").is_err());
        assert!(MarkerTree::parse("bogus_var == '1'").is_err());
        assert!(MarkerTree::parse("os_name == 'nt").is_err());
        assert!(MarkerTree::parse("(os_name == 'nt'").is_err());
    }
}
