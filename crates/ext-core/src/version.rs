//! Engine constraints: which host versions an extension accepts.
//!
//! A constraint is a comma-separated list of comparators that must all hold,
//! or `*` for any host.
//!
//! ```
//! use ext_core::version::VersionConstraint;
//!
//! let engine = VersionConstraint::parse(">=1.40,<2.0").unwrap();
//! assert!(engine.accepts("1.41.2"));
//! assert!(!engine.accepts("2.0"));
//!
//! assert!(VersionConstraint::parse("*").unwrap().accepts("0.0.1"));
//! ```

use std::fmt;

use semver::Version;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    AtLeast,
    Above,
    AtMost,
    Below,
    Exactly,
    Not,
}

/// Longest prefixes first so `>=` is not read as `>`.
const OPERATORS: [(&str, Op); 6] = [
    (">=", Op::AtLeast),
    ("<=", Op::AtMost),
    ("==", Op::Exactly),
    ("!=", Op::Not),
    (">", Op::Above),
    ("<", Op::Below),
];

#[derive(Debug, Clone, PartialEq, Eq)]
struct Comparator {
    op: Op,
    version: Version,
}

impl Comparator {
    fn parse(text: &str) -> std::result::Result<Self, String> {
        let (op, rest) = OPERATORS
            .iter()
            .find_map(|(prefix, op)| text.strip_prefix(prefix).map(|rest| (*op, rest)))
            .unwrap_or((Op::Exactly, text));
        let version = parse_loose(rest)?;
        Ok(Self { op, version })
    }

    fn matches(&self, host: &Version) -> bool {
        match self.op {
            Op::AtLeast => host >= &self.version,
            Op::Above => host > &self.version,
            Op::AtMost => host <= &self.version,
            Op::Below => host < &self.version,
            Op::Exactly => host == &self.version,
            Op::Not => host != &self.version,
        }
    }
}

/// A parsed engine constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    /// Empty means "any version".
    comparators: Vec<Comparator>,
    raw: String,
}

impl VersionConstraint {
    /// Parse a constraint such as `>=1.2`, `>=1.0,<2.0`, `==1.4.0`, `!=1.3`
    /// or `*`. A bare version means `==`.
    pub fn parse(constraint: &str) -> Result<Self> {
        let raw = constraint.trim().to_string();
        if raw == "*" {
            return Ok(Self {
                comparators: Vec::new(),
                raw,
            });
        }

        let comparators = raw
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                Comparator::parse(part).map_err(|reason| {
                    Error::validation(
                        "<engine>",
                        format!("invalid version constraint '{constraint}': {reason}"),
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if comparators.is_empty() {
            return Err(Error::validation(
                "<engine>",
                format!("invalid version constraint '{constraint}': empty constraint"),
            ));
        }

        Ok(Self { comparators, raw })
    }

    /// Whether `host` satisfies every comparator.
    pub fn satisfies_version(&self, host: &Version) -> bool {
        self.comparators.iter().all(|c| c.matches(host))
    }

    /// Like [`satisfies_version`](Self::satisfies_version) for a version
    /// string. Unparsable versions are never accepted.
    pub fn accepts(&self, host: &str) -> bool {
        parse_loose(host).is_ok_and(|v| self.satisfies_version(&v))
    }

    pub fn is_any(&self) -> bool {
        self.comparators.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parse `major.minor.patch`, accepting `major.minor` as `major.minor.0`.
pub fn parse_loose(text: &str) -> std::result::Result<Version, String> {
    let text = text.trim();
    Version::parse(text)
        .or_else(|_| Version::parse(&format!("{text}.0")))
        .map_err(|e| format!("invalid version '{text}': {e}"))
}
