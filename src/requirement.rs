//! Requirement strings and version constraints.
//!
//! A requirement looks like `name[extras] constraint ; marker`. Markers are
//! not evaluated: a marker naming an `extra` makes the requirement
//! inapplicable, and any other marker is dropped so the requirement applies
//! on every host.
//!
//! Version constraints follow PEP 440 through [`pep440_rs`]: post, dev and
//! local segments and any number of release components take part in ordering.

use std::str::FromStr;
use std::sync::LazyLock;
use pep440_rs::{Version, VersionSpecifiers, VersionSpecifiersParseError};
use regex::Regex;
use tracing::{debug, warn};

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9][A-Za-z0-9._-]*)(.*)$").expect("valid name pattern")
});

static EXTRA_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(^|[\s(])extra\s*==").expect("valid marker pattern")
});

static SEPARATOR_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-_.]+").expect("valid separator pattern"));

/// A requirement split into package name and optional constraint text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementSpec {
    pub name: String,
    pub constraint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedRequirement {
    /// Only applies when an optional feature set is requested; skip it.
    Inapplicable,
    Spec(RequirementSpec),
}

impl ParsedRequirement {
    pub fn spec(&self) -> Option<&RequirementSpec> {
        match self {
            ParsedRequirement::Inapplicable => None,
            ParsedRequirement::Spec(spec) => Some(spec),
        }
    }
}

/// Parses a requirement string such as `requests>=2.0; python_version < "3.12"`.
pub fn parse_requirement(requirement: &str) -> ParsedRequirement {
    let (clause, marker) = match requirement.split_once(';') {
        Some((clause, marker)) => (clause.trim(), Some(marker.trim())),
        None => (requirement.trim(), None),
    };
    if let Some(marker) = marker {
        if EXTRA_MARKER_RE.is_match(marker) {
            debug!(requirement, "skipping requirement gated on an extra");
            return ParsedRequirement::Inapplicable;
        }
    }

    let Some(captures) = NAME_RE.captures(clause) else {
        return ParsedRequirement::Spec(RequirementSpec {
            name: clause.to_string(),
            constraint: None,
        });
    };
    let name = captures[1].to_string();
    let mut rest = captures[2].trim();
    if rest.starts_with('[') {
        rest = match rest.find(']') {
            Some(end) => rest[end + 1..].trim(),
            None => "",
        };
    }
    if rest.starts_with('(') && rest.ends_with(')') {
        rest = rest[1..rest.len() - 1].trim();
    }
    ParsedRequirement::Spec(RequirementSpec {
        name,
        constraint: (!rest.is_empty()).then(|| rest.to_string()),
    })
}

/// Canonical form of a package name: lowercase with every run of `-`, `_`
/// and `.` collapsed to a single `-`.
pub fn canonical_name(name: &str) -> String {
    SEPARATOR_RUN_RE
        .replace_all(name.trim(), "-")
        .to_ascii_lowercase()
}

/// Parses an installed or declared version with PEP 440 rules.
pub fn parse_version(raw: &str) -> Option<Version> {
    Version::from_str(raw.trim()).ok()
}

/// Parses a comma-separated specifier set such as `>=1.2, <2`.
pub fn parse_constraint(expr: &str) -> Result<VersionSpecifiers, VersionSpecifiersParseError> {
    VersionSpecifiers::from_str(expr.trim())
}

/// Whether `installed` satisfies `constraint`.
///
/// An empty constraint always holds and a constraint that can't be parsed is
/// treated as satisfied and logged. An installed version that can't be parsed
/// only satisfies a `===` arbitrary-equality constraint naming it exactly.
pub fn check_version_compatibility(installed: &str, constraint: &str) -> bool {
    let constraint = constraint.trim();
    if constraint.is_empty() {
        return true;
    }
    if let Some(exact) = constraint.strip_prefix("===") {
        if !exact.contains(',') {
            return installed.trim() == exact.trim();
        }
    }
    let specifiers = match parse_constraint(constraint) {
        Ok(specifiers) => specifiers,
        Err(e) => {
            warn!(constraint, "invalid version constraint, treating as satisfied: {e}");
            return true;
        }
    };
    let Some(version) = parse_version(installed) else {
        warn!(installed, constraint, "unparsable installed version, treating as unsatisfied");
        return false;
    };
    specifiers.contains(&version)
}
