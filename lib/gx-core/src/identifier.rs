//! Parsing of dotted `namespace.service@version` identifiers

use crate::AddressKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Version assumed when an identifier carries none, or an invalid one
pub const DEFAULT_VERSION: &str = "1.0.0";

/// A fully resolved (namespace, service, version) triple
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceIdentifier {
    pub namespace: String,
    pub service: String,
    pub version: String,
}

impl ServiceIdentifier {
    pub fn new(
        namespace: impl Into<String>,
        service: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
            version: version.into(),
        }
    }

    /// Parse `"ns1.ns2.service"` or `"ns1.ns2.service@version"`.
    ///
    /// Never fails: a missing or malformed version falls back to
    /// [`DEFAULT_VERSION`], and an identifier without dots has an empty
    /// namespace.
    pub fn parse(identifier: &str) -> Self {
        let (path, version) = match identifier.rsplit_once('@') {
            Some((path, version)) if is_semver(version) => (path, version),
            Some((path, _)) => (path, DEFAULT_VERSION),
            None => (identifier, DEFAULT_VERSION),
        };

        let (namespace, service) = match path.rsplit_once('.') {
            Some((namespace, service)) => (namespace, service),
            None => ("", path),
        };

        Self::new(namespace, service, version)
    }

    pub fn address(&self) -> AddressKey {
        AddressKey::derive(&self.namespace, &self.service, &self.version)
    }
}

impl fmt::Display for ServiceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}@{}", self.service, self.version)
        } else {
            write!(f, "{}.{}@{}", self.namespace, self.service, self.version)
        }
    }
}

/// Whether `version` is a syntactically valid semantic version
/// (`MAJOR.MINOR.PATCH[-prerelease][+build]`).
pub fn is_semver(version: &str) -> bool {
    let (rest, build) = match version.split_once('+') {
        Some((rest, build)) => (rest, Some(build)),
        None => (version, None),
    };
    let (core, pre) = match rest.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (rest, None),
    };

    let numbers: Vec<&str> = core.split('.').collect();
    if numbers.len() != 3 || !numbers.iter().all(|n| is_numeric_identifier(n)) {
        return false;
    }

    if let Some(pre) = pre {
        let valid = pre.split('.').all(|id| {
            is_alphanumeric_identifier(id)
                && (!id.bytes().all(|b| b.is_ascii_digit()) || is_numeric_identifier(id))
        });
        if !valid {
            return false;
        }
    }

    match build {
        Some(build) => build.split('.').all(is_alphanumeric_identifier),
        None => true,
    }
}

fn is_numeric_identifier(id: &str) -> bool {
    !id.is_empty()
        && id.bytes().all(|b| b.is_ascii_digit())
        && (id == "0" || !id.starts_with('0'))
}

fn is_alphanumeric_identifier(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}
