//! Resource identifiers.
//!
//! A [`ResourceKey`] is a slash-separated, case-sensitive path such as
//! `com/acme/Foo.class`. Leading slashes are normalized away so that
//! `/com/acme/Foo.class` and `com/acme/Foo.class` address the same blob.

use std::borrow::Borrow;
use std::fmt;

use crate::error::{LoaderError, Result};

pub const CLASS_SUFFIX: &str = ".class";
pub const SOURCE_SUFFIX: &str = ".java";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn parse(identifier: &str) -> Result<Self> {
        let trimmed = identifier.trim_start_matches('/');
        if trimmed.is_empty() {
            return Err(LoaderError::invalid(format!(
                "resource identifier is empty: {identifier:?}"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Key for a loose file: `com.acme` + `Foo` + `.class` -> `com/acme/Foo.class`.
    pub fn from_parts(package: &str, simple_name: &str, suffix: &str) -> Result<Self> {
        if simple_name.is_empty() {
            return Err(LoaderError::invalid("class name is empty"));
        }
        let package = package.trim_matches('.');
        if package.is_empty() {
            return Self::parse(&format!("{simple_name}{suffix}"));
        }
        Self::parse(&format!(
            "{}/{simple_name}{suffix}",
            package.replace('.', "/")
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits into `(package, simple_name)`: `com/acme/Foo.class` -> `("com.acme", "Foo")`.
    /// Resources at the root have an empty package.
    pub fn package_and_name(&self) -> (String, String) {
        let (dir, file) = match self.0.rsplit_once('/') {
            Some((dir, file)) => (dir, file),
            None => ("", self.0.as_str()),
        };
        let package = dir.trim_start_matches('/').replace('/', ".");
        let name = file.strip_suffix(CLASS_SUFFIX).unwrap_or(file).to_string();
        (package, name)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ResourceKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}
