//! The linker's view of the active build configuration.
//!
//! Conditional siblings are filtered against a [`LinkerContext`]: a set of pure predicates
//! over the facts the linker has established for the current link (which named options are
//! specified, which module version is being produced, which structures exist). The context
//! is supplied by the linker; [`StaticLinkerContext`] is a simple concrete implementation
//! for standalone use and for tests.

use std::collections::HashSet;

use crate::assembly::constant::ConstantValue;
use crate::assembly::version::Version;

/// The build-configuration predicates consumed during ambiguous-child resolution.
///
/// Implementations must be pure: the same context must answer the same question the same
/// way for the lifetime of a resolution pass, because a parent may be re-derived through
/// its grandparent on every call.
pub trait LinkerContext {
    /// True iff the named build option is specified.
    fn is_specified(&self, name: &str) -> bool;

    /// True iff the module being linked satisfies the given version requirement.
    ///
    /// With `exact` set, the versions must be identical; otherwise a newer version with
    /// the same major part satisfies the requirement.
    fn matches_version(&self, version: &Version, exact: bool) -> bool;

    /// True iff the structure named by the given identity constant value is present.
    fn is_present(&self, identity: &ConstantValue) -> bool;
}

/// A fixed [`LinkerContext`] built from explicit facts.
///
/// Unspecified facts default permissively: with no version configured every version test
/// fails, and every structure is considered present unless the context is told otherwise
/// by a custom implementation.
///
/// # Examples
///
/// ```rust
/// use manifold::{LinkerContext, StaticLinkerContext, Version};
///
/// let ctx = StaticLinkerContext::new()
///     .specify("debug")
///     .with_version("2.1".parse::<Version>()?);
///
/// assert!(ctx.is_specified("debug"));
/// assert!(!ctx.is_specified("test"));
/// assert!(ctx.matches_version(&"2".parse::<Version>()?, false));
/// assert!(!ctx.matches_version(&"2".parse::<Version>()?, true));
/// # Ok::<(), manifold::Error>(())
/// ```
#[derive(Debug, Default, Clone)]
pub struct StaticLinkerContext {
    specified: HashSet<String>,
    version: Option<Version>,
}

impl StaticLinkerContext {
    /// Create a context with no options specified and no version configured.
    #[must_use]
    pub fn new() -> Self {
        StaticLinkerContext::default()
    }

    /// Specify a named build option.
    #[must_use]
    pub fn specify(mut self, name: &str) -> Self {
        self.specified.insert(name.to_string());
        self
    }

    /// Configure the version of the module being linked.
    #[must_use]
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }
}

impl LinkerContext for StaticLinkerContext {
    fn is_specified(&self, name: &str) -> bool {
        self.specified.contains(name)
    }

    fn matches_version(&self, version: &Version, exact: bool) -> bool {
        match &self.version {
            Some(active) if exact => active == version,
            Some(active) => active.is_substitutable_for(version),
            None => false,
        }
    }

    fn is_present(&self, _identity: &ConstantValue) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_options() {
        let ctx = StaticLinkerContext::new().specify("debug").specify("x86");
        assert!(ctx.is_specified("debug"));
        assert!(ctx.is_specified("x86"));
        assert!(!ctx.is_specified("arm"));
    }

    #[test]
    fn version_matching() {
        let ctx = StaticLinkerContext::new().with_version("2.1".parse().unwrap());

        assert!(ctx.matches_version(&"2.1".parse().unwrap(), true));
        assert!(ctx.matches_version(&"2".parse().unwrap(), false));
        assert!(!ctx.matches_version(&"2.2".parse().unwrap(), false));
        assert!(!ctx.matches_version(&"3".parse().unwrap(), false));
    }

    #[test]
    fn no_version_fails_all_version_tests() {
        let ctx = StaticLinkerContext::new();
        assert!(!ctx.matches_version(&"1".parse().unwrap(), false));
    }
}
