//! Version labels for modules and version-dependent build conditions.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// A module version: one or more dotted, non-negative integer parts, e.g. `1`, `1.2`,
/// or `2.0.17`.
///
/// Versions are totally ordered part-by-part (a missing part orders before a present
/// one, so `1 < 1.0 < 1.1`). Version conditions and module version labels compare with
/// [`Version::is_substitutable_for`], which is the "can this build stand in for that
/// requirement" test.
///
/// # Examples
///
/// ```rust
/// use manifold::Version;
///
/// let v2 = "2.1".parse::<Version>()?;
/// let v2_base = "2".parse::<Version>()?;
///
/// assert!(v2 > v2_base);
/// assert!(v2.is_substitutable_for(&v2_base));
/// assert!(!v2_base.is_substitutable_for(&v2));
/// # Ok::<(), manifold::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    parts: Vec<u32>,
}

impl Version {
    /// Construct a version from its parts.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if `parts` is empty.
    pub fn new(parts: Vec<u32>) -> Result<Self> {
        if parts.is_empty() {
            return Err(Error::InvalidArgument(
                "version requires at least one part".to_string(),
            ));
        }

        Ok(Version { parts })
    }

    /// The dotted parts of the version, most significant first.
    #[must_use]
    pub fn parts(&self) -> &[u32] {
        &self.parts
    }

    /// True iff this version can stand in for `other`: the same major part, and not
    /// older. A `2.1` build satisfies a `2` requirement; a `2` build does not satisfy
    /// `2.1`, and a `3.0` build never satisfies a `2.x` requirement.
    #[must_use]
    pub fn is_substitutable_for(&self, other: &Version) -> bool {
        self.parts[0] == other.parts[0] && self >= other
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidArgument("empty version string".to_string()));
        }

        let mut parts = Vec::new();
        for segment in s.split('.') {
            let part = segment.parse::<u32>().map_err(|_| {
                Error::InvalidArgument(format!("illegal version string: \"{s}\""))
            })?;
            parts.push(part);
        }

        Version::new(parts)
    }
}
