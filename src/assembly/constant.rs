//! Interned constant values and the handles that address them.
//!
//! Every value that the module format stores exactly once lives in a
//! [`crate::assembly::pool::ConstantPool`] as a [`Constant`]: primitive literals, identity
//! references that name structural components, composite type descriptors, and the boolean
//! conditions that gate conditional structure. Constants are addressed by [`ConstantRef`]
//! handles; equality of the underlying [`ConstantValue`] is structural, which is what makes
//! interning possible.
//!
//! # Key Components
//!
//! - [`ConstantFormat`] - the on-disk discriminant tag for each constant kind
//! - [`ConstantValue`] - the format-specific payload
//! - [`Constant`] - a pooled value plus its persistence bookkeeping
//! - [`ConstantRef`] - a copyable handle, stable across pool optimization
//! - [`Access`] - accessibility levels shared by components and type descriptors

use strum::FromRepr;

use crate::assembly::version::Version;

/// The binary format tag of a constant, written as a single byte ahead of the payload.
///
/// The numeric values are part of the serialized module format and must not be reordered.
#[derive(FromRepr, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConstantFormat {
    /// A single octet literal.
    Byte = 0,
    /// A unicode code point literal.
    Char = 1,
    /// A UTF-8 string literal.
    CharString = 2,
    /// A raw octet string literal.
    ByteString = 3,
    /// A signed integer literal.
    Int = 4,
    /// A version label.
    Version = 5,
    /// The identity of a module, by qualified name.
    Module = 6,
    /// The identity of a package within a module or package.
    Package = 7,
    /// The identity of a class within a module, package, class, or method.
    Class = 8,
    /// The identity of a property.
    Property = 9,
    /// The identity of a multi-method (the named group of method overloads).
    MultiMethod = 10,
    /// The identity of a single method, disambiguated by its full signature.
    Method = 11,
    /// A type descriptor referring to a class identity with an access qualifier.
    ClassType = 12,
    /// A condition testing whether a named build option is specified.
    ConditionNamed = 13,
    /// A condition testing the version of the module being linked.
    ConditionVersioned = 14,
    /// A condition testing for the presence of another structure.
    ConditionPresent = 15,
    /// The negation of another condition.
    ConditionNot = 16,
    /// A conjunction of two or more conditions.
    ConditionAll = 17,
    /// A disjunction of two or more conditions.
    ConditionAny = 18,
}

impl ConstantFormat {
    /// True iff constants of this format are boolean build conditions.
    #[must_use]
    pub fn is_condition(&self) -> bool {
        matches!(
            self,
            ConstantFormat::ConditionNamed
                | ConstantFormat::ConditionVersioned
                | ConstantFormat::ConditionPresent
                | ConstantFormat::ConditionNot
                | ConstantFormat::ConditionAll
                | ConstantFormat::ConditionAny
        )
    }

    /// True iff constants of this format identify a structural component.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        matches!(
            self,
            ConstantFormat::Module
                | ConstantFormat::Package
                | ConstantFormat::Class
                | ConstantFormat::Property
                | ConstantFormat::MultiMethod
                | ConstantFormat::Method
        )
    }
}

/// Accessibility of a component or type descriptor.
///
/// The numeric values are the two-bit encoding used inside component flags words; `Struct`
/// is a fourth access used only by type descriptors and is never stored in component flags.
#[derive(FromRepr, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Access {
    /// Visible to everyone.
    Public = 1,
    /// Visible to the declaring structure and its subtypes.
    Protected = 2,
    /// Visible only to the declaring structure.
    Private = 3,
    /// The structural (all-members) view of a type; type descriptors only.
    Struct = 4,
}

/// A handle to a constant registered in a particular pool.
///
/// Handles are cheap to copy and remain valid across pool optimization; only the
/// serialization *position* of the constant changes. A handle minted by one pool is
/// rejected by every other pool ([`crate::Error::CrossPool`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstantRef {
    pub(crate) pool: u64,
    pub(crate) slot: u32,
}

/// The format-specific payload of a constant.
///
/// Identity constants reference their name as a [`ConstantValue::CharString`] constant and
/// (except modules) their parent identity constant, so registering an identity constant
/// transitively registers everything it is built from. Equality and hashing are structural,
/// which is the property the interning tables rely on: two constants with equal payloads in
/// the same pool are the same constant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstantValue {
    /// A single octet.
    Byte(u8),
    /// A unicode code point.
    Char(char),
    /// A UTF-8 string.
    CharString(String),
    /// A raw octet string.
    ByteString(Vec<u8>),
    /// A signed integer.
    Int(i64),
    /// A version label.
    Version(Version),
    /// A module identity; `name` is the qualified module name as a `CharString`.
    Module {
        /// The qualified module name constant.
        name: ConstantRef,
    },
    /// A package identity within a module or package.
    Package {
        /// The identity constant of the containing module or package.
        parent: ConstantRef,
        /// The unqualified package name constant.
        name: ConstantRef,
    },
    /// A class identity within a module, package, class, or method.
    Class {
        /// The identity constant of the container.
        parent: ConstantRef,
        /// The unqualified class name constant.
        name: ConstantRef,
    },
    /// A property identity.
    Property {
        /// The identity constant of the container.
        parent: ConstantRef,
        /// The property name constant.
        name: ConstantRef,
    },
    /// A multi-method identity: the named group of overloaded methods.
    MultiMethod {
        /// The identity constant of the container.
        parent: ConstantRef,
        /// The method name constant.
        name: ConstantRef,
    },
    /// A method identity, disambiguated by its full signature.
    Method {
        /// The identity constant of the containing multi-method.
        multi_method: ConstantRef,
        /// The accessibility of the method.
        access: Access,
        /// The invocation parameter types, each a `ClassType` constant.
        params: Vec<ConstantRef>,
        /// The return types, each a `ClassType` constant.
        returns: Vec<ConstantRef>,
    },
    /// A type descriptor: a class identity qualified by an access level.
    ClassType {
        /// The identity constant of the class (or module or package).
        class: ConstantRef,
        /// The access qualifier of the type, which may be [`Access::Struct`].
        access: Access,
    },
    /// True iff the named build option is specified in the linker context.
    ConditionNamed {
        /// The option name constant.
        name: ConstantRef,
    },
    /// True iff the module being linked carries the given version.
    ConditionVersioned {
        /// The version constant to test for.
        version: ConstantRef,
    },
    /// True iff the identified structure is present, optionally at a version.
    ConditionPresent {
        /// The identity constant of the structure to test for.
        identity: ConstantRef,
        /// The required version of that structure, if any.
        version: Option<ConstantRef>,
        /// True iff the version must match exactly rather than substitutably.
        exact: bool,
    },
    /// The negation of another condition.
    ConditionNot(ConstantRef),
    /// A conjunction; all member conditions must hold.
    ConditionAll(Vec<ConstantRef>),
    /// A disjunction; at least one member condition must hold.
    ConditionAny(Vec<ConstantRef>),
}

impl ConstantValue {
    /// The binary format tag for this payload.
    #[must_use]
    pub fn format(&self) -> ConstantFormat {
        match self {
            ConstantValue::Byte(_) => ConstantFormat::Byte,
            ConstantValue::Char(_) => ConstantFormat::Char,
            ConstantValue::CharString(_) => ConstantFormat::CharString,
            ConstantValue::ByteString(_) => ConstantFormat::ByteString,
            ConstantValue::Int(_) => ConstantFormat::Int,
            ConstantValue::Version(_) => ConstantFormat::Version,
            ConstantValue::Module { .. } => ConstantFormat::Module,
            ConstantValue::Package { .. } => ConstantFormat::Package,
            ConstantValue::Class { .. } => ConstantFormat::Class,
            ConstantValue::Property { .. } => ConstantFormat::Property,
            ConstantValue::MultiMethod { .. } => ConstantFormat::MultiMethod,
            ConstantValue::Method { .. } => ConstantFormat::Method,
            ConstantValue::ClassType { .. } => ConstantFormat::ClassType,
            ConstantValue::ConditionNamed { .. } => ConstantFormat::ConditionNamed,
            ConstantValue::ConditionVersioned { .. } => ConstantFormat::ConditionVersioned,
            ConstantValue::ConditionPresent { .. } => ConstantFormat::ConditionPresent,
            ConstantValue::ConditionNot(_) => ConstantFormat::ConditionNot,
            ConstantValue::ConditionAll(_) => ConstantFormat::ConditionAll,
            ConstantValue::ConditionAny(_) => ConstantFormat::ConditionAny,
        }
    }

    /// Collect every constant handle this payload refers to, in payload order.
    ///
    /// This is the dependency edge used by recursive registration and by the
    /// reference-counting pass of pool optimization.
    #[must_use]
    pub fn referenced(&self) -> Vec<ConstantRef> {
        match self {
            ConstantValue::Byte(_)
            | ConstantValue::Char(_)
            | ConstantValue::CharString(_)
            | ConstantValue::ByteString(_)
            | ConstantValue::Int(_)
            | ConstantValue::Version(_) => Vec::new(),

            ConstantValue::Module { name } => vec![*name],

            ConstantValue::Package { parent, name }
            | ConstantValue::Class { parent, name }
            | ConstantValue::Property { parent, name }
            | ConstantValue::MultiMethod { parent, name } => vec![*parent, *name],

            ConstantValue::Method {
                multi_method,
                params,
                returns,
                ..
            } => {
                let mut refs = Vec::with_capacity(1 + params.len() + returns.len());
                refs.push(*multi_method);
                refs.extend_from_slice(params);
                refs.extend_from_slice(returns);
                refs
            }

            ConstantValue::ClassType { class, .. } => vec![*class],
            ConstantValue::ConditionNamed { name } => vec![*name],
            ConstantValue::ConditionVersioned { version } => vec![*version],
            ConstantValue::ConditionPresent {
                identity, version, ..
            } => match version {
                Some(version) => vec![*identity, *version],
                None => vec![*identity],
            },
            ConstantValue::ConditionNot(condition) => vec![*condition],
            ConstantValue::ConditionAll(members) | ConstantValue::ConditionAny(members) => {
                members.clone()
            }
        }
    }
}

/// A constant as owned by its pool: the structural value plus persistence bookkeeping.
#[derive(Debug, Clone)]
pub struct Constant {
    pub(crate) value: ConstantValue,
    /// The index of this constant within the pool's serialization order, or `None` when
    /// the constant has been dropped by optimization or not yet persisted.
    pub(crate) position: Option<u32>,
    /// The usage count accumulated during the bracketed re-registration pass; meaningful
    /// only between `pre_register_all` and the optimization it feeds.
    pub(crate) refs: u32,
}

impl Constant {
    /// The structural value of the constant.
    #[must_use]
    pub fn value(&self) -> &ConstantValue {
        &self.value
    }

    /// The position of the constant in its pool's serialization order.
    #[must_use]
    pub fn position(&self) -> Option<u32> {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_tags_are_stable() {
        assert_eq!(ConstantFormat::from_repr(0), Some(ConstantFormat::Byte));
        assert_eq!(ConstantFormat::from_repr(6), Some(ConstantFormat::Module));
        assert_eq!(
            ConstantFormat::from_repr(18),
            Some(ConstantFormat::ConditionAny)
        );
        assert_eq!(ConstantFormat::from_repr(19), None);
    }

    #[test]
    fn condition_and_identity_classification() {
        assert!(ConstantFormat::ConditionAll.is_condition());
        assert!(!ConstantFormat::ConditionAll.is_identity());
        assert!(ConstantFormat::MultiMethod.is_identity());
        assert!(!ConstantFormat::CharString.is_identity());
    }

    #[test]
    fn structural_equality() {
        let a = ConstantValue::CharString("util".to_string());
        let b = ConstantValue::CharString("util".to_string());
        assert_eq!(a, b);

        let r = ConstantRef { pool: 1, slot: 0 };
        let s = ConstantRef { pool: 1, slot: 1 };
        assert_ne!(
            ConstantValue::Module { name: r },
            ConstantValue::Module { name: s }
        );
    }

    #[test]
    fn referenced_follows_payload_order() {
        let parent = ConstantRef { pool: 1, slot: 0 };
        let name = ConstantRef { pool: 1, slot: 1 };
        let value = ConstantValue::Package { parent, name };
        assert_eq!(value.referenced(), vec![parent, name]);

        assert!(ConstantValue::Int(42).referenced().is_empty());
    }
}
