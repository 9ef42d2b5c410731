//! The structural assembly model: the component tree, the constant pool, and the binary
//! module format that ties them together.
//!
//! # Architecture
//!
//! The module is organized leaf-first:
//!
//! - [`crate::assembly::version::Version`] - dotted version labels and their
//!   substitutability ordering
//! - [`crate::assembly::constant`] - interned constant values, identity references, and
//!   boolean build conditions
//! - [`crate::assembly::pool::ConstantPool`] - the owning registry providing interning,
//!   typed factories, and the usage-driven optimize-and-compact pass
//! - [`crate::assembly::component::ComponentTree`] - the containment tree with
//!   conditional sibling chains, shared child groups, and deferred subtree loading
//! - [`crate::assembly::composite::Resolved`] - the single-or-composite result of
//!   condition-filtered child resolution
//! - [`crate::assembly::context::LinkerContext`] - the linker's build-configuration
//!   predicates, consumed during resolution
//! - [`crate::assembly::modulefile::ModuleFile`] - the file-level container
//!   orchestrating registration, optimization, and (de)serialization
//!
//! # Conditional structure
//!
//! The format's defining feature is that several components may occupy the same
//! namespace slot under mutually exclusive build conditions. Such siblings share one set
//! of child maps, so structure declared inside one variant is visible through all of
//! them, while every query against the tree filters the sibling chains through the
//! active [`crate::assembly::context::LinkerContext`].

pub mod component;
pub mod composite;
pub mod constant;
pub mod context;
pub mod modulefile;
pub mod pool;
pub mod version;
