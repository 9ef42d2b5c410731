//! # manifold Prelude
//!
//! This module provides a convenient prelude for the most commonly used types from the
//! manifold library. Import it to get quick access to the essentials for building,
//! querying, and (de)serializing module structure.
//!
//! ```rust
//! use manifold::prelude::*;
//!
//! let mut file = ModuleFile::new("app.acme.io")?;
//! let module = file.module();
//! let (tree, pool) = file.parts_mut();
//! tree.create_package(pool, module, Access::Public, "util")?;
//! # Ok::<(), manifold::Error>(())
//! ```

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all manifold operations
pub use crate::Error;

/// The result type used throughout manifold
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// The file-level container for one compilation unit
pub use crate::ModuleFile;

/// Low-level byte cursors for the binary module format
pub use crate::{Parser, Writer};

// ================================================================================================
// Component Tree
// ================================================================================================

/// The component arena and its addressing and format types
pub use crate::assembly::component::{ComponentFormat, ComponentId, ComponentTree, Modifiers};

/// The single-or-composite result of conditional child resolution
pub use crate::assembly::composite::Resolved;

// ================================================================================================
// Constant Pool
// ================================================================================================

/// Constant values, handles, formats, and accessibility levels
pub use crate::assembly::constant::{Access, Constant, ConstantFormat, ConstantRef, ConstantValue};

/// The owning constant registry
pub use crate::assembly::pool::ConstantPool;

// ================================================================================================
// Linking
// ================================================================================================

/// Build-configuration predicates consumed during conditional resolution
pub use crate::assembly::context::{LinkerContext, StaticLinkerContext};

/// Dotted version labels and their substitutability ordering
pub use crate::assembly::version::Version;
