// Copyright 2026 The manifold authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
//#![deny(unsafe_code)]
// - 'assembly/modulefile.rs' uses mmap to map a module file into memory

//! # manifold
//!
//! A structural assembly model for a conditionally-versioned binary module format.
//! `manifold` represents compiled program structure (modules, packages, classes,
//! properties, methods) as a containment tree backed by a deduplicated constant pool,
//! and reads and writes the binary form of both.
//!
//! ## Features
//!
//! - **Interned constant pool** - every literal, identity, and condition exists exactly
//!   once per compilation unit, with a usage-driven optimize-and-compact pass that
//!   discards unused constants and gives the hottest ones the shortest indices
//! - **Conditional structure** - several components may occupy one namespace slot under
//!   mutually exclusive build conditions; queries filter sibling chains through the
//!   active linker context and degrade gracefully to composite views
//! - **Deferred subtrees** - child blocks are length-prefixed on disk, so a reader can
//!   keep whole subtrees as raw bytes and parse them only on first access
//! - **Deterministic output** - child keys are serialized in sorted order, so an
//!   unmodified tree re-assembles to identical bytes
//!
//! ## Quick Start
//!
//! ```rust
//! use manifold::{Access, ComponentFormat, ModuleFile};
//!
//! let mut file = ModuleFile::new("collections.acme.io")?;
//! let module = file.module();
//!
//! let (tree, pool) = file.parts_mut();
//! let package = tree.create_package(pool, module, Access::Public, "lists")?;
//! tree.create_class(pool, package, Access::Public, ComponentFormat::Class, "ArrayList")?;
//!
//! let bytes = file.to_bytes(true)?;
//! let mut reloaded = ModuleFile::from_bytes(&bytes, true)?;
//! assert!(file.deep_equals(&mut reloaded)?);
//! # Ok::<(), manifold::Error>(())
//! ```
//!
//! ## Architecture
//!
//! `manifold` is organized into two layers:
//!
//! - [`assembly`] - the domain model: constants, the pool, the component tree,
//!   conditional resolution, and the file-level container
//! - a byte layer ([`Parser`] and [`Writer`]) speaking the packed integer encoding
//!   shared by every section of the format
//!
//! Errors follow one crate-wide [`Error`] enum with a [`Result`] alias; the library
//! itself never logs and never retries, leaving diagnostics to the compiler or linker
//! driving it.

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

pub mod assembly;
pub mod prelude;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type covering every failure this library can report.
pub use error::Error;

/// The file-level container: owns the pool and the tree, orchestrates serialization.
pub use assembly::modulefile::ModuleFile;

/// Core assembly types.
pub use assembly::component::{ComponentFormat, ComponentId, ComponentTree, Modifiers};

/// Constant model types.
pub use assembly::constant::{Access, Constant, ConstantFormat, ConstantRef, ConstantValue};

/// The owning constant registry.
pub use assembly::pool::ConstantPool;

/// The single-or-composite result of conditional child resolution.
pub use assembly::composite::Resolved;

/// Build-configuration predicates supplied by the linker.
pub use assembly::context::{LinkerContext, StaticLinkerContext};

/// Dotted version labels.
pub use assembly::version::Version;

/// Low-level byte cursors for the binary module format.
pub use file::{parser::Parser, writer::Writer};
