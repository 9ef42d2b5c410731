//! Byte-level encoding and decoding for the binary module format.
//!
//! This module provides the cursor types shared by the pool and component
//! (de)serialization paths:
//!
//! - [`crate::file::parser::Parser`] - bounds-checked reading of flags words, packed
//!   integers, and length-prefixed strings
//! - [`crate::file::writer::Writer`] - the append-only assembly counterpart
//!
//! Both speak the packed integer encoding described in
//! [`Parser::read_packed_int`](crate::file::parser::Parser::read_packed_int), which is
//! used uniformly for pool cross-references, counts, and block lengths.

pub(crate) mod parser;
pub(crate) mod writer;
