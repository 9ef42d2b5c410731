use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// # Error Categories
///
/// ## Format errors (deserialization)
/// - [`Error::Malformed`] - Corrupted or invalid module structure in the byte stream
/// - [`Error::OutOfBounds`] - Attempted to read beyond the end of the input
/// - [`Error::Empty`] - Empty input provided
///
/// ## Structural / state errors
/// - [`Error::Structure`] - An operation that would corrupt the component tree, such as
///   adding a package to a component that cannot contain one, merging a populated sibling,
///   or asking a composite view for a field its members disagree on
/// - [`Error::CrossPool`] - A constant handle minted by a different pool was passed in;
///   constants must be explicitly re-created in the target pool
///
/// ## Validation errors
/// - [`Error::InvalidArgument`] - Malformed identifier, qualified module name, version
///   string, or other argument rejected before any mutation occurs
///
/// ## I/O
/// - [`Error::FileError`] - Filesystem errors while reading a module file
#[derive(Error, Debug)]
pub enum Error {
    /// The input is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected,
    /// and where the offending component is known, its identity.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the input.
    ///
    /// This error occurs when trying to read data beyond the end of the stream,
    /// or when a constant pool index is outside the pool.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// A structural or state error in the component tree.
    ///
    /// These are programmer/compiler-internal conditions: the operation is refused
    /// before it can corrupt the tree, and the caller is expected to surface it as
    /// a diagnostic.
    #[error("{0}")]
    Structure(String),

    /// A constant belonging to a different pool was used.
    ///
    /// Constants are owned by exactly one pool. A handle from another pool is never
    /// auto-corrected; the constant must be re-created in the target pool first.
    #[error("Constant belongs to a different pool")]
    CrossPool,

    /// An argument failed validation before any mutation occurred.
    ///
    /// Covers malformed identifiers, qualified module names, version strings, and
    /// factory arguments of the wrong constant kind.
    #[error("{0}")]
    InvalidArgument(String),

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),
}
