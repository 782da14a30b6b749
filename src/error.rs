/// Custom Result type for trionovo operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the trionovo library, encompassing all possible error
/// cases that can occur while reading or writing allele-depth stores and while
/// evaluating the statistical model.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Errors related to on-disk file framing (magic prefixes, headers, indexes)
    #[error("Error processing file format: {0}")]
    FormatError(#[from] FormatError),

    /// Errors that occur while building or querying a store
    #[error("Error with store: {0}")]
    StoreError(#[from] StoreError),

    /// Errors raised by the statistical model
    #[error("Error in model: {0}")]
    ModelError(#[from] ModelError),

    /// Standard I/O errors
    #[error("Error with IO: {0}")]
    IoError(#[from] std::io::Error),

    /// UTF-8 conversion errors (sample names, meta lines)
    #[error("Error with UTF8: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),

    /// Conversion errors from anyhow errors
    #[cfg(feature = "anyhow")]
    #[error("Generic error: {0}")]
    AnyhowError(#[from] anyhow::Error),
}

/// Errors raised while validating on-disk framing.
///
/// Any of these is fatal for the open/read operation that produced it; a corrupt
/// store is never retried or partially read.
#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    /// The magic prefix at the start of the file does not match the format
    #[error("Invalid magic prefix: expected {expected:?}, found {found:?}")]
    InvalidMagic { expected: String, found: String },

    /// The meta line of a model-cache file disagrees with the reader's setup
    #[error("Wrong model cache setup: expected {expected:?}, found {found:?}")]
    MetaMismatch { expected: String, found: String },

    /// A chunk prefix was neither the continuation nor the final marker
    #[error("Invalid chunk prefix: {0:?}")]
    InvalidChunkPrefix(Vec<u8>),

    /// Header fields are inconsistent with the declared byte length
    #[error("Inconsistent header: {0}")]
    InconsistentHeader(String),

    /// The file ended before a declared structure was complete
    #[error("Truncated file: {0}")]
    Truncated(String),
}

/// Errors raised while building or querying a store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Portions must be appended in non-decreasing (chromosome, shift) order
    #[error("Out of order portion: ({0}, {1}) after ({2}, {3})")]
    OutOfOrder(u32, u64, u32, u64),

    /// A library block must carry one aligned portion per sample
    #[error("Portion set mismatch: expected {expected} aligned portions, found {found}")]
    PortionSetMismatch { expected: usize, found: usize },

    /// Model-cache records must be added contiguously within a chromosome
    #[error("Non-contiguous record: position {found} after {last}")]
    NonContiguousRecord { last: u64, found: u64 },

    /// A record of the wrong width was handed to a model-cache writer
    #[error("Invalid record length: expected {expected}, found {found}")]
    RecordLength { expected: usize, found: usize },

    /// A value does not fit the store's field width (e.g. person-file offsets)
    #[error("Value out of range for field {field}: {value}")]
    FieldOverflow { field: &'static str, value: u64 },
}

/// Errors raised by the statistical model.
#[derive(thiserror::Error, Debug)]
pub enum ModelError {
    /// A prior, rho pair, or joint table lost to NaN/Inf; the affected site must
    /// be abandoned rather than risk a false call
    #[error("Numerical instability in {0}")]
    NumericalInstability(&'static str),
}
