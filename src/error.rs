//! Error types and status codes for the buffer engine

use serde::{Deserialize, Serialize};

/// Result type alias for buffer engine operations
pub type Result<T> = std::result::Result<T, BufferError>;

/// Which kind of allocation ran out of memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryShortfall {
    /// Not attributable to a pool, buffer or metadata block
    General,
    /// Eager allocation at pool creation
    Pool,
    /// Payload allocation for a single buffer
    Buffer,
    /// Metadata block allocation
    MetaData,
}

/// Every failure the engine can report
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// Generic failure with context
    #[error("Buffer error: {message}")]
    Error { message: String },

    /// I/O failure while creating or mapping partition backing
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Out of memory for the given allocation kind
    #[error("Insufficient memory ({kind:?}): requested {requested} bytes")]
    InsufficientMemory {
        kind: MemoryShortfall,
        requested: usize,
    },

    /// The descriptor's allocation source cannot satisfy the request
    #[error("Unsupported allocation source {source_name}: {message}")]
    UnsupportedAllocationSource {
        source_name: String,
        message: String,
    },

    /// Self-contradictory type descriptor
    #[error("Invalid descriptor '{name}': {message}")]
    InvalidDescriptor { name: String, message: String },

    /// Buffer has no payload bound to it
    #[error("No data attached to buffer {index}")]
    NoDataAttached { index: usize },

    /// Type table exhausted
    #[error("Too many data types: limit is {limit}")]
    TooManyDataTypes { limit: usize },

    /// Unknown buffer data type
    #[error("Data type not found: {what}")]
    DataTypeNotFound { what: String },

    /// Unknown or unattached metadata type
    #[error("Meta data type not found: {what}")]
    MetaDataTypeNotFound { what: String },

    /// Memory parameters do not fit the allocation source
    #[error("Parameters incompatible with allocation source: {message}")]
    ParametersIncompatibleWithAllocationSource { message: String },

    /// Operation cannot be performed on buffers of this type
    #[error("Operation '{operation}' not supported by descriptor '{type_name}'")]
    OperationNotSupportedByThisDescriptor {
        operation: &'static str,
        type_name: String,
    },

    /// Size cannot be satisfied by the type or the backing allocation
    #[error("Size incompatible with descriptor: requested {requested}, limit {limit}")]
    SizeIncompatibleWithDescriptor { requested: usize, limit: usize },

    /// Pool is not owned by this manager or was destroyed
    #[error("Pool not found: {message}")]
    PoolNotFound { message: String },

    /// A buffer container could not be created
    #[error("Failed to create buffer: {message}")]
    FailedToCreateBuffer { message: String },

    /// Nothing free and the caller asked not to wait
    #[error("No free buffer available in pool of '{type_name}'")]
    NoFreeBufferAvailable { type_name: String },

    /// Buffer is still referenced
    #[error("Buffer {index} still has {count} references")]
    NonZeroReferenceCount { index: usize, count: u32 },

    /// Buffer is not in use (released, or a stale handle)
    #[error("Buffer {index} is not in use")]
    NotInUse { index: usize },

    /// Link table is full
    #[error("Too many attachments: limit is {limit}")]
    TooManyAttachments { limit: usize },

    /// Link or metadata slot to detach does not exist
    #[error("Attachment not found: {message}")]
    AttachmentNotFound { message: String },

    /// A blocking acquisition was cancelled
    #[error("Blocking call aborted on pool of '{type_name}'")]
    BlockingCallAborted { type_name: String },
}

impl BufferError {
    /// Create a generic error
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Create an I/O error from a standard I/O error
    pub fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Io {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create an insufficient memory error
    pub fn insufficient_memory(kind: MemoryShortfall, requested: usize) -> Self {
        Self::InsufficientMemory { kind, requested }
    }

    /// Create an unsupported allocation source error
    pub fn unsupported_source(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnsupportedAllocationSource {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Create an invalid descriptor error
    pub fn invalid_descriptor(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a data type not found error
    pub fn data_type_not_found(what: impl Into<String>) -> Self {
        Self::DataTypeNotFound { what: what.into() }
    }

    /// Create a metadata type not found error
    pub fn meta_data_type_not_found(what: impl Into<String>) -> Self {
        Self::MetaDataTypeNotFound { what: what.into() }
    }

    /// Create a parameters incompatible error
    pub fn incompatible_parameters(message: impl Into<String>) -> Self {
        Self::ParametersIncompatibleWithAllocationSource {
            message: message.into(),
        }
    }

    /// Create an operation not supported error
    pub fn not_supported(operation: &'static str, type_name: impl Into<String>) -> Self {
        Self::OperationNotSupportedByThisDescriptor {
            operation,
            type_name: type_name.into(),
        }
    }

    /// Create a size incompatible error
    pub fn size_incompatible(requested: usize, limit: usize) -> Self {
        Self::SizeIncompatibleWithDescriptor { requested, limit }
    }

    /// Create a pool not found error
    pub fn pool_not_found(message: impl Into<String>) -> Self {
        Self::PoolNotFound {
            message: message.into(),
        }
    }

    /// Create an attachment not found error
    pub fn attachment_not_found(message: impl Into<String>) -> Self {
        Self::AttachmentNotFound {
            message: message.into(),
        }
    }

    /// Map onto the status taxonomy
    pub fn status(&self) -> BufferStatus {
        match self {
            Self::Error { .. } | Self::Io { .. } => BufferStatus::Error,
            Self::InsufficientMemory { kind, .. } => match kind {
                MemoryShortfall::General => BufferStatus::InsufficientMemoryGeneral,
                MemoryShortfall::Pool => BufferStatus::InsufficientMemoryForPool,
                MemoryShortfall::Buffer => BufferStatus::InsufficientMemoryForBuffer,
                MemoryShortfall::MetaData => BufferStatus::InsufficientMemoryForMetaData,
            },
            Self::UnsupportedAllocationSource { .. } => BufferStatus::UnsupportedAllocationSource,
            Self::InvalidDescriptor { .. } => BufferStatus::InvalidDescriptor,
            Self::NoDataAttached { .. } => BufferStatus::NoDataAttached,
            Self::TooManyDataTypes { .. } => BufferStatus::TooManyDataTypes,
            Self::DataTypeNotFound { .. } => BufferStatus::DataTypeNotFound,
            Self::MetaDataTypeNotFound { .. } => BufferStatus::MetaDataTypeNotFound,
            Self::ParametersIncompatibleWithAllocationSource { .. } => {
                BufferStatus::ParametersIncompatibleWithAllocationSource
            }
            Self::OperationNotSupportedByThisDescriptor { .. } => {
                BufferStatus::OperationNotSupportedByThisDescriptor
            }
            Self::SizeIncompatibleWithDescriptor { .. } => {
                BufferStatus::SizeIncompatibleWithDescriptor
            }
            Self::PoolNotFound { .. } => BufferStatus::PoolNotFound,
            Self::FailedToCreateBuffer { .. } => BufferStatus::FailedToCreateBuffer,
            Self::NoFreeBufferAvailable { .. } => BufferStatus::NoFreeBufferAvailable,
            Self::NonZeroReferenceCount { .. } => BufferStatus::NonZeroReferenceCount,
            Self::NotInUse { .. } => BufferStatus::NotInUse,
            Self::TooManyAttachments { .. } => BufferStatus::TooManyAttachments,
            Self::AttachmentNotFound { .. } => BufferStatus::AttachmentNotFound,
            Self::BlockingCallAborted { .. } => BufferStatus::BlockingCallAborted,
        }
    }

    /// Protocol violations indicate a caller bug (double free, use after release)
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::NonZeroReferenceCount { .. }
                | Self::NotInUse { .. }
                | Self::AttachmentNotFound { .. }
        )
    }

    /// Transient conditions the caller may retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::InsufficientMemory { .. } | Self::NoFreeBufferAvailable { .. }
        )
    }
}

impl From<std::io::Error> for BufferError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(err, "I/O operation failed")
    }
}

impl From<bincode::Error> for BufferError {
    fn from(err: bincode::Error) -> Self {
        Self::error(format!("Bincode error: {}", err))
    }
}

/// Status taxonomy shared by the Rust and C interfaces
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferStatus {
    NoError = 0,
    Error = 1,
    InsufficientMemoryGeneral = 2,
    InsufficientMemoryForPool = 3,
    InsufficientMemoryForBuffer = 4,
    InsufficientMemoryForMetaData = 5,
    UnsupportedAllocationSource = 6,
    InvalidDescriptor = 7,
    NoDataAttached = 8,
    TooManyDataTypes = 9,
    DataTypeNotFound = 10,
    MetaDataTypeNotFound = 11,
    ParametersIncompatibleWithAllocationSource = 12,
    OperationNotSupportedByThisDescriptor = 13,
    SizeIncompatibleWithDescriptor = 14,
    PoolNotFound = 15,
    FailedToCreateBuffer = 16,
    NoFreeBufferAvailable = 17,
    NonZeroReferenceCount = 18,
    NotInUse = 19,
    TooManyAttachments = 20,
    AttachmentNotFound = 21,
    BlockingCallAborted = 22,
}

impl From<&BufferError> for BufferStatus {
    fn from(error: &BufferError) -> Self {
        error.status()
    }
}

impl From<BufferError> for BufferStatus {
    fn from(error: BufferError) -> Self {
        error.status()
    }
}

impl<T> From<&Result<T>> for BufferStatus {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => BufferStatus::NoError,
            Err(e) => e.status(),
        }
    }
}
