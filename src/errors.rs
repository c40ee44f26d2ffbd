use std::io;

/// The error type for every fallible operation in the crate.
///
/// Use [`Error::kind`] to inspect the cause, or [`Error::category`] to triage
/// it the way the packer does (retry, roll back, or give up).
#[derive(Debug)]
pub struct Error {
    inner: ErrorInner,
}

impl Error {
    pub(crate) fn io(err: io::Error) -> Error {
        Error::from(ErrorKind::IO(err))
    }

    pub(crate) fn invalid_input(msg: impl Into<String>) -> Error {
        Error::from(ErrorKind::InvalidInput { msg: msg.into() })
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Error {
        Error::from(ErrorKind::Unsupported { msg: msg.into() })
    }

    pub(crate) fn cancelled() -> Error {
        Error::from(ErrorKind::UserCancel)
    }

    pub(crate) fn is_eof(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Eof)
    }

    /// Wraps the error so it can travel through an `io::Write` or `io::Read`
    /// adapter. `From<io::Error>` unwraps it again on the other side.
    pub(crate) fn into_io(self) -> io::Error {
        io::Error::new(io::ErrorKind::Other, self)
    }

    /// Returns the specific cause of the error.
    pub fn kind(&self) -> &ErrorKind {
        &self.inner.kind
    }

    /// Returns the broad class of the error.
    pub fn category(&self) -> ErrorCategory {
        self.inner.kind.category()
    }

    /// Returns true when the operation stopped because the user asked it to.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::UserCancel)
    }
}

#[derive(Debug)]
struct ErrorInner {
    kind: ErrorKind,
}

/// The specific cause of an [`Error`].
#[derive(Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An allocation for archive metadata could not be satisfied.
    LowMemory,
    MissingEndOfCentralDirectory,
    MissingZip64EndOfCentralDirectory,
    InvalidSignature {
        expected: u32,
        actual: u32,
    },
    InvalidChecksum {
        expected: u32,
        actual: u32,
    },
    /// A central directory record runs past the end of the directory.
    CorruptRecord {
        position: u64,
    },
    /// The central directory holds a different number of records than the
    /// end record advertises.
    EntryCountMismatch {
        expected: u64,
        actual: u64,
    },
    /// The password does not match the encryption header or the
    /// authentication code.
    Password,
    IO(io::Error),
    UserCancel,
    /// The target volume cannot hold even a minimal unit.
    Capacity {
        available: u64,
        required: u64,
    },
    EmptyArchive,
    InvalidInput {
        msg: String,
    },
    Unsupported {
        msg: String,
    },
    Eof,
}

/// Broad classes of errors, each with its own recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    LowMemory,
    Format,
    IO,
    Password,
    UserCancel,
    Capacity,
    EmptyArchive,
    Usage,
}

impl ErrorKind {
    fn category(&self) -> ErrorCategory {
        match self {
            ErrorKind::LowMemory => ErrorCategory::LowMemory,
            ErrorKind::MissingEndOfCentralDirectory
            | ErrorKind::MissingZip64EndOfCentralDirectory
            | ErrorKind::InvalidSignature { .. }
            | ErrorKind::InvalidChecksum { .. }
            | ErrorKind::CorruptRecord { .. }
            | ErrorKind::EntryCountMismatch { .. }
            | ErrorKind::Eof => ErrorCategory::Format,
            ErrorKind::Password => ErrorCategory::Password,
            ErrorKind::IO(_) => ErrorCategory::IO,
            ErrorKind::UserCancel => ErrorCategory::UserCancel,
            ErrorKind::Capacity { .. } => ErrorCategory::Capacity,
            ErrorKind::EmptyArchive => ErrorCategory::EmptyArchive,
            ErrorKind::InvalidInput { .. } | ErrorKind::Unsupported { .. } => {
                ErrorCategory::Usage
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self.inner.kind {
            ErrorKind::IO(ref err) => Some(err),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.inner.kind)?;
        Ok(())
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            ErrorKind::IO(ref err) => err.fmt(f),
            ErrorKind::LowMemory => write!(f, "Not enough memory"),
            ErrorKind::MissingEndOfCentralDirectory => {
                write!(f, "Missing end of central directory")
            }
            ErrorKind::MissingZip64EndOfCentralDirectory => {
                write!(f, "Missing zip64 end of central directory")
            }
            ErrorKind::InvalidSignature { expected, actual } => {
                write!(
                    f,
                    "Invalid signature: expected 0x{:08x}, got 0x{:08x}",
                    expected, actual
                )
            }
            ErrorKind::InvalidChecksum { expected, actual } => {
                write!(
                    f,
                    "Invalid checksum: expected 0x{:08x}, got 0x{:08x}",
                    expected, actual
                )
            }
            ErrorKind::CorruptRecord { position } => {
                write!(f, "Corrupt central directory record at {}", position)
            }
            ErrorKind::EntryCountMismatch { expected, actual } => {
                write!(
                    f,
                    "Central directory entry count mismatch: expected {}, found {}",
                    expected, actual
                )
            }
            ErrorKind::Password => write!(f, "Incorrect password"),
            ErrorKind::UserCancel => write!(f, "Operation cancelled"),
            ErrorKind::Capacity {
                available,
                required,
            } => {
                write!(
                    f,
                    "Not enough space on volume: {} bytes available, {} required",
                    available, required
                )
            }
            ErrorKind::EmptyArchive => write!(f, "Archive is empty"),
            ErrorKind::InvalidInput { ref msg } => write!(f, "Invalid input: {}", msg),
            ErrorKind::Unsupported { ref msg } => write!(f, "Unsupported: {}", msg),
            ErrorKind::Eof => write!(f, "Unexpected end of file"),
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error {
            inner: ErrorInner { kind },
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        let wrapped = err.get_ref().is_some_and(|inner| inner.is::<Error>());
        if !wrapped {
            return Error::io(err);
        }

        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<Error>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(other)) => Error::io(io::Error::new(kind, other)),
            None => Error::io(io::Error::from(kind)),
        }
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(_: std::collections::TryReserveError) -> Error {
        Error::from(ErrorKind::LowMemory)
    }
}
