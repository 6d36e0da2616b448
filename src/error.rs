use std::borrow::Cow;
use std::error;
use std::fmt::Debug;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::io;
use std::result;


/// A result type using this crate's [`Error`] by default.
pub type Result<T, E = Error> = result::Result<T, E>;


/// An enum providing a rough classification of errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Data were not valid for the operation.
    InvalidData,
    /// A parameter was incorrect.
    InvalidInput,
    /// An entity was not found, often a file.
    NotFound,
    /// The operation is not supported.
    Unsupported,
    /// A system level I/O error.
    Io,
    /// Any other error.
    Other,
}

impl ErrorKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidData => "invalid data",
            Self::InvalidInput => "invalid input",
            Self::NotFound => "entity not found",
            Self::Unsupported => "unsupported",
            Self::Io => "I/O error",
            Self::Other => "other error",
        }
    }
}


enum ErrorImpl {
    Io(io::Error),
    /// An error we directly emitted, with a fixed kind.
    Faultline {
        kind: ErrorKind,
        message: Cow<'static, str>,
    },
    /// An error layered with a contextual message.
    Context {
        context: Cow<'static, str>,
        source: Box<ErrorImpl>,
    },
}

impl ErrorImpl {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(error) => match error.kind() {
                io::ErrorKind::NotFound => ErrorKind::NotFound,
                io::ErrorKind::InvalidData => ErrorKind::InvalidData,
                io::ErrorKind::InvalidInput => ErrorKind::InvalidInput,
                io::ErrorKind::Unsupported => ErrorKind::Unsupported,
                _ => ErrorKind::Io,
            },
            Self::Faultline { kind, .. } => *kind,
            Self::Context { source, .. } => source.kind(),
        }
    }
}

impl Debug for ErrorImpl {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Io(error) => Debug::fmt(error, f),
            Self::Faultline { kind, message } => f
                .debug_struct("Error")
                .field("kind", kind)
                .field("message", message)
                .finish(),
            Self::Context { context, source } => f
                .debug_struct("Error")
                .field("context", context)
                .field("source", source)
                .finish(),
        }
    }
}

impl Display for ErrorImpl {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Io(error) => Display::fmt(error, f),
            Self::Faultline { kind, message } => {
                if message.is_empty() {
                    Display::fmt(kind.as_str(), f)
                } else {
                    Display::fmt(message, f)
                }
            }
            Self::Context { context, source } => {
                write!(f, "{context}: {source}")
            }
        }
    }
}


/// The error type used by the crate.
///
/// Errors generally form a chain, with higher-level errors typically
/// providing additional context for lower level ones.
pub struct Error {
    /// The top-most, most recent error.
    error: Box<ErrorImpl>,
}

impl Error {
    fn with_kind<M>(kind: ErrorKind, message: M) -> Self
    where
        M: ToString,
    {
        Self {
            error: Box::new(ErrorImpl::Faultline {
                kind,
                message: Cow::Owned(message.to_string()),
            }),
        }
    }

    /// Create an [`Error`] of kind [`ErrorKind::InvalidData`].
    pub fn with_invalid_data<M>(message: M) -> Self
    where
        M: ToString,
    {
        Self::with_kind(ErrorKind::InvalidData, message)
    }

    /// Create an [`Error`] of kind [`ErrorKind::InvalidInput`].
    pub fn with_invalid_input<M>(message: M) -> Self
    where
        M: ToString,
    {
        Self::with_kind(ErrorKind::InvalidInput, message)
    }

    /// Create an [`Error`] of kind [`ErrorKind::Unsupported`].
    pub fn with_unsupported<M>(message: M) -> Self
    where
        M: ToString,
    {
        Self::with_kind(ErrorKind::Unsupported, message)
    }

    /// Retrieve a rough error classification in the form of an
    /// [`ErrorKind`].
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Debug::fmt(&self.error, f)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&self.error, f)
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(other: io::Error) -> Self {
        Self {
            error: Box::new(ErrorImpl::Io(other)),
        }
    }
}


mod private {
    use super::Error;
    use super::Result;

    pub trait Sealed {}

    impl Sealed for Error {}
    impl Sealed for std::io::Error {}
    impl<T> Sealed for Option<T> {}
    impl<T, E> Sealed for Result<T, E> where E: Sealed {}

    impl Sealed for &'static str {}
    impl Sealed for String {}
}


/// A trait for types that can be converted into a `Cow<'static, str>`,
/// for use as error context.
pub trait IntoCowStr: private::Sealed {
    /// Perform the conversion.
    fn into_cow_str(self) -> Cow<'static, str>;
}

impl IntoCowStr for &'static str {
    fn into_cow_str(self) -> Cow<'static, str> {
        Cow::Borrowed(self)
    }
}

impl IntoCowStr for String {
    fn into_cow_str(self) -> Cow<'static, str> {
        Cow::Owned(self)
    }
}


/// A trait providing ergonomic chaining capabilities to [`Error`]s.
pub trait ErrorExt: private::Sealed {
    /// The output type produced by [`context`](Self::context) and
    /// [`with_context`](Self::with_context).
    type Output;

    /// Add context to this error.
    fn context<C>(self, context: C) -> Self::Output
    where
        C: IntoCowStr;

    /// Add context to this error, evaluated lazily.
    fn with_context<C, F>(self, f: F) -> Self::Output
    where
        C: IntoCowStr,
        F: FnOnce() -> C;
}

impl ErrorExt for Error {
    type Output = Error;

    fn context<C>(self, context: C) -> Self::Output
    where
        C: IntoCowStr,
    {
        Self {
            error: Box::new(ErrorImpl::Context {
                context: context.into_cow_str(),
                source: self.error,
            }),
        }
    }

    fn with_context<C, F>(self, f: F) -> Self::Output
    where
        C: IntoCowStr,
        F: FnOnce() -> C,
    {
        self.context(f())
    }
}

impl ErrorExt for io::Error {
    type Output = Error;

    fn context<C>(self, context: C) -> Self::Output
    where
        C: IntoCowStr,
    {
        Error::from(self).context(context)
    }

    fn with_context<C, F>(self, f: F) -> Self::Output
    where
        C: IntoCowStr,
        F: FnOnce() -> C,
    {
        self.context(f())
    }
}

impl<T, E> ErrorExt for Result<T, E>
where
    E: ErrorExt,
{
    type Output = Result<T, E::Output>;

    fn context<C>(self, context: C) -> Self::Output
    where
        C: IntoCowStr,
    {
        self.map_err(|err| err.context(context))
    }

    fn with_context<C, F>(self, f: F) -> Self::Output
    where
        C: IntoCowStr,
        F: FnOnce() -> C,
    {
        self.map_err(|err| err.with_context(f))
    }
}


/// A trait providing conversion shortcuts for creating `Error`
/// instances from `Option`s.
pub trait IntoError<T>: private::Sealed
where
    Self: Sized,
{
    /// Convert into an [`Error`] of a certain [`ErrorKind`], using the
    /// provided message.
    fn ok_or_error<M, F>(self, kind: ErrorKind, f: F) -> Result<T, Error>
    where
        M: ToString,
        F: FnOnce() -> M;

    /// Convert into an [`Error`] of kind [`ErrorKind::InvalidData`].
    #[inline]
    fn ok_or_invalid_data<M, F>(self, f: F) -> Result<T, Error>
    where
        M: ToString,
        F: FnOnce() -> M,
    {
        self.ok_or_error(ErrorKind::InvalidData, f)
    }

    /// Convert into an [`Error`] of kind [`ErrorKind::InvalidInput`].
    #[inline]
    fn ok_or_invalid_input<M, F>(self, f: F) -> Result<T, Error>
    where
        M: ToString,
        F: FnOnce() -> M,
    {
        self.ok_or_error(ErrorKind::InvalidInput, f)
    }
}

impl<T> IntoError<T> for Option<T> {
    #[inline]
    fn ok_or_error<M, F>(self, kind: ErrorKind, f: F) -> Result<T, Error>
    where
        M: ToString,
        F: FnOnce() -> M,
    {
        self.ok_or_else(|| Error::with_kind(kind, f()))
    }
}
