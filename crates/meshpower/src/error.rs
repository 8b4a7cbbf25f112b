// The estimators raise every configuration and shape problem at
// construction time, before any painting or transform work starts, so the
// error type leans heavily toward "diagnose a bad setup". The internal
// crate reports problems as `&'static str`; this crate wraps those in a
// proper error type rather than exposing stringly errors in the public
// API.

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
}

/// The underlying internal error type
#[non_exhaustive]
#[derive(Clone, Debug)]
enum ErrorKind {
    /// An inconsistent or out-of-range option (non-increasing edges,
    /// mismatched component lengths, unknown resampler names, ...)
    Configuration(ConfigurationError),
    /// A box with no volume (or no mesh cells) prevents any meaningful
    /// density estimate
    DegenerateBox(DegenerateBoxError),
    /// A zero total weight prevents a meaningful normalization ratio
    DegenerateNormalization(DegenerateNormalizationError),
    /// Two operands (grids, bin layouts, rebinning factors) disagree about
    /// their shape
    ShapeMismatch(ShapeMismatchError),
    /// A persisted file could not be recognized
    UnknownFormat(UnknownFormatError),
    /// An evaluation was requested for a multipole/wedge that was never
    /// measured
    InvalidIndex(InvalidIndexError),
    /// An error that occurs within `meshpower_nostd_internal`
    ///
    /// Wraps the stringly errors that the internal crate reports.
    Internal(InternalError),
}

// define constructor methods for Error
impl Error {
    /// produce an error indicating that an option is inconsistent or out
    /// of range
    pub(crate) fn configuration(who: impl Into<String>, what: impl Into<String>) -> Self {
        Error {
            kind: ErrorKind::Configuration(ConfigurationError {
                who: who.into(),
                what: what.into(),
            }),
        }
    }

    /// produce an error indicating that the box (or mesh) has no volume
    pub(crate) fn degenerate_box(what: impl Into<String>) -> Self {
        Error {
            kind: ErrorKind::DegenerateBox(DegenerateBoxError { what: what.into() }),
        }
    }

    /// produce an error indicating that a normalization ratio is
    /// meaningless (e.g. zero total weight)
    pub(crate) fn degenerate_normalization(what: impl Into<String>) -> Self {
        Error {
            kind: ErrorKind::DegenerateNormalization(DegenerateNormalizationError {
                what: what.into(),
            }),
        }
    }

    /// produce an error indicating that two operands disagree about shape
    pub(crate) fn shape_mismatch(
        who: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Error {
            kind: ErrorKind::ShapeMismatch(ShapeMismatchError {
                who: who.into(),
                expected: expected.into(),
                actual: actual.into(),
            }),
        }
    }

    /// produce an error indicating that a persisted file is unrecognized
    pub(crate) fn unknown_format(what: impl Into<String>) -> Self {
        Error {
            kind: ErrorKind::UnknownFormat(UnknownFormatError { what: what.into() }),
        }
    }

    /// produce an error indicating that an unmeasured multipole or wedge
    /// was requested
    pub(crate) fn invalid_index(what: impl Into<String>) -> Self {
        Error {
            kind: ErrorKind::InvalidIndex(InvalidIndexError { what: what.into() }),
        }
    }

    /// wraps an error string from the internal crate
    pub(crate) fn internal(message: &'static str) -> Self {
        Error {
            kind: ErrorKind::Internal(InternalError(message)),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self.kind, ErrorKind::Configuration(_))
    }

    pub fn is_degenerate_box(&self) -> bool {
        matches!(self.kind, ErrorKind::DegenerateBox(_))
    }

    pub fn is_degenerate_normalization(&self) -> bool {
        matches!(self.kind, ErrorKind::DegenerateNormalization(_))
    }

    pub fn is_shape_mismatch(&self) -> bool {
        matches!(self.kind, ErrorKind::ShapeMismatch(_))
    }

    pub fn is_unknown_format(&self) -> bool {
        matches!(self.kind, ErrorKind::UnknownFormat(_))
    }

    pub fn is_invalid_index(&self) -> bool {
        matches!(self.kind, ErrorKind::InvalidIndex(_))
    }
}

impl std::error::Error for Error {}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        self.kind.fmt(f)
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match *self {
            ErrorKind::Configuration(ref err) => err.fmt(f),
            ErrorKind::DegenerateBox(ref err) => err.fmt(f),
            ErrorKind::DegenerateNormalization(ref err) => err.fmt(f),
            ErrorKind::ShapeMismatch(ref err) => err.fmt(f),
            ErrorKind::UnknownFormat(ref err) => err.fmt(f),
            ErrorKind::InvalidIndex(ref err) => err.fmt(f),
            ErrorKind::Internal(ref err) => err.fmt(f),
        }
    }
}

/// An inconsistent or out-of-range option
#[derive(Clone, Debug)]
struct ConfigurationError {
    who: String,
    what: String,
}

impl core::fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let who = self.who.as_str();
        let what = self.what.as_str();
        write!(f, "problem with {who}: {what}")
    }
}

/// A box with no volume (or a mesh with no cells)
#[derive(Clone, Debug)]
struct DegenerateBoxError {
    what: String,
}

impl core::fmt::Display for DegenerateBoxError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "degenerate box: {}", self.what)
    }
}

/// A normalization ratio with a vanishing denominator
#[derive(Clone, Debug)]
struct DegenerateNormalizationError {
    what: String,
}

impl core::fmt::Display for DegenerateNormalizationError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "degenerate normalization: {}", self.what)
    }
}

/// Two operands disagree about their shape
#[derive(Clone, Debug)]
struct ShapeMismatchError {
    who: String,
    expected: String,
    actual: String,
}

impl core::fmt::Display for ShapeMismatchError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "{} has shape {}. It should have shape {}",
            self.who, self.actual, self.expected
        )
    }
}

/// A persisted file that could not be recognized
#[derive(Clone, Debug)]
struct UnknownFormatError {
    what: String,
}

impl core::fmt::Display for UnknownFormatError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "unrecognized file format: {}", self.what)
    }
}

/// An evaluation request for an unmeasured multipole or wedge
#[derive(Clone, Debug)]
struct InvalidIndexError {
    what: String,
}

impl core::fmt::Display for InvalidIndexError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "invalid index: {}", self.what)
    }
}

/// Wraps the string errors from `meshpower_nostd_internal`
#[derive(Clone, Debug)]
struct InternalError(&'static str);

impl core::fmt::Display for InternalError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}
