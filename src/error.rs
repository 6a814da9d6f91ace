//! Rejection values.
//!
//! Every rejected promise carries an [`Error`]: a domain tag, a code from the
//! closed [`ErrorCode`] set and a payload map of [`Info`] entries keyed by the
//! stable `*_KEY` constants below. Aggregate combinators supplement the error
//! they forward (for example with [`FAILING_INDEX_KEY`]) rather than replacing it.

use std::any::Any;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Domain tag of errors produced by this crate.
pub const ERROR_DOMAIN: &str = "promise_kit";

/// Index of the input whose rejection rejected an aggregate.
pub const FAILING_INDEX_KEY: &str = "FailingIndexKey";
/// Per-input settlement of a [`join_fulfilled`](crate::combinator::join_fulfilled).
pub const JOIN_PROMISES_KEY: &str = "JoinPromisesKey";
/// Message of a panic caught while running a continuation.
pub const UNDERLYING_EXCEPTION_KEY: &str = "UnderlyingExceptionKey";
/// Every rejection gathered by an aggregate that had no winner.
pub const UNDERLYING_ERRORS_KEY: &str = "UnderlyingErrorsKey";

/// Closed set of error codes. The numeric values are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    /// Something that should not happen, including panics inside continuations.
    Unexpected = 1,
    Unknown = 2,
    /// The API was called in a way it does not support.
    InvalidUsage = 3,
    AccessDenied = 4,
    /// The operation was cancelled. See [`CatchPolicy`](crate::config::CatchPolicy).
    OperationCancelled = 5,
    OperationFailed = 8,
    TaskError = 9,
    JoinError = 10,
    /// `race_fulfilled` saw every input reject.
    NoWinner = 11,
}

impl ErrorCode {
    /// Code used for panics caught at the dispatch boundary.
    pub const UNHANDLED_EXCEPTION: ErrorCode = ErrorCode::Unexpected;

    pub const fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(code: i64) -> Option<Self> {
        let code = match code {
            1 => Self::Unexpected,
            2 => Self::Unknown,
            3 => Self::InvalidUsage,
            4 => Self::AccessDenied,
            5 => Self::OperationCancelled,
            8 => Self::OperationFailed,
            9 => Self::TaskError,
            10 => Self::JoinError,
            11 => Self::NoWinner,
            _ => return None,
        };
        Some(code)
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::Unexpected => "unexpected error",
            Self::Unknown => "unknown error",
            Self::InvalidUsage => "invalid usage",
            Self::AccessDenied => "access denied",
            Self::OperationCancelled => "the operation was cancelled",
            Self::OperationFailed => "the operation failed",
            Self::TaskError => "task error",
            Self::JoinError => "one or more joined promises rejected",
            Self::NoWinner => "every raced promise rejected",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A payload entry attached to an [`Error`].
#[derive(Debug, Clone)]
pub enum Info {
    Index(usize),
    Integer(i64),
    Text(String),
    Errors(Vec<Error>),
    /// One slot per input, `None` where the input fulfilled.
    Settled(Vec<Option<Error>>),
    Cause(Arc<dyn std::error::Error + Send + Sync>),
}

impl PartialEq for Info {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Info::Index(a), Info::Index(b)) => a == b,
            (Info::Integer(a), Info::Integer(b)) => a == b,
            (Info::Text(a), Info::Text(b)) => a == b,
            (Info::Errors(a), Info::Errors(b)) => a == b,
            (Info::Settled(a), Info::Settled(b)) => a == b,
            (Info::Cause(a), Info::Cause(b)) => {
                Arc::ptr_eq(a, b) || a.to_string() == b.to_string()
            }
            _ => false,
        }
    }
}

/// The rejection value of a promise.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message} ({domain} code {})", .code.as_i64())]
pub struct Error {
    domain: Cow<'static, str>,
    code: ErrorCode,
    message: String,
    info: BTreeMap<String, Info>,
}

impl Error {
    pub fn new(code: ErrorCode) -> Self {
        Self::with_message(code, code.description())
    }

    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            domain: Cow::Borrowed(ERROR_DOMAIN),
            code,
            message: message.into(),
            info: BTreeMap::new(),
        }
    }

    /// An error tagged with a foreign domain, as produced by adapters.
    pub fn with_domain(
        domain: impl Into<Cow<'static, str>>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            ..Self::with_message(code, message)
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCode::OperationCancelled)
    }

    /// Wraps an arbitrary error as the cause of an `OperationFailed` rejection.
    pub fn from_cause<E>(cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::with_message(ErrorCode::OperationFailed, cause.to_string())
            .with_info("CauseKey", Info::Cause(Arc::new(cause)))
    }

    /// Converts a caught panic payload into an unhandled-exception rejection.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            String::from("non-string panic payload")
        };
        Self::with_message(
            ErrorCode::UNHANDLED_EXCEPTION,
            format!("continuation panicked: {message}"),
        )
        .with_info(UNDERLYING_EXCEPTION_KEY, Info::Text(message))
    }

    /// Returns `self` with `key` set to `value`, replacing any previous entry.
    #[must_use]
    pub fn with_info(mut self, key: impl Into<String>, value: Info) -> Self {
        self.info.insert(key.into(), value);
        self
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn info(&self, key: &str) -> Option<&Info> {
        self.info.get(key)
    }

    pub fn info_map(&self) -> &BTreeMap<String, Info> {
        &self.info
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::OperationCancelled
    }

    pub fn failing_index(&self) -> Option<usize> {
        match self.info(FAILING_INDEX_KEY) {
            Some(Info::Index(index)) => Some(*index),
            _ => None,
        }
    }

    pub fn underlying_exception(&self) -> Option<&str> {
        match self.info(UNDERLYING_EXCEPTION_KEY) {
            Some(Info::Text(message)) => Some(message),
            _ => None,
        }
    }

    pub fn underlying_errors(&self) -> Option<&[Error]> {
        match self.info(UNDERLYING_ERRORS_KEY) {
            Some(Info::Errors(errors)) => Some(errors),
            _ => None,
        }
    }

    pub fn joined(&self) -> Option<&[Option<Error>]> {
        match self.info(JOIN_PROMISES_KEY) {
            Some(Info::Settled(settled)) => Some(settled),
            _ => None,
        }
    }
}

impl From<ErrorCode> for Error {
    fn from(code: ErrorCode) -> Self {
        Self::new(code)
    }
}
