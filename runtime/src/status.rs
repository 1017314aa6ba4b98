//! Status values handed back to the host runtime.

use std::fmt;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum StatusCode {
    Ok,
    NotFound,
    InvalidArgument,
    FailedPrecondition,
    Internal,
    Unimplemented,
    ResourceExhausted,
    AlreadyExists,
}

/// Outcome of a call across the host runtime boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: StatusCode,
    message: String,
}

impl Status {
    pub fn ok() -> Self {
        Self { code: StatusCode::Ok, message: String::new() }
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&Error> for Status {
    fn from(error: &Error) -> Self {
        Self { code: error.code(), message: error.to_string() }
    }
}

impl From<Result<()>> for Status {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Status::ok(),
            Err(error) => Status::from(&error),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() { write!(f, "OK") } else { write!(f, "{}: {}", self.code, self.message) }
    }
}
