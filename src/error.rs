use std::{error::Error, fmt};

/// Failure categories of the engine.
///
/// `KeyDuplicate` and `KeyNotFound` are ordinary outcomes of insert/find,
/// not exceptional states. `LockDeadlock` is the abort signal: the caller
/// must discard its transaction id after seeing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    IoFailed,
    OutOfSlots,
    KeyDuplicate,
    KeyNotFound,
    LockConflict,
    LockDeadlock,
    InvalidState,
}

#[derive(Debug)]
pub struct SmallError {
    kind: ErrorKind,
    details: String,
}

impl SmallError {
    pub fn new(kind: ErrorKind, msg: &str) -> SmallError {
        SmallError {
            kind,
            details: msg.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn show_backtrace(&self) {
        let bt = backtrace::Backtrace::new();
        log::error!("{}\n{:?}", self, bt);
    }
}

impl fmt::Display for SmallError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.details)
    }
}

impl Error for SmallError {}

impl From<std::io::Error> for SmallError {
    fn from(e: std::io::Error) -> Self {
        SmallError::new(ErrorKind::IoFailed, &e.to_string())
    }
}
