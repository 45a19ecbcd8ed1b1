// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Core primitives: time, GUIDs, the timer heap, serialized samples, and the
//! crate-wide error taxonomy.

/// Fibonacci heap timer queue.
pub mod fibheap;
/// RTPS GUIDs and builtin entity ids.
pub mod guid;
/// Serialized sample abstraction (key identity + payload bytes).
pub mod serdata;
/// Monotonic / wall-clock nanosecond time.
pub mod time;

use std::fmt;

/// Errors returned by core operations.
///
/// The variants mirror the DDS return-code taxonomy; everything that is not a
/// caller mistake or a policy outcome collapses into [`Error::Generic`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Null/nonsense argument supplied by the caller.
    BadParameter,
    /// Referenced instance handle unknown, or operation on an unenabled entity.
    PreconditionNotMet,
    /// Operation invoked on the wrong entity kind.
    IllegalOperation,
    /// Reserved for the security plugin boundary.
    NotAllowedBySecurity,
    /// Blocking resource limit exceeded within `max_blocking_time`.
    Timeout,
    /// Feature not implemented.
    Unsupported,
    /// Entity handle refers to an already freed entity.
    AlreadyDeleted,
    /// Generic internal failure (allocation, transport down, ...).
    Generic(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadParameter => write!(f, "bad parameter"),
            Error::PreconditionNotMet => write!(f, "precondition not met"),
            Error::IllegalOperation => write!(f, "illegal operation"),
            Error::NotAllowedBySecurity => write!(f, "not allowed by security"),
            Error::Timeout => write!(f, "timeout"),
            Error::Unsupported => write!(f, "unsupported"),
            Error::AlreadyDeleted => write!(f, "already deleted"),
            Error::Generic(msg) => write!(f, "error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Generic(e.to_string())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
