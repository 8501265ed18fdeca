// Sigil
// Copyright (c) 2026 The Project Sigil Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the common error type.

use std::error;
use std::fmt;
use std::io;
use std::result;

/// `Error` provides an enumeration of all possible errors reported by Sigil.
#[derive(Debug)]
pub enum Error {
    /// The sample source has no further samples. This is the normal termination signal of a
    /// pipeline and is caught at the stage `run()` boundary.
    EndOfStream,
    /// The pipeline, a decoder, or a sink was configured incorrectly. Surfaced at construction
    /// and never recovered.
    Config(String),
    /// The session archive is malformed, incomplete, or uses an unsupported feature.
    Format(&'static str),
    /// An IO error occurred while reading, writing, or seeking the stream.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::EndOfStream => {
                write!(f, "end of sample stream")
            }
            Error::Config(ref msg) => {
                write!(f, "invalid configuration: {}", msg)
            }
            Error::Format(msg) => {
                write!(f, "malformed session: {}", msg)
            }
            Error::Io(ref err) => {
                write!(f, "io error: {}", err)
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Io(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Error::EndOfStream,
            _ => Error::Io(err),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Convenience function to create an end-of-stream error.
pub fn end_of_stream_error<T>() -> Result<T> {
    Err(Error::EndOfStream)
}

/// Convenience function to create a configuration error.
pub fn config_error<T, S: Into<String>>(msg: S) -> Result<T> {
    Err(Error::Config(msg.into()))
}

/// Convenience function to create a format error.
pub fn format_error<T>(msg: &'static str) -> Result<T> {
    Err(Error::Format(msg))
}
