// Sigil
// Copyright (c) 2026 The Project Sigil Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Reader and writer for sigrok session archives (srzip).
//!
//! A session archive is a zip file holding a `version` entry, an INI-style `metadata` entry
//! describing the capture device and its channels, the packed logic payload — a single
//! `logic-1` entry, or chunked `logic-1-<n>` parts — and optional per-channel chunked analog
//! payloads (`analog-1-<channel>-<n>`).
//!
//! [`SrZipInput`] exposes an archive through the [`Input`][sigil_core::input::Input] contract,
//! so decoder pipelines can step through it. [`SrZipOutput`] is the matching
//! [`OutputSink`][sigil_core::output::OutputSink]: it re-encodes a pipeline's sample stream
//! into a new archive.

pub mod meta;

mod read;
mod write;

pub use read::SrZipInput;
pub use write::{SrZipOutput, CHUNK_SIZE};
