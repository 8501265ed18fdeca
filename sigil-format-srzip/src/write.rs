// Sigil
// Copyright (c) 2026 The Project Sigil Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{Seek, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use sigil_core::decoder::MetaKey;
use sigil_core::errors::{config_error, format_error, Error, Result};
use sigil_core::event::EventData;
use sigil_core::output::OutputSink;

/// Payload chunks are flushed once they reach this many bytes.
pub const CHUNK_SIZE: usize = 4 * 1024 * 1024;

fn zip_err(err: zip::result::ZipError) -> Error {
    match err {
        zip::result::ZipError::Io(err) => Error::Io(err),
        _ => Error::Format("session archive write failed"),
    }
}

/// `SrZipOutput` streams a capture back into a sigrok session archive.
///
/// Logic events append their sample word once per spanned sample; analog events append one
/// float per channel. Both payloads are split into [`CHUNK_SIZE`]-bounded deflate-compressed
/// entries, with analog chunks kept aligned across channels. Only events emitted by the
/// configured driver are persisted; decoder-derived events cannot be round-tripped, and
/// configuring decoders together with this sink is rejected at construction.
pub struct SrZipOutput<W: Write + Seek> {
    archive: Option<ZipWriter<W>>,
    driver: String,
    unitsize: usize,
    logic_buf: Vec<u8>,
    /// Next logic chunk number, 1-based.
    logic_index: u32,
    analog_bufs: Vec<Vec<u8>>,
    /// Global channel numbers of the analog channels, used in chunk entry names.
    analog_nums: Vec<usize>,
    /// Next analog chunk number, 1-based.
    analog_index: u32,
}

impl SrZipOutput<File> {
    /// Create a session archive at a file path.
    pub fn create<P: AsRef<Path>>(
        path: P,
        driver: &str,
        samplerate: u64,
        logic_channels: &[String],
        analog_channels: &[String],
        decoders: &[String],
    ) -> Result<Self> {
        SrZipOutput::new(
            File::create(path)?,
            driver,
            samplerate,
            logic_channels,
            analog_channels,
            decoders,
        )
    }
}

impl<W: Write + Seek> SrZipOutput<W> {
    /// Open an archive for writing and emit the `version` and `metadata` entries.
    pub fn new(
        sink: W,
        driver: &str,
        samplerate: u64,
        logic_channels: &[String],
        analog_channels: &[String],
        decoders: &[String],
    ) -> Result<Self> {
        if !decoders.is_empty() {
            return config_error("decoder output cannot be written to a session archive");
        }

        // One spare byte beyond the packed channel count, kept for compatibility with existing
        // readers even when the channel count is already byte-aligned.
        let unitsize = logic_channels.len() / 8 + 1;

        let mut metadata = String::new();
        let _ = writeln!(metadata, "[global]");
        let _ = writeln!(metadata, "sigil version = {}", env!("CARGO_PKG_VERSION"));
        let _ = writeln!(metadata);
        let _ = writeln!(metadata, "[device 1]");
        let _ = writeln!(metadata, "driver = {}", driver);
        let _ = writeln!(metadata, "samplerate = {}", samplerate);
        let _ = writeln!(metadata, "capturefile = logic-1");
        let _ = writeln!(metadata, "unitsize = {}", unitsize);
        let _ = writeln!(metadata, "total probes = {}", logic_channels.len());
        for (bit, name) in logic_channels.iter().enumerate() {
            let _ = writeln!(metadata, "probe{} = {}", bit + 1, name);
        }
        let mut analog_nums = Vec::with_capacity(analog_channels.len());
        if !analog_channels.is_empty() {
            let _ = writeln!(metadata, "total analog = {}", analog_channels.len());
            for (index, name) in analog_channels.iter().enumerate() {
                // Analog channel numbering continues after the logic channels.
                let num = logic_channels.len() + index + 1;
                let _ = writeln!(metadata, "analog{} = {}", num, name);
                analog_nums.push(num);
            }
        }

        let mut archive = ZipWriter::new(sink);
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        archive.start_file("version", options).map_err(zip_err)?;
        archive.write_all(b"2")?;
        archive.start_file("metadata", options).map_err(zip_err)?;
        archive.write_all(metadata.as_bytes())?;

        Ok(SrZipOutput {
            archive: Some(archive),
            driver: driver.to_string(),
            unitsize,
            logic_buf: Vec::new(),
            logic_index: 1,
            analog_bufs: vec![Vec::new(); analog_channels.len()],
            analog_nums,
            analog_index: 1,
        })
    }

    fn archive(&mut self) -> Result<&mut ZipWriter<W>> {
        match self.archive {
            Some(ref mut archive) => Ok(archive),
            None => format_error("session archive already closed"),
        }
    }

    fn flush_logic(&mut self) -> Result<()> {
        if self.logic_buf.is_empty() {
            return Ok(());
        }
        let name = format!("logic-1-{}", self.logic_index);
        self.logic_index += 1;
        let buf = std::mem::take(&mut self.logic_buf);
        debug!("writing {} ({} bytes)", name, buf.len());

        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let archive = self.archive()?;
        archive.start_file(name, options).map_err(zip_err)?;
        archive.write_all(&buf)?;
        Ok(())
    }

    /// Flush the analog buffers of every channel under the same chunk index, keeping chunk
    /// boundaries aligned across channels.
    fn flush_analog(&mut self) -> Result<()> {
        if self.analog_bufs.iter().all(|buf| buf.is_empty()) {
            return Ok(());
        }
        let index = self.analog_index;
        self.analog_index += 1;

        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for channel in 0..self.analog_bufs.len() {
            let buf = std::mem::take(&mut self.analog_bufs[channel]);
            let name = format!("analog-1-{}-{}", self.analog_nums[channel], index);
            let archive = self.archive()?;
            archive.start_file(name, options).map_err(zip_err)?;
            archive.write_all(&buf)?;
        }
        Ok(())
    }
}

impl<W: Write + Seek> OutputSink for SrZipOutput<W> {
    fn metadata(&mut self, _key: MetaKey, _value: u64) {
        // The sample rate was recorded at construction from the driver's description.
    }

    fn output(&mut self, source: &str, start: u64, end: u64, data: &EventData) -> Result<()> {
        // Decoder events cannot be represented in the archive; persist the driver's stream only.
        if source != self.driver {
            return Ok(());
        }

        match *data {
            EventData::Logic(word) => {
                let mut bytes = [0u8; 8];
                LittleEndian::write_uint(&mut bytes, word, self.unitsize);
                for _ in start..end {
                    self.logic_buf.extend_from_slice(&bytes[..self.unitsize]);
                    if self.logic_buf.len() >= CHUNK_SIZE {
                        self.flush_logic()?;
                    }
                }
            }
            EventData::Analog(ref values) => {
                let mut full = false;
                for (channel, value) in values.iter().enumerate() {
                    if let Some(buf) = self.analog_bufs.get_mut(channel) {
                        let mut bytes = [0u8; 4];
                        LittleEndian::write_f32(&mut bytes, *value);
                        buf.extend_from_slice(&bytes);
                        full |= buf.len() >= CHUNK_SIZE;
                    }
                }
                if full {
                    self.flush_analog()?;
                }
            }
            _ => (),
        }

        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.flush_logic()?;
        self.flush_analog()?;
        if let Some(archive) = self.archive.take() {
            archive.finish().map_err(zip_err)?;
        }
        Ok(())
    }
}
