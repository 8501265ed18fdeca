// Sigil
// Copyright (c) 2026 The Project Sigil Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `output` module defines the terminal sink contract and the built-in text sinks.
//!
//! A sink has the lifecycle shape of a decoder but consumes events instead of producing them:
//! the pipeline delivers both the sample source's synthesized events and the terminal decoder's
//! user-selected events to [`OutputSink::output`], tagged with the id of the stage that emitted
//! them.

use std::io::Write;

use crate::decoder::MetaKey;
use crate::errors::Result;
use crate::event::EventData;

/// An `OutputSink` is the terminal consumer of a pipeline.
pub trait OutputSink {
    /// Reset all rendering state. Called before every run.
    fn reset(&mut self) {}

    /// The run is about to start.
    fn start(&mut self) {}

    /// The run finished; flush any residual output. Called on every exit path, including the
    /// end-of-stream unwind.
    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    /// Receive one stream metadata value.
    fn metadata(&mut self, _key: MetaKey, _value: u64) {}

    /// Consume one event emitted by the stage identified by `source`.
    fn output(&mut self, source: &str, start: u64, end: u64, data: &EventData) -> Result<()>;
}

/// Number of samples after which a visual groove space is inserted.
const GROOVE: u64 = 8;

/// `BitsOutput` renders the capture as per-channel lines of `0`/`1` characters, in blocks of a
/// configurable width with a space groove every eight samples.
///
/// When decoders are configured the logic rendering is suppressed and only annotation names are
/// printed.
pub struct BitsOutput {
    out: Box<dyn Write>,
    width: u64,
    logic_channels: Vec<String>,
    lines: Vec<String>,
    /// Whether the current block has any rendered samples.
    filled: bool,
    suppress_logic: bool,
}

impl BitsOutput {
    pub fn new(
        out: Box<dyn Write>,
        logic_channels: Vec<String>,
        width: u64,
        has_decoders: bool,
    ) -> BitsOutput {
        let lines = Self::fresh_lines(&logic_channels);
        BitsOutput {
            out,
            width: width.max(1),
            logic_channels,
            lines,
            filled: false,
            suppress_logic: has_decoders,
        }
    }

    fn fresh_lines(logic_channels: &[String]) -> Vec<String> {
        logic_channels.iter().map(|name| format!("{}:", name)).collect()
    }

    fn flush_block(&mut self) -> Result<()> {
        for line in &self.lines {
            writeln!(self.out, "{}", line)?;
        }
        writeln!(self.out)?;
        self.lines = Self::fresh_lines(&self.logic_channels);
        self.filled = false;
        Ok(())
    }

    fn render_logic(&mut self, start: u64, end: u64, word: u64) -> Result<()> {
        for samplenum in start..end {
            if samplenum % self.width == 0 && samplenum > 0 {
                self.flush_block()?;
            }
            for (bit, line) in self.lines.iter_mut().enumerate() {
                line.push(if (word >> bit) & 1 != 0 { '1' } else { '0' });
                if samplenum % GROOVE == GROOVE - 1 {
                    line.push(' ');
                }
            }
            self.filled = true;
        }
        Ok(())
    }
}

impl OutputSink for BitsOutput {
    fn reset(&mut self) {
        self.lines = Self::fresh_lines(&self.logic_channels);
        self.filled = false;
    }

    fn stop(&mut self) -> Result<()> {
        if !self.suppress_logic && self.filled {
            self.flush_block()?;
        }
        self.out.flush()?;
        Ok(())
    }

    fn output(&mut self, _source: &str, start: u64, end: u64, data: &EventData) -> Result<()> {
        match *data {
            EventData::Logic(word) => {
                if !self.suppress_logic {
                    self.render_logic(start, end, word)?;
                }
                Ok(())
            }
            // Analog values have no bit-level rendering.
            EventData::Analog(_) => Ok(()),
            EventData::Ann(_, ref texts) => {
                if let Some(text) = texts.first() {
                    writeln!(self.out, "{}", text)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// `AnnotationOutput` renders decoder events as one line per event:
/// `start-end id: class: "text" …` for annotations, hex dumps for binary tracks, and a value
/// listing for inter-stage data.
pub struct AnnotationOutput {
    out: Box<dyn Write>,
    /// Only events from this stage are rendered.
    decoder_id: String,
    annotations: Vec<(String, String)>,
}

impl AnnotationOutput {
    pub fn new(
        out: Box<dyn Write>,
        decoder_id: &str,
        annotations: &[(&str, &str)],
    ) -> AnnotationOutput {
        AnnotationOutput {
            out,
            decoder_id: decoder_id.to_string(),
            annotations: annotations
                .iter()
                .map(|&(id, desc)| (id.to_string(), desc.to_string()))
                .collect(),
        }
    }
}

impl OutputSink for AnnotationOutput {
    fn stop(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    fn output(&mut self, source: &str, start: u64, end: u64, data: &EventData) -> Result<()> {
        if source != self.decoder_id {
            return Ok(());
        }

        match *data {
            EventData::Ann(class, ref texts) => {
                let name = self.annotations.get(class).map_or("?", |(id, _)| id.as_str());
                write!(self.out, "{}-{} {}: {}:", start, end, self.decoder_id, name)?;
                for text in texts {
                    write!(self.out, " \"{}\"", text)?;
                }
                writeln!(self.out)?;
            }
            EventData::Binary(_, ref bytes) => {
                write!(self.out, "{}-{} {}:", start, end, self.decoder_id)?;
                for byte in bytes {
                    write!(self.out, " {:02x}", byte)?;
                }
                writeln!(self.out)?;
            }
            EventData::Data(ref values) => {
                write!(self.out, "{}-{} {}:", start, end, self.decoder_id)?;
                for value in values {
                    write!(self.out, " {}", value)?;
                }
                writeln!(self.out)?;
            }
            _ => (),
        }

        Ok(())
    }
}

/// `BinaryOutput` writes the raw bytes of one decoder's binary track events, unchanged.
pub struct BinaryOutput {
    out: Box<dyn Write>,
    decoder_id: String,
}

impl BinaryOutput {
    pub fn new(out: Box<dyn Write>, decoder_id: &str) -> BinaryOutput {
        BinaryOutput { out, decoder_id: decoder_id.to_string() }
    }
}

impl OutputSink for BinaryOutput {
    fn stop(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    fn output(&mut self, source: &str, _start: u64, _end: u64, data: &EventData) -> Result<()> {
        if source != self.decoder_id {
            return Ok(());
        }
        if let EventData::Binary(_, ref bytes) = *data {
            self.out.write_all(bytes)?;
        }
        Ok(())
    }
}
