// Sigil
// Copyright (c) 2026 The Project Sigil Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `input` module defines the sample-source contract and an in-memory reference source.
//!
//! A sample source owns the capture, the cursor, and the `matched` results of the most recent
//! [`wait`][Input::wait] call. Only the head stage of a pipeline drives `wait`; downstream
//! stages observe the capture through the events the source fans out on the
//! [`Python`][crate::event::OutputType::Python] stream.

use crate::cond::{eval_conds, Cond};
use crate::errors::{end_of_stream_error, Result};
use crate::event::{CallbackSet, EventData, EventHandler, OutputType};

/// `Input` is the contract between the sample-stepping engine and the decoder pipeline.
pub trait Input {
    /// An identifier for this source, used by sinks to tell source events from decoder events.
    fn id(&self) -> &str;

    /// The capture sample rate in Hz, or 0 when unknown.
    fn samplerate(&self) -> u64 {
        0
    }

    /// Ordered names of the logic channels carried in each sample word.
    fn logic_channels(&self) -> &[String];

    /// Ordered names of the analog channels, if any.
    fn analog_channels(&self) -> &[String] {
        &[]
    }

    /// The sample number of the cursor: the sample most recently delivered by `wait`. Reads 0
    /// until the first successful `wait`.
    fn samplenum(&self) -> u64;

    /// Per-condition outcomes of the most recent `wait` call.
    fn matched(&self) -> &[bool];

    /// Register an event handler on one of this source's output streams.
    fn add_callback(&mut self, output: OutputType, filters: Vec<String>, handler: EventHandler);

    /// Advance the cursor to the next sample at which at least one condition matches and return
    /// the sample word there. An empty condition list advances exactly one sample; `matched`
    /// then has length 1. Fails with end-of-stream when the capture is exhausted.
    fn wait(&mut self, conds: &[Cond]) -> Result<u64>;
}

/// An in-memory sample source over a pre-captured buffer of sample words.
///
/// `BufferInput` implements the full stepping engine, including the synthesized run-length
/// logic events, and is the reference source for pipeline construction and tests.
pub struct BufferInput {
    samples: Vec<u64>,
    samplerate: u64,
    logic_channels: Vec<String>,
    callbacks: CallbackSet,
    cursor: i64,
    matched: Vec<bool>,
    last_sample: Option<u64>,
    start_samplenum: u64,
}

impl BufferInput {
    pub fn new(samples: Vec<u64>, samplerate: u64, logic_channels: Vec<String>) -> BufferInput {
        BufferInput {
            samples,
            samplerate,
            logic_channels,
            callbacks: CallbackSet::new(),
            cursor: -1,
            matched: Vec::new(),
            last_sample: None,
            start_samplenum: 0,
        }
    }

    /// Emit the pending run-length logic event covering `[start_samplenum, end)`.
    fn put_run(&mut self, end: u64) -> Result<()> {
        if let Some(word) = self.last_sample {
            if end > self.start_samplenum {
                let start = self.start_samplenum;
                self.start_samplenum = end;
                self.callbacks.dispatch(
                    OutputType::Python,
                    &[],
                    &[],
                    start,
                    end,
                    &EventData::Logic(word),
                )?;
            }
        }
        Ok(())
    }
}

impl Input for BufferInput {
    fn id(&self) -> &str {
        "buffer"
    }

    fn samplerate(&self) -> u64 {
        self.samplerate
    }

    fn logic_channels(&self) -> &[String] {
        &self.logic_channels
    }

    fn samplenum(&self) -> u64 {
        self.cursor.max(0) as u64
    }

    fn matched(&self) -> &[bool] {
        &self.matched
    }

    fn add_callback(&mut self, output: OutputType, filters: Vec<String>, handler: EventHandler) {
        self.callbacks.add(output, filters, handler);
    }

    fn wait(&mut self, conds: &[Cond]) -> Result<u64> {
        // An empty condition list advances exactly one sample: substitute a single zero-skip,
        // which matches on the next step and keeps `matched` at length 1.
        let mut work = if conds.is_empty() { vec![Cond::Skip(0)] } else { conds.to_vec() };

        self.matched.clear();
        self.matched.resize(work.len(), false);

        loop {
            let pos = (self.cursor + 1) as u64;

            let word = match self.samples.get(pos as usize) {
                Some(&word) => word,
                None => {
                    // Flush the trailing run before signalling exhaustion; the cursor stays on
                    // the last delivered sample.
                    self.put_run(pos)?;
                    return end_of_stream_error();
                }
            };

            self.cursor += 1;

            match self.last_sample {
                None => {
                    // Seed the previous sample from the first one so edge triggers cannot fire
                    // spuriously at sample 0.
                    self.last_sample = Some(word);
                    self.start_samplenum = pos;
                }
                Some(last) if last != word => self.put_run(pos)?,
                _ => (),
            }

            let last = self.last_sample.unwrap_or(word);
            let any = eval_conds(&mut work, last, word, &mut self.matched);
            self.last_sample = Some(word);

            if any {
                return Ok(word);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::{BufferInput, Input};
    use crate::cond::Cond;
    use crate::errors::Error;
    use crate::event::{EventData, OutputType};

    fn channels(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("D{}", i)).collect()
    }

    #[test]
    fn verify_edge_stepping() {
        // The framing example: idle-high, a falling edge, then two rising edges.
        let samples = vec![0xFF, 0x00, 0xFF, 0xFF, 0x7E, 0x7E, 0xFF];
        let mut input = BufferInput::new(samples, 0, channels(8));

        let word = input.wait(&[Cond::falling(0)]).unwrap();
        assert_eq!(input.samplenum(), 1);
        assert_eq!(input.matched(), [true]);
        assert_eq!(word & 1, 0);

        let word = input.wait(&[Cond::rising(0)]).unwrap();
        assert_eq!(input.samplenum(), 2);
        assert_eq!(input.matched(), [true]);
        assert_eq!(word & 1, 1);
    }

    #[test]
    fn verify_skip_semantics() {
        let samples = vec![0xFF, 0x00, 0xFF, 0xFF, 0x7E, 0x7E, 0xFF];
        let mut input = BufferInput::new(samples, 0, channels(8));

        input.wait(&[Cond::skip(3)]).unwrap();
        assert_eq!(input.samplenum(), 2);

        input.wait(&[Cond::skip(1)]).unwrap();
        assert_eq!(input.samplenum(), 3);
    }

    #[test]
    fn verify_empty_conds_advance_one() {
        let mut input = BufferInput::new(vec![0, 1, 0], 0, channels(1));

        for expected in 0..3 {
            input.wait(&[]).unwrap();
            assert_eq!(input.samplenum(), expected);
            assert_eq!(input.matched(), [true]);
        }

        assert!(matches!(input.wait(&[]), Err(Error::EndOfStream)));
    }

    #[test]
    fn verify_cursor_strictly_increases() {
        let mut input = BufferInput::new(vec![0, 1, 0, 1, 0], 0, channels(1));
        let mut previous = None;

        while input.wait(&[Cond::edge(0)]).is_ok() {
            let samplenum = input.samplenum();
            if let Some(previous) = previous {
                assert!(samplenum > previous);
            }
            previous = Some(samplenum);
        }
    }

    #[test]
    fn verify_no_spurious_edge_at_sample_zero() {
        // The first sample is high; a rising trigger must not fire on it.
        let mut input = BufferInput::new(vec![1, 1, 0, 1], 0, channels(1));

        input.wait(&[Cond::rising(0)]).unwrap();
        assert_eq!(input.samplenum(), 3);
    }

    #[test]
    fn verify_run_length_events() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut input = BufferInput::new(vec![0, 1, 0, 1], 0, channels(1));
        {
            let log = log.clone();
            input.add_callback(
                OutputType::Python,
                Vec::new(),
                Box::new(move |start, end, data| {
                    if let EventData::Logic(word) = *data {
                        log.borrow_mut().push((start, end, word));
                    }
                    Ok(())
                }),
            );
        }

        loop {
            match input.wait(&[]) {
                Ok(_) => (),
                Err(Error::EndOfStream) => break,
                Err(err) => panic!("unexpected error: {}", err),
            }
        }

        // One event per run, each of length >= 1, and a terminal event ending at the capture
        // length.
        assert_eq!(*log.borrow(), [(0, 1, 0), (1, 2, 1), (2, 3, 0), (3, 4, 1)]);

        // A further wait reports end-of-stream without re-emitting the tail.
        assert!(matches!(input.wait(&[]), Err(Error::EndOfStream)));
        assert_eq!(log.borrow().len(), 4);
    }
}
