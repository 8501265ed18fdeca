// Sigil
// Copyright (c) 2026 The Project Sigil Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! UART protocol decoder.
//!
//! Decodes one or two asynchronous serial lines (RX and TX) into start/data/parity/stop
//! annotations, a raw byte track per direction, and `DATA` events for stacked decoders. Both
//! directions are framed independently against one shared sample cursor: each engine step waits
//! on a falling start-bit edge for idle lines and on a sample-point skip for lines inside a
//! frame, and the per-condition match results decide which direction advances.

use log::debug;

use sigil_core::cond::Cond;
use sigil_core::decoder::{
    AnnRow, ChannelDesc, Decoder, DecoderBase, DecoderDescriptor, MetaKey, OptionDefault,
    OptionDesc,
};
use sigil_core::errors::{config_error, Result};
use sigil_core::event::{EventData, OutputType, Value};

/// Annotation class bases; add the direction index for the concrete class.
const ANN_DATA: usize = 0;
const ANN_START: usize = 2;
const ANN_PARITY_OK: usize = 4;
const ANN_PARITY_ERR: usize = 6;
const ANN_STOP: usize = 8;
const ANN_WARNING: usize = 10;

pub static UART_DECODER: DecoderDescriptor = DecoderDescriptor {
    id: "uart",
    name: "UART",
    longname: "Universal Asynchronous Receiver/Transmitter",
    desc: "Asynchronous, serial bus.",
    channels: &[],
    optional_channels: &[
        ChannelDesc { id: "rx", name: "RX", desc: "UART receive line" },
        ChannelDesc { id: "tx", name: "TX", desc: "UART transmit line" },
    ],
    options: &[
        OptionDesc {
            id: "baudrate",
            desc: "Baud rate",
            default: OptionDefault::Int(115_200),
            values: &[],
        },
        OptionDesc {
            id: "data_bits",
            desc: "Data bits",
            default: OptionDefault::Int(8),
            values: &[],
        },
        OptionDesc {
            id: "parity",
            desc: "Parity",
            default: OptionDefault::Str("none"),
            values: &["none", "odd", "even"],
        },
        OptionDesc {
            id: "bit_order",
            desc: "Bit order",
            default: OptionDefault::Str("lsb-first"),
            values: &["lsb-first", "msb-first"],
        },
    ],
    annotations: &[
        ("rx-data", "RX data"),
        ("tx-data", "TX data"),
        ("rx-start", "RX start bit"),
        ("tx-start", "TX start bit"),
        ("rx-parity-ok", "RX parity OK bit"),
        ("tx-parity-ok", "TX parity OK bit"),
        ("rx-parity-err", "RX parity error bit"),
        ("tx-parity-err", "TX parity error bit"),
        ("rx-stop", "RX stop bit"),
        ("tx-stop", "TX stop bit"),
        ("rx-warning", "RX warning"),
        ("tx-warning", "TX warning"),
    ],
    annotation_rows: &[
        AnnRow { id: "rx", name: "RX", classes: &[0, 2, 4, 6, 8, 10] },
        AnnRow { id: "tx", name: "TX", classes: &[1, 3, 5, 7, 9, 11] },
    ],
    binary: &[("rx", "RX dump"), ("tx", "TX dump")],
    factory: || Box::new(UartDecoder::new()),
};

/// Framing state of one direction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum FrameState {
    /// Waiting for the falling edge of a start bit.
    Idle,
    /// Waiting for the start-bit sample point.
    StartBit,
    /// Waiting for the next data-bit sample point.
    DataBits,
    /// Waiting for the parity-bit sample point.
    ParityBit,
    /// Waiting for the stop-bit sample point.
    StopBit,
}

/// Per-direction decoding state. Direction 0 is RX, 1 is TX; the direction index is also the
/// declared channel bit and the binary track index.
struct Direction {
    dir: usize,
    state: FrameState,
    /// Sample number of the start-bit falling edge.
    frame_start: u64,
    /// Index of the next sample point within the frame: 0 is the start bit.
    bitnum: u32,
    databyte: u16,
    ones: u32,
}

impl Direction {
    fn new(dir: usize) -> Direction {
        Direction { dir, state: FrameState::Idle, frame_start: 0, bitnum: 0, databyte: 0, ones: 0 }
    }
}

/// Frame geometry shared by both directions.
#[derive(Copy, Clone)]
struct Frame {
    bit_width: f64,
    data_bits: u32,
    parity: Parity,
    msb_first: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Parity {
    None,
    Odd,
    Even,
}

impl Frame {
    /// The sample number of bit boundary `k` within a frame starting at `start`.
    fn edge_of(&self, start: u64, k: u32) -> u64 {
        start + (self.bit_width * f64::from(k)) as u64
    }

    /// The mid-bit sample point of bit `k` within a frame starting at `start`.
    fn sample_of(&self, start: u64, k: u32) -> u64 {
        start + (self.bit_width * (f64::from(k) + 0.5)) as u64
    }
}

pub struct UartDecoder {
    base: DecoderBase,
    samplerate: u64,
    directions: Vec<Direction>,
}

impl UartDecoder {
    pub fn new() -> UartDecoder {
        UartDecoder { base: DecoderBase::new(&UART_DECODER), samplerate: 0, directions: Vec::new() }
    }

    fn frame(&self) -> Result<Frame> {
        if self.samplerate == 0 {
            return config_error("the uart decoder requires a sample rate");
        }
        let baudrate = self.base.opt_int("baudrate")?;
        if baudrate <= 0 {
            return config_error("the uart baudrate must be positive");
        }

        let parity = match self.base.opt_str("parity")? {
            "odd" => Parity::Odd,
            "even" => Parity::Even,
            _ => Parity::None,
        };

        Ok(Frame {
            bit_width: self.samplerate as f64 / baudrate as f64,
            data_bits: self.base.opt_int("data_bits")?.clamp(1, 16) as u32,
            parity,
            msb_first: self.base.opt_str("bit_order")? == "msb-first",
        })
    }

    /// Advance one direction's framing state machine at its matched engine step.
    fn advance(&mut self, index: usize, frame: Frame, bit: u8) -> Result<()> {
        let samplenum = self.base.samplenum();
        let d = &mut self.directions[index];
        let dir = d.dir;

        match d.state {
            FrameState::Idle => {
                d.frame_start = samplenum;
                d.bitnum = 0;
                d.databyte = 0;
                d.ones = 0;
                d.state = FrameState::StartBit;
            }
            FrameState::StartBit => {
                let (start, end) = (d.frame_start, frame.edge_of(d.frame_start, 1));
                if bit != 0 {
                    // The line recovered before the sample point; not a real frame.
                    d.state = FrameState::Idle;
                    self.base.put(
                        start,
                        end,
                        OutputType::Ann,
                        &EventData::Ann(ANN_WARNING + dir, vec!["Frame error".to_string()]),
                    )?;
                    return Ok(());
                }
                d.bitnum = 1;
                d.state = FrameState::DataBits;
                self.base.put(
                    start,
                    end,
                    OutputType::Ann,
                    &EventData::Ann(
                        ANN_START + dir,
                        vec!["Start bit".to_string(), "Start".to_string(), "S".to_string()],
                    ),
                )?;
            }
            FrameState::DataBits => {
                if frame.msb_first {
                    d.databyte = (d.databyte << 1) | u16::from(bit);
                }
                else {
                    d.databyte |= u16::from(bit) << (d.bitnum - 1);
                }
                d.ones += u32::from(bit);
                d.bitnum += 1;

                if d.bitnum <= frame.data_bits {
                    return Ok(());
                }

                // All data bits sampled.
                let byte = d.databyte;
                let start = frame.edge_of(d.frame_start, 1);
                let end = frame.edge_of(d.frame_start, 1 + frame.data_bits);
                d.state = if frame.parity == Parity::None {
                    FrameState::StopBit
                }
                else {
                    FrameState::ParityBit
                };

                debug!("{} byte {:02X} at {}", if dir == 0 { "rx" } else { "tx" }, byte, start);
                self.base.put(
                    start,
                    end,
                    OutputType::Ann,
                    &EventData::Ann(ANN_DATA + dir, vec![format!("{:02X}", byte)]),
                )?;
                self.base.put(
                    start,
                    end,
                    OutputType::Binary,
                    &EventData::Binary(dir, vec![byte as u8]),
                )?;
                self.base.put(
                    start,
                    end,
                    OutputType::Python,
                    &EventData::Data(vec![
                        Value::from("DATA"),
                        Value::from(dir as u64),
                        Value::from(u64::from(byte)),
                    ]),
                )?;
            }
            FrameState::ParityBit => {
                let ones = d.ones + u32::from(bit);
                let ok = match frame.parity {
                    Parity::Even => ones % 2 == 0,
                    _ => ones % 2 == 1,
                };
                let start = frame.edge_of(d.frame_start, 1 + frame.data_bits);
                let end = frame.edge_of(d.frame_start, 2 + frame.data_bits);
                d.bitnum += 1;
                d.state = FrameState::StopBit;

                let (class, texts) = if ok {
                    (ANN_PARITY_OK, vec!["Parity OK".to_string(), "Par OK".to_string()])
                }
                else {
                    (ANN_PARITY_ERR, vec!["Parity error".to_string(), "Par err".to_string()])
                };
                self.base.put(start, end, OutputType::Ann, &EventData::Ann(class + dir, texts))?;
            }
            FrameState::StopBit => {
                let stop_slot = d.bitnum;
                let start = frame.edge_of(d.frame_start, stop_slot);
                let end = frame.edge_of(d.frame_start, stop_slot + 1);
                d.state = FrameState::Idle;

                let (class, texts) = if bit != 0 {
                    (
                        ANN_STOP,
                        vec!["Stop bit".to_string(), "Stop".to_string(), "T".to_string()],
                    )
                }
                else {
                    (ANN_WARNING, vec!["Frame error".to_string(), "FE".to_string()])
                };
                self.base.put(start, end, OutputType::Ann, &EventData::Ann(class + dir, texts))?;
            }
        }

        Ok(())
    }
}

impl Default for UartDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for UartDecoder {
    fn descriptor(&self) -> &'static DecoderDescriptor {
        &UART_DECODER
    }

    fn base(&self) -> &DecoderBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut DecoderBase {
        &mut self.base
    }

    fn reset(&mut self) {
        self.directions.clear();
        for dir in 0..2 {
            if self.base.has_channel(dir) {
                self.directions.push(Direction::new(dir));
            }
        }
    }

    fn metadata(&mut self, key: MetaKey, value: u64) {
        if key == MetaKey::Samplerate {
            self.samplerate = value;
        }
    }

    fn decode(&mut self) -> Result<()> {
        if self.directions.is_empty() {
            self.reset();
        }
        if self.directions.is_empty() {
            return config_error("the uart decoder needs an rx or tx channel");
        }
        let frame = self.frame()?;

        loop {
            // Idle lines arm on their start-bit edge; lines inside a frame skip ahead to the
            // next mid-bit sample point.
            let samplenum = self.base.samplenum();
            let conds: Vec<Cond> = self
                .directions
                .iter()
                .map(|d| match d.state {
                    FrameState::Idle => Cond::falling(d.dir),
                    _ => {
                        let target = frame.sample_of(d.frame_start, d.bitnum);
                        Cond::skip(target.saturating_sub(samplenum))
                    }
                })
                .collect();

            let pins = self.base.wait(&conds)?;
            let matched = self.base.matched();

            for index in 0..self.directions.len() {
                if matched[index] {
                    let bit = pins[self.directions[index].dir].unwrap_or(0);
                    self.advance(index, frame, bit)?;
                }
            }
        }
    }
}
