// Sigil
// Copyright (c) 2026 The Project Sigil Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info};
use zip::result::ZipError;
use zip::ZipArchive;

use sigil_core::cond::{eval_conds, Cond};
use sigil_core::errors::{end_of_stream_error, format_error, Error, Result};
use sigil_core::event::{CallbackSet, EventData, EventHandler, OutputType};
use sigil_core::input::Input;

use crate::meta::{parse_samplerate, Metadata};

/// The metadata section carrying the capture device description.
const DEVICE_SECTION: &str = "device 1";

/// Read one archive entry in full, or `None` when the entry does not exist.
fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Option<Vec<u8>>> {
    match archive.by_name(name) {
        Ok(mut entry) => {
            let mut buf = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut buf)?;
            Ok(Some(buf))
        }
        Err(ZipError::FileNotFound) => Ok(None),
        Err(ZipError::Io(err)) => Err(Error::Io(err)),
        Err(_) => format_error("corrupt session archive"),
    }
}

/// `SrZipInput` reads samples out of a sigrok session archive.
///
/// Version 1 archives and single-part version 2 archives carry their logic payload in one
/// `logic-1` entry, held in memory. Multi-part version 2 archives are read part by part on
/// demand. Analog channels, when present, are interleaved per sample from their own chunked
/// entries.
pub struct SrZipInput<R: Read + Seek> {
    archive: ZipArchive<R>,
    samplerate: u64,
    unitsize: usize,
    logic_channels: Vec<String>,
    analog_channels: Vec<String>,
    /// Global channel numbers of the analog channels, used in chunk entry names.
    analog_nums: Vec<u64>,
    /// Sparse probe layouts are compacted: raw bit -> output bit. `None` when the layout is
    /// already dense.
    compaction: Option<Vec<(u32, u32)>>,

    /// The current logic chunk.
    data: Vec<u8>,
    single_part: bool,
    /// Sample number at which the current part began.
    file_start: u64,
    /// Next part index to load, 1-based.
    file_index: u32,
    /// Whether `data` holds a loaded chunk yet.
    loaded: bool,

    /// Per-channel analog chunks currently loaded.
    analog_data: Vec<Vec<u8>>,
    /// Sample number at which the loaded analog chunks begin.
    analog_offset: u64,
    /// Length of the loaded analog chunks in samples.
    analog_chunk_len: u64,
    /// Next analog chunk index to load, 1-based.
    analog_index: u32,
    analog_done: bool,

    cursor: i64,
    matched: Vec<bool>,
    last_sample: Option<u64>,
    start_samplenum: u64,
    callbacks: CallbackSet,
}

impl SrZipInput<File> {
    /// Open a session archive from a file path.
    pub fn open<P: AsRef<Path>>(path: P, initial_state: Option<&HashMap<usize, u8>>) -> Result<Self> {
        SrZipInput::new(File::open(path)?, initial_state)
    }
}

impl<R: Read + Seek> SrZipInput<R> {
    /// Read a session archive. `initial_state` seeds the pre-capture level of raw channels so
    /// edge triggers can fire on the very first sample; channels it does not name read low.
    /// Without it, the previous-sample state seeds from the first sample itself.
    pub fn new(reader: R, initial_state: Option<&HashMap<usize, u8>>) -> Result<Self> {
        let mut archive = match ZipArchive::new(reader) {
            Ok(archive) => archive,
            Err(ZipError::Io(err)) => return Err(Error::Io(err)),
            Err(_) => return format_error("not a session archive"),
        };

        let version = match read_entry(&mut archive, "version")? {
            Some(bytes) => String::from_utf8_lossy(&bytes).trim().parse::<u32>().unwrap_or(0),
            None => return format_error("session archive has no version entry"),
        };
        if version != 1 && version != 2 {
            return format_error("unsupported session archive version");
        }

        let meta = match read_entry(&mut archive, "metadata")? {
            Some(bytes) => Metadata::parse(&String::from_utf8_lossy(&bytes)),
            None => return format_error("session archive has no metadata entry"),
        };

        let samplerate =
            meta.get(DEVICE_SECTION, "samplerate").map_or(0, parse_samplerate);

        let unitsize = meta.get_int(DEVICE_SECTION, "unitsize").unwrap_or(1) as usize;
        if !matches!(unitsize, 1 | 2 | 4 | 8) {
            return format_error("unsupported unitsize");
        }

        // Probe entries are 1-based and may be sparse; missing indices shrink the output bit
        // position so the projected sample words stay dense.
        let total_probes =
            meta.get_int(DEVICE_SECTION, "total probes").unwrap_or(8 * unitsize as u64);
        let mut logic_channels = Vec::new();
        let mut compaction = Vec::new();
        for probe in 1..=total_probes {
            if let Some(name) = meta.get(DEVICE_SECTION, &format!("probe{}", probe)) {
                compaction.push(((probe - 1) as u32, logic_channels.len() as u32));
                logic_channels.push(name.to_string());
            }
        }
        let dense = compaction.iter().all(|&(raw, out)| raw == out);
        let compaction = if dense { None } else { Some(compaction) };

        let total_analog = meta.get_int(DEVICE_SECTION, "total analog").unwrap_or(0);
        let mut analog_channels = Vec::new();
        let mut analog_nums = Vec::new();
        for num in 1..=(total_probes + total_analog) {
            if let Some(name) = meta.get(DEVICE_SECTION, &format!("analog{}", num)) {
                analog_channels.push(name.to_string());
                analog_nums.push(num);
            }
        }

        // A single `logic-1` entry holds the whole capture; otherwise parts are loaded lazily.
        let (data, single_part) = match read_entry(&mut archive, "logic-1")? {
            Some(data) => (data, true),
            None => (Vec::new(), false),
        };

        let last_sample = initial_state.map(|state| {
            state.iter().fold(0u64, |word, (&channel, &level)| {
                word | (u64::from(level & 1) << channel)
            })
        });

        info!(
            "session archive: version {}, {} logic / {} analog channel(s), {} Hz",
            version,
            logic_channels.len(),
            analog_channels.len(),
            samplerate
        );

        Ok(SrZipInput {
            archive,
            samplerate,
            unitsize,
            logic_channels,
            analog_channels,
            analog_nums,
            compaction,
            data,
            single_part,
            file_start: 0,
            file_index: 1,
            loaded: single_part,
            analog_data: Vec::new(),
            analog_offset: 0,
            analog_chunk_len: 0,
            analog_index: 1,
            analog_done: false,
            cursor: -1,
            matched: Vec::new(),
            last_sample,
            start_samplenum: 0,
            callbacks: CallbackSet::new(),
        })
    }

    /// The width of one sample word in bytes.
    pub fn unitsize(&self) -> usize {
        self.unitsize
    }

    /// Fetch the raw sample word at `pos`, faulting in the next logic part when the current one
    /// is exhausted. Fails with end-of-stream past the capture.
    fn fetch(&mut self, pos: u64) -> Result<u64> {
        let rel = if self.single_part {
            pos
        }
        else {
            let mut rel = pos - self.file_start;
            if !self.loaded || (rel as usize + 1) * self.unitsize > self.data.len() {
                let name = format!("logic-1-{}", self.file_index);
                match read_entry(&mut self.archive, &name)? {
                    Some(data) => {
                        debug!("loaded {} ({} bytes)", name, data.len());
                        self.data = data;
                        self.file_start = pos;
                        self.file_index += 1;
                        self.loaded = true;
                        rel = 0;
                    }
                    None => return end_of_stream_error(),
                }
            }
            rel
        };

        let offset = rel as usize * self.unitsize;
        if offset + self.unitsize > self.data.len() {
            return end_of_stream_error();
        }

        Ok(LittleEndian::read_uint(&self.data[offset..offset + self.unitsize], self.unitsize))
    }

    /// Move raw bits into their compacted output positions.
    fn compact(&self, word: u64) -> u64 {
        match self.compaction {
            None => word,
            Some(ref mapping) => mapping.iter().fold(0, |out, &(raw, bit)| {
                out | (((word >> raw) & 1) << bit)
            }),
        }
    }

    /// The analog values at `pos`, or `None` once the analog chunks are exhausted.
    fn analog_values(&mut self, pos: u64) -> Result<Option<Vec<f32>>> {
        if self.analog_done {
            return Ok(None);
        }

        if self.analog_data.is_empty() || pos >= self.analog_offset + self.analog_chunk_len {
            let mut chunks = Vec::with_capacity(self.analog_nums.len());
            for &num in &self.analog_nums {
                let name = format!("analog-1-{}-{}", num, self.analog_index);
                match read_entry(&mut self.archive, &name)? {
                    Some(chunk) => chunks.push(chunk),
                    None => {
                        debug!("analog chunks exhausted at {}", name);
                        self.analog_done = true;
                        return Ok(None);
                    }
                }
            }
            self.analog_offset += self.analog_chunk_len;
            self.analog_chunk_len = chunks.first().map_or(0, |chunk| chunk.len() as u64 / 4);
            self.analog_data = chunks;
            self.analog_index += 1;
        }

        let rel = (pos - self.analog_offset) as usize * 4;
        let mut values = Vec::with_capacity(self.analog_data.len());
        for chunk in &self.analog_data {
            if rel + 4 > chunk.len() {
                self.analog_done = true;
                return Ok(None);
            }
            values.push(LittleEndian::read_f32(&chunk[rel..rel + 4]));
        }
        Ok(Some(values))
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

impl<R: Read + Seek> Input for SrZipInput<R> {
    fn id(&self) -> &str {
        "srzip"
    }

    fn samplerate(&self) -> u64 {
        self.samplerate
    }

    fn logic_channels(&self) -> &[String] {
        &self.logic_channels
    }

    fn analog_channels(&self) -> &[String] {
        &self.analog_channels
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
        // An empty condition list advances exactly one sample; `matched` keeps length 1.
        let mut work = if conds.is_empty() { vec![Cond::Skip(0)] } else { conds.to_vec() };

        self.matched.clear();
        self.matched.resize(work.len(), false);

        loop {
            let pos = (self.cursor + 1) as u64;

            let word = match self.fetch(pos) {
                Ok(word) => self.compact(word),
                Err(Error::EndOfStream) => {
                    // Flush the trailing run before signalling exhaustion; the cursor stays on
                    // the last delivered sample.
                    self.put_run(pos)?;
                    return end_of_stream_error();
                }
                Err(err) => return Err(err),
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

            if !self.analog_nums.is_empty() && self.callbacks.wants(OutputType::Python) {
                if let Some(values) = self.analog_values(pos)? {
                    self.callbacks.dispatch(
                        OutputType::Python,
                        &[],
                        &[],
                        pos,
                        pos + 1,
                        &EventData::Analog(values),
                    )?;
                }
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
    use std::collections::HashMap;
    use std::io::{Cursor, Write};
    use std::rc::Rc;

    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    use sigil_core::cond::Cond;
    use sigil_core::errors::Error;
    use sigil_core::event::{EventData, OutputType};
    use sigil_core::input::Input;

    use super::SrZipInput;

    fn archive(entries: &[(&str, &[u8])]) -> Cursor<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for &(name, bytes) in entries {
            writer.start_file(name, options).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap()
    }

    fn device_meta(extra: &str) -> Vec<u8> {
        format!(
            "[device 1]\nsamplerate = 20 MHz\nunitsize = 1\ntotal probes = 8\nprobe1 = D0\n\
             probe2 = D1\nprobe3 = D2\nprobe4 = D3\nprobe5 = D4\nprobe6 = D5\nprobe7 = D6\n\
             probe8 = D7\n{}",
            extra
        )
        .into_bytes()
    }

    fn framing_input() -> SrZipInput<Cursor<Vec<u8>>> {
        let meta = device_meta("");
        let cursor = archive(&[
            ("version", b"2"),
            ("metadata", &meta),
            ("logic-1", &[0xFF, 0x00, 0xFF, 0xFF, 0x7E, 0x7E, 0xFF]),
        ]);
        SrZipInput::new(cursor, None).unwrap()
    }

    #[test]
    fn verify_single_part_edges() {
        let mut input = framing_input();
        assert_eq!(input.samplerate(), 20_000_000);

        let word = input.wait(&[Cond::falling(0)]).unwrap();
        assert_eq!(input.samplenum(), 1);
        assert_eq!(input.matched(), [true]);
        assert_eq!(word & 1, 0);

        let word = input.wait(&[Cond::rising(0)]).unwrap();
        assert_eq!(input.samplenum(), 2);
        assert_eq!(word & 1, 1);

        input.wait(&[Cond::rising(0)]).unwrap();
        assert_eq!(input.samplenum(), 6);
    }

    #[test]
    fn verify_skip_semantics() {
        let mut input = framing_input();

        input.wait(&[Cond::skip(3)]).unwrap();
        assert_eq!(input.samplenum(), 2);

        input.wait(&[Cond::skip(1)]).unwrap();
        assert_eq!(input.samplenum(), 3);
    }

    #[test]
    fn verify_multi_part_exhaustion() {
        let meta = device_meta("");
        let cursor = archive(&[
            ("version", b"2"),
            ("metadata", &meta),
            ("logic-1-1", &[0, 1, 0, 1]),
        ]);
        let mut input = SrZipInput::new(cursor, None).unwrap();

        let log = Rc::new(RefCell::new(Vec::new()));
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

        for (samplenum, word) in [0u64, 1, 0, 1].iter().enumerate() {
            assert_eq!(input.wait(&[]).unwrap(), *word);
            assert_eq!(input.samplenum(), samplenum as u64);
        }

        // The missing logic-1-2 part ends the stream, after a terminal run-length event.
        assert!(matches!(input.wait(&[]), Err(Error::EndOfStream)));
        assert_eq!(log.borrow().last(), Some(&(3, 4, 1)));
        assert_eq!(*log.borrow(), [(0, 1, 0), (1, 2, 1), (2, 3, 0), (3, 4, 1)]);
    }

    #[test]
    fn verify_sparse_probe_compaction() {
        // probe2 is missing: raw bit 2 compacts down to output bit 1.
        let meta = b"[device 1]\nunitsize = 1\ntotal probes = 3\nprobe1 = A\nprobe3 = C\n";
        let cursor =
            archive(&[("version", b"2"), ("metadata", meta), ("logic-1", &[0b0000_0101])]);
        let mut input = SrZipInput::new(cursor, None).unwrap();

        assert_eq!(input.logic_channels(), ["A", "C"]);
        assert_eq!(input.wait(&[]).unwrap(), 0b11);
    }

    #[test]
    fn verify_wide_sample_words() {
        let meta = b"[device 1]\nunitsize = 2\ntotal probes = 16\nprobe1 = D0\nprobe2 = D1\n\
             probe3 = D2\nprobe4 = D3\nprobe5 = D4\nprobe6 = D5\nprobe7 = D6\nprobe8 = D7\n\
             probe9 = D8\nprobe10 = D9\nprobe11 = D10\nprobe12 = D11\nprobe13 = D12\n\
             probe14 = D13\nprobe15 = D14\nprobe16 = D15\n";
        let cursor =
            archive(&[("version", b"2"), ("metadata", meta), ("logic-1", &[0x34, 0x12])]);
        let mut input = SrZipInput::new(cursor, None).unwrap();

        assert_eq!(input.wait(&[]).unwrap(), 0x1234);
        assert!(matches!(input.wait(&[]), Err(Error::EndOfStream)));
    }

    #[test]
    fn verify_initial_state_seeds_edges() {
        let meta = device_meta("");
        let entries: [(&str, &[u8]); 3] =
            [("version", b"2"), ("metadata", &meta), ("logic-1", &[0x00, 0x00])];

        // With channel 0 seeded high, the low first sample is a falling edge.
        let initial: HashMap<usize, u8> = HashMap::from([(0, 1)]);
        let mut input = SrZipInput::new(archive(&entries), Some(&initial)).unwrap();
        input.wait(&[Cond::falling(0)]).unwrap();
        assert_eq!(input.samplenum(), 0);

        // Without it, the previous state seeds from the first sample and no edge ever fires.
        let mut input = SrZipInput::new(archive(&entries), None).unwrap();
        assert!(matches!(input.wait(&[Cond::falling(0)]), Err(Error::EndOfStream)));
    }

    #[test]
    fn verify_analog_interleave() {
        let meta = device_meta("total analog = 1\nanalog9 = A0\n");
        let mut floats = Vec::new();
        for value in [0.0f32, 0.5, 1.0, 1.5] {
            floats.extend_from_slice(&value.to_le_bytes());
        }
        let cursor = archive(&[
            ("version", b"2"),
            ("metadata", &meta),
            ("logic-1", &[0, 0, 0, 0]),
            ("analog-1-9-1", &floats),
        ]);
        let mut input = SrZipInput::new(cursor, None).unwrap();
        assert_eq!(input.analog_channels(), ["A0"]);

        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let log = log.clone();
            input.add_callback(
                OutputType::Python,
                Vec::new(),
                Box::new(move |start, _end, data| {
                    if let EventData::Analog(ref values) = *data {
                        log.borrow_mut().push((start, values.clone()));
                    }
                    Ok(())
                }),
            );
        }

        while input.wait(&[]).is_ok() {}

        assert_eq!(
            *log.borrow(),
            [(0, vec![0.0]), (1, vec![0.5]), (2, vec![1.0]), (3, vec![1.5])]
        );
    }

    #[test]
    fn verify_format_errors() {
        let meta = device_meta("");

        // Version entry is mandatory.
        let cursor = archive(&[("metadata", &meta)]);
        assert!(matches!(SrZipInput::new(cursor, None), Err(Error::Format(_))));

        // Word widths other than 1, 2, 4, and 8 bytes are unsupported.
        let bad = b"[device 1]\nunitsize = 3\ntotal probes = 1\nprobe1 = D0\n";
        let cursor = archive(&[("version", b"2"), ("metadata", bad)]);
        assert!(matches!(SrZipInput::new(cursor, None), Err(Error::Format(_))));
    }
}

