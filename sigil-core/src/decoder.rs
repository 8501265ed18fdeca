// Sigil
// Copyright (c) 2026 The Project Sigil Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `decoder` module provides the traits and support structures necessary to implement
//! protocol decoders.
//!
//! A decoder advertises itself through a static [`DecoderDescriptor`]: its identifier, the
//! channels it needs, the options it takes, and the annotation and binary streams it produces.
//! At runtime every decoder embeds a [`DecoderBase`] carrying the state the pipeline wires up:
//! the channel binding, the option values, the output callbacks, and the attached sample
//! source. The head decoder of a chain pulls samples through [`DecoderBase::wait`]; stacked
//! decoders consume the upstream decoder's events through [`Decoder::decode_event`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::cond::Cond;
use crate::errors::{config_error, Error, Result};
use crate::event::{CallbackSet, EventData, EventHandler, OutputType};
use crate::input::Input;

/// A key for stream metadata delivered to a stage before decoding starts.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MetaKey {
    /// The capture sample rate in Hz.
    Samplerate,
}

/// A channel declared by a decoder.
#[derive(Copy, Clone, Debug)]
pub struct ChannelDesc {
    /// A short ASCII identifier, unique within the decoder, used in bindings.
    pub id: &'static str,
    /// A display name.
    pub name: &'static str,
    /// A longer description.
    pub desc: &'static str,
}

/// The typed default of a decoder option. The default's type decides how user-provided string
/// values are coerced.
#[derive(Copy, Clone, Debug)]
pub enum OptionDefault {
    Int(i64),
    Float(f64),
    Str(&'static str),
}

/// A decoder option value.
#[derive(Clone, Debug, PartialEq)]
pub enum OptionValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl OptionDefault {
    /// The default as a runtime value.
    pub fn value(&self) -> OptionValue {
        match *self {
            OptionDefault::Int(int) => OptionValue::Int(int),
            OptionDefault::Float(float) => OptionValue::Float(float),
            OptionDefault::Str(s) => OptionValue::Str(s.to_string()),
        }
    }

    /// Coerce a user-provided string to the default's type.
    pub fn coerce(&self, raw: &str) -> Result<OptionValue> {
        match *self {
            OptionDefault::Int(_) => match raw.parse::<i64>() {
                Ok(int) => Ok(OptionValue::Int(int)),
                Err(_) => config_error(format!("expected an integer option value, got {}", raw)),
            },
            OptionDefault::Float(_) => match raw.parse::<f64>() {
                Ok(float) => Ok(OptionValue::Float(float)),
                Err(_) => config_error(format!("expected a numeric option value, got {}", raw)),
            },
            OptionDefault::Str(_) => Ok(OptionValue::Str(raw.to_string())),
        }
    }
}

/// An option declared by a decoder.
#[derive(Copy, Clone, Debug)]
pub struct OptionDesc {
    pub id: &'static str,
    pub desc: &'static str,
    pub default: OptionDefault,
    /// Permitted values for string options; empty when unconstrained.
    pub values: &'static [&'static str],
}

/// A display row grouping annotation classes.
#[derive(Copy, Clone, Debug)]
pub struct AnnRow {
    pub id: &'static str,
    pub name: &'static str,
    pub classes: &'static [usize],
}

/// `DecoderDescriptor` stores the static description of a single protocol decoder. The
/// registry instantiates decoders through the descriptor's factory function.
#[derive(Copy, Clone)]
pub struct DecoderDescriptor {
    /// A short ASCII-only identifier, e.g. `uart`.
    pub id: &'static str,
    /// A display name.
    pub name: &'static str,
    /// A longer, more descriptive name.
    pub longname: &'static str,
    /// A one-line description.
    pub desc: &'static str,
    /// Required channels, in declared order.
    pub channels: &'static [ChannelDesc],
    /// Optional channels, following the required channels in declared order.
    pub optional_channels: &'static [ChannelDesc],
    /// Declared options with typed defaults.
    pub options: &'static [OptionDesc],
    /// Annotation classes as (id, description) pairs.
    pub annotations: &'static [(&'static str, &'static str)],
    /// Display rows grouping annotation classes.
    pub annotation_rows: &'static [AnnRow],
    /// Binary tracks as (id, description) pairs.
    pub binary: &'static [(&'static str, &'static str)],
    /// An instantiation function for the decoder.
    pub factory: fn() -> Box<dyn Decoder>,
}

impl DecoderDescriptor {
    /// Total number of declared channels, required and optional.
    pub fn num_channels(&self) -> usize {
        self.channels.len() + self.optional_channels.len()
    }

    /// The declared bit position of a channel id, searching required then optional channels.
    pub fn channel_index(&self, id: &str) -> Option<usize> {
        self.channels.iter().chain(self.optional_channels.iter()).position(|c| c.id == id)
    }
}

/// `DecoderBase` carries the per-instance state every decoder embeds: the channel binding, the
/// merged option values, the registered output callbacks, and the attached sample source.
pub struct DecoderBase {
    desc: &'static DecoderDescriptor,
    input: Option<Rc<RefCell<dyn Input>>>,
    callbacks: CallbackSet,
    /// Declared channel bit -> raw source channel bit.
    channel_map: HashMap<usize, usize>,
    /// True while every binding maps a declared bit onto the same raw bit, enabling the
    /// condition-rewrite fast path.
    one_to_one: bool,
    options: HashMap<String, OptionValue>,
}

impl DecoderBase {
    pub fn new(desc: &'static DecoderDescriptor) -> DecoderBase {
        DecoderBase {
            desc,
            input: None,
            callbacks: CallbackSet::new(),
            channel_map: HashMap::new(),
            one_to_one: true,
            options: HashMap::new(),
        }
    }

    pub fn descriptor(&self) -> &'static DecoderDescriptor {
        self.desc
    }

    /// Attach the sample source this decoder pulls from. Done by the pipeline for the head
    /// stage only.
    pub fn attach(&mut self, input: Rc<RefCell<dyn Input>>) {
        self.input = Some(input);
    }

    /// Bind the declared channel `id` to a raw source channel index. Unknown ids are ignored;
    /// the channel simply stays unbound and [`has_channel`][Self::has_channel] reports false.
    pub fn set_channelnum(&mut self, id: &str, channelnum: usize) {
        if let Some(declared) = self.desc.channel_index(id) {
            self.channel_map.insert(declared, channelnum);
            self.one_to_one = self.one_to_one && declared == channelnum;
        }
    }

    /// True when the declared channel bit has a binding.
    pub fn has_channel(&self, declared: usize) -> bool {
        self.channel_map.contains_key(&declared)
    }

    /// Register an event handler on one of this decoder's output streams.
    pub fn add_callback(&mut self, output: OutputType, filters: Vec<String>, handler: EventHandler) {
        self.callbacks.add(output, filters, handler);
    }

    /// Replace the option map. Done by the pipeline with declared defaults overlaid with
    /// coerced user values.
    pub fn set_options(&mut self, options: HashMap<String, OptionValue>) {
        self.options = options;
    }

    /// An integer option value.
    pub fn opt_int(&self, id: &str) -> Result<i64> {
        match self.options.get(id) {
            Some(&OptionValue::Int(int)) => Ok(int),
            _ => config_error(format!("missing integer option: {}", id)),
        }
    }

    /// A float option value. Integer values widen.
    pub fn opt_float(&self, id: &str) -> Result<f64> {
        match self.options.get(id) {
            Some(&OptionValue::Float(float)) => Ok(float),
            Some(&OptionValue::Int(int)) => Ok(int as f64),
            _ => config_error(format!("missing numeric option: {}", id)),
        }
    }

    /// A string option value.
    pub fn opt_str(&self, id: &str) -> Result<&str> {
        match self.options.get(id) {
            Some(OptionValue::Str(s)) => Ok(s),
            _ => config_error(format!("missing string option: {}", id)),
        }
    }

    /// The sample number of the attached source's cursor. Reads 0 when unattached.
    pub fn samplenum(&self) -> u64 {
        self.input.as_ref().map_or(0, |input| input.borrow().samplenum())
    }

    /// Per-condition outcomes of the most recent `wait`.
    pub fn matched(&self) -> Vec<bool> {
        self.input.as_ref().map_or(Vec::new(), |input| input.borrow().matched().to_vec())
    }

    /// Advance the attached source to the next sample matching one of `conds` and project the
    /// raw sample word onto the declared channels. Bound positions carry the bit value, unbound
    /// positions `None`.
    ///
    /// Channel-keyed conditions are rewritten from declared to raw bit positions unless every
    /// binding is one-to-one; skips pass through verbatim.
    pub fn wait(&mut self, conds: &[Cond]) -> Result<Vec<Option<u8>>> {
        let input = match self.input {
            Some(ref input) => input.clone(),
            None => return config_error("decoder has no attached sample source"),
        };

        let word = if self.one_to_one {
            input.borrow_mut().wait(conds)?
        }
        else {
            let mut remapped = Vec::with_capacity(conds.len());
            for cond in conds {
                remapped.push(self.remap_cond(cond)?);
            }
            input.borrow_mut().wait(&remapped)?
        };

        let mut pins = vec![None; self.desc.num_channels()];
        for (&declared, &raw) in &self.channel_map {
            pins[declared] = Some(((word >> raw) & 1) as u8);
        }
        Ok(pins)
    }

    fn remap_cond(&self, cond: &Cond) -> Result<Cond> {
        match *cond {
            Cond::Skip(n) => Ok(Cond::Skip(n)),
            Cond::Match(ref entries) => {
                let mut mapped = Vec::with_capacity(entries.len());
                for &(declared, trigger) in entries {
                    match self.channel_map.get(&declared) {
                        Some(&raw) => mapped.push((raw, trigger)),
                        None => {
                            return config_error(format!(
                                "wait condition names unbound channel {}",
                                declared
                            ));
                        }
                    }
                }
                Ok(Cond::Match(mapped))
            }
        }
    }

    /// Emit one event over `[start, end)` on the given output stream, fanning it out to the
    /// registered callbacks with annotation/binary name filtering applied.
    pub fn put(&mut self, start: u64, end: u64, output: OutputType, data: &EventData) -> Result<()> {
        self.callbacks.dispatch(output, self.desc.annotations, self.desc.binary, start, end, data)
    }
}

/// A `Decoder` consumes samples, or the events of an upstream decoder, and produces annotation,
/// binary, and inter-stage data events.
///
/// The head of a chain implements [`decode`][Decoder::decode], a loop pulling samples through
/// the embedded base until end-of-stream. Stacked decoders implement
/// [`decode_event`][Decoder::decode_event] instead and are invoked once per upstream event.
pub trait Decoder {
    fn descriptor(&self) -> &'static DecoderDescriptor;

    fn base(&self) -> &DecoderBase;

    fn base_mut(&mut self) -> &mut DecoderBase;

    /// Reset all decoding state. Called before every run.
    fn reset(&mut self) {}

    /// Decoding is about to begin.
    fn start(&mut self) {}

    /// Decoding finished.
    fn stop(&mut self) {}

    /// Receive one stream metadata value, e.g. the sample rate.
    fn metadata(&mut self, _key: MetaKey, _value: u64) {}

    /// Pull samples from the attached source until end-of-stream. Head-of-chain entry point.
    fn decode(&mut self) -> Result<()> {
        Ok(())
    }

    /// Consume one event from the upstream decoder. Stacked entry point.
    fn decode_event(&mut self, _start: u64, _end: u64, _data: &EventData) -> Result<()> {
        Ok(())
    }

    /// Attach `input` and decode until the source is exhausted; end-of-stream is normal
    /// termination.
    fn run(&mut self, input: Rc<RefCell<dyn Input>>) -> Result<()> {
        self.base_mut().attach(input);
        match self.decode() {
            Err(Error::EndOfStream) => Ok(()),
            result => result,
        }
    }
}

/// A `DecoderRegistry` allows the registration of decoders, and provides methods to look
/// descriptors up by id and to instantiate decoders.
#[derive(Default)]
pub struct DecoderRegistry {
    decoders: HashMap<&'static str, &'static DecoderDescriptor>,
}

impl DecoderRegistry {
    /// Instantiate a new `DecoderRegistry`.
    pub fn new() -> DecoderRegistry {
        DecoderRegistry { decoders: HashMap::new() }
    }

    /// Register a single decoder. If the id was previously registered it is replaced.
    pub fn register(&mut self, descriptor: &'static DecoderDescriptor) {
        self.decoders.insert(descriptor.id, descriptor);
    }

    /// Gets the descriptor for a registered decoder id.
    pub fn get(&self, id: &str) -> Option<&'static DecoderDescriptor> {
        self.decoders.get(id).copied()
    }

    /// Instantiate the decoder registered under `id`.
    pub fn make(&self, id: &str) -> Result<Box<dyn Decoder>> {
        match self.get(id) {
            Some(descriptor) => Ok((descriptor.factory)()),
            None => config_error(format!("unknown decoder id: {}", id)),
        }
    }

    /// Iterate all registered descriptors.
    pub fn iter(&self) -> impl Iterator<Item = &'static DecoderDescriptor> + '_ {
        self.decoders.values().copied()
    }
}
