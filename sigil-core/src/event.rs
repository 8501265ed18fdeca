// Sigil
// Copyright (c) 2026 The Project Sigil Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `event` module defines the event streams flowing between pipeline stages.
//!
//! Every stage fans its events out through a [`CallbackSet`]: a per-[`OutputType`] list of
//! handlers, each with an optional set of name filters. Sample sources emit synthesized
//! [`EventData::Logic`] and [`EventData::Analog`] events on the [`OutputType::Python`] stream;
//! decoders emit annotations, binary tracks, and structured data for stacked decoders.

use std::collections::HashMap;
use std::fmt;

use log::debug;

use crate::errors::Result;

/// The output stream a stage event is emitted on.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum OutputType {
    /// Human-readable annotations.
    Ann,
    /// The canonical inter-stage stream: sample events from sources and decoder-defined data
    /// for stacked decoders.
    Python,
    /// Raw binary tracks.
    Binary,
    /// Re-encoded logic levels.
    Logic,
    /// Stream metadata updates.
    Meta,
}

/// A self-describing value passed between stacked decoders.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// A binary buffer.
    Binary(Box<[u8]>),
    /// A boolean value.
    Boolean(bool),
    /// A floating point number.
    Float(f64),
    /// A signed integer.
    SignedInt(i64),
    /// A string.
    String(String),
    /// An unsigned integer.
    UnsignedInt(u64),
    /// A nested list of values.
    List(Vec<Value>),
}

macro_rules! impl_from_for_value {
    ($value:ident, $from:ty, $conv:expr) => {
        impl From<$from> for Value {
            fn from($value: $from) -> Self {
                $conv
            }
        }
    };
}

impl_from_for_value!(v, &[u8], Value::Binary(Box::from(v)));
impl_from_for_value!(v, bool, Value::Boolean(v));
impl_from_for_value!(v, f64, Value::Float(v));
impl_from_for_value!(v, i64, Value::SignedInt(v));
impl_from_for_value!(v, &str, Value::String(v.to_string()));
impl_from_for_value!(v, String, Value::String(v));
impl_from_for_value!(v, u64, Value::UnsignedInt(v));
impl_from_for_value!(v, Vec<Value>, Value::List(v));

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Value::Binary(ref bytes) => {
                for byte in bytes.iter() {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Float(float) => write!(f, "{}", float),
            Value::SignedInt(int) => write!(f, "{}", int),
            Value::String(ref s) => f.write_str(s),
            Value::UnsignedInt(uint) => write!(f, "{}", uint),
            Value::List(ref items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// The payload of a single stage event, spanning the half-open sample range `[start, end)` it
/// was emitted with.
#[derive(Clone, Debug, PartialEq)]
pub enum EventData {
    /// A run of identical sample words over the event's span.
    Logic(u64),
    /// One value per analog channel at a single sample.
    Analog(Vec<f32>),
    /// An annotation: class index into the emitting decoder's annotation table, plus texts in
    /// decreasing order of verbosity.
    Ann(usize, Vec<String>),
    /// A binary track datum: track index into the emitting decoder's track table, plus bytes.
    Binary(usize, Vec<u8>),
    /// A decoder-defined structured payload for stacked decoders.
    Data(Vec<Value>),
}

/// An event handler. Receives the span `[start, end)` and the payload.
pub type EventHandler = Box<dyn FnMut(u64, u64, &EventData) -> Result<()>>;

struct Callback {
    /// Annotation class or binary track names this handler wants. Empty matches everything.
    filters: Vec<String>,
    handler: EventHandler,
}

/// A per-stage registry of event handlers, keyed by output type.
#[derive(Default)]
pub struct CallbackSet {
    callbacks: HashMap<OutputType, Vec<Callback>>,
}

impl CallbackSet {
    pub fn new() -> CallbackSet {
        CallbackSet { callbacks: HashMap::new() }
    }

    /// Register a handler for one output type. `filters` names the annotation classes or binary
    /// tracks the handler should see; an empty set delivers everything.
    pub fn add(&mut self, output: OutputType, filters: Vec<String>, handler: EventHandler) {
        self.callbacks.entry(output).or_default().push(Callback { filters, handler });
    }

    /// True when at least one handler is registered for the output type.
    pub fn wants(&self, output: OutputType) -> bool {
        self.callbacks.get(&output).map_or(false, |cbs| !cbs.is_empty())
    }

    /// Fan one event out to every registered handler, applying name filters for annotation and
    /// binary events against the emitting stage's declaration tables.
    pub fn dispatch(
        &mut self,
        output: OutputType,
        annotations: &[(&str, &str)],
        binary: &[(&str, &str)],
        start: u64,
        end: u64,
        data: &EventData,
    ) -> Result<()> {
        let callbacks = match self.callbacks.get_mut(&output) {
            Some(callbacks) => callbacks,
            None => return Ok(()),
        };

        // Resolve the class name the filters are matched against. An out-of-table index is a
        // decoder bug; the event is dropped rather than mis-delivered.
        let name = match *data {
            EventData::Ann(class, _) if output == OutputType::Ann => {
                match annotations.get(class) {
                    Some(&(name, _)) => Some(name),
                    None => {
                        debug!("annotation class {} not declared, event dropped", class);
                        return Ok(());
                    }
                }
            }
            EventData::Binary(track, _) if output == OutputType::Binary => {
                match binary.get(track) {
                    Some(&(name, _)) => Some(name),
                    None => {
                        debug!("binary track {} not declared, event dropped", track);
                        return Ok(());
                    }
                }
            }
            _ => None,
        };

        for cb in callbacks.iter_mut() {
            if !cb.filters.is_empty() {
                match name {
                    Some(name) if cb.filters.iter().any(|f| f == name) => (),
                    _ => continue,
                }
            }
            (cb.handler)(start, end, data)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::{CallbackSet, EventData, OutputType};

    fn recorder(log: &Rc<RefCell<Vec<(u64, u64, EventData)>>>) -> super::EventHandler {
        let log = log.clone();
        Box::new(move |start, end, data| {
            log.borrow_mut().push((start, end, data.clone()));
            Ok(())
        })
    }

    #[test]
    fn verify_dispatch_by_output_type() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut set = CallbackSet::new();
        set.add(OutputType::Python, Vec::new(), recorder(&log));

        set.dispatch(OutputType::Python, &[], &[], 0, 4, &EventData::Logic(1)).unwrap();
        set.dispatch(OutputType::Ann, &[], &[], 4, 5, &EventData::Ann(0, vec![])).unwrap();

        assert_eq!(*log.borrow(), [(0, 4, EventData::Logic(1))]);
    }

    #[test]
    fn verify_annotation_filters() {
        let annotations = [("start", "Start bit"), ("data", "Data bit")];
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut set = CallbackSet::new();
        set.add(OutputType::Ann, vec!["start".to_string()], recorder(&log));

        set.dispatch(OutputType::Ann, &annotations, &[], 0, 1, &EventData::Ann(1, vec![]))
            .unwrap();
        set.dispatch(OutputType::Ann, &annotations, &[], 1, 2, &EventData::Ann(0, vec![]))
            .unwrap();
        // Out-of-table class indices are dropped outright.
        set.dispatch(OutputType::Ann, &annotations, &[], 2, 3, &EventData::Ann(7, vec![]))
            .unwrap();

        assert_eq!(*log.borrow(), [(1, 2, EventData::Ann(0, vec![]))]);
    }

    #[test]
    fn verify_empty_filter_matches_all() {
        let annotations = [("start", "Start bit")];
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut set = CallbackSet::new();
        set.add(OutputType::Ann, Vec::new(), recorder(&log));

        set.dispatch(OutputType::Ann, &annotations, &[], 0, 1, &EventData::Ann(0, vec![]))
            .unwrap();

        assert_eq!(log.borrow().len(), 1);
    }
}
