// Sigil
// Copyright (c) 2026 The Project Sigil Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `pipeline` module builds and runs a linear chain of decoder stages.
//!
//! The runner wires the chain back-to-front: the user-selected output type and filters apply to
//! the terminal stage only, every earlier stage feeds its successor over the canonical
//! [`Python`][OutputType::Python] stream, and the sink additionally observes the sample
//! source's synthesized events. Control flow is top-to-bottom and strictly synchronous: the
//! head stage's `decode()` loop pulls samples, and each `put()` re-enters the downstream stages
//! through their registered callbacks before returning.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, info};

use crate::cond::Cond;
use crate::decoder::{Decoder, DecoderDescriptor, DecoderRegistry, MetaKey, OptionValue};
use crate::errors::{config_error, Error, Result};
use crate::event::OutputType;
use crate::input::Input;
use crate::output::OutputSink;

/// The specification of one decoder stage: the decoder id, raw option values, and the channel
/// binding from declared channel ids to raw source channel indices.
#[derive(Clone, Debug, Default)]
pub struct StageSpec {
    pub id: String,
    pub options: Vec<(String, String)>,
    pub channels: Vec<(String, usize)>,
}

impl StageSpec {
    pub fn new(id: &str) -> StageSpec {
        StageSpec { id: id.to_string(), options: Vec::new(), channels: Vec::new() }
    }

    /// A stage with a single channel binding.
    pub fn with_channel(id: &str, channel: &str, channelnum: usize) -> StageSpec {
        let mut spec = StageSpec::new(id);
        spec.channels.push((channel.to_string(), channelnum));
        spec
    }
}

/// Merge a stage's user-provided options over the decoder's declared defaults, coercing each
/// value to the declared type. Unknown option ids are configuration errors.
fn merge_options(
    desc: &'static DecoderDescriptor,
    user: &[(String, String)],
) -> Result<HashMap<String, OptionValue>> {
    let mut options = HashMap::new();
    for opt in desc.options {
        options.insert(opt.id.to_string(), opt.default.value());
    }

    for (id, raw) in user {
        let opt = match desc.options.iter().find(|opt| opt.id == id) {
            Some(opt) => opt,
            None => return config_error(format!("decoder {} has no option {}", desc.id, id)),
        };
        if !opt.values.is_empty() && !opt.values.iter().any(|&v| v == raw.as_str()) {
            return config_error(format!("invalid value {} for option {}", raw, id));
        }
        options.insert(id.clone(), opt.default.coerce(raw)?);
    }

    Ok(options)
}

/// Pump the source with any-edge conditions over all of its logic channels until it is
/// exhausted. Used when the pipeline has no decoder stages and the sink is driven directly by
/// the source's synthesized events.
fn pump_source(input: &Rc<RefCell<dyn Input>>) -> Result<()> {
    let conds: Vec<Cond> = {
        let input = input.borrow();
        (0..input.logic_channels().len()).map(Cond::edge).collect()
    };

    loop {
        match input.borrow_mut().wait(&conds) {
            Ok(_) => (),
            Err(Error::EndOfStream) => return Ok(()),
            Err(err) => return Err(err),
        }
    }
}

/// Build the decoder chain described by `stages` and run it to end-of-stream.
///
/// The sink observes the source's synthesized sample events and the terminal stage's events of
/// the selected `output_type`, filtered by `output_filters` (empty delivers everything).
pub fn run_decoders(
    registry: &DecoderRegistry,
    input: Rc<RefCell<dyn Input>>,
    output: Rc<RefCell<dyn OutputSink>>,
    stages: &[StageSpec],
    output_type: OutputType,
    output_filters: &[String],
) -> Result<()> {
    // The source's run-length and analog events always reach the sink.
    {
        let sink = output.clone();
        let source_id = input.borrow().id().to_string();
        input.borrow_mut().add_callback(
            OutputType::Python,
            Vec::new(),
            Box::new(move |start, end, data| {
                sink.borrow_mut().output(&source_id, start, end, data)
            }),
        );
    }

    // Build back-to-front so each stage can hook its successor. The user-selected output type
    // and filters bind to the terminal stage; every earlier stage talks to the sink and to its
    // successor over the canonical inter-stage stream.
    let mut chain: Vec<Rc<RefCell<Box<dyn Decoder>>>> = Vec::with_capacity(stages.len());
    let mut next: Option<Rc<RefCell<Box<dyn Decoder>>>> = None;
    let mut cur_type = output_type;
    let mut cur_filters = output_filters.to_vec();

    for spec in stages.iter().rev() {
        let desc = match registry.get(&spec.id) {
            Some(desc) => desc,
            None => return config_error(format!("unknown decoder id: {}", spec.id)),
        };

        let mut decoder = registry.make(&spec.id)?;
        decoder.base_mut().set_options(merge_options(desc, &spec.options)?);
        for (id, channelnum) in &spec.channels {
            decoder.base_mut().set_channelnum(id, *channelnum);
        }

        let cell = Rc::new(RefCell::new(decoder));

        {
            let sink = output.clone();
            let source_id = desc.id.to_string();
            cell.borrow_mut().base_mut().add_callback(
                cur_type,
                cur_filters.clone(),
                Box::new(move |start, end, data| {
                    sink.borrow_mut().output(&source_id, start, end, data)
                }),
            );
        }

        if let Some(downstream) = next.take() {
            cell.borrow_mut().base_mut().add_callback(
                OutputType::Python,
                Vec::new(),
                Box::new(move |start, end, data| {
                    downstream.borrow_mut().decode_event(start, end, data)
                }),
            );
        }

        next = Some(cell.clone());
        chain.insert(0, cell);

        cur_type = OutputType::Python;
        cur_filters = Vec::new();
    }

    for stage in &chain {
        stage.borrow_mut().reset();
    }
    output.borrow_mut().reset();

    let samplerate = input.borrow().samplerate();
    if samplerate > 0 {
        debug!("delivering samplerate {} Hz to the first stage", samplerate);
        match chain.first() {
            Some(first) => first.borrow_mut().metadata(MetaKey::Samplerate, samplerate),
            None => output.borrow_mut().metadata(MetaKey::Samplerate, samplerate),
        }
    }

    output.borrow_mut().start();
    for stage in &chain {
        stage.borrow_mut().start();
    }

    info!("running pipeline with {} decoder stage(s)", chain.len());
    let result = match chain.first() {
        Some(first) => first.borrow_mut().run(input.clone()),
        None => pump_source(&input),
    };

    for stage in &chain {
        stage.borrow_mut().stop();
    }
    output.borrow_mut().stop()?;

    result
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::{run_decoders, StageSpec};
    use crate::cond::Cond;
    use crate::decoder::{
        ChannelDesc, Decoder, DecoderBase, DecoderDescriptor, DecoderRegistry, MetaKey,
        OptionDefault, OptionDesc,
    };
    use crate::errors::Result;
    use crate::event::{EventData, OutputType, Value};
    use crate::input::{BufferInput, Input};
    use crate::output::OutputSink;

    /// A head decoder annotating every edge on its single channel, and republishing the edge
    /// count on the inter-stage stream.
    static EDGES: DecoderDescriptor = DecoderDescriptor {
        id: "edges",
        name: "Edges",
        longname: "Edge annotator",
        desc: "Annotates rising and falling edges.",
        channels: &[ChannelDesc { id: "d", name: "D", desc: "Data line" }],
        optional_channels: &[],
        options: &[OptionDesc {
            id: "polarity",
            desc: "Edge polarity to report",
            default: OptionDefault::Str("both"),
            values: &["both", "rising", "falling"],
        }],
        annotations: &[("rise", "Rising edge"), ("fall", "Falling edge")],
        annotation_rows: &[],
        binary: &[],
        factory: || Box::new(EdgeDecoder::new()),
    };

    struct EdgeDecoder {
        base: DecoderBase,
    }

    impl EdgeDecoder {
        fn new() -> EdgeDecoder {
            EdgeDecoder { base: DecoderBase::new(&EDGES) }
        }
    }

    impl Decoder for EdgeDecoder {
        fn descriptor(&self) -> &'static DecoderDescriptor {
            &EDGES
        }

        fn base(&self) -> &DecoderBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut DecoderBase {
            &mut self.base
        }

        fn decode(&mut self) -> Result<()> {
            let rising_only = self.base.opt_str("polarity")? == "rising";
            let mut count = 0u64;
            loop {
                let pins = self.base.wait(&[Cond::edge(0)])?;
                let samplenum = self.base.samplenum();
                let class = if pins[0] == Some(1) { 0 } else { 1 };
                if rising_only && class != 0 {
                    continue;
                }
                count += 1;
                let text = if class == 0 { "rise" } else { "fall" };
                self.base.put(
                    samplenum,
                    samplenum + 1,
                    OutputType::Ann,
                    &EventData::Ann(class, vec![text.to_string()]),
                )?;
                self.base.put(
                    samplenum,
                    samplenum + 1,
                    OutputType::Python,
                    &EventData::Data(vec![Value::from(count)]),
                )?;
            }
        }
    }

    /// A stacked decoder that annotates every Nth upstream event.
    static EVERY_SECOND: DecoderDescriptor = DecoderDescriptor {
        id: "every2",
        name: "Every second",
        longname: "Every-second event annotator",
        desc: "Annotates every second upstream event.",
        channels: &[],
        optional_channels: &[],
        options: &[],
        annotations: &[("even", "Even event")],
        annotation_rows: &[],
        binary: &[],
        factory: || Box::new(EverySecond::new()),
    };

    struct EverySecond {
        base: DecoderBase,
        seen: u64,
    }

    impl EverySecond {
        fn new() -> EverySecond {
            EverySecond { base: DecoderBase::new(&EVERY_SECOND), seen: 0 }
        }
    }

    impl Decoder for EverySecond {
        fn descriptor(&self) -> &'static DecoderDescriptor {
            &EVERY_SECOND
        }

        fn base(&self) -> &DecoderBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut DecoderBase {
            &mut self.base
        }

        fn reset(&mut self) {
            self.seen = 0;
        }

        fn decode_event(&mut self, start: u64, end: u64, data: &EventData) -> Result<()> {
            if let EventData::Data(_) = data {
                self.seen += 1;
                if self.seen % 2 == 0 {
                    self.base.put(
                        start,
                        end,
                        OutputType::Ann,
                        &EventData::Ann(0, vec![format!("event {}", self.seen)]),
                    )?;
                }
            }
            Ok(())
        }
    }

    /// Records every event and metadata value delivered to the sink.
    struct RecordingSink {
        events: Rc<RefCell<Vec<(String, u64, u64, EventData)>>>,
        meta: Rc<RefCell<Vec<(MetaKey, u64)>>>,
    }

    impl RecordingSink {
        fn new() -> (RecordingSink, Rc<RefCell<Vec<(String, u64, u64, EventData)>>>) {
            let events = Rc::new(RefCell::new(Vec::new()));
            let sink =
                RecordingSink { events: events.clone(), meta: Rc::new(RefCell::new(Vec::new())) };
            (sink, events)
        }
    }

    impl OutputSink for RecordingSink {
        fn metadata(&mut self, key: MetaKey, value: u64) {
            self.meta.borrow_mut().push((key, value));
        }

        fn output(&mut self, source: &str, start: u64, end: u64, data: &EventData) -> Result<()> {
            self.events.borrow_mut().push((source.to_string(), start, end, data.clone()));
            Ok(())
        }
    }

    fn registry() -> DecoderRegistry {
        let mut registry = DecoderRegistry::new();
        registry.register(&EDGES);
        registry.register(&EVERY_SECOND);
        registry
    }

    fn input_over(samples: Vec<u64>) -> Rc<RefCell<dyn Input>> {
        Rc::new(RefCell::new(BufferInput::new(samples, 1_000_000, vec!["D0".to_string()])))
    }

    #[test]
    fn verify_single_stage_annotations() {
        let (sink, events) = RecordingSink::new();
        let stages = [StageSpec::with_channel("edges", "d", 0)];

        run_decoders(
            &registry(),
            input_over(vec![0, 1, 1, 0, 1]),
            Rc::new(RefCell::new(sink)),
            &stages,
            OutputType::Ann,
            &[],
        )
        .unwrap();

        let anns: Vec<_> = events
            .borrow()
            .iter()
            .filter(|(source, ..)| source == "edges")
            .cloned()
            .collect();

        assert_eq!(
            anns,
            [
                ("edges".to_string(), 1, 2, EventData::Ann(0, vec!["rise".to_string()])),
                ("edges".to_string(), 3, 4, EventData::Ann(1, vec!["fall".to_string()])),
                ("edges".to_string(), 4, 5, EventData::Ann(0, vec!["rise".to_string()])),
            ]
        );
    }

    #[test]
    fn verify_annotation_filtering() {
        let (sink, events) = RecordingSink::new();
        let stages = [StageSpec::with_channel("edges", "d", 0)];

        run_decoders(
            &registry(),
            input_over(vec![0, 1, 1, 0, 1]),
            Rc::new(RefCell::new(sink)),
            &stages,
            OutputType::Ann,
            &["fall".to_string()],
        )
        .unwrap();

        let anns: Vec<_> = events
            .borrow()
            .iter()
            .filter(|(source, ..)| source == "edges")
            .cloned()
            .collect();

        assert_eq!(
            anns,
            [("edges".to_string(), 3, 4, EventData::Ann(1, vec!["fall".to_string()]))]
        );
    }

    #[test]
    fn verify_stacked_chain_ordering() {
        let (sink, events) = RecordingSink::new();
        let stages = [StageSpec::with_channel("edges", "d", 0), StageSpec::new("every2")];

        run_decoders(
            &registry(),
            input_over(vec![0, 1, 0, 1, 0]),
            Rc::new(RefCell::new(sink)),
            &stages,
            OutputType::Ann,
            &[],
        )
        .unwrap();

        // Four edges upstream; the stacked stage annotates the second and fourth.
        let stacked: Vec<_> = events
            .borrow()
            .iter()
            .filter(|(source, ..)| source == "every2")
            .map(|(_, start, _, data)| (*start, data.clone()))
            .collect();

        assert_eq!(
            stacked,
            [
                (2, EventData::Ann(0, vec!["event 2".to_string()])),
                (4, EventData::Ann(0, vec!["event 4".to_string()])),
            ]
        );
    }

    #[test]
    fn verify_source_events_reach_sink() {
        let (sink, events) = RecordingSink::new();
        let meta = sink.meta.clone();

        run_decoders(
            &registry(),
            input_over(vec![0, 0, 1]),
            Rc::new(RefCell::new(sink)),
            &[],
            OutputType::Ann,
            &[],
        )
        .unwrap();

        let runs: Vec<_> = events
            .borrow()
            .iter()
            .filter(|(source, ..)| source == "buffer")
            .map(|(_, start, end, data)| (*start, *end, data.clone()))
            .collect();

        assert_eq!(runs, [(0, 2, EventData::Logic(0)), (2, 3, EventData::Logic(1))]);

        // With no decoder stages the sink receives the stream metadata directly.
        assert_eq!(*meta.borrow(), [(MetaKey::Samplerate, 1_000_000)]);
    }

    #[test]
    fn verify_unknown_stage_is_config_error() {
        let (sink, _) = RecordingSink::new();
        let stages = [StageSpec::new("missing")];

        let result = run_decoders(
            &registry(),
            input_over(vec![0, 1]),
            Rc::new(RefCell::new(sink)),
            &stages,
            OutputType::Ann,
            &[],
        );

        assert!(result.is_err());
    }

    #[test]
    fn verify_option_validation() {
        let (sink, _) = RecordingSink::new();
        let mut spec = StageSpec::with_channel("edges", "d", 0);
        spec.options.push(("polarity".to_string(), "sideways".to_string()));

        let result = run_decoders(
            &registry(),
            input_over(vec![0, 1]),
            Rc::new(RefCell::new(sink)),
            &[spec],
            OutputType::Ann,
            &[],
        );

        assert!(result.is_err());
    }
}
