// Sigil
// Copyright (c) 2026 The Project Sigil Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::process;
use std::rc::Rc;

use clap::{App, Arg, ArgMatches};
use log::error;

use sigil::core::decoder::DecoderRegistry;
use sigil::core::errors::{config_error, Result};
use sigil::core::event::OutputType;
use sigil::core::input::Input;
use sigil::core::output::{AnnotationOutput, BinaryOutput, BitsOutput, OutputSink};
use sigil::core::pipeline::{run_decoders, StageSpec};

use sigil_format_srzip::{SrZipInput, SrZipOutput};

fn main() {
    pretty_env_logger::init();

    let matches = App::new("Sigil Run")
        .version("0.1.0")
        .about("Run protocol decoders over a captured sigrok session")
        .arg(
            Arg::new("decoder")
                .short('P')
                .long("protocol-decoder")
                .value_name("SPEC")
                .multiple_occurrences(true)
                .takes_value(true)
                .help("Add a decoder stage: <id>[:opt=val]...[:channel=index]..."),
        )
        .arg(
            Arg::new("annotations")
                .short('A')
                .long("annotations")
                .value_name("DECODER[=ANN:ANN...]")
                .takes_value(true)
                .help("Print the annotations of the last decoder, optionally filtered by class"),
        )
        .arg(
            Arg::new("binary")
                .short('B')
                .long("binary")
                .value_name("DECODER[=TRACK]")
                .takes_value(true)
                .conflicts_with("annotations")
                .help("Write a binary track of the last decoder to the output"),
        )
        .arg(
            Arg::new("output-format")
                .short('O')
                .long("output-format")
                .value_name("FORMAT")
                .takes_value(true)
                .possible_values(["bits", "srzip"])
                .help("Render the sample stream instead of decoder output"),
        )
        .arg(
            Arg::new("initial-value")
                .short('N')
                .long("initial-value")
                .value_name("CHANNEL=LEVEL")
                .multiple_occurrences(true)
                .takes_value(true)
                .help("Assume a channel level before the first sample"),
        )
        .arg(
            Arg::new("output-file")
                .short('f')
                .long("output-file")
                .value_name("FILE")
                .takes_value(true)
                .help("Write output to the given file instead of standard output"),
        )
        .arg(
            Arg::new("width")
                .short('w')
                .long("width")
                .value_name("SAMPLES")
                .takes_value(true)
                .default_value("64")
                .help("Block width of the bits renderer"),
        )
        .arg(
            Arg::new("list")
                .short('L')
                .long("list-decoders")
                .help("List the registered protocol decoders and exit"),
        )
        .arg(
            Arg::new("INPUT")
                .help("The srzip session archive to decode")
                .required_unless_present("list")
                .index(1),
        )
        .get_matches();

    let registry = sigil::default::get_decoders();

    if matches.is_present("list") {
        list_decoders(registry);
        return;
    }

    if let Err(err) = run(registry, &matches) {
        error!("{}", err);
        process::exit(1);
    }
}

fn list_decoders(registry: &DecoderRegistry) {
    let mut decoders: Vec<_> = registry.iter().collect();
    decoders.sort_by_key(|desc| desc.id);
    for desc in decoders {
        println!("{:<12} {:<24} {}", desc.id, desc.name, desc.desc);
    }
}

/// Parse one `-P` specification into a stage with unresolved channel values.
fn parse_stage(
    registry: &DecoderRegistry,
    spec: &str,
) -> Result<(StageSpec, Vec<(String, String)>)> {
    let mut parts = spec.split(':');
    let id = parts.next().unwrap_or_default();
    let desc = match registry.get(id) {
        Some(desc) => desc,
        None => return config_error(format!("unknown decoder id: {}", id)),
    };

    let mut stage = StageSpec::new(id);
    let mut channels = Vec::new();
    for part in parts {
        let (key, value) = match part.split_once('=') {
            Some(pair) => pair,
            None => return config_error(format!("malformed decoder argument: {}", part)),
        };
        // A key naming a declared channel is a binding; anything else must be an option.
        if desc.channel_index(key).is_some() {
            channels.push((key.to_string(), value.to_string()));
        }
        else if desc.options.iter().any(|opt| opt.id == key) {
            stage.options.push((key.to_string(), value.to_string()));
        }
        else {
            return config_error(format!("decoder {} has no option or channel {}", id, key));
        }
    }

    Ok((stage, channels))
}

/// Resolve a raw channel reference: an integer index, or a name from the capture's channels.
fn resolve_channel(value: &str, channels: &[String]) -> Result<usize> {
    if let Ok(index) = value.parse::<usize>() {
        return Ok(index);
    }
    match channels.iter().position(|name| name == value) {
        Some(index) => Ok(index),
        None => config_error(format!("unknown channel: {}", value)),
    }
}

/// Build the initial channel levels from `-N` arguments. Channel references resolve through the
/// first stage's binding, or directly as raw indices.
fn initial_state(
    matches: &ArgMatches,
    first_stage_channels: &[(String, String)],
) -> Result<Option<HashMap<usize, u8>>> {
    let values = match matches.values_of("initial-value") {
        Some(values) => values,
        None => return Ok(None),
    };

    let mut state = HashMap::new();
    for value in values {
        let (channel, level) = match value.split_once('=') {
            Some(pair) => pair,
            None => return config_error(format!("malformed initial value: {}", value)),
        };
        let level = match level {
            "0" => 0,
            "1" => 1,
            _ => return config_error(format!("initial level must be 0 or 1: {}", value)),
        };

        let raw = first_stage_channels
            .iter()
            .find(|(id, _)| id == channel)
            .map(|(_, value)| value.as_str())
            .unwrap_or(channel);
        match raw.parse::<usize>() {
            Ok(index) => state.insert(index, level),
            Err(_) => return config_error(format!("cannot resolve initial channel: {}", channel)),
        };
    }

    Ok(Some(state))
}

fn output_handle(matches: &ArgMatches) -> Result<Box<dyn Write>> {
    match matches.value_of("output-file") {
        Some(path) => Ok(Box::new(File::create(path)?)),
        None => Ok(Box::new(io::stdout())),
    }
}

fn run(registry: &DecoderRegistry, matches: &ArgMatches) -> Result<()> {
    // Stage specifications are parsed before the capture is opened so the initial channel
    // levels can seed the reader.
    let mut stages = Vec::new();
    let mut stage_channels = Vec::new();
    if let Some(specs) = matches.values_of("decoder") {
        for spec in specs {
            let (stage, channels) = parse_stage(registry, spec)?;
            stages.push(stage);
            stage_channels.push(channels);
        }
    }

    let initial = initial_state(matches, stage_channels.first().map_or(&[], |c| c.as_slice()))?;
    let input = SrZipInput::open(matches.value_of("INPUT").unwrap_or_default(), initial.as_ref())?;

    // Bindings may name capture channels; those resolve only once the archive is open.
    for (stage, channels) in stages.iter_mut().zip(&stage_channels) {
        for (id, value) in channels {
            let raw = resolve_channel(value, input.logic_channels())?;
            stage.channels.push((id.clone(), raw));
        }
    }

    let terminal = stages.last().map(|stage| stage.id.clone());
    let width = matches
        .value_of("width")
        .and_then(|width| width.parse::<u64>().ok())
        .unwrap_or(64);
    let mut output_type = OutputType::Ann;
    let mut output_filters: Vec<String> = Vec::new();

    let sink: Rc<RefCell<dyn OutputSink>> = if let Some(value) = matches.value_of("binary") {
        let (decoder, track) = match value.split_once('=') {
            Some((decoder, track)) => (decoder, Some(track)),
            None => (value, None),
        };
        if terminal.as_deref() != Some(decoder) {
            return config_error("binary output must name the last decoder stage");
        }
        output_type = OutputType::Binary;
        output_filters = track.map(|track| vec![track.to_string()]).unwrap_or_default();
        Rc::new(RefCell::new(BinaryOutput::new(output_handle(matches)?, decoder)))
    }
    else if let Some(value) = matches.value_of("annotations") {
        let (decoder, filters) = match value.split_once('=') {
            Some((decoder, filters)) => {
                (decoder, filters.split(':').map(str::to_string).collect())
            }
            None => (value, Vec::new()),
        };
        let desc = match registry.get(decoder) {
            Some(desc) => desc,
            None => return config_error(format!("unknown decoder id: {}", decoder)),
        };
        if terminal.as_deref() != Some(decoder) {
            return config_error("annotation output must name the last decoder stage");
        }
        output_filters = filters;
        Rc::new(RefCell::new(AnnotationOutput::new(
            output_handle(matches)?,
            decoder,
            desc.annotations,
        )))
    }
    else if matches.value_of("output-format") == Some("srzip") {
        let path = match matches.value_of("output-file") {
            Some(path) => path,
            None => return config_error("srzip output requires an output file"),
        };
        let decoder_ids: Vec<String> = stages.iter().map(|stage| stage.id.clone()).collect();
        Rc::new(RefCell::new(SrZipOutput::create(
            path,
            input.id(),
            input.samplerate(),
            &input.logic_channels().to_vec(),
            &input.analog_channels().to_vec(),
            &decoder_ids,
        )?))
    }
    else if terminal.is_some() && matches.value_of("output-format").is_none() {
        // Decoders configured without an explicit output: print every annotation of the last
        // stage.
        let stage = terminal.as_deref().unwrap_or_default();
        let desc = match registry.get(stage) {
            Some(desc) => desc,
            None => return config_error(format!("unknown decoder id: {}", stage)),
        };
        Rc::new(RefCell::new(AnnotationOutput::new(
            output_handle(matches)?,
            stage,
            desc.annotations,
        )))
    }
    else {
        Rc::new(RefCell::new(BitsOutput::new(
            output_handle(matches)?,
            input.logic_channels().to_vec(),
            width,
            !stages.is_empty(),
        )))
    };

    run_decoders(
        registry,
        Rc::new(RefCell::new(input)),
        sink,
        &stages,
        output_type,
        &output_filters,
    )
}
