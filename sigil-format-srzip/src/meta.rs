// Sigil
// Copyright (c) 2026 The Project Sigil Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Parsing for the INI-style `metadata` entry of a session archive.

use std::collections::HashMap;

/// The parsed `metadata` entry: sections of key/value pairs. Keys are matched
/// case-insensitively; section names keep their case.
#[derive(Debug, Default)]
pub struct Metadata {
    sections: HashMap<String, HashMap<String, String>>,
}

impl Metadata {
    /// Parse the metadata text. Unparseable lines are skipped; values keep everything after the
    /// first `=`.
    pub fn parse(text: &str) -> Metadata {
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut current = String::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                current = line[1..line.len() - 1].trim().to_string();
                sections.entry(current.clone()).or_default();
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                sections
                    .entry(current.clone())
                    .or_default()
                    .insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        Metadata { sections }
    }

    /// Look one key up in one section.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|keys| keys.get(&key.to_ascii_lowercase()))
            .map(|value| value.as_str())
    }

    /// Look one key up and parse it as an unsigned integer.
    pub fn get_int(&self, section: &str, key: &str) -> Option<u64> {
        self.get(section, key).and_then(|value| value.parse().ok())
    }
}

/// Scale factor of a sample-rate unit suffix.
fn unit_factor(unit: &str) -> Option<u64> {
    match unit {
        "Hz" => Some(1),
        "kHz" | "KHz" => Some(1_000),
        "mHz" | "MHz" => Some(1_000_000),
        "gHz" | "GHz" => Some(1_000_000_000),
        _ => None,
    }
}

/// Parse a metadata sample-rate value.
///
/// Accepts a bare integer in Hz, a `<value> <unit>` pair, or a value with the unit run
/// directly against it (`500kHz`). Anything else reads as 0, meaning unknown.
pub fn parse_samplerate(raw: &str) -> u64 {
    let raw = raw.trim();

    if let Ok(rate) = raw.parse::<u64>() {
        return rate;
    }

    let mut parts = raw.split_whitespace();
    if let (Some(value), Some(unit), None) = (parts.next(), parts.next(), parts.next()) {
        if let (Ok(value), Some(factor)) = (value.parse::<f64>(), unit_factor(unit)) {
            return (value * factor as f64) as u64;
        }
    }

    // No separator; strip a trailing unit and scale what remains. "Hz" must come last so the
    // longer suffixes get the first chance to match.
    for unit in ["kHz", "KHz", "mHz", "MHz", "gHz", "GHz", "Hz"] {
        if let Some(value) = raw.strip_suffix(unit) {
            if let Ok(value) = value.trim().parse::<f64>() {
                return (value * unit_factor(unit).unwrap_or(1) as f64) as u64;
            }
            return 0;
        }
    }

    0
}

#[cfg(test)]
mod tests {
    use super::{parse_samplerate, Metadata};

    #[test]
    fn verify_section_parsing() {
        let meta = Metadata::parse(
            "[global]\nsigil version = 0.1.0\n\n[device 1]\ndriver=fx2lafw\nsamplerate = 20 MHz\n\
             unitsize = 1\ntotal probes = 2\nprobe1 = SDA\nprobe2 = SCL\n",
        );

        assert_eq!(meta.get("device 1", "driver"), Some("fx2lafw"));
        assert_eq!(meta.get("device 1", "samplerate"), Some("20 MHz"));
        assert_eq!(meta.get_int("device 1", "total probes"), Some(2));
        assert_eq!(meta.get("device 1", "probe1"), Some("SDA"));
        assert_eq!(meta.get("device 1", "probe3"), None);
        assert_eq!(meta.get("device 2", "driver"), None);
    }

    #[test]
    fn verify_samplerate_forms() {
        assert_eq!(parse_samplerate("20 MHz"), 20_000_000);
        assert_eq!(parse_samplerate("1000000"), 1_000_000);
        assert_eq!(parse_samplerate("500kHz"), 500_000);
        assert_eq!(parse_samplerate("2.5 GHz"), 2_500_000_000);
        assert_eq!(parse_samplerate("44100 Hz"), 44_100);
        assert_eq!(parse_samplerate("96 khz"), 0);
        assert_eq!(parse_samplerate("fast"), 0);
        assert_eq!(parse_samplerate(""), 0);
    }
}
