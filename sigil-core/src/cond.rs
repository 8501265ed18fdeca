// Sigil
// Copyright (c) 2026 The Project Sigil Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `cond` module defines the wait-condition model of the sample-stepping engine.
//!
//! A decoder advances through the capture by handing the engine a disjunction of [`Cond`]s. Each
//! condition either skips a fixed number of samples or requires a set of per-channel [`Trigger`]
//! predicates to hold simultaneously. The engine steps the cursor one sample at a time and stops
//! at the first sample where at least one condition matches.

use std::fmt;
use std::str::FromStr;

use crate::errors::{config_error, Error, Result};

/// A level or edge predicate over a single logic channel, evaluated against the pair
/// (previous sample, current sample).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Trigger {
    /// The bit is 0 at the current sample.
    Low,
    /// The bit is 1 at the current sample.
    High,
    /// The bit was 0 at the previous sample and is 1 at the current sample.
    Rising,
    /// The bit was 1 at the previous sample and is 0 at the current sample.
    Falling,
    /// The bit differs between the previous and current sample.
    Edge,
    /// The bit is identical between the previous and current sample.
    Stable,
}

impl Trigger {
    /// Evaluate the predicate for one channel given its previous and current bit value.
    #[inline]
    pub fn matches(&self, last: u8, current: u8) -> bool {
        match *self {
            Trigger::Low => current == 0,
            Trigger::High => current != 0,
            Trigger::Rising => last == 0 && current != 0,
            Trigger::Falling => last != 0 && current == 0,
            Trigger::Edge => last != current,
            Trigger::Stable => last == current,
        }
    }

    /// The single-letter specification form of the trigger.
    pub fn as_str(&self) -> &'static str {
        match *self {
            Trigger::Low => "l",
            Trigger::High => "h",
            Trigger::Rising => "r",
            Trigger::Falling => "f",
            Trigger::Edge => "e",
            Trigger::Stable => "s",
        }
    }
}

impl FromStr for Trigger {
    type Err = Error;

    fn from_str(s: &str) -> Result<Trigger> {
        match s {
            "l" => Ok(Trigger::Low),
            "h" => Ok(Trigger::High),
            "r" => Ok(Trigger::Rising),
            "f" => Ok(Trigger::Falling),
            "e" => Ok(Trigger::Edge),
            "s" => Ok(Trigger::Stable),
            _ => config_error(format!("unknown trigger specification: {}", s)),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single wait condition.
#[derive(Clone, Debug, PartialEq)]
pub enum Cond {
    /// Advance exactly this many samples unconditionally. The condition matches on the step at
    /// which the remaining count reaches 0; a count of 0 matches on the next step.
    Skip(u64),
    /// Match when every listed (channel, trigger) entry is satisfied at the current step.
    Match(Vec<(usize, Trigger)>),
}

impl Cond {
    /// A condition that skips `n` samples.
    pub fn skip(n: u64) -> Cond {
        Cond::Skip(n)
    }

    /// A single-channel condition.
    pub fn on(channel: usize, trigger: Trigger) -> Cond {
        Cond::Match(vec![(channel, trigger)])
    }

    pub fn low(channel: usize) -> Cond {
        Cond::on(channel, Trigger::Low)
    }

    pub fn high(channel: usize) -> Cond {
        Cond::on(channel, Trigger::High)
    }

    pub fn rising(channel: usize) -> Cond {
        Cond::on(channel, Trigger::Rising)
    }

    pub fn falling(channel: usize) -> Cond {
        Cond::on(channel, Trigger::Falling)
    }

    pub fn edge(channel: usize) -> Cond {
        Cond::on(channel, Trigger::Edge)
    }

    pub fn stable(channel: usize) -> Cond {
        Cond::on(channel, Trigger::Stable)
    }

    /// Evaluate the condition for one engine step against the pair (previous, current) sample
    /// word, decrementing a pending skip count. Returns whether the condition matched.
    #[inline]
    pub fn step(&mut self, last: u64, current: u64) -> bool {
        match *self {
            Cond::Skip(ref mut n) => {
                *n = n.saturating_sub(1);
                *n == 0
            }
            Cond::Match(ref entries) => entries.iter().all(|&(channel, trigger)| {
                let last_bit = ((last >> channel) & 1) as u8;
                let bit = ((current >> channel) & 1) as u8;
                trigger.matches(last_bit, bit)
            }),
        }
    }
}

/// Evaluate every condition for one engine step, recording per-condition outcomes in `matched`.
/// Returns true when at least one condition matched.
#[inline]
pub fn eval_conds(conds: &mut [Cond], last: u64, current: u64, matched: &mut [bool]) -> bool {
    debug_assert_eq!(conds.len(), matched.len());

    let mut any = false;
    for (cond, slot) in conds.iter_mut().zip(matched.iter_mut()) {
        *slot = cond.step(last, current);
        any |= *slot;
    }
    any
}

#[cfg(test)]
mod tests {
    use super::{eval_conds, Cond, Trigger};

    #[test]
    fn verify_trigger_levels() {
        assert!(Trigger::Low.matches(1, 0));
        assert!(!Trigger::Low.matches(0, 1));
        assert!(Trigger::High.matches(0, 1));
        assert!(!Trigger::High.matches(1, 0));
    }

    #[test]
    fn verify_trigger_edges() {
        assert!(Trigger::Rising.matches(0, 1));
        assert!(!Trigger::Rising.matches(1, 1));
        assert!(!Trigger::Rising.matches(0, 0));
        assert!(Trigger::Falling.matches(1, 0));
        assert!(!Trigger::Falling.matches(0, 0));
        assert!(Trigger::Edge.matches(0, 1));
        assert!(Trigger::Edge.matches(1, 0));
        assert!(!Trigger::Edge.matches(1, 1));
        assert!(Trigger::Stable.matches(1, 1));
        assert!(!Trigger::Stable.matches(1, 0));
    }

    #[test]
    fn verify_trigger_parse() {
        for spec in ["l", "h", "r", "f", "e", "s"] {
            let trigger: Trigger = spec.parse().unwrap();
            assert_eq!(trigger.as_str(), spec);
        }
        assert!("x".parse::<Trigger>().is_err());
        assert!("".parse::<Trigger>().is_err());
    }

    #[test]
    fn verify_multi_channel_cond() {
        // Both channel 0 and channel 3 must be high.
        let mut cond = Cond::Match(vec![(0, Trigger::High), (3, Trigger::High)]);
        assert!(cond.step(0, 0b1001));
        assert!(!cond.step(0, 0b1000));
        assert!(!cond.step(0, 0b0001));
    }

    #[test]
    fn verify_skip_counts_down() {
        let mut cond = Cond::skip(3);
        assert!(!cond.step(0, 0));
        assert!(!cond.step(0, 0));
        assert!(cond.step(0, 0));
        // A zero skip matches on the very next step.
        let mut cond = Cond::skip(0);
        assert!(cond.step(0, 0));
    }

    #[test]
    fn verify_eval_conds_disjunction() {
        let mut conds = vec![Cond::rising(0), Cond::skip(3)];
        let mut matched = vec![false; 2];

        assert!(!eval_conds(&mut conds, 1, 1, &mut matched));
        assert_eq!(matched, [false, false]);

        // The rising edge fires first; the skip still has one sample to go.
        assert!(eval_conds(&mut conds, 0, 1, &mut matched));
        assert_eq!(matched, [true, false]);
    }
}
