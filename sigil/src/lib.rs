// Sigil
// Copyright (c) 2026 The Project Sigil Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! # Project Sigil
//!
//! Sigil is a pure Rust host for logic-analyzer protocol decoders.
//!
//! A capture is exposed through the [`Input`][core::input::Input] contract — for example the
//! srzip session-archive reader in `sigil-format-srzip` — and a chain of protocol decoders
//! steps through it with the sample engine's `wait(conds)` primitive, each stage feeding the
//! next until a terminal [`OutputSink`][core::output::OutputSink] consumes the decoded events.
//!
//! The shipped protocol decoders are feature-gated; all of them are enabled by default. Use
//! [`default::get_decoders`] for a registry with every enabled decoder pre-registered, or build
//! a [`DecoderRegistry`][core::decoder::DecoderRegistry] yourself to control the selection.

pub use sigil_core as core;

pub mod default {
    //! The `default` module provides a pre-populated decoder registry to get an implementer
    //! up-and-running as quickly as possible. Using it is completely optional and incurs no
    //! overhead unless actually used.

    pub mod decoders {
        //! The `decoders` module re-exports all enabled Sigil protocol decoders.

        #[cfg(feature = "uart")]
        pub use sigil_decoder_uart::UartDecoder;
    }

    use lazy_static::lazy_static;

    use sigil_core::decoder::DecoderRegistry;

    lazy_static! {
        static ref DECODER_REGISTRY: DecoderRegistry = {
            let mut registry = DecoderRegistry::new();
            register_enabled_decoders(&mut registry);
            registry
        };
    }

    /// Gets the default `DecoderRegistry`. This registry pre-registers all the decoders
    /// selected by the `feature` flags in the includer's `Cargo.toml`. If `features` is not
    /// set, all shipped decoders are registered.
    ///
    /// This function is lazy and does not instantiate the `DecoderRegistry` until the first
    /// call to this function.
    pub fn get_decoders() -> &'static DecoderRegistry {
        &DECODER_REGISTRY
    }

    /// Registers all the decoders selected by the `feature` flags in the includer's
    /// `Cargo.toml` on the provided `DecoderRegistry`.
    ///
    /// Use this function to easily populate a custom registry with all enabled decoders.
    pub fn register_enabled_decoders(registry: &mut DecoderRegistry) {
        #[cfg(feature = "uart")]
        registry.register(&sigil_decoder_uart::UART_DECODER);
    }
}
