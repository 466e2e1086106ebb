//! Resilient media resolution and playback recovery.
//!
//! Turns catalog track ids into bytes: resolves time-bounded URLs, fetches
//! them in bounded windows through a disk cache, retries and falls back
//! through a fixed stack of [`source`] layers, and recovers playback from
//! errors the player reports ([`recovery`]).
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod events;
pub mod http;
pub mod protocol;
pub mod provider;
pub mod reader;
pub mod recovery;
pub mod source;
pub mod store;
pub mod track;
