//! Browser controller and pod synthesizer
//!
//! Backs every `Browser` with one Pod built from the resolved BrowserConfig
//! entry:
//! - `options`: the per-Browser `selenosis.io/options` override document
//! - `pod`: pure Pod synthesis from Browser + resolved spec + options
//! - `status`: Pod → Browser status mirroring and change detection
//! - `controller`: the reconcile state machine and deletion handshake

pub mod controller;
pub mod error;
pub mod options;
pub mod pod;
pub mod status;

pub use error::BrowserError;
