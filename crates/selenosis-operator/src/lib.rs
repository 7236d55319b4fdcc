//! Selenosis operator library
//!
//! Wires the Browser and BrowserConfig controllers, CRD installation, leader
//! election and health probes into one process.

#![warn(missing_docs)]

pub mod controller_runner;
pub mod health;
pub mod startup;
