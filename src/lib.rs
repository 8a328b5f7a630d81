//! A simple but easy to use library for communicating with Pilatus detectors.
//!
//! The detector's camserver control protocol is supported over TCP. Start
//! with a [`Detector`](camserver::Detector) for typed access to the common
//! settings and acquisition control, or drop down to a
//! [`Port`](camserver::Port) for raw command/response exchanges.

#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(missing_debug_implementations)]

pub mod backend;
pub mod camserver;
pub mod error;
pub mod timeout_guard;
