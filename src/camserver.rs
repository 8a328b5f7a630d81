//! Types and traits for communicating with a Pilatus detector's camera
//! control server over its ASCII protocol.
//!
//! ## Communicating with a detector
//!
//! Most users should start with a [`Detector`], which wraps a [`Port`] and
//! exposes the common settings and acquisition control as typed methods:
//!
//! ```rust
//! # use pilproto::{camserver::Detector, error::Error};
//! # fn wrapper() -> Result<(), Error> {
//! let mut detector = Detector::connect("10.0.0.5")?;
//! detector.set_exposure_time(0.1)?;
//! detector.set_exposure_period(0.11)?;
//! # Ok(())
//! # }
//! ```
//!
//! Acquisitions run in the background on the detector. Starting one returns
//! immediately and the detector is considered busy until its completion
//! notice is observed:
//!
//! ```rust
//! # use pilproto::{camserver::{Detector, TriggerMode}, error::Error};
//! # fn wrapper() -> Result<(), Error> {
//! # let mut detector = Detector::connect("10.0.0.5")?;
//! detector.set_image_count(10)?;
//! detector.start(TriggerMode::Software, "scan_0001.cbf")?;
//! while detector.is_acquiring()? {
//!     std::thread::sleep(std::time::Duration::from_millis(100));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Raw exchanges
//!
//! For commands the [`Detector`] does not model, drop down to the [`Port`]
//! and exchange [`Command`]s directly. Every reply is validated against the
//! grammar for the command that elicited it, so a [`Port`] never hands back
//! a reply that belongs to some earlier, timed out exchange.

mod acquisition;
mod command;
mod detector;
mod port;
mod response;
mod stream;

pub use command::*;
pub use detector::*;
pub use port::*;
pub use stream::*;
