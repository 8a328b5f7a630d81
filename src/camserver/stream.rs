//! The image-streaming side channel.
//!
//! Some detector deployments pair the control connection with a separate
//! streaming collaborator that needs to know how many frames an upcoming
//! acquisition will produce. The announcement is advisory: the acquisition
//! proceeds whether or not the collaborator heard it.

use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

/// The port the streaming collaborator listens on.
pub const DEFAULT_STREAM_PORT: u16 = 9998;

/// How long to wait for an announcement to be acknowledged.
const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(1);

/// A collaborator that wants to hear about an upcoming acquisition.
///
/// A [`Detector`](crate::camserver::Detector) configured with an announcer
/// calls [`announce`](FrameAnnouncer::announce) with the configured image
/// count just before arming the detector. The call is fire-and-forget from
/// the detector's perspective: a failure is logged and the acquisition
/// starts anyway.
pub trait FrameAnnouncer {
    /// Announce that an acquisition of `frames` images is about to start.
    fn announce(&mut self, frames: u32) -> Result<(), io::Error>;
}

/// A [`FrameAnnouncer`] that performs a short request/reply exchange over
/// TCP.
///
/// Each announcement opens a fresh connection, sends a single
/// `nframes <count>` line, and waits briefly for a one-line acknowledgment.
/// The streaming collaborator is a separate process with its own lifecycle,
/// so no connection is held between acquisitions.
#[derive(Debug)]
pub struct TcpAnnouncer {
    host: String,
    port: u16,
}

impl TcpAnnouncer {
    /// Create an announcer for the collaborator at `host` on the
    /// [default stream port](DEFAULT_STREAM_PORT).
    pub fn new(host: &str) -> TcpAnnouncer {
        TcpAnnouncer::with_port(host, DEFAULT_STREAM_PORT)
    }

    /// Create an announcer for the collaborator at `host` and `port`.
    pub fn with_port(host: &str, port: u16) -> TcpAnnouncer {
        TcpAnnouncer {
            host: host.to_string(),
            port,
        }
    }
}

impl FrameAnnouncer for TcpAnnouncer {
    fn announce(&mut self, frames: u32) -> Result<(), io::Error> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))?;
        stream.set_read_timeout(Some(ANNOUNCE_TIMEOUT))?;
        let mut writer = &stream;
        writeln!(writer, "nframes {frames}")?;
        writer.flush()?;
        let mut ack = String::new();
        BufReader::new(&stream).read_line(&mut ack)?;
        log::debug!("{}:{} announced {} frames: {}", self.host, self.port, frames, ack.trim_end());
        Ok(())
    }
}
