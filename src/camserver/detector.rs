//! The typed detector surface.

use crate::backend::{Backend, Tcp};
use crate::camserver::command::{Command, TriggerMode};
use crate::camserver::port::{Port, Reply, DEFAULT_PORT};
use crate::camserver::stream::FrameAnnouncer;
use crate::error::{ConnectionError, Error, InvalidTimingError, ProtocolError};
use std::time::Duration;

/// The detector's readout time, in seconds. An exposure must leave at least
/// this much room inside its period.
const READOUT_MARGIN: f64 = 0.003;
/// Slack for comparing timing values that went through decimal formatting.
const TIMING_TOLERANCE: f64 = 1e-6;

/// How long [`stop`](Detector::stop) waits for the completion notice by
/// default.
pub const DEFAULT_STOP_DEADLINE: Duration = Duration::from_secs(5);

/// A connected Pilatus detector.
///
/// A `Detector` exposes the common camera server settings as typed getters
/// and setters, and controls acquisitions. Settings are not cached: every
/// getter queries the detector, so the values reflect whatever the server
/// currently holds, including changes made by other clients.
///
/// ## Example
///
/// ```rust
/// # use pilproto::{camserver::{Detector, TriggerMode}, error::Error};
/// # fn wrapper() -> Result<(), Error> {
/// let mut detector = Detector::connect("10.0.0.5")?;
/// detector.set_image_count(10)?;
/// detector.set_exposure_time(0.1)?;
/// detector.set_exposure_period(0.11)?;
/// detector.start(TriggerMode::Software, "scan_0001.cbf")?;
/// # Ok(())
/// # }
/// ```
pub struct Detector<B> {
    port: Port<B>,
    announcer: Option<Box<dyn FrameAnnouncer>>,
    /// The last image count set through this client. Advisory only, used for
    /// the frame announcement; the detector itself is the source of truth.
    image_count: u32,
}

impl<B: Backend> std::fmt::Debug for Detector<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detector")
            .field("port", &self.port)
            .field("image_count", &self.image_count)
            .finish_non_exhaustive()
    }
}

impl Detector<Tcp> {
    /// Connect to the detector at `host` on the
    /// [default control port](DEFAULT_PORT).
    pub fn connect(host: &str) -> Result<Detector<Tcp>, ConnectionError> {
        Detector::connect_to(host, DEFAULT_PORT)
    }

    /// Connect to the detector at `host` and `port`.
    pub fn connect_to(host: &str, port: u16) -> Result<Detector<Tcp>, ConnectionError> {
        Ok(Detector::from_port(Port::open_tcp(host, port)?))
    }
}

impl<B: Backend> Detector<B> {
    /// Create a detector around an already opened port.
    pub fn from_port(port: Port<B>) -> Detector<B> {
        Detector {
            port,
            announcer: None,
            image_count: 1,
        }
    }

    /// Announce upcoming acquisitions to the given streaming collaborator.
    ///
    /// The announcement is fire-and-forget: if it fails, the failure is
    /// logged and the acquisition starts anyway.
    pub fn set_announcer(&mut self, announcer: Box<dyn FrameAnnouncer>) {
        self.announcer = Some(announcer);
    }

    /// Get a mutable reference to the underlying port, for commands the
    /// detector does not model.
    pub fn port_mut(&mut self) -> &mut Port<B> {
        &mut self.port
    }

    /// Consume the detector and return the underlying port.
    pub fn into_port(self) -> Port<B> {
        self.port
    }

    /// Query the number of images per acquisition.
    pub fn image_count(&mut self) -> Result<u32, Error> {
        let reply = self.port.execute(&Command::get_image_count())?;
        parse_field(&reply)
    }

    /// Set the number of images per acquisition.
    pub fn set_image_count(&mut self, count: u32) -> Result<(), Error> {
        self.port.execute(&Command::set_image_count(count))?;
        self.image_count = count;
        Ok(())
    }

    /// Query the directory images are written to on the detector server.
    pub fn image_path(&mut self) -> Result<String, Error> {
        let reply = self.port.execute(&Command::get_image_path())?;
        match reply.field() {
            Some(path) => Ok(path.to_string()),
            None => Err(ProtocolError::new(reply.text()).into()),
        }
    }

    /// Set the directory images are written to on the detector server.
    pub fn set_image_path(&mut self, path: &str) -> Result<(), Error> {
        self.port.execute(&Command::set_image_path(path))?;
        Ok(())
    }

    /// Query the exposure time, in seconds.
    pub fn exposure_time(&mut self) -> Result<f64, Error> {
        let reply = self.port.execute(&Command::get_exposure_time())?;
        parse_field(&reply)
    }

    /// Set the exposure time, in seconds.
    pub fn set_exposure_time(&mut self, seconds: f64) -> Result<(), Error> {
        self.port.execute(&Command::set_exposure_time(seconds))?;
        Ok(())
    }

    /// Query the exposure period, in seconds.
    pub fn exposure_period(&mut self) -> Result<f64, Error> {
        let reply = self.port.execute(&Command::get_exposure_period())?;
        parse_field(&reply)
    }

    /// Set the exposure period, in seconds.
    pub fn set_exposure_period(&mut self, seconds: f64) -> Result<(), Error> {
        self.port.execute(&Command::set_exposure_period(seconds))?;
        Ok(())
    }

    /// Query the energy setting, in eV.
    ///
    /// This uses the long energy timeout, since the threshold hardware can
    /// be slow to answer.
    pub fn energy(&mut self) -> Result<f64, Error> {
        let reply = self.port.execute(&Command::get_energy())?;
        parse_field(&reply)
    }

    /// Set the energy, in eV.
    ///
    /// Changing the energy can physically move a component in the detector
    /// and may take many seconds.
    pub fn set_energy(&mut self, ev: f64) -> Result<(), Error> {
        self.port.execute(&Command::set_energy(ev))?;
        Ok(())
    }

    /// Arm the detector and begin an acquisition, writing images to
    /// `filename`.
    ///
    /// The current exposure time and period are queried first and validated:
    /// the exposure must leave at least the readout time inside each period,
    /// or the start fails with [`InvalidTimingError`] and the arming command
    /// is never sent.
    ///
    /// The call returns as soon as the detector is armed. The acquisition
    /// runs in the background; track it with
    /// [`is_acquiring`](Detector::is_acquiring) or end it early with
    /// [`stop`](Detector::stop).
    pub fn start(&mut self, mode: TriggerMode, filename: &str) -> Result<(), Error> {
        let exposure_time = self.exposure_time()?;
        let exposure_period = self.exposure_period()?;
        if exposure_time > exposure_period - READOUT_MARGIN + TIMING_TOLERANCE {
            return Err(InvalidTimingError::new(exposure_time, exposure_period).into());
        }
        if let Some(announcer) = self.announcer.as_mut() {
            if let Err(e) = announcer.announce(self.image_count) {
                log::warn!("failed to announce {} frames: {}", self.image_count, e);
            }
        }
        self.port.execute(&Command::start(mode, filename))?;
        Ok(())
    }

    /// Abort a running acquisition, waiting up to `deadline` for the
    /// detector to confirm. [`DEFAULT_STOP_DEADLINE`] is a reasonable
    /// deadline when in doubt.
    ///
    /// Does nothing if no acquisition is running. See [`Port::stop`].
    pub fn stop(&mut self, deadline: Duration) -> Result<(), Error> {
        self.port.stop(deadline)
    }

    /// Whether an acquisition is in flight. Never blocks.
    ///
    /// If the detector finished with an error since the last check, this
    /// surfaces it as an
    /// [`AcquisitionFailedError`](crate::error::AcquisitionFailedError).
    pub fn is_acquiring(&mut self) -> Result<bool, Error> {
        self.port.is_acquiring()
    }
}

/// Parse a reply's extracted field, blaming the reply text on failure.
fn parse_field<T: std::str::FromStr>(reply: &Reply) -> Result<T, Error> {
    reply
        .field()
        .and_then(|field| field.parse().ok())
        .ok_or_else(|| ProtocolError::new(reply.text()).into())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::Mock;
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;

    fn detector() -> Detector<Mock> {
        Detector::from_port(Port::open_mock())
    }

    fn mock(detector: &mut Detector<Mock>) -> &mut Mock {
        detector.port_mut().backend_mut()
    }

    /// Stage the replies for the timing queries `start` performs.
    fn stage_timing(detector: &mut Detector<Mock>, time: &str, period: &str) {
        let backend = mock(detector);
        backend.push(format!("15 OK Exposure time set to: {time} sec.\x18"));
        backend.push(format!("15 OK Exposure period set to: {period} sec\x18"));
    }

    #[test]
    fn image_count_round_trip() {
        let mut detector = detector();
        mock(&mut detector).push(b"15 OK N images set to: 7");
        detector.set_image_count(7).unwrap();
        assert_eq!(
            mock(&mut detector).take_written(),
            b"nimages 7\0".to_vec()
        );

        mock(&mut detector).push(b"15 OK N images set to: 7");
        assert_eq!(detector.image_count().unwrap(), 7);
    }

    #[test]
    fn image_path_round_trip() {
        let mut detector = detector();
        mock(&mut detector).push(b"10 OK /tmp/x/\x18");
        detector.set_image_path("/tmp/x/").unwrap();
        assert_eq!(
            mock(&mut detector).take_written(),
            b"imgpath /tmp/x/\0".to_vec()
        );

        mock(&mut detector).push(b"10 OK /tmp/x/\x18");
        assert_eq!(detector.image_path().unwrap(), "/tmp/x/");
    }

    #[test]
    fn exposure_timing_getters_parse_seconds() {
        let mut detector = detector();
        mock(&mut detector).push(b"15 OK Exposure time set to: 0.100000 sec.\x18");
        assert_eq!(detector.exposure_time().unwrap(), 0.1);

        mock(&mut detector).push(b"15 OK Exposure period set to: 0.110000 sec\x18");
        assert_eq!(detector.exposure_period().unwrap(), 0.11);
    }

    #[test]
    fn garbled_reply_is_a_protocol_error() {
        let mut detector = detector();
        mock(&mut detector).push(b"99 WUT");
        let err = detector.image_count().unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "{err:?}");
    }

    #[test]
    fn no_reply_is_a_timeout() {
        let mut detector = detector();
        let err = detector.image_count().unwrap_err();
        assert!(err.is_timeout(), "{err:?}");
    }

    #[test]
    fn valid_timing_starts_an_acquisition() {
        let mut detector = detector();
        stage_timing(&mut detector, "0.100000", "0.110000");
        mock(&mut detector).push(b"15 OK Starting 0.100000 second background");
        detector.start(TriggerMode::Software, "scan_0001.cbf").unwrap();
        assert!(detector.is_acquiring().unwrap());

        let written = mock(&mut detector).take_written();
        let written = String::from_utf8(written).unwrap();
        assert!(written.ends_with("exposure scan_0001.cbf\0"), "{written:?}");
    }

    #[test]
    fn invalid_timing_never_arms_the_detector() {
        let mut detector = detector();
        stage_timing(&mut detector, "0.200000", "0.100000");
        let err = detector
            .start(TriggerMode::Software, "scan_0001.cbf")
            .unwrap_err();
        match err {
            Error::InvalidTiming(e) => {
                assert_eq!(e.exposure_time(), 0.2);
                assert_eq!(e.exposure_period(), 0.1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!detector.is_acquiring().unwrap());

        // Only the two timing queries reached the wire.
        let written = mock(&mut detector).take_written();
        assert_eq!(written, b"exptime\0expperiod\0".to_vec());
    }

    #[test]
    fn timing_right_at_the_margin_is_allowed() {
        let mut detector = detector();
        stage_timing(&mut detector, "0.107000", "0.110000");
        mock(&mut detector).push(b"15 OK Starting");
        detector.start(TriggerMode::Software, "a.cbf").unwrap();
    }

    #[test]
    fn commands_are_rejected_while_acquiring() {
        let mut detector = detector();
        stage_timing(&mut detector, "0.100000", "0.110000");
        mock(&mut detector).push(b"15 OK Starting");
        detector.start(TriggerMode::Software, "a.cbf").unwrap();

        let err = detector.set_image_count(2).unwrap_err();
        assert!(matches!(err, Error::Busy(_)), "{err:?}");

        // The completion notice shows up on the wire; the very next check
        // reports idle and commands flow again.
        mock(&mut detector).push_pending(b"7 OK /data/a.cbf");
        assert!(!detector.is_acquiring().unwrap());
        mock(&mut detector).push(b"15 OK N images set to: 2");
        detector.set_image_count(2).unwrap();
    }

    #[test]
    fn failed_acquisition_is_surfaced_once() {
        let mut detector = detector();
        stage_timing(&mut detector, "0.100000", "0.110000");
        mock(&mut detector).push(b"15 OK Starting");
        detector.start(TriggerMode::Software, "a.cbf").unwrap();

        mock(&mut detector).push_pending(b"7 ERR aborted");
        let err = detector.is_acquiring().unwrap_err();
        assert!(matches!(err, Error::AcquisitionFailed(_)), "{err:?}");
        // The failure cleared the state.
        assert!(!detector.is_acquiring().unwrap());
    }

    #[test]
    fn stop_drains_until_the_completion_notice() {
        let mut detector = detector();
        stage_timing(&mut detector, "0.100000", "0.110000");
        mock(&mut detector).push(b"15 OK Starting");
        detector.start(TriggerMode::Software, "a.cbf").unwrap();

        mock(&mut detector).push(b"some trailing output");
        mock(&mut detector).push(b"7 OK /data/a.cbf");
        detector.stop(Duration::from_secs(1)).unwrap();
        assert!(!detector.is_acquiring().unwrap());

        let written = mock(&mut detector).take_written();
        let written = String::from_utf8(written).unwrap();
        assert!(written.ends_with("k\0"), "{written:?}");
    }

    #[test]
    fn stop_while_idle_does_nothing() {
        let mut detector = detector();
        detector.stop(Duration::from_secs(1)).unwrap();
        assert!(mock(&mut detector).take_written().is_empty());
    }

    #[test]
    fn stop_past_the_deadline_is_fatal() {
        let mut detector = detector();
        stage_timing(&mut detector, "0.100000", "0.110000");
        mock(&mut detector).push(b"15 OK Starting");
        detector.start(TriggerMode::Software, "a.cbf").unwrap();

        // No completion notice ever arrives.
        let err = detector.stop(Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "{err:?}");
        // The state was still forced back to idle.
        assert!(!detector.is_acquiring().unwrap());
    }

    #[derive(Debug, Default)]
    struct Recorder {
        announced: Rc<RefCell<Vec<u32>>>,
        fail: bool,
    }

    impl FrameAnnouncer for Recorder {
        fn announce(&mut self, frames: u32) -> Result<(), io::Error> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "down"));
            }
            self.announced.borrow_mut().push(frames);
            Ok(())
        }
    }

    #[test]
    fn start_announces_the_frame_count() {
        let mut detector = detector();
        let announced = Rc::new(RefCell::new(Vec::new()));
        detector.set_announcer(Box::new(Recorder {
            announced: Rc::clone(&announced),
            fail: false,
        }));

        mock(&mut detector).push(b"15 OK N images set to: 10");
        detector.set_image_count(10).unwrap();

        stage_timing(&mut detector, "0.100000", "0.110000");
        mock(&mut detector).push(b"15 OK Starting");
        detector.start(TriggerMode::Software, "a.cbf").unwrap();

        assert_eq!(*announced.borrow(), vec![10]);
    }

    #[test]
    fn a_failed_announcement_does_not_block_the_start() {
        let mut detector = detector();
        detector.set_announcer(Box::new(Recorder {
            announced: Rc::default(),
            fail: true,
        }));

        stage_timing(&mut detector, "0.100000", "0.110000");
        mock(&mut detector).push(b"15 OK Starting");
        detector.start(TriggerMode::Software, "a.cbf").unwrap();
        assert!(detector.is_acquiring().unwrap());
    }
}
