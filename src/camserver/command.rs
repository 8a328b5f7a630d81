//! Command framing for the camera control server.

use std::time::Duration;

/// The response timeout used by most commands.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
/// The response timeout for energy commands.
///
/// Changing the energy threshold can physically move a component in the
/// detector, which takes far longer than any other command.
pub const ENERGY_TIMEOUT: Duration = Duration::from_secs(20);
/// The response timeout for arming the detector.
pub const START_TIMEOUT: Duration = Duration::from_secs(10);

/// How the detector should be triggered during an acquisition.
///
/// Each mode maps to a distinct wire verb. See the Pilatus manual for the
/// exact triggering semantics of each.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TriggerMode {
    /// Expose immediately, timed entirely by the detector.
    Software,
    /// One external trigger starts the whole image series.
    ExternalSingle,
    /// One external trigger per frame.
    ExternalMulti,
    /// The external signal level gates each exposure.
    ExternalEnable,
}

impl TriggerMode {
    /// The wire verb for this trigger mode.
    pub const fn verb(self) -> &'static str {
        match self {
            TriggerMode::Software => "exposure",
            TriggerMode::ExternalSingle => "exttrigger",
            TriggerMode::ExternalMulti => "extmtrigger",
            TriggerMode::ExternalEnable => "extenable",
        }
    }
}

/// The kind of a command, which selects the reply grammar applied to its
/// response.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Query the configured number of images.
    GetImageCount,
    /// Set the number of images.
    SetImageCount,
    /// Query the image output directory.
    GetImagePath,
    /// Set the image output directory.
    SetImagePath,
    /// Query the exposure time.
    GetExposureTime,
    /// Set the exposure time.
    SetExposureTime,
    /// Query the exposure period.
    GetExposurePeriod,
    /// Set the exposure period.
    SetExposurePeriod,
    /// Query the energy setting.
    GetEnergy,
    /// Set the energy.
    SetEnergy,
    /// Arm the detector and begin an acquisition.
    Start,
    /// Abort a running acquisition.
    Stop,
}

/// A single command for the camera control server.
///
/// A command is an immutable value built fresh for every exchange. Use the
/// associated constructors rather than assembling wire text by hand, so the
/// reply is checked against the right grammar.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    kind: CommandKind,
    text: String,
    timeout: Duration,
}

impl Command {
    fn new(kind: CommandKind, text: String, timeout: Duration) -> Command {
        Command {
            kind,
            text,
            timeout,
        }
    }

    /// Query the configured number of images per acquisition.
    pub fn get_image_count() -> Command {
        Command::new(CommandKind::GetImageCount, "nimages".into(), DEFAULT_TIMEOUT)
    }

    /// Set the number of images per acquisition.
    pub fn set_image_count(count: u32) -> Command {
        Command::new(
            CommandKind::SetImageCount,
            format!("nimages {count}"),
            DEFAULT_TIMEOUT,
        )
    }

    /// Query the directory images are written to on the detector server.
    pub fn get_image_path() -> Command {
        Command::new(CommandKind::GetImagePath, "imgpath".into(), DEFAULT_TIMEOUT)
    }

    /// Set the directory images are written to on the detector server.
    pub fn set_image_path(path: &str) -> Command {
        Command::new(
            CommandKind::SetImagePath,
            format!("imgpath {path}"),
            DEFAULT_TIMEOUT,
        )
    }

    /// Query the exposure time, in seconds.
    pub fn get_exposure_time() -> Command {
        Command::new(CommandKind::GetExposureTime, "exptime".into(), DEFAULT_TIMEOUT)
    }

    /// Set the exposure time, in seconds.
    pub fn set_exposure_time(seconds: f64) -> Command {
        Command::new(
            CommandKind::SetExposureTime,
            format!("exptime {seconds:.6}"),
            DEFAULT_TIMEOUT,
        )
    }

    /// Query the exposure period, in seconds.
    pub fn get_exposure_period() -> Command {
        Command::new(
            CommandKind::GetExposurePeriod,
            "expperiod".into(),
            DEFAULT_TIMEOUT,
        )
    }

    /// Set the exposure period, in seconds.
    pub fn set_exposure_period(seconds: f64) -> Command {
        Command::new(
            CommandKind::SetExposurePeriod,
            format!("expperiod {seconds:.6}"),
            DEFAULT_TIMEOUT,
        )
    }

    /// Query the energy setting, in eV.
    pub fn get_energy() -> Command {
        Command::new(CommandKind::GetEnergy, "setenergy".into(), ENERGY_TIMEOUT)
    }

    /// Set the energy, in eV.
    pub fn set_energy(ev: f64) -> Command {
        Command::new(
            CommandKind::SetEnergy,
            format!("setenergy {ev:.6}"),
            ENERGY_TIMEOUT,
        )
    }

    /// Arm the detector with the given trigger mode, writing images to
    /// `filename`.
    pub fn start(mode: TriggerMode, filename: &str) -> Command {
        Command::new(
            CommandKind::Start,
            format!("{} {}", mode.verb(), filename),
            START_TIMEOUT,
        )
    }

    /// Abort a running acquisition.
    pub fn stop() -> Command {
        Command::new(CommandKind::Stop, "k".into(), DEFAULT_TIMEOUT)
    }

    /// The kind of the command.
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// The command's text, without the wire terminator.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// How long to wait for this command's reply.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The full outgoing frame: the command text terminated by a single NUL
    /// byte. There is no length prefix and no other delimiter.
    pub fn as_frame(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.text.len() + 1);
        frame.extend_from_slice(self.text.as_bytes());
        frame.push(0);
        frame
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn frames_are_nul_terminated() {
        assert_eq!(Command::get_image_count().as_frame(), b"nimages\0");
        assert_eq!(Command::set_image_count(7).as_frame(), b"nimages 7\0");
        assert_eq!(Command::stop().as_frame(), b"k\0");
    }

    #[test]
    fn floats_use_six_decimals() {
        assert_eq!(Command::set_exposure_time(0.1).text(), "exptime 0.100000");
        assert_eq!(
            Command::set_exposure_period(1.5).text(),
            "expperiod 1.500000"
        );
        assert_eq!(Command::set_energy(12398.4).text(), "setenergy 12398.400000");
    }

    #[test]
    fn trigger_modes_map_to_verbs() {
        assert_eq!(
            Command::start(TriggerMode::Software, "a.cbf").text(),
            "exposure a.cbf"
        );
        assert_eq!(
            Command::start(TriggerMode::ExternalSingle, "a.cbf").text(),
            "exttrigger a.cbf"
        );
        assert_eq!(
            Command::start(TriggerMode::ExternalMulti, "a.cbf").text(),
            "extmtrigger a.cbf"
        );
        assert_eq!(
            Command::start(TriggerMode::ExternalEnable, "a.cbf").text(),
            "extenable a.cbf"
        );
    }

    #[test]
    fn timeouts_per_command() {
        assert_eq!(Command::set_image_count(1).timeout(), DEFAULT_TIMEOUT);
        assert_eq!(Command::get_energy().timeout(), ENERGY_TIMEOUT);
        assert_eq!(
            Command::start(TriggerMode::Software, "").timeout(),
            START_TIMEOUT
        );
    }
}
