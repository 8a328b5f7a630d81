//! The reply grammar for each command kind.
//!
//! Replies from the camera control server are a single line of ASCII text
//! beginning with a numeric status code and `OK` or `ERR`. A reply is only
//! accepted if it matches the grammar registered for the command that
//! elicited it. The match is anchored at the start of the line, so leading
//! garbage from a desynchronized exchange is never silently accepted.

use crate::camserver::command::CommandKind;
use crate::error::ProtocolError;
use once_cell::sync::Lazy;
use regex::Regex;

/// The status prefix of an acquisition completion notice.
pub(crate) const COMPLETION_OK: &str = "7 OK";
/// The status prefix of an acquisition failure notice.
pub(crate) const COMPLETION_ERR: &str = "7 ERR";

macro_rules! pattern {
    ($name:ident, $pattern:expr) => {
        static $name: Lazy<Regex> =
            Lazy::new(|| Regex::new($pattern).expect("hard-coded pattern is valid"));
    };
}

pattern!(IMAGE_COUNT, r"\A15 OK N images set to: (\d+)");
pattern!(IMAGE_PATH, "\\A10 OK (.*)\x18");
// The stray `.` before the terminator is in the server's reply text.
pattern!(EXPOSURE_TIME, "\\A15 OK Exposure time set to: (.*) sec.\x18");
pattern!(EXPOSURE_PERIOD, "\\A15 OK Exposure period set to: (.*) sec\x18");
pattern!(ENERGY, r"\A15 OK Energy setting: (.*) eV");

/// How a reply to one command kind is validated.
enum Grammar {
    /// The reply must match the pattern; the first capture group is the value.
    Extract(&'static Lazy<Regex>),
    /// The reply must begin with the given status prefix; there is no value.
    Status(&'static str),
    /// Like [`Grammar::Status`] with prefix `15 OK`, but the reply must also
    /// be free of the `ERR` marker anywhere in the line.
    Armed,
}

impl Grammar {
    fn for_kind(kind: CommandKind) -> Grammar {
        match kind {
            CommandKind::GetImageCount => Grammar::Extract(&IMAGE_COUNT),
            CommandKind::GetImagePath => Grammar::Extract(&IMAGE_PATH),
            CommandKind::GetExposureTime => Grammar::Extract(&EXPOSURE_TIME),
            CommandKind::GetExposurePeriod => Grammar::Extract(&EXPOSURE_PERIOD),
            CommandKind::GetEnergy => Grammar::Extract(&ENERGY),
            CommandKind::SetImageCount
            | CommandKind::SetExposureTime
            | CommandKind::SetExposurePeriod
            | CommandKind::SetEnergy => Grammar::Status("15 OK"),
            CommandKind::SetImagePath => Grammar::Status("10 OK"),
            CommandKind::Start => Grammar::Armed,
            CommandKind::Stop => Grammar::Status(COMPLETION_OK),
        }
    }
}

/// Validate `reply` against the grammar for `kind`.
///
/// Returns the extracted field for kinds that carry one, or `None` for
/// status-only kinds. A reply that does not match is a [`ProtocolError`].
pub(crate) fn check(kind: CommandKind, reply: &str) -> Result<Option<&str>, ProtocolError> {
    match Grammar::for_kind(kind) {
        Grammar::Extract(pattern) => match pattern.captures(reply) {
            Some(captures) => Ok(captures.get(1).map(|field| field.as_str())),
            None => Err(ProtocolError::new(reply)),
        },
        Grammar::Status(prefix) => {
            if reply.starts_with(prefix) {
                Ok(None)
            } else {
                Err(ProtocolError::new(reply))
            }
        }
        Grammar::Armed => {
            if reply.starts_with("15 OK") && !reply.contains("ERR") {
                Ok(None)
            } else {
                Err(ProtocolError::new(reply))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn image_count_field_is_extracted() {
        let field = check(CommandKind::GetImageCount, "15 OK N images set to: 7");
        assert_eq!(field, Ok(Some("7")));
    }

    #[test]
    fn image_path_stops_at_terminator() {
        let field = check(CommandKind::GetImagePath, "10 OK /lima_data/\x18");
        assert_eq!(field, Ok(Some("/lima_data/")));
    }

    #[test]
    fn exposure_timing_fields_are_extracted() {
        let field = check(
            CommandKind::GetExposureTime,
            "15 OK Exposure time set to: 0.100000 sec.\x18",
        );
        assert_eq!(field, Ok(Some("0.100000")));

        let field = check(
            CommandKind::GetExposurePeriod,
            "15 OK Exposure period set to: 0.110000 sec\x18",
        );
        assert_eq!(field, Ok(Some("0.110000")));
    }

    #[test]
    fn energy_field_is_extracted() {
        let field = check(CommandKind::GetEnergy, "15 OK Energy setting: 12398 eV");
        assert_eq!(field, Ok(Some("12398")));
    }

    #[test]
    fn malformed_replies_are_rejected() {
        let err = check(CommandKind::GetImageCount, "99 WUT").unwrap_err();
        assert_eq!(err.reply(), "99 WUT");
    }

    #[test]
    fn matches_are_anchored_at_the_start() {
        // A match after leading garbage would mean we accepted a reply from
        // some other, earlier exchange.
        let reply = "junk 15 OK N images set to: 7";
        assert!(check(CommandKind::GetImageCount, reply).is_err());
    }

    #[test]
    fn setter_replies_only_need_the_status() {
        assert_eq!(
            check(CommandKind::SetImageCount, "15 OK N images set to: 7"),
            Ok(None)
        );
        assert_eq!(check(CommandKind::SetImagePath, "10 OK /tmp/x/\x18"), Ok(None));
        assert!(check(CommandKind::SetImageCount, "15 ERR nope").is_err());
    }

    #[test]
    fn arming_rejects_any_err_marker() {
        assert_eq!(check(CommandKind::Start, "15 OK Starting exposure"), Ok(None));
        assert!(check(CommandKind::Start, "15 OK but also ERR later").is_err());
        assert!(check(CommandKind::Start, "15 ERR access denied").is_err());
    }
}
