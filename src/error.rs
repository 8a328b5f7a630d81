//! Error types.
//!
//! Each error is represented by a unique type that implements [`std::error::Error`].
//! However, most APIs return more than one kind of error and so will return the
//! higher level [`Error`] enum. Each error type is convertible to [`Error`],
//! allowing it to be used with `?`:
//!
//! ```
//! use pilproto::error::{ProtocolError, Error};
//!
//! fn foo() -> Result<(), ProtocolError> {
//!     // ...
//! # unimplemented!();
//! }
//!
//! fn bar() -> Result<(), Error> {
//!     foo()?;
//!     // ...
//! # Ok(())
//! }
//! ```
//!
//! For error types that carry the offending reply, use the `reply()` method to
//! retrieve it.

/// Implement Error and Display traits for the specified type.
///
/// If type is generic, define the trait bounds before the type as you normally
/// would, but omitting the impl keyword (for brevity). After the type define
/// the format string and any arguments it should reference after `self =>` (to
/// abide by macro hygiene rules).
macro_rules! impl_error_display {
    (
        $( <$($t:tt : $bound:path),+> )?
        $name:path,
        $self:ident =>
        $display:literal
        $(,
            $($arg:expr),+
        )?
    ) => {
        impl$(<$($t : $bound),+>)? std::error::Error for $name {}

        impl$(<$($t : $bound),+>)? std::fmt::Display for $name {
            fn fmt(&$self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                writeln!(
                    f,
                    $display
                    $(,
                        $($arg),+
                    )?
                )
            }
        }
    };
}

/// Implement the `new()` and `reply()` methods for errors storing the
/// offending reply text.
macro_rules! impl_for_type_containing_reply {
    (
        $name:ident
    ) => {
        impl $name {
            /// Create an instance of the error
            pub(crate) fn new<R: AsRef<str>>(reply: R) -> Self {
                $name(Box::from(reply.as_ref()))
            }

            /// Get the reply text that triggered the error.
            pub fn reply(&self) -> &str {
                &self.0
            }
        }
    };
}

/// Define error enums that contain concrete error types (not other error enums).
///
/// From and TryFrom traits will be implemented for the enum and it's underlying
/// errors. The enum's Display implementation will defer to the underlying errors'
/// Display implementations.
macro_rules! error_enum {
    (
        $(#[$attr:meta])*
        pub enum $name:ident {
            $(
                $variant:ident($inner:path)
            ),+
            $(,)?
        }
    ) => {
        // Define the error enum itself
        $(
            #[$attr]
        )*
        #[allow(missing_docs)]
        pub enum $name {
            $(
                $variant($inner )
            ),+
        }

        impl std::error::Error for $name {}

        // Defer the display to the inner error type
        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(
                        $name::$variant(e) => e.fmt(f)
                    ),+
                }
            }
        }

        // Allow the enum to be convertible from an infallible error
        impl From<std::convert::Infallible> for $name {
            fn from(_: std::convert::Infallible) -> Self {
                unreachable!();
            }
        }

        // Conversions with underlying errors
        $(
            impl From<$inner> for $name {
                fn from(other: $inner) -> Self {
                    $name::$variant(other)
                }
            }

            impl TryFrom<$name> for $inner {
                type Error = $name;
                fn try_from(other: $name) -> Result<Self, Self::Error> {
                    match other {
                        $name::$variant(value) => Ok(value),
                        value => Err(value)
                    }
                }
            }
        )+
    };
}

/// The connection to the camera control server failed and could not be
/// re-established.
#[derive(Debug)]
pub struct ConnectionError(std::io::Error);

impl_error_display! {
    ConnectionError,
    self =>
    "the connection to the camera control server failed: {}", self.0
}

impl ConnectionError {
    pub(crate) fn new(err: std::io::Error) -> Self {
        ConnectionError(err)
    }

    /// Get the underlying I/O error.
    pub fn io_error(&self) -> &std::io::Error {
        &self.0
    }
}

impl From<ConnectionError> for std::io::Error {
    /// Consume the error and return the underlying I/O error.
    fn from(other: ConnectionError) -> Self {
        other.0
    }
}

/// An exposure is already in progress, so the requested operation cannot run.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct BusyError(());

impl_error_display! {
    BusyError,
    self =>
    "an exposure is in progress: the detector only accepts a stop request while acquiring"
}

impl BusyError {
    pub(crate) fn new() -> Self {
        BusyError(())
    }
}

/// A reply was received but did not match the expected grammar for the command.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ProtocolError(Box<str>);

impl_error_display! {
    ProtocolError,
    self =>
    "unexpected reply from the camera control server: {}", self.0
}
impl_for_type_containing_reply! { ProtocolError }

/// No reply arrived within the command's response window.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct TimeoutError(());

impl_error_display! {
    TimeoutError,
    self =>
    "no response from the camera control server"
}

impl TimeoutError {
    pub(crate) fn new() -> Self {
        TimeoutError(())
    }
}

/// The requested exposure timing is impossible for the detector.
///
/// The exposure time must leave at least the detector's readout time (3 ms)
/// inside each exposure period.
#[derive(Debug, PartialEq)]
pub struct InvalidTimingError {
    exposure_time: f64,
    exposure_period: f64,
}

impl_error_display! {
    InvalidTimingError,
    self =>
    "invalid exposure timing: an exposure time of {} s does not fit in a period of {} s with 3 ms of readout",
    self.exposure_time, self.exposure_period
}

impl InvalidTimingError {
    pub(crate) fn new(exposure_time: f64, exposure_period: f64) -> Self {
        InvalidTimingError {
            exposure_time,
            exposure_period,
        }
    }

    /// The exposure time, in seconds, that was requested.
    pub fn exposure_time(&self) -> f64 {
        self.exposure_time
    }

    /// The exposure period, in seconds, the exposure time was checked against.
    pub fn exposure_period(&self) -> f64 {
        self.exposure_period
    }
}

/// The detector reported that an acquisition finished with an error.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct AcquisitionFailedError(Box<str>);

impl_error_display! {
    AcquisitionFailedError,
    self =>
    "the acquisition failed: {}", self.0
}
impl_for_type_containing_reply! { AcquisitionFailedError }

error_enum! {
    /// Any error returned while communicating with a detector.
    #[derive(Debug)]
    #[non_exhaustive]
    pub enum Error {
        Connection(ConnectionError),
        Busy(BusyError),
        Protocol(ProtocolError),
        Timeout(TimeoutError),
        InvalidTiming(InvalidTimingError),
        AcquisitionFailed(AcquisitionFailedError),
    }
}

impl Error {
    /// A convenience function for determining if the error is due to the
    /// detector not responding in time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use static_assertions::assert_impl_all;

    #[test]
    fn error_traits() {
        assert_impl_all!(Error: std::error::Error, std::fmt::Debug, Send, Sync);
        assert_impl_all!(ConnectionError: std::error::Error);
        assert_impl_all!(BusyError: std::error::Error);
        assert_impl_all!(ProtocolError: std::error::Error);
        assert_impl_all!(TimeoutError: std::error::Error);
        assert_impl_all!(InvalidTimingError: std::error::Error);
        assert_impl_all!(AcquisitionFailedError: std::error::Error);
    }

    #[test]
    fn error_conversions() {
        let err: Error = TimeoutError::new().into();
        assert!(err.is_timeout());
        let back: Result<TimeoutError, _> = err.try_into();
        assert!(back.is_ok());

        let err: Error = ProtocolError::new("1 ERR huh").into();
        assert!(!err.is_timeout());
        match err {
            Error::Protocol(inner) => assert_eq!(inner.reply(), "1 ERR huh"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
