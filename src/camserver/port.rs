//! The camera control server port.


use crate::backend::{Backend, Tcp, UNKNOWN_BACKEND_NAME};
use crate::camserver::acquisition::{AcquisitionState, Completion};
use crate::camserver::command::{Command, CommandKind};
use crate::camserver::response;
use crate::error::{
	AcquisitionFailedError, BusyError, ConnectionError, Error, ProtocolError, TimeoutError,
};
use crate::timeout_guard::TimeoutGuard;
use std::io;
use std::time::{Duration, Instant};

/// The size of a single read from the control connection.
pub(crate) const BUF_SIZE: usize = 1024;

/// The control port the camera server listens on.
pub const DEFAULT_PORT: u16 = 8888;

/// A validated reply from the camera control server.
///
/// The reply's extracted field, if its command kind carries one, is available
/// via [`field`](Reply::field). The full reply line is always available via
/// [`text`](Reply::text).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
	text: String,
	field: Option<String>,
}

impl Reply {
	/// The full reply line as received.
	pub fn text(&self) -> &str {
		&self.text
	}

	/// The field extracted by the command's grammar, if any.
	pub fn field(&self) -> Option<&str> {
		self.field.as_deref()
	}
}

/// A port for exchanging commands and replies with a camera control server.
///
/// The protocol has no multiplexing: exactly one command is in flight at a
/// time, and the reply to it is the next thing the server sends. The port
/// enforces this by requiring `&mut self` for every exchange and by draining
/// stale bytes from earlier, timed out exchanges before each send.
///
/// While an acquisition is running only a stop may be sent; anything else
/// fails with a [`BusyError`]. See [`execute`](Port::execute).
///
/// A port is not designed for concurrent use from multiple threads: wrap it
/// in a `Mutex` and hold the lock for the whole exchange if it must be
/// shared.
pub struct Port<B> {
	/// The underlying backend
	backend: B,
	/// Whether an exposure is thought to be in flight.
	state: AcquisitionState,
	/// If populated, the error that has "poisoned" the port. This error MUST be
	/// reported before the port is used for communication again.
	///
	/// A port becomes "poisoned" when an error occurs that
	///
	///  * cannot be recovered from,
	///  * panicking is ill advised,
	///  * and it is safe to delay reporting of the error until the next attempt
	///    to communicate over the port.
	///
	/// For instance, if a [`TimeoutGuard`] cannot restore the original timeout
	/// in its Drop implementation, rather than panicking (which would almost
	/// certainly cause the program to abort rather than unwind the stack) it
	/// can poison the port.
	poison: Option<io::Error>,
}

impl<B: Backend> std::fmt::Debug for Port<B> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Port")
			.field("name", &self.backend.name())
			.field("state", &self.state)
			.finish_non_exhaustive()
	}
}

impl Port<Tcp> {
	/// Open a TCP connection to the camera control server at `host`.
	///
	/// ## Example
	///
	/// ```rust
	/// # use pilproto::camserver::{Port, DEFAULT_PORT};
	/// # fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
	/// let mut port = Port::open_tcp("10.0.0.5", DEFAULT_PORT)?;
	/// # Ok(())
	/// # }
	/// ```
	pub fn open_tcp(host: &str, port: u16) -> Result<Port<Tcp>, ConnectionError> {
		Ok(Port::from_backend(
			Tcp::connect(host, port).map_err(ConnectionError::new)?,
		))
	}
}

#[cfg(any(test, feature = "mock"))]
impl Port<crate::backend::Mock> {
	/// Open a port with a [`Mock`](crate::backend::Mock) backend.
	pub fn open_mock() -> Port<crate::backend::Mock> {
		Port::from_backend(crate::backend::Mock::new())
	}
}

impl<B: Backend> Port<B> {
	/// Create a `Port` around the specified backend.
	pub fn from_backend(backend: B) -> Port<B> {
		Port {
			backend,
			state: AcquisitionState::Idle,
			poison: None,
		}
	}

	/// Check if the port is poisoned and report the error if it exists.
	fn check_poisoned(&mut self) -> Result<(), io::Error> {
		if let Some(poison) = self.poison.take() {
			Err(poison)
		} else {
			Ok(())
		}
	}

	/// Send a command and receive its validated reply.
	///
	/// The exchange is:
	///
	/// 1. If an acquisition is running and the command is not a stop, fail
	///    with [`BusyError`] without touching the wire.
	/// 2. Discard any stale bytes left over from a prior incomplete exchange,
	///    such as a late completion notice.
	/// 3. Send the command frame.
	/// 4. Wait up to the command's timeout for a reply. No reply is a
	///    [`TimeoutError`].
	/// 5. Validate the reply against the command's grammar. A mismatch is a
	///    [`ProtocolError`].
	///
	/// A successful start transitions the port to the running state; from
	/// then on [`is_acquiring`](Port::is_acquiring) tracks the acquisition.
	/// A confirmed stop transitions it back to idle.
	pub fn execute(&mut self, cmd: &Command) -> Result<Reply, Error> {
		self.check_poisoned().map_err(ConnectionError::new)?;
		if cmd.kind() != CommandKind::Stop && self.is_acquiring()? {
			return Err(BusyError::new().into());
		}
		self.drain_stale()?;
		self.send(cmd)?;
		let Some(text) = self.recv(cmd.timeout())? else {
			return Err(TimeoutError::new().into());
		};
		let field = response::check(cmd.kind(), &text)?.map(str::to_string);
		match cmd.kind() {
			CommandKind::Start => self.state = AcquisitionState::Running,
			CommandKind::Stop => self.state = AcquisitionState::Idle,
			_ => {}
		}
		Ok(Reply { text, field })
	}

	/// Whether an acquisition is in flight.
	///
	/// This never blocks. If an acquisition was running, a zero-timeout poll
	/// checks for a pending completion notice: a success notice clears the
	/// state, a failure notice clears the state and surfaces an
	/// [`AcquisitionFailedError`], and anything else leaves it running.
	pub fn is_acquiring(&mut self) -> Result<bool, Error> {
		if self.state == AcquisitionState::Idle {
			return Ok(false);
		}
		match self.poll_line()? {
			None => Ok(true),
			Some(line) => match Completion::classify(&line) {
				Completion::Done => {
					self.state = AcquisitionState::Idle;
					Ok(false)
				}
				Completion::Failed => {
					self.state = AcquisitionState::Idle;
					Err(AcquisitionFailedError::new(line).into())
				}
				Completion::Unrelated => Ok(true),
			},
		}
	}

	/// Abort a running acquisition.
	///
	/// If no acquisition is running this does nothing. Otherwise it discards
	/// any stale bytes, sends the abort command, and then reads from the
	/// connection until the completion
	/// notice arrives, bounded by `deadline`. If the notice does not arrive
	/// in time the port is forced back to idle and a [`ProtocolError`] is
	/// returned, since the connection can no longer be assumed to be in sync.
	pub fn stop(&mut self, deadline: Duration) -> Result<(), Error> {
		self.check_poisoned().map_err(ConnectionError::new)?;
		if !self.is_acquiring()? {
			return Ok(());
		}
		self.drain_stale()?;
		self.send(&Command::stop())?;
		let started = Instant::now();
		let mut buf = String::new();
		while !buf.contains(response::COMPLETION_OK) {
			let remaining = match deadline.checked_sub(started.elapsed()) {
				Some(remaining) if remaining > Duration::ZERO => remaining,
				_ => {
					self.state = AcquisitionState::Idle;
					return Err(ProtocolError::new(&buf).into());
				}
			};
			match self.recv(remaining)? {
				Some(chunk) => buf.push_str(&chunk),
				None => {
					self.state = AcquisitionState::Idle;
					return Err(ProtocolError::new(&buf).into());
				}
			}
		}
		self.state = AcquisitionState::Idle;
		Ok(())
	}

	/// Discard any bytes the server sent before now.
	///
	/// While data is immediately available, read and discard it. A zero
	/// length read (the peer closed the connection) or a transport error
	/// replaces the connection in place. In either case the drain returns
	/// without assuming the replaced connection was fully emptied.
	pub fn drain_stale(&mut self) -> Result<(), ConnectionError> {
		self.backend
			.set_nonblocking(true)
			.map_err(ConnectionError::new)?;
		let mut buf = [0u8; BUF_SIZE];
		loop {
			match self.backend.read(&mut buf) {
				Ok(0) => {
					log::warn!(
						"{} closed by peer, reconnecting",
						self.backend
							.name()
							.unwrap_or_else(|| UNKNOWN_BACKEND_NAME.to_string())
					);
					return self.backend.reconnect().map_err(ConnectionError::new);
				}
				Ok(n) => {
					log::debug!(
						"{} discarding {} stale bytes",
						self.backend
							.name()
							.unwrap_or_else(|| UNKNOWN_BACKEND_NAME.to_string()),
						n
					);
				}
				Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
				Err(_) => {
					return self.backend.reconnect().map_err(ConnectionError::new);
				}
			}
		}
		self.backend
			.set_nonblocking(false)
			.map_err(ConnectionError::new)
	}

	/// Send a command frame.
	fn send(&mut self, cmd: &Command) -> Result<(), ConnectionError> {
		log::debug!(
			"{} TX:   {}",
			self.backend
				.name()
				.unwrap_or_else(|| UNKNOWN_BACKEND_NAME.to_string()),
			cmd.text()
		);
		let frame = cmd.as_frame();
		if let Err(e) = self
			.backend
			.write_all(&frame)
			.and_then(|()| self.backend.flush())
		{
			// Reestablish the connection so the next command has a chance,
			// but report this one as failed.
			let _ = self.backend.reconnect();
			return Err(ConnectionError::new(e));
		}
		Ok(())
	}

	/// Wait up to `timeout` for a reply chunk.
	///
	/// Returns `Ok(None)` if the timeout elapses with no data. That is the
	/// expected outcome while an exposure is in progress, not an error.
	fn recv(&mut self, timeout: Duration) -> Result<Option<String>, Error> {
		self.backend
			.set_read_timeout(Some(timeout))
			.map_err(ConnectionError::new)?;
		let mut buf = [0u8; BUF_SIZE];
		match self.backend.read(&mut buf) {
			Ok(0) => {
				let _ = self.backend.reconnect();
				Err(ConnectionError::new(io::Error::new(
					io::ErrorKind::ConnectionReset,
					"connection closed by peer",
				))
				.into())
			}
			Ok(n) => Ok(Some(self.decode(&buf[..n])?)),
			Err(e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => {
				Ok(None)
			}
			Err(e) => {
				let _ = self.backend.reconnect();
				Err(ConnectionError::new(e).into())
			}
		}
	}

	/// A zero-timeout poll for a pending line.
	fn poll_line(&mut self) -> Result<Option<String>, Error> {
		self.backend
			.set_nonblocking(true)
			.map_err(ConnectionError::new)?;
		let mut buf = [0u8; BUF_SIZE];
		let result = match self.backend.read(&mut buf) {
			Ok(0) => {
				let _ = self.backend.reconnect();
				Err(ConnectionError::new(io::Error::new(
					io::ErrorKind::ConnectionReset,
					"connection closed by peer",
				))
				.into())
			}
			Ok(n) => self.decode(&buf[..n]).map(Some).map_err(Into::into),
			Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
			Err(e) => {
				let _ = self.backend.reconnect();
				Err(ConnectionError::new(e).into())
			}
		};
		self.backend
			.set_nonblocking(false)
			.map_err(ConnectionError::new)?;
		result
	}

	/// Decode a received chunk as ASCII text and log it.
	fn decode(&mut self, bytes: &[u8]) -> Result<String, ProtocolError> {
		log::debug!(
			"{} RECV: {}",
			self.backend
				.name()
				.unwrap_or_else(|| UNKNOWN_BACKEND_NAME.to_string()),
			String::from_utf8_lossy(bytes).trim_end()
		);
		match std::str::from_utf8(bytes) {
			Ok(text) => Ok(text.to_string()),
			Err(_) => Err(ProtocolError::new(String::from_utf8_lossy(bytes))),
		}
	}

	/// Set the port timeout and return a "scope guard" that will reset the timeout when it goes out of scope.
	///
	/// If no timeout is specified, reads can block indefinitely.
	///
	/// While the guard is in scope, the port can only be accessed through the guard.
	/// However, because the guard implements [`Deref`](std::ops::Deref) and [`DerefMut`](std::ops::DerefMut) callers can treat the guard as the port.
	pub fn timeout_guard(
		&mut self,
		timeout: Option<Duration>,
	) -> Result<TimeoutGuard<'_, B, Self>, io::Error> {
		self.check_poisoned()?;

		TimeoutGuard::new(self, timeout)
	}

	/// Set the read timeout and return the old timeout.
	///
	/// If timeout is `None`, reads will block indefinitely.
	pub fn set_read_timeout(
		&mut self,
		timeout: Option<Duration>,
	) -> Result<Option<Duration>, io::Error> {
		let old = self.backend.read_timeout()?;
		self.backend.set_read_timeout(timeout)?;
		Ok(old)
	}

	/// Get the read timeout.
	///
	/// If it is `None`, reads will block indefinitely.
	pub fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		self.backend.read_timeout()
	}

	/// Get the "name" of the port's backend.
	///
	/// This is often the host and port passed to [`Port::open_tcp`].
	pub fn name(&self) -> Option<String> {
		self.backend.name()
	}

	/// Get a reference to the backend.
	pub fn backend(&self) -> &B {
		&self.backend
	}

	/// Get a mutable reference to the backend.
	pub fn backend_mut(&mut self) -> &mut B {
		&mut self.backend
	}

	/// Consume the port and return the underlying backend.
	///
	/// Note that any data the port has buffered will be lost. Callers should
	/// ensure that all expected data has been sent and received.
	pub fn into_backend(self) -> B {
		self.backend
	}
}

impl<B: Backend> crate::timeout_guard::Port<B> for Port<B> {
	fn backend_mut(&mut self) -> &mut B {
		&mut self.backend
	}
	fn poison(&mut self, e: io::Error) {
		self.poison = Some(e);
	}
}
