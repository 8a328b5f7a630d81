//! Types that can exchange (read/write) bytes with a connected detector.
//!
//! The [`Backend`] trait represents all such types.

use std::io;
use std::net::TcpStream;
use std::time::Duration;

/// The placeholder name for a backend that doesn't have a name.
pub(crate) const UNKNOWN_BACKEND_NAME: &str = "<unknown backend>";

/// Types that allow reading and writing bytes with a connected detector.
pub trait Backend: io::Read + io::Write + private::Sealed {
	/// Set the read timeout.
	///
	/// If timeout is `None`, reads will block indefinitely.
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error>;

	/// Get the read timeout.
	///
	/// If timeout is `None`, reads will block indefinitely.
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error>;

	/// Put the backend into or out of non-blocking mode.
	///
	/// In non-blocking mode a read with no pending data fails immediately
	/// with [`std::io::ErrorKind::WouldBlock`] instead of waiting for the
	/// read timeout. This is how a zero-timeout poll is expressed.
	fn set_nonblocking(&mut self, nonblocking: bool) -> Result<(), io::Error>;

	/// Tear down the connection and establish a new one in place.
	///
	/// Any data buffered by the peer for the old connection is lost. Callers
	/// must not assume anything read before the reconnect still applies.
	fn reconnect(&mut self) -> Result<(), io::Error>;

	/// Get the "name" of the backend.
	///
	/// This can be in any format, but should uniquely identify the backend
	/// instance.
	fn name(&self) -> Option<String>;
}

impl<C: Backend + ?Sized> Backend for Box<C> {
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
		(**self).set_read_timeout(timeout)
	}
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		(**self).read_timeout()
	}
	fn set_nonblocking(&mut self, nonblocking: bool) -> Result<(), io::Error> {
		(**self).set_nonblocking(nonblocking)
	}
	fn reconnect(&mut self) -> Result<(), io::Error> {
		(**self).reconnect()
	}
	fn name(&self) -> Option<String> {
		(**self).name()
	}
}

impl<C: Backend + ?Sized> Backend for &mut C {
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
		(**self).set_read_timeout(timeout)
	}
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		(**self).read_timeout()
	}
	fn set_nonblocking(&mut self, nonblocking: bool) -> Result<(), io::Error> {
		(**self).set_nonblocking(nonblocking)
	}
	fn reconnect(&mut self) -> Result<(), io::Error> {
		(**self).reconnect()
	}
	fn name(&self) -> Option<String> {
		(**self).name()
	}
}

/// A TCP backend that remembers its remote endpoint.
//
// A bare `TcpStream` cannot implement [`Backend`] because once a stream has
// failed there is no way to recover the address it was connected to. Wrapping
// the stream together with the host and port it was opened against lets
// `reconnect` replace the stream in place, which is how the detector
// connection is kept "always valid" across server restarts.
#[derive(Debug)]
pub struct Tcp {
	stream: TcpStream,
	host: String,
	port: u16,
}

impl Tcp {
	/// Connect to the detector at the specified host and port.
	pub fn connect(host: &str, port: u16) -> Result<Tcp, io::Error> {
		let stream = TcpStream::connect((host, port))?;
		Ok(Tcp {
			stream,
			host: host.to_string(),
			port,
		})
	}

	/// The host this backend was opened against.
	pub fn host(&self) -> &str {
		&self.host
	}

	/// The port this backend was opened against.
	pub fn port(&self) -> u16 {
		self.port
	}
}

impl io::Read for Tcp {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		self.stream.read(buf)
	}
}

impl io::Write for Tcp {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		self.stream.write(buf)
	}

	fn flush(&mut self) -> io::Result<()> {
		self.stream.flush()
	}
}

impl Backend for Tcp {
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
		self.stream.set_read_timeout(timeout)
	}
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		self.stream.read_timeout()
	}
	fn set_nonblocking(&mut self, nonblocking: bool) -> Result<(), io::Error> {
		self.stream.set_nonblocking(nonblocking)
	}
	fn reconnect(&mut self) -> Result<(), io::Error> {
		// The replacement stream starts out blocking with no read timeout,
		// matching a freshly connected backend. Callers configure both on
		// every exchange.
		self.stream = TcpStream::connect((self.host.as_str(), self.port))?;
		Ok(())
	}
	fn name(&self) -> Option<String> {
		Some(format!("{}:{}", self.host, self.port))
	}
}

/// A mock backend for use in testing.
///
/// It has the following features:
///   * All data written to it is captured for inspection.
///   * It can be filled with data for reading. Each chunk added with
///     [`push`](Mock::push) models one reply that arrives only after the
///     peer has processed a command: it is returned by exactly one blocking
///     read and is invisible to non-blocking polls. Data added with
///     [`push_pending`](Mock::push_pending) models bytes already sitting on
///     the wire, visible to any read.
///   * Specific errors can be inserted for calls to `read`, `write`, `flush`,
///     and `set_read_timeout`.
///   * Reconnects are counted rather than performed.
#[cfg(any(test, feature = "mock"))]
#[derive(Debug)]
pub struct Mock {
	/// Staged replies, one chunk per blocking read.
	replies: std::collections::VecDeque<Vec<u8>>,
	/// Bytes already on the wire, visible to any read.
	pending: io::Cursor<Vec<u8>>,
	/// All bytes written to the backend, in order.
	written: Vec<u8>,
	/// Whether the backend is in non-blocking mode.
	nonblocking: bool,
	/// The number of times `reconnect` has been called.
	reconnects: usize,
	/// The error to surface on the next read, if any. It is only surfaced once.
	read_error: Option<io::Error>,
	/// The error to surface on the next write, if any. It is only surfaced once.
	write_error: Option<io::Error>,
	/// The error to surface on the next flush, if any. It is only surfaced once.
	flush_error: Option<io::Error>,
	/// The error to surface on the next set_read_timeout, if any. It is only surfaced once.
	set_read_timeout_error: Option<io::Error>,
	/// The read timeout, which is ignored.
	ignored_read_timeout: Option<Duration>,
}

#[cfg(any(test, feature = "mock"))]
impl Mock {
	/// Create a new Mock backend.
	pub fn new() -> Self {
		Mock {
			replies: std::collections::VecDeque::new(),
			pending: io::Cursor::new(Vec::new()),
			written: Vec::new(),
			nonblocking: false,
			reconnects: 0,
			read_error: None,
			write_error: None,
			flush_error: None,
			set_read_timeout_error: None,
			ignored_read_timeout: Some(Duration::ZERO),
		}
	}
	/// Stage one reply chunk, returned whole by a single blocking read.
	///
	/// The data is not validated in any way.
	pub fn push<T: AsRef<[u8]>>(&mut self, bytes: T) {
		self.replies.push_back(bytes.as_ref().to_vec());
	}
	/// Append data that is already on the wire, readable by any read.
	///
	/// The data is not validated in any way.
	pub fn push_pending<T: AsRef<[u8]>>(&mut self, bytes: T) {
		self.pending.get_mut().extend_from_slice(bytes.as_ref());
	}
	/// Clear all readable data.
	pub fn clear(&mut self) {
		self.replies.clear();
		self.pending.get_mut().clear();
		self.pending.set_position(0);
	}
	/// Whether the mock has any data available or not
	pub fn is_empty(&self) -> bool {
		!self.has_pending() && self.replies.is_empty()
	}
	fn has_pending(&self) -> bool {
		(self.pending.position() as usize) < self.pending.get_ref().len()
	}
	/// All bytes written to the backend so far.
	pub fn written(&self) -> &[u8] {
		&self.written
	}
	/// Take all bytes written to the backend so far, clearing the capture.
	pub fn take_written(&mut self) -> Vec<u8> {
		std::mem::take(&mut self.written)
	}
	/// The number of times the backend has been asked to reconnect.
	pub fn reconnects(&self) -> usize {
		self.reconnects
	}
	/// Set the error for the next `read`, if any.
	pub fn read_error(&mut self, err: Option<io::Error>) {
		self.read_error = err;
	}
	/// Set the error for the next `write`, if any.
	pub fn write_error(&mut self, err: Option<io::Error>) {
		self.write_error = err;
	}
	/// Set the error for the next `flush`, if any.
	pub fn flush_error(&mut self, err: Option<io::Error>) {
		self.flush_error = err;
	}
	/// Set the error for the next `set_read_timeout`, if any.
	pub fn set_read_timeout_error(&mut self, err: Option<io::Error>) {
		self.set_read_timeout_error = err;
	}
}

#[cfg(any(test, feature = "mock"))]
impl Default for Mock {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(any(test, feature = "mock"))]
impl Backend for Mock {
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
		if let Some(err) = self.set_read_timeout_error.take() {
			Err(err)
		} else {
			self.ignored_read_timeout = timeout;
			Ok(())
		}
	}

	fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		Ok(self.ignored_read_timeout)
	}

	fn set_nonblocking(&mut self, nonblocking: bool) -> Result<(), io::Error> {
		self.nonblocking = nonblocking;
		Ok(())
	}

	fn reconnect(&mut self) -> Result<(), io::Error> {
		// A reconnect replaces the socket, so anything buffered is gone and
		// the fresh connection starts out blocking.
		self.clear();
		self.nonblocking = false;
		self.reconnects += 1;
		Ok(())
	}

	fn name(&self) -> Option<String> {
		Some(format!("<mock 0x{:x}>", self as *const Mock as usize))
	}
}

#[cfg(any(test, feature = "mock"))]
impl io::Read for Mock {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		if let Some(err) = self.read_error.take() {
			return Err(err);
		}
		if self.has_pending() {
			return self.pending.read(buf);
		}
		if self.nonblocking {
			// Staged replies have not "arrived" yet from the point of view
			// of a non-blocking poll.
			return Err(io::Error::new(
				io::ErrorKind::WouldBlock,
				"Simulated empty socket",
			));
		}
		match self.replies.pop_front() {
			Some(mut chunk) => {
				let n = chunk.len().min(buf.len());
				buf[..n].copy_from_slice(&chunk[..n]);
				if n < chunk.len() {
					chunk.drain(..n);
					self.replies.push_front(chunk);
				}
				Ok(n)
			}
			// For a real device, having no data ready would result in a wait
			// and then eventual timeout error. However, as our data is in
			// memory that does not happen here. So simulate that behaviour by
			// returning the appropriate error immediately.
			None => Err(io::Error::new(
				io::ErrorKind::TimedOut,
				"Simulated timeout error",
			)),
		}
	}
}

#[cfg(any(test, feature = "mock"))]
impl io::Write for Mock {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		if let Some(err) = self.write_error.take() {
			Err(err)
		} else {
			self.written.extend_from_slice(buf);
			Ok(buf.len())
		}
	}

	fn flush(&mut self) -> io::Result<()> {
		if let Some(err) = self.flush_error.take() {
			Err(err)
		} else {
			Ok(())
		}
	}
}

mod private {
	pub trait Sealed {}

	impl Sealed for super::Tcp {}
	#[cfg(any(test, feature = "mock"))]
	impl Sealed for super::Mock {}
	impl<C: super::Backend + ?Sized> Sealed for Box<C> {}
	impl<C: super::Backend + ?Sized> Sealed for &mut C {}
}
