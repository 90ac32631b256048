use std::{
	collections::VecDeque,
	fmt::Display,
	time::{Duration, Instant},
};

use log::{debug, warn};
use thiserror::Error;

use crate::config::SessionConfig;

use super::{normalize_sender, Command, Message, Reply, ReplyBuffer, ResponseCode};

/// How long `open` waits before actually asking for a connection.
pub const CONNECT_DELAY: Duration = Duration::from_millis(100);

/// One attempt at getting one message to one server.
///
/// A session does no I/O of its own. The caller tells it about transport and
/// timer events through the `on_*` and `handle_timeout` methods, then drains
/// [Action]s with [Session::poll_action] and carries them out in order. The
/// next deadline the caller has to wake up for is [Session::poll_timeout].
pub struct Session {
	config: SessionConfig,
	message: Message,
	state: State,
	buffer: ReplyBuffer,
	last_code: u16,

	connected: bool,
	established: bool,
	finished: bool,

	connect_at: Option<Instant>,
	timeout_at: Option<Instant>,

	actions: VecDeque<Action>,
}

impl Session {
	pub fn new(config: SessionConfig) -> Self {
		Self {
			config,
			message: Message::default(),
			state: State::default(),
			buffer: ReplyBuffer::default(),
			last_code: 0,
			connected: false,
			established: false,
			finished: false,
			connect_at: None,
			timeout_at: None,
			actions: VecDeque::new(),
		}
	}

	pub fn configure<S: Into<String>>(
		&mut self,
		host: S,
		port: u16,
		timeout: Duration,
	) -> Result<(), UsageError> {
		self.check_idle()?;

		self.config.host = host.into();
		self.config.port = port;
		self.config.timeout = timeout;
		Ok(())
	}

	pub fn set_sender(&mut self, sender: &str) -> Result<(), UsageError> {
		self.check_idle()?;
		self.message.sender = normalize_sender(sender);
		Ok(())
	}

	pub fn set_recipient<S: Into<String>>(&mut self, recipient: S) -> Result<(), UsageError> {
		self.check_idle()?;
		self.message.recipient = recipient.into();
		Ok(())
	}

	pub fn set_subject<S: Into<String>>(&mut self, subject: S) -> Result<(), UsageError> {
		self.check_idle()?;
		self.message.subject = subject.into();
		Ok(())
	}

	pub fn set_header<S: Into<String>>(&mut self, header: S) -> Result<(), UsageError> {
		self.check_idle()?;
		self.message.header = header.into();
		Ok(())
	}

	pub fn set_body<S: Into<String>>(&mut self, body: S) -> Result<(), UsageError> {
		self.check_idle()?;
		self.message.body = body.into();
		Ok(())
	}

	/// Schedule a connection. Calling this again while a connection is
	/// pending or up is allowed; the old one is dropped when the delay fires.
	pub fn open(&mut self, now: Instant) {
		if self.connected || self.connect_at.is_some() {
			debug!("open while a connection is active, it will be replaced");
		}

		self.connect_at = Some(now + CONNECT_DELAY);
	}

	/// Nudge the session along. Replies are what actually move it forward,
	/// so mostly this just makes sure we're connected and the timer is
	/// running.
	pub fn send(&mut self, now: Instant) {
		if !self.connected {
			self.connect(now);
		}

		if self.state == State::Finished && self.connected {
			self.finished = false;
			self.state = State::In;
			self.write(Output::Command(Command::Helo(self.config.domain.clone())));
		}

		if self.connected {
			self.timeout_at = self.deadline(now);
		}
	}

	/// Drop the connection and every timer. Transport and timer events that
	/// arrive after this are ignored.
	pub fn close(&mut self) {
		let active = self.connected || self.connect_at.is_some();

		self.connect_at = None;
		self.timeout_at = None;

		if !active {
			return;
		}

		if self.connected {
			self.actions.push_back(Action::Disconnect);
		}

		self.connected = false;
		self.established = false;
		self.buffer.clear();

		debug!("connection to {} closed", self.config.host);
		self.actions.push_back(Action::Notify(Event::ConnectionClosed));
	}

	/// The transport finished connecting.
	pub fn on_connected(&mut self, _now: Instant) {
		if self.connected {
			self.established = true;
		}
	}

	/// Bytes came in off the transport.
	pub fn on_received(&mut self, bytes: &[u8], now: Instant) {
		if !self.connected {
			debug!("dropping {} bytes received after close", bytes.len());
			return;
		}

		self.established = true;
		self.buffer.push(bytes);

		while let Some(line) = self.buffer.next_line() {
			self.timeout_at = None;
			self.process_line(&line);

			if !self.connected {
				return;
			}
		}

		if !self.idle() && self.timeout_at.is_none() {
			self.timeout_at = self.deadline(now);
		}
	}

	/// The peer hung up.
	pub fn on_transport_closed(&mut self) {
		if self.connected {
			self.close();
		}
	}

	pub fn on_transport_error(&mut self) {
		if self.connected {
			self.fail(SmtpError::ConnectError);
		}
	}

	pub fn handle_timeout(&mut self, now: Instant) {
		if matches!(self.connect_at, Some(at) if at <= now) {
			self.connect(now);
		}

		if matches!(self.timeout_at, Some(at) if at <= now) {
			self.timeout_at = None;

			if self.established {
				self.fail(SmtpError::InteractTimeout);
			} else {
				self.fail(SmtpError::ConnectTimeout);
			}
		}
	}

	/// The earliest point `handle_timeout` has something to do.
	pub fn poll_timeout(&self) -> Option<Instant> {
		[self.connect_at, self.timeout_at].into_iter().flatten().min()
	}

	pub fn poll_action(&mut self) -> Option<Action> {
		self.actions.pop_front()
	}

	pub fn state(&self) -> State {
		self.state
	}

	pub fn last_code(&self) -> u16 {
		self.last_code
	}

	pub fn is_connected(&self) -> bool {
		self.connected
	}

	pub fn is_finished(&self) -> bool {
		self.finished
	}

	pub fn message(&self) -> &Message {
		&self.message
	}

	pub fn config(&self) -> &SessionConfig {
		&self.config
	}

	fn connect(&mut self, now: Instant) {
		self.connect_at = None;

		if self.connected {
			// replacing a live connection doesn't count as closing it
			self.actions.push_back(Action::Disconnect);
		}

		self.buffer.clear();
		self.connected = true;
		self.established = false;
		self.finished = false;
		self.state = State::Init;
		self.last_code = 0;

		debug!("connecting to {}:{}", self.config.host, self.config.port);
		self.actions.push_back(Action::Connect {
			host: self.config.host.clone(),
			port: self.config.port,
		});

		self.timeout_at = self.deadline(now);
	}

	fn process_line(&mut self, line: &str) {
		let reply = Reply::from_line(line);
		self.last_code = reply.code.as_code();

		debug!("[{:?}] <- {}", self.state, line.trim_end());

		match reply.code {
			ResponseCode::ServiceReady => {
				self.state = State::In;
				self.write(Output::Command(Command::Helo(self.config.domain.clone())));
			}
			ResponseCode::ServiceClosing => self.state = State::Quit,
			ResponseCode::Okay => match self.state {
				State::In => {
					self.state = State::Ready;
					self.write(Output::Command(Command::Mail(self.message.sender.clone())));
				}
				State::Ready => {
					self.state = State::SentFrom;
					self.write(Output::Command(Command::Rcpt(
						self.message.recipient.clone(),
					)));
				}
				State::SentFrom => {
					self.state = State::SentTo;
					self.write(Output::Command(Command::Data));
				}
				State::Data => {
					self.state = State::Finished;
					self.finished = true;
					self.actions.push_back(Action::Notify(Event::MessageSent));

					// some servers complain about a duplicate HELO if we linger
					if !self.config.keep_alive {
						self.close();
					}
				}
				_ => self.command_error(SmtpError::Command, &reply),
			},
			ResponseCode::StartMailInput => {
				self.state = State::Data;
				self.write(Output::Data(self.message.payload()));
			}
			ResponseCode::InvalidParameters => self.command_error(SmtpError::Command, &reply),
			ResponseCode::PermanentMailFail => self.command_error(SmtpError::UnknownUser, &reply),
			ResponseCode::Unrecognized(_) => self.command_error(SmtpError::UnknownResponse, &reply),
		}
	}

	fn write(&mut self, output: Output) {
		match &output {
			Output::Command(command) => debug!("-> {}", command),
			Output::Data(data) => debug!("-> message data, {} bytes", data.len()),
		}

		self.actions.push_back(Action::Send(output));
	}

	fn command_error(&mut self, err: SmtpError, reply: &Reply) {
		warn!("smtp error in state {:?}: [{}]", self.state, reply);

		self.state = State::CommandError;
		self.fail(err);
	}

	fn fail(&mut self, err: SmtpError) {
		self.close();
		self.actions.push_back(Action::Notify(Event::Error(err)));
	}

	// a kept-alive connection sitting in Finished isn't waiting on anything,
	// every other connected state is waiting on the server
	fn idle(&self) -> bool {
		self.state == State::Finished
	}

	/// When the inactivity timer should fire. A timeout too large to land on
	/// a representable instant never fires.
	fn deadline(&self, now: Instant) -> Option<Instant> {
		let deadline = now.checked_add(self.config.timeout);

		if deadline.is_none() {
			debug!("timeout of {:?} is out of range, not arming it", self.config.timeout);
		}

		deadline
	}

	fn check_idle(&self) -> Result<(), UsageError> {
		if self.connected && !matches!(self.state, State::Init | State::Finished) {
			Err(UsageError::SessionActive(self.state))
		} else {
			Ok(())
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
	Init,
	In,
	Ready,
	SentFrom,
	SentTo,
	Data,
	Finished,
	Quit,
	CommandError,
}

impl Default for State {
	fn default() -> Self {
		State::Init
	}
}

/// Something the caller has to do on the session's behalf.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
	Connect { host: String, port: u16 },
	Send(Output),
	Disconnect,
	Notify(Event),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
	ConnectionClosed,
	MessageSent,
	Error(SmtpError),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Output {
	Command(Command),
	Data(String),
}

impl Display for Output {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Command(command) => write!(f, "{}\r\n", command),
			// already ends in the terminating ".\r\n"
			Self::Data(data) => write!(f, "{}", data),
		}
	}
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum SmtpError {
	#[error("timed out connecting to the server")]
	ConnectTimeout,
	#[error("timed out waiting for the server to reply")]
	InteractTimeout,
	#[error("there was an error connecting to the server")]
	ConnectError,
	#[error("the server rejected a command")]
	Command,
	#[error("the server does not know the recipient")]
	UnknownUser,
	#[error("the server sent a reply we don't understand")]
	UnknownResponse,
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum UsageError {
	#[error("the session can't be changed while it's in progress (state {0:?})")]
	SessionActive(State),
}
