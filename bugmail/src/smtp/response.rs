use std::fmt::Display;

use log::debug;

/// One reply line from the server. Only the leading code drives the session;
/// the text is kept around for logging.
#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
	pub code: ResponseCode,
	pub text: String,
}

impl Reply {
	/// Parse a single line, without its `\n`. The code is whatever comes before
	/// the first space, and anything that doesn't parse as a number becomes 0.
	pub fn from_line(line: &str) -> Self {
		let line = line.trim_end_matches('\r');
		let (code, text) = line.split_once(' ').unwrap_or((line, ""));

		if code.len() > 3 {
			debug!("reply code longer than three digits: {}", code);
		}

		Self {
			code: ResponseCode::from_code(code.parse().unwrap_or(0)),
			text: text.to_owned(),
		}
	}
}

impl Display for Reply {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{} {}", self.code.as_code(), self.text)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseCode {
	ServiceReady,      // 220
	ServiceClosing,    // 221
	Okay,              // 250
	StartMailInput,    // 354
	InvalidParameters, // 501
	PermanentMailFail, // 550

	/// Anything we don't act on, including 0 for a code that didn't parse
	Unrecognized(u16),
}

impl ResponseCode {
	pub fn from_code(code: u16) -> ResponseCode {
		match code {
			220 => ResponseCode::ServiceReady,
			221 => ResponseCode::ServiceClosing,
			250 => ResponseCode::Okay,
			354 => ResponseCode::StartMailInput,
			501 => ResponseCode::InvalidParameters,
			550 => ResponseCode::PermanentMailFail,
			_ => ResponseCode::Unrecognized(code),
		}
	}

	pub fn as_code(self) -> u16 {
		match self {
			ResponseCode::ServiceReady => 220,
			ResponseCode::ServiceClosing => 221,
			ResponseCode::Okay => 250,
			ResponseCode::StartMailInput => 354,
			ResponseCode::InvalidParameters => 501,
			ResponseCode::PermanentMailFail => 550,
			ResponseCode::Unrecognized(code) => code,
		}
	}
}

/// Collects bytes off the wire until there's at least one full line in it.
#[derive(Clone, Debug, Default)]
pub struct ReplyBuffer {
	pending: Vec<u8>,
}

impl ReplyBuffer {
	pub fn push(&mut self, bytes: &[u8]) {
		self.pending.extend_from_slice(bytes);
	}

	/// Take the oldest complete line out of the buffer, leaving any partial
	/// line behind for the next push.
	pub fn next_line(&mut self) -> Option<String> {
		let newline = self.pending.iter().position(|&b| b == b'\n')?;
		let line: Vec<u8> = self.pending.drain(..=newline).collect();

		Some(String::from_utf8_lossy(&line[..newline]).into_owned())
	}

	pub fn clear(&mut self) {
		self.pending.clear();
	}

	pub fn is_empty(&self) -> bool {
		self.pending.is_empty()
	}
}
