use std::fmt::Display;

/// The commands a session ever sends. There's no QUIT; the connection is
/// dropped once the message is accepted.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
	Helo(String),
	Mail(String),
	Rcpt(String),
	Data,
}

impl Display for Command {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Command::Helo(domain) => write!(f, "HELO {}", domain),
			Command::Mail(reverse) => write!(f, "MAIL FROM:{}", bracketed(reverse)),
			Command::Rcpt(forward) => write!(f, "RCPT TO:{}", bracketed(forward)),
			Command::Data => write!(f, "DATA"),
		}
	}
}

fn bracketed(address: &str) -> String {
	let address = address.trim();

	if address.starts_with('<') && address.ends_with('>') {
		address.to_owned()
	} else {
		format!("<{}>", address)
	}
}
