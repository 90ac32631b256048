/// The mail a session carries. Everything is plain text; the header is
/// whatever extra header lines the caller wants after `Subject:`.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
	pub sender: String,
	pub recipient: String,
	pub subject: String,
	pub header: String,
	pub body: String,
}

impl Default for Message {
	fn default() -> Self {
		Self {
			sender: String::from("user@example.net"),
			recipient: String::from("user@example.net"),
			subject: String::from("(no subject)"),
			header: String::new(),
			body: String::from("empty"),
		}
	}
}

impl Message {
	/// Everything that goes out after the server's 354, up to and including
	/// the lone "." that ends DATA.
	pub fn payload(&self) -> String {
		let mut payload = format!("Subject: {}\r\n", self.subject);

		for line in lines(&self.header) {
			payload.push_str(line);
			payload.push_str("\r\n");
		}

		// blank line between the headers and the body
		payload.push_str("\r\n");

		for line in lines(&self.body) {
			if line.starts_with('.') {
				payload.push('.');
			}
			payload.push_str(line);
			payload.push_str("\r\n");
		}

		payload.push_str(".\r\n");
		payload
	}
}

/// Split on any of \r\n or \n, dropping the empty piece a trailing newline
/// would leave.
fn lines(text: &str) -> impl Iterator<Item = &str> {
	let text = text.strip_suffix('\n').unwrap_or(text);
	let text = text.strip_suffix('\r').unwrap_or(text);

	// nothing at all is no lines, not one empty one
	let pieces = if text.is_empty() {
		None
	} else {
		Some(text.split('\n'))
	};

	pieces
		.into_iter()
		.flatten()
		.map(|line| line.strip_suffix('\r').unwrap_or(line))
}

/// Turn whatever the user typed as their address into something MAIL FROM
/// will take: `Some Name <user@host>` becomes `user@host`, and a bare local
/// part gets `@localhost` stuck on the end.
pub fn normalize_sender(sender: &str) -> String {
	let inner = match sender.split_once('<') {
		Some((_, rest)) => rest.split('>').next().unwrap_or(rest),
		None => sender,
	};

	let mut address = inner
		.split_whitespace()
		.last()
		.unwrap_or_default()
		.to_owned();

	if !address.contains('@') {
		address.push_str("@localhost");
	}

	address
}
