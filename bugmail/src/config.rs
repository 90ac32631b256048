use std::time::Duration;

/// Sent in HELO when we can't work out which domain we're in.
pub const PLACEHOLDER_DOMAIN: &str = "somemachine.example.net";

#[derive(Clone, Debug)]
pub struct SessionConfig {
	pub host: String,
	pub port: u16,
	/// Inactivity timeout, applied from the moment we start connecting
	pub timeout: Duration,
	/// What we call ourselves in HELO
	pub domain: String,
	/// Stay connected after the message is accepted instead of hanging up
	pub keep_alive: bool,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			host: String::from("localhost"),
			port: 25,
			timeout: Duration::from_secs(60),
			domain: local_domain(),
			keep_alive: false,
		}
	}
}

/// The domain part of this machine's hostname, or [PLACEHOLDER_DOMAIN].
pub fn local_domain() -> String {
	let hostname = gethostname::gethostname();

	domain_of(&hostname.to_string_lossy())
		.unwrap_or(PLACEHOLDER_DOMAIN)
		.to_owned()
}

fn domain_of(hostname: &str) -> Option<&str> {
	hostname
		.split_once('.')
		.map(|(_, domain)| domain.trim_end_matches('.'))
		.filter(|domain| !domain.is_empty())
}
