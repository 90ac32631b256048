use std::time::Duration;

use confindent::Confindent;
use getopts::Options;
use thiserror::Error;

const DEFAULT_CONFIG: &str = "/etc/sendbugmail.conf";
const FALLBACK_CONFIG: &str = "sendbugmail.conf";

#[derive(Debug, PartialEq)]
pub struct BinConfig {
	pub server: String,
	pub port: u16,
	pub timeout: Duration,
	pub from: String,
	pub recipient: String,
	pub subject: String,
}

#[allow(clippy::or_fun_call)]
impl BinConfig {
	fn print_usage<S: AsRef<str>>(prgm: S, opts: &Options) {
		let brief = format!("Usage: {} [options] < report.txt", prgm.as_ref());
		println!("{}", opts.usage(&brief));
	}

	fn options() -> Options {
		let mut opts = Options::new();
		opts.optflag("h", "help", "Print this help message");
		opts.optopt(
			"s",
			"server",
			"The SMTP server to hand the report to\nDefault: localhost",
			"HOST",
		);
		opts.optopt("p", "port", "The port the server listens on\nDefault: 25", "PORT");
		opts.optopt(
			"t",
			"timeout",
			"Seconds to wait on the server before giving up\nDefault: 60",
			"SECONDS",
		);
		opts.optopt("f", "from", "The address the report is sent from", "ADDRESS");
		opts.optopt(
			"r",
			"recipient",
			"Where the report goes\nDefault: submit@bugs.kde.org",
			"ADDRESS",
		);
		opts.optopt("S", "subject", "The subject line\nDefault: (no subject)", "TEXT");
		opts.optopt(
			"c",
			"config",
			"An alternate location to read the config from\nDefault: /etc/sendbugmail.conf",
			"PATH",
		);
		opts
	}

	/// Read options from the command line, falling back to the config file.
	/// `Ok(None)` means we printed the help and there's nothing to do.
	pub fn get() -> Result<Option<Self>, ConfigError> {
		let args: Vec<String> = std::env::args().collect();
		Self::from_args(&args)
	}

	pub fn from_args(args: &[String]) -> Result<Option<Self>, ConfigError> {
		let opts = Self::options();
		let matches = opts.parse(args.iter().skip(1))?;

		if matches.opt_present("help") {
			Self::print_usage(args.first().map_or("sendbugmail", |s| s.as_str()), &opts);
			return Ok(None);
		}

		// An explicitly named config has to exist, the default ones don't
		let config = match matches.opt_str("config") {
			Some(path) => Some(
				Confindent::from_file(&path)
					.map_err(|err| ConfigError::ConfigFile(path, err.to_string()))?,
			),
			None => Confindent::from_file(DEFAULT_CONFIG)
				.or_else(|_| Confindent::from_file(FALLBACK_CONFIG))
				.ok(),
		};

		// Options specified on the command line take priority. We only take the
		// cli_key and convert to the config key internally so that we can remain
		// consistent.
		let find_value = |cli_key: &str| -> Option<String> {
			let conf_key: String = cli_key
				.split('-')
				.map(|word| {
					let mut c = word.chars();
					match c.next() {
						None => String::new(),
						Some(f) => f.to_uppercase().collect::<String>() + c.as_str(),
					}
				})
				.collect();

			matches.opt_str(cli_key).or(config
				.as_ref()
				.and_then(|config| config.child_value(conf_key))
				.map(|s| s.into()))
		};

		let port_string = find_value("port").unwrap_or("25".into());
		let port = port_string
			.parse()
			.map_err(|_| ConfigError::InvalidPort(port_string))?;

		let timeout_string = find_value("timeout").unwrap_or("60".into());
		let timeout = timeout_string
			.parse()
			.map(Duration::from_secs)
			.map_err(|_| ConfigError::InvalidTimeout(timeout_string))?;

		Ok(Some(Self {
			server: find_value("server").unwrap_or("localhost".into()),
			port,
			timeout,
			from: find_value("from").ok_or(ConfigError::MissingSender)?,
			recipient: find_value("recipient").unwrap_or("submit@bugs.kde.org".into()),
			subject: find_value("subject").unwrap_or("(no subject)".into()),
		}))
	}
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("bad arguments: {0}")]
	Options(#[from] getopts::Fail),
	#[error("failed to parse conf file {0}: {1}")]
	ConfigFile(String, String),
	#[error("Failed to parse '{0}' as a port")]
	InvalidPort(String),
	#[error("Failed to parse '{0}' as a number of seconds")]
	InvalidTimeout(String),
	#[error("no sender address, pass one with --from")]
	MissingSender,
}

#[cfg(test)]
mod test {
	use super::*;

	fn args(list: &[&str]) -> Vec<String> {
		std::iter::once("sendbugmail")
			.chain(list.iter().copied())
			.map(String::from)
			.collect()
	}

	#[test]
	fn defaults() {
		let conf = BinConfig::from_args(&args(&["--from", "me@example.org"]))
			.unwrap()
			.unwrap();

		assert_eq!(
			conf,
			BinConfig {
				server: String::from("localhost"),
				port: 25,
				timeout: Duration::from_secs(60),
				from: String::from("me@example.org"),
				recipient: String::from("submit@bugs.kde.org"),
				subject: String::from("(no subject)"),
			}
		);
	}

	#[test]
	fn short_options() {
		let conf = BinConfig::from_args(&args(&[
			"-f", "me", "-s", "mx.example.org", "-p", "2525", "-t", "5", "-S", "it broke",
		]))
		.unwrap()
		.unwrap();

		assert_eq!(conf.server, "mx.example.org");
		assert_eq!(conf.port, 2525);
		assert_eq!(conf.timeout, Duration::from_secs(5));
		assert_eq!(conf.subject, "it broke");
	}

	#[test]
	fn help_does_nothing() {
		assert_eq!(BinConfig::from_args(&args(&["--help"])).unwrap(), None);
	}

	#[test]
	fn bad_values() {
		assert!(matches!(
			BinConfig::from_args(&args(&["-f", "me", "-p", "lots"])),
			Err(ConfigError::InvalidPort(port)) if port == "lots"
		));
		assert!(matches!(
			BinConfig::from_args(&args(&["-f", "me", "-t", "soon"])),
			Err(ConfigError::InvalidTimeout(_))
		));
		assert!(matches!(
			BinConfig::from_args(&args(&[])),
			Err(ConfigError::MissingSender)
		));
		assert!(matches!(
			BinConfig::from_args(&args(&["--nonsense"])),
			Err(ConfigError::Options(_))
		));
	}

	#[test]
	fn config_file_fallback() {
		let path = std::env::temp_dir().join(format!("sendbugmail-{}.conf", std::process::id()));
		std::fs::write(&path, "Server mail.example.org\nPort 587\nFrom reporter@example.org\n")
			.unwrap();
		let path_string = path.to_string_lossy().into_owned();

		let conf = BinConfig::from_args(&args(&["-c", &path_string, "-p", "2525"]))
			.unwrap()
			.unwrap();
		std::fs::remove_file(&path).unwrap();

		assert_eq!(conf.server, "mail.example.org");
		assert_eq!(conf.from, "reporter@example.org");
		// the command line wins
		assert_eq!(conf.port, 2525);
	}

	#[test]
	fn missing_named_config() {
		assert!(matches!(
			BinConfig::from_args(&args(&["-f", "me", "-c", "/nonexistent/sendbugmail.conf"])),
			Err(ConfigError::ConfigFile(..))
		));
	}
}
