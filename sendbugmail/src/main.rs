mod binconfig;
mod report;

use std::process::exit;

use binconfig::BinConfig;

use bugmail::{
	config::SessionConfig,
	net,
	smtp::{Session, UsageError},
};

use log::info;
use tokio::io::AsyncReadExt;

fn build_session(binconf: &BinConfig, body: String) -> Result<Session, UsageError> {
	let mut session = Session::new(SessionConfig::default());

	session.configure(binconf.server.clone(), binconf.port, binconf.timeout)?;
	session.set_sender(&binconf.from)?;
	session.set_recipient(binconf.recipient.clone())?;
	session.set_subject(binconf.subject.clone())?;
	session.set_body(body)?;

	// From: carries the cleaned up address, same as MAIL FROM
	let header = report::header(
		&session.message().sender,
		&binconf.recipient,
		report::now(),
	);
	session.set_header(header)?;

	Ok(session)
}

#[tokio::main]
async fn main() {
	env_logger::init();

	let binconf = match BinConfig::get() {
		Ok(Some(conf)) => conf,
		Ok(None) => return,
		Err(err) => {
			eprintln!("{}", err);
			exit(1);
		}
	};

	let mut body = String::new();
	if let Err(err) = tokio::io::stdin().read_to_string(&mut body).await {
		eprintln!("failed to read the report from stdin: {}", err);
		exit(1);
	}

	let session = match build_session(&binconf, body) {
		Ok(session) => session,
		Err(err) => {
			eprintln!("{}", err);
			exit(1);
		}
	};

	info!(
		"sending report to {} via {}:{}",
		binconf.recipient, binconf.server, binconf.port
	);

	match net::submit(session).await {
		Ok(()) => info!("report sent"),
		Err(err) => {
			eprintln!("failed to send the report: {}", err);
			exit(1);
		}
	}
}
