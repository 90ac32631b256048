use std::{future::Future, io, time::Instant};

use log::{debug, warn};
use thiserror::Error;
use tokio::{
	io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
	net::TcpStream,
	time::{sleep_until, timeout_at, Instant as TokioInstant},
};

use crate::smtp::{Action, Event, Session, SmtpError};

/// Run a session to the end over TCP.
pub async fn submit(session: Session) -> Result<(), DeliveryError> {
	submit_with(session, |host, port| async move {
		TcpStream::connect((host.as_str(), port)).await
	})
	.await
}

/// Run a session to the end over whatever stream `connect` hands back.
// handles the low-level read and write nonsense and the timers, the session
// itself only ever sees bytes and instants.
pub async fn submit_with<S, F, Fut>(mut session: Session, mut connect: F) -> Result<(), DeliveryError>
where
	S: AsyncRead + AsyncWrite + Unpin,
	F: FnMut(String, u16) -> Fut,
	Fut: Future<Output = io::Result<S>>,
{
	let mut stream: Option<S> = None;
	let mut outcome: Option<Result<(), DeliveryError>> = None;
	let mut closed = false;

	let mut buf = vec![0; 1024];

	session.open(Instant::now());

	loop {
		while let Some(action) = session.poll_action() {
			match action {
				Action::Connect { host, port } => {
					let deadline = session.poll_timeout();
					let attempt = match deadline {
						Some(deadline) => {
							timeout_at(TokioInstant::from_std(deadline), connect(host, port)).await
						}
						None => Ok(connect(host, port).await),
					};

					match attempt {
						Ok(Ok(connected)) => {
							stream = Some(connected);
							session.on_connected(Instant::now());
						}
						Ok(Err(err)) => {
							warn!("failed to connect: {}", err);
							session.on_transport_error();
						}
						Err(_elapsed) => session.handle_timeout(now_or_later(deadline)),
					}
				}
				Action::Send(output) => {
					if let Some(stream) = stream.as_mut() {
						if let Err(err) = stream.write_all(output.to_string().as_bytes()).await {
							warn!("failed to write to the server: {}", err);
							session.on_transport_error();
						}
					}
				}
				Action::Disconnect => {
					if let Some(mut stream) = stream.take() {
						// we're hanging up either way
						if let Err(err) = stream.shutdown().await {
							debug!("failed to shut down the connection cleanly: {}", err);
						}
					}
				}
				Action::Notify(Event::MessageSent) => {
					outcome = Some(Ok(()));
					session.close();
				}
				Action::Notify(Event::Error(err)) => outcome = Some(Err(err.into())),
				Action::Notify(Event::ConnectionClosed) => closed = true,
			}
		}

		if closed {
			return outcome.unwrap_or(Err(DeliveryError::ConnectionClosed));
		}

		let deadline = session.poll_timeout();
		let read = tokio::select! {
			read = read_some(&mut stream, &mut buf) => Some(read),
			_ = wait_until(deadline) => None,
		};

		match read {
			// A zero sized read, this connection has died or been terminated by the server
			Some(Ok(0)) => {
				debug!("connection closed by server");
				session.on_transport_closed();
			}
			Some(Ok(read)) => session.on_received(&buf[..read], Instant::now()),
			Some(Err(err)) => {
				warn!("failed to read from the server: {}", err);
				session.on_transport_error();
			}
			None => session.handle_timeout(now_or_later(deadline)),
		}
	}
}

async fn read_some<S: AsyncRead + Unpin>(stream: &mut Option<S>, buf: &mut [u8]) -> io::Result<usize> {
	match stream {
		Some(stream) => stream.read(buf).await,
		None => std::future::pending().await,
	}
}

async fn wait_until(deadline: Option<Instant>) {
	match deadline {
		Some(deadline) => sleep_until(TokioInstant::from_std(deadline)).await,
		None => std::future::pending().await,
	}
}

// tokio's clock may wake us a hair before the std one agrees the deadline passed
fn now_or_later(deadline: Option<Instant>) -> Instant {
	let now = Instant::now();
	deadline.map_or(now, |deadline| deadline.max(now))
}

#[derive(Debug, Error)]
pub enum DeliveryError {
	#[error(transparent)]
	Session(#[from] SmtpError),
	#[error("connection unexpectedly closed by server")]
	ConnectionClosed,
}

#[cfg(test)]
mod test {
	use std::time::Duration;

	use tokio::io::{duplex, AsyncBufReadExt, BufReader, DuplexStream};

	use super::*;
	use crate::config::SessionConfig;

	fn session(timeout: Duration) -> Session {
		let mut session = Session::new(SessionConfig {
			domain: String::from("client.example.net"),
			..Default::default()
		});
		session.configure("mail.example.net", 2525, timeout).unwrap();
		session.set_sender("Reporter <reporter@example.net>").unwrap();
		session.set_recipient("bugs@example.net").unwrap();
		session.set_subject("crash").unwrap();
		session.set_body("line one\n.hidden\n").unwrap();
		session
	}

	/// Hands out the client half of a duplex pipe exactly once.
	fn connector(
		client: DuplexStream,
	) -> impl FnMut(String, u16) -> std::future::Ready<io::Result<DuplexStream>> {
		let mut client = Some(client);
		move |host, port| {
			assert_eq!((host.as_str(), port), ("mail.example.net", 2525));
			std::future::ready(client.take().ok_or_else(|| io::ErrorKind::ConnectionRefused.into()))
		}
	}

	async fn expect_line(reader: &mut BufReader<DuplexStream>, expected: &str) {
		let mut line = String::new();
		reader.read_line(&mut line).await.unwrap();
		assert_eq!(line, expected);
	}

	#[tokio::test]
	async fn delivers_over_a_stream() {
		let (client, server) = duplex(4096);

		let server = tokio::spawn(async move {
			let mut reader = BufReader::new(server);

			reader.get_mut().write_all(b"220 mail.example.net\r\n").await.unwrap();
			expect_line(&mut reader, "HELO client.example.net\r\n").await;

			reader.get_mut().write_all(b"250 hello\r\n").await.unwrap();
			expect_line(&mut reader, "MAIL FROM:<reporter@example.net>\r\n").await;

			reader.get_mut().write_all(b"250 ok\r\n").await.unwrap();
			expect_line(&mut reader, "RCPT TO:<bugs@example.net>\r\n").await;

			// split on purpose
			reader.get_mut().write_all(b"25").await.unwrap();
			reader.get_mut().write_all(b"0 ok\r\n").await.unwrap();
			expect_line(&mut reader, "DATA\r\n").await;

			reader.get_mut().write_all(b"354 go\r\n").await.unwrap();
			for line in ["Subject: crash\r\n", "\r\n", "line one\r\n", "..hidden\r\n", ".\r\n"] {
				expect_line(&mut reader, line).await;
			}

			reader.get_mut().write_all(b"250 queued\r\n").await.unwrap();

			// the client hangs up without a QUIT
			let mut rest = String::new();
			reader.read_line(&mut rest).await.unwrap();
			assert_eq!(rest, "");
		});

		let result = submit_with(session(Duration::from_secs(5)), connector(client)).await;

		assert!(result.is_ok(), "{:?}", result);
		server.await.unwrap();
	}

	#[tokio::test]
	async fn rejected_recipient() {
		let (client, server) = duplex(4096);

		tokio::spawn(async move {
			let mut reader = BufReader::new(server);

			reader.get_mut().write_all(b"220 hi\r\n").await.unwrap();
			expect_line(&mut reader, "HELO client.example.net\r\n").await;
			reader.get_mut().write_all(b"250 hi\r\n").await.unwrap();
			expect_line(&mut reader, "MAIL FROM:<reporter@example.net>\r\n").await;
			reader.get_mut().write_all(b"250 ok\r\n").await.unwrap();
			expect_line(&mut reader, "RCPT TO:<bugs@example.net>\r\n").await;
			reader.get_mut().write_all(b"550 no such user\r\n").await.unwrap();
		});

		let result = submit_with(session(Duration::from_secs(5)), connector(client)).await;

		assert!(matches!(
			result,
			Err(DeliveryError::Session(SmtpError::UnknownUser))
		));
	}

	#[tokio::test]
	async fn silent_server_times_out() {
		let (client, server) = duplex(4096);

		let result = submit_with(session(Duration::from_millis(200)), connector(client)).await;

		assert!(matches!(
			result,
			Err(DeliveryError::Session(SmtpError::InteractTimeout))
		));
		drop(server);
	}

	#[tokio::test]
	async fn hangup_mid_conversation() {
		let (client, server) = duplex(4096);

		tokio::spawn(async move {
			let mut reader = BufReader::new(server);

			reader.get_mut().write_all(b"220 hi\r\n").await.unwrap();
			expect_line(&mut reader, "HELO client.example.net\r\n").await;
		});

		let result = submit_with(session(Duration::from_secs(5)), connector(client)).await;

		assert!(matches!(result, Err(DeliveryError::ConnectionClosed)));
	}

	#[tokio::test]
	async fn goodbye_without_hanging_up() {
		let (client, server) = duplex(4096);

		// hands the stream back so it stays open until we're done
		let server = tokio::spawn(async move {
			let mut reader = BufReader::new(server);

			reader.get_mut().write_all(b"220 hi\r\n").await.unwrap();
			expect_line(&mut reader, "HELO client.example.net\r\n").await;
			reader.get_mut().write_all(b"221 bye\r\n").await.unwrap();
			reader
		});

		let result = tokio::time::timeout(
			Duration::from_secs(5),
			submit_with(session(Duration::from_millis(200)), connector(client)),
		)
		.await
		.expect("submit_with never gave up");

		assert!(matches!(
			result,
			Err(DeliveryError::Session(SmtpError::InteractTimeout))
		));
		drop(server.await.unwrap());
	}

	#[tokio::test]
	async fn refused_connection() {
		let result = submit_with(session(Duration::from_secs(5)), |_, _| async {
			Err::<DuplexStream, _>(io::Error::from(io::ErrorKind::ConnectionRefused))
		})
		.await;

		assert!(matches!(
			result,
			Err(DeliveryError::Session(SmtpError::ConnectError))
		));
	}

	#[tokio::test]
	async fn connect_that_never_finishes() {
		let result = submit_with(session(Duration::from_millis(200)), |_, _| {
			std::future::pending::<io::Result<DuplexStream>>()
		})
		.await;

		assert!(matches!(
			result,
			Err(DeliveryError::Session(SmtpError::ConnectTimeout))
		));
	}
}
