use time::{format_description::well_known::Rfc2822, OffsetDateTime};

/// The header lines that go after the Subject of a bug report.
pub fn header(from: &str, to: &str, date: OffsetDateTime) -> String {
	let mut header = format!("From: {}\r\nTo: {}\r\n", from, to);

	// a report without a date is still worth sending
	if let Ok(date) = date.format(&Rfc2822) {
		header.push_str(&format!("Date: {}\r\n", date));
	}

	header
}

pub fn now() -> OffsetDateTime {
	OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}
