use async_imap::types::Fetch;

use crate::types::FetchedEnvelope;

pub fn parse_envelope(fetch: &Fetch) -> Option<FetchedEnvelope> {
    let uid = fetch.uid?;
    let envelope = fetch.envelope()?;

    let message_id = envelope
        .message_id
        .as_ref()
        .map(|id| String::from_utf8_lossy(id).trim().to_string())
        .unwrap_or_default();

    let subject = envelope
        .subject
        .as_ref()
        .map(|s| decode_rfc2047(&String::from_utf8_lossy(s)))
        .unwrap_or_default();

    // First From address only
    let (sender_address, sender_name) = envelope
        .from
        .as_ref()
        .and_then(|addrs| addrs.first())
        .map(|addr| {
            let mailbox = addr
                .mailbox
                .as_ref()
                .map(|m| String::from_utf8_lossy(m).to_string())
                .unwrap_or_default();
            let host = addr
                .host
                .as_ref()
                .map(|h| String::from_utf8_lossy(h).to_string())
                .unwrap_or_default();
            let name = addr
                .name
                .as_ref()
                .map(|n| decode_rfc2047(&String::from_utf8_lossy(n)))
                .filter(|n| !n.trim().is_empty());
            (join_address(&mailbox, &host), name)
        })
        .unwrap_or_default();

    Some(FetchedEnvelope {
        uid,
        sender_address,
        sender_name,
        subject,
        message_id,
    })
}

fn join_address(mailbox: &str, host: &str) -> String {
    match (mailbox.is_empty(), host.is_empty()) {
        (true, _) => String::new(),
        (false, true) => mailbox.to_string(),
        (false, false) => format!("{}@{}", mailbox, host),
    }
}

/// Decode RFC 2047 encoded words by parsing the value as a header
pub fn decode_rfc2047(input: &str) -> String {
    let fake_header = format!("X: {}", input);
    match mailparse::parse_header(fake_header.as_bytes()) {
        Ok((header, _)) => header.get_value(),
        Err(_) => input.to_string(),
    }
}
