// ABOUTME: Events the client engine's receive task surfaces to the caller over an mpsc channel
// ABOUTME: One variant per dispatch branch of the ACK/FWD handling loop, plus a terminal Disconnected

/// One entry of a roster listing, parsed from a `REQCLILIST` ACK field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntryInfo {
    pub id: u8,
    pub name: String,
    pub ip: String,
    pub port: u16,
}

/// Outcome of a `send-message` request, reported once the server's ACK arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    Failed(String),
}

/// Events surfaced to the caller of a connected client. Exactly one `Disconnected`
/// is emitted when the receive loop exits, for any reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Reply to `get-time`: raw POSIX seconds plus a formatted local time string.
    Time { posix_seconds: i64, formatted: String },
    /// Reply to `get-host`.
    Host(String),
    /// Reply to `get-clients`.
    ClientList(Vec<RosterEntryInfo>),
    /// Outcome of a previously issued `send-message`.
    SendResult { receiver_id: u8, outcome: SendOutcome },
    /// A message relayed from another client.
    Message { sender_id: u8, text: String },
    /// The receive loop has exited; the connection is no longer usable.
    Disconnected,
}
