// Classified error taxonomy shared by the adapter layer, the publish
// pipeline, and the HTTP surface.

use thiserror::Error;

/// What went wrong while establishing an adapter connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    PortBlocked,
    HostUnresolved,
    Auth,
    Ssl,
    Timeout,
    Other,
}

impl ConnectionKind {
    /// Human-readable diagnostic shown next to a failed connection test.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            ConnectionKind::PortBlocked => Some(
                "This usually means the database port is blocked or the host is incorrect. \
                 Ensure remote access is enabled in your hosting panel and your IP is whitelisted.",
            ),
            ConnectionKind::HostUnresolved => Some(
                "The hostname could not be resolved. Ensure you aren't including 'http://' in \
                 the host field and check for typos.",
            ),
            ConnectionKind::Auth => Some(
                "Authentication failed. Verify your username and password are correct for \
                 remote access.",
            ),
            ConnectionKind::Ssl => Some(
                "The TLS handshake failed. If using Supabase/Neon, ensure you are using the \
                 direct port (5432) instead of the pooled port (6543).",
            ),
            ConnectionKind::Timeout => Some(
                "The connection timed out. Check your firewall settings and ensure the server \
                 is listening on the correct port.",
            ),
            ConnectionKind::Other => None,
        }
    }
}

/// Classify a raw connection error message into a [`ConnectionKind`].
pub fn classify_connection_error(message: &str) -> ConnectionKind {
    let msg = message.to_lowercase();
    if msg.contains("2003") || msg.contains("can't connect") || msg.contains("connection refused") {
        ConnectionKind::PortBlocked
    } else if msg.contains("getaddrinfo") || msg.contains("failed to lookup") || msg.contains("name or service not known") {
        ConnectionKind::HostUnresolved
    } else if msg.contains("access denied") || msg.contains("password") || msg.contains("authentication") {
        ConnectionKind::Auth
    } else if msg.contains("certificate") || msg.contains("ssl") || msg.contains("tls") {
        ConnectionKind::Ssl
    } else if msg.contains("timed out") || msg.contains("timeout") {
        ConnectionKind::Timeout
    } else {
        ConnectionKind::Other
    }
}

/// Error taxonomy for the core. Each variant maps to exactly one HTTP
/// status in the REST surface; see `http_types::error_status`.
#[derive(Debug, Error)]
pub enum FrontbaseError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("connection failed: {message}")]
    Connection {
        kind: ConnectionKind,
        message: String,
    },

    #[error("upstream returned {status}: {body}")]
    UpstreamHttp { status: u16, body: String },

    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("upstream timed out: {0}")]
    UpstreamTimeout(String),

    #[error("conflict on record {record_key} requires manual resolution")]
    ConflictRequiresManualResolution {
        record_key: String,
        master_data: serde_json::Value,
        slave_data: serde_json::Value,
        conflicting_fields: Vec<String>,
        escalation: Option<String>,
    },

    #[error("schema lookup miss for {table}")]
    SchemaLookupMiss { table: String },

    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl FrontbaseError {
    /// Build a classified connection error from a raw failure.
    pub fn connection(message: impl Into<String>) -> Self {
        let message = message.into();
        FrontbaseError::Connection {
            kind: classify_connection_error(&message),
            message,
        }
    }

    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            FrontbaseError::Connection { kind, .. } => kind.suggestion(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_failures() {
        assert_eq!(
            classify_connection_error("ERROR 2003: Can't connect to MySQL server"),
            ConnectionKind::PortBlocked
        );
        assert_eq!(
            classify_connection_error("getaddrinfo failed for host"),
            ConnectionKind::HostUnresolved
        );
        assert_eq!(
            classify_connection_error("FATAL: password authentication failed"),
            ConnectionKind::Auth
        );
        assert_eq!(
            classify_connection_error("certificate verify failed"),
            ConnectionKind::Ssl
        );
        assert_eq!(
            classify_connection_error("connection timed out"),
            ConnectionKind::Timeout
        );
        assert_eq!(
            classify_connection_error("out of cheese"),
            ConnectionKind::Other
        );
    }

    #[test]
    fn connection_errors_carry_suggestions() {
        let err = FrontbaseError::connection("access denied for user 'wp'");
        assert!(err.suggestion().unwrap().contains("Authentication"));
    }
}
