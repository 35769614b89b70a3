//! SASL startup credentials.
//!
//! The connection runs the SASL layer before the AMQP layer when a
//! credential is configured: header exchange, SASL-MECHANISMS from the
//! peer, SASL-INIT with the mechanism's initial response, SASL-OUTCOME.
//! Only single-round mechanisms are provided; challenge rounds fail as
//! not implemented.

use bytes::Bytes;

/// A SASL mechanism with its initial response.
pub trait SaslCredential: Send {
    /// Mechanism symbol, e.g. `PLAIN`.
    fn mechanism(&self) -> &'static [u8];

    /// The initial-response payload carried in SASL-INIT.
    fn initial_response(&self) -> Bytes;
}

/// SASL PLAIN (RFC 4616): `\0authcid\0passwd` with an empty authzid.
pub struct PlainCredential {
    username: String,
    password: String,
}

impl PlainCredential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        PlainCredential {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl SaslCredential for PlainCredential {
    fn mechanism(&self) -> &'static [u8] {
        b"PLAIN"
    }

    fn initial_response(&self) -> Bytes {
        let mut raw = Vec::with_capacity(2 + self.username.len() + self.password.len());
        raw.push(0);
        raw.extend_from_slice(self.username.as_bytes());
        raw.push(0);
        raw.extend_from_slice(self.password.as_bytes());
        Bytes::from(raw)
    }
}

/// SASL ANONYMOUS.
pub struct AnonymousCredential;

impl SaslCredential for AnonymousCredential {
    fn mechanism(&self) -> &'static [u8] {
        b"ANONYMOUS"
    }

    fn initial_response(&self) -> Bytes {
        Bytes::new()
    }
}
