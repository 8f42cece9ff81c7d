//! Composite session identity and its string codec.
//!
//! A tmux session is identified by `(session_name, session_id, session_created)`.
//! The name alone is not enough: names are reused across time, and session ids
//! restart when the tmux server restarts. The creation timestamp disambiguates.
//!
//! The encoded form `name+id+created` is both the primary key of the `state`
//! table and the key used to correlate persisted rows with live sessions, so
//! the hook writer and this codec must agree byte for byte.
//!
//! Fields are not validated. A `+` inside `name` or `instance_id` encodes fine
//! but does not round-trip: decoding splits at the first two delimiters, so the
//! decoded fields are shifted even though re-encoding yields the same key.

use std::fmt;

/// Delimiter between identity fields in the encoded key.
pub const KEY_DELIMITER: char = '+';

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionIdentity {
    pub name: String,
    pub instance_id: String,
    pub created: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("malformed session key: {0:?}")]
    Malformed(String),
}

impl SessionIdentity {
    pub fn new(
        name: impl Into<String>,
        instance_id: impl Into<String>,
        created: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            instance_id: instance_id.into(),
            created: created.into(),
        }
    }

    pub fn encode(&self) -> String {
        encode(&self.name, &self.instance_id, &self.created)
    }

    pub fn decode(key: &str) -> Result<Self, IdentityError> {
        decode(key)
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{KEY_DELIMITER}{}{KEY_DELIMITER}{}",
            self.name, self.instance_id, self.created
        )
    }
}

pub fn encode(name: &str, instance_id: &str, created: &str) -> String {
    format!("{name}{KEY_DELIMITER}{instance_id}{KEY_DELIMITER}{created}")
}

/// Splits on at most two delimiters. Anything that does not produce exactly
/// three parts is `Malformed`; callers skip such rows instead of failing.
pub fn decode(key: &str) -> Result<SessionIdentity, IdentityError> {
    let mut parts = key.splitn(3, KEY_DELIMITER);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), Some(instance_id), Some(created)) => {
            Ok(SessionIdentity::new(name, instance_id, created))
        }
        _ => Err(IdentityError::Malformed(key.to_string())),
    }
}
