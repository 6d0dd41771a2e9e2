use std::str::FromStr;

use anyhow::{anyhow, Context};
use serde_json::json;
use uuid::Uuid;

use crate::Time;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("No such object {0}")]
    NotFound(Uuid),

    #[error("Uuid already used {0}")]
    UuidAlreadyUsed(Uuid),

    #[error("Name already used {0}")]
    NameAlreadyUsed(String),

    #[error("Concurrent structural change around {0}, please retry")]
    StructuralConflict(Uuid),

    #[error("Comment content is empty")]
    EmptyContent,

    #[error("Comment content is too long ({0} bytes)")]
    ContentTooLong(usize),

    #[error("Null byte in string is not allowed {0:?}")]
    NullByteInString(String),

    #[error("Invalid name {0:?}")]
    InvalidName(String),

    #[error("Time cannot be stored {0}")]
    TimeOutOfRange(Time),
}

impl Error {
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::PermissionDenied => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::UuidAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::NameAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::StructuralConflict(_) => StatusCode::CONFLICT,
            Error::EmptyContent => StatusCode::BAD_REQUEST,
            Error::ContentTooLong(_) => StatusCode::BAD_REQUEST,
            Error::NullByteInString(_) => StatusCode::BAD_REQUEST,
            Error::InvalidName(_) => StatusCode::BAD_REQUEST,
            Error::TimeOutOfRange(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        serde_json::to_vec(&match self {
            Error::Unknown(msg) => json!({
                "message": msg,
                "type": "unknown",
            }),
            Error::PermissionDenied => json!({
                "message": "permission denied",
                "type": "permission-denied",
            }),
            Error::NotFound(u) => json!({
                "message": "object not found",
                "type": "not-found",
                "uuid": u,
            }),
            Error::UuidAlreadyUsed(u) => json!({
                "message": "uuid conflict",
                "type": "conflict-uuid",
                "uuid": u,
            }),
            Error::NameAlreadyUsed(n) => json!({
                "message": "name already used",
                "type": "conflict-name",
                "name": n,
            }),
            Error::StructuralConflict(u) => json!({
                "message": "concurrent structural change, please retry",
                "type": "conflict-structure",
                "uuid": u,
            }),
            Error::EmptyContent => json!({
                "message": "comment content is empty",
                "type": "empty-content",
            }),
            Error::ContentTooLong(len) => json!({
                "message": "comment content is too long",
                "type": "content-too-long",
                "length": len,
            }),
            Error::NullByteInString(s) => json!({
                "message": "there was a null byte in argument string",
                "type": "null-byte",
                "string": s,
            }),
            Error::InvalidName(n) => json!({
                "message": "invalid name",
                "type": "invalid-name",
                "name": n,
            }),
            Error::TimeOutOfRange(t) => json!({
                "message": "time cannot be stored",
                "type": "time-out-of-range",
                "time": t,
            }),
        })
        .expect("serializing error contents")
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        fn get_uuid(data: &serde_json::Value) -> anyhow::Result<Uuid> {
            data.get("uuid")
                .and_then(|uuid| uuid.as_str())
                .and_then(|uuid| Uuid::from_str(uuid).ok())
                .ok_or_else(|| anyhow!("error body without a proper uuid"))
        }
        fn get_str(data: &serde_json::Value, field: &str) -> anyhow::Result<String> {
            data.get(field)
                .and_then(|s| s.as_str())
                .map(String::from)
                .ok_or_else(|| anyhow!("error body without a proper {field} field"))
        }
        Ok(
            match data
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow!("error type is not a string"))?
            {
                "unknown" => Error::Unknown(
                    data.get("message")
                        .and_then(|msg| msg.as_str())
                        .unwrap_or("")
                        .to_string(),
                ),
                "permission-denied" => Error::PermissionDenied,
                "not-found" => Error::NotFound(get_uuid(&data)?),
                "conflict-uuid" => Error::UuidAlreadyUsed(get_uuid(&data)?),
                "conflict-name" => Error::NameAlreadyUsed(get_str(&data, "name")?),
                "conflict-structure" => Error::StructuralConflict(get_uuid(&data)?),
                "empty-content" => Error::EmptyContent,
                "content-too-long" => Error::ContentTooLong(
                    data.get("length")
                        .and_then(|l| l.as_u64())
                        .ok_or_else(|| anyhow!("error body without a proper length"))?
                        as usize,
                ),
                "null-byte" => Error::NullByteInString(get_str(&data, "string")?),
                "invalid-name" => Error::InvalidName(get_str(&data, "name")?),
                "time-out-of-range" => Error::TimeOutOfRange(
                    data.get("time")
                        .and_then(|t| serde_json::from_value(t.clone()).ok())
                        .ok_or_else(|| anyhow!("error body without a proper time"))?,
                ),
                _ => return Err(anyhow!("error contents has unknown type")),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_round_trip_through_json() {
        let samples = vec![
            Error::Unknown(String::from("boom")),
            Error::PermissionDenied,
            Error::NotFound(Uuid::new_v4()),
            Error::UuidAlreadyUsed(Uuid::new_v4()),
            Error::NameAlreadyUsed(String::from("alice")),
            Error::StructuralConflict(Uuid::new_v4()),
            Error::EmptyContent,
            Error::ContentTooLong(9001),
            Error::NullByteInString(String::from("a\0b")),
            Error::InvalidName(String::from("")),
            Error::TimeOutOfRange(chrono::Utc::now()),
        ];
        for e in samples {
            assert_eq!(e, Error::parse(&e.contents()).expect("parsing error body"));
        }
    }
}
