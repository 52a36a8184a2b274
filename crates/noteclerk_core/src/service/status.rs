//! Response status envelope shared by every service operation.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Domain status carried by every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u16)]
pub enum StatusCode {
    Ok = 200,
    NotModified = 304,
    BadRequest = 400,
    NotFound = 404,
    Conflict = 409,
    InternalServerError = 500,
}

impl StatusCode {
    /// Numeric HTTP-style code.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl Display for StatusCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::NotModified => "NOT_MODIFIED",
            Self::BadRequest => "BAD_REQUEST",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::InternalServerError => "INTERNAL_SERVER_ERROR",
        };
        write!(f, "{} {name}", self.as_u16())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseStatus {
    pub http_code: StatusCode,
}

impl ResponseStatus {
    pub fn new(http_code: StatusCode) -> Self {
        Self { http_code }
    }
}

impl From<StatusCode> for ResponseStatus {
    fn from(value: StatusCode) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::StatusCode;

    #[test]
    fn codes_match_http_numbers() {
        assert_eq!(StatusCode::Ok.as_u16(), 200);
        assert_eq!(StatusCode::NotModified.as_u16(), 304);
        assert_eq!(StatusCode::Conflict.as_u16(), 409);
        assert_eq!(StatusCode::NotFound.to_string(), "404 NOT_FOUND");
    }
}
