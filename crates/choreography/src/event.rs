use std::fmt::Display;
use std::str::FromStr;

use log_store::Fields;
use thiserror::Error;

/// Why an entry could not be decoded into its typed event.
///
/// Decoding failures are never retried: the entry is acknowledged and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// A typed event carried on exactly one stream.
pub trait StreamEvent: Sized + Send + Sync + 'static {
    /// Name of the stream the event is appended to.
    const STREAM: &'static str;

    /// Encodes the event as a flat field map.
    fn to_fields(&self) -> Fields;

    /// Decodes an entry's fields.
    fn from_fields(fields: &Fields) -> Result<Self, DecodeError>;
}

/// Typed accessors over an entry's fields.
#[derive(Debug, Clone, Copy)]
pub struct FieldReader<'a> {
    fields: &'a Fields,
}

impl<'a> FieldReader<'a> {
    pub fn new(fields: &'a Fields) -> Self {
        Self { fields }
    }

    /// Returns a required field.
    pub fn str(&self, name: &'static str) -> Result<&'a str, DecodeError> {
        self.fields
            .get(name)
            .map(String::as_str)
            .ok_or(DecodeError::MissingField(name))
    }

    /// Returns an optional field; empty strings count as absent.
    pub fn optional_str(&self, name: &'static str) -> Option<&'a str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Parses a required field.
    pub fn parse<T>(&self, name: &'static str) -> Result<T, DecodeError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.str(name)?
            .parse()
            .map_err(|err: T::Err| DecodeError::InvalidField {
                field: name,
                reason: err.to_string(),
            })
    }
}
