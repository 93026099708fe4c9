use alloc::string::{String, ToString};
use alloc::vec::Vec;

use core::fmt;

/// A typed value recovered from a decrypted payload.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadValue {
    /// A signed integer.
    Integer(i64),
    /// A floating-point number.
    Float(f64),
    /// A boolean.
    Boolean(bool),
    /// Text which is not a number nor a boolean.
    Text(String),
    /// Bytes which are not `UTF-8` text.
    Binary(Vec<u8>),
}

impl fmt::Display for PayloadValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => value.fmt(f),
            Self::Float(value) => value.fmt(f),
            Self::Boolean(value) => value.fmt(f),
            Self::Text(value) => value.fmt(f),
            Self::Binary(value) => {
                for byte in value {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl PayloadValue {
    /// Interprets a plaintext as a [`PayloadValue`].
    ///
    /// Text containing a `.` is a float when it parses as one, other text is
    /// an integer when it parses as one. `true` and `false` are booleans.
    /// Any other text is kept as it is, while non-`UTF-8` data is kept as
    /// raw bytes.
    #[must_use]
    pub fn from_plaintext(plaintext: &[u8]) -> Self {
        let Ok(text) = core::str::from_utf8(plaintext) else {
            return Self::Binary(plaintext.to_vec());
        };

        let trimmed = text.trim();

        if trimmed.contains('.')
            && let Ok(value) = trimmed.parse::<f64>()
        {
            return Self::Float(value);
        }

        if let Ok(value) = trimmed.parse::<i64>() {
            return Self::Integer(value);
        }

        match trimmed {
            "true" => Self::Boolean(true),
            "false" => Self::Boolean(false),
            _ => Self::Text(text.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::ToString;
    use alloc::vec;

    use super::PayloadValue;

    #[test]
    fn typed_values() {
        assert_eq!(PayloadValue::from_plaintext(b"42.0"), PayloadValue::Float(42.0));
        assert_eq!(PayloadValue::from_plaintext(b" 72 "), PayloadValue::Integer(72));
        assert_eq!(PayloadValue::from_plaintext(b"-3"), PayloadValue::Integer(-3));
        assert_eq!(PayloadValue::from_plaintext(b"true"), PayloadValue::Boolean(true));
        assert_eq!(
            PayloadValue::from_plaintext(b"ARM Ltd."),
            PayloadValue::Text("ARM Ltd.".into())
        );
        assert_eq!(
            PayloadValue::from_plaintext(&[0xff, 0x00]),
            PayloadValue::Binary(vec![0xff, 0x00])
        );
    }

    #[test]
    fn display() {
        assert_eq!(PayloadValue::Float(42.5).to_string(), "42.5");
        assert_eq!(PayloadValue::Binary(vec![0xde, 0xad]).to_string(), "dead");
    }
}
