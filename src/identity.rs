//! External IDs for broker objects.
//!
//! Most broker objects have no server-issued key, so the ID recorded in
//! tracked state is the object's composite key joined into one string:
//!
//! | Kind        | Fields                                                    | Delimiter |
//! |-------------|-----------------------------------------------------------|-----------|
//! | vhost       | name                                                      |           |
//! | user        | name                                                      |           |
//! | exchange    | name, vhost                                               | `@`       |
//! | queue       | name, vhost                                               | `@`       |
//! | permissions | user, vhost                                               | `@`       |
//! | binding     | vhost, source, destination, destination type, props key  | `/`       |
//!
//! A leading field equal to the delimiter is written bare, so a binding on
//! the default vhost starts with `//`. Every other occurrence of the
//! delimiter, and every backslash, is escaped with a backslash. IDs written
//! before escaping existed never contain either, so they decode unchanged.

use brokeradmin::DestinationType;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const ESCAPE: char = '\\';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("malformed identity '{id}': expected {expected} fields, found {found}")]
    Malformed {
        id: String,
        expected: usize,
        found: usize,
    },

    #[error("malformed identity '{id}': trailing escape character")]
    TrailingEscape { id: String },

    #[error("malformed identity '{id}': {reason}")]
    InvalidField { id: String, reason: String },
}

/// How the fields of one kind of ID are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheme {
    pub delimiter: char,
    pub arity: usize,
}

/// `name@vhost` and `user@vhost`.
pub const SCOPED: Scheme = Scheme {
    delimiter: '@',
    arity: 2,
};

/// `vhost/source/destination/destination_type/properties_key`.
pub const BINDING: Scheme = Scheme {
    delimiter: '/',
    arity: 5,
};

impl Scheme {
    pub fn encode(&self, fields: &[&str]) -> String {
        let delimiter = self.delimiter.to_string();
        let mut out = String::new();
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                out.push(self.delimiter);
            }
            if i == 0 && *field == delimiter {
                out.push(self.delimiter);
                continue;
            }
            for c in field.chars() {
                if c == ESCAPE || c == self.delimiter {
                    out.push(ESCAPE);
                }
                out.push(c);
            }
        }
        out
    }

    pub fn decode(&self, id: &str) -> Result<Vec<String>, IdentityError> {
        let mut fields = Vec::with_capacity(self.arity);
        let mut rest = id;

        let doubled: String = [self.delimiter, self.delimiter].iter().collect();
        if let Some(tail) = id.strip_prefix(doubled.as_str()) {
            fields.push(self.delimiter.to_string());
            rest = tail;
        }

        let mut current = String::new();
        let mut chars = rest.chars();
        while let Some(c) = chars.next() {
            if c == ESCAPE {
                match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => return Err(IdentityError::TrailingEscape { id: id.to_string() }),
                }
            } else if c == self.delimiter {
                fields.push(std::mem::take(&mut current));
            } else {
                current.push(c);
            }
        }
        fields.push(current);

        if fields.len() == self.arity {
            Ok(fields)
        } else {
            Err(IdentityError::Malformed {
                id: id.to_string(),
                expected: self.arity,
                found: fields.len(),
            })
        }
    }
}

/// An object named within a vhost: exchanges, queues, and a user's
/// permissions (where `name` is the user).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedName {
    pub name: String,
    pub vhost: String,
}

impl ScopedName {
    pub fn new(name: impl Into<String>, vhost: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vhost: vhost.into(),
        }
    }
}

impl fmt::Display for ScopedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&SCOPED.encode(&[&self.name, &self.vhost]))
    }
}

impl FromStr for ScopedName {
    type Err = IdentityError;

    fn from_str(id: &str) -> Result<Self, Self::Err> {
        let [name, vhost]: [String; 2] =
            SCOPED
                .decode(id)?
                .try_into()
                .map_err(|fields: Vec<String>| IdentityError::Malformed {
                    id: id.to_string(),
                    expected: SCOPED.arity,
                    found: fields.len(),
                })?;
        Ok(Self { name, vhost })
    }
}

/// Composite key of a binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingKey {
    pub vhost: String,
    pub source: String,
    pub destination: String,
    pub destination_type: DestinationType,
    pub properties_key: String,
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&BINDING.encode(&[
            &self.vhost,
            &self.source,
            &self.destination,
            self.destination_type.as_str(),
            &self.properties_key,
        ]))
    }
}

impl FromStr for BindingKey {
    type Err = IdentityError;

    fn from_str(id: &str) -> Result<Self, Self::Err> {
        let fields = BINDING.decode(id)?;
        let [vhost, source, destination, destination_type, properties_key]: [String; 5] =
            fields
                .try_into()
                .map_err(|fields: Vec<String>| IdentityError::Malformed {
                    id: id.to_string(),
                    expected: BINDING.arity,
                    found: fields.len(),
                })?;

        let destination_type = destination_type
            .parse()
            .map_err(|reason| IdentityError::InvalidField {
                id: id.to_string(),
                reason,
            })?;

        Ok(Self {
            vhost,
            source,
            destination,
            destination_type,
            properties_key,
        })
    }
}
