//! Resource declarations as written by the user.

use crate::error::{Error, Result};
use crate::types::{Address, Attributes, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Reserved attribute listing explicit dependencies by address.
pub const DEPENDS_ON: &str = "depends_on";

/// A named, typed record of attributes, possibly containing `${...}`
/// references to other declarations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub address: Address,
    pub attributes: Attributes,
    /// Dependencies declared with `depends_on`, in addition to references.
    pub depends_on: BTreeSet<Address>,
}

impl Declaration {
    pub fn new(address: Address, attributes: Attributes) -> Self {
        Self {
            address,
            attributes,
            depends_on: BTreeSet::new(),
        }
    }

    /// Build a declaration, pulling `depends_on` out of the attributes.
    pub fn from_attributes(address: Address, mut attributes: Attributes) -> Result<Self> {
        let depends_on = match attributes.remove(DEPENDS_ON) {
            None => BTreeSet::new(),
            Some(value) => parse_depends_on(&address, &value)?,
        };
        Ok(Self {
            address,
            attributes,
            depends_on,
        })
    }
}

fn parse_depends_on(address: &Address, value: &Value) -> Result<BTreeSet<Address>> {
    let invalid = |reason: String| Error::InvalidReference {
        address: address.clone(),
        reference: format!("{DEPENDS_ON} = {value}"),
        reason,
    };

    let items = value
        .as_list()
        .ok_or_else(|| invalid(format!("expected a list, found {}", value.type_name())))?;

    items
        .iter()
        .map(|item| {
            item.as_str()
                .ok_or_else(|| invalid(format!("expected addresses, found {}", item.type_name())))?
                .parse::<Address>()
                .map_err(&invalid)
        })
        .collect()
}

/// Turn a `kind -> name -> attributes` document into declarations.
///
/// This is the shape a TOML file of `[kind.name]` tables deserializes into.
pub fn from_document(
    document: BTreeMap<String, BTreeMap<String, Attributes>>,
) -> Result<Vec<Declaration>> {
    let mut declarations = Vec::new();
    for (kind, entries) in document {
        for (name, attributes) in entries {
            declarations.push(Declaration::from_attributes(
                Address::new(kind.clone(), name),
                attributes,
            )?);
        }
    }
    Ok(declarations)
}
