//! Reference parsing, dependency graph and ordering.
//!
//! A reference has the form `${kind.name.attr}` or
//! `${kind.name.attr.nested...}`. A string that consists of exactly one
//! reference takes the referenced value as-is (keeping its type); references
//! embedded in a longer string are rendered and concatenated.

use crate::declaration::Declaration;
use crate::error::{Error, Result};
use crate::types::{Address, Attributes, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Dependencies of each address (edges point at what must exist first).
pub type Dependencies = BTreeMap<Address, BTreeSet<Address>>;

/// A parsed `${...}` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub target: Address,
    /// Attribute name followed by nested map keys.
    pub path: Vec<String>,
    /// The reference as written, including `${` and `}`.
    pub raw: String,
}

enum Segment<'a> {
    Text(&'a str),
    Ref(Reference),
}

/// Split a string into literal text and references.
fn segments(s: &str) -> std::result::Result<Vec<Segment<'_>>, (String, String)> {
    let mut out = Vec::new();
    let mut rest = s;

    while let Some(start) = rest.find("${") {
        if start > 0 {
            out.push(Segment::Text(&rest[..start]));
        }
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err((rest[start..].to_string(), "unterminated reference".to_string()));
        };
        let inner = &after[..end];
        let raw = format!("${{{inner}}}");

        let parts: Vec<&str> = inner.split('.').collect();
        if parts.len() < 3 || parts.iter().any(|p| p.trim().is_empty()) {
            return Err((raw, "expected ${kind.name.attribute}".to_string()));
        }
        out.push(Segment::Ref(Reference {
            target: Address::new(parts[0].trim(), parts[1].trim()),
            path: parts[2..].iter().map(|p| p.trim().to_string()).collect(),
            raw,
        }));
        rest = &after[end + 1..];
    }

    if !rest.is_empty() {
        out.push(Segment::Text(rest));
    }
    Ok(out)
}

/// Collect every reference in a value, recursing into lists and maps.
pub fn references(address: &Address, value: &Value) -> Result<Vec<Reference>> {
    let mut found = Vec::new();
    collect_references(address, value, &mut found)?;
    Ok(found)
}

fn collect_references(
    address: &Address,
    value: &Value,
    found: &mut Vec<Reference>,
) -> Result<()> {
    match value {
        Value::String(s) => {
            for segment in segments(s).map_err(|(reference, reason)| Error::InvalidReference {
                address: address.clone(),
                reference,
                reason,
            })? {
                if let Segment::Ref(reference) = segment {
                    found.push(reference);
                }
            }
        }
        Value::List(items) => {
            for item in items {
                collect_references(address, item, found)?;
            }
        }
        Value::Map(map) => {
            for item in map.values() {
                collect_references(address, item, found)?;
            }
        }
        Value::Bool(_) | Value::Integer(_) => {}
    }
    Ok(())
}

/// Build the dependency map for a set of declarations.
///
/// Fails with [`Error::UnknownReference`] when a reference or `depends_on`
/// entry names an address that is not declared.
pub fn dependencies(declarations: &[Declaration]) -> Result<Dependencies> {
    let declared: BTreeSet<&Address> = declarations.iter().map(|d| &d.address).collect();
    let mut deps = Dependencies::new();

    for decl in declarations {
        let mut edges = BTreeSet::new();
        for value in decl.attributes.values() {
            for reference in references(&decl.address, value)? {
                if !declared.contains(&reference.target) {
                    return Err(Error::UnknownReference {
                        address: decl.address.clone(),
                        reference: reference.raw,
                    });
                }
                edges.insert(reference.target);
            }
        }
        for target in &decl.depends_on {
            if !declared.contains(target) {
                return Err(Error::UnknownReference {
                    address: decl.address.clone(),
                    reference: target.to_string(),
                });
            }
            edges.insert(target.clone());
        }
        deps.insert(decl.address.clone(), edges);
    }

    Ok(deps)
}

/// Order addresses so every address comes after its dependencies.
///
/// Ties are broken by address order. Dependencies on addresses that are not
/// keys of the map are ignored. A cycle fails with
/// [`Error::CyclicDependency`] naming the addresses on it.
pub fn topological_order(deps: &Dependencies) -> Result<Vec<Address>> {
    let mut remaining: BTreeMap<&Address, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&Address, Vec<&Address>> = BTreeMap::new();

    for (address, edges) in deps {
        let mut count = 0;
        for dep in edges.iter().filter(|d| deps.contains_key(*d)) {
            count += 1;
            dependents.entry(dep).or_default().push(address);
        }
        remaining.insert(address, count);
    }

    let mut ready: BTreeSet<&Address> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(address, _)| *address)
        .collect();
    let mut order = Vec::with_capacity(deps.len());

    while let Some(address) = ready.pop_first() {
        remaining.remove(address);
        order.push(address.clone());
        for dependent in dependents.get(address).into_iter().flatten() {
            if let Some(count) = remaining.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if remaining.is_empty() {
        Ok(order)
    } else {
        let stuck: BTreeSet<&Address> = remaining.keys().copied().collect();
        Err(Error::CyclicDependency {
            cycle: find_cycle(deps, &stuck),
        })
    }
}

/// Walk unresolved dependencies until an address repeats.
///
/// Every address left over by the sort has at least one dependency that is
/// also left over, so the walk always closes a loop.
fn find_cycle<'a>(deps: &'a Dependencies, stuck: &BTreeSet<&'a Address>) -> Vec<Address> {
    let mut path: Vec<&'a Address> = Vec::new();
    let mut current = stuck.first().copied();

    while let Some(address) = current {
        if let Some(pos) = path.iter().position(|a| *a == address) {
            let mut cycle: Vec<Address> = path[pos..].iter().map(|a| (*a).clone()).collect();
            cycle.push(address.clone());
            return cycle;
        }
        path.push(address);
        current = deps
            .get(address)
            .and_then(|edges| edges.iter().find(|d| stuck.contains(d)));
    }

    path.into_iter().cloned().collect()
}

/// Substitute references in a value.
///
/// `lookup` returns the attributes of a referenced address, already resolved.
pub fn resolve_value<'a, F>(address: &Address, value: &Value, lookup: &F) -> Result<Value>
where
    F: Fn(&Address) -> Option<&'a Attributes>,
{
    match value {
        Value::String(s) => resolve_string(address, s, lookup),
        Value::List(items) => items
            .iter()
            .map(|item| resolve_value(address, item, lookup))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        Value::Map(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), resolve_value(address, v, lookup)?)))
            .collect::<Result<BTreeMap<_, _>>>()
            .map(Value::Map),
        Value::Bool(_) | Value::Integer(_) => Ok(value.clone()),
    }
}

/// Resolve every attribute of a declaration.
pub fn resolve_attributes<'a, F>(
    address: &Address,
    attributes: &Attributes,
    lookup: &F,
) -> Result<Attributes>
where
    F: Fn(&Address) -> Option<&'a Attributes>,
{
    attributes
        .iter()
        .map(|(k, v)| Ok((k.clone(), resolve_value(address, v, lookup)?)))
        .collect()
}

fn resolve_string<'a, F>(address: &Address, s: &str, lookup: &F) -> Result<Value>
where
    F: Fn(&Address) -> Option<&'a Attributes>,
{
    let parts = segments(s).map_err(|(reference, reason)| Error::InvalidReference {
        address: address.clone(),
        reference,
        reason,
    })?;

    if let [Segment::Ref(reference)] = parts.as_slice() {
        return lookup_reference(address, reference, lookup).cloned();
    }

    let mut out = String::with_capacity(s.len());
    for part in &parts {
        match part {
            Segment::Text(text) => out.push_str(text),
            Segment::Ref(reference) => {
                out.push_str(&lookup_reference(address, reference, lookup)?.to_string());
            }
        }
    }
    Ok(Value::String(out))
}

fn lookup_reference<'a, F>(
    address: &Address,
    reference: &Reference,
    lookup: &F,
) -> Result<&'a Value>
where
    F: Fn(&Address) -> Option<&'a Attributes>,
{
    let attributes = lookup(&reference.target).ok_or_else(|| Error::UnknownReference {
        address: address.clone(),
        reference: reference.raw.clone(),
    })?;

    let (attr, nested) = reference
        .path
        .split_first()
        .ok_or_else(|| Error::InvalidReference {
            address: address.clone(),
            reference: reference.raw.clone(),
            reason: "missing attribute name".to_string(),
        })?;

    attributes
        .get(attr)
        .and_then(|value| value.lookup(nested))
        .ok_or_else(|| Error::UnknownAttribute {
            address: address.clone(),
            reference: reference.raw.clone(),
        })
}
