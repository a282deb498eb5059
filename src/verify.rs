//! Post-condition checks against the live broker.
//!
//! These re-list broker collections and look for the composite key recorded
//! in tracked state: after an apply every tracked instance must be found,
//! after a destroy none of them may be.

use crate::identity::IdentityError;
use crate::reader::{BrokerObject, BrokerReader, ObjectKey, ResourceKind};
use anyhow::Context;
use declarative::{Address, TrackedState};
use rayon::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("{address} is not tracked")]
    ResourceNotTracked { address: Address },

    #[error("{kind} {id} not found on the broker")]
    NotFound { kind: ResourceKind, id: String },

    #[error("binding {id} not found on the broker")]
    BindingNotFound { id: String },

    #[error("{kind} {id} still exists on the broker")]
    StillExists { kind: ResourceKind, id: String },

    #[error("{address}: unknown resource kind '{kind}'")]
    UnknownKind { address: Address, kind: String },

    #[error(transparent)]
    Malformed(#[from] IdentityError),

    #[error("querying the broker failed")]
    Upstream(#[from] brokeradmin::Error),
}

/// Result of checking one tracked instance.
#[derive(Debug)]
pub struct Outcome {
    pub address: Address,
    pub result: Result<BrokerObject, VerifyError>,
}

/// Assert that a tracked instance exists on the broker, and return it.
pub fn check_applied(
    reader: &BrokerReader,
    state: &TrackedState,
    address: &Address,
) -> Result<BrokerObject, VerifyError> {
    let tracked = state
        .get(address)
        .filter(|tracked| tracked.has_id())
        .ok_or_else(|| VerifyError::ResourceNotTracked {
            address: address.clone(),
        })?;

    let kind: ResourceKind = tracked
        .kind
        .parse()
        .map_err(|_| VerifyError::UnknownKind {
            address: address.clone(),
            kind: tracked.kind.clone(),
        })?;

    let key = ObjectKey::parse(kind, &tracked.id)?;
    match reader.find(&key)? {
        Some(object) => Ok(object),
        None if kind == ResourceKind::Binding => Err(VerifyError::BindingNotFound {
            id: tracked.id.clone(),
        }),
        None => Err(VerifyError::NotFound {
            kind,
            id: tracked.id.clone(),
        }),
    }
}

/// Assert that the object an ID names is gone.
pub fn check_destroyed(
    reader: &BrokerReader,
    kind: ResourceKind,
    id: &str,
) -> Result<(), VerifyError> {
    let key = ObjectKey::parse(kind, id)?;
    match reader.find(&key)? {
        Some(_) => Err(VerifyError::StillExists {
            kind,
            id: id.to_string(),
        }),
        None => Ok(()),
    }
}

/// Check every tracked instance, `jobs` at a time.
///
/// Only reads are issued, so the checks can run in parallel. Outcomes come
/// back in address order.
pub fn verify_all(
    reader: &BrokerReader,
    state: &TrackedState,
    jobs: usize,
) -> anyhow::Result<Vec<Outcome>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .build()
        .context("Failed to build verification thread pool")?;

    let addresses: Vec<&Address> = state.instances.keys().collect();
    log::debug!("verifying {} instance(s) with {jobs} job(s)", addresses.len());

    Ok(pool.install(|| {
        addresses
            .par_iter()
            .map(|address| Outcome {
                address: (*address).clone(),
                result: check_applied(reader, state, address),
            })
            .collect()
    }))
}
