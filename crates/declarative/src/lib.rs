//! # Declarative
//!
//! A reconciliation engine for resources that live in an external system.
//!
//! Declarations describe the desired resources and may reference each
//! other's attributes. The engine orders them by those references, compares
//! them with what it tracked on earlier runs, and drives per-kind lifecycle
//! handlers to converge.
//!
//! ## Core Concepts
//!
//! - **Declaration**: a `kind.name` address plus attributes, possibly with
//!   `${kind.name.attr}` references
//! - **Lifecycle**: a handler that creates, reads, updates and deletes one kind
//! - **ApplyPlan**: ordered steps (create, update, replace, no-op, destroy)
//! - **TrackedState**: the external IDs of everything the engine created
//! - **Engine**: plans and executes, one step at a time
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{
//!     Address, AutoConfirm, Declaration, Engine, ExecuteOptions, NoProgress, Registry,
//!     TrackedState,
//! };
//!
//! let engine = Engine::new(Registry::new().with(Box::new(VhostHandler::new(api))));
//! let declarations = vec![Declaration::new(
//!     Address::new("vhost", "test"),
//!     [("name".to_string(), "test".into())].into(),
//! )];
//!
//! let mut state = TrackedState::new();
//! let report = engine.apply(
//!     &declarations,
//!     &mut state,
//!     &ExecuteOptions::default(),
//!     &mut NoProgress,
//!     &mut AutoConfirm,
//! )?;
//! save(&state)?;
//! report.into_result()?;
//! ```
//!
//! ## Guarantees
//!
//! - Unknown references, missing attributes and cycles fail before any
//!   handler is called.
//! - Creates run after everything an instance references; destroys run in
//!   the exact reverse order.
//! - The first failing step stops execution; nothing is rolled back.

pub mod context;
pub mod declaration;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod planner;
pub mod resource;
pub mod state;
pub mod types;

// Re-export main types at crate root
pub use context::{
    AutoConfirm, AutoDecline, ConfirmCallback, LogProgress, NoProgress, ProgressCallback,
};
pub use declaration::{DEPENDS_ON, Declaration, from_document};
pub use diff::{AttributeChange, DiffSummary, compute_changes, group_by_kind};
pub use error::{Error, Phase, Result};
pub use executor::{ApplyReport, Engine, error_chain};
pub use planner::{Action, ApplyPlan, ReplaceOrder, Step};
pub use resource::{Deletion, Lifecycle, Registry, ResolvedInstance, require_str};
pub use state::{TrackedInstance, TrackedState};
pub use types::{
    Address, ApplyResult, Attributes, ExecuteOptions, ExecuteSummary, InstanceStatus, Value,
};
