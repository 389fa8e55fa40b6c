//! Reactive Primitives
//!
//! This module implements the reactive half of the engine: state cells,
//! dependency tracking, computed entries, observed objects and monitors.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A [`StateCell`] is a container for mutable state. When it is read while an
//! observer is recording, the read is registered as an edge. When its value
//! changes, every observer on the other end of an edge is invalidated.
//!
//! ## Computed Entries
//!
//! A [`Computed`] is a derived value that caches its result and re-evaluates
//! only when one of the cells it read changed. It is itself observable:
//! whoever reads a computed entry depends on it.
//!
//! ## Named State
//!
//! A cell can be registered under a name, globally on the runtime or
//! locally on a composition node, and looked up by that name later.
//!
//! ## Monitors
//!
//! A monitor watches named paths on an [`ObservedObject`] and runs a named
//! callback, at most once per tick, when any of them changed.
//!
//! # Implementation Notes
//!
//! Every registry lives in a [`Runtime`] instance. Edges are keyed by cell
//! id and observer handle, never by pointer, so neither side keeps the other
//! alive.

mod array;
mod cell;
mod computed;
mod context;
mod monitor;
mod named;
mod object;
mod runtime;
mod subscriber;
mod tracker;

pub use array::ArrayState;
pub use cell::{StateCell, ValueTracker};
pub use computed::{Computed, ComputedState};
pub use context::{Recording, RecordingContext};
pub use monitor::{MonitorCallback, MonitorEvent, MonitorId, MonitorOptions, MonitorPaths};
pub use object::{ObjectId, ObservedObject};
pub use runtime::Runtime;
pub use subscriber::{CellId, ComputedId, ObserverId};
pub use tracker::{Dependents, DependencyTracker};
