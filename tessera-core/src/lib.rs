//! Tessera Core
//!
//! This crate provides a fine-grained reactive state and incremental
//! composition engine. It implements:
//!
//! - Reactive primitives (state cells, computed entries, monitors)
//! - Dependency tracking with stale-edge cleanup
//! - A composition tree with once, remember and lifecycle memoization
//! - Keyed reconciliation of repeated children
//! - A tick scheduler that drives the tree to a fixed point
//!
//! The engine is synchronous and single-threaded. It has no I/O and no
//! rendering; hosts create cells, build a tree of bodies and call `tick`.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: cells, dependency tracking, computed entries, monitors
//! - `graph`: composition nodes, keyed reconciliation, the tick scheduler
//! - `testing`: harness for driving trees from tests
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use tessera_core::Runtime;
//!
//! let runtime = Runtime::new();
//! let rows = runtime.mutable_state(vec!["a", "b"]);
//! let rendered = Rc::new(RefCell::new(Vec::new()));
//!
//! let root = {
//!     let (rows, rendered) = (rows.clone(), rendered.clone());
//!     runtime.create_root(move |scope| {
//!         let rows = rows.get();
//!         let rendered = rendered.clone();
//!         scope.repeat_by_array(
//!             &rows,
//!             |row, _| row.to_string(),
//!             move |_, row, _| {
//!                 rendered.borrow_mut().push(row.to_string());
//!                 Ok(())
//!             },
//!         )?;
//!         Ok(())
//!     })
//! };
//!
//! runtime.tick(root).unwrap();
//! assert_eq!(*rendered.borrow(), vec!["a", "b"]);
//!
//! rows.set(vec!["a", "b", "c"]);
//! runtime.tick(root).unwrap();
//! assert_eq!(rendered.borrow().len(), 5);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;
pub mod testing;

pub use config::EngineConfig;
pub use error::{BoxError, EngineError, Result};
pub use graph::{NodeId, Scope, TickReport};
pub use reactive::{
    ArrayState, Computed, MonitorCallback, MonitorEvent, MonitorOptions, ObservedObject, Runtime,
    StateCell, ValueTracker,
};
