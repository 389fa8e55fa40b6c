//! Engine Errors
//!
//! Every fallible entry point of the engine returns [`Result`]. Usage errors
//! (bad monitor registrations, duplicate keys) are raised synchronously at
//! the call site. Failures raised by user code (node bodies, computed
//! closures, monitor callbacks) are wrapped in [`EngineError::Body`] and
//! propagate out through `tick` or `Computed::get` unchanged.

use thiserror::Error;

/// Boxed error produced by user code.
pub type BoxError = Box<dyn std::error::Error + 'static>;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the reactive engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `add_monitor` / `clear_monitor` on an object that is not tracked by
    /// this runtime (disposed, or owned by another runtime).
    #[error("illegal monitor target: {0}")]
    IllegalTarget(String),

    /// A monitor path list that is empty, contains an empty segment, or
    /// does not resolve to a reactive property.
    #[error("illegal monitor path: {0}")]
    IllegalPath(String),

    /// A monitor callback without an identity.
    #[error("illegal monitor callback: {0}")]
    IllegalCallback(String),

    /// The same key appeared twice in one keyed group.
    #[error("duplicate key `{key}` in keyed group")]
    DuplicateKey { key: String },

    /// No property with this name exists on the observed object.
    #[error("object `{object}` has no property `{property}`")]
    UnknownProperty { object: String, property: String },

    /// The property exists but holds a different type.
    #[error("property `{property}` of `{object}` is not a `{expected}`")]
    PropertyType {
        object: String,
        property: String,
        expected: &'static str,
    },

    /// A memo slot was read back with a type other than the one stored.
    #[error("memoized slot holds a value other than `{expected}`")]
    RememberType { expected: &'static str },

    /// A computed entry was read while it was computing itself.
    #[error("computed value read itself while computing")]
    Cycle,

    /// The node handle is stale (detached, or minted before a reset).
    #[error("composition node {0} is not attached")]
    UnknownNode(String),

    /// `tick` was called while a tick was already running.
    #[error("tick called from inside a running tick")]
    ReentrantTick,

    /// The tick kept producing dirty nodes past the configured bound.
    #[error("tick did not settle after {passes} passes")]
    Unsettled { passes: usize },

    /// A computed entry or observed object was used after disposal.
    #[error("{0} has been disposed")]
    Disposed(String),

    /// A cell was written while its value was borrowed (inside `with`).
    #[error("cell {0} written while its value is borrowed")]
    CellBorrowed(String),

    /// No named state is registered under this name.
    #[error("no state named `{0}`")]
    UnknownState(String),

    /// The named state exists but holds a different type.
    #[error("state `{name}` is not a `{expected}`")]
    StateType { name: String, expected: &'static str },

    /// A named state was created from inside another one's initializer.
    #[error("state `{0}` created while another named state is initializing")]
    NestedNamedState(String),

    /// The runtime that owned this object has been dropped.
    #[error("runtime has been dropped")]
    RuntimeGone,

    /// Failure raised by user code.
    #[error(transparent)]
    Body(BoxError),
}

impl EngineError {
    /// Wrap an arbitrary error raised by user code.
    pub fn body<E>(err: E) -> Self
    where
        E: std::error::Error + 'static,
    {
        EngineError::Body(Box::new(err))
    }

    /// Build a user failure from a message.
    pub fn msg(message: impl Into<String>) -> Self {
        EngineError::Body(message.into().into())
    }

    /// Whether this error came from user code rather than the engine.
    pub fn is_body(&self) -> bool {
        matches!(self, EngineError::Body(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offender() {
        let err = EngineError::DuplicateKey { key: "a".into() };
        assert_eq!(err.to_string(), "duplicate key `a` in keyed group");

        let err = EngineError::UnknownProperty {
            object: "user".into(),
            property: "age".into(),
        };
        assert_eq!(err.to_string(), "object `user` has no property `age`");

        let err = EngineError::StateType {
            name: "theme".into(),
            expected: "u32",
        };
        assert_eq!(err.to_string(), "state `theme` is not a `u32`");
    }

    #[test]
    fn body_errors_are_transparent() {
        let err = EngineError::msg("boom");
        assert!(err.is_body());
        assert_eq!(err.to_string(), "boom");

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        let err = EngineError::body(io);
        assert!(err.is_body());
        assert_eq!(err.to_string(), "disk");
    }
}
