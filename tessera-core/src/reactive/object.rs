//! Observed Objects
//!
//! An observed object is a named bag of reactive properties. It is what
//! monitors attach to, and what owns computed properties.
//!
//! Properties are either cells, or nested objects that dotted monitor paths
//! walk through. Computed properties are declared up front and created on
//! their first read; disposing the object disposes them and removes every
//! monitor registered on it.

use std::any::{type_name, Any};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use super::cell::{CellInner, StateCell, Watchable};
use super::computed::Computed;
use super::runtime::{Runtime, WeakRuntime};
use crate::error::{EngineError, Result};

/// Unique identifier of an observed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

enum Property {
    Cell(Rc<dyn Watchable>),
    Object(ObservedObject),
}

/// Type-erased computed entry owned by an object.
trait ComputedProperty {
    fn as_any(&self) -> &dyn Any;
    fn dispose(&self);
}

impl<T: Clone + 'static> ComputedProperty for Computed<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dispose(&self) {
        Computed::dispose(self);
    }
}

type Factory = Box<dyn Fn(&Runtime) -> Box<dyn ComputedProperty>>;

enum ComputedSlot {
    /// Declared, never read.
    Declared(Factory),
    Live(Box<dyn ComputedProperty>),
}

struct ObjectInner {
    id: ObjectId,
    name: String,
    runtime: WeakRuntime,
    properties: RefCell<IndexMap<String, Property>>,
    computed: RefCell<IndexMap<String, ComputedSlot>>,
    disposed: Cell<bool>,
}

impl ObjectInner {
    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        let computed = match self.computed.try_borrow_mut() {
            Ok(mut computed) => std::mem::take(&mut *computed),
            Err(_) => IndexMap::new(),
        };
        for slot in computed.values() {
            if let ComputedSlot::Live(entry) = slot {
                entry.dispose();
            }
        }
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.remove_monitors_for(self.id);
        }
        tracing::debug!(object = %self.name, id = %self.id, "object disposed");
    }
}

impl Drop for ObjectInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A named, tracked bag of reactive properties.
///
/// Cloning yields another handle to the same object.
#[derive(Clone)]
pub struct ObservedObject {
    inner: Rc<ObjectInner>,
}

impl ObservedObject {
    fn new(runtime: &Runtime, name: String) -> Self {
        Self {
            inner: Rc::new(ObjectInner {
                id: ObjectId::new(),
                name,
                runtime: runtime.downgrade(),
                properties: RefCell::new(IndexMap::new()),
                computed: RefCell::new(IndexMap::new()),
                disposed: Cell::new(false),
            }),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Define a cell property, replacing any property of the same name.
    pub fn define<T: 'static>(&self, property: &str, initial: T) -> Result<StateCell<T>> {
        let runtime = self.runtime()?;
        let cell = runtime.mutable_state(initial);
        self.inner
            .properties
            .borrow_mut()
            .insert(property.to_owned(), Property::Cell(cell.watchable()));
        Ok(cell)
    }

    /// Nest `object` under `property`, so paths like `property.x` resolve.
    pub fn nest(&self, property: &str, object: ObservedObject) -> Result<()> {
        self.runtime()?;
        if Rc::ptr_eq(&self.inner, &object.inner) {
            return Err(EngineError::IllegalPath(format!(
                "`{property}` would nest `{}` inside itself",
                self.name()
            )));
        }
        self.inner
            .properties
            .borrow_mut()
            .insert(property.to_owned(), Property::Object(object));
        Ok(())
    }

    /// Handle to the cell backing `property`.
    pub fn property<T: 'static>(&self, property: &str) -> Result<StateCell<T>> {
        let watchable = match self.inner.properties.borrow().get(property) {
            Some(Property::Cell(cell)) => cell.clone(),
            Some(Property::Object(_)) => return Err(self.type_error::<T>(property)),
            None => return Err(self.unknown(property)),
        };
        watchable
            .into_any()
            .downcast::<CellInner<T>>()
            .map(StateCell::from_inner)
            .map_err(|_| self.type_error::<T>(property))
    }

    /// The nested object under `property`.
    pub fn object(&self, property: &str) -> Result<ObservedObject> {
        match self.inner.properties.borrow().get(property) {
            Some(Property::Object(object)) => Ok(object.clone()),
            Some(Property::Cell(_)) => Err(self.type_error::<ObservedObject>(property)),
            None => Err(self.unknown(property)),
        }
    }

    /// Tracked read of a cell property.
    pub fn get<T: Clone + 'static>(&self, property: &str) -> Result<T> {
        Ok(self.property::<T>(property)?.get())
    }

    /// Write a cell property. Returns whether it changed.
    pub fn set<T: PartialEq + 'static>(&self, property: &str, value: T) -> Result<bool> {
        self.property::<T>(property)?.try_set(value)
    }

    /// Declare a computed property. Nothing runs until the first read.
    pub fn declare_computed<T, F>(&self, property: &str, compute: F)
    where
        T: Clone + 'static,
        F: Fn() -> T + 'static,
    {
        let compute = Rc::new(compute);
        self.declare(
            property,
            Box::new(move |runtime: &Runtime| {
                let compute = compute.clone();
                Box::new(runtime.computed(move || compute())) as Box<dyn ComputedProperty>
            }),
        );
    }

    /// Declare a computed property whose closure may fail.
    pub fn declare_try_computed<T, F>(&self, property: &str, compute: F)
    where
        T: Clone + 'static,
        F: Fn() -> Result<T> + 'static,
    {
        let compute = Rc::new(compute);
        self.declare(
            property,
            Box::new(move |runtime: &Runtime| {
                let compute = compute.clone();
                Box::new(runtime.try_computed(move || compute())) as Box<dyn ComputedProperty>
            }),
        );
    }

    fn declare(&self, property: &str, factory: Factory) {
        let previous = self
            .inner
            .computed
            .borrow_mut()
            .insert(property.to_owned(), ComputedSlot::Declared(factory));
        if let Some(ComputedSlot::Live(entry)) = previous {
            entry.dispose();
        }
    }

    /// Read a computed property, creating its entry on first access.
    pub fn computed<T: Clone + 'static>(&self, property: &str) -> Result<T> {
        self.computed_entry::<T>(property)?.get()
    }

    /// The entry behind a computed property, created if needed.
    pub fn computed_entry<T: Clone + 'static>(&self, property: &str) -> Result<Computed<T>> {
        if self.inner.disposed.get() {
            return Err(EngineError::Disposed(format!("object `{}`", self.name())));
        }
        let runtime = self.runtime()?;
        let mut computed = self.inner.computed.borrow_mut();
        let slot = computed
            .get_mut(property)
            .ok_or_else(|| self.unknown(property))?;

        if let ComputedSlot::Declared(factory) = &*slot {
            let entry = factory(&runtime);
            tracing::trace!(object = %self.inner.name, property, "computed property created");
            *slot = ComputedSlot::Live(entry);
        }
        match slot {
            ComputedSlot::Live(entry) => entry
                .as_any()
                .downcast_ref::<Computed<T>>()
                .cloned()
                .ok_or_else(|| self.type_error::<T>(property)),
            ComputedSlot::Declared(_) => Err(self.unknown(property)),
        }
    }

    /// Resolve a dotted path to the cell backing it.
    pub(crate) fn resolve_path(&self, path: &str) -> Result<Rc<dyn Watchable>> {
        let illegal = || EngineError::IllegalPath(format!("`{path}` on `{}`", self.name()));

        let mut segments = path.split('.').peekable();
        let mut object = self.clone();
        while let Some(segment) = segments.next() {
            let next = match object.inner.properties.borrow().get(segment) {
                Some(Property::Cell(cell)) if segments.peek().is_none() => {
                    return Ok(cell.clone());
                }
                Some(Property::Object(nested)) if segments.peek().is_some() => nested.clone(),
                _ => return Err(illegal()),
            };
            object = next;
        }
        Err(illegal())
    }

    /// Whether monitors may be attached through `runtime`.
    pub fn is_tracked_by(&self, runtime: &Runtime) -> bool {
        !self.inner.disposed.get() && self.inner.runtime.is(runtime)
    }

    /// Dispose every computed property and remove every monitor on this
    /// object. Also runs when the last handle drops.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Property names, in definition order.
    pub fn keys(&self) -> Vec<String> {
        self.inner.properties.borrow().keys().cloned().collect()
    }

    fn runtime(&self) -> Result<Runtime> {
        self.inner.runtime.upgrade().ok_or(EngineError::RuntimeGone)
    }

    fn unknown(&self, property: &str) -> EngineError {
        EngineError::UnknownProperty {
            object: self.inner.name.clone(),
            property: property.to_owned(),
        }
    }

    fn type_error<T>(&self, property: &str) -> EngineError {
        EngineError::PropertyType {
            object: self.inner.name.clone(),
            property: property.to_owned(),
            expected: type_name::<T>(),
        }
    }
}

impl fmt::Debug for ObservedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservedObject")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("properties", &self.keys())
            .field("disposed", &self.inner.disposed.get())
            .finish()
    }
}

impl Runtime {
    /// Create an observed object owned by the caller.
    pub fn observed(&self, name: impl Into<String>) -> ObservedObject {
        ObservedObject::new(self, name.into())
    }
}
