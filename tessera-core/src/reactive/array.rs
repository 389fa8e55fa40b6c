//! Array State
//!
//! A reactive vector. Reads record a dependency on the whole array and every
//! mutator notifies dependents, so observers never need to replace the
//! vector just to make a change visible.

use std::cmp::Ordering;
use std::fmt::{self, Debug};

use super::cell::StateCell;
use super::runtime::Runtime;
use super::subscriber::CellId;
use crate::error::Result;

/// A vector whose mutators are reactive.
///
/// # Example
///
/// ```rust
/// use tessera_core::reactive::Runtime;
///
/// let runtime = Runtime::new();
/// let queue = runtime.array_state(vec![1, 2]);
///
/// queue.push(3).unwrap();
/// assert_eq!(queue.shift().unwrap(), Some(1));
/// assert_eq!(queue.to_vec(), vec![2, 3]);
/// assert!(queue.modified());
/// ```
pub struct ArrayState<T> {
    cell: StateCell<Vec<T>>,
}

impl<T: 'static> ArrayState<T> {
    /// The cell holding the vector.
    pub fn cell(&self) -> &StateCell<Vec<T>> {
        &self.cell
    }

    pub fn id(&self) -> CellId {
        self.cell.id()
    }

    pub fn len(&self) -> usize {
        self.cell.with(Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clone of the element at `index`.
    pub fn at(&self, index: usize) -> Option<T>
    where
        T: Clone,
    {
        self.cell.with(|items| items.get(index).cloned())
    }

    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.cell.get()
    }

    /// Borrow the elements, recording the read.
    pub fn with<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        self.cell.with(|items| f(items))
    }

    /// Replace the whole vector.
    pub fn replace(&self, items: Vec<T>) {
        self.cell.write(items);
    }

    pub fn push(&self, item: T) -> Result<()> {
        self.cell.modify(|items| items.push(item))
    }

    pub fn pop(&self) -> Result<Option<T>> {
        self.cell.modify(Vec::pop)
    }

    /// Remove the first element.
    pub fn shift(&self) -> Result<Option<T>> {
        self.cell
            .modify(|items| (!items.is_empty()).then(|| items.remove(0)))
    }

    /// Insert `item` at the front.
    pub fn unshift(&self, item: T) -> Result<()> {
        self.cell.modify(|items| items.insert(0, item))
    }

    /// Insert at `index`, clamped to the length.
    pub fn insert(&self, index: usize, item: T) -> Result<()> {
        self.cell.modify(|items| {
            let index = index.min(items.len());
            items.insert(index, item);
        })
    }

    /// Remove the element at `index`, if there is one.
    pub fn remove(&self, index: usize) -> Result<Option<T>> {
        self.cell
            .modify(|items| (index < items.len()).then(|| items.remove(index)))
    }

    pub fn reverse(&self) -> Result<()> {
        self.cell.modify(|items| items.reverse())
    }

    /// Stable sort by `compare`.
    pub fn sort_by(&self, compare: impl FnMut(&T, &T) -> Ordering) -> Result<()> {
        self.cell.modify(|items| items.sort_by(compare))
    }

    /// Overwrite every element with `value`.
    pub fn fill(&self, value: T) -> Result<()>
    where
        T: Clone,
    {
        self.cell.modify(|items| items.fill(value))
    }

    pub fn truncate(&self, len: usize) -> Result<()> {
        self.cell.modify(|items| items.truncate(len))
    }

    pub fn clear(&self) -> Result<()> {
        self.cell.modify(Vec::clear)
    }

    /// Whether the array changed since the last completed tick.
    pub fn modified(&self) -> bool {
        self.cell.modified()
    }
}

impl<T> Clone for ArrayState<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T: Debug + 'static> Debug for ArrayState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayState")
            .field("id", &self.cell.id())
            .field("items", &*self.cell.borrow_untracked())
            .finish()
    }
}

impl Runtime {
    /// Create a reactive array.
    pub fn array_state<T: 'static>(&self, initial: Vec<T>) -> ArrayState<T> {
        ArrayState {
            cell: self.mutable_state(initial),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ComputedState;

    #[test]
    fn mutators_behave_like_a_deque() {
        let runtime = Runtime::new();
        let items = runtime.array_state(vec![2, 3]);

        items.unshift(1).unwrap();
        items.push(4).unwrap();
        assert_eq!(items.to_vec(), vec![1, 2, 3, 4]);

        assert_eq!(items.shift().unwrap(), Some(1));
        assert_eq!(items.pop().unwrap(), Some(4));
        assert_eq!(items.remove(7).unwrap(), None);
        items.insert(9, 5).unwrap();
        assert_eq!(items.to_vec(), vec![2, 3, 5]);

        items.reverse().unwrap();
        assert_eq!(items.at(0), Some(5));
        items.sort_by(|a, b| a.cmp(b)).unwrap();
        items.fill(0).unwrap();
        assert_eq!(items.to_vec(), vec![0, 0, 0]);

        items.clear().unwrap();
        assert!(items.is_empty());
        assert_eq!(items.shift().unwrap(), None);
    }

    #[test]
    fn every_mutation_notifies() {
        let runtime = Runtime::new();
        let items = runtime.array_state(vec![3, 1, 2]);
        let total = {
            let items = items.clone();
            runtime.computed(move || items.with(|xs| xs.iter().sum::<i32>()))
        };
        assert_eq!(total.get().unwrap(), 6);

        let before = items.cell().version();
        items.sort_by(|a, b| b.cmp(a)).unwrap();
        assert_eq!(items.cell().version(), before + 1);
        assert_eq!(total.state(), ComputedState::Dirty);

        assert_eq!(total.get().unwrap(), 6);
        items.push(4).unwrap();
        assert_eq!(total.get().unwrap(), 10);
        assert_eq!(total.run_count(), 3);
    }

    #[test]
    fn mutating_while_reading_fails() {
        let runtime = Runtime::new();
        let items = runtime.array_state(vec![1]);
        let inner = items.clone();
        let result = items.with(|_| inner.push(2));
        assert!(matches!(result, Err(crate::EngineError::CellBorrowed(_))));
        assert_eq!(items.len(), 1);
    }
}
