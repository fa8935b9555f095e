//! Dense D-dimensional histograms addressed by the classification index.

use std::ops::{Index, IndexMut};

use crate::store::{ArrayStore, Element, StoreError, StoredArray};

/// Row-major dense array with fixed extents.
///
/// Indexing with an out-of-range coordinate panics, like slice indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram<T, const D: usize> {
    extents: [usize; D],
    data: Vec<T>,
}

impl<T: Element, const D: usize> Histogram<T, D> {
    /// Zero-filled histogram with the given extents.
    pub fn new(extents: [usize; D]) -> Self {
        let len = extents.iter().product();
        Self { extents, data: vec![T::default(); len] }
    }

    pub fn extents(&self) -> [usize; D] {
        self.extents
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flat row-major view.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn get(&self, index: [usize; D]) -> Option<&T> {
        self.offset(index).map(|o| &self.data[o])
    }

    /// Contiguous row of the innermost dimension at the given leading index.
    pub fn row(&self, leading: &[usize]) -> &[T] {
        let (start, len) = self.row_bounds(leading);
        &self.data[start..start + len]
    }

    pub fn row_mut(&mut self, leading: &[usize]) -> &mut [T] {
        let (start, len) = self.row_bounds(leading);
        &mut self.data[start..start + len]
    }

    fn offset(&self, index: [usize; D]) -> Option<usize> {
        let mut offset = 0;
        for (&i, &extent) in index.iter().zip(self.extents.iter()) {
            if i >= extent {
                return None;
            }
            offset = offset * extent + i;
        }
        Some(offset)
    }

    fn row_bounds(&self, leading: &[usize]) -> (usize, usize) {
        assert!(D > 0 && leading.len() == D - 1, "row() needs {} leading indices", D.saturating_sub(1));
        let inner = self.extents[D - 1];
        let mut offset = 0;
        for (&i, &extent) in leading.iter().zip(self.extents.iter()) {
            assert!(i < extent, "index {i} out of range for extent {extent}");
            offset = offset * extent + i;
        }
        (offset * inner, inner)
    }

    // ── Persistence ─────────────────────────────────

    /// Write under `name`, replacing any previous array.
    pub fn save<S: ArrayStore + ?Sized>(&self, store: &mut S, name: &str) -> Result<(), StoreError> {
        store.write_array(
            name,
            StoredArray { extents: self.extents.to_vec(), data: T::into_data(self.data.clone()) },
        )
    }

    /// Overwrite this histogram with the array stored under `name`.
    ///
    /// The stored element type and extents must match exactly.
    pub fn load<S: ArrayStore + ?Sized>(&mut self, store: &S, name: &str) -> Result<(), StoreError> {
        let stored = store.read_array(name)?;
        if stored.extents != self.extents {
            return Err(StoreError::ShapeMismatch {
                name: name.to_string(),
                expected: self.extents.to_vec(),
                found: stored.extents,
            });
        }
        let found = stored.data.type_name();
        let data = T::from_data(stored.data).ok_or_else(|| StoreError::TypeMismatch {
            name: name.to_string(),
            expected: T::TYPE_NAME,
            found,
        })?;
        if data.len() != self.data.len() {
            return Err(StoreError::ShapeMismatch {
                name: name.to_string(),
                expected: self.extents.to_vec(),
                found: vec![data.len()],
            });
        }
        self.data = data;
        Ok(())
    }
}

impl<T: Element, const D: usize> Index<[usize; D]> for Histogram<T, D> {
    type Output = T;

    #[inline]
    fn index(&self, index: [usize; D]) -> &T {
        match self.offset(index) {
            Some(o) => &self.data[o],
            None => panic!("histogram index {index:?} out of range for extents {:?}", self.extents),
        }
    }
}

impl<T: Element, const D: usize> IndexMut<[usize; D]> for Histogram<T, D> {
    #[inline]
    fn index_mut(&mut self, index: [usize; D]) -> &mut T {
        match self.offset(index) {
            Some(o) => &mut self.data[o],
            None => panic!("histogram index {index:?} out of range for extents {:?}", self.extents),
        }
    }
}
