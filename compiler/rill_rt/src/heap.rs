//! Allocation heap.
//!
//! Allocations are vectors of words addressed by byte offsets that must be
//! word aligned. Text allocations hold immutable strings (literals and
//! string payloads). Freed allocations keep their index so stale pointers
//! fault instead of aliasing a newer allocation.

use std::sync::Arc;

use rill_native::WORD;

use crate::{ExecError, Ptr, Word};

#[derive(Debug)]
enum Allocation {
    Cells(Vec<Word>),
    Text(Arc<str>),
    Freed,
}

#[derive(Debug, Default)]
pub struct Heap {
    allocs: Vec<Allocation>,
    live_words: usize,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_index(&self) -> u32 {
        u32::try_from(self.allocs.len()).unwrap_or(u32::MAX)
    }

    pub fn alloc_words(&mut self, words: Vec<Word>) -> Ptr {
        let index = self.next_index();
        self.live_words += words.len();
        self.allocs.push(Allocation::Cells(words));
        Ptr::new(index, 0)
    }

    /// Zeroed allocation of at least `bytes` bytes.
    pub fn alloc_zeroed(&mut self, bytes: i64) -> Ptr {
        let words = usize::try_from(bytes.max(0)).unwrap_or(0).div_ceil(WORD as usize);
        self.alloc_words(vec![Word::Zero; words])
    }

    pub fn alloc_text(&mut self, text: Arc<str>) -> Ptr {
        let index = self.next_index();
        self.allocs.push(Allocation::Text(text));
        Ptr::new(index, 0)
    }

    pub fn free(&mut self, ptr: Ptr) -> Result<(), ExecError> {
        let Some(slot) = self.allocs.get_mut(ptr.alloc as usize) else {
            return Err(ExecError::OutOfBounds {
                alloc: ptr.alloc,
                offset: ptr.offset,
            });
        };
        match std::mem::replace(slot, Allocation::Freed) {
            Allocation::Cells(words) => {
                self.live_words -= words.len();
                Ok(())
            }
            // Text lives as long as the module.
            text @ Allocation::Text(_) => {
                *slot = text;
                Ok(())
            }
            Allocation::Freed => Err(ExecError::UseAfterFree(ptr.alloc)),
        }
    }

    fn cell_index(ptr: Ptr, len: usize) -> Result<usize, ExecError> {
        let out_of_bounds = ExecError::OutOfBounds {
            alloc: ptr.alloc,
            offset: ptr.offset,
        };
        if ptr.offset < 0 || ptr.offset % i64::from(WORD) != 0 {
            return Err(out_of_bounds);
        }
        let index = usize::try_from(ptr.offset / i64::from(WORD)).map_err(|_| out_of_bounds.clone())?;
        if index >= len {
            return Err(out_of_bounds);
        }
        Ok(index)
    }

    fn cells(&self, ptr: Ptr) -> Result<&Vec<Word>, ExecError> {
        match self.allocs.get(ptr.alloc as usize) {
            Some(Allocation::Cells(words)) => Ok(words),
            Some(Allocation::Freed) => Err(ExecError::UseAfterFree(ptr.alloc)),
            Some(Allocation::Text(_)) => Err(ExecError::TypeMismatch(
                "word access to a text allocation".to_owned(),
            )),
            None => Err(ExecError::OutOfBounds {
                alloc: ptr.alloc,
                offset: ptr.offset,
            }),
        }
    }

    pub fn load(&self, ptr: Ptr) -> Result<Word, ExecError> {
        let words = self.cells(ptr)?;
        let index = Self::cell_index(ptr, words.len())?;
        Ok(words[index])
    }

    pub fn store(&mut self, ptr: Ptr, value: Word) -> Result<(), ExecError> {
        let len = self.cells(ptr)?.len();
        let index = Self::cell_index(ptr, len)?;
        if let Some(Allocation::Cells(words)) = self.allocs.get_mut(ptr.alloc as usize) {
            words[index] = value;
        }
        Ok(())
    }

    pub fn text(&self, ptr: Ptr) -> Result<Arc<str>, ExecError> {
        match self.allocs.get(ptr.alloc as usize) {
            Some(Allocation::Text(text)) => Ok(Arc::clone(text)),
            Some(Allocation::Freed) => Err(ExecError::UseAfterFree(ptr.alloc)),
            _ => Err(ExecError::TypeMismatch(format!(
                "allocation {} is not text",
                ptr.alloc
            ))),
        }
    }

    /// Words currently held by live cell allocations.
    pub fn live_words(&self) -> usize {
        self.live_words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_allocation_rounds_up() {
        let mut heap = Heap::new();
        let p = heap.alloc_zeroed(12);
        assert_eq!(heap.load(p.add(8)), Ok(Word::Zero));
        assert!(heap.load(p.add(16)).is_err());
        assert_eq!(heap.live_words(), 2);
    }

    #[test]
    fn unaligned_access_faults() {
        let mut heap = Heap::new();
        let p = heap.alloc_zeroed(16);
        assert!(matches!(
            heap.store(p.add(3), Word::Int(1)),
            Err(ExecError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn freed_allocation_faults() {
        let mut heap = Heap::new();
        let p = heap.alloc_zeroed(8);
        assert_eq!(heap.free(p), Ok(()));
        assert_eq!(heap.load(p), Err(ExecError::UseAfterFree(p.alloc)));
        assert_eq!(heap.live_words(), 0);
    }
}
