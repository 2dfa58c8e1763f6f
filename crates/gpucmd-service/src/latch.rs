//! Cross-context latches.
//!
//! One table per channel, shared by every decoder on it. A context sets a
//! latch; another blocks on `WaitLatchCHROMIUM` until it is set and then
//! consumes it.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

#[derive(Debug, Clone, Default)]
pub struct LatchTable {
    set: Rc<RefCell<HashSet<u32>>>,
}

impl LatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, latch_id: u32) {
        self.set.borrow_mut().insert(latch_id);
    }

    pub fn is_set(&self, latch_id: u32) -> bool {
        self.set.borrow().contains(&latch_id)
    }

    /// Clears the latch, reporting whether it was set.
    pub fn take(&self, latch_id: u32) -> bool {
        self.set.borrow_mut().remove(&latch_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_one_table() {
        let a = LatchTable::new();
        let b = a.clone();
        assert!(!b.take(3));
        a.set(3);
        assert!(b.is_set(3));
        assert!(b.take(3));
        assert!(!a.is_set(3));
    }
}
