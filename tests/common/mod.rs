#![allow(dead_code)]

use core::{alloc::Layout, cell::Cell, cell::RefCell, ptr::NonNull};
use ctlptr::{AllocError, Allocator, Global};
use std::rc::Rc;

#[derive(Default, Debug)]
pub struct Stats {
    pub allocs: Cell<usize>,
    pub frees: Cell<usize>,
    pub fail: Cell<bool>,
}

impl Stats {
    pub fn pair(&self) -> (usize, usize) {
        (self.allocs.get(), self.frees.get())
    }
}

/// Global heap that records every allocation and deallocation it serves.
#[derive(Clone, Default, Debug)]
pub struct Counting(pub Rc<Stats>);

impl Counting {
    pub fn failing() -> Self {
        let counting = Counting::default();
        counting.0.fail.set(true);
        counting
    }
}

unsafe impl Allocator for Counting {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if self.0.fail.get() {
            return Err(AllocError);
        }
        self.0.allocs.set(self.0.allocs.get() + 1);
        Global.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.0.frees.set(self.0.frees.get() + 1);
        Global.deallocate(ptr, layout)
    }
}

pub type Log = Rc<RefCell<Vec<&'static str>>>;

/// Payload that records its own destruction.
#[derive(Debug)]
pub struct Tracked {
    pub name: &'static str,
    pub log: Log,
}

impl Tracked {
    pub fn new(name: &'static str, log: &Log) -> Self {
        Tracked {
            name,
            log: log.clone(),
        }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.log.borrow_mut().push(self.name);
    }
}
