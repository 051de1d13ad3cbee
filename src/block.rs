use crate::{
    allocator::{AllocError, Allocator},
    ucount,
};
use alloc::boxed::Box;
use branches::{assume, unlikely};
use core::{
    alloc::Layout,
    cell::Cell,
    mem::{self, ManuallyDrop, MaybeUninit},
    ptr::{self, NonNull},
};

/// Disposes of a payload that was handed to a [`SharedPtr`][crate::SharedPtr]
/// as a raw pointer. It is called exactly once, when the last strong
/// reference goes away.
///
/// Any `FnOnce(NonNull<U>)` closure is a deleter:
///
/// ```
/// use core::ptr::NonNull;
/// use ctlptr::SharedPtr;
///
/// let raw = Box::into_raw(Box::new(7u64));
/// let p = unsafe {
///     SharedPtr::from_raw_with_deleter(raw, |ptr: NonNull<u64>| {
///         drop(unsafe { Box::from_raw(ptr.as_ptr()) });
///     })
/// };
/// assert_eq!(*p, 7);
/// ```
pub trait Deleter<U: ?Sized> {
    /// Releases the payload behind `ptr`.
    fn delete(self, ptr: NonNull<U>);
}

impl<U: ?Sized, F: FnOnce(NonNull<U>)> Deleter<U> for F {
    #[inline]
    fn delete(self, ptr: NonNull<U>) {
        self(ptr)
    }
}

/// The deleter used when none is given: the pointer is turned back into the
/// [`Box`] it came from and dropped.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultDelete;

impl<U: ?Sized> Deleter<U> for DefaultDelete {
    #[inline]
    fn delete(self, ptr: NonNull<U>) {
        // SAFETY: raw pointer constructors require pointers produced by
        // `Box::into_raw` when paired with the default deleter
        drop(unsafe { Box::from_raw(ptr.as_ptr()) });
    }
}

/// Counters and the type-erased lifecycle entry points shared by every
/// control block. Every concrete block is `#[repr(C)]` with the header as its
/// first field, so a `NonNull<BlockHeader>` can be cast back to the block.
#[repr(C)]
pub(crate) struct BlockHeader {
    strong: Cell<ucount>,
    weak: Cell<ucount>,
    releasing: Cell<bool>,
    payload: NonNull<u8>,
    release_payload: unsafe fn(NonNull<BlockHeader>),
    release_storage: unsafe fn(NonNull<BlockHeader>),
}

/// A concrete control block layout.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` with a [`BlockHeader`] as the first
/// field, built by [`BlockHeader::new::<Self>`].
pub(crate) unsafe trait ControlBlock: Sized {
    /// Destroys the payload. Runs once, when the strong count drops to zero.
    unsafe fn release_payload(this: NonNull<Self>);

    /// Frees the block itself. Runs once, after `release_payload`, when both
    /// counts are zero.
    unsafe fn release_storage(this: NonNull<Self>);
}

unsafe fn release_payload_thunk<B: ControlBlock>(header: NonNull<BlockHeader>) {
    B::release_payload(header.cast())
}

unsafe fn release_storage_thunk<B: ControlBlock>(header: NonNull<BlockHeader>) {
    B::release_storage(header.cast())
}

#[inline(always)]
fn increment(counter: &Cell<ucount>) {
    let value = counter.get().wrapping_add(1);
    if unlikely(value == 0) {
        panic!("reference counter overflow");
    }
    counter.set(value);
}

impl BlockHeader {
    /// A header for a freshly created ownership group: one strong reference,
    /// no weak ones. `payload` is the address of the managed object.
    #[inline]
    fn new<B: ControlBlock>(payload: NonNull<u8>) -> BlockHeader {
        BlockHeader {
            strong: Cell::new(1),
            weak: Cell::new(0),
            releasing: Cell::new(false),
            payload,
            release_payload: release_payload_thunk::<B>,
            release_storage: release_storage_thunk::<B>,
        }
    }

    #[inline(always)]
    pub(crate) fn strong(&self) -> usize {
        self.strong.get() as usize
    }

    #[inline(always)]
    pub(crate) fn weak(&self) -> usize {
        self.weak.get() as usize
    }

    /// Returns `true` if `ptr` is the start of the object this block manages.
    #[inline]
    pub(crate) fn is_payload(&self, ptr: NonNull<u8>) -> bool {
        self.payload == ptr
    }

    #[inline]
    pub(crate) fn inc_strong(&self) {
        unsafe { assume(self.strong.get() != 0) };
        increment(&self.strong);
    }

    #[inline]
    pub(crate) fn inc_weak(&self) {
        increment(&self.weak);
    }

    /// Adds a strong reference unless the payload is already gone.
    #[inline]
    pub(crate) fn try_inc_strong(&self) -> bool {
        if self.strong.get() == 0 {
            return false;
        }
        increment(&self.strong);
        true
    }

    /// Drops one strong reference, releasing the payload and possibly the
    /// block.
    ///
    /// # Safety
    ///
    /// `this` must point to a live block and the caller must own one of its
    /// strong references.
    pub(crate) unsafe fn release_strong(this: NonNull<BlockHeader>) {
        let header = this.as_ref();
        let value = header.strong.get();
        assume(value != 0);
        if value != 1 {
            header.strong.set(value - 1);
            return;
        }
        header.strong.set(0);

        // The payload may own weak references to its own block; the last of
        // them must not free the block while `release_payload` still runs.
        header.releasing.set(true);
        (header.release_payload)(this);
        header.releasing.set(false);
        if header.weak.get() == 0 {
            let release_storage = header.release_storage;
            release_storage(this);
        }
    }

    /// Drops one weak reference, freeing the block if it was the last
    /// reference of any kind.
    ///
    /// # Safety
    ///
    /// `this` must point to a live block and the caller must own one of its
    /// weak references.
    pub(crate) unsafe fn release_weak(this: NonNull<BlockHeader>) {
        let header = this.as_ref();
        let value = header.weak.get();
        assume(value != 0);
        header.weak.set(value - 1);
        if value == 1 && header.strong.get() == 0 && !header.releasing.get() {
            let release_storage = header.release_storage;
            release_storage(this);
        }
    }
}

/// Control block for a payload that lives in its own allocation and is
/// released through a [`Deleter`].
#[repr(C)]
pub(crate) struct RegularBlock<U: ?Sized, D, A> {
    header: BlockHeader,
    alloc: ManuallyDrop<A>,
    deleter: ManuallyDrop<D>,
    ptr: NonNull<U>,
}

impl<U: ?Sized, D: Deleter<U>, A: Allocator> RegularBlock<U, D, A> {
    #[inline]
    pub(crate) fn layout() -> Layout {
        Layout::new::<Self>()
    }

    /// Allocates a block taking ownership of `ptr`. If the block can not be
    /// allocated the payload is handed to `deleter` before returning.
    pub(crate) fn allocate(
        ptr: NonNull<U>,
        deleter: D,
        alloc: A,
    ) -> Result<NonNull<BlockHeader>, AllocError> {
        let block = match alloc.allocate(Self::layout()) {
            Ok(mem) => mem.cast::<Self>(),
            Err(err) => {
                deleter.delete(ptr);
                return Err(err);
            }
        };
        // SAFETY: memory is fresh and sized for `Self`
        unsafe {
            block.as_ptr().write(RegularBlock {
                header: BlockHeader::new::<Self>(ptr.cast()),
                alloc: ManuallyDrop::new(alloc),
                deleter: ManuallyDrop::new(deleter),
                ptr,
            });
        }
        Ok(block.cast())
    }
}

unsafe impl<U: ?Sized, D: Deleter<U>, A: Allocator> ControlBlock for RegularBlock<U, D, A> {
    unsafe fn release_payload(this: NonNull<Self>) {
        let this = this.as_ptr();
        let deleter = ManuallyDrop::take(&mut (*this).deleter);
        deleter.delete((*this).ptr);
    }

    unsafe fn release_storage(this: NonNull<Self>) {
        let alloc = ManuallyDrop::take(&mut (*this.as_ptr()).alloc);
        alloc.deallocate(this.cast(), Self::layout());
    }
}

/// Control block that stores its payload inline, so block and payload share
/// one allocation.
#[repr(C)]
pub(crate) struct EmbeddedBlock<T, A> {
    header: BlockHeader,
    alloc: ManuallyDrop<A>,
    value: MaybeUninit<T>,
}

struct StorageGuard<'a, A: Allocator> {
    alloc: &'a A,
    mem: NonNull<u8>,
    layout: Layout,
}

impl<A: Allocator> Drop for StorageGuard<'_, A> {
    fn drop(&mut self) {
        // SAFETY: only armed between allocation and full initialization
        unsafe { self.alloc.deallocate(self.mem, self.layout) }
    }
}

impl<T, A: Allocator> EmbeddedBlock<T, A> {
    #[inline]
    pub(crate) fn layout() -> Layout {
        Layout::new::<Self>()
    }

    /// Allocates a block and builds the payload directly inside it. If `init`
    /// panics the allocation is returned to `alloc` and no block escapes.
    pub(crate) fn allocate<F: FnOnce() -> T>(
        alloc: A,
        init: F,
    ) -> Result<(NonNull<BlockHeader>, NonNull<T>), AllocError> {
        let layout = Self::layout();
        let block = alloc.allocate(layout)?.cast::<Self>();
        let guard = StorageGuard {
            alloc: &alloc,
            mem: block.cast(),
            layout,
        };
        // SAFETY: memory is fresh and sized for `Self`, fields are written
        // one by one through raw pointers
        unsafe {
            let value = ptr::addr_of_mut!((*block.as_ptr()).value).cast::<T>();
            value.write(init());
            mem::forget(guard);
            let value = NonNull::new_unchecked(value);
            ptr::addr_of_mut!((*block.as_ptr()).header).write(BlockHeader::new::<Self>(value.cast()));
            ptr::addr_of_mut!((*block.as_ptr()).alloc).write(ManuallyDrop::new(alloc));
            Ok((block.cast(), value))
        }
    }
}

unsafe impl<T, A: Allocator> ControlBlock for EmbeddedBlock<T, A> {
    unsafe fn release_payload(this: NonNull<Self>) {
        ptr::drop_in_place(ptr::addr_of_mut!((*this.as_ptr()).value).cast::<T>());
    }

    unsafe fn release_storage(this: NonNull<Self>) {
        let alloc = ManuallyDrop::take(&mut (*this.as_ptr()).alloc);
        alloc.deallocate(this.cast(), Self::layout());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::Global;
    use alloc::{rc::Rc, vec::Vec};
    use core::cell::RefCell;

    #[test]
    fn regular_block_runs_deleter_once() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let raw = Box::into_raw(Box::new(11u32));
        let block = RegularBlock::allocate(
            NonNull::new(raw).unwrap(),
            move |ptr: NonNull<u32>| {
                sink.borrow_mut().push(unsafe { *ptr.as_ptr() });
                drop(unsafe { Box::from_raw(ptr.as_ptr()) });
            },
            Global,
        )
        .unwrap();
        unsafe {
            let header = block.as_ref();
            assert_eq!((header.strong(), header.weak()), (1, 0));
            header.inc_weak();
            BlockHeader::release_strong(block);
            assert_eq!(*log.borrow(), [11]);
            assert_eq!(block.as_ref().strong(), 0);
            assert!(!block.as_ref().try_inc_strong());
            BlockHeader::release_weak(block);
        }
        assert_eq!(*log.borrow(), [11]);
    }

    #[test]
    fn embedded_block_points_inside_itself() {
        let (block, value) = EmbeddedBlock::allocate(Global, || [1u8, 2, 3]).unwrap();
        let start = block.as_ptr() as usize;
        let end = start + EmbeddedBlock::<[u8; 3], Global>::layout().size();
        assert!((start..end).contains(&(value.as_ptr() as usize)));
        assert_eq!(unsafe { *value.as_ptr() }, [1, 2, 3]);
        unsafe { BlockHeader::release_strong(block) };
    }

    #[test]
    #[should_panic(expected = "reference counter overflow")]
    fn counter_overflow_panics() {
        let counter = Cell::new(ucount::MAX);
        increment(&counter);
    }
}
