use crate::{
    allocator::{AllocError, Allocator, Global},
    block::EmbeddedBlock,
    shared::SharedPtr,
};
use alloc::alloc::handle_alloc_error;

/// Constructs a [`SharedPtr<T>`] with block and payload in a single
/// allocation from the global heap.
///
/// # Examples
///
/// ```
/// use ctlptr::make_shared;
///
/// let a = make_shared(42);
/// assert_eq!(*a, 42);
/// assert_eq!(a.use_count(), 1);
/// ```
#[inline]
pub fn make_shared<T>(value: T) -> SharedPtr<T> {
    allocate_shared(Global, value)
}

/// Like [`make_shared`], but the payload is produced by `init` directly in
/// its final place, after the allocation succeeded.
#[inline]
pub fn make_shared_with<T, F: FnOnce() -> T>(init: F) -> SharedPtr<T> {
    allocate_shared_with(Global, init)
}

/// Constructs a [`SharedPtr<T>`] with block and payload in a single
/// allocation taken from `alloc`. The same allocator frees it once the last
/// strong and weak references are gone.
#[inline]
pub fn allocate_shared<T, A: Allocator + 'static>(alloc: A, value: T) -> SharedPtr<T> {
    allocate_shared_with(alloc, move || value)
}

/// Like [`allocate_shared`], but the payload is produced by `init` directly
/// in its final place. If `init` panics the allocation is handed back to
/// `alloc` before the panic continues.
///
/// ```
/// use ctlptr::{allocate_shared_with, Global};
///
/// let v = allocate_shared_with(Global, || vec![0u8; 16]);
/// assert_eq!(v.len(), 16);
/// ```
pub fn allocate_shared_with<T, A, F>(alloc: A, init: F) -> SharedPtr<T>
where
    A: Allocator + 'static,
    F: FnOnce() -> T,
{
    match try_allocate_shared_with(alloc, init) {
        Ok(shared) => shared,
        Err(_) => handle_alloc_error(EmbeddedBlock::<T, A>::layout()),
    }
}

/// Fallible form of [`allocate_shared`]. On failure `value` is dropped.
#[inline]
pub fn try_allocate_shared<T, A: Allocator + 'static>(
    alloc: A,
    value: T,
) -> Result<SharedPtr<T>, AllocError> {
    try_allocate_shared_with(alloc, move || value)
}

/// Fallible form of [`allocate_shared_with`]. `init` only runs once the
/// allocation succeeded.
pub fn try_allocate_shared_with<T, A, F>(alloc: A, init: F) -> Result<SharedPtr<T>, AllocError>
where
    A: Allocator + 'static,
    F: FnOnce() -> T,
{
    let (block, ptr) = EmbeddedBlock::allocate(alloc, init)?;
    // SAFETY: a fresh block starts with the one strong reference we adopt
    Ok(unsafe { SharedPtr::from_parts(block, ptr) })
}
