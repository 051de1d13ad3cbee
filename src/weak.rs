use crate::{block::BlockHeader, shared::SharedPtr};
use core::{fmt, mem, ptr::NonNull};

/// [`WeakPtr<T>`] observes the ownership group of a [`SharedPtr<T>`] without
/// keeping its payload alive. It keeps the control block alive, so it can
/// always tell whether the payload still exists, and it can be promoted to a
/// [`SharedPtr`] with [`lock`](WeakPtr::lock) while it does.
///
/// ```
/// use ctlptr::{SharedPtr, WeakPtr};
///
/// let strong = SharedPtr::new(String::from("observed"));
/// let weak = WeakPtr::from(&strong);
/// assert_eq!(weak.use_count(), 1);
/// assert_eq!(weak.lock().as_str(), "observed");
///
/// drop(strong);
/// assert!(weak.expired());
/// assert!(weak.lock().is_empty());
/// ```
pub struct WeakPtr<T: ?Sized> {
    block: Option<NonNull<BlockHeader>>,
    ptr: Option<NonNull<T>>,
}

impl<T: ?Sized> WeakPtr<T> {
    /// An empty handle, bound to no control block. It is always expired.
    #[inline]
    pub const fn new() -> WeakPtr<T> {
        WeakPtr {
            block: None,
            ptr: None,
        }
    }

    /// Joins the group of `block` as an observer.
    #[inline]
    unsafe fn observe(block: NonNull<BlockHeader>, ptr: Option<NonNull<T>>) -> Self {
        block.as_ref().inc_weak();
        WeakPtr {
            block: Some(block),
            ptr,
        }
    }

    #[inline(always)]
    fn header(&self) -> Option<&BlockHeader> {
        // SAFETY: a weak reference keeps the block allocated
        self.block.map(|block| unsafe { &*block.as_ptr() })
    }

    /// Returns `true` once the payload has been released. An empty handle is
    /// always expired.
    #[inline]
    #[must_use]
    pub fn expired(&self) -> bool {
        self.use_count() == 0
    }

    /// Attempts to promote this observer to a [`SharedPtr`]. Returns an empty
    /// handle if the payload is gone.
    ///
    /// ```
    /// use ctlptr::{make_shared, WeakPtr};
    ///
    /// let a = make_shared(1u8);
    /// let w = WeakPtr::from(&a);
    /// let b = w.lock();
    /// assert_eq!(a.use_count(), 2);
    /// drop((a, b));
    /// assert!(w.lock().is_empty());
    /// ```
    pub fn lock(&self) -> SharedPtr<T> {
        match (self.block, self.ptr) {
            // SAFETY: a weak reference keeps the block allocated, and a
            // nonzero strong count keeps the payload alive
            (Some(block), Some(ptr)) if unsafe { block.as_ref() }.try_inc_strong() => unsafe {
                SharedPtr::from_parts(block, ptr)
            },
            _ => SharedPtr::empty(),
        }
    }

    /// Gets the number of strong pointers in the observed group, or 0 for an
    /// empty handle.
    #[inline]
    #[must_use]
    pub fn use_count(&self) -> usize {
        self.header().map_or(0, BlockHeader::strong)
    }

    /// Gets the number of weak pointers, this one included, observing the
    /// group.
    #[inline]
    #[must_use]
    pub fn weak_count(&self) -> usize {
        self.header().map_or(0, BlockHeader::weak)
    }

    /// The observed payload address. It is only meaningful while
    /// [`expired`](WeakPtr::expired) is false; go through
    /// [`lock`](WeakPtr::lock) to actually use the payload.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        self.ptr
    }

    /// Compares if two handles observe the same ownership group.
    #[inline]
    #[must_use]
    pub fn owner_eq<U: ?Sized>(this: &Self, other: &WeakPtr<U>) -> bool {
        this.block == other.block
    }

    /// Exchanges the observed groups of two handles.
    #[inline]
    pub fn swap(&mut self, other: &mut WeakPtr<T>) {
        mem::swap(&mut self.block, &mut other.block);
        mem::swap(&mut self.ptr, &mut other.ptr);
    }

    /// Starts observing the group of `shared`, letting go of the current one.
    #[inline]
    pub fn assign(&mut self, shared: &SharedPtr<T>) {
        self.swap(&mut WeakPtr::from(shared));
    }

    /// Stops observing and leaves this handle empty.
    #[inline]
    pub fn reset(&mut self) {
        self.swap(&mut WeakPtr::new());
    }

    /// Observes anything reachable from the payload, in the same group. If
    /// the payload is already gone, the result still observes the group but
    /// can never be locked.
    ///
    /// ```
    /// use core::fmt::Debug;
    /// use ctlptr::{SharedPtr, WeakPtr};
    ///
    /// let strong = SharedPtr::new(vec![1, 2]);
    /// let weak = WeakPtr::from(&strong);
    /// let view: WeakPtr<dyn Debug> = WeakPtr::project(&weak, |v| v as &dyn Debug);
    /// assert_eq!(format!("{:?}", view.lock()), "[1, 2]");
    /// ```
    pub fn project<U, F>(this: &Self, f: F) -> WeakPtr<U>
    where
        T: 'static,
        U: ?Sized,
        F: FnOnce(&T) -> &U,
    {
        let strong = this.lock();
        let ptr = strong.get().map(|value| NonNull::from(f(value)));
        match this.block {
            // SAFETY: `this` keeps the block allocated
            Some(block) => unsafe { WeakPtr::observe(block, ptr) },
            None => WeakPtr::new(),
        }
    }
}

impl<'a, T: ?Sized> From<&'a SharedPtr<T>> for WeakPtr<T> {
    #[inline]
    fn from(shared: &'a SharedPtr<T>) -> Self {
        match (shared.block(), shared.as_ptr()) {
            // SAFETY: `shared` holds a strong reference, the block is alive
            (Some(block), ptr) => unsafe { WeakPtr::observe(block, ptr) },
            (None, _) => WeakPtr::new(),
        }
    }
}

impl<T: ?Sized> Clone for WeakPtr<T> {
    #[inline]
    fn clone(&self) -> Self {
        match self.block {
            // SAFETY: `self` holds a weak reference, the block is alive
            Some(block) => unsafe { WeakPtr::observe(block, self.ptr) },
            None => WeakPtr::new(),
        }
    }

    #[inline]
    fn clone_from(&mut self, source: &Self) {
        self.swap(&mut source.clone());
    }
}

impl<T: ?Sized> Drop for WeakPtr<T> {
    #[inline]
    fn drop(&mut self) {
        if let Some(block) = self.block {
            // SAFETY: this handle owns one weak reference
            unsafe { BlockHeader::release_weak(block) }
        }
    }
}

impl<T: ?Sized> Default for WeakPtr<T> {
    #[inline]
    fn default() -> WeakPtr<T> {
        WeakPtr::new()
    }
}

impl<T: ?Sized> fmt::Debug for WeakPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(Weak)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_weak_is_expired() {
        let w = WeakPtr::<u32>::new();
        assert!(w.expired());
        assert!(w.lock().is_empty());
        assert_eq!((w.use_count(), w.weak_count()), (0, 0));
        assert!(w.as_ptr().is_none());
    }

    #[test]
    fn weak_from_empty_shared_is_empty() {
        let s = SharedPtr::<u32>::empty();
        let w = WeakPtr::from(&s);
        assert!(WeakPtr::owner_eq(&w, &WeakPtr::<u8>::new()));
    }

    #[test]
    fn project_after_expiry_shares_block() {
        let s = SharedPtr::new((1u8, 2u8));
        let w = WeakPtr::from(&s);
        drop(s);
        let second = WeakPtr::project(&w, |p| &p.1);
        assert!(WeakPtr::owner_eq(&w, &second));
        assert!(second.as_ptr().is_none());
        assert!(second.lock().is_empty());
        assert_eq!(w.weak_count(), 2);
    }

    #[test]
    fn assign_and_reset() {
        let a = SharedPtr::new(1);
        let b = SharedPtr::new(2);
        let mut w = WeakPtr::from(&a);
        w.assign(&b);
        assert_eq!((a.weak_count(), b.weak_count()), (0, 1));
        w.reset();
        assert_eq!(b.weak_count(), 0);
        assert!(w.expired());
    }
}
