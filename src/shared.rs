use crate::{
    allocator::{AllocError, Allocator, Global},
    block::{BlockHeader, DefaultDelete, Deleter, RegularBlock},
    make::make_shared,
    weak::WeakPtr,
};
use alloc::{alloc::handle_alloc_error, boxed::Box};
use core::{
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    mem,
    ops::Deref,
    ptr::NonNull,
};

/// [`SharedPtr<T>`] is a single-threaded reference-counting pointer that keeps
/// its counts in a separate control block. Cloning a [`SharedPtr`] shares the
/// block and increments its strong count. When the last [`SharedPtr`] of a
/// group is destroyed the payload is released, even if [`WeakPtr`]s to it are
/// still around; the block itself lives until the last [`WeakPtr`] is gone.
///
/// Unlike `std::rc::Rc`, a [`SharedPtr`] can be empty. Dereferencing an empty
/// handle panics, use [`get`](SharedPtr::get) when emptiness is possible.
///
/// ```
/// use ctlptr::SharedPtr;
///
/// let c = SharedPtr::new(String::from("shared"));
/// let d = c.clone();
/// assert_eq!((c.use_count(), d.use_count()), (2, 2));
/// drop(c);
/// assert_eq!(d.use_count(), 1);
/// ```
pub struct SharedPtr<T: ?Sized> {
    raw: Option<(NonNull<BlockHeader>, NonNull<T>)>,
    phantom: PhantomData<T>,
}

impl<T> SharedPtr<T> {
    /// Constructs a new [`SharedPtr<T>`], block and payload in one
    /// allocation. Same as [`make_shared`].
    ///
    /// # Examples
    ///
    /// ```
    /// use ctlptr::SharedPtr;
    ///
    /// let tada = SharedPtr::new("Tada!");
    /// assert_eq!(tada.use_count(), 1);
    /// ```
    #[inline]
    pub fn new(value: T) -> SharedPtr<T> {
        make_shared(value)
    }
}

impl<T: ?Sized> SharedPtr<T> {
    /// An empty handle. It owns nothing and reports a `use_count` of 0.
    #[inline]
    pub const fn empty() -> SharedPtr<T> {
        SharedPtr {
            raw: None,
            phantom: PhantomData,
        }
    }

    /// Adopts a strong reference the caller already accounted for.
    #[inline]
    pub(crate) unsafe fn from_parts(block: NonNull<BlockHeader>, ptr: NonNull<T>) -> Self {
        SharedPtr {
            raw: Some((block, ptr)),
            phantom: PhantomData,
        }
    }

    /// Joins the ownership group of `block`, adding one strong reference.
    #[inline]
    unsafe fn share(block: NonNull<BlockHeader>, ptr: NonNull<T>) -> Self {
        block.as_ref().inc_strong();
        Self::from_parts(block, ptr)
    }

    #[inline(always)]
    pub(crate) fn block(&self) -> Option<NonNull<BlockHeader>> {
        self.raw.map(|(block, _)| block)
    }

    #[inline(always)]
    fn header(&self) -> Option<&BlockHeader> {
        // SAFETY: the block outlives every strong reference to it
        self.raw.map(|(block, _)| unsafe { &*block.as_ptr() })
    }

    /// Takes ownership of a pointer produced by [`Box::into_raw`]. A null
    /// pointer gives an empty handle.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or come from `Box::into_raw` and must not be owned
    /// by anything else.
    ///
    /// # Examples
    ///
    /// ```
    /// use ctlptr::SharedPtr;
    ///
    /// let p = unsafe { SharedPtr::from_raw(Box::into_raw(Box::new(5))) };
    /// assert_eq!(*p, 5);
    /// ```
    #[inline]
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        Self::from_raw_in(ptr, DefaultDelete, Global)
    }

    /// Takes ownership of `ptr`, releasing it with `deleter` once the last
    /// strong reference is gone. A null pointer gives an empty handle and
    /// the deleter is dropped unused.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or valid for reads and writes until `deleter` runs,
    /// must not be accessed other than through the returned group meanwhile,
    /// and `deleter` must be able to release it.
    #[inline]
    pub unsafe fn from_raw_with_deleter<D>(ptr: *mut T, deleter: D) -> Self
    where
        D: Deleter<T> + 'static,
    {
        Self::from_raw_in(ptr, deleter, Global)
    }

    /// Like [`from_raw_with_deleter`](SharedPtr::from_raw_with_deleter), with
    /// the control block allocated from `alloc`.
    ///
    /// # Safety
    ///
    /// Same contract as [`from_raw_with_deleter`](SharedPtr::from_raw_with_deleter).
    pub unsafe fn from_raw_in<D, A>(ptr: *mut T, deleter: D, alloc: A) -> Self
    where
        D: Deleter<T> + 'static,
        A: Allocator + 'static,
    {
        match Self::try_from_raw_in(ptr, deleter, alloc) {
            Ok(this) => this,
            Err(_) => handle_alloc_error(RegularBlock::<T, D, A>::layout()),
        }
    }

    /// Fallible form of [`from_raw_in`](SharedPtr::from_raw_in). When the
    /// control block can not be allocated the payload is passed to `deleter`
    /// before the error is returned, so nothing leaks.
    ///
    /// # Safety
    ///
    /// Same contract as [`from_raw_with_deleter`](SharedPtr::from_raw_with_deleter).
    pub unsafe fn try_from_raw_in<D, A>(ptr: *mut T, deleter: D, alloc: A) -> Result<Self, AllocError>
    where
        D: Deleter<T> + 'static,
        A: Allocator + 'static,
    {
        match NonNull::new(ptr) {
            Some(ptr) => {
                let block = RegularBlock::allocate(ptr, deleter, alloc)?;
                Ok(Self::from_parts(block, ptr))
            }
            None => Ok(Self::empty()),
        }
    }

    /// Moves a boxed payload behind a [`SharedPtr`] without copying it; the
    /// control block is allocated from `alloc`.
    ///
    /// ```
    /// use ctlptr::{Global, SharedPtr};
    ///
    /// let p: SharedPtr<[u8]> = SharedPtr::from_box_in(vec![1, 2, 3].into_boxed_slice(), Global);
    /// assert_eq!(p.len(), 3);
    /// ```
    pub fn from_box_in<A: Allocator + 'static>(value: Box<T>, alloc: A) -> Self {
        // SAFETY: the pointer comes straight from `Box::into_raw`
        unsafe { Self::from_raw_in(Box::into_raw(value), DefaultDelete, alloc) }
    }

    /// Fallible form of [`from_box_in`](SharedPtr::from_box_in). On failure
    /// the box is dropped.
    pub fn try_from_box_in<A: Allocator + 'static>(value: Box<T>, alloc: A) -> Result<Self, AllocError> {
        // SAFETY: the pointer comes straight from `Box::into_raw`
        unsafe { Self::try_from_raw_in(Box::into_raw(value), DefaultDelete, alloc) }
    }

    /// Gets the number of strong pointers in this handle's ownership group,
    /// or 0 for an empty handle.
    ///
    /// # Examples
    ///
    /// ```
    /// use ctlptr::SharedPtr;
    ///
    /// let five = SharedPtr::new(5);
    /// let _also_five = five.clone();
    /// assert_eq!(2, five.use_count());
    /// assert_eq!(0, SharedPtr::<i32>::empty().use_count());
    /// ```
    #[inline]
    #[must_use]
    pub fn use_count(&self) -> usize {
        self.header().map_or(0, BlockHeader::strong)
    }

    /// Gets the number of [`WeakPtr`]s observing this handle's group.
    #[inline]
    #[must_use]
    pub fn weak_count(&self) -> usize {
        self.header().map_or(0, BlockHeader::weak)
    }

    /// Returns `true` if this handle owns nothing.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_none()
    }

    /// Returns a reference to the payload, or `None` for an empty handle.
    #[inline]
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        // SAFETY: the payload lives as long as any strong reference
        self.raw.map(|(_, ptr)| unsafe { &*ptr.as_ptr() })
    }

    /// Gives you a pointer to the payload without touching the counts. The
    /// pointer stays valid as long as the group has strong references.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        self.raw.map(|(_, ptr)| ptr)
    }

    /// Returns a mutable reference to the payload if this is the only
    /// reference of any kind to it. A handle produced by
    /// [`project`](SharedPtr::project) only qualifies while it still points
    /// at the start of the managed object; anything else it may point at is
    /// not owned by the group.
    ///
    /// ```
    /// use ctlptr::{SharedPtr, WeakPtr};
    ///
    /// let mut x = SharedPtr::new(3);
    /// *SharedPtr::get_mut(&mut x).unwrap() = 4;
    /// assert_eq!(*x, 4);
    ///
    /// let _w = WeakPtr::from(&x);
    /// assert!(SharedPtr::get_mut(&mut x).is_none());
    /// ```
    #[inline]
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        match this.raw {
            Some((block, ptr)) => {
                // SAFETY: block is alive while `this` is
                let header = unsafe { block.as_ref() };
                if header.strong() == 1 && header.weak() == 0 && header.is_payload(ptr.cast()) {
                    // SAFETY: no other handle can reach the payload
                    Some(unsafe { &mut *ptr.as_ptr() })
                } else {
                    None
                }
            }
            None => None,
        }
    }

    /// Compares if two handles point at the same payload address.
    #[inline]
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        match (this.as_ptr(), other.as_ptr()) {
            (Some(a), Some(b)) => a.cast::<u8>() == b.cast::<u8>(),
            (None, None) => true,
            _ => false,
        }
    }

    /// Compares if two handles belong to the same ownership group, whatever
    /// type or subobject they point at.
    ///
    /// ```
    /// use ctlptr::SharedPtr;
    ///
    /// let pair = SharedPtr::new((1, 2));
    /// let second = SharedPtr::project(pair.clone(), |p| &p.1);
    /// assert!(SharedPtr::owner_eq(&pair, &second));
    /// ```
    #[inline]
    #[must_use]
    pub fn owner_eq<U: ?Sized>(this: &Self, other: &SharedPtr<U>) -> bool {
        this.block() == other.block()
    }

    /// Exchanges ownership with `other`. Counts are untouched.
    #[inline]
    pub fn swap(&mut self, other: &mut SharedPtr<T>) {
        mem::swap(&mut self.raw, &mut other.raw);
    }

    /// Releases this handle's ownership and leaves it empty.
    ///
    /// ```
    /// use ctlptr::SharedPtr;
    ///
    /// let mut a = SharedPtr::new(1);
    /// let b = a.clone();
    /// a.reset();
    /// assert!(a.is_empty());
    /// assert_eq!(b.use_count(), 1);
    /// ```
    #[inline]
    pub fn reset(&mut self) {
        self.swap(&mut SharedPtr::empty());
    }

    /// Releases this handle's ownership and takes ownership of `value`
    /// instead.
    #[inline]
    pub fn reset_with(&mut self, value: Box<T>) {
        self.swap(&mut SharedPtr::from(value));
    }

    /// Releases this handle's ownership and adopts `ptr` with the default
    /// deleter. A null pointer leaves the handle empty.
    ///
    /// # Safety
    ///
    /// Same contract as [`from_raw`](SharedPtr::from_raw).
    #[inline]
    pub unsafe fn reset_raw(&mut self, ptr: *mut T) {
        self.swap(&mut SharedPtr::from_raw(ptr));
    }

    /// Creates a [`WeakPtr`] observing this handle's group.
    #[inline]
    pub fn downgrade(this: &Self) -> WeakPtr<T> {
        WeakPtr::from(this)
    }

    /// Turns a handle into one pointing at anything reachable from its
    /// payload, sharing the same control block. This is how a handle to a
    /// concrete type is viewed through a trait object, or narrowed to a
    /// field.
    ///
    /// ```
    /// use core::fmt::Display;
    /// use ctlptr::SharedPtr;
    ///
    /// let n = SharedPtr::new(17u8);
    /// let shown: SharedPtr<dyn Display> = SharedPtr::project(n.clone(), |v| v as &dyn Display);
    /// assert_eq!(shown.to_string(), "17");
    /// assert_eq!(n.use_count(), 2);
    /// ```
    pub fn project<U, F>(this: Self, f: F) -> SharedPtr<U>
    where
        T: 'static,
        U: ?Sized,
        F: FnOnce(&T) -> &U,
    {
        let ptr = this.get().map(|value| NonNull::from(f(value)));
        match (this.block(), ptr) {
            (Some(block), Some(ptr)) => {
                mem::forget(this);
                // SAFETY: the strong reference moves from `this` to the result
                unsafe { SharedPtr::from_parts(block, ptr) }
            }
            _ => SharedPtr::empty(),
        }
    }
}

impl<T: ?Sized> Deref for SharedPtr<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced an empty SharedPtr"),
        }
    }
}

impl<T: ?Sized> Clone for SharedPtr<T> {
    #[inline]
    fn clone(&self) -> Self {
        match self.raw {
            // SAFETY: `self` holds a strong reference, the block is alive
            Some((block, ptr)) => unsafe { SharedPtr::share(block, ptr) },
            None => SharedPtr::empty(),
        }
    }

    /// Builds the new value first and swaps it in, so assigning a handle to
    /// itself or to a member of its own group is harmless.
    #[inline]
    fn clone_from(&mut self, source: &Self) {
        self.swap(&mut source.clone());
    }
}

impl<T: ?Sized> Drop for SharedPtr<T> {
    #[inline]
    fn drop(&mut self) {
        if let Some((block, _)) = self.raw {
            // SAFETY: this handle owns one strong reference
            unsafe { BlockHeader::release_strong(block) }
        }
    }
}

impl<T: ?Sized> Default for SharedPtr<T> {
    #[inline]
    fn default() -> SharedPtr<T> {
        SharedPtr::empty()
    }
}

impl<T> From<T> for SharedPtr<T> {
    #[inline(always)]
    fn from(value: T) -> Self {
        make_shared(value)
    }
}

impl<T: ?Sized> From<Box<T>> for SharedPtr<T> {
    #[inline]
    fn from(value: Box<T>) -> Self {
        SharedPtr::from_box_in(value, Global)
    }
}

impl<T: ?Sized + Hash> Hash for SharedPtr<T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.get().hash(state);
    }
}

impl<T: ?Sized + fmt::Display> fmt::Display for SharedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => fmt::Display::fmt(value, f),
            None => f.write_str("(empty)"),
        }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SharedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => fmt::Debug::fmt(value, f),
            None => f.write_str("(empty)"),
        }
    }
}

impl<T: ?Sized> fmt::Pointer for SharedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ptr = self
            .as_ptr()
            .map_or(core::ptr::null(), |ptr| ptr.cast::<u8>().as_ptr() as *const u8);
        fmt::Pointer::fmt(&ptr, f)
    }
}

impl<T: ?Sized + PartialEq> PartialEq for SharedPtr<T> {
    #[inline]
    fn eq(&self, other: &SharedPtr<T>) -> bool {
        self.get() == other.get()
    }
}

impl<T: ?Sized + Eq> Eq for SharedPtr<T> {}

impl<T: ?Sized + PartialOrd> PartialOrd for SharedPtr<T> {
    #[inline]
    fn partial_cmp(&self, other: &SharedPtr<T>) -> Option<core::cmp::Ordering> {
        self.get().partial_cmp(&other.get())
    }
}

impl<T: ?Sized + Ord> Ord for SharedPtr<T> {
    #[inline]
    fn cmp(&self, other: &SharedPtr<T>) -> core::cmp::Ordering {
        self.get().cmp(&other.get())
    }
}

impl<T: ?Sized> Unpin for SharedPtr<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::{format, string::String};

    #[test]
    fn empty_handle() {
        let p = SharedPtr::<String>::empty();
        assert!(p.is_empty());
        assert_eq!(p.use_count(), 0);
        assert_eq!(p.weak_count(), 0);
        assert!(p.get().is_none());
        assert_eq!(format!("{:?}", p), "(empty)");
        assert_eq!(p, SharedPtr::default());
    }

    #[test]
    #[should_panic(expected = "dereferenced an empty SharedPtr")]
    fn deref_empty_panics() {
        let p = SharedPtr::<u8>::empty();
        let _value: u8 = *p;
    }

    #[test]
    fn clone_from_same_group() {
        let mut a = SharedPtr::new(5);
        let b = a.clone();
        a.clone_from(&b);
        assert_eq!(a.use_count(), 2);
        let c = a.clone();
        a.clone_from(&c);
        assert_eq!(c.use_count(), 3);
    }

    #[test]
    fn project_empty_stays_empty() {
        let p = SharedPtr::<(u8, u8)>::empty();
        let q = SharedPtr::project(p, |v| &v.0);
        assert!(q.is_empty());
    }

    #[test]
    fn ordering_follows_payload() {
        let a = SharedPtr::new(1);
        let b = SharedPtr::new(2);
        assert!(a < b);
        assert!(SharedPtr::empty() < a);
        assert!(!SharedPtr::ptr_eq(&a, &SharedPtr::new(1)));
        assert_eq!(a, SharedPtr::new(1));
    }
}
