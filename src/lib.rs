#![no_std]
//! # ctlptr: shared and weak ownership through control blocks
//!
//! ctlptr provides [`SharedPtr<T>`] and [`WeakPtr<T>`], a pair of
//! single-threaded reference-counted handles built around a separate control
//! block, in the spirit of C++'s `shared_ptr`/`weak_ptr`. Compared to
//! `std::rc::Rc` it adds the pieces that only make sense when ownership is
//! described by a control block:
//!
//! - Adopting a payload from a raw pointer with a custom [`Deleter`] and a
//!   custom [`Allocator`] for the block itself.
//! - Empty handles, [`reset`](SharedPtr::reset) and
//!   [`use_count`](SharedPtr::use_count) that reads `0` on an empty handle.
//! - Aliasing projections: a `SharedPtr<U>` for any `U` reachable from a
//!   `SharedPtr<T>`, sharing the original block. This is how a handle to a
//!   concrete type becomes a handle to a `dyn Trait` view of it.
//! - Single-allocation construction through [`make_shared`] and
//!   [`allocate_shared`], where block and payload live side by side.
//!
//! ## Lifecycle
//!
//! Every ownership group has exactly one control block, born with one strong
//! and zero weak references. When the strong count drops to zero the payload
//! is destroyed, through the deleter or in place. The block's own memory is
//! returned to its allocator only once both counts are zero, whichever
//! reaches zero last.
//!
//! ```
//! use ctlptr::{make_shared, WeakPtr};
//!
//! let a = make_shared(42);
//! let w = WeakPtr::from(&a);
//! assert_eq!(*w.lock(), 42);
//! drop(a);
//! assert!(w.expired());
//! assert!(w.lock().is_empty());
//! ```
//!
//! ## Threading
//!
//! Counters are plain cells; handles are neither `Send` nor `Sync`.
//!
//! ### Features
//!
//! The counters use half the word size on 64-bit systems. With
//! the default `usize-for-small-platforms` feature other platforms use
//! `usize` counters; disable default features to get 16-bit counters on
//! 32-bit platforms and 8-bit counters on 16-bit platforms. Overflowing a
//! counter panics.

#![warn(missing_docs, missing_debug_implementations)]
extern crate alloc;

#[cfg(target_pointer_width = "64")]
pub(crate) use u32 as ucount;

#[cfg(all(
    not(target_pointer_width = "64"),
    feature = "usize-for-small-platforms"
))]
pub(crate) use usize as ucount;

#[cfg(all(
    target_pointer_width = "32",
    not(feature = "usize-for-small-platforms")
))]
pub(crate) use u16 as ucount;

#[cfg(all(
    target_pointer_width = "16",
    not(feature = "usize-for-small-platforms")
))]
pub(crate) use u8 as ucount;

#[cfg(all(target_pointer_width = "8", not(feature = "usize-for-small-platforms")))]
pub(crate) use usize as ucount;

mod allocator;
mod block;
mod make;
mod shared;
mod weak;

pub use allocator::{AllocError, Allocator, Global};
pub use block::{DefaultDelete, Deleter};
pub use make::*;
pub use shared::SharedPtr;
pub use weak::WeakPtr;
