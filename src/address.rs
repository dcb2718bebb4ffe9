//! `Address` and `ObjectReference`: thin, zero-cost newtypes around raw pointers.
//!
//! Grounded in `mmtk::util::address`: addresses are modelled as a `usize` wrapper with
//! checked-in-debug arithmetic, rather than as raw `*mut u8`, so that alignment and
//! "is this inside the heap" invariants can be asserted close to where they are violated.

use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use crate::header::ObjectHeader;

/// An arbitrary address, heap-resident or not. Not guaranteed to be valid; conservative
/// scanning produces `Address`es for words that may or may not be pointers at all.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Address(usize);

impl Address {
    pub const ZERO: Address = Address(0);

    #[inline(always)]
    pub const fn from_usize(v: usize) -> Self {
        Address(v)
    }

    #[inline(always)]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    #[inline(always)]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Address(ptr as usize)
    }

    #[inline(always)]
    pub fn from_mut_ptr<T>(ptr: *mut T) -> Self {
        Address(ptr as usize)
    }

    #[inline(always)]
    pub fn to_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    #[inline(always)]
    pub fn to_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    #[inline(always)]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[inline(always)]
    pub const fn align_down(self, align: usize) -> Self {
        Address(self.0 & !(align - 1))
    }

    #[inline(always)]
    pub const fn align_up(self, align: usize) -> Self {
        Address((self.0 + align - 1) & !(align - 1))
    }

    #[inline(always)]
    pub const fn is_aligned_to(self, align: usize) -> bool {
        self.0 & (align - 1) == 0
    }

    /// Read a `usize` at this address. The caller must ensure the address is valid and
    /// sufficiently aligned; this is conservative scanning, so the value read back may be
    /// garbage, but reading it must not fault.
    ///
    /// # Safety
    /// `self` must point at readable memory of at least `size_of::<usize>()` bytes.
    #[inline(always)]
    pub unsafe fn load_usize(self) -> usize {
        *(self.0 as *const usize)
    }

    /// # Safety
    /// `self` must point at writable memory of at least `size_of::<usize>()` bytes.
    #[inline(always)]
    pub unsafe fn store_usize(self, value: usize) {
        *(self.0 as *mut usize) = value;
    }

    /// Reinterpret this address as the start of an object's header.
    ///
    /// # Safety
    /// `self` must actually be the address of a live, fully-initialised [`ObjectHeader`].
    #[inline(always)]
    pub unsafe fn to_object_reference(self) -> ObjectReference {
        ObjectReference::from_address(self)
    }
}

impl Add<usize> for Address {
    type Output = Address;
    #[inline(always)]
    fn add(self, rhs: usize) -> Address {
        Address(self.0 + rhs)
    }
}

impl AddAssign<usize> for Address {
    #[inline(always)]
    fn add_assign(&mut self, rhs: usize) {
        self.0 += rhs;
    }
}

impl Sub<usize> for Address {
    type Output = Address;
    #[inline(always)]
    fn sub(self, rhs: usize) -> Address {
        Address(self.0 - rhs)
    }
}

impl SubAssign<usize> for Address {
    #[inline(always)]
    fn sub_assign(&mut self, rhs: usize) {
        self.0 -= rhs;
    }
}

/// Address - Address: byte distance, first address must not be lower than the second.
impl Sub<Address> for Address {
    type Output = usize;
    #[inline(always)]
    fn sub(self, rhs: Address) -> usize {
        debug_assert!(self.0 >= rhs.0, "{self} - {rhs}: left operand is lower");
        self.0 - rhs.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A reference to a live, GC-managed object: the address of its [`ObjectHeader`].
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ObjectReference(Address);

impl ObjectReference {
    #[inline(always)]
    pub fn from_address(address: Address) -> Self {
        ObjectReference(address)
    }

    #[inline(always)]
    pub const fn to_address(self) -> Address {
        self.0
    }

    #[inline(always)]
    pub fn header(self) -> *mut ObjectHeader {
        self.0.to_mut_ptr::<ObjectHeader>()
    }

    #[inline(always)]
    pub fn payload_start(self) -> Address {
        self.0 + std::mem::size_of::<ObjectHeader>()
    }
}

impl fmt::Debug for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectReference({:?})", self.0)
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
