// SPDX-License-Identifier: MPL-2.0

//! Intrusive doubly-linked lists.
//!
//! Each listed object embeds one [`ListNode`] per list family it can belong
//! to; an [`Adapter`] names which node a given list uses. Every node carries a
//! back-pointer to its containing list, so membership queries and removal are
//! O(1), as are all other operations.
//!
//! Lists come in two flavours sharing one representation:
//!
//! - the raw API (`*_raw`) links plain [`NonNull`] pointers and leaves
//!   ownership entirely to the caller (used e.g. for page-resident slab
//!   headers);
//! - the [`Arc`] API transfers one strong reference into the list on insert
//!   and hands it back on removal.
//!
//! The list itself is *not* thread-safe; callers wrap it in a lock. A list
//! must not be moved while it has entries, because the entries' back-pointers
//! would be left dangling.

#![no_std]

extern crate alloc;

use alloc::sync::Arc;
use core::marker::PhantomData;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, Ordering};

/// A node embedded in an object to make it listable.
///
/// The node records the neighbouring objects and the list that currently
/// contains it. The pointers are atomics only so that containing objects can
/// remain `Sync`; all accesses must still be externally synchronized.
#[derive(Debug)]
pub struct ListNode {
    next: AtomicPtr<()>,
    prev: AtomicPtr<()>,
    owner: AtomicPtr<()>,
}

impl ListNode {
    pub const fn new() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
            prev: AtomicPtr::new(ptr::null_mut()),
            owner: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Whether this node is currently on any list.
    pub fn is_linked(&self) -> bool {
        !self.owner.load(Ordering::Relaxed).is_null()
    }

    fn clear(&self) {
        self.next.store(ptr::null_mut(), Ordering::Relaxed);
        self.prev.store(ptr::null_mut(), Ordering::Relaxed);
        self.owner.store(ptr::null_mut(), Ordering::Relaxed);
    }
}

impl Default for ListNode {
    fn default() -> Self {
        Self::new()
    }
}

/// Names the [`ListNode`] within `Obj` that a list family threads through.
///
/// # Safety
///
/// `node` must always return the same node for the same object, and the node
/// must live exactly as long as the object.
pub unsafe trait Adapter {
    type Obj;

    fn node(obj: &Self::Obj) -> &ListNode;
}

/// Defines an [`Adapter`] type for a field of an object:
///
/// ```ignore
/// intrusive_adapter!(pub WaitAdapter = Thread { wait_node });
/// ```
#[macro_export]
macro_rules! intrusive_adapter {
    ($vis:vis $name:ident = $obj:ty { $field:ident }) => {
        $vis struct $name;

        unsafe impl $crate::Adapter for $name {
            type Obj = $obj;

            fn node(obj: &Self::Obj) -> &$crate::ListNode {
                &obj.$field
            }
        }
    };
}

/// An intrusive doubly-linked list with head, tail and length.
pub struct List<A: Adapter> {
    head: Option<NonNull<A::Obj>>,
    tail: Option<NonNull<A::Obj>>,
    len: usize,
    _adapter: PhantomData<A>,
}

// The list only holds pointers to objects; sending it along with its entries
// is fine whenever the entries themselves may be sent.
unsafe impl<A: Adapter> Send for List<A> where A::Obj: Send {}

impl<A: Adapter> List<A> {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
            _adapter: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn self_ptr(&self) -> *mut () {
        self as *const Self as *mut ()
    }

    /// Whether `obj` is currently linked on *this* list.
    pub fn contains(&self, obj: &A::Obj) -> bool {
        A::node(obj).owner.load(Ordering::Relaxed) == self.self_ptr()
    }

    fn set_linked(&self, obj: NonNull<A::Obj>, prev: Option<NonNull<A::Obj>>, next: Option<NonNull<A::Obj>>) {
        let node = unsafe { A::node(obj.as_ref()) };
        node.prev.store(opt_to_ptr(prev), Ordering::Relaxed);
        node.next.store(opt_to_ptr(next), Ordering::Relaxed);
        node.owner.store(self.self_ptr(), Ordering::Relaxed);
    }

    fn node_next(&self, obj: NonNull<A::Obj>) -> Option<NonNull<A::Obj>> {
        let node = unsafe { A::node(obj.as_ref()) };
        NonNull::new(node.next.load(Ordering::Relaxed) as *mut A::Obj)
    }

    fn node_prev(&self, obj: NonNull<A::Obj>) -> Option<NonNull<A::Obj>> {
        let node = unsafe { A::node(obj.as_ref()) };
        NonNull::new(node.prev.load(Ordering::Relaxed) as *mut A::Obj)
    }

    /// Links `obj` at the head of the list.
    ///
    /// # Safety
    ///
    /// `obj` must point to a live object that stays alive while linked, and
    /// must not currently be on any list.
    pub unsafe fn push_front_raw(&mut self, obj: NonNull<A::Obj>) {
        assert!(!A::node(obj.as_ref()).is_linked());
        let old_head = self.head;
        self.set_linked(obj, None, old_head);
        match old_head {
            Some(h) => A::node(h.as_ref()).prev.store(obj.as_ptr() as *mut (), Ordering::Relaxed),
            None => self.tail = Some(obj),
        }
        self.head = Some(obj);
        self.len += 1;
    }

    /// Links `obj` at the tail of the list.
    ///
    /// # Safety
    ///
    /// As for [`List::push_front_raw`].
    pub unsafe fn push_back_raw(&mut self, obj: NonNull<A::Obj>) {
        assert!(!A::node(obj.as_ref()).is_linked());
        let old_tail = self.tail;
        self.set_linked(obj, old_tail, None);
        match old_tail {
            Some(t) => A::node(t.as_ref()).next.store(obj.as_ptr() as *mut (), Ordering::Relaxed),
            None => self.head = Some(obj),
        }
        self.tail = Some(obj);
        self.len += 1;
    }

    /// Links `obj` immediately before `anchor`, which must be on this list.
    ///
    /// # Safety
    ///
    /// As for [`List::push_front_raw`]; additionally `anchor` must be linked
    /// on this list.
    pub unsafe fn insert_before_raw(&mut self, anchor: NonNull<A::Obj>, obj: NonNull<A::Obj>) {
        assert!(self.contains(anchor.as_ref()));
        assert!(!A::node(obj.as_ref()).is_linked());
        match self.node_prev(anchor) {
            None => self.push_front_raw(obj),
            Some(prev) => {
                self.set_linked(obj, Some(prev), Some(anchor));
                A::node(prev.as_ref()).next.store(obj.as_ptr() as *mut (), Ordering::Relaxed);
                A::node(anchor.as_ref()).prev.store(obj.as_ptr() as *mut (), Ordering::Relaxed);
                self.len += 1;
            }
        }
    }

    /// Links `obj` immediately after `anchor`, which must be on this list.
    ///
    /// # Safety
    ///
    /// As for [`List::insert_before_raw`].
    pub unsafe fn insert_after_raw(&mut self, anchor: NonNull<A::Obj>, obj: NonNull<A::Obj>) {
        assert!(self.contains(anchor.as_ref()));
        assert!(!A::node(obj.as_ref()).is_linked());
        match self.node_next(anchor) {
            None => self.push_back_raw(obj),
            Some(next) => {
                self.set_linked(obj, Some(anchor), Some(next));
                A::node(anchor.as_ref()).next.store(obj.as_ptr() as *mut (), Ordering::Relaxed);
                A::node(next.as_ref()).prev.store(obj.as_ptr() as *mut (), Ordering::Relaxed);
                self.len += 1;
            }
        }
    }

    /// Unlinks and returns the head, if any.
    ///
    /// # Safety
    ///
    /// The caller takes over whatever ownership was associated with the
    /// returned pointer when it was linked.
    pub unsafe fn pop_front_raw(&mut self) -> Option<NonNull<A::Obj>> {
        let head = self.head?;
        self.unlink_raw(head);
        Some(head)
    }

    /// Unlinks and returns the tail, if any.
    ///
    /// # Safety
    ///
    /// As for [`List::pop_front_raw`].
    pub unsafe fn pop_back_raw(&mut self) -> Option<NonNull<A::Obj>> {
        let tail = self.tail?;
        self.unlink_raw(tail);
        Some(tail)
    }

    /// Unlinks `obj` from this list. Panics if it is linked elsewhere.
    ///
    /// # Safety
    ///
    /// `obj` must point to a live object.
    pub unsafe fn unlink_raw(&mut self, obj: NonNull<A::Obj>) {
        assert!(self.contains(obj.as_ref()));
        let prev = self.node_prev(obj);
        let next = self.node_next(obj);
        match prev {
            Some(p) => A::node(p.as_ref()).next.store(opt_to_ptr(next), Ordering::Relaxed),
            None => self.head = next,
        }
        match next {
            Some(n) => A::node(n.as_ref()).prev.store(opt_to_ptr(prev), Ordering::Relaxed),
            None => self.tail = prev,
        }
        A::node(obj.as_ref()).clear();
        self.len -= 1;
    }

    /// The validity predicate: head/tail agree with emptiness, neighbour
    /// links are mutually consistent, every node points back at this list,
    /// and the walked length matches the stored length.
    pub fn is_consistent(&self) -> bool {
        match (self.head, self.tail) {
            (None, None) => return self.len == 0,
            (Some(_), Some(_)) => (),
            _ => return false,
        }

        let mut count = 0usize;
        let mut prev: Option<NonNull<A::Obj>> = None;
        let mut cur = self.head;
        while let Some(obj) = cur {
            let node = unsafe { A::node(obj.as_ref()) };
            if node.owner.load(Ordering::Relaxed) != self.self_ptr() {
                return false;
            }
            if self.node_prev(obj) != prev {
                return false;
            }
            count += 1;
            if count > self.len {
                return false;
            }
            prev = cur;
            cur = self.node_next(obj);
        }
        prev == self.tail && count == self.len
    }

    pub fn iter(&self) -> Iter<'_, A> {
        Iter {
            next: self.head,
            _list: PhantomData,
        }
    }
}

/// `Arc`-owning operations: inserting transfers one strong reference into the
/// list; removal hands it back.
impl<A: Adapter> List<A> {
    pub fn push_front(&mut self, obj: Arc<A::Obj>) {
        let ptr = NonNull::new(Arc::into_raw(obj) as *mut A::Obj).unwrap();
        unsafe { self.push_front_raw(ptr) }
    }

    pub fn push_back(&mut self, obj: Arc<A::Obj>) {
        let ptr = NonNull::new(Arc::into_raw(obj) as *mut A::Obj).unwrap();
        unsafe { self.push_back_raw(ptr) }
    }

    pub fn pop_front(&mut self) -> Option<Arc<A::Obj>> {
        unsafe { self.pop_front_raw().map(|p| Arc::from_raw(p.as_ptr())) }
    }

    pub fn pop_back(&mut self) -> Option<Arc<A::Obj>> {
        unsafe { self.pop_back_raw().map(|p| Arc::from_raw(p.as_ptr())) }
    }

    /// Unlinks `obj` if it is on this list, returning the reference the list
    /// held.
    pub fn remove(&mut self, obj: &A::Obj) -> Option<Arc<A::Obj>> {
        if !self.contains(obj) {
            return None;
        }
        let ptr = NonNull::from(obj);
        unsafe {
            self.unlink_raw(ptr);
            Some(Arc::from_raw(ptr.as_ptr()))
        }
    }
}

impl<A: Adapter> Default for List<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Adapter> Drop for List<A> {
    fn drop(&mut self) {
        // Entries cannot be freed generically (raw entries are not owned
        // here); dropping a non-empty list is a caller bug.
        debug_assert!(self.is_empty(), "intrusive list dropped while non-empty");
    }
}

pub struct Iter<'a, A: Adapter> {
    next: Option<NonNull<A::Obj>>,
    _list: PhantomData<&'a List<A>>,
}

impl<'a, A: Adapter> Iterator for Iter<'a, A> {
    type Item = &'a A::Obj;

    fn next(&mut self) -> Option<Self::Item> {
        let obj = self.next?;
        let obj_ref: &'a A::Obj = unsafe { &*obj.as_ptr() };
        self.next = NonNull::new(A::node(obj_ref).next.load(Ordering::Relaxed) as *mut A::Obj);
        Some(obj_ref)
    }
}

fn opt_to_ptr<T>(p: Option<NonNull<T>>) -> *mut () {
    match p {
        Some(nn) => nn.as_ptr() as *mut (),
        None => ptr::null_mut(),
    }
}
