#![cfg_attr(not(test), no_std)]

use core::{
  marker::PhantomData,
  ptr::NonNull,
  sync::atomic::{
    AtomicPtr,
    Ordering,
  },
};

pub trait HasLink {
  fn link(&self) -> &Link<Self>
  where
    Self: Sized;
  fn link_mut(&mut self) -> &mut Link<Self>
  where
    Self: Sized;
}

#[derive(Debug)]
pub struct Link<T>
where
  T: HasLink,
{
  next: AtomicPtr<T>,
  prev: AtomicPtr<T>,
}

impl<T> Link<T>
where
  T: HasLink,
{
  pub fn next(&self) -> Option<NonNull<T>> {
    NonNull::new(self.next.load(Ordering::Acquire))
  }

  pub fn prev(&self) -> Option<NonNull<T>> {
    NonNull::new(self.prev.load(Ordering::Acquire))
  }

  pub fn set_next(&self, ptr: Option<NonNull<T>>) {
    let raw = ptr.map_or(core::ptr::null_mut(), |p| p.as_ptr());
    self.next.store(raw, Ordering::Release);
  }

  pub fn set_prev(&self, ptr: Option<NonNull<T>>) {
    let raw = ptr.map_or(core::ptr::null_mut(), |p| p.as_ptr());
    self.prev.store(raw, Ordering::Release);
  }

  pub fn is_linked(&self) -> bool {
    self.next().is_some() || self.prev().is_some()
  }
}

impl<T> Default for Link<T>
where
  T: HasLink,
{
  fn default() -> Self {
    Self {
      next: AtomicPtr::new(core::ptr::null_mut()),
      prev: AtomicPtr::new(core::ptr::null_mut()),
    }
  }
}

pub struct List {}

impl List {
  fn to_non_null<T>(item: &mut T) -> NonNull<T>
  where
    T: HasLink,
  {
    NonNull::from(&mut *item)
  }

  pub fn insert_before<T>(item: &mut T, at: &mut T)
  where
    T: HasLink,
  {
    let at_ptr = Self::to_non_null(at);
    let item_ptr = Self::to_non_null(item);

    let item_link = item.link();
    let at_link = at.link();

    item_link.set_next(Some(at_ptr));

    let prev_ptr = at_link.prev();
    item_link.set_prev(prev_ptr);

    if let Some(prev) = prev_ptr {
      unsafe { prev.as_ref().link().set_next(Some(item_ptr)) };
    }

    at_link.set_prev(Some(item_ptr));
  }

  pub fn insert_after<T>(item: &mut T, at: &mut T)
  where
    T: HasLink,
  {
    let at_ptr = Self::to_non_null(at);
    let item_ptr = Self::to_non_null(item);

    let item_link = item.link();
    let at_link = at.link();

    item_link.set_prev(Some(at_ptr));

    let next_ptr = at_link.next();
    item_link.set_next(next_ptr);

    if let Some(next) = next_ptr {
      unsafe { next.as_ref().link().set_prev(Some(item_ptr)) };
    }

    at_link.set_next(Some(item_ptr));
  }

  pub fn remove<T>(item: &mut T)
  where
    T: HasLink,
  {
    let item_link = item.link();

    let prev_ptr = item_link.prev();
    let next_ptr = item_link.next();

    if let Some(prev) = prev_ptr {
      unsafe { prev.as_ref().link().set_next(next_ptr) };
    }

    if let Some(next) = next_ptr {
      unsafe { next.as_ref().link().set_prev(prev_ptr) };
    }

    item_link.set_next(None);
    item_link.set_prev(None);
  }
}

pub struct ListIter<'list, T>
where
  T: HasLink + 'list,
{
  next: Option<NonNull<T>>,
  marker: PhantomData<&'list T>,
}

impl<'list, T> ListIter<'list, T>
where
  T: HasLink + 'list,
{
  pub fn new(start: Option<NonNull<T>>) -> Self {
    Self {
      next: start,
      marker: PhantomData,
    }
  }
}

impl<'list, T> Iterator for ListIter<'list, T>
where
  T: HasLink + 'list,
{
  type Item = &'list mut T;

  fn next(&mut self) -> Option<Self::Item> {
    let current = self.next.take()?;
    let current_ref = unsafe { current.as_ref() };
    self.next = current_ref.link().next();
    Some(unsafe { &mut *(current.as_ptr()) })
  }
}


pub mod prelude {
  pub use super::{
    HasLink,
    Link,
    List,
    ListIter,
  };
}
