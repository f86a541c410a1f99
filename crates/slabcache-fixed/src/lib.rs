#![cfg_attr(not(test), no_std)]

use core::{
  alloc::Layout,
  cmp,
  mem::ManuallyDrop,
  ptr::{
    NonNull,
    drop_in_place,
  },
};

use slabcache_list::{
  HasLink,
  Link,
  List,
};
use slabcache_sys::{
  extent::{
    Extent,
    ExtentError,
  },
  math::align_up,
};

#[derive(Debug)]
pub enum BumpError {
  ExtentError(ExtentError),
  Exhausted,
  Overflow,
}

impl From<ExtentError> for BumpError {
  fn from(err: ExtentError) -> Self {
    BumpError::ExtentError(err)
  }
}

pub type BumpResult<T> = Result<T, BumpError>;

/// One mapped region. The `Region` header sits at the base of its own
/// extent; the bump cursor hands out the bytes behind it.
pub struct Region {
  link: ManuallyDrop<Link<Self>>,
  extent: ManuallyDrop<Extent>,
  cursor: usize,
}

impl Region {
  pub fn new(size: usize) -> BumpResult<NonNull<Self>> {
    let mut extent = Extent::new(size)?;
    let base = extent.as_mut().as_mut_ptr() as *mut Self;

    let header = Self {
      link: ManuallyDrop::new(Link::default()),
      extent: ManuallyDrop::new(extent),
      cursor: core::mem::size_of::<Self>(),
    };
    unsafe { base.write(header) };

    Ok(unsafe { NonNull::new_unchecked(base) })
  }

  pub fn allocate(&mut self, layout: Layout) -> BumpResult<NonNull<u8>> {
    let base = self.extent.as_ref().as_ptr() as usize;
    let start = align_up(base + self.cursor, layout.align()).ok_or(BumpError::Overflow)?;
    let end = start.checked_add(layout.size()).ok_or(BumpError::Overflow)?;

    if end > base + self.extent.len() {
      return Err(BumpError::Exhausted);
    }

    self.cursor = end - base;
    Ok(unsafe { NonNull::new_unchecked(start as *mut u8) })
  }
}

impl HasLink for Region {
  fn link(&self) -> &Link<Self> {
    &self.link
  }

  fn link_mut(&mut self) -> &mut Link<Self> {
    &mut self.link
  }
}

impl Drop for Region {
  fn drop(&mut self) {
    unsafe {
      ManuallyDrop::drop(&mut self.link);

      // The header lives inside this mapping, so it goes away last.
      ManuallyDrop::drop(&mut self.extent);
    }
  }
}

/// Chained bump allocator for allocator metadata (arena, slab headers,
/// bitmap words, list nodes). Never frees individual objects; everything is
/// released when the `Bump` drops.
pub struct Bump {
  head: Option<NonNull<Region>>,
  tail: Option<NonNull<Region>>,
  region_size: usize,
}

unsafe impl Send for Bump {}

impl Bump {
  pub const fn new(region_size: usize) -> Self {
    Self {
      head: None,
      tail: None,
      region_size,
    }
  }

  fn obtain_region(&self, layout: Layout) -> BumpResult<NonNull<Region>> {
    let header = core::mem::size_of::<Region>();
    let required = header
      .checked_add(layout.size())
      .and_then(|sum| sum.checked_add(layout.align()))
      .ok_or(BumpError::Overflow)?;
    Region::new(cmp::max(self.region_size, required))
  }

  pub fn allocate(&mut self, layout: Layout) -> BumpResult<NonNull<u8>> {
    if let Some(mut tail) = self.tail {
      if let Ok(ptr) = unsafe { tail.as_mut() }.allocate(layout) {
        return Ok(ptr);
      }
    }

    let mut region = self.obtain_region(layout)?;

    if let Some(mut tail) = self.tail {
      unsafe { List::insert_after(region.as_mut(), tail.as_mut()) };
    } else {
      self.head = Some(region);
    }
    self.tail = Some(region);

    unsafe { region.as_mut() }.allocate(layout)
  }

  /// Zeroed storage for one `T`. The caller writes the real value.
  pub fn create<T>(&mut self) -> BumpResult<NonNull<T>> {
    let ptr = self.allocate(Layout::new::<T>())?.cast::<T>();
    unsafe { core::ptr::write_bytes(ptr.as_ptr(), 0, 1) };
    Ok(ptr)
  }

  /// Zeroed storage for `[T; len]`.
  pub fn create_array<T>(&mut self, len: usize) -> BumpResult<NonNull<T>> {
    let layout = Layout::array::<T>(len).map_err(|_| BumpError::Overflow)?;
    let ptr = self.allocate(layout)?.cast::<T>();
    unsafe { core::ptr::write_bytes(ptr.as_ptr(), 0, len) };
    Ok(ptr)
  }
}

impl Drop for Bump {
  fn drop(&mut self) {
    let mut current = self.head;

    while let Some(ptr) = current {
      let region = unsafe { &mut *ptr.as_ptr() };
      // Read the next pointer before the region unmaps itself.
      current = region.link().next();
      unsafe { drop_in_place(region) };
    }
  }
}
