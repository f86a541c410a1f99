use slabcache_sys::prim::{
  likely,
  unlikely,
};

pub const NUM_SMALL: usize = 16;
pub const NUM_MEDIUM: usize = 8;
pub const NUM_CLASSES: usize = NUM_SMALL + NUM_MEDIUM;

/// Smallest block: holds a pointer and satisfies SIMD alignment.
pub const MIN_BLOCK: usize = 16;
/// Largest linearly spaced class.
pub const MAX_SMALL: usize = 256;
/// Largest slab-served size; anything above takes the direct-mapping path.
pub const MAX_BLOCK: usize = 65536;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClassIndex(pub usize);

// 16, 32, .., 256 then 512, 1024, .., 65536.
const SIZES: [usize; NUM_CLASSES] = generate_sizes();

const fn generate_sizes() -> [usize; NUM_CLASSES] {
  let mut sizes = [0usize; NUM_CLASSES];

  let mut idx = 0;
  while idx < NUM_SMALL {
    sizes[idx] = (idx + 1) * MIN_BLOCK;
    idx += 1;
  }

  let mut power = MAX_SMALL * 2;
  while idx < NUM_CLASSES {
    sizes[idx] = power;
    power *= 2;
    idx += 1;
  }

  sizes
}

#[inline(always)]
pub const fn is_large(size: usize) -> bool {
  size > MAX_BLOCK
}

/// Class for a request, `None` when the request bypasses the slab path.
/// Size 0 is a valid minimum-class request.
#[inline(always)]
pub fn class_for(size: usize) -> Option<ClassIndex> {
  if unlikely(is_large(size)) {
    return None;
  }

  if likely(size <= MAX_SMALL) {
    if unlikely(size == 0) {
      return Some(ClassIndex(0));
    }
    let aligned = (size + MIN_BLOCK - 1) & !(MIN_BLOCK - 1);
    return Some(ClassIndex(aligned / MIN_BLOCK - 1));
  }

  let rounded = size.next_power_of_two();
  Some(ClassIndex(
    NUM_SMALL + rounded.trailing_zeros() as usize - 9,
  ))
}

#[inline(always)]
pub const fn block_size_of(class: ClassIndex) -> usize {
  SIZES[class.0]
}

pub const fn sizes() -> &'static [usize; NUM_CLASSES] {
  &SIZES
}
