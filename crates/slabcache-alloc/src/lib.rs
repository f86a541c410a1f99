#![cfg_attr(not(test), no_std)]

pub mod arena;
pub mod bin;
pub mod classes;
pub mod large;
pub mod slab;
pub mod stack;
pub mod static_;

pub use slabcache_sys::chunk::{
  CHUNK_MASK,
  CHUNK_SHIFT,
  CHUNK_SIZE,
};

// Tests share the process-wide chunk stack. Tests that assert its exact
// state take the write side; tests that merely circulate chunks take read.
#[cfg(test)]
pub(crate) static TEST_LOCK: std::sync::RwLock<()> = std::sync::RwLock::new(());

pub mod prelude {
  pub use super::{
    CHUNK_SIZE,
    arena::{
      Arena,
      ArenaError,
    },
    classes::{
      ClassIndex,
      NUM_CLASSES,
      block_size_of,
      class_for,
      is_large,
    },
    stack::ChunkStack,
    static_::{
      acquire_this_arena,
      chunk_stack,
    },
  };
}
