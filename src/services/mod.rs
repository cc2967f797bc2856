//! Storage adapters and the trash lifecycle built on top of them.

pub mod clock;
pub mod key_codec;
pub mod lifecycle;
pub mod local_store;
pub mod memory_store;
pub mod object_store;
pub mod retention;
pub mod sweeper;
