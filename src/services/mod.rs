pub mod chunk_store;
pub mod fsutil;
pub mod lookup_cache;
pub mod merge_engine;
pub mod object_store;
pub mod share_registry;
pub mod sweeper;
