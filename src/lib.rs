pub mod chain;
pub mod indexer;
pub mod sqlite_pragma;
