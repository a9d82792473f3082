pub mod cache;
pub mod cascade;
pub mod fetch;
pub mod links;
pub mod pagination;
pub mod source;
pub mod storage;
