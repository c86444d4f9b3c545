pub mod config;
pub mod credential_store;
pub mod error;
pub mod kv_store;
pub mod local_store;
pub mod logging;
pub mod notification;
pub mod record_store;
pub mod remote_store;
pub mod storage;
