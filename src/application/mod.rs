pub mod bootstrap;
pub mod commands;
pub mod lifecycle;
pub mod migration;
pub mod store_selector;
pub mod timer_service;
