pub mod blob_store;
pub mod reaper;
pub mod relay_service;
