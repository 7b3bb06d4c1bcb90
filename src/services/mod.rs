pub mod analyzer;
pub mod csrf;
pub mod enqueue;
pub mod integrity;
pub mod poller;
pub mod promotion;
pub mod queue;
pub mod redirect;
pub mod retry;
pub mod seal;
pub mod storage;
pub mod tracker;
