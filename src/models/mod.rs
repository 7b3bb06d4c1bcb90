pub mod actor;
pub mod api;
pub mod audit;
pub mod job;
pub mod rider;
