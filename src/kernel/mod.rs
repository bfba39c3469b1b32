pub mod dispatcher;
pub mod entity;
pub mod error;
pub mod event;
pub mod inventory;
pub mod reactor;
pub mod reducer;
pub mod retry;
pub mod telemetry;
pub mod time;
