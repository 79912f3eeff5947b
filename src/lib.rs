pub mod command;
pub mod config;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod slots;
pub mod waitlist;
