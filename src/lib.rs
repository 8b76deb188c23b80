pub mod config;
pub mod error;
pub mod event;
pub mod gantt;
pub mod launcher;
pub mod node;
pub mod platform;
pub mod request;
pub mod resource;
pub mod scheduler;
pub mod shutdown;
pub mod sim;
