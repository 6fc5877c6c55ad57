pub mod client;
pub mod error;
pub mod index;
pub mod owners;
pub mod registry;
pub mod watch;
