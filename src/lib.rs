pub mod chat;
pub mod config;
pub mod conversations;
pub mod core;
pub mod i18n;
pub mod logging;
pub mod server;
pub mod transport;
pub mod update;
