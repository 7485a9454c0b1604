pub mod build_info;
pub mod cli;
pub mod commands;
pub mod config;
pub mod http_client;
pub mod landing_zone;
pub mod logging;
pub mod pipeline;
pub mod server;
pub mod sources;
pub mod state;
pub mod warehouse;

#[cfg(test)]
pub(crate) mod test_support;
