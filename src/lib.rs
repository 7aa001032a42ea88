pub mod access;
pub mod adaptor;
pub mod app;
pub mod billing;
pub mod config;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod pricing;
pub mod relay_mode;
pub mod upstream;
pub mod urp;
