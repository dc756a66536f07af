pub mod cli_tool;
pub mod cluster;
pub mod config;
pub mod create;
pub mod engine;
pub mod error;
pub mod extension;
pub mod host;
pub mod image;
pub mod installer;
pub mod locator;
pub mod minikube;
pub mod platform;
pub mod process;
pub mod reconciler;
pub mod release;

#[cfg(test)]
pub(crate) mod mock;
