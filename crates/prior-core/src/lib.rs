//! Configuration, the GitHub issue source, and application wiring for prior.

pub mod bootstrap;
pub mod config;
pub mod github;

pub use bootstrap::{App, AppBuilder};
pub use config::Config;
pub use github::GitHubIssueSource;
