//! Configuration for a selsync run.
//!
//! Everything a component needs is carried by [`SelsyncConfig`] and handed to
//! constructors explicitly. Secrets are referenced by environment variable
//! name and resolved once by the application context.

pub mod parser;
pub mod schema;
pub mod store;

pub use parser::{parse_selsync_toml, parse_selsync_toml_str};
pub use schema::{
    DemoSection, DetectorSection, PushMode, RegistrySection, RepositorySection, ResourceConfig,
    RetrySection, SelsyncConfig, StatusSection,
};
pub use store::ConfigStore;
