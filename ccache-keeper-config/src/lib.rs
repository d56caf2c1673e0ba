//! Configuration for ccache-keeper.
//!
//! The keeper reads a small TOML file with two sections, `[system]` and
//! `[kerberos]`. Components that resolve file locations don't depend on the
//! typed structs directly: they look values up by key through [`Variables`],
//! so tests can feed them a plain map.

pub mod core;
pub mod error;
pub mod kerberos;
pub mod system;
pub mod variables;

pub use self::core::Config;
pub use error::Error;
pub use kerberos::Kerberos;
pub use system::{RunMode, System};
pub use variables::{keys, Variables};
