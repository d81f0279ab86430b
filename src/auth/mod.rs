//! Password scrambles for MySQL authentication plugins.
//!
//! Supported plugins:
//!
//! - **mysql_native_password**: SHA1 challenge-response. The default on MySQL 5.x
//!   and still available on 8.x.
//! - **caching_sha2_password**: SHA256 challenge-response (fast path only).
//!   The server answers with "fast auth success" once the password hash is in
//!   its cache. Full authentication requires TLS or RSA key exchange and is
//!   rejected with an authentication error.
//!
//! # Example
//!
//! ```ignore
//! use mysqlwire_replication::auth::AuthPlugin;
//!
//! let plugin = AuthPlugin::from_name("mysql_native_password")?;
//! let response = plugin.scramble("secret", &greeting.auth_data());
//! ```

pub mod native;

pub use native::{AuthPlugin, caching_sha2_scramble, native_password_scramble};
