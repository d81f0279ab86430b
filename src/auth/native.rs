use sha1::{Digest, Sha1};
use sha2::Sha256;

use crate::error::{ReplicationError, Result};

pub const NATIVE_PASSWORD: &str = "mysql_native_password";
pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";

/// Authentication plugin negotiated in the greeting or an auth-switch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPlugin {
    NativePassword,
    CachingSha2Password,
}

impl AuthPlugin {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            NATIVE_PASSWORD => Ok(AuthPlugin::NativePassword),
            CACHING_SHA2_PASSWORD => Ok(AuthPlugin::CachingSha2Password),
            other => Err(ReplicationError::Auth(format!(
                "unsupported authentication plugin: {other}"
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AuthPlugin::NativePassword => NATIVE_PASSWORD,
            AuthPlugin::CachingSha2Password => CACHING_SHA2_PASSWORD,
        }
    }

    /// Credential response for `password` against the server's `salt`.
    /// An empty password yields an empty response.
    pub fn scramble(self, password: &str, salt: &[u8]) -> Vec<u8> {
        match self {
            AuthPlugin::NativePassword => native_password_scramble(password, salt),
            AuthPlugin::CachingSha2Password => caching_sha2_scramble(password, salt),
        }
    }
}

/// `SHA1(password) XOR SHA1(salt + SHA1(SHA1(password)))`
pub fn native_password_scramble(password: &str, salt: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let stage1 = Sha1::digest(password.as_bytes());
    let stage2 = Sha1::digest(stage1);

    let mut hasher = Sha1::new();
    hasher.update(salt);
    hasher.update(stage2);
    let stage3 = hasher.finalize();

    stage1.iter().zip(stage3.iter()).map(|(a, b)| a ^ b).collect()
}

/// `SHA256(password) XOR SHA256(SHA256(SHA256(password)) + salt)`
pub fn caching_sha2_scramble(password: &str, salt: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let hash1 = Sha256::digest(password.as_bytes());
    let hash2 = Sha256::digest(hash1);

    let mut hasher = Sha256::new();
    hasher.update(hash2);
    hasher.update(salt);
    let hash3 = hasher.finalize();

    hash1.iter().zip(hash3.iter()).map(|(a, b)| a ^ b).collect()
}
