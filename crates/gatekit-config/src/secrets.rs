//! Redacted secret wrapper.
//!
//! # Contract
//! - Every secret value flowing through `AppConfig` is wrapped in [`Secret`].
//! - `Debug` never prints the value. `Display` is not implemented at all —
//!   callers must use [`Secret::expose`] explicitly, which makes every use
//!   site grep-able.
//! - Error messages elsewhere in this crate reference the env var **NAME**,
//!   never the value.

#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: String) -> Self {
        Self(value)
    }

    /// Returns the raw value. Named loudly so call sites reading a secret
    /// are easy to find in review.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<REDACTED>")
    }
}
