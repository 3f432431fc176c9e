//! Secret wrapper for sensitive values

use std::fmt;
use zeroize::Zeroize;

/// Number of trailing characters revealed by [`Secret::masked`].
const MASK_VISIBLE_CHARS: usize = 6;

/// Sensitive value - redacted in Debug/Display/logs
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    /// Create a new secret value
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Masked form safe for logs and API responses: `...` plus the last six
    /// characters. Values of six characters or fewer are fully hidden.
    pub fn masked(&self) -> String {
        let count = self.0.chars().count();
        if count <= MASK_VISIBLE_CHARS {
            return "...".to_string();
        }
        let tail: String = self.0.chars().skip(count - MASK_VISIBLE_CHARS).collect();
        format!("...{tail}")
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
