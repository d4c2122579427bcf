//! Password hashing with bcrypt.
//!
//! Each cost step doubles the work of a hash or a check, and both run on the
//! calling task.

use thiserror::Error;

/// The cost used unless configured otherwise.
pub const DEFAULT_COST: u32 = 10;

#[derive(Debug, Error)]
pub enum HashingError {
    #[error("password hashing failed: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),
}

/// Hashes and verifies passwords at a fixed bcrypt cost.
///
/// ```rust
/// use condor::hashing::Hashing;
///
/// let hashing = Hashing::new(4);
/// let hash = hashing.hash_password("hunter2").unwrap();
/// assert!(hashing.check_password_hash(&hash, "hunter2").unwrap());
/// assert!(!hashing.check_password_hash(&hash, "hunter3").unwrap());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hashing {
    cost: u32,
}

impl Default for Hashing {
    fn default() -> Self {
        Self::new(DEFAULT_COST)
    }
}

impl Hashing {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// A salted bcrypt hash of `password`, in the `$2b$` format.
    ///
    /// # Errors
    ///
    /// [`HashingError::Bcrypt`] when the cost is outside bcrypt's 4..=31 range.
    pub fn hash_password(&self, password: &str) -> Result<String, HashingError> {
        Ok(bcrypt::hash(password, self.cost)?)
    }

    /// Whether `password` matches `hashed`. A mismatch is `Ok(false)`.
    ///
    /// # Errors
    ///
    /// [`HashingError::Bcrypt`] when `hashed` is not a bcrypt hash.
    pub fn check_password_hash(&self, hashed: &str, password: &str) -> Result<bool, HashingError> {
        bcrypt::verify(password, hashed).map_err(|err| {
            tracing::debug!(error = %err, "failed checking password hash");
            HashingError::from(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_are_salted_and_verifiable() {
        let hashing = Hashing::new(4);
        let first = hashing.hash_password("s3cret").unwrap();
        let second = hashing.hash_password("s3cret").unwrap();

        assert_ne!(first, second);
        assert!(first.starts_with("$2b$04$"));
        assert!(hashing.check_password_hash(&first, "s3cret").unwrap());
        assert!(hashing.check_password_hash(&second, "s3cret").unwrap());
        assert!(!hashing.check_password_hash(&first, "S3cret").unwrap());
    }

    #[test]
    fn malformed_hash_is_an_error() {
        let hashing = Hashing::new(4);
        assert!(hashing.check_password_hash("not-a-hash", "s3cret").is_err());
    }

    #[test]
    fn cost_out_of_range_is_an_error() {
        assert!(Hashing::new(3).hash_password("s3cret").is_err());
        assert_eq!(Hashing::default().cost(), DEFAULT_COST);
    }
}
