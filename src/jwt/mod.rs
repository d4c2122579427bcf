//! HS256 JSON Web Tokens carrying an arbitrary JSON payload.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("failed to encode token: {0}")]
    Encode(#[source] jsonwebtoken::errors::Error),

    #[error("payload is not serializable: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("token has expired")]
    Expired,

    #[error("invalid token: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    data: Value,
    exp: u64,
}

/// Signs and verifies tokens with one shared secret.
///
/// ```
/// use std::time::Duration;
/// use condor::jwt::Jwt;
/// use serde_json::json;
///
/// let jwt = Jwt::new("s3cret", Duration::from_secs(600));
/// let token = jwt.encode(&json!({ "user_id": 7 })).unwrap();
/// assert_eq!(jwt.decode(&token).unwrap()["user_id"], 7);
/// assert!(!jwt.has_expired(&token).unwrap());
/// ```
pub struct Jwt {
    encoding: EncodingKey,
    decoding: DecodingKey,
    lifespan: Duration,
}

impl std::fmt::Debug for Jwt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jwt")
            .field("lifespan", &self.lifespan)
            .finish_non_exhaustive()
    }
}

impl Jwt {
    pub fn new(secret: impl AsRef<[u8]>, lifespan: Duration) -> Self {
        let secret = secret.as_ref();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            lifespan,
        }
    }

    pub fn lifespan(&self) -> Duration {
        self.lifespan
    }

    /// Signs `payload`, expiring one lifespan from now.
    pub fn encode<T: Serialize>(&self, payload: &T) -> Result<String, JwtError> {
        self.encode_with_expiry(payload, SystemTime::now() + self.lifespan)
    }

    pub fn encode_with_expiry<T: Serialize>(
        &self,
        payload: &T,
        expires_at: SystemTime,
    ) -> Result<String, JwtError> {
        let claims = Claims {
            data: serde_json::to_value(payload)?,
            exp: expires_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(JwtError::Encode)
    }

    /// Verifies `token` and returns its payload.
    ///
    /// # Errors
    ///
    /// [`JwtError::Expired`] for a correctly signed token past its expiry,
    /// [`JwtError::Invalid`] for anything else that fails verification.
    pub fn decode(&self, token: &str) -> Result<Value, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        match jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation) {
            Ok(data) => Ok(data.claims.data),
            Err(err) if matches!(err.kind(), ErrorKind::ExpiredSignature) => Err(JwtError::Expired),
            Err(err) => Err(JwtError::Invalid(err)),
        }
    }

    /// Whether a correctly signed `token` is past its expiry.
    ///
    /// # Errors
    ///
    /// [`JwtError::Invalid`] if the token cannot be verified at all.
    pub fn has_expired(&self, token: &str) -> Result<bool, JwtError> {
        match self.decode(token) {
            Ok(_) => Ok(false),
            Err(JwtError::Expired) => Ok(true),
            Err(err) => Err(err),
        }
    }
}
