//! Authentication helpers.
//!
//! Browser logins live in the session under [`USER_ID_KEY`]; API clients carry
//! the same id in a signed bearer token. [`Auth`] is obtained per request from
//! [`Context::auth`](crate::context::Context::auth).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::Context;
use crate::jwt::JwtError;
use crate::services::ServiceError;
use crate::sessions::SessionError;

/// Session key holding the logged-in user's id.
pub const USER_ID_KEY: &str = "userId";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Jwt(#[from] JwtError),

    #[error("no user is logged in")]
    NotLoggedIn,

    #[error("user {requested} is not the logged-in user")]
    UserMismatch { requested: u64 },

    #[error("missing or malformed bearer token")]
    MissingToken,
}

#[derive(Serialize, Deserialize)]
struct TokenPayload {
    #[serde(rename = "userId")]
    user_id: u64,
}

/// Login state for one request.
pub struct Auth<'a> {
    ctx: &'a mut Context,
}

impl<'a> Auth<'a> {
    pub(crate) fn new(ctx: &'a mut Context) -> Self {
        Self { ctx }
    }

    /// Records `user_id` as logged in for this client.
    pub async fn login(&mut self, user_id: u64) -> Result<(), AuthError> {
        self.ctx.session().await?.set(USER_ID_KEY, user_id)?;
        tracing::info!(user_id, "user logged in");
        Ok(())
    }

    /// The id of the logged-in user, if any.
    pub async fn user_id(&mut self) -> Result<Option<u64>, AuthError> {
        Ok(self.ctx.session().await?.get_as::<u64>(USER_ID_KEY)?)
    }

    /// Whether `user_id` is the logged-in user.
    pub async fn check(&mut self, user_id: u64) -> Result<bool, AuthError> {
        Ok(self.user_id().await? == Some(user_id))
    }

    /// Logs `user_id` out.
    ///
    /// # Errors
    ///
    /// [`AuthError::NotLoggedIn`] when nobody is, and
    /// [`AuthError::UserMismatch`] when someone else is.
    pub async fn logout(&mut self, user_id: u64) -> Result<(), AuthError> {
        match self.user_id().await? {
            None => Err(AuthError::NotLoggedIn),
            Some(current) if current != user_id => Err(AuthError::UserMismatch {
                requested: user_id,
            }),
            Some(_) => {
                self.ctx.session().await?.delete(USER_ID_KEY);
                tracing::info!(user_id, "user logged out");
                Ok(())
            }
        }
    }

    /// A signed token carrying `user_id`, valid for the configured JWT lifespan.
    pub fn issue_token(&self, user_id: u64) -> Result<String, AuthError> {
        Ok(self.ctx.jwt()?.encode(&TokenPayload { user_id })?)
    }

    /// The user id carried by the request's `Authorization: Bearer` token.
    ///
    /// # Errors
    ///
    /// [`AuthError::MissingToken`] without a usable bearer token, and
    /// [`AuthError::Jwt`] when the token fails verification or has expired.
    pub fn bearer_user(&self) -> Result<u64, AuthError> {
        let token = self
            .ctx
            .request()
            .header("authorization")
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::MissingToken)?;
        let payload = self.ctx.jwt()?.decode(token)?;
        serde_json::from_value::<TokenPayload>(payload)
            .map(|payload| payload.user_id)
            .map_err(|_| AuthError::MissingToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::context::testing::context_with;
    use crate::services::Services;

    fn context(raw: &str, config: Config) -> Context {
        context_with(raw.as_bytes(), Services::new(config))
    }

    #[tokio::test]
    async fn login_check_logout() {
        let mut ctx = context("GET / HTTP/1.1\r\n\r\n", Config::default().with_sessions(true));
        let mut auth = ctx.auth();

        assert!(!auth.check(7).await.unwrap());
        assert!(matches!(auth.logout(7).await, Err(AuthError::NotLoggedIn)));

        auth.login(7).await.unwrap();
        assert!(auth.check(7).await.unwrap());
        assert!(!auth.check(8).await.unwrap());
        assert!(matches!(
            auth.logout(8).await,
            Err(AuthError::UserMismatch { requested: 8 })
        ));

        auth.logout(7).await.unwrap();
        assert_eq!(auth.user_id().await.unwrap(), None);
    }

    #[tokio::test]
    async fn login_needs_sessions() {
        let mut ctx = context("GET / HTTP/1.1\r\n\r\n", Config::default());
        assert!(matches!(
            ctx.auth().login(1).await,
            Err(AuthError::Session(SessionError::Service(
                ServiceError::FeatureDisabled { feature: "sessions" }
            )))
        ));
    }

    #[test]
    fn bearer_tokens_round_trip_through_jwt() {
        let config = Config::default().with_jwt_secret("k");
        let mut issuer = context("GET / HTTP/1.1\r\n\r\n", config.clone());
        let token = issuer.auth().issue_token(42).unwrap();

        let raw = format!("GET / HTTP/1.1\r\nAuthorization: Bearer {token}\r\n\r\n");
        let mut ctx = context(&raw, config.clone());
        assert_eq!(ctx.auth().bearer_user().unwrap(), 42);

        let mut anonymous = context("GET / HTTP/1.1\r\n\r\n", config.clone());
        assert!(matches!(anonymous.auth().bearer_user(), Err(AuthError::MissingToken)));

        let raw = "GET / HTTP/1.1\r\nAuthorization: Bearer forged.token.value\r\n\r\n";
        let mut forged = context(raw, config);
        assert!(matches!(forged.auth().bearer_user(), Err(AuthError::Jwt(_))));
    }
}
