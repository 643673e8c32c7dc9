// Handlers fulfilling the account-lifecycle commands

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::auth::commands::{
    ForgetPassword, LoginOutcome, LoginUser, LogoutUser, RegisterUser, ResetLinkStatus,
    ResetPassword, ResetStatus, RevokeOutcome, UpdatePassword, UpdatePasswordOutcome,
    VerifyEmail, VerifyEmailOutcome,
};
use crate::auth::password::PasswordHasher;
use crate::auth::permissions::PermissionSource;
use crate::auth::reset::{MintOutcome, ResetBroker, ResetNotifier, ResetVerification};
use crate::auth::user_store::UserStore;
use crate::bus::command::Handler;
use crate::core::errors::AuthError;
use crate::core::models::{NewUser, RequestContext, Role};
use crate::token::store::{IssuedToken, TokenStore, ACCESS_TOKEN_NAME};

/// Digest embedded in email-verification links
pub fn email_digest(email: &str) -> String {
    hex::encode(Sha256::digest(email.as_bytes()))
}

fn digests_match(expected: &str, supplied: &str) -> bool {
    expected.as_bytes().ct_eq(supplied.as_bytes()).into()
}

fn random_remember_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(60)
        .map(char::from)
        .collect()
}

fn validate_name(name: &str) -> Result<(), AuthError> {
    if name.trim().is_empty() {
        return Err(AuthError::Validation {
            field: "name",
            message: "Name must not be empty".to_string(),
        });
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), AuthError> {
    let invalid = || AuthError::Validation {
        field: "email",
        message: "Email address is not valid".to_string(),
    };

    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.is_empty() || !domain.contains('.') {
        return Err(invalid());
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.len() < 8 {
        return Err(AuthError::Validation {
            field: "password",
            message: "Password must be at least 8 characters".to_string(),
        });
    }
    Ok(())
}

/// Creates the account and issues its first bearer token
pub struct RegisterHandler {
    users: Arc<dyn UserStore>,
    tokens: Arc<dyn TokenStore>,
    hasher: Arc<dyn PasswordHasher>,
}

impl RegisterHandler {
    pub fn new(
        users: Arc<dyn UserStore>,
        tokens: Arc<dyn TokenStore>,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Self {
        Self { users, tokens, hasher }
    }
}

#[async_trait]
impl Handler<RegisterUser> for RegisterHandler {
    async fn handle(
        &self,
        ctx: &RequestContext,
        command: RegisterUser,
    ) -> Result<IssuedToken, AuthError> {
        validate_name(&command.name)?;
        validate_email(&command.email)?;
        validate_password(&command.password)?;

        let password_hash = self.hasher.hash(&command.password)?;
        let user = self
            .users
            .create(NewUser {
                name: command.name,
                email: command.email,
                password_hash,
                role: Role::User,
            })
            .await?;

        // The first token never expires; it carries only the ability to
        // be refreshed into scoped credentials.
        let issued = self
            .tokens
            .issue(user.id, ACCESS_TOKEN_NAME, &["refresh".to_string()], None)
            .await?;

        info!(
            user_id = user.id,
            request_id = %ctx.request_id,
            "Registered account"
        );
        Ok(issued)
    }
}

/// Verifies credentials and issues a scoped, expiring token
pub struct LoginHandler {
    users: Arc<dyn UserStore>,
    tokens: Arc<dyn TokenStore>,
    hasher: Arc<dyn PasswordHasher>,
    permissions: Arc<dyn PermissionSource>,
    token_ttl: Duration,
}

impl LoginHandler {
    pub fn new(
        users: Arc<dyn UserStore>,
        tokens: Arc<dyn TokenStore>,
        hasher: Arc<dyn PasswordHasher>,
        permissions: Arc<dyn PermissionSource>,
        token_ttl: Duration,
    ) -> Self {
        Self { users, tokens, hasher, permissions, token_ttl }
    }
}

#[async_trait]
impl Handler<LoginUser> for LoginHandler {
    async fn handle(
        &self,
        ctx: &RequestContext,
        command: LoginUser,
    ) -> Result<LoginOutcome, AuthError> {
        // Unknown address and wrong password collapse into the same
        // outcome so responses don't enumerate accounts.
        let Some(user) = self.users.find_by_email(&command.email).await? else {
            warn!(request_id = %ctx.request_id, "Login failed");
            return Ok(LoginOutcome::InvalidCredentials);
        };
        if !self.hasher.verify(&command.password, &user.password_hash) {
            warn!(user_id = user.id, request_id = %ctx.request_id, "Login failed");
            return Ok(LoginOutcome::InvalidCredentials);
        }

        let abilities = self.permissions.abilities_for(&user).await?;
        let expires_at = Utc::now() + self.token_ttl;
        let access_token = self
            .tokens
            .issue(user.id, ACCESS_TOKEN_NAME, &abilities, Some(expires_at))
            .await?;

        info!(user_id = user.id, request_id = %ctx.request_id, "Login granted");
        Ok(LoginOutcome::Granted { access_token })
    }
}

/// Revokes the caller's current bearer token
pub struct LogoutHandler {
    tokens: Arc<dyn TokenStore>,
}

impl LogoutHandler {
    pub fn new(tokens: Arc<dyn TokenStore>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl Handler<LogoutUser> for LogoutHandler {
    async fn handle(
        &self,
        ctx: &RequestContext,
        command: LogoutUser,
    ) -> Result<RevokeOutcome, AuthError> {
        let revoked = self.tokens.revoke(command.token_id).await?;

        info!(
            user_id = command.user.id,
            token_id = command.token_id,
            revoked = revoked,
            request_id = %ctx.request_id,
            "Logout processed"
        );
        Ok(if revoked { RevokeOutcome::Revoked } else { RevokeOutcome::NoTokenBound })
    }
}

/// Confirms an email address from its signed link
pub struct VerifyEmailHandler {
    users: Arc<dyn UserStore>,
}

impl VerifyEmailHandler {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl Handler<VerifyEmail> for VerifyEmailHandler {
    async fn handle(
        &self,
        ctx: &RequestContext,
        command: VerifyEmail,
    ) -> Result<VerifyEmailOutcome, AuthError> {
        // An unknown id reads as a bad link, not as a missing record.
        let Some(mut user) = self.users.find_by_id(command.user_id).await? else {
            return Ok(VerifyEmailOutcome::InvalidLink);
        };

        if !digests_match(&email_digest(&user.email), &command.digest) {
            warn!(user_id = user.id, request_id = %ctx.request_id, "Verification digest mismatch");
            return Ok(VerifyEmailOutcome::InvalidLink);
        }
        if user.is_verified() {
            return Ok(VerifyEmailOutcome::AlreadyVerified);
        }

        user.email_verified_at = Some(Utc::now());
        self.users.update(&user).await?;

        info!(user_id = user.id, request_id = %ctx.request_id, "Email verified");
        Ok(VerifyEmailOutcome::Verified(user))
    }
}

/// Mints a reset token and hands it to the delivery seam
pub struct ForgetPasswordHandler {
    users: Arc<dyn UserStore>,
    broker: Arc<dyn ResetBroker>,
    notifier: Arc<dyn ResetNotifier>,
}

impl ForgetPasswordHandler {
    pub fn new(
        users: Arc<dyn UserStore>,
        broker: Arc<dyn ResetBroker>,
        notifier: Arc<dyn ResetNotifier>,
    ) -> Self {
        Self { users, broker, notifier }
    }
}

#[async_trait]
impl Handler<ForgetPassword> for ForgetPasswordHandler {
    async fn handle(
        &self,
        ctx: &RequestContext,
        command: ForgetPassword,
    ) -> Result<ResetLinkStatus, AuthError> {
        let Some(user) = self.users.find_by_email(&command.email).await? else {
            return Ok(ResetLinkStatus::InvalidUser);
        };

        match self.broker.mint(&user.email).await? {
            MintOutcome::Throttled => Ok(ResetLinkStatus::Throttled),
            MintOutcome::Minted(token) => {
                self.notifier.deliver(&user, token.expose_secret());
                info!(user_id = user.id, request_id = %ctx.request_id, "Reset link sent");
                Ok(ResetLinkStatus::Sent)
            }
        }
    }
}

/// Applies a password reset proven by a broker token
pub struct ResetPasswordHandler {
    users: Arc<dyn UserStore>,
    broker: Arc<dyn ResetBroker>,
    hasher: Arc<dyn PasswordHasher>,
}

impl ResetPasswordHandler {
    pub fn new(
        users: Arc<dyn UserStore>,
        broker: Arc<dyn ResetBroker>,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Self {
        Self { users, broker, hasher }
    }
}

#[async_trait]
impl Handler<ResetPassword> for ResetPasswordHandler {
    async fn handle(
        &self,
        ctx: &RequestContext,
        command: ResetPassword,
    ) -> Result<ResetStatus, AuthError> {
        validate_password(&command.password)?;

        let Some(mut user) = self.users.find_by_email(&command.email).await? else {
            return Ok(ResetStatus::InvalidUser);
        };

        match self.broker.verify(&user.email, &command.token).await? {
            ResetVerification::Invalid => return Ok(ResetStatus::InvalidToken),
            ResetVerification::Throttled => return Ok(ResetStatus::Throttled),
            ResetVerification::Valid => {}
        }

        user.password_hash = self.hasher.hash(&command.password)?;
        // Rotating the remember token invalidates any long-lived session
        // the old password may have left behind.
        user.remember_token = Some(random_remember_token());
        self.users.update(&user).await?;
        self.broker.consume(&user.email).await?;

        info!(user_id = user.id, request_id = %ctx.request_id, "Password reset");
        Ok(ResetStatus::Reset)
    }
}

/// Changes a password after proving the current one
pub struct UpdatePasswordHandler {
    users: Arc<dyn UserStore>,
    hasher: Arc<dyn PasswordHasher>,
}

impl UpdatePasswordHandler {
    pub fn new(users: Arc<dyn UserStore>, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self { users, hasher }
    }
}

#[async_trait]
impl Handler<UpdatePassword> for UpdatePasswordHandler {
    async fn handle(
        &self,
        ctx: &RequestContext,
        command: UpdatePassword,
    ) -> Result<UpdatePasswordOutcome, AuthError> {
        validate_password(&command.new_password)?;

        // The id comes from the authenticated identity; its absence means
        // the account vanished under a live credential.
        let Some(mut user) = self.users.find_by_id(command.user_id).await? else {
            return Err(AuthError::AuthenticationRequired);
        };

        if !self.hasher.verify(&command.current_password, &user.password_hash) {
            warn!(user_id = user.id, request_id = %ctx.request_id, "Wrong current password");
            return Ok(UpdatePasswordOutcome::WrongCurrentPassword);
        }

        user.password_hash = self.hasher.hash(&command.new_password)?;
        self.users.update(&user).await?;

        info!(user_id = user.id, request_id = %ctx.request_id, "Password updated");
        Ok(UpdatePasswordOutcome::Updated)
    }
}
