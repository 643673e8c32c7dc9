// Command set for the account lifecycle, with audit declarations

use serde_json::json;
use std::fmt;

use crate::audit::masker::{AuditNode, Auditable};
use crate::bus::command::Command;
use crate::core::models::{TokenId, User, UserId};
use crate::token::store::IssuedToken;

/// Create an account and hand back its first bearer token
pub struct RegisterUser {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl fmt::Debug for RegisterUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterUser")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

impl Auditable for RegisterUser {
    fn audit_node(&self) -> AuditNode {
        AuditNode::declared(
            json!({
                "name": self.name,
                "email": self.email,
                "password": self.password,
            }),
            &["password", "access_token"],
        )
    }
}

impl Command for RegisterUser {
    type Output = IssuedToken;
    const NAME: &'static str = "RegisterUser";
}

/// Exchange credentials for a bearer token
pub struct LoginUser {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for LoginUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginUser")
            .field("email", &self.email)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

impl Auditable for LoginUser {
    fn audit_node(&self) -> AuditNode {
        AuditNode::declared(
            json!({
                "email": self.email,
                "password": self.password,
            }),
            &["password", "access_token"],
        )
    }
}

/// Login result; unknown email and wrong password are indistinguishable
#[derive(Debug)]
pub enum LoginOutcome {
    Granted { access_token: IssuedToken },
    InvalidCredentials,
}

impl Auditable for LoginOutcome {
    fn audit_node(&self) -> AuditNode {
        match self {
            LoginOutcome::Granted { access_token } => AuditNode::declared(
                json!({
                    "status": "granted",
                    "access_token": access_token.reveal(),
                }),
                &["access_token"],
            ),
            LoginOutcome::InvalidCredentials => {
                AuditNode::declared(json!({"status": "invalid_credentials"}), &[])
            }
        }
    }
}

impl Command for LoginUser {
    type Output = LoginOutcome;
    const NAME: &'static str = "LoginUser";
}

/// Revoke the caller's current bearer token
///
/// Declares no sensitive fields of its own; the nested account snapshot
/// carries its own declarations.
#[derive(Debug)]
pub struct LogoutUser {
    pub user: User,
    pub token_id: TokenId,
}

impl Auditable for LogoutUser {
    fn audit_node(&self) -> AuditNode {
        let user_node = self.user.audit_node();
        AuditNode::declared(
            json!({
                "user": user_node.raw().clone(),
                "token_id": self.token_id,
            }),
            &[],
        )
        .with_child("user", user_node)
    }
}

/// Revocation result
#[derive(Debug, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked,
    NoTokenBound,
}

impl Auditable for RevokeOutcome {
    fn audit_node(&self) -> AuditNode {
        let status = match self {
            RevokeOutcome::Revoked => "revoked",
            RevokeOutcome::NoTokenBound => "no_token_bound",
        };
        AuditNode::declared(json!({"status": status}), &[])
    }
}

impl Command for LogoutUser {
    type Output = RevokeOutcome;
    const NAME: &'static str = "LogoutUser";
}

/// Confirm an address from a signed verification link
#[derive(Debug)]
pub struct VerifyEmail {
    pub user_id: UserId,
    pub digest: String,
}

impl Auditable for VerifyEmail {
    fn audit_node(&self) -> AuditNode {
        AuditNode::bare(json!({
            "user_id": self.user_id,
            "digest": self.digest,
        }))
    }
}

/// Verification result
#[derive(Debug)]
pub enum VerifyEmailOutcome {
    Verified(User),
    AlreadyVerified,
    InvalidLink,
}

impl Auditable for VerifyEmailOutcome {
    fn audit_node(&self) -> AuditNode {
        match self {
            VerifyEmailOutcome::Verified(user) => {
                let user_node = user.audit_node();
                AuditNode::declared(
                    json!({
                        "status": "verified",
                        "user": user_node.raw().clone(),
                    }),
                    &[],
                )
                .with_child("user", user_node)
            }
            VerifyEmailOutcome::AlreadyVerified => {
                AuditNode::declared(json!({"status": "already_verified"}), &[])
            }
            VerifyEmailOutcome::InvalidLink => {
                AuditNode::declared(json!({"status": "invalid_link"}), &[])
            }
        }
    }
}

impl Command for VerifyEmail {
    type Output = VerifyEmailOutcome;
    const NAME: &'static str = "VerifyEmail";
}

/// Request a password-reset link
#[derive(Debug)]
pub struct ForgetPassword {
    pub email: String,
}

impl Auditable for ForgetPassword {
    fn audit_node(&self) -> AuditNode {
        AuditNode::bare(json!({"email": self.email}))
    }
}

/// Reset-link request result
#[derive(Debug, PartialEq, Eq)]
pub enum ResetLinkStatus {
    Sent,
    InvalidUser,
    Throttled,
}

impl Auditable for ResetLinkStatus {
    fn audit_node(&self) -> AuditNode {
        let status = match self {
            ResetLinkStatus::Sent => "sent",
            ResetLinkStatus::InvalidUser => "invalid_user",
            ResetLinkStatus::Throttled => "throttled",
        };
        AuditNode::declared(json!({"status": status}), &[])
    }
}

impl Command for ForgetPassword {
    type Output = ResetLinkStatus;
    const NAME: &'static str = "ForgetPassword";
}

/// Set a new password using a reset token
pub struct ResetPassword {
    pub email: String,
    pub token: String,
    pub password: String,
}

impl fmt::Debug for ResetPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResetPassword")
            .field("email", &self.email)
            .field("token", &"<REDACTED>")
            .field("password", &"<REDACTED>")
            .finish()
    }
}

impl Auditable for ResetPassword {
    fn audit_node(&self) -> AuditNode {
        AuditNode::declared(
            json!({
                "email": self.email,
                "token": self.token,
                "password": self.password,
            }),
            &["password", "token"],
        )
    }
}

/// Reset result
#[derive(Debug, PartialEq, Eq)]
pub enum ResetStatus {
    Reset,
    InvalidToken,
    InvalidUser,
    Throttled,
}

impl Auditable for ResetStatus {
    fn audit_node(&self) -> AuditNode {
        let status = match self {
            ResetStatus::Reset => "reset",
            ResetStatus::InvalidToken => "invalid_token",
            ResetStatus::InvalidUser => "invalid_user",
            ResetStatus::Throttled => "throttled",
        };
        AuditNode::declared(json!({"status": status}), &[])
    }
}

impl Command for ResetPassword {
    type Output = ResetStatus;
    const NAME: &'static str = "ResetPassword";
}

/// Change the caller's password, proving the current one
pub struct UpdatePassword {
    pub user_id: UserId,
    pub current_password: String,
    pub new_password: String,
}

impl fmt::Debug for UpdatePassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdatePassword")
            .field("user_id", &self.user_id)
            .field("current_password", &"<REDACTED>")
            .field("new_password", &"<REDACTED>")
            .finish()
    }
}

impl Auditable for UpdatePassword {
    fn audit_node(&self) -> AuditNode {
        AuditNode::declared(
            json!({
                "user_id": self.user_id,
                "current_password": self.current_password,
                "new_password": self.new_password,
            }),
            &["current_password", "new_password"],
        )
    }
}

/// Password-change result
#[derive(Debug, PartialEq, Eq)]
pub enum UpdatePasswordOutcome {
    Updated,
    WrongCurrentPassword,
}

impl Auditable for UpdatePasswordOutcome {
    fn audit_node(&self) -> AuditNode {
        let status = match self {
            UpdatePasswordOutcome::Updated => "updated",
            UpdatePasswordOutcome::WrongCurrentPassword => "wrong_current_password",
        };
        AuditNode::declared(json!({"status": status}), &[])
    }
}

impl Command for UpdatePassword {
    type Output = UpdatePasswordOutcome;
    const NAME: &'static str = "UpdatePassword";
}
