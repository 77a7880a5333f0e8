use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::{
    dto::{normalize_email, AuthResponse, LoginRequest, PublicUser, RegisterRequest},
    errors::AuthError,
    jwt::JwtKeys,
    password::{hash_password_async, verify_absent_account, verify_password_async},
    repo::UserStore,
    repo_types::{NewUser, User},
};

/// Registration, login and session checks over a `UserStore`.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    keys: JwtKeys,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserStore>, keys: JwtKeys) -> Self {
        Self { users, keys }
    }

    pub fn keys(&self) -> &JwtKeys {
        &self.keys
    }

    #[instrument(skip_all)]
    pub async fn register(&self, mut req: RegisterRequest) -> Result<AuthResponse, AuthError> {
        req.email = normalize_email(&req.email);
        req.validate()?;
        let email = req.email;

        // Fast path only; the unique index is what actually guards this.
        if self.users.find_by_email(&email).await?.is_some() {
            warn!(email = %email, "email already registered");
            return Err(AuthError::DuplicateAccount);
        }

        let password_hash = hash_password_async(req.password).await?;
        let user = self
            .users
            .create(NewUser {
                email,
                password_hash,
                first_name: req.first_name,
                last_name: req.last_name,
                phone: req.phone,
                business_name: req.business_name,
                abn: req.abn,
            })
            .await
            .inspect_err(|e| warn!(error = %e, "create user failed"))?;

        info!(user_id = %user.id, email = %user.email, "user registered");
        self.issue(user)
    }

    #[instrument(skip_all)]
    pub async fn login(&self, req: LoginRequest) -> Result<AuthResponse, AuthError> {
        let email = normalize_email(&req.email);

        let Some(user) = self.users.find_by_email(&email).await? else {
            verify_absent_account(req.password).await?;
            warn!(email = %email, "login unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        if !verify_password_async(req.password, user.password_hash.clone()).await? {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AuthError::InvalidCredentials);
        }

        if !user.is_active {
            warn!(user_id = %user.id, "login on inactive account");
            return Err(AuthError::AccountInactive);
        }

        info!(user_id = %user.id, "user logged in");
        self.issue(user)
    }

    /// Identity check for authenticated requests: the user must exist and be active.
    #[instrument(skip(self))]
    pub async fn validate_user(&self, user_id: Uuid) -> Result<PublicUser, AuthError> {
        match self.users.find_by_id(user_id).await? {
            Some(user) if user.is_active => Ok(user.into()),
            _ => Err(AuthError::NotFoundOrInactive),
        }
    }

    /// Unlike `validate_user`, this does not look at the active flag.
    #[instrument(skip(self))]
    pub async fn current_user(&self, user_id: Uuid) -> Result<PublicUser, AuthError> {
        self.users
            .find_by_id(user_id)
            .await?
            .map(PublicUser::from)
            .ok_or(AuthError::NotFound)
    }

    fn issue(&self, user: User) -> Result<AuthResponse, AuthError> {
        let token = self.keys.sign(user.id, &user.email)?;
        Ok(AuthResponse {
            user: user.into(),
            token,
        })
    }
}
