use std::sync::Arc;

use axum::extract::FromRef;
use tracing::{error, info, warn};

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, PublicUser, RegisterRequest},
        error::{AuthError, MISSING_FIELDS},
        jwt::JwtKeys,
        password::PasswordService,
        repo::UserStore,
        repo_types::User,
    },
    state::AppState,
};

/// Register / login / resolve-credential workflow, independent of HTTP.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    passwords: PasswordService,
    keys: JwtKeys,
}

impl FromRef<AppState> for AuthService {
    fn from_ref(state: &AppState) -> Self {
        Self::new(state.users.clone(), state.passwords.clone(), state.keys.clone())
    }
}

/// Name and email must carry something besides whitespace.
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Passwords are taken verbatim; only an empty one counts as missing.
fn present_password(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl AuthService {
    pub fn new(users: Arc<dyn UserStore>, passwords: PasswordService, keys: JwtKeys) -> Self {
        Self {
            users,
            passwords,
            keys,
        }
    }

    pub async fn register(&self, req: RegisterRequest) -> Result<AuthResponse, AuthError> {
        let (Some(name), Some(email), Some(password)) =
            (present(req.name), present(req.email), present_password(req.password))
        else {
            warn!("register with missing fields");
            return Err(AuthError::Validation(MISSING_FIELDS.into()));
        };
        let name = name.trim().to_string();
        let email = normalize_email(&email);

        if self.users.find_by_email(&email).await?.is_some() {
            warn!(email = %email, "email already registered");
            return Err(AuthError::Conflict);
        }

        let hash = self.passwords.hash_blocking(password).await?;

        // The store's unique index settles races with a concurrent registration.
        let user = self
            .users
            .create(&name, &email, &hash)
            .await
            .map_err(|e| {
                warn!(email = %email, error = %e, "create user rejected");
                AuthError::from(e)
            })?;

        info!(user_id = %user.id, email = %user.email, "user registered");
        self.respond(user)
    }

    pub async fn login(&self, req: LoginRequest) -> Result<AuthResponse, AuthError> {
        let (Some(email), Some(password)) = (present(req.email), present_password(req.password)) else {
            warn!("login with missing fields");
            return Err(AuthError::Validation(MISSING_FIELDS.into()));
        };
        let email = normalize_email(&email);

        let Some(user) = self.users.find_by_email(&email).await? else {
            warn!(email = %email, "login unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        let ok = self
            .passwords
            .verify_blocking(password, user.password_hash.clone())
            .await
            .unwrap_or_else(|e| {
                error!(user_id = %user.id, error = %e, "stored password hash unusable");
                false
            });
        if !ok {
            warn!(email = %email, user_id = %user.id, "login invalid password");
            return Err(AuthError::InvalidCredentials);
        }

        info!(user_id = %user.id, email = %user.email, "user logged in");
        self.respond(user)
    }

    /// Resolves a bearer token to the user it was issued for.
    pub async fn authenticate(&self, token: &str) -> Result<PublicUser, AuthError> {
        let claims = self.keys.verify(token).map_err(|e| {
            warn!(error = %e, "invalid or expired token");
            AuthError::Unauthorized("Not authorized")
        })?;

        match self.users.find_by_id(claims.id).await? {
            Some(user) => Ok(user.into()),
            None => {
                warn!(user_id = %claims.id, "token for unknown user");
                Err(AuthError::Unauthorized("Not authorized"))
            }
        }
    }

    fn respond(&self, user: User) -> Result<AuthResponse, AuthError> {
        let token = self.keys.sign(user.id)?;
        Ok(AuthResponse {
            id: user.id,
            name: user.name,
            email: user.email,
            token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{memory::MemoryUserStore, repo::StoreError},
        config::{JwtConfig, PasswordConfig},
    };
    use async_trait::async_trait;
    use uuid::Uuid;

    fn keys() -> JwtKeys {
        JwtKeys::new(&JwtConfig {
            secret: "test-secret".into(),
            ttl_minutes: 60 * 24,
        })
        .unwrap()
    }

    fn passwords() -> PasswordService {
        PasswordService::new(&PasswordConfig {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap()
    }

    fn service() -> (AuthService, Arc<MemoryUserStore>) {
        let store = Arc::new(MemoryUserStore::new());
        (AuthService::new(store.clone(), passwords(), keys()), store)
    }

    fn reg(name: &str, email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            name: Some(name.into()),
            email: Some(email.into()),
            password: Some(password.into()),
        }
    }

    fn creds(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: Some(email.into()),
            password: Some(password.into()),
        }
    }

    #[tokio::test]
    async fn register_stores_hashed_password() {
        let (svc, store) = service();
        let res = svc.register(reg("Ana", "ana@x.com", "secret1")).await.unwrap();
        assert_eq!(res.email, "ana@x.com");
        assert_eq!(keys().verify(&res.token).unwrap().id, res.id);

        assert_eq!(store.count_by_email("ana@x.com").await, 1);
        let stored = store.find_by_email("ana@x.com").await.unwrap().unwrap();
        assert_eq!(stored.id, res.id);
        assert_ne!(stored.password_hash, "secret1");
    }

    #[tokio::test]
    async fn register_normalizes_email() {
        let (svc, _) = service();
        let res = svc
            .register(reg(" Ana ", "  Ana@X.com ", "secret1"))
            .await
            .unwrap();
        assert_eq!(res.name, "Ana");
        assert_eq!(res.email, "ana@x.com");
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let (svc, store) = service();
        svc.register(reg("Ana", "ana@x.com", "secret1")).await.unwrap();
        let err = svc
            .register(reg("Bea", "ana@x.com", "other2"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Conflict));
        assert_eq!(err.to_string(), "User already exists");
        assert_eq!(store.count_by_email("ana@x.com").await, 1);
    }

    #[tokio::test]
    async fn missing_or_blank_fields_fail_validation() {
        let (svc, store) = service();
        let cases = [
            RegisterRequest::default(),
            RegisterRequest {
                name: None,
                ..reg("x", "a@x.com", "pw")
            },
            reg("", "a@x.com", "pw"),
            reg("Ana", "   ", "pw"),
            reg("Ana", "a@x.com", ""),
        ];
        for req in cases {
            let err = svc.register(req).await.unwrap_err();
            match err {
                AuthError::Validation(msg) => assert_eq!(msg, MISSING_FIELDS),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(store.count_by_email("a@x.com").await, 0);
    }

    #[tokio::test]
    async fn whitespace_password_is_accepted_verbatim() {
        let (svc, _) = service();
        svc.register(reg("Ana", "ana@x.com", "   ")).await.unwrap();
        assert!(svc.login(creds("ana@x.com", "   ")).await.is_ok());
        let err = svc.login(creds("ana@x.com", " ")).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn unusable_stored_hash_is_invalid_credentials() {
        let (svc, store) = service();
        store
            .create("Ana", "ana@x.com", "not-a-phc-string")
            .await
            .unwrap();
        let err = svc.login(creds("ana@x.com", "secret1")).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    /// Simulates losing the race: lookup sees nothing, insert hits the unique index.
    struct RacingStore;

    #[async_trait]
    impl UserStore for RacingStore {
        async fn find_by_email(&self, _: &str) -> Result<Option<User>, StoreError> {
            Ok(None)
        }
        async fn find_by_id(&self, _: Uuid) -> Result<Option<User>, StoreError> {
            Ok(None)
        }
        async fn create(&self, _: &str, _: &str, _: &str) -> Result<User, StoreError> {
            Err(StoreError::DuplicateEmail)
        }
    }

    #[tokio::test]
    async fn insert_race_surfaces_as_conflict() {
        let svc = AuthService::new(Arc::new(RacingStore), passwords(), keys());
        let err = svc
            .register(reg("Ana", "ana@x.com", "secret1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Conflict));
    }

    #[tokio::test]
    async fn login_returns_token_for_user() {
        let (svc, _) = service();
        let registered = svc.register(reg("Ana", "ana@x.com", "secret1")).await.unwrap();
        let res = svc.login(creds("ana@x.com", "secret1")).await.unwrap();
        assert_eq!(res.id, registered.id);
        assert_eq!(res.name, "Ana");
        assert_eq!(keys().verify(&res.token).unwrap().id, registered.id);
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_look_the_same() {
        let (svc, _) = service();
        svc.register(reg("Ana", "ana@x.com", "secret1")).await.unwrap();

        let wrong = svc.login(creds("ana@x.com", "wrong")).await.unwrap_err();
        let unknown = svc.login(creds("nobody@x.com", "secret1")).await.unwrap_err();
        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert_eq!(wrong.to_string(), "Invalid credentials");
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn login_with_missing_fields_fails_validation() {
        let (svc, _) = service();
        let err = svc
            .login(LoginRequest {
                email: Some("ana@x.com".into()),
                password: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
        let err = svc.login(LoginRequest::default()).await.unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[tokio::test]
    async fn authenticate_resolves_user() {
        let (svc, _) = service();
        let res = svc.register(reg("Ana", "ana@x.com", "secret1")).await.unwrap();
        let user = svc.authenticate(&res.token).await.unwrap();
        assert_eq!(user.id, res.id);
        assert_eq!(user.email, "ana@x.com");
    }

    #[tokio::test]
    async fn authenticate_rejects_token_for_missing_user() {
        let (svc, _) = service();
        let token = keys().sign(Uuid::new_v4()).unwrap();
        let err = svc.authenticate(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized(_)));
        let err = svc.authenticate("garbage").await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized(_)));
    }
}
