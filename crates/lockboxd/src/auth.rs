//! Minimal credential service: Argon2id-hashed users, opaque bearer tokens,
//! and the interceptor that turns a token into a [`Principal`].

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use lockbox_core::proto::{auth_server::Auth, Credentials, Token};
use lockbox_core::types::UserId;
use lockbox_storage::UserStore;
use secrecy::SecretString;
use tonic::service::Interceptor;
use tonic::{Request, Response, Status};
use tracing::info;

/// Authenticated caller, attached to every `Resources` request by [`AuthInterceptor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal(pub UserId);

/// Issued tokens. In memory only: a restart logs everyone out.
#[derive(Debug, Default, Clone)]
pub struct TokenRegistry {
    tokens: Arc<RwLock<HashMap<String, UserId>>>,
}

impl TokenRegistry {
    pub fn issue(&self, user: UserId) -> String {
        let token = uuid::Uuid::new_v4().simple().to_string();
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.clone(), user);
        token
    }

    pub fn resolve(&self, token: &str) -> Option<UserId> {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .copied()
    }
}

pub struct AuthService {
    users: Arc<UserStore>,
    tokens: TokenRegistry,
}

impl AuthService {
    pub fn new(users: Arc<UserStore>, tokens: TokenRegistry) -> Self {
        Self { users, tokens }
    }
}

#[tonic::async_trait]
impl Auth for AuthService {
    async fn register(&self, request: Request<Credentials>) -> Result<Response<Token>, Status> {
        let Credentials { login, password } = request.into_inner();
        let password = SecretString::from(password);
        let users = self.users.clone();
        let user = tokio::task::spawn_blocking(move || users.register(&login, &password))
            .await
            .map_err(|e| Status::internal(format!("register task: {e}")))??;

        Ok(Response::new(Token {
            token: self.tokens.issue(user),
        }))
    }

    async fn login(&self, request: Request<Credentials>) -> Result<Response<Token>, Status> {
        let Credentials { login, password } = request.into_inner();
        let password = SecretString::from(password);
        let users = self.users.clone();
        let user = tokio::task::spawn_blocking(move || users.verify(&login, &password))
            .await
            .map_err(|e| Status::internal(format!("login task: {e}")))??;

        info!(user_id = user, "login");
        Ok(Response::new(Token {
            token: self.tokens.issue(user),
        }))
    }
}

/// Resolves `authorization: Bearer <token>` into a [`Principal`] extension.
#[derive(Debug, Clone)]
pub struct AuthInterceptor {
    tokens: TokenRegistry,
}

impl AuthInterceptor {
    pub fn new(tokens: TokenRegistry) -> Self {
        Self { tokens }
    }
}

impl Interceptor for AuthInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let header = request
            .metadata()
            .get("authorization")
            .ok_or_else(|| Status::unauthenticated("missing authorization header"))?;
        let token = header
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| Status::unauthenticated("expected a bearer token"))?;
        let user = self
            .tokens
            .resolve(token)
            .ok_or_else(|| Status::unauthenticated("unknown token"))?;
        request.extensions_mut().insert(Principal(user));
        Ok(request)
    }
}

/// The principal the interceptor attached; UNAUTHENTICATED if there is none.
pub fn principal<T>(request: &Request<T>) -> Result<UserId, Status> {
    request
        .extensions()
        .get::<Principal>()
        .map(|p| p.0)
        .ok_or_else(|| Status::unauthenticated("no authenticated principal"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn test_interceptor_attaches_principal() {
        let tokens = TokenRegistry::default();
        let token = tokens.issue(7);
        let mut interceptor = AuthInterceptor::new(tokens);

        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert("authorization", format!("Bearer {token}").parse().unwrap());
        let request = interceptor.call(request).unwrap();
        assert_eq!(principal(&request).unwrap(), 7);
    }

    #[test]
    fn test_interceptor_rejects_missing_and_unknown() {
        let mut interceptor = AuthInterceptor::new(TokenRegistry::default());

        let status = interceptor.call(Request::new(())).unwrap_err();
        assert_eq!(status.code(), Code::Unauthenticated);

        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert("authorization", "Bearer nope".parse().unwrap());
        assert_eq!(
            interceptor.call(request).unwrap_err().code(),
            Code::Unauthenticated
        );

        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert("authorization", "Basic abc".parse().unwrap());
        assert_eq!(
            interceptor.call(request).unwrap_err().code(),
            Code::Unauthenticated
        );
    }

    #[test]
    fn test_tokens_are_distinct() {
        let tokens = TokenRegistry::default();
        let a = tokens.issue(1);
        let b = tokens.issue(1);
        assert_ne!(a, b);
        assert_eq!(tokens.resolve(&a), Some(1));
        assert_eq!(tokens.resolve("unknown"), None);
    }

    #[tokio::test]
    async fn test_register_and_login() {
        let users = Arc::new(
            UserStore::in_memory().with_params(argon2::Params::new(8, 1, 1, None).unwrap()),
        );
        let tokens = TokenRegistry::default();
        let service = AuthService::new(users, tokens.clone());

        let creds = || Credentials {
            login: "alice".into(),
            password: "s3cret".into(),
        };
        let registered = service.register(Request::new(creds())).await.unwrap();
        let user = tokens.resolve(&registered.get_ref().token).unwrap();

        let status = service.register(Request::new(creds())).await.unwrap_err();
        assert_eq!(status.code(), Code::AlreadyExists);

        let logged_in = service.login(Request::new(creds())).await.unwrap();
        assert_eq!(tokens.resolve(&logged_in.get_ref().token), Some(user));

        let status = service
            .login(Request::new(Credentials {
                login: "alice".into(),
                password: "wrong".into(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unauthenticated);
    }
}
