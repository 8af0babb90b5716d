//! Bearer token for the current login, attached to every `Resources` call

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use tonic::metadata::{Ascii, MetadataValue};
use tonic::service::Interceptor;
use tonic::{Request, Status};

use lockbox_core::{VaultError, VaultResult};

/// Shared between the interceptor and whoever logs in; cloning shares the token.
#[derive(Debug, Clone, Default)]
pub struct Session {
    token: Arc<RwLock<Option<String>>>,
}

impl Session {
    pub fn with_token(token: impl Into<String>) -> Self {
        let session = Self::default();
        session.set(token);
        session
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Read a token written by [`Session::save`]. A missing file is an empty session.
    pub fn load(path: &Path) -> VaultResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let token = content.trim();
                if token.is_empty() {
                    Ok(Self::default())
                } else {
                    Ok(Self::with_token(token))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(VaultError::Config(format!(
                "reading token file {}: {e}",
                path.display()
            ))),
        }
    }

    /// Persist the token with owner-only permissions.
    pub fn save(&self, path: &Path) -> VaultResult<()> {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;

        let token = self
            .token()
            .ok_or_else(|| VaultError::Unauthenticated("no token to save; log in first".into()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        writeln!(file, "{token}")?;
        tracing::debug!(path = %path.display(), "token saved");
        Ok(())
    }
}

impl Interceptor for Session {
    /// Without a token the request goes out bare and the server answers UNAUTHENTICATED.
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        if let Some(token) = self.token() {
            let value: MetadataValue<Ascii> = format!("Bearer {token}")
                .parse()
                .map_err(|_| Status::unauthenticated("token is not a valid header value"))?;
            request.metadata_mut().insert("authorization", value);
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interceptor_adds_bearer_header() {
        let mut session = Session::with_token("abc123");
        let request = session.call(Request::new(())).unwrap();
        assert_eq!(
            request.metadata().get("authorization").unwrap().to_str().unwrap(),
            "Bearer abc123"
        );
    }

    #[test]
    fn test_empty_session_sends_no_header() {
        let mut session = Session::default();
        let request = session.call(Request::new(())).unwrap();
        assert!(request.metadata().get("authorization").is_none());
    }

    #[test]
    fn test_clones_share_the_token() {
        let session = Session::default();
        let mut interceptor = session.clone();
        session.set("later");
        let request = interceptor.call(Request::new(())).unwrap();
        assert!(request.metadata().get("authorization").is_some());
    }

    #[test]
    fn test_save_and_load() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("token");

        assert!(Session::load(&path).unwrap().token().is_none());
        assert!(matches!(
            Session::default().save(&path),
            Err(VaultError::Unauthenticated(_))
        ));

        Session::with_token("t0k3n").save(&path).unwrap();
        assert_eq!(Session::load(&path).unwrap().token().as_deref(), Some("t0k3n"));
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
