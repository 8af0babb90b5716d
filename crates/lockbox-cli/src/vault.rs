//! Client side of the vault: encryption happens here, storage over there.
//!
//! Small secrets are JSON-encoded, encrypted whole with the [`Codec`] and
//! sent in one unary call. Files stream through a [`Pipeline`]: chunks are
//! block-encrypted on the way out and block-decrypted on the way in, so the
//! server only ever sees ciphertext plus the file descriptor.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::service::interceptor::InterceptedService;
use tonic::transport::Channel;
use tracing::{debug, info, warn};

use lockbox_core::proto::{self, auth_client::AuthClient, resources_client::ResourcesClient, FileChunk};
use lockbox_core::types::{FileDescriptor, Payload, RecordId, ResourceDescription, ResourceKind};
use lockbox_core::{VaultError, VaultResult};
use lockbox_crypto::Codec;
use lockbox_transfer::{receive_frames, send_frames, Pipeline, ShutdownCoordinator};
use secrecy::{ExposeSecret, SecretString};

use crate::session::Session;

/// A decrypted resource as returned by [`VaultClient::get`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Secret {
    pub id: RecordId,
    pub meta: String,
    pub payload: Payload,
}

impl Secret {
    pub fn kind(&self) -> ResourceKind {
        self.payload.kind()
    }

    pub fn render(&self) -> String {
        self.payload.render(&self.meta)
    }
}

pub struct VaultClient {
    auth: AuthClient<Channel>,
    resources: ResourcesClient<InterceptedService<Channel, Session>>,
    session: Session,
    codec: Codec,
    pipeline: Pipeline,
    coordinator: Arc<ShutdownCoordinator>,
    download_dir: PathBuf,
}

impl VaultClient {
    pub fn new(
        channel: Channel,
        session: Session,
        codec: Codec,
        pipeline: Pipeline,
        coordinator: Arc<ShutdownCoordinator>,
        download_dir: PathBuf,
    ) -> Self {
        if codec.is_identity() {
            warn!("no private key configured: payloads are sent unencrypted");
        }
        Self {
            auth: AuthClient::new(channel.clone()),
            resources: ResourcesClient::with_interceptor(channel, session.clone()),
            session,
            codec,
            pipeline,
            coordinator,
            download_dir,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Create an account and keep the issued token in the session.
    pub async fn register(&self, login: &str, password: &SecretString) -> VaultResult<()> {
        let token = self
            .auth
            .clone()
            .register(credentials(login, password))
            .await
            .map_err(VaultError::from_status)?
            .into_inner();
        self.session.set(token.token);
        info!(login, "registered");
        Ok(())
    }

    pub async fn login(&self, login: &str, password: &SecretString) -> VaultResult<()> {
        let token = self
            .auth
            .clone()
            .login(credentials(login, password))
            .await
            .map_err(VaultError::from_status)?
            .into_inner();
        self.session.set(token.token);
        info!(login, "logged in");
        Ok(())
    }

    /// Encrypt and store a small secret. Files go through [`VaultClient::save_file`].
    pub async fn save(&self, payload: &Payload, meta: &str) -> VaultResult<RecordId> {
        let resource = self.seal(0, payload, meta)?;
        let id = self
            .resources
            .clone()
            .save(resource)
            .await
            .map_err(VaultError::from_status)?
            .into_inner()
            .id;
        debug!(id, kind = %payload.kind(), "saved");
        Ok(id)
    }

    /// Replace payload and meta of an existing secret; the kind must not change.
    pub async fn update(&self, id: RecordId, payload: &Payload, meta: &str) -> VaultResult<()> {
        let resource = self.seal(id, payload, meta)?;
        self.resources
            .clone()
            .update(resource)
            .await
            .map_err(VaultError::from_status)?;
        debug!(id, kind = %payload.kind(), "updated");
        Ok(())
    }

    /// Fetch and decrypt. For files this yields the descriptor only.
    pub async fn get(&self, id: RecordId) -> VaultResult<Secret> {
        let resource = self
            .resources
            .clone()
            .get(proto::ResourceId { id })
            .await
            .map_err(VaultError::from_status)?
            .into_inner();
        let kind = ResourceKind::from_proto(resource.kind).ok_or_else(|| {
            VaultError::InvalidArgument(format!("server returned unknown kind {}", resource.kind))
        })?;

        let payload = match kind {
            ResourceKind::File => Payload::decode(kind, &resource.data)?,
            _ => Payload::decode(kind, &self.codec.decrypt(&resource.data)?)?,
        };
        Ok(Secret {
            id: resource.id,
            meta: String::from_utf8_lossy(&resource.meta).into_owned(),
            payload,
        })
    }

    pub async fn delete(&self, id: RecordId) -> VaultResult<()> {
        self.resources
            .clone()
            .delete(proto::ResourceId { id })
            .await
            .map_err(VaultError::from_status)?;
        debug!(id, "deleted");
        Ok(())
    }

    /// Descriptions of the caller's secrets; `None` lists every kind.
    pub async fn list(&self, kind: Option<ResourceKind>) -> VaultResult<Vec<ResourceDescription>> {
        let query = proto::Query {
            kind: kind.map_or(0, ResourceKind::to_proto),
        };
        let mut stream = self
            .resources
            .clone()
            .list(query)
            .await
            .map_err(VaultError::from_status)?
            .into_inner();

        let mut descriptions = Vec::new();
        while let Some(item) = stream.next().await {
            let item = item.map_err(VaultError::from_status)?;
            let kind = ResourceKind::from_proto(item.kind).ok_or_else(|| {
                VaultError::InvalidArgument(format!("server returned unknown kind {}", item.kind))
            })?;
            descriptions.push(ResourceDescription {
                id: item.id,
                kind,
                meta: item.meta,
            });
        }
        Ok(descriptions)
    }

    /// Stream a local file to the server, encrypting chunk by chunk.
    ///
    /// The record is created when the server sees the first frame. A transfer
    /// that fails later leaves that record behind with a truncated blob.
    pub async fn save_file(&self, path: &Path, meta: &str) -> VaultResult<RecordId> {
        let _operation = self
            .coordinator
            .begin_operation(format!("upload {}", path.display()))?;
        let (source, info) = self.pipeline.start_source(path).await?;
        let first = FileChunk {
            meta: meta.as_bytes().to_vec(),
            data: info.descriptor().encode()?,
        };

        let (tx, rx) = mpsc::channel(1);
        let mut resources = self.resources.clone();
        let call = tokio::spawn(async move { resources.save_file(ReceiverStream::new(rx)).await });

        let sent = send_frames(&self.pipeline, first, source, self.codec.encryptor(), &tx, |f| f).await;

        let summary = match sent {
            Ok(summary) => summary,
            // The server hung up; its status says why.
            Err(VaultError::Stream(reason)) => {
                drop(tx);
                return match call.await {
                    Ok(Err(status)) => Err(VaultError::from_status(status)),
                    _ => Err(VaultError::Stream(reason)),
                };
            }
            Err(e) => {
                // Abort while the sender is still open: the server must see a
                // reset, not a clean end of stream.
                call.abort();
                let _ = call.await;
                drop(tx);
                return Err(e);
            }
        };
        drop(tx);

        let id = call
            .await
            .map_err(|e| VaultError::Stream(format!("upload task: {e}")))?
            .map_err(VaultError::from_status)?
            .into_inner()
            .id;
        info!(
            id,
            path = %path.display(),
            bytes = summary.source_bytes,
            frames = summary.frames,
            "file uploaded"
        );
        Ok(id)
    }

    /// Download a file into the download directory, decrypting on the way.
    ///
    /// Returns the path written. Only the final component of the stored name
    /// is used, so a descriptor cannot point outside the download directory.
    pub async fn get_file(&self, id: RecordId) -> VaultResult<PathBuf> {
        let _operation = self.coordinator.begin_operation(format!("download id={id}"))?;
        let frames = self
            .resources
            .clone()
            .get_file(proto::ResourceId { id })
            .await
            .map_err(VaultError::from_status)?
            .into_inner();

        let download_dir = self.download_dir.clone();
        let received = receive_frames(&self.pipeline, frames, self.codec.decryptor(), |first| async move {
            let descriptor = FileDescriptor::decode(&first.data)?;
            let name = Path::new(&descriptor.name)
                .file_name()
                .ok_or_else(|| {
                    VaultError::InvalidArgument(format!("unusable file name {:?}", descriptor.name))
                })?
                .to_owned();
            let path = download_dir.join(name);
            Ok::<_, VaultError>(((path.clone(), descriptor.size), path))
        })
        .await?;

        let (path, expected) = received.value;
        if received.bytes != expected {
            return Err(VaultError::FileProcessing(format!(
                "{}: received {} bytes, descriptor says {expected}",
                path.display(),
                received.bytes
            )));
        }
        info!(id, path = %path.display(), bytes = received.bytes, "file downloaded");
        Ok(path)
    }

    fn seal(&self, id: RecordId, payload: &Payload, meta: &str) -> VaultResult<proto::Resource> {
        if payload.kind() == ResourceKind::File {
            return Err(VaultError::InvalidArgument(
                "files are stored with save_file".into(),
            ));
        }
        Ok(proto::Resource {
            id,
            kind: payload.kind().to_proto(),
            data: self.codec.encrypt(&payload.encode()?)?,
            meta: meta.as_bytes().to_vec(),
        })
    }
}

fn credentials(login: &str, password: &SecretString) -> proto::Credentials {
    proto::Credentials {
        login: login.to_string(),
        password: password.expose_secret().to_string(),
    }
}
