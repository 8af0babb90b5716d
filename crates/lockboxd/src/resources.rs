//! `Resources` gRPC service.
//!
//! Small secrets (login/password, bank card) are plain unary calls: their
//! `data` is ciphertext the client produced and goes to the record store as
//! is. Files stream: the first frame becomes the record (its descriptor is the
//! only plaintext the server keeps), every later frame is appended verbatim to
//! the blob for that record id.

use std::sync::Arc;

use lockbox_core::proto::{self, resources_server::Resources, FileChunk};
use lockbox_core::types::{FileDescriptor, ResourceKind, ResourceRecord};
use lockbox_core::VaultError;
use lockbox_storage::{BlobLayout, ResourceStore};
use lockbox_transfer::{receive_frames, send_frames, Passthrough, Pipeline, ShutdownCoordinator};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{info, warn};

use crate::auth::principal;
use crate::metrics::{Direction, TransferMetrics};

pub struct ResourcesService {
    store: Arc<dyn ResourceStore>,
    blobs: BlobLayout,
    pipeline: Pipeline,
    coordinator: Arc<ShutdownCoordinator>,
    metrics: TransferMetrics,
}

impl ResourcesService {
    /// `pipeline` should carry the server's blob size limit.
    pub fn new(
        store: Arc<dyn ResourceStore>,
        blobs: BlobLayout,
        pipeline: Pipeline,
        coordinator: Arc<ShutdownCoordinator>,
        metrics: TransferMetrics,
    ) -> Self {
        Self {
            store,
            blobs,
            pipeline,
            coordinator,
            metrics,
        }
    }
}

fn parse_kind(value: i32) -> Result<ResourceKind, Status> {
    ResourceKind::from_proto(value)
        .ok_or_else(|| Status::invalid_argument(format!("unknown resource kind {value}")))
}

fn small_kind(value: i32) -> Result<ResourceKind, Status> {
    match parse_kind(value)? {
        ResourceKind::File => Err(Status::invalid_argument(
            "file resources go through SaveFile/GetFile",
        )),
        kind => Ok(kind),
    }
}

#[tonic::async_trait]
impl Resources for ResourcesService {
    async fn save(
        &self,
        request: Request<proto::Resource>,
    ) -> Result<Response<proto::ResourceId>, Status> {
        let owner = principal(&request)?;
        let resource = request.into_inner();
        let kind = small_kind(resource.kind)?;

        let id = self.store.create(ResourceRecord {
            id: 0,
            owner_id: owner,
            kind,
            meta: resource.meta,
            data: resource.data,
        })?;

        info!(id, owner, %kind, "resource saved");
        Ok(Response::new(proto::ResourceId { id }))
    }

    async fn update(
        &self,
        request: Request<proto::Resource>,
    ) -> Result<Response<proto::Empty>, Status> {
        let owner = principal(&request)?;
        let resource = request.into_inner();
        let kind = small_kind(resource.kind)?;

        let existing = self.store.get(resource.id, owner)?;
        if existing.kind != kind {
            return Err(Status::invalid_argument(format!(
                "resource {} is {}, not {kind}",
                resource.id, existing.kind
            )));
        }
        self.store.update(ResourceRecord {
            id: resource.id,
            owner_id: owner,
            kind,
            meta: resource.meta,
            data: resource.data,
        })?;

        info!(id = resource.id, owner, %kind, "resource updated");
        Ok(Response::new(proto::Empty {}))
    }

    async fn delete(
        &self,
        request: Request<proto::ResourceId>,
    ) -> Result<Response<proto::Empty>, Status> {
        let owner = principal(&request)?;
        let id = request.into_inner().id;

        let removed = self.store.delete(id, owner)?;
        if removed.kind == ResourceKind::File {
            self.blobs.remove(id).await?;
        }

        info!(id, owner, kind = %removed.kind, "resource deleted");
        Ok(Response::new(proto::Empty {}))
    }

    async fn get(
        &self,
        request: Request<proto::ResourceId>,
    ) -> Result<Response<proto::Resource>, Status> {
        let owner = principal(&request)?;
        let id = request.into_inner().id;
        let record = self.store.get(id, owner)?;

        Ok(Response::new(proto::Resource {
            id: record.id,
            kind: record.kind.to_proto(),
            data: record.data,
            meta: record.meta,
        }))
    }

    type ListStream = tokio_stream::Iter<std::vec::IntoIter<Result<proto::ResourceDescription, Status>>>;

    async fn list(
        &self,
        request: Request<proto::Query>,
    ) -> Result<Response<Self::ListStream>, Status> {
        let owner = principal(&request)?;
        let query = request.into_inner();
        let kind = match query.kind {
            0 => None,
            value => Some(parse_kind(value)?),
        };

        let descriptions = self
            .store
            .list_by_kind(owner, kind)?
            .into_iter()
            .map(|d| {
                Ok(proto::ResourceDescription {
                    id: d.id,
                    kind: d.kind.to_proto(),
                    meta: d.meta,
                })
            })
            .collect::<Vec<_>>();

        Ok(Response::new(tokio_stream::iter(descriptions)))
    }

    async fn save_file(
        &self,
        request: Request<Streaming<FileChunk>>,
    ) -> Result<Response<proto::ResourceId>, Status> {
        let owner = principal(&request)?;
        let _operation = self
            .coordinator
            .begin_operation(format!("save-file owner={owner}"))?;
        let tracker = self.metrics.begin(Direction::Upload);

        let store = self.store.clone();
        let blobs = self.blobs.clone();
        let result = receive_frames(
            &self.pipeline,
            request.into_inner(),
            Passthrough,
            move |first| async move {
                let size = FileDescriptor::decode(&first.data)?.size;
                let id = store.create(ResourceRecord {
                    id: 0,
                    owner_id: owner,
                    kind: ResourceKind::File,
                    meta: first.meta,
                    data: first.data,
                })?;
                Ok::<_, VaultError>(((id, size), blobs.path_for(id)))
            },
        )
        .await
        .and_then(|received| {
            // Ciphertext is never shorter than the plaintext it encodes.
            let (id, size) = received.value;
            if received.bytes < size {
                return Err(VaultError::FileProcessing(format!(
                    "upload {id} truncated: {} of {size} bytes",
                    received.bytes
                )));
            }
            Ok(received)
        });
        tracker.finish(result.as_ref().map(|r| r.bytes));

        let received = result.inspect_err(|e| warn!(owner, "file upload failed: {e}"))?;
        let (id, _) = received.value;
        info!(
            id,
            owner,
            frames = received.frames,
            bytes = received.bytes,
            "file saved"
        );
        Ok(Response::new(proto::ResourceId { id }))
    }

    type GetFileStream = ReceiverStream<Result<FileChunk, Status>>;

    async fn get_file(
        &self,
        request: Request<proto::ResourceId>,
    ) -> Result<Response<Self::GetFileStream>, Status> {
        let owner = principal(&request)?;
        let id = request.into_inner().id;
        let operation = self
            .coordinator
            .begin_operation(format!("get-file id={id}"))?;

        let record = self.store.get(id, owner)?;
        if record.kind != ResourceKind::File {
            return Err(Status::invalid_argument(format!(
                "resource {id} is {}, not a file",
                record.kind
            )));
        }
        let (source, _) = self
            .pipeline
            .start_source(&self.blobs.path_for(id))
            .await
            .map_err(VaultError::from)?;

        let first = FileChunk {
            meta: record.meta,
            data: record.data,
        };
        let (tx, rx) = mpsc::channel(1);
        let pipeline = self.pipeline.clone();
        let tracker = self.metrics.begin(Direction::Download);

        tokio::spawn(async move {
            let _operation = operation;
            let result = send_frames(&pipeline, first, source, Passthrough, &tx, Ok::<_, Status>).await;
            tracker.finish(result.as_ref().map(|s| s.bytes));
            match result {
                Ok(summary) => info!(
                    id,
                    owner,
                    frames = summary.frames,
                    bytes = summary.bytes,
                    "file sent"
                ),
                Err(e) => {
                    warn!(id, owner, "file download failed: {e}");
                    let _ = tx.send(Err(Status::from(e))).await;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
