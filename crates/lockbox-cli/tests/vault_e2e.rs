//! Client against an in-process lockboxd over a Unix socket.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use argon2::Params;
use lockbox_cli::connect::connect_unix;
use lockbox_cli::{Session, VaultClient};
use lockbox_core::config::ShutdownConfig;
use lockbox_core::types::{
    BankCard, FileDescriptor, LoginPassword, Payload, ResourceKind,
};
use lockbox_core::VaultError;
use lockbox_crypto::{Codec, KeyPair};
use lockbox_storage::{BlobLayout, RecordStore, ResourceStore, UserStore};
use lockbox_transfer::{Pipeline, ShutdownCoordinator};
use lockboxd::auth::{AuthInterceptor, AuthService, TokenRegistry};
use lockboxd::grpc::{self, Endpoint};
use lockboxd::metrics::TransferMetrics;
use lockboxd::resources::ResourcesService;
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use secrecy::SecretString;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const CLIENT_KEY: &str = include_str!("../../lockbox-crypto/testdata/client-key.pem");
const SMALL_KEY: &str = include_str!("../../lockbox-crypto/testdata/small-key.pem");
const MAX_SIZE: u64 = 1 << 20;
const HANDOFF: Duration = Duration::from_secs(5);

struct Harness {
    tmp: TempDir,
    socket: PathBuf,
    store: Arc<RecordStore>,
    blobs: BlobLayout,
    chunk_size: usize,
    registry: Registry,
    server: Arc<ShutdownCoordinator>,
    stop: CancellationToken,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

impl Harness {
    async fn start(chunk_size: usize) -> Self {
        let tmp = TempDir::new().unwrap();
        let socket = tmp.path().join("lockboxd.sock");
        let blobs = BlobLayout::new(tmp.path().join("blobs"));
        blobs.ensure().await.unwrap();

        let store = Arc::new(RecordStore::in_memory());
        let users = Arc::new(UserStore::in_memory().with_params(Params::new(8, 1, 1, None).unwrap()));
        let tokens = TokenRegistry::default();
        let mut registry = Registry::default();
        let server = Arc::new(ShutdownCoordinator::new(&ShutdownConfig::default()));
        let resources = ResourcesService::new(
            store.clone(),
            blobs.clone(),
            Pipeline::with_limits(chunk_size, MAX_SIZE, HANDOFF),
            server.clone(),
            TransferMetrics::register(&mut registry),
        );
        let router = grpc::router(
            AuthService::new(users, tokens.clone()),
            resources,
            AuthInterceptor::new(tokens),
        );

        let stop = CancellationToken::new();
        let endpoint = Endpoint::Unix(socket.clone());
        let server_stop = stop.clone();
        tokio::spawn(async move { grpc::serve(&endpoint, router, server_stop).await });

        for _ in 0..200 {
            if socket.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(socket.exists(), "server did not bind {}", socket.display());

        Self {
            tmp,
            socket,
            store,
            blobs,
            chunk_size,
            registry,
            server,
            stop,
        }
    }

    fn metrics_text(&self) -> String {
        let mut body = String::new();
        encode(&mut body, &self.registry).unwrap();
        body
    }

    fn downloads(&self) -> PathBuf {
        let dir = self.tmp.path().join("downloads");
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    async fn client(&self, codec: Codec) -> VaultClient {
        let channel = connect_unix(&self.socket).await.unwrap();
        VaultClient::new(
            channel,
            Session::default(),
            codec,
            Pipeline::with_limits(self.chunk_size, MAX_SIZE, HANDOFF),
            Arc::new(ShutdownCoordinator::new(&ShutdownConfig::default())),
            self.downloads(),
        )
    }

    async fn user(&self, login: &str) -> VaultClient {
        let client = self.client(encrypting()).await;
        client.register(login, &password("s3cret")).await.unwrap();
        client
    }

    fn write_file(&self, name: &str, content: &[u8]) -> PathBuf {
        let dir = self.tmp.path().join("uploads");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }
}

fn encrypting() -> Codec {
    Codec::new(KeyPair::from_pem(CLIENT_KEY).unwrap())
}

fn password(s: &str) -> SecretString {
    SecretString::from(s.to_string())
}

fn alice_login() -> Payload {
    Payload::LoginPassword(LoginPassword {
        login: "alice".into(),
        password: "s3cret".into(),
    })
}

fn blob_len(blobs: &BlobLayout, id: i64) -> u64 {
    std::fs::metadata(blobs.path_for(id)).unwrap().len()
}

#[tokio::test]
async fn test_login_password_is_ciphertext_at_rest() {
    let h = Harness::start(64 * 1024).await;
    let client = h.user("alice").await;

    let id = client.save(&alice_login(), "personal").await.unwrap();

    // first registered user has id 1
    let stored = h.store.get(id, 1).unwrap();
    let plaintext = alice_login().encode().unwrap();
    assert_eq!(stored.meta, b"personal");
    assert_ne!(stored.data, plaintext);
    assert!(!stored.data.windows(6).any(|w| w == b"s3cret"));
    assert_eq!(stored.data.len(), 256);

    let secret = client.get(id).await.unwrap();
    assert_eq!(secret.payload, alice_login());
    assert_eq!(secret.meta, "personal");
    assert_eq!(secret.kind(), ResourceKind::LoginPassword);
    assert!(secret.render().contains("password: s3cret"));
}

#[tokio::test]
async fn test_small_file_roundtrip() {
    let h = Harness::start(64 * 1024).await;
    let client = h.user("alice").await;
    let path = h.write_file("note.txt", b"0123456789");

    let id = client.save_file(&path, "notes").await.unwrap();

    // one plaintext block becomes one cipher block
    assert_eq!(blob_len(&h.blobs, id), 256);
    let secret = client.get(id).await.unwrap();
    assert_eq!(
        secret.payload,
        Payload::File(FileDescriptor {
            name: "note.txt".into(),
            extension: ".txt".into(),
            size: 10,
        })
    );

    let downloaded = client.get_file(id).await.unwrap();
    assert_eq!(downloaded, h.downloads().join("note.txt"));
    assert_eq!(std::fs::read(&downloaded).unwrap(), b"0123456789");
}

#[tokio::test]
async fn test_multi_chunk_file_roundtrip() {
    // chunks deliberately not aligned to 128-byte blocks
    let h = Harness::start(100).await;
    let client = h.user("alice").await;
    let content: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 251) as u8).collect();
    let path = h.write_file("data.bin", &content);

    let id = client.save_file(&path, "").await.unwrap();
    assert_eq!(blob_len(&h.blobs, id), 8 * 256);

    let downloaded = client.get_file(id).await.unwrap();
    assert_eq!(std::fs::read(&downloaded).unwrap(), content);
}

#[tokio::test]
async fn test_empty_file_roundtrip() {
    let h = Harness::start(64 * 1024).await;
    let client = h.user("alice").await;
    let path = h.write_file("empty", b"");

    let id = client.save_file(&path, "").await.unwrap();
    assert_eq!(blob_len(&h.blobs, id), 0);

    let downloaded = client.get_file(id).await.unwrap();
    assert!(std::fs::read(&downloaded).unwrap().is_empty());
}

#[tokio::test]
async fn test_foreign_user_sees_not_found() {
    let h = Harness::start(64 * 1024).await;
    let alice = h.user("alice").await;
    let bob = h.user("bob").await;

    let secret_id = alice.save(&alice_login(), "personal").await.unwrap();
    let file_id = alice
        .save_file(&h.write_file("a.txt", b"alice only"), "")
        .await
        .unwrap();

    assert!(matches!(bob.get(secret_id).await, Err(VaultError::NotFound)));
    assert!(matches!(bob.get_file(file_id).await, Err(VaultError::NotFound)));
    assert!(matches!(bob.delete(secret_id).await, Err(VaultError::NotFound)));
    assert!(matches!(
        bob.update(secret_id, &alice_login(), "mine now").await,
        Err(VaultError::NotFound)
    ));
    assert!(bob.list(None).await.unwrap().is_empty());

    // alice's data is untouched
    assert_eq!(alice.get(secret_id).await.unwrap().meta, "personal");
}

#[tokio::test]
async fn test_requests_without_token_are_unauthenticated() {
    let h = Harness::start(64 * 1024).await;
    let anonymous = h.client(encrypting()).await;

    assert!(matches!(
        anonymous.save(&alice_login(), "").await,
        Err(VaultError::Unauthenticated(_))
    ));
    assert!(matches!(
        anonymous.list(None).await,
        Err(VaultError::Unauthenticated(_))
    ));

    anonymous.session().set("not-a-real-token");
    assert!(matches!(
        anonymous.get(1).await,
        Err(VaultError::Unauthenticated(_))
    ));
}

#[tokio::test]
async fn test_register_and_login() {
    let h = Harness::start(64 * 1024).await;
    let first = h.user("alice").await;
    let id = first.save(&alice_login(), "").await.unwrap();

    assert!(matches!(
        h.client(encrypting()).await.register("alice", &password("other")).await,
        Err(VaultError::AlreadyExists(_))
    ));

    let second = h.client(encrypting()).await;
    assert!(matches!(
        second.login("alice", &password("wrong")).await,
        Err(VaultError::Unauthenticated(_))
    ));
    second.login("alice", &password("s3cret")).await.unwrap();
    assert!(second.session().token().is_some());
    assert_eq!(second.get(id).await.unwrap().payload, alice_login());
}

#[tokio::test]
async fn test_update_list_and_delete() {
    let h = Harness::start(64 * 1024).await;
    let client = h.user("alice").await;

    let card = Payload::BankCard(BankCard {
        number: "4111111111111111".into(),
        expire_at: "12/27".into(),
        name: "Alice".into(),
        surname: "Liddell".into(),
    });
    let lp_id = client.save(&alice_login(), "mail").await.unwrap();
    let card_id = client.save(&card, "visa").await.unwrap();
    let file_id = client
        .save_file(&h.write_file("scan.pdf", b"%PDF-1.4"), "passport")
        .await
        .unwrap();

    let all = client.list(None).await.unwrap();
    assert_eq!(
        all.iter().map(|d| d.id).collect::<Vec<_>>(),
        vec![lp_id, card_id, file_id]
    );
    let cards = client.list(Some(ResourceKind::BankCard)).await.unwrap();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].to_string(), format!("[{card_id}]: bc - visa"));

    let changed = Payload::LoginPassword(LoginPassword {
        login: "alice".into(),
        password: "n3w-s3cret".into(),
    });
    client.update(lp_id, &changed, "mail (rotated)").await.unwrap();
    let secret = client.get(lp_id).await.unwrap();
    assert_eq!(secret.payload, changed);
    assert_eq!(secret.meta, "mail (rotated)");

    // kind cannot change through update
    assert!(matches!(
        client.update(lp_id, &card, "").await,
        Err(VaultError::InvalidArgument(_))
    ));

    client.delete(file_id).await.unwrap();
    assert!(!h.blobs.path_for(file_id).exists());
    assert!(matches!(client.get(file_id).await, Err(VaultError::NotFound)));
    assert_eq!(client.list(None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_file_payload_rejected_by_save() {
    let h = Harness::start(64 * 1024).await;
    let client = h.user("alice").await;
    let descriptor = Payload::File(FileDescriptor::for_path(Path::new("x.txt"), 1));
    assert!(matches!(
        client.save(&descriptor, "").await,
        Err(VaultError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_oversized_upload_rejected_before_any_frame() {
    let h = Harness::start(64 * 1024).await;
    let client = h.user("alice").await;
    let path = h.write_file("big.bin", &vec![0u8; MAX_SIZE as usize + 1]);

    assert!(matches!(
        client.save_file(&path, "").await,
        Err(VaultError::FileProcessing(_))
    ));
    assert!(client.list(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_identity_codec_stores_plaintext() {
    let h = Harness::start(64 * 1024).await;
    let client = h.client(Codec::identity()).await;
    client.register("carol", &password("pw")).await.unwrap();

    let id = client.save(&alice_login(), "").await.unwrap();
    assert_eq!(h.store.get(id, 1).unwrap().data, alice_login().encode().unwrap());
    assert_eq!(client.get(id).await.unwrap().payload, alice_login());
}

#[tokio::test]
async fn test_client_rejects_transfers_after_shutdown() {
    let h = Harness::start(64 * 1024).await;
    let channel = connect_unix(&h.socket).await.unwrap();
    let coordinator = Arc::new(ShutdownCoordinator::new(&ShutdownConfig::default()));
    let client = VaultClient::new(
        channel,
        Session::default(),
        encrypting(),
        Pipeline::with_limits(h.chunk_size, MAX_SIZE, HANDOFF),
        coordinator.clone(),
        h.downloads(),
    );
    client.register("alice", &password("s3cret")).await.unwrap();

    coordinator.request_shutdown().await;
    assert!(matches!(
        client.save_file(&h.write_file("late.txt", b"late"), "").await,
        Err(VaultError::ShuttingDown)
    ));
    assert!(matches!(client.get_file(1).await, Err(VaultError::ShuttingDown)));
    assert_eq!(coordinator.in_flight(), 0);
}

#[tokio::test]
async fn test_failed_upload_is_never_recorded_as_success() {
    let h = Harness::start(64).await;
    let client = h
        .client(Codec::new(KeyPair::from_pem(SMALL_KEY).unwrap()))
        .await;
    client.register("alice", &password("s3cret")).await.unwrap();
    let path = h.write_file("doomed.bin", &[3u8; 200]);

    // The key cannot hold a full block, so the first chunk fails after the
    // descriptor frame is already queued.
    for _ in 0..10 {
        assert!(matches!(
            client.save_file(&path, "").await,
            Err(VaultError::Crypto(_))
        ));
    }

    for _ in 0..200 {
        if h.server.in_flight() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.server.in_flight(), 0);

    let metrics = h.metrics_text();
    assert!(
        !metrics.contains(r#"lockbox_transfers_total{direction="Upload",outcome="Ok"}"#),
        "{metrics}"
    );
    assert!(metrics.contains("lockbox_transfers_in_flight 0"), "{metrics}");
}
