use chrono::{DateTime, Utc};
use prior_index::ErrorKind;
use prior_index::backend::{QdrantBackend, VectorIndexBackend};
use prior_index::document::{Document, EmbeddedDocument, Level, sentinel_document};
use testcontainers::ContainerAsync;
use testcontainers::GenericImage;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;

const QDRANT_GRPC_PORT: ContainerPort = ContainerPort::Tcp(6334);

fn qdrant_image() -> GenericImage {
    GenericImage::new("qdrant/qdrant", "v1.16.0")
        .with_wait_for(WaitFor::message_on_stdout("gRPC listening"))
        .with_exposed_port(QDRANT_GRPC_PORT)
}

async fn setup(dimension: u64) -> (String, QdrantBackend, ContainerAsync<GenericImage>) {
    let container = qdrant_image().start().await.unwrap();
    let grpc_port = container.get_host_port_ipv4(6334).await.unwrap();
    let url = format!("http://127.0.0.1:{grpc_port}");
    let store = QdrantBackend::new(&url, None, "issues", dimension).unwrap();
    (url, store, container)
}

fn doc(repo: &str, key: &str, vector: Vec<f32>) -> EmbeddedDocument {
    EmbeddedDocument {
        document: Document {
            key: key.into(),
            text: "text".into(),
            repo: repo.into(),
            author: "octocat".into(),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            level: Level::Issue,
            title: format!("title {key}"),
            url: format!("https://github.com/{repo}/issues/1"),
        },
        vector,
    }
}

fn sentinel(repo: &str) -> EmbeddedDocument {
    EmbeddedDocument {
        document: sentinel_document(repo),
        vector: vec![1.0, 0.0],
    }
}

#[tokio::test]
#[ignore = "requires docker"]
async fn exists_and_search_exclude_sentinel() {
    let (_url, store, _container) = setup(2).await;
    store.ensure_compatible(false).await.unwrap();
    assert!(!store.exists("acme/w").await.unwrap());

    store
        .bulk_index(
            vec![
                doc("acme/w", "issue_1.issue", vec![1.0, 0.0]),
                doc("acme/w", "issue_2.issue", vec![0.0, 1.0]),
                doc("acme/w", "issue_3.issue", vec![0.9, 0.1]),
                sentinel("acme/w"),
            ],
            "acme/w",
        )
        .await
        .unwrap();

    assert!(store.exists("acme/w").await.unwrap());
    let hits = store.search(vec![1.0, 0.0], 5, "acme/w").await.unwrap();
    let keys: Vec<_> = hits.iter().map(|h| h.metadata.key.as_str()).collect();
    assert_eq!(keys, ["issue_1.issue", "issue_3.issue", "issue_2.issue"]);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn repositories_are_isolated() {
    let (_url, store, _container) = setup(2).await;
    store
        .bulk_index(vec![doc("a/x", "issue_1.issue", vec![1.0, 0.0])], "a/x")
        .await
        .unwrap();
    store
        .bulk_index(vec![doc("b/y", "issue_1.issue", vec![1.0, 0.0])], "b/y")
        .await
        .unwrap();
    store
        .bulk_index(vec![doc("a/x", "issue_2.issue", vec![1.0, 0.0])], "a/x")
        .await
        .unwrap();

    assert!(!store.contains("a/x", "issue_1.issue").await.unwrap());
    assert!(store.contains("a/x", "issue_2.issue").await.unwrap());
    assert!(store.contains("b/y", "issue_1.issue").await.unwrap());

    store.delete("b/y", "issue_1.issue").await.unwrap();
    assert!(!store.contains("b/y", "issue_1.issue").await.unwrap());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn dimension_change_needs_force() {
    let (url, small, _container) = setup(2).await;
    small.ensure_compatible(false).await.unwrap();
    small
        .upsert(vec![doc("a/x", "issue_1.issue", vec![1.0, 0.0])], "a/x")
        .await
        .unwrap();

    let large = QdrantBackend::new(&url, None, "issues", 3).unwrap();
    let err = large.ensure_compatible(false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DimensionMismatch);

    large.ensure_compatible(true).await.unwrap();
    assert!(!large.contains("a/x", "issue_1.issue").await.unwrap());
    large
        .upsert(
            vec![doc("a/x", "issue_1.issue", vec![1.0, 0.0, 0.0])],
            "a/x",
        )
        .await
        .unwrap();
}
