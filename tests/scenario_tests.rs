//! End-to-end client session against a fresh gateway.

mod common;

use axum::http::StatusCode;
use common::TestServer;

#[tokio::test]
async fn test_client_session() {
    let server = TestServer::new().await;

    // No parent collection yet.
    assert_eq!(
        server.put("/a/b.txt", "hello").await.status,
        StatusCode::CONFLICT
    );

    server.mkcol_ok("/a").await;
    server.put_ok("/a/b.txt", "hello").await;

    let index = server.get("/a/").await;
    assert_eq!(index.status, StatusCode::OK);
    assert!(index.text().contains(r#"href="/a/b.txt""#));

    let listing = server.propfind("/a", "1").await;
    assert_eq!(listing.status, StatusCode::MULTI_STATUS);
    assert_eq!(listing.response_count(), 2);
    assert!(listing.text().contains("<href>/a/</href>"));
    assert!(listing.text().contains("<href>/a/b.txt</href>"));

    let lock = server.lock("/a/b.txt").await;
    assert_eq!(lock.status, StatusCode::CREATED);
    let token = lock.header("lock-token").expect("Lock-Token").to_string();

    assert_eq!(server.lock("/a/b.txt").await.status, StatusCode::LOCKED);
    assert_eq!(
        server.unlock("/a/b.txt", &token).await.status,
        StatusCode::NO_CONTENT
    );
}

#[tokio::test]
async fn test_reorganise_folder() {
    let server = TestServer::new().await;
    server.mkcol_ok("/inbox").await;
    server.put_ok("/inbox/one.txt", "1").await;
    server.put_ok("/inbox/two.txt", "2").await;
    server.mkcol_ok("/archive").await;

    let moved = server.move_("/inbox", "/archive/2026", &[]).await;
    assert_eq!(moved.status, StatusCode::CREATED);

    assert_eq!(server.propfind("/inbox", "0").await.status, StatusCode::NOT_FOUND);
    let listing = server.propfind("/archive", "infinity").await;
    assert_eq!(listing.response_count(), 4);
    assert_eq!(server.get("/archive/2026/two.txt").await.text(), "2");

    assert_eq!(server.delete("/archive").await.status, StatusCode::NO_CONTENT);
    assert_eq!(server.propfind("/", "infinity").await.response_count(), 1);
}
