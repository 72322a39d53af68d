//! LOCK / UNLOCK behaviour.

mod common;

use axum::http::StatusCode;
use common::TestServer;

fn token_of(header: &str) -> &str {
    header
        .strip_prefix('<')
        .and_then(|rest| rest.strip_suffix('>'))
        .expect("Lock-Token is wrapped in angle brackets")
}

#[tokio::test]
async fn test_lock_returns_token_and_discovery() {
    let server = TestServer::new().await;
    server.put_ok("/doc.txt", "locked").await;

    let lock = server.lock("/doc.txt").await;
    assert_eq!(lock.status, StatusCode::CREATED);
    assert_eq!(lock.header("content-type"), Some("text/xml; charset=utf-8"));

    let header = lock.header("lock-token").expect("Lock-Token header");
    let token = token_of(header);
    assert!(token.starts_with("opaquelocktoken:"));

    let body = lock.text();
    assert!(body.contains(r#"<prop xmlns="DAV:">"#));
    assert!(body.contains(&format!("<locktoken><href>{token}</href></locktoken>")));
    assert!(body.contains("<lockroot><href>/doc.txt</href></lockroot>"));
    assert!(body.contains("mailto:tester@example.com"));
    assert!(body.contains("<timeout>Second-600</timeout>"));
}

#[tokio::test]
async fn test_second_lock_is_refused_until_unlock() {
    let server = TestServer::new().await;
    server.put_ok("/doc.txt", "x").await;

    let first = server.lock("/doc.txt").await;
    assert_eq!(first.status, StatusCode::CREATED);
    assert_eq!(server.lock("/doc.txt").await.status, StatusCode::LOCKED);

    let header = first.header("lock-token").expect("token").to_string();
    assert_eq!(
        server.unlock("/doc.txt", &header).await.status,
        StatusCode::NO_CONTENT
    );
    assert_eq!(server.lock("/doc.txt").await.status, StatusCode::CREATED);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_locks_grant_one() {
    for _ in 0..20 {
        let server = TestServer::new().await;
        server.put_ok("/doc.txt", "x").await;

        let (first, second) = tokio::join!(server.lock("/doc.txt"), server.lock("/doc.txt"));
        let mut statuses = [first.status, second.status];
        statuses.sort_by_key(|status| status.as_u16());
        assert_eq!(statuses, [StatusCode::CREATED, StatusCode::LOCKED]);

        let winner = if first.status == StatusCode::CREATED {
            first
        } else {
            second
        };
        let token = token_of(winner.header("lock-token").expect("token")).to_string();
        let listing = server.propfind("/doc.txt", "0").await;
        assert!(listing.text().contains(&token));
    }
}

#[tokio::test]
async fn test_unlock_ignores_token_and_missing_locks() {
    let server = TestServer::new().await;
    server.put_ok("/doc.txt", "x").await;
    server.lock("/doc.txt").await;

    let unlock = server
        .unlock("/doc.txt", "<opaquelocktoken:someone-else>")
        .await;
    assert_eq!(unlock.status, StatusCode::NO_CONTENT);
    assert_eq!(server.lock("/doc.txt").await.status, StatusCode::CREATED);

    let never_locked = server.unlock("/other.txt", "<x>").await;
    assert_eq!(never_locked.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_incomplete_lock_body_is_rejected() {
    let server = TestServer::new().await;
    server.put_ok("/doc.txt", "x").await;

    let empty = server.request("LOCK", "/doc.txt", &[], "").await;
    assert_eq!(empty.status, StatusCode::PRECONDITION_REQUIRED);

    let no_owner = r#"<?xml version="1.0"?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:exclusive/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
</D:lockinfo>"#;
    let response = server.request("LOCK", "/doc.txt", &[], no_owner).await;
    assert_eq!(response.status, StatusCode::PRECONDITION_REQUIRED);

    let garbage = server.request("LOCK", "/doc.txt", &[], "<lockinfo>").await;
    assert_eq!(garbage.status, StatusCode::PRECONDITION_REQUIRED);

    // Nothing was recorded by the failed attempts.
    assert_eq!(server.lock("/doc.txt").await.status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_root_lock_is_never_recorded() {
    let server = TestServer::new().await;

    let first = server.lock("/").await;
    assert_eq!(first.status, StatusCode::CREATED);
    assert!(first.text().contains("<lockroot><href>/</href></lockroot>"));
    assert_eq!(server.lock("/").await.status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_locks_are_advisory() {
    let server = TestServer::new().await;
    server.put_ok("/doc.txt", "before").await;
    server.lock("/doc.txt").await;

    server.put_ok("/doc.txt", "after").await;
    assert_eq!(server.get("/doc.txt").await.text(), "after");
    assert_eq!(server.delete("/doc.txt").await.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_propfind_reports_active_lock() {
    let server = TestServer::new().await;
    server.put_ok("/doc.txt", "x").await;
    server.put_ok("/free.txt", "y").await;

    let lock = server.lock("/doc.txt").await;
    let token = token_of(lock.header("lock-token").expect("token")).to_string();

    let locked = server.propfind("/doc.txt", "0").await.text();
    assert!(locked.contains("<lockdiscovery><activelock>"));
    assert!(locked.contains(&token));

    let free = server.propfind("/free.txt", "0").await.text();
    assert!(!free.contains("lockdiscovery"));
}
