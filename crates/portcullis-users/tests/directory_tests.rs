//! Directory lookup scenarios and concurrency behavior.

use portcullis_users::{AuthError, UserDirectory, UserStore};
use tokio::task::JoinSet;

async fn seeded_directory() -> UserDirectory {
    let directory = UserDirectory::new();
    directory.add("alice", "s3cret").await;
    directory.add_origin("alice", "10.0.0.0/24").await.unwrap();
    directory
}

#[tokio::test]
async fn lookup_succeeds_inside_the_allowed_prefix() {
    let directory = seeded_directory().await;

    let user = directory
        .find_user("alice", "s3cret", "10.0.0.5:4444")
        .await
        .unwrap();
    assert_eq!(user.username(), "alice");
}

#[tokio::test]
async fn lookup_denies_origins_outside_the_prefix() {
    let directory = seeded_directory().await;

    let verdict = directory.find_user("alice", "s3cret", "11.0.0.5:4444").await;
    assert_eq!(verdict.unwrap_err(), AuthError::OriginDenied);
}

#[tokio::test]
async fn wrong_secret_reports_credential_mismatch_even_with_valid_origin() {
    let directory = seeded_directory().await;

    let verdict = directory.find_user("alice", "wrong", "10.0.0.5:4444").await;
    assert_eq!(verdict.unwrap_err(), AuthError::BadCredential);
}

#[tokio::test]
async fn allow_any_admits_both_address_families() {
    let directory = seeded_directory().await;
    directory.add_origin("alice", "*").await.unwrap();

    assert!(directory.find_user("alice", "s3cret", "::1").await.is_ok());
    assert!(
        directory
            .find_user("alice", "s3cret", "203.0.113.77")
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn removed_users_are_not_found() {
    let directory = seeded_directory().await;
    directory.remove("alice").await;

    let verdict = directory.find_user("alice", "s3cret", "10.0.0.5").await;
    assert_eq!(verdict.unwrap_err(), AuthError::NotFound);
}

#[tokio::test]
async fn added_origins_match_until_removed() {
    let directory = UserDirectory::new();
    directory.add("bob", "pw").await;

    for spec in ["192.0.2.1", "198.51.100.0/25", "2001:db8::/48"] {
        directory.add_origin("bob", spec).await.unwrap();
    }

    let user = directory.get("bob").await.unwrap();
    assert!(user.matches_origin("192.0.2.1".parse().unwrap()));
    assert!(user.matches_origin("198.51.100.77".parse().unwrap()));
    assert!(user.matches_origin("2001:db8::9".parse().unwrap()));

    for spec in ["192.0.2.1", "198.51.100.0/25", "2001:db8::/48"] {
        directory.remove_origin("bob", spec).await.unwrap();
    }

    let user = directory.get("bob").await.unwrap();
    assert!(!user.matches_origin("192.0.2.1".parse().unwrap()));
    assert!(!user.matches_origin("198.51.100.77".parse().unwrap()));
    assert!(!user.matches_origin("2001:db8::9".parse().unwrap()));
}

#[tokio::test]
async fn malformed_origin_addresses_are_denied() {
    let directory = seeded_directory().await;
    directory.add_origin("alice", "*").await.unwrap();

    // Allow-any still requires a parseable address.
    let verdict = directory.find_user("alice", "s3cret", "not-an-address").await;
    assert_eq!(verdict.unwrap_err(), AuthError::OriginDenied);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_mutations_lose_no_updates() {
    let directory = std::sync::Arc::new(UserDirectory::new());

    // 100 users added concurrently; every third one removed again.
    let mut tasks = JoinSet::new();
    for i in 0..100 {
        let directory = directory.clone();
        tasks.spawn(async move {
            let name = format!("user-{i}");
            directory.add(&name, "pw").await;
            directory.add_origin(&name, "*").await.unwrap();
            directory.get(&name).await.expect("just added");
            if i % 3 == 0 {
                directory.remove(&name).await;
            }
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }

    let remaining = directory.list().await;
    assert_eq!(remaining.len(), 100 - 34);
    for i in 0..100 {
        let name = format!("user-{i}");
        let present = directory.get(&name).await.is_some();
        assert_eq!(present, i % 3 != 0, "unexpected state for {name}");
    }
}
