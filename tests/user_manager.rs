use std::sync::Arc;

use accounts::accounts::{
    clock::ManualClock, memory::MemoryUserStore, password::Argon2Scheme,
    tokens::SequentialTokens, UserError, UserManager,
};
use time::{macros::datetime, Duration};

const IP: &str = "203.0.113.7";
const UA: &str = "integration-test";

struct Harness {
    store: Arc<MemoryUserStore>,
    clock: Arc<ManualClock>,
    users: UserManager,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryUserStore::new());
    let clock = Arc::new(ManualClock::new(datetime!(2024-06-01 09:00 UTC)));
    let users = UserManager::new(store.clone())
        .with_passwords(Arc::new(Argon2Scheme::new(8, 1, 1).unwrap()))
        .with_clock(clock.clone())
        .with_tokens(Arc::new(SequentialTokens::new("tok")));
    Harness {
        store,
        clock,
        users,
    }
}

#[tokio::test]
async fn create_lowercases_and_fills_generated_fields() {
    let h = harness();
    let user = h.users.create("Alice@Example.com", "hunter2").await.unwrap();

    assert!(user.id > 0);
    assert_eq!(user.username, "alice@example.com");
    assert!(!user.verified);
    assert!(!user.verification_code.is_empty());
    assert_ne!(user.password_hash, "hunter2");
    assert_eq!(user.created_at, datetime!(2024-06-01 09:00 UTC));
    assert_eq!(user.updated_at, user.created_at);
}

#[tokio::test]
async fn duplicate_username_in_any_case_is_taken() {
    let h = harness();
    h.users.create("bob@example.com", "password1").await.unwrap();

    let err = h
        .users
        .create("BOB@example.COM", "password2")
        .await
        .unwrap_err();
    match err {
        UserError::UsernameTaken(name) => assert_eq!(name, "bob@example.com"),
        other => panic!("expected UsernameTaken, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_username_is_rejected() {
    let h = harness();
    let err = h.users.create("", "password1").await.unwrap_err();
    assert!(matches!(err, UserError::InvalidUsername));
}

#[tokio::test]
async fn lookups() {
    let h = harness();
    let user = h.users.create("carol@example.com", "password1").await.unwrap();

    assert_eq!(h.users.lookup_by_id(user.id).await.unwrap(), Some(user.clone()));
    assert_eq!(h.users.lookup_by_id(0).await.unwrap(), None);
    assert_eq!(h.users.lookup_by_id(-5).await.unwrap(), None);
    assert_eq!(h.users.lookup_by_id(user.id + 100).await.unwrap(), None);

    assert_eq!(
        h.users.lookup_by_username("carol@example.com").await.unwrap(),
        Some(user)
    );
    assert_eq!(h.users.lookup_by_username("nobody@example.com").await.unwrap(), None);
}

#[tokio::test]
async fn login_does_not_distinguish_failures() {
    let h = harness();
    h.users.create("dave@example.com", "password1").await.unwrap();

    assert!(h.users.login("dave@example.com", "password1").await.unwrap().is_some());
    assert!(h.users.login("DAVE@example.com", "password1").await.unwrap().is_some());
    assert_eq!(h.users.login("dave@example.com", "password2").await.unwrap(), None);
    assert_eq!(h.users.login("eve@example.com", "password1").await.unwrap(), None);
}

#[tokio::test]
async fn verify_is_code_gated_and_idempotent() {
    let h = harness();
    let user = h.users.create("frank@example.com", "password1").await.unwrap();

    h.users.verify(user.id, "not-the-code").await.unwrap();
    assert!(!h.users.lookup_by_id(user.id).await.unwrap().unwrap().verified);

    h.clock.advance(Duration::minutes(5));
    h.users.verify(user.id, &user.verification_code).await.unwrap();
    let verified = h.users.lookup_by_id(user.id).await.unwrap().unwrap();
    assert!(verified.verified);
    assert_eq!(verified.updated_at, datetime!(2024-06-01 09:05 UTC));

    h.users.verify(user.id, &user.verification_code).await.unwrap();
    h.users.verify(9999, &user.verification_code).await.unwrap();
    assert!(h.users.lookup_by_id(user.id).await.unwrap().unwrap().verified);
}

#[tokio::test]
async fn reset_token_for_unknown_user_is_none() {
    let h = harness();
    assert!(h
        .users
        .create_reset_token("ghost@example.com", IP, UA)
        .await
        .unwrap()
        .is_none());
    assert_eq!(h.store.reset_count(), 0);
}

#[tokio::test]
async fn second_reset_request_supersedes_the_first() {
    let h = harness();
    let user = h.users.create("gina@example.com", "password1").await.unwrap();

    let (_, first) = h
        .users
        .create_reset_token("gina@example.com", IP, UA)
        .await
        .unwrap()
        .unwrap();
    let (_, second) = h
        .users
        .create_reset_token("GINA@example.com", IP, UA)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(first, second);

    assert_eq!(h.store.reset_count(), 1);
    let live = h.store.reset_request_for(user.id).unwrap();
    assert_eq!(live.token, second);
    assert_eq!(live.ip_address, IP);
    assert_eq!(live.user_agent, UA);
    assert_eq!(live.expires_at, datetime!(2024-06-02 09:00 UTC));

    assert!(!h.users.reset_password(user.id, &first, "newpass1").await.unwrap());
    assert!(h.users.reset_password(user.id, &second, "newpass1").await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reset_requests_leave_one_live_row() {
    let h = harness();
    let user = h.users.create("nina@example.com", "password1").await.unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let users = h.users.clone();
            tokio::spawn(async move {
                users
                    .create_reset_token("nina@example.com", IP, UA)
                    .await
                    .unwrap()
                    .map(|(_, token)| token)
                    .unwrap()
            })
        })
        .collect();

    let mut issued = Vec::with_capacity(handles.len());
    for handle in handles {
        issued.push(handle.await.unwrap());
    }

    assert_eq!(h.store.reset_count(), 1);
    let live = h.store.reset_request_for(user.id).unwrap();
    assert!(issued.contains(&live.token));

    // Only the surviving token redeems.
    for token in issued.iter().filter(|t| **t != live.token) {
        assert!(!h.users.reset_password(user.id, token, "newpass1").await.unwrap());
    }
    assert!(h.users.reset_password(user.id, &live.token, "newpass1").await.unwrap());
}

#[tokio::test]
async fn reset_is_single_use() {
    let h = harness();
    let user = h.users.create("hank@example.com", "password1").await.unwrap();
    let (_, token) = h
        .users
        .create_reset_token("hank@example.com", IP, UA)
        .await
        .unwrap()
        .unwrap();

    assert!(h.users.reset_password(user.id, &token, "newpass1").await.unwrap());
    assert_eq!(h.store.reset_count(), 0);

    assert!(!h.users.reset_password(user.id, &token, "newpass2").await.unwrap());
    assert!(h.users.login("hank@example.com", "newpass1").await.unwrap().is_some());
    assert!(h.users.login("hank@example.com", "newpass2").await.unwrap().is_none());
}

#[tokio::test]
async fn expired_token_is_rejected() {
    let h = harness();
    let user = h.users.create("iris@example.com", "password1").await.unwrap();
    let (_, token) = h
        .users
        .create_reset_token("iris@example.com", IP, UA)
        .await
        .unwrap()
        .unwrap();

    h.clock.advance(Duration::hours(24));
    assert!(!h.users.reset_password(user.id, &token, "newpass1").await.unwrap());
    assert!(h.users.login("iris@example.com", "password1").await.unwrap().is_some());
}

#[tokio::test]
async fn reset_with_past_expiry_never_matches() {
    let h = harness();
    let user = h.users.create("jack@example.com", "password1").await.unwrap();
    let (_, token) = h
        .users
        .create_reset_token("jack@example.com", IP, UA)
        .await
        .unwrap()
        .unwrap();
    assert!(h.store.set_reset_expiry(user.id, datetime!(2024-05-01 00:00 UTC)));

    assert!(!h.users.reset_password(user.id, &token, "newpass1").await.unwrap());
}

#[tokio::test]
async fn reset_token_is_bound_to_its_user() {
    let h = harness();
    let kim = h.users.create("kim@example.com", "password1").await.unwrap();
    let lee = h.users.create("lee@example.com", "password1").await.unwrap();
    let (_, token) = h
        .users
        .create_reset_token("kim@example.com", IP, UA)
        .await
        .unwrap()
        .unwrap();

    assert!(!h.users.reset_password(lee.id, &token, "newpass1").await.unwrap());
    assert!(!h.users.reset_password(kim.id, "wrong", "newpass1").await.unwrap());
    assert!(h.users.reset_password(kim.id, &token, "newpass1").await.unwrap());
}

#[tokio::test]
async fn custom_reset_ttl_is_applied() {
    let h = harness();
    let users = h.users.clone().with_reset_ttl(Duration::hours(1));
    let user = users.create("mia@example.com", "password1").await.unwrap();
    users
        .create_reset_token("mia@example.com", IP, UA)
        .await
        .unwrap()
        .unwrap();

    let live = h.store.reset_request_for(user.id).unwrap();
    assert_eq!(live.expires_at, datetime!(2024-06-01 10:00 UTC));
}

#[tokio::test]
async fn end_to_end() {
    let h = harness();
    let user = h.users.create("Alice@Example.com", "hunter2").await.unwrap();
    assert_eq!(user.username, "alice@example.com");

    let logged_in = h.users.login("alice@example.com", "hunter2").await.unwrap();
    assert_eq!(logged_in.map(|u| u.id), Some(user.id));
    assert!(h.users.login("alice@example.com", "wrong").await.unwrap().is_none());

    let (reset_user, token) = h
        .users
        .create_reset_token("alice@example.com", IP, UA)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reset_user.id, user.id);

    h.clock.advance(Duration::hours(1));
    assert!(h.users.reset_password(user.id, &token, "newpass1").await.unwrap());

    assert!(h.users.login("alice@example.com", "newpass1").await.unwrap().is_some());
    assert!(h.users.login("alice@example.com", "hunter2").await.unwrap().is_none());

    let stored = h.users.lookup_by_id(user.id).await.unwrap().unwrap();
    assert_eq!(stored.updated_at, datetime!(2024-06-01 10:00 UTC));
    assert_eq!(stored.created_at, user.created_at);
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn issued_credentials_stay_out_of_the_log() {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter("accounts=trace")
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let h = harness();
    let user = h.users.create("olga@example.com", "password1").await.unwrap();
    let (_, token) = h
        .users
        .create_reset_token("olga@example.com", IP, UA)
        .await
        .unwrap()
        .unwrap();
    h.users.verify(user.id, &user.verification_code).await.unwrap();
    assert!(h.users.reset_password(user.id, &token, "newpass1").await.unwrap());

    let out = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
    assert!(out.contains("reset token issued"));
    assert!(!out.contains(&token));
    assert!(!out.contains(&user.verification_code));
    assert!(!out.contains("newpass1"));
}
