//! Session lifecycle tests against the in-memory KMS.

use std::{
    collections::BTreeSet,
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use sealpair_client::{
    AuthError, AuthService, AuthToken, EncryptedPayload, KmsError, LookupResult, PublicKey,
    RegisterOutcome, Session, SessionConfig, SessionError, SessionState,
};
use sealpair_kms::{
    KmsJwt, KmsToken, SeededEnv,
    memory::{MemoryCloud, MemoryKmsConfig},
};

const SECRET: &[u8] = b"session test secret";

/// In-process authentication service minting KMS tokens directly.
struct LocalAuth {
    jwt: KmsJwt,
    allowed: BTreeSet<String>,
    exchanges: AtomicUsize,
    stall: AtomicBool,
}

impl LocalAuth {
    fn new(allowed: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            jwt: KmsJwt::new(SECRET),
            allowed: allowed.iter().map(ToString::to_string).collect(),
            exchanges: AtomicUsize::new(0),
            stall: AtomicBool::new(false),
        })
    }

    fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthService for LocalAuth {
    async fn authenticate(&self, identity: &str) -> Result<AuthToken, AuthError> {
        if !self.allowed.contains(identity) {
            return Err(AuthError::Rejected { status: 403, reason: "unknown identity".into() });
        }
        Ok(AuthToken::new(format!("bearer-{identity}")))
    }

    async fn kms_token(&self, auth_token: &AuthToken) -> Result<KmsToken, AuthError> {
        if self.stall.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        let identity = auth_token
            .as_str()
            .strip_prefix("bearer-")
            .ok_or(AuthError::Rejected { status: 401, reason: "Unauthorized".into() })?;

        self.exchanges.fetch_add(1, Ordering::SeqCst);
        self.jwt
            .issue(identity, Duration::from_secs(60))
            .map_err(|e| AuthError::InvalidResponse { reason: e.to_string() })
    }
}

fn cloud() -> MemoryCloud<SeededEnv> {
    MemoryCloud::new(
        SeededEnv::with_seed(7),
        KmsJwt::new(SECRET),
        MemoryKmsConfig { backup_rounds: 1_000 },
    )
}

fn session(
    identity: &str,
    auth: &Arc<LocalAuth>,
    cloud: &MemoryCloud<SeededEnv>,
) -> Session<MemoryCloud<SeededEnv>> {
    Session::new(identity, auth.clone(), cloud.clone())
}

async fn registered(
    identity: &str,
    auth: &Arc<LocalAuth>,
    cloud: &MemoryCloud<SeededEnv>,
) -> Session<MemoryCloud<SeededEnv>> {
    let mut session = session(identity, auth, cloud);
    session.initialize().await.unwrap();
    session.register().await.unwrap();
    session
}

#[tokio::test]
async fn operations_require_initialize() {
    let auth = LocalAuth::new(&["Alice"]);
    let mut alice = session("Alice", &auth, &cloud());

    assert_eq!(alice.state(), SessionState::Uninitialized);
    assert!(matches!(alice.register().await, Err(SessionError::Precondition { .. })));
    assert!(matches!(
        alice.lookup_public_keys(&["Bob"]).await,
        Err(SessionError::Precondition { .. })
    ));
    assert!(matches!(alice.has_local_private_key().await, Err(SessionError::Precondition { .. })));
    assert!(matches!(alice.backup_private_key("pw").await, Err(SessionError::Precondition { .. })));
    assert!(matches!(alice.cleanup().await, Err(SessionError::Precondition { .. })));
    assert!(matches!(alice.unregister().await, Err(SessionError::Precondition { .. })));

    let bob_key = PublicKey::new("Bob", [1; 32], [2; 32]);
    let recipients: LookupResult = [bob_key.clone()].into_iter().collect();
    let payload = EncryptedPayload::from(vec![0; 64]);
    assert!(matches!(alice.encrypt("hi", &recipients).await, Err(SessionError::Precondition { .. })));
    assert!(matches!(alice.decrypt(&payload, &bob_key).await, Err(SessionError::Precondition { .. })));
    assert!(matches!(
        alice.change_password("pw", "new").await,
        Err(SessionError::Precondition { .. })
    ));
    assert!(matches!(alice.restore_private_key("pw").await, Err(SessionError::Precondition { .. })));
    assert!(matches!(alice.reset_private_key_backup().await, Err(SessionError::Precondition { .. })));
    assert!(matches!(alice.rotate_private_key().await, Err(SessionError::Precondition { .. })));
    assert_eq!(alice.state(), SessionState::Uninitialized);

    // Nothing reached the auth service.
    assert_eq!(auth.exchanges(), 0);
}

#[tokio::test]
async fn initialize_sets_token_and_state() {
    let auth = LocalAuth::new(&["Alice"]);
    let mut alice = session("Alice", &auth, &cloud());

    alice.initialize().await.unwrap();

    assert_eq!(alice.state(), SessionState::Authenticated);
    assert!(alice.is_initialized());
    assert_eq!(alice.auth_token().map(AuthToken::as_str), Some("bearer-Alice"));
    assert!(!alice.has_local_private_key().await.unwrap());
}

#[tokio::test]
async fn initialize_again_keeps_key_service() {
    let auth = LocalAuth::new(&["Alice"]);
    let cloud = cloud();
    let mut alice = session("Alice", &auth, &cloud);
    alice.initialize().await.unwrap();
    let published = alice.register().await.unwrap();

    alice.initialize().await.unwrap();

    assert_eq!(alice.state(), SessionState::Registered);
    assert!(alice.has_local_private_key().await.unwrap());
    assert_eq!(cloud.published_key("Alice").await.as_ref(), Some(published.public_key()));

    // The original key still decrypts messages sent to it.
    let recipients = alice.lookup_public_keys(&["Alice"]).await.unwrap();
    let payload = alice.encrypt("note to self", &recipients).await.unwrap();
    let plaintext = alice.decrypt(&payload, published.public_key()).await.unwrap();
    assert_eq!(plaintext, "note to self");
}

#[tokio::test]
async fn rejected_identity_fails_authentication() {
    let auth = LocalAuth::new(&["Alice"]);
    let mut mallory = session("Mallory", &auth, &cloud());

    let result = mallory.initialize().await;

    assert!(matches!(
        result,
        Err(SessionError::Authentication(AuthError::Rejected { status: 403, .. }))
    ));
    assert_eq!(mallory.state(), SessionState::Uninitialized);
    assert!(mallory.auth_token().is_none());
}

#[tokio::test]
async fn register_publishes_and_keeps_local_key() {
    let auth = LocalAuth::new(&["Alice"]);
    let cloud = cloud();
    let mut alice = session("Alice", &auth, &cloud);
    alice.initialize().await.unwrap();

    let outcome = alice.register().await.unwrap();

    assert!(matches!(outcome, RegisterOutcome::Registered(_)));
    assert_eq!(alice.state(), SessionState::Registered);
    assert!(alice.has_local_private_key().await.unwrap());
    assert_eq!(cloud.published_key("Alice").await.as_ref(), Some(outcome.public_key()));
}

#[tokio::test]
async fn register_twice_rotates() {
    let auth = LocalAuth::new(&["Alice"]);
    let cloud = cloud();
    let mut alice = session("Alice", &auth, &cloud);
    alice.initialize().await.unwrap();

    let first = alice.register().await.unwrap();
    let second = alice.register().await.unwrap();

    assert!(matches!(second, RegisterOutcome::RotatedExistingIdentity(_)));
    assert_ne!(first.public_key(), second.public_key());
    assert!(alice.has_local_private_key().await.unwrap());
    assert_eq!(cloud.published_key("Alice").await.as_ref(), Some(second.public_key()));
}

#[tokio::test]
async fn new_device_for_registered_identity_rotates() {
    let auth = LocalAuth::new(&["Alice"]);
    let cloud = cloud();
    let old_device = registered("Alice", &auth, &cloud).await;

    let mut new_device = session("Alice", &auth, &cloud);
    new_device.initialize().await.unwrap();
    let outcome = new_device.register().await.unwrap();

    assert!(matches!(outcome, RegisterOutcome::RotatedExistingIdentity(_)));
    assert!(new_device.has_local_private_key().await.unwrap());
    assert!(old_device.has_local_private_key().await.unwrap());
}

#[tokio::test]
async fn alice_and_bob_exchange_messages() {
    let auth = LocalAuth::new(&["Alice", "Bob"]);
    let cloud = cloud();
    let alice = registered("Alice", &auth, &cloud).await;
    let bob = registered("Bob", &auth, &cloud).await;

    let bob_keys = alice.lookup_public_keys(&["Bob"]).await.unwrap();
    let alice_keys = bob.lookup_public_keys(&["Alice"]).await.unwrap();
    let alice_key = alice_keys.get("Alice").unwrap();
    let bob_key = bob_keys.get("Bob").unwrap();

    let to_bob = alice.encrypt("Hello Bob! How are you?", &bob_keys).await.unwrap();
    assert_eq!(bob.decrypt(&to_bob, alice_key).await.unwrap(), "Hello Bob! How are you?");

    let to_alice = bob.encrypt("Hello Alice! I'm fine, thanks.", &alice_keys).await.unwrap();
    assert_eq!(
        alice.decrypt(&to_alice, bob_key).await.unwrap(),
        "Hello Alice! I'm fine, thanks."
    );
}

#[tokio::test]
async fn lookup_unknown_identity_fails() {
    let auth = LocalAuth::new(&["Alice"]);
    let alice = registered("Alice", &auth, &cloud()).await;

    let result = alice.lookup_public_keys(&["Eve"]).await;
    assert!(matches!(result, Err(SessionError::Lookup(KmsError::IdentitiesNotFound { .. }))));

    let result = alice.lookup_public_keys(&[]).await;
    assert!(matches!(result, Err(SessionError::Lookup(KmsError::EmptyLookup))));
}

#[tokio::test]
async fn wrong_sender_key_fails_verification() {
    let auth = LocalAuth::new(&["Alice", "Bob"]);
    let cloud = cloud();
    let alice = registered("Alice", &auth, &cloud).await;
    let bob = registered("Bob", &auth, &cloud).await;

    let bob_keys = alice.lookup_public_keys(&["Bob"]).await.unwrap();
    let payload = alice.encrypt("signed by Alice", &bob_keys).await.unwrap();

    let result = bob.decrypt(&payload, bob_keys.get("Bob").unwrap()).await;
    assert!(matches!(result, Err(SessionError::SignatureVerification { .. })));
}

#[tokio::test]
async fn decrypt_without_being_a_recipient_fails() {
    let auth = LocalAuth::new(&["Alice", "Bob", "Carol"]);
    let cloud = cloud();
    let alice = registered("Alice", &auth, &cloud).await;
    registered("Bob", &auth, &cloud).await;
    let carol = registered("Carol", &auth, &cloud).await;

    let keys = alice.lookup_public_keys(&["Alice", "Bob"]).await.unwrap();
    let payload = alice.encrypt("not for Carol", &keys).await.unwrap();

    let result = carol.decrypt(&payload, keys.get("Alice").unwrap()).await;
    assert!(matches!(result, Err(SessionError::Decryption(_))));
}

#[tokio::test]
async fn backup_cleanup_restore_recovers_key() {
    let auth = LocalAuth::new(&["Alice", "Bob"]);
    let cloud = cloud();
    let alice = registered("Alice", &auth, &cloud).await;
    let bob = registered("Bob", &auth, &cloud).await;

    alice.backup_private_key("pw").await.unwrap();
    alice.cleanup().await.unwrap();
    assert!(!alice.has_local_private_key().await.unwrap());

    alice.restore_private_key("pw").await.unwrap();
    assert!(alice.has_local_private_key().await.unwrap());

    let alice_keys = bob.lookup_public_keys(&["Alice"]).await.unwrap();
    let bob_keys = alice.lookup_public_keys(&["Bob"]).await.unwrap();
    let payload = bob.encrypt("welcome back", &alice_keys).await.unwrap();
    assert_eq!(alice.decrypt(&payload, bob_keys.get("Bob").unwrap()).await.unwrap(), "welcome back");
}

#[tokio::test]
async fn backup_twice_resets_existing_entry() {
    let auth = LocalAuth::new(&["Alice"]);
    let alice = registered("Alice", &auth, &cloud()).await;

    alice.backup_private_key("first").await.unwrap();
    alice.backup_private_key("second").await.unwrap();

    alice.cleanup().await.unwrap();
    assert!(matches!(alice.restore_private_key("first").await, Err(SessionError::Authorization)));
    alice.restore_private_key("second").await.unwrap();
}

#[tokio::test]
async fn restore_with_local_key_cleans_up_first() {
    let auth = LocalAuth::new(&["Alice"]);
    let alice = registered("Alice", &auth, &cloud()).await;
    alice.backup_private_key("pw").await.unwrap();

    alice.restore_private_key("pw").await.unwrap();

    assert!(alice.has_local_private_key().await.unwrap());
}

#[tokio::test]
async fn restore_without_backup_fails() {
    let auth = LocalAuth::new(&["Alice"]);
    let alice = registered("Alice", &auth, &cloud()).await;
    alice.cleanup().await.unwrap();

    let result = alice.restore_private_key("pw").await;
    assert!(matches!(result, Err(SessionError::KeyService { source: KmsError::BackupNotFound, .. })));
}

#[tokio::test]
async fn change_password_invalidates_old_password() {
    let auth = LocalAuth::new(&["Alice"]);
    let alice = registered("Alice", &auth, &cloud()).await;
    alice.backup_private_key("old").await.unwrap();

    assert!(matches!(alice.change_password("wrong", "new").await, Err(SessionError::Authorization)));
    alice.change_password("old", "new").await.unwrap();

    alice.cleanup().await.unwrap();
    assert!(matches!(alice.restore_private_key("old").await, Err(SessionError::Authorization)));
    alice.restore_private_key("new").await.unwrap();
}

#[tokio::test]
async fn reset_backup_removes_escrow() {
    let auth = LocalAuth::new(&["Alice"]);
    let cloud = cloud();
    let alice = registered("Alice", &auth, &cloud).await;
    alice.backup_private_key("pw").await.unwrap();

    alice.reset_private_key_backup().await.unwrap();

    assert!(!cloud.has_backup("Alice").await);
    // Resetting again is not an error.
    alice.reset_private_key_backup().await.unwrap();
}

#[tokio::test]
async fn rotate_with_local_key_cleans_up_first() {
    let auth = LocalAuth::new(&["Alice"]);
    let cloud = cloud();
    let mut alice = session("Alice", &auth, &cloud);
    alice.initialize().await.unwrap();
    let first = alice.register().await.unwrap();

    let rotated = alice.rotate_private_key().await.unwrap();

    assert_ne!(first.public_key(), &rotated);
    assert_eq!(cloud.published_key("Alice").await, Some(rotated));
    assert!(alice.has_local_private_key().await.unwrap());
}

#[tokio::test]
async fn unregister_returns_to_authenticated() {
    let auth = LocalAuth::new(&["Alice", "Bob"]);
    let cloud = cloud();
    let mut alice = registered("Alice", &auth, &cloud).await;
    let bob = registered("Bob", &auth, &cloud).await;

    alice.unregister().await.unwrap();

    assert_eq!(alice.state(), SessionState::Authenticated);
    assert!(matches!(bob.lookup_public_keys(&["Alice"]).await, Err(SessionError::Lookup(_))));

    let outcome = alice.register().await.unwrap();
    assert!(matches!(outcome, RegisterOutcome::Registered(_)));
}

#[tokio::test]
async fn directory_operations_refresh_token() {
    let auth = LocalAuth::new(&["Alice"]);
    let mut alice = session("Alice", &auth, &cloud());

    alice.initialize().await.unwrap();
    assert_eq!(auth.exchanges(), 1);

    alice.register().await.unwrap();
    let keys = alice.lookup_public_keys(&["Alice"]).await.unwrap();
    assert_eq!(auth.exchanges(), 3);

    // Local operations do not need a token.
    let payload = alice.encrypt("note to self", &keys).await.unwrap();
    alice.decrypt(&payload, keys.get("Alice").unwrap()).await.unwrap();
    assert_eq!(auth.exchanges(), 3);
}

#[tokio::test]
async fn stalled_collaborator_times_out() {
    let auth = LocalAuth::new(&["Alice"]);
    let config =
        SessionConfig { operation_timeout: Some(Duration::from_millis(50)), ..SessionConfig::default() };
    let mut alice = Session::with_config("Alice", auth.clone(), cloud(), config);
    alice.initialize().await.unwrap();

    auth.stall.store(true, Ordering::SeqCst);
    let result = alice.register().await;

    assert!(matches!(result, Err(SessionError::Timeout { .. })));
    assert_eq!(alice.state(), SessionState::Authenticated);
}

#[tokio::test]
async fn benchmarking_returns_last_result() {
    let auth = LocalAuth::new(&["Alice"]);
    let config = SessionConfig::benchmarking(std::num::NonZeroU32::new(3).unwrap());
    let mut alice = Session::with_config("Alice", auth.clone(), cloud(), config);
    alice.initialize().await.unwrap();
    alice.register().await.unwrap();

    let keys = alice.lookup_public_keys(&["Alice"]).await.unwrap();
    let payload = alice.encrypt("measured", &keys).await.unwrap();

    assert_eq!(alice.decrypt(&payload, keys.get("Alice").unwrap()).await.unwrap(), "measured");
}

mod properties {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_any_text_round_trips(text in "\\PC{0,200}") {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            let decrypted = runtime.block_on(async {
                let auth = LocalAuth::new(&["Alice", "Bob"]);
                let cloud = cloud();
                let alice = registered("Alice", &auth, &cloud).await;
                let bob = registered("Bob", &auth, &cloud).await;

                let bob_keys = alice.lookup_public_keys(&["Bob"]).await.unwrap();
                let alice_keys = bob.lookup_public_keys(&["Alice"]).await.unwrap();
                let payload = alice.encrypt(&text, &bob_keys).await.unwrap();
                bob.decrypt(&payload, alice_keys.get("Alice").unwrap()).await.unwrap()
            });

            prop_assert_eq!(decrypted, text);
        }
    }
}

/// Collects formatted log output.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock().unwrap()).lines().map(ToString::to_string).collect()
    }

    fn failures(&self) -> Vec<String> {
        self.lines().into_iter().filter(|line| line.contains("operation failed")).collect()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn unrecovered_conflict_is_logged_as_failure() {
    let logs = CapturedLogs::default();
    let _guard = logs.install();

    let auth = LocalAuth::new(&["Alice"]);
    let mut alice = registered("Alice", &auth, &cloud()).await;
    alice.backup_private_key("pw").await.unwrap();
    alice.unregister().await.unwrap();
    alice.restore_private_key("pw").await.unwrap();

    // A local key without a published counterpart: register has no corrective path.
    let err = alice.register().await.unwrap_err();
    assert!(matches!(err, SessionError::PrivateKeyAlreadyExists));

    let failures = logs.failures();
    assert_eq!(failures.len(), 1, "{failures:#?}");
    assert!(failures[0].contains("WARN"));
    assert!(failures[0].contains("operation=register"));
}

#[tokio::test]
async fn healed_conflicts_are_not_logged_as_failures() {
    let logs = CapturedLogs::default();
    let _guard = logs.install();

    let auth = LocalAuth::new(&["Alice"]);
    let mut alice = registered("Alice", &auth, &cloud()).await;
    alice.register().await.unwrap();
    alice.backup_private_key("pw").await.unwrap();
    alice.backup_private_key("pw").await.unwrap();
    alice.restore_private_key("pw").await.unwrap();
    alice.rotate_private_key().await.unwrap();

    assert!(logs.failures().is_empty(), "{:#?}", logs.failures());
}
