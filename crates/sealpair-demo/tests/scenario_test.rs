//! Walk-through scenarios against the in-memory KMS.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use async_trait::async_trait;
use sealpair_client::{
    AuthError, AuthService, AuthToken, KeyServiceConnector, Operation, Session, SessionError,
};
use sealpair_demo::{
    ALICE_MESSAGE, BOB_MESSAGE, DecryptedMessage, Orchestrator, ScenarioConfig, StepOutcome,
};
use sealpair_kms::{
    KmsJwt, KmsToken, SeededEnv,
    memory::{MemoryCloud, MemoryKmsConfig},
};

const SECRET: &[u8] = b"scenario secret";

struct LocalAuth {
    jwt: KmsJwt,
    allowed: BTreeSet<String>,
}

impl LocalAuth {
    fn new(allowed: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            jwt: KmsJwt::new(SECRET),
            allowed: allowed.iter().map(ToString::to_string).collect(),
        })
    }
}

#[async_trait]
impl AuthService for LocalAuth {
    async fn authenticate(&self, identity: &str) -> Result<AuthToken, AuthError> {
        if !self.allowed.contains(identity) {
            return Err(AuthError::Rejected { status: 403, reason: "Forbidden".into() });
        }
        Ok(AuthToken::new(identity))
    }

    async fn kms_token(&self, auth_token: &AuthToken) -> Result<KmsToken, AuthError> {
        self.jwt
            .issue(auth_token.as_str(), Duration::from_secs(60))
            .map_err(|e| AuthError::InvalidResponse { reason: e.to_string() })
    }
}

fn cloud(seed: u64) -> MemoryCloud<SeededEnv> {
    MemoryCloud::new(
        SeededEnv::with_seed(seed),
        KmsJwt::new(SECRET),
        MemoryKmsConfig { backup_rounds: 1_000 },
    )
}

fn orchestrator<C: KeyServiceConnector + Clone>(
    auth: Arc<LocalAuth>,
    connector: &C,
    config: ScenarioConfig,
) -> Orchestrator<C> {
    let alice = Session::new("Alice", auth.clone(), connector.clone());
    let bob = Session::new("Bob", auth, connector.clone());
    Orchestrator::new(alice, bob, config)
}

#[tokio::test]
async fn full_walkthrough_succeeds() {
    let cloud = cloud(42);
    let report =
        orchestrator(LocalAuth::new(&["Alice", "Bob"]), &cloud, ScenarioConfig::default()).run().await;

    assert!(report.is_success(), "{:#?}", report.steps());
    assert_eq!(
        report.messages(),
        [
            DecryptedMessage {
                recipient: "Bob".into(),
                sender: "Alice".into(),
                plaintext: ALICE_MESSAGE.into(),
            },
            DecryptedMessage {
                recipient: "Alice".into(),
                sender: "Bob".into(),
                plaintext: BOB_MESSAGE.into(),
            },
        ]
    );

    // Rotation at the end republished both keys; backups were reset.
    assert!(cloud.published_key("Alice").await.is_some());
    assert!(!cloud.has_backup("Alice").await);
    assert!(!cloud.has_backup("Bob").await);
}

#[tokio::test]
async fn unregister_at_end_empties_directory() {
    let cloud = cloud(1);
    let config = ScenarioConfig { unregister_at_end: true, ..ScenarioConfig::default() };

    let report = orchestrator(LocalAuth::new(&["Alice", "Bob"]), &cloud, config).run().await;

    assert!(report.is_success(), "{:#?}", report.steps());
    assert!(matches!(report.outcome("Bob", Operation::Unregister), Some(StepOutcome::Succeeded(_))));
    assert!(cloud.published_key("Alice").await.is_none());
    assert!(cloud.published_key("Bob").await.is_none());
}

#[tokio::test]
async fn rejected_participant_does_not_abort_run() {
    let cloud = cloud(2);
    let report =
        orchestrator(LocalAuth::new(&["Alice"]), &cloud, ScenarioConfig::default()).run().await;

    assert!(matches!(
        report.outcome("Bob", Operation::Initialize),
        Some(StepOutcome::Failed(SessionError::Authentication(_)))
    ));
    assert!(matches!(
        report.outcome("Alice", Operation::Lookup),
        Some(StepOutcome::Failed(SessionError::Lookup(_)))
    ));
    assert_eq!(report.failures(), 2);

    // Alice keeps going with everything that does not need Bob.
    assert!(matches!(report.outcome("Alice", Operation::Register), Some(StepOutcome::Succeeded(_))));
    assert!(matches!(report.outcome("Alice", Operation::Encrypt), Some(StepOutcome::Skipped(_))));
    assert!(matches!(report.outcome("Alice", Operation::Rotate), Some(StepOutcome::Succeeded(_))));
    assert!(matches!(report.outcome("Bob", Operation::Backup), Some(StepOutcome::Skipped(_))));
    assert!(report.messages().is_empty());
}

#[tokio::test]
async fn previously_registered_identity_rotates() {
    let cloud = cloud(3);
    let auth = LocalAuth::new(&["Alice", "Bob"]);

    let mut old_device = Session::new("Alice", auth.clone(), cloud.clone());
    old_device.initialize().await.unwrap();
    old_device.register().await.unwrap();

    let report = orchestrator(auth, &cloud, ScenarioConfig::default()).run().await;

    assert!(report.is_success(), "{:#?}", report.steps());
    let Some(StepOutcome::Succeeded(detail)) = report.outcome("Alice", Operation::Register) else {
        panic!("Alice registration did not succeed");
    };
    assert!(detail.starts_with("Rotated private key instead"));
    assert_eq!(report.messages().len(), 2);
}
