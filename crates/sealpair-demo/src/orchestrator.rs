//! Two-party walk-through.
//!
//! Drives Alice's and Bob's sessions through a fixed sequence:
//!
//! 1. initialize both
//! 2. register both
//! 3. each looks up the other's public key
//! 4. Alice → Bob message, then Bob → Alice message
//! 5. per participant: backup, change password, cleanup, restore, query the
//!    local key, rotate, reset backup
//! 6. optionally unregister both
//!
//! One participant's failure never aborts the run. Steps that depend on a
//! failed step are recorded as skipped, mirroring the `BestEffort` executor
//! policy: log, record and continue.

use sealpair_client::{
    EncryptedPayload, KeyServiceConnector, LookupResult, Operation, PublicKey, RegisterOutcome,
    Session,
};

use crate::report::{DecryptedMessage, ScenarioReport};

/// Scenario parameters.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    /// Backup password.
    pub password: String,
    /// Password the backup is re-wrapped under.
    pub new_password: String,
    /// Remove both identities from the directory at the end.
    pub unregister_at_end: bool,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            password: "correct horse".to_string(),
            new_password: "battery staple".to_string(),
            unregister_at_end: false,
        }
    }
}

/// Alice's first message.
pub const ALICE_MESSAGE: &str = "Hello Bob! How are you?";

/// Bob's reply.
pub const BOB_MESSAGE: &str = "Hello Alice! I'm fine, thanks.";

/// Progress of one participant, used to decide which steps can run.
#[derive(Default)]
struct Progress {
    initialized: bool,
    registered: bool,
    /// The peer's keys as looked up by this participant.
    peer_keys: Option<LookupResult>,
}

/// Runs the walk-through for two sessions.
pub struct Orchestrator<C: KeyServiceConnector> {
    alice: Session<C>,
    bob: Session<C>,
    config: ScenarioConfig,
    report: ScenarioReport,
}

impl<C: KeyServiceConnector> Orchestrator<C> {
    /// Create an orchestrator for two uninitialized sessions.
    pub fn new(alice: Session<C>, bob: Session<C>, config: ScenarioConfig) -> Self {
        Self { alice, bob, config, report: ScenarioReport::default() }
    }

    /// Run every step and return the report.
    pub async fn run(mut self) -> ScenarioReport {
        let mut alice = Progress::default();
        let mut bob = Progress::default();

        alice.initialized = initialize(&mut self.alice, &mut self.report).await;
        bob.initialized = initialize(&mut self.bob, &mut self.report).await;

        alice.registered = register(&mut self.alice, &alice, &mut self.report).await;
        bob.registered = register(&mut self.bob, &bob, &mut self.report).await;

        alice.peer_keys = lookup(&self.alice, &alice, self.bob.identity(), &mut self.report).await;
        bob.peer_keys = lookup(&self.bob, &bob, self.alice.identity(), &mut self.report).await;

        let to_bob = encrypt(&self.alice, &alice, ALICE_MESSAGE, &mut self.report).await;
        decrypt(&self.bob, &bob, self.alice.identity(), to_bob.as_ref(), &mut self.report).await;

        let to_alice = encrypt(&self.bob, &bob, BOB_MESSAGE, &mut self.report).await;
        decrypt(&self.alice, &alice, self.bob.identity(), to_alice.as_ref(), &mut self.report)
            .await;

        maintain_keys(&self.alice, &alice, &self.config, &mut self.report).await;
        maintain_keys(&self.bob, &bob, &self.config, &mut self.report).await;

        if self.config.unregister_at_end {
            unregister(&mut self.alice, &alice, &mut self.report).await;
            unregister(&mut self.bob, &bob, &mut self.report).await;
        }

        tracing::info!("Scenario finished: {}", self.report);
        self.report
    }
}

async fn initialize<C: KeyServiceConnector>(
    session: &mut Session<C>,
    report: &mut ScenarioReport,
) -> bool {
    tracing::info!("Initializing {}", session.identity());
    let result = session.initialize().await;
    report.record(session.identity(), Operation::Initialize, result, |_| "Initialized".into()).is_some()
}

async fn register<C: KeyServiceConnector>(
    session: &mut Session<C>,
    progress: &Progress,
    report: &mut ScenarioReport,
) -> bool {
    if !progress.initialized {
        report.skip(session.identity(), Operation::Register, "not initialized");
        return false;
    }

    tracing::info!("Registering {}", session.identity());
    let result = session.register().await;
    report
        .record(session.identity(), Operation::Register, result, |outcome| match outcome {
            RegisterOutcome::Registered(key) => format!("Registered {key}"),
            RegisterOutcome::RotatedExistingIdentity(key) => {
                format!("Rotated private key instead, now {key}")
            },
        })
        .is_some()
}

async fn lookup<C: KeyServiceConnector>(
    session: &Session<C>,
    progress: &Progress,
    peer: &str,
    report: &mut ScenarioReport,
) -> Option<LookupResult> {
    if !progress.initialized {
        report.skip(session.identity(), Operation::Lookup, "not initialized");
        return None;
    }

    tracing::info!("Looking up {peer}'s public key");
    let result = session.lookup_public_keys(&[peer]).await;
    report.record(session.identity(), Operation::Lookup, result, |_| {
        format!("Looked up {peer}'s public key")
    })
}

async fn encrypt<C: KeyServiceConnector>(
    session: &Session<C>,
    progress: &Progress,
    plaintext: &str,
    report: &mut ScenarioReport,
) -> Option<EncryptedPayload> {
    let Some(peer_keys) = progress.peer_keys.as_ref().filter(|_| progress.registered) else {
        report.skip(session.identity(), Operation::Encrypt, "not registered or peer key unknown");
        return None;
    };

    let result = session.encrypt(plaintext, peer_keys).await;
    report.record(session.identity(), Operation::Encrypt, result, |payload| {
        format!("Encrypted and signed {} bytes", payload.len())
    })
}

async fn decrypt<C: KeyServiceConnector>(
    session: &Session<C>,
    progress: &Progress,
    sender: &str,
    payload: Option<&EncryptedPayload>,
    report: &mut ScenarioReport,
) {
    let sender_key: Option<&PublicKey> =
        progress.peer_keys.as_ref().and_then(|keys| keys.get(sender));
    let (Some(payload), Some(sender_key), true) = (payload, sender_key, progress.registered) else {
        report.skip(session.identity(), Operation::Decrypt, "no payload, sender key or local key");
        return;
    };

    let result = session.decrypt(payload, sender_key).await;
    let plaintext = report.record(session.identity(), Operation::Decrypt, result, |plaintext| {
        format!("Decrypted and verified {sender}'s message: '{plaintext}'")
    });

    if let Some(plaintext) = plaintext {
        report.add_message(DecryptedMessage {
            recipient: session.identity().to_string(),
            sender: sender.to_string(),
            plaintext,
        });
    }
}

/// Backup, password change, cleanup, restore and rotation for one participant.
async fn maintain_keys<C: KeyServiceConnector>(
    session: &Session<C>,
    progress: &Progress,
    config: &ScenarioConfig,
    report: &mut ScenarioReport,
) {
    const DEPENDENT: [Operation; 7] = [
        Operation::Backup,
        Operation::ChangePassword,
        Operation::Cleanup,
        Operation::Restore,
        Operation::HasLocalKey,
        Operation::Rotate,
        Operation::ResetBackup,
    ];
    let identity = session.identity();

    if !progress.registered {
        for step in DEPENDENT {
            report.skip(identity, step, "not registered");
        }
        return;
    }

    let result = session.backup_private_key(&config.password).await;
    let backed_up =
        report.record(identity, Operation::Backup, result, |_| "Backed up private key".into());

    let password = if backed_up.is_some() {
        let result = session.change_password(&config.password, &config.new_password).await;
        let changed =
            report.record(identity, Operation::ChangePassword, result, |_| "Changed password".into());
        if changed.is_some() { &config.new_password } else { &config.password }
    } else {
        report.skip(identity, Operation::ChangePassword, "no backup");
        &config.password
    };

    // Dropping the local key without a backup would lose it.
    if backed_up.is_some() {
        let result = session.cleanup().await;
        report.record(identity, Operation::Cleanup, result, |_| "Cleaned up".into());

        let result = session.restore_private_key(password).await;
        report.record(identity, Operation::Restore, result, |_| "Restored private key".into());
    } else {
        report.skip(identity, Operation::Cleanup, "no backup");
        report.skip(identity, Operation::Restore, "no backup");
    }

    let result = session.has_local_private_key().await;
    report.record(identity, Operation::HasLocalKey, result, |present| {
        format!("Has local private key: {present}")
    });

    let result = session.rotate_private_key().await;
    report.record(identity, Operation::Rotate, result, |key| format!("Rotated private key, now {key}"));

    if backed_up.is_some() {
        let result = session.reset_private_key_backup().await;
        report.record(identity, Operation::ResetBackup, result, |_| "Reset private key backup".into());
    } else {
        report.skip(identity, Operation::ResetBackup, "no backup");
    }
}

async fn unregister<C: KeyServiceConnector>(
    session: &mut Session<C>,
    progress: &Progress,
    report: &mut ScenarioReport,
) {
    if !progress.registered {
        report.skip(session.identity(), Operation::Unregister, "not registered");
        return;
    }

    let result = session.unregister().await;
    report.record(session.identity(), Operation::Unregister, result, |_| "Unregistered".into());
}
