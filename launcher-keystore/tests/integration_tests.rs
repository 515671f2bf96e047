//! Integration tests for launcher-keystore
//!
//! These tests drive the controller over a real on-disk keystore:
//! - Account lifecycle across process restarts
//! - Session state (last account, lockouts) across process restarts
//! - Password reset and raw key recovery
//! - Keystore damage reporting
//! - Collaborator wiring (signer, events)
//! - Configuration

use std::sync::Arc;

use launcher_keystore::{
    Address, ChannelEventSink, ChannelSigner, Error, FileKeystore, KdfParams, KeystoreRepository,
    LauncherConfig, PasswordCipher, PrivateKey, SessionController, SessionEventKind, SessionState,
    SignerCommand, ThrottleConfig, UnlockOutcome,
};
use tempfile::TempDir;

const TEST_PASSWORD: &str = "hunter2hunter2";

// Private key 0x...01 and its address
const KEY_ONE: &str = "0000000000000000000000000000000000000000000000000000000000000001";
const KEY_ONE_ADDRESS: &str = "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf";

fn open_controller(dir: &TempDir) -> SessionController {
    let repository = Arc::new(FileKeystore::open(dir.path()).unwrap());
    SessionController::builder(repository)
        .cipher(PasswordCipher::new(KdfParams::fast()).unwrap())
        .build()
        .unwrap()
}

// ============================================================================
// Account Lifecycle Tests
// ============================================================================

mod account_lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_account_survives_restart() {
        let dir = TempDir::new().unwrap();

        let address = {
            let controller = open_controller(&dir);
            let address = controller
                .create_account(TEST_PASSWORD, TEST_PASSWORD)
                .await
                .unwrap();
            controller.logout().await;
            address
        };

        let controller = open_controller(&dir);
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.state, SessionState::Locked);
        assert_eq!(snapshot.addresses, vec![address]);
        assert_eq!(snapshot.selected_address, Some(address));

        assert!(matches!(
            controller.unlock(address, "not it").await,
            Err(Error::InvalidPassword)
        ));
        assert_eq!(
            controller.unlock(address, TEST_PASSWORD).await.unwrap(),
            UnlockOutcome::Unlocked(address)
        );
    }

    #[tokio::test]
    async fn test_accounts_keep_creation_order() {
        let dir = TempDir::new().unwrap();
        let controller = open_controller(&dir);

        let mut created = Vec::new();
        for i in 0..3 {
            let password = format!("password-{}", i);
            created.push(controller.create_account(&password, &password).await.unwrap());
        }
        drop(controller);

        let controller = open_controller(&dir);
        assert_eq!(controller.snapshot().addresses, created);
        // The most recently created account was the last one unlocked
        assert_eq!(controller.snapshot().selected_address, Some(created[2]));
    }

    #[tokio::test]
    async fn test_remove_persists() {
        let dir = TempDir::new().unwrap();
        let controller = open_controller(&dir);
        let first = controller.create_account("a", "a").await.unwrap();
        let second = controller.create_account("b", "b").await.unwrap();

        controller.remove_account(second).await.unwrap();
        assert!(!controller.snapshot().logged_in);
        drop(controller);

        let controller = open_controller(&dir);
        assert_eq!(controller.snapshot().addresses, vec![first]);
        assert!(matches!(
            controller.unlock(second, "b").await,
            Err(Error::UnknownAddress(_))
        ));
    }
}

// ============================================================================
// Persisted Session State Tests
// ============================================================================

mod persisted_state {
    use super::*;

    fn open_throttled(dir: &TempDir) -> SessionController {
        let repository = Arc::new(FileKeystore::open(dir.path()).unwrap());
        SessionController::builder(repository)
            .cipher(PasswordCipher::new(KdfParams::fast()).unwrap())
            .throttle(ThrottleConfig {
                max_failures: 2,
                base_lockout_secs: 60,
                max_lockout_secs: 60,
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_last_unlocked_account_preselected_after_restart() {
        let dir = TempDir::new().unwrap();
        let (first, second) = {
            let controller = open_controller(&dir);
            let first = controller.create_account("a", "a").await.unwrap();
            let second = controller.create_account("b", "b").await.unwrap();
            controller.unlock(first, "a").await.unwrap();
            controller.unlock(second, "b").await.unwrap();
            controller.logout().await;
            (first, second)
        };

        let controller = open_controller(&dir);
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.addresses, vec![first, second]);
        assert_eq!(snapshot.selected_address, Some(second));
        assert!(!snapshot.logged_in);
    }

    #[tokio::test]
    async fn test_forgotten_last_account_falls_back_to_first() {
        let dir = TempDir::new().unwrap();
        let first = {
            let controller = open_controller(&dir);
            let first = controller.create_account("a", "a").await.unwrap();
            let second = controller.create_account("b", "b").await.unwrap();
            controller.logout().await;
            std::fs::remove_file(dir.path().join(format!("{}.json", second.to_hex()))).unwrap();
            first
        };

        let controller = open_controller(&dir);
        assert_eq!(controller.snapshot().addresses, vec![first]);
        assert_eq!(controller.snapshot().selected_address, Some(first));
    }

    #[tokio::test]
    async fn test_lockout_survives_restart() {
        let dir = TempDir::new().unwrap();
        let address = {
            let controller = open_throttled(&dir);
            let address = controller.create_account("pw", "pw").await.unwrap();
            controller.logout().await;
            address
        };

        // One failure per process, as separate CLI invocations would
        for _ in 0..2 {
            let controller = open_throttled(&dir);
            assert!(matches!(
                controller.unlock(address, "bad").await,
                Err(Error::InvalidPassword)
            ));
        }

        let controller = open_throttled(&dir);
        assert!(matches!(
            controller.unlock(address, "pw").await,
            Err(Error::RateLimited { .. })
        ));
        assert!(dir.path().join("state.json").exists());
    }
}

// ============================================================================
// Password Reset Tests
// ============================================================================

mod password_reset {
    use super::*;

    #[tokio::test]
    async fn test_reset_then_restart() {
        let dir = TempDir::new().unwrap();
        let controller = open_controller(&dir);
        let address = controller.create_account("old", "old").await.unwrap();

        controller.reset_password(address, "new", "new").await.unwrap();
        drop(controller);

        let controller = open_controller(&dir);
        assert!(matches!(
            controller.unlock(address, "old").await,
            Err(Error::InvalidPassword)
        ));
        controller.unlock(address, "new").await.unwrap();
    }

    #[tokio::test]
    async fn test_recover_known_key() {
        let dir = TempDir::new().unwrap();
        let controller = open_controller(&dir);

        let address = controller
            .recover_with_private_key(KEY_ONE, TEST_PASSWORD, TEST_PASSWORD)
            .await
            .unwrap();
        assert_eq!(address.to_string(), KEY_ONE_ADDRESS);
        assert_eq!(
            controller.with_private_key(|k| hex::encode(k)).await.as_deref(),
            Some(KEY_ONE)
        );
    }

    #[tokio::test]
    async fn test_recover_validates_before_writing() {
        let dir = TempDir::new().unwrap();
        let controller = open_controller(&dir);

        assert!(matches!(
            controller.recover_with_private_key(KEY_ONE, "", "").await,
            Err(Error::EmptyPassword)
        ));
        assert!(matches!(
            controller.recover_with_private_key(KEY_ONE, "a", "b").await,
            Err(Error::PasswordMismatch)
        ));
        assert!(matches!(
            controller.recover_with_private_key(&"00".repeat(32), "a", "a").await,
            Err(Error::InvalidKeyFormat)
        ));
        assert!(controller.snapshot().addresses.is_empty());
    }
}

// ============================================================================
// Keystore Damage Tests
// ============================================================================

mod keystore_damage {
    use super::*;

    #[tokio::test]
    async fn test_corrupt_entry_reported_for_that_account_only() {
        let dir = TempDir::new().unwrap();
        let controller = open_controller(&dir);
        let damaged = controller.create_account("a", "a").await.unwrap();
        let healthy = controller.create_account("b", "b").await.unwrap();
        drop(controller);

        let path = dir.path().join(format!("{}.json", damaged.to_hex()));
        std::fs::write(&path, b"{ not json").unwrap();

        let controller = open_controller(&dir);
        assert!(matches!(
            controller.unlock(damaged, "a").await,
            Err(Error::CorruptKeystore { address, .. }) if address == damaged
        ));
        controller.unlock(healthy, "b").await.unwrap();
    }

    #[tokio::test]
    async fn test_tampered_address_fails_authentication() {
        let dir = TempDir::new().unwrap();
        let repository = FileKeystore::open(dir.path()).unwrap();
        let cipher = PasswordCipher::new(KdfParams::fast()).unwrap();

        let key = PrivateKey::generate();
        let entry = cipher.encrypt(&key, "pw").unwrap();
        let other = PrivateKey::generate().address().unwrap();

        // Rename the entry to another address, keeping the file consistent
        let mut json: serde_json::Value = serde_json::to_value(&entry).unwrap();
        json["address"] = serde_json::Value::String(other.to_string());
        let tampered = serde_json::from_value(json).unwrap();
        repository.put(tampered).unwrap();
        drop(repository);

        let controller = open_controller(&dir);
        assert!(matches!(
            controller.unlock(other, "pw").await,
            Err(Error::InvalidPassword)
        ));
    }
}

// ============================================================================
// Collaborator Tests
// ============================================================================

mod collaborators {
    use super::*;

    #[tokio::test]
    async fn test_signer_and_events_follow_session() {
        let dir = TempDir::new().unwrap();
        let (signer, mut signer_rx) = ChannelSigner::new();
        let (events, mut event_rx) = ChannelEventSink::new(8);
        let controller = SessionController::builder(Arc::new(FileKeystore::open(dir.path()).unwrap()))
            .cipher(PasswordCipher::new(KdfParams::fast()).unwrap())
            .signer(Arc::new(signer))
            .events(Arc::new(events))
            .build()
            .unwrap();

        let address = controller.create_account("pw", "pw").await.unwrap();
        assert!(matches!(
            signer_rx.recv().await.unwrap(),
            SignerCommand::SetKey { address: a, .. } if a == address
        ));

        controller.remove_account(address).await.unwrap();
        assert!(matches!(signer_rx.recv().await.unwrap(), SignerCommand::Clear));

        let kinds: Vec<SessionEventKind> = std::iter::from_fn(|| event_rx.try_recv().ok())
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                SessionEventKind::AccountCreated { address },
                SessionEventKind::LoggedOut { address },
                SessionEventKind::AccountRemoved { address },
            ]
        );
    }

    #[tokio::test]
    async fn test_parallel_readers_see_whole_entries() {
        let dir = TempDir::new().unwrap();
        let repository = Arc::new(FileKeystore::open(dir.path()).unwrap());
        let cipher = PasswordCipher::new(KdfParams::fast()).unwrap();
        let key = PrivateKey::generate();
        let address = key.address().unwrap();
        repository.put(cipher.encrypt(&key, "pw").unwrap()).unwrap();

        let writer = {
            let repository = repository.clone();
            let cipher = cipher.clone();
            std::thread::spawn(move || {
                for _ in 0..20 {
                    repository.put(cipher.encrypt(&key, "pw").unwrap()).unwrap();
                }
            })
        };
        for _ in 0..50 {
            let entry = repository.get(&address).unwrap();
            assert_eq!(cipher.decrypt(&entry, "pw").unwrap().address().unwrap(), address);
        }
        writer.join().unwrap();
    }
}

// ============================================================================
// Configuration Tests
// ============================================================================

mod configuration {
    use super::*;

    #[tokio::test]
    async fn test_controller_from_config_file() {
        let dir = TempDir::new().unwrap();
        let keystore_dir = dir.path().join("keys");
        let config_path = dir.path().join("keystore.toml");
        std::fs::write(
            &config_path,
            format!(
                r#"
                keystore_dir = "{}"

                [kdf]
                algorithm = "argon2id"
                m_cost = 1024
                t_cost = 1
                p_cost = 1

                [throttle]
                max_failures = 1
                base_lockout_secs = 60
                max_lockout_secs = 60
                "#,
                keystore_dir.display()
            ),
        )
        .unwrap();

        let config = LauncherConfig::load_or_default(Some(&config_path)).unwrap();
        let controller = SessionController::builder(Arc::new(
            FileKeystore::open(&config.keystore_dir).unwrap(),
        ))
        .cipher(PasswordCipher::new(config.kdf.clone()).unwrap())
        .throttle(config.throttle.clone())
        .build()
        .unwrap();

        let address = controller.create_account("pw", "pw").await.unwrap();
        controller.logout().await;
        assert!(keystore_dir.join(format!("{}.json", address.to_hex())).exists());

        assert!(controller.unlock(address, "bad").await.is_err());
        assert!(matches!(
            controller.unlock(address, "pw").await,
            Err(Error::RateLimited { .. })
        ));
    }

    #[test]
    fn test_address_parsing_is_case_insensitive() {
        let lower: Address = KEY_ONE_ADDRESS.to_lowercase().parse().unwrap();
        let bare: Address = KEY_ONE_ADDRESS.trim_start_matches("0x").parse().unwrap();
        assert_eq!(lower, bare);
        assert_eq!(lower.to_string(), KEY_ONE_ADDRESS);
    }
}
