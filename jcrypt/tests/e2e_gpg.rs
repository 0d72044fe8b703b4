//! End-to-end tests against a real GnuPG installation.
//!
//! These tests require `gpg` to be installed locally. They are marked
//! `#[ignore]` to prevent CI failures in environments without it.
//!
//! ## Running E2E Tests
//!
//! ```bash
//! cargo test -p jcrypt -- --ignored
//! ```
//!
//! Each test generates a passphrase-less key in a throwaway `--homedir`, so
//! the user's keyring is never touched.

use jcrypt::{CancellationController, GpgConfig, Jcrypt, JcryptConfig, JcryptError};
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

const USER: &str = "jcrypt-e2e@example.invalid";

fn gpg_available() -> bool {
    Command::new("gpg")
        .arg("--version")
        .output()
        .is_ok_and(|out| out.status.success())
}

fn generate_key(homedir: &Path) {
    let status = Command::new("gpg")
        .arg("--homedir")
        .arg(homedir)
        .args([
            "--batch",
            "--passphrase",
            "",
            "--quick-gen-key",
            USER,
            "default",
            "default",
            "never",
        ])
        .status()
        .unwrap();
    assert!(status.success(), "key generation failed");
}

/// Builds a client on a fresh keyring, or `None` if gpg is not installed.
fn client(home: &TempDir) -> Option<Jcrypt> {
    if !gpg_available() {
        eprintln!("Skipping: gpg not found");
        return None;
    }
    generate_key(home.path());

    let config = JcryptConfig {
        gpg: GpgConfig {
            recipients: vec![USER.to_string()],
            local_user: Some(USER.to_string()),
            homedir: Some(home.path().to_path_buf()),
            batch: true,
            extra_args: vec!["--trust-model".to_string(), "always".to_string()],
            ..GpgConfig::default()
        },
        ..JcryptConfig::default()
    };
    Some(
        Jcrypt::from_config(config)
            .unwrap()
            .with_cancellation(CancellationController::new()),
    )
}

#[tokio::test]
#[ignore = "Requires gpg installed"]
async fn e2e_encrypt_decrypt_round_trip() {
    let home = TempDir::new().unwrap();
    let Some(jc) = client(&home) else { return };

    let ciphertext = jc.encrypt("hello, world!").await.unwrap();
    assert!(ciphertext.starts_with(b"-----BEGIN PGP MESSAGE-----"));
    assert_eq!(jc.decrypt(ciphertext).await.unwrap(), b"hello, world!");
}

#[tokio::test]
#[ignore = "Requires gpg installed"]
async fn e2e_file_in_place_round_trip() {
    let home = TempDir::new().unwrap();
    let Some(jc) = client(&home) else { return };
    let work = TempDir::new().unwrap();
    let file = work.path().join("secret.txt");
    std::fs::write(&file, "hello, world!").unwrap();

    jc.encrypt_to_file(&file, None).await.unwrap();
    assert_ne!(std::fs::read(&file).unwrap(), b"hello, world!");
    jc.decrypt_to_file(&file, None).await.unwrap();
    assert_eq!(std::fs::read(&file).unwrap(), b"hello, world!");
}

#[tokio::test]
#[ignore = "Requires gpg installed"]
async fn e2e_streamed_file_round_trip() {
    let home = TempDir::new().unwrap();
    let Some(jc) = client(&home) else { return };
    let work = TempDir::new().unwrap();
    let plain = work.path().join("plain.bin");
    let sealed = work.path().join("plain.bin.asc");
    let opened = work.path().join("opened.bin");
    let payload: Vec<u8> = (0..2_000_000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&plain, &payload).unwrap();

    jc.encrypt_to_file(&plain, Some(&sealed)).await.unwrap();
    jc.decrypt_to_file(&sealed, Some(&opened)).await.unwrap();
    assert_eq!(std::fs::read(&opened).unwrap(), payload);
}

#[tokio::test]
#[ignore = "Requires gpg installed"]
async fn e2e_garbage_input_reports_gpg_diagnostic() {
    let home = TempDir::new().unwrap();
    let Some(jc) = client(&home) else { return };

    let err = jc.decrypt("not an openpgp message").await.unwrap_err();
    let JcryptError::Pipe(pipe) = err else {
        panic!("expected a pipeline error");
    };
    assert!(pipe.is_transform());
    assert!(
        pipe.to_string().contains("gpg:"),
        "diagnostic should be gpg's own text: {pipe}"
    );
}

#[tokio::test]
#[ignore = "Requires gpg installed"]
async fn e2e_sign_then_verify() {
    let home = TempDir::new().unwrap();
    let Some(jc) = client(&home) else { return };

    let signed = jc.sign("signed payload").await.unwrap();
    let report = jc.verify(signed).await.unwrap();
    assert!(report.contains("Good signature"), "report: {report}");
}
