//! Interoperability tests against GnuPG.
//!
//! These tests shell out to `gpg` and are ignored by default; run them
//! with `cargo test -- --ignored` on a machine with GnuPG installed.

use std::io::Read;
use std::path::Path;
use std::process::Command;

use streampgp::{
    DecryptionPipelineBuilder, EncryptionPipelineBuilder, Keyring, SignaturePolicy, Validity,
};

const TEST_UID: &str = "Interop Test <interop@example.com>";

fn gpg_available() -> bool {
    Command::new("gpg")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn gpg(home: &Path, args: &[&str]) -> Vec<u8> {
    let output = Command::new("gpg")
        .arg("--homedir")
        .arg(home)
        .arg("--batch")
        .args(args)
        .output()
        .expect("failed to run gpg");
    assert!(
        output.status.success(),
        "gpg {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    output.stdout
}

/// Fresh gpg home with one unprotected RSA key (primary + subkey).
fn gpg_home_with_key() -> tempfile::TempDir {
    let home = tempfile::tempdir().unwrap();
    let params = "\
%no-protection
Key-Type: RSA
Key-Length: 2048
Subkey-Type: RSA
Subkey-Length: 2048
Name-Real: Interop Test
Name-Email: interop@example.com
Expire-Date: 0
%commit
";
    let params_path = home.path().join("keyparams");
    std::fs::write(&params_path, params).unwrap();
    gpg(
        home.path(),
        &["--gen-key", params_path.to_str().unwrap()],
    );
    home
}

#[test]
#[ignore = "requires gpg"]
fn test_gpg_decrypts_our_message() {
    if !gpg_available() {
        return;
    }
    let home = gpg_home_with_key();
    let exported = gpg(home.path(), &["--export", "--armor", "interop@example.com"]);
    let ring = Keyring::from_public_bytes(&exported).unwrap();

    let mut pipeline = EncryptionPipelineBuilder::new(&ring)
        .armored(true)
        .to_recipient("interop@example.com")
        .unwrap()
        .build(&b"sealed for gnupg"[..])
        .unwrap();
    let mut ciphertext = Vec::new();
    pipeline.read_to_end(&mut ciphertext).unwrap();

    let msg_path = home.path().join("message.asc");
    std::fs::write(&msg_path, &ciphertext).unwrap();
    let plaintext = gpg(home.path(), &["--decrypt", msg_path.to_str().unwrap()]);
    assert_eq!(plaintext, b"sealed for gnupg");
}

#[test]
#[ignore = "requires gpg"]
fn test_we_decrypt_gpg_message() {
    if !gpg_available() {
        return;
    }
    let home = gpg_home_with_key();
    let secret = gpg(
        home.path(),
        &["--export-secret-keys", "--armor", "interop@example.com"],
    );
    let mut ring = Keyring::new();
    ring.import_secret_bytes(&secret).unwrap();

    let plain_path = home.path().join("plain.txt");
    std::fs::write(&plain_path, b"from gnupg with love").unwrap();
    let ciphertext = gpg(
        home.path(),
        &[
            "--encrypt",
            "--recipient",
            "interop@example.com",
            "--trust-model",
            "always",
            "--output",
            "-",
            plain_path.to_str().unwrap(),
        ],
    );

    let mut pipeline = DecryptionPipelineBuilder::new(&ring)
        .build(&ciphertext[..])
        .unwrap();
    let mut plaintext = Vec::new();
    pipeline.read_to_end(&mut plaintext).unwrap();
    assert_eq!(plaintext, b"from gnupg with love");
    let result = pipeline.finish().unwrap();
    assert_eq!(result.validity, Validity::Absent);
}

#[test]
#[ignore = "requires gpg"]
fn test_sign_and_verify_with_gpg_key_material() {
    if !gpg_available() {
        return;
    }
    let home = gpg_home_with_key();
    let secret = gpg(
        home.path(),
        &["--export-secret-keys", "--armor", "interop@example.com"],
    );
    let mut ring = Keyring::new();
    ring.import_secret_bytes(&secret).unwrap();

    // Sign and verify entirely with key material gpg produced.
    let mut pipeline = EncryptionPipelineBuilder::new(&ring)
        .signed_by("interop@example.com")
        .to_recipient("interop@example.com")
        .unwrap()
        .build(&b"signed with imported material"[..])
        .unwrap();
    let mut ciphertext = Vec::new();
    pipeline.read_to_end(&mut ciphertext).unwrap();

    let mut pipeline = DecryptionPipelineBuilder::new(&ring)
        .signature_policy(SignaturePolicy::RequireValid)
        .build(&ciphertext[..])
        .unwrap();
    let mut plaintext = Vec::new();
    pipeline.read_to_end(&mut plaintext).unwrap();
    assert_eq!(plaintext, b"signed with imported material");

    let result = pipeline.finish().unwrap();
    assert_eq!(result.validity, Validity::Valid);
    assert_eq!(result.signer.as_deref(), Some(TEST_UID));
}
