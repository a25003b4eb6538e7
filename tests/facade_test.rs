use std::fs;
use std::io::{Cursor, Seek, SeekFrom};
use std::time::{Duration, SystemTime};

use chrono::DateTime;
use pgp::composed::SignedPublicKey;
use pgp_facade::{
    Compression, EncryptionKeyMaterial, Error, ErrorKind, FileType, KeyPurpose, OutputOptions,
    Pgp, PgpConfigBuilder,
};
use pretty_assertions::assert_eq;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

mod common;

use common::{receiver, sender, Party};

const CONTENT: &str = "The quick brown fox jumps over the lazy dog.\nSecond line.\n";

fn options() -> OutputOptions {
    OutputOptions::default()
}

#[test]
fn encrypt_decrypt_round_trip() {
    let _ = pretty_env_logger::try_init();

    let alice = Party::new(100, "alice");
    let bob = Party::new(101, "bob");

    let encrypted = sender(&alice, &[&bob])
        .encrypt_armored_string(CONTENT, &options())
        .unwrap();
    assert!(encrypted.starts_with("-----BEGIN PGP MESSAGE-----"));

    let decrypted = receiver(&bob, &alice)
        .decrypt_armored_string(&encrypted)
        .unwrap();
    assert_eq!(decrypted, CONTENT);
}

#[test]
fn round_trip_with_every_compression() {
    let alice = Party::new(102, "alice");
    let bob = Party::new(103, "bob");

    for compression in [
        Compression::Uncompressed,
        Compression::Zip,
        Compression::ZLib,
        Compression::BZip2,
    ] {
        let config = PgpConfigBuilder::default()
            .compression(compression)
            .file_type(FileType::UTF8)
            .build()
            .unwrap();
        let pgp = Pgp::new(sender(&alice, &[&bob]).keys().clone(), config);

        let encrypted = pgp
            .encrypt_and_sign_armored_string(CONTENT, &options())
            .unwrap();
        let decrypted = receiver(&bob, &alice)
            .decrypt_and_verify_armored_string(&encrypted)
            .unwrap();
        assert_eq!(decrypted, CONTENT, "{compression:?}");
    }
}

#[test]
fn sign_and_verify() {
    let alice = Party::new(104, "alice");
    let mallory = Party::new(105, "mallory");

    let signer = Pgp::with_keys(EncryptionKeyMaterial::for_signing(alice.secret.clone(), ""));
    let signed = signer.sign_armored_string(CONTENT, &options()).unwrap();

    let verifier = Pgp::with_keys(EncryptionKeyMaterial::for_verification(Some(
        alice.public.clone(),
    )));
    assert!(verifier.verify_armored_string(&signed, true).unwrap());

    let result = verifier.verify_and_read_armored_string(&signed, true).unwrap();
    assert!(result.is_verified());
    assert_eq!(result.content(), CONTENT);

    let stranger = Pgp::with_keys(EncryptionKeyMaterial::for_verification(Some(
        mallory.public.clone(),
    )));
    assert!(!stranger.verify_armored_string(&signed, true).unwrap());
    let result = stranger.verify_and_read_armored_string(&signed, false).unwrap();
    assert!(!result.is_verified());
    assert_eq!(result.into_content(), CONTENT);
}

#[test]
fn multiple_recipients() {
    let alice = Party::new(106, "alice");
    let bob = Party::new(107, "bob");
    let carol = Party::new(108, "carol");

    let pgp = sender(&alice, &[&bob, &carol]);
    let encrypted = pgp.encrypt_armored_string(CONTENT, &options()).unwrap();

    for party in [&bob, &carol] {
        let decrypted = receiver(party, &alice)
            .decrypt_armored_string(&encrypted)
            .unwrap();
        assert_eq!(decrypted, CONTENT);
    }

    let recipients = pgp.get_recipients_armored_string(&encrypted).unwrap();
    assert_eq!(recipients.len(), 2);
    assert!(recipients.contains(&bob.encryption_key_id()));
    assert!(recipients.contains(&carol.encryption_key_id()));
}

#[test]
fn decrypt_and_verify_requires_the_signer() {
    let alice = Party::new(109, "alice");
    let bob = Party::new(110, "bob");
    let mallory = Party::new(111, "mallory");

    let encrypted = sender(&alice, &[&bob])
        .encrypt_and_sign_armored_string(CONTENT, &options())
        .unwrap();

    let decrypted = receiver(&bob, &alice)
        .decrypt_and_verify_armored_string(&encrypted)
        .unwrap();
    assert_eq!(decrypted, CONTENT);

    let err = receiver(&bob, &mallory)
        .decrypt_and_verify_armored_string(&encrypted)
        .unwrap_err();
    assert!(matches!(err, Error::VerificationFailed));
    assert_eq!(err.to_string(), "Failed to verify file.");
}

#[test]
fn decrypt_and_verify_rejects_unsigned() {
    let alice = Party::new(112, "alice");
    let bob = Party::new(113, "bob");

    let encrypted = sender(&alice, &[&bob])
        .encrypt_armored_string(CONTENT, &options())
        .unwrap();

    let err = receiver(&bob, &alice)
        .decrypt_and_verify_armored_string(&encrypted)
        .unwrap_err();
    assert!(matches!(err, Error::NotSigned));
    assert_eq!(err.to_string(), "File was not signed.");
    assert_eq!(err.kind(), ErrorKind::Verification);
}

#[test]
fn wrong_secret_key() {
    let alice = Party::new(114, "alice");
    let bob = Party::new(115, "bob");
    let carol = Party::new(116, "carol");

    let encrypted = sender(&alice, &[&bob])
        .encrypt_armored_string(CONTENT, &options())
        .unwrap();
    let err = receiver(&carol, &alice)
        .decrypt_armored_string(&encrypted)
        .unwrap_err();
    assert!(matches!(err, Error::SecretKeyNotFound));
    assert_eq!(err.kind(), ErrorKind::KeyNotFound);
}

#[test]
fn protected_secret_key() {
    let alice = Party::new(117, "alice");
    let bob = Party::with_passphrase(118, "bob", "correct horse");

    let encrypted = sender(&alice, &[&bob])
        .encrypt_armored_string(CONTENT, &options())
        .unwrap();
    let decrypted = receiver(&bob, &alice)
        .decrypt_armored_string(&encrypted)
        .unwrap();
    assert_eq!(decrypted, CONTENT);

    let wrong = Pgp::with_keys(EncryptionKeyMaterial::for_decryption(
        bob.secret.clone(),
        "battery staple",
    ));
    let err = wrong.decrypt_armored_string(&encrypted).unwrap_err();
    assert!(matches!(err, Error::KeyExtraction { .. }));
}

#[test]
fn missing_key_material() {
    let pgp = Pgp::default();

    let cases = [
        (
            pgp.encrypt_armored_string(CONTENT, &options()).unwrap_err(),
            KeyPurpose::Encryption,
        ),
        (
            pgp.sign_armored_string(CONTENT, &options()).unwrap_err(),
            KeyPurpose::Signing,
        ),
        (
            pgp.clear_sign_armored_string(CONTENT, &options()).unwrap_err(),
            KeyPurpose::Signing,
        ),
        (
            pgp.decrypt_armored_string("").unwrap_err(),
            KeyPurpose::Decryption,
        ),
        (
            pgp.verify_armored_string("", true).unwrap_err(),
            KeyPurpose::Verification,
        ),
        (
            pgp.verify_clear_armored_string("").unwrap_err(),
            KeyPurpose::Verification,
        ),
    ];
    for (err, expected) in cases {
        assert_eq!(err.kind(), ErrorKind::KeyMaterialMissing);
        match err {
            Error::KeyMaterialMissing { purpose } => assert_eq!(purpose, expected),
            other => panic!("unexpected error {other:?}"),
        }
    }
}

#[test]
fn decrypt_requires_encrypted_input() {
    let alice = Party::new(119, "alice");
    let bob = Party::new(120, "bob");

    let signed = sender(&alice, &[&bob])
        .sign_armored_string(CONTENT, &options())
        .unwrap();
    let err = receiver(&bob, &alice)
        .decrypt_armored_string(&signed)
        .unwrap_err();
    assert!(matches!(err, Error::UnknownFormat));
    assert_eq!(err.to_string(), "Failed to detect encrypted content format.");

    let err = receiver(&bob, &alice)
        .decrypt_armored_string("definitely not a message")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
}

#[test]
fn verify_encrypted_input() {
    let alice = Party::new(121, "alice");
    let bob = Party::new(122, "bob");

    let encrypted = sender(&alice, &[&bob])
        .encrypt_and_sign_armored_string(CONTENT, &options())
        .unwrap();
    let pgp = receiver(&bob, &alice);

    let err = pgp.verify_armored_string(&encrypted, true).unwrap_err();
    assert!(matches!(err, Error::EncryptedInput));
    assert_eq!(err.kind(), ErrorKind::InputValidation);

    assert!(pgp.verify_armored_string(&encrypted, false).unwrap());
    let result = pgp.verify_and_read_armored_string(&encrypted, false).unwrap();
    assert!(result.is_verified());
    assert_eq!(result.content(), CONTENT);

    // an unsigned message does not verify
    let unsigned = sender(&alice, &[&bob])
        .encrypt_armored_string(CONTENT, &options())
        .unwrap();
    assert!(!pgp.verify_armored_string(&unsigned, false).unwrap());
}

#[test]
fn clear_sign_and_verify() {
    let alice = Party::new(123, "alice");
    let mallory = Party::new(124, "mallory");

    let signer = Pgp::with_keys(EncryptionKeyMaterial::for_signing(alice.secret.clone(), ""));
    let text = "Hello   \n- dashed line\nbye\t\n";
    let signed = signer.clear_sign_armored_string(text, &options()).unwrap();
    assert!(signed.starts_with("-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA256\n"));
    assert!(signed.contains("\n- - dashed line\n"));

    assert!(signer.verify_clear_armored_string(&signed).unwrap());
    let result = signer.verify_clear_and_read_armored_string(&signed).unwrap();
    assert!(result.is_verified());
    assert_eq!(result.content(), text);

    // trailing whitespace is not part of the signed text
    let trimmed = signed.replace("Hello   \n", "Hello\n");
    assert!(signer.verify_clear_armored_string(&trimmed).unwrap());

    let tampered = signed.replace("bye", "BYE");
    assert!(!signer.verify_clear_armored_string(&tampered).unwrap());

    let stranger = Pgp::with_keys(EncryptionKeyMaterial::for_verification(Some(
        mallory.public.clone(),
    )));
    assert!(!stranger.verify_clear_armored_string(&signed).unwrap());
}

#[test]
fn verify_clear_uses_the_first_ring() {
    let alice = Party::new(144, "alice");
    let mallory = Party::new(145, "mallory");

    let signer = Pgp::with_keys(EncryptionKeyMaterial::for_signing(alice.secret.clone(), ""));
    let signed = signer
        .clear_sign_armored_string("signed by alice\n", &options())
        .unwrap();

    let alice_first = Pgp::with_keys(EncryptionKeyMaterial::for_verification([
        alice.public.clone(),
        mallory.public.clone(),
    ]));
    assert!(alice_first.verify_clear_armored_string(&signed).unwrap());

    let stranger_first = Pgp::with_keys(EncryptionKeyMaterial::for_verification([
        mallory.public.clone(),
        alice.public.clone(),
    ]));
    assert!(!stranger_first.verify_clear_armored_string(&signed).unwrap());
    let result = stranger_first
        .verify_clear_and_read_armored_string(&signed)
        .unwrap();
    assert!(!result.is_verified());
    assert_eq!(result.content(), "signed by alice\n");
}

#[test]
fn streams_must_start_at_zero() {
    let alice = Party::new(125, "alice");
    let bob = Party::new(126, "bob");
    let pgp = sender(&alice, &[&bob]);

    let mut input = Cursor::new(CONTENT.as_bytes().to_vec());
    input.seek(SeekFrom::Start(4)).unwrap();
    let mut out = Vec::new();
    let err = pgp
        .encrypt_stream(&mut input, &mut out, &options())
        .unwrap_err();
    assert!(matches!(err, Error::InputNotAtStart { position: 4 }));
    assert!(out.is_empty());

    input.seek(SeekFrom::Start(0)).unwrap();
    let binary = OutputOptions::builder().armor(false).build().unwrap();
    pgp.encrypt_stream(&mut input, &mut out, &binary).unwrap();
    assert!(!out.starts_with(b"-----BEGIN"));

    let mut decrypted = Vec::new();
    receiver(&bob, &alice)
        .decrypt_stream(Cursor::new(out), &mut decrypted)
        .unwrap();
    assert_eq!(decrypted, CONTENT.as_bytes());
}

#[test]
fn file_round_trip() {
    let alice = Party::new(127, "alice");
    let bob = Party::new(128, "bob");
    let dir = tempfile::tempdir().unwrap();

    let plain = dir.path().join("letter.txt");
    let encrypted = dir.path().join("letter.txt.gpg");
    let decrypted = dir.path().join("letter.out.txt");
    fs::write(&plain, CONTENT).unwrap();

    sender(&alice, &[&bob])
        .encrypt_and_sign_file(&plain, &encrypted, &options())
        .unwrap();

    let pgp = receiver(&bob, &alice);
    let inspection = pgp.inspect_file(&encrypted).unwrap();
    assert!(inspection.is_armored);
    assert!(inspection.is_encrypted);
    assert!(inspection.is_integrity_protected);
    assert!(inspection.is_signed);
    assert_eq!(inspection.file_name.as_deref(), Some("letter.txt"));

    pgp.decrypt_and_verify_file(&encrypted, &decrypted).unwrap();
    assert_eq!(fs::read_to_string(&decrypted).unwrap(), CONTENT);

    assert_eq!(
        pgp.get_recipients_file(&encrypted).unwrap(),
        vec![bob.encryption_key_id()]
    );
}

#[test]
fn embedded_name_can_be_overridden() {
    let alice = Party::new(129, "alice");
    let bob = Party::new(130, "bob");

    let pgp = sender(&alice, &[&bob]);
    let default = pgp.encrypt_armored_string(CONTENT, &options()).unwrap();
    let named = pgp
        .encrypt_armored_string(
            CONTENT,
            &OutputOptions::builder().name("report.txt").build().unwrap(),
        )
        .unwrap();

    let reader = receiver(&bob, &alice);
    assert_eq!(
        reader.inspect_armored_string(&default).unwrap().file_name.as_deref(),
        Some(pgp_facade::DEFAULT_FILE_NAME)
    );
    assert_eq!(
        reader.inspect_armored_string(&named).unwrap().file_name.as_deref(),
        Some("report.txt")
    );
}

#[test]
fn failed_verification_leaves_output_file() {
    let alice = Party::new(131, "alice");
    let bob = Party::new(132, "bob");
    let dir = tempfile::tempdir().unwrap();

    let plain = dir.path().join("plain.txt");
    let encrypted = dir.path().join("plain.txt.gpg");
    let decrypted = dir.path().join("decrypted.txt");
    fs::write(&plain, CONTENT).unwrap();

    sender(&alice, &[&bob])
        .encrypt_file(&plain, &encrypted, &options())
        .unwrap();

    let err = receiver(&bob, &alice)
        .decrypt_and_verify_file(&encrypted, &decrypted)
        .unwrap_err();
    assert!(matches!(err, Error::NotSigned));
    assert_eq!(fs::read_to_string(&decrypted).unwrap().trim(), "");
}

#[test]
fn unknown_signer_leaves_output_empty() {
    let alice = Party::new(146, "alice");
    let bob = Party::new(147, "bob");
    let mallory = Party::new(148, "mallory");
    let dir = tempfile::tempdir().unwrap();

    let plain = dir.path().join("plain.txt");
    let encrypted = dir.path().join("plain.txt.gpg");
    let decrypted = dir.path().join("decrypted.txt");
    fs::write(&plain, CONTENT).unwrap();

    sender(&alice, &[&bob])
        .encrypt_and_sign_file(&plain, &encrypted, &options())
        .unwrap();

    let err = receiver(&bob, &mallory)
        .decrypt_and_verify_file(&encrypted, &decrypted)
        .unwrap_err();
    assert!(matches!(err, Error::VerificationFailed), "{err:?}");
    assert!(decrypted.exists());
    assert_eq!(fs::read(&decrypted).unwrap(), b"");
}

#[test]
fn tampered_messages_fail_the_integrity_check() {
    let _ = pretty_env_logger::try_init();

    let alice = Party::new(149, "alice");
    let bob = Party::new(150, "bob");
    let binary = OutputOptions::builder().armor(false).build().unwrap();

    let mut rng = ChaCha8Rng::seed_from_u64(151);
    let mut content = vec![0u8; 4096];
    rng.fill_bytes(&mut content);

    for compression in [Compression::Uncompressed, Compression::ZLib] {
        let config = PgpConfigBuilder::default()
            .compression(compression)
            .build()
            .unwrap();
        let pgp = Pgp::new(sender(&alice, &[&bob]).keys().clone(), config);
        let mut encrypted = Vec::new();
        pgp.encrypt_stream(Cursor::new(&content), &mut encrypted, &binary)
            .unwrap();

        for offset in [5, 30, 100] {
            let mut tampered = encrypted.clone();
            let at = tampered.len() - offset;
            tampered[at] ^= 0x55;

            let mut out = Vec::new();
            let err = receiver(&bob, &alice)
                .decrypt_stream(Cursor::new(tampered), &mut out)
                .unwrap_err();
            assert!(
                matches!(err, Error::IntegrityCheckFailed { .. }),
                "{compression:?} at -{offset}: {err:?}"
            );
            assert_eq!(err.kind(), ErrorKind::Integrity);
        }
    }
}

#[test]
fn file_modification_time_is_kept() {
    let alice = Party::new(152, "alice");
    let bob = Party::new(153, "bob");
    let dir = tempfile::tempdir().unwrap();

    let plain = dir.path().join("dated.txt");
    let encrypted = dir.path().join("dated.txt.gpg");
    fs::write(&plain, CONTENT).unwrap();
    let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(1_577_934_245);
    fs::File::options()
        .write(true)
        .open(&plain)
        .unwrap()
        .set_modified(modified)
        .unwrap();

    sender(&alice, &[&bob])
        .encrypt_file(&plain, &encrypted, &options())
        .unwrap();

    let inspection = receiver(&bob, &alice).inspect_file(&encrypted).unwrap();
    assert_eq!(
        inspection.modification_time,
        DateTime::from_timestamp(1_577_934_245, 0)
    );
    assert_eq!(
        inspection.modification_time.unwrap().to_rfc3339(),
        "2020-01-02T03:04:05+00:00"
    );
}

#[test]
fn missing_input_file() {
    let alice = Party::new(133, "alice");
    let bob = Party::new(134, "bob");
    let dir = tempfile::tempdir().unwrap();

    let output = dir.path().join("out.gpg");
    let err = sender(&alice, &[&bob])
        .encrypt_file(dir.path().join("nope.txt"), &output, &options())
        .unwrap_err();
    assert!(matches!(err, Error::InputFileMissing { .. }));
    // nothing is created before the input has been checked
    assert!(!output.exists());
}

#[test]
fn armor_headers() {
    let alice = Party::new(135, "alice");
    let bob = Party::new(136, "bob");

    let options = OutputOptions::builder()
        .header("Comment", "for bob only")
        .build()
        .unwrap();
    let encrypted = sender(&alice, &[&bob])
        .encrypt_armored_string(CONTENT, &options)
        .unwrap();
    assert!(encrypted.contains("Comment: for bob only"));

    let inspection = receiver(&bob, &alice)
        .inspect_armored_string(&encrypted)
        .unwrap();
    assert_eq!(
        inspection.headers.get("Comment"),
        Some(&vec!["for bob only".to_string()])
    );
}

#[test]
fn inspect_without_secret_key() {
    let alice = Party::new(137, "alice");
    let bob = Party::new(138, "bob");

    let encrypted = sender(&alice, &[&bob])
        .encrypt_armored_string(CONTENT, &options())
        .unwrap();
    let inspection = Pgp::default().inspect_armored_string(&encrypted).unwrap();
    assert!(inspection.is_encrypted);
    assert!(!inspection.is_signed);
    assert!(inspection.file_name.is_none());

    let signed = Pgp::with_keys(EncryptionKeyMaterial::for_signing(alice.secret.clone(), ""))
        .sign_armored_string(CONTENT, &options())
        .unwrap();
    let inspection = Pgp::default().inspect_armored_string(&signed).unwrap();
    assert!(!inspection.is_encrypted);
    assert!(inspection.is_signed);

    let err = Pgp::default()
        .get_recipients_armored_string(&signed)
        .unwrap_err();
    assert!(matches!(err, Error::UnknownFormat));
}

#[test]
fn preferred_recipient_key() {
    let alice = Party::new(139, "alice");
    let bob = Party::new(140, "bob");

    let mut keys = EncryptionKeyMaterial::for_encryption(Some(bob.public.clone()));
    keys.add_secret_key(alice.secret.clone(), "");

    let sub = bob.encryption_key_id();
    let unknown = Party::new(143, "carol").encryption_key_id();
    assert_eq!(keys.use_preferred_keys(&[unknown]), 0);
    assert_eq!(keys.use_preferred_keys(&[sub]), 1);

    let encrypted = Pgp::with_keys(keys)
        .encrypt_armored_string(CONTENT, &options())
        .unwrap();
    assert_eq!(
        Pgp::default()
            .get_recipients_armored_string(&encrypted)
            .unwrap(),
        vec![sub]
    );
}

#[test]
fn keys_from_armored_text() {
    let alice = Party::new(141, "alice");
    let bob = Party::new(142, "bob");

    let armored = bob.public.to_armored_string(Default::default()).unwrap();
    let recipients: Vec<SignedPublicKey> =
        pgp_facade::read_public_keys(Cursor::new(armored.as_bytes())).unwrap();

    let mut keys = EncryptionKeyMaterial::for_encryption(recipients);
    keys.add_secret_key(alice.secret.clone(), "");
    let encrypted = Pgp::with_keys(keys)
        .encrypt_armored_string(CONTENT, &options())
        .unwrap();

    let armored = bob.secret.to_armored_string(Default::default()).unwrap();
    let secret = pgp_facade::read_secret_keys(Cursor::new(armored.as_bytes()))
        .unwrap()
        .remove(0);
    let decrypted = Pgp::with_keys(EncryptionKeyMaterial::for_decryption(secret, ""))
        .decrypt_armored_string(&encrypted)
        .unwrap();
    assert_eq!(decrypted, CONTENT);
}
