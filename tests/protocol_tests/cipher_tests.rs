//! Cipher Tests
//!
//! Tests for AES-ECB payload encryption and the v3.1 envelope.

use tuya_stub::protocol::{Cipher, BLOCK_SIZE};
use tuya_stub::{ProtocolVersion, StubError};

const KEY: &[u8; 16] = b"0123456789abcdef";

fn cipher() -> Cipher {
    Cipher::new(KEY, ProtocolVersion::V3_1)
}

// =============================================================================
// Block Encryption Tests
// =============================================================================

#[test]
fn test_aes128_known_answer() {
    // FIPS-197 appendix C.1
    let key: [u8; 16] = core::array::from_fn(|i| i as u8);
    let plaintext = hex::decode("00112233445566778899aabbccddeeff").unwrap();

    let ciphertext = Cipher::new(&key, ProtocolVersion::V3_1).encrypt(&plaintext);

    // One full block of PKCS#7 padding follows the aligned input
    assert_eq!(ciphertext.len(), 2 * BLOCK_SIZE);
    assert_eq!(
        hex::encode(&ciphertext[..BLOCK_SIZE]),
        "69c4e0d86a7b0430d8cdb78070b4c55a"
    );
}

#[test]
fn test_encrypt_decrypt_round_trip() {
    let cipher = cipher();
    for len in [0usize, 1, 15, 16, 17, 100] {
        let plaintext: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
        let ciphertext = cipher.encrypt(&plaintext);

        assert_eq!(ciphertext.len() % BLOCK_SIZE, 0);
        assert!(ciphertext.len() > plaintext.len());
        assert_eq!(cipher.decrypt(&ciphertext).unwrap(), plaintext);
    }
}

#[test]
fn test_identical_blocks_encrypt_identically() {
    let ciphertext = cipher().encrypt(&[0x42; 2 * BLOCK_SIZE]);
    assert_eq!(ciphertext[..BLOCK_SIZE], ciphertext[BLOCK_SIZE..2 * BLOCK_SIZE]);
}

#[test]
fn test_decrypt_rejects_unaligned_length() {
    let cipher = cipher();
    let ciphertext = cipher.encrypt(b"hello");

    assert!(matches!(
        cipher.decrypt(&ciphertext[..BLOCK_SIZE - 1]),
        Err(StubError::Decryption(_))
    ));
    assert!(matches!(cipher.decrypt(&[]), Err(StubError::Decryption(_))));
}

#[test]
fn test_decrypt_rejects_bad_padding() {
    let cipher = cipher();

    // Under ECB the first ciphertext block decrypts to the first plaintext
    // block alone, whose last byte is not valid padding
    let mut plaintext = [b'a'; BLOCK_SIZE];
    plaintext[BLOCK_SIZE - 1] = 0x00;
    let ciphertext = cipher.encrypt(&plaintext);

    assert!(matches!(
        cipher.decrypt(&ciphertext[..BLOCK_SIZE]),
        Err(StubError::Decryption(_))
    ));

    plaintext[BLOCK_SIZE - 1] = 0x11;
    let ciphertext = cipher.encrypt(&plaintext);
    assert!(matches!(
        cipher.decrypt(&ciphertext[..BLOCK_SIZE]),
        Err(StubError::Decryption(_))
    ));
}

// =============================================================================
// Envelope Tests
// =============================================================================

#[test]
fn test_seal_open_round_trip() {
    let cipher = cipher();
    let plaintext = br#"{"devId":"dev123","dps":{"1":true}}"#;

    let envelope = cipher.seal(plaintext);

    assert!(cipher.is_sealed(&envelope));
    assert_eq!(cipher.open(&envelope).unwrap(), plaintext);
}

#[test]
fn test_known_envelope() {
    let envelope = cipher().seal(br#"{"devId":"dev123","t":1700000000,"dps":{"1":true}}"#);
    assert_eq!(
        std::str::from_utf8(&envelope).unwrap(),
        "3.194349dbc267260350TYgUEPTqvSiH90reLo6+B8qGMxylQQdEOumU+H/LkfwmiZPQe0u0pYvj/EURNTdZCFfNlsNrWsqyPqxWx1AvQ=="
    );
}

#[test]
fn test_open_rejects_bad_signature() {
    let cipher = cipher();
    let mut envelope = cipher.seal(b"{}");
    envelope[3] = if envelope[3] == b'0' { b'1' } else { b'0' };

    assert!(matches!(cipher.open(&envelope), Err(StubError::Decryption(_))));
}

#[test]
fn test_open_rejects_missing_header() {
    let cipher = cipher();
    assert!(matches!(cipher.open(b"{}"), Err(StubError::Decryption(_))));
    assert!(matches!(cipher.open(b"3.1abc"), Err(StubError::Decryption(_))));
}

#[test]
fn test_open_rejects_invalid_base64() {
    let cipher = cipher();
    let envelope = cipher.seal(b"{}");

    // Keep the signature but corrupt the body; signature no longer matches
    let mut corrupted = envelope[..19].to_vec();
    corrupted.extend_from_slice(b"!!!!");
    assert!(matches!(cipher.open(&corrupted), Err(StubError::Decryption(_))));
}
