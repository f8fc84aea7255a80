//! At-rest encryption for stored SSH credentials. AES-256-GCM with a
//! random nonce prefixed to the ciphertext, hex-encoded as one string.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};

const NONCE_SIZE: usize = 12; // AES-GCM standard nonce size

pub fn encrypt(plain_text: &str, key_hex: &str) -> Result<String, String> {
    let key_bytes = hex::decode(key_hex).map_err(|e| format!("Invalid hex key: {e}"))?;
    if key_bytes.len() != 32 {
        return Err("Credential key must be 32 bytes (256 bits) long".to_string());
    }
    let key = key_bytes.as_slice().into();
    let cipher = Aes256Gcm::new(key);

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plain_text.as_bytes())
        .map_err(|e| format!("Credential encryption failed: {e}"))?;

    let mut result = nonce.to_vec();
    result.extend_from_slice(&ciphertext);

    Ok(hex::encode(result))
}

pub fn decrypt(cipher_hex: &str, key_hex: &str) -> Result<String, String> {
    let key_bytes = hex::decode(key_hex).map_err(|e| format!("Invalid hex key: {e}"))?;
    if key_bytes.len() != 32 {
        return Err("Credential key must be 32 bytes (256 bits) long".to_string());
    }
    let key = key_bytes.as_slice().into();
    let cipher = Aes256Gcm::new(key);

    let encrypted_data =
        hex::decode(cipher_hex).map_err(|e| format!("Invalid hex ciphertext: {e}"))?;
    if encrypted_data.len() < NONCE_SIZE {
        return Err("Ciphertext is too short to contain a nonce".to_string());
    }

    let (nonce_bytes, ciphertext) = encrypted_data.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    let decrypted_bytes = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| format!("Credential decryption failed: {e}"))?;

    String::from_utf8(decrypted_bytes).map_err(|e| format!("Invalid UTF-8 sequence: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn encrypt_then_decrypt_returns_plaintext() {
        let plain = "hunter2-ssh-password";
        let encrypted = encrypt(plain, KEY).unwrap();
        assert_ne!(plain, encrypted);
        assert_eq!(plain, decrypt(&encrypted, KEY).unwrap());
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let other = "f1e1d1c1b1a191817161514131211101f0e0d0c0b0a090807060504030201000";
        let encrypted = encrypt("a private key body", KEY).unwrap();
        assert!(decrypt(&encrypted, other).is_err());
    }

    #[test]
    fn rejects_keys_of_wrong_length() {
        assert!(encrypt("x", "1234").is_err());
        assert!(decrypt("deadbeef", "1234").is_err());
    }

    #[test]
    fn rejects_non_hex_input() {
        assert!(encrypt("x", "not-a-hex-string").is_err());
        let err = decrypt("not-hex-either", KEY).unwrap_err();
        assert!(err.contains("Invalid hex ciphertext"));
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        // Shorter than the 12-byte nonce.
        assert!(decrypt("aabbcc", KEY).is_err());
    }
}
