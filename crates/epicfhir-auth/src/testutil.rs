//! Shared fixtures for unit tests.

use std::sync::OnceLock;

use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};

fn generate_pair() -> (String, String) {
    let private_key = RsaPrivateKey::new(&mut OsRng, 2048).expect("generate RSA key");
    let private_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .expect("encode private key")
        .as_str()
        .to_owned();
    let public_pem = private_key
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .expect("encode public key");
    (private_pem, public_pem)
}

/// A 2048-bit key pair generated once per test binary.
pub fn test_key_pair_pem() -> (&'static str, &'static str) {
    static PAIR: OnceLock<(String, String)> = OnceLock::new();
    let (private_pem, public_pem) = PAIR.get_or_init(generate_pair);
    (private_pem, public_pem)
}

/// A second, unrelated key pair.
pub fn other_key_pair_pem() -> (&'static str, &'static str) {
    static PAIR: OnceLock<(String, String)> = OnceLock::new();
    let (private_pem, public_pem) = PAIR.get_or_init(generate_pair);
    (private_pem, public_pem)
}
