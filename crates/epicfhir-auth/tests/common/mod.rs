#![allow(dead_code)]

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use epicfhir_auth::{
    EpicConfig, MemoryCredentialStorage, RequestContext, RequestOrigin, SigningAlgorithm,
    SigningKeys, TokenService,
};
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};

/// A 2048-bit key pair generated once per test binary.
pub fn key_pair_pem() -> (&'static str, &'static str) {
    static PAIR: OnceLock<(String, String)> = OnceLock::new();
    let (private_pem, public_pem) = PAIR.get_or_init(|| {
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
    });
    (private_pem, public_pem)
}

pub fn signing_keys() -> Arc<SigningKeys> {
    let (private_pem, public_pem) = key_pair_pem();
    Arc::new(
        SigningKeys::from_pem("Epic-key", SigningAlgorithm::RS256, private_pem, public_pem)
            .expect("load test keys"),
    )
}

/// Configuration pointing every Epic endpoint at `server_uri`.
pub fn config_for(server_uri: &str) -> EpicConfig {
    EpicConfig {
        token_url: format!("{server_uri}/oauth2/token"),
        auth_url: format!("{server_uri}/oauth2/authorize"),
        fhir_base: format!("{server_uri}/api/FHIR/R4"),
        http_timeout: Duration::from_secs(5),
        ..EpicConfig::default()
    }
}

pub fn token_service(server_uri: &str, storage: Arc<MemoryCredentialStorage>) -> TokenService {
    TokenService::new(config_for(server_uri), signing_keys(), storage).expect("token service")
}

pub fn context(host: &str) -> RequestContext {
    RequestContext::new(RequestOrigin::new(host, true))
}
