//! SMART standalone launch: the browser redirect to Epic's authorize endpoint.

use url::Url;

use crate::oauth::pkce::{PkceChallenge, PkceChallengeMethod};

/// Parameters of the authorization request sent through the browser.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub client_id: String,
    pub scope: String,
    pub redirect_uri: String,
    pub state: String,
    pub code_challenge_method: PkceChallengeMethod,
    pub code_challenge: PkceChallenge,
    /// FHIR base URL the token will be used against.
    pub aud: String,
}

impl AuthorizationRequest {
    /// Appends the request as query parameters to `auth_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `auth_url` is not an absolute URL.
    pub fn to_url(&self, auth_url: &str) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(auth_url)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("scope", &self.scope)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("state", &self.state)
            .append_pair("code_challenge_method", self.code_challenge_method.as_str())
            .append_pair("code_challenge", self.code_challenge.as_str())
            .append_pair("aud", &self.aud);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::pkce::PkceVerifier;
    use std::collections::HashMap;

    #[test]
    fn test_authorization_url_parameters() {
        let verifier = PkceVerifier::generate();
        let request = AuthorizationRequest {
            client_id: "clientA".to_string(),
            scope: "openid launch/patient".to_string(),
            redirect_uri: "https://telemedicall.com/Epic/Callback".to_string(),
            state: "abc".to_string(),
            code_challenge_method: PkceChallengeMethod::S256,
            code_challenge: PkceChallenge::from_verifier(&verifier),
            aud: "https://fhir.example/R4".to_string(),
        };

        let url = request
            .to_url("https://fhir.example/oauth2/authorize")
            .unwrap();
        assert_eq!(url.path(), "/oauth2/authorize");

        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(query["client_id"], "clientA");
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["scope"], "openid launch/patient");
        assert_eq!(query["redirect_uri"], "https://telemedicall.com/Epic/Callback");
        assert_eq!(query["code_challenge_method"], "S256");
        assert_eq!(query["aud"], "https://fhir.example/R4");
        assert!(PkceChallenge::from_verifier(&verifier).as_str() == query["code_challenge"]);
    }

    #[test]
    fn test_relative_auth_url_rejected() {
        let request = AuthorizationRequest {
            client_id: "c".to_string(),
            scope: "s".to_string(),
            redirect_uri: "r".to_string(),
            state: "s".to_string(),
            code_challenge_method: PkceChallengeMethod::S256,
            code_challenge: PkceChallenge::from_verifier(&PkceVerifier::generate()),
            aud: "a".to_string(),
        };
        assert!(request.to_url("/oauth2/authorize").is_err());
    }
}
