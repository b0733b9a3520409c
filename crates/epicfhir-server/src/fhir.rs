//! Client for Epic's FHIR R4 API.
//!
//! Every call is bearer-authenticated with a token obtained through
//! [`epicfhir_auth::TokenService`] and asks for `application/fhir+json`.

use std::time::Duration;

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use crate::config::FhirProxyConfig;
use crate::error::ApiError;

pub const FHIR_JSON: &str = "application/fhir+json";

/// A successful upstream answer, passed through to the caller.
#[derive(Debug, Clone)]
pub struct FhirResponse {
    pub status: u16,
    pub body: String,
}

impl IntoResponse for FhirResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        (
            status,
            [(header::CONTENT_TYPE, HeaderValue::from_static(FHIR_JSON))],
            self.body,
        )
            .into_response()
    }
}

/// Result of creating a Patient.
#[derive(Debug, Clone, Serialize)]
pub struct PatientCreated {
    pub status: u16,
    pub location: Option<String>,
    pub body: Value,
}

/// Demographics accepted by the Patient create endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PatientInput {
    pub family_name: Option<String>,
    pub given_name: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<String>,
    pub suffix: Option<String>,
    pub identifier_system1: Option<String>,
    pub identifier_value1: Option<String>,
    pub identifier_system2: Option<String>,
    pub identifier_value2: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub marital_status: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl PatientInput {
    /// Checks that the fields Epic requires are non-empty.
    pub fn validate(&self) -> Result<(), ApiError> {
        for (field, value) in [
            ("familyName", &self.family_name),
            ("givenName", &self.given_name),
            ("gender", &self.gender),
            ("birthDate", &self.birth_date),
        ] {
            if present(value).is_none() {
                return Err(ApiError::bad_request(format!(
                    "Missing required field: {field}"
                )));
            }
        }
        Ok(())
    }
}

/// Builds a FHIR R4 `Patient` resource from validated input.
pub fn build_patient_resource(data: &PatientInput) -> Value {
    let identifiers: Vec<Value> = [
        (&data.identifier_system1, &data.identifier_value1),
        (&data.identifier_system2, &data.identifier_value2),
    ]
    .into_iter()
    .filter_map(|(system, value)| {
        Some(json!({
            "use": "usual",
            "system": present(system)?,
            "value": present(value)?,
        }))
    })
    .collect();

    let mut telecom = Vec::new();
    if let Some(phone) = present(&data.phone) {
        telecom.push(json!({ "system": "phone", "value": phone, "use": "home" }));
    }
    if let Some(email) = present(&data.email) {
        telecom.push(json!({ "system": "email", "value": email }));
    }

    let suffix: Vec<&str> = present(&data.suffix).into_iter().collect();
    let lines: Vec<&str> = [&data.address_line1, &data.address_line2]
        .into_iter()
        .filter_map(present)
        .collect();
    let text = |v: &Option<String>| v.clone().unwrap_or_default();

    json!({
        "resourceType": "Patient",
        "identifier": identifiers,
        "name": [{
            "use": "official",
            "family": text(&data.family_name),
            "given": [text(&data.given_name)],
            "suffix": suffix,
        }],
        "telecom": telecom,
        "gender": text(&data.gender),
        "birthDate": text(&data.birth_date),
        "address": [{
            "use": "home",
            "line": lines,
            "city": text(&data.city),
            "state": text(&data.state),
            "postalCode": text(&data.postal_code),
            "country": text(&data.country),
        }],
        "maritalStatus": { "text": text(&data.marital_status) },
    })
}

/// HTTP client for `{fhir_base}`.
#[derive(Debug, Clone)]
pub struct FhirClient {
    http: reqwest::Client,
    base: Url,
    lists: FhirProxyConfig,
}

impl FhirClient {
    pub fn new(fhir_base: &str, lists: FhirProxyConfig, timeout: Duration) -> Result<Self, ApiError> {
        let base = Url::parse(fhir_base)
            .map_err(|e| ApiError::internal(format!("invalid fhir_base: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ApiError::internal("fhir_base cannot be a base URL"));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, base, lists })
    }

    fn resource_url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn list_url(&self, identifier: &str, subject: Option<&str>) -> Url {
        let mut url = self.resource_url(&["List"]);
        let params = [
            ("code", self.lists.list_code.as_str()),
            ("identifier", identifier),
            ("subject", subject.unwrap_or_default()),
            ("status", self.lists.list_status.as_str()),
        ];
        if params.iter().any(|(_, v)| !v.is_empty()) {
            let mut query = url.query_pairs_mut();
            for (name, value) in params.iter().filter(|(_, v)| !v.is_empty()) {
                query.append_pair(name, value);
            }
        }
        url
    }

    async fn get(&self, token: &str, url: Url, failure: &str) -> Result<FhirResponse, ApiError> {
        debug!(url = %url, "FHIR GET");
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .header(header::ACCEPT, FHIR_JSON)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::upstream(status.as_u16(), failure));
        }

        Ok(FhirResponse {
            status: status.as_u16(),
            body: response.text().await?,
        })
    }

    /// Patient lists shared system-wide.
    pub async fn list_search(&self, token: &str) -> Result<FhirResponse, ApiError> {
        let url = self.list_url(
            &self.lists.system_lists_identifier,
            Some(&self.lists.list_subject),
        );
        self.get(token, url, "FHIR List search failed").await
    }

    /// Patient lists owned by the authenticated user.
    pub async fn my_list_search(&self, token: &str) -> Result<FhirResponse, ApiError> {
        let url = self.list_url(&self.lists.user_lists_identifier, None);
        self.get(token, url, "My Lists search failed").await
    }

    pub async fn list_read(&self, token: &str, list_id: &str) -> Result<FhirResponse, ApiError> {
        if list_id.trim().is_empty() {
            return Err(ApiError::bad_request("No List ID received"));
        }
        let url = self.resource_url(&["List", list_id]);
        self.get(token, url, "List read failed").await
    }

    pub async fn patient_summary(
        &self,
        token: &str,
        patient_id: &str,
    ) -> Result<FhirResponse, ApiError> {
        let url = self.resource_url(&["Patient", patient_id, "$summary"]);
        self.get(token, url, "Patient summary failed").await
    }

    pub async fn patient_create(
        &self,
        token: &str,
        data: &PatientInput,
    ) -> Result<PatientCreated, ApiError> {
        data.validate()?;
        let patient = build_patient_resource(data);

        let response = self
            .http
            .post(self.resource_url(&["Patient"]))
            .bearer_auth(token)
            .header(header::ACCEPT, FHIR_JSON)
            .header(header::CONTENT_TYPE, FHIR_JSON)
            .body(patient.to_string())
            .send()
            .await?;

        let status = response.status();
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ApiError::upstream(
                status.as_u16(),
                format!("Epic API Error ({}): {body}", status.as_u16()),
            ));
        }

        Ok(PatientCreated {
            status: status.as_u16(),
            location,
            body: serde_json::from_str(&body).unwrap_or(Value::Null),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header as header_eq, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base: &str) -> FhirClient {
        FhirClient::new(base, FhirProxyConfig::default(), Duration::from_secs(5)).unwrap()
    }

    fn patient() -> PatientInput {
        PatientInput {
            family_name: Some("Doe".into()),
            given_name: Some("Jane".into()),
            gender: Some("female".into()),
            birth_date: Some("1990-04-01".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_list_url_omits_empty_subject() {
        let c = client("https://fhir.example/api/FHIR/R4");
        let url = c.list_url(&c.lists.system_lists_identifier.clone(), Some(""));
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(url.path(), "/api/FHIR/R4/List");
        assert_eq!(
            pairs,
            vec![
                ("code".into(), "patients".into()),
                (
                    "identifier".into(),
                    "urn:oid:1.2.840.114350.1.13.0.1.7.2.806567|5332".into()
                ),
                ("status".into(), "current".into()),
            ]
        );
    }

    #[test]
    fn test_resource_url_handles_trailing_slash() {
        let c = client("https://fhir.example/api/FHIR/R4/");
        assert_eq!(
            c.resource_url(&["Patient", "e1", "$summary"]).as_str(),
            "https://fhir.example/api/FHIR/R4/Patient/e1/$summary"
        );
    }

    #[test]
    fn test_patient_validation() {
        let mut input = patient();
        assert!(input.validate().is_ok());
        input.gender = Some(String::new());
        assert_eq!(
            input.validate().unwrap_err().to_string(),
            "Missing required field: gender"
        );
    }

    #[test]
    fn test_build_patient_resource() {
        let mut input = patient();
        input.identifier_system1 = Some("urn:oid:1.2.3".into());
        input.identifier_value1 = Some("MRN-1".into());
        input.identifier_system2 = Some("urn:oid:4.5.6".into());
        input.phone = Some("555-0100".into());
        input.address_line2 = Some("Apt 4".into());
        input.city = Some("Madison".into());

        let resource = build_patient_resource(&input);
        assert_eq!(resource["resourceType"], "Patient");
        // second identifier has no value
        assert_eq!(resource["identifier"].as_array().unwrap().len(), 1);
        assert_eq!(resource["identifier"][0]["value"], "MRN-1");
        assert_eq!(resource["name"][0]["family"], "Doe");
        assert_eq!(resource["name"][0]["given"], json!(["Jane"]));
        assert_eq!(resource["name"][0]["suffix"], json!([]));
        assert_eq!(resource["telecom"], json!([{ "system": "phone", "value": "555-0100", "use": "home" }]));
        assert_eq!(resource["address"][0]["line"], json!(["Apt 4"]));
        assert_eq!(resource["address"][0]["city"], "Madison");
        assert_eq!(resource["address"][0]["country"], "");
        assert_eq!(resource["maritalStatus"]["text"], "");
    }

    #[tokio::test]
    async fn test_list_read_passes_body_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/R4/List/abc"))
            .and(header_eq("authorization", "Bearer tok"))
            .and(header_eq("accept", FHIR_JSON))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"resourceType":"List"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let c = client(&format!("{}/R4", server.uri()));
        let response = c.list_read("tok", "abc").await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, r#"{"resourceType":"List"}"#);
    }

    #[tokio::test]
    async fn test_list_read_requires_id() {
        let c = client("http://127.0.0.1:9/R4");
        let err = c.list_read("tok", " ").await.unwrap_err();
        assert_eq!(err.to_string(), "No List ID received");
    }

    #[tokio::test]
    async fn test_my_list_search_failure_keeps_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/R4/List"))
            .and(query_param(
                "identifier",
                "urn:oid:1.2.840.114350.1.13.0.1.7.2.698283|9192",
            ))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let c = client(&format!("{}/R4", server.uri()));
        let err = c.my_list_search("tok").await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.to_string(), "My Lists search failed");
    }

    #[tokio::test]
    async fn test_patient_create() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/R4/Patient"))
            .and(header_eq("content-type", FHIR_JSON))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("location", "Patient/e123")
                    .set_body_string(r#"{"id":"e123"}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let c = client(&format!("{}/R4", server.uri()));
        let created = c.patient_create("tok", &patient()).await.unwrap();
        assert_eq!(created.status, 201);
        assert_eq!(created.location.as_deref(), Some("Patient/e123"));
        assert_eq!(created.body["id"], "e123");

        let requests = server.received_requests().await.unwrap();
        let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(sent["name"][0]["family"], "Doe");
        assert_eq!(sent["birthDate"], "1990-04-01");
    }

    #[tokio::test]
    async fn test_patient_create_error_includes_upstream_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/R4/Patient"))
            .respond_with(ResponseTemplate::new(422).set_body_string("duplicate patient"))
            .mount(&server)
            .await;

        let c = client(&format!("{}/R4", server.uri()));
        let err = c.patient_create("tok", &patient()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.to_string(), "Epic API Error (422): duplicate patient");
    }
}
