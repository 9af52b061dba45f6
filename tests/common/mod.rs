//! Common test utilities for data-extractor integration tests

#![allow(dead_code)]

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ID_TOKEN: &str = "integration id token";

/// Mount a Keycloak token endpoint at `/token` expecting `calls` requests
pub async fn mount_keycloak(server: &MockServer, calls: u64) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access",
            "expires_in": 300,
            "token_type": "Bearer",
            "id_token": ID_TOKEN
        })))
        .expect(calls)
        .mount(server)
        .await;
}

/// Mount a secure agent at `/ds` answering authenticated queries with `body`
pub async fn mount_agent(server: &MockServer, body: &str, calls: u64) {
    Mock::given(method("POST"))
        .and(path("/ds"))
        .and(header("authorization", format!("bearer {ID_TOKEN}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(calls)
        .mount(server)
        .await;
}
