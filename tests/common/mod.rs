#![allow(dead_code)]

use cloud_connect::{ClientConfig, ControlClient};
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const API_PREFIX: &str = "/cluster/v1";
pub const REFRESH_TOKEN: &str = "refresh-token";
pub const ID_TOKEN: &str = "id-token";

pub fn api_path(suffix: &str) -> String {
    format!("{API_PREFIX}/{suffix}")
}

pub fn client_for(server: &MockServer) -> ControlClient {
    ControlClient::new(
        ClientConfig::builder()
            .cluster_api_endpoint(format!("{}{API_PREFIX}", server.uri()))
            .connect_api_endpoint("http://127.0.0.1:8721")
            .api_token(REFRESH_TOKEN)
            .build()
            .unwrap(),
    )
    .unwrap()
}

/// Mounts a token exchange that issues `ID_TOKEN` valid for `expires_in` seconds.
pub async fn mount_token_exchange(server: &MockServer, expires_in: u64) {
    Mock::given(method("POST"))
        .and(path(api_path("exchangeToken")))
        .and(body_json(json!({ "refreshToken": REFRESH_TOKEN })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "idToken": ID_TOKEN,
            "expiresInSeconds": expires_in.to_string(),
        })))
        .mount(server)
        .await;
}
