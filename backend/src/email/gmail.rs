//! Gmail API transport.
//!
//! Sends a raw RFC 2822 message, base64url-encoded, to the Gmail
//! `users.messages.send` endpoint with an OAuth bearer token.

use std::time::Duration;

use async_trait::async_trait;
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE},
    Engine as _,
};
use reqwest::Client;
use serde::Serialize;

use super::{rejection, transport_error, EmailError, Mailer, OutgoingEmail};
use crate::models::EmailProvider;

#[derive(Serialize)]
struct SendRequest {
    raw: String,
}

pub struct GmailMailer {
    client: Client,
    endpoint: String,
    access_token: String,
}

impl GmailMailer {
    pub fn new(
        endpoint: &str,
        access_token: &str,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            access_token: access_token.to_string(),
        })
    }
}

#[async_trait]
impl Mailer for GmailMailer {
    fn provider(&self) -> EmailProvider {
        EmailProvider::Gmail
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
        let body = SendRequest {
            raw: URL_SAFE.encode(build_mime(email)),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }
        Ok(())
    }
}

/// Build a single-part HTML message. Header values that may carry
/// non-ASCII text use RFC 2047 encoded words.
fn build_mime(email: &OutgoingEmail) -> String {
    let headers = [
        format!(
            "From: {} <{}>",
            encoded_word(&email.from_name),
            email.from_address
        ),
        format!("To: {}", email.to),
        format!("Subject: {}", encoded_word(&email.subject)),
        "MIME-Version: 1.0".to_string(),
        "Content-Type: text/html; charset=\"UTF-8\"".to_string(),
        "Content-Transfer-Encoding: base64".to_string(),
    ];

    let encoded_body = STANDARD.encode(email.html.as_bytes());
    let mut body_lines = String::with_capacity(encoded_body.len() + encoded_body.len() / 76 * 2);
    for chunk in encoded_body.as_bytes().chunks(76) {
        // base64 output is ASCII
        body_lines.push_str(&String::from_utf8_lossy(chunk));
        body_lines.push_str("\r\n");
    }

    format!("{}\r\n\r\n{}", headers.join("\r\n"), body_lines)
}

fn encoded_word(text: &str) -> String {
    if text.is_ascii() && !text.contains(['\r', '\n']) {
        text.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(text.as_bytes()))
    }
}
