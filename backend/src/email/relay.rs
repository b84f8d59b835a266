//! SMTP-relay HTTP API transport (transactional-email JSON API).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{rejection, transport_error, EmailError, Mailer, OutgoingEmail};
use crate::models::EmailProvider;

const API_KEY_HEADER: &str = "api-key";

#[derive(Serialize)]
struct Contact<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    email: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    sender: Contact<'a>,
    to: [Contact<'a>; 1],
    subject: &'a str,
    html_content: &'a str,
}

impl<'a> From<&'a OutgoingEmail> for SendRequest<'a> {
    fn from(email: &'a OutgoingEmail) -> Self {
        Self {
            sender: Contact {
                name: Some(email.from_name.as_str()).filter(|n| !n.is_empty()),
                email: &email.from_address,
            },
            to: [Contact {
                name: None,
                email: &email.to,
            }],
            subject: &email.subject,
            html_content: &email.html,
        }
    }
}

pub struct RelayMailer {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl RelayMailer {
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl Mailer for RelayMailer {
    fn provider(&self) -> EmailProvider {
        EmailProvider::SmtpRelay
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(API_KEY_HEADER, &self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&SendRequest::from(email))
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }
        Ok(())
    }
}
