//! # Delivery Client
//!
//! One `reqwest` client, built once, that talks to the collection endpoint.
//!
//! Every request carries HTTP Basic credentials and a bounded timeout. TLS
//! certificate and hostname checks are off because collectors commonly run
//! with self-signed certificates. Cookies live in memory only. Redirects are
//! never followed, so a 3xx answer surfaces as the status it is.
//!
//! Failures fall in two groups. A transport failure (no connection, timeout,
//! broken response) counts towards the consecutive-failure budget; once the
//! budget is used up [`DeliveryClient::connected`] turns false. Any HTTP
//! response, good or bad, resets the budget.

use std::fmt;

use reqwest::{Client, StatusCode, Url};
use thiserror::Error;

use crate::configs::{Credentials, RelaySettings};
use crate::relay::scheduler::Deliver;

const USER_AGENT: &str = concat!("famup/", env!("CARGO_PKG_VERSION"));

/// Name of the single form field carrying the payload.
pub const FORM_FIELD: &str = "data";

/// Errors surfaced by the delivery client.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The HTTP client could not be configured.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// The endpoint answered 401.
    #[error("Wrong authentication for {endpoint}")]
    Unauthorized {
        /// Endpoint URL, port included.
        endpoint: String,
    },

    /// The endpoint answered with a non-2xx status other than 401.
    #[error("{endpoint} answered HTTP {status}")]
    Rejected {
        /// Endpoint URL, port included.
        endpoint: String,
        /// Status code received.
        status: u16,
    },

    /// No usable HTTP response: connect, TLS, timeout or protocol error.
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        /// Endpoint URL, port included.
        endpoint: String,
        /// The underlying `reqwest` error.
        #[source]
        source: reqwest::Error,
    },
}

/// What the endpoint answered to a successful delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// HTTP status, always 2xx.
    pub status: u16,
}

/// # Delivery Client
///
/// Holds the persistent HTTP handle and the transport-failure budget.
pub struct DeliveryClient {
    inner: Client,
    endpoint: Url,
    credentials: Credentials,
    consecutive_failures: u32,
    max_failures: u32,
}

impl DeliveryClient {
    /// Builds the HTTP client from the relay settings.
    ///
    /// # Errors
    /// [`DeliveryError::Client`] if the TLS backend cannot be initialised.
    pub fn new(settings: &RelaySettings) -> Result<Self, DeliveryError> {
        let inner = Client::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::none())
            .timeout(settings.delivery_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(DeliveryError::Client)?;

        Ok(Self {
            inner,
            endpoint: settings.endpoint.clone(),
            credentials: settings.credentials.clone(),
            consecutive_failures: 0,
            max_failures: settings.max_delivery_failures,
        })
    }

    /// The endpoint every request goes to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Sends one empty, authenticated GET to check the credentials.
    ///
    /// Returns the status received. Only a 401 or a transport failure is an
    /// error; any other status is logged and tolerated.
    pub async fn probe(&self) -> Result<u16, DeliveryError> {
        let response = self
            .inner
            .get(self.endpoint.clone())
            .basic_auth(self.credentials.username(), Some(self.credentials.password()))
            .send()
            .await
            .map_err(|source| self.transport(source))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(self.unauthorized());
        }
        if status != StatusCode::OK {
            log::warn!(
                "Authentication probe to {} answered HTTP {}",
                self.endpoint,
                status.as_u16()
            );
        } else {
            log::info!("Authenticated against {}", self.endpoint);
        }
        Ok(status.as_u16())
    }

    /// POSTs `payload` as the form field `data`. Never retried.
    pub async fn post(&mut self, payload: &str) -> Result<DeliveryReceipt, DeliveryError> {
        let sent = self
            .inner
            .post(self.endpoint.clone())
            .basic_auth(self.credentials.username(), Some(self.credentials.password()))
            .form(&[(FORM_FIELD, payload)])
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(source) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                return Err(self.transport(source));
            }
        };
        self.consecutive_failures = 0;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(self.unauthorized());
        }
        if !status.is_success() {
            if let Ok(body) = response.text().await {
                log::debug!("Rejected delivery body: {}", body.trim());
            }
            return Err(DeliveryError::Rejected {
                endpoint: self.endpoint.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(DeliveryReceipt {
            status: status.as_u16(),
        })
    }

    /// Transport failures in a row since the last HTTP response.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// False once the failure budget is exhausted.
    pub fn connected(&self) -> bool {
        self.consecutive_failures < self.max_failures
    }

    fn transport(&self, source: reqwest::Error) -> DeliveryError {
        DeliveryError::Transport {
            endpoint: self.endpoint.to_string(),
            source,
        }
    }

    fn unauthorized(&self) -> DeliveryError {
        DeliveryError::Unauthorized {
            endpoint: self.endpoint.to_string(),
        }
    }
}

impl Deliver for DeliveryClient {
    async fn deliver(&mut self, payload: &str) -> Result<DeliveryReceipt, DeliveryError> {
        self.post(payload).await
    }

    fn is_connected(&self) -> bool {
        self.connected()
    }
}

impl fmt::Debug for DeliveryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("credentials", &self.credentials)
            .field("consecutive_failures", &self.consecutive_failures)
            .field("max_failures", &self.max_failures)
            .finish()
    }
}
