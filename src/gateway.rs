//! External collaborators: credentials, REST location fallback, background execution

use std::future::Future;

use thiserror::Error;

use crate::LocationUpdate;

/// Source of the current access credential
pub trait CredentialProvider: Send + Sync {
    fn access_token(&self) -> Option<String>;
}

impl<F> CredentialProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn access_token(&self) -> Option<String> {
        self()
    }
}

/// Fixed credential, or none at all
#[derive(Clone, Debug, Default)]
pub struct StaticCredentials(Option<String>);

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl CredentialProvider for StaticCredentials {
    fn access_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Errors of the REST fallback channel
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Location update rejected with status {0}")]
    Status(u16),
}

/// REST endpoint receiving periodic location reports
pub trait OrderLocationGateway: Send + Sync + 'static {
    fn update_location(
        &self,
        update: &LocationUpdate,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;
}

/// Keeps the process running while the app is not in the foreground
pub trait BackgroundExecution: Send + Sync {
    fn begin(&self);
    fn end(&self);
}

/// For hosts without a background execution concept
#[derive(Clone, Copy, Debug, Default)]
pub struct NoBackground;

impl BackgroundExecution for NoBackground {
    fn begin(&self) {}
    fn end(&self) {}
}

#[cfg(feature = "http")]
pub use http::HttpLocationGateway;

#[cfg(feature = "http")]
mod http {
    use std::sync::Arc;
    use std::time::Duration;

    use tracing::debug;

    use super::{CredentialProvider, GatewayError, OrderLocationGateway};
    use crate::LocationUpdate;

    const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

    /// JSON over HTTP implementation of the location gateway
    pub struct HttpLocationGateway {
        http: reqwest::Client,
        endpoint: String,
        credentials: Arc<dyn CredentialProvider>,
    }

    impl HttpLocationGateway {
        pub fn new(
            endpoint: String,
            credentials: Arc<dyn CredentialProvider>,
        ) -> Result<Self, GatewayError> {
            let http = reqwest::Client::builder()
                .timeout(DEFAULT_HTTP_TIMEOUT)
                .build()
                .map_err(|e| GatewayError::Http(e.to_string()))?;

            Ok(Self {
                http,
                endpoint,
                credentials,
            })
        }
    }

    impl OrderLocationGateway for HttpLocationGateway {
        async fn update_location(&self, update: &LocationUpdate) -> Result<(), GatewayError> {
            let mut request = self.http.post(&self.endpoint).json(update);
            if let Some(token) = self.credentials.access_token() {
                request = request.bearer_auth(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| GatewayError::Http(e.to_string()))?;

            let status = response.status();
            debug!(status = %status, endpoint = %self.endpoint, "Location fallback sent");
            if !status.is_success() {
                return Err(GatewayError::Status(status.as_u16()));
            }

            Ok(())
        }
    }
}
