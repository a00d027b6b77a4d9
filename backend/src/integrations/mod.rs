// Collaborator Integrations - HTTP and Postgres adapters for the engine's collaborators

pub mod commissions;
pub mod inventory;
pub mod orders;

pub use commissions::HttpCommissionService;
pub use inventory::HttpInventoryService;
pub use orders::PgOrderDirectory;

use std::time::Duration;

use crate::workflows::{CollaboratorError, CollaboratorResult};

/// Build the client shared by the HTTP adapters.
pub fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Map a downstream response onto the collaborator contract: server errors
/// and throttling may succeed later, other client errors will not.
pub(crate) async fn check_response(
    service: &str,
    response: reqwest::Response,
) -> CollaboratorResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = format!("{} returned {}: {}", service, status, body);
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Err(CollaboratorError::retryable(message))
    } else {
        Err(CollaboratorError::permanent(message))
    }
}

/// Transport failures (timeouts, refused connections) are worth retrying.
pub(crate) fn transport_error(service: &str, err: reqwest::Error) -> CollaboratorError {
    CollaboratorError::retryable(format!("{} request failed: {}", service, err))
}
