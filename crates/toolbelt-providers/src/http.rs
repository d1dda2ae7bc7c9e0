//! Response handling shared by every client.

use reqwest::{Response, StatusCode};
use toolbelt_core::truncate_on_char_boundary;

use crate::traits::ProviderError;

const DEFAULT_RETRY_AFTER_SECS: u64 = 60;
const MAX_ERROR_BODY: usize = 1024;

/// Turn a non-success response into a `ProviderError`.
pub(crate) async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        return Err(ProviderError::RateLimited {
            retry_after_secs: retry_after,
        });
    }

    let mut message = response.text().await.unwrap_or_default();
    truncate_on_char_boundary(&mut message, MAX_ERROR_BODY);

    Err(ProviderError::Api {
        status: status.as_u16(),
        message,
    })
}
