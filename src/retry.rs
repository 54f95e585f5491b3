//! Retry support for AWS SDK calls: a transient/fatal classification plus a
//! small exponential-backoff loop built on it.

use core::fmt;
use std::time::Duration;

use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;

use crate::prelude::*;

/// Is this error a known transient error?
///
/// By default, we assume errors are not transient, until they're been observed
/// in the wild, investigated and determined to be transient. This prevents us
/// from doing large numbers of retries with exponential backoff on errors that
/// will never resolve.
pub trait IsKnownTransient {
    /// Is this error likely to be transient?
    fn is_known_transient(&self) -> bool;
}

/// Any AWS SDK operation error is transient if the service reports
/// throttling or a 5xx, following the same "known transient" allowlist
/// philosophy used for HTTP errors elsewhere in this codebase.
impl<E, R> IsKnownTransient for SdkError<E, R>
where
    E: ProvideErrorMetadata,
{
    fn is_known_transient(&self) -> bool {
        match self {
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => true,
            SdkError::ServiceError(service_err) => {
                let err = service_err.err();
                let code = err.code().unwrap_or_default();
                code.eq_ignore_ascii_case("ThrottlingException")
                    || code.eq_ignore_ascii_case("ProvisionedThroughputExceededException")
                    || code.eq_ignore_ascii_case("RequestLimitExceeded")
                    || code.eq_ignore_ascii_case("InternalServerError")
                    || code.eq_ignore_ascii_case("ServiceUnavailable")
            }
            _ => false,
        }
    }
}

const MAX_RETRY_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Retry a fallible AWS call a few times with exponential backoff, but only
/// when [`IsKnownTransient::is_known_transient`] says so; anything else
/// returns on the first attempt.
pub async fn retry_transient_aws_call<T, E, F, Fut>(mut call: F) -> Result<T, E>
where
    E: IsKnownTransient + fmt::Debug,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut backoff = INITIAL_BACKOFF;
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < MAX_RETRY_ATTEMPTS && error.is_known_transient() => {
                debug!("retrying after transient error (attempt {attempt}): {error:?}");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FlakyError(bool);

    impl IsKnownTransient for FlakyError {
        fn is_known_transient(&self) -> bool {
            self.0
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let mut attempts = 0;
        let result = retry_transient_aws_call(|| {
            attempts += 1;
            let attempt = attempts;
            async move {
                if attempt < 3 {
                    Err(FlakyError(true))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn returns_immediately_on_fatal_error() {
        let mut attempts = 0;
        let result: Result<(), FlakyError> = retry_transient_aws_call(|| {
            attempts += 1;
            async { Err(FlakyError(false)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }
}
