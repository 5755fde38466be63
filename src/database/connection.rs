use log::{debug, error, warn};
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use postgres_openssl::MakeTlsConnector;
use std::future::Future;
use tokio::time::{sleep, timeout};
use url::Url;

use crate::config::RetryPolicy;
use crate::error::RigError;

pub fn create_ssl_connector(sslrootcert_path: &str) -> Result<MakeTlsConnector, RigError> {
    let mut builder = SslConnector::builder(SslMethod::tls())
        .map_err(|e| RigError::Config(format!("SSL builder error: {}", e)))?;

    builder
        .set_ca_file(sslrootcert_path)
        .map_err(|e| RigError::Config(format!("Error loading CA cert: {}", e)))?;

    builder.set_verify(SslVerifyMode::PEER);

    Ok(MakeTlsConnector::new(builder.build()))
}

/// Split the `sslrootcert` parameter off a connection URL
///
/// Returns the URL without that parameter and the CA file path, if any.
pub fn split_sslrootcert(database_url: &str) -> Result<(String, Option<String>), RigError> {
    let url = Url::parse(database_url)
        .map_err(|e| RigError::Config(format!("DATABASE_URL parse error: {}", e)))?;

    let mut sslrootcert_path = None;
    let mut clean_params = Vec::new();
    for (key, value) in url.query_pairs() {
        if key == "sslrootcert" {
            sslrootcert_path = Some(value.to_string());
        } else {
            clean_params.push((key.into_owned(), value.into_owned()));
        }
    }

    let mut clean_url = url.clone();
    clean_url.set_query(None);
    if !clean_params.is_empty() {
        let query = clean_params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        clean_url.set_query(Some(&query));
    }

    Ok((clean_url.to_string(), sslrootcert_path))
}

/// Open a client, over TLS when the URL names a CA file
pub async fn connect(database_url: &str) -> Result<tokio_postgres::Client, RigError> {
    let (clean_database_url, sslrootcert_path) = split_sslrootcert(database_url)?;

    let client = match sslrootcert_path {
        Some(path) => {
            let connector = create_ssl_connector(&path)?;
            let (client, connection) = tokio_postgres::connect(&clean_database_url, connector)
                .await
                .map_err(|e| RigError::NetworkUnavailable(format!("connect failed: {}", e)))?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    error!("Connection error: {}", e);
                }
            });
            client
        }
        None => {
            let (client, connection) =
                tokio_postgres::connect(&clean_database_url, tokio_postgres::NoTls)
                    .await
                    .map_err(|e| RigError::NetworkUnavailable(format!("connect failed: {}", e)))?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    error!("Connection error: {}", e);
                }
            });
            client
        }
    };

    Ok(client)
}

/// Run `operation` until it succeeds or the policy is exhausted
///
/// Every attempt is bounded by the policy's timeout; failed attempts back
/// off exponentially up to `max_backoff`. The final error is always
/// `NetworkUnavailable`.
pub async fn execute_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, RigError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RigError>>,
{
    let max_attempts = policy.max_attempts.get();
    let mut backoff = policy.initial_backoff;
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        match timeout(policy.attempt_timeout, operation()).await {
            Ok(Ok(value)) => {
                if attempt > 1 {
                    debug!("{}: succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Ok(Err(e)) => {
                warn!(
                    "{}: attempt {}/{} failed: {}",
                    label, attempt, max_attempts, e
                );
                last_error = e.to_string();
            }
            Err(_) => {
                warn!(
                    "{}: attempt {}/{} timed out after {:?}",
                    label, attempt, max_attempts, policy.attempt_timeout
                );
                last_error = format!("timed out after {:?}", policy.attempt_timeout);
            }
        }

        if attempt < max_attempts {
            sleep(backoff).await;
            backoff = (backoff * 2).min(policy.max_backoff);
        }
    }

    Err(RigError::NetworkUnavailable(format!(
        "{} failed after {} attempts: {}",
        label, max_attempts, last_error
    )))
}
