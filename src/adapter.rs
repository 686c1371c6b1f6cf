//! Remote call adapters: one unreliable network call per invocation.

use futures::future::BoxFuture;

use crate::error::CallError;

/// One unreliable remote operation.
///
/// Each `invoke` performs exactly one call and reports its failure as a
/// [`CallError`], so the breaker can classify it.
pub trait RemoteCall: Send + Sync {
    /// Success payload.
    type Output: Send;

    /// Performs the call.
    fn invoke(&self) -> BoxFuture<'_, Result<Self::Output, CallError>>;
}

#[cfg(feature = "http")]
pub use self::http::HttpAdapter;

#[cfg(feature = "http")]
mod http {
    use futures::future::BoxFuture;
    use reqwest::{Client, Url};
    use std::time::Duration;

    use super::RemoteCall;
    use crate::error::{CallError, ConfigError};

    /// HTTP GET against a fixed URI, returning the body as text.
    ///
    /// Non-2xx answers are protocol errors.
    #[derive(Debug, Clone)]
    pub struct HttpAdapter {
        client: Client,
        uri: Url,
        timeout: Duration,
    }

    impl HttpAdapter {
        /// Creates an adapter whose calls give up after `timeout`.
        pub fn new(uri: &str, timeout: Duration) -> Result<Self, ConfigError> {
            let uri = Url::parse(uri).map_err(|e| ConfigError::Adapter(format!("{}: {}", uri, e)))?;
            let client = Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| ConfigError::Adapter(e.to_string()))?;

            Ok(Self {
                client,
                uri,
                timeout,
            })
        }

        /// The URI every call targets.
        pub fn uri(&self) -> &Url {
            &self.uri
        }

        async fn fetch(&self) -> Result<String, CallError> {
            let response = self
                .client
                .get(self.uri.clone())
                .send()
                .await
                .map_err(|e| self.classify(e))?;

            let status = response.status();
            if !status.is_success() {
                tracing::debug!(uri = %self.uri, status = status.as_u16(), "remote answered with error status");
                return Err(CallError::Protocol {
                    status: status.as_u16(),
                });
            }

            response.text().await.map_err(|e| {
                if e.is_timeout() {
                    CallError::Timeout(self.timeout)
                } else {
                    CallError::Body(e.to_string())
                }
            })
        }

        fn classify(&self, error: reqwest::Error) -> CallError {
            tracing::debug!(uri = %self.uri, %error, "remote call failed");
            if error.is_timeout() {
                CallError::Timeout(self.timeout)
            } else if let Some(status) = error.status() {
                CallError::Protocol {
                    status: status.as_u16(),
                }
            } else {
                CallError::Connection(error.to_string())
            }
        }
    }

    impl RemoteCall for HttpAdapter {
        type Output = String;

        fn invoke(&self) -> BoxFuture<'_, Result<String, CallError>> {
            Box::pin(self.fetch())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        /// Serves `response` verbatim to every connection.
        async fn serve(response: &'static str) -> String {
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
            let addr = listener.local_addr().expect("local addr");
            tokio::spawn(async move {
                while let Ok((mut socket, _)) = listener.accept().await {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
            });
            format!("http://{}/recommended", addr)
        }

        #[tokio::test]
        async fn returns_body_on_success() {
            let uri = serve(
                "HTTP/1.1 200 OK\r\ncontent-length: 17\r\nconnection: close\r\n\r\nSpring in Action!",
            )
            .await;
            let adapter = HttpAdapter::new(&uri, Duration::from_secs(2)).expect("adapter");

            assert_eq!(adapter.invoke().await, Ok("Spring in Action!".to_string()));
        }

        #[tokio::test]
        async fn error_status_is_a_protocol_error() {
            let uri = serve(
                "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
            )
            .await;
            let adapter = HttpAdapter::new(&uri, Duration::from_secs(2)).expect("adapter");

            assert_eq!(adapter.invoke().await, Err(CallError::Protocol { status: 503 }));
        }

        #[tokio::test]
        async fn unreachable_remote_is_a_connection_error() {
            // Bind then drop to get a port nobody listens on.
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
            let addr = listener.local_addr().expect("local addr");
            drop(listener);

            let adapter = HttpAdapter::new(&format!("http://{}/recommended", addr), Duration::from_secs(2))
                .expect("adapter");
            assert!(matches!(adapter.invoke().await, Err(CallError::Connection(_))));
        }

        #[tokio::test]
        async fn silent_remote_times_out() {
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
            let addr = listener.local_addr().expect("local addr");
            tokio::spawn(async move {
                let mut held = Vec::new();
                while let Ok((socket, _)) = listener.accept().await {
                    held.push(socket);
                }
            });

            let adapter = HttpAdapter::new(&format!("http://{}/", addr), Duration::from_millis(100))
                .expect("adapter");
            assert_eq!(
                adapter.invoke().await,
                Err(CallError::Timeout(Duration::from_millis(100)))
            );
        }

        #[test]
        fn rejects_malformed_uri() {
            assert!(matches!(
                HttpAdapter::new("not a uri", Duration::from_secs(1)),
                Err(ConfigError::Adapter(_))
            ));
        }
    }
}
