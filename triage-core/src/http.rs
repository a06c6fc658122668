//! HTTP seam used by the source adapters.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::TransportError;

/// Minimal HTTP surface the adapters need.
///
/// Both calls resolve to the response body on a 2xx status; any other status
/// is a [`TransportError::Status`].
pub trait HttpTransport: Send + Sync {
    fn get_text(
        &self,
        url: &str,
        bearer: Option<&str>,
    ) -> impl Future<Output = Result<String, TransportError>> + Send;

    fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> impl Future<Output = Result<String, TransportError>> + Send;
}

/// [`HttpTransport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|err| TransportError::Client(err.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    async fn get_text(&self, url: &str, bearer: Option<&str>) -> Result<String, TransportError> {
        debug!(%url, "GET");
        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json, text/plain");
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|err| map_error(url, err))?;
        read_body(url, response).await
    }

    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<String, TransportError> {
        debug!(%url, "POST");
        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|err| map_error(url, err))?;
        read_body(url, response).await
    }
}

async fn read_body(url: &str, response: reqwest::Response) -> Result<String, TransportError> {
    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    response.text().await.map_err(|err| map_error(url, err))
}

fn map_error(url: &str, err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
        }
    } else {
        TransportError::Network {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use stub::{RecordedCall, StubResponse, StubTransport};

#[cfg(any(test, feature = "test-util"))]
mod stub {
    use std::sync::Mutex;

    use super::HttpTransport;
    use crate::TransportError;

    /// Canned answer for a stubbed route.
    #[derive(Debug, Clone)]
    pub enum StubResponse {
        Body(String),
        Status(u16),
        Timeout,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct RecordedCall {
        pub method: &'static str,
        pub url: String,
        pub bearer: Option<String>,
        pub form: Vec<(String, String)>,
    }

    #[derive(Debug)]
    struct Route {
        method: &'static str,
        fragment: String,
        response: StubResponse,
    }

    /// In-memory transport: routes match when the URL contains a fragment.
    /// Later routes shadow earlier ones, unmatched requests fail as network errors.
    #[derive(Debug, Default)]
    pub struct StubTransport {
        routes: Mutex<Vec<Route>>,
        calls: Mutex<Vec<RecordedCall>>,
    }

    impl StubTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn on_get(self, fragment: &str, response: StubResponse) -> Self {
            self.route("GET", fragment, response)
        }

        pub fn on_post(self, fragment: &str, response: StubResponse) -> Self {
            self.route("POST", fragment, response)
        }

        fn route(self, method: &'static str, fragment: &str, response: StubResponse) -> Self {
            self.routes.lock().unwrap().push(Route {
                method,
                fragment: fragment.to_string(),
                response,
            });
            self
        }

        pub fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().unwrap().clone()
        }

        /// Number of recorded calls whose URL contains `fragment`.
        pub fn count_matching(&self, fragment: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|call| call.url.contains(fragment))
                .count()
        }

        fn answer(&self, call: RecordedCall) -> Result<String, TransportError> {
            let url = call.url.clone();
            let method = call.method;
            self.calls.lock().unwrap().push(call);

            let routes = self.routes.lock().unwrap();
            let Some(route) = routes
                .iter()
                .rev()
                .find(|route| route.method == method && url.contains(&route.fragment))
            else {
                return Err(TransportError::Network {
                    url,
                    message: "no stub route".to_string(),
                });
            };

            match &route.response {
                StubResponse::Body(body) => Ok(body.clone()),
                StubResponse::Status(status) => Err(TransportError::Status {
                    url,
                    status: *status,
                }),
                StubResponse::Timeout => Err(TransportError::Timeout { url }),
            }
        }
    }

    impl HttpTransport for StubTransport {
        async fn get_text(
            &self,
            url: &str,
            bearer: Option<&str>,
        ) -> Result<String, TransportError> {
            self.answer(RecordedCall {
                method: "GET",
                url: url.to_string(),
                bearer: bearer.map(str::to_string),
                form: Vec::new(),
            })
        }

        async fn post_form(
            &self,
            url: &str,
            form: &[(&str, &str)],
        ) -> Result<String, TransportError> {
            self.answer(RecordedCall {
                method: "POST",
                url: url.to_string(),
                bearer: None,
                form: form
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            })
        }
    }
}
