//! Provider implementations.
//!
//! | Provider | Priority | Bars | Options | Configuration |
//! |----------|----------|------|---------|---------------|
//! | [`LocalPartitionProvider`] | 0 | yes | yes | always available |
//! | [`PolygonAdapter`] | 10 | yes | yes | API key |
//! | [`YahooAdapter`] | 20 | yes | no | `TICKVAULT_YAHOO_ENABLED` |

mod local;
mod polygon;
mod yahoo;

use std::sync::Arc;

pub use local::LocalPartitionProvider;
pub use polygon::PolygonAdapter;
pub use yahoo::YahooAdapter;

use crate::config::TickvaultConfig;
use crate::data_source::DataSource;
use crate::query::QueryEngine;

/// The provider list for a configuration: local partitions first, then the
/// network providers. Unconfigured providers are listed but unavailable.
pub fn default_sources(config: &TickvaultConfig, engine: QueryEngine) -> Vec<Arc<dyn DataSource>> {
    vec![
        Arc::new(LocalPartitionProvider::new(engine)),
        Arc::new(PolygonAdapter::new(config.polygon_api_key.clone())),
        Arc::new(YahooAdapter::new(config.yahoo_enabled)),
    ]
}

#[cfg(test)]
pub(crate) mod fixture {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    use crate::http_client::{HttpClient, HttpError, HttpRequest, HttpResponse};

    /// Replays canned responses in order and records every request.
    pub struct RecordingHttpClient {
        responses: Mutex<Vec<Result<HttpResponse, HttpError>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl RecordingHttpClient {
        pub fn replying(responses: Vec<Result<HttpResponse, HttpError>>) -> Self {
            let mut responses = responses;
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn json(body: &str) -> Self {
            Self::replying(vec![Ok(HttpResponse::ok_json(body))])
        }

        pub fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().expect("request log").clone()
        }
    }

    impl HttpClient for RecordingHttpClient {
        fn execute<'a>(
            &'a self,
            request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            self.requests.lock().expect("request log").push(request);
            let response = self
                .responses
                .lock()
                .expect("responses")
                .pop()
                .unwrap_or_else(|| Err(HttpError::new("no scripted response left")));
            Box::pin(async move { response })
        }
    }
}
