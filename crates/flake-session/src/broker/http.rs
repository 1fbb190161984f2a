use async_trait::async_trait;
use reqwest::{header, StatusCode};
use tracing::debug;
use url::Url;

use super::Broker;
use crate::descriptor::SessionDescription;
use crate::error::BrokerError;

const CLIENT_PATH: &str = "client";

/// Broker reached over HTTP(S), optionally through a fronting domain.
///
/// The offer is POSTed to `<broker>/client`; the response body carries the
/// answer. With a front domain the TLS/TCP connection goes to the front host
/// while the `Host` header names the real broker.
#[derive(Debug, Clone)]
pub struct HttpBroker {
    http: reqwest::Client,
    endpoint: Url,
    front: Option<String>,
}

impl HttpBroker {
    pub fn new(mut base: Url) -> Result<Self, BrokerError> {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join(CLIENT_PATH)
            .map_err(|err| BrokerError::Request(format!("invalid broker url: {err}")))?;
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
            front: None,
        })
    }

    pub fn with_front(mut self, front: impl Into<String>) -> Self {
        let front = front.into();
        self.front = (!front.trim().is_empty()).then_some(front);
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Target url and the `Host` header to send, after fronting.
    fn route(&self) -> Result<(Url, Option<String>), BrokerError> {
        let Some(front) = self.front.as_deref() else {
            return Ok((self.endpoint.clone(), None));
        };
        let mut target = self.endpoint.clone();
        let real_host = match (target.host_str(), target.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(BrokerError::Request("broker url has no host".into())),
        };
        target
            .set_host(Some(front))
            .map_err(|err| BrokerError::Request(format!("invalid front domain {front}: {err}")))?;
        Ok((target, Some(real_host)))
    }
}

#[async_trait]
impl Broker for HttpBroker {
    async fn negotiate(
        &self,
        offer: &SessionDescription,
    ) -> Result<Option<SessionDescription>, BrokerError> {
        let (target, host) = self.route()?;
        debug!(url = %target, fronted = host.is_some(), "posting offer to broker");

        let mut request = self.http.post(target).body(offer.serialize());
        if let Some(host) = host {
            request = request.header(header::HOST, host);
        }
        let response = request
            .send()
            .await
            .map_err(|err| BrokerError::Request(err.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let body = response
                    .text()
                    .await
                    .map_err(|err| BrokerError::Request(err.to_string()))?;
                if body.trim().is_empty() {
                    return Ok(None);
                }
                Ok(Some(SessionDescription::parse_answer(&body)?))
            }
            StatusCode::SERVICE_UNAVAILABLE => Err(BrokerError::Unavailable),
            StatusCode::BAD_REQUEST => Err(BrokerError::Rejected),
            other => Err(BrokerError::UnexpectedStatus(other.as_u16())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::post;
    use axum::Router;
    use std::net::SocketAddr;

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve");
        });
        addr
    }

    fn broker_for(addr: SocketAddr) -> HttpBroker {
        HttpBroker::new(Url::parse(&format!("http://{addr}")).unwrap()).unwrap()
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let broker = HttpBroker::new(Url::parse("https://broker.example/v1").unwrap()).unwrap();
        assert_eq!(broker.endpoint().as_str(), "https://broker.example/v1/client");
        let broker = HttpBroker::new(Url::parse("https://broker.example/").unwrap()).unwrap();
        assert_eq!(broker.endpoint().as_str(), "https://broker.example/client");
    }

    #[test]
    fn fronting_swaps_host() {
        let broker = HttpBroker::new(Url::parse("https://broker.example:8443/").unwrap())
            .unwrap()
            .with_front("cdn.example");
        let (target, host) = broker.route().unwrap();
        assert_eq!(target.as_str(), "https://cdn.example:8443/client");
        assert_eq!(host.as_deref(), Some("broker.example:8443"));

        let broker = broker.with_front("  ");
        assert_eq!(broker.route().unwrap().1, None);
    }

    #[tokio::test]
    async fn returns_answer_on_ok() {
        let router = Router::new().route(
            "/client",
            post(|body: String| async move {
                let offer = SessionDescription::parse(&body).expect("offer body");
                SessionDescription::answer(format!("answer-to-{}", offer.sdp)).serialize()
            }),
        );
        let broker = broker_for(serve(router).await);

        let answer = broker
            .negotiate(&SessionDescription::offer("OFFER-1"))
            .await
            .expect("negotiate")
            .expect("answer present");
        assert_eq!(answer, SessionDescription::answer("answer-to-OFFER-1"));
    }

    #[tokio::test]
    async fn maps_error_statuses() {
        let router = Router::new()
            .route("/busy/client", post(|| async { AxumStatus::SERVICE_UNAVAILABLE }))
            .route("/bad/client", post(|| async { AxumStatus::BAD_REQUEST }))
            .route("/teapot/client", post(|| async { AxumStatus::IM_A_TEAPOT }))
            .route("/empty/client", post(|| async { "" }));
        let addr = serve(router).await;
        let offer = SessionDescription::offer("OFFER-1");
        let at = |path: &str| {
            HttpBroker::new(Url::parse(&format!("http://{addr}/{path}")).unwrap()).unwrap()
        };

        assert!(matches!(
            at("busy").negotiate(&offer).await,
            Err(BrokerError::Unavailable)
        ));
        assert!(matches!(
            at("bad").negotiate(&offer).await,
            Err(BrokerError::Rejected)
        ));
        assert!(matches!(
            at("teapot").negotiate(&offer).await,
            Err(BrokerError::UnexpectedStatus(418))
        ));
        assert!(matches!(at("empty").negotiate(&offer).await, Ok(None)));
    }

    #[tokio::test]
    async fn malformed_answer_is_a_decode_error() {
        let router = Router::new().route("/client", post(|| async { "{not json" }));
        let broker = broker_for(serve(router).await);
        assert!(matches!(
            broker.negotiate(&SessionDescription::offer("x")).await,
            Err(BrokerError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn fronted_request_carries_real_host() {
        let router = Router::new().route(
            "/client",
            post(|headers: HeaderMap| async move {
                let host = headers
                    .get(axum::http::header::HOST)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                SessionDescription::answer(host).serialize()
            }),
        );
        let addr = serve(router).await;
        let broker = HttpBroker::new(
            Url::parse(&format!("http://broker.invalid:{}/", addr.port())).unwrap(),
        )
        .unwrap()
        .with_front("127.0.0.1");

        let answer = broker
            .negotiate(&SessionDescription::offer("x"))
            .await
            .expect("negotiate")
            .expect("answer");
        assert_eq!(answer.sdp, format!("broker.invalid:{}", addr.port()));
    }
}
