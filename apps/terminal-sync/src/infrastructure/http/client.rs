//! HTTP gateway for the trading API.
//!
//! One request per port call. Failures are classified into
//! [`GatewayError`] and returned; the next poll tick is the retry.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::api_types::{
    ApiBar, ApiDepth, ApiErrorResponse, ApiMover, ApiOrder, ApiOrderRequest, ApiPosition,
};
use crate::application::ports::{GatewayError, MarketGateway};
use crate::domain::market::{Bar, Mover, MoverKind, Position, RawDepth, Symbol, Timeframe};
use crate::domain::order::{Order, OrderId, OrderRequest};
use crate::domain::scan::{ScanPreset, ScanRequest, ScanRow};
use crate::infrastructure::config::ApiSettings;

const API_PREFIX: [&str; 2] = ["api", "v1"];

/// [`MarketGateway`] backed by the REST API.
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGateway")
            .field("base_url", &self.base_url.as_str())
            .field("authenticated", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpGateway {
    /// Create a gateway from API settings.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Network` if the base URL is invalid or the
    /// HTTP client cannot be built.
    pub fn new(settings: &ApiSettings) -> Result<Self, GatewayError> {
        let base_url = Url::parse(&settings.base_url).map_err(|e| {
            GatewayError::Network(format!("invalid base URL '{}': {e}", settings.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::Network(format!(
                "invalid base URL '{}'",
                settings.base_url
            )));
        }

        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            token: settings.token.as_ref().map(|t| t.expose().to_string()),
        })
    }

    /// Build `{base}/api/v1/{segments...}`, percent-encoding each segment.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(API_PREFIX).extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let builder = self.client.request(method, self.url(segments));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, GatewayError> {
        self.send(self.request(Method::GET, segments)).await
    }

    async fn get_with<T: DeserializeOwned, Q: Serialize + Sync + ?Sized>(
        &self,
        segments: &[&str],
        query: &Q,
    ) -> Result<T, GatewayError> {
        self.send(self.request(Method::GET, segments).query(query))
            .await
    }

    async fn post<T: DeserializeOwned, B: Serialize + Sync + ?Sized>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<T, GatewayError> {
        self.send(self.request(Method::POST, segments).json(body))
            .await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        let body = self.send_raw(request).await?;
        let text = if body.trim().is_empty() { "null" } else { body.as_str() };
        serde_json::from_str(text).map_err(|e| GatewayError::Decode(e.to_string()))
    }

    /// Send a request and return the success body as text.
    async fn send_raw(&self, request: RequestBuilder) -> Result<String, GatewayError> {
        let request = request
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        let method = request.method().clone();
        let path = request.url().path().to_string();
        tracing::debug!(%method, %path, "Sending API request");

        let response = self.client.execute(request).await.map_err(|e| {
            tracing::warn!(%method, %path, error = %e, "API request failed");
            GatewayError::Network(e.to_string())
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_decode() {
                GatewayError::Decode(e.to_string())
            } else {
                GatewayError::Network(e.to_string())
            }
        })?;

        if status.is_success() {
            return Ok(body);
        }

        let error = classify_status(status, error_message(&body), &path);
        tracing::warn!(
            %method,
            %path,
            status = status.as_u16(),
            error = %error,
            "API returned an error"
        );
        Err(error)
    }
}

/// Extract a message from an error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorResponse>(body)
        .map_or_else(|_| body.trim().to_string(), |e| e.message)
}

/// Map a non-success status onto the port's error taxonomy.
fn classify_status(status: StatusCode, message: String, path: &str) -> GatewayError {
    match status {
        StatusCode::NOT_FOUND => {
            GatewayError::NotFound(if message.is_empty() { path.to_string() } else { message })
        }
        StatusCode::BAD_REQUEST
        | StatusCode::FORBIDDEN
        | StatusCode::CONFLICT
        | StatusCode::UNPROCESSABLE_ENTITY => GatewayError::RejectedByServer(message),
        _ => GatewayError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl MarketGateway for HttpGateway {
    async fn get_bars(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Result<Vec<Bar>, GatewayError> {
        let bars: Vec<ApiBar> = self
            .get_with(
                &["market-data", "bars", symbol.as_str()],
                &[("timeframe", timeframe.as_str())],
            )
            .await?;
        Ok(bars.into_iter().map(|b| b.into_bar(symbol)).collect())
    }

    async fn get_depth(&self, symbol: &Symbol) -> Result<RawDepth, GatewayError> {
        let depth: Option<ApiDepth> = self
            .get(&["market-data", "depth", symbol.as_str()])
            .await?;
        Ok(depth.unwrap_or_default().into())
    }

    async fn get_orders(&self) -> Result<Vec<Order>, GatewayError> {
        let orders: Vec<ApiOrder> = self.get(&["orders"]).await?;
        orders.into_iter().map(Order::try_from).collect()
    }

    async fn get_positions(&self) -> Result<Vec<Position>, GatewayError> {
        let positions: Vec<ApiPosition> = self.get(&["positions"]).await?;
        Ok(positions.into_iter().map(Position::from).collect())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<Order, GatewayError> {
        let body = ApiOrderRequest::from(request);
        let order: ApiOrder = self.post(&["orders"], &body).await?;
        Order::try_from(order)
    }

    async fn cancel_order(&self, id: &OrderId) -> Result<(), GatewayError> {
        self.send_raw(self.request(Method::DELETE, &["orders", id.as_str()]))
            .await
            .map(|_| ())
    }

    async fn get_movers(&self, kind: MoverKind, limit: usize) -> Result<Vec<Mover>, GatewayError> {
        let movers: Vec<ApiMover> = self
            .get_with(&["scanners", kind.as_str()], &[("limit", limit)])
            .await?;
        Ok(movers.into_iter().map(Mover::from).collect())
    }

    async fn run_scan(&self, request: &ScanRequest) -> Result<Vec<ScanRow>, GatewayError> {
        self.post(&["scanners", "scan"], request).await
    }

    async fn get_scan_presets(&self) -> Result<Vec<ScanPreset>, GatewayError> {
        self.get(&["scanners", "presets"]).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rust_decimal_macros::dec;
    use serde_json::json;
    use test_case::test_case;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::domain::order::{OrderSide, OrderStatus, OrderTicket};
    use crate::domain::scan::{ComparisonOp, ScanFilter};
    use crate::infrastructure::config::ApiToken;

    fn gateway(server: &MockServer, token: Option<&str>) -> HttpGateway {
        HttpGateway::new(&ApiSettings {
            base_url: server.uri(),
            token: token.map(ApiToken::new),
            timeout: Duration::from_secs(2),
        })
        .unwrap()
    }

    #[test]
    fn url_encodes_segments_under_prefix() {
        let gw = HttpGateway::new(&ApiSettings {
            base_url: "http://localhost:8000".into(),
            token: None,
            timeout: Duration::from_secs(1),
        })
        .unwrap();

        let url = gw.url(&["market-data", "bars", "BRK/B"]);
        assert_eq!(url.as_str(), "http://localhost:8000/api/v1/market-data/bars/BRK%2FB");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let err = HttpGateway::new(&ApiSettings {
            base_url: "not a url".into(),
            token: None,
            timeout: Duration::from_secs(1),
        })
        .unwrap_err();
        assert!(matches!(err, GatewayError::Network(_)));
    }

    #[test_case(404, GatewayError::NotFound("gone".into()) ; "not found")]
    #[test_case(422, GatewayError::RejectedByServer("gone".into()) ; "unprocessable")]
    #[test_case(403, GatewayError::RejectedByServer("gone".into()) ; "forbidden")]
    #[test_case(503, GatewayError::Api { status: 503, message: "gone".into() } ; "unavailable")]
    fn status_classification(status: u16, expected: GatewayError) {
        let status = StatusCode::from_u16(status).unwrap();
        assert_eq!(classify_status(status, "gone".into(), "/x"), expected);
    }

    #[tokio::test]
    async fn bars_send_timeframe_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/market-data/bars/AAPL"))
            .and(query_param("timeframe", "5Min"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "timestamp": "2024-03-01T15:30:00Z", "open": 1, "high": 2, "low": 1, "close": 2, "volume": 10 }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let bars = gateway(&server, Some("secret"))
            .get_bars(&Symbol::new("AAPL"), Timeframe::FiveMinutes)
            .await
            .unwrap();

        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].symbol, Symbol::new("AAPL"));
        assert_eq!(bars[0].close, dec!(2));
    }

    #[tokio::test]
    async fn depth_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/market-data/depth/ZZZZ"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({ "detail": "unknown symbol" })),
            )
            .mount(&server)
            .await;

        let err = gateway(&server, None)
            .get_depth(&Symbol::new("ZZZZ"))
            .await
            .unwrap_err();

        assert_eq!(err, GatewayError::NotFound("unknown symbol".into()));
    }

    #[tokio::test]
    async fn place_order_posts_request_and_maps_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/orders"))
            .and(body_partial_json(json!({
                "symbol": "AAPL", "side": "buy", "type": "limit", "qty": "10", "limit_price": "180.50"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "srv-9",
                "client_order_id": "tmp-abc",
                "symbol": "AAPL",
                "side": "buy",
                "type": "limit",
                "qty": "10",
                "limit_price": "180.50",
                "status": "new"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = OrderTicket::limit(Symbol::new("AAPL"), OrderSide::Buy, dec!(10), dec!(180.50))
            .into_request(OrderId::new("tmp-abc"))
            .unwrap();
        let order = gateway(&server, None).place_order(&request).await.unwrap();

        assert_eq!(order.id, OrderId::new("srv-9"));
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn refused_order_is_rejected_by_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/orders"))
            .respond_with(
                ResponseTemplate::new(422)
                    .set_body_json(json!({ "detail": "insufficient buying power" })),
            )
            .mount(&server)
            .await;

        let request = OrderTicket::market(Symbol::new("AAPL"), OrderSide::Sell, dec!(1))
            .into_request(OrderId::new("tmp-1"))
            .unwrap();
        let err = gateway(&server, None).place_order(&request).await.unwrap_err();

        assert_eq!(
            err,
            GatewayError::RejectedByServer("insufficient buying power".into())
        );
    }

    #[tokio::test]
    async fn cancel_accepts_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/orders/srv-3"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        gateway(&server, None)
            .cancel_order(&OrderId::new("srv-3"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn movers_use_kind_path_and_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/scanners/most-active"))
            .and(query_param("limit", "20"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "symbol": "NVDA", "price": "900.10", "change_percent": "3.2", "volume": 5000000 }
            ])))
            .mount(&server)
            .await;

        let movers = gateway(&server, None)
            .get_movers(MoverKind::MostActive, 20)
            .await
            .unwrap();

        assert_eq!(movers[0].symbol, Symbol::new("NVDA"));
        assert_eq!(movers[0].volume, 5_000_000);
    }

    #[tokio::test]
    async fn scan_posts_compiled_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/scanners/scan"))
            .and(body_partial_json(json!({ "universe": "SP500", "limit": 50 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "symbol": "AAPL", "rank": 1.0, "fields": { "rsi": 65.0 } }
            ])))
            .mount(&server)
            .await;

        let request = ScanRequest {
            filters: vec![ScanFilter {
                field: "rsi".into(),
                operator: ComparisonOp::Gt,
                value: 60.0,
            }],
            universe: "SP500".into(),
            limit: 50,
        };
        let rows = gateway(&server, None).run_scan(&request).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fields.get("rsi"), Some(&65.0));
    }

    #[tokio::test]
    async fn server_error_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/positions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = gateway(&server, None).get_positions().await.unwrap_err();

        assert_eq!(
            err,
            GatewayError::Api {
                status: 500,
                message: "boom".into()
            }
        );
    }

    #[tokio::test]
    async fn malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&server)
            .await;

        let err = gateway(&server, None).get_orders().await.unwrap_err();

        assert!(matches!(err, GatewayError::Decode(_)));
    }

    #[tokio::test]
    async fn unreachable_server_is_network_error() {
        let gw = HttpGateway::new(&ApiSettings {
            base_url: "http://127.0.0.1:9".into(),
            token: None,
            timeout: Duration::from_millis(500),
        })
        .unwrap();

        let err = gw.get_scan_presets().await.unwrap_err();

        assert!(matches!(err, GatewayError::Network(_)));
    }
}
