//! Client for a signing daemon that holds the network's private key.

use super::{
    Receipt,
    Wallet,
    WalletFailure,
};
use crate::{
    AgentError,
    Result,
    money::Network,
};
use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use reqwest::StatusCode;
use std::time::Duration;

#[derive(Clone)]
pub struct HttpWallet {
    network: Network,
    base_url: String,
    auth_token: Option<String>,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct BalanceDto {
    balance_units: u64,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    address: &'a str,
    amount_units: u64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SendResponse {
    Sent { tx_id: String },
    Refused { error: String, kind: Option<String> },
}

#[derive(Deserialize)]
struct ReceiptDto {
    tx_id: String,
    amount_units: u64,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    confirmations: u32,
}

impl HttpWallet {
    pub fn new(
        network: Network,
        base_url: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::ConfigInvalid(format!("wallet http client: {e}")))?;
        Ok(Self {
            network,
            base_url,
            auth_token,
            http,
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<T> {
        let res = self
            .authorized(self.http.get(url))
            .send()
            .await
            .map_err(|e| AgentError::RpcError(format!("wallet request failed: {e}")))?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(AgentError::RpcError(format!(
                "wallet responded with {status}: {body}"
            )));
        }
        res.json()
            .await
            .map_err(|e| AgentError::RpcError(format!("invalid wallet payload: {e}")))
    }
}

/// Only a connection that never opened is known not to have reached the
/// daemon. Anything later may already have broadcast, so it must not be retried.
fn transport_failure(err: &reqwest::Error) -> WalletFailure {
    if err.is_connect() {
        WalletFailure::Transient(format!("wallet unreachable: {err}"))
    } else {
        WalletFailure::Rejected(format!("send outcome unknown, check the daemon: {err}"))
    }
}

fn status_failure(status: StatusCode, body: &[u8]) -> WalletFailure {
    let body = String::from_utf8_lossy(body);
    if status == StatusCode::TOO_MANY_REQUESTS {
        WalletFailure::Transient(format!("wallet rate limited: {body}"))
    } else {
        WalletFailure::Rejected(format!(
            "wallet responded with {status}, send outcome unknown: {body}"
        ))
    }
}

fn classify_refusal(kind: Option<&str>, error: String) -> WalletFailure {
    match kind {
        Some("insufficient_funds") => WalletFailure::InsufficientFunds(error),
        Some("invalid_signature") => WalletFailure::InvalidSignature(error),
        Some("rejected") | Some("invalid_address") => WalletFailure::Rejected(error),
        _ => WalletFailure::Transient(error),
    }
}

impl Wallet for HttpWallet {
    fn network(&self) -> Network {
        self.network
    }

    async fn balance(&self) -> Result<f64> {
        let url = format!("{}/balance", self.base_url);
        let dto: BalanceDto = self.get_json(url).await?;
        Ok(self.network.from_base_units(dto.balance_units))
    }

    async fn send_payment(
        &self,
        address: &str,
        amount: f64,
    ) -> Result<String, WalletFailure> {
        let amount_units = self.network.to_base_units(amount).ok_or_else(|| {
            WalletFailure::Rejected(format!("amount {amount} is not payable"))
        })?;
        let url = format!("{}/send", self.base_url);
        let res = self
            .authorized(self.http.post(url))
            .json(&SendRequest {
                address,
                amount_units,
            })
            .send()
            .await
            .map_err(|e| transport_failure(&e))?;
        let status = res.status();
        let bytes = res.bytes().await.map_err(|e| transport_failure(&e))?;
        match serde_json::from_slice::<SendResponse>(&bytes) {
            Ok(SendResponse::Refused { error, kind }) => {
                Err(classify_refusal(kind.as_deref(), error))
            }
            _ if !status.is_success() => Err(status_failure(status, &bytes)),
            Ok(SendResponse::Sent { tx_id }) => Ok(tx_id),
            Err(e) => Err(WalletFailure::Rejected(format!(
                "invalid wallet send payload: {e}"
            ))),
        }
    }

    async fn recent_receipts(&self, limit: usize) -> Result<Vec<Receipt>> {
        let url = format!("{}/receipts?limit={limit}", self.base_url);
        let dtos: Vec<ReceiptDto> = self.get_json(url).await?;
        let mut receipts: Vec<Receipt> = dtos
            .into_iter()
            .map(|dto| Receipt {
                tx_id: dto.tx_id,
                amount: self.network.from_base_units(dto.amount_units),
                timestamp: dto.timestamp,
                confirmations: dto.confirmations,
            })
            .collect();
        receipts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        receipts.truncate(limit);
        Ok(receipts)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use tokio::{
        io::{
            AsyncReadExt,
            AsyncWriteExt,
        },
        net::TcpListener,
    };

    /// Answer a single HTTP request with `status` and a JSON `body`.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&request) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{addr}")
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }

    fn wallet(base_url: String) -> HttpWallet {
        HttpWallet::new(Network::Ltc, base_url, None, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn send_payment__returns_daemon_tx_id() {
        // given
        let url = serve_once("200 OK", r#"{"tx_id":"abc123"}"#).await;

        // when
        let tx_id = wallet(url).send_payment("dest", 0.25).await;

        // then
        assert_eq!(tx_id, Ok("abc123".to_string()));
    }

    #[tokio::test]
    async fn send_payment__maps_refusal_kinds() {
        // given
        let url = serve_once(
            "400 Bad Request",
            r#"{"error":"balance too low","kind":"insufficient_funds"}"#,
        )
        .await;

        // when
        let result = wallet(url).send_payment("dest", 0.25).await;

        // then
        assert_eq!(
            result,
            Err(WalletFailure::InsufficientFunds("balance too low".into()))
        );
    }

    #[tokio::test]
    async fn send_payment__unparsed_server_error_is_not_retried() {
        // given
        let url = serve_once("502 Bad Gateway", r#""upstream down""#).await;

        // when
        let result = wallet(url).send_payment("dest", 0.25).await;

        // then
        assert!(matches!(result, Err(WalletFailure::Rejected(_))));
    }

    #[tokio::test]
    async fn send_payment__rate_limit_is_transient() {
        // given
        let url = serve_once("429 Too Many Requests", r#""slow down""#).await;

        // when
        let result = wallet(url).send_payment("dest", 0.25).await;

        // then
        assert!(matches!(result, Err(WalletFailure::Transient(_))));
    }

    #[tokio::test]
    async fn send_payment__refused_connection_is_transient() {
        // given
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        // when
        let result = wallet(format!("http://{addr}")).send_payment("dest", 0.25).await;

        // then
        assert!(matches!(result, Err(WalletFailure::Transient(_))));
    }

    #[tokio::test]
    async fn send_payment__timeout_after_dispatch_is_not_retried() {
        // given
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });
        let wallet = HttpWallet::new(
            Network::Ltc,
            format!("http://{addr}"),
            None,
            Duration::from_millis(200),
        )
        .unwrap();

        // when
        let result = wallet.send_payment("dest", 0.25).await;

        // then
        assert!(matches!(result, Err(WalletFailure::Rejected(_))));
    }

    #[test]
    fn status_failure__only_rate_limits_are_retryable() {
        let cases = [
            (StatusCode::TOO_MANY_REQUESTS, true),
            (StatusCode::INTERNAL_SERVER_ERROR, false),
            (StatusCode::BAD_GATEWAY, false),
            (StatusCode::SERVICE_UNAVAILABLE, false),
        ];

        for (status, retryable) in cases {
            assert_eq!(status_failure(status, b"").is_retryable(), retryable, "{status}");
        }
    }

    #[tokio::test]
    async fn balance__converts_base_units() {
        // given
        let url = serve_once("200 OK", r#"{"balance_units":150000000}"#).await;

        // when
        let balance = wallet(url).balance().await.unwrap();

        // then
        assert!((balance - 1.5).abs() < 1e-12);
    }

    #[tokio::test]
    async fn recent_receipts__sorted_newest_first() {
        // given
        let url = serve_once(
            "200 OK",
            r#"[
                {"tx_id":"old","amount_units":1000,"timestamp":"2026-01-01T00:00:00Z","confirmations":6},
                {"tx_id":"new","amount_units":2000,"timestamp":"2026-01-02T00:00:00Z"}
            ]"#,
        )
        .await;

        // when
        let receipts = wallet(url).recent_receipts(10).await.unwrap();

        // then
        assert_eq!(receipts[0].tx_id, "new");
        assert_eq!(receipts[0].confirmations, 0);
        assert!((receipts[1].amount - 0.00001).abs() < 1e-12);
    }

    #[tokio::test]
    async fn balance__unreachable_daemon_is_rpc_error() {
        // given
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        // when
        let result = wallet(format!("http://{addr}")).balance().await;

        // then
        assert!(matches!(result, Err(AgentError::RpcError(_))));
    }
}
