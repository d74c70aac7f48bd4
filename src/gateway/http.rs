use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{sign_fields, GatewayPayment, GatewayStatus, PaymentGateway, PaymentLink, PaymentLinkRequest};
use crate::config::GatewayConfig;
use crate::domain::value_objects::GatewayOrderCode;
use crate::GatewayError;

const SUCCESS: &str = "00";
const MAX_DESCRIPTION: usize = 25;

/// REST client for the payment-link gateway.
///
/// Requests carry `x-client-id`/`x-api-key` headers; link creation is signed
/// with the merchant checksum key.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    http: Client,
    base_url: String,
    client_id: String,
    api_key: String,
    checksum_key: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    desc: String,
    data: Option<T>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLinkBody<'a> {
    order_code: i64,
    amount: i64,
    description: &'a str,
    cancel_url: &'a str,
    return_url: &'a str,
    signature: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkData {
    order_code: i64,
    checkout_url: String,
    status: GatewayStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentData {
    order_code: i64,
    amount: Decimal,
    #[serde(default)]
    amount_paid: Decimal,
    status: GatewayStatus,
    cancellation_reason: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelBody<'a> {
    cancellation_reason: &'a str,
}

impl From<PaymentData> for GatewayPayment {
    fn from(d: PaymentData) -> Self {
        Self {
            order_code: GatewayOrderCode::new(d.order_code), amount: d.amount, amount_paid: d.amount_paid,
            status: d.status, cancellation_reason: d.cancellation_reason,
        }
    }
}

fn transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() { GatewayError::Timeout } else { GatewayError::Unreachable(e.to_string()) }
}

impl HttpPaymentGateway {
    pub fn new(cfg: &GatewayConfig) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            client_id: cfg.client_id.clone(),
            api_key: cfg.api_key.clone(),
            checksum_key: cfg.checksum_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String { format!("{}/v2/payment-requests{}", self.base_url, path) }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, GatewayError> {
        let response = request
            .header("x-client-id", &self.client_id)
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected { code: status.as_u16().to_string(), message: body });
        }

        let envelope: Envelope<T> = response.json().await.map_err(|e| {
            if e.is_timeout() { GatewayError::Timeout } else { GatewayError::Rejected { code: "INVALID_RESPONSE".into(), message: e.to_string() } }
        })?;
        debug!(code = %envelope.code, desc = %envelope.desc, "Gateway responded");
        if envelope.code != SUCCESS {
            return Err(GatewayError::Rejected { code: envelope.code, message: envelope.desc });
        }
        envelope.data.ok_or_else(|| GatewayError::Rejected { code: SUCCESS.into(), message: "response has no data".into() })
    }
}

/// The gateway charges whole currency units. Fractional amounts are refused
/// rather than rounded so the charge always equals the recorded total.
fn whole_amount(amount: Decimal) -> Result<i64, GatewayError> {
    let whole = amount.fract().is_zero().then(|| amount.to_i64()).flatten();
    whole.filter(|a| *a > 0).ok_or_else(|| GatewayError::Rejected {
        code: "INVALID_AMOUNT".into(),
        message: format!("amount {amount} cannot be charged"),
    })
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(order_code = %request.order_code))]
    async fn create_payment_link(&self, request: &PaymentLinkRequest) -> Result<PaymentLink, GatewayError> {
        let amount = whole_amount(request.amount)?;
        let description: String = request.description.chars().take(MAX_DESCRIPTION).collect();
        let signature = sign_fields(&self.checksum_key, [
            ("amount", amount.to_string()),
            ("cancelUrl", request.cancel_url.clone()),
            ("description", description.clone()),
            ("orderCode", request.order_code.to_string()),
            ("returnUrl", request.return_url.clone()),
        ])?;
        let body = CreateLinkBody {
            order_code: request.order_code.value(), amount, description: &description,
            cancel_url: &request.cancel_url, return_url: &request.return_url, signature,
        };

        let data: LinkData = self.send(self.http.post(self.url("")).json(&body)).await?;
        Ok(PaymentLink { order_code: GatewayOrderCode::new(data.order_code), checkout_url: data.checkout_url, status: data.status })
    }

    #[instrument(skip(self))]
    async fn payment_info(&self, order_code: GatewayOrderCode) -> Result<GatewayPayment, GatewayError> {
        let data: PaymentData = self.send(self.http.get(self.url(&format!("/{order_code}")))).await?;
        Ok(data.into())
    }

    #[instrument(skip(self))]
    async fn cancel_payment_link(&self, order_code: GatewayOrderCode, reason: &str) -> Result<GatewayPayment, GatewayError> {
        let body = CancelBody { cancellation_reason: reason };
        let data: PaymentData = self.send(self.http.post(self.url(&format!("/{order_code}/cancel"))).json(&body)).await?;
        Ok(data.into())
    }
}
