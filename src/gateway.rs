//! Payment gateway adapter: builds signed redirect requests and verifies
//! signed callbacks (browser return and IPN).
//!
//! The canonical query string is a bit-exact external contract: keys in
//! ascending order, values URL-encoded, pairs joined with `&`. The
//! HMAC-SHA512 over that string travels as the `secure_hash` parameter.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use sha2::Sha512;

use crate::error::{AppError, Result};
use crate::models::Payment;

type HmacSha512 = Hmac<Sha512>;

pub const SECURE_HASH_FIELD: &str = "secure_hash";

const TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// Gateway connection parameters, loaded from configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub endpoint: String,
    pub merchant_code: String,
    pub secret: String,
    pub return_url: String,
    pub locale: String,
    pub currency: String,
    pub currency_decimals: u32,
    pub order_lifetime_minutes: i64,
}

/// Response codes on the IPN channel. Returned as the literal two-character
/// HTTP body, never wrapped in an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpnResponseCode {
    /// Callback processed (or acknowledged exactly as before).
    Ok,
    /// Order reference not found.
    OrderNotFound,
    /// Order already confirmed; the idempotency fast-path, not an error.
    AlreadyConfirmed,
    /// Callback amount does not match the pending payment.
    AmountMismatch,
    /// Signature verification failed.
    InvalidSignature,
    /// Any unexpected failure.
    Failure,
}

impl IpnResponseCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IpnResponseCode::Ok => "00",
            IpnResponseCode::OrderNotFound => "01",
            IpnResponseCode::AlreadyConfirmed => "02",
            IpnResponseCode::AmountMismatch => "04",
            IpnResponseCode::InvalidSignature => "97",
            IpnResponseCode::Failure => "99",
        }
    }
}

/// Converts a monetary amount to the gateway's minor-unit integer form.
pub fn to_minor_units(amount: Decimal, decimal_places: u32) -> Result<u64> {
    let factor = Decimal::from(10u64.pow(decimal_places));
    (amount * factor)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_u64()
        .ok_or_else(|| {
            AppError::Validation(format!("amount {amount} is not representable in minor units"))
        })
}

/// Parses a minor-unit integer back into a monetary amount.
pub fn from_minor_units(raw: &str, decimal_places: u32) -> Result<Decimal> {
    let minor: i64 = raw
        .parse()
        .map_err(|_| AppError::Validation(format!("malformed amount '{raw}'")))?;
    Ok(Decimal::new(minor, decimal_places))
}

/// Key-sorted, URL-encoded concatenation of the given fields. This is the
/// exact string the signature covers.
pub fn canonical_query(fields: &BTreeMap<String, String>) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn hmac_for(secret: &str) -> Result<HmacSha512> {
    HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("gateway secret rejected: {e}")))
}

/// Hex HMAC-SHA512 over the canonical payload.
pub fn sign(secret: &str, payload: &str) -> Result<String> {
    let mut mac = hmac_for(secret)?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Builds the signed redirect URL for a payment. Field ordering inside the
/// query is the canonical ordering the gateway verifies against.
pub fn build_redirect(
    config: &GatewayConfig,
    payment: &Payment,
    order_info: &str,
    client_ip: &str,
    now: DateTime<Utc>,
) -> Result<String> {
    let expire = now + Duration::minutes(config.order_lifetime_minutes);

    let mut fields = BTreeMap::new();
    fields.insert("merchant_code".to_string(), config.merchant_code.clone());
    fields.insert("order_ref".to_string(), payment.order_ref.clone());
    fields.insert(
        "amount".to_string(),
        to_minor_units(payment.amount, config.currency_decimals)?.to_string(),
    );
    fields.insert("currency".to_string(), config.currency.clone());
    fields.insert("order_info".to_string(), order_info.to_string());
    fields.insert("locale".to_string(), config.locale.clone());
    fields.insert("return_url".to_string(), config.return_url.clone());
    fields.insert("ip_addr".to_string(), client_ip.to_string());
    fields.insert("create_time".to_string(), now.format(TIME_FORMAT).to_string());
    fields.insert("expire_time".to_string(), expire.format(TIME_FORMAT).to_string());

    let canonical = canonical_query(&fields);
    let hash = sign(&config.secret, &canonical)?;
    Ok(format!(
        "{}?{}&{}={}",
        config.endpoint, canonical, SECURE_HASH_FIELD, hash
    ))
}

/// Verifies an inbound callback: recomputes the HMAC over every received
/// field except `secure_hash` in canonical order and compares in constant
/// time. Any mismatch, absent hash or undecodable hash is `BadSignature`.
pub fn verify_callback(config: &GatewayConfig, params: &HashMap<String, String>) -> Result<()> {
    let received = params.get(SECURE_HASH_FIELD).ok_or(AppError::BadSignature)?;
    let received = hex::decode(received).map_err(|_| AppError::BadSignature)?;

    let fields: BTreeMap<String, String> = params
        .iter()
        .filter(|(k, _)| k.as_str() != SECURE_HASH_FIELD)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut mac = hmac_for(&config.secret)?;
    mac.update(canonical_query(&fields).as_bytes());
    mac.verify_slice(&received).map_err(|_| AppError::BadSignature)
}

/// The fields of a verified callback that reconciliation needs.
#[derive(Debug, Clone)]
pub struct CallbackData {
    pub order_ref: String,
    pub amount: Decimal,
    pub txn_id: String,
    pub response_code: String,
}

impl CallbackData {
    /// Whether the gateway reported a successful charge.
    pub fn is_success(&self) -> bool {
        self.response_code == "00"
    }
}

/// Extracts callback data from verified parameters. Call only after
/// `verify_callback` has accepted the signature.
pub fn parse_callback(
    config: &GatewayConfig,
    params: &HashMap<String, String>,
) -> Result<CallbackData> {
    let field = |name: &str| -> Result<String> {
        params
            .get(name)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| AppError::Validation(format!("callback is missing field '{name}'")))
    };

    Ok(CallbackData {
        order_ref: field("order_ref")?,
        amount: from_minor_units(&field("amount")?, config.currency_decimals)?,
        txn_id: field("txn_id")?,
        response_code: field("response_code")?,
    })
}

/// Decodes a raw callback query string into a parameter map. Pairs split
/// on `&`/`=`, keys and values percent-decoded with `+` as space. The IPN
/// endpoint answers every request with HTTP 200, so undecodable input is a
/// validation error here rather than an extractor rejection upstream.
pub fn parse_query(raw: &str) -> Result<HashMap<String, String>> {
    let mut params = HashMap::new();
    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params.insert(decode_component(key)?, decode_component(value)?);
    }
    Ok(params)
}

fn decode_component(raw: &str) -> Result<String> {
    urlencoding::decode(&raw.replace('+', " "))
        .map(|s| s.into_owned())
        .map_err(|_| AppError::Validation(format!("undecodable query component '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PaymentMethod, PaymentTarget};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn config() -> GatewayConfig {
        GatewayConfig {
            endpoint: "https://gw.example/paygate".into(),
            merchant_code: "DORMTEST1".into(),
            secret: "topsecret".into(),
            return_url: "https://dorm.example/payments/return".into(),
            locale: "vn".into(),
            currency: "VND".into(),
            currency_decimals: 0,
            order_lifetime_minutes: 15,
        }
    }

    fn signed_params(cfg: &GatewayConfig, overrides: &[(&str, &str)]) -> HashMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert("merchant_code".to_string(), cfg.merchant_code.clone());
        fields.insert("order_ref".to_string(), "ORD-42".to_string());
        fields.insert("amount".to_string(), "580000".to_string());
        fields.insert("txn_id".to_string(), "GW123456".to_string());
        fields.insert("response_code".to_string(), "00".to_string());
        for (k, v) in overrides {
            fields.insert((*k).to_string(), (*v).to_string());
        }
        let hash = sign(&cfg.secret, &canonical_query(&fields)).unwrap();
        let mut params: HashMap<String, String> = fields.into_iter().collect();
        params.insert(SECURE_HASH_FIELD.to_string(), hash);
        params
    }

    #[test]
    fn canonical_query_is_key_sorted_and_encoded() {
        let mut fields = BTreeMap::new();
        fields.insert("b".to_string(), "two words".to_string());
        fields.insert("a".to_string(), "1".to_string());
        assert_eq!(canonical_query(&fields), "a=1&b=two%20words");
    }

    #[test]
    fn valid_callback_verifies() {
        let cfg = config();
        let params = signed_params(&cfg, &[]);
        assert!(verify_callback(&cfg, &params).is_ok());
    }

    #[test]
    fn flipping_one_hash_character_is_rejected() {
        let cfg = config();
        let mut params = signed_params(&cfg, &[]);
        let hash = params.get(SECURE_HASH_FIELD).unwrap().clone();
        let flipped = if hash.starts_with('a') {
            format!("b{}", &hash[1..])
        } else {
            format!("a{}", &hash[1..])
        };
        params.insert(SECURE_HASH_FIELD.to_string(), flipped);
        assert!(matches!(
            verify_callback(&cfg, &params),
            Err(AppError::BadSignature)
        ));
    }

    #[test]
    fn tampering_with_a_field_is_rejected() {
        let cfg = config();
        let mut params = signed_params(&cfg, &[]);
        params.insert("amount".to_string(), "1".to_string());
        assert!(matches!(
            verify_callback(&cfg, &params),
            Err(AppError::BadSignature)
        ));
    }

    #[test]
    fn missing_hash_is_rejected() {
        let cfg = config();
        let mut params = signed_params(&cfg, &[]);
        params.remove(SECURE_HASH_FIELD);
        assert!(matches!(
            verify_callback(&cfg, &params),
            Err(AppError::BadSignature)
        ));
    }

    #[test]
    fn redirect_url_carries_sorted_fields_and_hash() {
        let cfg = config();
        let payment = Payment::new(
            "ORD-42".into(),
            PaymentTarget::Registration(Uuid::new_v4()),
            dec!(1_500_000),
            PaymentMethod::Gateway,
        );
        let now = Utc::now();
        let url = build_redirect(&cfg, &payment, "room fee", "203.0.113.7", now).unwrap();

        assert!(url.starts_with("https://gw.example/paygate?amount=1500000&"));
        assert!(url.contains("order_ref=ORD-42"));
        assert!(url.contains("order_info=room%20fee"));
        assert!(url.contains(&format!("&{SECURE_HASH_FIELD}=")));

        // The signature must cover exactly the query before secure_hash.
        let (_, query) = url.split_once('?').unwrap();
        let (payload, hash) = query.rsplit_once(&format!("&{SECURE_HASH_FIELD}=")).unwrap();
        assert_eq!(sign(&cfg.secret, payload).unwrap(), hash);
    }

    #[test]
    fn minor_unit_round_trip() {
        assert_eq!(to_minor_units(dec!(580000), 0).unwrap(), 580_000);
        assert_eq!(to_minor_units(dec!(12.34), 2).unwrap(), 1_234);
        assert_eq!(from_minor_units("580000", 0).unwrap(), dec!(580000));
        assert_eq!(from_minor_units("1234", 2).unwrap(), dec!(12.34));
        assert!(from_minor_units("not-a-number", 0).is_err());
    }

    #[test]
    fn callback_parsing_requires_core_fields() {
        let cfg = config();
        let params = signed_params(&cfg, &[]);
        let data = parse_callback(&cfg, &params).unwrap();
        assert_eq!(data.order_ref, "ORD-42");
        assert_eq!(data.amount, dec!(580000));
        assert!(data.is_success());

        let mut broken = params.clone();
        broken.remove("txn_id");
        assert!(parse_callback(&cfg, &broken).is_err());
    }

    #[test]
    fn query_parsing_decodes_pairs() {
        let params =
            parse_query("order_ref=ORD%2D42&order_info=spring+fees&amount=580000").unwrap();
        assert_eq!(params.get("order_ref").unwrap(), "ORD-42");
        assert_eq!(params.get("order_info").unwrap(), "spring fees");
        assert_eq!(params.get("amount").unwrap(), "580000");

        assert!(parse_query("").unwrap().is_empty());
    }

    #[test]
    fn query_parsing_rejects_invalid_encoding() {
        assert!(parse_query("note=%FF").is_err());
    }

    #[test]
    fn response_codes_render_as_two_characters() {
        for (code, s) in [
            (IpnResponseCode::Ok, "00"),
            (IpnResponseCode::OrderNotFound, "01"),
            (IpnResponseCode::AlreadyConfirmed, "02"),
            (IpnResponseCode::AmountMismatch, "04"),
            (IpnResponseCode::InvalidSignature, "97"),
            (IpnResponseCode::Failure, "99"),
        ] {
            assert_eq!(code.as_str(), s);
            assert_eq!(code.as_str().len(), 2);
        }
    }
}
