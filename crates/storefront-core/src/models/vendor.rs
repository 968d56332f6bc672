//! Vendor-side REST payloads.
//!
//! Business data (orders, products, analytics) is passed through as
//! opaque JSON; only the shapes the client itself has to build or read
//! are typed here.

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Standard `{success, data, message?}` response wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope<T = Value> {
    #[serde(default)]
    pub success: bool,
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ApiEnvelope<Value> {
    /// Read an envelope out of a normalized response body.
    ///
    /// Bodies that are not envelopes are wrapped as-is, with `success`
    /// taken from the HTTP status.
    pub fn from_body(body: Value, status_ok: bool) -> Self {
        match body {
            Value::Object(mut map) if map.contains_key("success") || map.contains_key("data") => {
                let success = map
                    .get("success")
                    .and_then(Value::as_bool)
                    .unwrap_or(status_ok);
                let message = map
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let data = map.remove("data").unwrap_or(Value::Null);
                Self {
                    success,
                    data,
                    message,
                }
            }
            other => Self {
                success: status_ok,
                data: other,
                message: None,
            },
        }
    }
}

/// Vendor profile returned on login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vendor {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(rename = "accountId", default, deserialize_with = "de_opt_id")]
    pub account_id: Option<String>,
    pub vendor_name: Option<String>,
    pub vendor_email: Option<String>,
    pub location: Option<String>,
    pub rating: Option<Value>,
    pub description: Option<String>,
    pub operating_hours: Option<String>,
    pub vendor_profile_image: Option<String>,
}

impl Vendor {
    pub fn display_name(&self) -> &str {
        self.vendor_name
            .as_deref()
            .or(self.vendor_email.as_deref())
            .unwrap_or(&self.id)
    }
}

/// Body of a successful login.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(alias = "access_token", alias = "accessToken")]
    pub token: String,
    #[serde(default, alias = "refreshToken")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub vendor: Option<Vendor>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub vendor_email: &'a str,
    pub password: &'a str,
}

/// New vendor account.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VendorRegistration {
    pub vendor_name: String,
    pub vendor_email: String,
    pub password: String,
    pub contact_number: String,
    pub location: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operating_hours: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_permit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_id: String,
    pub order_status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueUpdate {
    pub report_id: String,
    pub status: String,
}

/// A product variation; ones without a name or price are not sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductVariation {
    pub variation_name: String,
    pub price: Option<f64>,
}

/// Product fields for create and update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductDraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    pub category: String,
    pub product_name: String,
    pub price: f64,
    pub description: String,
    pub quantity: Option<i64>,
    pub availability: bool,
    /// `YYYY-MM-DD`
    pub date: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variations: Vec<ProductVariation>,
}

impl ProductDraft {
    pub fn valid_variations(&self) -> Vec<&ProductVariation> {
        self.variations
            .iter()
            .filter(|v| !v.variation_name.is_empty() && v.price.is_some())
            .collect()
    }
}

/// Accept string or numeric ids, normalizing to a string
pub(crate) fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn de_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    id_from_value(&value).ok_or_else(|| de::Error::custom("expected a string or numeric id"))
}

fn de_opt_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(id_from_value))
}
