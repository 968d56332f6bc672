//! Vendor REST API client.
//!
//! Thin wrappers over [`RequestPipeline`] for the storefront endpoints.
//! Business payloads stay opaque: each call returns the server's
//! `{success, data, message?}` envelope with `data` as raw JSON.

use anyhow::{Context, Result};
use chrono::Local;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::pipeline::{ApiRequest, RequestPipeline};
use super::transport::FormPart;
use crate::auth::Credential;
use crate::models::{
    ApiEnvelope, IssueUpdate, LoginRequest, LoginResponse, OrderUpdate, ProductDraft, Vendor,
    VendorRegistration,
};

/// Image attached to a product or profile upload
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// API client for the vendor storefront.
/// Clone is cheap - the pipeline shares its transport and session.
#[derive(Clone)]
pub struct VendorApi {
    pipeline: RequestPipeline,
}

impl VendorApi {
    pub fn new(pipeline: RequestPipeline) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    async fn call(&self, request: ApiRequest) -> Result<ApiEnvelope> {
        let path = request.path.clone();
        let response = self
            .pipeline
            .send(request)
            .await
            .with_context(|| format!("Request to {} failed", path))?;
        Ok(response.envelope())
    }

    // ===== Auth =====

    pub async fn register(&self, registration: &VendorRegistration) -> Result<ApiEnvelope> {
        let request = ApiRequest::post("/vendors/auth/register")
            .unauthenticated()
            .json(registration)?;
        self.call(request).await
    }

    /// Log in and store the returned credential
    pub async fn login(&self, vendor_email: &str, password: &str) -> Result<Option<Vendor>> {
        let request = ApiRequest::post("/vendors/auth/login")
            .unauthenticated()
            .json(&LoginRequest {
                vendor_email,
                password,
            })?;

        let response = self
            .pipeline
            .send(request)
            .await
            .context("Failed to send login request")?;
        let login: LoginResponse = response.json().context("Failed to parse login response")?;

        self.pipeline
            .tokens()
            .store()
            .set(Credential::new(login.token, login.refresh_token));
        info!(email = vendor_email, "Logged in");
        Ok(login.vendor)
    }

    /// Clear the session and cancel its expiry timers
    pub fn logout(&self) {
        self.pipeline.tokens().logout();
        info!("Logged out");
    }

    // ===== Profile =====

    pub async fn profile(&self) -> Result<ApiEnvelope> {
        self.call(ApiRequest::get("/vendors/information")).await
    }

    pub async fn update_profile(&self, profile: &Value) -> Result<ApiEnvelope> {
        self.call(ApiRequest::put("/vendors/auth/profile").json(profile)?).await
    }

    pub async fn update_information(&self, information: &Value) -> Result<ApiEnvelope> {
        self.call(ApiRequest::patch("/vendors/information/patch").json(information)?)
            .await
    }

    pub async fn update_profile_image(&self, image: ImageUpload) -> Result<ApiEnvelope> {
        let parts = vec![FormPart::file(
            "vendor_profile_image",
            image.file_name,
            image.mime,
            image.bytes,
        )];
        self.call(ApiRequest::post("/vendor/profiles/update").multipart(parts))
            .await
    }

    pub async fn reviews(&self) -> Result<ApiEnvelope> {
        self.call(ApiRequest::get("/vendors/reviews")).await
    }

    // ===== Orders =====

    pub async fn orders(&self) -> Result<ApiEnvelope> {
        self.call(ApiRequest::get("/orders")).await
    }

    pub async fn completed_orders(&self, page: u32, per_page: u32) -> Result<ApiEnvelope> {
        let request = ApiRequest::get("/orders/completed")
            .query("page", page.to_string())
            .query("per_page", per_page.to_string());
        self.call(request).await
    }

    pub async fn update_order(&self, update: &OrderUpdate) -> Result<ApiEnvelope> {
        self.call(ApiRequest::post("/orders/update").json(update)?).await
    }

    // ===== Products =====

    pub async fn products(&self) -> Result<ApiEnvelope> {
        self.call(ApiRequest::get("/products")).await
    }

    pub async fn product(&self, product_id: &str) -> Result<ApiEnvelope> {
        self.call(ApiRequest::get(format!("/products/{}", product_id)))
            .await
    }

    pub async fn post_product(
        &self,
        draft: &ProductDraft,
        image: Option<ImageUpload>,
    ) -> Result<ApiEnvelope> {
        let parts = Self::product_form(draft, image)?;
        self.call(ApiRequest::post("/products/post").multipart(parts))
            .await
    }

    /// Update a product; sent as multipart when a new image is attached,
    /// JSON otherwise
    pub async fn update_product(
        &self,
        draft: &ProductDraft,
        image: Option<ImageUpload>,
    ) -> Result<ApiEnvelope> {
        let product_id = draft
            .product_id
            .as_deref()
            .context("Product update requires a product_id")?;

        let request = match image {
            Some(image) => {
                let mut parts = vec![FormPart::text("product_id", product_id)];
                parts.extend(Self::product_form(draft, Some(image))?);
                ApiRequest::post("/products/update").multipart(parts)
            }
            None => {
                let body = json!({
                    "product_id": product_id,
                    "category": draft.category,
                    "product_name": draft.product_name,
                    "price": draft.price,
                    "description": draft.description,
                    "availability": draft.availability,
                    "quantity": draft.quantity,
                    "date": Self::date_or_today(&draft.date),
                });
                ApiRequest::post("/products/update").json(&body)?
            }
        };
        self.call(request).await
    }

    pub async fn delete_product(&self, product_id: i64) -> Result<ApiEnvelope> {
        self.call(ApiRequest::delete(format!("/products/delete/{}", product_id)))
            .await
    }

    pub async fn delete_products(&self, product_ids: &[i64]) -> Result<ApiEnvelope> {
        let ids = product_ids
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        self.call(ApiRequest::delete("/products/delete").query("product_ids", ids))
            .await
    }

    pub async fn search_products(&self, term: &str, category: Option<&str>) -> Result<ApiEnvelope> {
        let request = ApiRequest::get("/products/search")
            .query("q", term)
            .query("category", category.unwrap_or_default());
        self.call(request).await
    }

    // ===== Issues =====

    pub async fn issues(&self) -> Result<ApiEnvelope> {
        self.call(ApiRequest::get("/orders/issues")).await
    }

    pub async fn update_issue_status(&self, update: &IssueUpdate) -> Result<ApiEnvelope> {
        self.call(ApiRequest::patch("/orders/issues/reportstatus/patch").json(update)?)
            .await
    }

    // ===== Analytics =====

    pub async fn weekly_sales(&self) -> Result<ApiEnvelope> {
        self.call(ApiRequest::get("/analytics/weeklysales")).await
    }

    pub async fn monthly_sales(&self) -> Result<ApiEnvelope> {
        self.call(ApiRequest::get("/analytics/monthlysales")).await
    }

    pub async fn orders_and_revenue(&self, start_date: &str, end_date: &str) -> Result<ApiEnvelope> {
        let request = ApiRequest::get("/analytics/totalordersandrevenue")
            .query("startDate", start_date)
            .query("endDate", end_date);
        self.call(request).await
    }

    pub async fn most_ordered_products(&self) -> Result<ApiEnvelope> {
        self.call(ApiRequest::get("/analytics/mostorderedproducts")).await
    }

    pub async fn most_ordered_product(&self) -> Result<ApiEnvelope> {
        self.call(ApiRequest::get("/analytics/mostorderedproduct")).await
    }

    pub async fn sales_report(&self) -> Result<ApiEnvelope> {
        self.call(ApiRequest::get("/analytics/salesreport")).await
    }

    // ===== Helpers =====

    fn date_or_today(date: &str) -> String {
        if date.is_empty() {
            Local::now().format("%Y-%m-%d").to_string()
        } else {
            date.to_string()
        }
    }

    fn product_form(draft: &ProductDraft, image: Option<ImageUpload>) -> Result<Vec<FormPart>> {
        let mut parts = vec![
            FormPart::text("category", draft.category.as_str()),
            FormPart::text("product_name", draft.product_name.as_str()),
            FormPart::text("price", draft.price.to_string()),
            FormPart::text("description", draft.description.as_str()),
            FormPart::text("availability", draft.availability.to_string()),
            FormPart::text("date", Self::date_or_today(&draft.date)),
        ];
        if let Some(quantity) = draft.quantity {
            parts.push(FormPart::text("quantity", quantity.to_string()));
        }

        let variations = draft.valid_variations();
        if !variations.is_empty() {
            let encoded = serde_json::to_string(&variations)
                .context("Failed to encode product variations")?;
            parts.push(FormPart::text("variations", encoded));
        }

        if let Some(image) = image {
            debug!(file = %image.file_name, bytes = image.bytes.len(), "Attaching product image");
            parts.push(FormPart::file("prod_img", image.file_name, image.mime, image.bytes));
        }
        Ok(parts)
    }
}
