use crate::error::{ReceivablesError, Result};
use crate::ingestion::InvoiceRow;
use crate::payments::CustomerPayment;
use crate::schema::OrganizationConfig;
use crate::zoho::types::*;
use futures::future::try_join_all;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::sleep;

const ZOHO_API_BASE_URL: &str = "https://www.zohoapis.com/books/v3";
const ZOHO_ACCOUNTS_BASE_URL: &str = "https://accounts.zoho.com";
pub const DEFAULT_PER_PAGE: u32 = 200;

const MAX_RATE_LIMIT_RETRIES: u32 = 3;
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(2);

/// Exchanges a refresh token for a short-lived access token.
pub async fn request_access_token(
    client: &Client,
    accounts_base_url: &str,
    credentials: &ZohoCredentials,
) -> Result<String> {
    let url = format!("{}/oauth/v2/token", accounts_base_url);
    let res = client
        .post(&url)
        .form(&[
            ("refresh_token", credentials.refresh_token.as_str()),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("grant_type", "refresh_token"),
        ])
        .send()
        .await?;

    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(ReceivablesError::AuthFailed(format!(
            "token endpoint returned status {}: {}",
            status, body
        )));
    }

    // Zoho answers 200 with an `error` field for bad refresh tokens.
    let body: TokenResponse = res.json().await?;
    match body.access_token {
        Some(token) if !token.is_empty() => {
            debug!("Obtained Zoho access token");
            Ok(token)
        }
        _ => Err(ReceivablesError::AuthFailed(
            body.error
                .unwrap_or_else(|| "no access_token in response".to_string()),
        )),
    }
}

#[derive(Clone)]
pub struct ZohoClient {
    client: Client,
    access_token: String,
    base_url: String,
}

impl ZohoClient {
    pub fn new(access_token: String) -> Self {
        Self::with_base_url(access_token, ZOHO_API_BASE_URL.to_string())
    }

    pub fn with_base_url(access_token: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            access_token,
            base_url,
        }
    }

    /// Refreshes an access token against the production accounts server.
    pub async fn connect(credentials: &ZohoCredentials) -> Result<Self> {
        Self::connect_with_base_urls(
            credentials,
            ZOHO_API_BASE_URL.to_string(),
            ZOHO_ACCOUNTS_BASE_URL,
        )
        .await
    }

    pub async fn connect_with_base_urls(
        credentials: &ZohoCredentials,
        base_url: String,
        accounts_base_url: &str,
    ) -> Result<Self> {
        let client = Client::new();
        let access_token = request_access_token(&client, accounts_base_url, credentials).await?;
        Ok(Self {
            client,
            access_token,
            base_url,
        })
    }

    pub async fn list_organizations(&self) -> Result<Vec<Organization>> {
        let body: OrganizationListResponse = self.get_json("organizations", &[]).await?;
        info!("Token can access {} organizations", body.organizations.len());
        Ok(body.organizations)
    }

    pub async fn fetch_invoices(
        &self,
        organization_id: &str,
        query: &InvoiceQuery,
    ) -> Result<Vec<ZohoInvoice>> {
        let mut params = vec![("organization_id", organization_id.to_string())];
        if let Some(status) = query.status {
            params.push(("status", status.as_str().to_string()));
        }
        if let Some(date_start) = query.date_start {
            params.push(("date_start", date_start.format("%Y-%m-%d").to_string()));
        }

        let invoices = self
            .fetch_pages::<InvoiceListResponse>("invoices", params, query.per_page, query.max_pages)
            .await?;
        info!(
            "Fetched {} invoices for organization {}",
            invoices.len(),
            organization_id
        );
        Ok(invoices)
    }

    pub async fn fetch_customer_payments(
        &self,
        organization_id: &str,
        query: &PaymentQuery,
    ) -> Result<Vec<CustomerPayment>> {
        let mut params = vec![("organization_id", organization_id.to_string())];
        if let Some(date_start) = query.date_start {
            params.push(("date_start", date_start.format("%Y-%m-%d").to_string()));
        }

        let payments = self
            .fetch_pages::<PaymentListResponse>(
                "customerpayments",
                params,
                query.per_page,
                query.max_pages,
            )
            .await?;
        info!(
            "Fetched {} customer payments for organization {}",
            payments.len(),
            organization_id
        );
        Ok(payments)
    }

    /// Invoice count as reported by the first page's `page_context.total`.
    /// A response without a total counts as zero.
    pub async fn count_invoices(
        &self,
        organization_id: &str,
        status: Option<InvoiceStatus>,
    ) -> Result<u64> {
        let mut params = vec![
            ("organization_id", organization_id.to_string()),
            ("page", "1".to_string()),
            ("per_page", "1".to_string()),
        ];
        if let Some(status) = status {
            params.push(("status", status.as_str().to_string()));
        }

        let body: InvoiceListResponse = self.get_json("invoices", &params).await?;
        let total = body.page_context.and_then(|c| c.total).unwrap_or(0);
        debug!("Organization {} reports {} invoices", organization_id, total);
        Ok(total)
    }

    /// First invoice matching `status`, for eyeballing the field layout.
    pub async fn fetch_sample_invoice(
        &self,
        organization_id: &str,
        status: InvoiceStatus,
    ) -> Result<Option<ZohoInvoice>> {
        let query = InvoiceQuery::default()
            .with_status(status)
            .per_page(1)
            .max_pages(1);
        Ok(self
            .fetch_invoices(organization_id, &query)
            .await?
            .into_iter()
            .next())
    }

    /// Overdue invoices for several organizations, fetched concurrently and
    /// returned in the order given, tagged with each organization's name.
    pub async fn fetch_overdue_rows(
        &self,
        organizations: &[OrganizationConfig],
    ) -> Result<Vec<(OrganizationConfig, Vec<InvoiceRow>)>> {
        let query = InvoiceQuery::overdue();
        let fetches = organizations.iter().map(|org| {
            let query = &query;
            async move {
                let invoices = self.fetch_invoices(&org.organization_id, query).await?;
                let rows = invoices.iter().map(|inv| inv.to_row(&org.name)).collect();
                Ok::<_, ReceivablesError>((org.clone(), rows))
            }
        });

        try_join_all(fetches).await
    }

    async fn fetch_pages<R>(
        &self,
        path: &str,
        base_params: Vec<(&str, String)>,
        per_page: u32,
        max_pages: Option<u32>,
    ) -> Result<Vec<R::Item>>
    where
        R: PagedResponse + DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut page = 1u32;

        loop {
            if let Some(max) = max_pages {
                if page > max {
                    warn!("Max page limit ({}) reached for /{}, stopping early", max, path);
                    break;
                }
            }

            debug!("Fetching /{} page {}", path, page);
            let mut params = base_params.clone();
            params.push(("page", page.to_string()));
            params.push(("per_page", per_page.to_string()));

            let response: R = self.get_json(path, &params).await?;
            let (batch, has_more) = response.into_page();
            items.extend(batch);

            if !has_more {
                break;
            }
            page += 1;
        }

        Ok(items)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Result<T> {
        let url = format!("{}/{}", self.base_url, path);
        let mut attempt = 0u32;

        loop {
            let res = self
                .client
                .get(&url)
                .header("Authorization", format!("Zoho-oauthtoken {}", self.access_token))
                .query(params)
                .send()
                .await?;

            let status = res.status();
            if status == StatusCode::TOO_MANY_REQUESTS && attempt < MAX_RATE_LIMIT_RETRIES {
                attempt += 1;
                warn!(
                    "Rate limited on /{} (attempt {}), backing off",
                    path, attempt
                );
                sleep(RATE_LIMIT_BACKOFF * attempt).await;
                continue;
            }

            if !status.is_success() {
                let text = res.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ApiErrorBody>(&text)
                    .ok()
                    .and_then(|b| b.message)
                    .unwrap_or(text);
                return Err(ReceivablesError::ApiError {
                    status: status.as_u16(),
                    message,
                });
            }

            return Ok(res.json().await?);
        }
    }
}
