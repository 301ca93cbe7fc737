use crate::error::{ReceivablesError, Result};
use crate::ingestion::InvoiceRow;
use crate::payments::CustomerPayment;
use crate::utils::{deserialize_flag, deserialize_lenient_amount, deserialize_lenient_date};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const ENV_REFRESH_TOKEN: &str = "ZOHO_REFRESH_TOKEN";
pub const ENV_CLIENT_ID: &str = "ZOHO_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "ZOHO_CLIENT_SECRET";

/// OAuth client credentials plus a long-lived refresh token.
#[derive(Clone)]
pub struct ZohoCredentials {
    pub refresh_token: String,
    pub client_id: String,
    pub client_secret: String,
}

impl ZohoCredentials {
    pub fn new(
        refresh_token: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            refresh_token: refresh_token.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Reads `ZOHO_REFRESH_TOKEN`, `ZOHO_CLIENT_ID` and `ZOHO_CLIENT_SECRET`.
    pub fn from_env() -> Result<Self> {
        let read = |key: &str| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ReceivablesError::MissingCredential(key.to_string()))
        };

        Ok(Self {
            refresh_token: read(ENV_REFRESH_TOKEN)?,
            client_id: read(ENV_CLIENT_ID)?,
            client_secret: read(ENV_CLIENT_SECRET)?,
        })
    }
}

impl fmt::Debug for ZohoCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZohoCredentials")
            .field("client_id", &self.client_id)
            .field("refresh_token", &"<redacted>")
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Overdue,
    Paid,
    Unpaid,
    Sent,
    Draft,
    Void,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overdue => "overdue",
            Self::Paid => "paid",
            Self::Unpaid => "unpaid",
            Self::Sent => "sent",
            Self::Draft => "draft",
            Self::Void => "void",
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Organization {
    pub organization_id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ZohoInvoice {
    #[serde(default)]
    pub invoice_id: String,
    #[serde(default)]
    pub invoice_number: String,
    #[serde(default)]
    pub customer_name: String,
    #[serde(default, deserialize_with = "deserialize_lenient_date")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "deserialize_lenient_amount")]
    pub total: f64,
    #[serde(default, deserialize_with = "deserialize_lenient_amount")]
    pub balance: f64,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub is_emailed: bool,
}

impl ZohoInvoice {
    pub fn to_row(&self, organization_name: &str) -> InvoiceRow {
        InvoiceRow {
            invoice_id: Some(self.invoice_id.clone()).filter(|id| !id.is_empty()),
            invoice_number: self.invoice_number.clone(),
            customer_name: self.customer_name.clone(),
            due_date: self.due_date,
            total: self.total,
            balance: self.balance,
            status: self.status.clone(),
            is_emailed: self.is_emailed,
            organization: organization_name.to_string(),
            payment_mode: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PageContext {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub per_page: u32,
    #[serde(default)]
    pub has_more_page: bool,
    #[serde(default)]
    pub total: Option<u64>,
}

/// A list endpoint response that may continue on a following page.
pub(crate) trait PagedResponse {
    type Item;

    fn into_page(self) -> (Vec<Self::Item>, bool);
}

#[derive(Debug, Deserialize)]
pub(crate) struct InvoiceListResponse {
    #[serde(default)]
    pub invoices: Vec<ZohoInvoice>,
    #[serde(default)]
    pub page_context: Option<PageContext>,
}

impl PagedResponse for InvoiceListResponse {
    type Item = ZohoInvoice;

    fn into_page(self) -> (Vec<ZohoInvoice>, bool) {
        let has_more = self.page_context.map_or(false, |c| c.has_more_page);
        (self.invoices, has_more)
    }
}

// The payments endpoint has used both spellings of the list key.
#[derive(Debug, Deserialize)]
pub(crate) struct PaymentListResponse {
    #[serde(default, alias = "customerpayments")]
    pub customer_payments: Vec<CustomerPayment>,
    #[serde(default)]
    pub page_context: Option<PageContext>,
}

impl PagedResponse for PaymentListResponse {
    type Item = CustomerPayment;

    fn into_page(self) -> (Vec<CustomerPayment>, bool) {
        let has_more = self.page_context.map_or(false, |c| c.has_more_page);
        (self.customer_payments, has_more)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct OrganizationListResponse {
    #[serde(default)]
    pub organizations: Vec<Organization>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub message: Option<String>,
}

/// Filters for the invoice list endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceQuery {
    pub status: Option<InvoiceStatus>,
    pub date_start: Option<NaiveDate>,
    pub per_page: u32,
    /// Stop after this many pages even if more remain.
    pub max_pages: Option<u32>,
}

impl Default for InvoiceQuery {
    fn default() -> Self {
        Self {
            status: None,
            date_start: None,
            per_page: super::client::DEFAULT_PER_PAGE,
            max_pages: None,
        }
    }
}

impl InvoiceQuery {
    pub fn overdue() -> Self {
        Self {
            status: Some(InvoiceStatus::Overdue),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: InvoiceStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn since(mut self, date_start: NaiveDate) -> Self {
        self.date_start = Some(date_start);
        self
    }

    pub fn max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    pub fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page;
        self
    }
}

/// Filters for the customer payments endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentQuery {
    pub date_start: Option<NaiveDate>,
    pub per_page: u32,
    pub max_pages: Option<u32>,
}

impl Default for PaymentQuery {
    fn default() -> Self {
        Self {
            date_start: None,
            per_page: super::client::DEFAULT_PER_PAGE,
            max_pages: None,
        }
    }
}

impl PaymentQuery {
    pub fn since(mut self, date_start: NaiveDate) -> Self {
        self.date_start = Some(date_start);
        self
    }

    pub fn max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = Some(max_pages);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoice_list_response() {
        let json = r#"{
            "code": 0,
            "message": "success",
            "invoices": [{
                "invoice_id": "982000000567114",
                "invoice_number": "INV-00003",
                "customer_name": "Bowman and Co",
                "status": "overdue",
                "due_date": "2013-11-18",
                "total": 40.6,
                "balance": 40.6,
                "is_emailed": true
            }],
            "page_context": {"page": 1, "per_page": 200, "has_more_page": true}
        }"#;

        let response: InvoiceListResponse = serde_json::from_str(json).unwrap();
        let (items, has_more) = response.into_page();
        assert!(has_more);
        assert_eq!(items.len(), 1);

        let row = items[0].to_row("GoFleet Corporation");
        assert_eq!(row.invoice_id.as_deref(), Some("982000000567114"));
        assert_eq!(row.invoice_number, "INV-00003");
        assert_eq!(row.due_date, NaiveDate::from_ymd_opt(2013, 11, 18));
        assert_eq!(row.balance, 40.6);
        assert!(row.is_emailed);
        assert_eq!(row.organization, "GoFleet Corporation");
    }

    #[test]
    fn test_api_invoice_enriches_by_payment_invoice_id() {
        let invoice = ZohoInvoice {
            invoice_id: "9001".into(),
            invoice_number: "INV-1".into(),
            customer_name: "Acme".into(),
            ..Default::default()
        };
        let payments: PaymentListResponse = serde_json::from_str(
            r#"{"customer_payments":[{"payment_id":"p1","payment_mode":"Stripe","amount":5,
                "invoices":[{"invoice_id":"9001"}]}]}"#,
        )
        .unwrap();
        let map = crate::payments::PaymentModeMap::from_payments(&payments.into_page().0);

        let mut rows = vec![invoice.to_row("GoFleet Corporation")];
        crate::payments::enrich_with_payment_modes(&mut rows, &map);
        assert_eq!(rows[0].payment_mode.as_deref(), Some("Stripe"));
    }

    #[test]
    fn test_payment_list_accepts_both_keys() {
        let a: PaymentListResponse =
            serde_json::from_str(r#"{"customer_payments":[{"payment_id":"1","amount":5}]}"#).unwrap();
        let b: PaymentListResponse =
            serde_json::from_str(r#"{"customerpayments":[{"payment_id":"2","amount":7}]}"#).unwrap();
        assert_eq!(a.into_page().0[0].payment_id, "1");
        let (items, has_more) = b.into_page();
        assert_eq!(items[0].amount, 7.0);
        assert!(!has_more);
    }

    #[test]
    fn test_credentials_debug_redacts_secrets() {
        let creds = ZohoCredentials::new("refresh-secret", "client-id", "client-secret");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("client-id"));
        assert!(!debug.contains("refresh-secret"));
        assert!(!debug.contains("client-secret"));
    }

    #[test]
    fn test_query_builders() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let query = InvoiceQuery::default()
            .with_status(InvoiceStatus::Paid)
            .since(start)
            .max_pages(60);
        assert_eq!(query.status.map(|s| s.as_str()), Some("paid"));
        assert_eq!(query.per_page, 200);
        assert_eq!(query.max_pages, Some(60));
        assert_eq!(InvoiceQuery::overdue().status, Some(InvoiceStatus::Overdue));
    }
}
