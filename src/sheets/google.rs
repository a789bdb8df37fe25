use anyhow::Context;
use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::gateway::{Rows, SheetGateway, SpreadsheetMetadata, TabInfo};
use crate::config::SheetsCredentials;
use crate::storage::error::{StoreError, StoreResult};

const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Service-account identity used to mint bearer tokens.
#[derive(Clone, Deserialize)]
pub struct ServiceAccount {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccount {
    pub fn load(credentials: &SheetsCredentials) -> anyhow::Result<Self> {
        match credentials {
            SheetsCredentials::KeyFile(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("read service account file {}", path.display()))?;
                serde_json::from_str(&raw).context("parse service account json")
            }
            SheetsCredentials::Inline {
                client_email,
                private_key,
            } => Ok(Self {
                client_email: client_email.clone(),
                private_key: private_key.replace("\\n", "\n"),
                token_uri: default_token_uri(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    value: String,
    expires_at: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: TabInfo,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetResponse {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

fn cell_to_string(v: Value) -> String {
    match v {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Google Sheets v4 client bound to one spreadsheet document.
pub struct GoogleSheets {
    inner: reqwest::Client,
    base_url: String,
    spreadsheet_id: String,
    account: ServiceAccount,
    token: Mutex<Option<CachedToken>>,
}

impl GoogleSheets {
    pub fn new(spreadsheet_id: &str, account: ServiceAccount) -> Self {
        Self {
            inner: reqwest::Client::new(),
            base_url: SHEETS_BASE_URL.to_string(),
            spreadsheet_id: spreadsheet_id.to_string(),
            account,
            token: Mutex::new(None),
        }
    }

    /// Builds the client and proves access by fetching document metadata.
    pub async fn connect(spreadsheet_id: &str, credentials: &SheetsCredentials) -> anyhow::Result<Self> {
        let account = ServiceAccount::load(credentials)?;
        let client = Self::new(spreadsheet_id, account);
        let meta = client
            .metadata()
            .await
            .context("fetch spreadsheet metadata")?;
        tracing::info!(
            spreadsheet_id,
            tabs = meta.tabs.len(),
            "connected to google sheets"
        );
        Ok(client)
    }

    fn url(&self, segments: &[&str]) -> StoreResult<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| StoreError::Internal(format!("bad base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Internal("base url cannot take a path".into()))?
            .extend(segments);
        Ok(url)
    }

    fn values_url(&self, range: &str) -> StoreResult<Url> {
        self.url(&["spreadsheets", &self.spreadsheet_id, "values", range])
    }

    async fn bearer(&self) -> StoreResult<String> {
        let mut cached = self.token.lock().await;
        let now = OffsetDateTime::now_utc();
        if let Some(t) = cached.as_ref() {
            if t.expires_at - Duration::seconds(60) > now {
                return Ok(t.value.clone());
            }
        }

        let claims = AssertionClaims {
            iss: &self.account.client_email,
            scope: SCOPE,
            aud: &self.account.token_uri,
            iat: now.unix_timestamp(),
            exp: (now + Duration::hours(1)).unix_timestamp(),
        };
        let key = EncodingKey::from_rsa_pem(self.account.private_key.as_bytes())
            .map_err(|e| StoreError::Unavailable(format!("service account key: {e}")))?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| StoreError::Unavailable(format!("sign token assertion: {e}")))?;

        let response = self
            .inner
            .post(&self.account.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let token: TokenResponse = check(response, "token exchange").await?.json().await?;
        debug!(expires_in = token.expires_in, "google access token refreshed");

        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: now + Duration::seconds(token.expires_in),
        });
        Ok(token.access_token)
    }
}

async fn check(response: Response, op: &str) -> StoreResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Unavailable(format!("{op}: {status}: {body}")))
}

/// Cells are sent as `USER_ENTERED` so numbers stay numeric; a leading
/// apostrophe keeps text that starts with `=` from becoming a formula.
fn as_entered(rows: Rows) -> Rows {
    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .map(|cell| if cell.starts_with('=') { format!("'{cell}") } else { cell })
                .collect()
        })
        .collect()
}

fn qualified(tab: &str, range: Option<&str>) -> String {
    match range {
        Some(r) => format!("{tab}!{r}"),
        None => tab.to_string(),
    }
}

#[async_trait]
impl SheetGateway for GoogleSheets {
    #[instrument(skip(self), level = "debug")]
    async fn read(&self, tab: &str, range: Option<&str>) -> StoreResult<Rows> {
        let url = self.values_url(&qualified(tab, range))?;
        let response = self
            .inner
            .get(url)
            .bearer_auth(self.bearer().await?)
            .send()
            .await?;
        let body: ValueRange = check(response, "values.get").await?.json().await?;
        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect())
    }

    #[instrument(skip(self, rows), level = "debug")]
    async fn write(&self, tab: &str, range: &str, rows: Rows) -> StoreResult<()> {
        let target = qualified(tab, Some(range));
        let url = self.values_url(&target)?;
        let response = self
            .inner
            .put(url)
            .query(&[("valueInputOption", "USER_ENTERED")])
            .bearer_auth(self.bearer().await?)
            .json(&json!({ "range": target, "majorDimension": "ROWS", "values": as_entered(rows) }))
            .send()
            .await?;
        check(response, "values.update").await?;
        Ok(())
    }

    #[instrument(skip(self, rows), fields(rows = rows.len()), level = "debug")]
    async fn append(&self, tab: &str, rows: Rows) -> StoreResult<()> {
        let url = self.values_url(&format!("{tab}:append"))?;
        let response = self
            .inner
            .post(url)
            .query(&[
                ("valueInputOption", "USER_ENTERED"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .bearer_auth(self.bearer().await?)
            .json(&json!({ "majorDimension": "ROWS", "values": as_entered(rows) }))
            .send()
            .await?;
        check(response, "values.append").await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn clear(&self, tab: &str, range: &str) -> StoreResult<()> {
        let url = self.values_url(&format!("{}:clear", qualified(tab, Some(range))))?;
        let response = self
            .inner
            .post(url)
            .bearer_auth(self.bearer().await?)
            .json(&json!({}))
            .send()
            .await?;
        check(response, "values.clear").await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn metadata(&self) -> StoreResult<SpreadsheetMetadata> {
        let url = self.url(&["spreadsheets", &self.spreadsheet_id])?;
        let response = self
            .inner
            .get(url)
            .query(&[("fields", "sheets.properties(sheetId,title)")])
            .bearer_auth(self.bearer().await?)
            .send()
            .await?;
        let body: SpreadsheetResponse = check(response, "spreadsheets.get").await?.json().await?;
        Ok(SpreadsheetMetadata {
            tabs: body.sheets.into_iter().map(|s| s.properties).collect(),
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_rows(&self, sheet_id: i64, start: usize, end: usize) -> StoreResult<()> {
        let url = self.url(&[
            "spreadsheets",
            &format!("{}:batchUpdate", self.spreadsheet_id),
        ])?;
        let body = json!({
            "requests": [{
                "deleteDimension": {
                    "range": {
                        "sheetId": sheet_id,
                        "dimension": "ROWS",
                        "startIndex": start,
                        "endIndex": end,
                    }
                }
            }]
        });
        let response = self
            .inner
            .post(url)
            .bearer_auth(self.bearer().await?)
            .json(&body)
            .send()
            .await?;
        check(response, "batchUpdate deleteDimension").await?;
        Ok(())
    }

    async fn close(&self) {
        self.token.lock().await.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GoogleSheets {
        GoogleSheets::new(
            "sheet-123",
            ServiceAccount {
                client_email: "svc@example.iam.gserviceaccount.com".into(),
                private_key: "unused".into(),
                token_uri: DEFAULT_TOKEN_URI.into(),
            },
        )
    }

    #[test]
    fn values_url_keeps_a1_notation_readable() {
        let url = client().values_url("USERS!A2:L2").unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/sheet-123/values/USERS!A2:L2"
        );
    }

    #[test]
    fn formula_text_is_sent_as_literal() {
        let rows = vec![vec!["=IMPORTXML(\"x\")".to_string(), "10".into(), "a=b".into()]];
        assert_eq!(
            as_entered(rows),
            vec![vec!["'=IMPORTXML(\"x\")".to_string(), "10".into(), "a=b".into()]]
        );
    }

    #[test]
    fn qualified_ranges() {
        assert_eq!(qualified("INVENTORY", None), "INVENTORY");
        assert_eq!(qualified("INVENTORY", Some("A5:P5")), "INVENTORY!A5:P5");
    }

    #[test]
    fn non_string_cells_are_stringified() {
        assert_eq!(cell_to_string(json!("x")), "x");
        assert_eq!(cell_to_string(json!(12.5)), "12.5");
        assert_eq!(cell_to_string(json!(true)), "true");
        assert_eq!(cell_to_string(Value::Null), "");
    }

    #[test]
    fn inline_credentials_unescape_newlines() {
        let creds = SheetsCredentials::Inline {
            client_email: "svc@x".into(),
            private_key: "-----BEGIN-----\\nabc\\n-----END-----".into(),
        };
        let account = ServiceAccount::load(&creds).unwrap();
        assert_eq!(account.private_key.lines().count(), 3);
        assert_eq!(account.token_uri, DEFAULT_TOKEN_URI);
    }

    #[tokio::test]
    async fn bad_private_key_surfaces_as_unavailable() {
        let err = client().bearer().await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
