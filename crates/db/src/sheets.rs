//! Spreadsheet ledger over the Google Sheets v4 values API.
//!
//! Row 1 holds the column headers and records start at row 2, so a [`LedgerPosition`] is
//! the sheet row number itself. The sheet offers no transactions; deleting a row shifts every
//! row below it up by one.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use slotbook_core::config::LedgerConfig;
use slotbook_core::domain::{FieldValue, LedgerField, LedgerPosition, Reservation};
use slotbook_core::ledger::{decode_rows, LedgerClient, LedgerError, LedgerRecord};
use thiserror::Error;
use tracing::{debug, warn};

const LAST_COLUMN: char = 'H';
const ERROR_BODY_LIMIT: usize = 200;

#[derive(Debug, Error)]
pub enum SheetsSetupError {
    #[error("ledger.spreadsheet_id is not configured")]
    MissingSpreadsheetId,
    #[error("ledger.access_token is not configured")]
    MissingAccessToken,
    #[error("invalid ledger api base url `{0}`")]
    InvalidBaseUrl(String),
    #[error("could not build http client: {0}")]
    Client(#[from] reqwest::Error),
}

pub struct SheetsLedger {
    client: Client,
    base_url: Url,
    spreadsheet_id: String,
    sheet_name: String,
    sheet_gid: u64,
    access_token: SecretString,
}

#[derive(Debug, Default, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

impl SheetsLedger {
    pub fn from_config(config: &LedgerConfig) -> Result<Self, SheetsSetupError> {
        let spreadsheet_id =
            config.spreadsheet_id.clone().ok_or(SheetsSetupError::MissingSpreadsheetId)?;
        let access_token =
            config.access_token.clone().ok_or(SheetsSetupError::MissingAccessToken)?;
        let base_url = Url::parse(&config.api_base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| SheetsSetupError::InvalidBaseUrl(config.api_base_url.clone()))?;
        // the ledger wrapper enforces its own deadline; this only stops leaked sockets
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.saturating_mul(2).max(1)))
            .build()?;

        Ok(Self {
            client,
            base_url,
            spreadsheet_id,
            sheet_name: config.sheet_name.clone(),
            sheet_gid: config.sheet_gid,
            access_token,
        })
    }

    fn endpoint(&self, tail: &[&str]) -> Result<Url, LedgerError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                LedgerError::Malformed("ledger api base url cannot carry a path".to_string())
            })?;
            segments.pop_if_empty().extend(["v4", "spreadsheets"]).extend(tail);
        }
        Ok(url)
    }

    fn values_endpoint(&self, range: &str) -> Result<Url, LedgerError> {
        self.endpoint(&[self.spreadsheet_id.as_str(), "values", range])
    }

    async fn send(
        &self,
        request: RequestBuilder,
        operation: &'static str,
        position: Option<LedgerPosition>,
    ) -> Result<Response, LedgerError> {
        let response = request
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await
            .map_err(|error| {
                warn!(
                    event_name = "ledger.sheets.transport_failed",
                    operation,
                    error = %error,
                    "spreadsheet request failed"
                );
                LedgerError::Unavailable(format!("{operation}: {error}"))
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(event_name = "ledger.sheets.ok", operation, status = status.as_u16());
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let error = status_error(status, &body, position);
        warn!(
            event_name = "ledger.sheets.rejected",
            operation,
            status = status.as_u16(),
            error = %error,
            "spreadsheet request rejected"
        );
        Err(error)
    }
}

/// `'Sheet name'` with embedded quotes doubled, as A1 notation requires.
pub fn quote_sheet_name(sheet_name: &str) -> String {
    format!("'{}'", sheet_name.replace('\'', "''"))
}

pub fn data_range(sheet_name: &str) -> String {
    format!(
        "{}!A{}:{LAST_COLUMN}",
        quote_sheet_name(sheet_name),
        LedgerPosition::FIRST_RECORD.row()
    )
}

pub fn header_range(sheet_name: &str) -> String {
    format!("{}!A1:{LAST_COLUMN}1", quote_sheet_name(sheet_name))
}

pub fn cell_range(sheet_name: &str, position: LedgerPosition, field: LedgerField) -> String {
    format!("{}!{}{}", quote_sheet_name(sheet_name), field.column_letter(), position.row())
}

/// `deleteDimension` request body removing exactly the row at `position`.
pub fn delete_row_request(sheet_gid: u64, position: LedgerPosition) -> Value {
    let end = position.row();
    json!({
        "requests": [{
            "deleteDimension": {
                "range": {
                    "sheetId": sheet_gid,
                    "dimension": "ROWS",
                    "startIndex": end.saturating_sub(1),
                    "endIndex": end,
                }
            }
        }]
    })
}

/// Flattens API cells into strings. The API drops trailing empty cells and renders
/// unformatted numbers as JSON numbers.
pub fn cells_to_strings(rows: Vec<Vec<Value>>) -> Vec<Vec<String>> {
    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .map(|cell| match cell {
                    Value::String(text) => text,
                    Value::Null => String::new(),
                    other => other.to_string(),
                })
                .collect()
        })
        .collect()
}

pub fn status_error(status: StatusCode, body: &str, position: Option<LedgerPosition>) -> LedgerError {
    let detail: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            LedgerError::Unauthorized(format!("{status}: {detail}"))
        }
        StatusCode::TOO_MANY_REQUESTS => LedgerError::RateLimited(format!("{status}: {detail}")),
        StatusCode::BAD_REQUEST if body.contains("exceeds grid limits") => match position {
            Some(position) => LedgerError::PositionOutOfRange(position),
            None => LedgerError::Malformed(format!("{status}: {detail}")),
        },
        _ => LedgerError::Unavailable(format!("{status}: {detail}")),
    }
}

#[async_trait]
impl LedgerClient for SheetsLedger {
    async fn append(&self, reservation: &Reservation) -> Result<(), LedgerError> {
        let append_target = format!("{}:append", header_range(&self.sheet_name));
        let mut url = self.values_endpoint(&append_target)?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");

        let body = json!({ "values": [reservation.to_row()] });
        self.send(self.client.post(url).json(&body), "append", None).await?;
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<LedgerRecord>, LedgerError> {
        let mut url = self.values_endpoint(&data_range(&self.sheet_name))?;
        url.query_pairs_mut()
            .append_pair("majorDimension", "ROWS")
            .append_pair("valueRenderOption", "FORMATTED_VALUE");

        let response = self.send(self.client.get(url), "read_all", None).await?;
        let range: ValueRange = response
            .json()
            .await
            .map_err(|error| LedgerError::Malformed(format!("read_all: {error}")))?;
        Ok(decode_rows(cells_to_strings(range.values)))
    }

    async fn update_field(
        &self,
        position: LedgerPosition,
        field: LedgerField,
        value: &FieldValue,
    ) -> Result<(), LedgerError> {
        if position.record_index().is_none() {
            return Err(LedgerError::PositionOutOfRange(position));
        }
        let range = cell_range(&self.sheet_name, position, field);
        let mut url = self.values_endpoint(&range)?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");

        let body = json!({ "range": range, "values": [[value.to_cell()]] });
        self.send(self.client.put(url).json(&body), "update_field", Some(position)).await?;
        Ok(())
    }

    async fn delete(&self, position: LedgerPosition) -> Result<(), LedgerError> {
        if position.record_index().is_none() {
            return Err(LedgerError::PositionOutOfRange(position));
        }
        let batch_update = format!("{}:batchUpdate", self.spreadsheet_id);
        let url = self.endpoint(&[batch_update.as_str()])?;

        let body = delete_row_request(self.sheet_gid, position);
        self.send(self.client.post(url).json(&body), "delete", Some(position)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;
    use secrecy::SecretString;
    use serde_json::json;
    use slotbook_core::config::AppConfig;
    use slotbook_core::domain::{LedgerField, LedgerPosition};
    use slotbook_core::ledger::LedgerError;

    use super::{
        cell_range, cells_to_strings, data_range, delete_row_request, status_error, SheetsLedger,
        SheetsSetupError,
    };

    #[test]
    fn ranges_use_quoted_a1_notation() {
        assert_eq!(data_range("Sheet1"), "'Sheet1'!A2:H");
        assert_eq!(data_range("Guest's list"), "'Guest''s list'!A2:H");
        assert_eq!(
            cell_range("Sheet1", LedgerPosition(7), LedgerField::ReminderSentAt),
            "'Sheet1'!G7"
        );
    }

    #[test]
    fn delete_request_targets_a_single_zero_based_row() {
        let body = delete_row_request(42, LedgerPosition(5));
        assert_eq!(
            body["requests"][0]["deleteDimension"]["range"],
            json!({ "sheetId": 42, "dimension": "ROWS", "startIndex": 4, "endIndex": 5 })
        );
    }

    #[test]
    fn cells_are_flattened_to_strings() {
        let rows = vec![vec![json!("501"), json!(79991234567_u64), json!(null)], vec![]];
        assert_eq!(
            cells_to_strings(rows),
            vec![vec!["501".to_string(), "79991234567".to_string(), String::new()], vec![]]
        );
    }

    #[test]
    fn http_statuses_map_to_ledger_errors() {
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, "denied", None),
            LedgerError::Unauthorized(_)
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, "", None),
            LedgerError::RateLimited(_)
        ));
        assert_eq!(
            status_error(
                StatusCode::BAD_REQUEST,
                "Invalid requests[0].deleteDimension: Range exceeds grid limits",
                Some(LedgerPosition(9)),
            ),
            LedgerError::PositionOutOfRange(LedgerPosition(9))
        );
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, &"x".repeat(1000), None),
            LedgerError::Unavailable(message) if message.len() < 300
        ));
    }

    #[test]
    fn endpoints_percent_encode_the_range() {
        let mut config = AppConfig::default().ledger;
        config.spreadsheet_id = Some("abc123".to_string());
        config.access_token = Some(SecretString::from("token".to_string()));
        config.sheet_name = "Guest list".to_string();
        let ledger = SheetsLedger::from_config(&config).expect("ledger");

        let url = ledger.values_endpoint(&data_range(&ledger.sheet_name)).expect("url");
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc123/values/'Guest%20list'!A2:H"
        );
    }

    #[test]
    fn setup_requires_spreadsheet_and_token() {
        let config = AppConfig::default().ledger;
        assert!(matches!(
            SheetsLedger::from_config(&config),
            Err(SheetsSetupError::MissingSpreadsheetId)
        ));
    }
}
