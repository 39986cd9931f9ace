//! services/api/src/adapters/ocr.rs
//!
//! OCR providers behind the `OcrProcessor` port. Both vendors return raw
//! text plus a confidence; the structured fields are pulled out of the text
//! by one shared `FieldExtractor`.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, NaiveDate, Utc};
use hmac::{Hmac, Mac};
use regex::Regex;
use reqwest::Client;
use ride_platform_core::domain::documents::OcrResult;
use ride_platform_core::ports::{OcrProcessor, PortError, PortResult};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;

//=========================================================================================
// Field Extraction
//=========================================================================================

const DATE: &str = r"(\d{4}-\d{2}-\d{2}|\d{1,2}[/.-]\d{1,2}[/.-]\d{4})";
const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%m/%d/%Y", "%d.%m.%Y", "%m-%d-%Y"];

/// Pulls well-known document fields out of OCR text.
pub struct FieldExtractor {
    number: Regex,
    expiry: Regex,
    issued: Regex,
    birth: Regex,
    authority: Regex,
    name: Regex,
    address: Regex,
    plate: Regex,
    vin: Regex,
}

impl FieldExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            number: Regex::new(
                r"(?i)\b(?:DL|LIC(?:ENSE)?|DOCUMENT|POLICY|CERTIFICATE)\s*(?:NO\.?|NUMBER|#)?\s*[:#]?\s*([A-Z0-9][A-Z0-9-]{4,19})",
            )?,
            expiry: Regex::new(&format!(
                r"(?i)\b(?:EXP(?:IRES|IRY|IRATION)?(?:\s+DATE)?|VALID\s+(?:UNTIL|THRU|THROUGH))\s*[:.]?\s*{}",
                DATE
            ))?,
            issued: Regex::new(&format!(
                r"(?i)\b(?:ISS(?:UED)?(?:\s+ON)?|DATE\s+OF\s+ISSUE|ISSUE\s+DATE)\s*[:.]?\s*{}",
                DATE
            ))?,
            birth: Regex::new(&format!(
                r"(?i)\b(?:DOB|DATE\s+OF\s+BIRTH|BIRTH\s*DATE)\s*[:.]?\s*{}",
                DATE
            ))?,
            authority: Regex::new(r"(?i)\b(?:ISSUING\s+AUTHORITY|ISSUED\s+BY)\s*[:.]?\s*([^\n]+)")?,
            name: Regex::new(r"(?i)\bNAME\s*[:.]?\s*([^\n]+)")?,
            address: Regex::new(r"(?i)\bADDRESS\s*[:.]?\s*([^\n]+)")?,
            plate: Regex::new(
                r"(?i)\b(?:PLATE|REG(?:ISTRATION)?)\s*(?:NO\.?|NUMBER)?\s*[:#]?\s*([A-Z0-9-]{2,10})\b",
            )?,
            vin: Regex::new(r"\b([A-HJ-NPR-Z0-9]{17})\b")?,
        })
    }

    fn capture(re: &Regex, text: &str) -> Option<String> {
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn date(re: &Regex, text: &str) -> Option<NaiveDate> {
        let raw = Self::capture(re, text)?;
        DATE_FORMATS
            .iter()
            .find_map(|f| NaiveDate::parse_from_str(&raw, f).ok())
    }

    pub fn extract(&self, text: &str, confidence: f64, metadata: Value) -> OcrResult {
        OcrResult {
            raw_text: text.to_string(),
            confidence,
            document_number: Self::capture(&self.number, text),
            full_name: Self::capture(&self.name, text),
            date_of_birth: Self::date(&self.birth, text),
            issue_date: Self::date(&self.issued, text),
            expiry_date: Self::date(&self.expiry, text),
            issuing_authority: Self::capture(&self.authority, text),
            address: Self::capture(&self.address, text),
            vehicle_plate: Self::capture(&self.plate, text),
            vehicle_vin: Self::capture(&self.vin, text),
            metadata,
        }
    }
}

fn unavailable(provider: &str, e: impl std::fmt::Display) -> PortError {
    PortError::Unavailable(format!("{}: {}", provider, e))
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

//=========================================================================================
// Google Cloud Vision
//=========================================================================================

pub struct GoogleVisionOcr {
    client: Client,
    api_key: String,
    fields: FieldExtractor,
}

impl GoogleVisionOcr {
    const BASE_URL: &'static str = "https://vision.googleapis.com/v1";

    pub fn new(api_key: String, fields: FieldExtractor, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            api_key,
            fields,
        })
    }

    /// PDFs go through `files:annotate`, images through `images:annotate`.
    fn request(image: &[u8], mime: &str) -> (&'static str, Value) {
        let content = base64::engine::general_purpose::STANDARD.encode(image);
        let features = json!([{ "type": "DOCUMENT_TEXT_DETECTION" }]);
        if mime == "application/pdf" {
            (
                "files:annotate",
                json!({ "requests": [{
                    "inputConfig": { "content": content, "mimeType": mime },
                    "features": features,
                    "pages": [1],
                }]}),
            )
        } else {
            (
                "images:annotate",
                json!({ "requests": [{ "image": { "content": content }, "features": features }] }),
            )
        }
    }

    /// Returns the text and mean page confidence of one annotate response.
    fn read_annotation(response: &Value) -> PortResult<(String, f64)> {
        let first = &response["responses"][0];
        // files:annotate nests one more level of per-page responses.
        let page = if first.get("responses").is_some() {
            &first["responses"][0]
        } else {
            first
        };
        if let Some(message) = page["error"]["message"].as_str() {
            return Err(unavailable("google_vision", message));
        }
        let annotation = &page["fullTextAnnotation"];
        let text = annotation["text"].as_str().unwrap_or_default().to_string();
        let confidences: Vec<f64> = annotation["pages"]
            .as_array()
            .map(|pages| pages.iter().filter_map(|p| p["confidence"].as_f64()).collect())
            .unwrap_or_default();
        Ok((text, mean(&confidences)))
    }
}

#[async_trait]
impl OcrProcessor for GoogleVisionOcr {
    fn provider(&self) -> &str {
        "google_vision"
    }

    async fn process(&self, image: &[u8], mime: &str, document_type_code: &str) -> PortResult<OcrResult> {
        let (endpoint, body) = Self::request(image, mime);
        let res = self
            .client
            .post(format!("{}/{}", Self::BASE_URL, endpoint))
            .query(&[("key", &self.api_key)])
            .json(&body)
            .send()
            .await
            .map_err(|e| unavailable("google_vision", e))?;
        let status = res.status();
        if !status.is_success() {
            return Err(unavailable("google_vision", format!("status {}", status)));
        }
        let response: Value = res.json().await.map_err(|e| unavailable("google_vision", e))?;
        let (text, confidence) = Self::read_annotation(&response)?;
        debug!(document_type = document_type_code, chars = text.len(), confidence, "Vision annotation received");
        Ok(self.fields.extract(&text, confidence, json!({ "provider": "google_vision" })))
    }
}

//=========================================================================================
// AWS Textract
//=========================================================================================

type HmacSha256 = Hmac<Sha256>;

const TEXTRACT_TARGET: &str = "Textract.DetectDocumentText";
const TEXTRACT_CONTENT_TYPE: &str = "application/x-amz-json-1.1";

pub struct AwsCredentials {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

pub struct TextractOcr {
    client: Client,
    credentials: AwsCredentials,
    fields: FieldExtractor,
}

fn hmac_sha256(key: &[u8], data: &str) -> PortResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| PortError::Unexpected(format!("hmac key: {}", e)))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Builds the SigV4 `Authorization` header for a Textract JSON call.
fn sigv4_authorization(
    creds: &AwsCredentials,
    host: &str,
    payload: &str,
    at: DateTime<Utc>,
) -> PortResult<(String, String)> {
    let amz_date = at.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = at.format("%Y%m%d").to_string();
    let signed_headers = "content-type;host;x-amz-date;x-amz-target";
    let canonical_request = format!(
        "POST\n/\n\ncontent-type:{}\nhost:{}\nx-amz-date:{}\nx-amz-target:{}\n\n{}\n{}",
        TEXTRACT_CONTENT_TYPE,
        host,
        amz_date,
        TEXTRACT_TARGET,
        signed_headers,
        hex::encode(Sha256::digest(payload.as_bytes()))
    );
    let scope = format!("{}/{}/textract/aws4_request", date_stamp, creds.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let k_date = hmac_sha256(format!("AWS4{}", creds.secret_access_key).as_bytes(), &date_stamp)?;
    let k_region = hmac_sha256(&k_date, &creds.region)?;
    let k_service = hmac_sha256(&k_region, "textract")?;
    let k_signing = hmac_sha256(&k_service, "aws4_request")?;
    let signature = hex::encode(hmac_sha256(&k_signing, &string_to_sign)?);

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        creds.access_key_id, scope, signed_headers, signature
    );
    Ok((authorization, amz_date))
}

impl TextractOcr {
    pub fn new(credentials: AwsCredentials, fields: FieldExtractor, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            credentials,
            fields,
        })
    }

    fn host(&self) -> String {
        format!("textract.{}.amazonaws.com", self.credentials.region)
    }

    /// Joins LINE blocks and averages their confidence (Textract reports 0-100).
    fn read_blocks(response: &Value) -> (String, f64) {
        let lines: Vec<&Value> = response["Blocks"]
            .as_array()
            .map(|blocks| blocks.iter().filter(|b| b["BlockType"] == "LINE").collect())
            .unwrap_or_default();
        let text = lines
            .iter()
            .filter_map(|b| b["Text"].as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let confidences: Vec<f64> = lines
            .iter()
            .filter_map(|b| b["Confidence"].as_f64())
            .map(|c| c / 100.0)
            .collect();
        (text, mean(&confidences))
    }
}

#[async_trait]
impl OcrProcessor for TextractOcr {
    fn provider(&self) -> &str {
        "aws_textract"
    }

    async fn process(&self, image: &[u8], _mime: &str, document_type_code: &str) -> PortResult<OcrResult> {
        let payload = json!({
            "Document": { "Bytes": base64::engine::general_purpose::STANDARD.encode(image) }
        })
        .to_string();
        let host = self.host();
        let (authorization, amz_date) = sigv4_authorization(&self.credentials, &host, &payload, Utc::now())?;

        let res = self
            .client
            .post(format!("https://{}/", host))
            .header("Content-Type", TEXTRACT_CONTENT_TYPE)
            .header("X-Amz-Date", amz_date)
            .header("X-Amz-Target", TEXTRACT_TARGET)
            .header("Authorization", authorization)
            .body(payload)
            .send()
            .await
            .map_err(|e| unavailable("aws_textract", e))?;
        let status = res.status();
        if !status.is_success() {
            let detail = res.text().await.unwrap_or_default();
            return Err(unavailable("aws_textract", format!("status {}: {}", status, detail)));
        }
        let response: Value = res.json().await.map_err(|e| unavailable("aws_textract", e))?;
        let (text, confidence) = Self::read_blocks(&response);
        debug!(document_type = document_type_code, chars = text.len(), confidence, "Textract lines received");
        Ok(self.fields.extract(&text, confidence, json!({ "provider": "aws_textract" })))
    }
}
