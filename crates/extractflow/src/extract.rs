//! Expense extraction from free text.
//!
//! [`ReceiptExtractor`] is a deterministic parser for pasted receipts and
//! expense notes. Anything smarter (an OCR service, a model endpoint) plugs
//! in behind the same [`Extractor`] trait.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

use crate::jobs::error_codes::ErrorCode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractError {
    pub code: &'static str,
    pub message: String,
}

impl ExtractError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ExtractError {}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<Value, ExtractError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Amount {
    /// Decimal rendering, always two fraction digits.
    pub value: String,
    /// Amount in minor units (cents).
    pub minor: i64,
    pub currency: Option<&'static str>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extraction {
    pub merchant: Option<String>,
    pub total: Option<Amount>,
    pub currency: Option<&'static str>,
    pub amounts: Vec<Amount>,
    pub dates: Vec<NaiveDate>,
    pub line_count: usize,
    pub word_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ReceiptExtractor;

impl ReceiptExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, text: &str) -> Result<Extraction, ExtractError> {
        if text.trim().is_empty() {
            return Err(ExtractError::new(
                ErrorCode::BadPayload.as_str(),
                "text has no content",
            ));
        }

        let mut amounts = Vec::new();
        let mut dates = Vec::new();
        let mut merchant = None;
        let mut total_line = None;
        let mut line_count = 0;
        let mut word_count = 0;

        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            line_count += 1;

            let words: Vec<&str> = trimmed.split_whitespace().collect();
            word_count += words.len();

            let found = amounts_in_line(&words, line_no);
            for w in &words {
                if let Some(d) = parse_date(strip_punct(w)) {
                    dates.push(d);
                }
            }

            if found.is_empty() {
                if merchant.is_none() && dates_in(&words).is_empty() {
                    merchant = Some(trimmed.chars().take(80).collect());
                }
            } else if trimmed.to_lowercase().contains("total") {
                total_line = Some(line_no);
            }
            amounts.extend(found);
        }

        let total = match total_line {
            Some(line) => amounts.iter().rev().find(|a| a.line == line).cloned(),
            None => amounts.iter().max_by_key(|a| a.minor).cloned(),
        };

        let currency = total
            .as_ref()
            .and_then(|t| t.currency)
            .or_else(|| amounts.iter().find_map(|a| a.currency));

        Ok(Extraction {
            merchant,
            total,
            currency,
            amounts,
            dates,
            line_count,
            word_count,
        })
    }
}

#[async_trait]
impl Extractor for ReceiptExtractor {
    async fn extract(&self, text: &str) -> Result<Value, ExtractError> {
        let extraction = self.parse(text)?;
        serde_json::to_value(extraction)
            .map_err(|e| ExtractError::new(ErrorCode::Unknown.as_str(), e.to_string()))
    }
}

const CODES: &[&str] = &["USD", "EUR", "GBP", "JPY", "CAD", "AUD", "CHF", "INR"];

fn symbol_currency(c: char) -> Option<&'static str> {
    match c {
        '$' => Some("USD"),
        '€' => Some("EUR"),
        '£' => Some("GBP"),
        '¥' => Some("JPY"),
        '₹' => Some("INR"),
        _ => None,
    }
}

fn iso_code(word: &str) -> Option<&'static str> {
    let w = strip_punct(word).to_uppercase();
    CODES.iter().copied().find(|c| *c == w)
}

fn strip_punct(word: &str) -> &str {
    word.trim_matches(|c: char| matches!(c, ',' | ';' | ':' | '(' | ')' | '"' | '\''))
}

/// `1,234.5` -> 123450. At most two fraction digits.
fn parse_minor(s: &str) -> Option<i64> {
    let s: String = s.chars().filter(|c| *c != ',').collect();
    let (int, frac) = match s.split_once('.') {
        Some((i, f)) => (i, f),
        None => (s.as_str(), ""),
    };
    if int.is_empty() || !int.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if frac.len() > 2 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let whole: i64 = int.parse().ok()?;
    let cents: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        _ => frac.parse().ok()?,
    };
    whole.checked_mul(100)?.checked_add(cents)
}

fn amount(minor: i64, currency: Option<&'static str>, line: usize) -> Amount {
    Amount {
        value: format!("{}.{:02}", minor / 100, minor % 100),
        minor,
        currency,
        line,
    }
}

fn amounts_in_line(words: &[&str], line: usize) -> Vec<Amount> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < words.len() {
        let w = strip_punct(words[i]);

        // $12.50
        let mut chars = w.chars();
        if let Some(cur) = chars.next().and_then(symbol_currency) {
            if let Some(m) = parse_minor(chars.as_str()) {
                out.push(amount(m, Some(cur), line));
                i += 1;
                continue;
            }
        }

        // USD 12.50
        if let Some(cur) = iso_code(w) {
            if let Some(m) = words.get(i + 1).and_then(|n| parse_minor(strip_punct(n))) {
                out.push(amount(m, Some(cur), line));
                i += 2;
                continue;
            }
        }

        // 12.50 USD, or a bare 12.50
        if let Some(m) = parse_minor(w) {
            if let Some(cur) = words.get(i + 1).and_then(|n| iso_code(n)) {
                out.push(amount(m, Some(cur), line));
                i += 2;
                continue;
            }
            if w.contains('.') {
                out.push(amount(m, None, line));
            }
        }
        i += 1;
    }
    out
}

fn parse_date(word: &str) -> Option<NaiveDate> {
    if word.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(word, "%Y-%m-%d").ok()
}

fn dates_in(words: &[&str]) -> Vec<NaiveDate> {
    words.iter().filter_map(|w| parse_date(strip_punct(w))).collect()
}
