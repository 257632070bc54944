// 📥 OFX statement parser
//
// Handles both OFX 1.x (SGML, leaf tags left unclosed) and OFX 2.x (XML).
// The file is tokenized into tags and text, folded into an element tree,
// and the statement fields are read out of the first STMTRS / CCSTMTRS
// aggregate.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::error::{BudgetError, Result};

// ============================================================================
// OUTPUT TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedTransaction {
    pub fitid: String,
    pub trans_type: Option<String>,
    pub date_posted: DateTime<Utc>,
    pub amount: Decimal,
    pub name: Option<String>,
    pub memo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedStatement {
    pub currency: Option<String>,
    pub acctid: Option<String>,
    pub ledger_bal: Option<Decimal>,
    pub ledger_bal_as_of: Option<DateTime<Utc>>,
    pub avail_bal: Option<Decimal>,
    pub avail_bal_as_of: Option<DateTime<Utc>>,
    pub transactions: Vec<ParsedTransaction>,
}

// ============================================================================
// ENTRY POINTS
// ============================================================================

pub fn parse_file(path: &Path) -> Result<ParsedStatement> {
    let bytes = std::fs::read(path)?;
    parse_str(&String::from_utf8_lossy(&bytes))
}

pub fn parse_str(input: &str) -> Result<ParsedStatement> {
    let body = ofx_body(input)?;
    let root = build_tree(tokenize(body));

    let stmt = root
        .find("STMTRS")
        .or_else(|| root.find("CCSTMTRS"))
        .ok_or_else(|| BudgetError::Ofx("no STMTRS or CCSTMTRS aggregate".to_string()))?;

    let acctid = stmt
        .child("BANKACCTFROM")
        .or_else(|| stmt.child("CCACCTFROM"))
        .and_then(|a| a.value_of("ACCTID"))
        .map(str::to_string);

    let (ledger_bal, ledger_bal_as_of) = balance(stmt.child("LEDGERBAL"))?;
    let (avail_bal, avail_bal_as_of) = balance(stmt.child("AVAILBAL"))?;

    let transactions = match stmt.child("BANKTRANLIST") {
        Some(list) => list
            .children
            .iter()
            .filter(|e| e.name == "STMTTRN")
            .map(transaction)
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };

    Ok(ParsedStatement {
        currency: stmt.value_of("CURDEF").map(str::to_string),
        acctid,
        ledger_bal,
        ledger_bal_as_of,
        avail_bal,
        avail_bal_as_of,
        transactions,
    })
}

fn balance(agg: Option<&Element>) -> Result<(Option<Decimal>, Option<DateTime<Utc>>)> {
    let Some(agg) = agg else {
        return Ok((None, None));
    };
    let amount = agg.value_of("BALAMT").map(parse_amount).transpose()?;
    let as_of = agg.value_of("DTASOF").map(parse_datetime).transpose()?;
    Ok((amount, as_of))
}

fn transaction(trn: &Element) -> Result<ParsedTransaction> {
    let fitid = trn
        .value_of("FITID")
        .ok_or_else(|| BudgetError::Ofx("STMTTRN without FITID".to_string()))?;
    let amount = trn
        .value_of("TRNAMT")
        .ok_or_else(|| BudgetError::Ofx(format!("transaction {} has no TRNAMT", fitid)))?;
    let posted = trn
        .value_of("DTPOSTED")
        .ok_or_else(|| BudgetError::Ofx(format!("transaction {} has no DTPOSTED", fitid)))?;

    Ok(ParsedTransaction {
        fitid: fitid.to_string(),
        trans_type: trn.value_of("TRNTYPE").map(str::to_string),
        date_posted: parse_datetime(posted)?,
        amount: parse_amount(amount)?,
        name: trn.value_of("NAME").map(str::to_string),
        memo: trn.value_of("MEMO").map(str::to_string),
    })
}

// ============================================================================
// VALUE PARSING
// ============================================================================

pub fn parse_amount(raw: &str) -> Result<Decimal> {
    let cleaned = raw.trim().trim_start_matches('+');
    // some banks send a decimal comma
    let normalized = if cleaned.contains(',') && !cleaned.contains('.') {
        cleaned.replace(',', ".")
    } else {
        cleaned.replace(',', "")
    };
    Decimal::from_str(&normalized).map_err(|_| BudgetError::Ofx(format!("invalid amount: {}", raw)))
}

/// Parse `YYYYMMDD[HHMMSS[.XXX]][[offset[:TZ]]]` into UTC.
///
/// Without an offset the value is taken as UTC.
pub fn parse_datetime(raw: &str) -> Result<DateTime<Utc>> {
    let invalid = || BudgetError::Ofx(format!("invalid OFX datetime: {}", raw));
    let raw = raw.trim();

    let (stamp, offset) = match raw.find('[') {
        Some(i) => (&raw[..i], Some(raw[i + 1..].trim_end_matches(']'))),
        None => (raw, None),
    };
    // fractional seconds are dropped
    let stamp = stamp.split('.').next().unwrap_or(stamp);

    if stamp.len() < 8 || !stamp.is_ascii() {
        return Err(invalid());
    }
    let date = NaiveDate::parse_from_str(&stamp[..8], "%Y%m%d").map_err(|_| invalid())?;
    let time = match stamp.len() {
        8 => NaiveTime::MIN,
        12 => NaiveTime::parse_from_str(&stamp[8..], "%H%M").map_err(|_| invalid())?,
        14 => NaiveTime::parse_from_str(&stamp[8..], "%H%M%S").map_err(|_| invalid())?,
        _ => return Err(invalid()),
    };
    let local = NaiveDateTime::new(date, time);

    let offset_seconds = match offset {
        Some(spec) => {
            let hours = spec.split(':').next().unwrap_or_default().trim();
            let hours = Decimal::from_str(hours.trim_start_matches('+')).map_err(|_| invalid())?;
            if hours.abs() > Decimal::from(24) {
                return Err(invalid());
            }
            (hours * Decimal::from(3600)).trunc().to_i64().ok_or_else(invalid)?
        }
        None => 0,
    };

    let utc = chrono::Duration::try_seconds(offset_seconds)
        .and_then(|shift| local.checked_sub_signed(shift))
        .ok_or_else(invalid)?;
    Ok(utc.and_utc())
}

// ============================================================================
// TOKENIZER / TREE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open(String),
    Close(String),
    Text(String),
}

#[derive(Debug, Default)]
struct Element {
    name: String,
    value: Option<String>,
    children: Vec<Element>,
}

impl Element {
    fn named(name: &str) -> Self {
        Element {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn value_of(&self, name: &str) -> Option<&str> {
        self.child(name).and_then(|c| c.value.as_deref())
    }

    /// Depth-first search for the first element called `name`
    fn find(&self, name: &str) -> Option<&Element> {
        for child in &self.children {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.find(name) {
                return Some(found);
            }
        }
        None
    }
}

/// Everything from the `<OFX>` tag on; SGML headers and the XML prolog are dropped
fn ofx_body(input: &str) -> Result<&str> {
    let upper = input.to_ascii_uppercase();
    upper
        .find("<OFX>")
        .map(|i| &input[i..])
        .ok_or_else(|| BudgetError::Ofx("no <OFX> element found".to_string()))
}

fn tokenize(body: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut rest = body;

    while let Some(start) = rest.find('<') {
        push_text(&mut tokens, &rest[..start]);
        rest = &rest[start..];

        if rest.starts_with("<?") || rest.starts_with("<!") {
            let end = if rest.starts_with("<!--") {
                rest.find("-->").map(|i| i + 3)
            } else {
                rest.find('>').map(|i| i + 1)
            };
            rest = end.map(|i| &rest[i..]).unwrap_or("");
            continue;
        }

        let Some(end) = rest.find('>') else {
            break;
        };
        let tag = rest[1..end].trim();
        rest = &rest[end + 1..];

        if let Some(name) = tag.strip_prefix('/') {
            tokens.push(Token::Close(name.trim().to_ascii_uppercase()));
        } else if !tag.ends_with('/') && !tag.is_empty() {
            let name = tag.split_whitespace().next().unwrap_or(tag);
            tokens.push(Token::Open(name.to_ascii_uppercase()));
        }
    }
    push_text(&mut tokens, rest);
    tokens
}

fn push_text(tokens: &mut Vec<Token>, text: &str) {
    let text = text.trim();
    if !text.is_empty() {
        tokens.push(Token::Text(decode_entities(text)));
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Fold tokens into a tree. A tag directly followed by text is a leaf
/// (closed or not); any other open tag starts an aggregate.
fn build_tree(tokens: Vec<Token>) -> Element {
    let mut stack = vec![Element::named("")];
    let mut iter = tokens.into_iter().peekable();

    while let Some(token) = iter.next() {
        match token {
            Token::Open(name) => {
                if let Some(Token::Text(_)) = iter.peek() {
                    let value = match iter.next() {
                        Some(Token::Text(v)) => Some(v),
                        _ => None,
                    };
                    if let Some(top) = stack.last_mut() {
                        top.children.push(Element {
                            name,
                            value,
                            children: Vec::new(),
                        });
                    }
                } else {
                    stack.push(Element::named(&name));
                }
            }
            Token::Close(name) => {
                // a close tag for a leaf has nothing open to match and is ignored
                if stack.iter().skip(1).any(|e| e.name == name) {
                    while stack.len() > 1 {
                        let Some(done) = stack.pop() else { break };
                        let matched = done.name == name;
                        if let Some(parent) = stack.last_mut() {
                            parent.children.push(done);
                        }
                        if matched {
                            break;
                        }
                    }
                }
            }
            Token::Text(_) => {}
        }
    }

    while stack.len() > 1 {
        if let Some(done) = stack.pop() {
            if let Some(parent) = stack.last_mut() {
                parent.children.push(done);
            }
        }
    }
    stack.pop().unwrap_or_default()
}

// ============================================================================
// TESTS
// ============================================================================
