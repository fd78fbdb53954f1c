//! mbox アーカイブのパーサー。
//!
//! `From ` で始まる行をメッセージ区切りとして分割し、RFC 5322 ヘッダー（折り返し行を含む）と
//! 本文を抽出する。スレッド ID は References の先頭、無ければ In-Reply-To、
//! どちらも無ければ自身の Message-ID とする。

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::domain::entity::message::{message_doc_id, short_hash};
use crate::domain::entity::{MessageDocument, Sender};

const SEPARATOR: &str = "From ";
const SIGNATURE_DELIMITER: &str = "--";
const SYNTHETIC_ID_DOMAIN: &str = "copilot.local";

/// RawMessage は区切り済み 1 メッセージのヘッダーと本文。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMessage {
    headers: Vec<(String, String)>,
    pub body: String,
}

impl RawMessage {
    /// ヘッダー値を名前（大文字小文字を区別しない）で取得する。同名が複数あれば先頭。
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.body.trim().is_empty()
    }
}

/// mbox テキストをメッセージ単位に分割する。区切り行が無いテキストは 1 メッセージとして扱う。
pub fn split_mbox(text: &str) -> Vec<String> {
    let text = text.replace("\r\n", "\n");
    let mut messages = Vec::new();
    let mut current = String::new();

    for line in text.split_inclusive('\n') {
        if line.starts_with(SEPARATOR) {
            if !current.trim().is_empty() {
                messages.push(std::mem::take(&mut current));
            }
            current.clear();
            continue;
        }
        current.push_str(line);
    }
    if !current.trim().is_empty() {
        messages.push(current);
    }
    messages
}

/// ヘッダー部と本文を分離する。折り返し行（空白で始まる行）は直前のヘッダー値に連結する。
pub fn parse_raw_message(raw: &str) -> RawMessage {
    let mut headers: Vec<(String, String)> = Vec::new();
    let mut lines = raw.split_inclusive('\n');
    let mut body = String::new();

    for line in lines.by_ref() {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if trimmed.starts_with([' ', '\t']) {
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(trimmed.trim());
                continue;
            }
        }
        match split_header(trimmed) {
            Some((name, value)) => headers.push((name.to_string(), value.to_string())),
            None => {
                // ヘッダー形式でない行から本文が始まる
                body.push_str(line);
                break;
            }
        }
    }
    body.extend(lines);

    RawMessage { headers, body }
}

fn split_header(line: &str) -> Option<(&str, &str)> {
    let (name, value) = line.split_once(':')?;
    if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return None;
    }
    Some((name, value.trim()))
}

/// 本文を正規化する: CRLF を LF に、署名区切り以降を除去し、引用行を取り除いて前後の空白を削る。
pub fn normalize_body(body: &str) -> String {
    let body = body.replace("\r\n", "\n");
    let mut kept = Vec::new();
    for line in body.lines() {
        if line.trim_end() == SIGNATURE_DELIMITER {
            break;
        }
        if line.starts_with('>') {
            continue;
        }
        kept.push(line);
    }
    kept.join("\n").trim().to_string()
}

/// `<id>` 形式の ID をすべて取り出す。山括弧が無い場合は空白区切りで扱う。
pub fn extract_message_ids(value: &str) -> Vec<String> {
    let mut ids = Vec::new();
    let mut rest = value;
    while let Some(start) = rest.find('<') {
        let Some(len) = rest[start + 1..].find('>') else {
            break;
        };
        let id = rest[start + 1..start + 1 + len].trim();
        if !id.is_empty() {
            ids.push(id.to_string());
        }
        rest = &rest[start + 1 + len + 1..];
    }
    if ids.is_empty() {
        ids = value
            .split_whitespace()
            .map(|s| s.trim_matches(['<', '>']).to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    ids
}

/// From ヘッダーを表示名とアドレスに分解する。
///
/// `Name <addr>`、`addr (Name)`、`addr` の各形式に対応する。
pub fn parse_sender(value: &str) -> Sender {
    let value = value.trim();
    if let (Some(start), Some(end)) = (value.find('<'), value.rfind('>')) {
        if start < end {
            let name = value[..start].trim().trim_matches('"').trim();
            return Sender {
                name: name.to_string(),
                email: value[start + 1..end].trim().to_string(),
            };
        }
    }
    if let (Some(start), Some(end)) = (value.find('('), value.rfind(')')) {
        if start < end {
            return Sender {
                name: value[start + 1..end].trim().to_string(),
                email: value[..start].trim().to_string(),
            };
        }
    }
    Sender {
        name: String::new(),
        email: value.to_string(),
    }
}

/// MboxParser は mbox テキストから MessageDocument を生成する。
pub struct MboxParser;

fn synthetic_message_id(raw: &str) -> String {
    format!("generated-{}@{}", short_hash(raw.as_bytes()), SYNTHETIC_ID_DOMAIN)
}

impl MboxParser {
    /// mbox 全体を解析する。ヘッダーも本文も無い区画は無視する。
    ///
    /// 返すメッセージの message_doc_id はアーカイブ内で一意。
    /// 同じ Message-ID で内容も同じものは 1 件にまとめ、内容が異なるものには
    /// 生の内容から合成した ID を振る。
    pub fn parse(text: &str, archive_id: &str, now: DateTime<Utc>) -> Vec<MessageDocument> {
        let mut documents: Vec<MessageDocument> = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();
        for raw in split_mbox(text) {
            let message = parse_raw_message(&raw);
            if message.is_empty() {
                continue;
            }
            let mut document = Self::to_document(&raw, &message, archive_id, now);
            if let Some(&index) = seen.get(&document.message_doc_id) {
                if documents[index].body_normalized == document.body_normalized
                    && documents[index].subject == document.subject
                {
                    tracing::debug!(
                        archive_id,
                        message_id = %document.message_id,
                        "duplicate message in archive skipped"
                    );
                    continue;
                }
                let message_id = synthetic_message_id(&raw);
                tracing::warn!(
                    archive_id,
                    original_message_id = %document.message_id,
                    message_id = %message_id,
                    "Message-ID reused with different content, assigned synthetic id"
                );
                document.message_doc_id = message_doc_id(archive_id, &message_id);
                document.message_id = message_id;
                if seen.contains_key(&document.message_doc_id) {
                    continue;
                }
            }
            seen.insert(document.message_doc_id.clone(), documents.len());
            documents.push(document);
        }
        documents
    }

    fn to_document(
        raw: &str,
        message: &RawMessage,
        archive_id: &str,
        now: DateTime<Utc>,
    ) -> MessageDocument {
        let message_id = message
            .header("Message-ID")
            .and_then(|v| extract_message_ids(v).into_iter().next())
            .unwrap_or_else(|| synthetic_message_id(raw));
        let references = message
            .header("References")
            .map(extract_message_ids)
            .unwrap_or_default();
        let in_reply_to = message
            .header("In-Reply-To")
            .and_then(|v| extract_message_ids(v).into_iter().next());
        let thread_id = references
            .first()
            .or(in_reply_to.as_ref())
            .cloned()
            .unwrap_or_else(|| message_id.clone());

        MessageDocument {
            message_doc_id: message_doc_id(archive_id, &message_id),
            archive_id: archive_id.to_string(),
            message_id,
            thread_id,
            in_reply_to,
            references,
            subject: message.header("Subject").unwrap_or_default().to_string(),
            from: message.header("From").map(parse_sender).unwrap_or_default(),
            date: message.header("Date").map(str::to_string),
            body_normalized: normalize_body(&message.body),
            created_at: now,
        }
    }
}
