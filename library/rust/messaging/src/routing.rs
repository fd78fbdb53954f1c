//! トピックエクスチェンジのルーティング規則。
//!
//! ルーティングキーは `.` 区切りの単語列。バインディングパターンでは
//! `*` がちょうど1単語、`#` が0個以上の単語に一致する。

use crate::error::MessagingError;

/// ルーティングキーを検証する（空単語・ワイルドカードは不可）。
pub fn validate_routing_key(routing_key: &str) -> Result<(), MessagingError> {
    if routing_key.is_empty()
        || routing_key
            .split('.')
            .any(|w| w.is_empty() || w.contains('*') || w.contains('#'))
    {
        return Err(MessagingError::PublishError(format!(
            "invalid routing key: {routing_key:?}"
        )));
    }
    Ok(())
}

/// バインディングパターンを検証する。
pub fn validate_binding(pattern: &str) -> Result<(), MessagingError> {
    let valid = !pattern.is_empty()
        && pattern.split('.').all(|w| {
            !w.is_empty() && (w == "*" || w == "#" || !(w.contains('*') || w.contains('#')))
        });
    if valid {
        Ok(())
    } else {
        Err(MessagingError::InvalidBinding(pattern.to_string()))
    }
}

/// ルーティングキーがバインディングパターンに一致するかを判定する。
pub fn binding_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && match_words(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && match_words(rest, &key[1..]),
    }
}

/// エクスチェンジ配下のバインディングを Kafka の正規表現トピック購読文字列に変換する。
///
/// トピック名は `{exchange}.{routing_key}` とし、`#` は「`.単語` の0回以上の繰り返し」
/// として表現する（librdkafka の POSIX 正規表現で解釈できる構文に限る）。
pub fn binding_to_topic_regex(exchange: &str, pattern: &str) -> Result<String, MessagingError> {
    validate_binding(pattern)?;
    let mut regex = String::from("^");
    regex.push_str(&escape_regex(exchange));
    for word in pattern.split('.') {
        match word {
            "#" => regex.push_str(r"(\.[^.]+)*"),
            "*" => regex.push_str(r"\.[^.]+"),
            literal => {
                regex.push_str(r"\.");
                regex.push_str(&escape_regex(literal));
            }
        }
    }
    regex.push('$');
    Ok(regex)
}

/// Kafka トピック名を組み立てる。
pub fn topic_name(exchange: &str, routing_key: &str) -> String {
    format!("{exchange}.{routing_key}")
}

/// Kafka トピック名からルーティングキーを取り出す。
pub fn routing_key_from_topic<'a>(exchange: &str, topic: &'a str) -> Option<&'a str> {
    topic
        .strip_prefix(exchange)
        .and_then(|rest| rest.strip_prefix('.'))
        .filter(|key| !key.is_empty())
}

fn escape_regex(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(
            c,
            '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
