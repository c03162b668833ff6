//! PII redaction for execution output.
//!
//! When privacy is on, string values in `result`, captured stdout and the
//! error text are scanned for personal data. Each distinct match is replaced
//! by a stable token; [`PrivacyFilter::detokenize`] maps tokens back for
//! callers allowed to see the originals. Values under sensitive keys
//! (`password`, `api_key`, ...) are replaced outright.

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex, PoisonError};

use regex::{Captures, Regex};
use serde_json::Value as Json;
use uuid::Uuid;

/// Replacement for values stored under a sensitive key.
pub const REDACTED: &str = "[REDACTED]";

/// Key fragments whose values are never returned. Matched case-insensitively
/// as substrings of the key.
const SENSITIVE_KEYS: [&str; 11] = [
    "password",
    "secret",
    "token",
    "key",
    "credential",
    "api_key",
    "access_token",
    "private_key",
    "ssn",
    "credit_card",
    "card_number",
];

/// Kinds of personal data the filter recognises, in match priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PiiKind {
    Email,
    CreditCard,
    Ssn,
    Phone,
    IpAddress,
    ImoNumber,
    Mmsi,
    VesselName,
}

impl PiiKind {
    const ALL: [PiiKind; 8] = [
        PiiKind::Email,
        PiiKind::CreditCard,
        PiiKind::Ssn,
        PiiKind::Phone,
        PiiKind::IpAddress,
        PiiKind::ImoNumber,
        PiiKind::Mmsi,
        PiiKind::VesselName,
    ];

    fn group(self) -> &'static str {
        match self {
            PiiKind::Email => "email",
            PiiKind::CreditCard => "credit_card",
            PiiKind::Ssn => "ssn",
            PiiKind::Phone => "phone",
            PiiKind::IpAddress => "ip_address",
            PiiKind::ImoNumber => "imo_number",
            PiiKind::Mmsi => "mmsi",
            PiiKind::VesselName => "vessel_name",
        }
    }

    fn pattern(self) -> &'static str {
        match self {
            PiiKind::Email => r"(?i:\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b)",
            PiiKind::CreditCard => r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b",
            PiiKind::Ssn => r"\b\d{3}-\d{2}-\d{4}\b",
            PiiKind::Phone => r"(?:\+\d{1,3}[-.\s]?)?\(?\b\d{3}\)?[-.\s]?\d{3}[-.]?\d{4}\b",
            PiiKind::IpAddress => r"\b(?:\d{1,3}\.){3}\d{1,3}\b",
            PiiKind::ImoNumber => r"(?i:\bIMO\s?\d{7}\b)",
            PiiKind::Mmsi => r"\b\d{9}\b",
            PiiKind::VesselName => r"\b(?:M/V|S/Y|M/Y)\s+[A-Z][\w-]*(?:\s+[A-Z][\w-]*)*",
        }
    }

    fn label(self) -> String {
        self.group().to_uppercase()
    }
}

/// One alternation over every kind so a text is scanned once and tokens
/// already written are never rescanned.
static DETECTOR: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    let alternatives: Vec<String> = PiiKind::ALL
        .iter()
        .map(|kind| format!("(?P<{}>{})", kind.group(), kind.pattern()))
        .collect();
    Regex::new(&alternatives.join("|"))
});

fn detector() -> Option<&'static Regex> {
    match &*DETECTOR {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::error!(error = %e, "PII detector failed to compile");
            None
        }
    }
}

/// Whether values under `key` should be withheld.
fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|fragment| key.contains(fragment))
}

fn classify<'t>(caps: &Captures<'t>) -> Option<(PiiKind, &'t str)> {
    PiiKind::ALL
        .iter()
        .find_map(|kind| caps.name(kind.group()).map(|m| (*kind, m.as_str())))
}

#[derive(Debug, Default)]
struct Tokens {
    by_original: HashMap<String, String>,
    by_token: HashMap<String, String>,
}

/// Reversible PII tokenizer shared by every execution of one runtime.
///
/// The same original always maps to the same token for the lifetime of the
/// filter.
#[derive(Debug, Default)]
pub struct PrivacyFilter {
    tokens: Mutex<Tokens>,
}

impl PrivacyFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every match in `text`, with its kind, in order of appearance.
    pub fn detect(text: &str) -> Vec<(PiiKind, String)> {
        let Some(detector) = detector() else {
            return Vec::new();
        };
        detector
            .captures_iter(text)
            .filter_map(|caps| classify(&caps).map(|(kind, found)| (kind, found.to_string())))
            .collect()
    }

    /// Replace every PII match in `text` with its token. Without a working
    /// detector the whole text is withheld.
    pub fn tokenize(&self, text: &str) -> String {
        let Some(detector) = detector() else {
            return REDACTED.to_string();
        };
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        detector
            .replace_all(text, |caps: &Captures<'_>| match classify(caps) {
                Some((kind, found)) => tokens.token_for(kind, found),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    /// Restore the originals of any tokens in `text`.
    pub fn detokenize(&self, text: &str) -> String {
        let tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        tokens
            .by_token
            .iter()
            .fold(text.to_string(), |acc, (token, original)| {
                acc.replace(token.as_str(), original)
            })
    }

    /// Redact a JSON value: sensitive keys are blanked, strings tokenized.
    pub fn redact(&self, value: &Json) -> Json {
        match value {
            Json::String(s) => Json::String(self.tokenize(s)),
            Json::Array(items) => Json::Array(items.iter().map(|v| self.redact(v)).collect()),
            Json::Object(map) => Json::Object(
                map.iter()
                    .map(|(key, v)| {
                        let v = if is_sensitive_key(key) {
                            Json::String(REDACTED.to_string())
                        } else {
                            self.redact(v)
                        };
                        (key.clone(), v)
                    })
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_token
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Tokens {
    fn token_for(&mut self, kind: PiiKind, original: &str) -> String {
        if let Some(token) = self.by_original.get(original) {
            return token.clone();
        }
        let tag: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
        let token = match (kind, original.rsplit_once('@')) {
            (PiiKind::Email, Some((_, domain))) => format!("token_{tag}@{domain}"),
            _ => format!("[{}_{tag}]", kind.label()),
        };
        self.by_original.insert(original.to_string(), token.clone());
        self.by_token.insert(token.clone(), original.to_string());
        token
    }
}
