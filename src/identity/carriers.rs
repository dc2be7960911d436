//! Conversation-id carriers, tried in a fixed order.
//!
//! Each carrier is a pure extraction strategy over the inbound headers and
//! JSON body. Adding a carrier means adding an entry to [`default_carriers`].

use axum::http::HeaderMap;
use serde_json::Value;

/// One place a conversation id may arrive in.
pub trait IdentityCarrier: Send + Sync {
    /// Short label used in logs and on [`super::IdentitySource`].
    fn name(&self) -> &'static str;

    /// The carried value, if present and non-empty.
    fn extract(&self, headers: &HeaderMap, body: &Value) -> Option<String>;
}

/// Reads a request header.
pub struct HeaderCarrier {
    header: &'static str,
}

impl HeaderCarrier {
    pub const fn new(header: &'static str) -> Self {
        Self { header }
    }
}

impl IdentityCarrier for HeaderCarrier {
    fn name(&self) -> &'static str {
        self.header
    }

    fn extract(&self, headers: &HeaderMap, _body: &Value) -> Option<String> {
        headers
            .get(self.header)
            .and_then(|v| v.to_str().ok())
            .and_then(non_empty)
    }
}

/// Reads a string at a fixed path inside the JSON body.
pub struct BodyFieldCarrier {
    label: &'static str,
    path: &'static [&'static str],
}

impl BodyFieldCarrier {
    pub const fn new(label: &'static str, path: &'static [&'static str]) -> Self {
        Self { label, path }
    }
}

impl IdentityCarrier for BodyFieldCarrier {
    fn name(&self) -> &'static str {
        self.label
    }

    fn extract(&self, _headers: &HeaderMap, body: &Value) -> Option<String> {
        let mut cursor = body;
        for key in self.path {
            cursor = cursor.get(key)?;
        }
        cursor.as_str().and_then(non_empty)
    }
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// The carrier chain in priority order. First non-empty value wins.
pub fn default_carriers() -> Vec<Box<dyn IdentityCarrier>> {
    vec![
        Box::new(HeaderCarrier::new("conversation_id")),
        Box::new(HeaderCarrier::new("x-conversation-id")),
        Box::new(HeaderCarrier::new("x-elevenlabs-conversation-id")),
        Box::new(BodyFieldCarrier::new("body.conversation_id", &["conversation_id"])),
        Box::new(BodyFieldCarrier::new(
            "variables.conversation_id",
            &["variables", "conversation_id"],
        )),
        Box::new(BodyFieldCarrier::new(
            "metadata.conversation_id",
            &["metadata", "conversation_id"],
        )),
    ]
}

/// Run the chain, returning the winning value and the carrier that held it.
pub fn first_match(
    carriers: &[Box<dyn IdentityCarrier>],
    headers: &HeaderMap,
    body: &Value,
) -> Option<(String, &'static str)> {
    carriers
        .iter()
        .find_map(|c| c.extract(headers, body).map(|v| (v, c.name())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn header_beats_body() {
        let carriers = default_carriers();
        let h = headers(&[("x-conversation-id", "from-header")]);
        let body = json!({"conversation_id": "from-body"});
        let (value, source) = first_match(&carriers, &h, &body).unwrap();
        assert_eq!(value, "from-header");
        assert_eq!(source, "x-conversation-id");
    }

    #[test]
    fn short_header_beats_vendor_header() {
        let carriers = default_carriers();
        let h = headers(&[
            ("x-elevenlabs-conversation-id", "vendor"),
            ("conversation_id", "short"),
        ]);
        let (value, _) = first_match(&carriers, &h, &json!({})).unwrap();
        assert_eq!(value, "short");
    }

    #[test]
    fn nested_fields_in_order() {
        let carriers = default_carriers();
        let body = json!({
            "variables": {"conversation_id": "from-vars"},
            "metadata": {"conversation_id": "from-meta"}
        });
        let (value, source) = first_match(&carriers, &HeaderMap::new(), &body).unwrap();
        assert_eq!(value, "from-vars");
        assert_eq!(source, "variables.conversation_id");

        let body = json!({"metadata": {"conversation_id": "from-meta"}});
        let (value, _) = first_match(&carriers, &HeaderMap::new(), &body).unwrap();
        assert_eq!(value, "from-meta");
    }

    #[test]
    fn empty_values_are_skipped() {
        let carriers = default_carriers();
        let h = headers(&[("conversation_id", "  ")]);
        let body = json!({"conversation_id": "", "variables": {"conversation_id": "real"}});
        let (value, _) = first_match(&carriers, &h, &body).unwrap();
        assert_eq!(value, "real");
    }

    #[test]
    fn non_string_values_do_not_match() {
        let carriers = default_carriers();
        let body = json!({"conversation_id": 42, "variables": null});
        assert!(first_match(&carriers, &HeaderMap::new(), &body).is_none());
    }
}
