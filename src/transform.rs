use serde::Serialize;

use crate::models::Message;

const AVATAR_URL_BASE: &str = "https://cdn.discordapp.com/avatars";

/// Webhook body for one relayed message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryPayload {
    pub content: Option<String>,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub embeds: Vec<serde_json::Value>,
    pub attachments: Vec<PayloadAttachment>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayloadAttachment {
    pub url: String,
}

pub fn avatar_url(user_id: &str, avatar: &str) -> String {
    format!("{}/{}/{}.png", AVATAR_URL_BASE, user_id, avatar)
}

/// Map a source message onto the webhook schema. Empty content becomes
/// `null`, attachments keep only their URL.
pub fn to_payload(msg: &Message) -> DeliveryPayload {
    DeliveryPayload {
        content: msg.content.clone().filter(|c| !c.is_empty()),
        username: msg.author.username.clone(),
        avatar_url: msg
            .author
            .avatar
            .as_deref()
            .filter(|a| !a.is_empty())
            .map(|a| avatar_url(&msg.author.id, a)),
        embeds: msg.embeds.clone(),
        attachments: msg
            .attachments
            .iter()
            .map(|a| PayloadAttachment { url: a.url.clone() })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Attachment, Author, MessageId};
    use serde_json::json;

    fn message(content: Option<&str>, avatar: Option<&str>) -> Message {
        Message {
            id: MessageId::from("100"),
            author: Author {
                id: "42".to_string(),
                username: "alice".to_string(),
                avatar: avatar.map(str::to_string),
            },
            content: content.map(str::to_string),
            embeds: Vec::new(),
            attachments: Vec::new(),
            timestamp: None,
        }
    }

    #[test]
    fn test_empty_content_becomes_null() {
        let payload = to_payload(&message(Some(""), None));
        assert_eq!(payload.content, None);
        let body = serde_json::to_value(&payload).unwrap();
        assert_eq!(body["content"], serde_json::Value::Null);
    }

    #[test]
    fn test_content_kept() {
        let payload = to_payload(&message(Some("hi there"), None));
        assert_eq!(payload.content.as_deref(), Some("hi there"));
        assert_eq!(payload.username, "alice");
    }

    #[test]
    fn test_no_avatar_omits_url() {
        let payload = to_payload(&message(Some("x"), None));
        assert!(payload.avatar_url.is_none());
        let body = serde_json::to_value(&payload).unwrap();
        assert!(body.get("avatar_url").is_none());
    }

    #[test]
    fn test_avatar_url_template() {
        let payload = to_payload(&message(Some("x"), Some("abc123")));
        assert_eq!(
            payload.avatar_url.as_deref(),
            Some("https://cdn.discordapp.com/avatars/42/abc123.png")
        );
    }

    #[test]
    fn test_attachments_keep_only_url_in_order() {
        let mut msg = message(None, None);
        msg.attachments = vec![
            Attachment { url: "a".to_string() },
            Attachment { url: "b".to_string() },
        ];
        let payload = to_payload(&msg);
        let body = serde_json::to_value(&payload).unwrap();
        assert_eq!(body["attachments"], json!([{"url": "a"}, {"url": "b"}]));
    }

    #[test]
    fn test_embeds_pass_through() {
        let mut msg = message(Some("x"), None);
        msg.embeds = vec![json!({"title": "t", "fields": [{"name": "n", "value": "v"}]})];
        let payload = to_payload(&msg);
        assert_eq!(payload.embeds, msg.embeds);
    }

    #[test]
    fn test_missing_collections_are_empty() {
        let body = serde_json::to_value(to_payload(&message(None, None))).unwrap();
        assert_eq!(body["embeds"], json!([]));
        assert_eq!(body["attachments"], json!([]));
    }
}
