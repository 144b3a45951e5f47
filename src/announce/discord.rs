//! Discord REST implementation of [`AnnouncementSink`].

use std::time::Duration;

use serde_json::{Value, json};
use tracing::debug;

use crate::announce::{Announcement, AnnouncementSink, INSTRUCTIONS, LATE_EMOJI, OUT_EMOJI};
use crate::error::{Result, RollcallError};

const API_BASE: &str = "https://discord.com/api/v10";
const USER_AGENT: &str = concat!("rollcall/", env!("CARGO_PKG_VERSION"));

/// Posts announcements as embeds through the Discord HTTP API.
pub struct DiscordSink {
    bot_token: String,
    api_base: String,
    thumbnail_url: Option<String>,
    agent: ureq::Agent,
}

fn http_agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(10))
        .timeout_read(Duration::from_secs(20))
        .timeout_write(Duration::from_secs(20))
        .build()
}

/// Embed payload for `announcement`.
pub fn embed_json(announcement: &Announcement, thumbnail_url: Option<&str>) -> Value {
    let mut embed = json!({
        "author": { "name": announcement.event_name },
        "title": announcement.title,
        "description": announcement.date_line,
        "fields": [
            { "name": format!("{OUT_EMOJI} Out"), "value": announcement.out_field(), "inline": true },
            { "name": format!("{LATE_EMOJI} Late"), "value": announcement.late_field(), "inline": true },
            { "name": "Instructions", "value": INSTRUCTIONS },
        ],
        "footer": { "text": announcement.footer() },
    });
    if let Some(url) = thumbnail_url {
        embed["thumbnail"] = json!({ "url": url });
    }
    embed
}

fn http_error(action: &str, err: ureq::Error) -> RollcallError {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            RollcallError::Announce(format!("discord {action} failed ({code}): {body}"))
        }
        other => RollcallError::Announce(format!("discord {action} failed: {other}")),
    }
}

impl DiscordSink {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            api_base: API_BASE.to_owned(),
            thumbnail_url: None,
            agent: http_agent(),
        }
    }

    /// Point at a different API root, e.g. a local mock.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_owned();
        self
    }

    pub fn with_thumbnail(mut self, url: impl Into<String>) -> Self {
        self.thumbnail_url = Some(url.into()).filter(|u: &String| !u.is_empty());
        self
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        self.agent
            .request(method, &format!("{}{path}", self.api_base))
            .set("Authorization", &format!("Bot {}", self.bot_token))
            .set("User-Agent", USER_AGENT)
    }

    fn send_json(&self, method: &str, path: &str, action: &str, body: &Value) -> Result<String> {
        let response = self
            .request(method, path)
            .set("Content-Type", "application/json")
            .send_string(&body.to_string())
            .map_err(|e| http_error(action, e))?;
        response
            .into_string()
            .map_err(|e| RollcallError::Announce(format!("discord {action} response: {e}")))
    }

    fn message_body(&self, announcement: &Announcement) -> Value {
        json!({ "embeds": [embed_json(announcement, self.thumbnail_url.as_deref())] })
    }
}

impl AnnouncementSink for DiscordSink {
    fn send(&self, channel_id: &str, announcement: &Announcement) -> Result<String> {
        let raw = self.send_json(
            "POST",
            &format!("/channels/{channel_id}/messages"),
            "send message",
            &self.message_body(announcement),
        )?;
        let payload: Value = serde_json::from_str(&raw)
            .map_err(|e| RollcallError::Announce(format!("discord send message response: {e}")))?;
        let id = payload
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| RollcallError::Announce("discord message has no id".to_owned()))?;
        debug!(channel_id, message_id = id, "posted announcement");
        Ok(id.to_owned())
    }

    fn edit(&self, channel_id: &str, message_id: &str, announcement: &Announcement) -> Result<()> {
        self.send_json(
            "PATCH",
            &format!("/channels/{channel_id}/messages/{message_id}"),
            "edit message",
            &self.message_body(announcement),
        )?;
        Ok(())
    }

    fn ensure_reaction(&self, channel_id: &str, message_id: &str, emoji: &str) -> Result<()> {
        let path = format!(
            "/channels/{channel_id}/messages/{message_id}/reactions/{}/@me",
            urlencoding::encode(emoji)
        );
        self.request("PUT", &path)
            .send_string("")
            .map_err(|e| http_error("add reaction", e))?;
        Ok(())
    }

    fn display_name(&self, user_id: &str) -> Result<Option<String>> {
        let response = match self.request("GET", &format!("/users/{user_id}")).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(404, _)) => return Ok(None),
            Err(e) => return Err(http_error("get user", e)),
        };
        let raw = response
            .into_string()
            .map_err(|e| RollcallError::Announce(format!("discord get user response: {e}")))?;
        let payload: Value = serde_json::from_str(&raw)
            .map_err(|e| RollcallError::Announce(format!("discord get user response: {e}")))?;
        Ok(payload
            .get("username")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(str::to_owned))
    }
}
