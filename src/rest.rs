//! Representative endpoint bindings.
//!
//! Bindings are pure construction: method, path, routing triple, result
//! type. No logic belongs here; everything else rides on the uniform
//! [`RequestBuilder`] contract. The full binding surface of the API is huge
//! and lives with consumers of this crate; the handful below covers the
//! shapes that exist: sequence results, payload-less results, query
//! parameters, typed setters and body sentinels.

use http::Method;
use serde_json::Value;

use crate::builder::RequestBuilder;
use crate::client::Client;
use crate::ratelimit::ResourceClass;
use crate::request::Route;
use crate::types::{Result, Snowflake};

impl Client {
    /// Messages of a channel. `around`, `before`, `after` and `limit` go
    /// through [`RequestBuilder::url_param`].
    pub fn get_channel_messages(&self, channel_id: Snowflake) -> RequestBuilder<'_, Vec<Value>> {
        RequestBuilder::new(
            self,
            Method::GET,
            format!("/channels/{channel_id}/messages"),
            Route::new(ResourceClass::Channels, channel_id, "messages"),
        )
        .precondition(channel_id.is_unset(), "channel id must be set")
    }

    /// Post a message to a channel.
    pub fn create_message(&self, channel_id: Snowflake, content: &str) -> RequestBuilder<'_, Value> {
        RequestBuilder::new(
            self,
            Method::POST,
            format!("/channels/{channel_id}/messages"),
            Route::new(ResourceClass::Channels, channel_id, "messages"),
        )
        .precondition(channel_id.is_unset(), "channel id must be set")
        .precondition(content.is_empty(), "message content must not be empty")
        .set("content", content)
    }

    /// Delete a message. Deletions are limited separately from the other
    /// message endpoints, hence the distinct endpoint-family label.
    pub fn delete_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
    ) -> RequestBuilder<'_, ()> {
        RequestBuilder::new(
            self,
            Method::DELETE,
            format!("/channels/{channel_id}/messages/{message_id}"),
            Route::new(ResourceClass::Channels, channel_id, "messages-del"),
        )
        .precondition(channel_id.is_unset(), "channel id must be set")
        .precondition(message_id.is_unset(), "message id must be set")
    }

    /// Show the typing indicator in a channel for a few seconds.
    pub fn trigger_typing(&self, channel_id: Snowflake) -> RequestBuilder<'_, ()> {
        RequestBuilder::new(
            self,
            Method::POST,
            format!("/channels/{channel_id}/typing"),
            Route::new(ResourceClass::Channels, channel_id, "typing"),
        )
        .precondition(channel_id.is_unset(), "channel id must be set")
    }

    /// Modify attributes of a guild member.
    pub fn update_guild_member(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
    ) -> UpdateGuildMemberBuilder<'_> {
        UpdateGuildMemberBuilder {
            inner: RequestBuilder::new(
                self,
                Method::PATCH,
                format!("/guilds/{guild_id}/members/{user_id}"),
                Route::new(ResourceClass::Guilds, guild_id, "members"),
            )
            .precondition(guild_id.is_unset(), "guild id must be set")
            .precondition(user_id.is_unset(), "user id must be set"),
        }
    }
}

/// Typed extension of the uniform builder contract for the member-update
/// endpoint, including its body sentinels.
#[must_use = "a request builder does nothing until execute is called"]
#[derive(Debug)]
pub struct UpdateGuildMemberBuilder<'a> {
    inner: RequestBuilder<'a, ()>,
}

impl UpdateGuildMemberBuilder<'_> {
    /// Set the member's nickname. Use [`Self::delete_nick`] to clear it.
    pub fn set_nick(self, nick: &str) -> Self {
        Self {
            inner: self
                .inner
                .precondition(nick.is_empty(), "nick must not be empty, use delete_nick")
                .set("nick", nick),
        }
    }

    /// Clear the member's nickname by sending the null sentinel.
    pub fn delete_nick(self) -> Self {
        Self {
            inner: self.inner.set("nick", Value::Null),
        }
    }

    /// Server-mute or unmute the member.
    pub fn set_mute(self, mute: bool) -> Self {
        Self {
            inner: self.inner.set("mute", mute),
        }
    }

    /// Server-deafen or undeafen the member.
    pub fn set_deaf(self, deaf: bool) -> Self {
        Self {
            inner: self.inner.set("deaf", deaf),
        }
    }

    /// Move the member to another voice channel.
    pub fn move_to_voice_channel(self, channel_id: Snowflake) -> Self {
        Self {
            inner: self
                .inner
                .precondition(channel_id.is_unset(), "voice channel id must be set")
                .set("channel_id", channel_id),
        }
    }

    /// Disconnect the member from voice by sending the null sentinel.
    pub fn kick_from_voice(self) -> Self {
        Self {
            inner: self.inner.set("channel_id", Value::Null),
        }
    }

    /// Bypass the external response cache for this request.
    pub fn ignore_cache(self) -> Self {
        Self {
            inner: self.inner.ignore_cache(),
        }
    }

    /// Fail fast instead of sleeping out a long rate-limit window.
    pub fn cancel_on_rate_limit(self) -> Self {
        Self {
            inner: self.inner.cancel_on_rate_limit(),
        }
    }

    /// Run the request. The endpoint has no response payload.
    ///
    /// # Errors
    ///
    /// See [`RequestBuilder::execute`].
    pub async fn execute(self) -> Result<()> {
        self.inner.execute().await
    }
}
