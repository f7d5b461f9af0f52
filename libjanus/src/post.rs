//! Normalized post model
//!
//! Every backend (live feed, disk cache, tabular store row) converts its
//! native record into a [`Post`] at construction time. Only `id` and the
//! creation time are required; everything else falls back to a default.

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::PathBuf;

use crate::projection::{self, Column};
use crate::{JanusError, Result};

pub const UNKNOWN_AUTHOR: &str = "Unknown";

/// Timestamp format used by the feed backend, e.g. `2016-12-31T21:56:10+0000`
pub const FEED_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// Where a post came from
#[derive(Debug, Clone, PartialEq)]
pub enum PostOrigin {
    /// Live feed; the raw payload is kept for the disk cache
    Feed { raw: Value },
    /// A JSON document in a disk cache directory
    Cache { raw: Value, path: PathBuf },
    /// A tabular store row
    Table {
        table: String,
        row_id: String,
        comments_html: String,
    },
}

/// A comment, with its replies
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comment {
    pub author: String,
    pub like_count: u64,
    pub message: String,
    pub replies: Vec<Comment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: String,
    pub created: DateTime<FixedOffset>,
    pub author: String,
    pub message: String,
    pub like_count: u64,
    pub share_count: u64,
    pub comment_count: u64,
    pub comments: Vec<Comment>,
    pub link: String,
    pub permalink: String,
    pub media: String,
    pub origin: PostOrigin,
}

/// Enough of a post to find it again by hand
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostSummary {
    pub id: String,
    pub created: DateTime<FixedOffset>,
    pub author: String,
    pub message: String,
}

impl Post {
    /// Build a post from a feed payload
    pub fn from_feed(raw: Value) -> Result<Self> {
        let mut post = Self::from_payload(&raw)?;
        post.origin = PostOrigin::Feed { raw };
        Ok(post)
    }

    /// Build a post from a cached JSON document
    pub fn from_cache(raw: Value, path: PathBuf) -> Result<Self> {
        let mut post = Self::from_payload(&raw)?;
        post.origin = PostOrigin::Cache { raw, path };
        Ok(post)
    }

    /// Build a post from a tabular store row and its column headers
    ///
    /// Headers that are not canonical columns are ignored, except `ROWID`,
    /// which becomes the row identity.
    pub fn from_row(table: &str, headers: &[String], row: &[Value]) -> Result<Self> {
        let mut row_id = None;
        let mut cells = std::collections::HashMap::new();
        for (header, value) in headers.iter().zip(row.iter()) {
            if header.eq_ignore_ascii_case("rowid") {
                row_id = Some(cell_text(value));
            } else if let Some(column) = Column::from_name(header) {
                cells.insert(column, value);
            }
        }

        let text = |column: Column| cells.get(&column).map(|v| cell_text(v)).unwrap_or_default();
        let count = |column: Column| cells.get(&column).map(|v| cell_count(v)).unwrap_or(0);

        let id = text(Column::Id);
        if id.is_empty() {
            return Err(JanusError::MalformedPost(format!(
                "row in table {} has no {} column",
                table,
                Column::Id.name()
            )));
        }
        let row_id = row_id.ok_or_else(|| {
            JanusError::MalformedPost(format!("row {} in table {} has no ROWID", id, table))
        })?;
        let created = parse_table_time(&text(Column::Date)).ok_or_else(|| {
            JanusError::MalformedPost(format!("row {} has an unreadable {}", id, Column::Date.name()))
        })?;

        let author = projection::unescape_html(&text(Column::Author));
        Ok(Self {
            id,
            created,
            author: if author.is_empty() {
                UNKNOWN_AUTHOR.to_string()
            } else {
                author
            },
            message: projection::unescape_html(&text(Column::Message)),
            like_count: count(Column::Likes),
            share_count: count(Column::Shares),
            comment_count: count(Column::CommentCount),
            comments: Vec::new(),
            link: text(Column::Link),
            permalink: text(Column::Permalink),
            media: text(Column::Media),
            origin: PostOrigin::Table {
                table: table.to_string(),
                row_id,
                comments_html: text(Column::Comments),
            },
        })
    }

    fn from_payload(raw: &Value) -> Result<Self> {
        let id = raw
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| JanusError::MalformedPost("payload has no id".to_string()))?
            .to_string();

        let created = raw
            .get("created_time")
            .and_then(Value::as_str)
            .and_then(parse_feed_time)
            .ok_or_else(|| {
                JanusError::MalformedPost(format!("post {} has no readable created_time", id))
            })?;

        let comments = raw
            .pointer("/comments/data")
            .map(parse_comments)
            .unwrap_or_default();
        let comment_count = raw
            .pointer("/comments/summary/total_count")
            .and_then(Value::as_u64)
            .unwrap_or(comments.len() as u64);

        let like_count = raw
            .pointer("/likes/summary/total_count")
            .and_then(Value::as_u64)
            .or_else(|| {
                raw.pointer("/likes/data")
                    .and_then(Value::as_array)
                    .map(|likes| likes.len() as u64)
            })
            .unwrap_or(0);

        let media = match raw.get("type").and_then(Value::as_str) {
            Some("video") => string_field(raw, "source"),
            Some("photo") => string_field(raw, "picture"),
            _ => String::new(),
        };

        Ok(Self {
            id,
            created,
            author: payload_author(raw),
            message: string_field(raw, "message"),
            like_count,
            share_count: raw
                .pointer("/shares/count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            comment_count,
            comments,
            link: string_field(raw, "link"),
            permalink: string_field(raw, "permalink_url"),
            media,
            origin: PostOrigin::Feed { raw: Value::Null },
        })
    }

    /// Row identity, for posts read from a tabular store
    pub fn row_id(&self) -> Option<&str> {
        match &self.origin {
            PostOrigin::Table { row_id, .. } => Some(row_id),
            _ => None,
        }
    }

    /// The original backend document, if the post has one
    pub fn raw(&self) -> Option<&Value> {
        match &self.origin {
            PostOrigin::Feed { raw } | PostOrigin::Cache { raw, .. } => Some(raw),
            PostOrigin::Table { .. } => None,
        }
    }

    pub fn summary(&self) -> PostSummary {
        PostSummary {
            id: self.id.clone(),
            created: self.created,
            author: self.author.clone(),
            message: self.message.clone(),
        }
    }

    /// Render a feed-shaped payload that [`Post::from_feed`] reads back
    /// into an equivalent post.
    pub fn to_feed_json(&self) -> Value {
        let mut payload = Map::new();
        payload.insert("id".into(), json!(self.id));
        payload.insert(
            "created_time".into(),
            json!(self.created.format(FEED_TIME_FORMAT).to_string()),
        );
        payload.insert("from".into(), json!({ "name": self.author }));
        payload.insert("message".into(), json!(self.message));
        payload.insert(
            "likes".into(),
            json!({ "data": [], "summary": { "total_count": self.like_count } }),
        );
        payload.insert("shares".into(), json!({ "count": self.share_count }));
        payload.insert(
            "comments".into(),
            json!({
                "data": comments_to_json(&self.comments),
                "summary": { "total_count": self.comment_count },
            }),
        );
        payload.insert("link".into(), json!(self.link));
        payload.insert("permalink_url".into(), json!(self.permalink));
        if !self.media.is_empty() {
            payload.insert("type".into(), json!("photo"));
            payload.insert("picture".into(), json!(self.media));
        }
        Value::Object(payload)
    }
}

impl std::fmt::Display for PostSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let preview: String = self.message.chars().take(60).collect();
        let ellipsis = if self.message.chars().count() > 60 { "..." } else { "" };
        write!(
            f,
            "{} | {} | {} | {}{}",
            self.id,
            self.created.format("%Y-%m-%d %H:%M:%S"),
            self.author,
            preview.replace('\n', " "),
            ellipsis
        )
    }
}

/// Parse a feed timestamp (`+0000` offsets) or an RFC 3339 one
pub fn parse_feed_time(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(s, FEED_TIME_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .ok()
}

fn parse_table_time(s: &str) -> Option<DateTime<FixedOffset>> {
    NaiveDateTime::parse_from_str(s, projection::TABLE_TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc().fixed_offset())
        .or_else(|| parse_feed_time(s))
}

fn payload_author(raw: &Value) -> String {
    raw.pointer("/from/name")
        .or_else(|| raw.pointer("/data/name"))
        .and_then(Value::as_str)
        .unwrap_or(UNKNOWN_AUTHOR)
        .to_string()
}

fn string_field(raw: &Value, key: &str) -> String {
    raw.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn parse_comments(data: &Value) -> Vec<Comment> {
    data.as_array()
        .map(|comments| {
            comments
                .iter()
                .map(|c| Comment {
                    author: payload_author(c),
                    like_count: c.get("like_count").and_then(Value::as_u64).unwrap_or(0),
                    message: string_field(c, "message"),
                    replies: c
                        .pointer("/comments/data")
                        .map(parse_comments)
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn comments_to_json(comments: &[Comment]) -> Value {
    Value::Array(
        comments
            .iter()
            .map(|c| {
                json!({
                    "from": { "name": c.author },
                    "like_count": c.like_count,
                    "message": c.message,
                    "comments": { "data": comments_to_json(&c.replies) },
                })
            })
            .collect(),
    )
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn cell_count(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn full_payload() -> Value {
        json!({
            "id": "123_456",
            "created_time": "2016-12-31T21:56:10+0000",
            "from": { "name": "Kari Nordmann" },
            "message": "Godt nytt år!\nSees.",
            "likes": { "data": [{ "name": "a" }, { "name": "b" }, { "name": "c" }] },
            "shares": { "count": 7 },
            "comments": {
                "data": [
                    {
                        "from": { "name": "Ola" },
                        "like_count": 2,
                        "message": "Takk",
                        "comments": {
                            "data": [
                                { "from": { "name": "Kari Nordmann" }, "like_count": 0, "message": "Bare hyggelig" }
                            ]
                        }
                    }
                ]
            },
            "type": "photo",
            "picture": "https://cdn.example.com/p.jpg",
            "source": "https://cdn.example.com/v.mp4",
            "link": "https://example.com/article",
            "permalink_url": "https://example.com/123_456"
        })
    }

    #[test]
    fn test_from_feed_reads_all_fields() {
        let post = Post::from_feed(full_payload()).unwrap();

        assert_eq!(post.id, "123_456");
        assert_eq!(
            post.created.with_timezone(&Utc),
            Utc.with_ymd_and_hms(2016, 12, 31, 21, 56, 10).unwrap()
        );
        assert_eq!(post.author, "Kari Nordmann");
        assert_eq!(post.like_count, 3);
        assert_eq!(post.share_count, 7);
        assert_eq!(post.comment_count, 1);
        assert_eq!(post.comments[0].replies[0].message, "Bare hyggelig");
        assert_eq!(post.media, "https://cdn.example.com/p.jpg");
        assert_eq!(post.permalink, "https://example.com/123_456");
        assert!(post.raw().is_some());
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let post = Post::from_feed(json!({
            "id": "1",
            "created_time": "2017-01-01T00:00:00+0000"
        }))
        .unwrap();

        assert_eq!(post.author, UNKNOWN_AUTHOR);
        assert_eq!(post.message, "");
        assert_eq!(post.like_count, 0);
        assert_eq!(post.share_count, 0);
        assert_eq!(post.comment_count, 0);
        assert!(post.comments.is_empty());
        assert_eq!(post.link, "");
        assert_eq!(post.permalink, "");
        assert_eq!(post.media, "");
    }

    #[test]
    fn test_author_falls_back_to_data_name() {
        let post = Post::from_feed(json!({
            "id": "1",
            "created_time": "2017-01-01T00:00:00+0000",
            "data": { "name": "Page Admin" }
        }))
        .unwrap();
        assert_eq!(post.author, "Page Admin");
    }

    #[test]
    fn test_video_media_uses_source() {
        let mut payload = full_payload();
        payload["type"] = json!("video");
        let post = Post::from_feed(payload).unwrap();
        assert_eq!(post.media, "https://cdn.example.com/v.mp4");

        let mut payload = full_payload();
        payload["type"] = json!("status");
        let post = Post::from_feed(payload).unwrap();
        assert_eq!(post.media, "");
    }

    #[test]
    fn test_summary_counts_take_precedence() {
        let post = Post::from_feed(json!({
            "id": "1",
            "created_time": "2017-01-01T00:00:00+0000",
            "likes": { "data": [{ "name": "a" }], "summary": { "total_count": 40 } },
            "comments": { "data": [], "summary": { "total_count": 12 } }
        }))
        .unwrap();
        assert_eq!(post.like_count, 40);
        assert_eq!(post.comment_count, 12);
    }

    #[test]
    fn test_id_and_created_time_required() {
        let err = Post::from_feed(json!({ "created_time": "2017-01-01T00:00:00+0000" }))
            .unwrap_err();
        assert!(matches!(err, JanusError::MalformedPost(_)));

        let err = Post::from_feed(json!({ "id": "1", "created_time": "last tuesday" }))
            .unwrap_err();
        assert!(err.to_string().contains("created_time"));
    }

    #[test]
    fn test_rfc3339_created_time_accepted() {
        let post = Post::from_feed(json!({
            "id": "1",
            "created_time": "2017-01-01T10:00:00+02:00"
        }))
        .unwrap();
        assert_eq!(
            post.created.with_timezone(&Utc),
            Utc.with_ymd_and_hms(2017, 1, 1, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_from_row() {
        let headers: Vec<String> = ["ROWID", "ID", "Date", "Author", "Likes", "Message", "Comments", "Shares", "Bogus"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let row = vec![
            json!("17"),
            json!("123_456"),
            json!("2016-12-31 21:56:10"),
            json!("Tom &amp; Jerry"),
            json!("5"),
            json!("a &lt;b&gt; c"),
            json!("<ul></ul>"),
            json!(2),
            json!("ignored"),
        ];

        let post = Post::from_row("posts", &headers, &row).unwrap();
        assert_eq!(post.id, "123_456");
        assert_eq!(post.row_id(), Some("17"));
        assert_eq!(post.author, "Tom & Jerry");
        assert_eq!(post.message, "a <b> c");
        assert_eq!(post.like_count, 5);
        assert_eq!(post.share_count, 2);
        assert_eq!(post.comment_count, 0);
        assert_eq!(
            post.created.with_timezone(&Utc),
            Utc.with_ymd_and_hms(2016, 12, 31, 21, 56, 10).unwrap()
        );
        assert!(post.raw().is_none());
    }

    #[test]
    fn test_from_row_requires_rowid() {
        let headers = vec!["ID".to_string(), "Date".to_string()];
        let row = vec![json!("1"), json!("2017-01-01 00:00:00")];
        let err = Post::from_row("posts", &headers, &row).unwrap_err();
        assert!(err.to_string().contains("ROWID"));
    }

    #[test]
    fn test_feed_json_reads_back() {
        let original = Post::from_feed(full_payload()).unwrap();
        let copy = Post::from_feed(original.to_feed_json()).unwrap();

        assert_eq!(copy.id, original.id);
        assert_eq!(copy.created, original.created);
        assert_eq!(copy.author, original.author);
        assert_eq!(copy.like_count, original.like_count);
        assert_eq!(copy.share_count, original.share_count);
        assert_eq!(copy.comments, original.comments);
        assert_eq!(copy.media, original.media);
    }

    #[test]
    fn test_summary_display_truncates() {
        let mut post = Post::from_feed(full_payload()).unwrap();
        post.message = "x".repeat(80);
        let line = post.summary().to_string();
        assert!(line.starts_with("123_456 | 2016-12-31 21:56:10 | Kari Nordmann | "));
        assert!(line.ends_with("..."));
    }
}
