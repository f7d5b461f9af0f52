//! Canonical column set and post projection
//!
//! This is the one mapping between post fields, tabular store columns and
//! CSV headers. The table sink, the CSV sink, the update sink and the table
//! source all go through it.

use chrono::Utc;
use serde_json::Value;

use crate::post::{Comment, Post, PostOrigin};

/// Timestamp format stored in the `Date` column
pub const TABLE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Id,
    Date,
    Author,
    Likes,
    Message,
    Link,
    Media,
    CommentCount,
    Comments,
    Shares,
    Permalink,
}

/// Column order for inserts, selects and CSV rows
pub const COLUMNS: [Column; 11] = [
    Column::Id,
    Column::Date,
    Column::Author,
    Column::Likes,
    Column::Message,
    Column::Link,
    Column::Media,
    Column::CommentCount,
    Column::Comments,
    Column::Shares,
    Column::Permalink,
];

/// Columns refreshed by the update sink when none are named
pub const DEFAULT_UPDATE_COLUMNS: [Column; 4] = [
    Column::Shares,
    Column::CommentCount,
    Column::Likes,
    Column::Permalink,
];

impl Column {
    /// Column name in the tabular store and the CSV header
    pub fn name(&self) -> &'static str {
        match self {
            Column::Id => "ID",
            Column::Date => "Date",
            Column::Author => "Author",
            Column::Likes => "Likes",
            Column::Message => "Message",
            Column::Link => "Link",
            Column::Media => "Media",
            Column::CommentCount => "CommentCount",
            Column::Comments => "Comments",
            Column::Shares => "Shares",
            Column::Permalink => "Permalink",
        }
    }

    /// Feed field the column is derived from
    pub fn feed_field(&self) -> &'static str {
        match self {
            Column::Id => "id",
            Column::Date => "created_time",
            Column::Author => "from",
            Column::Likes => "likes",
            Column::Message => "message",
            Column::Link => "link",
            Column::Media => "media",
            Column::CommentCount | Column::Comments => "comments",
            Column::Shares => "shares",
            Column::Permalink => "permalink_url",
        }
    }

    /// Whether the column holds a count rather than text
    pub fn is_count(&self) -> bool {
        matches!(self, Column::Likes | Column::CommentCount | Column::Shares)
    }

    /// Look a column up by store name or feed field name, case-insensitively
    pub fn from_name(name: &str) -> Option<Column> {
        let name = name.trim();
        COLUMNS
            .iter()
            .copied()
            .find(|c| c.name().eq_ignore_ascii_case(name))
            .or_else(|| {
                COLUMNS
                    .iter()
                    .copied()
                    .find(|c| c.feed_field().eq_ignore_ascii_case(name))
            })
    }
}

impl std::fmt::Display for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Count(u64),
}

impl Cell {
    pub fn to_json(&self) -> Value {
        match self {
            Cell::Text(s) => Value::String(s.clone()),
            Cell::Count(n) => Value::from(*n),
        }
    }
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cell::Text(s) => f.write_str(s),
            Cell::Count(n) => write!(f, "{}", n),
        }
    }
}

/// A projected post, cells in column order
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Post the row was projected from, for failure reports
    pub post_id: String,
    pub cells: Vec<(Column, Cell)>,
}

impl Row {
    pub fn get(&self, column: Column) -> Option<&Cell> {
        self.cells.iter().find(|(c, _)| *c == column).map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = Column> + '_ {
        self.cells.iter().map(|(c, _)| *c)
    }
}

/// Project a post onto every canonical column
pub fn project(post: &Post) -> Row {
    project_columns(post, &COLUMNS)
}

/// Project a post onto the given columns, in the given order
pub fn project_columns(post: &Post, columns: &[Column]) -> Row {
    Row {
        post_id: post.id.clone(),
        cells: columns.iter().map(|c| (*c, cell_for(post, *c))).collect(),
    }
}

fn cell_for(post: &Post, column: Column) -> Cell {
    match column {
        Column::Id => Cell::Text(post.id.clone()),
        Column::Date => Cell::Text(
            post.created
                .with_timezone(&Utc)
                .format(TABLE_TIME_FORMAT)
                .to_string(),
        ),
        Column::Author => Cell::Text(escape_html(&post.author)),
        Column::Likes => Cell::Count(post.like_count),
        Column::Message => Cell::Text(escape_html(&flatten_lines(&post.message))),
        Column::Link => Cell::Text(post.link.clone()),
        Column::Media => Cell::Text(post.media.clone()),
        Column::CommentCount => Cell::Count(post.comment_count),
        Column::Comments => Cell::Text(match &post.origin {
            PostOrigin::Table { comments_html, .. } if post.comments.is_empty() => {
                comments_html.clone()
            }
            _ => comments_html(&post.comments),
        }),
        Column::Shares => Cell::Count(post.share_count),
        Column::Permalink => Cell::Text(post.permalink.clone()),
    }
}

fn flatten_lines(s: &str) -> String {
    s.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

/// Render a comment tree as nested HTML lists
///
/// `<ul><li><b>author</b> (+likes): message<ul>…replies…</ul></li></ul>`
pub fn comments_html(comments: &[Comment]) -> String {
    let mut out = String::from("<ul>");
    for comment in comments {
        out.push_str(&format!(
            "<li><b>{}</b> (+{}): {}",
            escape_html(&comment.author),
            comment.like_count,
            escape_html(&comment.message)
        ));
        if !comment.replies.is_empty() {
            out.push_str(&comments_html(&comment.replies));
        }
        out.push_str("</li>");
    }
    out.push_str("</ul>");
    out
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn unescape_html(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
