use anyhow::Result;
use feed_rs::parser;
use sha2::{Digest, Sha256};

use crate::storage::Entry;
use crate::util::validate_url;

/// A parsed feed, ready to merge into a document.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub link: Option<String>,
    pub entries: Vec<Entry>,
    /// Entry links dropped for not being http(s).
    pub skipped_links: usize,
}

pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed> {
    let feed = parser::parse(bytes)?;

    let title = feed
        .title
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty());
    let link = feed
        .links
        .first()
        .map(|l| l.href.clone())
        .filter(|href| validate_url(href).is_ok());

    let mut skipped_links = 0;
    let entries: Vec<Entry> = feed
        .entries
        .into_iter()
        .map(|entry| {
            let raw_link = entry.links.first().map(|l| l.href.clone());
            let link = match raw_link {
                Some(href) if validate_url(&href).is_ok() => Some(href),
                Some(_) => {
                    skipped_links += 1;
                    None
                }
                None => None,
            };
            let published = entry.published.or(entry.updated).map(|dt| dt.timestamp());
            let summary = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body));
            let title = entry
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Untitled".to_string());

            let existing_id = if entry.id.is_empty() {
                None
            } else {
                Some(entry.id.as_str())
            };
            let id = generate_guid(existing_id, link.as_deref(), &title, published);

            Entry {
                id,
                title,
                link,
                summary,
                published,
                state: Vec::new(),
            }
        })
        .collect();

    Ok(ParsedFeed {
        title,
        link,
        entries,
        skipped_links,
    })
}

fn generate_guid(
    existing: Option<&str>,
    url: Option<&str>,
    title: &str,
    published: Option<i64>,
) -> String {
    if let Some(guid) = existing {
        let trimmed = guid.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let input = format!(
        "{}|{}|{}",
        url.unwrap_or(""),
        title,
        published.map(|p| p.to_string()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}
