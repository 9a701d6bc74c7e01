use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_rs::parser;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::config::BoostyConfig;
use crate::error::{AppError, Result};
use crate::models::LatestItem;

const USER_AGENT: &str = "postwatch/1.0";
const DEFAULT_TITLE: &str = "New post";

/// Looks up the most recent item of a channel.
#[async_trait]
pub trait ItemFetcher: Send + Sync {
    /// `Ok(None)` means the channel exists but has nothing to report (or
    /// does not exist at all); `Err` is a transient failure.
    async fn fetch_latest(&self, channel_id: &str) -> Result<Option<LatestItem>>;

    /// Validates user input and returns the id subscriptions are stored under.
    fn canonical_channel(&self, raw: &str) -> Result<String> {
        canonical_channel(raw, None)
    }
}

#[derive(Debug, Deserialize)]
struct PostsResponse {
    #[serde(default)]
    data: Vec<Post>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Post {
    id: String,
    #[serde(default)]
    title: String,
    publish_time: i64,
}

/// Fetches Boosty blogs through their JSON API, and anything given as an
/// absolute URL as an RSS/Atom feed.
pub struct ChannelFetcher {
    client: Client,
    api_base: String,
    site_base: String,
}

impl ChannelFetcher {
    pub fn new(boosty: &BoostyConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            api_base: boosty.api_base.trim_end_matches('/').to_string(),
            site_base: boosty.site_base.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_boosty(&self, blog: &str) -> Result<Option<LatestItem>> {
        let url = format!(
            "{}/v1/blog/{}/post/",
            self.api_base,
            urlencoding::encode(blog)
        );
        let response = self
            .client
            .get(&url)
            .query(&[("limit", "1")])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AppError::Fetch(format!(
                "{} returned HTTP {}",
                blog,
                response.status()
            )));
        }

        let posts: PostsResponse = response.json().await?;
        let Some(post) = posts.data.into_iter().next() else {
            return Ok(None);
        };

        let published_at = DateTime::<Utc>::from_timestamp(post.publish_time, 0).ok_or_else(
            || AppError::Fetch(format!("invalid publish time {}", post.publish_time)),
        )?;
        let title = if post.title.trim().is_empty() {
            DEFAULT_TITLE.to_string()
        } else {
            post.title.trim().to_string()
        };

        Ok(Some(LatestItem {
            title,
            link: format!("{}/{}/posts/{}", self.site_base, blog, post.id),
            published_at,
        }))
    }

    async fn fetch_feed(&self, url: &str) -> Result<Option<LatestItem>> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch feed: HTTP {}", response.status()).into());
        }

        let bytes = response.bytes().await?;
        let feed = parser::parse(&bytes[..])?;

        // Feeds are not always sorted, so pick the newest dated entry.
        let latest = feed
            .entries
            .into_iter()
            .filter_map(|entry| {
                let published_at = entry.published.or(entry.updated)?;
                Some((published_at, entry))
            })
            .max_by_key(|(published_at, _)| *published_at);

        Ok(latest.map(|(published_at, entry)| LatestItem {
            title: entry
                .title
                .map(|t| t.content.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            link: entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_else(|| url.to_string()),
            published_at,
        }))
    }
}

#[async_trait]
impl ItemFetcher for ChannelFetcher {
    async fn fetch_latest(&self, channel_id: &str) -> Result<Option<LatestItem>> {
        if is_feed_url(channel_id) {
            self.fetch_feed(channel_id).await
        } else {
            self.fetch_boosty(channel_id).await
        }
    }

    fn canonical_channel(&self, raw: &str) -> Result<String> {
        canonical_channel(raw, Some(self.site_base.as_str()))
    }
}

fn is_feed_url(channel_id: &str) -> bool {
    channel_id.starts_with("http://") || channel_id.starts_with("https://")
}

fn slug_pattern() -> &'static Regex {
    static SLUG: OnceLock<Regex> = OnceLock::new();
    SLUG.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.\-]{1,64}$").expect("valid slug pattern"))
}

/// Accepts a bare blog slug, a link to the blog on the site itself (reduced
/// to its slug), or any other absolute http(s) URL, taken as a feed.
pub fn canonical_channel(raw: &str, site_base: Option<&str>) -> Result<String> {
    let raw = raw.trim();

    if is_feed_url(raw) {
        let url = Url::parse(raw)
            .map_err(|e| AppError::InvalidArgument(format!("bad URL {}: {}", raw, e)))?;

        let site_host = site_base
            .and_then(|base| Url::parse(base).ok())
            .and_then(|base| base.host_str().map(str::to_string));
        if site_host.is_some() && url.host_str().map(str::to_string) == site_host {
            let slug = url
                .path_segments()
                .and_then(|mut segments| segments.next())
                .unwrap_or_default();
            return canonical_channel(slug, None);
        }

        return Ok(url.to_string());
    }

    // "." and ".." would resolve as path segments
    if slug_pattern().is_match(raw) && !raw.chars().all(|c| c == '.') {
        Ok(raw.to_string())
    } else {
        Err(AppError::InvalidArgument(format!(
            "{:?} is not a channel name or feed URL",
            raw
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(server: &MockServer) -> ChannelFetcher {
        let config = BoostyConfig {
            api_base: server.uri(),
            site_base: "https://boosty.to".to_string(),
        };
        ChannelFetcher::new(&config, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_canonical_channel_accepts_slugs() {
        assert_eq!(canonical_channel(" historipi ", None).unwrap(), "historipi");
        assert!(canonical_channel("two words", None).is_err());
        assert!(canonical_channel("", None).is_err());
        assert!(canonical_channel("<b>", None).is_err());
        assert!(canonical_channel(".", None).is_err());
        assert!(canonical_channel("..", None).is_err());
        assert_eq!(canonical_channel("a.b", None).unwrap(), "a.b");
    }

    #[test]
    fn test_canonical_channel_reduces_site_links() {
        let site = Some("https://boosty.to");
        assert_eq!(
            canonical_channel("https://boosty.to/historipi/posts/abc", site).unwrap(),
            "historipi"
        );
        assert_eq!(
            canonical_channel("https://blog.example.com/rss.xml", site).unwrap(),
            "https://blog.example.com/rss.xml"
        );
        assert!(canonical_channel("https://boosty.to/", site).is_err());
    }

    #[tokio::test]
    async fn test_fetch_boosty_latest_post() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/blog/alpha/post/"))
            .and(query_param("limit", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"id": "p-1", "title": " Hello ", "publishTime": 1000, "hasAccess": true}],
                "extra": {"isLast": false}
            })))
            .mount(&server)
            .await;

        let item = fetcher(&server).fetch_latest("alpha").await.unwrap().unwrap();
        assert_eq!(item.title, "Hello");
        assert_eq!(item.link, "https://boosty.to/alpha/posts/p-1");
        assert_eq!(item.published_at.timestamp(), 1000);
    }

    #[tokio::test]
    async fn test_fetch_boosty_empty_blog() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/blog/quiet/post/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .mount(&server)
            .await;

        assert_eq!(fetcher(&server).fetch_latest("quiet").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fetch_boosty_untitled_post() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/blog/alpha/post/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"id": "p-2", "title": "", "publishTime": 5}]
            })))
            .mount(&server)
            .await;

        let item = fetcher(&server).fetch_latest("alpha").await.unwrap().unwrap();
        assert_eq!(item.title, DEFAULT_TITLE);
    }

    #[tokio::test]
    async fn test_fetch_boosty_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = fetcher(&server).fetch_latest("alpha").await.unwrap_err();
        assert!(matches!(err, AppError::Fetch(_)));
    }

    #[tokio::test]
    async fn test_fetch_feed_picks_newest_entry() {
        let server = MockServer::start().await;
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Blog</title><link>https://example.com</link>
<item><title>Older</title><link>https://example.com/1</link><pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate></item>
<item><title>Newer</title><link>https://example.com/2</link><pubDate>Tue, 02 Jan 2024 10:00:00 GMT</pubDate></item>
<item><title>Undated</title><link>https://example.com/3</link></item>
</channel></rss>"#;
        Mock::given(method("GET"))
            .and(path("/rss.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss))
            .mount(&server)
            .await;

        let url = format!("{}/rss.xml", server.uri());
        let item = fetcher(&server).fetch_latest(&url).await.unwrap().unwrap();
        assert_eq!(item.title, "Newer");
        assert_eq!(item.link, "https://example.com/2");
    }

    #[tokio::test]
    async fn test_fetch_feed_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let url = format!("{}/rss.xml", server.uri());
        assert!(fetcher(&server).fetch_latest(&url).await.is_err());
    }
}
