//! HTTP scraper for LinkedIn posts and Pulse articles.
//!
//! Pages are fetched with `reqwest` and parsed with `scraper` CSS selectors.

use std::path::Path;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use lkm_core::config::ScrapingSettings;
use lkm_core::url_parser::{self, PostType};
use lkm_core::{EngagementData, ImageData, PostContent};
use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_LENGTH, HeaderMap, HeaderValue};
use scraper::{ElementRef, Html, Selector};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::{KnowledgeError, KnowledgeResult};

const DEFAULT_AUTHOR: &str = "Unknown Author";
const DEFAULT_ARTICLE_TITLE: &str = "LinkedIn Article";
const DEFAULT_POST_TITLE: &str = "LinkedIn Post";
const BODY_FALLBACK_CHARS: usize = 1000;

struct PostSelectors {
    text: Vec<Selector>,
    author: Vec<Selector>,
    date: Selector,
    images: Selector,
    likes: Selector,
    comments: Selector,
    shares: Selector,
    body: Selector,
}

struct ArticleSelectors {
    title: Selector,
    content: Selector,
    author: Selector,
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

static POST: LazyLock<PostSelectors> = LazyLock::new(|| PostSelectors {
    text: [
        ".feed-shared-text__text-view",
        r#"[data-id*="urn:li:activity"] .feed-shared-update-v2__description"#,
        ".feed-shared-update-v2__description-wrapper",
        r#"[data-test-id="main-feed-activity-card"] .break-words"#,
    ]
    .into_iter()
    .map(selector)
    .collect(),
    author: [
        ".feed-shared-actor__name",
        ".feed-shared-actor__name a",
        r#"[data-test-id="actor-name"]"#,
        ".article-author-name",
    ]
    .into_iter()
    .map(selector)
    .collect(),
    date: selector(".feed-shared-actor__sub-description time[datetime]"),
    images: selector(".feed-shared-image img, .feed-shared-carousel img"),
    likes: selector(r#"[data-test-id="social-counts-likes"]"#),
    comments: selector(r#"[data-test-id="social-counts-comments"]"#),
    shares: selector(r#"[data-test-id="social-counts-shares"]"#),
    body: selector("body"),
});

static ARTICLE: LazyLock<ArticleSelectors> = LazyLock::new(|| ArticleSelectors {
    title: selector(r#"h1.article-title, h1[data-test-id="article-title"]"#),
    content: selector(r#".article-content, [data-test-id="article-content"]"#),
    author: selector(r#".article-author, [data-test-id="article-author"]"#),
});

static IMAGE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.jpg|\.jpeg|\.png|\.gif|\.webp|media\.licdn\.com|cdn\.lynda\.com")
        .expect("image url regex")
});
static ENGAGEMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*([KMB])?").expect("engagement regex"));
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Fetches LinkedIn pages politely: one request at a time, spaced by the
/// configured delay, retried with exponential backoff.
#[derive(Debug)]
pub struct LinkedInScraper {
    client: reqwest::Client,
    delay: Duration,
    max_retries: u32,
    enable_image_download: bool,
    max_image_size_mb: u64,
    last_request: Mutex<Option<Instant>>,
}

impl LinkedInScraper {
    pub fn new(settings: &ScrapingSettings) -> KnowledgeResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );

        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .default_headers(headers)
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            delay: Duration::from_secs_f64(settings.delay_seconds.max(0.0)),
            max_retries: settings.max_retries,
            enable_image_download: settings.enable_image_download,
            max_image_size_mb: settings.max_image_size_mb,
            last_request: Mutex::new(None),
        })
    }

    /// Fetch and parse one post or article.
    pub async fn scrape_post(&self, url: &str) -> KnowledgeResult<PostContent> {
        let info = url_parser::parse_url(url)
            .map_err(|e| KnowledgeError::scraping(url, None, format!("Invalid LinkedIn URL: {e}")))?;

        info!(url = %info.normalized_url, post_type = %info.post_type, "Scraping LinkedIn post");
        let html = self.fetch_with_retry(&info.normalized_url).await?;

        let post = match info.post_type {
            PostType::Pulse => parse_article_html(&html, url),
            _ => parse_post_html(&html, url),
        };
        post.validate().map_err(|e| {
            KnowledgeError::scraping(url, None, format!("No usable post content: {e}"))
        })?;
        debug!(
            url,
            images = post.images.len(),
            chars = post.body_text.len(),
            "Scraped post"
        );
        Ok(post)
    }

    async fn fetch_with_retry(&self, url: &str) -> KnowledgeResult<String> {
        let mut attempt = 0;
        loop {
            self.throttle().await;
            match self.fetch_once(url).await {
                Ok(body) => return Ok(body),
                Err(FetchFailure { retryable, error }) => {
                    if !retryable || attempt >= self.max_retries {
                        return Err(error);
                    }
                    let backoff = Duration::from_secs(1 << attempt.min(6));
                    warn!(url, attempt = attempt + 1, ?backoff, error = %error, "Fetch failed, retrying");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<String, FetchFailure> {
        let response = self.client.get(url).send().await.map_err(|e| FetchFailure {
            retryable: e.is_timeout() || e.is_connect() || e.is_request(),
            error: KnowledgeError::scraping(
                url,
                e.is_timeout().then_some(408),
                format!("Request failed: {e}"),
            ),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure {
                retryable: status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
                error: KnowledgeError::scraping(
                    url,
                    Some(status.as_u16()),
                    format!("HTTP {status}"),
                ),
            });
        }

        response.text().await.map_err(|e| FetchFailure {
            retryable: true,
            error: KnowledgeError::scraping(url, None, format!("Failed to read body: {e}")),
        })
    }

    /// Wait until the configured delay has passed since the previous request.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.delay {
                tokio::time::sleep(self.delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Download an image to `save_path`. Returns `Ok(false)` when downloads
    /// are disabled; oversized images are an error and nothing is written.
    pub async fn download_image(
        &self,
        image: &mut ImageData,
        save_path: &Path,
    ) -> KnowledgeResult<bool> {
        if !self.enable_image_download {
            info!("Image download is disabled in configuration");
            return Ok(false);
        }
        let limit_bytes = self.max_image_size_mb * 1024 * 1024;

        let response = self.client.get(&image.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(KnowledgeError::scraping(
                &image.url,
                Some(status.as_u16()),
                "Image download failed",
            ));
        }

        let declared = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if let Some(length) = declared
            && length > limit_bytes
        {
            return Err(self.too_large(&image.url, length));
        }

        let bytes = response.bytes().await?;
        if bytes.len() as u64 > limit_bytes {
            return Err(self.too_large(&image.url, bytes.len() as u64));
        }

        if let Some(parent) = save_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| KnowledgeError::storage(parent, "create_dir", e))?;
        }
        tokio::fs::write(save_path, &bytes)
            .await
            .map_err(|e| KnowledgeError::storage(save_path, "write_image", e))?;

        image.local_path = Some(save_path.display().to_string());
        info!(path = %save_path.display(), bytes = bytes.len(), "Downloaded image");
        Ok(true)
    }

    fn too_large(&self, url: &str, bytes: u64) -> KnowledgeError {
        KnowledgeError::ImageTooLarge {
            url: url.to_string(),
            size_mb: bytes as f64 / (1024.0 * 1024.0),
            limit_mb: self.max_image_size_mb,
        }
    }
}

struct FetchFailure {
    retryable: bool,
    error: KnowledgeError,
}

fn element_text(element: ElementRef<'_>) -> String {
    WHITESPACE_RE
        .replace_all(&element.text().collect::<String>(), " ")
        .trim()
        .to_string()
}

fn first_text(document: &Html, selectors: &[&Selector]) -> Option<String> {
    selectors.iter().find_map(|selector| {
        document
            .select(selector)
            .map(element_text)
            .find(|text| !text.is_empty())
    })
}

/// Parse a feed post page.
pub fn parse_post_html(html: &str, url: &str) -> PostContent {
    let document = Html::parse_document(html);

    let body_text = POST
        .text
        .iter()
        .find_map(|selector| {
            let texts: Vec<String> = document
                .select(selector)
                .map(element_text)
                .filter(|t| !t.is_empty())
                .collect();
            (!texts.is_empty()).then(|| texts.join("\n\n"))
        })
        .unwrap_or_else(|| {
            warn!(url, "Could not find post content with standard selectors, using fallback");
            document
                .select(&POST.body)
                .next()
                .map(element_text)
                .map(|text| text.chars().take(BODY_FALLBACK_CHARS).collect())
                .unwrap_or_default()
        });

    let author_selectors: Vec<&Selector> = POST.author.iter().collect();
    let author = first_text(&document, &author_selectors).unwrap_or_else(|| DEFAULT_AUTHOR.into());

    let post_date = document
        .select(&POST.date)
        .next()
        .and_then(|time| time.value().attr("datetime"))
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|date| date.with_timezone(&Utc));

    let engagement_metrics = EngagementData {
        likes: count(&document, &POST.likes),
        comments: count(&document, &POST.comments),
        shares: count(&document, &POST.shares),
        reactions: 0,
    };

    PostContent {
        url: url.to_string(),
        title: generate_title(&body_text),
        body_text,
        author,
        post_date,
        images: extract_images(&document),
        engagement_metrics,
    }
}

/// Parse a Pulse article page. Articles carry no engagement counts.
pub fn parse_article_html(html: &str, url: &str) -> PostContent {
    let document = Html::parse_document(html);
    let title = first_text(&document, &[&ARTICLE.title])
        .unwrap_or_else(|| DEFAULT_ARTICLE_TITLE.into());
    let body_text = first_text(&document, &[&ARTICLE.content]).unwrap_or_default();
    let author =
        first_text(&document, &[&ARTICLE.author]).unwrap_or_else(|| DEFAULT_AUTHOR.into());

    PostContent {
        url: url.to_string(),
        title,
        body_text,
        author,
        post_date: None,
        images: extract_images(&document),
        engagement_metrics: EngagementData::default(),
    }
}

fn count(document: &Html, selector: &Selector) -> u64 {
    document
        .select(selector)
        .next()
        .map(|element| parse_engagement_number(&element_text(element)))
        .unwrap_or(0)
}

fn extract_images(document: &Html) -> Vec<ImageData> {
    let images: Vec<ImageData> = document
        .select(&POST.images)
        .enumerate()
        .filter_map(|(index, img)| {
            let src = img.value().attr("src")?;
            if !is_valid_image_url(src) {
                return None;
            }
            let alt = img.value().attr("alt").unwrap_or_default();
            let mut image = ImageData::new(src, format!("linkedin_image_{}.jpg", index + 1)).ok()?;
            image.alt_text = Some(alt.to_string());
            image.description = Some(format!("Image {} from LinkedIn post", index + 1));
            Some(image)
        })
        .collect();
    debug!(count = images.len(), "Extracted images from post");
    images
}

/// `"1.2K"` is 1200. The suffix must follow the number, so the M in
/// "87 comments" is not a multiplier. Unparseable text is 0.
pub fn parse_engagement_number(text: &str) -> u64 {
    let upper = text.to_uppercase().replace(',', "");
    let Some(captures) = ENGAGEMENT_RE.captures(&upper) else {
        return 0;
    };
    let multiplier = match captures.get(2).map(|m| m.as_str()) {
        Some("K") => 1e3,
        Some("M") => 1e6,
        Some("B") => 1e9,
        _ => 1.0,
    };
    captures[1]
        .parse::<f64>()
        .map(|value| (value * multiplier).round() as u64)
        .unwrap_or(0)
}

pub fn is_valid_image_url(url: &str) -> bool {
    if url.is_empty() || url.starts_with("data:") || url.to_lowercase().contains("svg") {
        return false;
    }
    IMAGE_URL_RE.is_match(url)
}

/// First sentence when it is long enough, else the first 100 chars.
pub fn generate_title(content: &str) -> String {
    if content.is_empty() {
        return DEFAULT_POST_TITLE.to_string();
    }
    let first = content.split('.').next().unwrap_or_default();
    if first.chars().count() > 10 {
        return shorten(first.trim(), 100);
    }
    shorten(content.trim(), 100)
}

fn shorten(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let kept: String = text.chars().take(max - 3).collect();
        format!("{kept}...")
    } else {
        text.to_string()
    }
}
