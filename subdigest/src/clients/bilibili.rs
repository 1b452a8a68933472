//! Bilibili video source: metadata, part list and subtitle download.

use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use reqwest::header::{COOKIE, ORIGIN, REFERER, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{ResourceMetadata, SourceClient, SourceUnit};
use crate::config::SourceCredentials;
use crate::errors::{DigestError, Result};
use crate::subtitle::{SubtitleLine, Transcript};

const DEFAULT_API_BASE: &str = "https://api.bilibili.com";
const BROWSER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                             (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const SITE: &str = "https://www.bilibili.com";
const AI_LANGUAGE: &str = "ai-zh";

#[allow(clippy::expect_used)]
static BVID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"BV[a-zA-Z0-9]+").expect("valid regex"));

#[allow(clippy::expect_used)]
static PART: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[?&]p=(\d+)").expect("valid regex"));

/// Extracts the BV id and the optional `p=` part number from a video URL.
pub fn parse_resource_url(url: &str) -> Result<(String, Option<u32>)> {
    let bvid = BVID
        .find(url)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| DigestError::NotFound(format!("no BV id in '{url}'")))?;
    let part = PART
        .captures(url)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok());
    Ok((bvid, part))
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self, what: &str) -> Result<T> {
        match (self.code, self.data) {
            (0, Some(data)) => Ok(data),
            (0, None) => Err(DigestError::Remote {
                status: 0,
                message: format!("{what}: empty response"),
            }),
            (-404 | 62002 | 62004, _) => {
                Err(DigestError::NotFound(format!("{what}: {}", self.message)))
            }
            (-412, _) => Err(DigestError::Transient(format!(
                "{what}: request throttled ({})",
                self.message
            ))),
            (code, _) => Err(DigestError::Remote {
                status: code,
                message: format!("{what}: {}", self.message),
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ViewData {
    bvid: String,
    title: String,
    #[serde(default)]
    pic: Option<String>,
    #[serde(default)]
    pages: Vec<PageData>,
}

#[derive(Debug, Clone, Deserialize)]
struct PageData {
    cid: u64,
    page: u32,
    #[serde(default)]
    part: String,
}

#[derive(Debug, Deserialize)]
struct PlayerData {
    #[serde(default)]
    subtitle: SubtitleData,
}

#[derive(Debug, Default, Deserialize)]
struct SubtitleData {
    #[serde(default)]
    subtitles: Vec<SubtitleTrack>,
    #[serde(default)]
    ai_subtitle: Option<AiSubtitle>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct SubtitleTrack {
    #[serde(default)]
    lan: String,
    #[serde(default)]
    subtitle_url: String,
}

#[derive(Debug, Deserialize)]
struct AiSubtitle {
    #[serde(default)]
    subtitle_url: String,
}

#[derive(Debug, Deserialize)]
struct SubtitleBody {
    #[serde(default)]
    body: Vec<SubtitleLine>,
}

/// How long a part list fetched with the metadata waits for `fetch_units`.
const PAGES_TTL: Duration = Duration::from_secs(600);

#[derive(Debug)]
struct CachedPages {
    pages: Vec<PageData>,
    stored: Instant,
}

/// Source client for bilibili.com.
#[derive(Debug)]
pub struct BilibiliSourceClient {
    http: reqwest::Client,
    credentials: SourceCredentials,
    api_base: String,
    pages: DashMap<String, CachedPages>,
    pages_ttl: Duration,
}

impl BilibiliSourceClient {
    /// Creates a client sending the given login cookies.
    #[must_use]
    pub fn new(credentials: SourceCredentials) -> Self {
        if !credentials.is_configured() {
            warn!("No login cookies configured; AI subtitles will be unavailable");
        }
        Self {
            http: reqwest::Client::new(),
            credentials,
            api_base: DEFAULT_API_BASE.to_string(),
            pages: DashMap::new(),
            pages_ttl: PAGES_TTL,
        }
    }

    /// Sets how long cached part lists stay valid.
    #[must_use]
    pub fn with_pages_ttl(mut self, ttl: Duration) -> Self {
        self.pages_ttl = ttl;
        self
    }

    /// Caches a part list, dropping entries no task came back for.
    fn cache_pages(&self, bvid: &str, pages: Vec<PageData>) {
        let ttl = self.pages_ttl;
        self.pages.retain(|_, cached| cached.stored.elapsed() < ttl);
        self.pages.insert(
            bvid.to_string(),
            CachedPages {
                pages,
                stored: Instant::now(),
            },
        );
    }

    fn take_pages(&self, bvid: &str) -> Option<Vec<PageData>> {
        self.pages
            .remove(bvid)
            .filter(|(_, cached)| cached.stored.elapsed() < self.pages_ttl)
            .map(|(_, cached)| cached.pages)
    }

    /// Points the client at another API host.
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut request = self
            .http
            .get(url)
            .header(USER_AGENT, BROWSER_AGENT)
            .header(REFERER, SITE)
            .header(ORIGIN, SITE);
        if let Some(cookie) = self.credentials.cookie_header() {
            request = request.header(COOKIE, cookie);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DigestError::from_status(status.as_u16(), body));
        }
        Ok(response.json().await?)
    }

    async fn view(&self, bvid: &str) -> Result<ViewData> {
        let url = format!("{}/x/web-interface/view?bvid={bvid}", self.api_base);
        self.get_json::<Envelope<ViewData>>(&url)
            .await?
            .into_data("video info")
    }

    async fn subtitle_tracks(&self, bvid: &str, cid: &str) -> Result<SubtitleData> {
        let signed = format!("{}/x/player/wbi/v2?bvid={bvid}&cid={cid}", self.api_base);
        match self
            .get_json::<Envelope<PlayerData>>(&signed)
            .await
            .and_then(|e| e.into_data("subtitle info"))
        {
            Ok(data) => Ok(data.subtitle),
            Err(err) if err.is_transient() => Err(err),
            Err(err) => {
                debug!(%bvid, %cid, error = %err, "Signed player API refused, trying legacy endpoint");
                let legacy = format!("{}/x/player/v2?bvid={bvid}&cid={cid}", self.api_base);
                self.get_json::<Envelope<PlayerData>>(&legacy)
                    .await?
                    .into_data("subtitle info")
                    .map(|data| data.subtitle)
            }
        }
    }
}

/// Chooses a track: Chinese first, then any uploaded track, then the
/// machine-generated one.
fn pick_track(data: SubtitleData) -> Option<SubtitleTrack> {
    let mut uploaded: Vec<SubtitleTrack> = data
        .subtitles
        .into_iter()
        .filter(|t| !t.subtitle_url.is_empty())
        .collect();

    if let Some(pos) = uploaded.iter().position(|t| t.lan.starts_with("zh")) {
        return Some(uploaded.swap_remove(pos));
    }
    if !uploaded.is_empty() {
        return Some(uploaded.swap_remove(0));
    }
    data.ai_subtitle
        .filter(|ai| !ai.subtitle_url.is_empty())
        .map(|ai| SubtitleTrack {
            lan: AI_LANGUAGE.to_string(),
            subtitle_url: ai.subtitle_url,
        })
}

fn absolute_url(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{url}")
    } else {
        url.to_string()
    }
}

fn units_of(view: &ViewData, pages: &[PageData]) -> Vec<SourceUnit> {
    pages
        .iter()
        .map(|page| SourceUnit {
            resource_id: view.bvid.clone(),
            key: page.cid.to_string(),
            index: page.page,
            title: if page.part.is_empty() {
                format!("P{}", page.page)
            } else {
                page.part.clone()
            },
        })
        .collect()
}

#[async_trait]
impl SourceClient for BilibiliSourceClient {
    async fn fetch_metadata(&self, resource: &str) -> Result<ResourceMetadata> {
        let (bvid, requested_part) = parse_resource_url(resource)?;
        let view = self.view(&bvid).await?;
        debug!(%bvid, title = %view.title, parts = view.pages.len(), "Fetched video info");

        self.cache_pages(&view.bvid, view.pages.clone());
        Ok(ResourceMetadata {
            id: view.bvid,
            title: view.title,
            requested_part,
            cover_url: view.pic,
        })
    }

    async fn fetch_units(&self, metadata: &ResourceMetadata) -> Result<Vec<SourceUnit>> {
        let view = match self.take_pages(&metadata.id) {
            Some(pages) => ViewData {
                bvid: metadata.id.clone(),
                title: metadata.title.clone(),
                pic: None,
                pages,
            },
            None => self.view(&metadata.id).await?,
        };
        Ok(units_of(&view, &view.pages))
    }

    async fn fetch_asset(&self, unit: &SourceUnit) -> Result<Transcript> {
        let tracks = self.subtitle_tracks(&unit.resource_id, &unit.key).await?;
        let track = pick_track(tracks).ok_or_else(|| {
            DigestError::NotFound(format!("no subtitles for part {} ({})", unit.index, unit.title))
        })?;

        let url = absolute_url(&track.subtitle_url);
        debug!(part = unit.index, language = %track.lan, "Downloading subtitle track");
        let body: SubtitleBody = self.get_json(&url).await?;
        Ok(Transcript::new(track.lan, body.body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn track(lan: &str, url: &str) -> SubtitleTrack {
        SubtitleTrack {
            lan: lan.into(),
            subtitle_url: url.into(),
        }
    }

    #[test]
    fn test_parse_resource_url() {
        let (bvid, part) =
            parse_resource_url("https://www.bilibili.com/video/BV1xK4y1a7Zz/?p=3&t=10").unwrap();
        assert_eq!(bvid, "BV1xK4y1a7Zz");
        assert_eq!(part, Some(3));

        let (_, part) = parse_resource_url("https://b23.tv/BV1xx").unwrap();
        assert_eq!(part, None);

        assert!(matches!(
            parse_resource_url("https://example.com/video"),
            Err(DigestError::NotFound(_))
        ));
    }

    #[test]
    fn test_envelope_codes() {
        let ok: Envelope<u32> = serde_json::from_str(r#"{"code":0,"data":7}"#).unwrap();
        assert_eq!(ok.into_data("x").unwrap(), 7);

        let missing: Envelope<u32> =
            serde_json::from_str(r#"{"code":-404,"message":"啥都木有"}"#).unwrap();
        assert!(matches!(missing.into_data("x"), Err(DigestError::NotFound(_))));

        let throttled: Envelope<u32> =
            serde_json::from_str(r#"{"code":-412,"message":"请求被拦截"}"#).unwrap();
        assert!(throttled.into_data("x").unwrap_err().is_transient());

        let denied: Envelope<u32> =
            serde_json::from_str(r#"{"code":-101,"message":"账号未登录"}"#).unwrap();
        assert!(matches!(
            denied.into_data("x"),
            Err(DigestError::Remote { status: -101, .. })
        ));
    }

    #[test]
    fn test_pick_track_prefers_chinese() {
        let data = SubtitleData {
            subtitles: vec![track("en-US", "//en"), track("zh-CN", "//zh")],
            ai_subtitle: Some(AiSubtitle {
                subtitle_url: "//ai".into(),
            }),
        };
        assert_eq!(pick_track(data), Some(track("zh-CN", "//zh")));
    }

    #[test]
    fn test_pick_track_falls_back_to_ai() {
        let data = SubtitleData {
            subtitles: vec![track("zh-CN", "")],
            ai_subtitle: Some(AiSubtitle {
                subtitle_url: "//ai".into(),
            }),
        };
        assert_eq!(pick_track(data), Some(track(AI_LANGUAGE, "//ai")));
        assert_eq!(pick_track(SubtitleData::default()), None);
    }

    #[test]
    fn test_absolute_url() {
        assert_eq!(absolute_url("//i0.hdslb.com/x.json"), "https://i0.hdslb.com/x.json");
        assert_eq!(absolute_url("https://a/b"), "https://a/b");
    }

    #[test]
    fn test_view_payload_to_units() {
        let payload = r#"{"code":0,"message":"0","data":{"bvid":"BV1","title":"课程","pic":"http://p",
            "pages":[{"cid":11,"page":1,"part":"导论"},{"cid":12,"page":2,"part":""}]}}"#;
        let envelope: Envelope<ViewData> = serde_json::from_str(payload).unwrap();
        let view = envelope.into_data("video info").unwrap();
        let units = units_of(&view, &view.pages);

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].key, "11");
        assert_eq!(units[0].title, "导论");
        assert_eq!(units[1].title, "P2");
        assert_eq!(units[1].index, 2);
    }

    #[test]
    fn test_subtitle_body_parses_lines() {
        let body: SubtitleBody = serde_json::from_str(
            r#"{"type":"AIsubtitle","body":[{"from":0.5,"to":2.0,"content":"大家好","sid":1}]}"#,
        )
        .unwrap();
        assert_eq!(body.body.len(), 1);
        assert_eq!(body.body[0].content, "大家好");
    }

    fn page(cid: u64, n: u32) -> PageData {
        PageData {
            cid,
            page: n,
            part: format!("part {n}"),
        }
    }

    #[test]
    fn test_cached_pages_are_taken_once() {
        let client = BilibiliSourceClient::new(SourceCredentials::default());
        client.cache_pages("BV1", vec![page(11, 1)]);

        assert_eq!(client.take_pages("BV1").map(|p| p.len()), Some(1));
        assert!(client.take_pages("BV1").is_none());
    }

    #[test]
    fn test_expired_pages_are_dropped() {
        let client = BilibiliSourceClient::new(SourceCredentials::default())
            .with_pages_ttl(Duration::ZERO);
        client.cache_pages("BV1", vec![page(11, 1)]);
        client.cache_pages("BV2", vec![page(21, 1)]);

        assert_eq!(client.pages.len(), 1);
        assert!(client.take_pages("BV2").is_none());
        assert!(client.pages.is_empty());
    }
}
