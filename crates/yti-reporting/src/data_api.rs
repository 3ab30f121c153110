//! YouTube Data API v3 helpers (channel lookup, uploads, activities) and
//! per-video YouTube Analytics queries.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::debug;
use yti_storage::RateLimiter;

use crate::client::GoogleHttp;
use crate::ApiError;

pub const DATA_API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";
pub const ANALYTICS_BASE_URL: &str = "https://youtubeanalytics.googleapis.com/v2";

/// Daily metrics requested for a single video.
pub const VIDEO_ANALYTICS_METRICS: &str = "views,likes,shares,estimatedMinutesWatched,averageViewDuration,averageViewPercentage,annotationImpressions,annotationClickThroughRate,annotationCloseRate";

/// `videos.list` accepts at most this many ids per call.
const MAX_VIDEO_IDS: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSummary {
    pub handle: String,
    pub id: String,
    pub title: String,
    pub description: String,
    pub custom_url: String,
    pub published_at: NaiveDate,
    pub view_count: u64,
    pub subscriber_count: u64,
    pub video_count: u64,
    pub topic_ids: Vec<String>,
    pub topic_categories: Vec<String>,
    pub unsubscribed_trailer: bool,
    pub uploads_playlist_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoStats {
    pub id: String,
    pub category_id: String,
    pub duration_secs: u64,
    pub view_count: u64,
    pub like_count: u64,
    pub comment_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistVideo {
    pub title: String,
    pub description: String,
    pub channel_id: String,
    pub channel_title: String,
    pub video_id: String,
    pub url: String,
    pub published_at: NaiveDate,
    pub hashtags: Vec<String>,
    pub category_id: Option<String>,
    pub duration_secs: Option<u64>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub comment_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityItem {
    pub title: String,
    pub published_at: NaiveDate,
    pub video_id: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Daily analytics rows for one video, in the column order the API returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoAnalytics {
    pub video_id: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
}

impl VideoAnalytics {
    /// One object per row keyed by column name, plus `videoId`.
    pub fn records(&self) -> Vec<serde_json::Map<String, JsonValue>> {
        self.rows
            .iter()
            .map(|row| {
                let mut record: serde_json::Map<String, JsonValue> = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect();
                record.insert("videoId".into(), JsonValue::String(self.video_id.clone()));
                record
            })
            .collect()
    }
}

/// Parses `publishedAt` (with or without fractional seconds, `Z` or offset) to its date.
pub fn parse_published_at(input: &str) -> Option<NaiveDate> {
    DateTime::parse_from_rfc3339(input)
        .or_else(|_| DateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S%z"))
        .ok()
        .map(|dt| dt.date_naive())
}

/// Total seconds of an ISO-8601 video duration such as `PT1H2M3S` or `P1DT2H`.
pub fn parse_duration_secs(input: &str) -> Option<u64> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?$").expect("valid duration regex")
    });
    let caps = pattern.captures(input.trim())?;
    let mut total: u64 = 0;
    for (group, unit) in [(1, 86_400u64), (2, 3_600), (3, 60), (4, 1)] {
        let Some(m) = caps.get(group) else { continue };
        let value: u64 = m.as_str().parse().ok()?;
        total = total.checked_add(value.checked_mul(unit)?)?;
    }
    Some(total)
}

pub fn extract_hashtags(description: &str) -> Vec<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"#\w+").expect("valid hashtag regex"));
    pattern
        .find_iter(description)
        .map(|m| m.as_str().to_string())
        .collect()
}

fn json_at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut current = value;
    for key in path {
        current = current.get(*key)?;
    }
    Some(current)
}

fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    json_at(value, path)?.as_str()
}

/// Counts arrive as decimal strings; missing counts read as zero.
fn json_count(value: &JsonValue, path: &[&str]) -> u64 {
    match json_at(value, path) {
        Some(JsonValue::String(s)) => s.parse().unwrap_or(0),
        Some(JsonValue::Number(n)) => n.as_u64().unwrap_or(0),
        _ => 0,
    }
}

fn json_string_vec(value: &JsonValue, path: &[&str]) -> Vec<String> {
    json_at(value, path)
        .and_then(JsonValue::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn required_str<'a>(value: &'a JsonValue, path: &[&str], url: &str) -> Result<&'a str, ApiError> {
    json_str(value, path).ok_or_else(|| ApiError::Decode {
        url: url.to_string(),
        message: format!("missing field {}", path.join(".")),
    })
}

fn required_date(value: &JsonValue, path: &[&str], url: &str) -> Result<NaiveDate, ApiError> {
    let raw = required_str(value, path, url)?;
    parse_published_at(raw).ok_or_else(|| ApiError::Decode {
        url: url.to_string(),
        message: format!("invalid timestamp {raw:?} at {}", path.join(".")),
    })
}

pub fn channel_from_json(item: &JsonValue, url: &str) -> Result<ChannelSummary, ApiError> {
    let custom_url = json_str(item, &["snippet", "customUrl"]).unwrap_or_default();
    Ok(ChannelSummary {
        handle: custom_url.to_string(),
        id: required_str(item, &["id"], url)?.to_string(),
        title: required_str(item, &["snippet", "title"], url)?.to_string(),
        description: json_str(item, &["snippet", "description"]).unwrap_or_default().to_string(),
        custom_url: format!("https://www.youtube.com/{custom_url}"),
        published_at: required_date(item, &["snippet", "publishedAt"], url)?,
        view_count: json_count(item, &["statistics", "viewCount"]),
        subscriber_count: json_count(item, &["statistics", "subscriberCount"]),
        video_count: json_count(item, &["statistics", "videoCount"]),
        topic_ids: json_string_vec(item, &["topicDetails", "topicIds"]),
        topic_categories: json_string_vec(item, &["topicDetails", "topicCategories"]),
        unsubscribed_trailer: json_at(item, &["brandingSettings", "channel", "unsubscribedTrailer"]).is_some(),
        uploads_playlist_id: required_str(item, &["contentDetails", "relatedPlaylists", "uploads"], url)?
            .to_string(),
    })
}

pub fn video_stats_from_json(item: &JsonValue, url: &str) -> Result<VideoStats, ApiError> {
    let raw_duration = json_str(item, &["contentDetails", "duration"]).unwrap_or("P0D");
    let duration_secs = parse_duration_secs(raw_duration).ok_or_else(|| ApiError::Decode {
        url: url.to_string(),
        message: format!("invalid duration {raw_duration:?}"),
    })?;
    Ok(VideoStats {
        id: required_str(item, &["id"], url)?.to_string(),
        category_id: json_str(item, &["snippet", "categoryId"]).unwrap_or_default().to_string(),
        duration_secs,
        view_count: json_count(item, &["statistics", "viewCount"]),
        like_count: json_count(item, &["statistics", "likeCount"]),
        comment_count: json_count(item, &["statistics", "commentCount"]),
    })
}

fn playlist_video_from_json(
    item: &JsonValue,
    stats: Option<&VideoStats>,
    url: &str,
) -> Result<PlaylistVideo, ApiError> {
    let video_id = required_str(item, &["contentDetails", "videoId"], url)?.to_string();
    let description = json_str(item, &["snippet", "description"]).unwrap_or_default().to_string();
    Ok(PlaylistVideo {
        title: json_str(item, &["snippet", "title"]).unwrap_or_default().to_string(),
        hashtags: extract_hashtags(&description),
        description,
        channel_id: json_str(item, &["snippet", "channelId"]).unwrap_or_default().to_string(),
        channel_title: json_str(item, &["snippet", "channelTitle"]).unwrap_or_default().to_string(),
        url: format!("https://youtu.be/{video_id}"),
        published_at: required_date(item, &["contentDetails", "videoPublishedAt"], url)?,
        category_id: stats.map(|s| s.category_id.clone()),
        duration_secs: stats.map(|s| s.duration_secs),
        view_count: stats.map(|s| s.view_count),
        like_count: stats.map(|s| s.like_count),
        comment_count: stats.map(|s| s.comment_count),
        video_id,
    })
}

/// `None` for activity types that carry no video.
pub fn activity_from_json(item: &JsonValue, url: &str) -> Result<Option<ActivityItem>, ApiError> {
    let kind = required_str(item, &["snippet", "type"], url)?;
    let video_id = match kind {
        "playlistItem" => required_str(item, &["contentDetails", "playlistItem", "resourceId", "videoId"], url)?,
        "upload" => required_str(item, &["contentDetails", "upload", "videoId"], url)?,
        _ => return Ok(None),
    };
    Ok(Some(ActivityItem {
        title: json_str(item, &["snippet", "title"]).unwrap_or_default().to_string(),
        published_at: required_date(item, &["snippet", "publishedAt"], url)?,
        url: format!("https://youtu.be/{video_id}"),
        video_id: video_id.to_string(),
        kind: kind.to_string(),
    }))
}

pub fn video_analytics_from_json(video_id: &str, body: &JsonValue) -> VideoAnalytics {
    let columns = json_at(body, &["columnHeaders"])
        .and_then(JsonValue::as_array)
        .map(|headers| {
            headers
                .iter()
                .filter_map(|h| json_str(h, &["name"]).map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    let rows = json_at(body, &["rows"])
        .and_then(JsonValue::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| row.as_array().cloned())
                .collect()
        })
        .unwrap_or_default();
    VideoAnalytics {
        video_id: video_id.to_string(),
        columns,
        rows,
    }
}

#[derive(Clone)]
pub struct DataApiClient {
    http: GoogleHttp,
    limiter: Arc<RateLimiter>,
    base_url: String,
    analytics_base_url: String,
}

impl DataApiClient {
    pub fn new(http: GoogleHttp, limiter: Arc<RateLimiter>) -> Self {
        Self {
            http,
            limiter,
            base_url: DATA_API_BASE_URL.to_string(),
            analytics_base_url: ANALYTICS_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_analytics_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.analytics_base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get_json(&self, resource: &str, query: &[(&str, &str)]) -> Result<(String, JsonValue), ApiError> {
        self.get_json_from(&self.base_url, resource, query).await
    }

    async fn get_json_from(
        &self,
        base_url: &str,
        resource: &str,
        query: &[(&str, &str)],
    ) -> Result<(String, JsonValue), ApiError> {
        let url = format!("{base_url}/{resource}");
        self.limiter.acquire().await;
        let value = self.http.get_json(&url, query).await?;
        Ok((url, value))
    }

    pub async fn channel_by_handle(&self, handle: &str) -> Result<ChannelSummary, ApiError> {
        let (url, body) = self
            .get_json(
                "channels",
                &[
                    ("part", "id,snippet,statistics,topicDetails,brandingSettings,contentDetails"),
                    ("forHandle", handle),
                ],
            )
            .await?;
        let item = json_at(&body, &["items"])
            .and_then(JsonValue::as_array)
            .and_then(|items| items.first())
            .ok_or_else(|| ApiError::Decode {
                url: url.clone(),
                message: format!("no channel found for handle {handle}"),
            })?;
        channel_from_json(item, &url)
    }

    pub async fn videos(&self, ids: &[String]) -> Result<Vec<VideoStats>, ApiError> {
        let mut out = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_VIDEO_IDS) {
            let joined = chunk.join(",");
            let (url, body) = self
                .get_json(
                    "videos",
                    &[
                        ("part", "snippet,contentDetails,statistics"),
                        ("id", joined.as_str()),
                        ("maxResults", "50"),
                    ],
                )
                .await?;
            if let Some(items) = json_at(&body, &["items"]).and_then(JsonValue::as_array) {
                for item in items {
                    out.push(video_stats_from_json(item, &url)?);
                }
            }
        }
        Ok(out)
    }

    /// Every item of a playlist, joined with per-video statistics where available.
    pub async fn playlist_items(&self, playlist_id: &str) -> Result<Vec<PlaylistVideo>, ApiError> {
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![
                ("part", "snippet,contentDetails"),
                ("playlistId", playlist_id),
                ("maxResults", "50"),
            ];
            if let Some(token) = page_token.as_deref() {
                query.push(("pageToken", token));
            }
            let (url, body) = self.get_json("playlistItems", &query).await?;
            let items = json_at(&body, &["items"])
                .and_then(JsonValue::as_array)
                .cloned()
                .unwrap_or_default();

            let video_ids: Vec<String> = items
                .iter()
                .filter_map(|item| json_str(item, &["contentDetails", "videoId"]).map(str::to_string))
                .collect();
            let stats: HashMap<String, VideoStats> = self
                .videos(&video_ids)
                .await?
                .into_iter()
                .map(|s| (s.id.clone(), s))
                .collect();

            for item in &items {
                let video_id = json_str(item, &["contentDetails", "videoId"]).unwrap_or_default();
                out.push(playlist_video_from_json(item, stats.get(video_id), &url)?);
            }

            page_token = json_str(&body, &["nextPageToken"])
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            if page_token.is_none() {
                break;
            }
        }
        debug!(playlist_id, videos = out.len(), "listed playlist items");
        Ok(out)
    }

    /// Video activities (uploads and playlist additions) published after `published_after`.
    pub async fn activities(
        &self,
        channel_id: &str,
        published_after: DateTime<Utc>,
    ) -> Result<Vec<ActivityItem>, ApiError> {
        let after = published_after.to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![
                ("part", "contentDetails,snippet"),
                ("channelId", channel_id),
                ("maxResults", "50"),
                ("publishedAfter", after.as_str()),
            ];
            if let Some(token) = page_token.as_deref() {
                query.push(("pageToken", token));
            }
            let (url, body) = self.get_json("activities", &query).await?;
            if let Some(items) = json_at(&body, &["items"]).and_then(JsonValue::as_array) {
                for item in items {
                    match activity_from_json(item, &url)? {
                        Some(activity) => out.push(activity),
                        None => debug!(kind = ?json_str(item, &["snippet", "type"]), "activity without video skipped"),
                    }
                }
            }

            page_token = json_str(&body, &["nextPageToken"])
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            if page_token.is_none() {
                break;
            }
        }
        debug!(channel_id, activities = out.len(), "listed activities");
        Ok(out)
    }

    /// Daily metrics for one of the authorized channel's videos, `start..=end`.
    pub async fn video_analytics(
        &self,
        video_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<VideoAnalytics, ApiError> {
        let start = start.format("%Y-%m-%d").to_string();
        let end = end.format("%Y-%m-%d").to_string();
        let filters = format!("video=={video_id}");
        let (_url, body) = self
            .get_json_from(
                &self.analytics_base_url,
                "reports",
                &[
                    ("ids", "channel==MINE"),
                    ("startDate", start.as_str()),
                    ("endDate", end.as_str()),
                    ("metrics", VIDEO_ANALYTICS_METRICS),
                    ("dimensions", "day"),
                    ("filters", filters.as_str()),
                    ("sort", "day"),
                ],
            )
            .await?;
        Ok(video_analytics_from_json(video_id, &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn published_at_accepts_all_api_shapes() {
        let expected = NaiveDate::from_ymd_opt(2024, 2, 3).unwrap();
        assert_eq!(parse_published_at("2024-02-03T10:11:12.345Z"), Some(expected));
        assert_eq!(parse_published_at("2024-02-03T10:11:12Z"), Some(expected));
        assert_eq!(parse_published_at("2024-02-03T10:11:12+0100"), Some(expected));
        assert_eq!(parse_published_at("03/02/2024"), None);
    }

    #[test]
    fn durations_sum_to_seconds() {
        assert_eq!(parse_duration_secs("P0D"), Some(0));
        assert_eq!(parse_duration_secs("PT45S"), Some(45));
        assert_eq!(parse_duration_secs("PT1H2M3S"), Some(3723));
        assert_eq!(parse_duration_secs("PT10M"), Some(600));
        assert_eq!(parse_duration_secs("P1DT1S"), Some(86_401));
        assert_eq!(parse_duration_secs("1:02:03"), None);
    }

    #[test]
    fn oversized_durations_are_rejected() {
        assert_eq!(parse_duration_secs("P999999999999999999D"), None);
        assert_eq!(parse_duration_secs("PT99999999999999999999S"), None);
    }

    #[test]
    fn hashtags_are_extracted_in_order() {
        assert_eq!(
            extract_hashtags("new video #rust #async_io and more #2024"),
            ["#rust", "#async_io", "#2024"]
        );
        assert!(extract_hashtags("no tags here").is_empty());
    }

    #[test]
    fn channel_json_maps_to_summary() {
        let item = json!({
            "id": "UC123",
            "snippet": {"title": "Chan", "description": "d", "customUrl": "@chan", "publishedAt": "2019-05-01T00:00:00Z"},
            "statistics": {"viewCount": "1000", "subscriberCount": "50", "videoCount": "7"},
            "topicDetails": {"topicIds": ["/m/1"], "topicCategories": ["https://en.wikipedia.org/wiki/Music"]},
            "brandingSettings": {"channel": {"unsubscribedTrailer": "vid"}},
            "contentDetails": {"relatedPlaylists": {"uploads": "UU123"}}
        });
        let summary = channel_from_json(&item, "mem://channels").unwrap();
        assert_eq!(summary.custom_url, "https://www.youtube.com/@chan");
        assert_eq!(summary.view_count, 1000);
        assert!(summary.unsubscribed_trailer);
        assert_eq!(summary.uploads_playlist_id, "UU123");
        assert_eq!(summary.topic_ids, ["/m/1"]);
    }

    #[test]
    fn video_json_defaults_missing_counts_to_zero() {
        let item = json!({
            "id": "v1",
            "snippet": {"categoryId": "22"},
            "contentDetails": {"duration": "PT2M"},
            "statistics": {"viewCount": "12"}
        });
        let stats = video_stats_from_json(&item, "mem://videos").unwrap();
        assert_eq!(stats.duration_secs, 120);
        assert_eq!(stats.view_count, 12);
        assert_eq!(stats.like_count, 0);
    }

    #[test]
    fn channel_without_uploads_playlist_is_decode_error() {
        let item = json!({"id": "UC1", "snippet": {"title": "x", "publishedAt": "2019-05-01T00:00:00Z"}});
        let err = channel_from_json(&item, "mem://channels").unwrap_err();
        assert!(matches!(err, ApiError::Decode { .. }));
    }

    #[test]
    fn analytics_rows_become_records_with_video_id() {
        let body = json!({
            "columnHeaders": [{"name": "day"}, {"name": "views"}],
            "rows": [["2024-02-01", 10], ["2024-02-02", 12]]
        });
        let analytics = video_analytics_from_json("v1", &body);
        let records = analytics.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["day"], "2024-02-02");
        assert_eq!(records[1]["views"], 12);
        assert_eq!(records[1]["videoId"], "v1");
        assert!(video_analytics_from_json("v1", &json!({"columnHeaders": []})).rows.is_empty());
    }

    mod served {
        use super::*;
        use crate::credentials::StaticTokenProvider;
        use axum::extract::{Query, State};
        use axum::http::StatusCode;
        use axum::routing::get;
        use axum::{Json, Router};
        use chrono::TimeZone;
        use std::sync::Mutex;
        use tokio::net::TcpListener;
        use yti_storage::RateLimitPolicy;

        type Params = Query<HashMap<String, String>>;

        #[derive(Clone, Default)]
        struct Seen {
            video_batches: Arc<Mutex<Vec<usize>>>,
        }

        async fn serve(app: Router) -> String {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
            format!("http://{addr}")
        }

        fn client(base: &str) -> DataApiClient {
            let http = GoogleHttp::new(reqwest::Client::new(), Arc::new(StaticTokenProvider::new("tok")));
            DataApiClient::new(http, Arc::new(RateLimiter::new(RateLimitPolicy::default())))
                .with_base_url(base)
                .with_analytics_base_url(format!("{base}/analytics"))
        }

        async fn channels(Query(q): Params) -> Json<JsonValue> {
            if q.get("forHandle").map(String::as_str) != Some("@known") {
                return Json(json!({"items": []}));
            }
            Json(json!({"items": [{
                "id": "UC1",
                "snippet": {"title": "Known", "customUrl": "@known", "publishedAt": "2020-01-02T03:04:05Z"},
                "statistics": {"viewCount": "5"},
                "contentDetails": {"relatedPlaylists": {"uploads": "UU1"}}
            }]}))
        }

        async fn videos(State(seen): State<Seen>, Query(q): Params) -> Json<JsonValue> {
            let ids: Vec<String> = q
                .get("id")
                .map(|v| v.split(',').map(str::to_string).collect())
                .unwrap_or_default();
            seen.video_batches.lock().unwrap().push(ids.len());
            let items: Vec<JsonValue> = ids
                .iter()
                .filter(|id| id.as_str() != "gone")
                .map(|id| json!({
                    "id": id,
                    "snippet": {"categoryId": "10"},
                    "contentDetails": {"duration": "PT1M"},
                    "statistics": {"viewCount": "3", "likeCount": "2", "commentCount": "1"}
                }))
                .collect();
            Json(json!({ "items": items }))
        }

        fn playlist_item(video_id: &str) -> JsonValue {
            json!({
                "snippet": {"title": video_id, "description": "#tag", "channelId": "UC1", "channelTitle": "Known"},
                "contentDetails": {"videoId": video_id, "videoPublishedAt": "2024-01-05T00:00:00Z"}
            })
        }

        async fn playlist_items(Query(q): Params) -> Result<Json<JsonValue>, StatusCode> {
            if q.get("playlistId").map(String::as_str) != Some("UU1") {
                return Err(StatusCode::NOT_FOUND);
            }
            match q.get("pageToken").map(String::as_str) {
                None => Ok(Json(json!({
                    "items": [playlist_item("v1"), playlist_item("v2")],
                    "nextPageToken": "p2"
                }))),
                Some("p2") => Ok(Json(json!({"items": [playlist_item("gone")]}))),
                Some(_) => Err(StatusCode::BAD_REQUEST),
            }
        }

        async fn activities(Query(q): Params) -> Result<Json<JsonValue>, StatusCode> {
            if q.get("publishedAfter").map(String::as_str) != Some("2024-02-01T00:00:00Z") {
                return Err(StatusCode::BAD_REQUEST);
            }
            match q.get("pageToken").map(String::as_str) {
                None => Ok(Json(json!({
                    "items": [
                        {"snippet": {"type": "upload", "title": "up", "publishedAt": "2024-02-03T00:00:00Z"},
                         "contentDetails": {"upload": {"videoId": "v9"}}},
                        {"snippet": {"type": "like", "title": "liked", "publishedAt": "2024-02-03T00:00:00Z"},
                         "contentDetails": {"like": {"resourceId": {"videoId": "x"}}}}
                    ],
                    "nextPageToken": "p2"
                }))),
                Some("p2") => Ok(Json(json!({"items": [
                    {"snippet": {"type": "playlistItem", "title": "added", "publishedAt": "2024-02-04T00:00:00.5Z"},
                     "contentDetails": {"playlistItem": {"resourceId": {"videoId": "v8"}}}}
                ]}))),
                Some(_) => Err(StatusCode::BAD_REQUEST),
            }
        }

        async fn analytics(Query(q): Params) -> Result<Json<JsonValue>, StatusCode> {
            let expected = [
                ("ids", "channel==MINE"),
                ("startDate", "2024-02-01"),
                ("endDate", "2024-02-02"),
                ("dimensions", "day"),
                ("filters", "video==v1"),
                ("sort", "day"),
                ("metrics", VIDEO_ANALYTICS_METRICS),
            ];
            if expected.iter().any(|(k, v)| q.get(*k).map(String::as_str) != Some(*v)) {
                return Err(StatusCode::BAD_REQUEST);
            }
            Ok(Json(json!({
                "columnHeaders": [{"name": "day"}, {"name": "views"}],
                "rows": [["2024-02-01", 4], ["2024-02-02", 6]]
            })))
        }

        async fn app() -> (String, Seen) {
            let seen = Seen::default();
            let router = Router::new()
                .route("/channels", get(channels))
                .route("/videos", get(videos))
                .route("/playlistItems", get(playlist_items))
                .route("/activities", get(activities))
                .route("/analytics/reports", get(analytics))
                .with_state(seen.clone());
            (serve(router).await, seen)
        }

        #[tokio::test]
        async fn channel_lookup_by_handle() {
            let (base, _) = app().await;
            let channel = client(&base).channel_by_handle("@known").await.unwrap();
            assert_eq!(channel.id, "UC1");
            assert_eq!(channel.uploads_playlist_id, "UU1");
            assert_eq!(channel.view_count, 5);

            let err = client(&base).channel_by_handle("@nobody").await.unwrap_err();
            assert!(matches!(err, ApiError::Decode { .. }));
        }

        #[tokio::test]
        async fn video_ids_are_sent_in_batches_of_fifty() {
            let (base, seen) = app().await;
            let ids: Vec<String> = (0..120).map(|i| format!("v{i}")).collect();
            let stats = client(&base).videos(&ids).await.unwrap();
            assert_eq!(stats.len(), 120);
            assert_eq!(stats[119].id, "v119");
            assert_eq!(*seen.video_batches.lock().unwrap(), [50, 50, 20]);
        }

        #[tokio::test]
        async fn playlist_pages_are_joined_with_stats() {
            let (base, _) = app().await;
            let videos = client(&base).playlist_items("UU1").await.unwrap();
            let ids: Vec<_> = videos.iter().map(|v| v.video_id.as_str()).collect();
            assert_eq!(ids, ["v1", "v2", "gone"]);
            assert_eq!(videos[0].view_count, Some(3));
            assert_eq!(videos[0].duration_secs, Some(60));
            assert_eq!(videos[0].hashtags, ["#tag"]);
            assert_eq!(videos[2].view_count, None);
            assert_eq!(videos[2].category_id, None);
        }

        #[tokio::test]
        async fn activities_follow_pages_and_skip_non_video_types() {
            let (base, _) = app().await;
            let after = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
            let items = client(&base).activities("UC1", after).await.unwrap();
            let got: Vec<_> = items.iter().map(|a| (a.kind.as_str(), a.video_id.as_str())).collect();
            assert_eq!(got, [("upload", "v9"), ("playlistItem", "v8")]);
            assert_eq!(items[1].url, "https://youtu.be/v8");
            assert_eq!(items[1].published_at, NaiveDate::from_ymd_opt(2024, 2, 4).unwrap());
        }

        #[tokio::test]
        async fn video_analytics_queries_one_video_by_day() {
            let (base, _) = app().await;
            let start = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
            let end = NaiveDate::from_ymd_opt(2024, 2, 2).unwrap();
            let analytics = client(&base).video_analytics("v1", start, end).await.unwrap();
            assert_eq!(analytics.columns, ["day", "views"]);
            assert_eq!(analytics.rows.len(), 2);
            assert_eq!(analytics.records()[0]["videoId"], "v1");
        }
    }
}
