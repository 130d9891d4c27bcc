use serde_json::Value;

use crate::db::VideoItem;
use crate::error::PipelineError;

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";

/// Thin adapter over the YouTube Data API. Rate-limited by the provider;
/// quota errors surface as `RateLimit` so callers can back off.
pub struct YouTubeClient {
    client: reqwest::Client,
    api_key: String,
}

/// Duration/caption/view fields for one video, from the metadata stage.
#[derive(Debug, Clone)]
pub struct VideoDetails {
    pub video_id: String,
    pub duration_seconds: i64,
    pub caption_available: bool,
    pub view_count: Option<i64>,
}

impl YouTubeClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        YouTubeClient {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, PipelineError> {
        let url = format!("{}/{}", API_BASE, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::from_status(status, body));
        }
        Ok(response.json().await?)
    }

    /// Look up a channel id by handle. Less reliable than configuring the
    /// channel id directly: handle search can match the wrong channel.
    pub async fn resolve_channel_id(&self, handle: &str) -> Result<String, PipelineError> {
        let handle_clean = handle.trim_start_matches('@');
        let response = self
            .get_json(
                "search",
                &[
                    ("part", "snippet"),
                    ("q", handle_clean),
                    ("type", "channel"),
                    ("maxResults", "1"),
                ],
            )
            .await?;

        response
            .get("items")
            .and_then(|items| items.as_array())
            .and_then(|items| items.first())
            .and_then(|item| item.pointer("/snippet/channelId"))
            .and_then(|id| id.as_str())
            .map(|id| id.to_string())
            .ok_or_else(|| {
                PipelineError::PermanentContent(format!("no channel found for handle {}", handle))
            })
    }

    /// Every channel has a hidden "uploads" playlist containing all public
    /// videos in upload order.
    pub async fn uploads_playlist_id(&self, channel_id: &str) -> Result<String, PipelineError> {
        let response = self
            .get_json("channels", &[("part", "contentDetails"), ("id", channel_id)])
            .await?;

        response
            .get("items")
            .and_then(|items| items.as_array())
            .and_then(|items| items.first())
            .and_then(|item| item.pointer("/contentDetails/relatedPlaylists/uploads"))
            .and_then(|id| id.as_str())
            .map(|id| id.to_string())
            .ok_or_else(|| {
                PipelineError::PermanentContent(format!("no channel with id {}", channel_id))
            })
    }

    /// Page through the uploads playlist (50 items per request) and collect
    /// video identity fields.
    pub async fn list_channel_videos(
        &self,
        playlist_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<VideoItem>, PipelineError> {
        let mut videos = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("part", "snippet,contentDetails".to_string()),
                ("playlistId", playlist_id.to_string()),
                ("maxResults", "50".to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let query_refs: Vec<(&str, &str)> =
                query.iter().map(|(k, v)| (*k, v.as_str())).collect();
            let response = self.get_json("playlistItems", &query_refs).await?;

            for item in response
                .get("items")
                .and_then(|items| items.as_array())
                .unwrap_or(&Vec::new())
            {
                let Some(video_id) = item
                    .pointer("/contentDetails/videoId")
                    .and_then(|id| id.as_str())
                else {
                    continue;
                };
                let title = item
                    .pointer("/snippet/title")
                    .and_then(|t| t.as_str())
                    .unwrap_or_default()
                    .to_string();
                let description = item
                    .pointer("/snippet/description")
                    .and_then(|d| d.as_str())
                    .map(|d| d.chars().take(500).collect::<String>());
                let published_at = item
                    .pointer("/snippet/publishedAt")
                    .and_then(|p| p.as_str())
                    .map(|p| p.to_string());
                let thumbnail_url = item
                    .pointer("/snippet/thumbnails")
                    .and_then(best_thumbnail);
                let category =
                    categorize_video(&title, description.as_deref().unwrap_or_default());

                videos.push(VideoItem {
                    video_id: video_id.to_string(),
                    title,
                    description,
                    published_at,
                    thumbnail_url,
                    category: Some(category.to_string()),
                    duration_seconds: None,
                    caption_available: None,
                    view_count: None,
                });

                if let Some(limit) = limit {
                    if videos.len() >= limit {
                        return Ok(videos);
                    }
                }
            }

            page_token = response
                .get("nextPageToken")
                .and_then(|t| t.as_str())
                .map(|t| t.to_string());
            if page_token.is_none() {
                break;
            }
        }

        Ok(videos)
    }

    /// Fetch duration, caption availability and view counts for up to 50
    /// videos in one request.
    pub async fn get_video_metadata(
        &self,
        video_ids: &[String],
    ) -> Result<Vec<VideoDetails>, PipelineError> {
        let ids = video_ids.join(",");
        let response = self
            .get_json(
                "videos",
                &[("part", "contentDetails,statistics"), ("id", &ids)],
            )
            .await?;

        let mut details = Vec::new();
        for item in response
            .get("items")
            .and_then(|items| items.as_array())
            .unwrap_or(&Vec::new())
        {
            let Some(video_id) = item.get("id").and_then(|id| id.as_str()) else {
                continue;
            };
            let duration_iso = item
                .pointer("/contentDetails/duration")
                .and_then(|d| d.as_str())
                .unwrap_or("PT0S");
            let caption_available = item
                .pointer("/contentDetails/caption")
                .and_then(|c| c.as_str())
                .map(|c| c == "true")
                .unwrap_or(false);
            let view_count = item
                .pointer("/statistics/viewCount")
                .and_then(|v| v.as_str())
                .and_then(|v| v.parse().ok());

            details.push(VideoDetails {
                video_id: video_id.to_string(),
                duration_seconds: parse_iso8601_duration(duration_iso),
                caption_available,
                view_count,
            });
        }
        Ok(details)
    }
}

/// Parse an ISO 8601 duration (`PT1H2M3S`) to whole seconds. Unrecognized
/// input parses to 0, matching a missing duration.
pub(crate) fn parse_iso8601_duration(raw: &str) -> i64 {
    let mut seconds: i64 = 0;
    let mut number = String::new();
    let mut in_time = false;

    for ch in raw.chars() {
        match ch {
            'P' => {}
            'T' => in_time = true,
            '0'..='9' => number.push(ch),
            'D' => {
                seconds += number.parse::<i64>().unwrap_or(0) * 86_400;
                number.clear();
            }
            'H' if in_time => {
                seconds += number.parse::<i64>().unwrap_or(0) * 3_600;
                number.clear();
            }
            'M' if in_time => {
                seconds += number.parse::<i64>().unwrap_or(0) * 60;
                number.clear();
            }
            'S' if in_time => {
                seconds += number.parse::<i64>().unwrap_or(0);
                number.clear();
            }
            _ => number.clear(),
        }
    }
    seconds
}

/// Pick the best thumbnail quality available.
fn best_thumbnail(thumbnails: &Value) -> Option<String> {
    for quality in ["maxres", "standard", "high", "medium", "default"] {
        if let Some(url) = thumbnails
            .pointer(&format!("/{}/url", quality))
            .and_then(|u| u.as_str())
        {
            return Some(url.to_string());
        }
    }
    None
}

/// Rough content-type heuristic from title/description patterns. Useful for
/// prioritizing content; needs manual review for anything serious.
pub(crate) fn categorize_video(title: &str, description: &str) -> &'static str {
    let title_lower = title.to_lowercase();
    let desc_lower = description.to_lowercase();

    if title_lower.contains("q&a")
        || title_lower.contains("q & a")
        || title_lower.contains("questions")
    {
        return "qa_session";
    }
    if title_lower.contains("sermon")
        || title_lower.contains("sunday")
        || title_lower.contains("church")
    {
        return "sermon";
    }
    let teaching_markers = ["study", "teaching", "lesson", "commentary", "chapter"];
    if teaching_markers
        .iter()
        .any(|m| title_lower.contains(m) || desc_lower.contains(m))
    {
        return "teaching";
    }
    "unknown"
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn iso8601_durations_parse_to_seconds() {
        assert_eq!(parse_iso8601_duration("PT30M47S"), 1847);
        assert_eq!(parse_iso8601_duration("PT1H2M3S"), 3723);
        assert_eq!(parse_iso8601_duration("PT45S"), 45);
        assert_eq!(parse_iso8601_duration("P1DT1S"), 86_401);
        assert_eq!(parse_iso8601_duration("P0D"), 0);
        assert_eq!(parse_iso8601_duration("garbage"), 0);
    }

    #[test]
    fn best_thumbnail_prefers_highest_quality() {
        let thumbnails = json!({
            "default": {"url": "https://i.ytimg.com/vi/x/default.jpg"},
            "high": {"url": "https://i.ytimg.com/vi/x/hqdefault.jpg"}
        });
        assert_eq!(
            best_thumbnail(&thumbnails).as_deref(),
            Some("https://i.ytimg.com/vi/x/hqdefault.jpg")
        );
    }

    #[test]
    fn categorization_matches_title_patterns() {
        assert_eq!(categorize_video("Live Q&A with viewers", ""), "qa_session");
        assert_eq!(categorize_video("Sunday Sermon", ""), "sermon");
        assert_eq!(categorize_video("Romans chapter 8", ""), "teaching");
        assert_eq!(categorize_video("Vlog #12", ""), "unknown");
    }
}
