//! Source manifest parsing and processing
//!
//! Two stages, cached separately from each other:
//!
//! 1. `parse` deserializes the XML document into [`MpdDocument`], the raw
//!    form that the manifest cache stores byte-for-byte (as JSON).
//! 2. `process` turns a raw document into a [`SourceManifest`] against the
//!    *current* wall clock: live streams re-derive their segment window on
//!    every request, so this stage is never cached.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ProxyError, Result};
use crate::manifest::model::{MediaSegment, Profile, SourceManifest};
use crate::url::resolve_url;

// helper.
macro_rules! regex {
    ($re:literal $(,)?) => {{
        static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
        RE.get_or_init(|| regex::Regex::new($re).unwrap())
    }};
}

/// Segments kept for a live window when the source declares no
/// time-shift buffer depth.
const DEFAULT_LIVE_WINDOW_SEGMENTS: u64 = 10;

/// Raw parsed source document. Field shapes mirror the XML; everything the
/// processor might need is kept so the cached form stays lossless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpdDocument {
    #[serde(rename = "@type")]
    pub mpd_type: Option<String>,

    #[serde(rename = "@minimumUpdatePeriod")]
    pub minimum_update_period: Option<String>,

    #[serde(rename = "@availabilityStartTime")]
    pub availability_start_time: Option<String>,

    #[serde(rename = "@timeShiftBufferDepth")]
    pub time_shift_buffer_depth: Option<String>,

    #[serde(rename = "@mediaPresentationDuration")]
    pub media_presentation_duration: Option<String>,

    #[serde(rename = "BaseURL")]
    pub base_url: Option<String>,

    #[serde(rename = "Period", default)]
    pub periods: Vec<MpdPeriod>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpdPeriod {
    #[serde(rename = "@id")]
    pub id: Option<String>,

    #[serde(rename = "@start")]
    pub start: Option<String>,

    #[serde(rename = "BaseURL")]
    pub base_url: Option<String>,

    #[serde(rename = "AdaptationSet", default)]
    pub adaptation_sets: Vec<MpdAdaptationSet>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpdAdaptationSet {
    #[serde(rename = "@mimeType")]
    pub mime_type: Option<String>,

    #[serde(rename = "@contentType")]
    pub content_type: Option<String>,

    #[serde(rename = "@lang")]
    pub lang: Option<String>,

    #[serde(rename = "@frameRate")]
    pub frame_rate: Option<String>,

    #[serde(rename = "@codecs")]
    pub codecs: Option<String>,

    #[serde(rename = "ContentProtection", default)]
    pub content_protections: Vec<MpdContentProtection>,

    #[serde(rename = "SegmentTemplate")]
    pub segment_template: Option<MpdSegmentTemplate>,

    #[serde(rename = "Representation", default)]
    pub representations: Vec<MpdRepresentation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpdContentProtection {
    #[serde(rename = "@schemeIdUri")]
    pub scheme_id_uri: Option<String>,

    #[serde(rename = "@value")]
    pub value: Option<String>,

    #[serde(rename = "@cenc:default_KID", alias = "@default_KID")]
    pub default_kid: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpdRepresentation {
    #[serde(rename = "@id")]
    pub id: String,

    #[serde(rename = "@mimeType")]
    pub mime_type: Option<String>,

    #[serde(rename = "@bandwidth")]
    pub bandwidth: Option<u64>,

    #[serde(rename = "@width")]
    pub width: Option<u32>,

    #[serde(rename = "@height")]
    pub height: Option<u32>,

    #[serde(rename = "@codecs")]
    pub codecs: Option<String>,

    #[serde(rename = "@frameRate")]
    pub frame_rate: Option<String>,

    #[serde(rename = "SegmentTemplate")]
    pub segment_template: Option<MpdSegmentTemplate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpdSegmentTemplate {
    #[serde(rename = "@initialization")]
    pub initialization: Option<String>,

    #[serde(rename = "@media")]
    pub media: Option<String>,

    #[serde(rename = "@timescale")]
    pub timescale: Option<u64>,

    #[serde(rename = "@duration")]
    pub duration: Option<u64>,

    #[serde(rename = "@startNumber")]
    pub start_number: Option<u64>,

    #[serde(rename = "@presentationTimeOffset")]
    pub presentation_time_offset: Option<u64>,

    #[serde(rename = "SegmentTimeline")]
    pub segment_timeline: Option<MpdSegmentTimeline>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpdSegmentTimeline {
    #[serde(rename = "S", default)]
    pub entries: Vec<MpdTimelineEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpdTimelineEntry {
    #[serde(rename = "@t")]
    pub t: Option<u64>,

    #[serde(rename = "@d")]
    pub d: u64,

    #[serde(rename = "@r")]
    pub r: Option<i64>,
}

/// Timing context threaded through segment expansion
struct ExpandWindow {
    is_live: bool,
    availability_start: Option<DateTime<Utc>>,
    period_start: f64,
    time_shift_buffer_depth: Option<f64>,
    presentation_duration: Option<f64>,
    now: DateTime<Utc>,
}

/// Source manifest parser and per-request processor
pub struct MpdParser;

impl MpdParser {
    pub fn new() -> Self {
        Self
    }

    /// Deserialize the raw document.
    pub fn parse(&self, bytes: &[u8]) -> Result<MpdDocument> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| ProxyError::ManifestParse(format!("invalid utf-8: {}", e)))?;
        quick_xml::de::from_str(text).map_err(|e| ProxyError::ManifestParse(e.to_string()))
    }

    /// Process a raw document against the current wall clock.
    pub fn process(
        &self,
        raw: &MpdDocument,
        mpd_url: &str,
        parse_drm: bool,
        profile_id: Option<&str>,
    ) -> Result<SourceManifest> {
        self.process_at(raw, mpd_url, parse_drm, profile_id, Utc::now())
    }

    /// Process with an explicit clock. Live segment windows depend on it.
    pub fn process_at(
        &self,
        raw: &MpdDocument,
        mpd_url: &str,
        parse_drm: bool,
        profile_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SourceManifest> {
        let is_live = raw.mpd_type.as_deref() == Some("dynamic");
        let minimum_update_period = raw
            .minimum_update_period
            .as_deref()
            .and_then(parse_iso_duration);
        let availability_start = raw
            .availability_start_time
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));
        let time_shift_buffer_depth = raw
            .time_shift_buffer_depth
            .as_deref()
            .and_then(parse_iso_duration);
        let presentation_duration = raw
            .media_presentation_duration
            .as_deref()
            .and_then(parse_iso_duration);

        let doc_base = match &raw.base_url {
            Some(b) => resolve_url(mpd_url, b.trim()),
            None => mpd_url.to_string(),
        };

        let mut default_kid = None;
        let mut profiles = Vec::new();

        for period in &raw.periods {
            let period_start = period.start.as_deref().and_then(parse_iso_duration).unwrap_or(0.0);
            let period_base = match &period.base_url {
                Some(b) => resolve_url(&doc_base, b.trim()),
                None => doc_base.clone(),
            };

            for adaptation in &period.adaptation_sets {
                if parse_drm && default_kid.is_none() {
                    default_kid = adaptation
                        .content_protections
                        .iter()
                        .find_map(|cp| cp.default_kid.as_deref())
                        .map(normalize_kid);
                }

                for rep in &adaptation.representations {
                    let mime_type = rep
                        .mime_type
                        .clone()
                        .or_else(|| adaptation.mime_type.clone())
                        .or_else(|| {
                            adaptation
                                .content_type
                                .as_deref()
                                .map(|ct| format!("{}/mp4", ct))
                        })
                        .unwrap_or_default();
                    if !mime_type.contains("video") && !mime_type.contains("audio") {
                        continue;
                    }

                    let Some(template) = rep
                        .segment_template
                        .as_ref()
                        .or(adaptation.segment_template.as_ref())
                    else {
                        warn!(id = %rep.id, "representation has no segment template, skipping");
                        continue;
                    };
                    let Some(init_template) = template.initialization.as_deref() else {
                        warn!(id = %rep.id, "representation has no initialization url, skipping");
                        continue;
                    };

                    let bandwidth = rep.bandwidth.unwrap_or(0);
                    let init_url = resolve_url(
                        &period_base,
                        &substitute_template(init_template, &rep.id, bandwidth, None, None),
                    );

                    let window = ExpandWindow {
                        is_live,
                        availability_start,
                        period_start,
                        time_shift_buffer_depth,
                        presentation_duration,
                        now,
                    };
                    let segments = if profile_id.is_some_and(|pid| pid == rep.id) {
                        expand_segments(template, &rep.id, bandwidth, &period_base, &window)
                    } else {
                        Vec::new()
                    };

                    profiles.push(Profile {
                        id: rep.id.clone(),
                        mime_type,
                        bandwidth,
                        width: rep.width.unwrap_or(0),
                        height: rep.height.unwrap_or(0),
                        codecs: rep
                            .codecs
                            .clone()
                            .or_else(|| adaptation.codecs.clone())
                            .unwrap_or_default(),
                        frame_rate: rep.frame_rate.clone().or_else(|| adaptation.frame_rate.clone()),
                        lang: adaptation.lang.clone(),
                        init_url,
                        segments,
                    });
                }
            }
        }

        Ok(SourceManifest {
            is_live,
            minimum_update_period,
            default_kid,
            profiles,
        })
    }
}

impl Default for MpdParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Expand a segment template into an ordered media segment list.
fn expand_segments(
    template: &MpdSegmentTemplate,
    rep_id: &str,
    bandwidth: u64,
    base: &str,
    window: &ExpandWindow,
) -> Vec<MediaSegment> {
    let Some(media_template) = template.media.as_deref() else {
        warn!(id = %rep_id, "segment template has no media attribute");
        return Vec::new();
    };

    let timescale = template.timescale.unwrap_or(1).max(1);
    let start_number = template.start_number.unwrap_or(1);
    let pto = template.presentation_time_offset.unwrap_or(0);

    // (t, d, number) triples in media-timeline ticks.
    let mut raw: Vec<(u64, u64, u64)> = Vec::new();

    if let Some(timeline) = &template.segment_timeline {
        let mut t_cursor = 0u64;
        let mut number = start_number;
        for entry in &timeline.entries {
            if let Some(t) = entry.t {
                t_cursor = t;
            }
            let d = entry.d.max(1);
            let repeats = match entry.r.unwrap_or(0) {
                r if r >= 0 => r as u64,
                // Open-ended repeat: fill to the end of the timeline.
                _ => {
                    let end = open_end_ticks(window, timescale, pto);
                    if end > t_cursor + d {
                        (end - t_cursor) / d - 1
                    } else {
                        0
                    }
                }
            };
            for _ in 0..=repeats {
                raw.push((t_cursor, d, number));
                t_cursor += d;
                number += 1;
            }
        }

        if window.is_live {
            clamp_to_live_window(&mut raw, window, timescale, pto);
        }
    } else if let Some(d) = template.duration {
        let d = d.max(1);
        if window.is_live {
            let elapsed = window
                .availability_start
                .map(|start| {
                    (window.now - start).num_milliseconds() as f64 / 1000.0 - window.period_start
                })
                .unwrap_or(0.0);
            let seg_secs = d as f64 / timescale as f64;
            let complete = (elapsed / seg_secs).floor().max(0.0) as u64;
            let depth = window
                .time_shift_buffer_depth
                .map(|w| ((w / seg_secs).floor() as u64).max(1))
                .unwrap_or(DEFAULT_LIVE_WINDOW_SEGMENTS);
            let first = complete.saturating_sub(depth);
            for i in first..complete {
                raw.push((pto + i * d, d, start_number + i));
            }
        } else {
            let total = window.presentation_duration.unwrap_or(0.0);
            let count = (total * timescale as f64 / d as f64).ceil() as u64;
            for i in 0..count {
                raw.push((pto + i * d, d, start_number + i));
            }
        }
    }

    raw.into_iter()
        .map(|(t, d, number)| MediaSegment {
            media: resolve_url(
                base,
                &substitute_template(media_template, rep_id, bandwidth, Some(number), Some(t)),
            ),
            extinf: d as f64 / timescale as f64,
            number,
            media_sequence: window.is_live.then_some(number),
            program_date_time: program_date_time(window, t, timescale, pto),
        })
        .collect()
}

/// End of the media timeline in ticks for an open-ended repeat.
fn open_end_ticks(window: &ExpandWindow, timescale: u64, pto: u64) -> u64 {
    let secs = if window.is_live {
        window
            .availability_start
            .map(|start| {
                ((window.now - start).num_milliseconds() as f64 / 1000.0 - window.period_start)
                    .max(0.0)
            })
            .unwrap_or(0.0)
    } else {
        window.presentation_duration.unwrap_or(0.0)
    };
    pto + (secs * timescale as f64) as u64
}

/// Keep only segments that are fully published and inside the time-shift
/// window.
fn clamp_to_live_window(raw: &mut Vec<(u64, u64, u64)>, window: &ExpandWindow, timescale: u64, pto: u64) {
    let Some(start) = window.availability_start else {
        return;
    };
    let now_secs = (window.now - start).num_milliseconds() as f64 / 1000.0;
    let window_start = window
        .time_shift_buffer_depth
        .map(|d| now_secs - d)
        .unwrap_or(f64::MIN);
    raw.retain(|&(t, d, _)| {
        let end = (t + d) as f64 / timescale as f64 - pto as f64 / timescale as f64
            + window.period_start;
        end <= now_secs && end >= window_start
    });
}

fn program_date_time(window: &ExpandWindow, t: u64, timescale: u64, pto: u64) -> Option<String> {
    if !window.is_live {
        return None;
    }
    let start = window.availability_start?;
    let offset_ms = ((t as f64 - pto as f64) / timescale as f64 + window.period_start) * 1000.0;
    let at = start + chrono::Duration::milliseconds(offset_ms as i64);
    Some(at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Substitute `$RepresentationID$`, `$Bandwidth$`, `$Number$` and `$Time$`
/// placeholders, honoring `%0Nd` width specifiers. `$$` escapes a literal
/// dollar sign.
fn substitute_template(
    template: &str,
    rep_id: &str,
    bandwidth: u64,
    number: Option<u64>,
    time: Option<u64>,
) -> String {
    let re = regex!(r"\$(RepresentationID|Bandwidth|Number|Time)(?:%0(\d+)d)?\$");
    let replaced = re.replace_all(template, |caps: &regex::Captures| {
        let value = match &caps[1] {
            "RepresentationID" => rep_id.to_string(),
            "Bandwidth" => bandwidth.to_string(),
            "Number" => number.map(|n| n.to_string()).unwrap_or_default(),
            "Time" => time.map(|t| t.to_string()).unwrap_or_default(),
            _ => String::new(),
        };
        match caps.get(2).and_then(|m| m.as_str().parse::<usize>().ok()) {
            Some(width) if width > value.len() => format!("{:0>width$}", value, width = width),
            _ => value,
        }
    });
    replaced.replace("$$", "$")
}

/// Parse an ISO 8601 duration into seconds. Year and month designators are
/// rejected; sources use day/time designators for the fields we read.
pub fn parse_iso_duration(s: &str) -> Option<f64> {
    let rest = s.trim().strip_prefix('P')?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, t),
        None => (rest, ""),
    };

    let mut secs = 0.0;
    let mut num = String::new();
    for ch in date_part.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            num.push(ch);
        } else {
            let value: f64 = num.parse().ok()?;
            num.clear();
            match ch {
                'D' => secs += value * 86400.0,
                'W' => secs += value * 7.0 * 86400.0,
                _ => return None,
            }
        }
    }
    if !num.is_empty() {
        return None;
    }
    for ch in time_part.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            num.push(ch);
        } else {
            let value: f64 = num.parse().ok()?;
            num.clear();
            match ch {
                'H' => secs += value * 3600.0,
                'M' => secs += value * 60.0,
                'S' => secs += value,
                _ => return None,
            }
        }
    }
    if !num.is_empty() {
        return None;
    }
    Some(secs)
}

fn normalize_kid(kid: &str) -> String {
    kid.replace('-', "").to_ascii_lowercase()
}
