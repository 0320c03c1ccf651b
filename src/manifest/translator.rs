//! Playlist generation
//!
//! Rewrites a processed source manifest into the output playlist hierarchy:
//! a master playlist enumerating audio/video renditions, and per-profile
//! media playlists expanded down to individual segment URLs. Emission order
//! follows the source document; players observe it, so nothing is sorted.

use tracing::{info, warn};

use crate::manifest::model::{Profile, SourceManifest};
use crate::url::{
    build_url, get_param, is_truthy, remove_param, set_param, QueryPairs, UrlSigner,
};

/// Default target duration when no finite segment duration exists
const DEFAULT_TARGET_DURATION: u64 = 5;

/// Inbound request context the builders need: the query as received, and
/// the absolute endpoint bases already carrying the client-facing scheme.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub query: QueryPairs,
    pub playlist_base: String,
    pub segment_base: String,
}

/// Build the master playlist.
pub fn build_master(
    manifest: &SourceManifest,
    ctx: &RequestContext,
    signer: &dyn UrlSigner,
    key_id: Option<&str>,
    key: Option<&str>,
) -> String {
    let mut lines = vec!["#EXTM3U".to_string(), "#EXT-X-VERSION:6".to_string()];

    let mut carry = ctx.query.clone();
    let has_encrypted = remove_param(&mut carry, "has_encrypted")
        .map(|v| is_truthy(&v))
        .unwrap_or(false);

    let mut video: Vec<(&Profile, String)> = Vec::new();
    let mut audio: Vec<(&Profile, String)> = Vec::new();

    for profile in &manifest.profiles {
        set_param(&mut carry, "profile_id", profile.id.clone());
        set_param(&mut carry, "key_id", key_id.unwrap_or(""));
        set_param(&mut carry, "key", key.unwrap_or(""));
        let playlist_url = build_url(
            &ctx.playlist_base,
            &carry,
            has_encrypted.then_some(signer),
        );

        if profile.is_video() {
            video.push((profile, playlist_url));
        } else if profile.is_audio() {
            audio.push((profile, playlist_url));
        }
    }

    for (i, (profile, playlist_url)) in audio.iter().enumerate() {
        let is_default = if i == 0 { "YES" } else { "NO" };
        lines.push(format!(
            "#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"audio\",NAME=\"{}\",DEFAULT={},AUTOSELECT={},LANGUAGE=\"{}\",URI=\"{}\"",
            profile.id,
            is_default,
            is_default,
            profile.lang.as_deref().unwrap_or("und"),
            playlist_url,
        ));
    }

    for (profile, playlist_url) in &video {
        lines.push(format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{},CODECS=\"{}\",FRAME-RATE={},AUDIO=\"audio\"",
            profile.bandwidth,
            profile.width,
            profile.height,
            profile.codecs,
            profile.frame_rate.as_deref().unwrap_or("30"),
        ));
        lines.push(playlist_url.clone());
    }

    lines.join("\n")
}

/// Build a media playlist for the given profiles.
pub fn build_media_playlist(
    manifest: &SourceManifest,
    profiles: &[&Profile],
    ctx: &RequestContext,
    signer: &dyn UrlSigner,
) -> String {
    let mut lines = vec!["#EXTM3U".to_string(), "#EXT-X-VERSION:6".to_string()];

    // Whether generated segment URLs should be opaque follows the inbound
    // request's own flag.
    let has_encrypted = get_param(&ctx.query, "has_encrypted")
        .map(is_truthy)
        .unwrap_or(false);
    let signer = has_encrypted.then_some(signer);

    let mut added_segments = 0usize;

    for (index, profile) in profiles.iter().enumerate() {
        if index == 0 {
            emit_headers(&mut lines, manifest, profile);
        }

        if profile.segments.is_empty() {
            warn!(profile = %profile.id, "no segments found for profile");
            continue;
        }

        let mut carry = ctx.query.clone();
        remove_param(&mut carry, "profile_id");
        remove_param(&mut carry, "d");
        remove_param(&mut carry, "has_encrypted");

        for segment in &profile.segments {
            if manifest.is_live {
                if let Some(pdt) = segment.program_date_time.as_deref().filter(|v| !v.is_empty()) {
                    lines.push(format!("#EXT-X-PROGRAM-DATE-TIME:{}", pdt));
                }
            }

            lines.push(format!("#EXTINF:{:.3},", segment.extinf));

            let mut segment_query: QueryPairs = Vec::new();
            set_param(&mut segment_query, "init_url", profile.init_url.clone());
            set_param(&mut segment_query, "segment_url", segment.media.clone());
            set_param(&mut segment_query, "mime_type", profile.mime_type.clone());
            for name in ["key_id", "key", "api_password"] {
                if let Some(value) = get_param(&ctx.query, name) {
                    set_param(&mut segment_query, name, value);
                }
            }

            lines.push(build_url(&ctx.segment_base, &segment_query, signer));
            added_segments += 1;
        }
    }

    if !manifest.is_live {
        lines.push("#EXT-X-ENDLIST".to_string());
    }

    info!(added_segments, "built media playlist");
    lines.join("\n")
}

fn emit_headers(lines: &mut Vec<String>, manifest: &SourceManifest, profile: &Profile) {
    let target_duration = profile
        .segments
        .iter()
        .map(|s| s.extinf)
        .filter(|d| d.is_finite())
        .fold(None::<f64>, |acc, d| Some(acc.map_or(d, |m| m.max(d))))
        .map(|max| max.ceil() as u64)
        .unwrap_or(DEFAULT_TARGET_DURATION);

    let media_sequence = profile
        .segments
        .first()
        .map(|s| s.media_sequence.unwrap_or(s.number))
        .unwrap_or(0);

    lines.push(format!("#EXT-X-TARGETDURATION:{}", target_duration));
    lines.push(format!("#EXT-X-MEDIA-SEQUENCE:{}", media_sequence));
    if manifest.is_live {
        lines.push("#EXT-X-PLAYLIST-TYPE:EVENT".to_string());
    } else {
        lines.push("#EXT-X-PLAYLIST-TYPE:VOD".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::model::MediaSegment;
    use crate::url::{parse_query, TokenSigner};

    fn ctx(query: &str) -> RequestContext {
        RequestContext {
            query: parse_query(query),
            playlist_base: "http://proxy/proxy/mpd/playlist.m3u8".to_string(),
            segment_base: "http://proxy/proxy/mpd/segment.mp4".to_string(),
        }
    }

    fn signer() -> TokenSigner {
        TokenSigner::new("test-secret")
    }

    fn vod_manifest() -> SourceManifest {
        SourceManifest {
            is_live: false,
            minimum_update_period: None,
            default_kid: None,
            profiles: vec![
                Profile {
                    id: "v1".to_string(),
                    mime_type: "video/mp4".to_string(),
                    bandwidth: 1_000_000,
                    width: 1280,
                    height: 720,
                    codecs: "avc1.64001f".to_string(),
                    frame_rate: Some("30".to_string()),
                    init_url: "http://origin/v1/init.mp4".to_string(),
                    segments: vec![
                        segment("http://origin/v1/s0.m4s", 4.0, 0),
                        segment("http://origin/v1/s1.m4s", 4.5, 1),
                        segment("http://origin/v1/s2.m4s", 3.9, 2),
                    ],
                    ..Default::default()
                },
                Profile {
                    id: "a1".to_string(),
                    mime_type: "audio/mp4".to_string(),
                    bandwidth: 128_000,
                    codecs: "mp4a.40.2".to_string(),
                    lang: Some("en".to_string()),
                    init_url: "http://origin/a1/init.mp4".to_string(),
                    ..Default::default()
                },
            ],
        }
    }

    fn segment(media: &str, extinf: f64, number: u64) -> MediaSegment {
        MediaSegment {
            media: media.to_string(),
            extinf,
            number,
            ..Default::default()
        }
    }

    #[test]
    fn test_master_structure_and_order() {
        let manifest = vod_manifest();
        let master = build_master(&manifest, &ctx("d=http%3A%2F%2Forigin%2Fm.mpd"), &signer(), None, None);
        let lines: Vec<&str> = master.lines().collect();

        assert_eq!(lines[0], "#EXTM3U");
        assert_eq!(lines[1], "#EXT-X-VERSION:6");
        // Audio first, marked default.
        assert!(lines[2].starts_with("#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"audio\",NAME=\"a1\""));
        assert!(lines[2].contains("DEFAULT=YES,AUTOSELECT=YES"));
        assert!(lines[2].contains("LANGUAGE=\"en\""));
        // Then the video record: STREAM-INF followed by its URL.
        assert!(lines[3].starts_with("#EXT-X-STREAM-INF:BANDWIDTH=1000000,RESOLUTION=1280x720"));
        assert!(lines[3].contains("CODECS=\"avc1.64001f\""));
        assert!(lines[3].contains("FRAME-RATE=30"));
        assert!(lines[3].contains("AUDIO=\"audio\""));
        assert!(lines[4].starts_with("http://proxy/proxy/mpd/playlist.m3u8?"));
        assert!(lines[4].contains("profile_id=v1"));
    }

    #[test]
    fn test_master_secondary_audio_not_default() {
        let mut manifest = vod_manifest();
        let mut second = manifest.profiles[1].clone();
        second.id = "a2".to_string();
        second.lang = None;
        manifest.profiles.push(second);

        let master = build_master(&manifest, &ctx(""), &signer(), None, None);
        let media_lines: Vec<&str> = master
            .lines()
            .filter(|l| l.starts_with("#EXT-X-MEDIA"))
            .collect();
        assert_eq!(media_lines.len(), 2);
        assert!(media_lines[0].contains("DEFAULT=YES"));
        assert!(media_lines[1].contains("DEFAULT=NO,AUTOSELECT=NO"));
        assert!(media_lines[1].contains("LANGUAGE=\"und\""));
    }

    #[test]
    fn test_master_carries_drm_keys() {
        let manifest = vod_manifest();
        let master = build_master(&manifest, &ctx("d=x"), &signer(), Some("kid1"), Some("key1"));
        assert!(master.contains("key_id=kid1"));
        assert!(master.contains("key=key1"));
    }

    #[test]
    fn test_master_signed_urls_are_opaque() {
        let manifest = vod_manifest();
        let master = build_master(&manifest, &ctx("d=x&has_encrypted=1"), &signer(), None, None);
        let url_line = master
            .lines()
            .find(|l| l.starts_with("http://"))
            .unwrap();
        assert!(url_line.contains("?token="));
        assert!(!url_line.contains("profile_id="));
        // The stripped flag is not re-emitted into rendition URLs.
        assert!(!master.contains("has_encrypted"));
    }

    #[test]
    fn test_master_deterministic() {
        let manifest = vod_manifest();
        let a = build_master(&manifest, &ctx("d=x&a=1"), &signer(), None, None);
        let b = build_master(&manifest, &ctx("d=x&a=1"), &signer(), None, None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_media_playlist_vod() {
        let manifest = vod_manifest();
        let profiles = manifest.matching_profiles("v1");
        let playlist = build_media_playlist(&manifest, &profiles, &ctx("d=x&profile_id=v1"), &signer());
        let lines: Vec<&str> = playlist.lines().collect();

        assert_eq!(lines[0], "#EXTM3U");
        assert_eq!(lines[1], "#EXT-X-VERSION:6");
        assert_eq!(lines[2], "#EXT-X-TARGETDURATION:5");
        assert_eq!(lines[3], "#EXT-X-MEDIA-SEQUENCE:0");
        assert_eq!(lines[4], "#EXT-X-PLAYLIST-TYPE:VOD");
        assert_eq!(lines[5], "#EXTINF:4.000,");
        assert!(lines[6].starts_with("http://proxy/proxy/mpd/segment.mp4?"));
        assert_eq!(lines[7], "#EXTINF:4.500,");
        assert_eq!(lines[9], "#EXTINF:3.900,");
        assert_eq!(*lines.last().unwrap(), "#EXT-X-ENDLIST");
    }

    #[test]
    fn test_media_playlist_segment_query() {
        let manifest = vod_manifest();
        let profiles = manifest.matching_profiles("v1");
        let playlist = build_media_playlist(
            &manifest,
            &profiles,
            &ctx("d=x&profile_id=v1&key_id=kid&key=secret&api_password=pw"),
            &signer(),
        );
        let url = playlist
            .lines()
            .find(|l| l.starts_with("http://"))
            .unwrap();
        assert!(url.contains("init_url=http%3A%2F%2Forigin%2Fv1%2Finit.mp4"));
        assert!(url.contains("segment_url=http%3A%2F%2Forigin%2Fv1%2Fs0.m4s"));
        assert!(url.contains("mime_type=video%2Fmp4"));
        assert!(url.contains("key_id=kid"));
        assert!(url.contains("key=secret"));
        assert!(url.contains("api_password=pw"));
        // Playlist-routing parameters do not leak into segment URLs.
        assert!(!url.contains("profile_id"));
        assert!(!url.contains("d="));
    }

    #[test]
    fn test_media_playlist_live() {
        let manifest = SourceManifest {
            is_live: true,
            profiles: vec![Profile {
                id: "v1".to_string(),
                mime_type: "video/mp4".to_string(),
                init_url: "http://origin/init.mp4".to_string(),
                segments: vec![
                    MediaSegment {
                        media: "http://origin/s1042.m4s".to_string(),
                        extinf: 4.0,
                        number: 1042,
                        media_sequence: Some(1042),
                        program_date_time: Some("2024-01-01T00:00:00.000Z".to_string()),
                    },
                    MediaSegment {
                        media: "http://origin/s1043.m4s".to_string(),
                        extinf: 4.0,
                        number: 1043,
                        media_sequence: Some(1043),
                        program_date_time: None,
                    },
                ],
                ..Default::default()
            }],
            ..Default::default()
        };

        let profiles = manifest.matching_profiles("v1");
        let playlist = build_media_playlist(&manifest, &profiles, &ctx(""), &signer());

        assert!(playlist.contains("#EXT-X-PLAYLIST-TYPE:EVENT"));
        assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE:1042"));
        assert!(playlist.contains("#EXT-X-PROGRAM-DATE-TIME:2024-01-01T00:00:00.000Z"));
        assert!(!playlist.contains("#EXT-X-ENDLIST"));
        // Only the first segment carries a date-time tag.
        assert_eq!(playlist.matches("#EXT-X-PROGRAM-DATE-TIME").count(), 1);
    }

    #[test]
    fn test_media_playlist_empty_profile_defaults() {
        let manifest = SourceManifest {
            is_live: false,
            profiles: vec![Profile {
                id: "v1".to_string(),
                mime_type: "video/mp4".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let profiles = manifest.matching_profiles("v1");
        let playlist = build_media_playlist(&manifest, &profiles, &ctx(""), &signer());

        assert!(playlist.contains("#EXT-X-TARGETDURATION:5"));
        assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE:0"));
        assert!(playlist.contains("#EXT-X-ENDLIST"));
        assert!(!playlist.contains("#EXTINF"));
    }

    #[test]
    fn test_target_duration_ignores_non_finite() {
        let mut manifest = vod_manifest();
        manifest.profiles[0].segments[0].extinf = f64::NAN;
        manifest.profiles[0].segments[1].extinf = f64::INFINITY;
        let profiles = manifest.matching_profiles("v1");
        let playlist = build_media_playlist(&manifest, &profiles, &ctx(""), &signer());
        // Only the 3.9s segment is finite.
        assert!(playlist.contains("#EXT-X-TARGETDURATION:4"));
    }

    #[test]
    fn test_media_sequence_falls_back_to_number() {
        let mut manifest = vod_manifest();
        manifest.profiles[0].segments[0].number = 7;
        let profiles = manifest.matching_profiles("v1");
        let playlist = build_media_playlist(&manifest, &profiles, &ctx(""), &signer());
        assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE:7"));
    }
}
