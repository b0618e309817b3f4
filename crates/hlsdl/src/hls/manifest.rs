// HLS Manifest: the media playlist model and the parser seam in front of m3u8-rs.

use std::time::Duration;

use m3u8_rs::{MediaPlaylist, Playlist, parse_playlist_res};
use tracing::debug;

use crate::error::DownloadError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMethod {
    Aes128,
    SampleAes,
    Other(String),
}

impl std::fmt::Display for KeyMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aes128 => f.write_str("AES-128"),
            Self::SampleAes => f.write_str("SAMPLE-AES"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// Key reference attached to an encrypted segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRef {
    pub method: KeyMethod,
    /// Key URI as written in the playlist; may be relative.
    pub uri: String,
    pub iv: Option<[u8; 16]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Position in the playlist, starting at 0.
    pub index: usize,
    pub uri: String,
    pub duration: Duration,
    pub key: Option<KeyRef>,
}

impl Segment {
    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }
}

/// Parsed media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub segments: Vec<Segment>,
    pub target_duration: Duration,
    pub media_sequence: u64,
    pub end_list: bool,
}

impl Manifest {
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Sum of all segment durations.
    pub fn total_duration(&self) -> Duration {
        self.segments.iter().map(|s| s.duration).sum()
    }
}

/// Turns playlist text into a [`Manifest`].
pub trait ManifestParser: Send + Sync {
    fn parse(&self, text: &str) -> Result<Manifest, DownloadError>;
}

/// [`ManifestParser`] backed by `m3u8-rs`. Only media playlists are accepted.
#[derive(Debug, Default, Clone, Copy)]
pub struct M3u8Parser;

impl ManifestParser for M3u8Parser {
    fn parse(&self, text: &str) -> Result<Manifest, DownloadError> {
        let playlist = match parse_playlist_res(text.as_bytes()) {
            Ok(Playlist::MediaPlaylist(pl)) => pl,
            Ok(Playlist::MasterPlaylist(pl)) => {
                debug!(variants = pl.variants.len(), "Rejecting master playlist");
                return Err(DownloadError::parse(
                    "master playlists are not supported, pass a media playlist URL",
                ));
            }
            Err(e) => {
                debug!(error = ?e, "m3u8 parser rejected input");
                return Err(DownloadError::parse("Invalid m3u8 list."));
            }
        };

        let manifest = build_manifest(playlist)?;
        if manifest.is_empty() {
            return Err(DownloadError::parse("Invalid m3u8 list."));
        }
        Ok(manifest)
    }
}

fn build_manifest(playlist: MediaPlaylist) -> Result<Manifest, DownloadError> {
    // A key tag applies to every following segment until the next key tag.
    let mut current_key: Option<KeyRef> = None;
    let mut segments = Vec::with_capacity(playlist.segments.len());

    for (index, segment) in playlist.segments.into_iter().enumerate() {
        // m3u8-rs refuses `METHOD=NONE` without an IV and leaves the tag in
        // `unknown_tags` as "X-KEY" instead of attaching it to the segment.
        if segment.unknown_tags.iter().any(clears_key) {
            current_key = None;
        }
        if let Some(key) = &segment.key {
            current_key = key_ref(key)?;
        }
        segments.push(Segment {
            index,
            uri: segment.uri,
            duration: Duration::from_secs_f64(f64::from(segment.duration).max(0.0)),
            key: current_key.clone(),
        });
    }

    Ok(Manifest {
        segments,
        target_duration: Duration::from_secs_f64((playlist.target_duration as f64).max(0.0)),
        media_sequence: playlist.media_sequence,
        end_list: playlist.end_list,
    })
}

fn key_ref(key: &m3u8_rs::Key) -> Result<Option<KeyRef>, DownloadError> {
    let method = match &key.method {
        m3u8_rs::KeyMethod::None => return Ok(None),
        m3u8_rs::KeyMethod::AES128 => KeyMethod::Aes128,
        m3u8_rs::KeyMethod::SampleAES => KeyMethod::SampleAes,
        m3u8_rs::KeyMethod::Other(name) => KeyMethod::Other(name.clone()),
    };
    let uri = key
        .uri
        .clone()
        .ok_or_else(|| DownloadError::parse(format!("{method} key without URI")))?;
    let iv = key.iv.as_deref().map(parse_iv).transpose()?;
    Ok(Some(KeyRef { method, uri, iv }))
}

fn clears_key(tag: &m3u8_rs::ExtTag) -> bool {
    if tag.tag != "X-KEY" {
        return false;
    }
    tag.rest.as_deref().is_some_and(|rest| {
        rest.split(',').any(|attr| {
            attr.split_once('=').is_some_and(|(name, value)| {
                name.trim() == "METHOD" && value.trim().trim_matches('"') == "NONE"
            })
        })
    })
}

/// Parse a hex IV with an optional `0x` prefix. Short values are left-padded with zeros.
pub fn parse_iv(input: &str) -> Result<[u8; 16], DownloadError> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() || digits.len() > 32 {
        return Err(DownloadError::parse(format!("invalid IV `{input}`")));
    }

    let padded = format!("{digits:0>32}");
    let mut iv = [0u8; 16];
    hex::decode_to_slice(&padded, &mut iv)
        .map_err(|e| DownloadError::parse(format!("invalid IV `{input}`: {e}")))?;
    Ok(iv)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENCRYPTED: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:6
#EXT-X-MEDIA-SEQUENCE:100
#EXT-X-KEY:METHOD=AES-128,URI=\"keys/a.key\",IV=0x000102030405060708090a0b0c0d0e0f
#EXTINF:6.0,
seg0.ts
#EXTINF:6.0,
seg1.ts
#EXT-X-KEY:METHOD=NONE
#EXTINF:5.5,
seg2.ts
#EXT-X-KEY:METHOD=AES-128,URI=\"https://keys.test/b.key\"
#EXTINF:4.0,
seg3.ts
#EXT-X-ENDLIST
";

    #[test]
    fn keys_carry_forward_until_replaced() {
        let manifest = M3u8Parser.parse(ENCRYPTED).unwrap();
        assert_eq!(manifest.len(), 4);
        assert_eq!(manifest.media_sequence, 100);
        assert_eq!(manifest.target_duration, Duration::from_secs(6));
        assert!(manifest.end_list);

        let first = manifest.segments[0].key.as_ref().unwrap();
        assert_eq!(first.method, KeyMethod::Aes128);
        assert_eq!(first.uri, "keys/a.key");
        assert_eq!(
            first.iv,
            Some([0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15])
        );
        assert_eq!(manifest.segments[1].key.as_ref(), Some(first));

        assert!(!manifest.segments[2].is_encrypted());

        let last = manifest.segments[3].key.as_ref().unwrap();
        assert_eq!(last.uri, "https://keys.test/b.key");
        assert_eq!(last.iv, None);

        let indices: Vec<usize> = manifest.segments.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(manifest.total_duration(), Duration::from_secs_f64(21.5));
    }

    #[test]
    fn method_none_clears_key_with_or_without_iv() {
        let text = "#EXTM3U
#EXT-X-TARGETDURATION:4
#EXT-X-KEY:METHOD=AES-128,URI=\"a.key\"
#EXTINF:4.0,
s0.ts
#EXT-X-KEY:METHOD=NONE
#EXTINF:4.0,
s1.ts
#EXTINF:4.0,
s2.ts
#EXT-X-KEY:METHOD=AES-128,URI=\"b.key\"
#EXTINF:4.0,
s3.ts
#EXT-X-KEY:METHOD=NONE,IV=0x1
#EXTINF:4.0,
s4.ts
#EXT-X-ENDLIST
";
        let manifest = M3u8Parser.parse(text).unwrap();
        let encrypted: Vec<bool> = manifest.segments.iter().map(Segment::is_encrypted).collect();
        assert_eq!(encrypted, vec![true, false, false, true, false]);
        assert_eq!(manifest.segments[3].key.as_ref().unwrap().uri, "b.key");
    }

    #[test]
    fn short_iv_is_left_padded() {
        let iv = parse_iv("0x1").unwrap();
        assert_eq!(iv[..15], [0u8; 15]);
        assert_eq!(iv[15], 1);

        assert_eq!(parse_iv("0XFF").unwrap()[15], 0xff);
        assert!(parse_iv("0x").is_err());
        assert!(parse_iv("0xzz").is_err());
        assert!(parse_iv(&format!("0x{}", "0".repeat(33))).is_err());
    }

    #[test]
    fn master_playlist_is_rejected() {
        let master = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=1280000,RESOLUTION=1280x720
720p/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2560000,RESOLUTION=1920x1080
1080p/index.m3u8
";
        let err = M3u8Parser.parse(master).unwrap_err();
        assert!(matches!(err, DownloadError::Parse { .. }));
    }

    #[test]
    fn empty_or_garbage_input_is_invalid() {
        let empty = "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXT-X-ENDLIST\n";
        let err = M3u8Parser.parse(empty).unwrap_err();
        assert_eq!(err.to_string(), "parse failed, Invalid m3u8 list.");

        let err = M3u8Parser.parse("<html>not a playlist</html>").unwrap_err();
        assert!(matches!(err, DownloadError::Parse { .. }));
    }
}
