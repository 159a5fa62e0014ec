//! Master playlist structures.
//!
//! The media playlists themselves (segment lists) are written by the
//! transcoding subprocess; this module only models the master playlist
//! tying renditions, audio groups, and subtitle groups together.

use std::fmt::Write;

/// Parse a bitrate string like "2500k" into bits per second.
pub fn parse_bitrate(bitrate: &str) -> u32 {
    let digits: String = bitrate.chars().take_while(|c| c.is_ascii_digit()).collect();
    match digits.parse::<u32>() {
        Ok(value) if bitrate[digits.len()..].eq_ignore_ascii_case("k") => value * 1000,
        Ok(value) if digits.len() == bitrate.len() => value,
        _ => 0,
    }
}

/// One `#EXT-X-STREAM-INF` entry.
#[derive(Debug, Clone)]
pub struct VariantStream {
    /// Quality label (e.g. "720p").
    pub name: String,
    /// Media playlist URI, relative to the master playlist.
    pub uri: String,
    /// Estimated peak bandwidth in bits per second.
    pub bandwidth: u32,
    pub width: u32,
    pub height: u32,
    /// Audio group id referenced by this variant, if any.
    pub audio_group: Option<String>,
    /// Subtitle group id referenced by this variant, if any.
    pub subtitle_group: Option<String>,
}

/// One `#EXT-X-MEDIA` entry in an audio or subtitle group.
#[derive(Debug, Clone)]
pub struct MediaGroupEntry {
    pub group_id: String,
    pub name: String,
    pub language: String,
    pub default: bool,
    pub uri: String,
}

/// Master playlist listing renditions and media groups.
#[derive(Debug, Clone, Default)]
pub struct MasterPlaylist {
    pub variants: Vec<VariantStream>,
    pub audio: Vec<MediaGroupEntry>,
    pub subtitles: Vec<MediaGroupEntry>,
}

impl MasterPlaylist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_variant(mut self, variant: VariantStream) -> Self {
        self.variants.push(variant);
        self
    }

    pub fn add_audio(mut self, entry: MediaGroupEntry) -> Self {
        self.audio.push(entry);
        self
    }

    pub fn add_subtitle(mut self, entry: MediaGroupEntry) -> Self {
        self.subtitles.push(entry);
        self
    }

    /// Render to M3U8 string. Variants are emitted in the order given.
    pub fn render(&self) -> String {
        let mut out = String::new();

        writeln!(out, "#EXTM3U").unwrap();
        writeln!(out, "#EXT-X-VERSION:3").unwrap();
        writeln!(out).unwrap();

        for variant in &self.variants {
            write!(
                out,
                "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}",
                variant.bandwidth, variant.width, variant.height
            )
            .unwrap();
            if !variant.name.is_empty() {
                write!(out, ",NAME=\"{}\"", variant.name).unwrap();
            }
            if let Some(ref group) = variant.audio_group {
                write!(out, ",AUDIO=\"{}\"", group).unwrap();
            }
            if let Some(ref group) = variant.subtitle_group {
                write!(out, ",SUBTITLES=\"{}\"", group).unwrap();
            }
            writeln!(out).unwrap();
            writeln!(out, "{}", variant.uri).unwrap();
            writeln!(out).unwrap();
        }

        for entry in &self.audio {
            writeln!(
                out,
                "#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"{}\",NAME=\"{}\",LANGUAGE=\"{}\",DEFAULT={},AUTOSELECT=YES,URI=\"{}\"",
                entry.group_id,
                entry.name,
                entry.language,
                if entry.default { "YES" } else { "NO" },
                entry.uri
            )
            .unwrap();
        }

        for entry in &self.subtitles {
            writeln!(
                out,
                "#EXT-X-MEDIA:TYPE=SUBTITLES,GROUP-ID=\"{}\",NAME=\"{}\",LANGUAGE=\"{}\",DEFAULT={},AUTOSELECT=YES,FORCED=NO,URI=\"{}\"",
                entry.group_id,
                entry.name,
                entry.language,
                if entry.default { "YES" } else { "NO" },
                entry.uri
            )
            .unwrap();
        }

        out
    }
}
