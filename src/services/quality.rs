//! Release quality model
//!
//! Qualities are ordered: a higher variant is always a better release.
//! Resolution dominates, source breaks ties within a resolution.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Parsed quality of a release or downloaded file
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    #[default]
    Unknown,
    SdTv,
    SdDvd,
    HdTv,
    HdWebDl,
    HdBluRay,
    FullHdTv,
    FullHdWebDl,
    FullHdBluRay,
    UhdTv,
    UhdWebDl,
    UhdBluRay,
}

/// Video source detected in a release name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Tv,
    Dvd,
    Web,
    BluRay,
}

impl Quality {
    /// Numeric rank used by the selector (higher = better)
    pub fn rank(self) -> u8 {
        self as u8
    }

    /// Detect quality from a scene release name
    pub fn from_release_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        let tokens: Vec<&str> = lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        let has = |needle: &str| tokens.iter().any(|t| *t == needle);

        let resolution = if has("2160p") || has("4k") || has("uhd") {
            Some(2160)
        } else if has("1080p") || has("1080i") {
            Some(1080)
        } else if has("720p") {
            Some(720)
        } else if has("480p") || has("576p") {
            Some(480)
        } else {
            None
        };

        let source = if has("bluray") || has("bdrip") || has("brrip") || lower.contains("blu-ray")
        {
            Some(Source::BluRay)
        } else if has("webdl")
            || has("webrip")
            || has("web")
            || has("amzn")
            || has("nf")
            || lower.contains("web-dl")
        {
            Some(Source::Web)
        } else if has("dvdrip") || has("dvd") {
            Some(Source::Dvd)
        } else if has("hdtv") || has("pdtv") || has("dsr") || has("tvrip") || has("xvid") {
            Some(Source::Tv)
        } else {
            None
        };

        match (resolution, source) {
            (Some(2160), Some(Source::BluRay)) => Quality::UhdBluRay,
            (Some(2160), Some(Source::Web)) => Quality::UhdWebDl,
            (Some(2160), _) => Quality::UhdTv,
            (Some(1080), Some(Source::BluRay)) => Quality::FullHdBluRay,
            (Some(1080), Some(Source::Web)) => Quality::FullHdWebDl,
            (Some(1080), _) => Quality::FullHdTv,
            (Some(720), Some(Source::BluRay)) => Quality::HdBluRay,
            (Some(720), Some(Source::Web)) => Quality::HdWebDl,
            (Some(720), _) => Quality::HdTv,
            (_, Some(Source::Dvd)) | (_, Some(Source::BluRay)) => Quality::SdDvd,
            (Some(_), _) | (None, Some(_)) => Quality::SdTv,
            (None, None) => Quality::Unknown,
        }
    }

    /// All 720p variants
    pub fn hd() -> Vec<Quality> {
        vec![Quality::HdTv, Quality::HdWebDl, Quality::HdBluRay]
    }

    /// All 1080p variants
    pub fn full_hd() -> Vec<Quality> {
        vec![Quality::FullHdTv, Quality::FullHdWebDl, Quality::FullHdBluRay]
    }

    /// All standard definition variants
    pub fn sd() -> Vec<Quality> {
        vec![Quality::SdTv, Quality::SdDvd]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Unknown => "unknown",
            Quality::SdTv => "sd_tv",
            Quality::SdDvd => "sd_dvd",
            Quality::HdTv => "hd_tv",
            Quality::HdWebDl => "hd_web_dl",
            Quality::HdBluRay => "hd_blu_ray",
            Quality::FullHdTv => "full_hd_tv",
            Quality::FullHdWebDl => "full_hd_web_dl",
            Quality::FullHdBluRay => "full_hd_blu_ray",
            Quality::UhdTv => "uhd_tv",
            Quality::UhdWebDl => "uhd_web_dl",
            Quality::UhdBluRay => "uhd_blu_ray",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Quality::Unknown => "Unknown",
            Quality::SdTv => "SD TV",
            Quality::SdDvd => "SD DVD",
            Quality::HdTv => "720p HDTV",
            Quality::HdWebDl => "720p WEB-DL",
            Quality::HdBluRay => "720p BluRay",
            Quality::FullHdTv => "1080p HDTV",
            Quality::FullHdWebDl => "1080p WEB-DL",
            Quality::FullHdBluRay => "1080p BluRay",
            Quality::UhdTv => "2160p TV",
            Quality::UhdWebDl => "2160p WEB-DL",
            Quality::UhdBluRay => "2160p BluRay",
        };
        f.write_str(label)
    }
}

impl FromStr for Quality {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let all = [
            Quality::Unknown,
            Quality::SdTv,
            Quality::SdDvd,
            Quality::HdTv,
            Quality::HdWebDl,
            Quality::HdBluRay,
            Quality::FullHdTv,
            Quality::FullHdWebDl,
            Quality::FullHdBluRay,
            Quality::UhdTv,
            Quality::UhdWebDl,
            Quality::UhdBluRay,
        ];
        let wanted = s.trim().to_lowercase();
        all.into_iter()
            .find(|q| q.as_str() == wanted || q.to_string().to_lowercase() == wanted)
            .ok_or_else(|| anyhow::anyhow!("Unknown quality: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_from_release_name() {
        assert_eq!(
            Quality::from_release_name("Dexter.S05E07.720p.BluRay.X264-REWARD"),
            Quality::HdBluRay
        );
        assert_eq!(
            Quality::from_release_name("Dexter.S05E07.720p.X264-REWARD"),
            Quality::HdTv
        );
        assert_eq!(
            Quality::from_release_name("Show.S01E01.1080p.WEB-DL.DD5.1.H.264-GROUP"),
            Quality::FullHdWebDl
        );
        assert_eq!(
            Quality::from_release_name("Hells.Kitchen.S06E14.HDTV.XviD-ASAP"),
            Quality::SdTv
        );
        assert_eq!(
            Quality::from_release_name("Show.S02E03.2160p.AMZN.WEB-DL.DDP5.1.HEVC-NTb"),
            Quality::UhdWebDl
        );
        assert_eq!(Quality::from_release_name("Show.S01E01-GROUP"), Quality::Unknown);
    }

    #[test]
    fn test_quality_ordering() {
        assert!(Quality::FullHdWebDl > Quality::HdBluRay);
        assert!(Quality::HdTv > Quality::SdDvd);
        assert!(Quality::Unknown < Quality::SdTv);
        assert!(Quality::UhdBluRay.rank() > Quality::FullHdBluRay.rank());
    }

    #[test]
    fn test_quality_round_trips_through_str() {
        assert_eq!("hd_web_dl".parse::<Quality>().unwrap(), Quality::HdWebDl);
        assert_eq!("1080p BluRay".parse::<Quality>().unwrap(), Quality::FullHdBluRay);
        assert!("8k".parse::<Quality>().is_err());
    }
}
