//! Format profiles: the named target renditions a job produces.
//!
//! A [`FormatProfile`] is pure data. A [`ProfileSet`] is a validated,
//! non-empty list of profiles with unique names, shared read-only across
//! all jobs.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One target rendition: a name plus the encode parameters for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatProfile {
    /// Profile name, also used as the output file stem (e.g. "720p").
    pub name: String,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Video encoder passed to ffmpeg.
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    /// Encoder preset.
    #[serde(default = "default_preset")]
    pub preset: String,
    /// Constant rate factor. When unset (and no bitrate is set) the runner
    /// picks one adaptively from the output height.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crf: Option<u32>,
    /// Target video bitrate (e.g. "2500k"); takes precedence over CRF.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_bitrate: Option<String>,
    /// Audio bitrate.
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    /// Output container / file extension.
    #[serde(default = "default_container")]
    pub container: String,
    /// Per-task deadline override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_video_codec() -> String {
    "libx264".into()
}

fn default_preset() -> String {
    "veryfast".into()
}

fn default_audio_bitrate() -> String {
    "128k".into()
}

fn default_container() -> String {
    "mp4".into()
}

impl FormatProfile {
    /// Create a profile with default codec settings.
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            video_codec: default_video_codec(),
            preset: default_preset(),
            crf: None,
            video_bitrate: None,
            audio_bitrate: default_audio_bitrate(),
            container: default_container(),
            timeout_secs: None,
        }
    }

    /// Output dimensions in ffmpeg `WxH` form.
    pub fn size(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    /// The output file name for this profile (`<name>.<container>`).
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.name, self.container)
    }

    /// Check that the profile can be turned into a safe, unique output path
    /// and a sane encoder invocation.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::invalid_input("profile name must not be empty"));
        }
        let safe = self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !safe || self.name.starts_with('.') {
            return Err(Error::invalid_input(format!(
                "profile name {:?} must be alphanumeric, '-', '_' or '.'",
                self.name
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(Error::invalid_input(format!(
                "profile {} has zero dimension {}",
                self.name,
                self.size()
            )));
        }
        if self.container.is_empty() || !self.container.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::invalid_input(format!(
                "profile {} has invalid container {:?}",
                self.name, self.container
            )));
        }
        Ok(())
    }
}

/// A validated, ordered, non-empty list of profiles with unique names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ProfileSet(Vec<FormatProfile>);

impl ProfileSet {
    /// Validate and wrap a list of profiles.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] if the list is empty, a profile is invalid,
    /// or two profiles share a name.
    pub fn new(profiles: Vec<FormatProfile>) -> Result<Self> {
        if profiles.is_empty() {
            return Err(Error::invalid_input("at least one profile is required"));
        }
        for (i, profile) in profiles.iter().enumerate() {
            profile.validate()?;
            if profiles[..i].iter().any(|p| p.name == profile.name) {
                return Err(Error::invalid_input(format!(
                    "duplicate profile name {:?}",
                    profile.name
                )));
            }
        }
        Ok(Self(profiles))
    }

    /// The standard 360p / 720p / 1080p ladder.
    pub fn standard() -> Self {
        Self(vec![
            FormatProfile::new("360p", 640, 360),
            FormatProfile::new("720p", 1280, 720),
            FormatProfile::new("1080p", 1920, 1080),
        ])
    }

    /// Keep only the named profiles, in the order they appear in this set.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] if a name is unknown or nothing is selected.
    pub fn select(&self, names: &[String]) -> Result<Self> {
        if let Some(unknown) = names.iter().find(|n| self.get(n).is_none()) {
            return Err(Error::invalid_input(format!("unknown profile {unknown:?}")));
        }
        let selected = self
            .0
            .iter()
            .filter(|p| names.contains(&p.name))
            .cloned()
            .collect();
        Self::new(selected)
    }

    /// Look up a profile by name.
    pub fn get(&self, name: &str) -> Option<&FormatProfile> {
        self.0.iter().find(|p| p.name == name)
    }

    /// Iterate over the profiles in order.
    pub fn iter(&self) -> impl Iterator<Item = &FormatProfile> {
        self.0.iter()
    }

    /// Number of profiles.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`; a set is never empty. Present for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the profiles as a slice.
    pub fn as_slice(&self) -> &[FormatProfile] {
        &self.0
    }
}

impl Default for ProfileSet {
    fn default() -> Self {
        Self::standard()
    }
}

impl<'de> Deserialize<'de> for ProfileSet {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let profiles = Vec::<FormatProfile>::deserialize(deserializer)?;
        ProfileSet::new(profiles).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn standard_ladder() {
        let set = ProfileSet::standard();
        let names: Vec<&str> = set.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["360p", "720p", "1080p"]);
        assert_eq!(set.get("720p").unwrap().size(), "1280x720");
    }

    #[test]
    fn empty_set_rejected() {
        assert_matches!(ProfileSet::new(vec![]), Err(Error::InvalidInput(_)));
    }

    #[test]
    fn duplicate_names_rejected() {
        let result = ProfileSet::new(vec![
            FormatProfile::new("720p", 1280, 720),
            FormatProfile::new("720p", 1280, 720),
        ]);
        assert_matches!(result, Err(Error::InvalidInput(msg)) if msg.contains("duplicate"));
    }

    #[test]
    fn unsafe_name_rejected() {
        let profile = FormatProfile::new("../etc", 640, 360);
        assert!(profile.validate().is_err());
        let profile = FormatProfile::new("a/b", 640, 360);
        assert!(profile.validate().is_err());
    }

    #[test]
    fn zero_dimension_rejected() {
        assert!(FormatProfile::new("bad", 0, 360).validate().is_err());
    }

    #[test]
    fn select_keeps_set_order() {
        let set = ProfileSet::standard();
        let selected = set
            .select(&["1080p".to_string(), "360p".to_string()])
            .unwrap();
        let names: Vec<&str> = selected.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["360p", "1080p"]);
    }

    #[test]
    fn select_unknown_rejected() {
        let set = ProfileSet::standard();
        assert_matches!(set.select(&["4k".to_string()]), Err(Error::InvalidInput(_)));
    }

    #[test]
    fn deserialize_applies_defaults_and_validation() {
        let json = r#"[{"name": "480p", "width": 854, "height": 480}]"#;
        let set: ProfileSet = serde_json::from_str(json).unwrap();
        let p = set.get("480p").unwrap();
        assert_eq!(p.video_codec, "libx264");
        assert_eq!(p.container, "mp4");
        assert_eq!(p.file_name(), "480p.mp4");

        assert!(serde_json::from_str::<ProfileSet>("[]").is_err());
    }
}
