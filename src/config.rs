use crate::error::{Error, Result};
use crate::media::hash;
use std::collections::BTreeMap;

/// Video codecs the compressor can target.
pub const VIDEO_CODECS: &[&str] = &["llz"];

pub const DEFAULT_VIDEO_CODEC: &str = "llz";

/// Parameters of one compression run.
#[derive(Debug, Clone)]
pub struct EncodeConfig {
    pub video_codec: String,
    pub codec_options: BTreeMap<String, String>,
    pub hash_name: String,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            video_codec: DEFAULT_VIDEO_CODEC.to_string(),
            codec_options: BTreeMap::new(),
            hash_name: hash::DEFAULT_ALGORITHM.to_string(),
        }
    }
}

impl EncodeConfig {
    pub fn validate(&self) -> Result<()> {
        if !VIDEO_CODECS.contains(&self.video_codec.as_str()) {
            return Err(Error::InvalidInput(format!(
                "invalid or unsupported video codec: {}",
                self.video_codec
            )));
        }
        if !hash::algorithms().contains(&self.hash_name.as_str()) {
            return Err(Error::InvalidInput(format!(
                "invalid hash algorithm: {}",
                self.hash_name
            )));
        }
        Ok(())
    }
}

/// Parses `key=value` codec options. Repeated keys are rejected.
pub fn parse_codec_options(args: &[String]) -> Result<BTreeMap<String, String>> {
    let mut result = BTreeMap::new();
    for arg in args {
        let (key, value) = arg
            .split_once('=')
            .ok_or_else(|| Error::InvalidInput(format!(
                "invalid codec option format (expected key=value): {arg}"
            )))?;
        if key.is_empty() || value.is_empty() {
            return Err(Error::InvalidInput(format!(
                "invalid codec option format (expected key=value): {arg}"
            )));
        }
        if result.insert(key.to_string(), value.to_string()).is_some() {
            return Err(Error::InvalidInput(format!("codec option set more than once: {key}")));
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        EncodeConfig::default().validate().unwrap();
    }

    #[test]
    fn unknown_codec_and_hash_rejected() {
        let mut config = EncodeConfig { video_codec: "h264".into(), ..Default::default() };
        assert!(config.validate().is_err());

        config.video_codec = DEFAULT_VIDEO_CODEC.into();
        config.hash_name = "MD4".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn option_parsing() {
        let options =
            parse_codec_options(&["level=19".to_string(), "filter=rle".to_string()]).unwrap();
        assert_eq!(options.get("level").map(String::as_str), Some("19"));
        assert_eq!(options.get("filter").map(String::as_str), Some("rle"));

        assert!(parse_codec_options(&["level".to_string()]).is_err());
        assert!(parse_codec_options(&["=5".to_string()]).is_err());
        assert!(parse_codec_options(&["level=1".to_string(), "level=2".to_string()]).is_err());
    }
}
