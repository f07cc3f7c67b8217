//! Audio sources: local files and remote URLs.
//!
//! A source is resolved into [`AudioData`] before any worker is spawned so
//! that construction errors surface synchronously to the caller, each with a
//! distinguishable [`InputError`] kind.

use std::fmt;
use std::io::Cursor;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audio::AudioData;
use crate::error::InputError;

/// Timeout for fetching a remote source.
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Location of audio to load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AudioSource {
    /// WAV file on the local filesystem
    Path { path: PathBuf },

    /// WAV file served over HTTP(S)
    Url { url: String },
}

impl AudioSource {
    /// Classifies a user-supplied string as a URL or a path.
    ///
    /// Anything with an `http://` or `https://` prefix is a URL; everything
    /// else is treated as a filesystem path.
    pub fn parse(input: &str) -> Self {
        let lower = input.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::Url {
                url: input.to_string(),
            }
        } else {
            Self::Path {
                path: PathBuf::from(input),
            }
        }
    }

    /// Loads and decodes the source.
    ///
    /// # Errors
    ///
    /// - `InputError::InvalidSource` if the file is missing, the URL is
    ///   malformed or the server answers with a client error
    /// - `InputError::UnreadableFormat` if the bytes are not a WAV stream
    /// - `InputError::Network` if the server cannot be reached in time or
    ///   answers with a server error
    pub async fn load(&self) -> Result<AudioData, InputError> {
        let location = self.to_string();
        let bytes = match self {
            Self::Path { path } => tokio::fs::read(path)
                .await
                .map_err(|e| InputError::invalid_source(&location, e))?,
            Self::Url { url } => fetch(url).await?,
        };
        debug!(source = %location, bytes = bytes.len(), "Decoding audio source");
        AudioData::decode_wav(Cursor::new(bytes), &location)
    }
}

impl fmt::Display for AudioSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path { path } => write!(f, "{}", path.display()),
            Self::Url { url } => write!(f, "{url}"),
        }
    }
}

impl From<PathBuf> for AudioSource {
    fn from(path: PathBuf) -> Self {
        Self::Path { path }
    }
}

impl From<&str> for AudioSource {
    fn from(input: &str) -> Self {
        Self::parse(input)
    }
}

/// Downloads a remote source completely.
async fn fetch(url: &str) -> Result<Vec<u8>, InputError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| InputError::invalid_source(url, e))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(InputError::invalid_source(
            url,
            format!("unsupported scheme '{}'", parsed.scheme()),
        ));
    }

    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|e| InputError::network(url, e))?;

    let response = client.get(parsed).send().await.map_err(|e| {
        if e.is_builder() {
            InputError::invalid_source(url, e)
        } else {
            InputError::network(url, e)
        }
    })?;

    let status = response.status();
    if status.is_client_error() {
        return Err(InputError::invalid_source(url, format!("HTTP {status}")));
    }
    if !status.is_success() {
        return Err(InputError::network(url, format!("HTTP {status}")));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| InputError::network(url, e))?;
    Ok(body.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InputErrorKind;

    #[test]
    fn test_parse_classifies_urls_and_paths() {
        assert_eq!(
            AudioSource::parse("https://example.com/a.wav"),
            AudioSource::Url {
                url: "https://example.com/a.wav".to_string()
            }
        );
        assert_eq!(
            AudioSource::parse("clips/a.wav"),
            AudioSource::Path {
                path: PathBuf::from("clips/a.wav")
            }
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_invalid_source() {
        let source = AudioSource::parse("/definitely/not/here.wav");
        let err = source.load().await.unwrap_err();
        assert_eq!(err.kind(), InputErrorKind::InvalidSource);
    }

    #[tokio::test]
    async fn test_non_wav_file_is_unreadable_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "just text").unwrap();

        let err = AudioSource::from(path).load().await.unwrap_err();
        assert_eq!(err.kind(), InputErrorKind::UnreadableFormat);
    }

    #[tokio::test]
    async fn test_wav_file_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        AudioData::from_mono(vec![0.1; 100], 1000)
            .unwrap()
            .write_wav(&path)
            .unwrap();

        let audio = AudioSource::from(path).load().await.unwrap();
        assert_eq!(audio.frames(), 100);
        assert_eq!(audio.sample_rate(), 1000);
    }

    #[tokio::test]
    async fn test_unreachable_url_is_network_error() {
        // Port 9 (discard) on loopback is closed on test machines.
        let source = AudioSource::parse("http://127.0.0.1:9/clip.wav");
        let err = source.load().await.unwrap_err();
        assert_eq!(err.kind(), InputErrorKind::Network);
    }

    #[test]
    fn test_source_serializes_tagged() {
        let json = serde_json::to_string(&AudioSource::Url {
            url: "http://a/b.wav".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"url","url":"http://a/b.wav"}"#);
    }
}
