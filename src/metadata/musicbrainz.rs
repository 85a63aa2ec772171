use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::{cache_key, MetadataProvider, ProviderAnswer};

const API_BASE: &str = "https://musicbrainz.org/ws/2";
// MusicBrainz exige identificar la aplicación
const USER_AGENT: &str = "VexoMusic/1.0 (contact@example.com)";

/// Proveedor de metadata basado en MusicBrainz (ws/2, JSON).
///
/// Combina los tags de la grabación con los del artista: los de la
/// grabación suelen ser escasos y los del artista dan el género amplio.
pub struct MusicBrainzProvider {
    client: reqwest::Client,
    cache: DashMap<String, ProviderAnswer>,
}

#[derive(Debug, Deserialize)]
struct RecordingSearch {
    #[serde(default)]
    recordings: Vec<Recording>,
}

#[derive(Debug, Deserialize)]
struct Recording {
    #[serde(default)]
    tags: Vec<Tag>,
    #[serde(rename = "first-release-date")]
    first_release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArtistSearch {
    #[serde(default)]
    artists: Vec<Artist>,
}

#[derive(Debug, Deserialize)]
struct Artist {
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
struct Tag {
    name: String,
}

impl MusicBrainzProvider {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            cache: DashMap::new(),
        })
    }

    async fn recording(&self, artist: &str, title: &str) -> anyhow::Result<Option<Recording>> {
        let query = format!("artist:\"{artist}\" AND recording:\"{title}\"");
        let response = self
            .client
            .get(format!("{API_BASE}/recording/"))
            .query(&[("query", query.as_str()), ("fmt", "json"), ("limit", "1")])
            .send()
            .await?
            .error_for_status()?
            .json::<RecordingSearch>()
            .await?;
        Ok(response.recordings.into_iter().next())
    }

    async fn artist(&self, artist: &str) -> anyhow::Result<Option<Artist>> {
        let query = format!("artist:\"{artist}\"");
        let response = self
            .client
            .get(format!("{API_BASE}/artist/"))
            .query(&[("query", query.as_str()), ("fmt", "json"), ("limit", "1")])
            .send()
            .await?
            .error_for_status()?
            .json::<ArtistSearch>()
            .await?;
        Ok(response.artists.into_iter().next())
    }

    fn parse_year(date: &str) -> Option<i32> {
        // Formato "YYYY" o "YYYY-MM-DD"
        date.split('-').next()?.parse().ok()
    }
}

#[async_trait]
impl MetadataProvider for MusicBrainzProvider {
    fn name(&self) -> &'static str {
        "musicbrainz"
    }

    async fn lookup(&self, artist: &str, title: &str) -> anyhow::Result<ProviderAnswer> {
        let key = cache_key(artist, title);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.clone());
        }

        let recording = self.recording(artist, title).await?;
        let artist_info = self.artist(artist).await?;

        let mut genres: Vec<String> = Vec::new();
        let recording_tags = recording
            .as_ref()
            .map(|r| r.tags.iter().map(|t| t.name.clone()).collect::<Vec<_>>())
            .unwrap_or_default();
        let artist_tags = artist_info
            .map(|a| a.tags.into_iter().map(|t| t.name).collect::<Vec<_>>())
            .unwrap_or_default();

        // Tags de la grabación primero, luego los del artista, sin duplicar
        for candidate in recording_tags.into_iter().chain(artist_tags) {
            if !genres.iter().any(|g| g.eq_ignore_ascii_case(&candidate)) {
                genres.push(candidate);
            }
        }

        let year = recording
            .and_then(|r| r.first_release_date)
            .as_deref()
            .and_then(Self::parse_year);

        let answer = ProviderAnswer { genres, year };
        if answer.genres.is_empty() && answer.year.is_none() {
            debug!("🧠 MusicBrainz sin datos para '{} - {}'", artist, title);
        } else {
            info!(
                "🧠 MusicBrainz encontró para '{} - {}': {:?} ({:?})",
                artist, title, answer.genres, answer.year
            );
            self.cache.insert(key, answer.clone());
        }

        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_year_from_release_date() {
        assert_eq!(MusicBrainzProvider::parse_year("1984-05-01"), Some(1984));
        assert_eq!(MusicBrainzProvider::parse_year("2001"), Some(2001));
        assert_eq!(MusicBrainzProvider::parse_year(""), None);
        assert_eq!(MusicBrainzProvider::parse_year("not-a-date"), None);
    }
}
