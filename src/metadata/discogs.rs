use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::{cache_key, MetadataProvider, ProviderAnswer};

const API_URL: &str = "https://api.discogs.com/database/search";
const USER_AGENT: &str = "VexoMusic/1.0";

/// Proveedor de metadata basado en la API de Discogs.
///
/// Busca el primer release que coincida con "artista - título" y combina
/// sus géneros y estilos como candidatos.
pub struct DiscogsProvider {
    client: reqwest::Client,
    token: String,
    cache: DashMap<String, ProviderAnswer>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    genre: Vec<String>,
    #[serde(default)]
    style: Vec<String>,
    // Discogs devuelve el año como string
    year: Option<String>,
}

impl DiscogsProvider {
    pub fn new(token: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()?;

        info!("💿 DiscogsProvider inicializado con user token");

        Ok(Self {
            client,
            token,
            cache: DashMap::new(),
        })
    }
}

#[async_trait]
impl MetadataProvider for DiscogsProvider {
    fn name(&self) -> &'static str {
        "discogs"
    }

    async fn lookup(&self, artist: &str, title: &str) -> anyhow::Result<ProviderAnswer> {
        let key = cache_key(artist, title);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.clone());
        }

        let query = format!("{artist} - {title}");
        let response = self
            .client
            .get(API_URL)
            .query(&[
                ("q", query.as_str()),
                ("type", "release"),
                ("per_page", "1"),
                ("token", self.token.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<SearchResponse>()
            .await?;

        let Some(release) = response.results.into_iter().next() else {
            debug!("💿 Discogs sin resultados para '{}'", query);
            return Ok(ProviderAnswer::default());
        };

        // Géneros + estilos, deduplicados preservando el orden
        let mut genres: Vec<String> = Vec::new();
        for candidate in release.genre.into_iter().chain(release.style) {
            if !genres.iter().any(|g| g.eq_ignore_ascii_case(&candidate)) {
                genres.push(candidate);
            }
        }

        let year = release.year.and_then(|y| y.parse::<i32>().ok());

        let answer = ProviderAnswer { genres, year };
        if !answer.genres.is_empty() || answer.year.is_some() {
            info!(
                "💿 Discogs encontró para '{}': {:?} ({:?})",
                query, answer.genres, answer.year
            );
            self.cache.insert(key, answer.clone());
        }

        Ok(answer)
    }
}
