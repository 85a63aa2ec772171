//! # Metadata Module
//!
//! Multi-source metadata resolution for tracks.
//!
//! Several independent providers (Discogs, MusicBrainz, ...) each return a
//! best-effort `{genres, year}` guess for an (artist, title) pair. The
//! [`consensus`] resolver fans out to all of them concurrently under a
//! single deadline and reconciles the answers by vote, so a slow or broken
//! provider can never stall playback or skew the result on its own.

pub mod consensus;
pub mod discogs;
pub mod musicbrainz;

pub use consensus::ConsensusResolver;

use async_trait::async_trait;

/// Respuesta best-effort de un proveedor.
#[derive(Debug, Clone, Default)]
pub struct ProviderAnswer {
    pub genres: Vec<String>,
    pub year: Option<i32>,
}

/// Voto efímero de una ronda de consenso; no se persiste.
#[derive(Debug, Clone)]
pub struct MetadataVote {
    pub provider: &'static str,
    pub genres: Vec<String>,
    pub year: Option<i32>,
}

/// Un servicio de metadata independiente.
///
/// Puede ser lento o fallar; el consenso trata ambas cosas como
/// abstención, nunca como error de la ronda.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn lookup(&self, artist: &str, title: &str) -> anyhow::Result<ProviderAnswer>;
}

/// Normaliza un nombre de género a una forma de capitalización estable
/// para que los votos de distintos proveedores cuenten juntos.
pub fn normalize_genre(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Clave de caché por consulta (los proveedores cachean por instancia).
pub(crate) fn cache_key(artist: &str, title: &str) -> String {
    format!("{} - {}", artist.to_lowercase(), title.to_lowercase())
}
