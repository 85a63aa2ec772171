use chrono::{Datelike, Utc};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use super::{normalize_genre, MetadataProvider, MetadataVote};
use crate::player::queue::{SharedItem, TrackOrigin};
use crate::storage::TrackStore;

/// Reconcilia las respuestas de varios proveedores en una sola decisión
/// de género/año por track.
///
/// Todos los proveedores habilitados se consultan en paralelo bajo un
/// deadline global; el que no llega (o falla) se cuenta como abstención.
/// La ronda es idempotente por item vía `metadata_attempted`.
pub struct ConsensusResolver {
    providers: Vec<Arc<dyn MetadataProvider>>,
    deadline: Duration,
    tracks: Arc<dyn TrackStore>,
}

impl ConsensusResolver {
    pub fn new(
        providers: Vec<Arc<dyn MetadataProvider>>,
        deadline_secs: u64,
        tracks: Arc<dyn TrackStore>,
    ) -> Self {
        Self {
            providers,
            deadline: Duration::from_secs(deadline_secs),
            tracks,
        }
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Resuelve género/año para un item compartido, aplicando el
    /// resultado in situ y persistiéndolo en el registro durable.
    ///
    /// Un segundo llamado para el mismo item es un no-op.
    pub async fn resolve_for(&self, item: &SharedItem) {
        let (artist, title, track_id, origin) = {
            let mut it = item.lock();
            if it.metadata_attempted {
                return;
            }
            // La resolución se intenta una sola vez por item, incluso si
            // la ronda no produce respuesta
            it.metadata_attempted = true;

            if it.genre.is_some() && it.year.is_some() {
                debug!("Metadata ya conocida para '{}', sin ronda", it.title);
                return;
            }
            (
                it.artist.clone(),
                it.title.clone(),
                it.track_id.clone(),
                it.origin,
            )
        };

        if self.providers.is_empty() {
            return;
        }

        let votes = self.gather_votes(&artist, &title).await;
        if votes.is_empty() {
            debug!("🎭 Ronda sin votos para '{} - {}'", artist, title);
            return;
        }

        let year_winner = consensus_year(&votes);
        let genre_winner = consensus_genre(&votes);

        // Aplicar al item en vuelo
        let (applied_genre, applied_year) = {
            let mut it = item.lock();

            let mut applied_genre = None;
            if let Some((winner, vote_count)) = &genre_winner {
                let adopt = match &it.genre {
                    None => true,
                    // Política: solo un descubrimiento wildcard de baja
                    // confianza cede su género, y solo ante acuerdo real
                    Some(_) => origin == TrackOrigin::Wildcard && *vote_count > 1,
                };
                if adopt {
                    it.genre = Some(winner.clone());
                    applied_genre = Some(winner.clone());
                }
            }

            let mut applied_year = None;
            if let Some(year) = year_winner {
                if it.year != Some(year) {
                    it.year = Some(year);
                    applied_year = Some(year);
                }
            }

            (applied_genre, applied_year)
        };

        if applied_genre.is_some() || applied_year.is_some() {
            info!(
                "🏷️ Consenso para '{} - {}': genre={:?} year={:?} ({} votos)",
                artist,
                title,
                applied_genre,
                applied_year,
                votes.len()
            );
        }

        // Persistencia best-effort: el resultado en memoria ya está
        // aplicado y una falla de escritura no lo revierte
        if let Some(genre) = &applied_genre {
            if let Err(e) = self
                .tracks
                .set_genres(&track_id, std::slice::from_ref(genre))
                .await
            {
                warn!("⚠️ No se pudo persistir género de {}: {:#}", track_id, e);
            }
        }
        if let Some(year) = applied_year {
            if let Err(e) = self.tracks.update_year(&track_id, year).await {
                warn!("⚠️ No se pudo persistir año de {}: {:#}", track_id, e);
            }
        }
    }

    /// Fan-out concurrente a todos los proveedores bajo un deadline
    /// global. Los que no terminan a tiempo quedan abandonados (la
    /// cancelación es dura: su futuro se descarta, no se espera).
    pub(crate) async fn gather_votes(&self, artist: &str, title: &str) -> Vec<MetadataVote> {
        let deadline = Instant::now() + self.deadline;

        let lookups = self.providers.iter().map(|provider| {
            let provider = Arc::clone(provider);
            let artist = artist.to_string();
            let title = title.to_string();
            async move {
                match timeout_at(deadline, provider.lookup(&artist, &title)).await {
                    Ok(Ok(answer)) => Some(MetadataVote {
                        provider: provider.name(),
                        genres: answer.genres,
                        year: answer.year,
                    }),
                    Ok(Err(e)) => {
                        warn!(
                            "🎭 Proveedor {} falló para '{} - {}': {:#}",
                            provider.name(),
                            artist,
                            title,
                            e
                        );
                        None
                    }
                    Err(_) => {
                        warn!(
                            "⏰ Proveedor {} superó el deadline para '{} - {}'",
                            provider.name(),
                            artist,
                            title
                        );
                        None
                    }
                }
            }
        });

        futures::future::join_all(lookups)
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Año por mayoría entre los votos válidos; un empate lo gana el más
/// antiguo.
pub(crate) fn consensus_year(votes: &[MetadataVote]) -> Option<i32> {
    let max_valid = Utc::now().year() + 1;

    let mut counts: HashMap<i32, usize> = HashMap::new();
    for vote in votes {
        if let Some(year) = vote.year {
            if year > 1900 && year <= max_valid {
                *counts.entry(year).or_default() += 1;
            }
        }
    }

    counts
        .into_iter()
        .max_by_key(|&(year, count)| (count, Reverse(year)))
        .map(|(year, _)| year)
}

/// Género más votado (conteo plano entre todos los proveedores, cada
/// candidato normalizado cuenta un voto). Devuelve también el conteo del
/// ganador para la política de sobreescritura.
pub(crate) fn consensus_genre(votes: &[MetadataVote]) -> Option<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for vote in votes {
        for raw in &vote.genres {
            let genre = normalize_genre(raw);
            if !genre.is_empty() {
                *counts.entry(genre).or_default() += 1;
            }
        }
    }

    counts
        .into_iter()
        .max_by(|(genre_a, count_a), (genre_b, count_b)| {
            count_a.cmp(count_b).then_with(|| genre_b.cmp(genre_a))
        })
}
