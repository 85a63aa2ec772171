use std::sync::Arc;
use tracing::{debug, info};

use super::engine::Services;
use super::guild::GuildPlayer;
use super::queue::{QueueItem, Tier};

/// Mantiene la cola sin hambruna y la reproducción sin huecos.
///
/// Se invoca tanto de forma ansiosa (cola vacía) como justo después de
/// arrancar un track (para el *siguiente* item). Varias invocaciones
/// pueden competir sin daño: una vez que `stream_url` y
/// `metadata_attempted` están puestos, los pasos son no-ops.
pub struct Prefetcher {
    services: Arc<Services>,
}

impl Prefetcher {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    pub async fn prepare_next(&self, player: &Arc<GuildPlayer>) {
        self.refill_from_discovery(player).await;
        self.prime_head(player).await;
    }

    /// Si la cola está vacía y el autoplay está activo, pide hasta 3
    /// candidatos al motor de descubrimiento y encola el primero que pase
    /// el filtro de duración de la guild.
    async fn refill_from_discovery(&self, player: &Arc<GuildPlayer>) {
        if !player.queue_is_empty() || !player.autoplay() {
            return;
        }

        let Some(conn) = player.connection() else {
            return;
        };
        let listeners = conn.listeners();
        if listeners.is_empty() {
            debug!("Sin oyentes en guild {}, descubrimiento omitido", player.guild_id);
            return;
        }

        let guild_id = player.guild_id.get();
        let settings = self.services.settings.guild_settings(guild_id).await;
        let max_seconds = settings.max_song_duration;

        info!("🔎 Descubrimiento proactivo para guild {}", guild_id);

        for _ in 0..3 {
            let Some(discovered) = self
                .services
                .discovery
                .next_song(
                    guild_id,
                    &listeners,
                    settings.discovery_weights.as_deref(),
                    settings.replay_cooldown,
                )
                .await
            else {
                break;
            };

            if max_seconds > 0
                && discovered
                    .duration_seconds
                    .map_or(false, |d| d > max_seconds)
            {
                info!(
                    "⏭️ Candidato '{}' descartado por duración ({}s > {}s)",
                    discovered.title,
                    discovered.duration_seconds.unwrap_or(0),
                    max_seconds
                );
                continue;
            }

            let title = discovered.title.clone();
            let artist = discovered.artist.clone();
            let strategy = discovered.origin.as_str();
            let item: QueueItem = discovered.into();
            player.enqueue(item, Tier::Autoplay);

            info!(
                "⏭️ Próxima canción confirmada para guild {}: {} - {} | estrategia: {}",
                guild_id, title, artist, strategy
            );
            break;
        }
    }

    /// Resuelve la URL de stream del primer item de la cola si falta.
    ///
    /// Esto sucede incondicionalmente (independiente del toggle
    /// `pre_buffer` de bajo consumo): la garantía de cara al usuario es
    /// "sin hueco para el siguiente track inmediato".
    async fn prime_head(&self, player: &Arc<GuildPlayer>) {
        let Some(head) = player.peek_head() else {
            return;
        };

        let (track_id, title, needs_url) = {
            let it = head.lock();
            (it.track_id.clone(), it.title.clone(), it.stream_url.is_none())
        };
        if !needs_url {
            return;
        }

        match self.services.resolver.resolve(&track_id).await {
            Ok(url) => {
                {
                    let mut it = head.lock();
                    if it.stream_url.is_none() {
                        it.stream_url = Some(url);
                    }
                }
                debug!("Gapless pre-fetch: URL lista para '{}'", title);

                // Recién resuelta la URL, disparar también el consenso de
                // metadata para que género/año ya estén cuando suene
                let consensus = Arc::clone(&self.services.consensus);
                let head = Arc::clone(&head);
                player.spawn_tracked(async move {
                    consensus.resolve_for(&head).await;
                });
            }
            Err(e) => {
                debug!("Pre-fetch falló para '{}': {}", title, e);
            }
        }
    }
}
