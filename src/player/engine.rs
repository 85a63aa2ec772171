use serenity::model::id::GuildId;
use std::sync::Arc;
use tracing::{info, warn};

use super::driver::VoiceConnection;
use super::guild::{PlayerRegistry, PlayerState};
use super::playback;
use super::prefetch::Prefetcher;
use super::queue::{QueueItem, Tier};
use crate::config::Config;
use crate::discovery::Discovery;
use crate::metadata::ConsensusResolver;
use crate::sources::StreamResolver;
use crate::storage::{GuildSettingsStore, SessionStore, TrackStore};

/// Colaboradores compartidos por el loop, el prefetcher y el reaper.
pub struct Services {
    pub config: Arc<Config>,
    pub resolver: Arc<dyn StreamResolver>,
    pub discovery: Arc<dyn Discovery>,
    pub consensus: Arc<ConsensusResolver>,
    pub settings: Arc<dyn GuildSettingsStore>,
    pub tracks: Arc<dyn TrackStore>,
    pub sessions: Arc<dyn SessionStore>,
}

/// Superficie expuesta del motor de reproducción.
///
/// Los command handlers externos encolan y controlan; los colaboradores
/// de estado leen snapshots. Un loop por guild, arrancado de forma
/// perezosa y reiniciado explícitamente por un enqueue futuro.
pub struct PlayerEngine {
    services: Arc<Services>,
    registry: Arc<PlayerRegistry>,
    prefetcher: Arc<Prefetcher>,
}

impl PlayerEngine {
    pub fn new(services: Arc<Services>) -> Self {
        let registry = Arc::new(PlayerRegistry::new(
            services.config.default_autoplay,
            services.config.pre_buffer,
        ));
        let prefetcher = Arc::new(Prefetcher::new(Arc::clone(&services)));

        Self {
            services,
            registry,
            prefetcher,
        }
    }

    pub fn registry(&self) -> Arc<PlayerRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn services(&self) -> Arc<Services> {
        Arc::clone(&self.services)
    }

    /// Encola un item y arranca el loop de la guild si hace falta.
    pub fn enqueue(&self, guild_id: GuildId, item: QueueItem, tier: Tier) {
        let player = self.registry.get_or_create(guild_id);
        info!(
            "➕ Agregado a la cola de {}: {} - {} (tier {:?})",
            guild_id, item.title, item.artist, tier
        );
        player.enqueue(item, tier);
        self.ensure_loop(guild_id);
    }

    /// Asocia la conexión de voz establecida por la capa externa.
    pub fn attach_connection(&self, guild_id: GuildId, conn: Arc<dyn VoiceConnection>) {
        let player = self.registry.get_or_create(guild_id);
        player.set_connection(conn);
        player.touch();
    }

    /// Arranca el loop de reproducción si no hay uno activo.
    ///
    /// Sin conexión no hay loop: los items esperan en cola hasta que la
    /// capa externa conecte y vuelva a llamar aquí (o encole algo más).
    pub fn ensure_loop(&self, guild_id: GuildId) {
        let player = self.registry.get_or_create(guild_id);

        if player.connection().is_none() {
            return;
        }
        if !player.try_begin_loop() {
            return;
        }

        let token = player.begin_loop_token();
        let services = Arc::clone(&self.services);
        let prefetcher = Arc::clone(&self.prefetcher);
        tokio::spawn(playback::run_loop(player, services, prefetcher, token));
    }

    /// Snapshot de solo lectura para colaboradores de estado/analytics.
    pub fn player_state(&self, guild_id: GuildId) -> Option<PlayerState> {
        self.registry.get(guild_id).map(|player| player.snapshot())
    }

    /// Detiene la guild: cancela el loop, drena la cola, cierra la sesión
    /// y libera la conexión. No espera tareas de prefetch/metadata en
    /// vuelo: quedan canceladas por el token del loop.
    pub async fn stop(&self, guild_id: GuildId) {
        let Some(player) = self.registry.get(guild_id) else {
            return;
        };

        player.cancel_loop();

        if let Some(track) = player.take_current_track() {
            track.stop();
        }
        let drained = player.clear_queue();
        player.clear_current();

        if let Some(session_id) = player.take_session_id() {
            if let Err(e) = self.services.sessions.end_session(&session_id).await {
                warn!("⚠️ No se pudo finalizar sesión {}: {:#}", session_id, e);
            }
        }

        if let Some(conn) = player.take_connection() {
            conn.disconnect().await;
        }

        player.end_loop();
        info!(
            "⏹️ Reproducción detenida en guild {} ({} items drenados)",
            guild_id, drained
        );
    }

    /// Salta el track actual. El voto queda registrado para que el
    /// historial lo marque como no completado.
    pub fn skip_current(&self, guild_id: GuildId, voter: Option<u64>) {
        let Some(player) = self.registry.get(guild_id) else {
            return;
        };

        if let Some(user_id) = voter {
            player.add_skip_vote(user_id);
        }

        if let Some(track) = player.current_track() {
            track.stop();
            info!("⏭️ Skip en guild {}", guild_id);
        }
        player.touch();
    }

    pub fn clear_queue(&self, guild_id: GuildId) -> usize {
        match self.registry.get(guild_id) {
            Some(player) => {
                player.touch();
                player.clear_queue()
            }
            None => 0,
        }
    }

    pub fn set_autoplay(&self, guild_id: GuildId, enabled: bool) {
        let player = self.registry.get_or_create(guild_id);
        player.set_autoplay(enabled);
        info!(
            "🎲 Autoplay {} en guild {}",
            if enabled { "activado" } else { "desactivado" },
            guild_id
        );
    }
}
