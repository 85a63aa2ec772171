use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::engine::Services;
use super::guild::PlayerRegistry;

/// Reaper de sesiones inactivas.
///
/// Recorre todos los players conocidos a intervalo fijo y libera la
/// conexión de los que llevan demasiado tiempo sin actividad. Las guilds
/// marcadas always-on quedan exentas: un player que debería estar
/// descubriendo música nunca se considera inactivo.
pub struct IdleReaper;

impl IdleReaper {
    pub fn spawn(registry: Arc<PlayerRegistry>, services: Arc<Services>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = Duration::from_secs(services.config.idle_check_interval);
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

            info!(
                "💤 Reaper de inactividad activo (cada {}s, umbral {}s)",
                services.config.idle_check_interval, services.config.idle_timeout
            );

            loop {
                interval.tick().await;
                reap_idle_players(&registry, &services).await;
            }
        })
    }
}

/// Una pasada del reaper sobre todos los players.
pub(crate) async fn reap_idle_players(registry: &Arc<PlayerRegistry>, services: &Arc<Services>) {
    let idle_threshold = services.config.idle_timeout as i64;

    for player in registry.all() {
        let Some(conn) = player.connection() else {
            continue;
        };
        if !conn.is_connected().await || player.is_playing() {
            continue;
        }

        let idle_secs = (Utc::now() - player.last_activity()).num_seconds();
        if idle_secs <= idle_threshold {
            continue;
        }

        let settings = services.settings.guild_settings(player.guild_id.get()).await;
        if settings.always_on {
            if player.autoplay() {
                // Siempre descubriendo: refrescar en vez de desconectar
                player.touch();
                debug!("🔁 Guild {} always-on: actividad refrescada", player.guild_id);
            }
            continue;
        }

        info!(
            "💤 Desconectando guild {} por inactividad ({})",
            player.guild_id,
            humantime::format_duration(Duration::from_secs(idle_secs as u64))
        );

        if let Some(session_id) = player.take_session_id() {
            if let Err(e) = services.sessions.end_session(&session_id).await {
                warn!("⚠️ No se pudo finalizar sesión {}: {:#}", session_id, e);
            }
        }

        if let Some(conn) = player.take_connection() {
            conn.disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::testutil::TestWorld;
    use chrono::Duration as ChronoDuration;
    use pretty_assertions::assert_eq;
    use serenity::model::id::GuildId;

    #[tokio::test]
    async fn test_idle_player_is_disconnected_and_session_ended() {
        let world = TestWorld::new();
        let registry = world.registry();
        let player = world.player_with_connection_in(&registry, GuildId::new(1));
        player.set_session_id("sess-1".to_string());
        player.set_last_activity(Utc::now() - ChronoDuration::seconds(400));

        reap_idle_players(&registry, &world.services()).await;

        assert!(player.connection().is_none());
        assert!(world.connection.was_disconnected());
        assert_eq!(world.sessions.ended.lock().clone(), vec!["sess-1".to_string()]);
    }

    #[tokio::test]
    async fn test_always_on_guild_survives_idle_and_refreshes_activity() {
        let world = TestWorld::new();
        world.settings.set_always_on(true);
        let registry = world.registry();
        let player = world.player_with_connection_in(&registry, GuildId::new(1));
        let stale = Utc::now() - ChronoDuration::seconds(400);
        player.set_last_activity(stale);

        reap_idle_players(&registry, &world.services()).await;

        // Sigue conectado y, con autoplay activo, la actividad se refresca
        assert!(player.connection().is_some());
        assert!(!world.connection.was_disconnected());
        assert!(player.last_activity() > stale);
    }

    #[tokio::test]
    async fn test_recently_active_player_is_untouched() {
        let world = TestWorld::new();
        let registry = world.registry();
        let player = world.player_with_connection_in(&registry, GuildId::new(1));
        player.set_last_activity(Utc::now() - ChronoDuration::seconds(30));

        reap_idle_players(&registry, &world.services()).await;

        assert!(player.connection().is_some());
        assert!(!world.connection.was_disconnected());
    }

    #[tokio::test]
    async fn test_playing_guild_is_never_reaped() {
        let world = TestWorld::new();
        let registry = world.registry();
        let player = world.player_with_connection_in(&registry, GuildId::new(1));
        player.set_last_activity(Utc::now() - ChronoDuration::seconds(400));
        assert!(player.try_begin_loop()); // simula un loop activo

        reap_idle_players(&registry, &world.services()).await;

        assert!(player.connection().is_some());
        assert!(!world.connection.was_disconnected());
    }
}
