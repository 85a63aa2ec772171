use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::driver::{ActiveTrack, VoiceConnection};
use super::engine::Services;
use super::guild::GuildPlayer;
use super::prefetch::Prefetcher;
use super::queue::{SharedItem, TrackOrigin};
use crate::config::Config;
use crate::error::PlaybackError;

/// Resultado de la espera de finalización de un track.
enum CompletionOutcome {
    /// El sink reportó el fin (normal o tras el force-stop del watchdog).
    Finished,
    /// Stop explícito de la guild: el loop debe terminar ya.
    Cancelled,
}

/// Loop principal de reproducción de una guild.
///
/// Máquina de estados: Idle -> Dequeuing -> ResolvingStream -> Playing ->
/// AwaitingCompletion -> Dequeuing..., con salida a Idle cuando la
/// conexión cae o no queda nada que reproducir. Toda falla por item se
/// aísla: se registra y se salta el item, nunca se mata el loop.
pub(crate) async fn run_loop(
    player: Arc<GuildPlayer>,
    services: Arc<Services>,
    prefetcher: Arc<Prefetcher>,
    cancel: CancellationToken,
) {
    debug!("▶️ Loop de reproducción iniciado para guild {}", player.guild_id);

    loop {
        if cancel.is_cancelled() {
            break;
        }

        // La conexión es la condición de vida del loop
        let Some(conn) = player.connection() else { break };
        if !conn.is_connected().await {
            break;
        }

        player.clear_skip_votes();

        // --- Dequeuing ---
        let item = match player.dequeue() {
            Some(item) => item,
            None => {
                // Cola vacía: un intento síncrono de descubrimiento
                // (cubre el primer play y los huecos que dejó el prefetch)
                prefetcher.prepare_next(&player).await;
                match player.dequeue() {
                    Some(item) => item,
                    None => {
                        debug!("📭 Nada disponible en guild {}, loop a Idle", player.guild_id);
                        break;
                    }
                }
            }
        };

        // --- ResolvingStream ---
        let (track_id, title, needs_url) = {
            let it = item.lock();
            (it.track_id.clone(), it.title.clone(), it.stream_url.is_none())
        };
        if needs_url {
            match services.resolver.resolve(&track_id).await {
                Ok(url) => item.lock().stream_url = Some(url),
                Err(e) => {
                    // Un track malo nunca frena la guild: descartar y seguir
                    error!("❌ {} (guild {}): item descartado", e, player.guild_id);
                    continue;
                }
            }
        }
        let Some(stream_url) = item.lock().stream_url.clone() else {
            continue;
        };

        // --- Playing ---
        player.set_current(Arc::clone(&item));
        player.touch();

        let history = log_track_start(&player, &services, &item, &conn).await;

        let active = match conn.play(&title, &stream_url).await {
            Ok(track) => track,
            Err(e) => {
                error!("❌ {} (guild {}): item descartado", e, player.guild_id);
                player.clear_current();
                continue;
            }
        };
        player.set_current_track(Arc::clone(&active));

        {
            let it = item.lock();
            info!(
                "🎵 Reproduciendo en guild {}: {} - {} | {} | {}",
                player.guild_id,
                it.title,
                it.artist,
                it.genre.as_deref().unwrap_or("género desconocido"),
                it.reason.as_deref().unwrap_or_else(|| it.origin.as_str()),
            );
        }

        // Consenso de metadata en paralelo con la reproducción
        {
            let consensus = Arc::clone(&services.consensus);
            let item_bg = Arc::clone(&item);
            player.spawn_tracked(async move {
                consensus.resolve_for(&item_bg).await;
            });
        }
        // Prefetch asíncrono del *siguiente* item, para que su URL esté
        // lista antes de que este termine (objetivo gapless)
        {
            let prefetcher_bg = Arc::clone(&prefetcher);
            let player_bg = Arc::clone(&player);
            player.spawn_tracked(async move {
                prefetcher_bg.prepare_next(&player_bg).await;
            });
        }

        // --- AwaitingCompletion ---
        let duration_seconds = item.lock().duration_seconds;
        let outcome =
            await_completion(&services.config, &active, duration_seconds, &title, &cancel).await;

        if matches!(outcome, CompletionOutcome::Cancelled) {
            // Quien canceló (Stop) es dueño de la limpieza de estado
            break;
        }

        // Registrar el fin en el historial; una falla aquí no afecta nada
        if let Some((session_id, history_id)) = history {
            let completed = !player.has_skip_votes();
            if let Err(e) = services
                .sessions
                .mark_completed(&session_id, history_id, completed)
                .await
            {
                warn!(
                    "⚠️ Fin de '{}' sin registrar: {}",
                    title,
                    PlaybackError::Persistence(e.to_string())
                );
            }
        }

        player.take_current_track();
        player.clear_current();
        player.touch();
    }

    if cancel.is_cancelled() {
        debug!("⏹️ Loop de guild {} cancelado", player.guild_id);
    } else {
        player.take_current_track();
        player.clear_current();
        player.end_loop();
        debug!("💤 Loop de guild {} en Idle", player.guild_id);
    }
}

/// Espera la señal de fin del sink con un watchdog por encima.
///
/// Deadline = duración conocida + margen, o un techo fijo si la duración
/// es desconocida. En modo test el deadline es la duración fija
/// configurada. Si el watchdog vence: force-stop, espera de gracia por la
/// señal normal, y si no llega se sintetiza la finalización para que el
/// loop jamás quede bloqueado.
async fn await_completion(
    config: &Config,
    active: &Arc<dyn ActiveTrack>,
    duration_seconds: Option<u64>,
    title: &str,
    cancel: &CancellationToken,
) -> CompletionOutcome {
    let timeout_secs = if config.test_mode {
        info!("TEST MODE activo: reproduciendo {}s", config.test_playback_duration);
        config.test_playback_duration
    } else {
        duration_seconds.unwrap_or(config.watchdog_fallback) + config.watchdog_margin
    };

    let mut done = active.completion();

    tokio::select! {
        _ = cancel.cancelled() => {
            active.stop();
            CompletionOutcome::Cancelled
        }
        result = tokio::time::timeout(Duration::from_secs(timeout_secs), wait_done(&mut done)) => {
            match result {
                Ok(()) => CompletionOutcome::Finished,
                Err(_) => {
                    if config.test_mode {
                        info!("TEST MODE: límite alcanzado ({}s), saltando...", timeout_secs);
                    } else {
                        warn!(
                            "⏱️ {} - recuperando el loop...",
                            PlaybackError::WatchdogTimeout {
                                title: title.to_string(),
                                timeout_secs,
                            }
                        );
                    }

                    active.stop();

                    // Breve espera por si la señal normal todavía llega
                    let mut done = active.completion();
                    let grace = Duration::from_secs(config.watchdog_grace);
                    if tokio::time::timeout(grace, wait_done(&mut done)).await.is_err() {
                        debug!(
                            "Señal de fin nunca llegó para '{}', finalización sintetizada",
                            title
                        );
                    }
                    CompletionOutcome::Finished
                }
            }
        }
    }
}

async fn wait_done(done: &mut watch::Receiver<bool>) {
    // Err = el emisor fue descartado; también cuenta como finalización
    let _ = done.wait_for(|finished| *finished).await;
}

/// Contabilidad de sesión al arrancar un track. Todas las fallas de
/// persistencia se tragan con log: la reproducción nunca depende de esto.
async fn log_track_start(
    player: &Arc<GuildPlayer>,
    services: &Arc<Services>,
    item: &SharedItem,
    conn: &Arc<dyn VoiceConnection>,
) -> Option<(String, u64)> {
    // 1. Sesión perezosa por guild
    let session_id = match player.session_id() {
        Some(id) => id,
        None => {
            match services
                .sessions
                .create_session(player.guild_id.get(), conn.channel_id())
                .await
            {
                Ok(id) => {
                    player.set_session_id(id.clone());
                    id
                }
                Err(e) => {
                    warn!(
                        "⚠️ No se pudo crear sesión para guild {}: {:#}",
                        player.guild_id, e
                    );
                    return None;
                }
            }
        }
    };

    // 2. Registro durable del track. Las peticiones de usuario son
    // permanentes; lo que trae el descubrimiento queda efímero
    let snapshot = item.lock().clone();
    let is_ephemeral = snapshot.origin != TrackOrigin::UserRequest;
    match services.tracks.get_or_create(&snapshot, is_ephemeral).await {
        Ok(record) => {
            // Un track efímero pedido explícitamente se vuelve permanente
            if !is_ephemeral && record.is_ephemeral {
                if let Err(e) = services.tracks.make_permanent(&record.track_id).await {
                    warn!("⚠️ No se pudo promover '{}': {:#}", record.title, e);
                }
            }

            // Completar metadata faltante desde el registro durable
            let mut it = item.lock();
            if it.year.is_none() {
                it.year = record.year;
            }
            if it.duration_seconds.is_none() {
                it.duration_seconds = record.duration_seconds;
            }
            if it.genre.is_none() {
                it.genre = record.genres.first().cloned();
            }
        }
        Err(e) => warn!("⚠️ No se pudo persistir track '{}': {:#}", snapshot.title, e),
    }

    // 3. Registrar el inicio de reproducción
    let snapshot = item.lock().clone();
    match services.sessions.log_track_start(&session_id, &snapshot).await {
        Ok(history_id) => Some((session_id, history_id)),
        Err(e) => {
            warn!("⚠️ No se pudo registrar inicio de '{}': {:#}", snapshot.title, e);
            None
        }
    }
}
