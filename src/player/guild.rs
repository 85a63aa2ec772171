use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::GuildId;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::driver::{ActiveTrack, VoiceConnection};
use super::queue::{PlaybackQueue, QueueItem, SharedItem, Tier};

/// Estado mutable de reproducción de una guild.
///
/// El loop de la guild es el único escritor de `current`/`is_playing`;
/// el resto de los campos se tocan con secciones críticas cortas que
/// nunca cruzan un await.
pub struct GuildPlayer {
    pub guild_id: GuildId,
    queue: Mutex<PlaybackQueue>,
    current: Mutex<Option<SharedItem>>,
    current_track: Mutex<Option<Arc<dyn ActiveTrack>>>,
    conn: Mutex<Option<Arc<dyn VoiceConnection>>>,
    session_id: Mutex<Option<String>>,
    is_playing: AtomicBool,
    autoplay: AtomicBool,
    pre_buffer: AtomicBool,
    last_activity: Mutex<DateTime<Utc>>,
    skip_votes: Mutex<HashSet<u64>>,
    loop_cancel: Mutex<CancellationToken>,
    tasks: TaskTracker,
}

impl GuildPlayer {
    pub fn new(guild_id: GuildId, autoplay: bool, pre_buffer: bool) -> Self {
        Self {
            guild_id,
            queue: Mutex::new(PlaybackQueue::new()),
            current: Mutex::new(None),
            current_track: Mutex::new(None),
            conn: Mutex::new(None),
            session_id: Mutex::new(None),
            is_playing: AtomicBool::new(false),
            autoplay: AtomicBool::new(autoplay),
            pre_buffer: AtomicBool::new(pre_buffer),
            last_activity: Mutex::new(Utc::now()),
            skip_votes: Mutex::new(HashSet::new()),
            loop_cancel: Mutex::new(CancellationToken::new()),
            tasks: TaskTracker::new(),
        }
    }

    // ---------- Cola ----------

    pub fn enqueue(&self, item: QueueItem, tier: Tier) -> SharedItem {
        self.touch();
        self.queue.lock().enqueue(item, tier)
    }

    pub fn dequeue(&self) -> Option<SharedItem> {
        self.queue.lock().dequeue()
    }

    pub fn peek_head(&self) -> Option<SharedItem> {
        self.queue.lock().peek_head()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn queue_is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn clear_queue(&self) -> usize {
        self.queue.lock().clear()
    }

    // ---------- Track actual ----------

    pub fn set_current(&self, item: SharedItem) {
        *self.current.lock() = Some(item);
    }

    pub fn clear_current(&self) {
        *self.current.lock() = None;
    }

    pub fn set_current_track(&self, track: Arc<dyn ActiveTrack>) {
        *self.current_track.lock() = Some(track);
    }

    pub fn take_current_track(&self) -> Option<Arc<dyn ActiveTrack>> {
        self.current_track.lock().take()
    }

    pub fn current_track(&self) -> Option<Arc<dyn ActiveTrack>> {
        self.current_track.lock().clone()
    }

    // ---------- Conexión ----------

    pub fn set_connection(&self, conn: Arc<dyn VoiceConnection>) {
        *self.conn.lock() = Some(conn);
    }

    pub fn connection(&self) -> Option<Arc<dyn VoiceConnection>> {
        self.conn.lock().clone()
    }

    pub fn take_connection(&self) -> Option<Arc<dyn VoiceConnection>> {
        self.conn.lock().take()
    }

    // ---------- Sesión ----------

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    pub fn set_session_id(&self, id: String) {
        *self.session_id.lock() = Some(id);
    }

    pub fn take_session_id(&self) -> Option<String> {
        self.session_id.lock().take()
    }

    // ---------- Flags ----------

    pub fn is_playing(&self) -> bool {
        self.is_playing.load(Ordering::SeqCst)
    }

    /// Reserva el loop de la guild; `false` si ya hay uno corriendo.
    /// Garantiza como máximo un loop activo por guild.
    pub fn try_begin_loop(&self) -> bool {
        self.is_playing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn end_loop(&self) {
        self.is_playing.store(false, Ordering::SeqCst);
    }

    pub fn autoplay(&self) -> bool {
        self.autoplay.load(Ordering::SeqCst)
    }

    pub fn set_autoplay(&self, enabled: bool) {
        self.autoplay.store(enabled, Ordering::SeqCst);
    }

    pub fn pre_buffer(&self) -> bool {
        self.pre_buffer.load(Ordering::SeqCst)
    }

    // ---------- Actividad ----------

    pub fn touch(&self) {
        *self.last_activity.lock() = Utc::now();
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.lock()
    }

    #[cfg(test)]
    pub(crate) fn set_last_activity(&self, at: DateTime<Utc>) {
        *self.last_activity.lock() = at;
    }

    // ---------- Votos de skip ----------

    pub fn clear_skip_votes(&self) {
        self.skip_votes.lock().clear();
    }

    pub fn add_skip_vote(&self, user_id: u64) {
        self.skip_votes.lock().insert(user_id);
    }

    pub fn has_skip_votes(&self) -> bool {
        !self.skip_votes.lock().is_empty()
    }

    // ---------- Tareas del loop ----------

    /// Token fresco para una nueva corrida del loop; cancela implícitamente
    /// nada (el anterior ya fue cancelado por `cancel_loop`).
    pub fn begin_loop_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.loop_cancel.lock() = token.clone();
        token
    }

    pub fn cancel_loop(&self) {
        self.loop_cancel.lock().cancel();
    }

    pub fn loop_token(&self) -> CancellationToken {
        self.loop_cancel.lock().clone()
    }

    /// Lanza una tarea de fondo (prefetch, consenso) atada al teardown de
    /// la guild: se cancela con el token del loop y queda registrada en el
    /// tracker en vez de ser fire-and-forget.
    pub fn spawn_tracked<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.loop_token();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = fut => {}
            }
        });
    }

    /// Snapshot de solo lectura, eventualmente consistente.
    pub fn snapshot(&self) -> PlayerState {
        PlayerState {
            guild_id: self.guild_id.get(),
            current: self.current.lock().as_ref().map(|item| item.lock().clone()),
            queue_len: self.queue_len(),
            is_playing: self.is_playing(),
            autoplay: self.autoplay(),
        }
    }
}

/// Snapshot consistente del estado de un player para colaboradores de
/// estado/analytics. El item actual puede cambiar concurrentemente; esto
/// es una copia.
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub guild_id: u64,
    pub current: Option<QueueItem>,
    pub queue_len: usize,
    pub is_playing: bool,
    pub autoplay: bool,
}

/// Registro de players por guild, creados de forma perezosa.
pub struct PlayerRegistry {
    players: DashMap<GuildId, Arc<GuildPlayer>>,
    default_autoplay: bool,
    default_pre_buffer: bool,
}

impl PlayerRegistry {
    pub fn new(default_autoplay: bool, default_pre_buffer: bool) -> Self {
        Self {
            players: DashMap::new(),
            default_autoplay,
            default_pre_buffer,
        }
    }

    pub fn get_or_create(&self, guild_id: GuildId) -> Arc<GuildPlayer> {
        self.players
            .entry(guild_id)
            .or_insert_with(|| {
                Arc::new(GuildPlayer::new(
                    guild_id,
                    self.default_autoplay,
                    self.default_pre_buffer,
                ))
            })
            .clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<GuildPlayer>> {
        self.players.get(&guild_id).map(|p| p.clone())
    }

    /// Copia de todos los players conocidos (para el reaper).
    pub fn all(&self) -> Vec<Arc<GuildPlayer>> {
        self.players.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Elimina el player al salir de una guild.
    pub fn remove(&self, guild_id: GuildId) -> Option<Arc<GuildPlayer>> {
        self.players.remove(&guild_id).map(|(_, player)| player)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
