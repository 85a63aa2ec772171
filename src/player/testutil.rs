//! Fakes en memoria para los tests del player.
//!
//! Las señales de finalización se modelan con los mismos primitivos de
//! `tokio::sync` que usa el driver real, así los tests ejercitan el loop
//! de verdad en vez de un mock de su interfaz.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serenity::model::id::GuildId;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use super::driver::{ActiveTrack, VoiceConnection};
use super::engine::Services;
use super::guild::{GuildPlayer, PlayerRegistry};
use crate::config::Config;
use crate::discovery::{DiscoveredTrack, Discovery};
use crate::error::PlaybackError;
use crate::metadata::ConsensusResolver;
use crate::player::queue::{QueueItem, TrackOrigin};
use crate::sources::StreamResolver;
use crate::storage::{
    GuildSettings, GuildSettingsStore, SessionStore, TrackRecord, TrackStore,
};

// ---------- Sink de audio ----------

pub(crate) struct FakeTrack {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
    stopped: AtomicBool,
    complete_on_stop: bool,
}

impl FakeTrack {
    fn new(complete_on_stop: bool) -> Arc<Self> {
        let (tx, rx) = watch::channel(false);
        Arc::new(Self {
            tx: Arc::new(tx),
            rx,
            stopped: AtomicBool::new(false),
            complete_on_stop,
        })
    }

    pub fn finish(&self) {
        let _ = self.tx.send(true);
    }

    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl ActiveTrack for FakeTrack {
    fn completion(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if self.complete_on_stop {
            self.finish();
        }
    }
}

pub(crate) struct FakeConnection {
    connected: AtomicBool,
    disconnected: AtomicBool,
    listeners: RwLock<Vec<u64>>,
    pub played: Mutex<Vec<String>>,
    pub tracks: Mutex<Vec<Arc<FakeTrack>>>,
    auto_complete: AtomicBool,
    complete_on_stop: AtomicBool,
    max_plays_while_connected: AtomicUsize,
}

impl FakeConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
            disconnected: AtomicBool::new(false),
            listeners: RwLock::new(vec![1]),
            played: Mutex::new(Vec::new()),
            tracks: Mutex::new(Vec::new()),
            auto_complete: AtomicBool::new(false),
            complete_on_stop: AtomicBool::new(false),
            max_plays_while_connected: AtomicUsize::new(usize::MAX),
        })
    }

    pub fn set_listeners(&self, ids: Vec<u64>) {
        *self.listeners.write() = ids;
    }

    /// Los tracks terminan apenas arrancan (canciones instantáneas).
    pub fn set_auto_complete(&self, enabled: bool) {
        self.auto_complete.store(enabled, Ordering::SeqCst);
    }

    /// `stop()` dispara la señal de fin, como el sink real al saltar.
    pub fn set_complete_on_stop(&self, enabled: bool) {
        self.complete_on_stop.store(enabled, Ordering::SeqCst);
    }

    /// La conexión "se cae" después de n reproducciones.
    pub fn set_max_plays_while_connected(&self, max: usize) {
        self.max_plays_while_connected.store(max, Ordering::SeqCst);
    }

    pub fn was_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceConnection for FakeConnection {
    async fn play(
        &self,
        _title: &str,
        stream_url: &str,
    ) -> Result<Arc<dyn ActiveTrack>, PlaybackError> {
        let track = FakeTrack::new(self.complete_on_stop.load(Ordering::SeqCst));
        if self.auto_complete.load(Ordering::SeqCst) {
            track.finish();
        }
        self.played.lock().push(stream_url.to_string());
        self.tracks.lock().push(Arc::clone(&track));
        Ok(track)
    }

    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
            && self.played.lock().len() < self.max_plays_while_connected.load(Ordering::SeqCst)
    }

    fn channel_id(&self) -> Option<u64> {
        Some(99)
    }

    fn listeners(&self) -> Vec<u64> {
        self.listeners.read().clone()
    }
}

// ---------- Resolver de streams ----------

pub(crate) struct FakeResolver {
    urls: Mutex<HashMap<String, String>>,
    pub calls: AtomicUsize,
}

impl FakeResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            urls: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn register(&self, track_id: &str, url: &str) {
        self.urls.lock().insert(track_id.to_string(), url.to_string());
    }
}

#[async_trait]
impl StreamResolver for FakeResolver {
    async fn resolve(&self, track_id: &str) -> Result<String, PlaybackError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls
            .lock()
            .get(track_id)
            .cloned()
            .ok_or_else(|| PlaybackError::resolution(track_id, "sin URL registrada"))
    }
}

// ---------- Descubrimiento ----------

pub(crate) struct ScriptedDiscovery {
    queue: Mutex<VecDeque<DiscoveredTrack>>,
    pub calls: AtomicUsize,
}

impl ScriptedDiscovery {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn push(&self, track_id: &str, title: &str, duration_seconds: Option<u64>) {
        self.queue.lock().push_back(DiscoveredTrack {
            track_id: track_id.to_string(),
            title: title.to_string(),
            artist: "Scripted".to_string(),
            origin: TrackOrigin::Wildcard,
            reason: Some("scripted pick".to_string()),
            for_user_id: None,
            duration_seconds,
            genre: None,
            year: None,
        });
    }
}

#[async_trait]
impl Discovery for ScriptedDiscovery {
    async fn next_song(
        &self,
        _guild_id: u64,
        _listeners: &[u64],
        _weights: Option<&str>,
        _cooldown_seconds: u64,
    ) -> Option<DiscoveredTrack> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queue.lock().pop_front()
    }
}

// ---------- Stores ----------

pub(crate) struct MemorySettings {
    template: Mutex<GuildSettings>,
}

impl MemorySettings {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            template: Mutex::new(GuildSettings::default()),
        })
    }

    pub fn set_max_song_duration(&self, seconds: u64) {
        self.template.lock().max_song_duration = seconds;
    }

    pub fn set_always_on(&self, enabled: bool) {
        self.template.lock().always_on = enabled;
    }
}

#[async_trait]
impl GuildSettingsStore for MemorySettings {
    async fn guild_settings(&self, guild_id: u64) -> GuildSettings {
        let mut settings = self.template.lock().clone();
        settings.guild_id = guild_id;
        settings
    }

    async fn save_guild_settings(&self, settings: GuildSettings) -> anyhow::Result<()> {
        *self.template.lock() = settings;
        Ok(())
    }
}

pub(crate) struct NullTrackStore;

impl NullTrackStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl TrackStore for NullTrackStore {
    async fn get_or_create(
        &self,
        item: &QueueItem,
        is_ephemeral: bool,
    ) -> anyhow::Result<TrackRecord> {
        Ok(TrackRecord {
            track_id: item.track_id.clone(),
            title: item.title.clone(),
            artist: item.artist.clone(),
            duration_seconds: item.duration_seconds,
            year: item.year,
            genres: Vec::new(),
            is_ephemeral,
            play_count: 1,
        })
    }

    async fn set_genres(&self, _track_id: &str, _genres: &[String]) -> anyhow::Result<()> {
        Ok(())
    }

    async fn update_year(&self, _track_id: &str, _year: i32) -> anyhow::Result<()> {
        Ok(())
    }

    async fn make_permanent(&self, _track_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

pub(crate) struct RecordingSessions {
    counter: AtomicU64,
    pub started: Mutex<Vec<String>>,
    pub completed: Mutex<Vec<(u64, bool)>>,
    pub ended: Mutex<Vec<String>>,
    fail_writes: AtomicBool,
}

impl RecordingSessions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            counter: AtomicU64::new(0),
            started: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
            ended: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
        })
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("persistencia caída");
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for RecordingSessions {
    async fn create_session(&self, guild_id: u64, _channel_id: Option<u64>) -> anyhow::Result<String> {
        self.check()?;
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("sess-{guild_id}-{n}"))
    }

    async fn log_track_start(&self, _session_id: &str, item: &QueueItem) -> anyhow::Result<u64> {
        self.check()?;
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.started.lock().push(item.track_id.clone());
        Ok(n)
    }

    async fn mark_completed(
        &self,
        _session_id: &str,
        history_id: u64,
        completed: bool,
    ) -> anyhow::Result<()> {
        self.check()?;
        self.completed.lock().push((history_id, completed));
        Ok(())
    }

    async fn end_session(&self, session_id: &str) -> anyhow::Result<()> {
        self.check()?;
        self.ended.lock().push(session_id.to_string());
        Ok(())
    }
}

// ---------- Mundo de pruebas ----------

pub(crate) struct TestWorld {
    pub connection: Arc<FakeConnection>,
    pub resolver: Arc<FakeResolver>,
    pub discovery: Arc<ScriptedDiscovery>,
    pub settings: Arc<MemorySettings>,
    pub tracks: Arc<NullTrackStore>,
    pub sessions: Arc<RecordingSessions>,
}

impl TestWorld {
    pub fn new() -> Self {
        Self {
            connection: FakeConnection::new(),
            resolver: FakeResolver::new(),
            discovery: ScriptedDiscovery::new(),
            settings: MemorySettings::new(),
            tracks: NullTrackStore::new(),
            sessions: RecordingSessions::new(),
        }
    }

    pub fn services(&self) -> Arc<Services> {
        let tracks = Arc::clone(&self.tracks) as Arc<dyn TrackStore>;
        Arc::new(Services {
            config: Arc::new(Config::default()),
            resolver: Arc::clone(&self.resolver) as Arc<dyn StreamResolver>,
            discovery: Arc::clone(&self.discovery) as Arc<dyn Discovery>,
            consensus: Arc::new(ConsensusResolver::new(Vec::new(), 5, Arc::clone(&tracks))),
            settings: Arc::clone(&self.settings) as Arc<dyn GuildSettingsStore>,
            tracks,
            sessions: Arc::clone(&self.sessions) as Arc<dyn SessionStore>,
        })
    }

    pub fn registry(&self) -> Arc<PlayerRegistry> {
        Arc::new(PlayerRegistry::new(true, true))
    }

    /// Player suelto con la conexión fake ya asociada.
    pub fn player_with_connection(&self, guild_id: GuildId) -> Arc<GuildPlayer> {
        let player = Arc::new(GuildPlayer::new(guild_id, true, true));
        player.set_connection(Arc::clone(&self.connection) as Arc<dyn VoiceConnection>);
        player
    }

    /// Player registrado en un registry (para el reaper).
    pub fn player_with_connection_in(
        &self,
        registry: &Arc<PlayerRegistry>,
        guild_id: GuildId,
    ) -> Arc<GuildPlayer> {
        let player = registry.get_or_create(guild_id);
        player.set_connection(Arc::clone(&self.connection) as Arc<dyn VoiceConnection>);
        player
    }
}
