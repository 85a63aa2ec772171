use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::{error, info, warn};

use crate::player::queue::QueueItem;

/// Configuración de guild almacenada en JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildSettings {
    pub guild_id: u64,
    pub autoplay: bool,
    pub always_on: bool, // Exenta del reaper de inactividad
    pub pre_buffer: bool,
    pub max_song_duration: u64, // En segundos, 0 = sin límite
    pub replay_cooldown: u64,   // Segundos antes de repetir un track
    pub discovery_weights: Option<String>,
}

impl Default for GuildSettings {
    fn default() -> Self {
        Self {
            guild_id: 0,
            autoplay: true,
            always_on: false,
            pre_buffer: true,
            max_song_duration: 3600,
            replay_cooldown: 7200, // 2 horas
            discovery_weights: None,
        }
    }
}

/// Registro durable de un track.
///
/// Los tracks pedidos por usuarios son permanentes; los que llegan por
/// descubrimiento quedan marcados efímeros hasta que alguien interactúa
/// con ellos.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackRecord {
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub duration_seconds: Option<u64>,
    pub year: Option<i32>,
    pub genres: Vec<String>,
    pub is_ephemeral: bool,
    pub play_count: u64,
}

/// Entrada del historial dentro de una sesión.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub history_id: u64,
    pub track_id: String,
    pub origin: String,
    pub reason: Option<String>,
    pub for_user_id: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub completed: Option<bool>,
}

/// Sesión de reproducción de una guild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub guild_id: u64,
    pub channel_id: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub entries: Vec<SessionEntry>,
}

/// Configuración por guild (lecturas frecuentes desde el prefetcher y el
/// reaper; siempre devuelve algo utilizable).
#[async_trait]
pub trait GuildSettingsStore: Send + Sync {
    async fn guild_settings(&self, guild_id: u64) -> GuildSettings;
    async fn save_guild_settings(&self, settings: GuildSettings) -> Result<()>;
}

/// Metadata durable por track.
#[async_trait]
pub trait TrackStore: Send + Sync {
    async fn get_or_create(&self, item: &QueueItem, is_ephemeral: bool) -> Result<TrackRecord>;
    /// Reemplaza los géneros almacenados (limpia los anteriores).
    async fn set_genres(&self, track_id: &str, genres: &[String]) -> Result<()>;
    async fn update_year(&self, track_id: &str, year: i32) -> Result<()>;
    async fn make_permanent(&self, track_id: &str) -> Result<()>;
}

/// Historial de reproducción.
///
/// Ninguna falla de este store debe abortar la reproducción: los llamadores
/// registran el error y continúan.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, guild_id: u64, channel_id: Option<u64>) -> Result<String>;
    async fn log_track_start(&self, session_id: &str, item: &QueueItem) -> Result<u64>;
    async fn mark_completed(&self, session_id: &str, history_id: u64, completed: bool) -> Result<()>;
    async fn end_session(&self, session_id: &str) -> Result<()>;
}

/// Almacenamiento basado en archivos JSON.
///
/// Layout bajo `data_dir`:
///   servers/{guild_id}.json  - configuración por guild
///   tracks.json              - registros durables de tracks
///   sessions/{id}.json       - una sesión por archivo
pub struct JsonStorage {
    data_dir: PathBuf,
    settings_cache: DashMap<u64, GuildSettings>,
    tracks: tokio::sync::Mutex<HashMap<String, TrackRecord>>,
    sessions: tokio::sync::Mutex<HashMap<String, SessionRecord>>,
    history_counter: AtomicU64,
}

impl JsonStorage {
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&data_dir).await?;
        fs::create_dir_all(data_dir.join("servers")).await?;
        fs::create_dir_all(data_dir.join("sessions")).await?;

        info!("📁 Storage inicializado en: {}", data_dir.display());

        let storage = Self {
            data_dir,
            settings_cache: DashMap::new(),
            tracks: tokio::sync::Mutex::new(HashMap::new()),
            sessions: tokio::sync::Mutex::new(HashMap::new()),
            history_counter: AtomicU64::new(1),
        };

        storage.load_all_servers().await?;
        storage.load_tracks().await?;

        Ok(storage)
    }

    async fn load_all_servers(&self) -> Result<()> {
        let servers_dir = self.data_dir.join("servers");
        let mut entries = fs::read_dir(&servers_dir).await?;
        let mut loaded = 0usize;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match fs::read_to_string(&path).await {
                    Ok(content) => match serde_json::from_str::<GuildSettings>(&content) {
                        Ok(settings) => {
                            self.settings_cache.insert(settings.guild_id, settings);
                            loaded += 1;
                        }
                        Err(e) => warn!("⚠️ Config de guild corrupta en {:?}: {}", path, e),
                    },
                    Err(e) => warn!("⚠️ No se pudo leer {:?}: {}", path, e),
                }
            }
        }

        if loaded > 0 {
            info!("📂 {} configuraciones de guild cargadas", loaded);
        }
        Ok(())
    }

    async fn load_tracks(&self) -> Result<()> {
        let path = self.tracks_path();
        if !path.exists() {
            return Ok(());
        }

        match fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<HashMap<String, TrackRecord>>(&content) {
                Ok(map) => {
                    info!("📂 {} tracks cargados", map.len());
                    *self.tracks.lock().await = map;
                }
                Err(e) => warn!("⚠️ tracks.json corrupto, empezando de cero: {}", e),
            },
            Err(e) => warn!("⚠️ No se pudo leer tracks.json: {}", e),
        }
        Ok(())
    }

    fn tracks_path(&self) -> PathBuf {
        self.data_dir.join("tracks.json")
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.data_dir.join("sessions").join(format!("{session_id}.json"))
    }

    async fn persist_tracks(&self, map: &HashMap<String, TrackRecord>) -> Result<()> {
        let json = serde_json::to_string_pretty(map)?;
        fs::write(self.tracks_path(), json).await?;
        Ok(())
    }

    async fn persist_session(&self, record: &SessionRecord) -> Result<()> {
        let json = serde_json::to_string_pretty(record)?;
        fs::write(self.session_path(&record.session_id), json).await?;
        Ok(())
    }
}

#[async_trait]
impl GuildSettingsStore for JsonStorage {
    async fn guild_settings(&self, guild_id: u64) -> GuildSettings {
        if let Some(settings) = self.settings_cache.get(&guild_id) {
            return settings.clone();
        }

        let settings = GuildSettings {
            guild_id,
            ..Default::default()
        };
        self.settings_cache.insert(guild_id, settings.clone());

        // Persistencia best-effort; el default en memoria ya es válido
        if let Err(e) = self.save_guild_settings(settings.clone()).await {
            warn!("⚠️ No se pudo guardar config default de {}: {}", guild_id, e);
        }
        settings
    }

    async fn save_guild_settings(&self, settings: GuildSettings) -> Result<()> {
        let path = self
            .data_dir
            .join("servers")
            .join(format!("{}.json", settings.guild_id));
        let json = serde_json::to_string_pretty(&settings)?;
        fs::write(path, json).await?;
        self.settings_cache.insert(settings.guild_id, settings);
        Ok(())
    }
}

#[async_trait]
impl TrackStore for JsonStorage {
    async fn get_or_create(&self, item: &QueueItem, is_ephemeral: bool) -> Result<TrackRecord> {
        let mut tracks = self.tracks.lock().await;

        let record = tracks
            .entry(item.track_id.clone())
            .or_insert_with(|| TrackRecord {
                track_id: item.track_id.clone(),
                title: item.title.clone(),
                artist: item.artist.clone(),
                duration_seconds: item.duration_seconds,
                year: item.year,
                genres: item.genre.clone().into_iter().collect(),
                is_ephemeral,
                play_count: 0,
            });

        // Completar campos que el registro existente no tenía
        if record.duration_seconds.is_none() {
            record.duration_seconds = item.duration_seconds;
        }
        if record.year.is_none() {
            record.year = item.year;
        }
        record.play_count += 1;

        let snapshot = record.clone();
        self.persist_tracks(&tracks).await?;
        Ok(snapshot)
    }

    async fn set_genres(&self, track_id: &str, genres: &[String]) -> Result<()> {
        let mut tracks = self.tracks.lock().await;
        let Some(record) = tracks.get_mut(track_id) else {
            anyhow::bail!("track desconocido: {track_id}");
        };
        record.genres = genres.to_vec();
        let map = tracks.clone();
        drop(tracks);
        self.persist_tracks(&map).await
    }

    async fn update_year(&self, track_id: &str, year: i32) -> Result<()> {
        let mut tracks = self.tracks.lock().await;
        let Some(record) = tracks.get_mut(track_id) else {
            anyhow::bail!("track desconocido: {track_id}");
        };
        record.year = Some(year);
        let map = tracks.clone();
        drop(tracks);
        self.persist_tracks(&map).await
    }

    async fn make_permanent(&self, track_id: &str) -> Result<()> {
        let mut tracks = self.tracks.lock().await;
        let Some(record) = tracks.get_mut(track_id) else {
            anyhow::bail!("track desconocido: {track_id}");
        };
        record.is_ephemeral = false;
        let map = tracks.clone();
        drop(tracks);
        self.persist_tracks(&map).await
    }
}

#[async_trait]
impl SessionStore for JsonStorage {
    async fn create_session(&self, guild_id: u64, channel_id: Option<u64>) -> Result<String> {
        let started_at = Utc::now();
        let session_id = format!("{}-{}", guild_id, started_at.timestamp_millis());

        let record = SessionRecord {
            session_id: session_id.clone(),
            guild_id,
            channel_id,
            started_at,
            ended_at: None,
            entries: Vec::new(),
        };

        self.persist_session(&record).await?;
        self.sessions.lock().await.insert(session_id.clone(), record);

        info!("📼 Sesión {} creada para guild {}", session_id, guild_id);
        Ok(session_id)
    }

    async fn log_track_start(&self, session_id: &str, item: &QueueItem) -> Result<u64> {
        let history_id = self.history_counter.fetch_add(1, Ordering::Relaxed);

        let mut sessions = self.sessions.lock().await;
        let Some(record) = sessions.get_mut(session_id) else {
            anyhow::bail!("sesión desconocida: {session_id}");
        };

        record.entries.push(SessionEntry {
            history_id,
            track_id: item.track_id.clone(),
            origin: item.origin.as_str().to_string(),
            reason: item.reason.clone(),
            for_user_id: item.for_user_id.map(|u| u.get()),
            started_at: Utc::now(),
            completed: None,
        });

        let snapshot = record.clone();
        drop(sessions);
        self.persist_session(&snapshot).await?;
        Ok(history_id)
    }

    async fn mark_completed(&self, session_id: &str, history_id: u64, completed: bool) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let Some(record) = sessions.get_mut(session_id) else {
            anyhow::bail!("sesión desconocida: {session_id}");
        };

        let Some(entry) = record
            .entries
            .iter_mut()
            .find(|e| e.history_id == history_id)
        else {
            anyhow::bail!("entrada {history_id} no existe en sesión {session_id}");
        };
        entry.completed = Some(completed);

        let snapshot = record.clone();
        drop(sessions);
        self.persist_session(&snapshot).await
    }

    async fn end_session(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let Some(mut record) = sessions.remove(session_id) else {
            // Sesión ya finalizada (Stop y el reaper pueden competir)
            return Ok(());
        };
        record.ended_at = Some(Utc::now());
        drop(sessions);

        if let Err(e) = self.persist_session(&record).await {
            error!("❌ No se pudo persistir el cierre de {}: {}", session_id, e);
            return Err(e);
        }
        info!("🏁 Sesión {} finalizada", session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::queue::TrackOrigin;
    use pretty_assertions::assert_eq;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vexo-music-{}-{}", std::process::id(), name));
        // Restos de corridas anteriores no deben contaminar el test
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn sample_item() -> QueueItem {
        QueueItem::new("abc123", "Song", "Artist", TrackOrigin::UserRequest).with_duration(200)
    }

    #[tokio::test]
    async fn test_track_get_or_create_and_update() {
        let dir = temp_dir("tracks");
        let storage = JsonStorage::new(dir.clone()).await.expect("storage");

        let record = storage.get_or_create(&sample_item(), false).await.expect("create");
        assert_eq!(record.track_id, "abc123");
        assert!(!record.is_ephemeral);
        assert_eq!(record.play_count, 1);

        // Segunda reproducción del mismo track: mismo registro, contador sube
        let again = storage.get_or_create(&sample_item(), true).await.expect("get");
        assert_eq!(again.play_count, 2);
        assert!(!again.is_ephemeral, "existing record keeps its flag");

        storage
            .set_genres("abc123", &["Synthpop".to_string()])
            .await
            .expect("set genres");
        storage.update_year("abc123", 1984).await.expect("update year");

        let record = storage.get_or_create(&sample_item(), false).await.expect("get");
        assert_eq!(record.genres, vec!["Synthpop".to_string()]);
        assert_eq!(record.year, Some(1984));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_ephemeral_track_can_become_permanent() {
        let dir = temp_dir("ephemeral");
        let storage = JsonStorage::new(dir.clone()).await.expect("storage");

        let item = QueueItem::new("xyz", "Found", "Radio", TrackOrigin::Wildcard);
        let record = storage.get_or_create(&item, true).await.expect("create");
        assert!(record.is_ephemeral);

        storage.make_permanent("xyz").await.expect("promote");
        let record = storage.get_or_create(&item, true).await.expect("get");
        assert!(!record.is_ephemeral);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let dir = temp_dir("sessions");
        let storage = JsonStorage::new(dir.clone()).await.expect("storage");

        let session_id = storage.create_session(42, Some(7)).await.expect("session");
        let history_id = storage
            .log_track_start(&session_id, &sample_item())
            .await
            .expect("log start");

        storage
            .mark_completed(&session_id, history_id, true)
            .await
            .expect("mark");
        storage.end_session(&session_id).await.expect("end");

        // Finalizar dos veces no es un error (Stop y el reaper compiten)
        storage.end_session(&session_id).await.expect("end twice");

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_guild_settings_roundtrip() {
        let dir = temp_dir("settings");
        let storage = JsonStorage::new(dir.clone()).await.expect("storage");

        let defaults = storage.guild_settings(99).await;
        assert_eq!(defaults.guild_id, 99);
        assert!(!defaults.always_on);

        let mut custom = defaults.clone();
        custom.always_on = true;
        custom.max_song_duration = 600;
        storage.save_guild_settings(custom).await.expect("save");

        let loaded = storage.guild_settings(99).await;
        assert!(loaded.always_on);
        assert_eq!(loaded.max_song_duration, 600);

        let _ = std::fs::remove_dir_all(dir);
    }
}
