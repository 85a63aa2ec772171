use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Reproducción
    pub default_autoplay: bool,
    pub pre_buffer: bool,
    pub max_song_duration: u64, // En segundos, 0 = sin límite

    // Watchdog
    pub watchdog_fallback: u64, // Techo cuando la duración es desconocida
    pub watchdog_margin: u64,   // Margen sobre la duración conocida
    pub watchdog_grace: u64,    // Espera tras el force-stop

    // Metadata
    pub metadata_deadline: u64, // Deadline global de la ronda de consenso
    pub discogs_token: Option<String>,
    pub musicbrainz_enabled: bool,

    // Sesiones inactivas
    pub idle_timeout: u64,
    pub idle_check_interval: u64,

    // Modo de prueba (acorta el watchdog para verificación automatizada)
    pub test_mode: bool,
    pub test_playback_duration: u64,

    // Rendimiento
    pub worker_threads: usize,

    // Paths
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            application_id: std::env::var("APPLICATION_ID")?.parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Reproducción
            default_autoplay: std::env::var("ENABLE_AUTOPLAY")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,
            pre_buffer: std::env::var("PRE_BUFFER")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,
            max_song_duration: std::env::var("MAX_SONG_DURATION")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()?,

            // Watchdog
            watchdog_fallback: std::env::var("WATCHDOG_FALLBACK")
                .unwrap_or_else(|_| "600".to_string())
                .parse()?,
            watchdog_margin: std::env::var("WATCHDOG_MARGIN")
                .unwrap_or_else(|_| "20".to_string())
                .parse()?,
            watchdog_grace: std::env::var("WATCHDOG_GRACE")
                .unwrap_or_else(|_| "2".to_string())
                .parse()?,

            // Metadata
            metadata_deadline: std::env::var("METADATA_DEADLINE")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            discogs_token: std::env::var("DISCOGS_TOKEN").ok().filter(|s| !s.is_empty()),
            musicbrainz_enabled: std::env::var("MUSICBRAINZ_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,

            // Sesiones inactivas
            idle_timeout: std::env::var("IDLE_TIMEOUT")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,
            idle_check_interval: std::env::var("IDLE_CHECK_INTERVAL")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,

            // Modo de prueba
            test_mode: std::env::var("TEST_MODE")
                .unwrap_or_else(|_| "false".to_string())
                .parse()?,
            test_playback_duration: std::env::var("TEST_PLAYBACK_DURATION")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,

            // Rendimiento
            worker_threads: match std::env::var("WORKER_THREADS") {
                Ok(val) if !val.trim().is_empty() => val.parse()?,
                _ => num_cpus::get(),
            },

            // Paths
            data_dir: std::env::var("DATA_DIR")
                .unwrap_or_else(|_| "/app/data".to_string())
                .into(),
        };

        std::fs::create_dir_all(&config.data_dir)?;

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// Catches common mistakes before the engine starts: a zero watchdog
    /// ceiling would skip every track instantly, and a zero metadata
    /// deadline would turn every provider into an abstention.
    pub fn validate(&self) -> Result<()> {
        if self.watchdog_fallback == 0 {
            anyhow::bail!("Watchdog fallback must be greater than 0");
        }

        if self.watchdog_grace > 2 {
            anyhow::bail!(
                "Watchdog grace must be at most 2 seconds, got: {}",
                self.watchdog_grace
            );
        }

        if self.metadata_deadline == 0 {
            anyhow::bail!("Metadata deadline must be greater than 0");
        }

        if self.idle_check_interval == 0 {
            anyhow::bail!("Idle check interval must be greater than 0");
        }

        if self.test_mode && self.test_playback_duration == 0 {
            anyhow::bail!("Test playback duration must be greater than 0 in test mode");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes sensitive values (tokens) while showing the knobs that
    /// matter for diagnosing playback behavior.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Playback: autoplay={}, pre_buffer={}, max {}s/song\n  \
            Watchdog: fallback {}s, margin {}s, grace {}s\n  \
            Metadata: deadline {}s, discogs={}, musicbrainz={}\n  \
            Idle: timeout {}s, check every {}s\n  \
            Test mode: {} ({}s)",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.default_autoplay,
            self.pre_buffer,
            self.max_song_duration,
            self.watchdog_fallback,
            self.watchdog_margin,
            self.watchdog_grace,
            self.metadata_deadline,
            self.discogs_token.is_some(),
            self.musicbrainz_enabled,
            self.idle_timeout,
            self.idle_check_interval,
            self.test_mode,
            self.test_playback_duration,
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            // Playback defaults
            default_autoplay: true,
            pre_buffer: true,
            max_song_duration: 3600, // 1 hora

            // Watchdog defaults
            watchdog_fallback: 600, // 10 minutos si la duración es desconocida
            watchdog_margin: 20,
            watchdog_grace: 2,

            // Metadata defaults
            metadata_deadline: 5,
            discogs_token: None,
            musicbrainz_enabled: true,

            // Idle defaults
            idle_timeout: 300, // 5 minutos
            idle_check_interval: 60,

            // Test mode defaults
            test_mode: false,
            test_playback_duration: 30,

            // Performance defaults
            worker_threads: num_cpus::get(),

            // Path defaults
            data_dir: "/app/data".into(),
        }
    }
}
