use async_trait::async_trait;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::PlaybackError;

/// Resuelve un identificador de track a una URL directa de audio.
///
/// Las URLs devueltas son de tiempo limitado; se resuelven de forma
/// perezosa (justo antes de reproducir, o por el prefetcher para el
/// siguiente item) y nunca se persisten.
#[async_trait]
pub trait StreamResolver: Send + Sync {
    async fn resolve(&self, track_id: &str) -> Result<String, PlaybackError>;
}

/// Resolver basado en yt-dlp, igual que el pipeline original.
///
/// Ejecuta `yt-dlp -g` como proceso externo con un timeout estricto; un
/// proceso colgado no debe bloquear el loop de la guild.
pub struct YtDlpResolver {
    timeout: Duration,
    cookies_path: Option<String>,
}

impl YtDlpResolver {
    pub fn new(timeout_secs: u64) -> Self {
        // Cookies opcionales para cuentas con restricciones regionales
        let cookies_path = std::env::var("YTDLP_COOKIES")
            .ok()
            .filter(|p| std::path::Path::new(p).exists());

        if let Some(path) = &cookies_path {
            info!("🍪 Cookies encontradas en: {}", path);
        }

        Self {
            timeout: Duration::from_secs(timeout_secs),
            cookies_path,
        }
    }

    fn watch_url(track_id: &str) -> String {
        format!("https://www.youtube.com/watch?v={track_id}")
    }
}

impl Default for YtDlpResolver {
    fn default() -> Self {
        Self::new(30)
    }
}

#[async_trait]
impl StreamResolver for YtDlpResolver {
    async fn resolve(&self, track_id: &str) -> Result<String, PlaybackError> {
        let mut cmd = tokio::process::Command::new("yt-dlp");
        cmd.arg("-f")
            .arg("bestaudio[ext=m4a]/bestaudio[ext=webm]/bestaudio/best")
            .arg("--no-playlist")
            .arg("--socket-timeout")
            .arg("10")
            .arg("--quiet")
            .arg("--no-warnings")
            .arg("-g")
            .arg(Self::watch_url(track_id));

        if let Some(cookies) = &self.cookies_path {
            cmd.arg("--cookies").arg(cookies);
        }

        debug!("🔗 Resolviendo stream para track {}", track_id);

        let output = timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                warn!("⏰ yt-dlp superó el timeout para {}", track_id);
                PlaybackError::resolution(track_id, "yt-dlp timeout")
            })?
            .map_err(|e| PlaybackError::resolution(track_id, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PlaybackError::resolution(
                track_id,
                format!("yt-dlp exit {}: {}", output.status, stderr.trim()),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stream_url = stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| PlaybackError::resolution(track_id, "yt-dlp no devolvió URL"))?;

        if !is_valid_stream_url(stream_url) {
            return Err(PlaybackError::resolution(
                track_id,
                format!("URL mal formada: {stream_url}"),
            ));
        }

        debug!("✅ Stream resuelto para {}", track_id);
        Ok(stream_url.to_string())
    }
}

/// Valida que la URL resuelta sea http(s) bien formada.
pub fn is_valid_stream_url(raw: &str) -> bool {
    match Url::parse(raw) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}
