use thiserror::Error;

/// Errores por item del pipeline de reproducción.
///
/// Ninguna de estas variantes termina el loop por guild: todas se
/// registran y se tratan como "saltar este item". Solo un Stop explícito
/// o la pérdida de conexión detienen el loop.
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// El resolver no entregó una URL de stream para el track.
    #[error("no se pudo resolver el stream de '{track_id}': {reason}")]
    Resolution { track_id: String, reason: String },

    /// El sink de audio rechazó o abortó la reproducción.
    #[error("fallo de reproducción para '{title}': {reason}")]
    Decode { title: String, reason: String },

    /// El watchdog venció antes de recibir la señal de finalización.
    #[error("watchdog: '{title}' no terminó dentro de {timeout_secs}s")]
    WatchdogTimeout { title: String, timeout_secs: u64 },

    /// Falla de escritura en la persistencia externa (nunca fatal).
    #[error("persistencia falló: {0}")]
    Persistence(String),
}

impl PlaybackError {
    pub fn resolution(track_id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Resolution {
            track_id: track_id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn decode(title: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Decode {
            title: title.into(),
            reason: reason.to_string(),
        }
    }
}
