use async_trait::async_trait;
use serenity::model::id::UserId;
use tracing::debug;

use crate::player::queue::{QueueItem, TrackOrigin};

/// Propuesta del motor de descubrimiento externo.
#[derive(Debug, Clone)]
pub struct DiscoveredTrack {
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub origin: TrackOrigin,
    pub reason: Option<String>,
    pub for_user_id: Option<u64>,
    pub duration_seconds: Option<u64>,
    pub genre: Option<String>,
    pub year: Option<i32>,
}

/// Frontera con el motor de recomendación.
///
/// La estrategia de selección (pesos, cooldowns, turnos por usuario) vive
/// fuera de este crate; aquí solo se consume la propuesta resultante.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn next_song(
        &self,
        guild_id: u64,
        listeners: &[u64],
        weights: Option<&str>,
        cooldown_seconds: u64,
    ) -> Option<DiscoveredTrack>;
}

/// Implementación nula usada cuando no hay motor de descubrimiento
/// configurado: el autoplay simplemente no encuentra candidatos.
pub struct DiscoveryDisabled;

#[async_trait]
impl Discovery for DiscoveryDisabled {
    async fn next_song(
        &self,
        guild_id: u64,
        _listeners: &[u64],
        _weights: Option<&str>,
        _cooldown_seconds: u64,
    ) -> Option<DiscoveredTrack> {
        debug!("Motor de descubrimiento deshabilitado (guild {})", guild_id);
        None
    }
}

impl From<DiscoveredTrack> for QueueItem {
    fn from(track: DiscoveredTrack) -> Self {
        let mut item = QueueItem::new(track.track_id, track.title, track.artist, track.origin);
        item.reason = track.reason;
        item.for_user_id = track.for_user_id.map(UserId::new);
        item.duration_seconds = track.duration_seconds;
        item.genre = track.genre;
        item.year = track.year;
        item
    }
}
