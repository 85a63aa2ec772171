use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
    sync::Arc,
};
use tracing::info;

/// Clase de prioridad de un track encolado.
///
/// Las peticiones explícitas de usuarios siempre se sirven antes que lo
/// que propone el descubrimiento automático, sin importar el orden de
/// llegada.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    UserRequest = 0,
    Autoplay = 1,
}

/// Origen de un track: cómo llegó a la cola.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackOrigin {
    UserRequest,
    Similar,
    ArtistRadio,
    Wildcard,
    Library,
}

impl TrackOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackOrigin::UserRequest => "user_request",
            TrackOrigin::Similar => "similar",
            TrackOrigin::ArtistRadio => "artist_radio",
            TrackOrigin::Wildcard => "wildcard",
            TrackOrigin::Library => "library",
        }
    }
}

/// Un track esperando (o en medio de) reproducción.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub stream_url: Option<String>, // Resuelta de forma perezosa
    pub requester_id: Option<UserId>,
    pub origin: TrackOrigin,
    pub reason: Option<String>,
    pub for_user_id: Option<UserId>, // Dueño del "turno" en descubrimiento round-robin
    pub duration_seconds: Option<u64>,
    pub genre: Option<String>,
    pub year: Option<i32>,
    pub metadata_attempted: bool, // false -> true exactamente una vez
    pub added_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn new(
        track_id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        origin: TrackOrigin,
    ) -> Self {
        Self {
            track_id: track_id.into(),
            title: title.into(),
            artist: artist.into(),
            stream_url: None,
            requester_id: None,
            origin,
            reason: None,
            for_user_id: None,
            duration_seconds: None,
            genre: None,
            year: None,
            metadata_attempted: false,
            added_at: Utc::now(),
        }
    }

    // Setters estilo builder
    pub fn with_requester(mut self, user_id: UserId) -> Self {
        self.requester_id = Some(user_id);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_for_user(mut self, user_id: UserId) -> Self {
        self.for_user_id = Some(user_id);
        self
    }

    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = Some(genre.into());
        self
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_stream_url(mut self, url: impl Into<String>) -> Self {
        self.stream_url = Some(url.into());
        self
    }
}

/// Item compartido entre la cola, el loop y el prefetcher.
///
/// El prefetcher y el consenso de metadata escriben `stream_url`,
/// `genre`, `year` y `metadata_attempted` in situ mientras el item sigue
/// encolado; el lock nunca se retiene a través de un await.
pub type SharedItem = Arc<Mutex<QueueItem>>;

struct Entry {
    tier: Tier,
    seq: u64,
    item: SharedItem,
}

// El orden es exclusivamente por (tier, seq); el item no participa.
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.tier == other.tier && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tier.cmp(&other.tier).then(self.seq.cmp(&other.seq))
    }
}

/// Cola de reproducción ordenada por `(tier, secuencia)`.
///
/// El contador monótono de secuencia garantiza FIFO estricto dentro de
/// cada tier aunque el contenedor subyacente sea un heap binario.
#[derive(Default)]
pub struct PlaybackQueue {
    heap: BinaryHeap<Reverse<Entry>>,
    seq: u64,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }

    /// Agrega un item a la cola; sin límite de tamaño.
    pub fn enqueue(&mut self, item: QueueItem, tier: Tier) -> SharedItem {
        self.seq += 1;
        let shared: SharedItem = Arc::new(Mutex::new(item));
        self.heap.push(Reverse(Entry {
            tier,
            seq: self.seq,
            item: Arc::clone(&shared),
        }));
        shared
    }

    /// Remueve y devuelve el mínimo `(tier, secuencia)`, o `None` si vacía.
    pub fn dequeue(&mut self) -> Option<SharedItem> {
        self.heap.pop().map(|Reverse(entry)| entry.item)
    }

    /// Lectura no destructiva del próximo item a reproducir.
    pub fn peek_head(&self) -> Option<SharedItem> {
        self.heap.peek().map(|Reverse(entry)| Arc::clone(&entry.item))
    }

    /// Drena todos los items; devuelve cuántos había.
    pub fn clear(&mut self) -> usize {
        let drained = self.heap.len();
        self.heap.clear();
        if drained > 0 {
            info!("🗑️ Cola limpiada ({} items)", drained);
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
