use async_trait::async_trait;
use songbird::{
    input::HttpRequest, tracks::TrackHandle, Call, Event, EventContext,
    EventHandler as VoiceEventHandler, TrackEvent,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{debug, error};

use crate::error::PlaybackError;

/// Un track sonando en el sink de audio.
///
/// `completion()` entrega un receiver que pasa a `true` cuando el sink
/// reporta fin (normal o por error); `stop()` es el force-stop que usa el
/// watchdog y el skip.
pub trait ActiveTrack: Send + Sync {
    fn completion(&self) -> watch::Receiver<bool>;
    fn stop(&self);
}

/// Conexión de voz de una guild.
///
/// El loop de reproducción solo conoce esta interfaz; la implementación
/// real envuelve un `Call` de songbird y los tests usan fakes en memoria.
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    async fn play(&self, title: &str, stream_url: &str)
        -> Result<Arc<dyn ActiveTrack>, PlaybackError>;
    async fn disconnect(&self);
    async fn is_connected(&self) -> bool;
    fn channel_id(&self) -> Option<u64>;
    /// Oyentes humanos presentes; lo mantiene la capa de eventos externa.
    fn listeners(&self) -> Vec<u64>;
}

/// Implementación songbird de la conexión de voz.
pub struct SongbirdConnection {
    call: Arc<tokio::sync::Mutex<Call>>,
    http: reqwest::Client,
    channel_id: Option<u64>,
    listeners: parking_lot::RwLock<Vec<u64>>,
}

impl SongbirdConnection {
    pub fn new(call: Arc<tokio::sync::Mutex<Call>>, channel_id: Option<u64>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            call,
            http,
            channel_id,
            listeners: parking_lot::RwLock::new(Vec::new()),
        }
    }

    /// La capa de eventos de voz actualiza la lista cuando alguien entra
    /// o sale del canal.
    pub fn set_listeners(&self, ids: Vec<u64>) {
        *self.listeners.write() = ids;
    }
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    async fn play(
        &self,
        title: &str,
        stream_url: &str,
    ) -> Result<Arc<dyn ActiveTrack>, PlaybackError> {
        let input = HttpRequest::new(self.http.clone(), stream_url.to_string());

        let mut call = self.call.lock().await;
        let handle = call.play_input(input.into());
        drop(call);

        let _ = handle.set_volume(0.5);

        let (tx, rx) = watch::channel(false);
        let tx = Arc::new(tx);

        // Fin normal y error del sink disparan la misma señal: el loop
        // decide qué registrar, pero nunca se queda esperando
        handle
            .add_event(
                Event::Track(TrackEvent::End),
                TrackCompletionNotifier { tx: Arc::clone(&tx) },
            )
            .map_err(|e| PlaybackError::decode(title, e))?;
        handle
            .add_event(
                Event::Track(TrackEvent::Error),
                TrackCompletionNotifier { tx },
            )
            .map_err(|e| PlaybackError::decode(title, e))?;

        Ok(Arc::new(SongbirdTrack { handle, done: rx }))
    }

    async fn disconnect(&self) {
        let mut call = self.call.lock().await;
        call.stop();
        if let Err(e) = call.leave().await {
            error!("❌ Error al salir del canal de voz: {:?}", e);
        }
    }

    async fn is_connected(&self) -> bool {
        self.call.lock().await.current_connection().is_some()
    }

    fn channel_id(&self) -> Option<u64> {
        self.channel_id
    }

    fn listeners(&self) -> Vec<u64> {
        self.listeners.read().clone()
    }
}

struct SongbirdTrack {
    handle: TrackHandle,
    done: watch::Receiver<bool>,
}

impl ActiveTrack for SongbirdTrack {
    fn completion(&self) -> watch::Receiver<bool> {
        self.done.clone()
    }

    fn stop(&self) {
        let _ = self.handle.stop();
    }
}

/// Handler de eventos de songbird que marca la señal de finalización.
struct TrackCompletionNotifier {
    tx: Arc<watch::Sender<bool>>,
}

#[async_trait]
impl VoiceEventHandler for TrackCompletionNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        debug!("Track terminado, señal de finalización enviada");
        let _ = self.tx.send(true);
        None
    }
}
