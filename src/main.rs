use anyhow::Result;
use serenity::{
    async_trait,
    model::gateway::{GatewayIntents, Ready},
    prelude::{Context, EventHandler, TypeMapKey},
    Client,
};
use songbird::SerenityInit;
use std::sync::Arc;
use tracing::{error, info};

use vexo_music::config::Config;
use vexo_music::discovery::DiscoveryDisabled;
use vexo_music::metadata::{
    discogs::DiscogsProvider, musicbrainz::MusicBrainzProvider, ConsensusResolver,
    MetadataProvider,
};
use vexo_music::player::{IdleReaper, PlayerEngine, Services};
use vexo_music::sources::YtDlpResolver;
use vexo_music::storage::JsonStorage;

/// Clave para que la capa de comandos externa recupere el motor.
struct EngineKey;

impl TypeMapKey for EngineKey {
    type Value = Arc<PlayerEngine>;
}

struct Handler;

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("✅ Conectado como {}", ready.user.name);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vexo_music=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Vexo Music v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    // Almacenamiento JSON (settings por guild, tracks, sesiones)
    let storage = Arc::new(JsonStorage::new(config.data_dir.clone()).await?);

    // Proveedores de metadata habilitados, en orden de prioridad
    let mut providers: Vec<Arc<dyn MetadataProvider>> = Vec::new();
    if let Some(token) = &config.discogs_token {
        match DiscogsProvider::new(token.clone()) {
            Ok(provider) => providers.push(Arc::new(provider)),
            Err(e) => error!("❌ No se pudo inicializar Discogs: {:#}", e),
        }
    }
    if config.musicbrainz_enabled {
        match MusicBrainzProvider::new() {
            Ok(provider) => providers.push(Arc::new(provider)),
            Err(e) => error!("❌ No se pudo inicializar MusicBrainz: {:#}", e),
        }
    }
    info!("🏷️ {} proveedores de metadata habilitados", providers.len());

    let consensus = Arc::new(ConsensusResolver::new(
        providers,
        config.metadata_deadline,
        storage.clone(),
    ));

    // Motor de reproducción
    let services = Arc::new(Services {
        config: config.clone(),
        resolver: Arc::new(YtDlpResolver::default()),
        // El motor de recomendación se conecta desde fuera; sin él, el
        // autoplay simplemente no propone nada
        discovery: Arc::new(DiscoveryDisabled),
        consensus,
        settings: storage.clone(),
        tracks: storage.clone(),
        sessions: storage,
    });
    let engine = Arc::new(PlayerEngine::new(services.clone()));

    // Reaper de sesiones inactivas
    let _reaper = IdleReaper::spawn(engine.registry(), services);

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(Handler)
        .register_songbird()
        .await?;

    // Exponer el motor a la capa de comandos
    {
        let mut data = client.data.write().await;
        data.insert::<EngineKey>(engine);
    }

    // Manejar shutdown graceful
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Error al registrar Ctrl+C");
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        std::process::exit(0);
    });

    // Iniciar bot
    info!("🚀 Motor iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check() -> Result<()> {
    // Verificar dependencias críticas
    let yt_dlp = async_process::Command::new("yt-dlp")
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = async_process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes");
    }
}
