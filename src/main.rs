use anyhow::Context;
use rulebook_ingest::{
    api,
    assets::supabase::{SupabaseStorage, SupabaseStorageSettings},
    config,
    extraction::gemini::{GeminiExtractor, GeminiSettings},
    index::openai::{OpenAiIndex, OpenAiSettings},
    ingest::{IngestService, IngestSettings},
    logging,
    store::postgrest::{PostgrestRulebookStore, PostgrestSettings},
};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::init_config();
    logging::init_tracing();
    let service = build_service().context("Failed to initialize service clients")?;
    let app = api::create_router(Arc::new(service));

    let (listener, port) = bind_listener()
        .await
        .context("Failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_service() -> anyhow::Result<IngestService> {
    let config = config::get_config();
    let index = OpenAiIndex::new(OpenAiSettings {
        base_url: config.openai_base_url.clone(),
        api_key: config.openai_api_key.clone(),
        answer_model: config.answer_model.clone(),
        attach_poll: config.index_attach_poll,
    })?;
    let extractor = GeminiExtractor::new(GeminiSettings {
        base_url: config.gemini_base_url.clone(),
        api_key: config.gemini_api_key.clone(),
        model: config.gemini_model.clone(),
    })?;
    let store = PostgrestRulebookStore::new(PostgrestSettings {
        project_url: config.supabase_url.clone(),
        service_key: config.supabase_service_key.clone(),
    })?;
    let assets = SupabaseStorage::new(SupabaseStorageSettings {
        project_url: config.supabase_url.clone(),
        service_key: config.supabase_service_key.clone(),
        bucket: config.storage_bucket.clone(),
    })?;

    Ok(IngestService::new(
        Arc::new(store),
        Arc::new(index),
        Arc::new(extractor),
        Arc::new(assets),
        IngestSettings::from_config(config),
    ))
}

async fn bind_listener() -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    let config = config::get_config();
    if let Some(port) = config.server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4100-4199",
    ))
}
