use anyhow::{Context, Result};
use caption_sessions::{
    AudioChunk, ChannelPeer, ChannelSender, Config, FileSettings, InboundEvent, LoopbackRegistry,
    OutboundEvent, SessionManager, StreamChannel, StreamContext, PROTOCOL_VERSION,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEMO_SAMPLE_RATE: u32 = 16000;
const DEMO_CHUNK_MS: u64 = 100;

#[derive(Debug, Parser)]
#[command(name = "caption-sessions", about = "Live caption session runtime")]
struct Args {
    /// Configuration file
    #[arg(long, default_value = "config/caption-sessions.toml")]
    config: PathBuf,

    /// Seconds of synthetic audio streamed through the loopback demo session
    #[arg(long, default_value_t = 5)]
    demo_seconds: u64,

    /// Tab id reported by the demo channel
    #[arg(long, default_value_t = 1)]
    tab_id: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let cfg = Config::load_from(&args.config)?;

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));
    info!(
        "Recognition: {} / {} ({}), translation enabled: {}",
        cfg.sessions.recognition.engine,
        cfg.sessions.recognition.model,
        cfg.sessions.recognition.language,
        cfg.sessions.translation.enabled
    );

    let manager = SessionManager::create(
        Arc::new(FileSettings::new(&args.config)),
        Arc::new(LoopbackRegistry::new()),
        cfg.runtime.manager_options(),
    )
    .await?;

    let (channel, mut peer) = StreamChannel::pair(ChannelSender::tab(args.tab_id, 0));
    manager
        .attach_channel(channel)
        .context("Demo channel was rejected")?;

    tokio::select! {
        result = run_demo(&mut peer, args.demo_seconds) => result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    manager.shutdown().await;
    drain_until_closed(&mut peer).await;

    Ok(())
}

/// Stream a synthetic tone through one session and log what comes back
async fn run_demo(peer: &mut ChannelPeer, seconds: u64) -> Result<()> {
    peer.send(InboundEvent::Init {
        version: PROTOCOL_VERSION,
        context: StreamContext {
            source_url: "demo://tone".to_string(),
            is_live: true,
            started_at_ms: chrono::Utc::now().timestamp_millis() as u64,
            playback_rate: 1.0,
        },
    })
    .await?;

    match tokio::time::timeout(Duration::from_secs(5), peer.recv()).await {
        Ok(Some(event)) => log_event(&event),
        Ok(None) => anyhow::bail!("Session closed before becoming ready"),
        Err(_) => anyhow::bail!("Session did not become ready within 5s"),
    }

    let chunks = seconds * 1000 / DEMO_CHUNK_MS;
    let mut ticker = tokio::time::interval(Duration::from_millis(DEMO_CHUNK_MS));

    for index in 0..chunks {
        ticker.tick().await;

        peer.send(InboundEvent::AudioChunk(tone_chunk(index))).await?;
        if index % 10 == 9 {
            peer.send(InboundEvent::Heartbeat {
                now: chrono::Utc::now().timestamp_millis() as u64,
            })
            .await?;
        }

        for event in peer.drain() {
            log_event(&event);
        }
    }

    peer.send(InboundEvent::Stop {
        reason: "demo finished".to_string(),
    })
    .await?;

    Ok(())
}

async fn drain_until_closed(peer: &mut ChannelPeer) {
    loop {
        match tokio::time::timeout(Duration::from_secs(2), peer.recv()).await {
            Ok(Some(event)) => log_event(&event),
            Ok(None) => break,
            Err(_) => {
                warn!("Timed out waiting for the demo channel to close");
                break;
            }
        }
    }
}

fn tone_chunk(index: u64) -> AudioChunk {
    let samples_per_chunk = (DEMO_SAMPLE_RATE as u64 * DEMO_CHUNK_MS / 1000) as usize;
    let offset = index as usize * samples_per_chunk;

    let pcm_samples = (0..samples_per_chunk)
        .map(|i| {
            let t = (offset + i) as f32 / DEMO_SAMPLE_RATE as f32;
            0.2 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
        })
        .collect();

    AudioChunk {
        sample_rate: DEMO_SAMPLE_RATE,
        channel_count: 1,
        timestamp_ms: index * DEMO_CHUNK_MS,
        pcm_samples,
    }
}

fn log_event(event: &OutboundEvent) {
    match event {
        OutboundEvent::Ready {
            session_id,
            engine_key,
        } => info!("Ready: session {} on {}", session_id, engine_key),
        OutboundEvent::TranscriptUpdate(segment) => {
            let marker = if segment.is_final { "final" } else { "partial" };
            match &segment.translated_text {
                Some(translated) => info!(
                    "#{} [{}] {} => {}",
                    segment.revision, marker, segment.text, translated
                ),
                None => info!("#{} [{}] {}", segment.revision, marker, segment.text),
            }
        }
        OutboundEvent::SessionError {
            code,
            message,
            fatal,
        } => warn!("Session error {} (fatal: {}): {}", code, fatal, message),
        OutboundEvent::Stopped { reason } => info!("Stopped: {}", reason),
        OutboundEvent::Stats(stats) => info!(
            "Stats: {} pending, {} dropped, {} pushed",
            stats.pending_audio_chunks, stats.dropped_audio_chunks, stats.pushed_audio_chunks
        ),
    }
}
