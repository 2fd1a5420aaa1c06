//! mochi CLI — character proxy server and terminal chat.
//!
//! ```text
//! mochi serve [--port 8787] [--host 127.0.0.1]
//! mochi chat [--model assets/shiba.glb]
//! mochi say "hello there"
//! ```
//!
//! Upstream credentials come from the environment: `LLM_API_URL`,
//! `LLM_API_KEY`, `LLM_MODEL_ID`, `GOOGLE_TTS_API_KEY`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use mochi_core::mouth::MouthBand;
use mochi_core::types::Role;
use mochi_lib::avatar::{AvatarRig, load_model};
use mochi_lib::gateway::{RemoteGateway, config_from_env};
use mochi_lib::orchestrator::{ChatOrchestrator, SendError};
use mochi_lib::playback::{PlaybackEvent, PlaybackHandle};

const GREETING: &str = "Hello! I'm Mochi!";

/// mochi — interactive character engine
#[derive(Parser)]
#[command(name = "mochi", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the chat/TTS proxy server
    Serve {
        /// Listen port
        #[arg(long, default_value = "8787")]
        port: u16,
        /// Listen host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
    /// Chat with the character in the terminal
    Chat {
        /// Avatar model (glTF/GLB) to animate while speaking
        #[arg(long)]
        model: Option<PathBuf>,
    },
    /// Synthesize one line and play it
    Say {
        /// Text to speak
        text: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mochi=info,mochi_lib=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { port, host } => {
            let gateway = RemoteGateway::new(config_from_env());
            let app = mochi_lib::server::router(gateway);

            let addr = format!("{host}:{port}");
            info!("mochi proxy listening on {addr}");

            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .expect("failed to bind");
            axum::serve(listener, app).await.expect("server error");
        }

        Command::Chat { model } => {
            let gateway = RemoteGateway::new(config_from_env());
            let orchestrator = ChatOrchestrator::new(gateway, PlaybackHandle::new(), GREETING);

            // Optional avatar: animated while the character speaks.
            let _rig = model.map(|path| {
                let (animator, clip) = load_model(&path, &MouthBand::default())
                    .expect("failed to load avatar model");
                AvatarRig::spawn(animator, clip, orchestrator.subscribe_speaking())
            });

            println!("mochi: {GREETING}");
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                let Ok(Some(line)) = lines.next_line().await else {
                    break;
                };
                match orchestrator.send(&line).await {
                    Ok(()) => {
                        if let Some(reply) = orchestrator
                            .transcript()
                            .iter()
                            .rev()
                            .find(|m| m.role == Role::Character)
                        {
                            println!("mochi: {}", reply.content);
                        }
                    }
                    Err(SendError::EmptyInput) => {}
                    Err(SendError::Busy) => println!("(still speaking — hold on)"),
                }
            }
        }

        Command::Say { text } => {
            let gateway = RemoteGateway::new(config_from_env());
            let clip = gateway
                .synthesize(&text, None, None)
                .await
                .expect("synthesis failed");
            let bytes = clip.decode().expect("bad audio payload");

            let playback = PlaybackHandle::new();
            let mut events = playback.subscribe();
            playback.play_mp3(bytes);

            // Wait for the clip to finish (or fail) before exiting.
            while let Ok(event) = events.recv().await {
                match event {
                    PlaybackEvent::Ended => break,
                    PlaybackEvent::Failed => {
                        eprintln!("playback failed");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
}
