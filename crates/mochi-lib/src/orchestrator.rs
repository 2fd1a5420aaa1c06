//! Chat orchestrator — sequences one user turn end to end.
//!
//! ```text
//! input → validate → append user turn → context window → chat gateway
//!       → bind reveal → append reply → clean text → TTS → playback
//! ```
//!
//! The busy gate (chat call in flight, audio loading, or audio playing)
//! replaces cancellation: a second submission is rejected, never raced.
//! Every failure degrades to something visible — a scripted apology when
//! the chat call dies, a snap to fully-revealed text when audio dies — so
//! the UI can never wedge in a loading or typing state.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error};

use mochi_core::history::ChatHistory;
use mochi_core::reveal::RevealTracker;
use mochi_core::speech::clean_text_for_speech;
use mochi_core::types::{GatewayMessage, Message, PlaybackState, Role};

use crate::gateway::{ChatReply, GatewayError, RemoteGateway, SpeechClip};
use crate::playback::{PlaybackEvent, PlaybackHandle};

/// Gateway seam. The engine talks to hosted providers through this trait so
/// tests can drive a turn without a network.
pub trait CharacterGateway: Send + Sync + 'static {
    fn chat(
        &self,
        messages: Vec<GatewayMessage>,
    ) -> impl Future<Output = Result<ChatReply, GatewayError>> + Send;

    fn synthesize(
        &self,
        text: String,
    ) -> impl Future<Output = Result<SpeechClip, GatewayError>> + Send;
}

impl CharacterGateway for RemoteGateway {
    async fn chat(&self, messages: Vec<GatewayMessage>) -> Result<ChatReply, GatewayError> {
        RemoteGateway::chat(self, &messages).await
    }

    async fn synthesize(&self, text: String) -> Result<SpeechClip, GatewayError> {
        RemoteGateway::synthesize(self, &text, None, None).await
    }
}

/// One bubble in the floating stack.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BubbleView {
    pub id: String,
    pub role: Role,
    pub text: String,
}

/// Snapshot published to frontends after every state change.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub bubbles: Vec<BubbleView>,
    pub busy: bool,
    pub speaking: bool,
}

/// Pre-network rejections. Failures past this point degrade internally.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("empty message")]
    EmptyInput,
    #[error("a turn is already in flight")]
    Busy,
}

struct Shared {
    history: ChatHistory,
    reveal: RevealTracker,
    chat_in_flight: bool,
}

pub struct ChatOrchestrator<G: CharacterGateway> {
    gateway: Arc<G>,
    playback: PlaybackHandle,
    shared: Arc<Mutex<Shared>>,
    speaking_tx: Arc<watch::Sender<bool>>,
    view_tx: Arc<watch::Sender<ConversationView>>,
    view_rx: watch::Receiver<ConversationView>,
    pump: tokio::task::JoinHandle<()>,
}

impl<G: CharacterGateway> ChatOrchestrator<G> {
    /// Build the orchestrator and start the playback event pump. The history
    /// opens with the character's greeting.
    pub fn new(gateway: G, playback: PlaybackHandle, greeting: &str) -> Self {
        let shared = Arc::new(Mutex::new(Shared {
            history: ChatHistory::with_greeting(greeting, now_ms()),
            reveal: RevealTracker::new(),
            chat_in_flight: false,
        }));
        let (speaking_tx, _) = watch::channel(false);
        let speaking_tx = Arc::new(speaking_tx);
        let (view_tx, view_rx) = watch::channel(ConversationView::default());
        let view_tx = Arc::new(view_tx);

        let pump = tokio::spawn(event_pump(
            playback.subscribe(),
            playback.clone(),
            shared.clone(),
            speaking_tx.clone(),
            view_tx.clone(),
        ));

        let orchestrator = Self {
            gateway: Arc::new(gateway),
            playback,
            shared,
            speaking_tx,
            view_tx,
            view_rx,
            pump,
        };
        orchestrator.publish();
        orchestrator
    }

    pub fn view(&self) -> ConversationView {
        self.view_rx.borrow().clone()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<ConversationView> {
        self.view_rx.clone()
    }

    /// Speaking flag for the avatar rig, derived from playback events.
    pub fn subscribe_speaking(&self) -> watch::Receiver<bool> {
        self.speaking_tx.subscribe()
    }

    /// Full conversation log, oldest first.
    pub fn transcript(&self) -> Vec<Message> {
        self.shared.lock().unwrap().history.messages().to_vec()
    }

    /// True while a chat call is in flight or audio is loading or playing.
    pub fn is_busy(&self) -> bool {
        let chat = self.shared.lock().unwrap().chat_in_flight;
        chat || matches!(
            self.playback.status().state,
            PlaybackState::Loading | PlaybackState::Playing
        )
    }

    /// Run one user turn. Returns immediately on empty input or while busy;
    /// everything after the user message is appended degrades internally.
    pub async fn send(&self, input: &str) -> Result<(), SendError> {
        let text = input.trim();
        if text.is_empty() {
            return Err(SendError::EmptyInput);
        }
        let context = {
            // Gate and flag under one lock acquisition, so two concurrent
            // sends can never both pass the busy check.
            let mut shared = self.shared.lock().unwrap();
            if shared.chat_in_flight
                || matches!(
                    self.playback.status().state,
                    PlaybackState::Loading | PlaybackState::Playing
                )
            {
                return Err(SendError::Busy);
            }
            shared.history.push_user(text, now_ms());
            shared.chat_in_flight = true;
            shared.history.context_window()
        };
        self.publish();
        debug!("turn: {} context messages", context.len());

        let reply = match self.gateway.chat(context).await {
            Ok(ChatReply { content, .. }) if !content.is_empty() => content,
            Ok(_) => {
                error!("turn: chat returned empty content");
                self.fail_turn();
                return Ok(());
            }
            Err(e) => {
                error!("turn: chat failed: {e}");
                self.fail_turn();
                return Ok(());
            }
        };

        {
            // Bind the reveal before the reply is visible, or the full text
            // flashes for one frame.
            let mut shared = self.shared.lock().unwrap();
            let id = shared.history.next_id(Role::Character);
            shared.reveal.begin(&id);
            shared.history.push(Message {
                id,
                role: Role::Character,
                content: reply.clone(),
                timestamp_ms: now_ms(),
            });
        }
        self.publish();

        let spoken = clean_text_for_speech(&reply);
        match self.gateway.synthesize(spoken).await {
            Ok(clip) => match clip.decode() {
                Ok(bytes) => self.playback.play_mp3(bytes),
                Err(e) => {
                    error!("turn: bad audio payload: {e}");
                    self.finish_reveal();
                }
            },
            Err(e) => {
                error!("turn: tts failed: {e}");
                self.finish_reveal();
            }
        }

        self.shared.lock().unwrap().chat_in_flight = false;
        self.publish();
        Ok(())
    }

    /// Chat failure: scripted apology, busy cleared. Never retried.
    fn fail_turn(&self) {
        {
            let mut shared = self.shared.lock().unwrap();
            shared
                .history
                .push_character(mochi_core::history::FALLBACK_APOLOGY, now_ms());
            shared.chat_in_flight = false;
        }
        self.publish();
    }

    /// Speech failure after the reply is visible: show the full text rather
    /// than leaving a frozen half-typed bubble.
    fn finish_reveal(&self) {
        self.shared.lock().unwrap().reveal.finish();
        self.publish();
    }

    fn publish(&self) {
        publish_view(&self.shared, &self.playback, &self.speaking_tx, &self.view_tx);
    }
}

impl<G: CharacterGateway> Drop for ChatOrchestrator<G> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Translate playback events into reveal progress and the speaking flag.
/// All consumers derive their state from these events — nothing polls.
async fn event_pump(
    mut events: broadcast::Receiver<PlaybackEvent>,
    playback: PlaybackHandle,
    shared: Arc<Mutex<Shared>>,
    speaking_tx: Arc<watch::Sender<bool>>,
    view_tx: Arc<watch::Sender<ConversationView>>,
) {
    loop {
        match events.recv().await {
            Ok(PlaybackEvent::Started { .. }) => {
                let _ = speaking_tx.send(true);
            }
            Ok(PlaybackEvent::Time {
                position_secs,
                duration_secs,
            }) => {
                shared.lock().unwrap().reveal.on_time(position_secs, duration_secs);
            }
            Ok(PlaybackEvent::Ended) | Ok(PlaybackEvent::Failed) => {
                shared.lock().unwrap().reveal.finish();
                let _ = speaking_tx.send(false);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("event pump: lagged {skipped} events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
        publish_view(&shared, &playback, &speaking_tx, &view_tx);
    }
}

fn publish_view(
    shared: &Arc<Mutex<Shared>>,
    playback: &PlaybackHandle,
    speaking_tx: &watch::Sender<bool>,
    view_tx: &watch::Sender<ConversationView>,
) {
    let guard = shared.lock().unwrap();
    let bubbles = guard
        .history
        .recent()
        .iter()
        .map(|m| BubbleView {
            id: m.id.clone(),
            role: m.role,
            text: guard.reveal.display_text(&m.id, &m.content),
        })
        .collect();
    let busy = guard.chat_in_flight
        || matches!(
            playback.status().state,
            PlaybackState::Loading | PlaybackState::Playing
        );
    drop(guard);

    let _ = view_tx.send(ConversationView {
        bubbles,
        busy,
        speaking: *speaking_tx.borrow(),
    });
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    struct StubGateway {
        reply: String,
        tts: Result<SpeechClip, ()>,
        /// When set, chat parks until the sender fires.
        chat_gate: tokio::sync::Mutex<Option<oneshot::Receiver<()>>>,
        /// When set, synthesize parks until the sender fires.
        tts_gate: tokio::sync::Mutex<Option<oneshot::Receiver<()>>>,
    }

    impl StubGateway {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                tts: Ok(SpeechClip {
                    // "mp3bytes" — not real audio; the detached handle
                    // discards the play command anyway.
                    audio_base64: "bXAzYnl0ZXM=".into(),
                    format: "mp3".into(),
                }),
                chat_gate: tokio::sync::Mutex::new(None),
                tts_gate: tokio::sync::Mutex::new(None),
            }
        }
    }

    impl CharacterGateway for StubGateway {
        async fn chat(&self, _messages: Vec<GatewayMessage>) -> Result<ChatReply, GatewayError> {
            if let Some(gate) = self.chat_gate.lock().await.take() {
                let _ = gate.await;
            }
            if self.reply.is_empty() {
                return Err(GatewayError::ChatNotConfigured);
            }
            Ok(ChatReply {
                content: self.reply.clone(),
                usage: None,
            })
        }

        async fn synthesize(&self, _text: String) -> Result<SpeechClip, GatewayError> {
            if let Some(gate) = self.tts_gate.lock().await.take() {
                let _ = gate.await;
            }
            self.tts
                .clone()
                .map_err(|_| GatewayError::TtsNotConfigured)
        }
    }

    fn orchestrator(reply: &str) -> ChatOrchestrator<StubGateway> {
        ChatOrchestrator::new(StubGateway::new(reply), PlaybackHandle::detached(), "hi!")
    }

    #[tokio::test]
    async fn empty_input_is_rejected_before_any_call() {
        let orch = orchestrator("hi there!");
        assert_eq!(orch.send("   ").await, Err(SendError::EmptyInput));
        assert_eq!(orch.transcript().len(), 1); // greeting only
    }

    #[tokio::test]
    async fn turn_appends_user_and_reply() {
        let orch = orchestrator("hi there!");
        orch.send("hello").await.unwrap();

        let log = orch.transcript();
        assert_eq!(log.len(), 3);
        assert_eq!(log[1].role, Role::User);
        assert_eq!(log[1].content, "hello");
        assert_eq!(log[2].role, Role::Character);
        assert_eq!(log[2].content, "hi there!");
    }

    #[tokio::test]
    async fn reveal_binds_before_reply_is_fully_shown() {
        let orch = orchestrator("hi there!");
        let (gate_tx, gate_rx) = oneshot::channel();
        *orch.gateway.tts_gate.lock().await = Some(gate_rx);

        let send = orch.send("hello");
        tokio::pin!(send);
        // Drive the turn until it parks inside synthesize.
        tokio::select! {
            _ = &mut send => panic!("send finished before the gate opened"),
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }

        // The reply is visible but bound to the reveal at fraction 0:
        // one character plus the cursor, not the full text.
        let bubble = orch.view().bubbles.last().cloned().unwrap();
        assert_eq!(bubble.role, Role::Character);
        assert_eq!(bubble.text, format!("h{}", mochi_core::reveal::CURSOR));
        assert!(orch.view().busy);

        gate_tx.send(()).unwrap();
        send.await.unwrap();
    }

    #[tokio::test]
    async fn chat_failure_degrades_to_apology() {
        let orch = orchestrator(""); // stub fails the chat call
        orch.send("hello").await.unwrap();

        let log = orch.transcript();
        assert_eq!(log.last().unwrap().content, mochi_core::history::FALLBACK_APOLOGY);
        assert!(!orch.is_busy());
    }

    #[tokio::test]
    async fn playback_failure_snaps_reveal_to_full_text() {
        let orch = orchestrator("hi there!");
        orch.send("hello").await.unwrap();

        // Mid-playback, partially revealed.
        orch.playback.emit(PlaybackEvent::Started { duration_secs: 2.0 });
        orch.playback.emit(PlaybackEvent::Time {
            position_secs: 1.0,
            duration_secs: 2.0,
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let bubble = orch.view().bubbles.last().cloned().unwrap();
        assert!(bubble.text.ends_with(mochi_core::reveal::CURSOR));
        assert!(orch.view().speaking);

        // Error mid-stream: full text, speaking off, binding cleared.
        orch.playback.emit(PlaybackEvent::Failed);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let view = orch.view();
        assert_eq!(view.bubbles.last().unwrap().text, "hi there!");
        assert!(!view.speaking);
        assert!(!view.busy);
    }

    #[tokio::test]
    async fn ended_event_reveals_everything() {
        let orch = orchestrator("hi there!");
        orch.send("hello").await.unwrap();

        orch.playback.emit(PlaybackEvent::Started { duration_secs: 1.0 });
        orch.playback.emit(PlaybackEvent::Ended);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let view = orch.view();
        assert_eq!(view.bubbles.last().unwrap().text, "hi there!");
        assert!(!view.speaking);
    }

    #[tokio::test]
    async fn concurrent_sends_admit_exactly_one() {
        let orch = Arc::new(orchestrator("hi there!"));
        let (gate_tx, gate_rx) = oneshot::channel();
        *orch.gateway.chat_gate.lock().await = Some(gate_rx);

        // First turn parks inside the chat call with the busy flag set.
        let first = tokio::spawn({
            let orch = orch.clone();
            async move { orch.send("one").await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(orch.send("two").await, Err(SendError::Busy));

        gate_tx.send(()).unwrap();
        first.await.unwrap().unwrap();

        // Only the admitted turn made it into the log.
        let log = orch.transcript();
        assert!(log.iter().any(|m| m.content == "one"));
        assert!(!log.iter().any(|m| m.content == "two"));
    }

    #[tokio::test]
    async fn busy_while_audio_plays() {
        let orch = orchestrator("hi there!");
        orch.send("hello").await.unwrap();

        orch.playback.emit(PlaybackEvent::Started { duration_secs: 5.0 });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(orch.send("again").await, Err(SendError::Busy));

        orch.playback.emit(PlaybackEvent::Ended);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(orch.send("again").await.is_ok());
    }
}
