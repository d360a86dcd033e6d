//! Shared application context.
//!
//! Bundles the configuration, discovered tools, the (cached) prober and the
//! event manager so every command and test wires the pipeline the same way.

use std::sync::Arc;
use std::time::Duration;

use dms_av::{
    FfprobeProber, Profile, SessionState, ToolRegistry, TranscodeRequest, TranscodeStream,
    Transcoder,
};
use dms_core::config::Config;
use dms_core::{Event, EventManager, SharedEventManager};
use dms_probe::{CachingProber, Prober};
use tokio::io::AsyncWrite;

/// Everything a request handler needs.
#[derive(Clone)]
pub struct AppContext {
    /// Immutable configuration snapshot.
    pub config: Arc<Config>,
    /// External tool registry.
    pub tools: Arc<ToolRegistry>,
    /// Media prober, cached by path and modification time.
    pub prober: Arc<dyn Prober>,
    /// Event manager that transcode lifecycle events are emitted on.
    pub events: Arc<SharedEventManager>,
}

impl AppContext {
    /// Discover tools and build the default ffprobe-backed prober.
    ///
    /// # Errors
    ///
    /// [`dms_core::Error::Tool`] if `ffprobe` cannot be found.
    pub fn new(config: Config) -> dms_core::Result<Self> {
        let tools = ToolRegistry::discover(&config.tools);
        let ffprobe = FfprobeProber::from_registry(&tools)?
            .with_timeout(Duration::from_secs(config.tools.probe_timeout_secs));
        let prober = Arc::new(CachingProber::new(ffprobe, config.cache.probe_capacity));
        Ok(Self::with_parts(config, tools, prober))
    }

    /// Assemble a context from explicit parts.
    pub fn with_parts(config: Config, tools: ToolRegistry, prober: Arc<dyn Prober>) -> Self {
        Self {
            config: Arc::new(config),
            tools: Arc::new(tools),
            prober,
            events: Arc::new(SharedEventManager::new(EventManager::new())),
        }
    }

    /// A transcoder using the configured thread count.
    pub fn transcoder(&self) -> dms_core::Result<Transcoder> {
        let transcoder = Transcoder::from_registry(&self.tools, Arc::clone(&self.prober))?;
        Ok(match self.config.transcode.threads {
            Some(threads) => transcoder.with_threads(threads),
            None => transcoder,
        })
    }

    /// Profile used when a request names none.
    pub fn default_profile(&self) -> dms_core::Result<Profile> {
        self.config.transcode.default_profile.parse()
    }

    /// Start a transcode and report its lifecycle on the event manager.
    ///
    /// Emits `transcode.started` once the encoder runs, then
    /// `transcode.completed` or `transcode.error` when it exits. A failure to
    /// start is emitted as `transcode.error` and returned.
    pub async fn start_transcode<W>(
        &self,
        request: &TranscodeRequest,
        stderr_sink: W,
    ) -> dms_core::Result<TranscodeStream>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let events = self.events.current();
        let path = request.path.display().to_string();
        let profile = request.profile.to_string();

        let started = match self.transcoder() {
            Ok(transcoder) => transcoder.start(request, stderr_sink).await,
            Err(e) => Err(e),
        };
        let stream = match started {
            Ok(stream) => stream,
            Err(e) => {
                emit(
                    &events,
                    Event::new("transcode.error")
                        .with("path", path)
                        .with("profile", profile)
                        .with_error(e.to_string()),
                );
                return Err(e);
            }
        };

        emit(
            &events,
            Event::new("transcode.started")
                .with("path", path.clone())
                .with("profile", profile.clone())
                .with("pid", stream.pid()),
        );

        let mut state = stream.state();
        tokio::spawn(async move {
            let finished = match state.wait_for(SessionState::is_terminal).await {
                Ok(s) => s.clone(),
                Err(_) => return,
            };
            let event = match finished {
                SessionState::Failed(reason) => Event::new("transcode.error").with_error(reason),
                _ => Event::new("transcode.completed"),
            };
            emit(&events, event.with("path", path).with("profile", profile));
        });

        Ok(stream)
    }
}

fn emit(events: &EventManager, event: Event) {
    if let Err(e) = events.emit(event) {
        tracing::warn!(error = %e, "failed to emit event");
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("config", &self.config)
            .field("tools", &self.tools)
            .field("prober", &self.prober.name())
            .finish()
    }
}
