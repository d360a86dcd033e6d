//! End-to-end transcode pipeline tests against fake `ffprobe`/`ffmpeg`
//! shell scripts.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dms::AppContext;
use dms_av::tools::{FFMPEG, FFPROBE};
use dms_av::{FfprobeProber, Profile, SessionState, ToolRegistry, TranscodeRequest};
use dms_core::config::Config;
use dms_core::{Error, Event};
use dms_probe::{CachingProber, Prober};
use serial_test::serial;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

const PROBE_JSON: &str = r#"{"streams":[
{"index":0,"codec_type":"video","codec_name":"h264"},
{"index":1,"codec_type":"audio","codec_name":"dca"},
{"index":2,"codec_type":"subtitle","codec_name":"subrip"},
{"index":3,"codec_type":"attachment","codec_name":"ttf"}],
"format":{"format_name":"matroska,webm","duration":"1377.628452"}}"#;

struct Fixture {
    dir: TempDir,
    source: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("movie.mkv");
        std::fs::write(&source, b"not really matroska").unwrap();
        Self { dir, source }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    /// ffprobe that logs each call and prints [`PROBE_JSON`].
    fn ffprobe_ok(&self) -> PathBuf {
        let calls = self.path("ffprobe.calls");
        self.script(
            "ffprobe",
            &format!(
                "echo call >> '{}'\ncat <<'EOF'\n{PROBE_JSON}\nEOF",
                calls.display()
            ),
        )
    }

    /// ffmpeg that records its arguments, then runs `tail`.
    fn ffmpeg(&self, tail: &str) -> PathBuf {
        let args = self.path("ffmpeg.args");
        self.script(
            "ffmpeg",
            &format!(
                "for a in \"$@\"; do printf '%s\\n' \"$a\" >> '{}'; done\n{tail}",
                args.display()
            ),
        )
    }

    fn context(&self, ffprobe: PathBuf, ffmpeg: PathBuf) -> AppContext {
        let mut config = Config::default();
        config.transcode.threads = Some(3);
        let tools = ToolRegistry::with_paths([(FFMPEG, ffmpeg), (FFPROBE, ffprobe.clone())]);
        AppContext::with_parts(config, tools, Arc::new(FfprobeProber::new(ffprobe)))
    }

    fn lines(&self, name: &str) -> Vec<String> {
        std::fs::read_to_string(self.path(name))
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

fn record_events(ctx: &AppContext) -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    ctx.events
        .current()
        .listen("test-recorder", move |e| {
            let _ = tx.send(e);
        })
        .unwrap();
    rx
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no event in time")
        .expect("event channel closed")
}

async fn terminal(rx: &mut tokio::sync::watch::Receiver<SessionState>) -> SessionState {
    tokio::time::timeout(Duration::from_secs(10), rx.wait_for(SessionState::is_terminal))
        .await
        .expect("session did not finish")
        .unwrap()
        .clone()
}

#[tokio::test]
#[serial]
async fn generic_profile_probes_plans_and_streams() {
    let fx = Fixture::new();
    let ctx = fx.context(
        fx.ffprobe_ok(),
        fx.ffmpeg("printf 'frame=1 fps=25' >&2\nprintf 'FAKE-TS-STREAM'"),
    );
    let mut events = record_events(&ctx);

    let request = TranscodeRequest::new(&fx.source, Profile::Generic)
        .starting_at(Duration::from_secs(10));
    let (sink, mut diagnostics) = tokio::io::duplex(4096);
    let mut stream = ctx.start_transcode(&request, sink).await.unwrap();
    let mut state = stream.state();

    let mut body = Vec::new();
    stream.read_to_end(&mut body).await.unwrap();
    assert_eq!(body, b"FAKE-TS-STREAM");

    let mut stderr = String::new();
    diagnostics.read_to_string(&mut stderr).await.unwrap();
    assert_eq!(stderr, "frame=1 fps=25");

    assert_eq!(terminal(&mut state).await, SessionState::Completed);

    let source = fx.source.to_string_lossy().into_owned();
    let expected: Vec<&str> = vec![
        "-threads", "3", "-async", "1",
        "-ss", "0:00:10",
        "-i", &source,
        "-target", "pal-dvd", "-map", "0:0",
        "-acodec", "ac3", "-ab", "224k", "-ac", "2", "-map", "0:1",
        "-scodec", "copy", "-map", "0:2",
        "-f", "mpegts", "pipe:",
    ];
    assert_eq!(fx.lines("ffmpeg.args"), expected);
    assert_eq!(fx.lines("ffprobe.calls").len(), 1);

    let mut kinds = vec![
        next_event(&mut events).await.kind,
        next_event(&mut events).await.kind,
    ];
    kinds.sort();
    assert_eq!(kinds, ["transcode.completed", "transcode.started"]);
}

#[tokio::test]
#[serial]
async fn fixed_profile_skips_probe() {
    let fx = Fixture::new();
    let ctx = fx.context(fx.ffprobe_ok(), fx.ffmpeg("printf 'WEBM'"));

    let request = TranscodeRequest::new(&fx.source, Profile::Vp8)
        .with_length(Duration::from_millis(2500));
    let mut stream = ctx.start_transcode(&request, tokio::io::sink()).await.unwrap();
    let mut state = stream.state();

    let mut body = Vec::new();
    stream.read_to_end(&mut body).await.unwrap();
    assert_eq!(body, b"WEBM");
    assert_eq!(terminal(&mut state).await, SessionState::Completed);

    assert!(fx.lines("ffprobe.calls").is_empty());
    let args = fx.lines("ffmpeg.args");
    assert_eq!(&args[..6], ["-ss", "0:00:00", "-t", "0:00:02.5", "-i", fx.source.to_str().unwrap()]);
    assert_eq!(&args[args.len() - 3..], ["-f", "webm", "pipe:"]);
}

#[tokio::test]
#[serial]
async fn encoder_failure_truncates_stream_and_is_reported() {
    let fx = Fixture::new();
    let ctx = fx.context(
        fx.ffprobe_ok(),
        fx.ffmpeg("printf 'PARTIAL'\necho 'Conversion failed!' >&2\nexit 1"),
    );
    let mut events = record_events(&ctx);

    let request = TranscodeRequest::new(&fx.source, Profile::Chromecast);
    let mut stream = ctx.start_transcode(&request, tokio::io::sink()).await.unwrap();
    let mut state = stream.state();

    // The caller sees a short stream, not an error.
    let mut body = Vec::new();
    stream.read_to_end(&mut body).await.unwrap();
    assert_eq!(body, b"PARTIAL");

    match terminal(&mut state).await {
        SessionState::Failed(reason) => assert!(reason.contains("ffmpeg"), "{reason}"),
        other => panic!("expected failure, got {other:?}"),
    }

    let mut seen = Vec::new();
    for _ in 0..2 {
        seen.push(next_event(&mut events).await);
    }
    let error = seen
        .iter()
        .find(|e| e.kind == "transcode.error")
        .expect("no transcode.error event");
    assert!(error.error.is_some());
    assert_eq!(error.payload["profile"], "chromecast");
}

#[tokio::test]
#[serial]
async fn probe_failure_is_synchronous_and_spawns_nothing() {
    let fx = Fixture::new();
    let ffprobe = fx.script("ffprobe", "echo 'Invalid data found when processing input' >&2\nexit 1");
    let ctx = fx.context(ffprobe, fx.ffmpeg("printf 'NEVER'"));
    let mut events = record_events(&ctx);

    let request = TranscodeRequest::new(&fx.source, Profile::Generic);
    let err = ctx
        .start_transcode(&request, tokio::io::sink())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Probe(_)), "got {err:?}");
    assert!(fx.lines("ffmpeg.args").is_empty());

    let event = next_event(&mut events).await;
    assert_eq!(event.kind, "transcode.error");
    assert!(event.error.unwrap().contains("Probe error"));
}

#[tokio::test]
#[serial]
async fn missing_encoder_is_spawn_error() {
    let fx = Fixture::new();
    let ctx = fx.context(fx.ffprobe_ok(), fx.path("no-such-ffmpeg"));

    let request = TranscodeRequest::new(&fx.source, Profile::Web);
    let err = ctx
        .start_transcode(&request, tokio::io::sink())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Spawn { .. }), "got {err:?}");
}

#[tokio::test]
#[serial]
async fn caching_prober_runs_ffprobe_once_per_unchanged_file() {
    let fx = Fixture::new();
    let prober = CachingProber::new(FfprobeProber::new(fx.ffprobe_ok()), 64);

    let first = prober.probe(&fx.source).await.unwrap();
    let second = prober.probe(&fx.source).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.streams.len(), 4);
    assert_eq!(fx.lines("ffprobe.calls").len(), 1);
    assert_eq!(prober.snapshot().size, 5);
}

#[tokio::test]
#[serial]
async fn dropping_the_stream_stops_the_encoder() {
    let fx = Fixture::new();
    let ctx = fx.context(fx.ffprobe_ok(), fx.ffmpeg("printf 'HEAD'\nsleep 30"));

    let request = TranscodeRequest::new(&fx.source, Profile::Web);
    let mut stream = ctx.start_transcode(&request, tokio::io::sink()).await.unwrap();
    let mut state = stream.state();

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await.unwrap();
    assert_eq!(&head, b"HEAD");
    assert_eq!(stream.current_state(), SessionState::Streaming);
    drop(stream);

    assert!(matches!(terminal(&mut state).await, SessionState::Failed(_)));
}
