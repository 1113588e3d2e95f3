use std::future::Future;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use smallvec::SmallVec;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_stream::wrappers::BroadcastStream;

use crate::config::StockfishConfig;
use crate::uci::{self, InfoParser, UciMessage};
use crate::{Analysis, EngineError, EngineEvent, EngineFault, SessionId, SessionState};

#[derive(Debug, Clone, PartialEq)]
enum Handshake {
    Pending,
    Complete,
    Failed(EngineFault),
}

#[derive(Debug, Clone, PartialEq)]
enum Exit {
    Running,
    Clean,
    Killed,
    Fault(EngineFault),
}

struct WriteRequest {
    line: String,
    done: oneshot::Sender<std::io::Result<()>>,
}

struct LineWaiter {
    target: String,
    tx: oneshot::Sender<String>,
}

struct ActiveAnalysis {
    analysis: Analysis,
    tx: oneshot::Sender<Analysis>,
}

/// One engine subprocess and the protocol state around it.
///
/// Cloning is cheap; all clones drive the same process. The process is
/// killed when [`terminate`](Self::terminate) is called or when the last
/// clone is dropped.
#[derive(Clone)]
pub struct StockfishEngine {
    inner: Arc<Inner>,
}

struct Inner {
    id: SessionId,
    label: String,
    parser: InfoParser,
    ready: AtomicBool,
    /// `None` once the session is terminated or the process is gone.
    stdin_tx: Mutex<Option<mpsc::UnboundedSender<WriteRequest>>>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    handshake: watch::Sender<Handshake>,
    exit: watch::Sender<Exit>,
    waiters: Mutex<SmallVec<[LineWaiter; 4]>>,
    analysis: Mutex<Option<ActiveAnalysis>>,
    events: broadcast::Sender<EngineEvent>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StockfishEngine {
    /// Spawn an engine process and start the `uci` handshake in the background.
    ///
    /// Returns as soon as the process is running; use
    /// [`wait_ready`](Self::wait_ready) to wait for the handshake. Must be
    /// called from within a tokio runtime.
    #[tracing::instrument(level = "info", skip_all, fields(label = ?config.label))]
    pub fn spawn(config: &StockfishConfig) -> Result<Self, EngineError> {
        let path = config.resolve_path()?;
        let id = SessionId::new();
        let label = config
            .label
            .clone()
            .unwrap_or_else(|| format!("stockfish-{}", id));

        tracing::debug!(session = %id, ?path, "Spawning engine process");
        let mut child = tokio::process::Command::new(&path)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                tracing::error!(session = %id, "Failed to spawn engine: {}", source);
                EngineError::Spawn {
                    path: path.clone(),
                    source,
                }
            })?;

        let stdin = child.stdin.take().ok_or(EngineError::NotRunning)?;
        let stdout = child.stdout.take().ok_or(EngineError::NotRunning)?;
        let stderr = child.stderr.take().ok_or(EngineError::NotRunning)?;

        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let inner = Arc::new(Inner {
            id,
            label,
            parser: InfoParser::new(config.unknown_key_skip),
            ready: AtomicBool::new(false),
            stdin_tx: Mutex::new(Some(stdin_tx)),
            kill_tx: Mutex::new(Some(kill_tx)),
            handshake: watch::Sender::new(Handshake::Pending),
            exit: watch::Sender::new(Exit::Running),
            waiters: Mutex::new(SmallVec::new()),
            analysis: Mutex::new(None),
            events,
        });

        tokio::spawn(write_stdin(id, stdin, stdin_rx));
        tokio::spawn(read_output(id, Arc::downgrade(&inner), stdout));
        tokio::spawn(read_output(id, Arc::downgrade(&inner), stderr));
        tokio::spawn(supervise(id, Arc::downgrade(&inner), child, kill_rx));

        tokio::spawn(run_handshake(Arc::downgrade(&inner)));
        let engine = Self { inner };

        tracing::info!(session = %id, label = %engine.label(), "Engine process spawned");
        Ok(engine)
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        lock(&self.inner.stdin_tx).is_none()
    }

    pub fn state(&self) -> SessionState {
        if self.is_terminated() {
            SessionState::Terminated
        } else if lock(&self.inner.analysis).is_some() {
            SessionState::Analyzing
        } else if self.is_ready() {
            SessionState::Ready
        } else {
            SessionState::AwaitingHandshake
        }
    }

    /// Subscribe to raw lines, info events, readiness and errors.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    pub fn event_stream(&self) -> BroadcastStream<EngineEvent> {
        BroadcastStream::new(self.subscribe())
    }

    /// Wait for the `uci` handshake.
    ///
    /// All callers share the one handshake started by [`spawn`](Self::spawn).
    pub async fn wait_ready(&self) -> Result<(), EngineError> {
        if self.is_ready() {
            return Ok(());
        }
        let mut rx = self.inner.handshake.subscribe();
        let state = rx
            .wait_for(|h| *h != Handshake::Pending)
            .await
            .map_err(|_| EngineError::Closed)?;
        match &*state {
            Handshake::Failed(fault) => Err(EngineError::HandshakeFailed(fault.clone())),
            _ => Ok(()),
        }
    }

    /// Send one command line.
    ///
    /// Anything but `uci` waits for the handshake first. `uci` and `isready`
    /// return only once `uciok` / `readyok` has been read.
    pub async fn send(&self, command: &str) -> Result<(), EngineError> {
        let command = command.trim();
        if command != uci::UCI {
            self.wait_ready().await?;
        }

        // Register before writing: the reply may be read before write_line returns
        let ack = uci::expected_ack(command).map(|target| self.register_waiter(target));

        self.write_line(command).await?;

        if let Some(rx) = ack {
            rx.await.map_err(|_| EngineError::Closed)?;
        }
        Ok(())
    }

    /// Wait for the next line equal to `target` or starting with `target `.
    ///
    /// The waiter is registered by this call, not when the future is first
    /// polled, so a command written afterwards cannot race past it.
    pub fn wait_output(
        &self,
        target: &str,
    ) -> impl Future<Output = Result<String, EngineError>> + Send + 'static {
        let rx = self.register_waiter(target);
        async move { rx.await.map_err(|_| EngineError::Closed) }
    }

    /// Send one `setoption` per entry, in iteration order.
    ///
    /// Stops at the first failure; options already sent stay applied.
    pub async fn set_options<I, K, V>(&self, options: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: std::fmt::Display,
    {
        for (name, value) in options {
            self.send(&uci::set_option(name.as_ref(), value)).await?;
        }
        Ok(())
    }

    /// Search `fen` to `depth` and collect the result.
    ///
    /// Fails with [`EngineError::AnalysisInProgress`] if this session is
    /// already searching. If the session is terminated or the engine dies
    /// mid-search the returned future never completes; callers that need a
    /// bound must race it against their own timeout.
    #[tracing::instrument(level = "debug", skip(self), fields(session = %self.inner.id))]
    pub async fn analyze(
        &self,
        fen: &str,
        depth: u32,
        multi_pv: u32,
    ) -> Result<Analysis, EngineError> {
        self.wait_ready().await?;

        let (tx, rx) = oneshot::channel();
        {
            let mut slot = lock(&self.inner.analysis);
            if slot.is_some() {
                tracing::warn!("Rejecting analysis, one is already running");
                return Err(EngineError::AnalysisInProgress);
            }
            *slot = Some(ActiveAnalysis {
                analysis: Analysis::default(),
                tx,
            });
        }

        // Runs to completion even if the caller stops waiting, so the slot
        // is always released by either a write failure or `bestmove`
        let search = tokio::spawn({
            let engine = self.clone();
            let fen = fen.to_string();
            async move {
                let result = engine.start_search(&fen, depth, multi_pv).await;
                if result.is_err() {
                    lock(&engine.inner.analysis).take();
                }
                result
            }
        });
        match search.await {
            Ok(result) => result?,
            Err(e) => {
                tracing::error!("Search task failed: {}", e);
                lock(&self.inner.analysis).take();
                return Err(EngineError::Closed);
            }
        }

        let analysis = rx.await.map_err(|_| EngineError::Closed)?;
        tracing::debug!(best = %analysis.best_move, "Analysis complete");
        Ok(analysis)
    }

    async fn start_search(&self, fen: &str, depth: u32, multi_pv: u32) -> Result<(), EngineError> {
        self.send(&uci::set_option("MultiPV", multi_pv)).await?;
        self.send(&uci::position_fen(fen)).await?;
        self.send(&uci::go_depth(depth)).await
    }

    /// Kill the process. Safe to call more than once.
    ///
    /// An analysis in flight is left pending.
    pub fn terminate(&self) {
        self.inner.ready.store(false, Ordering::SeqCst);
        if lock(&self.inner.stdin_tx).take().is_none() {
            return;
        }
        if let Some(kill) = lock(&self.inner.kill_tx).take() {
            let _ = kill.send(());
        }
        self.inner.release_waiters();
        tracing::info!(session = %self.inner.id, "Engine terminated");
    }

    /// Ask the engine to `quit`, then kill it if it has not exited after `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        if self.is_terminated() {
            return;
        }
        if let Err(e) = self.write_line(uci::QUIT).await {
            tracing::debug!(session = %self.inner.id, "Failed to send quit: {}", e);
        }
        if tokio::time::timeout(grace, self.wait_exit()).await.is_err() {
            tracing::warn!(session = %self.inner.id, "Engine ignored quit, killing it");
        }
        self.terminate();
    }

    /// Resolves once the process is gone, with the fault if it died abnormally.
    pub async fn wait_exit(&self) -> Option<EngineFault> {
        let mut rx = self.inner.exit.subscribe();
        let exit = rx.wait_for(|e| *e != Exit::Running).await.ok()?;
        match &*exit {
            Exit::Fault(fault) => Some(fault.clone()),
            _ => None,
        }
    }

    fn register_waiter(&self, target: &str) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        let mut waiters = lock(&self.inner.waiters);
        waiters.retain(|w| !w.tx.is_closed());
        waiters.push(LineWaiter {
            target: target.to_string(),
            tx,
        });
        rx
    }

    async fn write_line(&self, command: &str) -> Result<(), EngineError> {
        let (done, done_rx) = oneshot::channel();
        {
            let stdin = lock(&self.inner.stdin_tx);
            let tx = stdin.as_ref().ok_or(EngineError::NotRunning)?;
            tx.send(WriteRequest {
                line: format!("{}\n", command),
                done,
            })
            .map_err(|_| EngineError::NotRunning)?;
        }
        done_rx.await.map_err(|_| EngineError::NotRunning)??;
        Ok(())
    }
}

impl std::fmt::Debug for StockfishEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StockfishEngine")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn dispatch(&self, line: &str) {
        tracing::trace!(session = %self.id, "UCI << {}", line);
        let _ = self.events.send(EngineEvent::Line(line.to_string()));

        self.resolve_waiters(line);

        match self.parser.parse_message(line) {
            UciMessage::Info(info) => {
                if let Some(active) = lock(&self.analysis).as_mut() {
                    active.analysis.record(&info);
                }
                let _ = self.events.send(EngineEvent::Info(info));
            }
            UciMessage::BestMove { best, ponder } => self.finish_analysis(best, ponder),
            _ => {}
        }
    }

    fn resolve_waiters(&self, line: &str) {
        let mut waiters = lock(&self.waiters);
        let mut i = 0;
        while i < waiters.len() {
            if uci::line_matches(line, &waiters[i].target) {
                let waiter = waiters.swap_remove(i);
                let _ = waiter.tx.send(line.to_string());
            } else {
                i += 1;
            }
        }
    }

    fn finish_analysis(&self, best: String, ponder: Option<String>) {
        let Some(active) = lock(&self.analysis).take() else {
            tracing::debug!(session = %self.id, "bestmove with no analysis in flight");
            return;
        };
        let ActiveAnalysis { mut analysis, tx } = active;
        tracing::info!(session = %self.id, best = %best, ?ponder, "Received bestmove");
        analysis.best_move = best;
        analysis.ponder_move = ponder;
        let _ = tx.send(analysis);
    }

    /// Wake everyone blocked on a line that will now never arrive.
    fn release_waiters(&self) {
        lock(&self.waiters).clear();
    }

    fn on_exit(&self, exit: Exit) {
        self.ready.store(false, Ordering::SeqCst);
        lock(&self.stdin_tx).take();
        lock(&self.kill_tx).take();
        self.release_waiters();

        let fault = match &exit {
            Exit::Fault(fault) => {
                tracing::error!(session = %self.id, "Engine process died: {}", fault);
                Some(fault.clone())
            }
            _ => {
                tracing::info!(session = %self.id, ?exit, "Engine process exited");
                None
            }
        };

        self.handshake.send_if_modified(|h| {
            if *h != Handshake::Pending {
                return false;
            }
            *h = Handshake::Failed(
                fault
                    .clone()
                    .unwrap_or_else(|| EngineFault::Io("exited before uciok".to_string())),
            );
            true
        });

        if let Some(fault) = fault {
            let _ = self.events.send(EngineEvent::Error(fault));
        }
        self.exit.send_replace(exit);
    }
}

/// Holds the session only while writing `uci`, so dropping every clone
/// still kills an engine that never answers.
async fn run_handshake(inner: Weak<Inner>) {
    let uciok = {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let engine = StockfishEngine { inner };
        let rx = engine.register_waiter(uci::UCI_OK);
        engine.write_line(uci::UCI).await.map(|()| rx)
    };
    let result = match uciok {
        Ok(rx) => rx.await.map_err(|_| EngineError::Closed),
        Err(e) => Err(e),
    };

    let Some(inner) = inner.upgrade() else {
        return;
    };
    match result {
        Ok(_) if *inner.exit.borrow() == Exit::Running => {
            tracing::info!(session = %inner.id, "Engine ready");
            inner.ready.store(true, Ordering::SeqCst);
            let _ = inner.events.send(EngineEvent::Ready);
            inner.handshake.send_replace(Handshake::Complete);
        }
        Ok(_) => {
            tracing::debug!(session = %inner.id, "uciok arrived after the engine exited");
        }
        Err(e) => {
            tracing::warn!(session = %inner.id, "Engine handshake failed: {}", e);
            inner.handshake.send_if_modified(|h| {
                if *h != Handshake::Pending {
                    return false;
                }
                *h = Handshake::Failed(EngineFault::Io(e.to_string()));
                true
            });
        }
    }
}

async fn write_stdin(
    session: SessionId,
    mut stdin: ChildStdin,
    mut rx: mpsc::UnboundedReceiver<WriteRequest>,
) {
    while let Some(req) = rx.recv().await {
        tracing::trace!(session = %session, "UCI >> {}", req.line.trim_end());
        let result = async {
            stdin.write_all(req.line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = &result {
            tracing::error!(session = %session, "Failed to write to stdin: {}", e);
        }
        let _ = req.done.send(result);
    }
    tracing::debug!(session = %session, "Stdin writer task exiting");
}

async fn read_output<R>(session: SessionId, inner: Weak<Inner>, stream: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.dispatch(line);
            }
            Ok(None) => {
                tracing::debug!(session = %session, "Engine output closed");
                break;
            }
            Err(e) => {
                tracing::warn!(session = %session, "Error reading engine output: {}", e);
                break;
            }
        }
    }
}

async fn supervise(
    session: SessionId,
    inner: Weak<Inner>,
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
) {
    // kill_rx also fires when the session is dropped
    let status = tokio::select! {
        status = child.wait() => Some(status),
        _ = kill_rx => None,
    };

    let exit = match status {
        None => {
            if let Err(e) = child.kill().await {
                tracing::warn!(session = %session, "Failed to kill engine: {}", e);
            }
            Exit::Killed
        }
        Some(Ok(status)) if status.success() => Exit::Clean,
        Some(Ok(status)) => Exit::Fault(EngineFault::AbnormalExit(status.code())),
        Some(Err(e)) => Exit::Fault(EngineFault::Io(e.to_string())),
    };

    if let Some(inner) = inner.upgrade() {
        inner.on_exit(exit);
    }
}
