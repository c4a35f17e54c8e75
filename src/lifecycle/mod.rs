//! Process lifecycle: start the listener, watch the control input, stop
//! within a bounded window.

pub mod shutdown;

use log::{debug, info, warn};
use std::io::{self, BufRead, ErrorKind, Write};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::ServeError;
use crate::server::HttpServer;
use crate::server::config::ServerConfig;
use crate::server::directory;
use crate::server::responder::StaticResponder;
use shutdown::{ShutdownSignal, ShutdownTrigger};

/// Time in-flight requests get to finish once shutdown starts.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Slack on top of the shutdown deadline for the listener thread to report back.
const LISTENER_REPORT_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

enum Event {
    Line(String),
    InputClosed,
    ListenerStopped(Result<(), ServeError>),
}

/// True for the line that stops the server: `x`, any case, surrounding
/// whitespace ignored.
pub fn is_exit_command(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("x")
}

/// Drives one run of the server and writes the user-facing messages to `out`.
pub struct Controller<W: Write> {
    state: LifecycleState,
    out: W,
}

impl<W: Write> Controller<W> {
    pub fn new(out: W) -> Self {
        Self {
            state: LifecycleState::Starting,
            out,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Runs until an exit command arrives on `input` or input ends.
    ///
    /// `Err` means a fatal condition (exit status 1); its message has already
    /// been written. A degraded shutdown is reported but still returns `Ok`.
    pub fn run<R>(&mut self, config: &ServerConfig, input: R) -> Result<(), ServeError>
    where
        R: BufRead + Send + 'static,
    {
        let result = self.run_until_stopped(config, input);
        if let Err(e) = &result {
            self.report_fatal(e);
        }
        self.state = LifecycleState::Stopped;
        result
    }

    fn run_until_stopped<R>(&mut self, config: &ServerConfig, input: R) -> Result<(), ServeError>
    where
        R: BufRead + Send + 'static,
    {
        self.state = LifecycleState::Starting;
        directory::validate(&config.directory)?;
        let server = HttpServer::bind(config, StaticResponder::new(&config.directory))?;
        let port = server.local_addr().map_err(ServeError::Serve)?.port();

        let (events_tx, events_rx) = mpsc::channel();
        let (trigger, signal) = shutdown::channel();
        let listener = spawn_listener(server, signal, events_tx.clone())?;

        self.say(&format!("Server started at http://localhost:{}", port));
        self.say(&format!("Serving directory: {}", config.directory.display()));
        self.say("\nTo exit, enter 'x' and press Enter");

        spawn_input_reader(input, events_tx)?;
        self.state = LifecycleState::Running;

        loop {
            match events_rx.recv() {
                Ok(Event::Line(line)) if is_exit_command(&line) => break,
                Ok(Event::Line(line)) => debug!("Ignoring input line {:?}", line),
                Ok(Event::InputClosed) => {
                    info!("Control input closed, stopping server");
                    break;
                }
                Ok(Event::ListenerStopped(Err(e))) => return Err(e),
                Ok(Event::ListenerStopped(Ok(()))) => {
                    return Err(ServeError::Serve(io::Error::other(
                        "listener stopped without a shutdown request",
                    )));
                }
                Err(_) => break,
            }
        }

        self.shutdown(trigger, &events_rx, listener);
        Ok(())
    }

    fn shutdown(&mut self, trigger: ShutdownTrigger, events: &Receiver<Event>, listener: JoinHandle<()>) {
        self.state = LifecycleState::ShuttingDown;
        self.say("Shutting down server...");

        let deadline = trigger.fire(SHUTDOWN_TIMEOUT);
        match wait_for_listener(events, deadline + LISTENER_REPORT_GRACE) {
            Ok(()) => {
                let _ = listener.join();
                self.say("Server stopped gracefully");
            }
            Err(e) => {
                warn!("Shutdown did not complete cleanly: {}", e);
                self.say(&format!("Server shutdown error: {}", e));
            }
        }
        self.state = LifecycleState::Stopped;
    }

    fn report_fatal(&mut self, error: &ServeError) {
        let message = match error {
            ServeError::DirectoryNotFound(dir) => format!("Directory '{}' not found.", dir.display()),
            ServeError::DirectoryAccess { path, source } => {
                format!("Directory '{}' is not accessible: {}", path.display(), source)
            }
            ServeError::NotADirectory(path) => format!("'{}' is not a directory.", path.display()),
            other => format!("Error starting server: {}", other),
        };
        self.say(&message);
    }

    fn say(&mut self, message: &str) {
        // losing a console message is not worth aborting over
        let _ = writeln!(self.out, "{}", message);
        let _ = self.out.flush();
    }
}

fn spawn_listener(
    server: HttpServer,
    signal: ShutdownSignal,
    events: Sender<Event>,
) -> Result<JoinHandle<()>, ServeError> {
    thread::Builder::new()
        .name("http-listener".to_string())
        .spawn(move || {
            let result = server.serve(signal);
            let _ = events.send(Event::ListenerStopped(result));
        })
        .map_err(|source| ServeError::Spawn {
            name: "http-listener",
            source,
        })
}

fn spawn_input_reader<R>(input: R, events: Sender<Event>) -> Result<(), ServeError>
where
    R: BufRead + Send + 'static,
{
    thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in input.lines() {
                match line {
                    Ok(line) => {
                        if events.send(Event::Line(line)).is_err() {
                            return;
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::InvalidData => {
                        debug!("Skipping non UTF-8 input line");
                    }
                    Err(e) => {
                        warn!("Error reading control input: {}", e);
                        break;
                    }
                }
            }
            let _ = events.send(Event::InputClosed);
        })
        .map(|_| ())
        .map_err(|source| ServeError::Spawn {
            name: "stdin-reader",
            source,
        })
}

/// Waits for the listener's final result. Input arriving meanwhile is dropped.
fn wait_for_listener(events: &Receiver<Event>, deadline: Instant) -> Result<(), ServeError> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(Event::ListenerStopped(result)) => return result,
            Ok(_) => continue,
            Err(_) => return Err(ServeError::ListenerUnresponsive),
        }
    }
}
