//! Protocol front: one TCP listener speaking a relaxed HTTP/1.1 subset.
//!
//! Every connection carries exactly one request and one response:
//! - `GET <path> HTTP/1.1` serves static files from `root/www`
//! - `POST /cgi-bin/ccgi.sh HTTP/1.1` runs a command from `root/bin`
//! - anything else goes verbatim to the application [`Handler`]
//!
//! A request equal to the configured stop code closes the listener. Workers
//! already serving other connections are left to finish.

pub mod cgi;
pub mod response;
pub mod static_files;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::runner::CommandRunner;
use crate::transport::{self, Connection, Listener, TransportError};

pub use response::{
    bad_request_response, html_response, not_found_response, ok_response, redirect_response,
    text_response,
};

/// Pause after a failed accept before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Deadline used by [`stop`] for its single exchange.
const STOP_TIMEOUT_MS: i64 = 5_000;

/// Application logic for payloads that are not HTTP requests.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Returns the raw bytes to write back.
    async fn handle(&self, request: &str) -> Vec<u8>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Stopped,
    Listening,
}

/// How one request will be answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route<'a> {
    /// Static file or directory redirect for this target.
    Get(&'a str),
    /// CGI command with its single argument.
    Command { command: String, parameter: String },
    /// Malformed HTTP; the payload is echoed back.
    BadRequest,
    /// Not HTTP at all.
    Application,
}

/// Classifies a request by its first line.
pub fn route(request: &str) -> Route<'_> {
    let (first_line, has_newline) = match request.split_once('\n') {
        Some((line, _)) => (line.trim(), true),
        None => (request.trim(), false),
    };

    if first_line.starts_with("GET ") {
        if !has_newline {
            return Route::BadRequest;
        }
        let Some(target) = first_line
            .strip_prefix("GET ")
            .and_then(|rest| rest.strip_suffix(" HTTP/1.1"))
            .map(str::trim)
        else {
            return Route::BadRequest;
        };
        if target.is_empty() || target.contains(' ') {
            return Route::BadRequest;
        }
        return Route::Get(target);
    }

    if first_line.starts_with("POST ") {
        if !has_newline || first_line != cgi::CGI_REQUEST_LINE {
            return Route::BadRequest;
        }
        let unix = request.replace('\r', "");
        let Some((_, body)) = unix.split_once("\n\n") else {
            return Route::BadRequest;
        };
        return match cgi::split_body(body.trim()) {
            Some((command, parameter)) if cgi::is_valid_command(command) => Route::Command {
                command: command.to_string(),
                parameter: parameter.to_string(),
            },
            _ => Route::BadRequest,
        };
    }

    Route::Application
}

/// Turns one request into its response bytes.
#[derive(Clone)]
pub struct Dispatcher {
    web_root: PathBuf,
    bin_dir: PathBuf,
    handler: Arc<dyn Handler>,
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("web_root", &self.web_root)
            .field("bin_dir", &self.bin_dir)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        config: &ServerConfig,
        handler: Arc<dyn Handler>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            web_root: config.web_root(),
            bin_dir: config.bin_dir(),
            handler,
            runner,
        }
    }

    pub async fn dispatch(&self, request: &str) -> Vec<u8> {
        match route(request) {
            Route::Get(target) => static_files::serve_get(&self.web_root, target).await,
            Route::Command { command, parameter } => {
                cgi::run_command(self.runner.as_ref(), &self.bin_dir, &command, &parameter).await
            }
            Route::BadRequest => {
                tracing::debug!("Malformed HTTP request");
                bad_request_response(request)
            }
            Route::Application => self.handler.handle(request).await,
        }
    }
}

/// The server: accept loop plus one worker task per connection.
pub struct Gateway {
    config: ServerConfig,
    dispatcher: Dispatcher,
    state: Mutex<GatewayState>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("port", &self.config.port)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl Gateway {
    pub fn new(
        config: ServerConfig,
        handler: Arc<dyn Handler>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let dispatcher = Dispatcher::new(&config, handler, runner);
        Self {
            config,
            dispatcher,
            state: Mutex::new(GatewayState::Stopped),
        }
    }

    pub fn state(&self) -> GatewayState {
        *self.state.lock()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Binds the configured port and serves until the stop code arrives.
    pub async fn start(&self) -> Result<(), TransportError> {
        let listener = transport::listen(self.config.port).await?;
        self.serve(listener).await;
        Ok(())
    }

    /// Serves on an already bound listener until the stop code arrives.
    ///
    /// The request is read here, before a worker is spawned, so the stop
    /// code never races with dispatch. A client that connects and sends
    /// nothing holds up every other accept until `timeout_ms` expires; with
    /// `timeout_ms <= 0` it holds it up until that client disconnects.
    pub async fn serve(&self, mut listener: Listener) {
        {
            let mut state = self.state.lock();
            if *state == GatewayState::Listening {
                tracing::warn!("Gateway already listening, ignoring second start");
                return;
            }
            *state = GatewayState::Listening;
        }
        tracing::info!(
            addr = %listener.local_addr(),
            root = %self.config.root.display(),
            "Gateway listening"
        );

        loop {
            let mut conn = match listener.accept(self.config.timeout_ms).await {
                Ok(conn) => conn,
                Err(TransportError::Closed) => break,
                Err(e) => {
                    tracing::warn!("{e}");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    continue;
                }
            };
            tracing::debug!(peer = %conn.peer_addr(), "Connection accepted");

            let request = match conn.read(self.config.max_request_bytes).await {
                Ok(bytes) if bytes.is_empty() => {
                    conn.close().await;
                    continue;
                }
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    tracing::warn!(peer = %conn.peer_addr(), "{e}");
                    conn.close().await;
                    continue;
                }
            };

            if request == self.config.stop_code {
                tracing::info!(peer = %conn.peer_addr(), "Stop code received");
                conn.close().await;
                listener.close();
                break;
            }

            let dispatcher = self.dispatcher.clone();
            tokio::spawn(async move {
                respond(dispatcher, conn, request).await;
            });
        }

        *self.state.lock() = GatewayState::Stopped;
        tracing::info!("Gateway stopped");
    }
}

async fn respond(dispatcher: Dispatcher, mut conn: Connection, request: String) {
    let response = dispatcher.dispatch(&request).await;
    if let Err(e) = conn.write(&response).await {
        tracing::warn!(peer = %conn.peer_addr(), "{e}");
    }
    conn.close().await;
}

/// Asks the gateway on `localhost:<port>` to stop.
pub async fn stop(port: u16, stop_code: &str) -> Result<(), TransportError> {
    let mut conn = transport::dial(&format!("localhost:{port}"), STOP_TIMEOUT_MS).await?;
    let sent = conn.write(stop_code.as_bytes()).await;
    conn.close().await;
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CommandOutput;
    use std::path::Path;
    use tempfile::TempDir;

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn handle(&self, request: &str) -> Vec<u8> {
            format!("echo:{request}").into_bytes()
        }
    }

    struct Fixed;

    #[async_trait]
    impl CommandRunner for Fixed {
        async fn run(&self, command: &Path, args: &[String]) -> CommandOutput {
            let name = command.file_name().unwrap().to_string_lossy().into_owned();
            CommandOutput {
                stdout: format!("{name}({})", args.join(",")),
                stderr: String::new(),
            }
        }
    }

    fn dispatcher(root: &Path) -> Dispatcher {
        let config = ServerConfig {
            root: root.to_path_buf(),
            ..ServerConfig::default()
        };
        Dispatcher::new(&config, Arc::new(Echo), Arc::new(Fixed))
    }

    fn text(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn routes_by_first_line() {
        assert_eq!(route("GET /a.css HTTP/1.1\nHost: x\n\n"), Route::Get("/a.css"));
        assert_eq!(route("GET /a?b=1 HTTP/1.1\r\n\r\n"), Route::Get("/a?b=1"));
        assert_eq!(route("GET /a.css HTTP/1.0\n\n"), Route::BadRequest);
        assert_eq!(route("GET /a.css HTTP/1.1"), Route::BadRequest);
        assert_eq!(route("GET  HTTP/1.1\n"), Route::BadRequest);
        assert_eq!(route("POST /other HTTP/1.1\n\napp:x"), Route::BadRequest);
        assert_eq!(route("session:cipher"), Route::Application);
        assert_eq!(route(":abc\nmore"), Route::Application);
    }

    #[test]
    fn cgi_route_needs_blank_line_and_colon() {
        assert_eq!(
            route("POST /cgi-bin/ccgi.sh HTTP/1.1\r\nHost: x\r\n\r\napp:a:b\r\n"),
            Route::Command {
                command: "app".into(),
                parameter: "a:b".into()
            }
        );
        assert_eq!(route("POST /cgi-bin/ccgi.sh HTTP/1.1\nHost: x\napp:a"), Route::BadRequest);
        assert_eq!(route("POST /cgi-bin/ccgi.sh HTTP/1.1\n\nnocolon"), Route::BadRequest);
        assert_eq!(route("POST /cgi-bin/ccgi.sh HTTP/1.1\n\n../x:a"), Route::BadRequest);
    }

    #[tokio::test]
    async fn dispatch_reaches_every_target() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("www")).unwrap();
        std::fs::write(tmp.path().join("www").join("page.html"), "<b>x</b>").unwrap();
        let d = dispatcher(tmp.path());

        let rp = text(d.dispatch("GET /page.html HTTP/1.1\n\n").await);
        assert!(rp.starts_with("HTTP/1.1 200 OK\n"));
        assert!(rp.contains("Content-type: text/html\n"));

        let rp = text(d.dispatch("GET /docs HTTP/1.1\n\n").await);
        assert!(rp.starts_with("HTTP/1.1 308"));

        let rp = text(d.dispatch("POST /cgi-bin/ccgi.sh HTTP/1.1\n\nrun:42").await);
        assert!(rp.ends_with("\n\nrun(42)"));

        let rp = text(d.dispatch("GET nonsense\n").await);
        assert!(rp.starts_with("HTTP/1.1 400 Bad Request\n"));
        assert!(rp.ends_with("Bad Request:\nGET nonsense\n"));

        assert_eq!(text(d.dispatch("abc:def").await), "echo:abc:def");
    }

    #[tokio::test]
    async fn stop_code_ends_serve() {
        let tmp = TempDir::new().unwrap();
        let config = ServerConfig {
            root: tmp.path().to_path_buf(),
            stop_code: "halt-now".into(),
            timeout_ms: 2_000,
            ..ServerConfig::default()
        };
        let gateway = Arc::new(Gateway::new(config, Arc::new(Echo), Arc::new(Fixed)));
        let listener = transport::listen(0).await.unwrap();
        let port = listener.local_addr().port();

        let gw = Arc::clone(&gateway);
        let task = tokio::spawn(async move { gw.serve(listener).await });

        // Wait for the loop to flag itself as listening.
        for _ in 0..50 {
            if gateway.state() == GatewayState::Listening {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(gateway.state(), GatewayState::Listening);

        stop(port, "halt-now").await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(gateway.state(), GatewayState::Stopped);
    }

    #[tokio::test]
    async fn idle_client_delays_accept_only_until_deadline() {
        let tmp = TempDir::new().unwrap();
        let config = ServerConfig {
            root: tmp.path().to_path_buf(),
            stop_code: "halt-now".into(),
            timeout_ms: 200,
            ..ServerConfig::default()
        };
        let gateway = Arc::new(Gateway::new(config, Arc::new(Echo), Arc::new(Fixed)));
        let listener = transport::listen(0).await.unwrap();
        let port = listener.local_addr().port();
        let addr = format!("127.0.0.1:{port}");
        let gw = Arc::clone(&gateway);
        let task = tokio::spawn(async move { gw.serve(listener).await });

        let _idle = transport::dial(&addr, 0).await.unwrap();

        let mut client = transport::dial(&addr, 3_000).await.unwrap();
        client.write(b"after idle").await.unwrap();
        let mut reply = Vec::new();
        loop {
            let chunk = client.read(1_000).await.unwrap();
            if chunk.is_empty() {
                break;
            }
            reply.extend_from_slice(&chunk);
        }
        assert_eq!(reply, b"echo:after idle");

        stop(port, "halt-now").await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
