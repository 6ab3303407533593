//! The caller side: connects to a worker, serves local inputs by range and
//! downloads outputs once the transcoder succeeds.

mod endpoint;
mod error;
mod responder;

use std::time::Duration;

use futures::future::{join_all, try_join_all};
use futures::{SinkExt, StreamExt};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, COOKIE};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::args::{Invocation, LocalInput, LocalOutput};

pub use endpoint::Endpoint;
pub use error::{ClientError, ClientResult};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const STDIN_RETRY_DELAY: Duration = Duration::from_millis(100);

type StandardInput = Box<dyn AsyncRead + Send + Unpin>;

/// Runs translated invocations against one worker.
pub struct Client {
    endpoint: Endpoint,
    http: reqwest::Client,
    connect_timeout: Duration,
    stdin: Mutex<Option<StandardInput>>,
}

impl Client {
    pub fn new(invocation: &Invocation) -> ClientResult<Self> {
        let endpoint = Endpoint::new(&invocation.endpoint)?;
        let connect_timeout = invocation.timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let mut builder = reqwest::Client::builder().connect_timeout(connect_timeout);
        if let Some(timeout) = invocation.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(authorization) = endpoint.authorization() {
            let mut headers = reqwest::header::HeaderMap::new();
            let value = reqwest::header::HeaderValue::from_str(authorization)
                .map_err(|_| ClientError::InvalidHeader("Authorization"))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }
        Ok(Self {
            endpoint,
            http: builder.build()?,
            connect_timeout,
            stdin: Mutex::new(None),
        })
    }

    /// Relays `stdin` to the transcoder unless the invocation says
    /// `-nostdin`.
    pub fn with_stdin(self, stdin: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            stdin: Mutex::new(Some(Box::new(stdin))),
            ..self
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Runs a print-only invocation, returning `(stdout, stderr)`.
    pub async fn query(&self, invocation: &Invocation) -> ClientResult<(String, String)> {
        let url = self.endpoint.http("")?;
        let request = self.http.get(url).query(&[("q", invocation.query())]);
        let [stdout, stderr]: [String; 2] = request.send().await?.error_for_status()?.json().await?;
        Ok((stdout, stderr))
    }

    /// Runs `invocation` to completion and returns the transcoder's exit
    /// code. Status lines from the worker are passed to `on_status`.
    pub async fn run<F>(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
        on_status: F,
    ) -> ClientResult<i32>
    where
        F: FnMut(&str) + Send,
    {
        tokio::select! {
            _ = cancel.cancelled() => Err(ClientError::Canceled),
            result = self.run_session(invocation, cancel, on_status) => result,
        }
    }

    async fn run_session<F>(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
        mut on_status: F,
    ) -> ClientResult<i32>
    where
        F: FnMut(&str) + Send,
    {
        let mut control = self.connect("", None).await?;
        let cookie = receive_cookie(&mut control).await?;
        debug!(cookie = %cookie, "session opened");

        let opened = try_join_all(
            invocation
                .inputs
                .iter()
                .map(|input| self.open_input(input, &cookie)),
        )
        .await?;
        let responders: Vec<_> = opened
            .into_iter()
            .map(|(socket, file, input)| {
                tokio::spawn(responder::respond(socket, file, input.path.clone(), cancel.clone()))
            })
            .collect();

        control
            .send(Message::Text(serde_json::to_string(&invocation.arguments)?))
            .await?;

        let relay_cancel = cancel.child_token();
        if invocation.relay_stdin {
            self.start_stdin_relay(&cookie, relay_cancel.clone()).await;
        }
        let code = loop {
            match control.next().await {
                Some(Ok(Message::Text(line))) => {
                    on_status(&line);
                }
                Some(Ok(Message::Close(frame))) => {
                    let frame = frame.ok_or(ClientError::Disconnected)?;
                    if frame.code != CloseCode::Normal {
                        return Err(ClientError::Worker);
                    }
                    break frame.reason.parse::<i32>().unwrap_or(1);
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(err.into()),
                None => return Err(ClientError::Disconnected),
            }
        };
        relay_cancel.cancel();
        debug!(code, "transcoder finished");

        for finished in join_all(responders).await {
            match finished {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "input connection failed"),
                Err(err) => warn!(error = %err, "input task panicked"),
            }
        }

        if code == 0 {
            try_join_all(
                invocation
                    .outputs
                    .iter()
                    .filter(|output| output.path.is_some())
                    .map(|output| self.download(output, &cookie)),
            )
            .await?;
        }

        let _ = control.close(None).await;
        Ok(code)
    }

    async fn connect(&self, path: &str, cookie: Option<&str>) -> ClientResult<WsStream> {
        let url = self.endpoint.websocket(path)?;
        let mut request = url.as_str().into_client_request()?;
        if let Some(authorization) = self.endpoint.authorization() {
            let value = HeaderValue::from_str(authorization)
                .map_err(|_| ClientError::InvalidHeader("Authorization"))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        if let Some(cookie) = cookie {
            let value =
                HeaderValue::from_str(cookie).map_err(|_| ClientError::InvalidHeader("Cookie"))?;
            request.headers_mut().insert(COOKIE, value);
        }
        let connecting = tokio_tungstenite::connect_async(request);
        let (socket, _) = tokio::time::timeout(self.connect_timeout, connecting)
            .await
            .map_err(|_| ClientError::Timeout)??;
        Ok(socket)
    }

    /// Opens the data connection for one input and declares its length.
    async fn open_input<'a>(
        &self,
        input: &'a LocalInput,
        cookie: &str,
    ) -> ClientResult<(WsStream, File, &'a LocalInput)> {
        let file = File::open(&input.path)
            .await
            .map_err(ClientError::io(&input.path))?;
        let length = file
            .metadata()
            .await
            .map_err(ClientError::io(&input.path))?
            .len();
        let mut socket = self.connect(&input.id.to_string(), Some(cookie)).await?;
        socket
            .send(Message::Text(serde_json::to_string(&length)?))
            .await?;
        debug!(input = %input.id, path = %input.path.display(), length, "input connected");
        Ok((socket, file, input))
    }

    async fn download(&self, output: &LocalOutput, cookie: &str) -> ClientResult<()> {
        let Some(path) = output.path.as_deref() else {
            return Ok(());
        };
        let url = self.endpoint.http(&output.placeholder)?;
        let response = self
            .http
            .get(url)
            .header(reqwest::header::COOKIE, cookie)
            .send()
            .await?
            .error_for_status()?;
        let mut stream = response.bytes_stream();
        let mut file = File::create(path).await.map_err(ClientError::io(path))?;
        while let Some(chunk) = stream.next().await {
            let data = chunk?;
            file.write_all(&data).await.map_err(ClientError::io(path))?;
        }
        file.flush().await.map_err(ClientError::io(path))?;
        debug!(path = %path.display(), "output downloaded");
        Ok(())
    }

    /// Forwards caller standard input, one `PUT` per read, until `cancel`.
    /// Reads that arrive before the transcoder has started are retried.
    async fn start_stdin_relay(&self, cookie: &str, cancel: CancellationToken) {
        let Some(mut stdin) = self.stdin.lock().await.take() else {
            return;
        };
        let Ok(url) = self.endpoint.http("") else {
            return;
        };
        let http = self.http.clone();
        let cookie = cookie.to_string();
        tokio::spawn(async move {
            let mut buffer = vec![0u8; 4096];
            loop {
                let read = tokio::select! {
                    _ = cancel.cancelled() => break,
                    read = stdin.read(&mut buffer) => read,
                };
                let read = match read {
                    Ok(0) | Err(_) => break,
                    Ok(read) => read,
                };
                loop {
                    let sent = http
                        .put(url.clone())
                        .header(reqwest::header::COOKIE, cookie.as_str())
                        .header(reqwest::header::CONTENT_TYPE, "text/plain")
                        .body(buffer[..read].to_vec())
                        .send()
                        .await;
                    match sent {
                        Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                            tokio::select! {
                                _ = cancel.cancelled() => return,
                                _ = tokio::time::sleep(STDIN_RETRY_DELAY) => {}
                            }
                        }
                        Ok(response) => {
                            if let Err(err) = response.error_for_status() {
                                debug!(error = %err, "standard input not delivered");
                            }
                            break;
                        }
                        Err(err) => {
                            debug!(error = %err, "standard input not delivered");
                            break;
                        }
                    }
                }
            }
        });
    }
}

/// The worker's first message, `sid=<id>`, reduced to a cookie pair.
async fn receive_cookie(control: &mut WsStream) -> ClientResult<String> {
    loop {
        match control.next().await {
            Some(Ok(Message::Text(text))) => {
                let cookie = text.split(';').next().unwrap_or_default().trim();
                if !cookie.starts_with("sid=") {
                    return Err(ClientError::Protocol("Unexpected command received".into()));
                }
                return Ok(cookie.to_string());
            }
            Some(Ok(Message::Close(_))) | None => return Err(ClientError::Disconnected),
            Some(Ok(Message::Binary(_))) => {
                return Err(ClientError::Protocol("Unexpected command received".into()));
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(err.into()),
        }
    }
}
