use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ffremote_core::args::{translate, ArgumentError};
use ffremote_core::auth::{CredentialStore, Htpasswd};
use ffremote_core::client::{Client, ClientError};
use ffremote_core::config::WorkerConfig;
use ffremote_core::session::SessionTable;
use ffremote_core::supervisor::{Captured, LaunchedProcess, Launcher, ProcessHandle};
use ffremote_core::worker::Worker;
use uuid::Uuid;
use futures::future::join;
use tempfile::{tempdir, TempDir};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Clone, Copy)]
enum Script {
    /// Reads the first input through the loopback endpoint and writes it to
    /// the output.
    Copy,
    /// Creates the output and then blocks until killed.
    Hang,
    /// Exits immediately with the given code.
    Fail(i32),
    /// Writes the first line of standard input to the output.
    Echo,
}

#[derive(Default)]
struct Observed {
    args: Mutex<Vec<String>>,
    concurrent_reads: Mutex<Vec<Vec<u8>>>,
    out_of_bounds_status: Mutex<Option<u16>>,
    stdin: Mutex<String>,
    killed: AtomicBool,
    started: Notify,
}

struct ScriptedLauncher {
    script: Script,
    observed: Arc<Observed>,
}

impl ScriptedLauncher {
    fn build(script: Script) -> (Arc<dyn Launcher>, Arc<Observed>) {
        let observed = Arc::new(Observed::default());
        let launcher: Arc<dyn Launcher> = Arc::new(Self {
            script,
            observed: Arc::clone(&observed),
        });
        (launcher, observed)
    }
}

struct ScriptedHandle {
    exit: oneshot::Receiver<i32>,
    task: JoinHandle<()>,
    observed: Arc<Observed>,
}

#[async_trait]
impl ProcessHandle for ScriptedHandle {
    async fn wait(&mut self) -> std::io::Result<i32> {
        Ok((&mut self.exit).await.unwrap_or(128 + 9))
    }

    fn kill_tree(&mut self) -> std::io::Result<()> {
        self.observed.killed.store(true, Ordering::SeqCst);
        self.task.abort();
        Ok(())
    }
}

#[async_trait]
impl Launcher for ScriptedLauncher {
    async fn launch(&self, args: &[String]) -> std::io::Result<LaunchedProcess> {
        *self.observed.args.lock().unwrap() = args.to_vec();
        let (stdin, stdin_peer) = tokio::io::duplex(1024);
        let (stderr_writer, stderr) = tokio::io::duplex(4096);
        let (exit_tx, exit) = oneshot::channel();
        let script = self.script;
        let args = args.to_vec();
        let observed = Arc::clone(&self.observed);
        let task = tokio::spawn(async move {
            observed.started.notify_one();
            let code = run_script(script, &args, stdin_peer, stderr_writer, &observed).await;
            let _ = exit_tx.send(code);
        });
        Ok(LaunchedProcess {
            stdin: Box::new(stdin),
            stderr: Box::new(stderr),
            handle: Box::new(ScriptedHandle {
                exit,
                task,
                observed: Arc::clone(&self.observed),
            }),
        })
    }

    async fn capture(&self, args: &[String]) -> std::io::Result<Captured> {
        Ok(Captured {
            code: 0,
            stdout: args.join(" "),
            stderr: "printed".into(),
        })
    }
}

fn value_after<'a>(args: &'a [String], option: &str) -> &'a str {
    let index = args.iter().position(|arg| arg == option).unwrap();
    &args[index + 1]
}

async fn run_script(
    script: Script,
    args: &[String],
    stdin: DuplexStream,
    mut stderr: DuplexStream,
    observed: &Observed,
) -> i32 {
    let output = PathBuf::from(args.last().unwrap());
    match script {
        Script::Echo => {
            let mut line = String::new();
            BufReader::new(stdin).read_line(&mut line).await.unwrap();
            *observed.stdin.lock().unwrap() = line.clone();
            std::fs::write(&output, line.as_bytes()).unwrap();
            0
        }
        Script::Fail(code) => {
            stderr.write_all(b"something went wrong\n").await.unwrap();
            code
        }
        Script::Hang => {
            std::fs::write(&output, b"partial").unwrap();
            stderr.write_all(b"frame=1\r").await.unwrap();
            std::future::pending::<i32>().await
        }
        Script::Copy => {
            let cookie = value_after(args, "-cookies").split(';').next().unwrap().to_string();
            let url = Url::parse(value_after(args, "-i")).unwrap();
            let http = reqwest::Client::new();
            let get = |range: String| {
                http.get(url.clone())
                    .header(reqwest::header::COOKIE, cookie.clone())
                    .header(reqwest::header::RANGE, range)
                    .send()
            };

            let whole = get("bytes=0-".into()).await.unwrap();
            assert_eq!(whole.status(), reqwest::StatusCode::PARTIAL_CONTENT);
            let length: u64 = whole.headers()[reqwest::header::CONTENT_RANGE]
                .to_str()
                .unwrap()
                .rsplit('/')
                .next()
                .unwrap()
                .parse()
                .unwrap();
            let body = whole.bytes().await.unwrap();
            assert_eq!(body.len() as u64, length);

            let half = length / 2;
            let (first, second) = join(
                get(format!("bytes=0-{}", half + 1000)),
                get(format!("bytes={}-{}", half - 1000, length - 1)),
            )
            .await;
            let first = first.unwrap().bytes().await.unwrap().to_vec();
            let second = second.unwrap().bytes().await.unwrap().to_vec();
            *observed.concurrent_reads.lock().unwrap() = vec![first, second];

            let beyond = get(format!("bytes={length}-")).await.unwrap();
            *observed.out_of_bounds_status.lock().unwrap() = Some(beyond.status().as_u16());

            std::fs::write(&output, &body).unwrap();
            stderr.write_all(b"frame=1\rframe=2\rcopied\n").await.unwrap();
            0
        }
    }
}

struct TestWorker {
    addr: SocketAddr,
    staging: PathBuf,
    sessions: Arc<SessionTable>,
    shutdown: CancellationToken,
    _dir: TempDir,
}

impl TestWorker {
    async fn start(launcher: Arc<dyn Launcher>, credentials: Option<CredentialStore>) -> Self {
        Self::start_with_input_timeout(launcher, credentials, 5).await
    }

    async fn start_with_input_timeout(
        launcher: Arc<dyn Launcher>,
        credentials: Option<CredentialStore>,
        input_timeout_seconds: u64,
    ) -> Self {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("staging");
        let mut config = WorkerConfig::default();
        config.storage.temp_dir = Some(staging.clone());
        config.session.input_timeout_seconds = input_timeout_seconds;
        config.session.stderr_drain_seconds = 1;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let worker = Worker::new(config)
            .with_launcher(launcher)
            .with_credentials(credentials);
        let sessions = worker.sessions();
        let shutdown = CancellationToken::new();
        tokio::spawn(worker.serve(listener, shutdown.clone()));
        Self {
            addr,
            staging,
            sessions,
            shutdown,
            _dir: dir,
        }
    }

    fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    fn staged_files(&self) -> usize {
        std::fs::read_dir(&self.staging)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    async fn settled(&self) {
        for _ in 0..200 {
            if self.sessions.is_empty() && self.staged_files() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session was not torn down");
    }
}

impl Drop for TestWorker {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 253) as u8).collect()
}

fn caller_files(dir: &Path, len: usize) -> (String, String, Vec<u8>) {
    let data = pattern(len);
    let input = dir.join("a.mp4");
    std::fs::write(&input, &data).unwrap();
    let output = dir.join("b.mkv");
    (
        input.to_string_lossy().into_owned(),
        output.to_string_lossy().into_owned(),
        data,
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn remote_copy_round_trip() {
    let (launcher, observed) = ScriptedLauncher::build(Script::Copy);
    let worker = TestWorker::start(launcher, None).await;
    let caller = tempdir().unwrap();
    let (input, output, data) = caller_files(caller.path(), 300_000);

    let invocation = translate(["-w", worker.url().as_str(), "-nostdin", "-i", input.as_str(), output.as_str()]).unwrap();
    let client = Client::new(&invocation).unwrap();
    let mut statuses = Vec::new();
    let code = client
        .run(&invocation, &CancellationToken::new(), |line| statuses.push(line.to_string()))
        .await
        .unwrap();

    assert_eq!(code, 0);
    assert_eq!(std::fs::read(&output).unwrap(), data);
    assert_eq!(statuses, vec!["frame=1", "frame=2", "copied"]);

    let args = observed.args.lock().unwrap().clone();
    let input_url = value_after(&args, "-i");
    assert!(input_url.starts_with(&format!("http://127.0.0.1:{}/", worker.addr.port())));
    assert!(input_url.ends_with(".mp4"));
    assert!(args.contains(&"-nostdin".to_string()));
    let staged = args.last().unwrap();
    assert!(staged.starts_with(&worker.staging.to_string_lossy().to_string()));
    assert!(staged.ends_with(".mkv"));

    let reads = observed.concurrent_reads.lock().unwrap().clone();
    let half = data.len() / 2;
    assert_eq!(reads[0], data[..=half + 1000]);
    assert_eq!(reads[1], data[half - 1000..]);
    assert_eq!(*observed.out_of_bounds_status.lock().unwrap(), Some(416));

    worker.settled().await;
    let cookie = value_after(&args, "-cookies").split(';').next().unwrap().to_string();
    let download = reqwest::Client::new()
        .get(format!("{}{}", worker.url(), invocation.outputs[0].placeholder))
        .header(reqwest::header::COOKIE, cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(download.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_run_skips_download_and_cleans_up() {
    let (launcher, _) = ScriptedLauncher::build(Script::Fail(3));
    let worker = TestWorker::start(launcher, None).await;
    let caller = tempdir().unwrap();
    let (input, output, _) = caller_files(caller.path(), 1000);

    let invocation = translate(["-w", worker.url().as_str(), "-i", input.as_str(), output.as_str()]).unwrap();
    let client = Client::new(&invocation).unwrap().with_stdin(tokio::io::empty());
    let mut statuses = Vec::new();
    let code = client
        .run(&invocation, &CancellationToken::new(), |line| statuses.push(line.to_string()))
        .await
        .unwrap();

    assert_eq!(code, 3);
    assert_eq!(statuses, vec!["something went wrong"]);
    assert!(!Path::new(&output).exists());
    worker.settled().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn caller_disconnect_kills_transcoder() {
    let (launcher, observed) = ScriptedLauncher::build(Script::Hang);
    let worker = TestWorker::start(launcher, None).await;
    let caller = tempdir().unwrap();
    let (input, output, _) = caller_files(caller.path(), 1000);

    let invocation = translate(["-w", worker.url().as_str(), "-i", input.as_str(), output.as_str()]).unwrap();
    let client = Client::new(&invocation).unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let observer = Arc::clone(&observed);
    tokio::spawn(async move {
        observer.started.notified().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = client.run(&invocation, &cancel, |_| {}).await;
    assert!(matches!(result, Err(ClientError::Canceled)));
    worker.settled().await;
    assert!(observed.killed.load(Ordering::SeqCst));
    assert!(!Path::new(&output).exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn worker_rejects_unsupported_arguments() {
    let (launcher, observed) = ScriptedLauncher::build(Script::Copy);
    let worker = TestWorker::start(launcher, None).await;
    let caller = tempdir().unwrap();
    let (input, output, _) = caller_files(caller.path(), 1000);

    let mut invocation = translate(["-w", worker.url().as_str(), "-nostdin", "-i", input.as_str(), output.as_str()]).unwrap();
    invocation.arguments.insert(0, "-attach".into());
    invocation.arguments.insert(1, "cover.jpg".into());
    let client = Client::new(&invocation).unwrap();
    let mut statuses = Vec::new();
    let code = client
        .run(&invocation, &CancellationToken::new(), |line| statuses.push(line.to_string()))
        .await
        .unwrap();

    assert_eq!(code, 1);
    assert_eq!(statuses, vec![ArgumentError::Unsupported("attach".into()).to_string()]);
    assert!(observed.args.lock().unwrap().is_empty());
    worker.settled().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn basic_authentication_guards_every_request() {
    let entries = Htpasswd::parse("alice:{SHA}5en6G6MezRroT3XKqkdPOmY/BfQ=\n").unwrap();
    let (launcher, _) = ScriptedLauncher::build(Script::Copy);
    let worker = TestWorker::start(launcher, Some(CredentialStore::from_entries(entries))).await;
    let http = reqwest::Client::new();

    let anonymous = http.get(worker.url()).send().await.unwrap();
    assert_eq!(anonymous.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert_eq!(anonymous.headers()[reqwest::header::WWW_AUTHENTICATE], "Basic");

    let wrong = http
        .get(worker.url())
        .basic_auth("alice", Some("guess"))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), reqwest::StatusCode::FORBIDDEN);

    let endpoint = format!("http://alice:secret@{}/", worker.addr);
    let invocation = translate(["-w", endpoint.as_str(), "-version"]).unwrap();
    let client = Client::new(&invocation).unwrap();
    let (stdout, stderr) = client.query(&invocation).await.unwrap();
    assert_eq!(stdout, "-version");
    assert_eq!(stderr, "printed");
}

#[tokio::test]
async fn open_worker_answers_print_queries_and_rejects_strays() {
    let (launcher, _) = ScriptedLauncher::build(Script::Copy);
    let worker = TestWorker::start(launcher, None).await;
    let http = reqwest::Client::new();

    let printed: [String; 2] = http
        .get(worker.url())
        .query(&[("q", "-h encoder=libx264")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(printed[0], "-h encoder=libx264");

    let stray = http.get(format!("{}{}", worker.url(), Uuid::new_v4())).send().await.unwrap();
    assert_eq!(stray.status(), reqwest::StatusCode::NOT_FOUND);
    let put = http.put(worker.url()).body("q").send().await.unwrap();
    assert_eq!(put.status(), reqwest::StatusCode::NOT_FOUND);
    let delete = http.delete(worker.url()).send().await.unwrap();
    assert_eq!(delete.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn caller_stdin_reaches_the_transcoder() {
    let (launcher, observed) = ScriptedLauncher::build(Script::Echo);
    let worker = TestWorker::start(launcher, None).await;
    let caller = tempdir().unwrap();
    let (input, output, _) = caller_files(caller.path(), 1000);

    let invocation = translate(["-w", worker.url().as_str(), "-i", input.as_str(), output.as_str()]).unwrap();
    assert!(invocation.relay_stdin);
    let client = Client::new(&invocation)
        .unwrap()
        .with_stdin(std::io::Cursor::new(b"hello\n".to_vec()));
    let code = client
        .run(&invocation, &CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(code, 0);
    assert_eq!(*observed.stdin.lock().unwrap(), "hello\n");
    assert_eq!(std::fs::read(&output).unwrap(), b"hello\n");
    worker.settled().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unconnected_input_times_out_before_launch() {
    let (launcher, observed) = ScriptedLauncher::build(Script::Copy);
    let worker = TestWorker::start_with_input_timeout(launcher, None, 1).await;
    let caller = tempdir().unwrap();
    let (input, output, _) = caller_files(caller.path(), 1000);

    let mut invocation = translate(["-w", worker.url().as_str(), "-nostdin", "-i", input.as_str(), output.as_str()]).unwrap();
    let missing = Uuid::new_v4();
    invocation.arguments.insert(0, "-i".into());
    invocation.arguments.insert(1, format!("{missing}.mp4"));
    let client = Client::new(&invocation).unwrap();
    let mut statuses = Vec::new();
    let code = client
        .run(&invocation, &CancellationToken::new(), |line| statuses.push(line.to_string()))
        .await
        .unwrap();

    assert_eq!(code, 1);
    assert_eq!(statuses, vec![ArgumentError::InputNotConnected(missing).to_string()]);
    assert!(observed.args.lock().unwrap().is_empty());
    worker.settled().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn running_session_guards_inputs_and_outputs() {
    let (launcher, observed) = ScriptedLauncher::build(Script::Hang);
    let worker = TestWorker::start(launcher, None).await;
    let caller = tempdir().unwrap();
    let (input, output, _) = caller_files(caller.path(), 1000);

    let invocation = translate(["-w", worker.url().as_str(), "-nostdin", "-i", input.as_str(), output.as_str()]).unwrap();
    let placeholder = invocation.outputs[0].placeholder.clone();
    let client = Client::new(&invocation).unwrap();
    let cancel = CancellationToken::new();
    let http = reqwest::Client::new();

    let checks = async {
        observed.started.notified().await;
        let args = observed.args.lock().unwrap().clone();
        let cookie = value_after(&args, "-cookies").split(';').next().unwrap().to_string();
        let input_url = value_after(&args, "-i").to_string();
        let get = |url: String, cookie: String, range: Option<&'static str>| {
            let mut request = http.get(url).header(reqwest::header::COOKIE, cookie);
            if let Some(range) = range {
                request = request.header(reqwest::header::RANGE, range);
            }
            request.send()
        };

        let multi = get(input_url.clone(), cookie.clone(), Some("bytes=0-9,20-29")).await.unwrap();
        assert_eq!(multi.status(), reqwest::StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(multi.headers()[reqwest::header::CONTENT_RANGE], "bytes */1000");
        let unranged = get(input_url.clone(), cookie.clone(), None).await.unwrap();
        assert_eq!(unranged.status(), reqwest::StatusCode::RANGE_NOT_SATISFIABLE);

        let early = get(format!("{}{placeholder}", worker.url()), cookie, None).await.unwrap();
        assert_eq!(early.status(), reqwest::StatusCode::NOT_FOUND);

        let foreign = format!("sid={}", Uuid::new_v4());
        let stranger = get(input_url, foreign, Some("bytes=0-9")).await.unwrap();
        assert_eq!(stranger.status(), reqwest::StatusCode::NOT_FOUND);

        cancel.cancel();
    };
    let (result, ()) = tokio::join!(client.run(&invocation, &cancel, |_| {}), checks);
    assert!(matches!(result, Err(ClientError::Canceled)));
    worker.settled().await;
    assert!(!Path::new(&output).exists());
}

#[tokio::test]
async fn empty_credential_file_leaves_worker_open() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(".htpasswd");
    std::fs::write(&path, "").unwrap();
    let store = CredentialStore::open(&path).await.unwrap();
    let (launcher, _) = ScriptedLauncher::build(Script::Copy);
    let worker = TestWorker::start(launcher, Some(store)).await;

    let printed: [String; 2] = reqwest::Client::new()
        .get(worker.url())
        .query(&[("q", "-version")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(printed, ["-version".to_string(), "printed".to_string()]);
}
