use clap::Parser;
use ffremote::{client_log_level, init_logging, run_client, run_worker, wants_usage, WorkerCli, USAGE};
use tracing::level_filters::LevelFilter;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.first().map(String::as_str) == Some("worker") {
        let cli = WorkerCli::parse_from(&args);
        init_logging(LevelFilter::INFO);
        if let Err(err) = run_worker(cli).await {
            eprintln!("error: {err}");
            std::process::exit(err.exit_code());
        }
        return;
    }

    if wants_usage(&args) {
        eprintln!("{USAGE}");
        std::process::exit(1);
    }
    init_logging(client_log_level(&args));
    let code = match run_client(args).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err}");
            err.exit_code()
        }
    };
    std::process::exit(code);
}
