use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

fn main() {
    let options = match handle_cli_flags() {
        Some(options) => options,
        None => return,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("boardview=info")),
        )
        .init();

    if let Err(err) = boardview::run(options) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

/// Parses the command line. `None` means a flag was handled and the process
/// should exit.
fn handle_cli_flags() -> Option<boardview::app::RunOptions> {
    let mut options = boardview::app::RunOptions::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("boardview {}", boardview::VERSION);
                return None;
            }
            "--help" | "-h" => {
                println!(
                    "boardview - follow an imageboard thread and its new replies.\n\n  --watch <url>        Load a thread and poll it for new replies\n  --config <path>      Read configuration from <path>\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message"
                );
                return None;
            }
            "--watch" => match args.next() {
                Some(url) => options.thread_url = Some(url),
                None => {
                    eprintln!("error: --watch needs a thread url");
                    std::process::exit(2);
                }
            },
            "--config" => match args.next() {
                Some(path) => options.config_file = Some(PathBuf::from(path)),
                None => {
                    eprintln!("error: --config needs a path");
                    std::process::exit(2);
                }
            },
            other => {
                eprintln!("error: unknown argument {other:?}");
                std::process::exit(2);
            }
        }
    }
    Some(options)
}
