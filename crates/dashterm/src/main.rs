//! Command-line client for dashboard remote terminals and file transfer.

use std::os::fd::BorrowedFd;
use std::path::PathBuf;

use dashterm_client::{
    EntryKind, FileManager, FmEvent, HttpDashboard, LocalTerminal, TerminalController,
    TerminalState,
};
use eyre::WrapErr as _;
use tokio::io::AsyncReadExt as _;

#[derive(clap::Parser)]
#[command(name = "dashterm", about = "Remote terminals and file transfer through a server dashboard")]
struct Args {
    /// Enable debug logging to ~/.dashterm/logs
    #[arg(long, global = true)]
    debug: bool,

    /// Dashboard base URL, overriding the config file.
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Open an interactive terminal on a server.
    Terminal {
        /// Server ID as known to the dashboard.
        server_id: u64,
    },
    /// List a remote directory.
    Ls {
        server_id: u64,
        /// Directory to list (defaults to the remote working directory).
        path: Option<String>,
    },
    /// Upload a local file into a remote directory.
    Upload {
        server_id: u64,
        local: PathBuf,
        remote_dir: String,
    },
    /// Download a remote file.
    Download {
        server_id: u64,
        remote: String,
        local: PathBuf,
    },
}

fn setup_terminal(fd: BorrowedFd<'_>) -> nix::Result<nix::sys::termios::Termios> {
    let orig = nix::sys::termios::tcgetattr(fd)?;
    let mut raw = orig.clone();
    nix::sys::termios::cfmakeraw(&mut raw);
    nix::sys::termios::tcsetattr(fd, nix::sys::termios::SetArg::TCSANOW, &raw)?;
    Ok(orig)
}

fn restore_terminal(fd: BorrowedFd<'_>, termios: &nix::sys::termios::Termios) {
    let _ = nix::sys::termios::tcsetattr(fd, nix::sys::termios::SetArg::TCSANOW, termios);
}

async fn run_terminal(
    config: &dashterm_config::Config,
    dashboard: HttpDashboard,
    server_id: u64,
) -> eyre::Result<()> {
    let detach = dashterm_config::Keybind::parse(&config.keybinds.detach)
        .wrap_err("invalid detach keybind")?;
    let mut winch =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::window_change())
            .wrap_err("failed to watch window size changes")?;

    let (controller, handle) =
        TerminalController::new(LocalTerminal::new(), config.timing.resize_debounce());
    let mut notices = handle.subscribe_notices();
    let mut session = tokio::spawn(async move { controller.run(&dashboard, server_id).await });

    let stdin_fd = unsafe { BorrowedFd::borrow_raw(nix::libc::STDIN_FILENO) };
    let orig_termios = setup_terminal(stdin_fd).ok();

    eprint!(
        "\x1b[2m[connecting to server {server_id}, {} to detach]\x1b[0m\r\n",
        config.keybinds.detach
    );

    let mut stdin = tokio::io::stdin();
    let mut stdin_buf = vec![0u8; 4096];
    let mut stdin_open = true;

    let state = loop {
        tokio::select! {
            result = &mut session => break result.wrap_err("terminal task panicked")?,
            result = stdin.read(&mut stdin_buf), if stdin_open => {
                match result {
                    Ok(0) | Err(_) => {
                        stdin_open = false;
                        handle.shutdown();
                    }
                    Ok(n) => {
                        let input = &stdin_buf[..n];
                        match detach.find(input) {
                            Some(at) => {
                                if at > 0 {
                                    handle.send_input(input[..at].to_vec());
                                }
                                handle.shutdown();
                            }
                            None => handle.send_input(input.to_vec()),
                        }
                    }
                }
            }
            _ = winch.recv() => handle.window_resized(),
            Ok(notice) = notices.recv() => {
                eprint!("\r\n\x1b[2m[{notice}]\x1b[0m\r\n");
            }
        }
    };

    while let Ok(notice) = notices.try_recv() {
        eprint!("\r\n\x1b[2m[{notice}]\x1b[0m\r\n");
    }

    if let Some(ref termios) = orig_termios {
        restore_terminal(stdin_fd, termios);
    }

    // stdin is read on a blocking thread that would keep the runtime alive.
    let exit_code = match state {
        TerminalState::Error(_) => 1,
        _ => 0,
    };
    std::process::exit(exit_code);
}

/// Pull file manager events until `want` matches, failing on anything that
/// ends the current operation.
async fn expect_event(
    fm: &mut FileManager,
    want: impl Fn(&FmEvent) -> bool,
) -> eyre::Result<FmEvent> {
    loop {
        let event = fm
            .next_event()
            .await
            .ok_or_else(|| eyre::eyre!("file manager session is not open"))?;
        tracing::debug!("file manager event: {event:?}");
        if want(&event) {
            return Ok(event);
        }
        match event {
            FmEvent::RemoteError(message) => eyre::bail!("remote error: {message}"),
            FmEvent::Malformed(message) => eyre::bail!("malformed response: {message}"),
            FmEvent::DownloadFailed(message) => eyre::bail!("download failed: {message}"),
            FmEvent::ConnectionError(message) => eyre::bail!("connection error: {message}"),
            FmEvent::Closed => eyre::bail!("file manager session closed"),
            FmEvent::DownloadProgress { received, size } => {
                eprint!("\r{received}/{size} bytes");
            }
            _ => {}
        }
    }
}

/// Open a file manager and wait for its first listing.
async fn open_fm(
    config: &dashterm_config::Config,
    dashboard: &HttpDashboard,
    server_id: u64,
) -> eyre::Result<FileManager> {
    let mut fm = FileManager::from_config(server_id, config);
    fm.open(dashboard)
        .await
        .wrap_err_with(|| format!("failed to open file manager on server {server_id}"))?;
    expect_event(&mut fm, |e| matches!(e, FmEvent::Listed)).await?;
    Ok(fm)
}

async fn change_dir(fm: &mut FileManager, path: &str) -> eyre::Result<()> {
    fm.list(path)?;
    expect_event(fm, |e| matches!(e, FmEvent::Listed)).await?;
    Ok(())
}

async fn run_ls(
    config: &dashterm_config::Config,
    dashboard: HttpDashboard,
    server_id: u64,
    path: Option<String>,
) -> eyre::Result<()> {
    let mut fm = open_fm(config, &dashboard, server_id).await?;
    if let Some(path) = path {
        change_dir(&mut fm, &path).await?;
    }

    if let Some(listing) = fm.listing() {
        println!("{}:", listing.path);
        for entry in &listing.entries {
            match entry.kind {
                EntryKind::Directory => println!("  {}/", entry.name),
                EntryKind::File => println!("  {}", entry.name),
                EntryKind::Other(code) => println!("  {} ({code})", entry.name),
            }
        }
    }
    fm.close();
    Ok(())
}

async fn run_upload(
    config: &dashterm_config::Config,
    dashboard: HttpDashboard,
    server_id: u64,
    local: PathBuf,
    remote_dir: String,
) -> eyre::Result<()> {
    let mut fm = open_fm(config, &dashboard, server_id).await?;
    change_dir(&mut fm, &remote_dir).await?;

    let sent = fm
        .upload(&local)
        .await
        .wrap_err_with(|| format!("failed to upload {}", local.display()))?;
    expect_event(&mut fm, |e| matches!(e, FmEvent::UploadComplete)).await?;
    println!("Uploaded {sent} bytes to {}", fm.cwd());
    fm.close();
    Ok(())
}

async fn run_download(
    config: &dashterm_config::Config,
    dashboard: HttpDashboard,
    server_id: u64,
    remote: String,
    local: PathBuf,
) -> eyre::Result<()> {
    let mut fm = open_fm(config, &dashboard, server_id).await?;

    let file = tokio::fs::File::create(&local)
        .await
        .wrap_err_with(|| format!("failed to create {}", local.display()))?;
    fm.download(&remote, file)?;
    let done = expect_event(&mut fm, |e| matches!(e, FmEvent::DownloadComplete { .. })).await?;
    if let FmEvent::DownloadComplete { size } = done {
        eprintln!();
        println!("Downloaded {size} bytes to {}", local.display());
    }
    fm.close();
    Ok(())
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    let args = <Args as clap::Parser>::parse();

    // Setup logging
    if args.debug {
        let log_dir = dirs::home_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join(".dashterm")
            .join("logs");
        std::fs::create_dir_all(&log_dir)?;

        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let log_path = log_dir.join(format!("{timestamp}.log"));
        let log_file = std::fs::File::create(&log_path)?;

        tracing_subscriber::fmt()
            .with_writer(log_file)
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .init();

        eprintln!("debug log: {}", log_path.display());
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    }

    let mut config = dashterm_config::load().wrap_err("failed to load dashterm configuration")?;
    if let Some(url) = args.url {
        config.dashboard.url = url;
    }
    let dashboard = HttpDashboard::from_config(&config)
        .wrap_err_with(|| format!("invalid dashboard URL '{}'", config.dashboard.url))?;

    match args.command {
        Command::Terminal { server_id } => run_terminal(&config, dashboard, server_id).await?,
        Command::Ls { server_id, path } => run_ls(&config, dashboard, server_id, path).await?,
        Command::Upload {
            server_id,
            local,
            remote_dir,
        } => run_upload(&config, dashboard, server_id, local, remote_dir).await?,
        Command::Download {
            server_id,
            remote,
            local,
        } => run_download(&config, dashboard, server_id, remote, local).await?,
    }

    Ok(())
}
