//! `ppe`: command-line frontend for the PPE detection service.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use ppescan::client::paging::{fetch_exhaustive, ImageFilter, PageWindow};
use ppescan::client::{ApiClient, ApiError};
use ppescan::config::{load_settings, SessionContext, Settings};
use ppescan::models::ImageRecord;
use ppescan::sinks::{ClipboardSink, DirDownloadSink, DownloadSink, TerminalClipboard};
use ppescan::timeframe::{default_window, normalize_range};
use ppescan::upload::{CandidateFile, SessionPhase, UploadSession, UploadStatus};
use ppescan::{analytics, summarize};

#[derive(Parser)]
#[command(name = "ppe", version, about = "Client for the PPE detection image-analysis service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and persist the session token
    Login {
        #[arg(long)]
        email: String,
        /// Password; prefer the environment variable in scripts
        #[arg(long, env = "PPE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Register a new account and log in
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "PPE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the persisted session token
    Logout,
    /// Show the account behind the current session
    Whoami,
    /// Upload images for detection
    Upload {
        /// Image files (JPEG, PNG or WebP, up to 10MB each)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// List analyzed images, one server page at a time
    History {
        #[arg(long, default_value_t = 0)]
        offset: u32,
        #[arg(long)]
        limit: Option<u32>,
        /// Keep only images with a detection of this label
        #[arg(long)]
        label: Option<String>,
        /// Inclusive start date, YYYY-MM-DD in local time
        #[arg(long)]
        from: Option<String>,
        /// Inclusive end date, YYYY-MM-DD in local time
        #[arg(long)]
        to: Option<String>,
    },
    /// Aggregate detection statistics over a date window
    Stats {
        /// Inclusive start date, YYYY-MM-DD; defaults to 30 days ago
        #[arg(long)]
        from: Option<String>,
        /// Inclusive end date, YYYY-MM-DD; defaults to today
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        label: Option<String>,
    },
    /// Show one image's analysis in detail
    Show {
        id: String,
        /// Also copy the detections hash to the clipboard
        #[arg(long)]
        copy_hash: bool,
    },
    /// Download an image file
    Download {
        id: String,
        /// Target directory; defaults to the data downloads directory
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Delete an image and its results
    Delete { id: String },
    /// List every detection label known to the server
    Labels,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let settings = load_settings();

    if let Err(err) = run(cli, &settings).await {
        if matches!(err.downcast_ref::<ApiError>(), Some(ApiError::Unauthorized)) {
            // An invalid token is dead weight; drop it so the next
            // command starts clean.
            let mut session = SessionContext::load(&settings);
            let _ = session.clear();
            eprintln!(
                "{} session expired or invalid, please log in again",
                style("error:").red().bold()
            );
        } else {
            eprintln!("{} {err:#}", style("error:").red().bold());
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli, settings: &Settings) -> anyhow::Result<()> {
    let mut session = SessionContext::load(settings);

    match cli.command {
        Command::Login { email, password } => {
            let client = ApiClient::new(settings, &session)?;
            let auth = client.login(&email, &password).await?;
            settings.ensure_directories()?;
            session.store(auth.token).context("failed to persist session token")?;
            println!("logged in as {}", style(&auth.user.email).green());
        }
        Command::Register { name, email, password } => {
            let client = ApiClient::new(settings, &session)?;
            let auth = client.register(&name, &email, &password).await?;
            settings.ensure_directories()?;
            session.store(auth.token).context("failed to persist session token")?;
            println!("registered {}", style(&auth.user.email).green());
        }
        Command::Logout => {
            session.clear().context("failed to remove session token")?;
            println!("logged out");
        }
        Command::Whoami => {
            require_auth(&session)?;
            let client = ApiClient::new(settings, &session)?;
            let user = client.profile().await?;
            match user.name {
                Some(name) => println!("{name} <{}>", user.email),
                None => println!("{}", user.email),
            }
        }
        Command::Upload { files } => {
            require_auth(&session)?;
            let client = ApiClient::new(settings, &session)?;
            upload(&client, &files).await?;
        }
        Command::History { offset, limit, label, from, to } => {
            require_auth(&session)?;
            let client = ApiClient::new(settings, &session)?;
            history(&client, settings, offset, limit, label, from, to).await?;
        }
        Command::Stats { from, to, label } => {
            require_auth(&session)?;
            let client = ApiClient::new(settings, &session)?;
            stats(&client, settings, from, to, label).await?;
        }
        Command::Show { id, copy_hash } => {
            require_auth(&session)?;
            let client = ApiClient::new(settings, &session)?;
            show(&client, &id, copy_hash).await?;
        }
        Command::Download { id, out } => {
            require_auth(&session)?;
            let client = ApiClient::new(settings, &session)?;
            let record = client.get_image(&id).await?;
            let bytes = client.get_image_file(&id).await?;
            let sink = DirDownloadSink::new(out.unwrap_or_else(|| settings.downloads_dir()));
            let name = if record.original_name.is_empty() {
                format!("{id}.jpg")
            } else {
                record.original_name.clone()
            };
            let path = sink.save(&name, &bytes).await?;
            println!("saved {}", path.display());
        }
        Command::Delete { id } => {
            require_auth(&session)?;
            let client = ApiClient::new(settings, &session)?;
            client.delete_image(&id).await?;
            println!("deleted {id}");
        }
        Command::Labels => {
            require_auth(&session)?;
            let client = ApiClient::new(settings, &session)?;
            for label in client.get_labels().await? {
                println!("{label}");
            }
        }
    }

    Ok(())
}

fn require_auth(session: &SessionContext) -> anyhow::Result<()> {
    if !session.is_authenticated() {
        bail!("not logged in; run `ppe login` first");
    }
    Ok(())
}

async fn upload(client: &ApiClient, files: &[PathBuf]) -> anyhow::Result<()> {
    let mut candidates = Vec::with_capacity(files.len());
    for path in files {
        let candidate = CandidateFile::from_path(path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;
        candidates.push(candidate);
    }

    let mut session = UploadSession::new();
    session.stage(candidates).await?;

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>3}% {msg}")
            .map_err(anyhow::Error::from)?,
    );
    bar.set_message(format!("uploading {} file(s)", session.files().len()));
    let mut rx = session.progress();
    let bar_task = tokio::spawn({
        let bar = bar.clone();
        async move {
            while rx.changed().await.is_ok() {
                bar.set_position(u64::from(*rx.borrow_and_update()));
            }
        }
    });

    let summary = session.commit(client).await?;
    bar_task.abort();
    bar.finish_and_clear();
    debug_assert_eq!(session.phase(), SessionPhase::Settled);

    for file in session.files() {
        match file.status {
            UploadStatus::Completed => {
                let id = file.result_id.as_deref().unwrap_or("-");
                let note = if file.replayed { " (already uploaded)" } else { "" };
                println!("{} {} -> {id}{note}", style("ok").green(), file.name);
            }
            _ => {
                let reason = file.error.as_deref().unwrap_or("unknown error");
                println!("{} {} ({reason})", style("failed").red(), file.name);
            }
        }
    }
    println!("{} succeeded, {} failed", summary.succeeded, summary.failed);
    if summary.failed > 0 {
        bail!("some uploads failed");
    }
    Ok(())
}

async fn history(
    client: &ApiClient,
    settings: &Settings,
    offset: u32,
    limit: Option<u32>,
    label: Option<String>,
    from: Option<String>,
    to: Option<String>,
) -> anyhow::Result<()> {
    let range = normalize_range(from.as_deref(), to.as_deref())?;
    let window = PageWindow {
        limit: limit.unwrap_or(settings.page_size),
        offset,
        filter: ImageFilter {
            label,
            from: range.from,
            to: range.to,
        },
    };
    let page = client.list_images(&window).await?;

    for record in &page.items {
        print_record_line(record);
    }
    if let (Some(current), Some(total_pages)) = (page.current_page, page.total_pages) {
        let total = page.total.unwrap_or(page.items.len() as u64);
        println!(
            "\npage {current} of {total_pages} ({total} image(s) total)"
        );
    }
    if let Some(next) = page.next_offset {
        println!("next page: --offset {next}");
    }
    Ok(())
}

async fn stats(
    client: &ApiClient,
    settings: &Settings,
    from: Option<String>,
    to: Option<String>,
    label: Option<String>,
) -> anyhow::Result<()> {
    let (default_from, default_to) = default_window();
    let from = from.unwrap_or(default_from);
    let to = to.unwrap_or(default_to);
    let range = normalize_range(Some(&from), Some(&to))?;

    let filter = ImageFilter {
        label,
        from: range.from,
        to: range.to,
    };
    let outcome = fetch_exhaustive(
        client,
        settings.page_size,
        filter,
        settings.max_scan_offset,
    )
    .await?;
    if outcome.truncated {
        eprintln!(
            "{} result set too large, statistics cover a partial window",
            style("warning:").yellow()
        );
    }

    let snapshot = summarize(&outcome.items);
    println!("{} to {}", style(&from).bold(), style(&to).bold());
    println!("images:          {}", snapshot.total_images);
    println!("detections:      {}", snapshot.total_detections);
    println!("avg per image:   {:.2}", snapshot.average_detections());

    if !snapshot.detections_by_label.is_empty() {
        println!("\nby label:");
        let max = snapshot
            .detections_by_label
            .values()
            .copied()
            .max()
            .unwrap_or(1);
        for (label, count) in &snapshot.detections_by_label {
            let width = (count * 30 / max.max(1)).max(1);
            println!("  {label:<16} {count:>6} {}", "#".repeat(width));
        }
    }

    if !snapshot.recent_activity.is_empty() {
        println!(
            "\nrecent activity (last {}):",
            analytics::RECENT_ACTIVITY_LIMIT
        );
        for record in &snapshot.recent_activity {
            print_record_line(record);
        }
    }
    Ok(())
}

async fn show(client: &ApiClient, id: &str, copy_hash: bool) -> anyhow::Result<()> {
    let record = client.get_image(id).await?;

    println!("{}", style(&record.original_name).bold());
    println!("id:         {}", record.id);
    if let Some(created) = record.created_at {
        println!("uploaded:   {}", created.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!("size:       {}", format_size(record.size));
    println!(
        "processed:  {}",
        if record.processed { "yes" } else { "pending" }
    );
    let url = record
        .display_url()
        .map(str::to_string)
        .unwrap_or_else(|| client.image_file_url(id));
    println!("image:      {url}");

    if record.detections.is_empty() {
        println!("\nno detections");
    } else {
        println!("\ndetections:");
        for detection in &record.detections {
            let label = if detection.label.is_empty() {
                "(unlabeled)"
            } else {
                detection.label.as_str()
            };
            let bounding_box = &detection.bounding_box;
            println!(
                "  {label:<16} {:>5.1}%  at ({:.2}, {:.2}) {:.2}x{:.2}",
                detection.confidence * 100.0,
                bounding_box.x,
                bounding_box.y,
                bounding_box.width,
                bounding_box.height,
            );
        }
    }

    if let Some(hash) = &record.detections_hash {
        println!("\ndetections hash: {hash}");
        if copy_hash {
            TerminalClipboard
                .copy(hash)
                .context("failed to write to the terminal clipboard")?;
        }
    } else if copy_hash {
        bail!("this image has no detections hash to copy");
    }
    Ok(())
}

fn print_record_line(record: &ImageRecord) {
    let when = record
        .created_at
        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "unknown time".to_string());
    let detections = record.detections.len();
    println!(
        "{}  {}  {}  {} detection(s)",
        style(&record.id).dim(),
        when,
        record.original_name,
        detections,
    );
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}
