mod clipboard;
mod render;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use client_core::{
    auth_flow::AUTO_CLOSE_DELAY,
    config::{load_settings, Settings},
    error::NOT_CONFIGURED_MESSAGE,
    AuthModalState, CopyOutcome, DashboardEvent, FileUpload, HttpBackend, StudentDashboard,
    SubmissionForm,
};
use shared::domain::AssignmentId;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::clipboard::SystemClipboard;

#[derive(Parser, Debug)]
#[command(name = "writercoach", about = "Student dashboard for the writing coach service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Email a magic sign-in link.
    SignIn {
        #[arg(long)]
        email: String,
    },
    /// Finish signing in from a magic link or an emailed code.
    Verify(VerifyArgs),
    SignOut,
    /// Show assignments, recent submissions and feedback.
    Dashboard,
    /// Upload a draft (and optional transcript) for an assignment.
    Submit(SubmitArgs),
    /// Request a progress digest.
    Digest {
        /// Copy the signed download link to the clipboard.
        #[arg(long)]
        copy: bool,
    },
}

#[derive(Args, Debug)]
struct VerifyArgs {
    /// The URL the magic link redirected to.
    #[arg(long, conflicts_with_all = ["email", "code"])]
    link: Option<String>,
    #[arg(long, requires = "code")]
    email: Option<String>,
    #[arg(long, requires = "email")]
    code: Option<String>,
}

#[derive(Args, Debug)]
struct SubmitArgs {
    #[arg(long)]
    assignment: AssignmentId,
    #[arg(long)]
    draft: PathBuf,
    #[arg(long)]
    transcript: Option<PathBuf>,
    #[arg(long)]
    reflection: Option<String>,
    #[arg(long)]
    minutes: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let settings = load_settings();
    let backend = HttpBackend::from_settings(&settings);
    let dashboard = build_dashboard(&settings, backend.as_ref());
    trace_events(&dashboard);

    match cli.command {
        Command::SignIn { email } => sign_in(&dashboard, &email).await,
        Command::Verify(args) => verify(backend, args).await,
        Command::SignOut => sign_out(&dashboard).await,
        Command::Dashboard => show_dashboard(&dashboard).await,
        Command::Submit(args) => submit(&dashboard, args).await,
        Command::Digest { copy } => digest(&dashboard, copy).await,
    }
}

fn build_dashboard(
    settings: &Settings,
    backend: Option<&Arc<HttpBackend>>,
) -> Arc<StudentDashboard> {
    let services = backend.map(|backend| backend.services(settings.digest_function.clone()));
    StudentDashboard::with_clipboard(services, Arc::new(SystemClipboard))
}

fn trace_events(dashboard: &StudentDashboard) {
    let mut events = dashboard.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                DashboardEvent::CollectionSettled { collection, status } => {
                    debug!(collection = collection.name(), %status, "event: collection settled");
                }
                other => debug!(?other, "event"),
            }
        }
    });
}

/// Starts the dashboard and waits for the loads a recovered session triggers.
async fn start(dashboard: &StudentDashboard) {
    dashboard.start().await;
    dashboard.sync().settled().await;
}

async fn sign_in(dashboard: &StudentDashboard, email: &str) -> Result<()> {
    dashboard.start().await;
    let result = dashboard.auth_flow().submit_email(email).await;

    let view = dashboard.view_snapshot().await;
    if let Some(message) = &view.auth_modal.message {
        println!("{}", render::status_message(message));
    }
    result?;

    tokio::time::sleep(AUTO_CLOSE_DELAY).await;
    if dashboard.auth_flow().state().await == AuthModalState::Closed {
        println!("Open the link, then run `writercoach verify --link <URL>`.");
    }
    Ok(())
}

async fn verify(backend: Option<Arc<HttpBackend>>, args: VerifyArgs) -> Result<()> {
    let backend = backend.ok_or_else(|| anyhow!(NOT_CONFIGURED_MESSAGE))?;
    let identity = match (args.link, args.email, args.code) {
        (Some(link), _, _) => backend.complete_sign_in_from_redirect(&link).await?,
        (None, Some(email), Some(code)) => backend.verify_email_code(&email, &code).await?,
        _ => return Err(anyhow!("pass --link, or --email together with --code")),
    };
    println!(
        "Signed in as {}",
        identity.email.as_deref().unwrap_or("(no email)")
    );
    Ok(())
}

async fn sign_out(dashboard: &StudentDashboard) -> Result<()> {
    start(dashboard).await;
    let result = dashboard.auth_flow().sign_out().await;
    if let Some(message) = &dashboard.view_snapshot().await.auth_modal.message {
        println!("{}", render::status_message(message));
    }
    result.map_err(Into::into)
}

async fn show_dashboard(dashboard: &StudentDashboard) -> Result<()> {
    start(dashboard).await;
    print!("{}", render::dashboard(&dashboard.view_snapshot().await));
    Ok(())
}

async fn submit(dashboard: &StudentDashboard, args: SubmitArgs) -> Result<()> {
    start(dashboard).await;

    let draft = read_upload(&args.draft).await?;
    let transcript = match &args.transcript {
        Some(path) => Some(read_upload(path).await?),
        None => None,
    };
    let result = dashboard
        .submissions()
        .submit_form(SubmissionForm {
            assignment_id: Some(args.assignment),
            draft: Some(draft),
            transcript,
            reflection: args.reflection,
            time_spent_minutes: args.minutes,
        })
        .await;

    let view = dashboard.view_snapshot().await;
    if let Some(status) = &view.submission_form.status {
        println!("{status}");
    }
    result?;
    print!("{}", render::dashboard(&view));
    Ok(())
}

async fn read_upload(path: &Path) -> Result<FileUpload> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let upload = FileUpload::new(file_name, bytes);
    Ok(match mime_guess::from_path(path).first_raw() {
        Some(mime) => upload.with_content_type(mime),
        None => upload,
    })
}

async fn digest(dashboard: &StudentDashboard, copy: bool) -> Result<()> {
    start(dashboard).await;
    let result = dashboard.digest().request().await;

    let view = dashboard.view_snapshot().await;
    if let Some(status) = view.digest.status {
        eprintln!("{status}");
    }
    if !view.digest.output.is_empty() {
        println!("{}", view.digest.output);
    }
    result?;

    if copy {
        match dashboard.digest().copy_link().await {
            CopyOutcome::Copied => eprintln!("Copied"),
            CopyOutcome::Failed => eprintln!("Copy failed"),
            CopyOutcome::NothingToCopy => eprintln!("No signed link to copy."),
        }
    }
    Ok(())
}
