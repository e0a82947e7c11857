use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use mipl_admin::config::{AdminConfig, ConfigError};
use mipl_admin::token_store::TokenStore;
use mipl_admin::{
    AdminIdentityProvider, AuthError, Credentials, ErrorCode, GateDecision, IdentityProvider, ProtectedView, SessionState,
    SessionStore, ViewAction,
};
use serde_json::json;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{} ({})", .0.user_message(), .0.error_code())]
    Auth(#[from] AuthError),
    #[error("registration requires ADMIN_AUTH_PROVIDER=firebase")]
    RegisterUnsupported,
    #[error("invalid JSON output: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            Self::Auth(AuthError::InvalidCredentials) => ExitCode::from(2),
            Self::Auth(AuthError::ProviderUnconfigured(_)) | Self::Config(_) | Self::RegisterUnsupported => {
                ExitCode::from(78)
            }
            Self::Auth(AuthError::NetworkUnavailable(_)) | Self::Json(_) => ExitCode::FAILURE,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "mipl-admin", about = "Admin session gate for the MIPL site")]
struct Cli {
    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve the persisted session and report the gate decision.
    Status(StatusArgs),
    /// Sign in and persist the session.
    Login(LoginArgs),
    /// End the session and forget the persisted token.
    Logout,
    /// Create an admin account (firebase only).
    Register(LoginArgs),
}

#[derive(Args, Debug)]
struct StatusArgs {
    /// Take the "continue anyway" override when it is offered. Access stays denied.
    #[arg(long)]
    continue_anyway: bool,

    /// Give up waiting after this many milliseconds and report pending.
    #[arg(long)]
    max_wait_ms: Option<u64>,
}

#[derive(Args, Debug)]
struct LoginArgs {
    /// Username or email.
    #[arg(long, env = "ADMIN_LOGIN_USERNAME")]
    username: String,

    #[arg(long, env = "ADMIN_LOGIN_PASSWORD", hide_env_values = true)]
    password: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            e.exit_code()
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let config = AdminConfig::from_env()?;
    let tokens = Arc::new(TokenStore::file(&config.session_path));
    let provider = AdminIdentityProvider::from_config(&config, tokens);
    tracing::debug!(provider = provider.name(), session_path = %config.session_path.display(), "admin client ready");

    match cli.command {
        Command::Status(args) => run_status(&config, &provider, &args, cli.json).await,
        Command::Login(args) => {
            let identity = provider.sign_in(&Credentials::new(args.username, args.password)).await?;
            if cli.json {
                print_json(&json!({ "user": { "id": identity.id, "name": identity.display_name } }))?;
            } else {
                println!("signed in as {}", identity.label());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Logout => {
            provider.sign_out().await?;
            if !cli.json {
                println!("signed out");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Register(args) => {
            let AdminIdentityProvider::Firebase(firebase) = &provider else {
                return Err(CliError::RegisterUnsupported);
            };
            let identity = firebase.register(&args.username, &args.password).await?;
            if cli.json {
                print_json(&json!({ "user": { "id": identity.id, "name": identity.display_name } }))?;
            } else {
                println!("registered and signed in as {}", identity.label());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Drive the protected view until it renders, redirects, or the wait limit
/// passes. Exit codes: 0 granted, 3 denied, 4 still pending.
async fn run_status(
    config: &AdminConfig,
    provider: &AdminIdentityProvider,
    args: &StatusArgs,
    json_output: bool,
) -> Result<ExitCode, CliError> {
    let store = Arc::new(SessionStore::new(provider, config.timings.resolve_bound));
    let changed = Arc::new(tokio::sync::Notify::new());
    let _changes = store.on_change({
        let changed = Arc::clone(&changed);
        Arc::new(move |_: &SessionState| changed.notify_one())
    });
    let mut view = ProtectedView::new(Arc::clone(&store), config.timings.pending_threshold, config.login_path.clone());
    let deadline = args.max_wait_ms.and_then(|ms| wait_deadline(tokio::time::Instant::now(), ms));
    let mut prompted = false;

    let (decision, user, login_path) = loop {
        let now = tokio::time::Instant::now();
        match view.poll(now) {
            ViewAction::Render { identity } => break (GateDecision::Granted, Some(identity), None),
            ViewAction::RedirectToLogin { path } => break (GateDecision::Denied, None, Some(path)),
            ViewAction::Waiting { offer_override } => {
                if offer_override && !prompted {
                    prompted = true;
                    if args.continue_anyway {
                        view.continue_anyway();
                        continue;
                    }
                    eprintln!("still waiting on the identity provider; pass --continue-anyway to stop waiting");
                }
                if deadline.is_some_and(|deadline| now >= deadline) {
                    break (GateDecision::Pending, None, None);
                }
                tokio::select! {
                    () = changed.notified() => {}
                    () = tokio::time::sleep(POLL_INTERVAL) => {}
                }
            }
        }
    };

    let diagnosis = store.diagnosis();
    if json_output {
        print_json(&json!({
            "decision": decision,
            "diagnosis": diagnosis,
            "user": user.as_ref().map(|u| json!({ "id": u.id, "name": u.display_name })),
            "login_path": login_path,
            "resolve_bound_elapsed": store.resolve_bound_elapsed(),
        }))?;
    } else {
        match (&user, &login_path) {
            (Some(identity), _) => println!("granted: signed in as {}", identity.label()),
            (None, Some(path)) => println!("denied ({diagnosis}): sign in at {path}"),
            (None, None) => println!("pending: identity provider has not answered"),
        }
        if let Some(error) = store.last_error() {
            eprintln!("{}", error.user_message());
        }
    }
    store.dispose();

    Ok(match decision {
        GateDecision::Granted => ExitCode::SUCCESS,
        GateDecision::Denied => ExitCode::from(3),
        GateDecision::Pending => ExitCode::from(4),
    })
}

/// When `status` stops waiting. A wait too long to represent means no deadline.
fn wait_deadline(now: tokio::time::Instant, max_wait_ms: u64) -> Option<tokio::time::Instant> {
    now.checked_add(Duration::from_millis(max_wait_ms))
}

fn print_json(value: &serde_json::Value) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
