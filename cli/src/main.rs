use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use mycloud::config::{AuthStrategy, ClientConfig};
use mycloud::net::{ApiClient, ClientError};
use mycloud::pages::dashboard::{Dashboard, DashboardPhase};
use mycloud::pages::forgot_password::ForgotPasswordPage;
use mycloud::pages::google::GoogleLogin;
use mycloud::pages::login::LoginPage;
use mycloud::pages::profile::ProfilePage;
use mycloud::pages::reset_password::ResetPasswordPage;
use mycloud::pages::signup::SignupPage;
use mycloud::pages::{AssumeYes, Outcome, Prompt};
use mycloud::routes::{History, Route};
use mycloud::session::{self, FileStorage};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("session expired; run `mycloud login`")]
    SessionExpired,
    #[error("login required; run `mycloud login`")]
    LoginRequired,
    #[error("{0}")]
    Failed(String),
    #[error("cancelled")]
    Cancelled,
    #[error("failed to read input: {0}")]
    Input(#[from] io::Error),
    #[error("invalid JSON output: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "mycloud", about = "MyCloud file storage CLI")]
struct Cli {
    /// Backend API base URL (overrides MYCLOUD_BASE_URL).
    #[arg(long)]
    base_url: Option<String>,

    /// `cookie` or `bearer` (overrides MYCLOUD_AUTH_STRATEGY).
    #[arg(long)]
    strategy: Option<AuthStrategy>,

    /// Directory holding the persisted session (overrides MYCLOUD_STATE_DIR).
    #[arg(long)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        username: String,
        #[arg(long, env = "MYCLOUD_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    Signup {
        username: String,
        email: String,
        #[arg(long, env = "MYCLOUD_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Exchange a Google ID-token credential for a session.
    Google { credential: String },
    ForgotPassword { email: String },
    ResetPassword {
        token: String,
        #[arg(long, env = "MYCLOUD_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    Profile {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List stored files.
    Ls {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    Upload { path: PathBuf },
    Download {
        id: u64,
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Delete a file.
    Rm {
        id: u64,
        /// Skip the confirmation prompt.
        #[arg(long, short = 'y', default_value_t = false)]
        yes: bool,
    },
    Logout,
}

struct CliContext {
    api: ApiClient,
    history: History,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_writer(io::stderr).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let ctx = build_context(&cli)?;
    match cli.command {
        Command::Login { username, password } => run_login(&ctx, username, password).await,
        Command::Signup { username, email, password } => run_signup(&ctx, username, email, password).await,
        Command::Google { credential } => run_google(&ctx, &credential).await,
        Command::ForgotPassword { email } => run_forgot_password(&ctx, email).await,
        Command::ResetPassword { token, password } => run_reset_password(&ctx, token, password).await,
        Command::Profile { json } => run_profile(&ctx, json).await,
        Command::Ls { json } => run_ls(&ctx, json).await,
        Command::Upload { path } => run_upload(&ctx, path).await,
        Command::Download { id, dir } => run_download(&ctx, id, dir).await,
        Command::Rm { id, yes } => run_rm(&ctx, id, yes).await,
        Command::Logout => run_logout(&ctx).await,
    }
}

fn build_context(cli: &Cli) -> Result<CliContext, CliError> {
    let mut config = ClientConfig::from_env()?;
    if let Some(base_url) = &cli.base_url {
        config.set_base_url(base_url)?;
    }
    if let Some(strategy) = cli.strategy {
        config.strategy = strategy;
    }
    if let Some(state_dir) = &cli.state_dir {
        config.state_dir.clone_from(state_dir);
    }

    let storage = Arc::new(FileStorage::open(config.session_file())?);
    tracing::debug!(base_url = %config.base_url, strategy = ?config.strategy, path = %storage.path().display(), "client configured");
    let history = History::new();
    let strategy = session::strategy_for(&config, storage);
    let api = ApiClient::new(&config, strategy, Arc::new(history.clone()))?;
    Ok(CliContext { api, history })
}

// =============================================================================
// AUTH
// =============================================================================

async fn run_login(ctx: &CliContext, username: String, password: Option<String>) -> Result<(), CliError> {
    let password = password_or_prompt(password, "Password: ")?;
    let mut page = LoginPage::new(username, password);
    check(page.submit(&ctx.api).await, page.error.take())?;
    println!("logged in");
    Ok(())
}

async fn run_signup(ctx: &CliContext, username: String, email: String, password: Option<String>) -> Result<(), CliError> {
    let password = password_or_prompt(password, "Password: ")?;
    let password2 = read_line("Confirm password: ")?;
    let mut page = SignupPage { username, email, password, password2, ..SignupPage::default() };
    check(page.submit(&ctx.api).await, page.error.take())?;
    if ctx.history.current() == Some(Route::Login) {
        println!("account created; run `mycloud login`");
    } else {
        println!("account created and logged in");
    }
    Ok(())
}

async fn run_google(ctx: &CliContext, credential: &str) -> Result<(), CliError> {
    let mut google = GoogleLogin::default();
    check(google.exchange(&ctx.api, credential, &StdinPrompt).await, None)?;
    println!("logged in with Google");
    Ok(())
}

async fn run_forgot_password(ctx: &CliContext, email: String) -> Result<(), CliError> {
    let mut page = ForgotPasswordPage::new(email);
    let outcome = page.submit(&ctx.api).await;
    let message = page.message.take().unwrap_or_default();
    check(outcome, Some(message.clone()))?;
    println!("{message}");
    Ok(())
}

async fn run_reset_password(ctx: &CliContext, token: String, password: Option<String>) -> Result<(), CliError> {
    let mut page = ResetPasswordPage::new(token);
    page.new_password = password_or_prompt(password, "New password: ")?;
    let outcome = page.submit(&ctx.api).await;
    let message = page.message.take();
    check(outcome, message.clone())?;
    if let Some(message) = message {
        println!("{message}");
    }
    Ok(())
}

async fn run_logout(ctx: &CliContext) -> Result<(), CliError> {
    let mut dashboard = Dashboard::default();
    dashboard.logout(&ctx.api).await;
    println!("logged out");
    Ok(())
}

// =============================================================================
// FILES
// =============================================================================

async fn run_profile(ctx: &CliContext, as_json: bool) -> Result<(), CliError> {
    let mut page = ProfilePage::default();
    check(page.load(&ctx.api).await, page.error.take())?;
    let Some(profile) = page.profile else {
        return Ok(());
    };
    if as_json {
        return print_json(&serde_json::to_value(&profile)?);
    }
    println!("username: {}", profile.username);
    println!("email:    {}", profile.email.as_deref().unwrap_or("-"));
    Ok(())
}

async fn run_ls(ctx: &CliContext, as_json: bool) -> Result<(), CliError> {
    let dashboard = mounted_dashboard(ctx).await?;
    if as_json {
        return print_json(&serde_json::to_value(&dashboard.files.items)?);
    }

    println!("signed in as {}", dashboard.display_name());
    if let Some(placeholder) = dashboard.placeholder() {
        println!("{placeholder}");
        return Ok(());
    }
    println!("{:>6}  {:<40}  {:>12}  UPLOADED", "ID", "NAME", "SIZE");
    for row in dashboard.rows() {
        println!("{:>6}  {:<40}  {:>12}  {}", row.id, row.name, row.size, row.uploaded_at);
    }
    Ok(())
}

async fn run_upload(ctx: &CliContext, path: PathBuf) -> Result<(), CliError> {
    let mut dashboard = Dashboard::default();
    dashboard.select_file(&path);
    check(dashboard.upload(&ctx.api).await, dashboard.error.take())?;
    println!("uploaded {} ({} files stored)", path.display(), dashboard.files.len());
    Ok(())
}

async fn run_download(ctx: &CliContext, id: u64, dir: PathBuf) -> Result<(), CliError> {
    let mut dashboard = Dashboard::default();
    check(dashboard.download(&ctx.api, id, &dir).await, dashboard.error.take())?;
    if let Some(path) = &dashboard.last_saved {
        println!("saved {}", path.display());
    }
    Ok(())
}

async fn run_rm(ctx: &CliContext, id: u64, yes: bool) -> Result<(), CliError> {
    let mut dashboard = mounted_dashboard(ctx).await?;
    let prompt: &dyn Prompt = if yes { &AssumeYes } else { &StdinPrompt };
    check(dashboard.delete(&ctx.api, id, prompt).await, dashboard.error.take())?;
    println!("deleted {id}");
    Ok(())
}

async fn mounted_dashboard(ctx: &CliContext) -> Result<Dashboard, CliError> {
    let mut dashboard = Dashboard::default();
    let outcome = dashboard.mount(&ctx.api).await;
    if dashboard.phase == DashboardPhase::LoginRequired {
        return Err(CliError::LoginRequired);
    }
    check(outcome, None)?;
    if let Some(error) = dashboard.error.take() {
        return Err(CliError::Failed(error));
    }
    Ok(dashboard)
}

// =============================================================================
// HELPERS
// =============================================================================

/// Turn a page outcome into a CLI result. `message` is what the page would
/// have shown.
fn check(outcome: Outcome, message: Option<String>) -> Result<(), CliError> {
    match outcome {
        Outcome::Done | Outcome::Skipped => Ok(()),
        Outcome::Cancelled => Err(CliError::Cancelled),
        Outcome::Redirected => Err(CliError::SessionExpired),
        Outcome::Failed => Err(CliError::Failed(message.unwrap_or_else(|| "request failed".to_owned()))),
    }
}

fn password_or_prompt(password: Option<String>, label: &str) -> Result<String, CliError> {
    match password {
        Some(password) => Ok(password),
        None => read_line(label),
    }
}

fn read_line(label: &str) -> Result<String, CliError> {
    eprint!("{label}");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_owned())
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

/// Confirmations read `y`/`yes` from stdin; alerts go to stderr.
struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn confirm(&self, message: &str) -> bool {
        read_line(&format!("{message} [y/N] "))
            .map(|answer| matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
            .unwrap_or(false)
    }

    fn alert(&self, message: &str) {
        eprintln!("{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn check_maps_outcomes() {
        assert!(check(Outcome::Done, None).is_ok());
        assert!(check(Outcome::Skipped, None).is_ok());
        assert!(matches!(check(Outcome::Cancelled, None), Err(CliError::Cancelled)));
        assert!(matches!(check(Outcome::Redirected, None), Err(CliError::SessionExpired)));
        let err = check(Outcome::Failed, Some("Delete failed. Please try again.".into())).unwrap_err();
        assert_eq!(err.to_string(), "Delete failed. Please try again.");
    }

    #[test]
    fn session_expired_message_names_login_command() {
        assert_eq!(CliError::SessionExpired.to_string(), "session expired; run `mycloud login`");
    }

    #[test]
    fn cli_parses_rm_with_yes() {
        let cli = Cli::try_parse_from(["mycloud", "--strategy", "bearer", "rm", "7", "--yes"]).unwrap();
        assert_eq!(cli.strategy, Some(AuthStrategy::Bearer));
        assert!(matches!(cli.command, Command::Rm { id: 7, yes: true }));
    }

    #[test]
    fn cli_rejects_unknown_strategy() {
        assert!(Cli::try_parse_from(["mycloud", "--strategy", "magic", "logout"]).is_err());
    }

    #[test]
    fn json_value_renders() {
        assert!(print_json(&json!({ "ok": true })).is_ok());
    }
}
