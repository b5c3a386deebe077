//! itdocs - a terminal client for the itdocs IT documentation backend.
//!
//! This application provides the signed-in session: username/password login
//! with an optional TOTP step, a persisted token pair that is refreshed
//! transparently, and a dashboard for the logged-in user.

mod app;
mod ui;

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use secrecy::SecretString;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use itdocs_core::auth::{AuthError, LoginOutcome, LoginStateMachine, Session};
use itdocs_core::config::Config;
use itdocs_core::models::UserProfile;

use app::{user_message, App, AppState};
use ui::input::handle_input;
use ui::render::render;

// ============================================================================
// Constants
// ============================================================================

/// Timeout for polling terminal events (in milliseconds)
const EVENT_POLL_TIMEOUT_MS: u64 = 100;

/// Log file prefix; tracing-appender adds the date
const LOG_FILE_PREFIX: &str = "itdocs.log";

/// Attempts allowed for the verification code in terminal login
const MAX_CODE_ATTEMPTS: usize = 3;

fn env_filter() -> EnvFilter {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Initialize logging to stderr for the command-line modes
fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(env_filter())
        .init();
}

/// Initialize logging to a daily file in `log_dir`.
/// The terminal belongs to the UI, so nothing may be written to it.
fn init_file_tracing(log_dir: PathBuf) -> WorkerGuard {
    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(env_filter())
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config, using defaults: {}", e);
            Config::default()
        }
    };

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str);

    // Held until exit so buffered log lines are flushed
    let _log_guard = match command {
        None => {
            let log_dir = config.cache_dir().unwrap_or_else(|_| PathBuf::from("./logs"));
            Some(init_file_tracing(log_dir))
        }
        Some(_) => {
            init_tracing();
            None
        }
    };

    let session = Session::open(&config)?;

    // Check for CLI commands
    match command {
        Some("--whoami") => return whoami(&session).await,
        Some("--logout") => return logout(&session).await,
        Some("--login") => return login_interactive(config, &session).await,
        Some("--help") | Some("-h") => {
            print_usage();
            return Ok(());
        }
        Some(other) => {
            print_usage();
            bail!("Unknown argument: {}", other);
        }
        None => {}
    }

    info!(base_url = %config.api_base_url(), "itdocs starting");

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(config, session);
    // Dashboard if a session was restored, login otherwise
    app.start();

    // Main loop
    let result = run_app(&mut terminal, &mut app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
    }

    info!("itdocs shutting down");
    Ok(())
}

fn print_usage() {
    eprintln!("Usage: itdocs [--login | --logout | --whoami]");
    eprintln!();
    eprintln!("  (no argument)  Start the terminal UI");
    eprintln!("  --login        Log in from the command line");
    eprintln!("  --logout       End the stored session");
    eprintln!("  --whoami       Show the logged-in user");
}

fn print_profile(profile: &UserProfile) {
    println!("{} ({})", profile.display_name(), profile.username);
    if let Some(ref email) = profile.email {
        println!("  email:      {}", email);
    }
    println!(
        "  two-factor: {}",
        if profile.totp_enabled { "enabled" } else { "disabled" }
    );
}

/// Print the user of the stored session
async fn whoami(session: &Session) -> Result<()> {
    let mut login = session.login();
    match login.ensure_profile().await {
        Ok(Some(profile)) => {
            print_profile(&profile);
            Ok(())
        }
        Ok(None) => bail!("Not logged in. Run `itdocs --login` first."),
        Err(AuthError::Api(ref e)) if e.is_unauthorized() => {
            bail!("Session expired. Please log in again.")
        }
        Err(e) => Err(e.into()),
    }
}

async fn logout(session: &Session) -> Result<()> {
    let mut login = session.login();
    let was_authenticated = session.store().is_authenticated();
    login.logout().await;
    if was_authenticated {
        println!("Logged out.");
    } else {
        println!("Not logged in.");
    }
    Ok(())
}

/// Interactive login on the terminal, including the verification code step
async fn login_interactive(mut config: Config, session: &Session) -> Result<()> {
    println!("\n=== itdocs Login ===\n");

    if session.store().is_authenticated() {
        println!("Already logged in. Run `itdocs --logout` first to switch users.");
        return Ok(());
    }

    let mut login = session.login();
    let username = prompt_username(config.last_username.as_deref())?;
    let password = SecretString::from(rpassword::prompt_password("Password: ")?);

    println!("\nAuthenticating...");
    let outcome = match login.submit(&username, password).await {
        Ok(outcome) => outcome,
        Err(e) => bail!(user_message(&e)),
    };

    let profile = match outcome {
        LoginOutcome::Authenticated { profile } => profile,
        LoginOutcome::MfaRequired => verify_interactive(&mut login).await?,
    };

    config.last_username = Some(username);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!("Login successful!\n");
    if let Some(profile) = profile {
        print_profile(&profile);
    }
    Ok(())
}

async fn verify_interactive(login: &mut LoginStateMachine) -> Result<Option<UserProfile>> {
    for attempt in 1..=MAX_CODE_ATTEMPTS {
        let code = prompt_line("Verification code: ")?;
        match login.verify(&code).await {
            Ok(LoginOutcome::Authenticated { profile }) => return Ok(profile),
            Ok(LoginOutcome::MfaRequired) => {}
            Err(e @ (AuthError::InvalidCode | AuthError::MalformedCode)) => {
                eprintln!("{} ({} of {})", user_message(&e), attempt, MAX_CODE_ATTEMPTS);
            }
            Err(e) => bail!(user_message(&e)),
        }
    }
    login.cancel();
    bail!("Too many invalid codes. Please log in again.")
}

fn prompt_username(last_username: Option<&str>) -> Result<String> {
    let default = std::env::var("ITDOCS_USERNAME")
        .ok()
        .filter(|name| !name.trim().is_empty())
        .or_else(|| last_username.map(str::to_string));

    let input = match default {
        Some(ref name) => prompt_line(&format!("Username [{}]: ", name))?,
        None => prompt_line("Username: ")?,
    };
    match (input.is_empty(), default) {
        (true, Some(name)) => Ok(name),
        (true, None) => bail!("Username is required"),
        (false, _) => Ok(input),
    }
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> Result<()> {
    loop {
        // Draw UI
        terminal.draw(|f| render(f, app))?;

        // Poll for events with timeout to allow background updates
        if event::poll(Duration::from_millis(EVENT_POLL_TIMEOUT_MS))? {
            if let Event::Key(key) = event::read()? {
                // Ctrl+C to quit
                if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
                    return Ok(());
                }

                // Handle input
                if handle_input(app, key).await? {
                    return Ok(());
                }
            }
        }

        // Check for completed background tasks and session events
        app.check_background_tasks();

        // Check if we should quit
        if matches!(app.state, AppState::Quitting) {
            return Ok(());
        }
    }
}
