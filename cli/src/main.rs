use clap::{Parser, Subcommand};
use msgboard::app::AppError;
use msgboard::config::{DEFAULT_BASE_URL, DEFAULT_COGNITO_REGION, DEFAULT_POLL_INTERVAL_MS};
use msgboard::{
    ApiError, AuthFlags, AuthState, ClientApp, ClientConfig, CognitoConfig, ConfigError, ErrorCode, Message,
    MessageApi, RestMessageApi,
};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("client startup failed: {0}")]
    App(#[from] AppError),
    #[error("[{code}] {0}", code = .0.error_code())]
    Api(#[from] ApiError),
    #[error("stdin read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "msgboard", about = "Message board client")]
struct Cli {
    #[arg(long, env = "MSGBOARD_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    #[arg(long, env = "MSGBOARD_POLL_INTERVAL_MS", default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    poll_interval_ms: u64,

    #[arg(long, env = "MSGBOARD_HTTP_TIMEOUT_SECS")]
    http_timeout_secs: Option<u64>,

    #[arg(long, env = "COGNITO_CLIENT_ID")]
    client_id: Option<String>,

    #[arg(long, env = "COGNITO_REGION", default_value = DEFAULT_COGNITO_REGION)]
    region: String,

    #[arg(long, env = "COGNITO_ENDPOINT")]
    cognito_endpoint: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch the message list once and print it as JSON.
    Feed,
    /// Interactive session on stdin (default).
    Run,
}

impl Cli {
    fn client_config(&self) -> ClientConfig {
        ClientConfig::from_lookup(|key| match key {
            "MSGBOARD_BASE_URL" => Some(self.base_url.clone()),
            "MSGBOARD_POLL_INTERVAL_MS" => Some(self.poll_interval_ms.to_string()),
            "MSGBOARD_HTTP_TIMEOUT_SECS" => self.http_timeout_secs.map(|s| s.to_string()),
            _ => None,
        })
    }

    fn cognito_config(&self) -> Result<CognitoConfig, ConfigError> {
        CognitoConfig::from_lookup(|key| match key {
            "COGNITO_CLIENT_ID" => self.client_id.clone(),
            "COGNITO_REGION" => Some(self.region.clone()),
            "COGNITO_ENDPOINT" => self.cognito_endpoint.clone(),
            _ => None,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("msgboard=info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.client_config();
    info!(base_url = %config.base_url, command = ?cli.command, "msgboard cli starting");

    match cli.command.as_ref().unwrap_or(&Command::Run) {
        Command::Feed => run_feed(&config).await,
        Command::Run => {
            let app = ClientApp::connect(&config, cli.cognito_config()?)?;
            run_session(&app).await
        }
    }
}

async fn run_feed(config: &ClientConfig) -> Result<(), CliError> {
    let api = RestMessageApi::new(config)?;
    let messages = api.list_messages().await?;
    print_json(&serde_json::to_value(messages)?)
}

// =============================================================================
// INTERACTIVE SESSION
// =============================================================================

#[derive(Debug, PartialEq, Eq)]
enum Input {
    SignUp { email: String, password: String },
    Verify { code: String },
    SignIn { email: String, password: String },
    SignOut,
    Send { text: String },
    State,
    Messages,
    Help,
    Quit,
}

const HELP: &str = "\
commands:
  signup <email> <password>   create an account
  verify <code>               confirm the emailed code
  signin <email> <password>   sign in
  signout                     sign out
  send <text...>              post a message
  state                       show auth state and error flags
  messages                    show the cached message list
  help                        show this text
  quit                        exit";

fn parse_input(line: &str) -> Result<Option<Input>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (command, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let args: Vec<&str> = rest.split_whitespace().collect();

    let input = match (command, args.as_slice()) {
        ("signup", [email, password]) => Input::SignUp { email: (*email).to_owned(), password: (*password).to_owned() },
        ("verify", [code]) => Input::Verify { code: (*code).to_owned() },
        ("signin", [email, password]) => Input::SignIn { email: (*email).to_owned(), password: (*password).to_owned() },
        ("signout", []) => Input::SignOut,
        ("send", [_, ..]) => Input::Send { text: rest.trim().to_owned() },
        ("state", []) => Input::State,
        ("messages", []) => Input::Messages,
        ("help", []) => Input::Help,
        ("quit" | "exit", []) => Input::Quit,
        ("signup" | "signin", _) => return Err(format!("usage: {command} <email> <password>")),
        ("verify", _) => return Err("usage: verify <code>".to_owned()),
        ("send", _) => return Err("usage: send <text...>".to_owned()),
        _ => return Err(format!("unknown command: {line} (try `help`)")),
    };
    Ok(Some(input))
}

async fn run_session(app: &ClientApp) -> Result<(), CliError> {
    let mut state_rx = app.watch_state();
    let mut flags_rx = app.watch_flags();
    let mut messages_rx = app.watch_messages();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{HELP}");
    print_state(&app.state());

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_input(&line) {
                    Ok(Some(Input::Quit)) => break,
                    Ok(Some(input)) => dispatch(app, input).await,
                    Ok(None) => {}
                    Err(usage) => println!("{usage}"),
                }
            }
            Ok(()) = state_rx.changed() => {
                let state = state_rx.borrow_and_update().value.clone();
                print_state(&state);
            }
            Ok(()) = flags_rx.changed() => {
                let flags = *flags_rx.borrow_and_update();
                print_flags(flags);
            }
            Ok(()) = messages_rx.changed() => {
                let messages = messages_rx.borrow_and_update().clone();
                print_messages(&messages);
            }
        }
    }

    app.shutdown();
    Ok(())
}

/// Each command first clears its own error flag, as editing the form would.
async fn dispatch(app: &ClientApp, input: Input) {
    match input {
        Input::SignUp { email, password } => {
            app.auth().reset_sign_up_error();
            app.sign_up(&email, &password);
        }
        Input::Verify { code } => {
            app.auth().reset_verify_error();
            app.verify(&code);
        }
        Input::SignIn { email, password } => {
            app.auth().reset_sign_in_error();
            app.sign_in(&email, &password);
        }
        Input::SignOut => app.sign_out(),
        Input::Send { text } => match app.feed().send(app.auth(), &text).await {
            Ok(message) => println!("sent {}", message.id),
            Err(e) => println!("send failed [{}]: {e}", e.error_code()),
        },
        Input::State => {
            print_state(&app.state());
            print_flags(app.flags());
        }
        Input::Messages => print_messages(&app.messages()),
        Input::Help => println!("{HELP}"),
        Input::Quit => {}
    }
}

// =============================================================================
// OUTPUT
// =============================================================================

fn print_state(state: &AuthState) {
    match state {
        AuthState::Unauthenticated => println!("-- signed out"),
        AuthState::Confirming { email_to_confirm, .. } => {
            println!("-- verification code sent to {email_to_confirm}; use `verify <code>`");
        }
        AuthState::Authenticated { email } => println!("-- signed in as {email}"),
    }
}

fn print_flags(flags: AuthFlags) {
    if flags.sign_up_error {
        println!("!! sign up failed");
    }
    if flags.verify_error {
        println!("!! verification failed");
    }
    if flags.sign_in_error {
        println!("!! sign in failed");
    }
}

fn print_messages(messages: &[Message]) {
    println!("-- {} message(s)", messages.len());
    for message in messages {
        println!("[{}] {}: {}", message.id, message.author, message.content);
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_line_is_nothing() {
        assert_eq!(parse_input("   "), Ok(None));
    }

    #[test]
    fn signup_takes_email_and_password() {
        assert_eq!(
            parse_input("signup a@x.com pw"),
            Ok(Some(Input::SignUp { email: "a@x.com".into(), password: "pw".into() }))
        );
    }

    #[test]
    fn signup_missing_password_is_usage() {
        let err = parse_input("signup a@x.com").unwrap_err();
        assert!(err.starts_with("usage: signup"));
    }

    #[test]
    fn send_keeps_full_text() {
        assert_eq!(
            parse_input("send hello  there world"),
            Ok(Some(Input::Send { text: "hello  there world".into() }))
        );
    }

    #[test]
    fn send_without_text_is_usage() {
        assert!(parse_input("send").is_err());
    }

    #[test]
    fn verify_takes_one_code() {
        assert_eq!(parse_input("verify 123456"), Ok(Some(Input::Verify { code: "123456".into() })));
        assert!(parse_input("verify 12 34").is_err());
    }

    #[test]
    fn quit_and_exit_both_quit() {
        assert_eq!(parse_input("quit"), Ok(Some(Input::Quit)));
        assert_eq!(parse_input("exit"), Ok(Some(Input::Quit)));
    }

    #[test]
    fn unknown_command_rejected() {
        let err = parse_input("dance").unwrap_err();
        assert!(err.contains("unknown command"));
    }

    #[test]
    fn api_error_shows_its_code() {
        let err = CliError::from(ApiError::Unauthorized);
        assert!(err.to_string().starts_with("[E_UNAUTHORIZED] "));
    }

    #[test]
    fn config_built_from_flags() {
        let cli = Cli::parse_from(["msgboard", "--base-url", "http://localhost:9000/", "--poll-interval-ms", "250"]);
        let config = cli.client_config();
        assert_eq!(config.base_url, "http://localhost:9000");
        assert_eq!(config.poll_interval, std::time::Duration::from_millis(250));
    }

    #[test]
    fn zero_poll_interval_uses_default() {
        let cli = Cli::parse_from(["msgboard", "--poll-interval-ms", "0"]);
        let config = cli.client_config();
        assert_eq!(config.poll_interval, std::time::Duration::from_millis(DEFAULT_POLL_INTERVAL_MS));
    }

    #[test]
    fn cognito_config_from_flags() {
        let cli = Cli::parse_from(["msgboard", "--client-id", "abc", "--region", "us-west-2"]);
        let config = cli.cognito_config().unwrap();
        assert_eq!(config.endpoint, "https://cognito-idp.us-west-2.amazonaws.com");
    }
}
