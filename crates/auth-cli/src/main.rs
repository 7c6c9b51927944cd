//! authctl - command-line client for a GoTrue-style auth server.

mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use auth_config::{init_logging, Config, Paths};
use auth_engine::AuthClient;
use auth_storage::FileStorage;
use clap::{Parser, Subcommand};
use tracing::debug;

use commands::{IdentityArgs, VerifyKind};

/// Auth session command-line interface.
#[derive(Parser)]
#[command(name = "authctl")]
#[command(about = "Sign in, inspect and manage an auth session")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config and session files. Defaults to ~/.authctl
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Auth server URL, overriding the config file
    #[arg(long, global = true)]
    url: Option<String>,

    /// API key, overriding the config file
    #[arg(long, global = true, env = "AUTH_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        save: bool,
    },
    /// Create a user
    SignUp {
        #[command(flatten)]
        identity: IdentityArgs,
        #[arg(long, env = "AUTH_PASSWORD", hide_env_values = true)]
        password: String,
        /// User metadata as a JSON object
        #[arg(long)]
        data: Option<String>,
        #[arg(long)]
        redirect_to: Option<String>,
    },
    /// Sign in with a password
    SignIn {
        #[command(flatten)]
        identity: IdentityArgs,
        #[arg(long, env = "AUTH_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign in as a new anonymous user
    SignInAnonymously,
    /// Send a magic link or one-time code
    Otp {
        #[command(flatten)]
        identity: IdentityArgs,
        /// Fail instead of creating a missing user
        #[arg(long)]
        no_create_user: bool,
        #[arg(long)]
        redirect_to: Option<String>,
    },
    /// Verify a one-time code or token hash
    Verify {
        #[command(flatten)]
        identity: IdentityArgs,
        /// Hashed token from an email link, instead of an email or phone
        #[arg(long, conflicts_with_all = ["email", "phone"])]
        token_hash: Option<String>,
        /// The code that was sent
        #[arg(long, default_value = "")]
        token: String,
        #[arg(long = "type", value_enum, default_value = "email")]
        kind: VerifyKind,
    },
    /// Print the current session, refreshing it if it is about to expire
    Session,
    /// Refresh the session now
    Refresh,
    /// Adopt an access and refresh token obtained elsewhere
    SetSession {
        access_token: String,
        refresh_token: String,
    },
    /// Fetch the signed-in user from the server
    User,
    /// Change the signed-in user
    UpdateUser {
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long, env = "AUTH_NEW_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// User metadata as a JSON object
        #[arg(long)]
        data: Option<String>,
    },
    /// Send a password reset email
    ResetPassword {
        email: String,
        #[arg(long)]
        redirect_to: Option<String>,
    },
    /// Sign out
    SignOut {
        /// global, local or others
        #[arg(long, default_value = "global")]
        scope: String,
    },
    /// Print the provider sign-in URL
    OauthUrl {
        provider: String,
        #[arg(long)]
        redirect_to: Option<String>,
        /// Space-separated provider scopes
        #[arg(long)]
        scopes: Option<String>,
    },
    /// Start enterprise SSO for a domain or provider id
    Sso {
        domain_or_provider: String,
        #[arg(long)]
        redirect_to: Option<String>,
    },
    /// Exchange a PKCE authorization code for a session
    Exchange { code: String },
    /// Complete a sign-in from the URL the browser was redirected to
    FromUrl { url: String },
    /// List identities linked to the signed-in user
    Identities,
    /// Print auth events until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new().context("Failed to resolve home directory")?,
    };
    let mut config = Config::load(&paths).context("Failed to load configuration")?;
    if let Some(url) = cli.url {
        config.url = url;
    }
    if let Some(api_key) = cli.api_key {
        config.api_key = api_key;
    }

    init_logging(cli.log_level.as_deref().unwrap_or(&config.log_level));
    debug!(config_file = %paths.config_file().display(), "Configuration loaded");

    if let Commands::Config { save } = cli.command {
        return commands::show_config(&config, &paths, save);
    }

    paths.ensure_dirs().context("Failed to create data directory")?;
    let storage = FileStorage::new(paths.storage_dir()).context("Failed to open session storage")?;
    let client = AuthClient::new(config, Arc::new(storage)).context("Failed to create auth client")?;

    match cli.command {
        Commands::Config { .. } => Ok(()),
        Commands::SignUp {
            identity,
            password,
            data,
            redirect_to,
        } => commands::sign_up(&client, identity, password, data, redirect_to).await,
        Commands::SignIn { identity, password } => {
            commands::sign_in(&client, identity, password).await
        }
        Commands::SignInAnonymously => commands::sign_in_anonymously(&client).await,
        Commands::Otp {
            identity,
            no_create_user,
            redirect_to,
        } => commands::otp(&client, identity, !no_create_user, redirect_to).await,
        Commands::Verify {
            identity,
            token_hash,
            token,
            kind,
        } => commands::verify(&client, identity, token_hash, token, kind).await,
        Commands::Session => commands::session(&client).await,
        Commands::Refresh => commands::refresh(&client).await,
        Commands::SetSession {
            access_token,
            refresh_token,
        } => commands::set_session(&client, &access_token, &refresh_token).await,
        Commands::User => commands::user(&client).await,
        Commands::UpdateUser {
            email,
            phone,
            password,
            data,
        } => commands::update_user(&client, email, phone, password, data).await,
        Commands::ResetPassword { email, redirect_to } => {
            commands::reset_password(&client, &email, redirect_to.as_deref()).await
        }
        Commands::SignOut { scope } => commands::sign_out(&client, &scope).await,
        Commands::OauthUrl {
            provider,
            redirect_to,
            scopes,
        } => commands::oauth_url(&client, &provider, redirect_to, scopes).await,
        Commands::Sso {
            domain_or_provider,
            redirect_to,
        } => commands::sso(&client, &domain_or_provider, redirect_to.as_deref()).await,
        Commands::Exchange { code } => commands::exchange(&client, &code).await,
        Commands::FromUrl { url } => commands::from_url(&client, &url).await,
        Commands::Identities => commands::identities(&client).await,
        Commands::Watch => commands::watch(&client).await,
    }
}
