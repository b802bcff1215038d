//! aad-token - drive the Azure AD token handler from the command line
//!
//! Runs the sign-in code redemption, silent lookup and on-behalf-of flows
//! in one process against the configured tenant.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aad_token_handler::auth::build_token_handler;
use aad_token_handler::cache::PerUserMemoryTokenCacheProvider;
use aad_token_handler::config::{AzureAdSettings, Settings};
use aad_token_handler::downstream::BearerClient;
use aad_token_handler::pipeline::{
    AuthPipeline, AuthorizationCodeReceived, JwtBearerOptions, OidcOptions, PipelineOutcome,
};
use aad_token_handler::{OnBehalfOfRequest, SilentTokenRequest, TokenTarget};

#[derive(Parser)]
#[command(name = "aad-token")]
#[command(about = "Azure AD token acquisition and caching", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Redeem an authorization code, cache the tokens and read them back
    Redeem {
        /// Authorization code from the sign-in redirect
        #[arg(long)]
        code: String,

        /// Signed-in username (taken from the ID token if omitted)
        #[arg(short, long)]
        user: Option<String>,

        /// ID token delivered with the code
        #[arg(long)]
        id_token: Option<String>,

        /// Sign the user out afterwards and show that the cache is empty
        #[arg(long)]
        sign_out: bool,
    },

    /// Exchange an inbound access token for a downstream token
    Obo {
        /// Access token the API was called with
        #[arg(long)]
        assertion: String,

        /// Signed-in username, for logging
        #[arg(short, long)]
        user: Option<String>,

        /// Downstream resource (defaults to the configured one)
        #[arg(long)]
        resource: Option<String>,
    },

    /// Call a downstream API on behalf of the user
    Call {
        /// Downstream URL to GET
        #[arg(long)]
        url: String,

        /// Access token the API was called with
        #[arg(long)]
        assertion: String,
    },

    /// Show the effective settings and middleware options
    Config,

    /// Write a settings file for an app registration
    Init {
        /// Tenant id or domain
        #[arg(long)]
        tenant: String,

        /// Application (client) id
        #[arg(long)]
        client_id: String,

        /// Redirect URI registered for the app
        #[arg(long)]
        redirect_uri: String,

        /// Resource requested at sign-in
        #[arg(long)]
        resource: String,

        /// Use the v2 (MSAL) protocol
        #[arg(long)]
        msal: bool,

        /// Replace an existing settings file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if let Commands::Init {
        tenant,
        client_id,
        redirect_uri,
        resource,
        msal,
        force,
    } = &cli.command
    {
        let path = match &cli.config {
            Some(p) => p.clone(),
            None => Settings::default_path()?,
        };
        let azure_ad = AzureAdSettings::new(tenant, client_id, redirect_uri, resource);
        Settings::new(*msal, azure_ad).init(&path, *force)?;
        println!(
            "Settings written to {}. Provide the client secret through AZURE_AD_CLIENT_SECRET.",
            path.display()
        );
        return Ok(());
    }

    let settings = Settings::load(cli.config.as_deref())?;
    let handler_config = settings.handler_config()?;

    let cache = Arc::new(PerUserMemoryTokenCacheProvider::in_memory());
    let handler = build_token_handler(handler_config.clone(), cache);

    match cli.command {
        Commands::Init { .. } => {}
        Commands::Config => {
            println!("Protocol: {}", settings.protocol());
            println!("{:#?}", handler_config);
            println!(
                "{:#?}",
                OidcOptions::configure(&handler_config, &settings.azure_ad.callback_path)
            );
            println!("{:#?}", JwtBearerOptions::configure(&handler_config));
        }
        Commands::Redeem {
            code,
            user,
            id_token,
            sign_out,
        } => {
            tracing::info!("Redeeming authorization code...");
            let pipeline = AuthPipeline::new(handler.clone());
            let outcome = pipeline
                .on_authorization_code_received(AuthorizationCodeReceived {
                    code,
                    username: user.clone(),
                    id_token,
                })
                .await?;

            if let PipelineOutcome::CodeRedeemed {
                access_token: Some(token),
                ..
            } = outcome
            {
                println!("{}", token);
            } else {
                println!("Tokens cached.");
            }

            if sign_out {
                let Some(user) = user else {
                    anyhow::bail!("--sign-out needs --user");
                };
                handler.sign_out(&user).await;
                match handler
                    .get_access_token_silently(SilentTokenRequest::new(user))
                    .await
                {
                    Err(e) if e.requires_interaction() => println!("Signed out: {}", e),
                    Err(e) => return Err(e.into()),
                    Ok(_) => anyhow::bail!("Token still cached after sign-out"),
                }
            }
        }
        Commands::Obo {
            assertion,
            user,
            resource,
        } => {
            let mut request = OnBehalfOfRequest::new(assertion);
            request.username = user;
            request.target = resource.map(TokenTarget::resource);
            let token = handler.get_access_token_on_behalf_of(request).await?;
            println!("{}", token);
        }
        Commands::Call { url, assertion } => {
            let token = handler
                .get_access_token_on_behalf_of(OnBehalfOfRequest::new(assertion))
                .await?;
            let body: serde_json::Value = BearerClient::new().get_json(&url, &token).await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }

    Ok(())
}
