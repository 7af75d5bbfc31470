use std::{net::SocketAddr, path::Path, sync::Arc};

use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, Request},
    middleware,
    response::Response,
    routing::any,
};
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use gatehouse::{
    adapters::{
        FileConfigProvider, HttpClientAdapter, HttpHandler, create_request_logging_middleware,
        cors_middleware, request_id_middleware, security_headers_middleware,
    },
    config::{ConfigStore, watcher},
    core::{CidrCache, RateLimiterRegistry, ResponseCache, UserAgentNormalizer},
    ports::{config_provider::ConfigProvider, http_client::HttpClient},
    tracing_setup,
    utils::GracefulShutdown,
};
use tower_http::compression::CompressionLayer;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "config/main.yaml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "config/main.yaml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "config/main.yaml")]
        config: String,
    },
    /// Start the gateway server (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "config/main.yaml")]
        config: String,
    },
}

/// Validated process environment. Both failures are fatal at startup.
struct Environment {
    port: u16,
    app_env: String,
}

fn validate_environment() -> Result<Environment> {
    let port_raw = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let port: u16 = port_raw
        .parse()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| eyre!("PORT must be a valid port number, got '{port_raw}'"))?;

    let app_env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
    if app_env != "development" && app_env != "production" {
        return Err(eyre!(
            "APP_ENV must be either 'development' or 'production', got '{app_env}'"
        ));
    }

    Ok(Environment { port, app_env })
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    let (command, config_path) = match args.command {
        Some(Commands::Validate { config }) => ("validate", config),
        Some(Commands::Init { config }) => ("init", config),
        Some(Commands::Serve { config }) => ("serve", config),
        None => ("serve", args.config), // Default to serve with config from args
    };

    match command {
        "validate" => {
            return validate_config_command(&config_path).await;
        }
        "init" => {
            return init_config_command(&config_path).await;
        }
        "serve" => {
            // Continue with normal server startup
        }
        _ => unreachable!(),
    }

    let environment = validate_environment().context("Environment validation failed")?;

    if environment.app_env == "production" {
        tracing_setup::init_tracing().map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;
    } else {
        tracing_setup::init_console_tracing()
            .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;
    }

    tracing::info!("Loading initial configuration from {config_path}");

    // A startup failure here is fatal: the gateway never serves without a
    // valid configuration.
    let config_store = ConfigStore::bootstrap(&config_path)
        .await
        .with_context(|| format!("Failed to load initial config from {config_path}"))?;

    // Shared per-service resources, constructed once and injected everywhere.
    let cidr_cache = Arc::new(CidrCache::new());
    let ua_normalizer = Arc::new(UserAgentNormalizer::new());
    let rate_limiters = Arc::new(RateLimiterRegistry::new());
    let response_cache = Arc::new(ResponseCache::new());
    let _sweeper = response_cache
        .clone()
        .spawn_sweeper(gatehouse::core::response_cache::SWEEP_INTERVAL);

    // Config watcher: filesystem events -> debounced reloads.
    let config_provider =
        FileConfigProvider::new(&config_path).context("Failed to create config provider")?;
    let notify_rx = config_provider.watch();
    tokio::spawn(watcher::run_reload_loop(
        config_store.clone(),
        cidr_cache.clone(),
        notify_rx,
        watcher::DEFAULT_DEBOUNCE,
    ));

    let http_client: Arc<dyn HttpClient> =
        Arc::new(HttpClientAdapter::new().context("Failed to create HTTP client adapter")?);

    let http_handler = Arc::new(HttpHandler::new(
        config_store.clone(),
        http_client,
        cidr_cache,
        ua_normalizer,
        rate_limiters,
        response_cache,
    ));

    // Create graceful shutdown manager
    let graceful_shutdown = Arc::new(GracefulShutdown::new());

    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    let make_request_route = |handler: Arc<HttpHandler>| {
        any(
            move |ConnectInfo(client_addr): ConnectInfo<SocketAddr>, req: Request| {
                let handler = handler.clone();
                async move {
                    match handler.handle_request(req, Some(client_addr)).await {
                        Ok(response) => Ok::<Response<Body>, std::convert::Infallible>(response),
                        Err(e) => {
                            tracing::error!("Request handling error: {:?}", e);
                            let error_response = Response::builder()
                                .status(500)
                                .body(Body::from("Internal Server Error"))
                                .unwrap_or_else(|_| {
                                    Response::new(Body::from("Internal Server Error"))
                                });
                            Ok(error_response)
                        }
                    }
                }
            },
        )
    };

    let app = Router::new()
        .route("/{*path}", make_request_route(http_handler.clone()))
        .route("/", make_request_route(http_handler.clone()))
        .layer(CompressionLayer::new())
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(middleware::from_fn(cors_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(create_request_logging_middleware(
            config_store.clone(),
        )));

    // Log configured services from the current snapshot
    {
        let snapshot = config_store.current();
        for (name, service) in &snapshot.services {
            tracing::info!("Configured service: {} -> {}", name, service.url);
        }
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], environment.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    tracing::info!("Gatehouse API Gateway listening on {addr}");
    println!("Gatehouse API Gateway listening on {addr} (env: {})", environment.app_env);

    let shutdown_for_server = graceful_shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let reason = shutdown_for_server.wait().await;
        tracing::info!("Draining in-flight requests, shutdown reason: {:?}", reason);
    })
    .await
    .context("Server error")?;

    tracing::info!("Graceful shutdown completed");

    // Shutdown tracing on exit
    tracing_setup::shutdown_tracing();

    Ok(())
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    use gatehouse::config::{MainConfigValidator, load_config};

    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    match MainConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Services: {}", config.services.len());
            for (name, service) in &config.services {
                println!("     - {} -> {}", name, service.url);
            }
            println!(
                "   • Global defaults: {}",
                if config.global.is_some() { "yes" } else { "no" }
            );
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Ensure service URLs start with http:// or https://");
            println!("   • Check that IP entries are addresses or CIDR ranges");
            println!("   • Ensure durations use valid units (e.g. '1s', '5m', '1h')");
            println!("   • Fill auth header_name and value when auth is enabled");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Gatehouse API Gateway Configuration

# Optional global defaults, overridden per service.
global:
  logging: true
  # ip_blocklist:
  #   - "10.0.0.0/8"
  # user_agent_blocklist:
  #   - "bot"
  rate_limit:
    enabled: false
    max_requests: 100
    period: "1m"

# Requests to /{service}/{rest...} are forwarded to the service URL.
services:
  httpbin:
    url: "https://httpbin.org"
    cache:
      enabled: true
      ttl: "30s"
    # auth:
    #   enabled: true
    #   header_name: "X-Api-Key"
    #   value: "change-me"
    # rate_limit:
    #   enabled: true
    #   max_requests: 10
    #   period: "1s"
"#;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create config directory")?;
    }

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'gatehouse serve --config {config_path}' to start the server");
    Ok(())
}
