//! LinkGuard CLI
//!
//! Decide links locally, inspect canonical forms and redirect chains, run the
//! hotset ledger server and sync a local hotset against it.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};

use lg_client::{
    DecisionEngine, HotsetStore, HttpHotsetClient, HttpRemoteAnalyzer, HttpTransport, JsonFileStore,
    RedirectOutcome, RedirectResolver, RemoteLog, SyncCoordinator, SyncScheduler,
};
use lg_ledger::{HotsetLedger, HotsetScheduler, JsonFileStorage, RegistryFile};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "linkguard")]
#[command(about = "LinkGuard link risk engine and hotset tools")]
struct Cli {
    /// Config file (default: ./linkguard.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Canonicalize a URL and print its parts
    Canon {
        url: String,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Decide whether a link is safe to open
    Check {
        url: String,

        /// Judge the link as given, without following redirects
        #[arg(long)]
        no_resolve: bool,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Follow a redirect chain with HEAD requests
    Resolve {
        url: String,

        /// Override the configured hop budget
        #[arg(long)]
        max_hops: Option<u32>,
    },

    /// Serve the hotset sync protocol
    Serve,

    /// Cut one hotset version from the domain source
    Publish,

    /// Sync the local hotset with the server
    Sync {
        /// Keep running and sync every configured interval
        #[arg(long)]
        watch: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match Config::load(cli.config.as_deref()) {
        Ok(config) => run(cli.command, &config).await,
        Err(e) => Err(e.to_string()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

async fn run(command: Commands, config: &Config) -> Result<(), String> {
    match command {
        Commands::Canon { url, json } => cmd_canon(config, &url, json),
        Commands::Check { url, no_resolve, json } => cmd_check(config, &url, no_resolve, json).await,
        Commands::Resolve { url, max_hops } => cmd_resolve(config, &url, max_hops).await,
        Commands::Serve => cmd_serve(config).await,
        Commands::Publish => cmd_publish(config),
        Commands::Sync { watch } => cmd_sync(config, watch).await,
    }
}

fn cmd_canon(config: &Config, url: &str, json: bool) -> Result<(), String> {
    let canonicalizer = config.canonicalizer().map_err(|e| e.to_string())?;
    let canon = canonicalizer
        .canonicalize(url)
        .map_err(|e| format!("{} ({})", e, e.code()))?;

    if json {
        let text = serde_json::to_string_pretty(&canon).map_err(|e| e.to_string())?;
        println!("{}", text);
        return Ok(());
    }

    println!("Canonical URL: {}", canon.summary());
    println!("  Scheme:      {}", canon.scheme);
    println!("  User info:   {}", canon.user_info.as_deref().unwrap_or("-"));
    println!("  Host:        {} ({:?})", canon.host_unicode, canon.host_kind);
    println!("  ASCII host:  {}", canon.host_ascii);
    println!("  Port:        {}", canon.port.map_or("-".to_string(), |p| p.to_string()));
    println!("  Domain:      {}", canon.domain.as_deref().unwrap_or("-"));
    println!("  Subdomain:   {}", canon.subdomain.as_deref().unwrap_or("-"));
    println!("  Suffix:      {}", canon.tld.as_deref().unwrap_or("-"));
    println!("  Path:        {}", canon.path);
    println!("  Query:       {}", canon.query.as_deref().unwrap_or("-"));
    println!("  Fragment:    {}", canon.fragment.as_deref().unwrap_or("-"));
    println!("  Segments:    {}", canon.path_segments.join(" / "));
    println!("  Encoded:     {}", canon.has_encoded_parts);
    println!("  Mixed:       {}", canon.is_mixed_script);
    for (segment, params) in &canon.paths_to_params {
        if !params.is_empty() {
            println!("  Params:      {} -> {}", segment, params.join(", "));
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<Arc<HotsetStore>, String> {
    let backend = JsonFileStore::new(&config.client.state_path);
    let ttl = Duration::from_secs(config.client.cache_ttl_secs);
    HotsetStore::open(Arc::new(backend), ttl)
        .map(Arc::new)
        .map_err(|e| e.to_string())
}

fn resolver(config: &Config) -> Result<RedirectResolver, String> {
    let transport = HttpTransport::new(
        Duration::from_millis(config.resolver.hop_timeout_ms),
        &config.resolver.user_agent,
    )
    .map_err(|e| e.to_string())?;
    Ok(RedirectResolver::new(Arc::new(transport)).with_max_hops(config.resolver.max_hops))
}

async fn cmd_check(config: &Config, url: &str, no_resolve: bool, json: bool) -> Result<(), String> {
    let store = open_store(config)?;
    let mut engine = DecisionEngine::new(
        config.canonicalizer().map_err(|e| e.to_string())?,
        config.scorer().map_err(|e| e.to_string())?,
        store,
        config.engine_config(),
    );
    if !no_resolve {
        engine = engine.with_resolver(resolver(config)?);
    }
    let remote_log = Arc::new(RemoteLog::new());
    let remote_timeout = Duration::from_secs(config.client.request_timeout_secs);
    if let Some(endpoint) = &config.client.remote_url {
        let analyzer = HttpRemoteAnalyzer::new(endpoint.clone(), remote_timeout).map_err(|e| e.to_string())?;
        engine = engine.with_remote(Arc::new(analyzer), remote_log.clone());
    }

    let start = Instant::now();
    let decision = engine.decide(url).await;
    let elapsed = start.elapsed();

    if json {
        let text = serde_json::to_string_pretty(&decision).map_err(|e| e.to_string())?;
        println!("{}", text);
    } else {
        println!("Verdict:  {:?}", decision.verdict);
        println!("Source:   {:?}", decision.source);
        println!("Final:    {}", decision.final_url);
        if let Some(redirect) = &decision.redirect {
            match redirect {
                RedirectOutcome::Success { hop_count, final_status, .. } => {
                    println!("Resolve:  {} hops, status {}", hop_count, final_status)
                }
                RedirectOutcome::Failure { cause, hops_so_far, .. } => {
                    println!("Resolve:  failed after {} hops: {}", hops_so_far, cause)
                }
            }
        }
        if let Some(assessment) = &decision.assessment {
            println!("Score:    {:.2} [{}]", assessment.score, assessment.reasons.tags());
        }
        println!("Time:     {:.1}ms", elapsed.as_secs_f64() * 1000.0);
        println!();
        println!("{}", decision.context());
    }

    // Remote analysis reports asynchronously
    if config.client.remote_url.is_some() && !decision.is_blocked() {
        let deadline = Instant::now() + remote_timeout;
        while remote_log.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if let Some(entry) = remote_log.latest_for(&decision.final_url) {
            let text = serde_json::to_string(&entry.status).map_err(|e| e.to_string())?;
            println!("Remote:   {}", text);
        }
    }

    Ok(())
}

async fn cmd_resolve(config: &Config, url: &str, max_hops: Option<u32>) -> Result<(), String> {
    let mut resolver = resolver(config)?;
    if let Some(max_hops) = max_hops {
        resolver = resolver.with_max_hops(max_hops);
    }
    let outcome = resolver.resolve(url).await;
    match &outcome {
        RedirectOutcome::Success {
            final_url,
            hop_count,
            final_status,
            ..
        } => {
            println!("Final:    {}", final_url);
            println!("Hops:     {}", hop_count);
            println!("Status:   {}", final_status);
            Ok(())
        }
        RedirectOutcome::Failure { cause, hops_so_far, .. } => Err(format!(
            "{} (code {}, after {} hops)",
            cause.description(),
            cause.code(),
            hops_so_far
        )),
    }
}

fn open_ledger(config: &Config) -> Result<Arc<HotsetLedger>, String> {
    let storage = JsonFileStorage::new(&config.ledger.storage_path);
    HotsetLedger::open(config.ledger_config(), Arc::new(storage))
        .map(Arc::new)
        .map_err(|e| e.to_string())
}

async fn cmd_serve(config: &Config) -> Result<(), String> {
    let ledger = open_ledger(config)?;

    if config.ledger.publish_interval_secs > 0 {
        let source = Arc::new(RegistryFile::new(&config.ledger.domains_path));
        let period = Duration::from_secs(config.ledger.publish_interval_secs);
        HotsetScheduler::new(ledger.clone(), source, period).spawn();
    }

    let listener = tokio::net::TcpListener::bind(config.ledger.bind.as_str())
        .await
        .map_err(|e| format!("Failed to bind '{}': {}", config.ledger.bind, e))?;
    lg_ledger::serve(listener, ledger).await.map_err(|e| e.to_string())
}

fn cmd_publish(config: &Config) -> Result<(), String> {
    let ledger = open_ledger(config)?;
    let source = RegistryFile::new(&config.ledger.domains_path);
    let row = ledger.create_version(&source).map_err(|e| e.to_string())?;

    println!("Published hotset version {}", row.version);
    println!("  Whitelist:   {} domains", row.white_snapshot.as_ref().map_or(0, Vec::len));
    println!("  Blacklist:   {} domains", row.black_snapshot.as_ref().map_or(0, Vec::len));
    println!("  Retained:    {:?}", ledger.versions());

    Ok(())
}

async fn cmd_sync(config: &Config, watch: bool) -> Result<(), String> {
    let store = open_store(config)?;
    let client = HttpHotsetClient::new(
        &config.client.server_url,
        Duration::from_secs(config.client.request_timeout_secs),
    )
    .map_err(|e| e.to_string())?;
    let coordinator = Arc::new(SyncCoordinator::new(Arc::new(client), store.clone()));

    if watch {
        let period = Duration::from_secs(config.client.sync_interval_secs);
        let handle = SyncScheduler::new(coordinator, period, config.backoff()).spawn();
        return handle.await.map_err(|e| e.to_string());
    }

    let outcome = coordinator.trigger().await.map_err(|e| e.to_string())?;
    let text = serde_json::to_string(&outcome).map_err(|e| e.to_string())?;
    println!("{}", text);
    let state = store.state();
    println!(
        "Local hotset version {} ({} white, {} black)",
        state.version,
        state.lists.whitelist.len(),
        state.lists.blacklist.len()
    );

    Ok(())
}
