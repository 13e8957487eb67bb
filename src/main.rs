mod cli;
mod ui;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands, QuotaCommands};
use crate::ui::Console;
use rxcache::cache::{query_hash, normalize, CacheMetadata, CacheService, SaveOutcome};
use rxcache::config::Settings;
use rxcache::core::{EventLog, EventLogConfig, GatewayOutcome, Metrics, QueryGateway};
use rxcache::llm::build_provider;
use rxcache::quota::{QuotaDecision, QuotaService, TierName};
use rxcache::store::{CacheStore, MemoryStore, QuotaStore, SqliteStore};

/// Everything a command needs, wired from settings
struct App {
    settings: Settings,
    metrics: Arc<Metrics>,
    cache: Arc<CacheService>,
    quota: Arc<QuotaService>,
}

impl App {
    fn build(settings: Settings) -> Result<Self> {
        let (cache_store, quota_store) = if settings.store.in_memory {
            split(Arc::new(MemoryStore::new()))
        } else {
            let path = settings.store_path()?;
            tracing::debug!(path = %path.display(), "opening store");
            let store = SqliteStore::open(&path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            split(Arc::new(store))
        };

        let events = Arc::new(EventLog::new(EventLogConfig {
            log_file: settings.quota.events_log.clone(),
            ..EventLogConfig::default()
        })?);
        let metrics = Arc::new(Metrics::new());

        let cache = Arc::new(CacheService::new(
            cache_store,
            settings.cache.clone(),
            metrics.clone(),
        ));
        let quota = Arc::new(QuotaService::new(
            quota_store,
            events,
            metrics.clone(),
            settings.quota.default_tier,
        ));

        Ok(Self {
            settings,
            metrics,
            cache,
            quota,
        })
    }
}

/// One backing store serves both the cache and the quota tables
fn split<S>(store: Arc<S>) -> (Arc<dyn CacheStore>, Arc<dyn QuotaStore>)
where
    S: CacheStore + QuotaStore + 'static,
{
    (store.clone(), store)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut settings = match &cli.config {
        Some(path) => {
            dotenvy::dotenv().ok();
            Settings::load_from(path)?
        }
        None => Settings::load()?,
    };
    if cli.in_memory {
        settings.store.in_memory = true;
    }
    if let Some(db) = cli.db {
        settings.store.path = Some(db);
    }

    let console = Console::new();
    if cli.verbose {
        console.banner();
    }

    let app = App::build(settings)?;

    match cli.command {
        Commands::Ask {
            query,
            category,
            user,
        } => {
            let provider = build_provider(&app.settings.provider)?;
            let gateway = QueryGateway::new(
                app.quota.clone(),
                app.cache.clone(),
                provider,
                app.metrics.clone(),
            );
            match gateway.ask(&user, &query, &category, &[]).await {
                Ok(GatewayOutcome::Answered(answer)) => console.answer(&answer),
                Ok(GatewayOutcome::LimitReached(limit)) => {
                    console.warn(&format!(
                        "{} query limit reached for '{}'. Upgrade your plan to keep going.",
                        limit, user
                    ));
                }
                Err(e) => {
                    console.error(&format!("{:#}", e));
                    std::process::exit(1);
                }
            }
        }
        Commands::Lookup {
            query,
            category,
            candidates,
        } => {
            if candidates {
                console.candidates(&app.cache.find_candidates(&query, &category).await);
            } else {
                match app.cache.find_similar_query(&query, &category).await {
                    Some(entry) => console.entry(&entry),
                    None => console.info("Cache miss"),
                }
            }
        }
        Commands::Save {
            query,
            response,
            category,
            provider,
        } => {
            let metadata = provider
                .map(CacheMetadata::from_provider)
                .unwrap_or_default();
            match app
                .cache
                .save_response(&query, &category, &response, metadata)
                .await
            {
                SaveOutcome::Stored {
                    hash,
                    quality_score,
                } => console.success(&format!("Stored {} (quality {:.2})", hash, quality_score)),
                SaveOutcome::Rejected { quality_score } => console.warn(&format!(
                    "Not stored: quality {:.2} is below {:.2}",
                    quality_score, app.settings.cache.min_quality_to_store
                )),
                SaveOutcome::Skipped => console.warn("Nothing stored"),
            }
        }
        Commands::Cleanup => {
            let removed = app.cache.cleanup_cache().await;
            console.success(&format!("Removed {} entries", removed));
        }
        Commands::Stats => {
            console.stats(&app.cache.stats().await, &app.metrics.summary());
        }
        Commands::Clear { yes } => {
            if yes || console.confirm("Delete every cached answer?") {
                let removed = app.cache.clear().await;
                console.success(&format!("Cleared {} entries", removed));
            }
        }
        Commands::Quota { command } => match command {
            QuotaCommands::Status { user } => {
                console.quota(&app.quota.load(&user).await?);
            }
            QuotaCommands::Consume { user } => match app.quota.try_consume(&user).await? {
                QuotaDecision::Allowed(_) => {
                    console.success("Query consumed");
                    console.quota(&app.quota.snapshot(&user));
                }
                QuotaDecision::Denied(limit) => {
                    console.warn(&format!("{} limit reached", limit));
                }
            },
            QuotaCommands::Upgrade { user, tier } => {
                let tier: TierName = tier.parse()?;
                let upgraded = app.quota.upgrade_tier(&user, tier).await?;
                console.success(&format!(
                    "'{}' is now on {} ({} / day, {} / month)",
                    upgraded.user_id, upgraded.tier_name, upgraded.daily_limit, upgraded.monthly_limit
                ));
            }
        },
        Commands::Normalize { query, category } => {
            let normalized = normalize(&query, &category);
            println!("{}", normalized);
            println!("{}", query_hash(&normalized));
        }
        Commands::Config => {
            console.show_config(&app.settings);
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "rxcache=debug" } else { "rxcache=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
