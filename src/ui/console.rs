use colored::Colorize;

use rxcache::cache::{CacheEntry, CacheStats, ScoredEntry};
use rxcache::config::Settings;
use rxcache::core::{Answer, AnswerSource, MetricsSummary};
use rxcache::quota::QuotaSnapshot;

pub struct Console;

impl Console {
    pub fn new() -> Self {
        Self
    }

    pub fn banner(&self) {
        let version = env!("CARGO_PKG_VERSION");
        println!(
            "{} {}",
            "rxcache".bright_cyan().bold(),
            format!("v{}", version).dimmed()
        );
    }

    pub fn info(&self, message: &str) {
        println!("{} {}", "[INFO]".blue(), message);
    }

    pub fn warn(&self, message: &str) {
        println!("{} {}", "[WARN]".yellow(), message);
    }

    pub fn error(&self, message: &str) {
        println!("{} {}", "[ERROR]".red(), message);
    }

    pub fn success(&self, message: &str) {
        println!("{} {}", "[OK]".green(), message);
    }

    pub fn answer(&self, answer: &Answer) {
        let source = match answer.source {
            AnswerSource::Cache => "[CACHE]".green().bold(),
            AnswerSource::Provider => "[PROVIDER]".magenta().bold(),
        };
        let quality = answer
            .quality_score
            .map(|q| format!("quality {:.2}", q))
            .unwrap_or_default();
        println!("\n{} {}\n{}", source, quality.dimmed(), "━".repeat(50).dimmed());
        println!("{}", answer.content);
        println!(
            "\n{}",
            format!(
                "{} left today, {} left this month",
                answer.remaining.daily, answer.remaining.monthly
            )
            .dimmed()
        );
    }

    pub fn entry(&self, entry: &CacheEntry) {
        println!(
            "\n{} {}",
            format!("[{}]", entry.hash).cyan(),
            entry.normalized_query.bold()
        );
        println!("{}", "─".repeat(50).dimmed());
        println!(
            "  {} {}   {} {}   {} {:.2}",
            "category:".yellow(),
            entry.category,
            "hits:".yellow(),
            entry.hit_count,
            "quality:".yellow(),
            entry.quality_score
        );
        println!(
            "  {} {}",
            "expires:".yellow(),
            entry.expires_at.format("%Y-%m-%d %H:%M UTC")
        );
        if let Some(provider) = &entry.metadata.provider {
            println!("  {} {}", "provider:".yellow(), provider);
        }
        println!("\n{}", entry.response);
    }

    pub fn candidates(&self, candidates: &[ScoredEntry]) {
        if candidates.is_empty() {
            self.info("No similar entries");
            return;
        }
        println!("\n{}", "SIMILAR ENTRIES".bold().underline());
        println!("{}", "─".repeat(50));
        for scored in candidates {
            println!(
                "  {} {} {}",
                format!("{:.0}%", scored.similarity * 100.0).green(),
                scored.entry.normalized_query.cyan(),
                format!("(hits {}, quality {:.2})", scored.entry.hit_count, scored.entry.quality_score)
                    .dimmed()
            );
        }
        println!();
    }

    pub fn quota(&self, snapshot: &QuotaSnapshot) {
        let remaining = snapshot.remaining();
        let pct = snapshot.usage_percentage();

        println!("\n{}", "QUOTA".bold().underline());
        println!("{}", "─".repeat(50));
        println!(
            "  {} {}   {} {}",
            "user:".yellow(),
            snapshot.tier.user_id.cyan(),
            "tier:".yellow(),
            snapshot.tier.tier_name.to_string().green().bold()
        );
        println!(
            "  {} {}/{} ({:.0}%), {} left",
            "today:".yellow(),
            snapshot.usage.queries_today,
            snapshot.tier.daily_limit,
            pct.daily,
            remaining.daily
        );
        println!(
            "  {} {}/{} ({:.0}%), {} left",
            "month:".yellow(),
            snapshot.usage.queries_this_month,
            snapshot.tier.monthly_limit,
            pct.monthly,
            remaining.monthly
        );
        println!(
            "  {} {}   {} {}   {} {:.1}",
            "cache access:".yellow(),
            if snapshot.can_use_cache() {
                "yes".green()
            } else {
                "no".red()
            },
            "streak:".yellow(),
            snapshot.usage.streak_days,
            "avg/day:".yellow(),
            snapshot.usage.avg_daily
        );
        println!();
    }

    pub fn stats(&self, stats: &CacheStats, metrics: &MetricsSummary) {
        println!("\n{}", "CACHE".bold().underline());
        println!("{}", "─".repeat(50));
        println!("{}", stats);
        if !metrics.counters.is_empty() {
            println!("\n{}", "SESSION METRICS".bold().underline());
            println!("{}", metrics);
        }
    }

    pub fn show_config(&self, settings: &Settings) {
        println!("\n{}", "CONFIGURATION".bold().underline());
        println!("{}", "─".repeat(50));

        println!("\n  {}", "Store:".yellow());
        if settings.store.in_memory {
            println!("    in-memory");
        } else if let Ok(path) = settings.store_path() {
            println!("    {}", path.display().to_string().dimmed());
        }

        let cache = &settings.cache;
        println!("\n  {}", "Cache:".yellow());
        println!(
            "    TTL general/specific: {}h / {}h",
            cache.general_ttl_hours, cache.specific_ttl_hours
        );
        println!("    Similarity threshold: {}", cache.similarity_threshold);
        println!(
            "    Fuzzy candidates: {} (min quality {})",
            cache.fuzzy_candidate_limit, cache.fuzzy_min_quality
        );
        println!("    Unused retention: {} days", cache.unused_retention_days);
        for (category, hours) in &cache.category_ttl_hours {
            println!("    TTL {}: {}h", category.cyan(), hours);
        }

        println!("\n  {}", "Quota:".yellow());
        println!("    Default tier: {}", settings.quota.default_tier.to_string().green());

        println!("\n  {}", "Provider:".yellow());
        println!(
            "    {} {}",
            settings.provider.kind.cyan().bold(),
            settings.provider.model.dimmed()
        );

        if let Ok(path) = Settings::config_path() {
            println!(
                "\n  {} {}",
                "Config file:".yellow(),
                path.display().to_string().dimmed()
            );
        }
        println!();
    }

    pub fn confirm(&self, message: &str) -> bool {
        print!("{} {} [y/N]: ", "[CONFIRM]".yellow().bold(), message);
        std::io::Write::flush(&mut std::io::stdout()).ok();

        let mut input = String::new();
        if std::io::stdin().read_line(&mut input).is_ok() {
            let input = input.trim().to_lowercase();
            return input == "y" || input == "yes";
        }
        false
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}
