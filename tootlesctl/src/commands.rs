use anyhow::{Context, bail};
use tootles_config::to_toml;
use tootles_media::{
    Deferred, MediaCache, MediaConfig, MediaManager, Presentation, RenderOutcome,
    TierStatsSnapshot,
};
use tootles_model::{MediaKind, MediaRef, Priority, Tier};
use tracing::info;

fn media_ref(
    url: &str,
    kind: Option<MediaKind>,
    description: Option<String>,
) -> anyhow::Result<MediaRef> {
    let media = match kind {
        Some(kind) => MediaRef::new(url, kind),
        None => MediaRef::detect(url, None),
    }
    .with_context(|| format!("cannot use '{url}' as a media reference"))?;
    Ok(match description {
        Some(text) => media.with_description(text),
        None => media,
    })
}

pub async fn fetch(
    config: MediaConfig,
    url: &str,
    kind: Option<MediaKind>,
) -> anyhow::Result<()> {
    let media = media_ref(url, kind, None)?;
    let manager = MediaManager::new(config)
        .await
        .context("failed to open the media cache")?;

    let result = manager
        .loader()
        .fetch_bytes(&media, Priority::Foreground)
        .await;
    manager.shutdown().await;
    let payload = result.with_context(|| format!("failed to fetch {url}"))?;

    let tiers: Vec<String> = [Tier::Memory, Tier::Disk]
        .into_iter()
        .filter(|tier| manager.cache().contains(media.key(), *tier))
        .map(|tier| tier.to_string())
        .collect();
    let placement = if tiers.is_empty() {
        "not cached".to_string()
    } else {
        format!("cached in {}", tiers.join(" + "))
    };
    println!(
        "{} {} {} bytes, {placement}",
        media.key().short(),
        media.kind(),
        payload.len()
    );
    Ok(())
}

pub async fn preview(
    config: MediaConfig,
    url: &str,
    kind: Option<MediaKind>,
    description: Option<String>,
) -> anyhow::Result<()> {
    let media = media_ref(url, kind, description)?;
    let manager = MediaManager::new(config)
        .await
        .context("failed to open the media cache")?;

    let outcome = match manager.get_preview(&media).await {
        RenderOutcome::Deferred(Deferred {
            pending: Some(pending),
            ..
        }) => pending.wait().await,
        outcome => outcome,
    };
    manager.shutdown().await;

    println!("{}", outcome.summary());
    match outcome {
        RenderOutcome::Rendered(Presentation::Inline(image)) => {
            println!("{} {}", media.kind().icon(), image.alt_text);
        }
        RenderOutcome::Rendered(Presentation::External(view)) => {
            println!("{} {}", view.kind.icon(), view.alt_text);
            println!("{}", view.hint());
        }
        RenderOutcome::Deferred(deferred) => println!("{deferred}"),
        RenderOutcome::Failed(failure) => {
            if let Some(placeholder) = &failure.placeholder {
                println!("{placeholder}");
            }
            bail!("preview failed: {}", failure.error);
        }
    }
    Ok(())
}

fn print_tier(tier: Tier, stats: &TierStatsSnapshot) {
    println!(
        "{:<7} {:>7} entries  {:>10} / {:<10} hits {:<6} misses {:<6} expired {:<6} evicted {:<6} rejected {}",
        tier.to_string(),
        stats.entries,
        stats.resident_bytes.to_string(),
        stats.budget.to_string(),
        stats.hits,
        stats.misses,
        stats.expired,
        stats.evicted_for_budget,
        stats.rejected_oversize,
    );
}

pub async fn stats(config: &MediaConfig) -> anyhow::Result<()> {
    let cache = MediaCache::open(config)
        .await
        .context("failed to open the media cache")?;
    let stats = cache.stats();

    println!("cache root: {}", cache.root().display());
    print_tier(Tier::Memory, &stats.memory);
    print_tier(Tier::Disk, &stats.disk);
    println!(
        "promotions {}  write failures {}  corrupt reads {}",
        stats.promotions, stats.write_failures, stats.corrupt_reads
    );
    println!("expiry {}", humantime::format_duration(config.expiry));
    Ok(())
}

pub async fn sweep(config: &MediaConfig) -> anyhow::Result<()> {
    let cache = MediaCache::open(config)
        .await
        .context("failed to open the media cache")?;
    let removed = cache.evict_expired().await;
    cache.flush().await;
    info!(removed, "manual sweep finished");
    println!("removed {removed} expired entries");
    Ok(())
}

pub async fn clear(config: &MediaConfig) -> anyhow::Result<()> {
    let cache = MediaCache::open(config)
        .await
        .context("failed to open the media cache")?;
    let removed = cache.clear().await.context("failed to clear the cache")?;
    println!("removed {removed} entries");
    Ok(())
}

pub fn viewers(config: &MediaConfig) {
    for kind in MediaKind::ALL {
        match config.viewers.get(kind) {
            Some(command) => {
                let state = if command.is_installed() {
                    "installed"
                } else {
                    "not on PATH"
                };
                println!("{:<8} {} ({state})", kind.to_string(), command.as_str());
            }
            None => println!("{:<8} none", kind.to_string()),
        }
    }
}

pub fn print_config(config: &MediaConfig) -> anyhow::Result<()> {
    print!("{}", to_toml(config)?);
    Ok(())
}
