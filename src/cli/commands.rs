use chrono::{DateTime, Utc};

use crate::app::{AppContext, Result, SyncError};
use crate::daemon::Daemon;
use crate::domain::{Settings, Subscription, SubscriptionType, UpdateConfig};
use crate::settings::SettingsRepository;
use crate::store::CoreStore;
use crate::sync::{Trigger, WorkResult};
use crate::telemetry::CountResult;

pub async fn sync(ctx: &AppContext, force: bool) -> Result<()> {
    println!("Syncing subscriptions{}...", if force { " (forced)" } else { "" });

    let result = ctx
        .scheduler
        .execute(Trigger::OneShot { forced: force }, 0)
        .await;

    match result {
        WorkResult::Success => {
            let data = ctx.store.get()?;
            println!(
                "Sync complete: {} subscriptions",
                data.downloaded_subscriptions.len()
            );
            if let Some(path) = ctx.provider.current_path()? {
                println!("Filter file: {}", path.display());
            }
        }
        WorkResult::Retry | WorkResult::Failure => {
            eprintln!("Sync failed; run with RUST_LOG=debug for details");
        }
    }
    Ok(())
}

pub async fn count(ctx: &AppContext) -> Result<()> {
    match ctx.user_counter.count().await? {
        CountResult::Success => println!("User counted"),
        CountResult::Skipped => println!("Already counted today"),
        CountResult::Failed => eprintln!("Counting request failed"),
    }
    Ok(())
}

pub async fn validate(ctx: &AppContext, url: &str) -> Result<()> {
    if ctx.scheduler.validate_subscription(url).await {
        println!("Valid: {}", url);
    } else {
        eprintln!("Not reachable: {}", url);
    }
    Ok(())
}

pub fn status(ctx: &AppContext) -> Result<()> {
    let settings = ctx.settings.current();
    let data = ctx.store.get()?;

    println!(
        "Ad blocking: {}, Acceptable Ads: {}, updates: {}",
        on_off(settings.adblock_enabled),
        on_off(settings.acceptable_ads_enabled),
        match settings.update_config {
            UpdateConfig::WifiOnly => "wifi only",
            UpdateConfig::Always => "always",
        }
    );
    println!("Last sync: {}", format_time(data.last_updated));

    if settings.active_primary_subscriptions.is_empty()
        && settings.active_other_subscriptions.is_empty()
    {
        println!("No subscriptions (default list is used)");
    }
    for subscription in settings
        .active_primary_subscriptions
        .iter()
        .chain(settings.active_other_subscriptions.iter())
    {
        let version = data
            .downloaded(&subscription.url)
            .map(|d| d.version.as_str())
            .unwrap_or("-");
        let marker = if subscription.has_error { "!" } else { " " };
        println!(
            "{} {} (version {}, updated {})\n  {}",
            marker,
            subscription.display_title(),
            version,
            format_time(subscription.last_update),
            subscription.url
        );
    }

    for domain in &settings.allowed_domains {
        println!("  allow {}", domain);
    }
    for domain in &settings.blocked_domains {
        println!("  block {}", domain);
    }

    println!("{}", crate::daemon::daemon_status());
    Ok(())
}

pub fn print_path(ctx: &AppContext) -> Result<()> {
    let path = ctx
        .provider
        .current_path()?
        .ok_or_else(|| SyncError::NotFound("no filter file yet, run `filtersync sync`".into()))?;
    println!("{}", path.display());
    Ok(())
}

pub fn show_filters(ctx: &AppContext) -> Result<()> {
    let mut file = ctx.provider.open()?;
    let stdout = std::io::stdout();
    std::io::copy(&mut file, &mut stdout.lock())?;
    Ok(())
}

pub async fn subscribe(
    ctx: &AppContext,
    url: &str,
    title: Option<String>,
    file: bool,
    primary: bool,
) -> Result<()> {
    let kind = if file {
        SubscriptionType::FromFile
    } else {
        SubscriptionType::FromUrl
    };
    let subscription = Subscription::new(url, title.unwrap_or_default(), kind);

    if !add_subscription(ctx.settings.as_ref(), subscription, primary)? {
        println!("Already subscribed: {}", url);
        return Ok(());
    }
    println!("Subscribed: {}", url);
    sync_after_edit(ctx).await
}

pub async fn unsubscribe(ctx: &AppContext, url: &str) -> Result<()> {
    if !remove_subscription(ctx.settings.as_ref(), url)? {
        return Err(SyncError::NotFound(url.to_string()));
    }
    println!("Unsubscribed: {}", url);
    sync_after_edit(ctx).await
}

pub async fn allow(ctx: &AppContext, domain: &str, remove: bool) -> Result<()> {
    let domain = normalize_domain(domain)?;
    let mut list = ctx.settings.current().allowed_domains;
    if !edit_domains(&mut list, &domain, remove) {
        println!("Allow list unchanged");
        return Ok(());
    }
    ctx.settings.set_allowed_domains(list)?;
    println!("{} {} allow list", if remove { "Removed from" } else { "Added to" }, domain);
    sync_after_edit(ctx).await
}

pub async fn block(ctx: &AppContext, domain: &str, remove: bool) -> Result<()> {
    let domain = normalize_domain(domain)?;
    let mut list = ctx.settings.current().blocked_domains;
    if !edit_domains(&mut list, &domain, remove) {
        println!("Block list unchanged");
        return Ok(());
    }
    ctx.settings.set_blocked_domains(list)?;
    println!("{} {} block list", if remove { "Removed from" } else { "Added to" }, domain);
    sync_after_edit(ctx).await
}

pub async fn acceptable_ads(ctx: &AppContext, enabled: bool) -> Result<()> {
    if ctx.settings.current().acceptable_ads_enabled == enabled {
        println!("Acceptable Ads already {}", on_off(enabled));
        return Ok(());
    }
    ctx.settings.set_acceptable_ads_enabled(enabled)?;
    println!("Acceptable Ads {}", on_off(enabled));
    sync_after_edit(ctx).await
}

pub fn cadence(ctx: &AppContext, config: UpdateConfig) -> Result<()> {
    ctx.settings.set_update_config(config)?;
    println!("Periodic updates: {:?}", config);
    if !Daemon::is_running() {
        println!("Takes effect when the daemon is started");
    }
    Ok(())
}

/// A running daemon observes the edit itself; otherwise merge right away.
async fn sync_after_edit(ctx: &AppContext) -> Result<()> {
    if Daemon::is_running() {
        println!("The daemon will apply the change");
        return Ok(());
    }
    sync(ctx, false).await
}

/// Returns false when the URL is already in either list.
fn add_subscription(
    settings: &dyn SettingsRepository,
    subscription: Subscription,
    primary: bool,
) -> Result<bool> {
    if is_subscribed(&settings.current(), &subscription.url) {
        return Ok(false);
    }

    let mut subscription = Some(subscription);
    settings.update(&mut |s| {
        let list = if primary {
            &mut s.active_primary_subscriptions
        } else {
            &mut s.active_other_subscriptions
        };
        list.extend(subscription.take());
    })?;
    Ok(true)
}

fn remove_subscription(settings: &dyn SettingsRepository, url: &str) -> Result<bool> {
    if !is_subscribed(&settings.current(), url) {
        return Ok(false);
    }
    settings.update(&mut |s| {
        s.active_primary_subscriptions.retain(|sub| sub.url != url);
        s.active_other_subscriptions.retain(|sub| sub.url != url);
    })?;
    Ok(true)
}

fn is_subscribed(settings: &Settings, url: &str) -> bool {
    settings.active_urls().any(|u| u == url)
}

fn normalize_domain(domain: &str) -> Result<String> {
    let domain = domain.trim().trim_end_matches('.').to_lowercase();
    if domain.is_empty() || domain.contains(char::is_whitespace) {
        return Err(SyncError::Parse(format!("invalid domain: {:?}", domain)));
    }
    Ok(domain)
}

/// Returns whether the list changed.
fn edit_domains(list: &mut Vec<String>, domain: &str, remove: bool) -> bool {
    let present = list.iter().any(|d| d == domain);
    match (remove, present) {
        (false, false) => {
            list.push(domain.to_string());
            true
        }
        (true, true) => {
            list.retain(|d| d != domain);
            true
        }
        _ => false,
    }
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

fn format_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "never".to_string())
}
