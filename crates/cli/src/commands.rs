//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use indicatif::{ProgressBar, ProgressStyle};

use formcache_core::cache::{FormCache, SyncOptions};
use formcache_core::config::AppConfig;
use formcache_core::conflict::{ConflictResolver, FormDefinition, ImportOptions};
use formcache_core::models::SyncProgress;
use formcache_core::remote::RemoteCall;
use formcache_core::template::{
    FieldRename, TemplateCloner, TemplateLister, TemplateModification, TemplateSummary,
};

use crate::style;
use crate::Session;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"# formcache configuration

[api]
base_url = "https://forms.example.com/wp-json/gf/v2"
consumer_key_env = "FORMS_CONSUMER_KEY"
consumer_secret_env = "FORMS_CONSUMER_SECRET"
timeout_secs = 30

[cache]
enabled = true
# db_path defaults to <platform data dir>/formcache/forms.db
max_age_secs = 3600

[cache.probe]
max_attempts = 3
base_delay_ms = 250
max_delay_ms = 5000
circuit_breaker_threshold = 5
max_recorded_errors = 100

[cache.sync]
trailing_probe_window = 5
max_gap_span = 1000

[logging]
level = "info"
"#;

pub fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, DEFAULT_CONFIG).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the config file with your forms API base URL");
    println!("  2. Set FORMS_CONSUMER_KEY and FORMS_CONSUMER_SECRET");
    println!(
        "  3. Validate with: formcache validate --config {}",
        output.display()
    );
    println!("  4. Fill the cache: formcache sync --config {}", output.display());

    Ok(())
}

pub fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    match config.resolve_env_vars() {
        Ok(()) => println!("  [OK] API credentials resolved from the environment"),
        Err(e) => println!("  [WARN] {}", e),
    }

    match config.validate() {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    let set = |v: &Option<String>| if v.is_some() { "set" } else { "NOT SET" };
    println!();
    println!("Configuration summary:");
    println!("  API base URL    : {}", config.api.base_url);
    println!("  Consumer key    : {}", set(&config.api.consumer_key));
    println!("  Consumer secret : {}", set(&config.api.consumer_secret));
    println!("  Request timeout : {}s", config.api.timeout_secs);
    println!(
        "  Cache           : {}",
        if config.cache.enabled { "enabled" } else { "disabled" }
    );
    println!("  Cache database  : {}", config.cache.db_path.display());
    println!("  Max cache age   : {}s", config.cache.max_age_secs);
    println!(
        "  Probe policy    : {} attempts, breaker after {} failures",
        config.cache.probe.max_attempts, config.cache.probe.circuit_breaker_threshold
    );
    println!();
    println!("Configuration is valid.");

    Ok(())
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

pub fn cmd_status(cache: &FormCache) -> Result<()> {
    let stats = cache.get_cache_stats().context("failed to read cache stats")?;
    let status = cache.get_sync_status().context("failed to read sync status")?;

    println!();
    println!("{}", style::header("formcache Status"));
    println!("{}", "═".repeat(16));
    println!();
    println!("  Cache        {}", style::freshness(status.is_stale));
    println!("  Forms        {}", stats.total_forms);
    println!("  Active       {}", stats.active_count);
    println!(
        "  Inactive     {}",
        stats.total_forms.saturating_sub(stats.active_count)
    );
    println!(
        "  Last sync    {}",
        status
            .last_sync
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".to_string())
    );
    println!();

    Ok(())
}

pub async fn cmd_sync(cache: &FormCache, remote: Arc<dyn RemoteCall>) -> Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.blue} {msg}")
            .context("invalid progress template")?
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.set_message("Fetching active forms...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let report = |p: SyncProgress| {
        spinner.set_message(format!("{} ({} processed, {} found)", p.phase, p.current, p.found));
    };
    let result = cache
        .sync_all_forms(remote.as_ref(), SyncOptions::with_progress(&report))
        .await;
    spinner.finish_and_clear();
    let result = result.context("sync failed")?;

    println!("{}", style::success("Sync complete"));
    println!("  Discovered : {}", result.discovered);
    println!("  Errors     : {}", result.errors.len());
    println!("  Duration   : {} ms", result.duration_ms);
    println!("  Finished   : {}", result.last_sync_time.to_rfc3339());

    if !result.errors.is_empty() {
        println!();
        println!("{}", style::warn("Some forms could not be synced:"));
        for error in &result.errors {
            println!("  - {}", error);
        }
    }
    Ok(())
}

pub async fn cmd_probe(cache: &FormCache, remote: Arc<dyn RemoteCall>, ids: &[i64]) -> Result<()> {
    let results = cache.probe_batch(ids, remote.as_ref()).await;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["ID", "Result", "Title", "Active", "Error"]);
    for result in &results {
        let outcome = match (&result.error, result.found) {
            (Some(_), _) => Cell::new("✗ error").fg(Color::Red),
            (None, true) => Cell::new("✓ found").fg(Color::Green),
            (None, false) => Cell::new("— absent"),
        };
        let (title, active) = match &result.form {
            Some(form) => (form.title.clone(), if form.is_active { "yes" } else { "no" }),
            None => (String::new(), ""),
        };
        table.add_row(vec![
            Cell::new(result.id),
            outcome,
            Cell::new(title),
            Cell::new(active),
            Cell::new(result.error.as_deref().unwrap_or("")),
        ]);
    }
    println!("{}", table);

    let stats = cache.get_last_probe_stats();
    println!();
    println!(
        "{}",
        style::dim(&format!(
            "Probe stats: {} attempted, {} found, {} failed",
            stats.attempted, stats.found, stats.failed
        ))
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

pub async fn cmd_templates_list(session: &Session, from_cache: bool) -> Result<()> {
    let lister = match session.remote() {
        Ok(remote) => TemplateLister::with_remote(remote),
        Err(_) => TemplateLister::new(),
    };
    let templates = if from_cache {
        lister
            .list_cached_templates(session.cache()?)
            .await
            .context("failed to list cached templates")?
    } else {
        lister
            .list_templates(None)
            .await
            .context("failed to list templates")?
    };
    print_templates(&templates);
    Ok(())
}

fn print_templates(templates: &[TemplateSummary]) {
    if templates.is_empty() {
        println!("No templates found.");
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["ID", "Name", "Fields", "Created", "Description"]);
    for t in templates {
        table.add_row(vec![
            Cell::new(&t.id),
            Cell::new(&t.name),
            Cell::new(t.field_count),
            Cell::new(&t.created_date),
            Cell::new(&t.description),
        ]);
    }
    println!("{}", table);
    println!();
    println!("{} template(s)", templates.len());
}

pub async fn cmd_templates_clone(
    remote: Arc<dyn RemoteCall>,
    id: i64,
    title: String,
    renames: Vec<FieldRename>,
    create: bool,
) -> Result<()> {
    let cloner = TemplateCloner::new(remote);
    let modifications = TemplateModification {
        title,
        field_renames: renames,
        preserve_logic: true,
    };

    if create {
        let created = cloner
            .create_from_template(id, &modifications)
            .await
            .with_context(|| format!("failed to create a form from template {id}"))?;
        let new_id = created
            .get("id")
            .map(|v| v.to_string())
            .unwrap_or_else(|| "?".into());
        println!(
            "{}",
            style::success(&format!("Created form {} from template {}", new_id, id))
        );
    } else {
        let clone = cloner
            .clone_from_template(id, &modifications)
            .await
            .with_context(|| format!("failed to clone template {id}"))?;
        println!("{}", serde_json::to_string_pretty(&clone)?);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Import / conflicts
// ---------------------------------------------------------------------------

fn resolver(session: &Session) -> Result<ConflictResolver> {
    let resolver = ConflictResolver::new(session.remote()?);
    Ok(match session.cache_arc() {
        Some(cache) => resolver.with_cache(cache),
        None => resolver,
    })
}

fn read_definition(file: &Path) -> Result<String> {
    std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))
}

pub async fn cmd_import(
    session: &Session,
    file: &Path,
    complete_discovery: bool,
    use_cache: bool,
) -> Result<()> {
    let json_text = read_definition(file)?;
    let options = ImportOptions {
        use_complete_discovery: complete_discovery,
        use_cache,
    };
    let result = resolver(session)?
        .import_form(&json_text, options)
        .await
        .context("import failed")?;

    println!("{}", style::success(&format!("Imported '{}'", result.form_title)));
    println!("  Action  : {}", result.action);
    println!("  Form id : {}", result.form_id.as_deref().unwrap_or("unknown"));
    if result.conflicts_resolved {
        println!(
            "  {}",
            style::warn("title was already taken; the form was created under a new title")
        );
    }
    Ok(())
}

pub async fn cmd_conflicts_check(
    session: &Session,
    file: &Path,
    complete_discovery: bool,
) -> Result<()> {
    let json_text = read_definition(file)?;
    let candidate = FormDefinition::parse(&json_text).context("invalid form definition")?;
    let info = resolver(session)?
        .detect_conflicts(&candidate, complete_discovery)
        .await
        .context("conflict check failed")?;

    match &info.conflict_details {
        Some(details) if info.has_conflict => println!(
            "{}",
            style::warn(&format!(
                "'{}' conflicts with form {} ({})",
                candidate.title(),
                details.existing_id,
                info.conflict_type
            ))
        ),
        _ => println!(
            "{}",
            style::success(&format!("No conflict for '{}'", candidate.title()))
        ),
    }
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses_and_validates() {
        let config: AppConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
        config.validate().unwrap();
        assert_eq!(config.cache.probe.max_attempts, 3);
        assert_eq!(config.cache.sync.trailing_probe_window, 5);
        assert_eq!(config.cache.sync.max_gap_span, 1000);
    }
}
