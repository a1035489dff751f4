//! formcache command-line tool.
//!
//! Provides subcommands for generating and validating configuration,
//! inspecting and synchronizing the local form cache, probing form ids,
//! listing and cloning templates, and conflict-aware form imports.

mod commands;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use formcache_core::config::AppConfig;
use formcache_core::remote::{HttpRemote, RemoteCall};
use formcache_core::template::FieldRename;
use formcache_core::FormCache;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// formcache command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "formcache",
    version,
    about = "Cache, sync and import forms against a remote forms API"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "./formcache.toml")]
    config: PathBuf,

    /// Log level (overrides the config file; RUST_LOG overrides both).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./formcache.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Show cache statistics and freshness.
    Status,

    /// Reconcile the cache with the remote API.
    Sync,

    /// Probe individual form ids.
    Probe {
        /// Form ids to probe, in order.
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// List or clone templates.
    Templates {
        #[command(subcommand)]
        action: TemplatesAction,
    },

    /// Import a form definition, renaming it on a title conflict.
    Import {
        /// JSON file with the form definition.
        file: PathBuf,

        /// Check inactive forms too, through the cache.
        #[arg(long)]
        complete_discovery: bool,

        /// Do not scan the cache for existing import titles.
        #[arg(long)]
        no_cache: bool,
    },

    /// Check form definitions for conflicts.
    Conflicts {
        #[command(subcommand)]
        action: ConflictsAction,
    },
}

#[derive(Subcommand, Debug)]
enum TemplatesAction {
    /// List template forms.
    List {
        /// List from the cache (inactive templates included).
        #[arg(long)]
        from_cache: bool,
    },
    /// Clone a template into a new form definition.
    Clone {
        /// Template form id.
        id: i64,

        /// Title of the new form.
        #[arg(long)]
        title: String,

        /// Field label rename, as `old=new`. Repeatable.
        #[arg(long = "rename", value_parser = parse_rename)]
        renames: Vec<FieldRename>,

        /// Create the clone remotely instead of printing it.
        #[arg(long)]
        create: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConflictsAction {
    /// Report whether a form definition's title collides with an existing form.
    Check {
        /// JSON file with the form definition.
        file: PathBuf,

        /// Check inactive forms too, through the cache.
        #[arg(long)]
        complete_discovery: bool,
    },
}

fn parse_rename(s: &str) -> Result<FieldRename, String> {
    match s.split_once('=') {
        Some((old, new)) if !old.trim().is_empty() && !new.trim().is_empty() => {
            Ok(FieldRename::new(old.trim(), new.trim()))
        }
        _ => Err(format!("expected OLD=NEW, got '{s}'")),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(cli: &Cli) {
    let level = cli
        .log_level
        .clone()
        .or_else(|| {
            AppConfig::load_from_file(&cli.config)
                .ok()
                .map(|c| c.logging.level)
        })
        .unwrap_or_else(|| "warn".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => commands::cmd_init(&output),
        Commands::Validate => commands::cmd_validate(&cli.config),
        command => {
            let remote_need = match &command {
                Commands::Status
                | Commands::Templates {
                    action: TemplatesAction::List { from_cache: true },
                } => RemoteNeed::None,
                Commands::Templates {
                    action: TemplatesAction::List { from_cache: false },
                } => RemoteNeed::Optional,
                _ => RemoteNeed::Required,
            };
            let session = Session::open(&cli.config, remote_need)?;
            let result = dispatch(&session, command).await;
            session.close();
            result
        }
    }
}

async fn dispatch(session: &Session, command: Commands) -> Result<()> {
    match command {
        Commands::Status => commands::cmd_status(session.cache()?),
        Commands::Sync => commands::cmd_sync(session.cache()?, session.remote()?).await,
        Commands::Probe { ids } => {
            commands::cmd_probe(session.cache()?, session.remote()?, &ids).await
        }
        Commands::Templates { action } => match action {
            TemplatesAction::List { from_cache } => {
                commands::cmd_templates_list(session, from_cache).await
            }
            TemplatesAction::Clone {
                id,
                title,
                renames,
                create,
            } => commands::cmd_templates_clone(session.remote()?, id, title, renames, create).await,
        },
        Commands::Import {
            file,
            complete_discovery,
            no_cache,
        } => commands::cmd_import(session, &file, complete_discovery, !no_cache).await,
        Commands::Conflicts {
            action:
                ConflictsAction::Check {
                    file,
                    complete_discovery,
                },
        } => commands::cmd_conflicts_check(session, &file, complete_discovery).await,
        Commands::Init { .. } | Commands::Validate => {
            anyhow::bail!("command does not use the cache engine")
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Whether a command talks to the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoteNeed {
    None,
    /// Used when credentials resolve; the command copes without it.
    Optional,
    Required,
}

/// Everything a cache-backed command needs. Always closed by `run`.
pub(crate) struct Session {
    cache: Option<Arc<FormCache>>,
    remote: Option<Arc<dyn RemoteCall>>,
}

impl Session {
    fn open(config_path: &Path, remote_need: RemoteNeed) -> Result<Self> {
        let mut config =
            AppConfig::load_from_file(config_path).context("failed to load configuration file")?;
        let credentials = match remote_need {
            RemoteNeed::None => false,
            RemoteNeed::Required => {
                config
                    .resolve_env_vars()
                    .context("failed to resolve environment variables")?;
                true
            }
            RemoteNeed::Optional => match config.resolve_env_vars() {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "API credentials unavailable, continuing without the remote");
                    false
                }
            },
        };
        config.validate().context("invalid configuration")?;

        let remote: Option<Arc<dyn RemoteCall>> = if credentials {
            Some(Arc::new(
                HttpRemote::new(&config.api).context("failed to create API client")?,
            ))
        } else {
            None
        };

        let cache = if config.cache.enabled {
            let cache =
                FormCache::new(config.cache.clone()).context("invalid cache configuration")?;
            cache.init().context("failed to open form cache")?;
            info!(db = %config.cache.db_path.display(), "form cache opened");
            Some(Arc::new(cache))
        } else {
            warn!("cache disabled in configuration");
            None
        };

        Ok(Self { cache, remote })
    }

    pub(crate) fn cache(&self) -> Result<&FormCache> {
        self.cache
            .as_deref()
            .context("the cache is disabled in the configuration")
    }

    pub(crate) fn cache_arc(&self) -> Option<Arc<FormCache>> {
        self.cache.clone()
    }

    pub(crate) fn remote(&self) -> Result<Arc<dyn RemoteCall>> {
        self.remote
            .clone()
            .context("this command needs API credentials")
    }

    fn close(&self) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.close() {
                warn!(error = %e, "failed to close form cache");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rename() {
        let rename = parse_rename("Date = Visit Date").unwrap();
        assert_eq!(rename.original_label, "Date");
        assert_eq!(rename.new_label, "Visit Date");
        assert!(parse_rename("no-equals").is_err());
        assert!(parse_rename("=x").is_err());
    }

    #[test]
    fn test_cli_parses_clone() {
        let cli = Cli::try_parse_from([
            "formcache",
            "templates",
            "clone",
            "5",
            "--title",
            "Intake",
            "--rename",
            "A=B",
            "--rename",
            "C=D",
        ])
        .unwrap();
        match cli.command {
            Commands::Templates {
                action: TemplatesAction::Clone { id, renames, .. },
            } => {
                assert_eq!(id, 5);
                assert_eq!(renames.len(), 2);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    fn write_config(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("formcache.toml");
        std::fs::write(
            &path,
            r#"
[api]
base_url = "https://forms.example.com/wp-json/gf/v2"
consumer_key_env = "FORMCACHE_TEST_UNSET_KEY"
consumer_secret_env = "FORMCACHE_TEST_UNSET_SECRET"

[cache]
enabled = false
"#,
        )
        .unwrap();
        path
    }

    #[test]
    fn test_optional_remote_opens_without_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir);
        let session = Session::open(&path, RemoteNeed::Optional).unwrap();
        assert!(session.remote().is_err());
        assert!(session.cache().is_err());
        session.close();
    }

    #[test]
    fn test_required_remote_fails_without_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir);
        assert!(Session::open(&path, RemoteNeed::Required).is_err());
    }

    #[tokio::test]
    async fn test_templates_list_without_credentials_reports_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir);
        let session = Session::open(&path, RemoteNeed::Optional).unwrap();
        let err = commands::cmd_templates_list(&session, false)
            .await
            .unwrap_err();
        assert!(
            format!("{err:#}").contains("no form collection available"),
            "{err:#}"
        );
        session.close();
    }

    #[test]
    fn test_cli_verifies() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
