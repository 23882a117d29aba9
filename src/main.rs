//! # hcu: provider inventory sync, tag-derived services and incident watch
//!
//! Usage:
//!   hcu serve                                  # Run both sync workers periodically
//!   hcu sync resources [--provider ID]         # One resource pass, inline
//!   hcu sync notifications [--provider ID]     # One notification pass, inline
//!   hcu service add --name web --all           # Create a service
//!   hcu service tag <ID> web prod              # Set a service's tags
//!   hcu service resources <ID>                 # Resources matching a service
//!   hcu service incidents <ID>                 # Incidents on those resources
//!   hcu provider add --member .. --provider softlayer --user .. --pass ..
//!   hcu plugins                                # Resolvable provider plugins

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hcu_core::HcuConfig;
use hcu_core::types::Service;
use hcu_db::Db;
use hcu_plugins::{PROVIDER_CLASS, PluginRegistry};
use hcu_scheduler::{Scheduler, TokioQueue, Worker};
use hcu_sync::{NewProvider, NotificationWatch, ResourceSync};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "hcu", version, about = "☁️ hcu: provider inventory sync & service watch")]
struct Cli {
    /// Config file (default: $HCU_HOME/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the scheduler with both sync workers; runs until Ctrl-C
    Serve,
    /// Run one sync pass inline
    Sync {
        #[command(subcommand)]
        what: SyncTarget,
    },
    /// Services and their derived members
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },
    /// Provider credentials
    Provider {
        #[command(subcommand)]
        action: ProviderAction,
    },
    /// List resolvable plugins
    Plugins {
        #[arg(long, default_value = PROVIDER_CLASS)]
        class: String,
    },
}

#[derive(Subcommand)]
enum SyncTarget {
    Resources {
        #[arg(long)]
        provider: Option<String>,
    },
    Notifications {
        #[arg(long)]
        provider: Option<String>,
    },
}

#[derive(Subcommand)]
enum ServiceAction {
    Add {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Require every service tag (default: any)
        #[arg(long)]
        all: bool,
    },
    Tag {
        id: Uuid,
        tags: Vec<String>,
    },
    Resources {
        id: Uuid,
    },
    Incidents {
        id: Uuid,
    },
}

#[derive(Subcommand)]
enum ProviderAction {
    Add {
        #[arg(long)]
        member: String,
        #[arg(long)]
        provider: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        pass: String,
    },
}

struct App {
    config: HcuConfig,
    db: Arc<Db>,
    plugins: Arc<PluginRegistry>,
}

impl App {
    fn open(config: HcuConfig) -> Result<Self> {
        let db = Db::open(&config.db_file()).context("opening database")?;
        let plugins = PluginRegistry::new(config.plugin_path());
        Ok(Self {
            config,
            db: Arc::new(db),
            plugins: Arc::new(plugins),
        })
    }

    fn resource_sync(&self) -> ResourceSync {
        ResourceSync::new(self.db.clone(), self.plugins.clone(), &self.config.sync)
    }

    fn notification_watch(&self) -> NotificationWatch {
        NotificationWatch::new(self.db.clone(), self.plugins.clone(), &self.config.sync)
    }

    fn service(&self, id: Uuid) -> Result<Service> {
        Ok(self.db.service(id)?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => HcuConfig::load_from(path)?,
        None => HcuConfig::load()?,
    };
    let app = App::open(config)?;

    match cli.command {
        Command::Serve => serve(&app).await,
        Command::Sync { what } => {
            let outcome = match what {
                SyncTarget::Resources { provider } => {
                    app.resource_sync().sync(provider.as_deref()).await
                }
                SyncTarget::Notifications { provider } => {
                    app.notification_watch().watch(provider.as_deref()).await
                }
            };
            match outcome {
                Ok(report) => {
                    println!("✅ {report}");
                    Ok(())
                }
                Err(e) => {
                    tracing::debug!("sync failed: {e}");
                    eprintln!("could not sync");
                    std::process::exit(1);
                }
            }
        }
        Command::Service { action } => service_command(&app, action),
        Command::Provider {
            action:
                ProviderAction::Add {
                    member,
                    provider,
                    user,
                    pass,
                },
        } => {
            let (queue, mut jobs) = TokioQueue::new();
            let scheduler = Scheduler::new(app.config.scheduler.clone(), Arc::new(queue));
            scheduler.register_workers(vec![Arc::new(app.resource_sync())])?;

            let req = NewProvider {
                member_email: member,
                provider,
                user,
                pass,
            };
            let provider = hcu_sync::register_provider(&app.db, &app.plugins, &scheduler, req).await?;
            println!("✅ Provider {provider} added ({})", provider.id);

            // Run the queued first sync here instead of waiting for `serve`
            if let Some(job) = jobs.recv().await {
                if let Err(e) = scheduler.perform(&job.worker, job.args).await {
                    tracing::debug!("first sync failed: {e}");
                    eprintln!("could not sync");
                }
            }
            Ok(())
        }
        Command::Plugins { class } => {
            let names = app.plugins.list_plugins(&class).await;
            if names.is_empty() {
                println!("No {class} plugins in {}", app.plugins.dir().display());
            }
            for name in names {
                println!("{name}");
            }
            Ok(())
        }
    }
}

async fn serve(app: &App) -> Result<()> {
    let (queue, jobs) = TokioQueue::new();
    let scheduler = Scheduler::new(app.config.scheduler.clone(), Arc::new(queue));
    let workers: Vec<Arc<dyn Worker>> = vec![
        Arc::new(app.resource_sync()),
        Arc::new(app.notification_watch()),
    ];
    scheduler.register_workers(workers)?;
    scheduler.start().await?;

    for w in scheduler.stats()? {
        tracing::info!("  {} [{}] every {}s", w.name, w.state, w.period_secs);
    }

    let dispatcher = tokio::spawn(scheduler.clone().serve(jobs));
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    dispatcher.abort();
    Ok(())
}

fn service_command(app: &App, action: ServiceAction) -> Result<()> {
    match action {
        ServiceAction::Add {
            name,
            description,
            all,
        } => {
            let service = Service {
                id: Uuid::new_v4(),
                member_id: None,
                name,
                description,
                match_all: all,
                created_at: chrono::Utc::now(),
            };
            app.db.insert_service(&service)?;
            println!("{}", service.id);
        }
        ServiceAction::Tag { id, tags } => {
            let report = app.db.set_service_tags(id, &tags)?;
            println!(
                "✅ tags set ({} added, {} removed, {} kept)",
                report.added, report.removed, report.kept
            );
        }
        ServiceAction::Resources { id } => {
            let service = app.service(id)?;
            for r in app.db.tagged_resources(&service)? {
                println!("{}\t{}\t{}\t{}", r.id, r.provider, r.kind, r.name);
            }
        }
        ServiceAction::Incidents { id } => {
            let service = app.service(id)?;
            for i in app.db.service_incidents(&service)? {
                let issued = i
                    .issued_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                let state = if i.is_open { "open" } else { "closed" };
                println!("{issued}\t{state}\t{}\t{}", i.provider, i.title);
            }
        }
    }
    Ok(())
}
