use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use pulsewatch_service::database::SiteStore;
use pulsewatch_service::database::models::{Order, OrderBy, Site, SiteFilter};
use pulsewatch_service::monitoring::{ManualOutcome, RunOutcome};
use pulsewatch_service::pool::open_pool;
use pulsewatch_service::{Config, Orchestrator};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "PULSEWATCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the effective configuration and exit
    Config,
    /// Run the scheduler until Ctrl-C
    Run,
    /// Run one scheduled batch now
    Check,
    /// Check every site regardless of when it was last checked
    CheckAll,
    /// Check a single site now
    CheckSite { id: i64 },
    /// Start monitoring a URL
    Add {
        url: String,
        /// Alert address for this site; the admin address is used otherwise
        #[arg(short, long)]
        email: Option<String>,
    },
    /// List monitored sites
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long, value_enum, default_value_t = OrderBy::CreatedAt)]
        order_by: OrderBy,
        #[arg(long, value_enum, default_value_t = Order::Desc)]
        order: Order,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Stop monitoring a site
    Delete { id: i64 },
    /// Show aggregate counters
    Stats,
    /// Show scheduler and last run state
    Status,
    /// Show or change the stored settings
    Settings {
        /// Webhook URL; pass an empty string to disable
        #[arg(long)]
        webhook_url: Option<String>,
        /// Minutes between checks of one site
        #[arg(long)]
        interval: Option<f64>,
        /// Hours between repeated SSL warnings
        #[arg(long)]
        cooldown: Option<u32>,
    },
    /// Send a test notification
    TestWebhook {
        /// Defaults to the stored webhook URL
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_config(cli.config.as_deref())?;
    logger::init_tracing_with(&config.logging.level);

    let command = match cli.command {
        Command::Config => {
            print!("{config}");
            return Ok(());
        }
        command => command,
    };

    let pool = open_pool(&config.database.path).await?;
    let orchestrator = Orchestrator::new(config, pool).await?;

    match command {
        Command::Config => {}
        Command::Run => orchestrator.run().await?,
        Command::Check => match orchestrator.runner().run_checks().await? {
            RunOutcome::Skipped => println!("A check run is already in progress"),
            RunOutcome::Completed(run) => {
                println!("Checked: {}, Failed: {}, Duration: {}s", run.checked, run.failed, run.duration)
            }
        },
        Command::CheckAll => match orchestrator.runner().manual_check_all().await? {
            ManualOutcome::Busy => println!("A check run is already in progress, try again shortly"),
            ManualOutcome::Finished(summary) => println!("{}", summary.message),
        },
        Command::CheckSite { id } => {
            let check = orchestrator.runner().check_site(id).await?;
            print_site(&check.site);
            if let Some(message) = check.result.error_message {
                println!("      {message}");
            }
        }
        Command::Add { url, email } => {
            let site = orchestrator.add_site(&url, email.as_deref()).await?;
            println!("Added site {} ({})", site.id, site.url);
        }
        Command::List { status, order_by, order, limit } => {
            let filter = SiteFilter { order_by, order, limit, status };
            for site in orchestrator.store().get_sites(&filter).await? {
                print_site(&site);
            }
        }
        Command::Delete { id } => {
            if !orchestrator.store().delete_site(id).await? {
                bail!("Site {id} not found");
            }
            println!("Deleted site {id}");
        }
        Command::Stats => {
            let stats = orchestrator.store().get_stats().await?;
            println!(
                "Total: {}  Up: {}  Down: {}  Error: {}  Unknown: {}  SSL expiring soon: {}",
                stats.total, stats.up, stats.down, stats.error, stats.unknown, stats.ssl_expiring_soon
            );
        }
        Command::Status => {
            let status = orchestrator.status().await?;
            match status.next_run {
                Some(next) => println!("Next check: {}", next.format("%Y-%m-%d %H:%M:%S UTC")),
                None => println!("Next check: Not scheduled"),
            }
            println!("Running: {}", if status.is_running { "yes" } else { "no" });
            println!("Check interval: {} min", status.check_interval);
            if let Some(run) = status.last_run {
                println!(
                    "Last run: {} ({} checked, {} failed)",
                    run.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
                    run.checked,
                    run.failed
                );
            }
        }
        Command::Settings { webhook_url, interval, cooldown } => {
            let mut settings = orchestrator.settings().await?;
            if webhook_url.is_some() || interval.is_some() || cooldown.is_some() {
                if let Some(url) = webhook_url {
                    settings.webhook_url = Some(url);
                }
                settings.check_interval = interval.unwrap_or(settings.check_interval);
                settings.notification_cooldown = cooldown.unwrap_or(settings.notification_cooldown);
                settings = orchestrator.save_settings(&settings).await?;
            }
            println!("Webhook URL: {}", settings.webhook_url().unwrap_or("(none)"));
            println!("Check interval: {} min", settings.check_interval);
            println!("Notification cooldown: {} h", settings.notification_cooldown);
        }
        Command::TestWebhook { url } => {
            orchestrator.test_webhook(url.as_deref(), "cli").await?;
            println!("Test notification sent");
        }
    }

    Ok(())
}

fn print_site(site: &Site) {
    println!(
        "#{:<4} {:<40} {:<10} {:>9} uptime {:>6.2}%  ssl {}",
        site.id,
        site.url,
        site.status.as_ref().map(ToString::to_string).unwrap_or_else(|| "PENDING".into()),
        site.response_time.map(|ms| format!("{ms:.0}ms")).unwrap_or_else(|| "-".into()),
        site.uptime(),
        site.ssl_health(),
    );
}
