//! Widget Viewer CLI - a minimal viewer host for poking at a provider.
//!
//! This is the main binary entry point. See the `widget_viewer` library
//! for the core functionality.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use widget_viewer::{
    Completion, Config, DeleteType, Event, Fault, Generation, SizeType, UnixTransport, Viewer, ViewerOption,
    WidgetHandle,
};

#[derive(Parser)]
#[command(name = "widget-viewer")]
#[command(about = "Host widget instances rendered by a provider daemon", long_about = None)]
struct Cli {
    /// Provider socket path (overrides config)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Wire naming generation: "livebox" or "widget"
    #[arg(long, global = true)]
    generation: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add one widget instance and follow its events
    Add {
        /// Widget package name
        pkgname: String,
        /// Content string handed to the widget
        #[arg(long)]
        content: Option<String>,
        /// Cluster name
        #[arg(long)]
        cluster: Option<String>,
        /// Category name
        #[arg(long)]
        category: Option<String>,
        /// Update period in seconds (negative lets the provider decide)
        #[arg(long, default_value_t = -1.0, allow_negative_numbers = true)]
        period: f64,
        /// Size class, e.g. 1x1, 2x2, 4x4, easy3x1, full
        #[arg(long, default_value = "1x1")]
        size: String,
        /// Share an identical instance already rendered for this viewer
        #[arg(long)]
        shared: bool,
        /// Delete the instance permanently on exit
        #[arg(long)]
        delete_on_exit: bool,
    },
    /// Follow instances the provider announces
    Watch,
    /// Subscribe to a cluster/category and follow its instances
    Groups {
        /// Cluster name
        cluster: String,
        /// Category name
        category: String,
        /// Ask the provider to refresh the group right away
        #[arg(long)]
        refresh: bool,
    },
    /// Print the effective configuration
    Config,
}

fn parse_size(s: &str) -> Result<SizeType> {
    let size = match s.to_ascii_lowercase().as_str() {
        "1x1" => SizeType::S1x1,
        "2x1" => SizeType::S2x1,
        "2x2" => SizeType::S2x2,
        "4x1" => SizeType::S4x1,
        "4x2" => SizeType::S4x2,
        "4x3" => SizeType::S4x3,
        "4x4" => SizeType::S4x4,
        "4x5" => SizeType::S4x5,
        "4x6" => SizeType::S4x6,
        "easy1x1" => SizeType::Easy1x1,
        "easy3x1" => SizeType::Easy3x1,
        "easy3x3" => SizeType::Easy3x3,
        "full" => SizeType::Full,
        other => bail!("unknown size class '{}'", other),
    };
    Ok(size)
}

fn describe(viewer: &Viewer, h: WidgetHandle) -> String {
    let pkgname = viewer.pkgname(h).unwrap_or("?");
    let id = viewer.id(h).unwrap_or("(pending)");
    format!("{} {}", pkgname, id)
}

/// Print every instance event and session fault.
fn install_printers(viewer: &mut Viewer) {
    viewer.add_event_handler(|v, h, event| match event {
        Event::Created => {
            let (w, h_px) = v.size(h).unwrap_or_default();
            println!("created  {} ({}x{})", describe(v, h), w, h_px);
        }
        Event::Deleted => println!("deleted  {}", describe(v, h)),
        Event::Updated(surface) => {
            let title = v.title(h).unwrap_or_default();
            println!("updated  {} {:?} '{}'", describe(v, h), surface, title);
        }
        other => println!("event    {} {:?}", describe(v, h), other),
    });
    viewer.add_fault_handler(|_, fault| match fault {
        Fault::ProviderDisconnected => eprintln!("provider disconnected, waiting to reconnect"),
        Fault::HandshakeRejected(e) => eprintln!("provider refused this viewer: {}", e),
        Fault::Deactivated { pkgname, file, func } => {
            eprintln!("package {} deactivated ({} {})", pkgname, file, func);
        }
    });
}

/// Tick the viewer at its drain interval until Ctrl-C.
async fn drive(viewer: &mut Viewer) -> Result<()> {
    let mut interval = tokio::time::interval(viewer.drain_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = interval.tick() => viewer.tick(),
            result = &mut ctrl_c => {
                result?;
                log::info!("[Cli] Interrupted");
                return Ok(());
            }
        }
    }
}

/// Give queued commands a chance to go out before shutting down.
fn flush(viewer: &mut Viewer) {
    for _ in 0..50 {
        if viewer.queued_commands().is_empty() && viewer.pending_replies() == 0 {
            break;
        }
        viewer.tick();
        std::thread::sleep(viewer.drain_interval());
    }
}

async fn run(config: Config, command: Commands) -> Result<()> {
    let transport = UnixTransport::new(&config.socket_path);
    let mut viewer = Viewer::new(config, Box::new(transport));
    install_printers(&mut viewer);
    viewer.init()?;

    match command {
        Commands::Add {
            pkgname,
            content,
            cluster,
            category,
            period,
            size,
            shared,
            delete_on_exit,
        } => {
            let size_type = parse_size(&size)?;
            if shared {
                viewer.set_option(ViewerOption::SharedContent, true);
            }
            let on_added: Completion =
                Box::new(|v: &mut Viewer, h: WidgetHandle, result: widget_viewer::Result<i32>| match result {
                    Ok(_) => println!("added    {}", describe(v, h)),
                    Err(e) => eprintln!("add failed: {}", e),
                });
            let h = viewer.add(
                &pkgname,
                content.as_deref(),
                cluster.as_deref(),
                category.as_deref(),
                period,
                size_type,
                Some(on_added),
            )?;
            drive(&mut viewer).await?;

            if delete_on_exit && viewer.is_valid(h) {
                viewer.delete(h, DeleteType::Permanently, None)?;
                flush(&mut viewer);
            }
        }
        Commands::Watch => drive(&mut viewer).await?,
        Commands::Groups {
            cluster,
            category,
            refresh,
        } => {
            viewer.subscribe_group(&cluster, &category)?;
            if refresh {
                viewer.refresh_group(&cluster, &category, false)?;
            }
            drive(&mut viewer).await?;
            viewer.unsubscribe_group(&cluster, &category)?;
            flush(&mut viewer);
        }
        // Printed by main without a session.
        Commands::Config => {}
    }

    viewer.fini();
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(socket) = cli.socket {
        config.socket_path = socket;
    }
    if let Some(name) = cli.generation {
        config.generation = name
            .parse::<Generation>()
            .map_err(|()| anyhow!("unknown generation '{}'", name))?;
    }

    if let Commands::Config = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(config, cli.command))
}
