mod archive;
mod collect;
mod enrich;
mod fetch;
mod locations;
mod media;
mod model;
mod page;
mod settings;
mod site;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "gram_archiver", about = "Profile media archiver and site builder")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the profile page and archive new raw posts
    Collect,
    /// Fetch a single post by shortcode and archive it
    Fetch {
        /// Shortcode of the post to archive
        code: String,
    },
    /// Enrich raw posts into normalized records
    Enrich {
        /// Max posts to enrich (default: all pending)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Resolve locations referenced by posts
    Locations {
        /// Remove location records no longer referenced by any post
        #[arg(long)]
        prune: bool,
    },
    /// Download media files for archived posts
    Media {
        /// Max files to download (default: all missing)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Render site data from the archive
    Build {
        /// Output directory for the site data
        #[arg(short, long, default_value = "site/data")]
        output: PathBuf,
    },
    /// Collect, enrich, resolve, download and build in one pass
    Run {
        /// Max posts per network stage
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Output directory for the site data
        #[arg(long, default_value = "site/data")]
        output: PathBuf,
    },
    /// Show archive statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let settings = settings::Settings::load()?;
    let archive = archive::Archive::open(&settings.archive)?;

    let result = match cli.command {
        Commands::Collect => {
            let client = fetch::Client::new(&settings)?;
            let stats = collect::run(&settings, &archive, &client).await?;
            println!("Archived {} new posts ({} in window)", stats.new, stats.seen);
            Ok(())
        }
        Commands::Fetch { code } => {
            let client = fetch::Client::new(&settings)?;
            match collect::fetch_one(&settings, &archive, &client, &code).await? {
                Some(path) => println!("Archived {}", path),
                None => println!("Post already archived"),
            }
            Ok(())
        }
        Commands::Enrich { limit } => {
            let client = fetch::Client::new(&settings)?;
            let stats = enrich::run(&settings, &archive, &client, limit).await?;
            if stats.total == 0 {
                println!("Nothing to enrich. Run 'collect' first or all posts are enriched.");
            } else {
                println!(
                    "Enriched {} posts ({} ok, {} errors).",
                    stats.total, stats.ok, stats.errors
                );
            }
            Ok(())
        }
        Commands::Locations { prune } => {
            let client = fetch::Client::new(&settings)?;
            let stats = locations::run(&settings, &archive, &client, prune).await?;
            println!(
                "{} locations in use, {} newly resolved, {} pruned.",
                stats.used, stats.resolved, stats.pruned
            );
            if stats.unlocated_posts > 0 {
                println!("{} posts have no location.", stats.unlocated_posts);
            }
            Ok(())
        }
        Commands::Media { limit } => {
            let client = fetch::Client::new(&settings)?;
            let stats = media::run(&archive, &client, limit).await?;
            if stats.total == 0 {
                println!("All media present ({} files).", stats.skipped);
            } else {
                println!(
                    "Downloaded {} files ({} ok, {} errors).",
                    stats.total, stats.ok, stats.errors
                );
            }
            Ok(())
        }
        Commands::Build { output } => {
            let counts = site::build(&settings, &archive, &output)?;
            println!(
                "Rendered {} posts, {} locations, {} tags.",
                counts.posts, counts.locations, counts.tags
            );
            Ok(())
        }
        Commands::Run { limit, output } => {
            let client = fetch::Client::new(&settings)?;

            let collected = collect::run(&settings, &archive, &client).await?;
            println!("Archived {} new posts", collected.new);

            let enriched = enrich::run(&settings, &archive, &client, limit).await?;
            println!(
                "Enriched {} posts ({} ok, {} errors)",
                enriched.total, enriched.ok, enriched.errors
            );

            let resolved = locations::run(&settings, &archive, &client, false).await?;
            println!("Resolved {} new locations", resolved.resolved);

            let downloaded = media::run(&archive, &client, limit).await?;
            println!(
                "Downloaded {} media files ({} ok, {} errors)",
                downloaded.total, downloaded.ok, downloaded.errors
            );

            let counts = site::build(&settings, &archive, &output)?;
            println!(
                "Rendered {} posts, {} locations, {} tags.",
                counts.posts, counts.locations, counts.tags
            );
            Ok(())
        }
        Commands::Stats => {
            let s = archive.stats()?;
            println!("Raw:        {}", s.raw);
            println!("Posts:      {}", s.posts);
            println!("Locations:  {}", s.locations);
            println!("Media:      {}", s.media);
            println!("  missing:  {}", s.media_missing);
            println!("Unlocated:  {}", s.unlocated_posts);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
