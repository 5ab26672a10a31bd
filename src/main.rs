use clap::{Parser, Subcommand};

use gitmirror::cli::Client;
use gitmirror::config::{Config, GithubArgs};
use gitmirror::credentials::TokenSource;
use gitmirror::daemon;
use gitmirror::github::{GithubApi, MAX_BATCH, fetch_commits};
use gitmirror::types::RepoKey;

#[derive(Parser)]
#[command(
    name = "gitmirror",
    version,
    about = "Keep local mirrors of GitHub repositories fresh for GitOps tooling"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground
    Daemon(Config),

    /// Stop the running daemon
    Stop,

    /// Show daemon status
    Status,

    /// List cached mirrors
    List,

    /// Clone a repository into the cache if it is not there yet
    Warm {
        /// Repository in owner/repo format
        repo: String,
    },

    /// Refresh a repository now and notify subscribers
    Invalidate {
        /// Repository in owner/repo format
        repo: String,
    },

    /// Print staleness events as they happen
    Events,

    /// Show commits and their CI status
    Commits {
        /// Repository in owner/repo format
        repo: String,

        /// Commit SHAs, at most ten
        #[arg(required = true)]
        shas: Vec<String>,

        #[command(flatten)]
        github: GithubArgs,
    },

    /// List repositories the token's installation can access
    Repos {
        #[command(flatten)]
        github: GithubArgs,
    },
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Daemon(config) => cmd_daemon(config),
        Commands::Stop => cmd_stop(),
        Commands::Status => cmd_status(),
        Commands::List => cmd_list(),
        Commands::Warm { repo } => cmd_warm(&repo),
        Commands::Invalidate { repo } => cmd_invalidate(&repo),
        Commands::Events => cmd_events(),
        Commands::Commits { repo, shas, github } => cmd_commits(&repo, &shas, &github),
        Commands::Repos { github } => cmd_repos(&github),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        if e.to_string().contains("not running") {
            eprintln!();
            eprintln!("Hint: Start the daemon with: gitmirror daemon");
        }
        std::process::exit(1);
    }
}

fn parse_repo(repo: &str) -> Result<RepoKey, Box<dyn std::error::Error>> {
    repo.parse()
        .map_err(|e| format!("Invalid repo format: {}", e).into())
}

fn cmd_daemon(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    daemon::start(config)?;
    Ok(())
}

fn cmd_stop() -> Result<(), Box<dyn std::error::Error>> {
    let mut client = Client::connect()?;
    client.stop()?;
    println!("Daemon stopped");
    Ok(())
}

fn cmd_status() -> Result<(), Box<dyn std::error::Error>> {
    let mut client = Client::connect()?;
    let status = client.status()?;

    println!("gitmirror daemon status");
    println!(
        "  Running:     {}",
        if status.running { "yes" } else { "no" }
    );
    println!("  Version:     {} (pid {})", status.version, status.pid);
    println!("  Cache root:  {}", status.cache_root);
    println!("  Mirrors:     {}", status.repo_count);
    println!("  Subscribers: {}", status.subscribers);
    println!("  Uptime:      {}", format_duration(status.uptime_secs));

    Ok(())
}

fn cmd_list() -> Result<(), Box<dyn std::error::Error>> {
    let mut client = Client::connect()?;
    let result = client.list()?;

    if result.repos.is_empty() {
        println!("No repositories cached");
        return Ok(());
    }

    println!("{:<40} PATH", "REPO");
    println!("{}", "-".repeat(80));
    for repo in result.repos {
        println!("{:<40} {}", repo.repo, repo.path);
    }

    Ok(())
}

fn cmd_warm(repo: &str) -> Result<(), Box<dyn std::error::Error>> {
    parse_repo(repo)?;

    let mut client = Client::connect()?;
    let result = client.warm(repo)?;

    println!("{} cached at {}", result.repo, result.path);
    if let Some(head) = result.head {
        println!("  HEAD: {}", short_sha(&head));
    }
    Ok(())
}

fn cmd_invalidate(repo: &str) -> Result<(), Box<dyn std::error::Error>> {
    parse_repo(repo)?;

    let mut client = Client::connect()?;
    client.invalidate(repo)?;

    println!("Refresh of {} queued", repo);
    Ok(())
}

fn cmd_events() -> Result<(), Box<dyn std::error::Error>> {
    let events = Client::connect()?.subscribe()?;
    for event in events {
        let event = event?;
        println!("{} {}", event.event, event.repo);
    }
    Ok(())
}

fn cmd_commits(
    repo: &str,
    shas: &[String],
    github: &GithubArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let key = parse_repo(repo)?;
    let token = github.token_source().token()?;
    let api = GithubApi::new(github.api_url.clone());

    for chunk in shas.chunks(MAX_BATCH) {
        let commits = fetch_commits(&api, &key.owner, &key.repo, &token.secret, chunk)?;
        for commit in commits {
            let subject = commit.message.lines().next().unwrap_or_default();
            println!(
                "{} {:<10} {:<16} {}",
                short_sha(&commit.sha),
                if commit.status.state.is_empty() {
                    "-"
                } else {
                    commit.status.state.as_str()
                },
                commit.author,
                subject
            );
            for status in commit.status.contexts {
                println!("    {:<10} {}", status.state, status.context);
            }
        }
    }
    Ok(())
}

fn cmd_repos(github: &GithubArgs) -> Result<(), Box<dyn std::error::Error>> {
    let token = github.token_source().token()?;
    let api = GithubApi::new(github.api_url.clone());

    for key in api.installation_repos(&token.secret)? {
        println!("{}", key);
    }
    Ok(())
}

fn short_sha(sha: &str) -> &str {
    sha.get(..12).unwrap_or(sha)
}

fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}
