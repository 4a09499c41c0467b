//! Command-line utility for inspecting and feeding a mailroom spool
//!
//! Works directly against a file spool, so it can be used whether or not
//! the mailroom service is running. Injected mails are picked up on the
//! service's next scan.

use std::{
    io::{self, Read, Write},
    path::{Path, PathBuf},
    time::SystemTime,
};

use clap::{Parser, Subcommand};
use mailroom_common::{Mail, MailAddress, Message, address, state};
use mailroom_spool::{BackingStore, FileBackingStore, SpooledMailId};

/// Command-line utility for the mailroom spool
#[derive(Parser, Debug)]
#[command(name = "mailroomctl")]
#[command(about = "Inspect and feed the mailroom spool", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the spool directory
    #[arg(short, long, default_value = "/var/spool/mailroom")]
    spool_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Spool a message for processing
    Inject {
        /// Envelope sender; omit for a null reverse path
        #[arg(short, long)]
        from: Option<String>,

        /// Envelope recipients, comma separated
        #[arg(short, long, required = true)]
        to: String,

        /// State the mail enters the pipeline at
        #[arg(long, default_value = state::ROOT)]
        state: String,

        /// File holding the RFC 5322 message; read from stdin when omitted
        message: Option<PathBuf>,
    },
    /// List spooled mails
    List,
    /// Show a spooled mail
    Show {
        /// Spool id to show
        id: String,

        /// Print the message itself as well
        #[arg(long)]
        body: bool,
    },
    /// Remove a mail from the spool
    Delete {
        /// Spool id to delete
        id: String,

        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Inject {
            from,
            to,
            state,
            message,
        } => {
            cmd_inject(
                &cli.spool_path,
                from.as_deref(),
                &to,
                state,
                message.as_deref(),
            )
            .await?;
        }
        Commands::List => cmd_list(&cli.spool_path).await?,
        Commands::Show { id, body } => cmd_show(&cli.spool_path, &id, body).await?,
        Commands::Delete { id, yes } => cmd_delete(&cli.spool_path, &id, yes).await?,
    }

    Ok(())
}

fn open_spool(spool_path: &Path) -> anyhow::Result<FileBackingStore> {
    Ok(FileBackingStore::builder()
        .path(spool_path.to_path_buf())
        .build()?)
}

fn parse_id(id: &str) -> anyhow::Result<SpooledMailId> {
    SpooledMailId::parse(id).ok_or_else(|| anyhow::anyhow!("Invalid spool id: {id}"))
}

async fn cmd_inject(
    spool_path: &Path,
    from: Option<&str>,
    to: &str,
    state: String,
    message: Option<&Path>,
) -> anyhow::Result<()> {
    let sender = from.map(MailAddress::parse_reverse_path).transpose()?.flatten();
    let recipients = address::parse_list(to)?;
    if recipients.is_empty() {
        anyhow::bail!("At least one recipient is required");
    }

    let data = match message {
        Some(path) => tokio::fs::read(path).await?,
        None => {
            let mut data = Vec::new();
            io::stdin().read_to_end(&mut data)?;
            data
        }
    };

    let millis = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();

    let mail = Mail::builder(format!("mailroomctl-{millis}"))
        .sender(sender)
        .recipients(recipients)
        .state(state)
        .message(Message::from(data))
        .build();

    let spool = open_spool(spool_path)?;
    spool.init()?;
    let id = spool.write(&mail).await?;

    println!("Spooled {} as {id}", mail.name());

    Ok(())
}

async fn cmd_list(spool_path: &Path) -> anyhow::Result<()> {
    let spool = open_spool(spool_path)?;
    let ids = spool.list().await?;

    println!(
        "{:<28} {:<16} {:<8} {:>6} {:>10}",
        "SPOOL ID", "STATE", "AGE", "RCPTS", "SIZE"
    );
    println!("{}", "-".repeat(72));

    for id in &ids {
        match spool.read(id).await {
            Ok(mail) => println!(
                "{:<28} {:<16} {:<8} {:>6} {:>10}",
                id.to_string(),
                mail.state(),
                format_age(id.timestamp_ms()),
                mail.recipients().len(),
                mail.message_size()
            ),
            Err(e) => println!("{:<28} unreadable: {e}", id.to_string()),
        }
    }

    println!("\nTotal: {} mail(s)", ids.len());

    Ok(())
}

async fn cmd_show(spool_path: &Path, id: &str, body: bool) -> anyhow::Result<()> {
    let id = parse_id(id)?;
    let spool = open_spool(spool_path)?;
    let mail = spool.read(&id).await?;

    println!("Spool ID: {id}");
    println!("Name: {}", mail.name());
    println!("State: {}", mail.state());
    println!("Age: {}", format_age(id.timestamp_ms()));
    println!();

    println!("Envelope:");
    match mail.sender() {
        Some(sender) => println!("  From: {sender}"),
        None => println!("  From: <>"),
    }
    println!("  To: {}", mail.recipients().len());
    for recipient in mail.recipients() {
        println!("    - {recipient}");
    }
    println!();

    println!("Remote: {} ({})", mail.remote_host(), mail.remote_addr());
    if let Some(error) = mail.error_message() {
        println!("Last error: {error}");
    }

    let mut names = mail.attribute_names().collect::<Vec<_>>();
    if !names.is_empty() {
        names.sort_unstable();
        println!();
        println!("Attributes:");
        for name in names {
            if let Some(value) = mail.attribute(name) {
                println!("  {name} = {value}");
            }
        }
    }

    println!();
    println!("Message: {} bytes", mail.message_size());
    if body && let Some(message) = mail.message() {
        println!();
        io::stdout().write_all(message.as_bytes())?;
    }

    Ok(())
}

async fn cmd_delete(spool_path: &Path, id: &str, skip_confirm: bool) -> anyhow::Result<()> {
    let id = parse_id(id)?;

    if !skip_confirm {
        print!("Delete mail {id}? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !matches!(input.trim().to_lowercase().as_str(), "y" | "yes") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let spool = open_spool(spool_path)?;
    spool.delete(&id).await?;

    println!("Mail {id} deleted");

    Ok(())
}

/// Format age (time since timestamp) as human-readable
fn format_age(timestamp_ms: u64) -> String {
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();

    let age_secs = now.saturating_sub(u128::from(timestamp_ms)) / 1000;

    match age_secs {
        0..60 => format!("{age_secs}s"),
        60..3600 => format!("{}m", age_secs / 60),
        3600..86400 => format!("{}h", age_secs / 3600),
        _ => format!("{}d", age_secs / 86400),
    }
}
