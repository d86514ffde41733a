use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use lib::chat::ChatClient;
use lib::config;
use lib::identity::{DeviceIdentity, HttpIdentityProvider};
use lib::store::{ChatId, ClientStore};

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Parley CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and default files (config, device identity).
    Init {
        /// Config file path (default: PARLEY_CONFIG_PATH or ~/.parley/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Log in and print the current principal and username.
    Whoami {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Change the display name stored on the backend.
    RenameUser {
        /// New display name
        name: String,

        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// List chats (active by default).
    Chats {
        /// List archived chats instead
        #[arg(long)]
        archived: bool,

        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Create a new chat and make it current.
    New {
        /// Chat name
        name: String,

        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Chat with the AI (interactive when no message is given).
    Chat {
        /// One message to send; omit for an interactive loop
        message: Option<String>,

        /// Existing chat id to continue (hex or UUID form)
        #[arg(long, value_name = "ID")]
        chat: Option<String>,

        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Rename a chat.
    Rename {
        /// Chat id (hex or UUID form)
        id: String,
        /// New chat name
        name: String,

        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Delete a chat.
    Delete {
        /// Chat id (hex or UUID form)
        id: String,

        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Archive a chat (or restore it with --restore).
    Archive {
        /// Chat id (hex or UUID form)
        id: String,

        /// Move the chat back to the active list
        #[arg(long)]
        restore: bool,

        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// List the image gallery.
    Images {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Ask the AI to draw into the current or given chat.
    Draw {
        /// What to draw
        query: String,

        /// Existing chat id to draw into (hex or UUID form)
        #[arg(long, value_name = "ID")]
        chat: Option<String>,

        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Print three starter prompt suggestions.
    Suggest,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("parley {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config),
        Some(Commands::Whoami { config }) => run_whoami(config).await,
        Some(Commands::RenameUser { name, config }) => run_rename_user(config, name).await,
        Some(Commands::Chats { archived, config }) => run_chats(config, archived).await,
        Some(Commands::New { name, config }) => run_new(config, name).await,
        Some(Commands::Chat {
            message,
            chat,
            config,
        }) => run_chat(config, chat, message).await,
        Some(Commands::Rename { id, name, config }) => run_rename(config, id, name).await,
        Some(Commands::Delete { id, config }) => run_delete(config, id).await,
        Some(Commands::Archive {
            id,
            restore,
            config,
        }) => run_archive(config, id, !restore).await,
        Some(Commands::Images { config }) => run_images(config).await,
        Some(Commands::Draw {
            query,
            chat,
            config,
        }) => run_draw(config, chat, query).await,
        Some(Commands::Suggest) => {
            for prompt in lib::prompts::random_user_messages() {
                println!("{}", prompt);
            }
            Ok(())
        }
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };

    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

/// Load config, run the login flow, and hand back a connected client.
async fn connect(config_path: Option<PathBuf>) -> anyhow::Result<ChatClient> {
    let (config, path) = config::load_config(config_path)?;
    lib::init::require_initialized(&path, &config)?;
    let device_path = config::resolve_device_path(&config, &path);
    let device = DeviceIdentity::load_or_generate(&device_path)?;

    let provider = Arc::new(HttpIdentityProvider::new(Some(config::resolve_identity_url(
        &config,
    ))));
    let store = Arc::new(ClientStore::new());
    let client = ChatClient::from_config(&config, store, provider);

    client
        .login(&device)
        .await
        .map_err(|e| anyhow::anyhow!("login failed: {}", e))?;
    Ok(client)
}

fn parse_chat_id(id: &str) -> anyhow::Result<ChatId> {
    ChatId::parse_uuid(id).map_err(|e| anyhow::anyhow!("invalid chat id '{}': {}", id, e))
}

async fn run_whoami(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let client = connect(config_path).await?;
    let session = client.store().session().await;
    let principal = session
        .principal
        .map(|p| p.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!("principal: {}", principal);
    println!("username:  {}", session.username);
    Ok(())
}

async fn run_rename_user(config_path: Option<PathBuf>, name: String) -> anyhow::Result<()> {
    let client = connect(config_path).await?;
    client
        .rename_user(&name)
        .await
        .map_err(|e| anyhow::anyhow!("rename failed: {}", e))?;
    println!("username set to {}", name);
    Ok(())
}

async fn run_chats(config_path: Option<PathBuf>, archived: bool) -> anyhow::Result<()> {
    let client = connect(config_path).await?;
    let chats = if archived {
        client
            .load_archives()
            .await
            .map_err(|e| anyhow::anyhow!("loading archives failed: {}", e))?;
        client.store().archived().await
    } else {
        client.store().chats().await
    };
    if chats.is_empty() {
        println!("(no chats)");
        return Ok(());
    }
    for chat in chats {
        println!("{}  {}  ({} messages)", chat.id, chat.name, chat.msg_len);
    }
    Ok(())
}

async fn run_new(config_path: Option<PathBuf>, name: String) -> anyhow::Result<()> {
    let client = connect(config_path).await?;
    let id = client
        .create(&name)
        .await
        .map_err(|e| anyhow::anyhow!("creating chat failed: {}", e))?;
    println!("{}", id);
    Ok(())
}

async fn run_rename(config_path: Option<PathBuf>, id: String, name: String) -> anyhow::Result<()> {
    let client = connect(config_path).await?;
    let id = parse_chat_id(&id)?;
    client
        .rename(id, &name)
        .await
        .map_err(|e| anyhow::anyhow!("rename failed: {}", e))?;
    Ok(())
}

async fn run_delete(config_path: Option<PathBuf>, id: String) -> anyhow::Result<()> {
    let client = connect(config_path).await?;
    let id = parse_chat_id(&id)?;
    client
        .delete(id)
        .await
        .map_err(|e| anyhow::anyhow!("delete failed: {}", e))?;
    Ok(())
}

async fn run_archive(
    config_path: Option<PathBuf>,
    id: String,
    archived: bool,
) -> anyhow::Result<()> {
    let client = connect(config_path).await?;
    let id = parse_chat_id(&id)?;
    client
        .archive(id, archived)
        .await
        .map_err(|e| anyhow::anyhow!("archive failed: {}", e))?;
    Ok(())
}

async fn run_images(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let client = connect(config_path).await?;
    client
        .load_images()
        .await
        .map_err(|e| anyhow::anyhow!("loading images failed: {}", e))?;
    let images = client.store().images().await;
    if images.is_empty() {
        println!("(no images)");
        return Ok(());
    }
    for record in images {
        println!("--- {} ---", record.etc.timestamp_ms);
        println!("{}", record.image);
    }
    Ok(())
}

async fn run_draw(
    config_path: Option<PathBuf>,
    chat: Option<String>,
    query: String,
) -> anyhow::Result<()> {
    let client = connect(config_path).await?;
    if let Some(id) = chat {
        let id = parse_chat_id(&id)?;
        client
            .open(id)
            .await
            .map_err(|e| anyhow::anyhow!("opening chat failed: {}", e))?;
    }
    let image = client
        .draw(&query, "image")
        .await
        .map_err(|e| anyhow::anyhow!("draw failed: {}", e))?;
    println!("{}", image);
    Ok(())
}

async fn run_chat(
    config_path: Option<PathBuf>,
    chat: Option<String>,
    message: Option<String>,
) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let client = connect(config_path).await?;
    if let Some(id) = chat {
        let id = parse_chat_id(&id)?;
        client
            .open(id)
            .await
            .map_err(|e| anyhow::anyhow!("opening chat failed: {}", e))?;
    }

    if let Some(message) = message {
        let reply = send_one(&client, &message).await?;
        println!("{}", reply);
        return Ok(());
    }

    println!("Try one of:");
    for prompt in lib::prompts::random_user_messages() {
        println!("  {}", prompt);
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }

        match send_one(&client, input).await {
            Ok(reply) => println!("< {}", reply.trim()),
            Err(e) => eprintln!("chat error: {:#}", e),
        }
    }

    if let Err(e) = client.logout().await {
        log::warn!("logout failed: {}", e);
    }
    Ok(())
}

/// One rate-limited send turn.
async fn send_one(client: &ChatClient, message: &str) -> anyhow::Result<String> {
    let allowed = client
        .try_prompt()
        .await
        .map_err(|e| anyhow::anyhow!("rate-limit check failed: {}", e))?;
    if !allowed {
        anyhow::bail!("prompt limit reached, try again later");
    }
    client
        .chat(message, "assistant")
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))
}
