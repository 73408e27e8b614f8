//! Sprig CLI - view and edit a Sprig link page from the terminal
//!
//! `show` and `watch` render the public page; the editing commands require a
//! session opened with `login` for that username.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use sprig_core::auth::{
    login, logout, AuthToken, SaltedSha256Verifier, SessionStore,
};
use sprig_core::config::StoreConfig;
use sprig_core::editor::{PasswordChange, ProfileEditor};
use sprig_core::models::{LinkId, LinkPatch, SectionId};
use sprig_core::storage::SupabaseImageStorage;
use sprig_core::store::{ProfileStore, SupabaseStore};
use sprig_core::{LiveProfile, ProfileSnapshot};
use thiserror::Error;

#[derive(Parser)]
#[command(name = "sprig")]
#[command(about = "View and edit a Sprig link page from the terminal")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a profile's public page once
    Show {
        /// Page username
        username: String,
    },
    /// Render a profile's public page and re-render on every change
    Watch {
        /// Page username
        username: String,
    },
    /// Open an editor session for a profile
    Login {
        /// Page username
        username: String,
        /// Admin password
        #[arg(long)]
        password: String,
    },
    /// Close the editor session for a profile
    Logout {
        /// Page username
        username: String,
    },
    /// Change the admin password
    SetPassword {
        /// Page username
        username: String,
        /// Current password
        #[arg(long)]
        current: String,
        /// New password
        #[arg(long)]
        new: String,
        /// New password, repeated
        #[arg(long)]
        confirm: String,
    },
    /// Append a new section at the end of the page
    AddSection {
        /// Page username
        username: String,
        /// Section title
        #[arg(long)]
        title: String,
    },
    /// Rename a section
    RenameSection {
        /// Page username
        username: String,
        /// Section id
        section: String,
        /// New title
        #[arg(long)]
        title: String,
    },
    /// Delete a section and all its links
    DeleteSection {
        /// Page username
        username: String,
        /// Section id
        section: String,
    },
    /// Append a new link at the end of a section
    AddLink {
        /// Page username
        username: String,
        /// Section id
        section: String,
        /// Link title
        #[arg(long)]
        title: String,
        /// Link URL (http or https)
        #[arg(long)]
        url: String,
    },
    /// Update a link's title or URL
    EditLink {
        /// Page username
        username: String,
        /// Link id
        link: String,
        /// New title
        #[arg(long)]
        title: Option<String>,
        /// New URL
        #[arg(long)]
        url: Option<String>,
    },
    /// Delete a link
    DeleteLink {
        /// Page username
        username: String,
        /// Link id
        link: String,
    },
    /// Move a section into the slot another section occupies
    MoveSection {
        /// Page username
        username: String,
        /// Id of the section being moved
        moved: String,
        /// Id of the section whose slot it takes
        target: String,
    },
    /// Move a link into the slot another link of the same section occupies
    MoveLink {
        /// Page username
        username: String,
        /// Id of the link being moved
        moved: String,
        /// Id of the link whose slot it takes
        target: String,
    },
    /// Upload an image as the profile image, or as a link icon with --link
    UploadImage {
        /// Page username
        username: String,
        /// Image file to upload
        #[arg(long, value_name = "PATH")]
        file: PathBuf,
        /// Attach to this link instead of the profile
        #[arg(long, value_name = "LINK_ID")]
        link: Option<String>,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] sprig_core::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(
        "Store is not configured. Set SPRIG_SUPABASE_URL and SPRIG_SUPABASE_ANON_KEY to use sprig."
    )]
    StoreNotConfigured,
    #[error("'{0}' is not a valid id")]
    InvalidId(String),
    #[error("No editor session for {0}. Run `sprig login {0} --password ...` first.")]
    NotLoggedIn(String),
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sprig=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let sessions = FileSessionStore::open_default();

    match cli.command {
        Commands::Show { username } => run_show(&username).await,
        Commands::Watch { username } => run_watch(&username).await,
        Commands::Login { username, password } => {
            let (store, _) = open_store()?;
            login(
                store.as_ref(),
                &SaltedSha256Verifier,
                &sessions,
                &username,
                &password,
            )
            .await?;
            println!("Logged in as {username}");
            Ok(())
        }
        Commands::Logout { username } => {
            logout(&sessions, &username)?;
            println!("Logged out {username}");
            Ok(())
        }
        Commands::SetPassword {
            username,
            current,
            new,
            confirm,
        } => {
            let (editor, _) = open_editor(&sessions, &username).await?;
            editor
                .change_password(PasswordChange {
                    current,
                    new_password: new,
                    confirm,
                })
                .await?;
            println!("Password changed");
            Ok(())
        }
        Commands::AddSection { username, title } => {
            let (editor, _) = open_editor(&sessions, &username).await?;
            let section = editor.add_section(&title).await?;
            println!("{}", section.id);
            Ok(())
        }
        Commands::RenameSection {
            username,
            section,
            title,
        } => {
            let (editor, _) = open_editor(&sessions, &username).await?;
            editor
                .rename_section(parse_section_id(&section)?, &title)
                .await?;
            println!("Renamed {section}");
            Ok(())
        }
        Commands::DeleteSection { username, section } => {
            let (editor, _) = open_editor(&sessions, &username).await?;
            editor.delete_section(parse_section_id(&section)?).await?;
            println!("Deleted {section}");
            Ok(())
        }
        Commands::AddLink {
            username,
            section,
            title,
            url,
        } => {
            let (editor, _) = open_editor(&sessions, &username).await?;
            let link = editor
                .add_link(parse_section_id(&section)?, &title, &url)
                .await?;
            println!("{}", link.id);
            Ok(())
        }
        Commands::EditLink {
            username,
            link,
            title,
            url,
        } => {
            let (editor, _) = open_editor(&sessions, &username).await?;
            editor
                .update_link(parse_link_id(&link)?, LinkPatch {
                    title,
                    url,
                    ..Default::default()
                })
                .await?;
            println!("Updated {link}");
            Ok(())
        }
        Commands::DeleteLink { username, link } => {
            let (editor, _) = open_editor(&sessions, &username).await?;
            editor.delete_link(parse_link_id(&link)?).await?;
            println!("Deleted {link}");
            Ok(())
        }
        Commands::MoveSection {
            username,
            moved,
            target,
        } => {
            let (editor, _) = open_editor(&sessions, &username).await?;
            editor
                .reorder_sections(parse_section_id(&moved)?, parse_section_id(&target)?)
                .await?;
            println!("Moved {moved}");
            Ok(())
        }
        Commands::MoveLink {
            username,
            moved,
            target,
        } => {
            let (editor, _) = open_editor(&sessions, &username).await?;
            editor
                .reorder_links(parse_link_id(&moved)?, parse_link_id(&target)?)
                .await?;
            println!("Moved {moved}");
            Ok(())
        }
        Commands::UploadImage {
            username,
            file,
            link,
        } => {
            let (editor, config) = open_editor(&sessions, &username).await?;
            let storage = SupabaseImageStorage::new(&config)?;
            let bytes = tokio::fs::read(&file).await?;
            let file_name = file
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();

            let url = match link {
                Some(link) => {
                    editor
                        .upload_link_icon(&storage, parse_link_id(&link)?, &bytes, &file_name)
                        .await?
                }
                None => {
                    editor
                        .upload_profile_image(&storage, &bytes, &file_name)
                        .await?
                }
            };
            println!("{url}");
            Ok(())
        }
    }
}

fn open_store() -> Result<(Arc<SupabaseStore>, StoreConfig), CliError> {
    let config = StoreConfig::from_env()?.ok_or(CliError::StoreNotConfigured)?;
    tracing::debug!("Using store at {}", config.url);
    let store = Arc::new(SupabaseStore::new(&config)?);
    Ok((store, config))
}

async fn open_editor(
    sessions: &FileSessionStore,
    username: &str,
) -> Result<(ProfileEditor, StoreConfig), CliError> {
    let token = sessions
        .load(username)?
        .ok_or_else(|| CliError::NotLoggedIn(username.to_string()))?;

    let (store, config) = open_store()?;
    let store: Arc<dyn ProfileStore> = store;
    let live = Arc::new(LiveProfile::activate(Arc::clone(&store), username).await?);
    let editor = ProfileEditor::new(store, live, Arc::new(SaltedSha256Verifier), token)?;
    Ok((editor, config))
}

async fn run_show(username: &str) -> Result<(), CliError> {
    let (store, _) = open_store()?;
    let store: Arc<dyn ProfileStore> = store;
    let live = LiveProfile::activate(store, username).await?;

    for line in render_snapshot(&live.snapshot()) {
        println!("{line}");
    }
    live.close();
    Ok(())
}

async fn run_watch(username: &str) -> Result<(), CliError> {
    let (store, _) = open_store()?;
    let store: Arc<dyn ProfileStore> = store;
    let live = LiveProfile::activate(store, username).await?;
    let mut receiver = live.subscribe();

    for line in render_snapshot(&receiver.borrow().clone()) {
        println!("{line}");
    }
    println!("-- watching; ctrl-c to stop --");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = receiver.changed() => {
                if changed.is_err() {
                    break;
                }
                println!();
                for line in render_snapshot(&receiver.borrow().clone()) {
                    println!("{line}");
                }
            }
        }
    }
    live.close();
    Ok(())
}

fn render_snapshot(snapshot: &ProfileSnapshot) -> Vec<String> {
    let mut lines = Vec::new();
    lines.push(format!("@{}", snapshot.profile.username));
    if let Some(bio) = &snapshot.profile.bio {
        lines.push(bio.clone());
    }
    if let Some(image) = &snapshot.profile.profile_image {
        lines.push(format!("[image] {image}"));
    }

    for section in &snapshot.sections {
        lines.push(String::new());
        lines.push(format!("== {} ==", section.title));
        for link in snapshot.links_for(section.id) {
            let icon = link
                .icon_url
                .as_ref()
                .map(|icon| format!("  [icon {icon}]"))
                .unwrap_or_default();
            lines.push(format!("  {}  {}{icon}", link.title, link.url));
        }
    }
    lines
}

fn parse_section_id(raw: &str) -> Result<SectionId, CliError> {
    raw.trim()
        .parse()
        .map_err(|_| CliError::InvalidId(raw.to_string()))
}

fn parse_link_id(raw: &str) -> Result<LinkId, CliError> {
    raw.trim()
        .parse()
        .map_err(|_| CliError::InvalidId(raw.to_string()))
}

/// Session tokens persisted as a JSON map under the user data dir.
struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    fn open_default() -> Self {
        Self {
            path: default_sessions_path(),
        }
    }

    #[cfg(test)]
    fn open_at(path: PathBuf) -> Self {
        Self { path }
    }

    fn read_all(&self) -> sprig_core::Result<HashMap<String, AuthToken>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|error| session_file_error(&self.path, &error.to_string())),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(error) => Err(session_file_error(&self.path, &error.to_string())),
        }
    }

    fn write_all(&self, tokens: &HashMap<String, AuthToken>) -> sprig_core::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|error| session_file_error(&self.path, &error.to_string()))?;
        }
        let rendered = serde_json::to_string_pretty(tokens)
            .map_err(|error| session_file_error(&self.path, &error.to_string()))?;
        std::fs::write(&self.path, rendered)
            .map_err(|error| session_file_error(&self.path, &error.to_string()))
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self, username: &str) -> sprig_core::Result<Option<AuthToken>> {
        Ok(self.read_all()?.remove(username))
    }

    fn save(&self, token: &AuthToken) -> sprig_core::Result<()> {
        let mut tokens = self.read_all()?;
        tokens.insert(token.username.clone(), token.clone());
        self.write_all(&tokens)
    }

    fn clear(&self, username: &str) -> sprig_core::Result<()> {
        let mut tokens = self.read_all()?;
        if tokens.remove(username).is_some() {
            self.write_all(&tokens)?;
        }
        Ok(())
    }
}

fn session_file_error(path: &Path, message: &str) -> sprig_core::Error {
    sprig_core::Error::Storage(format!("session file {}: {message}", path.display()))
}

fn default_sessions_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sprig")
        .join("sessions.json")
}
