//! CLI entry point for the shelftalk client.
//!
//! This binary provides the `shelftalk` command: log in and out, browse the
//! book catalog and discussion threads, and exercise the mutation surface
//! (create, like, comment). It is a thin demonstration shell - all state
//! and caching behavior lives in `shelftalk-client`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use shelftalk_client::{
    ApiClient, BookStore, ListFilters, ReqwestBackend, SessionManager, SignUpForm, ThreadDraft,
    ThreadStore,
};
use shelftalk_store::{Database, Persistence, SqliteStore};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// shelftalk - a client for the shelftalk book-review platform.
#[derive(Parser)]
#[command(
    name = "shelftalk",
    version,
    about = "Browse books, discuss them, get recommendations"
)]
struct Cli {
    /// Base URL of the shelftalk API.
    #[arg(
        long,
        env = "SHELFTALK_API_URL",
        default_value = "http://127.0.0.1:8000/api"
    )]
    api_url: String,

    /// Directory holding the local state database.
    #[arg(long, env = "SHELFTALK_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and persist the session.
    Login {
        username: String,
        #[arg(long)]
        password: String,
    },

    /// Register a new account (logs in on success).
    Signup {
        username: String,
        email: String,
        #[arg(long)]
        password: String,
    },

    /// End the session.
    Logout,

    /// Show the current user.
    Whoami,

    /// List the category taxonomy.
    Categories,

    /// Book catalog commands.
    Books {
        #[command(subcommand)]
        command: BooksCommand,
    },

    /// Discussion thread commands.
    Threads {
        #[command(subcommand)]
        command: ThreadsCommand,
    },
}

#[derive(Subcommand)]
enum BooksCommand {
    /// List books, optionally filtered.
    List {
        #[arg(long)]
        q: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        ordering: Option<String>,
    },
    /// Show one book.
    Show { id: i64 },
    /// MBTI-based recommendations.
    Mbti { mbti: String },
    /// Personalized recommendations (requires login).
    Recommend {
        #[arg(long, default_value = "likes")]
        kind: String,
    },
}

#[derive(Subcommand)]
enum ThreadsCommand {
    /// List threads, optionally filtered.
    List {
        #[arg(long)]
        q: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        ordering: Option<String>,
    },
    /// Show one thread with its comments.
    Show { id: i64 },
    /// Create a thread about a book.
    Create {
        #[arg(long)]
        book: i64,
        #[arg(long)]
        title: String,
        #[arg(long)]
        content: String,
    },
    /// Toggle a like on a thread.
    Like { id: i64 },
    /// Comment on a thread.
    Comment {
        id: i64,
        #[arg(long)]
        content: String,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing("warn");

    std::fs::create_dir_all(&cli.data_dir).context("failed to create data directory")?;
    let db_path = cli.data_dir.join("shelftalk.db");
    let db = Database::open_and_migrate(db_path)
        .await
        .context("failed to open state database")?;
    let persist: Arc<dyn Persistence> = Arc::new(SqliteStore::new(db));

    let api = ApiClient::new(Arc::new(ReqwestBackend::new(&cli.api_url)));
    let session = Arc::new(
        SessionManager::restore(api.clone(), Arc::clone(&persist))
            .await
            .context("failed to restore session")?,
    );

    // Re-validate a restored token; a rejected one self-heals to anonymous.
    if !matches!(cli.command, Commands::Login { .. } | Commands::Signup { .. }) {
        if let Err(err) = session.init_auth().await {
            warn!(%err, "stored session is no longer valid");
        }
    }

    let books = BookStore::new(api.clone(), Arc::clone(&session), Arc::clone(&persist));
    let threads = ThreadStore::new(api, Arc::clone(&session), persist);
    books.restore().await.ok();
    threads.restore().await.ok();

    match cli.command {
        Commands::Login { username, password } => {
            session
                .log_in(&username, &password)
                .await
                .context("login failed")?;
            println!("logged in as {username}");
        }

        Commands::Signup {
            username,
            email,
            password,
        } => {
            session
                .sign_up(SignUpForm {
                    username: username.clone(),
                    email,
                    password1: password.clone(),
                    password2: password,
                    ..Default::default()
                })
                .await
                .context("sign-up failed")?;
            println!("account created, logged in as {username}");
        }

        Commands::Logout => {
            session.logout().await;
            println!("logged out");
        }

        Commands::Whoami => match session.current_user() {
            Some(user) => {
                println!("{} <{}>", user.username, user.email);
                println!(
                    "followers: {}  following: {}",
                    user.followers_count, user.followings_count
                );
            }
            None => println!("not logged in"),
        },

        Commands::Categories => {
            for category in books.fetch_categories().await.context("fetch failed")? {
                println!("{:>4}  {}", category.id, category.name);
            }
        }

        Commands::Books { command } => run_books(&books, command).await?,
        Commands::Threads { command } => run_threads(&threads, command).await?,
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

async fn run_books(books: &BookStore, command: BooksCommand) -> Result<()> {
    match command {
        BooksCommand::List {
            q,
            category,
            ordering,
        } => {
            let filters = ListFilters {
                q,
                category,
                ordering,
            };
            for book in books.fetch_books(&filters).await.context("fetch failed")? {
                println!("{:>5}  {}  - {}", book.id, book.title, book.author);
            }
        }

        BooksCommand::Show { id } => {
            let book = books.fetch_book_detail(id).await.context("fetch failed")?;
            println!("{} ({})", book.title, book.pub_date);
            if !book.sub_title.is_empty() {
                println!("{}", book.sub_title);
            }
            println!("by {} - {} likes", book.author, book.likes_count);
            println!();
            println!("{}", book.description);
        }

        BooksCommand::Mbti { mbti } => {
            let rec = books.recommend_mbti(&mbti).await.context("fetch failed")?;
            println!("{}: {}", rec.mbti, rec.reason);
            for book in rec.books {
                println!("{:>5}  {}", book.id, book.title);
            }
        }

        BooksCommand::Recommend { kind } => {
            for book in books
                .recommend_personal(&kind)
                .await
                .context("fetch failed (are you logged in?)")?
            {
                println!("{:>5}  {}", book.id, book.title);
            }
        }
    }
    Ok(())
}

async fn run_threads(threads: &ThreadStore, command: ThreadsCommand) -> Result<()> {
    match command {
        ThreadsCommand::List {
            q,
            category,
            ordering,
        } => {
            let filters = ListFilters {
                q,
                category,
                ordering,
            };
            for thread in threads
                .fetch_threads(&filters)
                .await
                .context("fetch failed")?
            {
                let author = thread
                    .user_info
                    .as_ref()
                    .map(|u| u.username.as_str())
                    .unwrap_or("?");
                println!(
                    "{:>5}  {}  - {} ({} likes)",
                    thread.id, thread.title, author, thread.likes_count
                );
            }
        }

        ThreadsCommand::Show { id } => {
            let thread = threads
                .fetch_thread_detail(id)
                .await
                .context("fetch failed")?;
            println!("{}", thread.title);
            if let Some(book) = &thread.book_info {
                println!("about: {}", book.title);
            }
            println!("{} likes", thread.likes_count);
            println!();
            println!("{}", thread.content);
            if !thread.comments.is_empty() {
                println!();
                for comment in &thread.comments {
                    println!("  [{}] {}", comment.user, comment.content);
                }
            }
        }

        ThreadsCommand::Create {
            book,
            title,
            content,
        } => {
            let thread = threads
                .create_thread(&ThreadDraft {
                    book,
                    title,
                    content,
                    reading_date: None,
                })
                .await
                .context("create failed (are you logged in?)")?;
            println!("created thread {}", thread.id);
        }

        ThreadsCommand::Like { id } => {
            // The like patch applies to the selected detail item.
            threads
                .fetch_thread_detail(id)
                .await
                .context("fetch failed")?;
            let status = threads
                .toggle_like(id)
                .await
                .context("like failed (are you logged in?)")?;
            println!(
                "{} - {} likes",
                if status.liked { "liked" } else { "unliked" },
                status.likes_count
            );
        }

        ThreadsCommand::Comment { id, content } => {
            threads
                .fetch_thread_detail(id)
                .await
                .context("fetch failed")?;
            let comment = threads
                .create_comment(id, &content)
                .await
                .context("comment failed (are you logged in?)")?;
            println!("comment {} added", comment.id);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_tracing(default: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
