//! chmkit - Inspect and extract CHM help files

use std::io::Write;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use chmkit::{Archive, ArchiveRegistry, TableOfContents, Topic};

#[derive(Parser)]
#[command(name = "chmkit")]
#[command(version, about = "Inspect and extract CHM help files", long_about = None)]
#[command(after_help = "EXAMPLES:
    chmkit info help.chm                    Show title, home page and contents paths
    chmkit list help.chm                    List every object in the archive
    chmkit cat help.chm /index.html         Write one object to stdout
    chmkit toc help.chm --json              Print the table of contents as JSON
    chmkit resolve help.chm /a%20b.html     Resolve a path through the virtual URL layer

Set RUST_LOG=chmkit=debug to trace parsing.")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show archive metadata
    Info {
        #[arg(value_name = "FILE")]
        file: String,
    },
    /// List directory entries
    List {
        #[arg(value_name = "FILE")]
        file: String,
    },
    /// Write an object's bytes to stdout
    Cat {
        #[arg(value_name = "FILE")]
        file: String,
        #[arg(value_name = "PATH")]
        path: String,
    },
    /// Print the table of contents
    Toc {
        #[arg(value_name = "FILE")]
        file: String,
        /// Print the keyword index instead
        #[arg(short, long)]
        index: bool,
        /// Emit JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve a virtual path and report its content type
    Resolve {
        #[arg(value_name = "FILE")]
        file: String,
        /// Internal path, percent-encoded as in a URL
        #[arg(value_name = "URL_PATH")]
        url_path: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Info { file } => show_info(&file),
        Command::List { file } => list(&file),
        Command::Cat { file, path } => cat(&file, &path),
        Command::Toc { file, index, json } => toc(&file, index, json),
        Command::Resolve { file, url_path } => resolve(&file, &url_path),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn show_info(path: &str) -> Result<(), String> {
    let archive = Archive::open(path).map_err(|e| e.to_string())?;
    let meta = archive.metadata();

    println!("File: {}", archive.path().display());
    println!("Id: {}", archive.unique_id());
    println!("Title: {}", archive.title().unwrap_or("(none)"));
    println!("Home: {}", archive.home_path().unwrap_or("(none)"));
    if let Some(toc) = archive.toc_path() {
        println!("Contents: {toc}");
    }
    if let Some(index) = archive.index_path() {
        println!("Index: {index}");
    }
    if let Some(lcid) = meta.lcid {
        println!("Language: {lcid:#06x}");
    }
    let entries = archive.entries().map_err(|e| e.to_string())?;
    println!("Objects: {}", entries.iter().filter(|e| !e.is_dir()).count());

    Ok(())
}

fn list(path: &str) -> Result<(), String> {
    let archive = Archive::open(path).map_err(|e| e.to_string())?;
    for entry in archive.entries().map_err(|e| e.to_string())? {
        println!(
            "{:>1} {:>10} {:>10}  {}",
            entry.section, entry.offset, entry.length, entry.path
        );
    }
    Ok(())
}

fn cat(path: &str, object: &str) -> Result<(), String> {
    let archive = Archive::open(path).map_err(|e| e.to_string())?;
    let data = archive.read_object(object).map_err(|e| e.to_string())?;
    std::io::stdout()
        .write_all(&data)
        .map_err(|e| e.to_string())
}

#[derive(Serialize)]
struct TopicJson<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    location: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<TopicJson<'a>>,
}

impl<'a> From<&'a Topic> for TopicJson<'a> {
    fn from(topic: &'a Topic) -> Self {
        Self {
            name: &topic.name,
            location: &topic.location,
            children: topic.children().iter().map(TopicJson::from).collect(),
        }
    }
}

fn toc(path: &str, index: bool, json: bool) -> Result<(), String> {
    let archive = Archive::open(path).map_err(|e| e.to_string())?;
    let tree = if index {
        TableOfContents::build_index(&archive)
    } else {
        TableOfContents::build(&archive)
    }
    .map_err(|e| e.to_string())?;

    if json {
        let roots: Vec<_> = tree.root_topics().iter().map(TopicJson::from).collect();
        let text = serde_json::to_string_pretty(&roots).map_err(|e| e.to_string())?;
        println!("{text}");
        return Ok(());
    }

    for (depth, topic) in &tree {
        let indent = "  ".repeat(depth);
        if topic.location.is_empty() {
            println!("{indent}{}", topic.name);
        } else {
            println!("{indent}{}  ({})", topic.name, topic.location);
        }
    }
    Ok(())
}

fn resolve(path: &str, url_path: &str) -> Result<(), String> {
    let archive = Archive::open(path).map_err(|e| e.to_string())?;
    let registry = ArchiveRegistry::default();
    registry.register(&archive).map_err(|e| e.to_string())?;

    let url = format!(
        "{}://{}/{}",
        registry.scheme(),
        archive.unique_id(),
        url_path.trim_start_matches('/')
    );
    let resource = registry.resolve_url(&url).map_err(|e| e.to_string())?;
    println!("URL: {url}");
    println!("Path: {}", resource.path);
    println!("Content-Type: {}", resource.content_type);
    println!("Length: {}", resource.data.len());

    registry.release(&archive);
    Ok(())
}
