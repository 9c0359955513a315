//! codetext CLI
//!
//! Inspect, render and re-armor stored fragment files.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codetext::{classify, render, string_to_fragment, RenderSyntax};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Extension for armored fragment storage files.
const ARMORED_EXT: &str = "ctx";
/// Extension for raw (control-character) fragment storage files.
const RAW_EXT: &str = "ctr";

#[derive(Parser, Debug)]
#[command(name = "codetext")]
#[command(version)]
#[command(about = "Inline-markup fragment storage tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the content of a stored fragment
    #[command(name = "t")]
    Show {
        /// Armored fragment file (default: stdin)
        #[arg(short = 'i', long)]
        input: Option<PathBuf>,

        /// Verbose output (tag payloads and annotations)
        #[arg(short, long)]
        verbose: bool,
    },

    /// Render a stored fragment to inline markup
    Render {
        /// Armored fragment file (default: stdin)
        #[arg(short = 'i', long)]
        input: Option<PathBuf>,
    },

    /// Print the plain text of a stored fragment, tags stripped
    Plain {
        /// Armored fragment file (default: stdin)
        #[arg(short = 'i', long)]
        input: Option<PathBuf>,
    },

    /// Armor raw storage files for transport
    Armor {
        /// Files or directories to process (directories are walked for .ctr files)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Unwrap armored storage files back to raw form
    Dearmor {
        /// Files or directories to process (directories are walked for .ctx files)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Show { input, verbose } => show_fragment(input, verbose),
        Commands::Render { input } => render_fragment(input),
        Commands::Plain { input } => plain_text(input),
        Commands::Armor { inputs, verbose } => convert_files(inputs, true, verbose),
        Commands::Dearmor { inputs, verbose } => convert_files(inputs, false, verbose),
    }
}

fn read_input(input: Option<PathBuf>) -> Result<String> {
    match input {
        Some(path) => {
            fs::read_to_string(&path).with_context(|| format!("Failed to read file: {}", path.display()))
        }
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer).context("Failed to read stdin")?;
            Ok(buffer)
        }
    }
}

fn load_fragment(input: Option<PathBuf>) -> Result<codetext::Fragment> {
    let armored = read_input(input)?;
    let storage = codetext::from_armored(armored.trim()).context("Failed to unwrap armored storage")?;
    string_to_fragment(&storage).context("Failed to parse fragment storage")
}

fn show_fragment(input: Option<PathBuf>, verbose: bool) -> Result<()> {
    let fragment = load_fragment(input)?;
    println!("text: {}", fragment.plain_text());
    println!("tags: {}", fragment.registry().len_live());
    for (handle, tag) in fragment.tag_sequence()? {
        if verbose {
            println!(
                "  {} {} id={} category={} data={:?} flags={:#x} annotations={:?}",
                handle,
                tag.tag_type().as_str(),
                tag.id(),
                tag.category(),
                tag.data(),
                tag.flags(),
                tag.annotation_kinds(),
            );
        } else {
            println!("  {} {} id={} category={}", handle, tag.tag_type().as_str(), tag.id(), tag.category());
        }
    }
    Ok(())
}

fn render_fragment(input: Option<PathBuf>) -> Result<()> {
    let fragment = load_fragment(input)?;
    let statuses = classify(&fragment).context("Failed to classify tags")?;
    let output =
        render(&fragment, &statuses, &RenderSyntax::default()).context("Failed to render fragment")?;
    println!("{}", output);
    Ok(())
}

fn plain_text(input: Option<PathBuf>) -> Result<()> {
    let fragment = load_fragment(input)?;
    println!("{}", fragment.plain_text());
    Ok(())
}

/// Expand files and directories into the list of files to convert.
fn collect_files(inputs: &[PathBuf], extension: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            for entry in walkdir::WalkDir::new(input) {
                let entry = entry.with_context(|| format!("Failed to walk: {}", input.display()))?;
                let path = entry.path();
                if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(extension) {
                    files.push(path.to_path_buf());
                }
            }
        } else {
            files.push(input.clone());
        }
    }
    Ok(files)
}

fn convert_file(path: &Path, to_armored: bool) -> Result<PathBuf> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read: {}", path.display()))?;
    let (converted, new_ext) = if to_armored {
        (codetext::to_armored(&content), ARMORED_EXT)
    } else {
        let raw = codetext::from_armored(content.trim())
            .with_context(|| format!("Invalid armored storage: {}", path.display()))?;
        (raw, RAW_EXT)
    };
    let target = path.with_extension(new_ext);
    fs::write(&target, converted).with_context(|| format!("Failed to write: {}", target.display()))?;
    Ok(target)
}

fn convert_files(inputs: Vec<PathBuf>, to_armored: bool, verbose: bool) -> Result<()> {
    let source_ext = if to_armored { RAW_EXT } else { ARMORED_EXT };
    let files = collect_files(&inputs, source_ext)?;
    for path in &files {
        let target = convert_file(path, to_armored)?;
        if verbose {
            println!("{} -> {}", path.display(), target.display());
        }
    }
    println!("{} file(s) processed", files.len());
    Ok(())
}
