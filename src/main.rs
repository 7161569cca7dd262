use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use blockstream::block::{BlockKind, BlockType};
use blockstream::highlight::highlight_requests;
use blockstream::plugin::RenderProps;
use blockstream::{
    Block, Config, Plugin, PluginRuntime, StreamSnapshot, StreamStatus, StreamingPipeline,
    chunk_channel,
};
use clap::{Parser, ValueEnum};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    /// One line per block
    Text,
    /// One JSON snapshot per line
    Json,
}

#[derive(Parser)]
#[command(name = "blockstream")]
#[command(about = "Replay a Markdown file as a chunked stream and print the parsed blocks")]
struct Cli {
    /// Input Markdown file (reads stdin when omitted)
    input: Option<PathBuf>,

    /// Config file
    #[arg(short, long, default_value = "blockstream.toml")]
    config: PathBuf,

    /// Characters per chunk
    #[arg(long, default_value_t = 8)]
    chunk_size: usize,

    /// Delay between chunks in milliseconds
    #[arg(long, default_value_t = 5)]
    delay_ms: u64,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Print only the final snapshot
    #[arg(long)]
    final_only: bool,

    /// Render completed blocks through the builtin terminal renderers
    #[arg(long)]
    render: bool,
}

fn read_input(path: Option<&PathBuf>) -> io::Result<String> {
    match path {
        Some(path) => fs::read_to_string(path),
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

/// Split on char boundaries into pieces of at most `size` chars
fn chunks(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

fn terminal_plugin() -> Plugin {
    Plugin::new("terminal")
        .builtin()
        .component(BlockType::Heading, |props: &RenderProps<'_>| {
            let level = match props.block.kind {
                BlockKind::Heading { level, .. } => level as usize,
                _ => 1,
            };
            format!("{} {}", "#".repeat(level), props.block.content)
        })
        .component(BlockType::Code, |props: &RenderProps<'_>| {
            let (raw, language) = match &props.block.kind {
                BlockKind::Code {
                    raw_content,
                    language,
                } => (raw_content.as_str(), language.as_deref().unwrap_or("")),
                _ => (props.block.content.as_str(), ""),
            };
            let close = if props.is_complete { "```" } else { "``` (streaming)" };
            format!("```{language}\n{raw}\n{close}")
        })
        .component(BlockType::ThematicBreak, |_: &RenderProps<'_>| "-".repeat(40))
        .component(BlockType::Html, |props: &RenderProps<'_>| {
            format!("[html] {}", props.block.content)
        })
}

fn describe(block: &Block) -> String {
    let first_line = block.content.lines().next().unwrap_or("");
    let marker = if block.is_complete { "" } else { " …" };
    format!("{}\t{}{}", block.id, first_line, marker)
}

fn print_snapshot(snapshot: &StreamSnapshot, format: Format) {
    match format {
        Format::Json => match serde_json::to_string(snapshot) {
            Ok(json) => println!("{json}"),
            Err(e) => log::error!("Failed to serialize snapshot: {e}"),
        },
        Format::Text => {
            println!(
                "[{:?}] {} blocks{}",
                snapshot.status,
                snapshot.all_blocks().count(),
                if snapshot.has_incomplete_block { ", tail incomplete" } else { "" }
            );
            for block in snapshot.all_blocks() {
                println!("  {}", describe(block));
            }
        }
    }
}

async fn run(cli: Cli, markdown: String) -> Result<StreamStatus, blockstream::Error> {
    let config = Config::load(&cli.config);
    let runtime = Arc::new(PluginRuntime::new(vec![terminal_plugin()])?);
    runtime.init();

    let mut pipeline = StreamingPipeline::from_config(&config).with_runtime(Arc::clone(&runtime));
    let (tx, rx) = chunk_channel(config.stream.channel_capacity);
    let mut updates = pipeline.subscribe();
    pipeline.start(rx)?;

    let delay = Duration::from_millis(cli.delay_ms);
    let pieces = chunks(&markdown, cli.chunk_size);
    let producer = tokio::spawn(async move {
        for piece in pieces {
            tx.send(piece).await?;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        tx.complete().await
    });

    let format = cli.format;
    let final_only = cli.final_only;
    let printer = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            if snapshot.status.is_terminal() {
                break;
            }
            if !final_only {
                print_snapshot(&snapshot, format);
            }
        }
    });

    let status = pipeline.join().await;
    match producer.await {
        Ok(result) => result?,
        Err(e) => log::warn!("Producer task failed: {e}"),
    }
    printer.abort();

    let snapshot = pipeline.snapshot();
    print_snapshot(&snapshot, format);
    for request in highlight_requests(&snapshot.blocks) {
        log::debug!(
            "code block {} ({}) ready for highlighting",
            request.block_id,
            request.language.as_deref().unwrap_or("plain")
        );
    }

    if cli.render {
        println!();
        for block in snapshot.all_blocks() {
            let rendered = runtime
                .render(block, block.is_complete)
                .unwrap_or_else(|| block.content.clone());
            println!("{rendered}\n");
        }
    }

    log::debug!("Plugin stats: {:?}", runtime.stats());
    runtime.destroy();
    match snapshot.failure() {
        Some(err) => Err(err.into()),
        None => Ok(status),
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let cli = Cli::parse();

    let markdown = match read_input(cli.input.as_ref()) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Error reading input: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error starting runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(cli, markdown)) {
        Ok(StreamStatus::Completed) => ExitCode::SUCCESS,
        Ok(status) => {
            eprintln!("Stream ended with status {:?}", status);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
