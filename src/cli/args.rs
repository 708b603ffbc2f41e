//! Command-line argument definitions.

use std::path::PathBuf;

use clap::Parser;
use layerscope_core::{AliasTable, BufferBacking, SessionConfig, StreamConfig};

use super::OutputMode;

/// Dissect capture files into protocol layers and filter them.
#[derive(Parser, Debug)]
#[command(name = "layerscope")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Capture file to read (pcap, optionally gzip-compressed)
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Only show frames matching this filter expression
    #[arg(short = 'e', long = "filter", value_name = "FILTER")]
    pub filter: Option<String>,

    /// Short name for an attribute or protocol, e.g. `sport=udp.src`
    #[arg(long = "alias", value_name = "NAME=FIELD", value_parser = parse_alias)]
    pub aliases: Vec<(String, String)>,

    /// Dissection threads (defaults to available parallelism)
    #[arg(long = "threads")]
    pub threads: Option<usize>,

    /// Frames dissected and published together
    #[arg(long = "batch-size", default_value = "1024")]
    pub batch_size: usize,

    /// Print the full layer tree of each frame
    #[arg(long = "tree", conflicts_with = "count")]
    pub tree: bool,

    /// Print only the number of matching frames
    #[arg(long = "count")]
    pub count: bool,

    /// List registered dissectors and exit
    #[arg(long = "list-dissectors")]
    pub list_dissectors: bool,

    /// Storage for reassembled streams
    #[arg(long = "buffer", value_name = "BACKING", default_value = "heap")]
    pub buffer: BufferBacking,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn output_mode(&self) -> OutputMode {
        if self.count {
            OutputMode::Count
        } else if self.tree {
            OutputMode::Tree
        } else {
            OutputMode::Summary
        }
    }

    pub fn alias_table(&self) -> AliasTable {
        let mut table = AliasTable::new();
        for (name, field) in &self.aliases {
            table.insert(name.as_str(), field.as_str());
        }
        table
    }

    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::default()
            .with_batch_size(self.batch_size)
            .with_stream(StreamConfig::default().with_backing(self.buffer));
        if let Some(threads) = self.threads {
            config = config.with_threads(threads);
        }
        config
    }
}

fn parse_alias(s: &str) -> Result<(String, String), String> {
    let (name, field) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=FIELD, got '{s}'"))?;
    let (name, field) = (name.trim(), field.trim());
    if name.is_empty() || field.is_empty() {
        return Err(format!("expected NAME=FIELD, got '{s}'"));
    }
    Ok((name.to_string(), field.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_alias() {
        assert_eq!(
            parse_alias("sport=udp.src").unwrap(),
            ("sport".to_string(), "udp.src".to_string())
        );
        assert!(parse_alias("sport").is_err());
        assert!(parse_alias("=udp.src").is_err());
    }

    #[test]
    fn test_flags() {
        let args = Args::try_parse_from([
            "layerscope",
            "capture.pcap",
            "-e",
            "sport == 53",
            "--alias",
            "sport=udp.src",
            "--threads",
            "3",
            "--buffer",
            "anon",
            "-vv",
        ])
        .unwrap();

        assert_eq!(args.file, Some(PathBuf::from("capture.pcap")));
        assert_eq!(args.verbose, 2);
        assert_eq!(args.output_mode(), OutputMode::Summary);
        assert_eq!(args.alias_table().resolve("sport"), "udp.src");

        let config = args.session_config();
        assert_eq!(config.threads, 3);
        assert_eq!(config.stream.backing, BufferBacking::Anonymous);
    }

    #[test]
    fn test_tree_and_count_conflict() {
        assert!(Args::try_parse_from(["layerscope", "f.pcap", "--tree", "--count"]).is_err());
        let args = Args::try_parse_from(["layerscope", "f.pcap", "--count"]).unwrap();
        assert_eq!(args.output_mode(), OutputMode::Count);
    }

    #[test]
    fn test_unknown_backing_rejected() {
        assert!(Args::try_parse_from(["layerscope", "f.pcap", "--buffer", "disk"]).is_err());
    }
}
