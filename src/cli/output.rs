//! Output formatting for dissected frames.
//!
//! Address-like attributes (four-byte IPv4, six-byte MAC) are printed in
//! their usual notation, everything else through [`AttrValue`]'s display.

use std::io::Write;

use layerscope_core::protocol::{format_ipv4, format_mac};
use layerscope_core::{AttrValue, Attribute, Frame, Layer, LayerId};

/// What to print per matching frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// One line per frame (default)
    Summary,
    /// Indented layer tree with attributes
    Tree,
    /// Nothing per frame; only the final count
    Count,
}

/// Writes frames in the selected [`OutputMode`].
pub struct OutputFormatter {
    mode: OutputMode,
}

impl OutputFormatter {
    pub fn new(mode: OutputMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    pub fn write<W: Write>(&self, frame: &Frame, writer: &mut W) -> std::io::Result<()> {
        match self.mode {
            OutputMode::Summary => self.write_summary(frame, writer),
            OutputMode::Tree => self.write_tree(frame, writer),
            OutputMode::Count => Ok(()),
        }
    }

    fn write_summary<W: Write>(&self, frame: &Frame, writer: &mut W) -> std::io::Result<()> {
        let deepest = frame.layers().deepest();
        write!(
            writer,
            "{:>6} {} {:>5} {}",
            frame.seq(),
            format_timestamp(frame.timestamp_ns()),
            frame.captured_len(),
            frame.protocol_path(),
        )?;
        if !deepest.summary().is_empty() {
            write!(writer, "  {}", deepest.summary())?;
        }
        if frame.layers().iter().any(|(_, l)| l.has_error()) {
            write!(writer, "  [malformed]")?;
        }
        writeln!(writer)
    }

    fn write_tree<W: Write>(&self, frame: &Frame, writer: &mut W) -> std::io::Result<()> {
        write!(
            writer,
            "Frame {}: {} bytes captured",
            frame.seq(),
            frame.captured_len()
        )?;
        if frame.is_truncated() {
            write!(writer, " ({} on wire)", frame.original_len())?;
        }
        writeln!(writer, ", {}", format_timestamp(frame.timestamp_ns()))?;

        for &child in frame.layers().root().children() {
            write_layer(frame, child, 1, writer)?;
        }
        writeln!(writer)
    }
}

fn write_layer<W: Write>(
    frame: &Frame,
    id: LayerId,
    depth: usize,
    writer: &mut W,
) -> std::io::Result<()> {
    let layer: &Layer = &frame.layers()[id];
    let indent = "  ".repeat(depth);
    let token = layer.token().map_or("?", |t| t.as_str());

    write!(writer, "{indent}{token}")?;
    if !layer.summary().is_empty() {
        write!(writer, ": {}", layer.summary())?;
    }
    if !layer.tags().is_empty() {
        let tags: Vec<&str> = layer.tags().iter().map(|t| t.as_str()).collect();
        write!(writer, " [{}]", tags.join(", "))?;
    }
    if layer.has_error() {
        write!(writer, " (malformed)")?;
    }
    writeln!(writer)?;

    for attr in layer.attrs() {
        write_attr(attr, depth + 1, writer)?;
    }
    for &child in layer.children() {
        write_layer(frame, child, depth + 1, writer)?;
    }
    Ok(())
}

fn write_attr<W: Write>(attr: &Attribute, depth: usize, writer: &mut W) -> std::io::Result<()> {
    let indent = "  ".repeat(depth);
    write!(writer, "{indent}{} ({}): {}", attr.name, attr.id, format_value(&attr.value))?;
    if attr.error {
        write!(writer, " [error]")?;
    }
    writeln!(writer)?;

    for child in &attr.children {
        write_attr(child, depth + 1, writer)?;
    }
    Ok(())
}

/// Display a value, using address notation for address-sized byte strings.
pub fn format_value(value: &AttrValue) -> String {
    match value {
        AttrValue::Bytes(b) if b.len() == 4 => format_ipv4(b).to_string(),
        AttrValue::Bytes(b) if b.len() == 6 => format_mac(b).to_string(),
        AttrValue::Str(s) => s.to_string(),
        other => other.to_string(),
    }
}

/// `seconds.micros` since the epoch.
pub fn format_timestamp(ns: u64) -> String {
    format!("{}.{:06}", ns / 1_000_000_000, (ns % 1_000_000_000) / 1_000)
}
