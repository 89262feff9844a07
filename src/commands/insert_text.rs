use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::*;

use super::{load_config, open_with, parse_meta};

pub enum Source {
    File(PathBuf),
    Inline(String),
    Stdin,
}

impl Source {
    pub fn from_args(file: Option<PathBuf>, text: Option<String>) -> Self {
        match (file, text) {
            (Some(path), _) if path == Path::new("-") => Source::Stdin,
            (Some(path), _) => Source::File(path),
            (None, Some(text)) => Source::Inline(text),
            (None, None) => Source::Stdin,
        }
    }

    fn read(self) -> Result<String> {
        match self {
            Source::File(path) => std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read {}", path.display())),
            Source::Inline(text) => Ok(text),
            Source::Stdin => {
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf)?;
                Ok(buf)
            }
        }
    }
}

pub fn run(
    config_path: Option<&Path>,
    source: Source,
    meta: &[String],
    max_sentences: Option<usize>,
    validate: bool,
    json: bool,
) -> Result<()> {
    let metadata = parse_meta(meta)?;
    let text = source.read()?;

    let config = load_config(config_path)?;
    let max_sentences = max_sentences.unwrap_or(config.max_sentences_per_chunk);
    let index = open_with(&config)?;

    let metadata = (!metadata.is_empty()).then_some(metadata);
    let ids = index.insert_text_in_chunks(&text, metadata.as_ref(), max_sentences, validate)?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "chunks": ids.len(),
                "max_sentences_per_chunk": max_sentences,
                "ids": ids,
            }))?
        );
    } else if ids.is_empty() {
        println!("{} No sentences found, nothing inserted", "!".yellow().bold());
    } else {
        println!(
            "{} Inserted {} chunks ({} sentences max each)",
            "✓".green().bold(),
            ids.len().to_string().cyan(),
            max_sentences
        );
        for id in &ids {
            println!("  {} {}", "→".dimmed(), id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_selection() {
        assert!(matches!(Source::from_args(None, None), Source::Stdin));
        assert!(matches!(
            Source::from_args(None, Some("hi".into())),
            Source::Inline(t) if t == "hi"
        ));
        assert!(matches!(
            Source::from_args(Some(PathBuf::from("-")), None),
            Source::Stdin
        ));
        assert!(matches!(
            Source::from_args(Some(PathBuf::from("a.txt")), None),
            Source::File(_)
        ));
    }
}
