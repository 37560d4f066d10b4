use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;
use dat_sdk::{AttachmentTarget, Dat, Document, Format, IngestConfig, IngestEvent, Primary};
use serde_json::{json, Value};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let dat = Dat::open(&cli.data)
        .with_context(|| format!("opening data directory {}", cli.data.display()))?;
    tracing::debug!(data = %cli.data.display(), documents = dat.count(), "data directory ready");
    let out = cli.output;

    match cli.command {
        Command::Import(args) => cmd_import(&dat, args, out, cli.verbose),
        Command::Get(args) => cmd_get(&dat, args, out),
        Command::Cat(args) => cmd_cat(&dat, args),
        Command::History(args) => cmd_history(&dat, args, out),
        Command::Count => {
            match out {
                OutputFormat::Text => println!("{}", dat.count()),
                OutputFormat::Json => println!("{}", json!({"count": dat.count()})),
            }
            Ok(())
        }
        Command::Blob(args) => cmd_blob(&dat, args.action, out),
    }
}

/// Effective ingestion options: config file (or the data directory's
/// defaults) overridden by flags.
pub fn ingest_config(args: &ImportArgs, defaults: &IngestConfig) -> anyhow::Result<IngestConfig> {
    let mut config = match &args.config {
        Some(path) => IngestConfig::load(path)
            .with_context(|| format!("loading ingest config {}", path.display()))?,
        None => defaults.clone(),
    };

    if args.csv {
        config.format = Format::Csv;
    }
    if args.tsv {
        config.format = Format::Csv;
        config.delimiter = Some("\t".into());
    }
    if args.binary {
        config.format = Format::BinaryRows;
    }
    match args.primary.as_slice() {
        [] => {}
        [field] => config.primary = Some(Primary::Field(field.clone())),
        fields => config.primary = Some(Primary::Composite(fields.to_vec())),
    }
    if args.hash {
        config.hash = true;
    }
    if let Some(separator) = &args.separator {
        config.separator = Some(separator.clone());
    }
    if args.no_header {
        config.header_row = false;
    }
    if !args.columns.is_empty() {
        config.columns = Some(args.columns.clone());
    }
    if let Some(root) = &args.attachment_root {
        config.attachment_root = Some(root.clone());
    }
    if args.quiet {
        config.quiet = true;
    }
    Ok(config)
}

fn open_input(file: &str) -> anyhow::Result<Box<dyn Read + Send>> {
    if file == "-" {
        return Ok(Box::new(io::stdin()));
    }
    let f = File::open(file).with_context(|| format!("opening {file}"))?;
    Ok(Box::new(io::BufReader::new(f)))
}

fn cmd_import(dat: &Dat, args: ImportArgs, out: OutputFormat, verbose: bool) -> anyhow::Result<()> {
    let config = ingest_config(&args, dat.ingest_defaults())?;
    let input = open_input(&args.file)?;

    for event in dat.ingest(input, &config) {
        match event {
            IngestEvent::Committed { index, key, version } => {
                if out == OutputFormat::Json {
                    println!("{}", json!({"index": index, "key": key, "version": version}));
                } else if verbose {
                    println!("  {} {} v{}", "✓".green(), key, version);
                }
            }
            IngestEvent::Conflict { index, conflict } => match out {
                OutputFormat::Json => println!(
                    "{}",
                    json!({
                        "index": index,
                        "type": "conflict",
                        "key": conflict.key(),
                        "currentVersion": conflict.current_version(),
                        "current": conflict.current.to_value(),
                    })
                ),
                OutputFormat::Text => println!(
                    "  {} #{index} {}: stored version {}",
                    "conflict".yellow(),
                    conflict.key().bold(),
                    conflict.current_version()
                ),
            },
            IngestEvent::Skipped { index, error } => match out {
                OutputFormat::Json => println!(
                    "{}",
                    json!({"index": index, "type": error.kind(), "error": error.to_string()})
                ),
                OutputFormat::Text => println!("  {} #{index} {error}", "skipped".red()),
            },
            IngestEvent::Fatal(error) => {
                if out == OutputFormat::Json {
                    println!("{}", json!({"type": error.kind(), "error": error.to_string()}));
                }
                bail!("import aborted ({}): {error}", error.kind());
            }
            IngestEvent::Completed(summary) => match out {
                OutputFormat::Json => println!("{}", json!({"type": "completed", "summary": summary})),
                OutputFormat::Text => println!(
                    "{} Imported {} document(s), {} conflict(s), {} skipped",
                    "✓".green().bold(),
                    summary.committed.to_string().bold(),
                    summary.conflicts,
                    summary.skipped
                ),
            },
        }
    }
    Ok(())
}

fn print_document(doc: &Document, out: OutputFormat) -> anyhow::Result<()> {
    match out {
        OutputFormat::Json => println!("{}", doc.to_value()),
        OutputFormat::Text => {
            println!("{} {}", doc.key.yellow().bold(), format!("v{}", doc.version).dimmed());
            println!("{}", serde_json::to_string_pretty(&Value::Object(doc.fields.clone()))?);
            for (name, attachment) in &doc.attachments {
                println!(
                    "  {} {} {} ({} bytes)",
                    "attachment".cyan(),
                    name,
                    attachment.hash.short_hex().dimmed(),
                    attachment.size
                );
            }
        }
    }
    Ok(())
}

fn cmd_get(dat: &Dat, args: GetArgs, out: OutputFormat) -> anyhow::Result<()> {
    let doc = match args.version {
        Some(version) => dat.get_version(&args.key, version)?,
        None => dat.get(&args.key)?,
    };
    print_document(&doc, out)
}

fn cmd_cat(dat: &Dat, args: CatArgs) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    if args.values {
        for fields in dat.scan_values()? {
            writeln!(stdout, "{}", Value::Object(fields))?;
        }
    } else {
        for doc in dat.scan()? {
            writeln!(stdout, "{}", doc.to_value())?;
        }
    }
    Ok(())
}

fn cmd_history(dat: &Dat, args: HistoryArgs, out: OutputFormat) -> anyhow::Result<()> {
    for doc in dat.history(&args.key)? {
        print_document(&doc, out)?;
    }
    Ok(())
}

fn cmd_blob(dat: &Dat, action: BlobAction, out: OutputFormat) -> anyhow::Result<()> {
    match action {
        BlobAction::Put {
            name,
            file,
            key,
            version,
        } => {
            let mut reader = open_file(&file)?;
            let target = AttachmentTarget { key, version };
            let written = dat.write_attachment(&name, &mut reader, target)?;
            match out {
                OutputFormat::Json => println!("{}", written.document.to_value()),
                OutputFormat::Text => println!(
                    "{} {} -> {} v{} ({} bytes, {})",
                    "✓".green().bold(),
                    name,
                    written.document.key.yellow(),
                    written.document.version,
                    written.attachment.size,
                    written.attachment.hash.to_hex().dimmed()
                ),
            }
        }
        BlobAction::Get {
            key,
            name,
            out: destination,
        } => {
            let mut reader = dat.read_attachment(&key, &name)?;
            match destination {
                Some(path) => {
                    let mut file = File::create(&path)
                        .with_context(|| format!("creating {}", path.display()))?;
                    io::copy(&mut reader, &mut file)?;
                }
                None => {
                    io::copy(&mut reader, &mut io::stdout().lock())?;
                }
            }
        }
        BlobAction::Exists { hash } => {
            let exists = dat.blob_exists(&hash);
            match out {
                OutputFormat::Json => println!("{}", json!({"hash": hash, "exists": exists})),
                OutputFormat::Text if exists => println!("{} {}", "✓".green(), hash),
                OutputFormat::Text => println!("{} {}", "✗".red(), hash),
            }
            if !exists {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

fn open_file(path: &Path) -> anyhow::Result<File> {
    File::open(path).with_context(|| format!("opening {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn import_args(argv: &[&str]) -> ImportArgs {
        let mut full = vec!["dat", "import"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Command::Import(args) => args,
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn flags_override_defaults() {
        let args = import_args(&["x", "--tsv", "--primary", "a,b", "--hash", "-q"]);
        let config = ingest_config(&args, &IngestConfig::default()).unwrap();
        assert_eq!(config.format, Format::Csv);
        assert_eq!(config.csv_delimiter().unwrap(), b'\t');
        assert_eq!(config.primary, Some(Primary::from(["a", "b"])));
        assert!(config.hash && config.quiet);
    }

    #[test]
    fn tsv_keeps_the_default_key_separator() {
        let args = import_args(&["x", "--tsv", "--primary", "a,b"]);
        let config = ingest_config(&args, &IngestConfig::default()).unwrap();
        assert_eq!(config.csv_delimiter().unwrap(), b'\t');
        assert_eq!(config.key_separator(), "_");
    }

    #[test]
    fn single_primary_is_a_field() {
        let args = import_args(&["x", "--primary", "id"]);
        let config = ingest_config(&args, &IngestConfig::default()).unwrap();
        assert_eq!(config.primary, Some(Primary::from("id")));
    }

    #[test]
    fn defaults_survive_without_flags() {
        let args = import_args(&["x"]);
        let defaults = IngestConfig::csv().with_separator(";");
        let config = ingest_config(&args, &defaults).unwrap();
        assert_eq!(config.format, Format::Csv);
        assert_eq!(config.csv_delimiter().unwrap(), b';');
    }

    #[test]
    fn header_less_columns() {
        let args = import_args(&["x", "--csv", "--no-header", "--columns", "foo,bar"]);
        let config = ingest_config(&args, &IngestConfig::default()).unwrap();
        assert!(!config.header_row);
        assert_eq!(config.columns, Some(vec!["foo".into(), "bar".into()]));
    }

    #[test]
    fn config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingest.toml");
        std::fs::write(&path, "format = \"binary-rows\"\ncolumns = [\"a\"]\n").unwrap();
        let args = import_args(&["x", "--config", path.to_str().unwrap()]);
        let config = ingest_config(&args, &IngestConfig::default()).unwrap();
        assert_eq!(config.format, Format::BinaryRows);
    }
}
