//! Opens a dynamic library, or a pseudo-handle, and reports where symbols resolve.

use std::{fmt::Write, io, path::PathBuf, process::ExitCode};

use clap::Parser;
use color_eyre::eyre::{self, WrapErr};
use dl_handle::{Error, Handle, OpenFlags};
use once_cell::sync::Lazy;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Log filter used when `DL_PROBE_LOG` is unset or invalid.
const DEFAULT_LOG_FILTER: &str = "warn";

/// Extra loader flags OR-ed into the open flags, for platform bits `OpenFlags` doesn't name.
static EXTRA_FLAGS: Lazy<OpenFlags> = Lazy::new(|| {
    std::env::var("DL_PROBE_FLAGS")
        .ok()
        .and_then(|value| parse_flags(&value))
        .map(OpenFlags::from_bits_retain)
        .unwrap_or(OpenFlags::empty())
});

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Library to open. The process image is opened if neither this nor a pseudo-handle is given.
    #[arg(short, long, conflicts_with_all = ["default", "next"])]
    library: Option<PathBuf>,

    /// Search through the DEFAULT pseudo-handle.
    #[arg(long, conflicts_with = "next")]
    default: bool,

    /// Search through the NEXT pseudo-handle.
    #[arg(long)]
    next: bool,

    /// Resolve all references while opening instead of lazily.
    #[arg(long)]
    now: bool,

    /// Make the library's symbols globally available.
    #[arg(long)]
    global: bool,

    /// Report the file backing the handle.
    #[arg(long)]
    file_name: bool,

    /// Close the handle after probing and report the loader status. Pseudo-handles can't be closed.
    #[arg(long, conflicts_with_all = ["default", "next"])]
    close: bool,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,

    /// Symbols to resolve.
    #[arg(required = true)]
    symbols: Vec<String>,
}

impl Args {
    fn flags(&self) -> OpenFlags {
        let mut flags = if self.now {
            OpenFlags::NOW
        } else {
            OpenFlags::LAZY
        };

        flags |= if self.global {
            OpenFlags::GLOBAL
        } else {
            OpenFlags::LOCAL
        };

        flags | *EXTRA_FLAGS
    }

    fn target(&self) -> String {
        if self.default {
            "DEFAULT".to_owned()
        } else if self.next {
            "NEXT".to_owned()
        } else if let Some(library) = &self.library {
            library.display().to_string()
        } else {
            "process image".to_owned()
        }
    }
}

/// Parses a decimal or `0x`-prefixed hexadecimal flag value.
fn parse_flags(value: &str) -> Option<i32> {
    let value = value.trim();
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => i32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

#[derive(Serialize, Debug, Default)]
struct Report {
    target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_name: Option<PathBuf>,
    symbols: Vec<SymbolReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    close_status: Option<i32>,
}

#[derive(Serialize, Debug)]
struct SymbolReport {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Report {
    fn all_resolved(&self) -> bool {
        self.symbols.iter().all(|symbol| symbol.address.is_some())
    }

    fn render(&self) -> String {
        let mut out = String::new();

        writeln!(out, "target: {}", self.target).unwrap();
        if let Some(file_name) = &self.file_name {
            writeln!(out, "file name: {}", file_name.display()).unwrap();
        }

        for symbol in &self.symbols {
            match (&symbol.address, &symbol.error) {
                (Some(address), _) => writeln!(out, "{} {address}", symbol.name).unwrap(),
                (None, Some(error)) => writeln!(out, "{} not found: {error}", symbol.name).unwrap(),
                (None, None) => writeln!(out, "{} not found", symbol.name).unwrap(),
            }
        }

        if let Some(status) = self.close_status {
            writeln!(out, "close: {status}").unwrap();
        }

        out
    }
}

/// Resolves every symbol, recording failures in the report instead of stopping at the first.
fn probe(handle: &Handle, symbols: &[String], report: &mut Report) -> eyre::Result<()> {
    for name in symbols {
        let symbol = match handle.symbol(name) {
            Ok(ptr) => SymbolReport {
                name: name.clone(),
                address: Some(format!("{ptr:p}")),
                error: None,
            },
            Err(Error::SymbolNotFound { message, .. }) => SymbolReport {
                name: name.clone(),
                address: None,
                error: Some(message),
            },
            Err(err) => return Err(err).wrap_err_with(|| format!("error resolving {name}")),
        };

        report.symbols.push(symbol);
    }

    Ok(())
}

fn main() -> eyre::Result<ExitCode> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("DL_PROBE_LOG")
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let mut report = Report {
        target: args.target(),
        ..Report::default()
    };

    let mut owned = None;
    let handle: &Handle = if args.default {
        dl_handle::default_handle()?
    } else if args.next {
        dl_handle::next_handle()?
    } else {
        let handle = Handle::open(args.library.as_ref(), args.flags())
            .wrap_err_with(|| format!("error opening {}", report.target))?;
        owned.insert(handle)
    };

    if args.file_name {
        report.file_name = handle.file_name()?;
    }

    probe(handle, &args.symbols, &mut report)?;

    if args.close {
        if let Some(handle) = owned.as_mut() {
            report.close_status = Some(handle.close().wrap_err("error closing the handle")?);
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render());
    }

    Ok(if report.all_resolved() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use expect_test::expect;

    use super::*;

    fn sample_report() -> Report {
        Report {
            target: "libc.so.6".to_owned(),
            file_name: Some(PathBuf::from("/usr/lib/libc.so.6")),
            symbols: vec![
                SymbolReport {
                    name: "calloc".to_owned(),
                    address: Some("0x7f0000001000".to_owned()),
                    error: None,
                },
                SymbolReport {
                    name: "fooo".to_owned(),
                    address: None,
                    error: Some("undefined symbol: fooo".to_owned()),
                },
            ],
            close_status: Some(0),
        }
    }

    #[test]
    fn render_text() {
        expect![[r#"
            target: libc.so.6
            file name: /usr/lib/libc.so.6
            calloc 0x7f0000001000
            fooo not found: undefined symbol: fooo
            close: 0
        "#]]
        .assert_eq(&sample_report().render());
    }

    #[test]
    fn render_json() {
        expect![[r#"
            {
              "target": "libc.so.6",
              "file_name": "/usr/lib/libc.so.6",
              "symbols": [
                {
                  "name": "calloc",
                  "address": "0x7f0000001000"
                },
                {
                  "name": "fooo",
                  "error": "undefined symbol: fooo"
                }
              ],
              "close_status": 0
            }"#]]
        .assert_eq(&serde_json::to_string_pretty(&sample_report()).unwrap());
    }

    #[test]
    fn all_resolved() {
        let mut report = sample_report();
        assert!(!report.all_resolved());

        report.symbols.pop();
        assert!(report.all_resolved());
    }

    #[test]
    fn parse_flag_values() {
        assert_eq!(parse_flags("8"), Some(8));
        assert_eq!(parse_flags(" 0x100 "), Some(0x100));
        assert_eq!(parse_flags("0X8"), Some(8));
        assert_eq!(parse_flags("deepbind"), None);
    }

    #[test]
    fn flags_from_args() {
        let args = Args::try_parse_from(["dl-probe", "--now", "--global", "malloc"]).unwrap();
        assert!(args.flags().contains(OpenFlags::NOW | OpenFlags::GLOBAL));

        let args = Args::try_parse_from(["dl-probe", "malloc"]).unwrap();
        assert!(args.flags().contains(OpenFlags::LAZY | OpenFlags::LOCAL));
        assert_eq!(args.target(), "process image");
    }

    #[test]
    fn conflicting_targets() {
        assert!(Args::try_parse_from(["dl-probe", "--default", "--next", "malloc"]).is_err());
        assert!(
            Args::try_parse_from(["dl-probe", "--library", "libc.so.6", "--next", "malloc"])
                .is_err()
        );
        assert!(Args::try_parse_from(["dl-probe", "--default"]).is_err());
    }

    #[test]
    fn close_requires_owned_handle() {
        assert!(Args::try_parse_from(["dl-probe", "--default", "--close", "malloc"]).is_err());
        assert!(Args::try_parse_from(["dl-probe", "--next", "--close", "malloc"]).is_err());

        let args = Args::try_parse_from(["dl-probe", "--close", "malloc"]).unwrap();
        assert!(args.close);
        let args =
            Args::try_parse_from(["dl-probe", "--library", "libc.so.6", "--close", "malloc"])
                .unwrap();
        assert!(args.close);
    }
}
