//! Output formatting: table, JSON, YAML, plain.
//!
//! Table output goes through `tabled`; the structured formats serialize the
//! underlying snapshots so scripts see the same field names the library
//! publishes.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};
use uicc_core::ProfileState;

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

// ── Color ────────────────────────────────────────────────────────────

pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
    }
}

/// Profile state for a table cell: green when usable, yellow when waiting
/// on the user, red when the card is unusable.
pub fn paint_state(state: ProfileState, color: bool) -> String {
    let text = state.to_string();
    if !color {
        return text;
    }
    match state {
        ProfileState::Loaded | ProfileState::Ready => text.green().to_string(),
        s if s.is_locked() => text.yellow().to_string(),
        ProfileState::CardIoError | ProfileState::CardRestricted => text.red().to_string(),
        _ => text.dimmed().to_string(),
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a list in the chosen format. `plain` emits one `id_fn` per line.
pub fn render_list<T, R>(
    format: OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
    R: Tabled,
{
    match format {
        OutputFormat::Table => {
            let rows: Vec<R> = data.iter().map(to_row).collect();
            Ok(Table::new(rows).with(Style::rounded()).to_string())
        }
        OutputFormat::Plain => Ok(data.iter().map(id_fn).collect::<Vec<_>>().join("\n")),
        structured => render_structured(structured, data),
    }
}

/// Render one item. Table output uses a hand-built key/value view.
pub fn render_single<T>(
    format: OutputFormat,
    data: &T,
    detail_fn: impl Fn(&T) -> String,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
{
    match format {
        OutputFormat::Table => Ok(detail_fn(data)),
        OutputFormat::Plain => Ok(id_fn(data)),
        structured => render_structured(structured, data),
    }
}

/// Two-column key/value table for detail views. Rows with no value are
/// skipped.
pub fn detail_table(rows: &[(&str, Option<String>)]) -> String {
    let mut builder = tabled::builder::Builder::default();
    for (key, value) in rows {
        if let Some(value) = value {
            builder.push_record([(*key).to_owned(), value.clone()]);
        }
    }
    builder.build().with(Style::rounded()).to_string()
}

pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

fn render_structured<T: serde::Serialize + ?Sized>(
    format: OutputFormat,
    data: &T,
) -> Result<String, CliError> {
    Ok(match format {
        OutputFormat::JsonCompact => serde_json::to_string(data)?,
        OutputFormat::Yaml => serde_yaml::to_string(data)?,
        _ => serde_json::to_string_pretty(data)?,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn plain_state_has_no_escape_codes() {
        assert_eq!(paint_state(ProfileState::PinRequired, false), "PIN_REQUIRED");
        assert!(paint_state(ProfileState::Loaded, true).contains("\u{1b}["));
    }

    #[test]
    fn detail_table_skips_missing_values() {
        let table = detail_table(&[("IMSI", Some("310260123456789".into())), ("MSISDN", None)]);
        assert!(table.contains("310260123456789"));
        assert!(!table.contains("MSISDN"));
    }

    #[test]
    fn compact_json_is_one_line() {
        let out = render_single(OutputFormat::JsonCompact, &vec![1, 2], |_| String::new(), |_| String::new())
            .unwrap();
        assert_eq!(out, "[1,2]");
    }
}
